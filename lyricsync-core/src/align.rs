//! Attach a secondary line set to a primary timeline.

use crate::timeline::{LyricLine, TimedText};

/// Align `secondary` to `primary`, returning primary lines with
/// `translated_text` set.
///
/// Equal-length sets are paired by index. Otherwise each primary line takes
/// the nearest secondary line whose start is within `tolerance_ms`, each
/// secondary line is used at most once, and order is preserved. Unmatched
/// primary lines are left untranslated. Blank secondary text counts as no
/// translation.
#[must_use]
pub fn align_translation(
    primary: &[LyricLine],
    secondary: &[TimedText],
    tolerance_ms: u64,
) -> Vec<LyricLine> {
    if primary.len() == secondary.len() {
        return primary
            .iter()
            .zip(secondary)
            .map(|(line, translated)| with_text(line, Some(translated)))
            .collect();
    }

    let mut aligned = Vec::with_capacity(primary.len());
    let mut next = 0;

    for (i, line) in primary.iter().enumerate() {
        while next < secondary.len()
            && secondary[next].start_ms.saturating_add(tolerance_ms) < line.start_ms
        {
            next += 1;
        }

        let mut best: Option<(usize, u64)> = None;
        let mut j = next;
        let window_end = line.start_ms.saturating_add(tolerance_ms);
        while j < secondary.len() && secondary[j].start_ms <= window_end {
            let diff = secondary[j].start_ms.abs_diff(line.start_ms);
            if best.is_none_or(|(_, best_diff)| diff < best_diff) {
                best = Some((j, diff));
            }
            j += 1;
        }

        // Leave the candidate to the following primary line if it fits that
        // line strictly better.
        let matched = best.filter(|&(j, diff)| {
            primary.get(i + 1).is_none_or(|following| {
                secondary[j].start_ms.abs_diff(following.start_ms) >= diff
            })
        });

        match matched {
            Some((j, _)) => {
                aligned.push(with_text(line, Some(&secondary[j])));
                next = j + 1;
            }
            None => aligned.push(with_text(line, None)),
        }
    }

    aligned
}

fn with_text(line: &LyricLine, translated: Option<&TimedText>) -> LyricLine {
    LyricLine {
        translated_text: translated
            .map(|t| t.text.trim())
            .filter(|text| !text.is_empty())
            .map(str::to_string),
        ..line.clone()
    }
}
