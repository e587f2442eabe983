//! Line-based keyboard commands read from stdin.

use lyricsync_core::{EngineCommand, TranslationMode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "lyricsync::app::commands";

pub const HELP: &str = "\
commands:
  r            refresh lyrics for the current track
  t            cycle translation (none -> available variants -> none)
  tr <mode>    show a translation: none, romaji, or a language tag
  + / -        shift lyrics earlier / later by one step (repeat for more: ++, ---)
  o <ms>       shift lyrics by an exact amount (positive = earlier)
  h            show this help
  q            quit";

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(EngineCommand),
    Help,
    Quit,
}

/// Parse one input line. `offset_step_ms` is the size of a `+`/`-` step.
///
/// Returns `None` for blank or unrecognized input.
pub fn parse_line(line: &str, offset_step_ms: i64) -> Option<Input> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(word, rest)| (word, rest.trim()));

    match word {
        "" => None,
        "r" | "refresh" => Some(Input::Command(EngineCommand::RefreshLyrics)),
        "t" | "toggle" => Some(Input::Command(EngineCommand::ToggleTranslation)),
        "tr" | "translation" if !rest.is_empty() => Some(Input::Command(
            EngineCommand::SetTranslation(TranslationMode::from(rest.to_string())),
        )),
        "o" | "offset" => rest
            .parse::<i64>()
            .ok()
            .filter(|delta| *delta != 0)
            .map(|delta| Input::Command(EngineCommand::AdjustOffset(delta))),
        "h" | "help" | "?" => Some(Input::Help),
        "q" | "quit" | "exit" => Some(Input::Quit),
        steps if steps.chars().all(|c| c == '+') => {
            step_offset(steps.len(), offset_step_ms).map(Input::Command)
        }
        steps if steps.chars().all(|c| c == '-') => {
            step_offset(steps.len(), offset_step_ms.saturating_neg()).map(Input::Command)
        }
        _ => None,
    }
}

fn step_offset(count: usize, step_ms: i64) -> Option<EngineCommand> {
    let count = i64::try_from(count).ok()?;
    Some(EngineCommand::AdjustOffset(step_ms.saturating_mul(count)))
}

/// Forward stdin commands to the session until stdin closes, `q` is entered,
/// or the token is cancelled. `q` cancels the token.
pub async fn read_commands(
    commands: mpsc::Sender<EngineCommand>,
    offset_step_ms: i64,
    cancel_token: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(target: LOG_TARGET, "stdin closed, no more commands");
                break;
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to read stdin: {}", e);
                break;
            }
        };

        match parse_line(&line, offset_step_ms) {
            Some(Input::Command(command)) => {
                debug!(target: LOG_TARGET, "Command: {:?}", command);
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            Some(Input::Help) => println!("{HELP}"),
            Some(Input::Quit) => {
                info!(target: LOG_TARGET, "Quit requested");
                cancel_token.cancel();
                break;
            }
            None if line.trim().is_empty() => {}
            None => println!("unknown command {:?}, type h for help", line.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Option<EngineCommand> {
        match parse_line(line, 500) {
            Some(Input::Command(command)) => Some(command),
            _ => None,
        }
    }

    #[test]
    fn test_single_letter_commands() {
        assert_eq!(command("r"), Some(EngineCommand::RefreshLyrics));
        assert_eq!(command(" t "), Some(EngineCommand::ToggleTranslation));
        assert_eq!(parse_line("q", 500), Some(Input::Quit));
        assert_eq!(parse_line("h", 500), Some(Input::Help));
    }

    #[test]
    fn test_offset_steps() {
        assert_eq!(command("+"), Some(EngineCommand::AdjustOffset(500)));
        assert_eq!(command("---"), Some(EngineCommand::AdjustOffset(-1500)));
        assert_eq!(command("o -120"), Some(EngineCommand::AdjustOffset(-120)));
        assert_eq!(command("o 0"), None);
        assert_eq!(command("o soon"), None);
    }

    #[test]
    fn test_translation_mode() {
        assert_eq!(
            command("tr romaji"),
            Some(EngineCommand::SetTranslation(TranslationMode::Romaji))
        );
        assert_eq!(
            command("tr none"),
            Some(EngineCommand::SetTranslation(TranslationMode::None))
        );
        assert_eq!(command("tr"), None);
    }

    #[test]
    fn test_unknown_and_blank() {
        assert_eq!(parse_line("", 500), None);
        assert_eq!(parse_line("dance", 500), None);
        assert_eq!(parse_line("+-", 500), None);
    }
}
