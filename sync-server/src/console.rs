//! Interactive operator console on stdin.

use crate::commands::{self, CommandResult};
use crate::state::AppState;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub const USAGE: &str = "Commands:
  commit <version> [description|file]
  data list
  data show <version>
  data edit <version> [description|file]
  data rescan <version>
  data delete <version>
  data delete-latest
  data clear
  help
  exit | quit | stop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Commit { version: String, description: String },
    List,
    Show { version: String },
    Edit { version: String, description: String },
    Rescan { version: String },
    Delete { version: String },
    DeleteLatest,
    Clear,
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parse one console line. `None` for blank or unrecognized input.
    pub fn parse(line: &str) -> Option<Self> {
        let (head, rest) = split_word(line);
        match head {
            "commit" => {
                let (version, description) = split_word(rest);
                (!version.is_empty()).then(|| ConsoleCommand::Commit {
                    version: version.to_string(),
                    description: description.to_string(),
                })
            }
            "data" => Self::parse_data(rest),
            "help" => Some(ConsoleCommand::Help),
            "exit" | "quit" | "stop" => Some(ConsoleCommand::Exit),
            _ => None,
        }
    }

    fn parse_data(args: &str) -> Option<Self> {
        let (sub, rest) = split_word(args);
        let (version, description) = split_word(rest);
        let version = (!version.is_empty()).then(|| version.to_string());

        match sub {
            "list" => Some(ConsoleCommand::List),
            "clear" => Some(ConsoleCommand::Clear),
            "delete-latest" => Some(ConsoleCommand::DeleteLatest),
            "show" => version.map(|version| ConsoleCommand::Show { version }),
            "rescan" => version.map(|version| ConsoleCommand::Rescan { version }),
            "delete" => version.map(|version| ConsoleCommand::Delete { version }),
            "edit" => version.map(|version| ConsoleCommand::Edit {
                version,
                description: description.to_string(),
            }),
            _ => None,
        }
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

pub async fn execute(state: &AppState, command: ConsoleCommand) -> CommandResult {
    match command {
        ConsoleCommand::Commit {
            version,
            description,
        } => commands::commit(state, &version, &description).await,
        ConsoleCommand::List => commands::list(state).await,
        ConsoleCommand::Show { version } => commands::show(state, &version).await,
        ConsoleCommand::Edit {
            version,
            description,
        } => commands::edit(state, &version, &description).await,
        ConsoleCommand::Rescan { version } => commands::rescan(state, &version).await,
        ConsoleCommand::Delete { version } => commands::delete(state, &version).await,
        ConsoleCommand::DeleteLatest => commands::delete_latest(state).await,
        ConsoleCommand::Clear => commands::clear(state).await,
        ConsoleCommand::Help => CommandResult::ok(USAGE),
        ConsoleCommand::Exit => CommandResult::ok("Shutting down"),
    }
}

/// Read commands from stdin until EOF or shutdown. `exit` cancels `shutdown`.
pub async fn run_console(state: Arc<AppState>, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Console input closed");
                break;
            }
            Err(e) => {
                tracing::warn!("Console read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(command) = ConsoleCommand::parse(&line) else {
            tracing::warn!("Unknown command '{}'\n{}", line.trim(), USAGE);
            continue;
        };
        let exit = command == ConsoleCommand::Exit;

        let result = execute(&state, command).await;
        if result.success {
            tracing::info!("{}", result.message);
        } else {
            tracing::warn!("{}", result.message);
        }

        if exit {
            shutdown.cancel();
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commit() {
        assert_eq!(
            ConsoleCommand::parse("commit 1.2  big update\\nfixes"),
            Some(ConsoleCommand::Commit {
                version: "1.2".to_string(),
                description: "big update\\nfixes".to_string(),
            })
        );
        assert_eq!(
            ConsoleCommand::parse("commit 1.2"),
            Some(ConsoleCommand::Commit {
                version: "1.2".to_string(),
                description: String::new(),
            })
        );
        assert_eq!(ConsoleCommand::parse("commit"), None);
    }

    #[test]
    fn test_parse_data_subcommands() {
        assert_eq!(ConsoleCommand::parse("data list"), Some(ConsoleCommand::List));
        assert_eq!(ConsoleCommand::parse(" data clear "), Some(ConsoleCommand::Clear));
        assert_eq!(
            ConsoleCommand::parse("data delete-latest"),
            Some(ConsoleCommand::DeleteLatest)
        );
        assert_eq!(
            ConsoleCommand::parse("data show 1.0"),
            Some(ConsoleCommand::Show {
                version: "1.0".to_string()
            })
        );
        assert_eq!(
            ConsoleCommand::parse("data edit 1.0 new text"),
            Some(ConsoleCommand::Edit {
                version: "1.0".to_string(),
                description: "new text".to_string(),
            })
        );
        assert_eq!(
            ConsoleCommand::parse("data rescan 1.0"),
            Some(ConsoleCommand::Rescan {
                version: "1.0".to_string()
            })
        );
        assert_eq!(ConsoleCommand::parse("data delete"), None);
        assert_eq!(ConsoleCommand::parse("data frobnicate"), None);
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(ConsoleCommand::parse("help"), Some(ConsoleCommand::Help));
        for word in ["exit", "quit", "stop"] {
            assert_eq!(ConsoleCommand::parse(word), Some(ConsoleCommand::Exit));
        }
        assert_eq!(ConsoleCommand::parse(""), None);
        assert_eq!(ConsoleCommand::parse("reboot"), None);
    }
}
