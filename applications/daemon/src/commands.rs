/// Line-based command input on stdin
///
/// ```text
/// sync            sync every target now
/// sync <id>       sync one target now
/// watch on|off    enable or disable acting on local changes
/// status          print the current status table
/// rescan          look for new or removed markers now
/// quit            shut down gracefully
/// ```
use crate::report::render_status;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use turbo_core::{Command, TargetId, TriggerScope};
use turbo_sync::WatchStatusReporter;

/// One parsed stdin line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinRequest {
    Command(Command),
    Status,
}

/// Parse one line; `Ok(None)` for blank lines
pub fn parse_line(line: &str) -> Result<Option<StdinRequest>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let request = match (verb.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("sync", []) => StdinRequest::Command(Command::TriggerSync {
            scope: TriggerScope::All,
        }),
        ("sync", [id]) => StdinRequest::Command(Command::TriggerSync {
            scope: TriggerScope::Target(TargetId::new(*id)),
        }),
        ("watch", ["on"]) => StdinRequest::Command(Command::ToggleWatch { enabled: true }),
        ("watch", ["off"]) => StdinRequest::Command(Command::ToggleWatch { enabled: false }),
        ("status", []) => StdinRequest::Status,
        ("rescan", []) => StdinRequest::Command(Command::Rescan),
        ("quit" | "exit", []) => StdinRequest::Command(Command::Shutdown),
        _ => return Err(format!("unrecognized command: {}", line.trim())),
    };

    Ok(Some(request))
}

/// Read commands from stdin until EOF or until the scheduler goes away
pub fn spawn_stdin_commands(
    commands: mpsc::Sender<Command>,
    status: WatchStatusReporter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!("stdin closed, no more commands");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            };

            match parse_line(&line) {
                Ok(Some(StdinRequest::Command(command))) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Ok(Some(StdinRequest::Status)) => {
                    print!("{}", render_status(&status.latest()));
                }
                Ok(None) => {}
                Err(message) => tracing::warn!("{}", message),
            }
        }
    })
}
