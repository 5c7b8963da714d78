pub mod config;
pub mod error;
pub mod logger;
pub mod lookup;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::CallConfig;
pub use error::{CallError, Result};
pub use session::{CallSession, CallSnapshot, CallState, Command, Role, SessionDeps, UiEvent};

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Maps a console line to a session command.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match word {
        "call" => Command::StartCall,
        "accept" => Command::AcceptCall,
        "reject" => Command::RejectCall,
        "cancel" => Command::CancelCall,
        "end" | "hangup" => Command::EndCall,
        "mute" | "audio" => Command::ToggleAudio,
        "camera" | "video" => Command::ToggleVideo,
        "share" => Command::StartScreenShare,
        "unshare" => Command::StopScreenShare,
        "say" if !rest.is_empty() => Command::SendMessage(rest.to_owned()),
        "quit" | "exit" => Command::Teardown,
        _ => return None,
    };
    Some(command)
}

/// Checks every configured ICE server, logging which ones answered.
pub async fn check_ice_servers(config: &CallConfig) -> bool {
    let mut all_ok = true;
    for server in &config.ice_servers {
        let ok = peer::ice::check_ice_server(server, Duration::from_secs(5)).await;
        if ok {
            info!("ICE server {} ({}) reachable", server.id, server.url);
        } else {
            warn!("ICE server {} ({}) unreachable", server.id, server.url);
        }
        all_ok &= ok;
    }
    all_ok
}

/// Runs one call session driven by console commands until it ends.
pub async fn run(config: CallConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!(
        "joining session {} as {} ({})",
        config.session_id, config.user_name, config.role
    );

    let deps = SessionDeps::production(&config);
    let session = CallSession::start(config, deps);
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match parse_command(&line) {
                    Some(command) => {
                        if !session.command(command) {
                            break;
                        }
                    }
                    None => warn!("unknown command `{}`", line.trim()),
                },
                None => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(UiEvent::Ended(reason)) => {
                    info!("call ended: {reason}");
                    break;
                }
                Ok(UiEvent::ChatMessage(msg)) => info!("[{}] {}", msg.sender_name, msg.text),
                Ok(UiEvent::Error(e)) => warn!("{}", e.user_message()),
                Ok(event) => info!("{event:?}"),
                Err(RecvError::Lagged(n)) => warn!("dropped {n} session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let last = session.shutdown().await;
    info!("session finished in state {}", last.state);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_commands() {
        assert_eq!(parse_command("call"), Some(Command::StartCall));
        assert_eq!(parse_command("  end "), Some(Command::EndCall));
        assert_eq!(
            parse_command("say  hello there "),
            Some(Command::SendMessage("hello there".into()))
        );
        assert_eq!(parse_command("say"), None);
        assert_eq!(parse_command("dance"), None);
    }
}
