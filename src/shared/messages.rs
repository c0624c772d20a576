//! Control messages for the tracking loop

use crossbeam_channel::{Receiver, Sender};
use std::io::BufRead;
use std::thread;
use tracing::{debug, info};

/// Commands the tracking loop accepts between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Finish the session
    Quit,
    /// Zero the counter
    Reset,
}

impl ControlMessage {
    /// Parse a console line: `q` quits, `r` resets
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "q" | "quit" => Some(Self::Quit),
            "r" | "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Read control commands from a line source on a background thread
pub fn spawn_line_listener<R>(input: R) -> Receiver<ControlMessage>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || forward_lines(input, tx));
    rx
}

fn forward_lines<R: BufRead>(input: R, tx: Sender<ControlMessage>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        match ControlMessage::parse(&line) {
            Some(message) => {
                info!("Console command: {:?}", message);
                if tx.send(message).is_err() || message == ControlMessage::Quit {
                    break;
                }
            }
            None => debug!("Ignoring console input {:?}", line),
        }
    }
}
