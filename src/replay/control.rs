use std::io::{self, BufRead, Write};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Reset,
    Shutdown,
}

/// Requests collected since the previous poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSignals {
    pub reset: bool,
    pub shutdown: bool,
}

/// Sending half, held by whoever may reset or stop the replay.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Sender<ControlCommand>,
}

impl ControlHandle {
    pub fn request_reset(&self) {
        // a closed channel means the replay already ended
        let _ = self.tx.send(ControlCommand::Reset);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ControlCommand::Shutdown);
    }
}

/// Receiving half, polled by the replay loop once per frame.
#[derive(Debug)]
pub struct ControlToken {
    rx: Receiver<ControlCommand>,
}

impl ControlToken {
    pub fn poll(&self) -> ControlSignals {
        let mut signals = ControlSignals::default();
        for cmd in self.rx.try_iter() {
            match cmd {
                ControlCommand::Reset => signals.reset = true,
                ControlCommand::Shutdown => signals.shutdown = true,
            }
        }
        signals
    }
}

pub fn channel() -> (ControlHandle, ControlToken) {
    let (tx, rx) = unbounded::<ControlCommand>();
    (ControlHandle { tx }, ControlToken { rx })
}

/// Blocks the replay after a frame until someone lets it continue.
pub trait Acknowledger {
    fn wait(&mut self, frame_index: usize);
}

impl<F: FnMut(usize)> Acknowledger for F {
    fn wait(&mut self, frame_index: usize) {
        self(frame_index)
    }
}

pub struct NoAck;

impl Acknowledger for NoAck {
    fn wait(&mut self, _frame_index: usize) {}
}

/// Waits for a line on stdin. `r` requests a full reset, `q` stops the run.
pub struct StdinAck {
    control: ControlHandle,
}

impl StdinAck {
    pub fn new(control: ControlHandle) -> Self {
        Self { control }
    }
}

impl Acknowledger for StdinAck {
    fn wait(&mut self, frame_index: usize) {
        eprint!("frame {} done. Press enter to continue (r: reset, q: quit)... ", frame_index);
        let _ = io::stderr().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => {}
            Ok(_) => match line.trim() {
                "r" => self.control.request_reset(),
                "q" => self.control.shutdown(),
                _ => {}
            },
            Err(e) => warn!("failed to read acknowledgment: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_drains_pending_commands() {
        let (handle, token) = channel();
        assert_eq!(token.poll(), ControlSignals::default());

        handle.request_reset();
        handle.request_reset();
        assert_eq!(
            token.poll(),
            ControlSignals {
                reset: true,
                shutdown: false
            }
        );
        assert_eq!(token.poll(), ControlSignals::default());

        handle.clone().shutdown();
        assert!(token.poll().shutdown);
    }

    #[test]
    fn dropped_handle_is_not_a_shutdown() {
        let (handle, token) = channel();
        drop(handle);
        assert_eq!(token.poll(), ControlSignals::default());
    }
}
