use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Commands received over the control topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-parse the given flags and provision users
    Pre(Vec<String>),
    /// Start a timed run and publish its report
    Run,
    /// Leave the control loop
    Exit,
}

/// Process-wide interrupt flag shared between the signal handler, the
/// orchestrator, its workers and the control loop.
#[derive(Debug, Default)]
pub struct ControlState {
    stopped: AtomicBool,
    notify: Notify,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Calling it again has no effect.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }
}

/// Parse one pub/sub payload. Unknown verbs yield `None`.
pub fn parse_control_command(input: &str) -> Option<ControlCommand> {
    let mut parts = input.split_whitespace();
    let verb = parts.next()?;

    match verb.to_ascii_uppercase().as_str() {
        "PRE" => Some(ControlCommand::Pre(parts.map(str::to_string).collect())),
        "RUN" => Some(ControlCommand::Run),
        "EXIT" => Some(ControlCommand::Exit),
        _ => None,
    }
}
