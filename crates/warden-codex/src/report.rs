//! Progress reporting capability.
//!
//! The supervisor reports milestone and heartbeat messages through this
//! trait; the server side decides where they go (protocol notifications,
//! session diagnostics, or nowhere). Implementations must be best-effort:
//! never fail the caller, never block for long.

pub trait Reporter: Send + Sync {
    /// A progress or milestone message.
    fn report(&self, message: &str);

    /// A raw output line from the agent. Dropped by default.
    fn output(&self, _line: &str) {}
}

/// Reporter that discards every message.
pub struct NopReporter;

impl Reporter for NopReporter {
    fn report(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct RecordingReporter {
        pub messages: Mutex<Vec<String>>,
    }

    impl Reporter for RecordingReporter {
        fn report(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn nop_reporter_accepts_messages() {
        NopReporter.report("anything");
    }

    #[test]
    fn recording_reporter_captures_in_order() {
        let r = RecordingReporter {
            messages: Mutex::new(Vec::new()),
        };
        r.report("one");
        r.report("two");
        assert_eq!(*r.messages.lock().unwrap(), vec!["one", "two"]);
    }
}
