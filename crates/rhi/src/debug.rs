//! Routing of native debug-layer messages into the log.

use crate::backend::{Backend, DebugMessage, DebugSeverity};

/// Message ids the debug layer reports for patterns we use on purpose.
const BENIGN_MESSAGES: &[(u32, &str)] = &[
    (820, "render target cleared with a color other than its optimized clear value"),
    (821, "depth target cleared with a value other than its optimized clear value"),
];

/// Drops known-benign debug-layer messages. Errors and corruption reports are
/// never dropped.
#[derive(Clone, Debug)]
pub struct MessageFilter {
    denied: Vec<(u32, &'static str)>,
    min_severity: DebugSeverity,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            denied: BENIGN_MESSAGES.to_vec(),
            min_severity: DebugSeverity::Warning,
        }
    }
}

impl MessageFilter {
    /// Drops messages with `id`, unless they are errors.
    #[must_use]
    pub fn deny(mut self, id: u32, reason: &'static str) -> Self {
        self.denied.push((id, reason));
        self
    }

    #[must_use]
    pub fn min_severity(mut self, severity: DebugSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    #[must_use]
    pub fn passes(&self, message: &DebugMessage) -> bool {
        if message.severity >= DebugSeverity::Error {
            return true;
        }
        message.severity >= self.min_severity && !self.denied.iter().any(|(id, _)| *id == message.id)
    }

    /// Logs the messages reported since the last call. Returns the number of
    /// errors among them.
    pub fn report(&self, backend: &dyn Backend) -> usize {
        let mut errors = 0;
        for message in backend.drain_debug_messages() {
            if !self.passes(&message) {
                continue;
            }

            match message.severity {
                DebugSeverity::Corruption | DebugSeverity::Error => {
                    errors += 1;
                    log::error!("debug layer [{}]: {}", message.id, message.description);
                }
                DebugSeverity::Warning => log::warn!("debug layer [{}]: {}", message.id, message.description),
                DebugSeverity::Info => log::info!("debug layer [{}]: {}", message.id, message.description),
                DebugSeverity::Message => log::debug!("debug layer [{}]: {}", message.id, message.description),
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn message(severity: DebugSeverity, id: u32) -> DebugMessage {
        DebugMessage {
            severity,
            id,
            description: format!("message {id}"),
        }
    }

    #[test]
    fn errors_always_pass() {
        let filter = MessageFilter::default().deny(7, "noise");

        assert!(!filter.passes(&message(DebugSeverity::Warning, 820)));
        assert!(!filter.passes(&message(DebugSeverity::Warning, 7)));
        assert!(!filter.passes(&message(DebugSeverity::Info, 1)));
        assert!(filter.passes(&message(DebugSeverity::Warning, 1)));
        assert!(filter.passes(&message(DebugSeverity::Error, 7)));
        assert!(filter.passes(&message(DebugSeverity::Corruption, 820)));
    }

    #[test]
    fn report_drains_and_counts_errors() {
        let backend = NullBackend::new(1);
        backend.push_debug_message(message(DebugSeverity::Error, 1));
        backend.push_debug_message(message(DebugSeverity::Warning, 820));
        backend.push_debug_message(message(DebugSeverity::Corruption, 2));

        let filter = MessageFilter::default();
        assert_eq!(filter.report(&backend), 2);
        assert_eq!(filter.report(&backend), 0);
    }
}
