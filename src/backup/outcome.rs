use crate::backup::result_error::error::Error;

/// Recoverable-error accumulator for one run.
///
/// The flag only ever goes from clean to failed; nothing clears it.
#[derive(Debug, Default)]
pub struct RunOutcome {
    error_count: usize,
}

impl RunOutcome {
    /// Logs a recoverable error and marks the run as failed.
    pub fn record_error(&mut self, error: Error) {
        tracing::error!("{error}");
        self.error_count += 1;
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// One-line status used for the final log line and notification subjects.
    pub fn summary(&self, hostname: &str) -> String {
        if self.has_errors() {
            format!(
                "Backup of {hostname} completed with errors ({} recorded)",
                self.error_count
            )
        } else {
            format!("Backup of {hostname} completed successfully")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_starts_clean() {
        let outcome = RunOutcome::default();
        assert!(!outcome.has_errors());
        assert_eq!(outcome.summary("web1"), "Backup of web1 completed successfully");
    }

    #[test]
    fn test_outcome_flag_is_sticky() {
        let mut outcome = RunOutcome::default();
        outcome.record_error(Error::interrupted());
        outcome.record_error(Error::smtp_send_error("421"));
        assert!(outcome.has_errors());
        assert_eq!(outcome.error_count(), 2);
        assert!(outcome.summary("db").contains("completed with errors"));
    }
}
