use marionette_types::{AvatarError, ErrorReporter, UnexpectedError};

/// Default error sink: structured log lines.
///
/// Domain errors are the script author's problem and log at `warn`;
/// unexpected errors point at the host and log at `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report_error(&self, subject: &str, error: &AvatarError) {
        tracing::warn!(avatar = %subject, error = %error, "Avatar error");
    }

    fn report_unexpected(&self, subject: &str, error: &UnexpectedError) {
        tracing::error!(avatar = %subject, error = %error, "Unexpected avatar failure");
    }
}
