use std::sync::{Arc, OnceLock};

use marionette_types::{AvatarFailure, ErrorReporter};

/// First-error-wins failure slot for one avatar.
///
/// The first failure is kept and reported once; everything after it is
/// dropped. Safe to set from any thread, including the watchdog's.
pub struct AvatarErrorState {
    subject: String,
    first: OnceLock<AvatarFailure>,
    reporter: Arc<dyn ErrorReporter>,
}

impl AvatarErrorState {
    pub fn new(subject: impl Into<String>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            subject: subject.into(),
            first: OnceLock::new(),
            reporter,
        }
    }

    /// Returns `true` if this was the first failure.
    pub fn set(&self, failure: AvatarFailure) -> bool {
        match self.first.set(failure) {
            Ok(()) => {
                if let Some(failure) = self.first.get() {
                    self.reporter.report(&self.subject, failure);
                }
                true
            }
            Err(ignored) => {
                tracing::debug!(avatar = %self.subject, error = %ignored, "Ignoring follow-up error");
                false
            }
        }
    }

    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.first.get().is_some()
    }

    #[must_use]
    pub fn get(&self) -> Option<&AvatarFailure> {
        self.first.get()
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_types::{AvatarError, UnexpectedError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<String>>,
        unexpected: Mutex<Vec<String>>,
    }

    impl ErrorReporter for Recorder {
        fn report_error(&self, subject: &str, error: &AvatarError) {
            self.errors.lock().unwrap().push(format!("{subject}: {error}"));
        }
        fn report_unexpected(&self, subject: &str, error: &UnexpectedError) {
            self.unexpected.lock().unwrap().push(format!("{subject}: {error}"));
        }
    }

    #[test]
    fn only_first_error_is_kept_and_reported() {
        let recorder = Arc::new(Recorder::default());
        let state = AvatarErrorState::new("alpha", recorder.clone());

        assert!(state.set(AvatarError::script("first").into()));
        assert!(!state.set(AvatarError::script("second").into()));

        assert!(state.is_errored());
        assert_eq!(
            state.get(),
            Some(&AvatarFailure::Domain(AvatarError::script("first")))
        );
        assert_eq!(
            *recorder.errors.lock().unwrap(),
            vec!["alpha: script error: first".to_string()]
        );
    }

    #[test]
    fn unexpected_failures_use_their_own_channel() {
        let recorder = Arc::new(Recorder::default());
        let state = AvatarErrorState::new("beta", recorder.clone());

        state.set(UnexpectedError::new("join failed").into());

        assert!(recorder.errors.lock().unwrap().is_empty());
        assert_eq!(recorder.unexpected.lock().unwrap().len(), 1);
    }
}
