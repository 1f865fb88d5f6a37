//! Error kinds and their exit dispositions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Something was shown (help, version); the driver exits 0.
    #[error("{0}")]
    Ignorable(String),
    /// The user backed out. `error_status` reflects `--on-cancel`.
    #[error("cancelled")]
    UserCancelled { error_status: bool },
    #[error("received signal {0}")]
    SignalReceived(i32),
    #[error("no input to filter: supply a filename or pipe data on stdin")]
    NoInput,
    #[error("terminal: {0}")]
    Screen(String),
    #[error(transparent)]
    Config(#[from] core_config::ConfigError),
    #[error("{context}: {source}")]
    Setup {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn setup(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Setup {
            context: context.into(),
            source,
        }
    }

    /// Errors that end the session without being failures.
    pub fn ignorable(&self) -> bool {
        matches!(
            self,
            AppError::Ignorable(_)
                | AppError::UserCancelled {
                    error_status: false
                }
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.ignorable() { 0 } else { 1 }
    }
}
