use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("cannot bind socket {path}: {source}")]
    Socket {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] drover::CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    /// Startup precondition failures (bad config, unusable socket) exit
    /// with 2; runtime failures with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } | CliError::Socket { .. } => 2,
            _ => 1,
        }
    }
}
