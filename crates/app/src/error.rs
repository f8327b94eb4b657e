use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Dispatch(#[from] dispatch::DispatchError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
