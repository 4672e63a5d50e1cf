use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidConfig { key: String, value: String },
}
