pub type SpoolResult<T> = Result<T, SpoolError>;

#[derive(thiserror::Error, Debug)]
pub enum SpoolError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("draw error: {0}")]
    Draw(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpoolError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn draw(msg: impl Into<String>) -> Self {
        Self::Draw(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}
