use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommonError {
    #[error("Invalid rate policy: {0}")]
    InvalidPolicy(String),

    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),
}

pub type CommonResult<T> = std::result::Result<T, CommonError>;
