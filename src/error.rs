use thiserror::Error;

// No NotFound variant: find/delete on an absent key return Ok(None).
#[derive(Debug, Error)]
pub enum Error {
    #[error("tree is busy with another mutation")]
    Busy,

    // Decode failure, or a structural invariant broke (empty internal
    // split, impossible underflow state, missing separator).
    #[error("corrupt page state: {0}")]
    Corrupt(String),

    #[error("block store error: {0}")]
    BackendError(String),

    #[error("invalid key: {0}")]
    KeyInvalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
