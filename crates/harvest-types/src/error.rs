use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid tier list: expected {expected} entries, got {actual}")]
    InvalidTierCount { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, TypesError>;
