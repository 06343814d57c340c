use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkykeyError {
    #[error("skykey name already used by another key")]
    NameExists,

    #[error("skykey ID already exists")]
    IdExists,

    #[error("no skykey with that name")]
    NoSuchName,

    #[error("no skykey with that ID")]
    NoSuchId,

    #[error("skykey name exceeds the maximum length")]
    NameTooLong,

    #[error("unsupported skykey cipher type")]
    UnsupportedCipherType,

    #[error("incorrect nonce size")]
    BadNonceSize,

    #[error("malformed skykey encoding: {0}")]
    BadEncoding(String),

    #[error("invalid skykey file header: {0}")]
    BadHeader(String),

    #[error("unexpected end of skykey data")]
    ShortRead,

    #[error("skykey file does not match its recorded length")]
    TruncatedFile,

    #[error("{0}: {1}")]
    Io(String, #[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SkykeyError>;
