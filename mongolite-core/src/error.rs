// mongolite-core/src/error.rs
use thiserror::Error;

/// Errors reported by the key-value store layer.
///
/// These stay internal to the engine where possible; the ones that cross the
/// public boundary are wrapped in [`MongoliteError::Backend`] so callers can
/// still dispatch on the originating layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Page allocation ran past the mapped size. Recoverable by resizing
    /// the map and retrying the transaction once.
    #[error("map full: page allocation past the mapped size")]
    MapFull,

    #[error("key already exists")]
    KeyExists,

    #[error("key not found")]
    NotFound,

    #[error("tree '{0}' not found")]
    TreeNotFound(String),

    #[error("another write transaction is already active")]
    Busy,

    #[error("key of {0} bytes exceeds the node budget")]
    KeyTooBig(usize),

    #[error("corrupt data file: {0}")]
    Corrupt(String),

    #[error("invalid store argument: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn code(&self) -> i32 {
        match self {
            StoreError::Io(_) => -1101,
            StoreError::MapFull => -1102,
            StoreError::KeyExists => -1103,
            StoreError::NotFound => -1104,
            StoreError::TreeNotFound(_) => -1105,
            StoreError::Busy => -1106,
            StoreError::KeyTooBig(_) => -1107,
            StoreError::Corrupt(_) => -1108,
            StoreError::Invalid(_) => -1109,
        }
    }
}

/// Library that produced an error. Stable machine-readable tag alongside
/// [`MongoliteError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// The engine itself.
    Mongolite,
    /// The key-value store.
    Backend,
    /// The document codec.
    Bob,
    /// The filter matcher.
    Matcher,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::Mongolite => "mongolite",
            ErrorSource::Backend => "backend",
            ErrorSource::Bob => "bob",
            ErrorSource::Matcher => "matcher",
        }
    }
}

#[derive(Error, Debug)]
pub enum MongoliteError {
    #[error("error: {0}")]
    Generic(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("invalid query: {0}")]
    Query(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Backend(#[from] StoreError),
}

impl MongoliteError {
    /// Stable numeric code. Engine errors live in -1000..-1099, the store in
    /// -1100..-1199, the codec in -1200..-1299, the matcher in -1300..-1399.
    pub fn code(&self) -> i32 {
        match self {
            MongoliteError::Generic(_) => -1000,
            MongoliteError::NotFound(_) => -1001,
            MongoliteError::AlreadyExists(_) => -1002,
            MongoliteError::InvalidArgument(_) => -1003,
            MongoliteError::OutOfMemory(_) => -1004,
            MongoliteError::Io(_) => -1005,
            MongoliteError::Transaction(_) => -1006,
            MongoliteError::Index(_) => -1007,
            MongoliteError::Backend(e) => e.code(),
            MongoliteError::Schema(_) => -1200,
            MongoliteError::Validation(_) => -1201,
            MongoliteError::Query(_) => -1300,
        }
    }

    /// The layer an error originated in.
    pub fn source_lib(&self) -> ErrorSource {
        match self {
            MongoliteError::Backend(_) => ErrorSource::Backend,
            MongoliteError::Schema(_) | MongoliteError::Validation(_) => ErrorSource::Bob,
            MongoliteError::Query(_) => ErrorSource::Matcher,
            _ => ErrorSource::Mongolite,
        }
    }
}

impl From<bson::ser::Error> for MongoliteError {
    fn from(e: bson::ser::Error) -> Self {
        MongoliteError::Validation(format!("document encode failed: {}", e))
    }
}

impl From<bson::de::Error> for MongoliteError {
    fn from(e: bson::de::Error) -> Self {
        MongoliteError::Validation(format!("document decode failed: {}", e))
    }
}

impl From<serde_json::Error> for MongoliteError {
    fn from(e: serde_json::Error) -> Self {
        MongoliteError::Validation(format!("JSON parse failed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, MongoliteError>;

/// Result alias used throughout the store layer.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_disjoint() {
        let errors = vec![
            MongoliteError::Generic("x".into()),
            MongoliteError::NotFound("x".into()),
            MongoliteError::AlreadyExists("x".into()),
            MongoliteError::InvalidArgument("x".into()),
            MongoliteError::Schema("x".into()),
            MongoliteError::Transaction("x".into()),
            MongoliteError::Query("x".into()),
            MongoliteError::Index("x".into()),
            MongoliteError::Validation("x".into()),
            MongoliteError::Backend(StoreError::MapFull),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_source_tags() {
        assert_eq!(
            MongoliteError::Backend(StoreError::MapFull).source_lib(),
            ErrorSource::Backend
        );
        assert_eq!(
            MongoliteError::Query("bad".into()).source_lib(),
            ErrorSource::Matcher
        );
        assert_eq!(
            MongoliteError::Schema("bad".into()).source_lib(),
            ErrorSource::Bob
        );
        assert_eq!(
            MongoliteError::NotFound("users".into()).source_lib(),
            ErrorSource::Mongolite
        );
        assert_eq!(ErrorSource::Backend.as_str(), "backend");
    }

    #[test]
    fn test_store_error_wraps_with_backend_range() {
        let err = MongoliteError::from(StoreError::KeyExists);
        assert!(err.code() <= -1100 && err.code() > -1200);
    }
}
