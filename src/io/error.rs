use thiserror::Error;

/// Contract violations on a record.
///
/// These are programming errors in a service (reading a field it never
/// checked for, writing a key twice) or malformed inbound payloads. They are
/// never the channel for business validation; that goes through messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IoError {
    #[error("key `{0}` already exists; use the put_force variant to replace it")]
    DuplicateKey(String),
    #[error("key `{0}` is reserved for the framework")]
    ReservedKey(String),
    #[error("key `{0}` does not exist")]
    MissingKey(String),
    #[error("key `{0}` holds no value")]
    NullValue(String),
    #[error("key `{key}` holds {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("value for `{0}` is not a finite number")]
    NotFinite(String),
    #[error("row field `{0}` cannot hold nested rows")]
    NestedRows(String),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("unsupported value at `{key}`: {reason}")]
    UnsupportedValue { key: String, reason: &'static str },
}
