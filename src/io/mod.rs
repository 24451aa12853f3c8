//! # Record container
//!
//! [`Io`] is the single per-request object: the JSON handler fills it from the
//! wire payload, the service reads and writes it in place, and it is written
//! back as the response. Besides the fields it carries the list of
//! user-facing [`Message`]s and derives `has_error` from them.
//!
//! Two contracts are enforced on every access (see [`Record`]):
//!
//! - **Write once.** `put_*` fails on an existing key. A service that loads a
//!   database row into the same `Io` the client sent cannot silently clobber
//!   inbound data with a stale column; it has to say `put_force_*`.
//! - **Declared null tolerance.** `get_*` fails on a missing or empty field;
//!   `get_*_nullable` and `get_string_or` are the explicit alternatives.
//!
//! Keys starting with `_` belong to the framework (`_msg`, `_has_err`) and
//! cannot be written through the put API.
//!
//! ```rust
//! use ioframe::io::{Io, IoRow, Record};
//!
//! let mut io = Io::new();
//! io.put_string("user_id", "U001").unwrap();
//! assert!(io.put_string("user_id", "U002").is_err());
//! io.put_force_string("user_id", "U002").unwrap();
//!
//! let mut row = IoRow::new();
//! row.put_string("pet_nm", "Tama").unwrap();
//! io.put_rows("detail", &[row]).unwrap();
//!
//! io.add_item_error("ev001", "user_nm", &["Name"]);
//! assert!(io.has_error());
//! ```

mod catalog;
mod error;
mod message;
mod record;
mod row;
mod value;
mod wire;

pub use catalog::MessageCatalog;
pub use error::IoError;
pub use message::{Message, Severity};
pub use record::{Record, RESERVED_PREFIX};
pub use row::IoRow;
pub use value::{IoValue, DATETIME_FORMAT, DATE_FORMAT};
pub use wire::{KEY_HAS_ERROR, KEY_MESSAGES};

use value::Fields;

/// Request/response record. One instance per request, never shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Io {
    fields: Fields,
    messages: Vec<Message>,
}

impl Record for Io {
    const ALLOWS_ROWS: bool = true;

    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }
}

impl Io {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a list section. The rows are copied; later changes to the
    /// caller's slice do not reach the record.
    pub fn put_rows(&mut self, key: &str, rows: &[IoRow]) -> Result<(), IoError> {
        self.put_value(key, IoValue::Rows(rows.to_vec()))
    }

    pub fn put_force_rows(&mut self, key: &str, rows: &[IoRow]) -> Result<(), IoError> {
        self.put_force_value(key, IoValue::Rows(rows.to_vec()))
    }

    /// Copy of a list section; mutating it does not change the record.
    pub fn get_rows(&self, key: &str) -> Result<Vec<IoRow>, IoError> {
        match self.get_rows_nullable(key)? {
            Some(rows) => Ok(rows),
            None if self.contains(key) => Err(IoError::NullValue(key.to_string())),
            None => Err(IoError::MissingKey(key.to_string())),
        }
    }

    pub fn get_rows_nullable(&self, key: &str) -> Result<Option<Vec<IoRow>>, IoError> {
        match self.fields.get(key) {
            None | Some(IoValue::Null) => Ok(None),
            Some(IoValue::Rows(rows)) => Ok(Some(rows.clone())),
            Some(other) => Err(IoError::TypeMismatch {
                key: key.to_string(),
                expected: "rows",
                found: other.kind(),
            }),
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_info(&mut self, id: &str, args: &[&str]) {
        self.add_message(Message::new(Severity::Info, id, args));
    }

    pub fn add_warn(&mut self, id: &str, args: &[&str]) {
        self.add_message(Message::new(Severity::Warn, id, args));
    }

    pub fn add_error(&mut self, id: &str, args: &[&str]) {
        self.add_message(Message::new(Severity::Error, id, args));
    }

    /// Error tied to a single field.
    pub fn add_item_error(&mut self, id: &str, item: &str, args: &[&str]) {
        self.add_message(Message::new(Severity::Error, id, args).with_item(item));
    }

    /// Error tied to one cell of a list section.
    pub fn add_row_error(&mut self, id: &str, list: &str, row: usize, item: &str, args: &[&str]) {
        self.add_message(
            Message::new(Severity::Error, id, args)
                .with_item(item)
                .with_row(list, row),
        );
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True once any ERROR-severity message has been added.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.messages.iter().any(Message::is_error)
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }
}
