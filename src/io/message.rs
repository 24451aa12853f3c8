use serde::Serialize;

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// A message for the screen, attached to a record.
///
/// `id` keys into the [`MessageCatalog`](super::MessageCatalog); the display
/// text is resolved only when the record is serialized. `item`, `list` and
/// `row` point the client at the field (or grid cell) to highlight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    pub id: String,
    pub args: Vec<String>,
    pub item: Option<String>,
    pub list: Option<String>,
    pub row: Option<usize>,
}

impl Message {
    #[must_use]
    pub fn new(severity: Severity, id: &str, args: &[&str]) -> Self {
        Self {
            severity,
            id: id.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            item: None,
            list: None,
            row: None,
        }
    }

    #[must_use]
    pub fn with_item(mut self, item: &str) -> Self {
        self.item = Some(item.to_string());
        self
    }

    #[must_use]
    pub fn with_row(mut self, list: &str, row: usize) -> Self {
        self.list = Some(list.to_string());
        self.row = Some(row);
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Wire shape of one `_msg` entry.
#[derive(Debug, Serialize)]
pub(crate) struct WireMessage<'a> {
    #[serde(rename = "type")]
    pub severity: Severity,
    pub id: &'a str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}
