use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

/// Message id → display template, with `{0}`, `{1}`… placeholders.
///
/// Loaded once at startup from a TOML file:
///
/// ```toml
/// [messages]
/// ev001 = "{0} is required."
/// i0001 = "{0} has been registered."
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    templates: HashMap<String, String>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    messages: HashMap<String, String>,
}

impl MessageCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(source).context("invalid message catalog")?;
        Ok(Self {
            templates: file.messages,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read message catalog {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    pub fn insert(&mut self, id: &str, template: &str) {
        self.templates.insert(id.to_string(), template.to_string());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Resolve display text. Unknown ids render as `id` followed by the args
    /// so a missing catalog entry is visible on screen instead of blank.
    #[must_use]
    pub fn render(&self, id: &str, args: &[String]) -> String {
        match self.templates.get(id) {
            Some(template) => substitute(template, args),
            None if args.is_empty() => id.to_string(),
            None => format!("{id} {}", args.join(" ")),
        }
    }
}

/// Replace `{n}` with `args[n]` in one pass, so argument text is never
/// rescanned. Placeholders without an argument stay as written.
fn substitute(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let arg = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            args.get(index).map(|a| (a, close))
        });
        match arg {
            Some((a, close)) => {
                out.push_str(a);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
