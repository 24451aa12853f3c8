use super::record::Record;
use super::value::Fields;

/// One row of a list section. Flat: rows never hold nested rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IoRow {
    fields: Fields,
}

impl IoRow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Record for IoRow {
    const ALLOWS_ROWS: bool = false;

    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }
}
