use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Number;

use super::error::IoError;
use super::value::{Fields, IoValue, DATETIME_FORMAT, DATE_FORMAT};

/// Prefix marking framework-owned keys (`_msg`, `_has_err`).
pub const RESERVED_PREFIX: char = '_';

/// Typed, null-declaring access to a flat set of fields.
///
/// Implemented by [`Io`](super::Io) and [`IoRow`](super::IoRow). Every read
/// site picks its null tolerance: the plain getters fail on a missing or
/// empty field, the `_nullable` getters return `None`, and `get_string_or`
/// substitutes a default. Every write site picks its overwrite policy: `put_*`
/// refuses an existing key, `put_force_*` replaces it.
pub trait Record {
    #[doc(hidden)]
    fn fields(&self) -> &Fields;
    #[doc(hidden)]
    fn fields_mut(&mut self) -> &mut Fields;
    /// Whether this record may hold [`IoValue::Rows`].
    #[doc(hidden)]
    const ALLOWS_ROWS: bool;

    fn put_value(&mut self, key: &str, value: IoValue) -> Result<(), IoError> {
        check_writable::<Self>(key, &value)?;
        self.fields_mut().insert(key, value)
    }

    fn put_force_value(&mut self, key: &str, value: IoValue) -> Result<(), IoError> {
        check_writable::<Self>(key, &value)?;
        self.fields_mut().replace(key, value);
        Ok(())
    }

    fn put_string(&mut self, key: &str, value: impl Into<String>) -> Result<(), IoError> {
        self.put_value(key, IoValue::Str(value.into()))
    }

    fn put_i64(&mut self, key: &str, value: i64) -> Result<(), IoError> {
        self.put_value(key, IoValue::Number(Number::from(value)))
    }

    fn put_f64(&mut self, key: &str, value: f64) -> Result<(), IoError> {
        let v = IoValue::from_f64(key, value)?;
        self.put_value(key, v)
    }

    fn put_number(&mut self, key: &str, value: Number) -> Result<(), IoError> {
        self.put_value(key, IoValue::Number(value))
    }

    fn put_bool(&mut self, key: &str, value: bool) -> Result<(), IoError> {
        self.put_value(key, IoValue::Bool(value))
    }

    fn put_date(&mut self, key: &str, value: NaiveDate) -> Result<(), IoError> {
        self.put_value(key, IoValue::Date(value))
    }

    fn put_datetime(&mut self, key: &str, value: NaiveDateTime) -> Result<(), IoError> {
        self.put_value(key, IoValue::DateTime(value))
    }

    fn put_null(&mut self, key: &str) -> Result<(), IoError> {
        self.put_value(key, IoValue::Null)
    }

    fn put_force_string(&mut self, key: &str, value: impl Into<String>) -> Result<(), IoError> {
        self.put_force_value(key, IoValue::Str(value.into()))
    }

    fn put_force_i64(&mut self, key: &str, value: i64) -> Result<(), IoError> {
        self.put_force_value(key, IoValue::Number(Number::from(value)))
    }

    fn put_force_f64(&mut self, key: &str, value: f64) -> Result<(), IoError> {
        let v = IoValue::from_f64(key, value)?;
        self.put_force_value(key, v)
    }

    fn put_force_bool(&mut self, key: &str, value: bool) -> Result<(), IoError> {
        self.put_force_value(key, IoValue::Bool(value))
    }

    fn put_force_date(&mut self, key: &str, value: NaiveDate) -> Result<(), IoError> {
        self.put_force_value(key, IoValue::Date(value))
    }

    fn put_force_datetime(&mut self, key: &str, value: NaiveDateTime) -> Result<(), IoError> {
        self.put_force_value(key, IoValue::DateTime(value))
    }

    fn put_force_null(&mut self, key: &str) -> Result<(), IoError> {
        self.put_force_value(key, IoValue::Null)
    }

    /// Raw value; missing keys are an error.
    fn get_value(&self, key: &str) -> Result<&IoValue, IoError> {
        self.fields()
            .get(key)
            .ok_or_else(|| IoError::MissingKey(key.to_string()))
    }

    fn get_string(&self, key: &str) -> Result<String, IoError> {
        match self.get_value(key)? {
            IoValue::Null => Err(IoError::NullValue(key.to_string())),
            v => to_text(key, v),
        }
    }

    /// String form of the field, or `default` when it is missing or null.
    fn get_string_or(&self, key: &str, default: &str) -> Result<String, IoError> {
        Ok(self
            .get_string_nullable(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// `None` for missing or null; an empty string stays `Some("")`.
    fn get_string_nullable(&self, key: &str) -> Result<Option<String>, IoError> {
        match self.fields().get(key) {
            None | Some(IoValue::Null) => Ok(None),
            Some(v) => to_text(key, v).map(Some),
        }
    }

    fn get_i64(&self, key: &str) -> Result<i64, IoError> {
        require(self.fields(), key, self.get_i64_nullable(key)?)
    }

    fn get_i64_nullable(&self, key: &str) -> Result<Option<i64>, IoError> {
        typed(self.fields(), key, to_i64)
    }

    fn get_f64(&self, key: &str) -> Result<f64, IoError> {
        require(self.fields(), key, self.get_f64_nullable(key)?)
    }

    fn get_f64_nullable(&self, key: &str) -> Result<Option<f64>, IoError> {
        typed(self.fields(), key, to_f64)
    }

    fn get_bool(&self, key: &str) -> Result<bool, IoError> {
        require(self.fields(), key, self.get_bool_nullable(key)?)
    }

    fn get_bool_nullable(&self, key: &str) -> Result<Option<bool>, IoError> {
        typed(self.fields(), key, to_bool)
    }

    fn get_date(&self, key: &str) -> Result<NaiveDate, IoError> {
        require(self.fields(), key, self.get_date_nullable(key)?)
    }

    fn get_date_nullable(&self, key: &str) -> Result<Option<NaiveDate>, IoError> {
        typed(self.fields(), key, to_date)
    }

    fn get_datetime(&self, key: &str) -> Result<NaiveDateTime, IoError> {
        require(self.fields(), key, self.get_datetime_nullable(key)?)
    }

    fn get_datetime_nullable(&self, key: &str) -> Result<Option<NaiveDateTime>, IoError> {
        typed(self.fields(), key, to_datetime)
    }

    fn contains(&self, key: &str) -> bool {
        self.fields().contains(key)
    }

    /// True when the key is absent, null, or a whitespace-only string.
    fn is_blank(&self, key: &str) -> bool {
        self.fields().get(key).map_or(true, IoValue::is_blank)
    }

    fn remove(&mut self, key: &str) -> Option<IoValue> {
        self.fields_mut().remove(key)
    }

    fn keys(&self) -> Vec<String> {
        self.fields().iter().map(|(k, _)| k.to_string()).collect()
    }

    fn len(&self) -> usize {
        self.fields().len()
    }

    fn is_empty(&self) -> bool {
        self.fields().len() == 0
    }
}

fn check_writable<R: Record + ?Sized>(key: &str, value: &IoValue) -> Result<(), IoError> {
    if key.starts_with(RESERVED_PREFIX) {
        return Err(IoError::ReservedKey(key.to_string()));
    }
    if !R::ALLOWS_ROWS && matches!(value, IoValue::Rows(_)) {
        return Err(IoError::NestedRows(key.to_string()));
    }
    Ok(())
}

fn require<T>(fields: &Fields, key: &str, value: Option<T>) -> Result<T, IoError> {
    match value {
        Some(v) => Ok(v),
        None if fields.contains(key) => Err(IoError::NullValue(key.to_string())),
        None => Err(IoError::MissingKey(key.to_string())),
    }
}

/// Missing and blank both read as `None`; anything else must convert.
fn typed<T>(
    fields: &Fields,
    key: &str,
    conv: fn(&str, &IoValue) -> Result<T, IoError>,
) -> Result<Option<T>, IoError> {
    match fields.get(key) {
        None => Ok(None),
        Some(v) if v.is_blank() => Ok(None),
        Some(v) => conv(key, v).map(Some),
    }
}

fn mismatch(key: &str, expected: &'static str, found: &IoValue) -> IoError {
    IoError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

pub(crate) fn to_text(key: &str, v: &IoValue) -> Result<String, IoError> {
    match v {
        IoValue::Str(s) => Ok(s.clone()),
        IoValue::Number(n) => Ok(n.to_string()),
        IoValue::Bool(b) => Ok(b.to_string()),
        IoValue::Date(d) => Ok(d.format(DATE_FORMAT).to_string()),
        IoValue::DateTime(dt) => Ok(dt.format(DATETIME_FORMAT).to_string()),
        IoValue::Null | IoValue::Rows(_) => Err(mismatch(key, "string", v)),
    }
}

// Whole and inside [-2^63, 2^63), so the cast is exact.
fn fits_i64(f: f64) -> bool {
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    f.fract() == 0.0 && (-BOUND..BOUND).contains(&f)
}

fn to_i64(key: &str, v: &IoValue) -> Result<i64, IoError> {
    match v {
        IoValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| fits_i64(*f)).map(|f| f as i64))
            .ok_or_else(|| mismatch(key, "integer", v)),
        IoValue::Str(s) => s.trim().parse().map_err(|_| mismatch(key, "integer", v)),
        _ => Err(mismatch(key, "integer", v)),
    }
}

fn to_f64(key: &str, v: &IoValue) -> Result<f64, IoError> {
    match v {
        IoValue::Number(n) => n.as_f64().ok_or_else(|| mismatch(key, "number", v)),
        IoValue::Str(s) => s.trim().parse().map_err(|_| mismatch(key, "number", v)),
        _ => Err(mismatch(key, "number", v)),
    }
}

fn to_bool(key: &str, v: &IoValue) -> Result<bool, IoError> {
    match v {
        IoValue::Bool(b) => Ok(*b),
        IoValue::Str(s) => match s.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(mismatch(key, "bool", v)),
        },
        _ => Err(mismatch(key, "bool", v)),
    }
}

fn to_date(key: &str, v: &IoValue) -> Result<NaiveDate, IoError> {
    match v {
        IoValue::Date(d) => Ok(*d),
        IoValue::DateTime(dt) => Ok(dt.date()),
        IoValue::Str(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
                .map_err(|_| mismatch(key, "date", v))
        }
        _ => Err(mismatch(key, "date", v)),
    }
}

fn to_datetime(key: &str, v: &IoValue) -> Result<NaiveDateTime, IoError> {
    match v {
        IoValue::DateTime(dt) => Ok(*dt),
        IoValue::Str(s) => {
            let s = s.trim();
            NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .map_err(|_| mismatch(key, "datetime", v))
        }
        _ => Err(mismatch(key, "datetime", v)),
    }
}
