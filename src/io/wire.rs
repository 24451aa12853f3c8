//! JSON and query-string forms of [`Io`].

use serde_json::{Map, Value};

use super::catalog::MessageCatalog;
use super::error::IoError;
use super::message::WireMessage;
use super::record::{Record, RESERVED_PREFIX};
use super::row::IoRow;
use super::value::{Fields, IoValue, DATETIME_FORMAT, DATE_FORMAT};
use super::Io;

/// Reserved key carrying the message list.
pub const KEY_MESSAGES: &str = "_msg";
/// Reserved key carrying the derived error flag.
pub const KEY_HAS_ERROR: &str = "_has_err";

impl Io {
    /// Build a record from a POST body.
    ///
    /// Nested objects are flattened with dotted keys (`detail.pet_nm`),
    /// arrays of objects become list sections, and keys in the reserved
    /// namespace are dropped so a client echoing a previous response back
    /// does not trip the write-once check.
    pub fn from_json(value: Value) -> Result<Io, IoError> {
        let Value::Object(map) = value else {
            return Err(IoError::NotAnObject);
        };
        let mut io = Io::new();
        flatten_into(&mut io.fields, "", map, true)?;
        Ok(io)
    }

    /// Build a record from a URL query string. Values arrive as strings;
    /// a repeated key is rejected like any other duplicate put.
    pub fn from_query(query: &str) -> Result<Io, IoError> {
        let mut io = Io::new();
        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            if k.is_empty() || k.starts_with(RESERVED_PREFIX) {
                continue;
            }
            io.put_string(&k, v.into_owned())?;
        }
        Ok(io)
    }

    /// Response form: every field, then `_msg` with catalog-resolved text and
    /// `_has_err`.
    #[must_use]
    pub fn to_json(&self, catalog: &MessageCatalog) -> Value {
        let mut out = fields_to_map(&self.fields);
        let messages: Vec<Value> = self
            .messages()
            .iter()
            .map(|m| {
                let wire = WireMessage {
                    severity: m.severity,
                    id: &m.id,
                    text: catalog.render(&m.id, &m.args),
                    item: m.item.as_deref(),
                    list: m.list.as_deref(),
                    row: m.row,
                };
                serde_json::to_value(wire).unwrap_or(Value::Null)
            })
            .collect();
        out.insert(KEY_MESSAGES.to_string(), Value::Array(messages));
        out.insert(KEY_HAS_ERROR.to_string(), Value::Bool(self.has_error()));
        Value::Object(out)
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn flatten_into(
    fields: &mut Fields,
    prefix: &str,
    map: Map<String, Value>,
    allow_rows: bool,
) -> Result<(), IoError> {
    for (k, v) in map {
        if prefix.is_empty() && k.starts_with(RESERVED_PREFIX) {
            continue;
        }
        let key = join_key(prefix, &k);
        match v {
            Value::Object(inner) => flatten_into(fields, &key, inner, allow_rows)?,
            Value::Array(items) => {
                if !allow_rows {
                    return Err(IoError::NestedRows(key));
                }
                let rows = items
                    .into_iter()
                    .map(|item| row_from_json(&key, item))
                    .collect::<Result<Vec<_>, _>>()?;
                fields.insert(&key, IoValue::Rows(rows))?;
            }
            scalar => fields.insert(&key, scalar_from_json(scalar))?,
        }
    }
    Ok(())
}

fn row_from_json(list_key: &str, item: Value) -> Result<IoRow, IoError> {
    let Value::Object(map) = item else {
        return Err(IoError::UnsupportedValue {
            key: list_key.to_string(),
            reason: "list sections must contain objects",
        });
    };
    let mut row = IoRow::new();
    flatten_into(row.fields_mut(), "", map, false)?;
    Ok(row)
}

fn scalar_from_json(v: Value) -> IoValue {
    match v {
        Value::Null => IoValue::Null,
        Value::Bool(b) => IoValue::Bool(b),
        Value::Number(n) => IoValue::Number(n),
        Value::String(s) => IoValue::Str(s),
        // Objects and arrays are routed before this point.
        Value::Array(_) | Value::Object(_) => IoValue::Null,
    }
}

fn fields_to_map(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), value_to_json(v)))
        .collect()
}

fn value_to_json(v: &IoValue) -> Value {
    match v {
        IoValue::Null => Value::Null,
        IoValue::Str(s) => Value::String(s.clone()),
        IoValue::Bool(b) => Value::Bool(*b),
        IoValue::Number(n) => Value::Number(n.clone()),
        IoValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
        IoValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
        IoValue::Rows(rows) => Value::Array(
            rows.iter()
                .map(|r| Value::Object(fields_to_map(r.fields())))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Severity;
    use serde_json::json;

    #[test]
    fn test_from_json_flattens_and_builds_rows() {
        let io = Io::from_json(json!({
            "user_id": "U001",
            "age": 31,
            "active": true,
            "memo": null,
            "detail": { "pet_nm": "Tama" },
            "pets": [ { "pet_nm": "Pochi", "info": { "kind": "dog" } } ]
        }))
        .unwrap();
        assert_eq!(io.get_string("user_id").unwrap(), "U001");
        assert_eq!(io.get_i64("age").unwrap(), 31);
        assert!(io.get_bool("active").unwrap());
        assert_eq!(io.get_string_nullable("memo").unwrap(), None);
        assert_eq!(io.get_string("detail.pet_nm").unwrap(), "Tama");
        let pets = io.get_rows("pets").unwrap();
        assert_eq!(pets[0].get_string("info.kind").unwrap(), "dog");
    }

    #[test]
    fn test_from_json_rejects_non_object_and_scalar_arrays() {
        assert_eq!(Io::from_json(json!([1, 2])), Err(IoError::NotAnObject));
        assert!(matches!(
            Io::from_json(json!({ "tags": ["a", "b"] })),
            Err(IoError::UnsupportedValue { .. })
        ));
        assert!(matches!(
            Io::from_json(json!({ "rows": [ { "inner": [] } ] })),
            Err(IoError::NestedRows(_))
        ));
    }

    #[test]
    fn test_from_json_drops_reserved_keys() {
        let io = Io::from_json(json!({ "_msg": [], "_has_err": true, "a": "1" })).unwrap();
        assert_eq!(io.keys(), vec!["a".to_string()]);
    }

    #[test]
    fn test_flattened_collision_is_duplicate() {
        let result = Io::from_json(json!({ "a.b": "x", "a": { "b": "y" } }));
        assert_eq!(result, Err(IoError::DuplicateKey("a.b".to_string())));
    }

    #[test]
    fn test_from_query_decodes_and_rejects_duplicates() {
        let io = Io::from_query("user_id=U%20001&user_nm=Mike+Davis").unwrap();
        assert_eq!(io.get_string("user_id").unwrap(), "U 001");
        assert_eq!(io.get_string("user_nm").unwrap(), "Mike Davis");
        assert!(Io::from_query("a=1&a=2").is_err());
    }

    #[test]
    fn test_to_json_includes_messages_and_flag() {
        let mut catalog = MessageCatalog::new();
        catalog.insert("ev001", "{0} is required.");
        let mut io = Io::new();
        io.put_string("user_id", "").unwrap();
        io.add_item_error("ev001", "user_id", &["User ID"]);
        let out = io.to_json(&catalog);
        assert_eq!(out["user_id"], json!(""));
        assert_eq!(out["_has_err"], json!(true));
        assert_eq!(out["_msg"][0]["type"], json!("ERROR"));
        assert_eq!(out["_msg"][0]["id"], json!("ev001"));
        assert_eq!(out["_msg"][0]["text"], json!("User ID is required."));
        assert_eq!(out["_msg"][0]["item"], json!("user_id"));
        assert!(out["_msg"][0].get("row").is_none());
        assert_eq!(io.messages()[0].severity, Severity::Error);
    }

    #[test]
    fn test_to_json_dates_and_rows() {
        let mut io = Io::new();
        let d = chrono::NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        io.put_date("birth_dt", d).unwrap();
        let mut row = IoRow::new();
        row.put_i64("no", 1).unwrap();
        io.put_rows("list", &[row]).unwrap();
        let out = io.to_json(&MessageCatalog::new());
        assert_eq!(out["birth_dt"], json!("2025-01-09"));
        assert_eq!(out["list"], json!([{ "no": 1 }]));
        assert_eq!(out["_has_err"], json!(false));
    }

    #[test]
    fn test_to_json_keeps_field_order() {
        let mut io = Io::new();
        io.put_string("zeta", "1").unwrap();
        io.put_string("alpha", "2").unwrap();
        io.put_string("mid", "3").unwrap();
        let out = io.to_json(&MessageCatalog::new());
        let keys: Vec<&str> = out.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid", "_msg", "_has_err"]);
    }
}
