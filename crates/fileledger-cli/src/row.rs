//! Untyped delimited rows
//!
//! The CLI does not know the shape of the files it loads, so each line is kept
//! as a list of strings and mapped onto the destination table by position.
//! Values are typed on the way out: empty fields become `NULL`, and integers,
//! decimals, booleans and ISO dates are bound natively when their text is in
//! canonical form. Anything else, including zero-padded codes, stays text.

use chrono::NaiveDate;
use fileledger_ingest::record::{FieldValue, ImportRecord, RecordMapping};
use serde::{Deserialize, Deserializer};

/// Field name under which a row exposes its import event id
pub const IMPORT_ID_FIELD: &str = "import_id";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvRow {
    import_id: i64,
    values: Vec<String>,
}

impl CsvRow {
    pub fn new(values: Vec<String>) -> Self {
        Self {
            import_id: 0,
            values,
        }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

impl<'de> Deserialize<'de> for CsvRow {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<String>::deserialize(deserializer).map(Self::new)
    }
}

impl ImportRecord for CsvRow {
    fn import_id(&self) -> i64 {
        self.import_id
    }

    fn set_import_id(&mut self, import_id: i64) {
        self.import_id = import_id;
    }

    /// `import_id`, or a zero-based column position. Positions past the end
    /// of a short row read as `NULL`.
    fn field(&self, name: &str) -> Option<FieldValue> {
        if name == IMPORT_ID_FIELD {
            return Some(self.import_id.into());
        }
        let index: usize = name.parse().ok()?;
        Some(
            self.values
                .get(index)
                .map(|value| typed_value(value))
                .unwrap_or(FieldValue::Null),
        )
    }
}

/// Typed value for one field. PostgreSQL does not cast text parameters to
/// numeric or boolean columns, so non-canonical numbers stay text and fail
/// against such columns.
fn typed_value(raw: &str) -> FieldValue {
    if raw.is_empty() {
        return FieldValue::Null;
    }
    if let Ok(n) = raw.parse::<i64>() {
        if n.to_string() == raw {
            return FieldValue::Integer(n);
        }
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() && f.to_string() == raw {
            return FieldValue::Float(f);
        }
    }
    match raw {
        "true" => return FieldValue::Boolean(true),
        "false" => return FieldValue::Boolean(false),
        _ => {},
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if date.format("%Y-%m-%d").to_string() == raw {
            return FieldValue::Date(date);
        }
    }
    FieldValue::Text(raw.to_string())
}

/// Map file columns, by position, onto `columns` of `table`
pub fn positional_mapping(table: &str, columns: &[String], import_id_column: Option<&str>) -> RecordMapping {
    let mut mapping = RecordMapping::new(table);
    if let Some(column) = import_id_column {
        mapping = mapping.column(IMPORT_ID_FIELD, column);
    }
    for (index, column) in columns.iter().enumerate() {
        mapping = mapping.column(index.to_string(), column.trim());
    }
    mapping
}
