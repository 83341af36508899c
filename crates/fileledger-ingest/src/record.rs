//! Record types produced by parsers and the mapping persisters write them with

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{IngestError, Result};

/// Typed value of one record field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Character length, for values stored in length-limited columns
    pub fn text_len(&self) -> Option<usize> {
        match self {
            FieldValue::Text(s) => Some(s.chars().count()),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// A parsed row that can be written to the sink.
///
/// Every record carries the id of the import event that produced it, so rows
/// in the sink can be traced back to their source file.
pub trait ImportRecord: Send + 'static {
    fn import_id(&self) -> i64;

    fn set_import_id(&mut self, import_id: i64);

    /// Value of a named field; `None` when the record has no such field
    fn field(&self, name: &str) -> Option<FieldValue>;
}

/// Source field to destination column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source: String,
    pub destination: String,
}

/// Declarative mapping of a record type onto a sink table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMapping {
    pub table: String,
    pub columns: Vec<ColumnMapping>,
}

impl RecordMapping {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.columns.push(ColumnMapping {
            source: source.into(),
            destination: destination.into(),
        });
        self
    }

    /// Map fields onto columns of the same name
    pub fn same_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            self = self.column(name, name);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(IngestError::config("Record mapping needs a table name"));
        }
        if self.columns.is_empty() {
            return Err(IngestError::config(format!(
                "Record mapping for {} has no columns",
                self.table
            )));
        }
        Ok(())
    }

    /// Values of one record in column order
    pub fn values<R: ImportRecord>(&self, record: &R) -> Result<Vec<FieldValue>> {
        self.columns
            .iter()
            .map(|c| {
                record.field(&c.source).ok_or_else(|| {
                    IngestError::Persistence(format!(
                        "Record has no field '{}' mapped to column {}.{}",
                        c.source, self.table, c.destination
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Member {
        import_id: i64,
        name: String,
        age: Option<i32>,
    }

    impl ImportRecord for Member {
        fn import_id(&self) -> i64 {
            self.import_id
        }

        fn set_import_id(&mut self, import_id: i64) {
            self.import_id = import_id;
        }

        fn field(&self, name: &str) -> Option<FieldValue> {
            match name {
                "import_id" => Some(self.import_id.into()),
                "name" => Some(self.name.as_str().into()),
                "age" => Some(self.age.into()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_values_follow_column_order() {
        let mapping = RecordMapping::new("members")
            .column("age", "member_age")
            .same_names(["name", "import_id"]);
        let member = Member {
            import_id: 7,
            name: "Ada".into(),
            age: None,
        };

        assert_eq!(
            mapping.values(&member).unwrap(),
            vec![FieldValue::Null, FieldValue::Text("Ada".into()), FieldValue::Integer(7)]
        );
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        let mapping = RecordMapping::new("members").column("email", "email");
        let member = Member {
            import_id: 1,
            name: "Ada".into(),
            age: Some(36),
        };
        assert!(matches!(mapping.values(&member), Err(IngestError::Persistence(_))));
    }

    #[test]
    fn test_validate() {
        assert!(RecordMapping::new("members").validate().is_err());
        assert!(RecordMapping::new(" ").column("a", "a").validate().is_err());
        assert!(RecordMapping::new("members").column("a", "a").validate().is_ok());
    }
}
