//! Collection and index declarations for the store engine
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::{StoreError, StoreResult};

/// A secondary index over one field of a collection's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    /// Dotted path into the record, e.g. `processId` or `meta.owner`.
    pub key_path: String,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self { name: name.into(), key_path: key_path.into() }
    }

    pub(crate) fn column(&self) -> String {
        format!("ix_{}", self.name)
    }
}

/// A named collection with one primary key and zero or more indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub key_path: String,
    #[serde(default)]
    pub indices: Vec<IndexSchema>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self { name: name.into(), key_path: key_path.into(), indices: Vec::new() }
    }

    /// Builder-style index declaration.
    pub fn index(mut self, name: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.indices.push(IndexSchema::new(name, key_path));
        self
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indices.iter().find(|idx| idx.name == name)
    }

    /// Rejects names that cannot be used verbatim as SQL identifiers.
    pub fn validate(&self) -> StoreResult<()> {
        validate_identifier(&self.name)?;
        validate_key_path(&self.key_path)?;
        for index in &self.indices {
            validate_identifier(&index.name)?;
            validate_key_path(&index.key_path)?;
        }
        Ok(())
    }

    /// Primary key of `record`, as stored in the key column.
    pub(crate) fn primary_key(&self, record: &Value) -> StoreResult<String> {
        match lookup(record, &self.key_path) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(StoreError::MissingKey {
                collection: self.name.clone(),
                key_path: self.key_path.clone(),
            }),
        }
    }

    /// Values for every index column of `record`, in declaration order.
    pub(crate) fn index_values(&self, record: &Value) -> Vec<SqlValue> {
        self.indices
            .iter()
            .map(|idx| lookup(record, &idx.key_path).map(to_sql_value).unwrap_or(SqlValue::Null))
            .collect()
    }
}

/// Follows a dotted path through nested JSON objects.
pub(crate) fn lookup<'a>(record: &'a Value, key_path: &str) -> Option<&'a Value> {
    key_path
        .split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

/// Maps a JSON scalar to the SQL value the index column holds. Matches what
/// SQLite's `json_extract` yields, so backfilled and freshly written rows
/// compare equal.
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// SQLite JSON path for a dotted key path.
pub(crate) fn json_path(key_path: &str) -> String {
    format!("$.{}", key_path)
}

fn validate_identifier(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('_')
        && name != "schema_version"
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSchema(format!("invalid collection or index name '{}'", name)))
    }
}

fn validate_key_path(path: &str) -> StoreResult<()> {
    let valid = path
        .split('.')
        .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSchema(format!("invalid key path '{}'", path)))
    }
}
