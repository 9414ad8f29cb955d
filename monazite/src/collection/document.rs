use indexmap::IndexMap;
use itertools::Itertools;
use smallvec::SmallVec;

use crate::common::Value;
use crate::errors::{ErrorKind, MonaziteError, MonaziteResult};
use std::fmt::{Debug, Display, Formatter};

pub(crate) const FIELD_SEPARATOR: char = '.';

/// The physical name of the identifier field on every stored record.
pub const DOC_ID: &str = "_id";

type FieldVec = SmallVec<[String; 8]>;

/// Represents a stored record or a criteria/projection/options mapping.
///
/// A document is composed of key-value pairs. The key is always a
/// [String] and the value is a [Value]. Keys keep their insertion order,
/// which matters for sort specifications and for rendering a query the
/// way it was built.
///
/// Documents support nested access through dotted paths: if a document
/// holds `{"a": {"b": 1}}`, the nested value can be retrieved with
/// `document.get("a.b")`. Numeric path segments address array elements,
/// so `"items.0"` is the first element of the array under `items`.
///
/// # Examples
///
/// ```ignore
/// let mut doc = Document::new();
/// doc.put("name", "Alice")?;
/// doc.put("address.city", "New York")?;
/// assert_eq!(doc.get("address.city")?, Value::from("New York"));
/// ```
#[derive(Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Document {
    data: IndexMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: IndexMap::new(),
        }
    }

    /// Checks if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of top-level entries in the document.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Associates the specified [Value] with the specified key.
    ///
    /// If the key already exists its value is updated in place, keeping
    /// its original position. Keys containing the field separator write
    /// through to the nested document (or array element), creating
    /// intermediate documents as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty, or if a dotted path runs
    /// through a value that is neither a document nor an array.
    pub fn put<T: Into<Value>>(&mut self, key: impl AsRef<str>, value: T) -> MonaziteResult<()> {
        let key = key.as_ref();
        if key.is_empty() {
            log::error!("Document does not support empty key");
            return Err(MonaziteError::new(
                "Document does not support empty key",
                ErrorKind::InvalidOperation,
            ));
        }

        let value = value.into();
        if key.contains(FIELD_SEPARATOR) {
            let splits: Vec<&str> = key.split(FIELD_SEPARATOR).collect();
            deep_put_document(self, &splits, value)
        } else {
            self.data.insert(key.to_string(), value);
            Ok(())
        }
    }

    /// Inserts a key-value pair without path interpretation: the key is
    /// stored verbatim even if it contains the field separator.
    ///
    /// Criteria, projection, and update-operator documents use dotted
    /// strings as literal keys (`{"user.name": 1}` addresses a path on
    /// the server side, not a nested document on this side), so they are
    /// built with `insert` rather than [put](Document::put).
    pub fn insert<T: Into<Value>>(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), value.into());
    }

    /// Returns a reference to the value stored under the verbatim key,
    /// without path interpretation.
    pub fn get_key(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns a mutable reference to the value stored under the
    /// verbatim key, without path interpretation.
    pub fn get_key_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Returns the [Value] associated with the key, or [Value::Null] if
    /// this document contains no mapping for it. Dotted paths descend
    /// into nested documents and arrays.
    pub fn get(&self, key: &str) -> MonaziteResult<Value> {
        match self.data.get(key) {
            Some(value) => Ok(value.clone()),
            None => {
                // only walk the path if the key was not found at top level
                if key.contains(FIELD_SEPARATOR) {
                    let splits: Vec<&str> = key.split(FIELD_SEPARATOR).collect();
                    Ok(deep_get_document(self, &splits))
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    /// Removes the key and its value from the document. Removing a
    /// missing key succeeds without error. Dotted paths remove the leaf
    /// entry from the nested document or array.
    pub fn remove(&mut self, key: &str) -> MonaziteResult<()> {
        if key.contains(FIELD_SEPARATOR) {
            let splits: Vec<&str> = key.split(FIELD_SEPARATOR).collect();
            deep_remove_document(self, &splits);
            Ok(())
        } else {
            self.data.shift_remove(key);
            Ok(())
        }
    }

    /// Removes the verbatim key and returns its value, without path
    /// interpretation. The removal counterpart of
    /// [insert](Document::insert)/[get_key](Document::get_key).
    pub fn remove_key(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    /// Checks if a top level key exists in the document.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Checks if a top level or embedded field exists in the document.
    pub fn contains_field(&self, field: &str) -> bool {
        if self.contains_key(field) {
            true
        } else if field.contains(FIELD_SEPARATOR) {
            let splits: Vec<&str> = field.split(FIELD_SEPARATOR).collect();
            !deep_get_document(self, &splits).is_null()
        } else {
            false
        }
    }

    /// Retrieves all fields (top level and embedded) of this document as
    /// dotted paths, e.g. `["status", "user.name", "user.email"]`.
    pub fn fields(&self) -> FieldVec {
        let mut out = FieldVec::new();
        for (key, value) in &self.data {
            match value {
                Value::Document(nested) => {
                    for sub in nested.fields() {
                        out.push(format!("{}{}{}", key, FIELD_SEPARATOR, sub));
                    }
                }
                _ => out.push(key.clone()),
            }
        }
        out
    }

    /// Returns an iterator over the top-level key-value pairs in
    /// insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Returns an iterator over the top-level keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Merges another document into this one. When a key exists on both
    /// sides and both values are documents, they merge recursively;
    /// otherwise the incoming value overwrites.
    pub fn merge(&mut self, other: &Document) -> MonaziteResult<()> {
        for (key, value) in other.data.iter() {
            match value {
                Value::Document(incoming) => {
                    if let Some(Value::Document(existing)) = self.data.get_mut(key) {
                        existing.merge(incoming)?;
                    } else {
                        self.data.insert(key.clone(), value.clone());
                    }
                }
                _ => {
                    self.data.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    /// Renders this document as a shell-style literal, keys in insertion
    /// order. Used by query diagnostics.
    pub fn to_shell_string(&self) -> String {
        let rendered = self
            .data
            .iter()
            .map(|(k, v)| format!("\"{}\": {}", k, v.to_shell_string()))
            .join(", ");
        format!("{{{}}}", rendered)
    }
}

fn deep_put_document(doc: &mut Document, splits: &[&str], value: Value) -> MonaziteResult<()> {
    let head = splits[0];
    if splits.len() == 1 {
        doc.data.insert(head.to_string(), value);
        return Ok(());
    }

    let entry = doc
        .data
        .entry(head.to_string())
        .or_insert_with(|| Value::Document(Document::new()));
    deep_put_value(entry, &splits[1..], value)
}

fn deep_put_value(current: &mut Value, splits: &[&str], value: Value) -> MonaziteResult<()> {
    let head = splits[0];
    match current {
        Value::Document(nested) => deep_put_document(nested, splits, value),
        Value::Array(items) => {
            let index = parse_index(head)?;
            if index < items.len() {
                if splits.len() == 1 {
                    items[index] = value;
                    Ok(())
                } else {
                    deep_put_value(&mut items[index], &splits[1..], value)
                }
            } else if index == items.len() && splits.len() == 1 {
                items.push(value);
                Ok(())
            } else {
                log::error!("Array index {} out of bounds for write", index);
                Err(MonaziteError::new(
                    "Array index out of bounds",
                    ErrorKind::InvalidOperation,
                ))
            }
        }
        _ => {
            // a scalar on the path is replaced by a nested document
            let mut nested = Document::new();
            deep_put_document(&mut nested, splits, value)?;
            *current = Value::Document(nested);
            Ok(())
        }
    }
}

fn deep_get_document(doc: &Document, splits: &[&str]) -> Value {
    let head = splits[0];
    match doc.data.get(head) {
        Some(value) if splits.len() == 1 => value.clone(),
        Some(value) => deep_get_value(value, &splits[1..]),
        None => Value::Null,
    }
}

fn deep_get_value(current: &Value, splits: &[&str]) -> Value {
    match current {
        Value::Document(nested) => deep_get_document(nested, splits),
        Value::Array(items) => match splits[0].parse::<usize>() {
            Ok(index) => match items.get(index) {
                Some(item) if splits.len() == 1 => item.clone(),
                Some(item) => deep_get_value(item, &splits[1..]),
                None => Value::Null,
            },
            Err(_) => Value::Null,
        },
        _ => Value::Null,
    }
}

fn deep_remove_document(doc: &mut Document, splits: &[&str]) {
    let head = splits[0];
    if splits.len() == 1 {
        doc.data.shift_remove(head);
        return;
    }
    if let Some(value) = doc.data.get_mut(head) {
        deep_remove_value(value, &splits[1..]);
    }
}

fn deep_remove_value(current: &mut Value, splits: &[&str]) {
    match current {
        Value::Document(nested) => deep_remove_document(nested, splits),
        Value::Array(items) => {
            if let Ok(index) = splits[0].parse::<usize>() {
                if index < items.len() {
                    if splits.len() == 1 {
                        items.remove(index);
                    } else {
                        deep_remove_value(&mut items[index], &splits[1..]);
                    }
                }
            }
        }
        _ => {}
    }
}

fn parse_index(segment: &str) -> MonaziteResult<usize> {
    segment.parse::<usize>().map_err(|_| {
        log::error!("Cannot address field '{}' inside an array", segment);
        MonaziteError::new(
            "Array elements must be addressed by numeric index",
            ErrorKind::InvalidOperation,
        )
    })
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_shell_string())
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_shell_string())
    }
}

/// Creates a [Document] from a list of key-value pairs.
///
/// Keys are stored verbatim (a dotted key stays a single key, as in a
/// JSON literal). Values can be anything convertible into [Value];
/// nested documents are written as nested `doc!` invocations.
///
/// ```ignore
/// let doc = doc! {
///     "name": "mongo",
///     "counter": 10,
///     "spec": doc! { "nested": true },
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::collection::Document::new()
    };
    ( $( $key:literal : $value:expr ),+ $(,)? ) => {{
        let mut document = $crate::collection::Document::new();
        $(
            document.insert($key, $value);
        )+
        document
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get_top_level() {
        let mut doc = Document::new();
        doc.put("name", "Alice").unwrap();
        doc.put("age", 30).unwrap();
        assert_eq!(doc.get("name").unwrap(), Value::from("Alice"));
        assert_eq!(doc.get("age").unwrap(), Value::I32(30));
        assert_eq!(doc.get("missing").unwrap(), Value::Null);
        assert_eq!(doc.size(), 2);
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut doc = Document::new();
        assert!(doc.put("", 1).is_err());
    }

    #[test]
    fn test_deep_put_creates_intermediate_documents() {
        let mut doc = Document::new();
        doc.put("user.address.city", "New York").unwrap();
        assert_eq!(doc.get("user.address.city").unwrap(), Value::from("New York"));
        assert!(doc.get("user").unwrap().is_document());
    }

    #[test]
    fn test_array_index_paths() {
        let mut doc = doc! { "items": vec![1, 2, 3] };
        assert_eq!(doc.get("items.0").unwrap(), Value::I32(1));
        assert_eq!(doc.get("items.5").unwrap(), Value::Null);

        doc.put("items.1", 20).unwrap();
        assert_eq!(doc.get("items.1").unwrap(), Value::I32(20));

        // appending at one past the end is allowed
        doc.put("items.3", 4).unwrap();
        assert_eq!(doc.get("items.3").unwrap(), Value::I32(4));
        assert!(doc.put("items.9", 9).is_err());
    }

    #[test]
    fn test_remove_top_level_and_nested() {
        let mut doc = doc! { "name": "Alice", "user": doc! { "email": "a@b.c", "age": 1 } };
        doc.remove("name").unwrap();
        assert_eq!(doc.get("name").unwrap(), Value::Null);
        doc.remove("user.email").unwrap();
        assert_eq!(doc.get("user.email").unwrap(), Value::Null);
        assert_eq!(doc.get("user.age").unwrap(), Value::I32(1));
        // removing a missing key is fine
        doc.remove("ghost").unwrap();
    }

    #[test]
    fn test_remove_key_treats_dotted_keys_verbatim() {
        let mut doc = doc! { "spec.rating": 1, "spec": doc! { "rating": 2 } };
        assert_eq!(doc.remove_key("spec.rating"), Some(Value::I32(1)));
        // the nested document under "spec" is untouched
        assert_eq!(doc.get("spec.rating").unwrap(), Value::I32(2));
        assert_eq!(doc.remove_key("spec.rating"), None);
    }

    #[test]
    fn test_contains_field() {
        let doc = doc! { "user": doc! { "name": "Alice" } };
        assert!(doc.contains_field("user"));
        assert!(doc.contains_field("user.name"));
        assert!(!doc.contains_field("user.email"));
    }

    #[test]
    fn test_fields_enumerates_dotted_paths() {
        let doc = doc! { "status": "active", "user": doc! { "name": "Alice", "email": "a@b.c" } };
        let fields = doc.fields();
        assert!(fields.contains(&"status".to_string()));
        assert!(fields.contains(&"user.name".to_string()));
        assert!(fields.contains(&"user.email".to_string()));
    }

    #[test]
    fn test_merge_recurses_into_nested_documents() {
        let mut doc = doc! { "user": doc! { "name": "Alice", "age": 30 }, "status": "old" };
        let other = doc! { "user": doc! { "email": "a@b.c" }, "status": "new" };
        doc.merge(&other).unwrap();
        assert_eq!(doc.get("user.name").unwrap(), Value::from("Alice"));
        assert_eq!(doc.get("user.email").unwrap(), Value::from("a@b.c"));
        assert_eq!(doc.get("status").unwrap(), Value::from("new"));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let doc = doc! { "b": 1, "a": 2, "c": 3 };
        let keys: Vec<&String> = doc.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_shell_rendering() {
        let doc = doc! { "name": "mongo", "n": 1 };
        assert_eq!(doc.to_shell_string(), "{\"name\": \"mongo\", \"n\": 1}");
    }
}
