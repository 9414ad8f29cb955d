use crate::collection::Document;
use crate::common::Value;
use crate::errors::{ErrorKind, MonaziteError, MonaziteResult};

/// Pure in-memory semantics of the atomic update operators.
///
/// This kernel is shared by two consumers: subdocument emulation, which
/// must compute operator effects against a buffered value before the
/// parent record exists server-side, and the in-memory driver, which
/// applies the same semantics on update. Sharing one implementation is
/// what makes an emulated operator indistinguishable from a native one
/// after save and reload.

/// Applies a full operator document (`{"$set": {...}, "$inc": {...}}`)
/// to a record. Field keys inside each operator payload are dotted paths.
pub fn apply_operations(target: &mut Document, operations: &Document) -> MonaziteResult<()> {
    for (operator, payload) in operations.iter() {
        let payload = match payload.as_document() {
            Some(doc) => doc,
            None => {
                log::error!("Operator {} payload must be a document", operator);
                return Err(MonaziteError::new(
                    &format!("Operator {} payload must be a document", operator),
                    ErrorKind::InvalidOperation,
                ));
            }
        };
        for (path, argument) in payload.iter() {
            apply_operator(target, operator, path, argument)?;
        }
    }
    Ok(())
}

/// Applies one operator to one dotted path of a record.
pub fn apply_operator(
    target: &mut Document,
    operator: &str,
    path: &str,
    argument: &Value,
) -> MonaziteResult<()> {
    match operator {
        "$set" => target.put(path, argument.clone()),
        "$unset" => target.remove(path),
        "$inc" => apply_inc(target, path, argument),
        "$push" => apply_push(target, path, std::slice::from_ref(argument)),
        "$pushAll" => apply_push(target, path, expect_array(operator, argument)?),
        "$pull" => apply_pull(target, path, std::slice::from_ref(argument)),
        "$pullAll" => apply_pull(target, path, expect_array(operator, argument)?),
        "$pop" => apply_pop(target, path, argument),
        "$addToSet" => apply_add_to_set(target, path, argument),
        "$bit" => apply_bit(target, path, argument),
        _ => {
            log::error!("Unknown update operator {}", operator);
            Err(MonaziteError::new(
                &format!("Unknown update operator {}", operator),
                ErrorKind::UnsupportedOperation,
            ))
        }
    }
}

fn expect_array<'a>(operator: &str, argument: &'a Value) -> MonaziteResult<&'a [Value]> {
    argument.as_array().map(|v| v.as_slice()).ok_or_else(|| {
        log::error!("Operator {} requires an array argument", operator);
        MonaziteError::new(
            &format!("Operator {} requires an array argument", operator),
            ErrorKind::InvalidOperation,
        )
    })
}

fn apply_inc(target: &mut Document, path: &str, argument: &Value) -> MonaziteResult<()> {
    let current = target.get(path)?;
    let next = match (current.as_f64(), argument.as_f64()) {
        (None, Some(_)) if current.is_null() => argument.clone(),
        (Some(a), Some(b)) => {
            // keep integer arithmetic when both sides are integers
            match (current.as_i64(), argument.as_i64()) {
                (Some(a), Some(b)) => Value::I64(a + b),
                _ => Value::F64(a + b),
            }
        }
        _ => {
            log::error!("Cannot increment non-numeric field {}", path);
            return Err(MonaziteError::new(
                &format!("Cannot increment non-numeric field {}", path),
                ErrorKind::InvalidOperation,
            ));
        }
    };
    target.put(path, next)
}

fn with_array(
    target: &mut Document,
    path: &str,
    operator: &str,
    f: impl FnOnce(&mut Vec<Value>),
) -> MonaziteResult<()> {
    let mut items = match target.get(path)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        _ => {
            log::error!("Cannot apply {} to non-array field {}", operator, path);
            return Err(MonaziteError::new(
                &format!("Cannot apply {} to non-array field {}", operator, path),
                ErrorKind::InvalidOperation,
            ));
        }
    };
    f(&mut items);
    target.put(path, Value::Array(items))
}

fn apply_push(target: &mut Document, path: &str, values: &[Value]) -> MonaziteResult<()> {
    with_array(target, path, "$push", |items| {
        items.extend(values.iter().cloned());
    })
}

fn apply_pull(target: &mut Document, path: &str, values: &[Value]) -> MonaziteResult<()> {
    with_array(target, path, "$pull", |items| {
        items.retain(|item| !values.contains(item));
    })
}

fn apply_pop(target: &mut Document, path: &str, argument: &Value) -> MonaziteResult<()> {
    let from_front = argument.as_i64() == Some(-1);
    with_array(target, path, "$pop", |items| {
        if items.is_empty() {
            return;
        }
        if from_front {
            items.remove(0);
        } else {
            items.pop();
        }
    })
}

fn apply_add_to_set(target: &mut Document, path: &str, argument: &Value) -> MonaziteResult<()> {
    // the {$each: [...]} form adds every listed element
    let additions: Vec<Value> = match argument.as_document().and_then(|doc| doc.get_key("$each")) {
        Some(Value::Array(each)) => each.clone(),
        Some(other) => vec![other.clone()],
        None => vec![argument.clone()],
    };
    with_array(target, path, "$addToSet", |items| {
        for value in additions {
            if !items.contains(&value) {
                items.push(value);
            }
        }
    })
}

fn apply_bit(target: &mut Document, path: &str, argument: &Value) -> MonaziteResult<()> {
    let payload = argument.as_document().ok_or_else(|| {
        MonaziteError::new("$bit requires a document argument", ErrorKind::InvalidOperation)
    })?;
    let mut current = target.get(path)?.as_i64().unwrap_or(0);
    for (op, operand) in payload.iter() {
        let operand = operand.as_i64().ok_or_else(|| {
            MonaziteError::new("$bit operand must be an integer", ErrorKind::InvalidOperation)
        })?;
        current = match op.as_str() {
            "and" => current & operand,
            "or" => current | operand,
            "xor" => current ^ operand,
            _ => {
                log::error!("Unknown $bit operation {}", op);
                return Err(MonaziteError::new(
                    &format!("Unknown $bit operation {}", op),
                    ErrorKind::InvalidOperation,
                ));
            }
        };
    }
    target.put(path, Value::I64(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_set_and_unset() {
        let mut doc = doc! { "a": 1 };
        apply_operator(&mut doc, "$set", "b", &Value::I64(2)).unwrap();
        apply_operator(&mut doc, "$unset", "a", &Value::I32(1)).unwrap();
        assert_eq!(doc.get("b").unwrap(), Value::I64(2));
        assert!(!doc.contains_key("a"));
    }

    #[test]
    fn test_inc_sums_and_seeds_missing_fields() {
        let mut doc = doc! { "counter": 10 };
        apply_operator(&mut doc, "$inc", "counter", &Value::I64(1)).unwrap();
        apply_operator(&mut doc, "$inc", "fresh", &Value::I64(5)).unwrap();
        assert_eq!(doc.get("counter").unwrap(), Value::I64(11));
        assert_eq!(doc.get("fresh").unwrap(), Value::I64(5));
        // non-numeric target fails
        let mut doc = doc! { "name": "mongo" };
        assert!(apply_operator(&mut doc, "$inc", "name", &Value::I64(1)).is_err());
    }

    #[test]
    fn test_push_preserves_order_and_creates_arrays() {
        let mut doc = Document::new();
        apply_operator(&mut doc, "$push", "tags", &Value::from("a")).unwrap();
        apply_operator(&mut doc, "$push", "tags", &Value::from("b")).unwrap();
        assert_eq!(doc.get("tags").unwrap(), Value::from(vec!["a", "b"]));
    }

    #[test]
    fn test_push_all_concatenates() {
        let mut doc = doc! { "tags": vec!["a"] };
        apply_operator(&mut doc, "$pushAll", "tags", &Value::from(vec!["b", "c"])).unwrap();
        assert_eq!(doc.get("tags").unwrap(), Value::from(vec!["a", "b", "c"]));
    }

    #[test]
    fn test_pull_removes_all_matching_occurrences() {
        let mut doc = doc! { "tags": vec!["a", "b", "a", "c"] };
        apply_operator(&mut doc, "$pull", "tags", &Value::from("a")).unwrap();
        assert_eq!(doc.get("tags").unwrap(), Value::from(vec!["b", "c"]));
    }

    #[test]
    fn test_pull_all_removes_every_listed_value() {
        let mut doc = doc! { "tags": vec!["a", "b", "c", "b"] };
        apply_operator(&mut doc, "$pullAll", "tags", &Value::from(vec!["b", "c"])).unwrap();
        assert_eq!(doc.get("tags").unwrap(), Value::from(vec!["a"]));
    }

    #[test]
    fn test_pop_and_shift() {
        let mut doc = doc! { "items": vec![1, 2, 3] };
        apply_operator(&mut doc, "$pop", "items", &Value::I64(1)).unwrap();
        assert_eq!(doc.get("items").unwrap(), Value::from(vec![1, 2]));
        apply_operator(&mut doc, "$pop", "items", &Value::I64(-1)).unwrap();
        assert_eq!(doc.get("items").unwrap(), Value::from(vec![2]));
    }

    #[test]
    fn test_add_to_set_is_idempotent() {
        let mut doc = Document::new();
        apply_operator(&mut doc, "$addToSet", "tags", &Value::from("a")).unwrap();
        apply_operator(&mut doc, "$addToSet", "tags", &Value::from("a")).unwrap();
        assert_eq!(doc.get("tags").unwrap(), Value::from(vec!["a"]));

        let each = Value::Document(doc! { "$each": vec!["a", "b"] });
        apply_operator(&mut doc, "$addToSet", "tags", &each).unwrap();
        assert_eq!(doc.get("tags").unwrap(), Value::from(vec!["a", "b"]));
    }

    #[test]
    fn test_bit_operations() {
        let mut doc = doc! { "flags": 0b1010i64 };
        apply_operator(&mut doc, "$bit", "flags", &Value::Document(doc! { "and": 0b0110i64 }))
            .unwrap();
        assert_eq!(doc.get("flags").unwrap(), Value::I64(0b0010));
        apply_operator(&mut doc, "$bit", "flags", &Value::Document(doc! { "or": 0b1000i64 }))
            .unwrap();
        assert_eq!(doc.get("flags").unwrap(), Value::I64(0b1010));
    }

    #[test]
    fn test_apply_operations_full_document() {
        let mut record = doc! { "counter": 1 };
        let operations = doc! {
            "$set": doc! { "name": "mongo" },
            "$inc": doc! { "counter": 2i64 },
            "$push": doc! { "tags": "new" },
        };
        apply_operations(&mut record, &operations).unwrap();
        assert_eq!(record.get("name").unwrap(), Value::from("mongo"));
        assert_eq!(record.get("counter").unwrap(), Value::I64(3));
        assert_eq!(record.get("tags").unwrap(), Value::from(vec!["new"]));
    }

    #[test]
    fn test_dotted_paths_reach_nested_values() {
        let mut record = doc! {};
        apply_operator(&mut record, "$set", "spec.rating", &Value::I64(5)).unwrap();
        apply_operator(&mut record, "$inc", "spec.rating", &Value::I64(1)).unwrap();
        assert_eq!(record.get("spec.rating").unwrap(), Value::I64(6));
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let mut record = Document::new();
        let err = apply_operator(&mut record, "$rename", "a", &Value::from("b")).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnsupportedOperation);
    }
}
