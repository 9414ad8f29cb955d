use crate::collection::Document;
use crate::common::Value;
use crate::errors::MonaziteResult;

/// Merges incoming criteria into an existing criteria document.
///
/// Merge rules:
/// - `$or` fragments always accumulate as elements of an array under
///   `$or` (behavior choice documented in DESIGN.md)
/// - `$where` fragments overwrite any previous `$where`
/// - nested documents merge recursively with the same rules
/// - when both sides hold an array under `$in`, the result is the set
///   intersection; under `$nin` or `$all` it is the deduplicated union
/// - everything else is last-write-wins
///
/// Order is preserved: existing keys keep their position, intersection
/// and union keep left-hand order first.
pub fn merge_criteria(existing: &mut Document, incoming: &Document) -> MonaziteResult<()> {
    for (key, value) in incoming.iter() {
        match key.as_str() {
            "$or" => accumulate_or(existing, value),
            "$where" => existing.insert(key.clone(), value.clone()),
            _ => merge_key(existing, key, value),
        }
    }
    Ok(())
}

fn merge_key(existing: &mut Document, key: &str, incoming: &Value) {
    match (existing.get_key(key).cloned(), incoming) {
        (Some(Value::Document(mut current_doc)), Value::Document(incoming_doc)) => {
            for (sub_key, sub_value) in incoming_doc.iter() {
                match (sub_key.as_str(), current_doc.get_key(sub_key).cloned(), sub_value) {
                    ("$in", Some(Value::Array(current_items)), Value::Array(incoming_items)) => {
                        let intersection: Vec<Value> = current_items
                            .into_iter()
                            .filter(|item| incoming_items.contains(item))
                            .collect();
                        current_doc.insert(sub_key.clone(), Value::Array(intersection));
                    }
                    (
                        "$nin" | "$all",
                        Some(Value::Array(current_items)),
                        Value::Array(incoming_items),
                    ) => {
                        let mut union = current_items;
                        for item in incoming_items {
                            if !union.contains(item) {
                                union.push(item.clone());
                            }
                        }
                        current_doc.insert(sub_key.clone(), Value::Array(union));
                    }
                    _ => merge_key(&mut current_doc, sub_key, sub_value),
                }
            }
            existing.insert(key.to_string(), Value::Document(current_doc));
        }
        _ => existing.insert(key.to_string(), incoming.clone()),
    }
}

fn accumulate_or(existing: &mut Document, incoming: &Value) {
    let mut fragments = match existing.get_key("$or").cloned() {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    match incoming {
        Value::Array(items) => fragments.extend(items.iter().cloned()),
        other => fragments.push(other.clone()),
    }
    existing.insert("$or", Value::Array(fragments));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_plain_keys_overwrite() {
        let mut existing = doc! { "a": 1, "b": 2 };
        merge_criteria(&mut existing, &doc! { "b": 3, "c": 4 }).unwrap();
        assert_eq!(existing, doc! { "a": 1, "b": 3, "c": 4 });
    }

    #[test]
    fn test_in_intersects() {
        let mut existing = doc! { "a": doc! { "$in": vec![1, 2, 3] } };
        merge_criteria(&mut existing, &doc! { "a": doc! { "$in": vec![2, 3, 4] } }).unwrap();
        assert_eq!(existing.get("a.$in").unwrap(), Value::from(vec![2, 3]));
    }

    #[test]
    fn test_nin_unions() {
        let mut existing = doc! { "a": doc! { "$nin": vec![1] } };
        merge_criteria(&mut existing, &doc! { "a": doc! { "$nin": vec![2] } }).unwrap();
        assert_eq!(existing.get("a.$nin").unwrap(), Value::from(vec![1, 2]));
    }

    #[test]
    fn test_all_unions_without_duplicates() {
        let mut existing = doc! { "tags": doc! { "$all": vec!["a", "b"] } };
        merge_criteria(&mut existing, &doc! { "tags": doc! { "$all": vec!["b", "c"] } }).unwrap();
        assert_eq!(
            existing.get("tags.$all").unwrap(),
            Value::from(vec!["a", "b", "c"])
        );
    }

    #[test]
    fn test_or_fragments_accumulate() {
        let mut existing = Document::new();
        merge_criteria(&mut existing, &doc! { "$or": vec![doc! { "a": 1 }] }).unwrap();
        merge_criteria(&mut existing, &doc! { "$or": vec![doc! { "b": 2 }] }).unwrap();
        let fragments = existing.get("$or").unwrap();
        assert_eq!(fragments.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_where_overwrites() {
        let mut existing = doc! { "$where": "this.a > 1" };
        merge_criteria(&mut existing, &doc! { "$where": "this.b > 2" }).unwrap();
        assert_eq!(existing.get("$where").unwrap(), Value::from("this.b > 2"));
    }

    #[test]
    fn test_nested_documents_merge_recursively() {
        let mut existing = doc! { "n": doc! { "$gt": 1 } };
        merge_criteria(&mut existing, &doc! { "n": doc! { "$lt": 10 } }).unwrap();
        assert_eq!(existing.get("n.$gt").unwrap(), Value::I32(1));
        assert_eq!(existing.get("n.$lt").unwrap(), Value::I32(10));
    }

    #[test]
    fn test_scalar_replaced_by_operator_document() {
        let mut existing = doc! { "a": 1 };
        merge_criteria(&mut existing, &doc! { "a": doc! { "$gt": 5 } }).unwrap();
        assert_eq!(existing.get("a.$gt").unwrap(), Value::I32(5));
    }
}
