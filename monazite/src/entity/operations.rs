use crate::collection::Document;
use crate::common::Value;

/// Buffered atomic update operators, accumulated between saves.
///
/// Each mutation method folds a new operation into the pending operator
/// document instead of queueing it verbatim, so repeated calls collapse
/// into the single operator the server should receive:
///
/// - `inc` amounts on the same path sum
/// - a second `push` on a path promotes the pair to `$pushAll`
/// - a second `pull` on a path promotes the pair to `$pullAll`
/// - `push_all` / `pull_all` concatenate with whatever is pending
/// - a second `add_to_set` promotes to the `{$each: [...]}` form,
///   keeping each element once
/// - `pop`, `bit`, and `unset` simply keep the last value
///
/// Field paths inside operator payloads are dotted strings stored as
/// literal keys; only the server (or the shared apply kernel) interprets
/// them as paths.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOps {
    operators: Document,
}

impl UpdateOps {
    pub fn new() -> Self {
        UpdateOps {
            operators: Document::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Returns the pending operators as the wire-shape document
    /// (`{"$set": {...}, "$inc": {...}}`).
    pub fn as_document(&self) -> &Document {
        &self.operators
    }

    /// Drains the pending operators, leaving the buffer empty.
    pub fn take(&mut self) -> Document {
        std::mem::take(&mut self.operators)
    }

    pub fn clear(&mut self) {
        self.operators = Document::new();
    }

    /// Removes every pending operation whose path lives under the given
    /// top-level field. A direct assignment to a field supersedes the
    /// operators queued against it.
    pub fn clear_root(&mut self, root: &str) {
        let operators: Vec<String> = self.operators.keys().cloned().collect();
        for operator in operators {
            if let Some(payload) = self
                .operators
                .get_key_mut(&operator)
                .and_then(|v| v.as_document_mut())
            {
                let doomed: Vec<String> = payload
                    .keys()
                    .filter(|path| root_of(path) == root)
                    .cloned()
                    .collect();
                for path in doomed {
                    // payload paths are literal dotted keys
                    payload.remove_key(&path);
                }
                if payload.is_empty() {
                    self.operators.remove_key(&operator);
                }
            }
        }
    }

    /// Returns true when any pending operation touches the given
    /// top-level field.
    pub fn touches_root(&self, root: &str) -> bool {
        self.operators.iter().any(|(_, payload)| {
            payload
                .as_document()
                .map(|doc| doc.keys().any(|path| root_of(path) == root))
                .unwrap_or(false)
        })
    }

    pub fn set(&mut self, path: &str, value: Value) {
        self.payload("$set").insert(path, value);
    }

    pub fn unset(&mut self, path: &str) {
        self.payload("$unset").insert(path, Value::I32(1));
    }

    pub fn inc(&mut self, path: &str, amount: Value) {
        let payload = self.payload("$inc");
        let next = match payload.get_key(path) {
            Some(pending) => sum(pending, &amount),
            None => amount,
        };
        payload.insert(path, next);
    }

    pub fn push(&mut self, path: &str, value: Value) {
        if let Some(pending) = self.remove_from("$pushAll", path) {
            let mut items = pending.as_array().cloned().unwrap_or_default();
            items.push(value);
            self.payload("$pushAll").insert(path, Value::Array(items));
        } else if let Some(pending) = self.remove_from("$push", path) {
            self.payload("$pushAll")
                .insert(path, Value::Array(vec![pending, value]));
        } else {
            self.payload("$push").insert(path, value);
        }
    }

    pub fn push_all(&mut self, path: &str, values: Vec<Value>) {
        let mut items = match self.remove_from("$pushAll", path) {
            Some(pending) => pending.as_array().cloned().unwrap_or_default(),
            None => match self.remove_from("$push", path) {
                Some(single) => vec![single],
                None => Vec::new(),
            },
        };
        items.extend(values);
        self.payload("$pushAll").insert(path, Value::Array(items));
    }

    pub fn pull(&mut self, path: &str, value: Value) {
        if let Some(pending) = self.remove_from("$pullAll", path) {
            let mut items = pending.as_array().cloned().unwrap_or_default();
            if !items.contains(&value) {
                items.push(value);
            }
            self.payload("$pullAll").insert(path, Value::Array(items));
        } else if let Some(pending) = self.remove_from("$pull", path) {
            let items = if pending == value {
                vec![pending]
            } else {
                vec![pending, value]
            };
            self.payload("$pullAll").insert(path, Value::Array(items));
        } else {
            self.payload("$pull").insert(path, value);
        }
    }

    pub fn pull_all(&mut self, path: &str, values: Vec<Value>) {
        let mut items = match self.remove_from("$pullAll", path) {
            Some(pending) => pending.as_array().cloned().unwrap_or_default(),
            None => match self.remove_from("$pull", path) {
                Some(single) => vec![single],
                None => Vec::new(),
            },
        };
        for value in values {
            if !items.contains(&value) {
                items.push(value);
            }
        }
        self.payload("$pullAll").insert(path, Value::Array(items));
    }

    /// `direction` is `1` to drop the last element, `-1` the first.
    pub fn pop(&mut self, path: &str, direction: i32) {
        self.payload("$pop").insert(path, Value::I32(direction));
    }

    pub fn add_to_set(&mut self, path: &str, value: Value) {
        match self.remove_from("$addToSet", path) {
            Some(pending) => {
                let mut items = match pending
                    .as_document()
                    .and_then(|doc| doc.get_key("$each"))
                    .and_then(|each| each.as_array())
                {
                    Some(each) => each.clone(),
                    None => vec![pending.clone()],
                };
                if !items.contains(&value) {
                    items.push(value);
                }
                let mut each = Document::new();
                each.insert("$each", Value::Array(items));
                self.payload("$addToSet").insert(path, Value::Document(each));
            }
            None => self.payload("$addToSet").insert(path, value),
        }
    }

    pub fn bit(&mut self, path: &str, operations: Document) {
        self.payload("$bit").insert(path, Value::Document(operations));
    }

    fn payload(&mut self, operator: &str) -> &mut Document {
        if !self.operators.contains_key(operator) {
            self.operators.insert(operator, Value::Document(Document::new()));
        }
        // the entry was just ensured above
        self.operators
            .get_key_mut(operator)
            .and_then(|v| v.as_document_mut())
            .unwrap()
    }

    fn remove_from(&mut self, operator: &str, path: &str) -> Option<Value> {
        let payload = self
            .operators
            .get_key_mut(operator)
            .and_then(|v| v.as_document_mut())?;
        let pending = payload.remove_key(path)?;
        if payload.is_empty() {
            self.operators.remove_key(operator);
        }
        Some(pending)
    }
}

fn sum(a: &Value, b: &Value) -> Value {
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => Value::I64(a + b),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Value::F64(a + b),
            _ => b.clone(),
        },
    }
}

/// Returns the top-level field of a dotted path.
pub(crate) fn root_of(path: &str) -> &str {
    match path.find('.') {
        Some(index) => &path[..index],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_inc_amounts_sum() {
        let mut ops = UpdateOps::new();
        ops.inc("counter", Value::I64(1));
        ops.inc("counter", Value::I64(2));
        assert_eq!(ops.as_document(), &doc! { "$inc": doc! { "counter": 3i64 } });

        ops.inc("score", Value::F64(0.5));
        ops.inc("score", Value::I64(1));
        assert_eq!(
            ops.as_document().get("$inc.score").unwrap(),
            Value::F64(1.5)
        );
    }

    #[test]
    fn test_push_promotes_to_push_all() {
        let mut ops = UpdateOps::new();
        ops.push("tags", Value::from("a"));
        assert_eq!(ops.as_document(), &doc! { "$push": doc! { "tags": "a" } });

        ops.push("tags", Value::from("b"));
        assert_eq!(
            ops.as_document(),
            &doc! { "$pushAll": doc! { "tags": vec!["a", "b"] } }
        );

        ops.push("tags", Value::from("c"));
        assert_eq!(
            ops.as_document(),
            &doc! { "$pushAll": doc! { "tags": vec!["a", "b", "c"] } }
        );
    }

    #[test]
    fn test_push_all_concatenates_with_pending_push() {
        let mut ops = UpdateOps::new();
        ops.push("tags", Value::from("a"));
        ops.push_all("tags", vec![Value::from("b"), Value::from("c")]);
        assert_eq!(
            ops.as_document(),
            &doc! { "$pushAll": doc! { "tags": vec!["a", "b", "c"] } }
        );
    }

    #[test]
    fn test_pull_promotes_and_deduplicates() {
        let mut ops = UpdateOps::new();
        ops.pull("tags", Value::from("a"));
        assert_eq!(ops.as_document(), &doc! { "$pull": doc! { "tags": "a" } });

        ops.pull("tags", Value::from("b"));
        ops.pull("tags", Value::from("b"));
        assert_eq!(
            ops.as_document(),
            &doc! { "$pullAll": doc! { "tags": vec!["a", "b"] } }
        );
    }

    #[test]
    fn test_pop_keeps_last_direction() {
        let mut ops = UpdateOps::new();
        ops.pop("items", 1);
        ops.pop("items", -1);
        assert_eq!(ops.as_document(), &doc! { "$pop": doc! { "items": -1 } });
    }

    #[test]
    fn test_add_to_set_promotes_to_each() {
        let mut ops = UpdateOps::new();
        ops.add_to_set("tags", Value::from("a"));
        assert_eq!(ops.as_document(), &doc! { "$addToSet": doc! { "tags": "a" } });

        ops.add_to_set("tags", Value::from("b"));
        ops.add_to_set("tags", Value::from("a"));
        let each = ops.as_document().get("$addToSet.tags.$each").unwrap();
        assert_eq!(each, Value::from(vec!["a", "b"]));
    }

    #[test]
    fn test_set_unset_and_bit_overwrite() {
        let mut ops = UpdateOps::new();
        ops.set("name", Value::from("first"));
        ops.set("name", Value::from("second"));
        ops.unset("stale");
        ops.bit("flags", doc! { "and": 12i64 });
        ops.bit("flags", doc! { "or": 3i64 });
        assert_eq!(ops.as_document().get("$set.name").unwrap(), Value::from("second"));
        assert_eq!(ops.as_document().get("$unset.stale").unwrap(), Value::I32(1));
        assert_eq!(
            ops.as_document().get("$bit.flags").unwrap(),
            Value::Document(doc! { "or": 3i64 })
        );
    }

    #[test]
    fn test_clear_root_drops_only_matching_paths() {
        let mut ops = UpdateOps::new();
        ops.inc("spec.rating", Value::I64(1));
        ops.push("tags", Value::from("a"));
        assert!(ops.touches_root("spec"));

        ops.clear_root("spec");
        assert!(!ops.touches_root("spec"));
        assert!(ops.touches_root("tags"));

        ops.clear_root("tags");
        assert!(ops.is_empty());
    }

    #[test]
    fn test_dotted_paths_accumulate_like_plain_ones() {
        let mut ops = UpdateOps::new();
        ops.push("spec.tags", Value::from("a"));
        ops.push("spec.tags", Value::from("b"));
        // the single-value form must be gone, not left beside the pair
        assert_eq!(
            ops.as_document(),
            &doc! { "$pushAll": doc! { "spec.tags": vec!["a", "b"] } }
        );

        ops.clear_root("spec");
        assert!(ops.is_empty());
    }

    #[test]
    fn test_take_drains_the_buffer() {
        let mut ops = UpdateOps::new();
        ops.set("a", Value::I64(1));
        let drained = ops.take();
        assert!(!drained.is_empty());
        assert!(ops.is_empty());
    }
}
