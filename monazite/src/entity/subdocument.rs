use crate::collection::Document;
use crate::common::Value;
use crate::entity::apply::apply_operator;
use crate::entity::entity::Entity;
use crate::entity::operations::root_of;
use crate::errors::MonaziteResult;

impl Entity {
    /// Opens a subdocument proxy rooted at a dotted path of this
    /// entity.
    pub fn subdocument(&mut self, path: &str) -> Subdocument<'_> {
        let path = self.model().aliases().translate(path);
        Subdocument {
            entity: self,
            path,
            emulate: None,
        }
    }
}

/// A view over a dotted-path region of a parent entity, offering the
/// entity's operator vocabulary rooted at that path.
///
/// By default each operator call forwards to the parent with the path
/// prefixed, becoming a pending atomic operation. In emulation mode the
/// operator's effect is instead computed in-memory against the parent's
/// buffered value and written back through the direct-set mechanism, so
/// it participates in changed-field tracking rather than the operations
/// buffer. Emulation is how operators stay usable on structures the
/// server does not know yet: a `push` into a nested array of a parent
/// that was never inserted must arrive at the server as part of a
/// fully-formed plain value, not as an operator against a missing
/// record.
///
/// Emulation is decided per call ([emulate](Subdocument::emulate)), per
/// entity ([Entity::set_emulate]), or by the owning model's default, in
/// that order.
///
/// # Examples
///
/// ```ignore
/// let mut spec = entity.subdocument("spec").emulate(true);
/// spec.push("reviews", doc! { "stars": 5 })?;
/// entity.save()?; // the insert carries the fully-formed spec.reviews
/// ```
pub struct Subdocument<'a> {
    entity: &'a mut Entity,
    path: String,
    emulate: Option<bool>,
}

impl<'a> Subdocument<'a> {
    /// Overrides the emulation policy for this proxy.
    pub fn emulate(mut self, emulate: bool) -> Self {
        self.emulate = Some(emulate);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn emulated(&self) -> bool {
        self.emulate.unwrap_or(self.entity.emulate_default())
    }

    fn full_path(&self, field: &str) -> String {
        if field.is_empty() {
            self.path.clone()
        } else {
            format!("{}.{}", self.path, field)
        }
    }

    /// Applies one operator in-memory to the buffered value at the
    /// addressed path, then marks the top-level field changed so the
    /// next save sends the fully-formed structure.
    fn emulate_operator(&mut self, operator: &str, field: &str, argument: &Value) -> MonaziteResult<()> {
        let path = self.full_path(field);
        let root = root_of(&path).to_string();
        apply_operator(self.entity.values_mut(), operator, &path, argument)?;
        self.entity.mark_field_changed(&root);
        Ok(())
    }

    /// Reads a field under this proxy's root.
    pub fn get(&mut self, field: &str) -> MonaziteResult<Value> {
        self.entity.get(&self.full_path(field))
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<()> {
        let value = value.into();
        if self.emulated() {
            self.emulate_operator("$set", field, &value)
        } else {
            self.entity.set(&self.full_path(field), value)
        }
    }

    pub fn inc(&mut self, field: &str, amount: impl Into<Value>) -> MonaziteResult<()> {
        let amount = amount.into();
        if self.emulated() {
            self.emulate_operator("$inc", field, &amount)
        } else {
            self.entity.inc(&self.full_path(field), amount)
        }
    }

    pub fn push(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<()> {
        let value = value.into();
        if self.emulated() {
            self.emulate_operator("$push", field, &value)
        } else {
            self.entity.push(&self.full_path(field), value)
        }
    }

    pub fn push_all(&mut self, field: &str, values: Vec<Value>) -> MonaziteResult<()> {
        if self.emulated() {
            self.emulate_operator("$pushAll", field, &Value::Array(values))
        } else {
            self.entity.push_all(&self.full_path(field), values)
        }
    }

    pub fn pull(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<()> {
        let value = value.into();
        if self.emulated() {
            self.emulate_operator("$pull", field, &value)
        } else {
            self.entity.pull(&self.full_path(field), value)
        }
    }

    pub fn pull_all(&mut self, field: &str, values: Vec<Value>) -> MonaziteResult<()> {
        if self.emulated() {
            self.emulate_operator("$pullAll", field, &Value::Array(values))
        } else {
            self.entity.pull_all(&self.full_path(field), values)
        }
    }

    pub fn pop(&mut self, field: &str) -> MonaziteResult<()> {
        if self.emulated() {
            self.emulate_operator("$pop", field, &Value::I32(1))
        } else {
            self.entity.pop(&self.full_path(field))
        }
    }

    pub fn shift(&mut self, field: &str) -> MonaziteResult<()> {
        if self.emulated() {
            self.emulate_operator("$pop", field, &Value::I32(-1))
        } else {
            self.entity.shift(&self.full_path(field))
        }
    }

    pub fn add_to_set(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<()> {
        let value = value.into();
        if self.emulated() {
            self.emulate_operator("$addToSet", field, &value)
        } else {
            self.entity.add_to_set(&self.full_path(field), value)
        }
    }

    pub fn unset(&mut self, field: &str) -> MonaziteResult<()> {
        if self.emulated() {
            self.emulate_operator("$unset", field, &Value::I32(1))
        } else {
            self.entity.unset(&self.full_path(field))
        }
    }
}

/// Returns the dotted path of every existing element of the array at
/// `array_path`, in order (`"reviews.0"`, `"reviews.1"`, ...). The list
/// reflects the buffered value at call time; call again after mutating
/// to iterate the new shape. Open one proxy per returned path with
/// [Entity::subdocument].
pub fn element_paths(values: &Document, array_path: &str) -> MonaziteResult<Vec<String>> {
    let count = match values.get(array_path)? {
        Value::Array(items) => items.len(),
        _ => 0,
    };
    Ok((0..count)
        .map(|index| format!("{}.{}", array_path, index))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::driver::MemoryDriver;
    use crate::entity::model::{Model, Registry};
    use std::sync::Arc;

    fn registry() -> Arc<Registry> {
        Registry::builder()
            .driver(Arc::new(MemoryDriver::new()))
            .register(Model::builder("thing").collection("things").build())
            .build()
            .unwrap()
    }

    #[test]
    fn test_forwarded_operators_prefix_the_path() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        thing.set("name", "widget").unwrap();
        thing.save().unwrap();

        let mut spec = thing.subdocument("spec");
        spec.inc("rating", 2i64).unwrap();
        spec.push("reviews", "good").unwrap();
        thing.save().unwrap();

        assert_eq!(thing.get("spec.rating").unwrap(), Value::I64(2));
        assert_eq!(thing.get("spec.reviews").unwrap(), Value::from(vec!["good"]));
    }

    #[test]
    fn test_emulated_push_matches_native_push() {
        let registry = registry();

        // native: push as an atomic operator against a persisted parent
        let mut native = Entity::new(registry.clone(), "thing").unwrap();
        native.set("name", "native").unwrap();
        native.save().unwrap();
        native.subdocument("spec").push("reviews", "five stars").unwrap();
        native.save().unwrap();

        // emulated: push buffered before the parent's first save
        let mut emulated = Entity::new(registry.clone(), "thing").unwrap();
        emulated.set("name", "emulated").unwrap();
        emulated
            .subdocument("spec")
            .emulate(true)
            .push("reviews", "five stars")
            .unwrap();
        emulated.save().unwrap();

        let native_spec = {
            let mut check = Entity::with_id(registry.clone(), "thing", native.identifier().unwrap()).unwrap();
            check.get("spec").unwrap()
        };
        let emulated_spec = {
            let mut check =
                Entity::with_id(registry, "thing", emulated.identifier().unwrap()).unwrap();
            check.get("spec").unwrap()
        };
        assert_eq!(native_spec, emulated_spec);
        assert_eq!(
            native_spec,
            Value::Document(doc! { "reviews": vec!["five stars"] })
        );
    }

    #[test]
    fn test_emulated_operators_mutate_the_buffer() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        let mut spec = thing.subdocument("spec").emulate(true);
        spec.set("rating", 1i64).unwrap();
        spec.inc("rating", 4i64).unwrap();
        spec.push("tags", "a").unwrap();
        spec.push("tags", "b").unwrap();
        spec.pull("tags", "a").unwrap();
        spec.add_to_set("tags", "b").unwrap();

        assert_eq!(thing.values().get("spec.rating").unwrap(), Value::I64(5));
        assert_eq!(thing.values().get("spec.tags").unwrap(), Value::from(vec!["b"]));
        assert!(thing.is_modified());
    }

    #[test]
    fn test_model_default_enables_emulation() {
        let registry = Registry::builder()
            .driver(Arc::new(MemoryDriver::new()))
            .register(
                Model::builder("draft")
                    .emulate_subdocuments(true)
                    .build(),
            )
            .build()
            .unwrap();
        let mut entity = Entity::new(registry, "draft").unwrap();
        entity.subdocument("nested").push("items", 1i64).unwrap();
        // the push landed in the buffer, not the operations set
        assert_eq!(entity.values().get("nested.items").unwrap(), Value::from(vec![1i64]));
    }

    #[test]
    fn test_element_paths_reflect_current_shape() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        let mut spec = thing.subdocument("spec").emulate(true);
        spec.push("reviews", doc! { "stars": 5 }).unwrap();
        spec.push("reviews", doc! { "stars": 3 }).unwrap();

        let paths = element_paths(thing.values(), "spec.reviews").unwrap();
        assert_eq!(paths, vec!["spec.reviews.0", "spec.reviews.1"]);

        let mut first = thing.subdocument(&paths[0]);
        assert_eq!(first.get("stars").unwrap(), Value::I32(5));

        // restartable: a later call sees the new shape
        thing.subdocument("spec").emulate(true).push("reviews", doc! { "stars": 1 }).unwrap();
        let paths = element_paths(thing.values(), "spec.reviews").unwrap();
        assert_eq!(paths.len(), 3);

        assert!(element_paths(thing.values(), "spec.rating").unwrap().is_empty());
    }
}
