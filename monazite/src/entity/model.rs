use crate::collection::{Collection, Document};
use crate::driver::Driver;
use crate::errors::{ErrorKind, MonaziteError, MonaziteResult};
use crate::query::FieldAliases;
use dashmap::DashMap;
use indexmap::IndexMap;
use std::sync::Arc;

/// What a model declares about one of its fields.
///
/// The kind of every declared field is resolved once at model-definition
/// time, so reference resolution is a table lookup rather than a check
/// performed on each access. Fields that were never declared are plain.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    /// An ordinary stored value.
    Plain,
    /// A single reference to another model, linked through an id field
    /// on this side.
    Reference { target: String, id_field: String },
    /// A reference to many records of another model, linked through an
    /// array of identifiers on this side.
    References { target: String, id_field: String },
    /// A reverse join: the target model holds this record's identifier
    /// in `foreign_field`.
    ReverseReference {
        target: String,
        foreign_field: String,
    },
}

/// The direction of a save, passed to [ModelHooks::before_save].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveAction {
    Insert,
    Update,
}

/// Lifecycle hooks a model may attach to its entities.
///
/// Hooks receive the entity's current field values; `before_save` and
/// `before_load` may mutate them. Every hook defaults to a no-op.
pub trait ModelHooks: Send + Sync {
    fn before_save(&self, _values: &mut Document, _action: SaveAction) -> MonaziteResult<()> {
        Ok(())
    }

    fn after_save(&self, _values: &Document, _action: SaveAction) -> MonaziteResult<()> {
        Ok(())
    }

    fn before_load(&self, _criteria: &mut Document) -> MonaziteResult<()> {
        Ok(())
    }

    fn after_load(&self, _values: &Document) -> MonaziteResult<()> {
        Ok(())
    }
}

/// Static description of an entity class: its collection, field
/// aliases, declared references, hooks, and the default subdocument
/// emulation policy for its entities.
#[derive(Clone)]
pub struct Model {
    name: String,
    collection: String,
    aliases: FieldAliases,
    fields: IndexMap<String, FieldKind>,
    hooks: Option<Arc<dyn ModelHooks>>,
    emulate_subdocuments: bool,
}

impl Model {
    /// Starts building a model. The collection name defaults to the
    /// model name.
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        let name = name.into();
        ModelBuilder {
            collection: name.clone(),
            name,
            aliases: FieldAliases::new(),
            fields: IndexMap::new(),
            hooks: None,
            emulate_subdocuments: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn aliases(&self) -> &FieldAliases {
        &self.aliases
    }

    /// Returns the declared kind of a field; undeclared fields are
    /// [FieldKind::Plain].
    pub fn field_kind(&self, name: &str) -> &FieldKind {
        self.fields.get(name).unwrap_or(&FieldKind::Plain)
    }

    /// Returns whether a field was declared as any flavor of reference.
    pub fn is_reference(&self, name: &str) -> bool {
        !matches!(self.field_kind(name), FieldKind::Plain)
    }

    /// Returns whether a physical field name is the id field of a
    /// declared reference.
    pub fn is_reference_id_field(&self, name: &str) -> bool {
        self.fields.values().any(|kind| match kind {
            FieldKind::Reference { id_field, .. } | FieldKind::References { id_field, .. } => {
                id_field == name
            }
            _ => false,
        })
    }

    pub fn hooks(&self) -> Option<&Arc<dyn ModelHooks>> {
        self.hooks.as_ref()
    }

    pub fn emulate_subdocuments(&self) -> bool {
        self.emulate_subdocuments
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Builder for [Model].
///
/// ```ignore
/// let book = Model::builder("book")
///     .collection("books")
///     .alias("title", "t")
///     .reference("author", "author", None)
///     .build();
/// ```
pub struct ModelBuilder {
    name: String,
    collection: String,
    aliases: FieldAliases,
    fields: IndexMap<String, FieldKind>,
    hooks: Option<Arc<dyn ModelHooks>>,
    emulate_subdocuments: bool,
}

impl ModelBuilder {
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = name.into();
        self
    }

    pub fn alias(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.aliases.insert(logical, physical);
        self
    }

    /// Declares a single reference field. The id field defaults to the
    /// reference name prefixed with an underscore.
    pub fn reference(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        id_field: Option<String>,
    ) -> Self {
        let name = name.into();
        let id_field = id_field.unwrap_or_else(|| format!("_{}", name));
        self.fields.insert(
            name,
            FieldKind::Reference {
                target: target.into(),
                id_field,
            },
        );
        self
    }

    /// Declares a multiple-reference field holding an array of target
    /// identifiers.
    pub fn references(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        id_field: Option<String>,
    ) -> Self {
        let name = name.into();
        let id_field = id_field.unwrap_or_else(|| format!("_{}", name));
        self.fields.insert(
            name,
            FieldKind::References {
                target: target.into(),
                id_field,
            },
        );
        self
    }

    /// Declares a reverse reference resolved by querying the target
    /// collection for records whose `foreign_field` holds this record's
    /// identifier.
    pub fn reverse_reference(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldKind::ReverseReference {
                target: target.into(),
                foreign_field: foreign_field.into(),
            },
        );
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ModelHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Makes subdocument operators of this model's entities emulate
    /// in-memory by default.
    pub fn emulate_subdocuments(mut self, emulate: bool) -> Self {
        self.emulate_subdocuments = emulate;
        self
    }

    pub fn build(self) -> Model {
        Model {
            name: self.name,
            collection: self.collection,
            aliases: self.aliases,
            fields: self.fields,
            hooks: self.hooks,
            emulate_subdocuments: self.emulate_subdocuments,
        }
    }
}

const SEQUENCE_COLLECTION: &str = "sequences";

/// The composition root of a mapped database: one shared driver, the
/// registered models, and the construct-once memoization of model
/// metadata.
///
/// A registry replaces process-wide singletons: callers construct one
/// per database and pass it (as an `Arc`) to everything that needs to
/// resolve models or open collections. Model registration after
/// construction is allowed; last registration wins, which makes the
/// benign double-registration race acceptable in multi-threaded hosts.
pub struct Registry {
    driver: Arc<dyn Driver>,
    database: String,
    models: DashMap<String, Arc<Model>>,
    safe_writes: bool,
    emulate_subdocuments: bool,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            driver: None,
            database: None,
            models: Vec::new(),
            safe_writes: true,
            emulate_subdocuments: false,
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether saves verify the server acknowledgment by default.
    pub fn safe_writes(&self) -> bool {
        self.safe_writes
    }

    /// The database-wide subdocument emulation default.
    pub fn emulate_subdocuments(&self) -> bool {
        self.emulate_subdocuments
    }

    /// Registers (or replaces) a model.
    pub fn register(&self, model: Model) {
        log::debug!("Registering model {} in database {}", model.name(), self.database);
        self.models.insert(model.name().to_string(), Arc::new(model));
    }

    /// Resolves a registered model by name.
    ///
    /// # Errors
    ///
    /// Fails with [ErrorKind::NotFound] when no model with that name was
    /// registered.
    pub fn model(&self, name: &str) -> MonaziteResult<Arc<Model>> {
        match self.models.get(name) {
            Some(model) => Ok(model.clone()),
            None => {
                log::error!("Model {} is not registered", name);
                Err(MonaziteError::new(
                    &format!("Model {} is not registered", name),
                    ErrorKind::NotFound,
                ))
            }
        }
    }

    /// Opens a direct-mode collection wrapper: raw records, no alias
    /// translation.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection::new(self.driver.clone(), name)
    }

    /// Opens a collection wrapper bound to a model's collection and
    /// alias table.
    pub fn model_collection(&self, model_name: &str) -> MonaziteResult<Collection> {
        let model = self.model(model_name)?;
        Ok(Collection::with_aliases(
            self.driver.clone(),
            model.collection(),
            model.aliases().clone(),
        ))
    }

    /// Returns the next value of a named auto-increment sequence,
    /// maintained server-side with a findAndModify round trip.
    pub fn next_sequence(&self, name: &str) -> MonaziteResult<i64> {
        let mut query = Document::new();
        query.insert("name", name);
        let mut bump = Document::new();
        bump.insert("value", 1i64);
        let mut update = Document::new();
        update.insert("$inc", bump);

        let mut args = Document::new();
        args.insert("findandmodify", SEQUENCE_COLLECTION);
        args.insert("query", query);
        args.insert("update", update);
        args.insert("new", true);
        args.insert("upsert", true);

        let reply = self.driver.run_command("findandmodify", &args)?;
        if !reply.ok {
            let message = reply
                .error_message
                .unwrap_or_else(|| "findandmodify command failed".to_string());
            log::error!("Sequence {} failed: {}", name, message);
            return Err(MonaziteError::new(&message, ErrorKind::DriverError));
        }
        reply
            .result
            .get("value.value")?
            .as_i64()
            .ok_or_else(|| {
                MonaziteError::new(
                    &format!("Sequence {} returned a non-numeric value", name),
                    ErrorKind::DriverError,
                )
            })
    }
}

/// Builder for [Registry].
pub struct RegistryBuilder {
    driver: Option<Arc<dyn Driver>>,
    database: Option<String>,
    models: Vec<Model>,
    safe_writes: bool,
    emulate_subdocuments: bool,
}

impl RegistryBuilder {
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    pub fn register(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    /// Sets whether saves verify the server acknowledgment by default.
    pub fn safe_writes(mut self, safe: bool) -> Self {
        self.safe_writes = safe;
        self
    }

    /// Enables subdocument emulation for every model by default.
    pub fn emulate_subdocuments(mut self, emulate: bool) -> Self {
        self.emulate_subdocuments = emulate;
        self
    }

    /// # Errors
    ///
    /// Fails with [ErrorKind::InvalidOperation] when no driver was
    /// supplied.
    pub fn build(self) -> MonaziteResult<Arc<Registry>> {
        let driver = self.driver.ok_or_else(|| {
            log::error!("Cannot build a registry without a driver");
            MonaziteError::new(
                "Cannot build a registry without a driver",
                ErrorKind::InvalidOperation,
            )
        })?;
        let registry = Registry {
            driver,
            database: self.database.unwrap_or_else(|| "default".to_string()),
            models: DashMap::new(),
            safe_writes: self.safe_writes,
            emulate_subdocuments: self.emulate_subdocuments,
        };
        for model in self.models {
            registry.register(model);
        }
        Ok(Arc::new(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    fn registry() -> Arc<Registry> {
        Registry::builder()
            .driver(Arc::new(MemoryDriver::new()))
            .database("testdb")
            .register(
                Model::builder("book")
                    .collection("books")
                    .alias("title", "t")
                    .reference("author", "author", None)
                    .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_model_lookup() {
        let registry = registry();
        let model = registry.model("book").unwrap();
        assert_eq!(model.collection(), "books");
        assert_eq!(model.aliases().translate("title"), "t");
        assert!(registry.model("missing").is_err());
    }

    #[test]
    fn test_field_kinds() {
        let model = Model::builder("post")
            .reference("author", "user", None)
            .references("editors", "user", Some("editor_ids".to_string()))
            .reverse_reference("comments", "comment", "_post")
            .build();
        assert_eq!(
            model.field_kind("author"),
            &FieldKind::Reference {
                target: "user".to_string(),
                id_field: "_author".to_string()
            }
        );
        assert_eq!(
            model.field_kind("editors"),
            &FieldKind::References {
                target: "user".to_string(),
                id_field: "editor_ids".to_string()
            }
        );
        assert!(model.is_reference("comments"));
        assert_eq!(model.field_kind("body"), &FieldKind::Plain);
    }

    #[test]
    fn test_model_collection_carries_aliases() {
        let registry = registry();
        let mut books = registry.model_collection("book").unwrap();
        books.find(crate::doc! { "title": "Dune" }).unwrap();
        assert!(books.inspect().contains("\"t\": \"Dune\""));
    }

    #[test]
    fn test_next_sequence_increments() {
        let registry = registry();
        assert_eq!(registry.next_sequence("invoice").unwrap(), 1);
        assert_eq!(registry.next_sequence("invoice").unwrap(), 2);
        assert_eq!(registry.next_sequence("order").unwrap(), 1);
    }

    #[test]
    fn test_builder_requires_driver() {
        assert!(Registry::builder().database("x").build().is_err());
    }
}
