use crate::collection::{Collection, Document, DOC_ID};
use crate::common::{cast_identifier, Value};
use crate::driver::{RemoveCommandOptions, UpdateCommandOptions};
use crate::entity::model::{FieldKind, Model, Registry, SaveAction};
use crate::entity::operations::{root_of, UpdateOps};
use crate::errors::{ErrorKind, MonaziteError, MonaziteResult};
use crate::query::parse_criteria;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether an entity has attempted to load itself from the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    NotAttempted,
    Failed,
    Succeeded,
}

/// A resolved reference: either a single lazily-constructed entity or a
/// live query over the target collection (for multiple and reverse
/// references).
pub enum Related {
    Entity(Entity),
    Query(Collection),
}

/// One mapped record with mutation tracking and a save/load/delete
/// lifecycle.
///
/// An entity keeps its field values in a single buffered document and
/// tracks, separately, which top-level fields were assigned directly
/// (`changed`) and which atomic operators are pending (`operations`).
/// A direct assignment and a pending operator are mutually exclusive
/// per top-level field; the last writer wins. Every operator call also
/// marks its top-level field dirty: the authoritative value is then
/// unknown client-side until the entity reloads.
///
/// Reads go through a small state machine (see [get](Entity::get)):
/// dirty fields on a loaded entity trigger an implicit reload, and the
/// first read on an entity that knows its identifier but never loaded
/// triggers an implicit load.
///
/// Entities are single-flow objects: no internal locking is provided,
/// and one instance must not be mutated from two logical flows at once.
/// Give each request its own entities; the driver underneath is the
/// shared, thread-safe layer.
///
/// # Examples
///
/// ```ignore
/// let mut book = Entity::new(registry.clone(), "book")?;
/// book.set("title", "Dune")?;
/// book.set("counter", 10)?;
/// book.save()?;
///
/// book.inc("counter", 1)?;
/// book.save()?;
/// assert_eq!(book.get("counter")?, Value::I64(11));
/// ```
#[derive(Clone)]
pub struct Entity {
    registry: Arc<Registry>,
    model: Arc<Model>,
    values: Document,
    changed: IndexSet<String>,
    operations: UpdateOps,
    dirty: IndexSet<String>,
    loaded: LoadState,
    related: HashMap<String, Entity>,
    emulate: Option<bool>,
}

impl Entity {
    /// Creates an empty entity of a registered model.
    pub fn new(registry: Arc<Registry>, model_name: &str) -> MonaziteResult<Self> {
        let model = registry.model(model_name)?;
        Ok(Entity {
            registry,
            model,
            values: Document::new(),
            changed: IndexSet::new(),
            operations: UpdateOps::new(),
            dirty: IndexSet::new(),
            loaded: LoadState::NotAttempted,
            related: HashMap::new(),
            emulate: None,
        })
    }

    /// Creates an entity seeded with a known identifier. The record is
    /// not fetched until a field is read or [load](Entity::load) is
    /// called.
    pub fn with_id(
        registry: Arc<Registry>,
        model_name: &str,
        identifier: impl Into<Value>,
    ) -> MonaziteResult<Self> {
        let mut entity = Entity::new(registry, model_name)?;
        entity
            .values
            .insert(DOC_ID, cast_identifier(identifier.into()));
        Ok(entity)
    }

    /// Creates an entity from a record already fetched elsewhere (for
    /// example from a [Collection] iteration). The record becomes the
    /// clean baseline.
    pub fn from_record(
        registry: Arc<Registry>,
        model_name: &str,
        record: Document,
    ) -> MonaziteResult<Self> {
        let mut entity = Entity::new(registry, model_name)?;
        entity.values = record;
        entity.loaded = LoadState::Succeeded;
        Ok(entity)
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Returns the known identifier, if any.
    pub fn identifier(&self) -> Option<Value> {
        self.values
            .get_key(DOC_ID)
            .filter(|value| !value.is_null())
            .cloned()
    }

    pub fn load_state(&self) -> LoadState {
        self.loaded
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded == LoadState::Succeeded
    }

    /// Returns whether any direct change or operator is pending.
    pub fn is_modified(&self) -> bool {
        !self.changed.is_empty() || !self.operations.is_empty()
    }

    /// Overrides the model's subdocument emulation default for this
    /// entity.
    pub fn set_emulate(&mut self, emulate: Option<bool>) {
        self.emulate = emulate;
    }

    pub(crate) fn emulate_default(&self) -> bool {
        self.emulate
            .unwrap_or(self.model.emulate_subdocuments() || self.registry.emulate_subdocuments())
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn values_mut(&mut self) -> &mut Document {
        &mut self.values
    }

    /// Returns a snapshot of the buffered field values.
    pub fn values(&self) -> &Document {
        &self.values
    }

    fn translate(&self, field: &str) -> String {
        self.model.aliases().translate(field)
    }

    fn is_identifier_field(&self, physical: &str) -> bool {
        physical == DOC_ID || self.model.is_reference_id_field(physical)
    }

    /// Marks a top-level field as changed by a direct write: the
    /// buffered value is now authoritative, superseding any operator
    /// queued against the field.
    pub(crate) fn mark_field_changed(&mut self, root: &str) {
        self.operations.clear_root(root);
        self.dirty.swap_remove(root);
        self.changed.insert(root.to_string());
    }

    fn mark_operation(&mut self, path: &str) {
        let root = root_of(path).to_string();
        self.changed.swap_remove(&root);
        self.dirty.insert(root);
    }

    /// Assigns a field.
    ///
    /// An undotted name writes straight to the buffered value and marks
    /// the field changed. A dotted path cannot be verified client-side,
    /// so it is recorded as a `$set` operation instead and the top-level
    /// field becomes dirty. Values assigned to identifier-like fields
    /// pass through the identifier round-trip cast.
    ///
    /// # Errors
    ///
    /// Fails with [ErrorKind::ReferenceTypeError] when the field is a
    /// declared reference; references take entities, via
    /// [set_related](Entity::set_related).
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<()> {
        if self.model.is_reference(field) {
            log::error!("Field {} is a declared reference, not a value field", field);
            return Err(MonaziteError::new(
                &format!(
                    "Field {} is a declared reference; assign an entity with set_related",
                    field
                ),
                ErrorKind::ReferenceTypeError,
            ));
        }
        let path = self.translate(field);
        let mut value = value.into();
        if self.is_identifier_field(&path) {
            value = cast_identifier(value);
        }
        if path.contains('.') {
            self.mark_operation(&path);
            self.operations.set(&path, value);
        } else {
            self.values.insert(path.clone(), value);
            self.mark_field_changed(&path);
        }
        Ok(())
    }

    /// Reads a field, following the implicit-load rules.
    ///
    /// - a dirty field on a loaded entity with nothing else pending
    ///   forces a reload before the read
    /// - the first read on a never-loaded entity with a known
    ///   identifier forces a load (except for the identifier itself)
    /// - otherwise the buffered value is returned, [Value::Null] when
    ///   absent
    pub fn get(&mut self, field: &str) -> MonaziteResult<Value> {
        if self.model.is_reference(field) {
            log::error!("Field {} is a declared reference, read it with related()", field);
            return Err(MonaziteError::new(
                &format!("Field {} is a declared reference; resolve it with related", field),
                ErrorKind::InvalidOperation,
            ));
        }
        let path = self.translate(field);
        let root = root_of(&path).to_string();

        if self.loaded == LoadState::Succeeded
            && self.operations.is_empty()
            && self.changed.is_empty()
            && self.dirty.contains(&root)
        {
            log::debug!("Reloading {} to satisfy read of dirty field {}", self.model.name(), root);
            self.load(None, None)?;
        } else if self.loaded == LoadState::NotAttempted
            && self.identifier().is_some()
            && !self.changed.contains(DOC_ID)
            && path != DOC_ID
        {
            self.load(None, None)?;
        }

        self.values.get(&path)
    }

    fn operator(&mut self, field: &str) -> String {
        let path = self.translate(field);
        self.mark_operation(&path);
        path
    }

    /// Queues a numeric increment; repeated amounts sum.
    pub fn inc(&mut self, field: &str, amount: impl Into<Value>) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.inc(&path, amount.into());
        Ok(())
    }

    /// Queues an array append; a second push on the same field promotes
    /// to the multi-value form, preserving call order.
    pub fn push(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.push(&path, value.into());
        Ok(())
    }

    pub fn push_all(&mut self, field: &str, values: Vec<Value>) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.push_all(&path, values);
        Ok(())
    }

    /// Queues removal of a value from an array field.
    pub fn pull(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.pull(&path, value.into());
        Ok(())
    }

    pub fn pull_all(&mut self, field: &str, values: Vec<Value>) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.pull_all(&path, values);
        Ok(())
    }

    /// Queues removal of the last array element.
    pub fn pop(&mut self, field: &str) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.pop(&path, 1);
        Ok(())
    }

    /// Queues removal of the first array element.
    pub fn shift(&mut self, field: &str) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.pop(&path, -1);
        Ok(())
    }

    /// Queues a set-membership append: the value is added only if not
    /// already present.
    pub fn add_to_set(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.add_to_set(&path, value.into());
        Ok(())
    }

    /// Queues removal of the field itself.
    pub fn unset(&mut self, field: &str) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.unset(&path);
        Ok(())
    }

    /// Queues a bitwise update; repeated calls overwrite.
    pub fn bit(&mut self, field: &str, ops: Document) -> MonaziteResult<()> {
        let path = self.operator(field);
        self.operations.bit(&path, ops);
        Ok(())
    }

    /// Links a declared single reference to an entity.
    ///
    /// If the entity already knows its identifier, the id field is
    /// written immediately; otherwise the linkage is deferred until this
    /// entity saves (the caller is responsible for saving the related
    /// entity first).
    ///
    /// # Errors
    ///
    /// Fails with [ErrorKind::ReferenceTypeError] when the field is not
    /// a declared single reference or the entity is of the wrong model.
    pub fn set_related(&mut self, field: &str, entity: Entity) -> MonaziteResult<()> {
        let (target, id_field) = match self.model.field_kind(field) {
            FieldKind::Reference { target, id_field } => (target.clone(), id_field.clone()),
            _ => {
                log::error!("Field {} is not a declared single reference", field);
                return Err(MonaziteError::new(
                    &format!("Field {} is not a declared single reference", field),
                    ErrorKind::ReferenceTypeError,
                ));
            }
        };
        if entity.model.name() != target {
            log::error!(
                "Reference {} expects a {} entity, got {}",
                field,
                target,
                entity.model.name()
            );
            return Err(MonaziteError::new(
                &format!("Reference {} expects a {} entity", field, target),
                ErrorKind::ReferenceTypeError,
            ));
        }
        if let Some(id) = entity.identifier() {
            self.values.insert(id_field.clone(), id);
            self.mark_field_changed(&id_field);
        }
        self.related.insert(field.to_string(), entity);
        Ok(())
    }

    /// Resolves a declared reference.
    ///
    /// A single reference resolves to a lazily-constructed entity
    /// seeded with the stored identifier (memoized). A multiple
    /// reference resolves to a query for identifiers in the stored
    /// array, and a reverse reference to a query on the target's
    /// foreign field; queries are built fresh on every call.
    pub fn related(&mut self, field: &str) -> MonaziteResult<Related> {
        match self.model.field_kind(field).clone() {
            FieldKind::Plain => {
                log::error!("Field {} is not a declared reference", field);
                Err(MonaziteError::new(
                    &format!("Field {} is not a declared reference", field),
                    ErrorKind::InvalidOperation,
                ))
            }
            FieldKind::Reference { target, id_field } => {
                if let Some(cached) = self.related.get(field) {
                    return Ok(Related::Entity(cached.clone()));
                }
                let id = unwrap_foreign_id(self.get(&id_field)?);
                if id.is_null() {
                    return Err(MonaziteError::new(
                        &format!("Reference {} has no stored identifier", field),
                        ErrorKind::NotFound,
                    ));
                }
                let entity = Entity::with_id(self.registry.clone(), &target, id)?;
                self.related.insert(field.to_string(), entity.clone());
                Ok(Related::Entity(entity))
            }
            FieldKind::References { target, id_field } => {
                let ids = match self.get(&id_field)? {
                    Value::Array(items) => items
                        .into_iter()
                        .map(unwrap_foreign_id)
                        .collect::<Vec<Value>>(),
                    Value::Null => Vec::new(),
                    other => vec![unwrap_foreign_id(other)],
                };
                let mut query = self.registry.model_collection(&target)?;
                let mut membership = Document::new();
                membership.insert("$in", Value::Array(ids));
                let mut criteria = Document::new();
                criteria.insert(DOC_ID, Value::Document(membership));
                query.find(criteria)?;
                Ok(Related::Query(query))
            }
            FieldKind::ReverseReference {
                target,
                foreign_field,
            } => {
                let id = self.identifier().ok_or_else(|| {
                    MonaziteError::new(
                        &format!(
                            "Cannot resolve reverse reference {} before an identifier is known",
                            field
                        ),
                        ErrorKind::MissingCriteria,
                    )
                })?;
                let mut query = self.registry.model_collection(&target)?;
                let mut criteria = Document::new();
                criteria.insert(foreign_field, id);
                query.find(criteria)?;
                Ok(Related::Query(query))
            }
        }
    }

    /// Before saving, write the identifiers of cached related entities
    /// into their id fields. Related entities are expected to have been
    /// saved by the caller already; linkage to a still-unsaved entity
    /// stays deferred.
    fn sync_references(&mut self) {
        let links: Vec<(String, Option<Value>)> = self
            .related
            .iter()
            .map(|(name, entity)| (name.clone(), entity.identifier()))
            .collect();
        for (name, id) in links {
            let id_field = match self.model.field_kind(&name) {
                FieldKind::Reference { id_field, .. } => id_field.clone(),
                _ => continue,
            };
            match id {
                Some(id) => {
                    if self.values.get_key(&id_field) != Some(&id) {
                        self.values.insert(id_field.clone(), id);
                        self.mark_field_changed(&id_field);
                    }
                }
                None => {
                    log::warn!(
                        "Related entity for {} has no identifier yet; linkage stays deferred",
                        name
                    );
                }
            }
        }
    }

    /// Persists pending state as one insert or one update, verifying the
    /// server reply.
    ///
    /// The insert path requires at least one changed field
    /// ([ErrorKind::EmptyInsert]) and, when operators are also pending,
    /// follows the insert with a second update by identifier to apply
    /// them. The update path folds changed fields into `$set` and issues
    /// a single update; saving with nothing pending is a legal no-op.
    ///
    /// Verification follows the registry's safe-write default; see
    /// [save_unverified](Entity::save_unverified) for the explicit
    /// non-verifying form.
    pub fn save(&mut self) -> MonaziteResult<()> {
        self.save_with(self.registry.safe_writes())
    }

    /// Persists like [save](Entity::save) but does not interpret the
    /// server acknowledgment; failures the server reports are ignored.
    pub fn save_unverified(&mut self) -> MonaziteResult<()> {
        self.save_with(false)
    }

    fn save_with(&mut self, verify: bool) -> MonaziteResult<()> {
        self.sync_references();
        let insert_path = self.identifier().is_none() || self.changed.contains(DOC_ID);
        if insert_path {
            self.save_insert(verify)
        } else {
            self.save_update(verify)
        }
    }

    fn run_hook<F>(&mut self, f: F) -> MonaziteResult<()>
    where
        F: FnOnce(&Arc<dyn crate::entity::model::ModelHooks>, &mut Document) -> MonaziteResult<()>,
    {
        let model = self.model.clone();
        if let Some(hooks) = model.hooks() {
            f(hooks, &mut self.values)?;
        }
        Ok(())
    }

    /// Runs the before-save hook and marks every field it wrote as
    /// changed, so hook mutations reach the persisted payload.
    fn run_before_save(&mut self, action: SaveAction) -> MonaziteResult<()> {
        let model = self.model.clone();
        if let Some(hooks) = model.hooks() {
            let before = self.values.clone();
            hooks.before_save(&mut self.values, action)?;
            let touched: Vec<String> = self
                .values
                .keys()
                .filter(|key| before.get_key(key.as_str()) != self.values.get_key(key.as_str()))
                .cloned()
                .collect();
            for field in touched {
                self.mark_field_changed(&field);
            }
        }
        Ok(())
    }

    fn save_insert(&mut self, verify: bool) -> MonaziteResult<()> {
        self.run_before_save(SaveAction::Insert)?;

        if self.changed.is_empty() {
            log::error!("Insert of {} attempted with no changed fields", self.model.name());
            return Err(MonaziteError::new(
                "Cannot insert a document with no changed fields",
                ErrorKind::EmptyInsert,
            ));
        }

        let mut payload = Document::new();
        for field in &self.changed {
            if let Some(value) = self.values.get_key(field) {
                payload.insert(field.clone(), value.clone());
            }
        }

        let reply = self
            .registry
            .driver()
            .insert(self.model.collection(), &payload)?;
        if verify && !reply.ok {
            let message = reply
                .error_message
                .unwrap_or_else(|| "server rejected the insert".to_string());
            log::error!("Insert into {} failed: {}", self.model.collection(), message);
            return Err(MonaziteError::new(&message, ErrorKind::InsertFailed));
        }
        if self.values.get_key(DOC_ID).is_none() {
            if let Some(identifier) = reply.identifier {
                self.values.insert(DOC_ID, identifier);
            }
        }
        self.loaded = LoadState::Succeeded;
        self.changed.clear();

        // pending operators go out as a second round trip; folding them
        // into the insert would change the error shape callers observe
        if !self.operations.is_empty() {
            let operations = self.operations.take();
            let reply = self.registry.driver().update(
                self.model.collection(),
                &self.identifier_criteria()?,
                &operations,
                UpdateCommandOptions::default(),
            )?;
            if verify && !reply.ok {
                let message = reply
                    .error_message
                    .unwrap_or_else(|| "server rejected the post-insert update".to_string());
                log::error!("Post-insert update on {} failed: {}", self.model.collection(), message);
                return Err(MonaziteError::new(&message, ErrorKind::UpdateFailed));
            }
        }

        self.run_hook(|hooks, values| hooks.after_save(values, SaveAction::Insert))
    }

    fn save_update(&mut self, verify: bool) -> MonaziteResult<()> {
        self.run_before_save(SaveAction::Update)?;

        let changed: Vec<String> = self.changed.drain(..).collect();
        for field in changed {
            if let Some(value) = self.values.get_key(&field) {
                self.operations.set(&field, value.clone());
            }
        }

        if !self.operations.is_empty() {
            let operations = self.operations.take();
            let reply = self.registry.driver().update(
                self.model.collection(),
                &self.identifier_criteria()?,
                &operations,
                UpdateCommandOptions::default(),
            )?;
            if verify && !reply.ok {
                let message = reply
                    .error_message
                    .unwrap_or_else(|| "server rejected the update".to_string());
                log::error!("Update on {} failed: {}", self.model.collection(), message);
                return Err(MonaziteError::new(&message, ErrorKind::UpdateFailed));
            }
        }
        self.loaded = LoadState::Succeeded;

        self.run_hook(|hooks, values| hooks.after_save(values, SaveAction::Update))
    }

    /// Inserts or updates by criteria in one server round trip.
    ///
    /// The match criteria come from the known identifier when present,
    /// otherwise from the buffered field values. Pending changes and
    /// operators are sent as a single upserting update; when the server
    /// creates a record, its identifier is captured.
    pub fn upsert(&mut self) -> MonaziteResult<()> {
        self.sync_references();

        let criteria = match self.identifier() {
            Some(id) => {
                let mut criteria = Document::new();
                criteria.insert(DOC_ID, id);
                criteria
            }
            None => {
                if self.values.is_empty() {
                    log::error!("Upsert of {} attempted with no criteria", self.model.name());
                    return Err(MonaziteError::new(
                        "Cannot upsert a document with no matchable state",
                        ErrorKind::MissingCriteria,
                    ));
                }
                self.values.clone()
            }
        };

        self.run_before_save(SaveAction::Update)?;

        let changed: Vec<String> = self.changed.drain(..).collect();
        for field in changed {
            if let Some(value) = self.values.get_key(&field) {
                self.operations.set(&field, value.clone());
            }
        }
        if self.operations.is_empty() {
            return Ok(());
        }

        let operations = self.operations.take();
        let reply = self.registry.driver().update(
            self.model.collection(),
            &criteria,
            &operations,
            UpdateCommandOptions {
                multi: false,
                upsert: true,
            },
        )?;
        if !reply.ok {
            let message = reply
                .error_message
                .unwrap_or_else(|| "server rejected the upsert".to_string());
            log::error!("Upsert on {} failed: {}", self.model.collection(), message);
            return Err(MonaziteError::new(&message, ErrorKind::UpsertFailed));
        }
        if self.identifier().is_none() {
            if let Some(identifier) = reply.upserted_id {
                self.values.insert(DOC_ID, identifier);
            }
        }
        self.loaded = LoadState::Succeeded;

        self.run_hook(|hooks, values| hooks.after_save(values, SaveAction::Update))
    }

    fn identifier_criteria(&self) -> MonaziteResult<Document> {
        let id = self.identifier().ok_or_else(|| {
            MonaziteError::new(
                "No identifier is known for this document",
                ErrorKind::MissingCriteria,
            )
        })?;
        let mut criteria = Document::new();
        criteria.insert(DOC_ID, id);
        Ok(criteria)
    }

    /// Fetches the record and installs it as the clean baseline.
    ///
    /// Criteria resolve in order: an explicit identifier or criteria
    /// argument, the known identifier, an `id` key in the buffered
    /// values, then the full buffered values. Not-found is `Ok(false)`,
    /// not an error; the entity stays valid with `loaded == Failed`.
    ///
    /// # Errors
    ///
    /// Fails with [ErrorKind::MissingCriteria] when nothing resolvable
    /// remains.
    pub fn load(
        &mut self,
        criteria: Option<crate::collection::CriteriaInput>,
        projection: Option<&Document>,
    ) -> MonaziteResult<bool> {
        let mut resolved = self.resolve_load_criteria(criteria)?;

        if self.loaded != LoadState::NotAttempted || self.is_modified() {
            self.changed.clear();
            self.operations.clear();
            self.dirty.clear();
        }

        let model = self.model.clone();
        if let Some(hooks) = model.hooks() {
            hooks.before_load(&mut resolved)?;
        }

        let record = self.registry.driver().find_one(
            self.model.collection(),
            &resolved,
            projection.unwrap_or(&Document::new()),
        )?;

        match record {
            Some(record) => {
                self.values = record;
                self.dirty.clear();
                self.loaded = LoadState::Succeeded;
                if let Some(hooks) = model.hooks() {
                    hooks.after_load(&self.values)?;
                }
                Ok(true)
            }
            None => {
                self.loaded = LoadState::Failed;
                Ok(false)
            }
        }
    }

    fn resolve_load_criteria(
        &self,
        criteria: Option<crate::collection::CriteriaInput>,
    ) -> MonaziteResult<Document> {
        use crate::collection::CriteriaInput;

        let aliases = self.model.aliases();
        match criteria {
            Some(CriteriaInput::Identifier(id)) => {
                let mut resolved = Document::new();
                resolved.insert(DOC_ID, cast_identifier(id));
                Ok(resolved)
            }
            Some(CriteriaInput::Shorthand(text)) => {
                Ok(translate_keys(aliases, &parse_criteria(&text)?))
            }
            Some(CriteriaInput::Criteria(doc)) => Ok(translate_keys(aliases, &doc)),
            None => {
                if let Some(id) = self.identifier() {
                    let mut resolved = Document::new();
                    resolved.insert(DOC_ID, id);
                    return Ok(resolved);
                }
                if let Some(id) = self.values.get_key("id").filter(|v| !v.is_null()) {
                    let mut resolved = Document::new();
                    resolved.insert(DOC_ID, cast_identifier(id.clone()));
                    return Ok(resolved);
                }
                if !self.values.is_empty() {
                    return Ok(translate_keys(aliases, &self.values));
                }
                log::error!("Load of {} attempted with no resolvable criteria", self.model.name());
                Err(MonaziteError::new(
                    "No criteria could be resolved for load",
                    ErrorKind::MissingCriteria,
                ))
            }
        }
    }

    /// Removes the record and resets the entity to its initial-empty
    /// state; the load state is deliberately left untouched.
    ///
    /// # Errors
    ///
    /// Fails with [ErrorKind::MissingCriteria] when no identifier is
    /// known, and [ErrorKind::RemoveFailed] when the server rejects the
    /// remove. Deleting never silently no-ops.
    pub fn delete(&mut self) -> MonaziteResult<()> {
        let criteria = self.identifier_criteria().map_err(|err| {
            log::error!("Delete of {} attempted without an identifier", self.model.name());
            err
        })?;
        let reply = self.registry.driver().remove(
            self.model.collection(),
            &criteria,
            RemoveCommandOptions { just_one: true },
        )?;
        if !reply.ok {
            let message = reply
                .error_message
                .unwrap_or_else(|| "server rejected the remove".to_string());
            log::error!("Remove on {} failed: {}", self.model.collection(), message);
            return Err(MonaziteError::new(&message, ErrorKind::RemoveFailed));
        }
        self.values = Document::new();
        self.changed.clear();
        self.operations.clear();
        self.dirty.clear();
        self.related.clear();
        Ok(())
    }
}

/// Unwraps a by-id reference wrapper (`{"$id": ...}`) to the bare
/// identifier; other values pass through.
fn unwrap_foreign_id(value: Value) -> Value {
    match value.as_document().and_then(|doc| doc.get_key("$id")) {
        Some(id) => id.clone(),
        None => value,
    }
}

fn translate_keys(aliases: &crate::query::FieldAliases, criteria: &Document) -> Document {
    let mut translated = Document::new();
    for (key, value) in criteria.iter() {
        translated.insert(aliases.translate(key), value.clone());
    }
    translated
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("model", &self.model.name())
            .field("values", &self.values)
            .field("loaded", &self.loaded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::driver::MemoryDriver;
    use crate::entity::model::ModelHooks;
    use parking_lot::Mutex;

    fn registry() -> Arc<Registry> {
        Registry::builder()
            .driver(Arc::new(MemoryDriver::new()))
            .database("testdb")
            .register(Model::builder("thing").collection("things").build())
            .register(
                Model::builder("book")
                    .collection("books")
                    .alias("title", "t")
                    .reference("author", "user", None)
                    .build(),
            )
            .register(Model::builder("user").collection("users").build())
            .register(
                Model::builder("comment")
                    .collection("comments")
                    .reference("post", "post", None)
                    .build(),
            )
            .register(
                Model::builder("post")
                    .collection("posts")
                    .reverse_reference("comments", "comment", "_post")
                    .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_save_load_round_trip() {
        let registry = registry();
        let mut thing = Entity::new(registry.clone(), "thing").unwrap();
        thing.set("name", "mongo").unwrap();
        thing.set("counter", 10i64).unwrap();
        thing.save().unwrap();

        assert!(thing.is_loaded());
        let id = thing.identifier().expect("identifier after save");

        let mut reloaded = Entity::with_id(registry, "thing", id).unwrap();
        assert_eq!(reloaded.get("name").unwrap(), Value::from("mongo"));
        assert_eq!(reloaded.get("counter").unwrap(), Value::I64(10));
    }

    #[test]
    fn test_inc_save_reload_scenario() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        thing.set("name", "mongo").unwrap();
        thing.set("counter", 10i64).unwrap();
        thing.save().unwrap();

        thing.inc("counter", 1i64).unwrap();
        thing.save().unwrap();

        // the dirty counter forces a reload on read
        assert_eq!(thing.get("counter").unwrap(), Value::I64(11));
    }

    #[test]
    fn test_update_path_save_marks_loaded() {
        let registry = registry();
        let mut thing = Entity::new(registry.clone(), "thing").unwrap();
        thing.set("name", "persisted").unwrap();
        thing.save().unwrap();
        let id = thing.identifier().unwrap();

        let mut handle = Entity::with_id(registry, "thing", id).unwrap();
        handle.set("counter", 1i64).unwrap();
        handle.save().unwrap();
        assert!(handle.is_loaded());
    }

    #[test]
    fn test_empty_insert_fails() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        let err = thing.save().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::EmptyInsert);
    }

    #[test]
    fn test_insert_with_pending_operators_applies_them() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        thing.set("name", "mongo").unwrap();
        thing.push("tags", "a").unwrap();
        thing.push("tags", "b").unwrap();
        thing.save().unwrap();

        assert_eq!(thing.get("tags").unwrap(), Value::from(vec!["a", "b"]));
    }

    #[test]
    fn test_direct_set_supersedes_pending_operators() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        thing.set("name", "x").unwrap();
        thing.inc("counter", 5i64).unwrap();
        thing.set("counter", 100i64).unwrap();
        thing.save().unwrap();

        assert_eq!(thing.get("counter").unwrap(), Value::I64(100));
    }

    #[test]
    fn test_direct_set_supersedes_dotted_operators() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        thing.set("name", "x").unwrap();
        thing.inc("spec.rating", 5i64).unwrap();
        thing.set("spec", doc! { "rating": 100 }).unwrap();
        thing.save().unwrap();

        assert_eq!(thing.get("spec.rating").unwrap(), Value::I32(100));
    }

    #[test]
    fn test_dotted_set_becomes_operation() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        thing.set("name", "specs").unwrap();
        thing.save().unwrap();

        thing.set("spec.rating", 5i64).unwrap();
        thing.save().unwrap();
        assert_eq!(thing.get("spec.rating").unwrap(), Value::I64(5));
    }

    #[test]
    fn test_upsert_scenario() {
        let registry = registry();

        let mut first = Entity::new(registry.clone(), "thing").unwrap();
        first.set("name", "mongo").unwrap();
        first.push("tags", "a").unwrap();
        first.upsert().unwrap();
        assert!(first.identifier().is_some());

        let mut second = Entity::new(registry.clone(), "thing").unwrap();
        second.set("name", "mongo").unwrap();
        second.push("tags", "b").unwrap();
        second.upsert().unwrap();

        let mut check = Entity::new(registry, "thing").unwrap();
        check.set("name", "mongo").unwrap();
        assert!(check.load(None, None).unwrap());
        assert_eq!(check.get("tags").unwrap(), Value::from(vec!["a", "b"]));
    }

    #[test]
    fn test_load_criteria_resolution() {
        let registry = registry();
        let mut thing = Entity::new(registry.clone(), "thing").unwrap();
        thing.set("name", "findme").unwrap();
        thing.save().unwrap();
        let id = thing.identifier().unwrap();

        // explicit identifier
        let mut by_id = Entity::new(registry.clone(), "thing").unwrap();
        assert!(by_id.load(Some(id.clone().into()), None).unwrap());

        // explicit criteria document
        let mut by_doc = Entity::new(registry.clone(), "thing").unwrap();
        assert!(by_doc.load(Some(doc! { "name": "findme" }.into()), None).unwrap());

        // buffered values as criteria
        let mut by_values = Entity::new(registry.clone(), "thing").unwrap();
        by_values.set("name", "findme").unwrap();
        assert!(by_values.load(None, None).unwrap());

        // nothing resolvable
        let mut empty = Entity::new(registry, "thing").unwrap();
        let err = empty.load(None, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MissingCriteria);
    }

    #[test]
    fn test_load_not_found_is_not_an_error() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        thing.set("name", "ghost").unwrap();
        assert!(!thing.load(None, None).unwrap());
        assert_eq!(thing.load_state(), LoadState::Failed);
    }

    #[test]
    fn test_delete_requires_identifier() {
        let registry = registry();
        let mut thing = Entity::new(registry, "thing").unwrap();
        let err = thing.delete().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MissingCriteria);
    }

    #[test]
    fn test_delete_removes_and_resets() {
        let registry = registry();
        let mut thing = Entity::new(registry.clone(), "thing").unwrap();
        thing.set("name", "doomed").unwrap();
        thing.save().unwrap();
        thing.delete().unwrap();

        assert!(thing.identifier().is_none());
        let mut gone = Entity::new(registry, "thing").unwrap();
        gone.set("name", "doomed").unwrap();
        assert!(!gone.load(None, None).unwrap());
    }

    #[test]
    fn test_set_on_reference_field_fails() {
        let registry = registry();
        let mut book = Entity::new(registry, "book").unwrap();
        let err = book.set("author", "not an entity").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ReferenceTypeError);
    }

    #[test]
    fn test_reference_round_trip() {
        let registry = registry();
        let mut author = Entity::new(registry.clone(), "user").unwrap();
        author.set("name", "Frank").unwrap();
        author.save().unwrap();
        let author_id = author.identifier().unwrap();

        let mut book = Entity::new(registry.clone(), "book").unwrap();
        book.set("title", "Dune").unwrap();
        book.set_related("author", author).unwrap();
        book.save().unwrap();

        assert_eq!(book.get("_author").unwrap(), author_id);

        let mut loaded = Entity::with_id(registry, "book", book.identifier().unwrap()).unwrap();
        match loaded.related("author").unwrap() {
            Related::Entity(mut related) => {
                assert_eq!(related.get("name").unwrap(), Value::from("Frank"));
            }
            Related::Query(_) => panic!("expected a single entity"),
        }
    }

    #[test]
    fn test_deferred_reference_linkage() {
        let registry = registry();
        let mut author = Entity::new(registry.clone(), "user").unwrap();
        author.set("name", "Late").unwrap();

        let mut book = Entity::new(registry, "book").unwrap();
        book.set("title", "Unbound").unwrap();
        // linking before the author is saved defers the id write
        book.set_related("author", author.clone()).unwrap();
        assert_eq!(book.get("_author").unwrap(), Value::Null);

        author.save().unwrap();
        book.set_related("author", author.clone()).unwrap();
        book.save().unwrap();
        assert_eq!(book.get("_author").unwrap(), author.identifier().unwrap());
    }

    #[test]
    fn test_reverse_reference_resolves_to_query() {
        let registry = registry();
        let mut post = Entity::new(registry.clone(), "post").unwrap();
        post.set("title", "Hello").unwrap();
        post.save().unwrap();
        let post_id = post.identifier().unwrap();

        for body in ["first", "second"] {
            let mut comment = Entity::new(registry.clone(), "comment").unwrap();
            comment.set("body", body).unwrap();
            comment.set("_post", post_id.clone()).unwrap();
            comment.save().unwrap();
        }

        match post.related("comments").unwrap() {
            Related::Query(mut query) => assert_eq!(query.count(false).unwrap(), 2),
            Related::Entity(_) => panic!("expected a query"),
        }
    }

    #[test]
    fn test_lazy_load_on_first_read() {
        let registry = registry();
        let mut thing = Entity::new(registry.clone(), "thing").unwrap();
        thing.set("name", "lazy").unwrap();
        thing.save().unwrap();
        let id = thing.identifier().unwrap();

        let mut lazy = Entity::with_id(registry, "thing", id).unwrap();
        assert_eq!(lazy.load_state(), LoadState::NotAttempted);
        assert_eq!(lazy.get("name").unwrap(), Value::from("lazy"));
        assert!(lazy.is_loaded());
    }

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<String>>,
    }

    impl ModelHooks for RecordingHooks {
        fn before_save(&self, values: &mut Document, action: SaveAction) -> MonaziteResult<()> {
            self.calls.lock().push(format!("before_save:{:?}", action));
            values.insert("audited", true);
            Ok(())
        }

        fn after_save(&self, _values: &Document, action: SaveAction) -> MonaziteResult<()> {
            self.calls.lock().push(format!("after_save:{:?}", action));
            Ok(())
        }

        fn after_load(&self, _values: &Document) -> MonaziteResult<()> {
            self.calls.lock().push("after_load".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_before_save_mutations_persist() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = Registry::builder()
            .driver(Arc::new(MemoryDriver::new()))
            .register(Model::builder("audited").hooks(hooks).build())
            .build()
            .unwrap();

        let mut entity = Entity::new(registry.clone(), "audited").unwrap();
        entity.set("name", "x").unwrap();
        entity.save().unwrap();

        let mut reloaded =
            Entity::with_id(registry, "audited", entity.identifier().unwrap()).unwrap();
        assert_eq!(reloaded.get("audited").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_hooks_fire_in_order() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = Registry::builder()
            .driver(Arc::new(MemoryDriver::new()))
            .register(
                Model::builder("audited")
                    .hooks(hooks.clone())
                    .build(),
            )
            .build()
            .unwrap();

        let mut entity = Entity::new(registry, "audited").unwrap();
        entity.set("name", "x").unwrap();
        entity.save().unwrap();
        entity.load(None, None).unwrap();

        let calls = hooks.calls.lock();
        assert_eq!(
            calls.as_slice(),
            &[
                "before_save:Insert".to_string(),
                "after_save:Insert".to_string(),
                "after_load".to_string(),
            ]
        );
    }
}
