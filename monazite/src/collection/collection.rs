use crate::collection::{Document, DOC_ID};
use crate::common::{cast_identifier, Value};
use crate::driver::{CommandReply, Driver, DriverCursor};
use crate::errors::{ErrorKind, MonaziteError, MonaziteResult};
use crate::query::{merge_criteria, parse_criteria, FieldAliases};
use indexmap::IndexMap;
use std::sync::Arc;

/// Criteria accepted by [Collection::find] and [Collection::find_one]:
/// a structured criteria document, a shorthand string, or a bare
/// identifier value.
///
/// A string input is read as shorthand when it starts with `{`;
/// otherwise it is treated as a bare identifier (24-character hex
/// strings convert to the native identifier type when they round-trip).
pub enum CriteriaInput {
    Criteria(Document),
    Shorthand(String),
    Identifier(Value),
}

impl From<Document> for CriteriaInput {
    fn from(criteria: Document) -> Self {
        CriteriaInput::Criteria(criteria)
    }
}

impl From<&str> for CriteriaInput {
    fn from(input: &str) -> Self {
        if input.trim_start().starts_with('{') {
            CriteriaInput::Shorthand(input.to_string())
        } else {
            CriteriaInput::Identifier(cast_identifier(Value::from(input)))
        }
    }
}

impl From<String> for CriteriaInput {
    fn from(input: String) -> Self {
        CriteriaInput::from(input.as_str())
    }
}

impl From<Value> for CriteriaInput {
    fn from(identifier: Value) -> Self {
        CriteriaInput::Identifier(identifier)
    }
}

impl From<crate::common::ObjectId> for CriteriaInput {
    fn from(identifier: crate::common::ObjectId) -> Self {
        CriteriaInput::Identifier(Value::ObjectId(identifier))
    }
}

/// Sort direction accepted by [Collection::sort]. Integer `1` and the
/// strings `"asc"` and `"1"` normalize to ascending; anything else is
/// descending.
pub enum SortDirection {
    Ascending,
    Descending,
}

impl From<i32> for SortDirection {
    fn from(direction: i32) -> Self {
        if direction >= 0 {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        }
    }
}

impl From<&str> for SortDirection {
    fn from(direction: &str) -> Self {
        match direction {
            "asc" | "1" => SortDirection::Ascending,
            _ => SortDirection::Descending,
        }
    }
}

impl SortDirection {
    fn as_value(&self) -> Value {
        match self {
            SortDirection::Ascending => Value::I32(1),
            SortDirection::Descending => Value::I32(-1),
        }
    }
}

// Options a running cursor still accepts.
const UNGUARDED_OPTIONS: &[&str] = &["batchSize", "timeout"];

/// A lazy query over one named collection.
///
/// A `Collection` accumulates criteria, projection fields, and cursor
/// options through chained calls, then executes exactly one query
/// command on first use. Iteration is single-pass: the underlying
/// cursor cannot be restarted, and every query-shaping method fails
/// with [ErrorKind::CursorAlreadyStarted] once execution has begun.
///
/// Field names pass through the model's alias table before they touch
/// criteria, projection, or sort specifications. A collection built
/// without aliases (direct mode) stores names verbatim.
///
/// # Examples
///
/// ```ignore
/// let mut books = registry.collection("books");
/// books
///     .find(doc! { "status": "published" })?
///     .sort("title", 1)?
///     .limit(10)?;
/// for record in &mut books {
///     println!("{}", record?);
/// }
/// ```
pub struct Collection {
    driver: Arc<dyn Driver>,
    name: String,
    aliases: FieldAliases,
    criteria: Document,
    projection: Document,
    options: IndexMap<String, Value>,
    cursor: Option<Box<dyn DriverCursor>>,
    started: bool,
}

impl Collection {
    /// Creates a direct-mode collection wrapper: no alias translation,
    /// records come back as raw documents.
    pub fn new(driver: Arc<dyn Driver>, name: impl Into<String>) -> Self {
        Collection::with_aliases(driver, name, FieldAliases::new())
    }

    /// Creates a collection wrapper bound to a model's alias table.
    pub fn with_aliases(
        driver: Arc<dyn Driver>,
        name: impl Into<String>,
        aliases: FieldAliases,
    ) -> Self {
        Collection {
            driver,
            name: name.into(),
            aliases,
            criteria: Document::new(),
            projection: Document::new(),
            options: IndexMap::new(),
            cursor: None,
            started: false,
        }
    }

    /// Returns the collection name this query targets.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn guard_not_started(&self, operation: &str) -> MonaziteResult<()> {
        if self.started {
            log::error!(
                "Cannot {} on collection {} after the cursor has started",
                operation,
                self.name
            );
            return Err(MonaziteError::new(
                &format!("Cannot {} after the cursor has started", operation),
                ErrorKind::CursorAlreadyStarted,
            ));
        }
        Ok(())
    }

    fn resolve_criteria(&self, input: CriteriaInput) -> MonaziteResult<Document> {
        let criteria = match input {
            CriteriaInput::Criteria(criteria) => criteria,
            CriteriaInput::Shorthand(text) => parse_criteria(&text)?,
            CriteriaInput::Identifier(identifier) => {
                let mut criteria = Document::new();
                criteria.insert(DOC_ID, cast_identifier(identifier));
                criteria
            }
        };
        Ok(self.translate_criteria(&criteria))
    }

    fn translate_criteria(&self, criteria: &Document) -> Document {
        let mut translated = Document::new();
        for (key, value) in criteria.iter() {
            if key == "$or" {
                // each fragment is itself a criteria document
                let fragments = match value {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| match item.as_document() {
                            Some(fragment) => Value::Document(self.translate_criteria(fragment)),
                            None => item.clone(),
                        })
                        .collect(),
                    other => vec![other.clone()],
                };
                translated.insert(key.clone(), Value::Array(fragments));
            } else {
                translated.insert(self.aliases.translate(key), value.clone());
            }
        }
        translated
    }

    /// Merges criteria into the pending query.
    ///
    /// Accepts a criteria document, a shorthand string, or a bare
    /// identifier; see [CriteriaInput]. Field names are translated and
    /// the fragment merges into any existing criteria with the
    /// recursive rules of [merge_criteria].
    ///
    /// # Errors
    ///
    /// Fails with [ErrorKind::InvalidQuery] on a malformed shorthand
    /// string and with [ErrorKind::CursorAlreadyStarted] once the
    /// cursor has started.
    pub fn find(&mut self, input: impl Into<CriteriaInput>) -> MonaziteResult<&mut Self> {
        self.guard_not_started("merge criteria")?;
        let incoming = self.resolve_criteria(input.into())?;
        merge_criteria(&mut self.criteria, &incoming)?;
        Ok(self)
    }

    /// Merges a single field-equality condition, a convenience form of
    /// [find](Collection::find).
    pub fn find_eq(&mut self, field: &str, value: impl Into<Value>) -> MonaziteResult<&mut Self> {
        let mut criteria = Document::new();
        criteria.insert(field, value.into());
        self.find(criteria)
    }

    /// Adds fields to the projection with a uniform inclusion flag.
    pub fn fields(&mut self, names: &[&str], include: bool) -> MonaziteResult<&mut Self> {
        self.guard_not_started("change projection")?;
        let flag = Value::I32(if include { 1 } else { 0 });
        for name in names {
            self.projection
                .insert(self.aliases.translate(name), flag.clone());
        }
        Ok(self)
    }

    /// Merges an explicit projection map (field to inclusion flag).
    pub fn fields_map(&mut self, projection: &Document) -> MonaziteResult<&mut Self> {
        self.guard_not_started("change projection")?;
        for (name, flag) in projection.iter() {
            self.projection
                .insert(self.aliases.translate(name), flag.clone());
        }
        Ok(self)
    }

    /// Appends a field to the sort specification.
    pub fn sort(
        &mut self,
        field: &str,
        direction: impl Into<SortDirection>,
    ) -> MonaziteResult<&mut Self> {
        self.guard_not_started("change sort order")?;
        let field = self.aliases.translate(field);
        let direction = direction.into().as_value();
        match self.options.get_mut("sort") {
            Some(Value::Document(spec)) => spec.insert(field, direction),
            _ => {
                let mut spec = Document::new();
                spec.insert(field, direction);
                self.options.insert("sort".to_string(), Value::Document(spec));
            }
        }
        Ok(self)
    }

    pub fn sort_asc(&mut self, field: &str) -> MonaziteResult<&mut Self> {
        self.sort(field, SortDirection::Ascending)
    }

    pub fn sort_desc(&mut self, field: &str) -> MonaziteResult<&mut Self> {
        self.sort(field, SortDirection::Descending)
    }

    pub fn limit(&mut self, n: i64) -> MonaziteResult<&mut Self> {
        self.set_option("limit", Value::I64(n))
    }

    pub fn skip(&mut self, n: i64) -> MonaziteResult<&mut Self> {
        self.set_option("skip", Value::I64(n))
    }

    /// Supplies an index hint pattern to the server.
    pub fn hint(&mut self, pattern: Document) -> MonaziteResult<&mut Self> {
        self.set_option("hint", Value::Document(pattern))
    }

    pub fn slave_okay(&mut self, allowed: bool) -> MonaziteResult<&mut Self> {
        self.set_option("slaveOkay", Value::Bool(allowed))
    }

    pub fn snapshot(&mut self) -> MonaziteResult<&mut Self> {
        self.set_option("snapshot", Value::Bool(true))
    }

    pub fn tailable(&mut self, tailable: bool) -> MonaziteResult<&mut Self> {
        self.set_option("tailable", Value::Bool(tailable))
    }

    /// Disables the server-side idle cursor timeout.
    pub fn immortal(&mut self, immortal: bool) -> MonaziteResult<&mut Self> {
        self.set_option("immortal", Value::Bool(immortal))
    }

    /// Sets a named cursor option. Batch-size and timeout style options
    /// may still change on a running cursor; everything else is guarded.
    pub fn set_option(&mut self, name: &str, value: Value) -> MonaziteResult<&mut Self> {
        if !UNGUARDED_OPTIONS.contains(&name) {
            self.guard_not_started("change cursor options")?;
        }
        if self.started {
            if let Some(cursor) = self.cursor.as_mut() {
                cursor.apply_option(name, &value)?;
            }
        }
        self.options.insert(name.to_string(), value);
        Ok(self)
    }

    pub fn get_option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn unset_option(&mut self, name: &str) -> MonaziteResult<&mut Self> {
        self.guard_not_started("change cursor options")?;
        self.options.shift_remove(name);
        Ok(self)
    }

    /// Executes the accumulated query, once.
    ///
    /// The first call issues the find command, applies every pending
    /// option to the returned cursor in call order, and positions it
    /// before the first record; later calls are no-ops. Failures during
    /// instantiation are re-raised with the rendered query appended.
    pub fn load(&mut self) -> MonaziteResult<&mut Self> {
        if self.started {
            return Ok(self);
        }
        let rendered = self.inspect();
        let mut cursor = self
            .driver
            .find(&self.name, &self.criteria, &self.projection)
            .map_err(|err| err.with_context(&rendered))?;
        for (name, value) in &self.options {
            cursor
                .apply_option(name, value)
                .map_err(|err| err.with_context(&rendered))?;
        }
        cursor.rewind().map_err(|err| err.with_context(&rendered))?;
        self.cursor = Some(cursor);
        self.started = true;
        Ok(self)
    }

    /// Returns whether execution has started.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Advances the cursor, loading first if needed.
    pub fn next_record(&mut self) -> MonaziteResult<Option<Document>> {
        self.load()?;
        // load() above guarantees the cursor exists
        match self.cursor.as_mut() {
            Some(cursor) => cursor.next_record(),
            None => Ok(None),
        }
    }

    /// Loads and drains the whole result set.
    pub fn all(&mut self) -> MonaziteResult<Vec<Document>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Returns the first record of the result set, loading if needed.
    pub fn first(&mut self) -> MonaziteResult<Option<Document>> {
        self.next_record()
    }

    /// Counts the records matched by the current query. With
    /// `apply_limits` the count honors pending skip and limit options.
    pub fn count(&mut self, apply_limits: bool) -> MonaziteResult<u64> {
        if let Some(cursor) = self.cursor.as_ref() {
            return cursor.count(apply_limits);
        }
        let rendered = self.inspect();
        let mut cursor = self
            .driver
            .find(&self.name, &self.criteria, &self.projection)
            .map_err(|err| err.with_context(&rendered))?;
        for (name, value) in &self.options {
            cursor.apply_option(name, value)?;
        }
        cursor.count(apply_limits)
    }

    /// Counts ad hoc criteria against the whole collection, bypassing
    /// the pending query state entirely.
    pub fn count_criteria(&self, input: impl Into<CriteriaInput>) -> MonaziteResult<u64> {
        let criteria = self.resolve_criteria(input.into())?;
        let cursor = self.driver.find(&self.name, &criteria, &Document::new())?;
        cursor.count(false)
    }

    /// One-shot single-record query, independent of the pending cursor
    /// state. Not-found is `Ok(None)`, not an error.
    pub fn find_one(
        &self,
        input: impl Into<CriteriaInput>,
        projection: &Document,
    ) -> MonaziteResult<Option<Document>> {
        let criteria = self.resolve_criteria(input.into())?;
        let mut translated_projection = Document::new();
        for (name, flag) in projection.iter() {
            translated_projection.insert(self.aliases.translate(name), flag.clone());
        }
        self.driver
            .find_one(&self.name, &criteria, &translated_projection)
    }

    /// Runs the group aggregation command over the current criteria:
    /// records are bucketed by the named key fields and folded with the
    /// server-side `reduce` function starting from `initial`. The reply
    /// is returned as the server shaped it; backends without a
    /// server-side evaluator report `ok: false`.
    pub fn group(
        &self,
        keys: &[&str],
        initial: Document,
        reduce: &str,
    ) -> MonaziteResult<CommandReply> {
        let mut key = Document::new();
        for name in keys {
            key.insert(self.aliases.translate(name), Value::Bool(true));
        }
        let mut args = Document::new();
        args.insert("ns", self.name.clone());
        args.insert("key", key);
        args.insert("cond", self.criteria.clone());
        args.insert("initial", initial);
        args.insert("$reduce", reduce);
        self.driver.run_command("group", &args)
    }

    /// Discards cursor state and accumulated query fragments, returning
    /// the collection to its freshly-constructed state.
    pub fn reset(&mut self) -> &mut Self {
        self.criteria = Document::new();
        self.projection = Document::new();
        self.options.clear();
        self.cursor = None;
        self.started = false;
        self
    }

    /// Returns an iterator over the remaining records, loading first if
    /// needed. `&mut collection` in a `for` loop is equivalent.
    pub fn records(&mut self) -> Records<'_> {
        Records { collection: self }
    }

    /// Renders the accumulated query as the shell-style expression it
    /// corresponds to, options in call order. Used in logs and appended
    /// to errors raised during execution.
    pub fn inspect(&self) -> String {
        let mut out = format!(
            "{}.find({}",
            self.name,
            self.criteria.to_shell_string()
        );
        if !self.projection.is_empty() {
            out.push_str(", ");
            out.push_str(&self.projection.to_shell_string());
        }
        out.push(')');
        for (name, value) in &self.options {
            out.push_str(&format!(".{}({})", name, value.to_shell_string()));
        }
        out
    }
}

/// Single-pass iterator over a collection's result set. Lives on a
/// dedicated type so the collection keeps its own `inspect`/`count`/
/// `skip` vocabulary free of the iterator adapters of the same names.
pub struct Records<'a> {
    collection: &'a mut Collection,
}

impl Iterator for Records<'_> {
    type Item = MonaziteResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.collection.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<'a> IntoIterator for &'a mut Collection {
    type Item = MonaziteResult<Document>;
    type IntoIter = Records<'a>;

    fn into_iter(self) -> Records<'a> {
        self.records()
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("query", &self.inspect())
            .field("started", &self.started)
            .finish()
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inspect())
    }
}
