use crate::collection::{Document, DOC_ID};
use crate::common::{atomic, Atomic, ObjectId, ReadExecutor, Value, WriteExecutor};
use crate::driver::{
    CommandReply, Driver, DriverCursor, InsertReply, RemoveCommandOptions, RemoveReply,
    UpdateCommandOptions, UpdateReply,
};
use crate::entity::apply_operations;
use crate::errors::{ErrorKind, MonaziteError, MonaziteResult};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// An in-memory [Driver] implementation.
///
/// Backs the test suite and works as an embeddable fake: records live in
/// process memory, criteria matching covers the comparison operators the
/// query layer emits, and updates run through the same operator kernel
/// that subdocument emulation uses.
///
/// `$where` criteria are rejected with [ErrorKind::UnsupportedOperation]
/// since there is no server-side evaluator here.
#[derive(Default)]
pub struct MemoryDriver {
    collections: Atomic<IndexMap<String, Vec<Document>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        MemoryDriver {
            collections: atomic(IndexMap::new()),
        }
    }

    /// Returns the number of records in a collection, mostly useful in
    /// assertions.
    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read_with(|map| map.get(collection).map(|records| records.len()).unwrap_or(0))
    }
}

impl Driver for MemoryDriver {
    fn find(
        &self,
        collection: &str,
        criteria: &Document,
        projection: &Document,
    ) -> MonaziteResult<Box<dyn DriverCursor>> {
        let matched = self.collections.read_with(|map| {
            let records = match map.get(collection) {
                Some(records) => records,
                None => return Ok(Vec::new()),
            };
            let mut matched = Vec::new();
            for record in records {
                if matches(record, criteria)? {
                    matched.push(project(record, projection));
                }
            }
            Ok(matched)
        })?;
        log::debug!(
            "memory find on {} matched {} record(s)",
            collection,
            matched.len()
        );
        Ok(Box::new(MemoryCursor::new(matched)))
    }

    fn find_one(
        &self,
        collection: &str,
        criteria: &Document,
        projection: &Document,
    ) -> MonaziteResult<Option<Document>> {
        self.collections.read_with(|map| {
            let records = match map.get(collection) {
                Some(records) => records,
                None => return Ok(None),
            };
            for record in records {
                if matches(record, criteria)? {
                    return Ok(Some(project(record, projection)));
                }
            }
            Ok(None)
        })
    }

    fn insert(&self, collection: &str, document: &Document) -> MonaziteResult<InsertReply> {
        let mut record = document.clone();
        let identifier = match record.get_key(DOC_ID) {
            Some(value) => value.clone(),
            None => {
                let id = Value::ObjectId(ObjectId::new());
                record.insert(DOC_ID, id.clone());
                id
            }
        };
        self.collections.write_with(|map| {
            map.entry(collection.to_string()).or_default().push(record);
        });
        Ok(InsertReply {
            ok: true,
            identifier: Some(identifier),
            error_message: None,
        })
    }

    fn update(
        &self,
        collection: &str,
        criteria: &Document,
        update: &Document,
        options: UpdateCommandOptions,
    ) -> MonaziteResult<UpdateReply> {
        let is_operator_update = update.keys().any(|key| key.starts_with('$'));
        let mut matched_existing = false;

        let applied = self.collections.write_with(|map| -> MonaziteResult<bool> {
            let records = map.entry(collection.to_string()).or_default();
            let mut applied = false;
            for record in records.iter_mut() {
                if !matches(record, criteria)? {
                    continue;
                }
                matched_existing = true;
                if is_operator_update {
                    apply_operations(record, update)?;
                } else {
                    // full replacement keeps the stored identifier
                    let id = record.get_key(DOC_ID).cloned();
                    *record = update.clone();
                    if let Some(id) = id {
                        record.insert(DOC_ID, id);
                    }
                }
                applied = true;
                if !options.multi {
                    break;
                }
            }
            Ok(applied)
        })?;

        if !applied && options.upsert {
            // seed a fresh record from the equality parts of the criteria
            let mut seeded = Document::new();
            for (key, value) in criteria.iter() {
                let is_operator_condition = value
                    .as_document()
                    .map(|doc| doc.keys().any(|k| k.starts_with('$')))
                    .unwrap_or(false);
                if !key.starts_with('$') && !is_operator_condition {
                    seeded.put(key, value.clone())?;
                }
            }
            if is_operator_update {
                apply_operations(&mut seeded, update)?;
            } else {
                seeded = update.clone();
            }
            let reply = self.insert(collection, &seeded)?;
            return Ok(UpdateReply {
                ok: true,
                matched_existing: false,
                upserted_id: reply.identifier,
                error_message: None,
            });
        }

        Ok(UpdateReply {
            ok: true,
            matched_existing,
            upserted_id: None,
            error_message: None,
        })
    }

    fn remove(
        &self,
        collection: &str,
        criteria: &Document,
        options: RemoveCommandOptions,
    ) -> MonaziteResult<RemoveReply> {
        let removed = self.collections.write_with(|map| -> MonaziteResult<u64> {
            let records = match map.get_mut(collection) {
                Some(records) => records,
                None => return Ok(0),
            };
            let mut removed = 0u64;
            let mut kept = Vec::with_capacity(records.len());
            for record in records.drain(..) {
                let matched = matches(&record, criteria)?;
                if matched && (!options.just_one || removed == 0) {
                    removed += 1;
                } else {
                    kept.push(record);
                }
            }
            *records = kept;
            Ok(removed)
        })?;
        Ok(RemoveReply {
            ok: true,
            removed_count: removed,
            error_message: None,
        })
    }

    fn run_command(&self, name: &str, args: &Document) -> MonaziteResult<CommandReply> {
        match name {
            "findandmodify" => self.find_and_modify(args),
            _ => Ok(CommandReply {
                ok: false,
                result: Document::new(),
                error_message: Some(format!("command {} not supported by the in-memory driver", name)),
            }),
        }
    }
}

impl MemoryDriver {
    /// Minimal findAndModify: applies the update to the first matching
    /// record (upserting when requested) and returns the new state under
    /// `value`. Enough for the sequence helper.
    fn find_and_modify(&self, args: &Document) -> MonaziteResult<CommandReply> {
        let collection = match args.get_key("findandmodify").and_then(|v| v.as_str()) {
            Some(name) => name.to_string(),
            None => {
                return Ok(CommandReply {
                    ok: false,
                    result: Document::new(),
                    error_message: Some("findandmodify requires a collection name".to_string()),
                })
            }
        };
        let query = args
            .get_key("query")
            .and_then(|v| v.as_document())
            .cloned()
            .unwrap_or_default();
        let update = args
            .get_key("update")
            .and_then(|v| v.as_document())
            .cloned()
            .unwrap_or_default();
        let upsert = args
            .get_key("upsert")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        self.update(
            &collection,
            &query,
            &update,
            UpdateCommandOptions {
                multi: false,
                upsert,
            },
        )?;
        let value = self.find_one(&collection, &query, &Document::new())?;
        let mut result = Document::new();
        result.insert("value", Value::from(value.map(Value::Document)));
        Ok(CommandReply {
            ok: true,
            result,
            error_message: None,
        })
    }
}

/// Evaluates a criteria document against a record.
pub(crate) fn matches(record: &Document, criteria: &Document) -> MonaziteResult<bool> {
    for (key, condition) in criteria.iter() {
        match key.as_str() {
            "$or" => {
                let fragments = condition.as_array().ok_or_else(|| {
                    MonaziteError::new("$or requires an array", ErrorKind::InvalidQuery)
                })?;
                let mut any = false;
                for fragment in fragments {
                    if let Some(fragment) = fragment.as_document() {
                        if matches(record, fragment)? {
                            any = true;
                            break;
                        }
                    }
                }
                if !any {
                    return Ok(false);
                }
            }
            "$where" => {
                log::error!("$where is not supported by the in-memory driver");
                return Err(MonaziteError::new(
                    "$where is not supported by the in-memory driver",
                    ErrorKind::UnsupportedOperation,
                ));
            }
            _ => {
                let actual = record.get(key)?;
                if !matches_condition(&actual, condition)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn matches_condition(actual: &Value, condition: &Value) -> MonaziteResult<bool> {
    if let Some(operators) = condition.as_document() {
        if operators.keys().any(|k| k.starts_with('$')) {
            for (operator, operand) in operators.iter() {
                if !matches_operator(actual, operator, operand)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }
    Ok(equality_match(actual, condition))
}

fn matches_operator(actual: &Value, operator: &str, operand: &Value) -> MonaziteResult<bool> {
    match operator {
        "$ne" => Ok(!equality_match(actual, operand)),
        "$gt" => Ok(compare(actual, operand) == Some(Ordering::Greater)),
        "$gte" => Ok(matches!(
            compare(actual, operand),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        "$lt" => Ok(compare(actual, operand) == Some(Ordering::Less)),
        "$lte" => Ok(matches!(
            compare(actual, operand),
            Some(Ordering::Less | Ordering::Equal)
        )),
        "$in" => {
            let candidates = expect_operand_array("$in", operand)?;
            Ok(candidates.iter().any(|candidate| equality_match(actual, candidate)))
        }
        "$nin" => {
            let candidates = expect_operand_array("$nin", operand)?;
            Ok(!candidates.iter().any(|candidate| equality_match(actual, candidate)))
        }
        "$all" => {
            let required = expect_operand_array("$all", operand)?;
            match actual.as_array() {
                Some(items) => Ok(required.iter().all(|needed| items.contains(needed))),
                None => Ok(false),
            }
        }
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            Ok(!actual.is_null() == wanted)
        }
        _ => {
            log::error!("Unsupported query operator {}", operator);
            Err(MonaziteError::new(
                &format!("Unsupported query operator {}", operator),
                ErrorKind::UnsupportedOperation,
            ))
        }
    }
}

fn expect_operand_array<'a>(operator: &str, operand: &'a Value) -> MonaziteResult<&'a Vec<Value>> {
    operand.as_array().ok_or_else(|| {
        MonaziteError::new(
            &format!("{} requires an array", operator),
            ErrorKind::InvalidQuery,
        )
    })
}

/// Equality with array semantics: an array field matches a scalar when
/// any element equals it.
fn equality_match(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match actual.as_array() {
        Some(items) if !expected.is_array() => items.contains(expected),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::ObjectId(a), Value::ObjectId(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn project(record: &Document, projection: &Document) -> Document {
    if projection.is_empty() {
        return record.clone();
    }
    let truthy = |value: &Value| -> bool {
        match value {
            Value::Bool(flag) => *flag,
            other => other.as_i64().map(|n| n != 0).unwrap_or(false),
        }
    };
    let inclusive = projection.iter().any(|(_, value)| truthy(value));
    if inclusive {
        let mut out = Document::new();
        if let Some(id) = record.get_key(DOC_ID) {
            out.insert(DOC_ID, id.clone());
        }
        for (field, flag) in projection.iter() {
            if truthy(flag) {
                if let Ok(value) = record.get(field) {
                    if !value.is_null() {
                        // dotted projections rebuild the nested shape
                        let _ = out.put(field, value);
                    }
                }
            }
        }
        out
    } else {
        let mut out = record.clone();
        for (field, _) in projection.iter() {
            let _ = out.remove(field);
        }
        out
    }
}

/// Cursor over records materialized by [MemoryDriver::find].
///
/// Sort, skip, and limit options are buffered and applied when the
/// cursor is rewound (which happens exactly once, before the first
/// read). Unknown options are accepted and ignored, mirroring how a
/// networked driver forwards flags it does not interpret.
pub struct MemoryCursor {
    all: Vec<Document>,
    view: Vec<Document>,
    position: usize,
    started: bool,
    sort: Option<Document>,
    skip: usize,
    limit: Option<usize>,
}

impl MemoryCursor {
    fn new(records: Vec<Document>) -> Self {
        MemoryCursor {
            all: records,
            view: Vec::new(),
            position: 0,
            started: false,
            sort: None,
            skip: 0,
            limit: None,
        }
    }

    fn materialize(&mut self) {
        let mut records = self.all.clone();
        if let Some(sort) = &self.sort {
            records.sort_by(|a, b| {
                for (field, direction) in sort.iter() {
                    let left = a.get(field).unwrap_or(Value::Null);
                    let right = b.get(field).unwrap_or(Value::Null);
                    let ordering = compare(&left, &right).unwrap_or(Ordering::Equal);
                    let ordering = if direction.as_i64() == Some(-1) {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        let skipped: Vec<Document> = records.into_iter().skip(self.skip).collect();
        self.view = match self.limit {
            Some(limit) => skipped.into_iter().take(limit).collect(),
            None => skipped,
        };
        self.position = 0;
    }
}

impl DriverCursor for MemoryCursor {
    fn apply_option(&mut self, name: &str, value: &Value) -> MonaziteResult<()> {
        match name {
            "sort" => {
                if let Some(spec) = value.as_document() {
                    self.sort = Some(spec.clone());
                }
            }
            "skip" => {
                self.skip = value.as_i64().unwrap_or(0).max(0) as usize;
            }
            "limit" => {
                self.limit = value.as_i64().map(|n| n.max(0) as usize);
            }
            _ => {
                // snapshot, hint, tailable and friends have no meaning
                // in memory
                log::debug!("memory cursor ignoring option {}", name);
            }
        }
        Ok(())
    }

    fn rewind(&mut self) -> MonaziteResult<()> {
        self.started = true;
        self.materialize();
        Ok(())
    }

    fn next_record(&mut self) -> MonaziteResult<Option<Document>> {
        if !self.started {
            self.rewind()?;
        }
        match self.view.get(self.position) {
            Some(record) => {
                self.position += 1;
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    fn count(&self, apply_limits: bool) -> MonaziteResult<u64> {
        let total = self.all.len();
        if !apply_limits {
            return Ok(total as u64);
        }
        let after_skip = total.saturating_sub(self.skip);
        let counted = match self.limit {
            Some(limit) => after_skip.min(limit),
            None => after_skip,
        };
        Ok(counted as u64)
    }
}
