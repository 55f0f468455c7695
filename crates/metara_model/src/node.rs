//! Entity nodes: lazily-materializing backings for one record each.
//!
//! A node owns a map of field cells populated from a decoded wire map.
//! Cells start out raw and are parsed on first read into the child kind
//! the type's schema declares; the parsed result replaces the raw value
//! in place, so later reads of the same field observe the identical
//! instance. A field the governing projection never requested has no
//! cell at all, and reading it is an error rather than a null.
//!
//! Nodes are cheap-clone handles over shared state. No identity
//! deduplication happens across fields or fetches: two separately
//! fetched representations of the same server row are distinct nodes.

use crate::error::{ModelError, ModelResult};
use crate::registry::{EntityType, FieldKind, TypeResolver};
use metara_wire::{parse_ref_token, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Identifies the factory a node was created by.
///
/// Update operations refuse nodes that came from a different factory;
/// that is a programmer error, not a data error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactoryOrigin(u64);

impl FactoryOrigin {
    /// Allocates the next process-unique origin.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A stable opaque handle assigned to every node at creation.
///
/// Staging and synthetic-id bookkeeping key on handles instead of
/// reference identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(u64);

impl NodeHandle {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The persistence state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Created locally and never persisted; has no id.
    New,
    /// Server-backed with a known primary key.
    Persisted {
        /// The server-assigned primary key.
        id: i64,
    },
    /// Server-backed, but the projection did not include the id.
    ///
    /// Readable like any persisted node, but cannot be referenced from
    /// an update or re-persisted.
    Unkeyed,
}

/// A materialized field value.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Requested and populated as null.
    Null,
    /// A primitive or string value (or an opaque undeclared list).
    Scalar(Value),
    /// A has-one nested entity.
    Entity(EntityNode),
    /// A has-many list of nested entities.
    Entities(Vec<EntityNode>),
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Scalar(v) => v.kind(),
            FieldValue::Entity(_) => "entity",
            FieldValue::Entities(_) => "entity list",
        }
    }
}

/// One field slot: raw until first read, then parsed in place.
#[derive(Debug, Clone)]
enum FieldCell {
    Raw(Value),
    Parsed(FieldValue),
}

#[derive(Debug)]
struct NodeState {
    persistence: Persistence,
    fields: HashMap<String, FieldCell>,
}

#[derive(Debug)]
struct NodeInner {
    handle: NodeHandle,
    entity_type: EntityType,
    origin: FactoryOrigin,
    resolver: Arc<TypeResolver>,
    state: Mutex<NodeState>,
}

/// A client-side, possibly-partial materialization of one server record.
#[derive(Debug, Clone)]
pub struct EntityNode {
    inner: Arc<NodeInner>,
}

impl EntityNode {
    /// Creates an empty, unpersisted node.
    pub fn new_empty(
        entity_type: EntityType,
        resolver: Arc<TypeResolver>,
        origin: FactoryOrigin,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                handle: NodeHandle::next(),
                entity_type,
                origin,
                resolver,
                state: Mutex::new(NodeState {
                    persistence: Persistence::New,
                    fields: HashMap::new(),
                }),
            }),
        }
    }

    /// Creates a node backed by a decoded wire map.
    ///
    /// The node is persisted; its key comes from the map's `id` entry
    /// when the projection included one. A non-integer, non-null id is a
    /// protocol violation.
    pub fn from_wire(
        entity_type: EntityType,
        pairs: Vec<(String, Value)>,
        resolver: Arc<TypeResolver>,
        origin: FactoryOrigin,
    ) -> ModelResult<Self> {
        let persistence = match pairs.iter().find(|(k, _)| k == "id").map(|(_, v)| v) {
            Some(Value::Int(id)) => Persistence::Persisted { id: *id },
            Some(Value::Null) | None => Persistence::Unkeyed,
            Some(other) => {
                return Err(ModelError::protocol(format!(
                    "id of {} arrived as {}",
                    entity_type.wire_name(),
                    other.kind()
                )))
            }
        };

        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k, FieldCell::Raw(v)))
            .collect();

        Ok(Self {
            inner: Arc::new(NodeInner {
                handle: NodeHandle::next(),
                entity_type,
                origin,
                resolver,
                state: Mutex::new(NodeState {
                    persistence,
                    fields,
                }),
            }),
        })
    }

    /// The node's stable handle.
    pub fn handle(&self) -> NodeHandle {
        self.inner.handle
    }

    /// The node's entity type.
    pub fn entity_type(&self) -> &EntityType {
        &self.inner.entity_type
    }

    /// The wire name of the node's type.
    pub fn wire_type_name(&self) -> String {
        self.inner.entity_type.wire_name()
    }

    /// The factory this node was created by.
    pub fn created_by(&self) -> FactoryOrigin {
        self.inner.origin
    }

    /// The node's persistence state.
    pub fn persistence(&self) -> Persistence {
        self.inner.state.lock().persistence
    }

    /// Whether the node has never been persisted.
    pub fn is_new(&self) -> bool {
        matches!(self.persistence(), Persistence::New)
    }

    /// The server-assigned primary key, when known.
    pub fn id(&self) -> Option<i64> {
        match self.persistence() {
            Persistence::Persisted { id } => Some(id),
            Persistence::New | Persistence::Unkeyed => None,
        }
    }

    /// Whether two handles refer to the same node.
    pub fn same_node(&self, other: &EntityNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Records a successful persist.
    ///
    /// Sets the primary key, leaves the new state behind for good, and
    /// makes the `id` field readable. Called by the data factory after
    /// the server returns a real id.
    pub fn mark_persisted(&self, id: i64) {
        let mut state = self.inner.state.lock();
        state.persistence = Persistence::Persisted { id };
        state
            .fields
            .insert("id".to_string(), FieldCell::Parsed(FieldValue::Scalar(Value::Int(id))));
    }

    /// Reads a field, materializing it on first access.
    ///
    /// A field absent from the backing map (never requested in the
    /// governing projection) is a local data error, distinct from a
    /// requested field the server populated as null.
    pub fn get(&self, field: &str) -> ModelResult<FieldValue> {
        let mut state = self.inner.state.lock();
        if !state.fields.contains_key(field) {
            return Err(ModelError::absent_field(self.wire_type_name(), field));
        }
        self.materialize(&mut state, field)
    }

    /// Reads an integer field. Null reads as `None`.
    pub fn get_i64(&self, field: &str) -> ModelResult<Option<i64>> {
        match self.get(field)? {
            FieldValue::Null => Ok(None),
            FieldValue::Scalar(Value::Int(n)) => Ok(Some(n)),
            other => Err(self.wrong_type(field, "int", &other)),
        }
    }

    /// Reads a numeric field as a double. Integers widen; null is `None`.
    pub fn get_f64(&self, field: &str) -> ModelResult<Option<f64>> {
        match self.get(field)? {
            FieldValue::Null => Ok(None),
            FieldValue::Scalar(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.wrong_type(field, "double", &FieldValue::Scalar(v.clone()))),
            other => Err(self.wrong_type(field, "double", &other)),
        }
    }

    /// Reads a boolean field. Null reads as `None`.
    pub fn get_bool(&self, field: &str) -> ModelResult<Option<bool>> {
        match self.get(field)? {
            FieldValue::Null => Ok(None),
            FieldValue::Scalar(Value::Bool(b)) => Ok(Some(b)),
            other => Err(self.wrong_type(field, "bool", &other)),
        }
    }

    /// Reads a string field. Null reads as `None`.
    pub fn get_text(&self, field: &str) -> ModelResult<Option<String>> {
        match self.get(field)? {
            FieldValue::Null => Ok(None),
            FieldValue::Scalar(Value::Text(s)) => Ok(Some(s)),
            other => Err(self.wrong_type(field, "text", &other)),
        }
    }

    /// Reads a has-one field. Null reads as `None`.
    ///
    /// Repeated reads return the identical cached child instance.
    pub fn get_entity(&self, field: &str) -> ModelResult<Option<EntityNode>> {
        match self.get(field)? {
            FieldValue::Null => Ok(None),
            FieldValue::Entity(node) => Ok(Some(node)),
            other => Err(self.wrong_type(field, "entity", &other)),
        }
    }

    /// Reads a has-many field. Null reads as an empty list.
    pub fn get_entities(&self, field: &str) -> ModelResult<Vec<EntityNode>> {
        match self.get(field)? {
            FieldValue::Null => Ok(Vec::new()),
            FieldValue::Entities(nodes) => Ok(nodes),
            other => Err(self.wrong_type(field, "entity list", &other)),
        }
    }

    /// Sets a string field.
    pub fn set_text(&self, field: &str, value: impl Into<String>) {
        self.put(field, FieldValue::Scalar(Value::Text(value.into())));
    }

    /// Sets an integer field.
    pub fn set_i64(&self, field: &str, value: i64) {
        self.put(field, FieldValue::Scalar(Value::Int(value)));
    }

    /// Sets a double field.
    pub fn set_f64(&self, field: &str, value: f64) {
        self.put(field, FieldValue::Scalar(Value::Double(value)));
    }

    /// Sets a boolean field.
    pub fn set_bool(&self, field: &str, value: bool) {
        self.put(field, FieldValue::Scalar(Value::Bool(value)));
    }

    /// Sets a field to null.
    pub fn set_null(&self, field: &str) {
        self.put(field, FieldValue::Null);
    }

    /// Sets a scalar field from a wire value. Lists and maps are refused.
    pub fn set_scalar(&self, field: &str, value: Value) -> ModelResult<()> {
        if !value.is_primitive() {
            return Err(ModelError::NotPrimitive {
                field: field.to_string(),
            });
        }
        if value.is_null() {
            self.put(field, FieldValue::Null);
        } else {
            self.put(field, FieldValue::Scalar(value));
        }
        Ok(())
    }

    /// Sets a has-one field to reference another node.
    pub fn set_entity(&self, field: &str, target: &EntityNode) {
        self.put(field, FieldValue::Entity(target.clone()));
    }

    /// Snapshots the fields that participate in an update.
    ///
    /// Raw primitives and has-one maps are materialized first; has-many
    /// values (raw lists, parsed entity lists, opaque undeclared lists)
    /// are omitted because has-many relationships are immutable through
    /// this layer. Field names come back sorted for stable payloads.
    pub fn persistable_fields(&self) -> ModelResult<Vec<(String, FieldValue)>> {
        let mut state = self.inner.state.lock();
        let mut names: Vec<String> = state.fields.keys().cloned().collect();
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            match &state.fields[&name] {
                FieldCell::Raw(Value::List(_)) | FieldCell::Parsed(FieldValue::Entities(_)) => {
                    continue
                }
                FieldCell::Parsed(FieldValue::Scalar(v)) if !v.is_primitive() => continue,
                _ => {}
            }
            let value = self.materialize(&mut state, &name)?;
            match value {
                FieldValue::Entities(_) => continue,
                FieldValue::Scalar(ref v) if !v.is_primitive() => continue,
                other => out.push((name, other)),
            }
        }
        Ok(out)
    }

    fn put(&self, field: &str, value: FieldValue) {
        self.inner
            .state
            .lock()
            .fields
            .insert(field.to_string(), FieldCell::Parsed(value));
    }

    fn wrong_type(&self, field: &str, expected: &'static str, actual: &FieldValue) -> ModelError {
        ModelError::WrongFieldType {
            field: field.to_string(),
            expected,
            actual: actual.kind(),
        }
    }

    /// Parses a raw cell in place and returns the stored value.
    ///
    /// The caller must have checked that the field exists.
    fn materialize(&self, state: &mut NodeState, field: &str) -> ModelResult<FieldValue> {
        let cell = state.fields.get(field).cloned();
        match cell {
            Some(FieldCell::Parsed(value)) => Ok(value),
            Some(FieldCell::Raw(raw)) => {
                trace!(
                    entity = %self.inner.entity_type,
                    field,
                    "materializing raw field"
                );
                let parsed = self.parse_raw(field, raw)?;
                state
                    .fields
                    .insert(field.to_string(), FieldCell::Parsed(parsed.clone()));
                Ok(parsed)
            }
            None => Err(ModelError::absent_field(self.wire_type_name(), field)),
        }
    }

    /// Parses one raw wire value into the schema-declared child kind.
    fn parse_raw(&self, field: &str, raw: Value) -> ModelResult<FieldValue> {
        if raw.is_null() {
            return Ok(FieldValue::Null);
        }

        let schema = self.inner.resolver.schema_for(&self.inner.entity_type);
        match schema.kind_of(field) {
            Some(FieldKind::Scalar) => {
                if raw.is_primitive() {
                    Ok(FieldValue::Scalar(raw))
                } else {
                    Err(ModelError::protocol(format!(
                        "scalar field {field:?} of {} arrived as {}",
                        self.wire_type_name(),
                        raw.kind()
                    )))
                }
            }
            Some(FieldKind::HasOne(target)) => {
                let target = target.clone();
                self.child_entity(field, target, raw)
            }
            Some(FieldKind::HasMany(target)) => {
                let target = target.clone();
                self.child_entities(field, target, raw)
            }
            None => self.parse_undeclared(field, raw),
        }
    }

    /// Fields the schema does not declare still parse: primitives stay
    /// scalar, a map becomes a generic semantic child named after the
    /// field, and a list of maps becomes a list of such children. A list
    /// with primitive elements is kept as an opaque scalar.
    fn parse_undeclared(&self, field: &str, raw: Value) -> ModelResult<FieldValue> {
        match raw {
            Value::Map(_) => {
                self.child_entity(field, EntityType::semantic(field.to_string()), raw)
            }
            Value::List(ref items) => {
                if items.iter().all(|v| v.as_map().is_some() || v.is_null()) {
                    self.child_entities(field, EntityType::semantic(field.to_string()), raw)
                } else {
                    Ok(FieldValue::Scalar(raw))
                }
            }
            primitive => Ok(FieldValue::Scalar(primitive)),
        }
    }

    fn child_entity(
        &self,
        field: &str,
        target: EntityType,
        raw: Value,
    ) -> ModelResult<FieldValue> {
        match raw {
            Value::Map(pairs) => {
                let child = EntityNode::from_wire(
                    target,
                    pairs,
                    Arc::clone(&self.inner.resolver),
                    self.inner.origin,
                )?;
                Ok(FieldValue::Entity(child))
            }
            // A has-one slot may arrive as a reference token instead of
            // a nested map; the token names its own type.
            Value::Text(token) => {
                let parsed = parse_ref_token(&token)
                    .map_err(|e| ModelError::protocol(e.to_string()))?;
                let target = EntityType::parse_wire_name(&parsed.type_name)?;
                let child = EntityNode::from_wire(
                    target,
                    vec![("id".to_string(), Value::Int(parsed.id))],
                    Arc::clone(&self.inner.resolver),
                    self.inner.origin,
                )?;
                Ok(FieldValue::Entity(child))
            }
            other => Err(ModelError::protocol(format!(
                "has-one field {field:?} of {} arrived as {}",
                self.wire_type_name(),
                other.kind()
            ))),
        }
    }

    fn child_entities(
        &self,
        field: &str,
        target: EntityType,
        raw: Value,
    ) -> ModelResult<FieldValue> {
        let items = match raw {
            Value::List(items) => items,
            other => {
                return Err(ModelError::protocol(format!(
                    "has-many field {field:?} of {} arrived as {}",
                    self.wire_type_name(),
                    other.kind()
                )))
            }
        };

        let mut nodes = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Map(pairs) => nodes.push(EntityNode::from_wire(
                    target.clone(),
                    pairs,
                    Arc::clone(&self.inner.resolver),
                    self.inner.origin,
                )?),
                // Null elements carry no information and are dropped.
                Value::Null => {}
                other => {
                    return Err(ModelError::protocol(format!(
                        "element of has-many field {field:?} arrived as {}",
                        other.kind()
                    )))
                }
            }
        }
        Ok(FieldValue::Entities(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CoreType;

    fn resolver() -> Arc<TypeResolver> {
        Arc::new(TypeResolver::new())
    }

    fn dataset_from(pairs: Vec<(&str, Value)>) -> EntityNode {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        EntityNode::from_wire(
            EntityType::core(CoreType::Dataset),
            pairs,
            resolver(),
            FactoryOrigin::next(),
        )
        .unwrap()
    }

    #[test]
    fn new_node_starts_empty_and_new() {
        let node = EntityNode::new_empty(
            EntityType::core(CoreType::Dataset),
            resolver(),
            FactoryOrigin::next(),
        );
        assert!(node.is_new());
        assert_eq!(node.id(), None);
        assert!(matches!(
            node.get("name"),
            Err(ModelError::AbsentField { .. })
        ));
    }

    #[test]
    fn from_wire_reads_persistence_from_id() {
        let node = dataset_from(vec![("id", Value::Int(9)), ("name", Value::Text("d".into()))]);
        assert!(!node.is_new());
        assert_eq!(node.id(), Some(9));

        let unkeyed = dataset_from(vec![("name", Value::Text("d".into()))]);
        assert_eq!(unkeyed.persistence(), Persistence::Unkeyed);
        assert_eq!(unkeyed.id(), None);
    }

    #[test]
    fn non_integer_id_is_a_protocol_violation() {
        let result = EntityNode::from_wire(
            EntityType::core(CoreType::Dataset),
            vec![("id".to_string(), Value::Text("9".into()))],
            resolver(),
            FactoryOrigin::next(),
        );
        assert!(matches!(result, Err(ModelError::Protocol { .. })));
    }

    #[test]
    fn absent_field_is_an_error_but_null_is_not() {
        let node = dataset_from(vec![("name", Value::Null)]);

        assert_eq!(node.get_text("name").unwrap(), None);
        let err = node.get_text("description").unwrap_err();
        assert!(matches!(err, ModelError::AbsentField { ref field, .. } if field == "description"));
    }

    #[test]
    fn scalar_reads_and_wrong_types() {
        let node = dataset_from(vec![
            ("name", Value::Text("ds".into())),
            ("id", Value::Int(4)),
        ]);

        assert_eq!(node.get_text("name").unwrap(), Some("ds".into()));
        assert_eq!(node.get_i64("id").unwrap(), Some(4));
        assert!(matches!(
            node.get_i64("name"),
            Err(ModelError::WrongFieldType { expected: "int", .. })
        ));
    }

    #[test]
    fn has_one_materializes_once_with_stable_identity() {
        let node = dataset_from(vec![(
            "owner",
            Value::map_of(vec![("id", Value::Int(42)), ("username", Value::Text("ann".into()))]),
        )]);

        let first = node.get_entity("owner").unwrap().unwrap();
        let second = node.get_entity("owner").unwrap().unwrap();
        assert!(first.same_node(&second));
        assert_eq!(first.entity_type(), &EntityType::core(CoreType::Experimenter));
        assert_eq!(first.get_text("username").unwrap(), Some("ann".into()));
    }

    #[test]
    fn has_one_accepts_reference_token() {
        let node = dataset_from(vec![(
            "owner",
            Value::Text("REF:Experimenter:42".into()),
        )]);

        let owner = node.get_entity("owner").unwrap().unwrap();
        assert_eq!(owner.entity_type(), &EntityType::core(CoreType::Experimenter));
        assert_eq!(owner.id(), Some(42));
        assert_eq!(owner.get_i64("id").unwrap(), Some(42));
    }

    #[test]
    fn has_one_rejects_non_reference_text() {
        let node = dataset_from(vec![("owner", Value::Text("ann".into()))]);
        assert!(matches!(
            node.get("owner"),
            Err(ModelError::Protocol { .. })
        ));
    }

    #[test]
    fn has_many_materializes_child_list() {
        let node = dataset_from(vec![(
            "images",
            Value::List(vec![
                Value::map_of(vec![("id", Value::Int(1))]),
                Value::Null,
                Value::map_of(vec![("id", Value::Int(2))]),
            ]),
        )]);

        let images = node.get_entities("images").unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].id(), Some(1));
        assert_eq!(images[1].id(), Some(2));
    }

    #[test]
    fn has_many_rejects_primitive_elements() {
        let node = dataset_from(vec![("images", Value::List(vec![Value::Int(1)]))]);
        assert!(matches!(
            node.get("images"),
            Err(ModelError::Protocol { .. })
        ));
    }

    #[test]
    fn undeclared_map_field_parses_generically() {
        let node = dataset_from(vec![(
            "provenance",
            Value::map_of(vec![("id", Value::Int(5)), ("tool", Value::Text("scope".into()))]),
        )]);

        let child = node.get_entity("provenance").unwrap().unwrap();
        assert_eq!(child.entity_type(), &EntityType::semantic("provenance"));
        assert_eq!(child.get_i64("id").unwrap(), Some(5));
    }

    #[test]
    fn setters_overwrite_and_read_back() {
        let node = EntityNode::new_empty(
            EntityType::core(CoreType::Dataset),
            resolver(),
            FactoryOrigin::next(),
        );
        node.set_text("name", "fresh");
        node.set_null("description");
        node.set_i64("rank", 3);

        assert_eq!(node.get_text("name").unwrap(), Some("fresh".into()));
        assert_eq!(node.get_text("description").unwrap(), None);
        assert_eq!(node.get_i64("rank").unwrap(), Some(3));

        assert!(matches!(
            node.set_scalar("bad", Value::List(vec![])),
            Err(ModelError::NotPrimitive { .. })
        ));
    }

    #[test]
    fn mark_persisted_sets_id_and_leaves_new() {
        let node = EntityNode::new_empty(
            EntityType::core(CoreType::Dataset),
            resolver(),
            FactoryOrigin::next(),
        );
        assert!(node.is_new());

        node.mark_persisted(77);
        assert!(!node.is_new());
        assert_eq!(node.id(), Some(77));
        assert_eq!(node.get_i64("id").unwrap(), Some(77));
    }

    #[test]
    fn persistable_fields_skip_has_many() {
        let node = dataset_from(vec![
            ("id", Value::Int(3)),
            ("name", Value::Text("ds".into())),
            ("images", Value::List(vec![Value::map_of(vec![("id", Value::Int(1))])])),
        ]);

        let fields = node.persistable_fields().unwrap();
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn persistable_fields_materialize_has_one() {
        let node = dataset_from(vec![(
            "owner",
            Value::map_of(vec![("id", Value::Int(42))]),
        )]);

        let fields = node.persistable_fields().unwrap();
        assert_eq!(fields.len(), 1);
        assert!(matches!(fields[0].1, FieldValue::Entity(_)));

        // The snapshot parsed the cell; later reads see the same child.
        let via_snapshot = match &fields[0].1 {
            FieldValue::Entity(node) => node.clone(),
            _ => unreachable!(),
        };
        let via_get = node.get_entity("owner").unwrap().unwrap();
        assert!(via_snapshot.same_node(&via_get));
    }
}
