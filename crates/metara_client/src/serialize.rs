//! Node-to-wire serialization with reference resolution.
//!
//! Persisting a node turns its fields back into a wire map. Scalars and
//! nulls pass through; a has-one reference becomes a `REF:` token when
//! the target is persisted, or the target's `NEW:` synthetic marker when
//! it is part of the current batch. Has-many values are never serialized:
//! has-many relationships are immutable through this layer.

use crate::error::{ClientError, ClientResult};
use metara_model::{EntityNode, FieldValue, ModelError, NodeHandle, Persistence};
use metara_wire::{new_marker, ref_token, Value};
use std::collections::HashMap;

/// Synthetic-id assignments for one update call.
///
/// Ids are sequential, start at 1, and are keyed by node handle. A map
/// is valid only for the duration of the call it was built for.
#[derive(Debug, Clone)]
pub struct SyntheticIds {
    next: u64,
    by_handle: HashMap<NodeHandle, u64>,
}

impl Default for SyntheticIds {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticIds {
    /// Creates an empty assignment map.
    pub fn new() -> Self {
        Self {
            next: 1,
            by_handle: HashMap::new(),
        }
    }

    /// Assigns the next sequential id to `node`, or returns the one it
    /// already has.
    pub fn assign(&mut self, node: &EntityNode) -> u64 {
        if let Some(existing) = self.by_handle.get(&node.handle()) {
            return *existing;
        }
        let id = self.next;
        self.next += 1;
        self.by_handle.insert(node.handle(), id);
        id
    }

    /// The id assigned to `node`, if any.
    pub fn get(&self, node: &EntityNode) -> Option<u64> {
        self.by_handle.get(&node.handle()).copied()
    }

    /// Number of assignments.
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// Whether nothing has been assigned.
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

/// Serializes one node into its outgoing wire map.
///
/// Fails before anything is sent when a has-one reference cannot be
/// resolved: a new target with no synthetic id, or a target fetched
/// without its id.
pub(crate) fn serialize_node(
    node: &EntityNode,
    synthetic: &SyntheticIds,
) -> ClientResult<Value> {
    let mut pairs: Vec<(String, Value)> = Vec::new();

    for (name, value) in node.persistable_fields()? {
        if name == "id" {
            // The outgoing id is derived from persistence state below.
            continue;
        }
        let wire = match value {
            FieldValue::Null => Value::Null,
            FieldValue::Scalar(v) => v,
            FieldValue::Entity(target) => reference_value(&name, &target, synthetic)?,
            // Unreachable: persistable_fields omits has-many values.
            FieldValue::Entities(_) => continue,
        };
        pairs.push((name, wire));
    }

    let id_value = match node.persistence() {
        Persistence::New => match synthetic.get(node) {
            Some(n) => Value::Text(new_marker(n)),
            None => {
                return Err(ClientError::NewReference {
                    field: "id".to_string(),
                })
            }
        },
        Persistence::Persisted { id } => Value::Int(id),
        Persistence::Unkeyed => {
            return Err(ClientError::Data(ModelError::UnkeyedEntity {
                type_name: node.wire_type_name(),
            }))
        }
    };
    pairs.push(("id".to_string(), id_value));
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(Value::Map(pairs))
}

fn reference_value(
    field: &str,
    target: &EntityNode,
    synthetic: &SyntheticIds,
) -> ClientResult<Value> {
    match target.persistence() {
        Persistence::Persisted { id } => {
            Ok(Value::Text(ref_token(&target.wire_type_name(), id)))
        }
        Persistence::New => match synthetic.get(target) {
            Some(n) => Ok(Value::Text(new_marker(n))),
            None => Err(ClientError::NewReference {
                field: field.to_string(),
            }),
        },
        Persistence::Unkeyed => Err(ClientError::Data(ModelError::UnkeyedEntity {
            type_name: target.wire_type_name(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metara_model::{CoreType, EntityType, FactoryOrigin, TypeResolver};
    use std::sync::Arc;

    fn new_node(core: CoreType) -> EntityNode {
        EntityNode::new_empty(
            EntityType::core(core),
            Arc::new(TypeResolver::new()),
            FactoryOrigin::next(),
        )
    }

    fn persisted_node(core: CoreType, id: i64) -> EntityNode {
        EntityNode::from_wire(
            EntityType::core(core),
            vec![("id".to_string(), Value::Int(id))],
            Arc::new(TypeResolver::new()),
            FactoryOrigin::next(),
        )
        .unwrap()
    }

    #[test]
    fn synthetic_ids_are_sequential_and_stable() {
        let a = new_node(CoreType::Dataset);
        let b = new_node(CoreType::Dataset);

        let mut ids = SyntheticIds::new();
        assert_eq!(ids.assign(&a), 1);
        assert_eq!(ids.assign(&b), 2);
        assert_eq!(ids.assign(&a), 1);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids.get(&b), Some(2));
    }

    #[test]
    fn persisted_node_serializes_scalars_and_real_id() {
        let node = persisted_node(CoreType::Dataset, 9);
        node.set_text("name", "ds");
        node.set_null("description");

        let wire = serialize_node(&node, &SyntheticIds::new()).unwrap();
        assert_eq!(wire.get("id"), Some(&Value::Int(9)));
        assert_eq!(wire.get("name"), Some(&Value::Text("ds".into())));
        assert_eq!(wire.get("description"), Some(&Value::Null));
    }

    #[test]
    fn new_node_gets_synthetic_marker_as_id() {
        let node = new_node(CoreType::Dataset);
        node.set_text("name", "fresh");

        let mut ids = SyntheticIds::new();
        ids.assign(&node);

        let wire = serialize_node(&node, &ids).unwrap();
        assert_eq!(wire.get("id"), Some(&Value::Text("NEW:1".into())));
    }

    #[test]
    fn persisted_reference_becomes_ref_token() {
        let owner = persisted_node(CoreType::Experimenter, 42);
        let node = persisted_node(CoreType::Dataset, 9);
        node.set_entity("owner", &owner);

        let wire = serialize_node(&node, &SyntheticIds::new()).unwrap();
        assert_eq!(
            wire.get("owner"),
            Some(&Value::Text("REF:Experimenter:42".into()))
        );
    }

    #[test]
    fn new_reference_resolves_through_synthetic_map() {
        let owner = new_node(CoreType::Experimenter);
        let node = new_node(CoreType::Dataset);
        node.set_entity("owner", &owner);

        let mut ids = SyntheticIds::new();
        ids.assign(&owner);
        ids.assign(&node);

        let wire = serialize_node(&node, &ids).unwrap();
        assert_eq!(wire.get("owner"), Some(&Value::Text("NEW:1".into())));
        assert_eq!(wire.get("id"), Some(&Value::Text("NEW:2".into())));
    }

    #[test]
    fn new_reference_without_synthetic_id_fails() {
        let owner = new_node(CoreType::Experimenter);
        let node = persisted_node(CoreType::Dataset, 9);
        node.set_entity("owner", &owner);

        let err = serialize_node(&node, &SyntheticIds::new()).unwrap_err();
        assert!(matches!(err, ClientError::NewReference { ref field } if field == "owner"));
    }

    #[test]
    fn unkeyed_reference_is_a_data_error() {
        let owner = EntityNode::from_wire(
            EntityType::core(CoreType::Experimenter),
            vec![("username".to_string(), Value::Text("ann".into()))],
            Arc::new(TypeResolver::new()),
            FactoryOrigin::next(),
        )
        .unwrap();
        let node = persisted_node(CoreType::Dataset, 9);
        node.set_entity("owner", &owner);

        let err = serialize_node(&node, &SyntheticIds::new()).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Data(ModelError::UnkeyedEntity { .. })
        ));
    }

    #[test]
    fn has_many_fields_are_never_serialized() {
        let node = EntityNode::from_wire(
            EntityType::core(CoreType::Dataset),
            vec![
                ("id".to_string(), Value::Int(9)),
                (
                    "images".to_string(),
                    Value::List(vec![Value::map_of(vec![("id", Value::Int(1))])]),
                ),
            ],
            Arc::new(TypeResolver::new()),
            FactoryOrigin::next(),
        )
        .unwrap();

        let wire = serialize_node(&node, &SyntheticIds::new()).unwrap();
        assert_eq!(wire.get("images"), None);
        assert_eq!(wire.get("id"), Some(&Value::Int(9)));
    }
}
