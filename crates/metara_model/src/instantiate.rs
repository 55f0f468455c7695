//! Wire-to-node instantiation.

use crate::error::{ModelError, ModelResult};
use crate::node::{EntityNode, FactoryOrigin};
use crate::registry::{EntityType, TypeResolver};
use metara_wire::Value;
use std::sync::Arc;
use tracing::trace;

/// Resolves decoded wire values into typed entity nodes.
///
/// Core types resolve statically through their compiled schemas; semantic
/// types resolve dynamically through the shared [`TypeResolver`], whose
/// registry caches each name's binding (specific or generic fallback) for
/// the process lifetime. Every node made here is stamped with the owning
/// factory's origin.
#[derive(Debug)]
pub struct Instantiator {
    resolver: Arc<TypeResolver>,
    origin: FactoryOrigin,
}

impl Instantiator {
    /// Creates an instantiator stamping nodes with `origin`.
    pub fn new(resolver: Arc<TypeResolver>, origin: FactoryOrigin) -> Self {
        Self { resolver, origin }
    }

    /// The shared type resolver.
    pub fn resolver(&self) -> &Arc<TypeResolver> {
        &self.resolver
    }

    /// The origin stamped onto created nodes.
    pub fn origin(&self) -> FactoryOrigin {
        self.origin
    }

    /// Creates an empty, unpersisted node of `entity_type`.
    pub fn create_new(&self, entity_type: EntityType) -> EntityNode {
        EntityNode::new_empty(entity_type, Arc::clone(&self.resolver), self.origin)
    }

    /// Resolves one wire value into a node.
    ///
    /// Null resolves to `None`; a map becomes a node of `entity_type`
    /// backed by it. Anything else is a protocol violation.
    pub fn instantiate(
        &self,
        entity_type: &EntityType,
        value: Value,
    ) -> ModelResult<Option<EntityNode>> {
        match value {
            Value::Null => Ok(None),
            Value::Map(pairs) => {
                trace!(entity = %entity_type, fields = pairs.len(), "instantiating node");
                Ok(Some(EntityNode::from_wire(
                    entity_type.clone(),
                    pairs,
                    Arc::clone(&self.resolver),
                    self.origin,
                )?))
            }
            other => Err(ModelError::protocol(format!(
                "expected a map for {}, got {}",
                entity_type.wire_name(),
                other.kind()
            ))),
        }
    }

    /// Resolves a wire list into nodes, element by element.
    ///
    /// The value must be a list; null elements carry no record and are
    /// dropped, and any element that is neither map nor null is a
    /// protocol violation.
    pub fn instantiate_list(
        &self,
        entity_type: &EntityType,
        value: Value,
    ) -> ModelResult<Vec<EntityNode>> {
        let items = match value {
            Value::List(items) => items,
            other => {
                return Err(ModelError::protocol(format!(
                    "expected a list of {}, got {}",
                    entity_type.wire_name(),
                    other.kind()
                )))
            }
        };

        let mut nodes = Vec::with_capacity(items.len());
        for item in items {
            if let Some(node) = self.instantiate(entity_type, item)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CoreType, EntitySchema};

    fn instantiator() -> Instantiator {
        Instantiator::new(Arc::new(TypeResolver::new()), FactoryOrigin::next())
    }

    #[test]
    fn null_instantiates_to_none() {
        let inst = instantiator();
        let result = inst
            .instantiate(&EntityType::core(CoreType::Dataset), Value::Null)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn map_instantiates_to_node() {
        let inst = instantiator();
        let node = inst
            .instantiate(
                &EntityType::core(CoreType::Dataset),
                Value::map_of(vec![("id", Value::Int(3)), ("name", Value::Text("d".into()))]),
            )
            .unwrap()
            .unwrap();

        assert_eq!(node.id(), Some(3));
        assert_eq!(node.created_by(), inst.origin());
    }

    #[test]
    fn primitive_is_a_protocol_violation() {
        let inst = instantiator();
        let result = inst.instantiate(&EntityType::core(CoreType::Dataset), Value::Int(1));
        assert!(matches!(result, Err(ModelError::Protocol { .. })));
    }

    #[test]
    fn list_instantiation_preserves_order_and_drops_nulls() {
        let inst = instantiator();
        let nodes = inst
            .instantiate_list(
                &EntityType::core(CoreType::Dataset),
                Value::List(vec![
                    Value::map_of(vec![("id", Value::Int(1))]),
                    Value::Null,
                    Value::map_of(vec![("id", Value::Int(2))]),
                ]),
            )
            .unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id(), Some(1));
        assert_eq!(nodes[1].id(), Some(2));
    }

    #[test]
    fn list_with_primitive_element_is_fatal() {
        let inst = instantiator();
        let result = inst.instantiate_list(
            &EntityType::core(CoreType::Dataset),
            Value::List(vec![Value::Text("not a record".into())]),
        );
        assert!(matches!(result, Err(ModelError::Protocol { .. })));
    }

    #[test]
    fn non_list_where_list_expected_is_fatal() {
        let inst = instantiator();
        let result =
            inst.instantiate_list(&EntityType::core(CoreType::Dataset), Value::Int(7));
        assert!(matches!(result, Err(ModelError::Protocol { .. })));
    }

    #[test]
    fn unknown_semantic_type_falls_back_generically() {
        let inst = instantiator();
        let node = inst
            .instantiate(
                &EntityType::semantic("Mystery"),
                Value::map_of(vec![("id", Value::Int(1))]),
            )
            .unwrap()
            .unwrap();

        assert_eq!(node.get_i64("id").unwrap(), Some(1));
        assert_eq!(node.wire_type_name(), "@Mystery");
    }

    #[test]
    fn registered_semantic_type_uses_its_schema() {
        let resolver = Arc::new(TypeResolver::new());
        resolver.semantics().register(
            "Pixels",
            EntitySchema::new()
                .scalar("id")
                .scalar("size_x")
                .has_one("image", EntityType::core(CoreType::Image)),
        );
        let inst = Instantiator::new(resolver, FactoryOrigin::next());

        let node = inst
            .instantiate(
                &EntityType::semantic("Pixels"),
                Value::map_of(vec![
                    ("id", Value::Int(10)),
                    ("size_x", Value::Int(512)),
                    ("image", Value::map_of(vec![("id", Value::Int(4))])),
                ]),
            )
            .unwrap()
            .unwrap();

        assert_eq!(node.get_i64("size_x").unwrap(), Some(512));
        let image = node.get_entity("image").unwrap().unwrap();
        assert_eq!(image.entity_type(), &EntityType::core(CoreType::Image));
    }
}
