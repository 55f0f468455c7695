//! Data-factory orchestration.
//!
//! Every operation is one synchronous, blocking round trip; the layer
//! holds no locks across calls and performs no retries. Concurrent use
//! of one factory must be serialized by the caller.

use crate::caller::{procs, RemoteCaller};
use crate::error::{ClientError, ClientResult};
use crate::serialize::{serialize_node, SyntheticIds};
use metara_model::{
    CoreType, Criteria, EntityNode, EntityType, FactoryOrigin, FieldsSpec, Instantiator,
    NodeHandle, TypeResolver,
};
use metara_wire::{new_marker, parse_new_marker, Value};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Staged {
    order: Vec<EntityNode>,
    seen: HashSet<NodeHandle>,
}

/// Orchestrates count/load/retrieve/update operations against a remote
/// caller.
///
/// Nodes are stamped with the creating factory; passing a node from a
/// different factory to an update operation is a programmer error.
#[derive(Debug)]
pub struct DataFactory<C: RemoteCaller> {
    caller: C,
    origin: FactoryOrigin,
    instantiator: Arc<Instantiator>,
    staged: Mutex<Staged>,
}

impl<C: RemoteCaller> DataFactory<C> {
    /// Creates a factory with an empty semantic registry.
    pub fn new(caller: C) -> Self {
        Self::with_resolver(caller, Arc::new(TypeResolver::new()))
    }

    /// Creates a factory over a shared resolver, so semantic schemas can
    /// be registered from schema metadata at startup.
    pub fn with_resolver(caller: C, resolver: Arc<TypeResolver>) -> Self {
        let origin = FactoryOrigin::next();
        Self {
            caller,
            origin,
            instantiator: Arc::new(Instantiator::new(resolver, origin)),
            staged: Mutex::new(Staged::default()),
        }
    }

    /// The underlying caller.
    pub fn caller(&self) -> &C {
        &self.caller
    }

    /// The shared type resolver.
    pub fn resolver(&self) -> &Arc<TypeResolver> {
        self.instantiator.resolver()
    }

    /// Counts records matching the criteria's filters.
    ///
    /// The order/limit/offset/projection portions of `criteria` are
    /// ignored here; a null server result counts as zero.
    pub fn count(&self, entity_type: &EntityType, criteria: &Criteria) -> ClientResult<i64> {
        debug!(entity = %entity_type, "countObjects");
        let count = self.caller.dispatch_integer(
            procs::COUNT_OBJECTS,
            vec![Value::Text(entity_type.wire_name()), criteria.to_filter_wire()],
        )?;
        Ok(count.unwrap_or(0))
    }

    /// Loads one record by primary key, populating the projected fields.
    ///
    /// Returns `None` when no record has that key.
    pub fn load(
        &self,
        entity_type: &EntityType,
        id: i64,
        fields: &FieldsSpec,
    ) -> ClientResult<Option<EntityNode>> {
        debug!(entity = %entity_type, id, "loadObject");
        let response = self.caller.dispatch(
            procs::LOAD_OBJECT,
            vec![
                Value::Text(entity_type.wire_name()),
                Value::Int(id),
                fields.to_wire(),
            ],
        )?;
        Ok(self.instantiator.instantiate(entity_type, response)?)
    }

    /// Retrieves the first record matching the criteria.
    ///
    /// Without an order-by the result set is server-determined and
    /// possibly unordered, so "first" is arbitrary; that ambiguity is by
    /// design.
    pub fn retrieve(
        &self,
        entity_type: &EntityType,
        criteria: &Criteria,
    ) -> ClientResult<Option<EntityNode>> {
        debug!(entity = %entity_type, "retrieveObject");
        let response = self.caller.dispatch(
            procs::RETRIEVE_OBJECT,
            vec![
                Value::Text(entity_type.wire_name()),
                criteria.to_wire(),
                criteria.fields().to_wire(),
            ],
        )?;
        Ok(self.instantiator.instantiate(entity_type, response)?)
    }

    /// Retrieves every record matching the criteria, in server order.
    pub fn retrieve_list(
        &self,
        entity_type: &EntityType,
        criteria: &Criteria,
    ) -> ClientResult<Vec<EntityNode>> {
        debug!(entity = %entity_type, "retrieveObjects");
        let response = self.caller.dispatch(
            procs::RETRIEVE_OBJECTS,
            vec![
                Value::Text(entity_type.wire_name()),
                criteria.to_wire(),
                criteria.fields().to_wire(),
            ],
        )?;
        let nodes = self.instantiator.instantiate_list(entity_type, response)?;
        debug!(entity = %entity_type, count = nodes.len(), "retrieveObjects done");
        Ok(nodes)
    }

    /// Fetches the session owner's user record.
    pub fn get_user_state(&self) -> ClientResult<EntityNode> {
        debug!("getUserState");
        let response = self.caller.dispatch(procs::GET_USER_STATE, vec![])?;
        let entity_type = EntityType::core(CoreType::Experimenter);
        self.instantiator
            .instantiate(&entity_type, response)?
            .ok_or_else(|| ClientError::protocol("getUserState returned null"))
    }

    /// Creates an empty, unpersisted node. No remote call occurs.
    pub fn create_new(&self, entity_type: EntityType) -> EntityNode {
        self.instantiator.create_new(entity_type)
    }

    /// Persists one node.
    ///
    /// A has-one reference to a new entity fails here before any remote
    /// call: a single-object update has no batch to assign it a
    /// synthetic id. Use [`DataFactory::update_with_synthetic_ids`] to
    /// supply one externally, or [`DataFactory::update_list`].
    pub fn update(&self, node: &EntityNode) -> ClientResult<()> {
        self.update_with_synthetic_ids(node, &SyntheticIds::new())
    }

    /// Persists one node, resolving new-entity references through a
    /// caller-supplied synthetic-id map.
    ///
    /// Referenced new entities are *not* persisted or written back by
    /// this call; only `node` itself is.
    pub fn update_with_synthetic_ids(
        &self,
        node: &EntityNode,
        synthetic: &SyntheticIds,
    ) -> ClientResult<()> {
        self.check_origin(node)?;

        let mut synthetic = synthetic.clone();
        let was_new = node.is_new();
        if was_new {
            synthetic.assign(node);
        }

        // Serialization failures abort before anything is sent.
        let payload = serialize_node(node, &synthetic)?;

        debug!(entity = %node.entity_type(), new = was_new, "updateObject");
        let response = self.caller.dispatch(
            procs::UPDATE_OBJECT,
            vec![Value::Text(node.wire_type_name()), payload],
        )?;

        if was_new {
            match response {
                Value::Int(id) => node.mark_persisted(id),
                other => {
                    return Err(ClientError::protocol(format!(
                        "updateObject returned {} for a new {}, expected its id",
                        other.kind(),
                        node.wire_type_name()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Persists an ordered batch atomically.
    ///
    /// Pass 1 assigns sequential synthetic ids to every new node in the
    /// batch; pass 2 serializes each node in order, resolving new-node
    /// references through that map regardless of position. Callers
    /// should still submit new nodes before their referrers: synthetic
    /// resolution does not lift server-side ordering constraints.
    ///
    /// Nothing is sent unless every node serializes. On success every
    /// new node receives its real id; a response missing one is a fatal
    /// protocol error. A failed batch leaves its nodes uncorrupted but
    /// unsafe to resubmit verbatim; rebuild fresh nodes instead.
    pub fn update_list(&self, nodes: &[EntityNode]) -> ClientResult<()> {
        for node in nodes {
            self.check_origin(node)?;
        }
        if nodes.is_empty() {
            return Ok(());
        }

        // Pass 1: synthetic ids for every new node, scoped to this call.
        let mut synthetic = SyntheticIds::new();
        let mut new_nodes: Vec<(EntityNode, u64)> = Vec::new();
        for node in nodes {
            if node.is_new() {
                let n = synthetic.assign(node);
                new_nodes.push((node.clone(), n));
            }
        }

        // Pass 2: serialize in order; fail fast before any dispatch.
        let mut batch = Vec::with_capacity(nodes.len());
        for node in nodes {
            let payload = serialize_node(node, &synthetic)?;
            batch.push(Value::List(vec![
                Value::Text(node.wire_type_name()),
                payload,
            ]));
        }

        debug!(total = nodes.len(), new = new_nodes.len(), "updateObjects");
        let response = self
            .caller
            .dispatch(procs::UPDATE_OBJECTS, vec![Value::List(batch)])?;

        let pairs = match response.as_map() {
            Some(pairs) => pairs,
            None => {
                return Err(ClientError::protocol(format!(
                    "updateObjects returned {}, expected a synthetic-id map",
                    response.kind()
                )))
            }
        };
        // Every response key must be a marker this call handed out.
        for (key, _) in pairs {
            let n = parse_new_marker(key)?;
            if n == 0 || n as usize > new_nodes.len() {
                return Err(ClientError::protocol(format!(
                    "updateObjects returned unknown marker {key:?}"
                )));
            }
        }

        for (node, n) in new_nodes {
            let marker = new_marker(n);
            match response.get(&marker) {
                Some(Value::Int(id)) => node.mark_persisted(*id),
                Some(other) => {
                    return Err(ClientError::protocol(format!(
                        "updateObjects mapped {marker} to {}, expected an id",
                        other.kind()
                    )))
                }
                None => {
                    return Err(ClientError::protocol(format!(
                        "updateObjects returned no real id for {marker}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Stages a node for the next [`DataFactory::update_marked`] call.
    ///
    /// Staging is ordered and deduplicated by node handle; staging the
    /// same node twice keeps its first position.
    pub fn mark_for_update(&self, node: &EntityNode) -> ClientResult<()> {
        self.check_origin(node)?;
        let mut staged = self.staged.lock();
        if staged.seen.insert(node.handle()) {
            staged.order.push(node.clone());
        }
        Ok(())
    }

    /// Flushes the staged nodes through [`DataFactory::update_list`].
    ///
    /// The staging list is cleared before the batch is sent, so the
    /// nodes of a failed batch are not silently resubmitted. Returns the
    /// number of nodes flushed.
    pub fn update_marked(&self) -> ClientResult<usize> {
        let taken = {
            let mut staged = self.staged.lock();
            staged.seen.clear();
            std::mem::take(&mut staged.order)
        };
        self.update_list(&taken)?;
        Ok(taken.len())
    }

    fn check_origin(&self, node: &EntityNode) -> ClientResult<()> {
        if node.created_by() != self.origin {
            return Err(ClientError::misuse(format!(
                "entity node of type {} was not produced by this factory",
                node.wire_type_name()
            )));
        }
        Ok(())
    }
}
