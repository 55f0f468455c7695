//! Type registries.
//!
//! Core types are a fixed, compile-time table mapping type markers to
//! their wire names and field schemas. Semantic types are deliberately
//! *not* in that table: their set is schema-extensible without a rebuild,
//! so they are registered at startup by name and resolved at runtime,
//! falling back to a generic schema when no registration exists.

use crate::error::{ModelError, ModelResult};
use metara_wire::SEMANTIC_PREFIX;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// A compile-time-known entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreType {
    /// A project grouping datasets.
    Project,
    /// A dataset grouping images.
    Dataset,
    /// An acquired image.
    Image,
    /// A user account.
    Experimenter,
    /// A free-text annotation.
    Annotation,
}

impl CoreType {
    /// All registered core types.
    pub const ALL: [CoreType; 5] = [
        CoreType::Project,
        CoreType::Dataset,
        CoreType::Image,
        CoreType::Experimenter,
        CoreType::Annotation,
    ];

    /// The bare wire name for this type.
    pub fn wire_name(self) -> &'static str {
        match self {
            CoreType::Project => "Project",
            CoreType::Dataset => "Dataset",
            CoreType::Image => "Image",
            CoreType::Experimenter => "Experimenter",
            CoreType::Annotation => "Annotation",
        }
    }

    /// Looks up a core type by its bare wire name.
    ///
    /// Unregistered names are a local data error, never a silent fallback.
    pub fn from_wire_name(name: &str) -> ModelResult<Self> {
        CoreType::ALL
            .into_iter()
            .find(|t| t.wire_name() == name)
            .ok_or_else(|| ModelError::unregistered_type(name))
    }

    /// The field schema for this type.
    pub fn schema(self) -> &'static Arc<EntitySchema> {
        &core_schemas()[&self]
    }
}

/// An entity type: either a core marker or a runtime-named semantic type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// A compile-time-known type.
    Core(CoreType),
    /// A dynamically named, schema-extensible attribute type.
    Semantic(String),
}

impl EntityType {
    /// Shorthand for a core entity type.
    pub fn core(t: CoreType) -> Self {
        EntityType::Core(t)
    }

    /// Shorthand for a semantic entity type; `name` is the bare name
    /// without the `@` prefix.
    pub fn semantic(name: impl Into<String>) -> Self {
        EntityType::Semantic(name.into())
    }

    /// The name this type travels under: bare for core types,
    /// `@`-prefixed for semantic types.
    pub fn wire_name(&self) -> String {
        match self {
            EntityType::Core(t) => t.wire_name().to_string(),
            EntityType::Semantic(name) => format!("{SEMANTIC_PREFIX}{name}"),
        }
    }

    /// Parses a wire type name.
    ///
    /// An `@` prefix always denotes a semantic type; anything else must
    /// be a registered core name.
    pub fn parse_wire_name(name: &str) -> ModelResult<Self> {
        match name.strip_prefix(SEMANTIC_PREFIX) {
            Some(bare) => Ok(EntityType::Semantic(bare.to_string())),
            None => Ok(EntityType::Core(CoreType::from_wire_name(name)?)),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_name())
    }
}

/// The declared kind of one entity field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A primitive or string value.
    Scalar,
    /// A single nested entity.
    HasOne(EntityType),
    /// A list of nested entities. Immutable through this layer.
    HasMany(EntityType),
}

/// The field schema of one entity type.
///
/// Lazy materialization consults the schema to pick the child type a raw
/// nested map is parsed into. Fields the schema does not name are still
/// legal; they parse generically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySchema {
    fields: HashMap<String, FieldKind>,
}

impl EntitySchema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a scalar field.
    pub fn scalar(mut self, field: &str) -> Self {
        self.fields.insert(field.to_string(), FieldKind::Scalar);
        self
    }

    /// Declares a has-one field.
    pub fn has_one(mut self, field: &str, target: EntityType) -> Self {
        self.fields
            .insert(field.to_string(), FieldKind::HasOne(target));
        self
    }

    /// Declares a has-many field.
    pub fn has_many(mut self, field: &str, target: EntityType) -> Self {
        self.fields
            .insert(field.to_string(), FieldKind::HasMany(target));
        self
    }

    /// The declared kind of `field`, if any.
    pub fn kind_of(&self, field: &str) -> Option<&FieldKind> {
        self.fields.get(field)
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn core_schemas() -> &'static HashMap<CoreType, Arc<EntitySchema>> {
    static SCHEMAS: OnceLock<HashMap<CoreType, Arc<EntitySchema>>> = OnceLock::new();
    SCHEMAS.get_or_init(|| {
        let experimenter = EntityType::core(CoreType::Experimenter);
        let mut map = HashMap::new();
        map.insert(
            CoreType::Project,
            Arc::new(
                EntitySchema::new()
                    .scalar("id")
                    .scalar("name")
                    .scalar("description")
                    .has_one("owner", experimenter.clone())
                    .has_many("datasets", EntityType::core(CoreType::Dataset)),
            ),
        );
        map.insert(
            CoreType::Dataset,
            Arc::new(
                EntitySchema::new()
                    .scalar("id")
                    .scalar("name")
                    .scalar("description")
                    .has_one("owner", experimenter.clone())
                    .has_many("images", EntityType::core(CoreType::Image))
                    .has_many("annotations", EntityType::core(CoreType::Annotation)),
            ),
        );
        map.insert(
            CoreType::Image,
            Arc::new(
                EntitySchema::new()
                    .scalar("id")
                    .scalar("name")
                    .scalar("description")
                    .scalar("created")
                    .has_one("owner", experimenter.clone())
                    .has_many("datasets", EntityType::core(CoreType::Dataset))
                    .has_many("annotations", EntityType::core(CoreType::Annotation)),
            ),
        );
        map.insert(
            CoreType::Experimenter,
            Arc::new(
                EntitySchema::new()
                    .scalar("id")
                    .scalar("username")
                    .scalar("first_name")
                    .scalar("last_name")
                    .scalar("email")
                    .scalar("institution"),
            ),
        );
        map.insert(
            CoreType::Annotation,
            Arc::new(
                EntitySchema::new()
                    .scalar("id")
                    .scalar("content")
                    .has_one("owner", experimenter),
            ),
        );
        map
    })
}

fn generic_schema() -> &'static Arc<EntitySchema> {
    static GENERIC: OnceLock<Arc<EntitySchema>> = OnceLock::new();
    GENERIC.get_or_init(|| Arc::new(EntitySchema::new()))
}

/// The outcome of resolving one semantic type name.
#[derive(Debug, Clone)]
pub struct SemanticBinding {
    /// The schema nodes of this type parse with.
    pub schema: Arc<EntitySchema>,
    /// Whether resolution fell back to the generic schema.
    pub is_generic: bool,
}

/// Runtime registry of semantic type schemas.
///
/// Populated from schema metadata at startup. Resolution is cached per
/// distinct name for the process lifetime, so registrations made after
/// the first resolution of a name do not take effect for that name.
#[derive(Debug, Default)]
pub struct SemanticRegistry {
    registered: RwLock<HashMap<String, Arc<EntitySchema>>>,
    resolved: RwLock<HashMap<String, SemanticBinding>>,
}

impl SemanticRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema for the semantic type `name` (bare, no `@`).
    pub fn register(&self, name: impl Into<String>, schema: EntitySchema) {
        self.registered
            .write()
            .insert(name.into(), Arc::new(schema));
    }

    /// Resolves a semantic type name to its binding.
    ///
    /// A name with no registration resolves to the generic fallback; the
    /// result either way is cached so the lookup runs at most once per
    /// name per process.
    pub fn resolve(&self, name: &str) -> SemanticBinding {
        if let Some(binding) = self.resolved.read().get(name) {
            return binding.clone();
        }

        let binding = match self.registered.read().get(name) {
            Some(schema) => SemanticBinding {
                schema: Arc::clone(schema),
                is_generic: false,
            },
            None => {
                trace!(name, "semantic type unresolved, using generic fallback");
                SemanticBinding {
                    schema: Arc::clone(generic_schema()),
                    is_generic: true,
                }
            }
        };

        self.resolved
            .write()
            .entry(name.to_string())
            .or_insert(binding)
            .clone()
    }
}

/// Schema resolution shared by the instantiator and every node it makes.
#[derive(Debug, Default)]
pub struct TypeResolver {
    semantics: SemanticRegistry,
}

impl TypeResolver {
    /// Creates a resolver with an empty semantic registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The semantic registry, for startup-time registration.
    pub fn semantics(&self) -> &SemanticRegistry {
        &self.semantics
    }

    /// The schema a node of `entity_type` parses with.
    pub fn schema_for(&self, entity_type: &EntityType) -> Arc<EntitySchema> {
        match entity_type {
            EntityType::Core(t) => Arc::clone(t.schema()),
            EntityType::Semantic(name) => self.semantics.resolve(name).schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_wire_name_bijection() {
        for t in CoreType::ALL {
            assert_eq!(CoreType::from_wire_name(t.wire_name()).unwrap(), t);
        }
    }

    #[test]
    fn unregistered_core_name_fails() {
        let err = CoreType::from_wire_name("Widget").unwrap_err();
        assert!(matches!(err, ModelError::UnregisteredType { name } if name == "Widget"));
    }

    #[test]
    fn entity_type_wire_names() {
        assert_eq!(EntityType::core(CoreType::Dataset).wire_name(), "Dataset");
        assert_eq!(EntityType::semantic("Pixels").wire_name(), "@Pixels");
    }

    #[test]
    fn parse_wire_name_routes_on_prefix() {
        assert_eq!(
            EntityType::parse_wire_name("Dataset").unwrap(),
            EntityType::core(CoreType::Dataset)
        );
        assert_eq!(
            EntityType::parse_wire_name("@Pixels").unwrap(),
            EntityType::semantic("Pixels")
        );
        // A semantic name never hits the core table, registered or not.
        assert_eq!(
            EntityType::parse_wire_name("@Dataset").unwrap(),
            EntityType::semantic("Dataset")
        );
        assert!(EntityType::parse_wire_name("Widget").is_err());
    }

    #[test]
    fn core_schemas_declare_relations() {
        let schema = CoreType::Dataset.schema();
        assert_eq!(schema.kind_of("name"), Some(&FieldKind::Scalar));
        assert_eq!(
            schema.kind_of("owner"),
            Some(&FieldKind::HasOne(EntityType::core(CoreType::Experimenter)))
        );
        assert_eq!(
            schema.kind_of("images"),
            Some(&FieldKind::HasMany(EntityType::core(CoreType::Image)))
        );
        assert_eq!(schema.kind_of("nonsense"), None);
    }

    #[test]
    fn semantic_resolution_uses_registration() {
        let registry = SemanticRegistry::new();
        registry.register("Pixels", EntitySchema::new().scalar("size_x"));

        let binding = registry.resolve("Pixels");
        assert!(!binding.is_generic);
        assert_eq!(binding.schema.kind_of("size_x"), Some(&FieldKind::Scalar));
    }

    #[test]
    fn semantic_resolution_falls_back_to_generic() {
        let registry = SemanticRegistry::new();
        let binding = registry.resolve("Mystery");
        assert!(binding.is_generic);
        assert!(binding.schema.is_empty());
    }

    #[test]
    fn semantic_resolution_is_cached() {
        let registry = SemanticRegistry::new();

        // First resolution caches the generic fallback.
        assert!(registry.resolve("Pixels").is_generic);

        // A later registration does not displace the cached result.
        registry.register("Pixels", EntitySchema::new().scalar("size_x"));
        assert!(registry.resolve("Pixels").is_generic);
    }
}
