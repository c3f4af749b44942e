//! Entity model - the ownership tree of program elements
//!
//! Every named program element (file, package, type, function, variable,
//! alias, multi-declaration group) is an [`Entity`] stored in an arena
//! ([`repo::EntityRepo`]) and addressed by integer id. Parent/child links,
//! children sets and all cross-references are ids, never live references,
//! so expression batches can be evicted and rehydrated without dangling
//! pointers.
//!
//! Entity kind is a closed variant set with capability data composed per
//! variant: files, types and functions embed [`ContainerData`] (vars,
//! functions, mixins, an expression batch), types add inheritance and
//! candidate-type bookkeeping, functions add parameters and return types.

pub mod expression;
pub mod repo;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::lang::Import;
use crate::name::GenericName;
use expression::ExprId;

/// Unique entity identifier.
///
/// Positive ids are assigned monotonically during ingestion. Negative ids
/// are reserved sentinels present in every repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub i32);

impl EntityId {
    /// Sentinel type for built-in names
    pub const BUILT_IN: EntityId = EntityId(-1);
    /// Sentinel type for names known to live outside the analysed code
    pub const EXTERNAL: EntityId = EntityId(-2);
    /// Sentinel type bound to unresolvable generic type parameters
    pub const GENERIC_PARAMETER: EntityId = EntityId(-3);

    /// Whether this id is one of the reserved sentinels
    pub fn is_sentinel(&self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source location of an entity or expression
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Line number (1-indexed), if known
    pub line: Option<u32>,
    /// Start offset in the source file
    pub start: Option<u32>,
    /// Stop offset in the source file
    pub stop: Option<u32>,
}

impl Location {
    /// Location at a known line
    pub fn at_line(line: u32) -> Self {
        Self {
            line: Some(line),
            ..Default::default()
        }
    }
}

/// Kind of a recorded relation between two entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// File imports an entity
    Import,
    /// Type inherits another type
    Inherit,
    /// Type implements another type
    Implement,
    /// Container mixes in another container
    Mixin,
    /// Expression calls a function
    Call,
    /// Expression constructs an instance of a type
    Create,
    /// Expression assigns to a variable
    Set,
    /// Expression casts to a type
    Cast,
    /// Expression throws a type
    Throw,
    /// Function returns a type
    Return,
    /// Function takes a parameter of a type
    Parameter,
    /// Any other successful binding
    Use,
}

impl RelationKind {
    /// Get the string representation of the relation kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Import => "import",
            RelationKind::Inherit => "inherit",
            RelationKind::Implement => "implement",
            RelationKind::Mixin => "mixin",
            RelationKind::Call => "call",
            RelationKind::Create => "create",
            RelationKind::Set => "set",
            RelationKind::Cast => "cast",
            RelationKind::Throw => "throw",
            RelationKind::Return => "return",
            RelationKind::Parameter => "parameter",
            RelationKind::Use => "use",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded relation: this entity relates to `target` with `kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: EntityId,
}

impl Relation {
    pub fn new(kind: RelationKind, target: EntityId) -> Self {
        Self { kind, target }
    }
}

/// A function call observed on a declaration-less variable.
///
/// Drives candidate-type inference: any type whose declared method set
/// covers every observed call name is a plausible type for the variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: GenericName,
    pub arity: usize,
}

impl FunctionCall {
    pub fn new(name: impl Into<GenericName>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

/// Residency state of a container's expression batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    /// Batch lives in memory (possibly empty)
    #[default]
    Resident,
    /// Batch was serialised to the side-store and dropped from memory
    Evicted,
}

/// Capability data shared by every entity that owns vars, functions and
/// expressions (files, types, functions).
#[derive(Debug, Clone, Default)]
pub struct ContainerData {
    /// Owned variables, in declaration order
    pub vars: Vec<EntityId>,
    /// Owned functions, in declaration order
    pub functions: Vec<EntityId>,
    /// Raw mixin names, resolved during the global pass
    pub mixins: Vec<GenericName>,
    /// Mixin containers after resolution
    pub resolved_mixins: Vec<EntityId>,
    /// Declared generic type parameters
    pub type_parameters: Vec<GenericName>,
    /// Number of expressions ever added to the batch
    pub expr_count: usize,
    /// Whether the batch is in memory or in the side-store
    pub batch_state: BatchState,
    /// Relation de-dup bookkeeping: relation key -> expressions that
    /// already recorded it (one relation per dot-chain)
    pub(crate) relation_sources: HashMap<String, Vec<ExprId>>,
}

/// Data for a file entity
#[derive(Debug, Clone, Default)]
pub struct FileData {
    pub container: ContainerData,
    /// Import declarations, interpreted by the per-language import lookup
    pub imports: Vec<Import>,
    /// Types declared directly in this file
    pub declared_types: Vec<EntityId>,
    /// Entities brought into scope by imports (resolved)
    pub imported_types: Vec<EntityId>,
    /// Files brought into scope by imports (resolved)
    pub imported_files: Vec<EntityId>,
}

/// Data for a type entity
#[derive(Debug, Clone, Default)]
pub struct TypeData {
    pub container: ContainerData,
    /// Raw names of inherited types, resolved during the global pass
    pub inherits_names: Vec<GenericName>,
    /// Raw names of implemented types, resolved during the global pass
    pub implements_names: Vec<GenericName>,
    /// Inherited types after resolution
    pub inherited: Vec<EntityId>,
    /// Implemented types after resolution
    pub implemented: Vec<EntityId>,
    /// Plausible concrete types when this type stands for a duck-typed var
    pub candidate_types: Vec<EntityId>,
}

/// Data for a function entity
#[derive(Debug, Clone, Default)]
pub struct FunctionData {
    pub container: ContainerData,
    /// Parameters, in declaration order (var entities)
    pub parameters: Vec<EntityId>,
    /// Raw return type names; plural to support duck-typed languages where
    /// multiple call sites imply multiple plausible returns
    pub return_type_names: Vec<GenericName>,
    /// Return types after resolution
    pub return_types: Vec<EntityId>,
    /// Raw throw type names
    pub throw_type_names: Vec<GenericName>,
    /// Throw types after resolution
    pub throw_types: Vec<EntityId>,
    /// Extension function: a pseudo-method of its first parameter's type
    pub is_extension: bool,
}

/// Data for a variable entity
#[derive(Debug, Clone, Default)]
pub struct VarData {
    /// Raw type name, if the declaration carried one
    pub raw_type: Option<GenericName>,
    /// Resolved type; set at most once, never retracted
    pub var_type: Option<EntityId>,
    /// Calls observed on this var, for candidate-type inference
    pub calls: Vec<FunctionCall>,
}

/// Data for an alias entity: a name forwarding to another entity
#[derive(Debug, Clone)]
pub struct AliasData {
    /// Raw name of the aliased entity, resolved during the global pass
    pub refer_to_name: GenericName,
}

/// Data for a multi-declaration group: several entities visible under one
/// name in the same scope (overloads, reopened types, partials)
#[derive(Debug, Clone, Default)]
pub struct MultiDeclareData {
    /// Member entities, in declaration order
    pub entities: Vec<EntityId>,
}

/// Closed set of entity kinds with per-variant capability data
#[derive(Debug, Clone)]
pub enum EntityKind {
    File(FileData),
    Package,
    Type(TypeData),
    Function(FunctionData),
    Var(VarData),
    Alias(AliasData),
    MultiDeclare(MultiDeclareData),
}

impl EntityKind {
    /// Get the string representation of the entity kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::File(_) => "file",
            EntityKind::Package => "package",
            EntityKind::Type(_) => "type",
            EntityKind::Function(_) => "function",
            EntityKind::Var(_) => "var",
            EntityKind::Alias(_) => "alias",
            EntityKind::MultiDeclare(_) => "multi-declare",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node of the entity ownership tree.
///
/// Two entities with the same id are equal. Qualified names are derived,
/// recomputed whenever the raw name or the parent changes, and are not
/// guaranteed globally unique; collisions are expected and grouped into
/// multi-declaration entities by the repository.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    raw_name: GenericName,
    qualified_name: String,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    relations: Vec<Relation>,
    /// Alias forwarding target
    actual_refer_to: Option<EntityId>,
    /// Group this entity belongs to, when its name collides with others
    multi_declare: Option<EntityId>,
    location: Location,
    kind: EntityKind,
}

/// Qualified-name derivation. Pure and deterministic:
///
/// 1. a raw name starting with the separator is already qualified - strip
///    the separator and use the rest as-is
/// 2. without a parent, the raw name is the qualified name
/// 3. with a parent whose qualified name is empty, the raw name is the
///    qualified name
/// 4. otherwise, parent qualified name + separator + raw name
///
/// The result never starts with the separator.
pub fn derive_qualified_name(raw_name: &GenericName, parent_qualified: Option<&str>) -> String {
    if raw_name.is_absolute() {
        return raw_name.strip_qualifier().uniq_name();
    }
    match parent_qualified {
        None => raw_name.uniq_name(),
        Some("") => raw_name.uniq_name(),
        Some(parent) => format!("{}.{}", parent, raw_name.uniq_name()),
    }
}

impl Entity {
    /// Create a detached entity. Attachment to a parent and qualified-name
    /// derivation happen when it is added to the repository.
    pub fn new(id: EntityId, raw_name: GenericName, kind: EntityKind) -> Self {
        let qualified_name = derive_qualified_name(&raw_name, None);
        Self {
            id,
            raw_name,
            qualified_name,
            parent: None,
            children: Vec::new(),
            relations: Vec::new(),
            actual_refer_to: None,
            multi_declare: None,
            location: Location::default(),
            kind,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn raw_name(&self) -> &GenericName {
        &self.raw_name
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Replace the raw name and re-derive the qualified name against the
    /// given parent qualified name
    pub fn set_raw_name(&mut self, raw_name: GenericName, parent_qualified: Option<&str>) {
        self.raw_name = raw_name;
        self.qualified_name = derive_qualified_name(&self.raw_name, parent_qualified);
    }

    pub(crate) fn set_qualified_name(&mut self, qualified: String) {
        self.qualified_name = qualified;
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<EntityId>) {
        self.parent = parent;
    }

    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: EntityId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn add_relation(&mut self, relation: Relation) {
        self.relations.push(relation);
    }

    /// Alias forwarding: the entity this one actually refers to, or itself
    pub fn actual_refer_to(&self) -> Option<EntityId> {
        self.actual_refer_to
    }

    pub fn set_actual_refer_to(&mut self, target: EntityId) {
        self.actual_refer_to = Some(target);
    }

    pub fn multi_declare(&self) -> Option<EntityId> {
        self.multi_declare
    }

    pub(crate) fn set_multi_declare(&mut self, group: EntityId) {
        self.multi_declare = Some(group);
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut EntityKind {
        &mut self.kind
    }

    // ========== Capability accessors ==========

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntityKind::File(_))
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, EntityKind::Type(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, EntityKind::Function(_))
    }

    pub fn is_var(&self) -> bool {
        matches!(self.kind, EntityKind::Var(_))
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.kind, EntityKind::Alias(_))
    }

    pub fn is_multi_declare(&self) -> bool {
        matches!(self.kind, EntityKind::MultiDeclare(_))
    }

    /// Container capability: files, types and functions own vars,
    /// functions and an expression batch
    pub fn container(&self) -> Option<&ContainerData> {
        match &self.kind {
            EntityKind::File(data) => Some(&data.container),
            EntityKind::Type(data) => Some(&data.container),
            EntityKind::Function(data) => Some(&data.container),
            _ => None,
        }
    }

    pub fn container_mut(&mut self) -> Option<&mut ContainerData> {
        match &mut self.kind {
            EntityKind::File(data) => Some(&mut data.container),
            EntityKind::Type(data) => Some(&mut data.container),
            EntityKind::Function(data) => Some(&mut data.container),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        self.container().is_some()
    }

    pub fn as_file(&self) -> Option<&FileData> {
        match &self.kind {
            EntityKind::File(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileData> {
        match &mut self.kind {
            EntityKind::File(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&TypeData> {
        match &self.kind {
            EntityKind::Type(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_type_mut(&mut self) -> Option<&mut TypeData> {
        match &mut self.kind {
            EntityKind::Type(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionData> {
        match &self.kind {
            EntityKind::Function(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionData> {
        match &mut self.kind {
            EntityKind::Function(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&VarData> {
        match &self.kind {
            EntityKind::Var(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_var_mut(&mut self) -> Option<&mut VarData> {
        match &mut self.kind {
            EntityKind::Var(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_alias(&self) -> Option<&AliasData> {
        match &self.kind {
            EntityKind::Alias(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_multi_declare(&self) -> Option<&MultiDeclareData> {
        match &self.kind {
            EntityKind::MultiDeclare(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_multi_declare_mut(&mut self) -> Option<&mut MultiDeclareData> {
        match &mut self.kind {
            EntityKind::MultiDeclare(data) => Some(data),
            _ => None,
        }
    }

    /// Generic parameter names visible on this entity: its raw name's
    /// argument list plus any declared container type parameters
    pub fn generic_parameters(&self) -> Vec<&GenericName> {
        let mut names: Vec<&GenericName> = self.raw_name.arguments().iter().collect();
        if let Some(container) = self.container() {
            names.extend(container.type_parameters.iter());
        }
        names
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} [id={}, qualified={}]",
            self.kind.as_str(),
            self.raw_name,
            self.id,
            self.qualified_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_rules() {
        // absolute name: separator stripped, parent ignored
        let absolute = GenericName::new(".pkg.Type");
        assert_eq!(derive_qualified_name(&absolute, Some("other")), "pkg.Type");

        // no parent
        let plain = GenericName::new("Type");
        assert_eq!(derive_qualified_name(&plain, None), "Type");

        // empty parent qualified name
        assert_eq!(derive_qualified_name(&plain, Some("")), "Type");

        // normal concatenation
        assert_eq!(derive_qualified_name(&plain, Some("pkg.mod")), "pkg.mod.Type");
    }

    #[test]
    fn test_qualified_name_idempotent_and_pure() {
        let name = GenericName::new("Type");
        let first = derive_qualified_name(&name, Some("pkg"));
        let second = derive_qualified_name(&name, Some("pkg"));
        assert_eq!(first, second);
        assert!(!first.starts_with('.'));
    }

    #[test]
    fn test_entity_equality_is_id_equality() {
        let a = Entity::new(EntityId(1), GenericName::new("a"), EntityKind::Package);
        let b = Entity::new(EntityId(1), GenericName::new("b"), EntityKind::Package);
        let c = Entity::new(EntityId(2), GenericName::new("a"), EntityKind::Package);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_container_capability() {
        let file = Entity::new(
            EntityId(1),
            GenericName::new("f.src"),
            EntityKind::File(FileData::default()),
        );
        let var = Entity::new(
            EntityId(2),
            GenericName::new("x"),
            EntityKind::Var(VarData::default()),
        );
        assert!(file.is_container());
        assert!(!var.is_container());
    }
}
