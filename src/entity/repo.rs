//! Entity repository - the arena behind the ownership tree
//!
//! Entities live in an id-indexed arena with a creation-order iterator and
//! a qualified-name index. Qualified names are not globally unique:
//! collisions are grouped into multi-declaration entities instead of being
//! prevented. The repository also owns every container's expression batch
//! and the optional side-store used to evict batches from memory.

use std::collections::{HashMap, HashSet};

use crate::entity::expression::{ExprId, Expression, ExpressionBatch};
use crate::entity::{BatchState, Entity, EntityId, EntityKind, MultiDeclareData, TypeData};
use crate::name::GenericName;
use crate::store::ExpressionStore;
use crate::{Error, Result};

/// Arena of entities plus per-container expression batches.
pub struct EntityRepo {
    entities: HashMap<EntityId, Entity>,
    creation_order: Vec<EntityId>,
    /// Qualified name -> entity (or multi-declaration group on collision)
    name_index: HashMap<String, EntityId>,
    next_id: i32,
    batches: HashMap<EntityId, ExpressionBatch>,
    store: Option<Box<dyn ExpressionStore>>,
}

impl std::fmt::Debug for EntityRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRepo")
            .field("entities", &self.entities.len())
            .field("batches", &self.batches.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Default for EntityRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRepo {
    /// Create a repository with the sentinel type entities registered
    pub fn new() -> Self {
        let mut repo = Self {
            entities: HashMap::new(),
            creation_order: Vec::new(),
            name_index: HashMap::new(),
            next_id: 0,
            batches: HashMap::new(),
            store: None,
        };
        for (id, name) in [
            (EntityId::BUILT_IN, "built-in"),
            (EntityId::EXTERNAL, "external"),
            (EntityId::GENERIC_PARAMETER, "T"),
        ] {
            let sentinel = Entity::new(id, GenericName::new(name), EntityKind::Type(TypeData::default()));
            repo.entities.insert(id, sentinel);
        }
        repo
    }

    /// Attach a side-store for expression-batch eviction
    pub fn with_store(mut self, store: Box<dyn ExpressionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Next id from the shared monotonically-increasing generator
    pub fn generate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Expression ids come from the same generator as entity ids
    pub fn generate_expr_id(&mut self) -> ExprId {
        let id = ExprId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add an entity under `parent`, deriving its qualified name,
    /// registering it as a child, and grouping qualified-name collisions
    /// into a multi-declaration entity.
    pub fn add(&mut self, mut entity: Entity, parent: Option<EntityId>) -> EntityId {
        let id = entity.id();
        entity.set_parent(parent);
        let parent_qualified = parent
            .and_then(|p| self.entities.get(&p))
            .map(|p| p.qualified_name().to_string());
        let qualified =
            super::derive_qualified_name(entity.raw_name(), parent_qualified.as_deref());
        entity.set_qualified_name(qualified.clone());

        if let Some(parent_id) = parent {
            if let Some(parent_entity) = self.entities.get_mut(&parent_id) {
                parent_entity.add_child(id);
            }
        }

        self.entities.insert(id, entity);
        self.creation_order.push(id);
        self.index_name(qualified, id);
        id
    }

    fn index_name(&mut self, qualified: String, id: EntityId) {
        match self.name_index.get(&qualified).copied() {
            None => {
                self.name_index.insert(qualified, id);
            }
            Some(existing) if existing == id => {}
            Some(existing) => {
                let group = if self
                    .entities
                    .get(&existing)
                    .is_some_and(|e| e.is_multi_declare())
                {
                    existing
                } else {
                    // first collision: wrap the existing entity in a group
                    let group_id = self.generate_id();
                    let raw = self
                        .entities
                        .get(&existing)
                        .map(|e| e.raw_name().clone())
                        .unwrap_or_default();
                    let mut group = Entity::new(
                        group_id,
                        raw,
                        EntityKind::MultiDeclare(MultiDeclareData {
                            entities: vec![existing],
                        }),
                    );
                    group.set_qualified_name(qualified.clone());
                    self.entities.insert(group_id, group);
                    self.creation_order.push(group_id);
                    if let Some(first) = self.entities.get_mut(&existing) {
                        first.set_multi_declare(group_id);
                    }
                    self.name_index.insert(qualified, group_id);
                    group_id
                };
                if let Some(data) = self
                    .entities
                    .get_mut(&group)
                    .and_then(|e| e.as_multi_declare_mut())
                {
                    if !data.entities.contains(&id) {
                        data.entities.push(id);
                    }
                }
                if let Some(member) = self.entities.get_mut(&id) {
                    member.set_multi_declare(group);
                }
            }
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Global registry lookup by qualified name; collisions yield the
    /// multi-declaration group
    pub fn get_by_name(&self, qualified: &str) -> Option<EntityId> {
        self.name_index.get(qualified).copied()
    }

    /// All entities in creation order (sentinels excluded)
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.creation_order
            .iter()
            .filter_map(move |id| self.entities.get(id))
    }

    /// All file entities in creation order
    pub fn files(&self) -> Vec<EntityId> {
        self.iter()
            .filter(|e| e.is_file())
            .map(|e| e.id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.creation_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creation_order.is_empty()
    }

    // ========== Alias forwarding and type derivation ==========

    /// Follow alias forwarding to the entity actually referred to
    pub fn actual(&self, id: EntityId) -> EntityId {
        let mut current = id;
        let mut seen = HashSet::new();
        while seen.insert(current) {
            match self.entities.get(&current).and_then(|e| e.actual_refer_to()) {
                Some(target) if target != current => current = target,
                _ => break,
            }
        }
        current
    }

    /// The type an entity stands for: a type is itself, a var has its
    /// resolved type, a function its first resolved return type, an alias
    /// its target's type, a multi-declaration its first typed member.
    pub fn type_of(&self, id: EntityId) -> Option<EntityId> {
        let mut current = id;
        let mut seen = HashSet::new();
        while seen.insert(current) {
            let entity = self.entities.get(&current)?;
            match entity.kind() {
                EntityKind::Type(_) => return Some(current),
                EntityKind::Var(data) => return data.var_type,
                EntityKind::Function(data) => {
                    return data
                        .return_types
                        .iter()
                        .copied()
                        .find(|&t| self.entities.get(&t).is_some_and(|e| e.is_type()));
                }
                EntityKind::Alias(_) => match entity.actual_refer_to() {
                    Some(target) => current = target,
                    None => return None,
                },
                EntityKind::MultiDeclare(data) => {
                    // prefer a type member, else the first member's type
                    if let Some(&type_member) = data
                        .entities
                        .iter()
                        .find(|&&m| self.entities.get(&m).is_some_and(|e| e.is_type()))
                    {
                        return Some(type_member);
                    }
                    match data.entities.first() {
                        Some(&first) => current = first,
                        None => return None,
                    }
                }
                EntityKind::File(_) | EntityKind::Package => return None,
            }
        }
        None
    }

    // ========== Ancestry queries ==========

    /// Walk parent links until `predicate` matches
    pub fn ancestor_of(
        &self,
        from: EntityId,
        predicate: impl Fn(&Entity) -> bool,
    ) -> Option<EntityId> {
        let mut current = Some(from);
        while let Some(id) = current {
            let entity = self.entities.get(&id)?;
            if predicate(entity) {
                return Some(id);
            }
            current = entity.parent();
        }
        None
    }

    /// Nearest enclosing type entity (including `from` itself)
    pub fn enclosing_type(&self, from: EntityId) -> Option<EntityId> {
        self.ancestor_of(from, |e| e.is_type())
    }

    /// Nearest enclosing file entity (including `from` itself)
    pub fn enclosing_file(&self, from: EntityId) -> Option<EntityId> {
        self.ancestor_of(from, |e| e.is_file())
    }

    /// Nearest enclosing container entity, excluding `from` itself
    pub fn enclosing_container(&self, from: EntityId) -> Option<EntityId> {
        let parent = self.entities.get(&from)?.parent()?;
        self.ancestor_of(parent, |e| e.is_container())
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    pub fn is_ancestor_or_self(&self, ancestor: EntityId, node: EntityId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.entities.get(&id).and_then(|e| e.parent());
        }
        false
    }

    /// Among `candidates`, return the one nearest to `from` by ancestor
    /// chain: walking upward from `from`, the first ancestor level whose
    /// subtree contains a candidate wins. Ties within a level return an
    /// arbitrary candidate; this nondeterminism is accepted.
    pub fn nearest(&self, from: EntityId, candidates: &[EntityId]) -> Option<EntityId> {
        if candidates.len() == 1 {
            return candidates.first().copied();
        }
        let mut level = Some(from);
        while let Some(ancestor) = level {
            for &candidate in candidates {
                if self.is_ancestor_or_self(ancestor, candidate) {
                    return Some(candidate);
                }
            }
            level = self.entities.get(&ancestor).and_then(|e| e.parent());
        }
        None
    }

    /// Whether `parent_type` appears in `child_type`'s inheritance or
    /// implementation closure; cyclic declarations are tolerated.
    pub fn is_type_parent(
        &self,
        parent_type: EntityId,
        child_type: EntityId,
        include_self: bool,
    ) -> bool {
        if include_self && parent_type == child_type {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![child_type];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if current == parent_type && current != child_type {
                return true;
            }
            if let Some(data) = self.entities.get(&current).and_then(|e| e.as_type()) {
                stack.extend(data.inherited.iter().copied());
                stack.extend(data.implemented.iter().copied());
            }
        }
        false
    }

    // ========== Local declaration lookups ==========

    /// Look up a var declared directly on a container; functions check
    /// their parameters first
    pub fn lookup_var_locally(&self, container: EntityId, name: &GenericName) -> Option<EntityId> {
        let entity = self.entities.get(&container)?;
        if let Some(function) = entity.as_function() {
            for &param in &function.parameters {
                if self.entities.get(&param).is_some_and(|p| p.raw_name() == name) {
                    return Some(param);
                }
            }
        }
        let data = entity.container()?;
        data.vars
            .iter()
            .copied()
            .find(|&var| self.entities.get(&var).is_some_and(|v| v.raw_name() == name))
    }

    /// Look up a function declared on a container; type containers also
    /// walk their inherited and implemented chains, tolerating cycles
    pub fn lookup_function_locally(
        &self,
        container: EntityId,
        name: &GenericName,
    ) -> Option<EntityId> {
        let mut visited = HashSet::new();
        let mut stack = vec![container];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(entity) = self.entities.get(&current) else {
                continue;
            };
            if let Some(data) = entity.container() {
                for &func in &data.functions {
                    if self
                        .entities
                        .get(&func)
                        .is_some_and(|f| f.raw_name().as_str() == name.as_str())
                    {
                        return Some(func);
                    }
                }
            }
            if let Some(type_data) = entity.as_type() {
                stack.extend(type_data.inherited.iter().copied());
                stack.extend(type_data.implemented.iter().copied());
            }
        }
        None
    }

    // ========== Expression batches ==========

    /// Append an expression to its container's batch
    pub fn add_expression(&mut self, expression: Expression) {
        let container = expression.container();
        self.batches.entry(container).or_default().push(expression);
        if let Some(data) = self
            .entities
            .get_mut(&container)
            .and_then(|e| e.container_mut())
        {
            data.expr_count += 1;
        }
    }

    pub fn batch(&self, container: EntityId) -> Option<&ExpressionBatch> {
        self.batches.get(&container)
    }

    pub fn batch_mut(&mut self, container: EntityId) -> Option<&mut ExpressionBatch> {
        self.batches.get_mut(&container)
    }

    /// Detach a container's resident batch for resolution
    pub(crate) fn take_batch(&mut self, container: EntityId) -> Option<ExpressionBatch> {
        self.batches.remove(&container)
    }

    pub(crate) fn put_batch(&mut self, container: EntityId, batch: ExpressionBatch) {
        self.batches.insert(container, batch);
    }

    /// Serialise a container's batch to the side-store and drop it from
    /// memory. Store failures surface as typed errors.
    pub fn evict_batch(&mut self, container: EntityId) -> Result<()> {
        let store = self.store.as_mut().ok_or(Error::NoStore)?;
        let Some(batch) = self.batches.get(&container) else {
            return Ok(());
        };
        if batch.is_empty() {
            return Ok(());
        }
        store.put(container, batch)?;
        self.batches.remove(&container);
        if let Some(data) = self
            .entities
            .get_mut(&container)
            .and_then(|e| e.container_mut())
        {
            data.batch_state = BatchState::Evicted;
        }
        Ok(())
    }

    /// Reload an evicted batch, reconstructing every cross-reference from
    /// stored ids
    pub fn reload_batch(&mut self, container: EntityId) -> Result<()> {
        let evicted = self
            .entities
            .get(&container)
            .and_then(|e| e.container())
            .is_some_and(|d| d.batch_state == BatchState::Evicted);
        if !evicted {
            return Ok(());
        }
        let store = self.store.as_mut().ok_or(Error::NoStore)?;
        let batch = store
            .get(container)
            .and_then(|b| b.ok_or(Error::MissingBatch(container.0)))?;
        self.batches.insert(container, batch);
        if let Some(data) = self
            .entities
            .get_mut(&container)
            .and_then(|e| e.container_mut())
        {
            data.batch_state = BatchState::Resident;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{FileData, FunctionData, VarData};

    fn add_kind(repo: &mut EntityRepo, name: &str, parent: Option<EntityId>, kind: EntityKind) -> EntityId {
        let id = repo.generate_id();
        repo.add(Entity::new(id, GenericName::new(name), kind), parent)
    }

    #[test]
    fn test_qualified_names_follow_tree() {
        let mut repo = EntityRepo::new();
        let file = add_kind(&mut repo, "pkg", None, EntityKind::File(FileData::default()));
        let ty = add_kind(&mut repo, "Foo", Some(file), EntityKind::Type(TypeData::default()));
        assert_eq!(repo.get(ty).unwrap().qualified_name(), "pkg.Foo");
        assert_eq!(repo.get_by_name("pkg.Foo"), Some(ty));
    }

    #[test]
    fn test_collision_creates_multi_declare_group() {
        let mut repo = EntityRepo::new();
        let file = add_kind(&mut repo, "pkg", None, EntityKind::File(FileData::default()));
        let first = add_kind(&mut repo, "run", Some(file), EntityKind::Function(FunctionData::default()));
        let second = add_kind(&mut repo, "run", Some(file), EntityKind::Function(FunctionData::default()));

        let group = repo.get_by_name("pkg.run").unwrap();
        assert_ne!(group, first);
        assert_ne!(group, second);
        let data = repo.get(group).unwrap().as_multi_declare().unwrap();
        assert_eq!(data.entities, vec![first, second]);
        assert_eq!(repo.get(first).unwrap().multi_declare(), Some(group));
        assert_eq!(repo.get(second).unwrap().multi_declare(), Some(group));
    }

    #[test]
    fn test_nearest_prefers_inner_scope() {
        let mut repo = EntityRepo::new();
        let file = add_kind(&mut repo, "f", None, EntityKind::File(FileData::default()));
        let outer = add_kind(&mut repo, "Outer", Some(file), EntityKind::Type(TypeData::default()));
        let inner = add_kind(&mut repo, "Inner", Some(outer), EntityKind::Type(TypeData::default()));
        let outer_func = add_kind(&mut repo, "func", Some(outer), EntityKind::Function(FunctionData::default()));
        let inner_func = add_kind(&mut repo, "func", Some(inner), EntityKind::Function(FunctionData::default()));

        let from = add_kind(&mut repo, "caller", Some(inner), EntityKind::Function(FunctionData::default()));
        let nearest = repo.nearest(from, &[outer_func, inner_func]);
        assert_eq!(nearest, Some(inner_func));
    }

    #[test]
    fn test_is_type_parent_tolerates_cycles() {
        let mut repo = EntityRepo::new();
        let file = add_kind(&mut repo, "f", None, EntityKind::File(FileData::default()));
        let a = add_kind(&mut repo, "A", Some(file), EntityKind::Type(TypeData::default()));
        let b = add_kind(&mut repo, "B", Some(file), EntityKind::Type(TypeData::default()));
        repo.get_mut(a).unwrap().as_type_mut().unwrap().inherited.push(b);
        repo.get_mut(b).unwrap().as_type_mut().unwrap().inherited.push(a);

        assert!(repo.is_type_parent(b, a, false));
        assert!(repo.is_type_parent(a, b, false));
        assert!(!repo.is_type_parent(file, a, false));
    }

    #[test]
    fn test_sentinels_are_types() {
        let repo = EntityRepo::new();
        assert_eq!(repo.type_of(EntityId::BUILT_IN), Some(EntityId::BUILT_IN));
        assert_eq!(repo.type_of(EntityId::GENERIC_PARAMETER), Some(EntityId::GENERIC_PARAMETER));
        // sentinels are not part of the creation-order iteration
        assert_eq!(repo.iter().count(), 0);
    }

    #[test]
    fn test_var_type_lookup_via_type_of() {
        let mut repo = EntityRepo::new();
        let file = add_kind(&mut repo, "f", None, EntityKind::File(FileData::default()));
        let ty = add_kind(&mut repo, "Foo", Some(file), EntityKind::Type(TypeData::default()));
        let var = add_kind(&mut repo, "x", Some(file), EntityKind::Var(VarData::default()));
        repo.get_mut(var).unwrap().as_var_mut().unwrap().var_type = Some(ty);
        assert_eq!(repo.type_of(var), Some(ty));
    }

    #[test]
    fn test_evict_without_store_is_an_error() {
        let mut repo = EntityRepo::new();
        let file = add_kind(&mut repo, "f", None, EntityKind::File(FileData::default()));
        let id = repo.generate_expr_id();
        repo.add_expression(Expression::new(id, file));

        assert!(matches!(repo.evict_batch(file), Err(Error::NoStore)));
        // the batch stays resident
        assert!(repo.batch(file).is_some());
    }

    /// A store that accepts writes but never returns them
    struct BlackHoleStore;

    impl ExpressionStore for BlackHoleStore {
        fn put(&mut self, _: EntityId, _: &ExpressionBatch) -> Result<()> {
            Ok(())
        }

        fn get(&mut self, _: EntityId) -> Result<Option<ExpressionBatch>> {
            Ok(None)
        }
    }

    #[test]
    fn test_reload_of_lost_batch_is_an_error() {
        let mut repo = EntityRepo::new().with_store(Box::new(BlackHoleStore));
        let file = add_kind(&mut repo, "f", None, EntityKind::File(FileData::default()));
        let id = repo.generate_expr_id();
        repo.add_expression(Expression::new(id, file));
        repo.evict_batch(file).unwrap();
        assert!(repo.batch(file).is_none());

        assert!(matches!(
            repo.reload_batch(file),
            Err(Error::MissingBatch(n)) if n == file.0
        ));
    }
}
