//! Name resolver - the binding engine
//!
//! Turns raw names into concrete entities across imports, inheritance,
//! generics, overloads and duck-typed variables. Resolution operates on
//! incomplete, partially-built information and degrades instead of
//! failing: every unresolvable name is recorded in the
//! [`ResolutionContext`] and propagates as a missing type, never as an
//! error.
//!
//! The driver ([`BindingResolver::resolve_all`]) runs two phases over the
//! finished entity tree: a per-file local-inference walk (imports,
//! inheritance, return types, var types, aliases, mixins), then a
//! per-container expression pass (see [`expr`]).

pub mod expr;

use std::collections::HashSet;

use crate::entity::repo::EntityRepo;
use crate::entity::{
    Entity, EntityId, EntityKind, FunctionCall, Relation, RelationKind, TypeData,
};
use crate::lang::{BuiltInTypeSet, ImportLookup};
use crate::name::GenericName;
use crate::Result;

/// A name the resolver could not bind, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnresolvedSymbol {
    pub name: String,
    /// The entity the name was resolved from, if any
    pub from: Option<EntityId>,
}

impl UnresolvedSymbol {
    pub fn new(name: impl Into<String>, from: Option<EntityId>) -> Self {
        Self {
            name: name.into(),
            from,
        }
    }
}

/// Shared state of one resolution run.
///
/// Passed explicitly through every call instead of living in process-wide
/// mutable state, so per-file contexts can be merged after a run.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    unresolved: HashSet<UnresolvedSymbol>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_unresolved(&mut self, name: &str, from: Option<EntityId>) {
        self.unresolved.insert(UnresolvedSymbol::new(name, from));
    }

    pub fn unresolved(&self) -> &HashSet<UnresolvedSymbol> {
        &self.unresolved
    }

    pub fn contains(&self, name: &str) -> bool {
        self.unresolved.iter().any(|u| u.name == name)
    }

    /// Merge another context into this one
    pub fn merge(&mut self, other: ResolutionContext) {
        self.unresolved.extend(other.unresolved);
    }
}

/// Tunable resolver behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Reclassify a call as a construction when the bound entity's type
    /// name matches the composed identifier (languages without an explicit
    /// construction keyword)
    pub delay_create_expression: bool,
    /// Evict each container's batch to the side-store once resolved
    pub evict_after_resolve: bool,
}

/// The binding engine. Holds the per-language collaborators; all mutable
/// state lives in the repository and the [`ResolutionContext`].
pub struct BindingResolver {
    import_lookup: Box<dyn ImportLookup>,
    builtins: Box<dyn BuiltInTypeSet>,
    options: ResolveOptions,
}

impl BindingResolver {
    pub fn new(import_lookup: Box<dyn ImportLookup>, builtins: Box<dyn BuiltInTypeSet>) -> Self {
        Self {
            import_lookup,
            builtins,
            options: ResolveOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ResolveOptions {
        self.options
    }

    // ========== Name resolution ==========

    /// Resolve a raw name from an entity's scope. Never fails: an
    /// unbindable name is recorded in the context (unless built-in) and
    /// `None` is returned.
    pub fn resolve_name(
        &self,
        repo: &EntityRepo,
        ctx: &mut ResolutionContext,
        from: EntityId,
        raw_name: &GenericName,
        search_imports: bool,
    ) -> Option<EntityId> {
        let entity = self.resolve_name_internal(repo, from, raw_name, search_imports);
        if (entity.is_none() || entity == Some(EntityId::EXTERNAL))
            && !self.builtins.is_built_in(raw_name.as_str())
        {
            ctx.record_unresolved(raw_name.as_str(), Some(from));
        }
        entity
    }

    /// Resolve a name and derive the type it stands for: a class is the
    /// type, a function's return type is the type, a variable's type is
    /// the type.
    pub fn infer_type_from_name(
        &self,
        repo: &EntityRepo,
        ctx: &mut ResolutionContext,
        from: EntityId,
        raw_name: &GenericName,
    ) -> Option<EntityId> {
        let entity = self.resolve_name(repo, ctx, from, raw_name, true)?;
        repo.type_of(entity)
    }

    fn resolve_name_internal(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        raw_name: &GenericName,
        search_imports: bool,
    ) -> Option<EntityId> {
        if raw_name.as_str().is_empty() {
            return None;
        }
        if self.builtins.is_built_in(raw_name.as_str())
            || self.builtins.is_built_in_prefix(raw_name.as_str())
        {
            return Some(EntityId::BUILT_IN);
        }

        // absolute names try the global registry first
        let raw_name = if raw_name.is_absolute() {
            let stripped = raw_name.strip_qualifier();
            if let Some(id) = repo.get_by_name(stripped.as_str()) {
                return Some(id);
            }
            stripped
        } else {
            raw_name.clone()
        };

        // scope walk, truncating the last dotted segment on each failure
        let mut entity = None;
        let mut truncated = 0usize;
        let mut name = raw_name.clone();
        loop {
            if let Some(found) = self.lookup_entity(repo, from, name.as_str(), search_imports) {
                if found != EntityId::EXTERNAL {
                    entity = Some(found);
                    break;
                }
                entity = Some(found);
            }
            if self.import_lookup.supports_global_name_lookup() {
                if let Some(found) = repo.get_by_name(name.as_str()) {
                    entity = Some(found);
                    break;
                }
            }
            truncated += 1;
            match name.truncate_last_segment() {
                Some(shorter) => name = shorter,
                None => break,
            }
        }
        let entity = entity?;

        let segments: Vec<&str> = raw_name.segments().collect();
        if segments.len() <= 1 {
            return Some(entity);
        }
        // descend through the resolved root's type for remaining segments
        self.find_entity_since(repo, entity, &segments, segments.len().saturating_sub(truncated))
    }

    fn lookup_entity(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        name: &str,
        search_imports: bool,
    ) -> Option<EntityId> {
        if name == "this" || name == "class" {
            return repo.enclosing_type(from);
        }
        if name == "super" {
            let enclosing = repo.enclosing_type(from)?;
            return repo
                .get(enclosing)?
                .as_type()?
                .inherited
                .first()
                .copied();
        }

        if let Some(found) = self.find_entity_under_same_scope(repo, from, name) {
            return Some(found);
        }
        if search_imports {
            let file = repo.enclosing_file(from)?;
            return Some(self.lookup_type_in_imported(repo, file, name));
        }
        None
    }

    /// Walk from `from` up to the root, searching at each level: the
    /// entity itself, its children, inherited/implemented chains of type
    /// entities, declared types of files, and children of sibling files.
    fn find_entity_under_same_scope(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        name: &str,
    ) -> Option<EntityId> {
        let mut current = Some(from);
        while let Some(scope) = current {
            if let Some(found) = self.match_entity_name(repo, scope, name) {
                return Some(found);
            }
            if let Some(found) = self.find_entity_in_children(repo, scope, name) {
                return Some(found);
            }

            let entity = repo.get(scope)?;
            if let Some(type_data) = entity.as_type() {
                // inherited and implemented chains, cycle tolerant
                let mut visited = HashSet::new();
                let mut stack: Vec<EntityId> = type_data
                    .inherited
                    .iter()
                    .chain(type_data.implemented.iter())
                    .copied()
                    .collect();
                while let Some(ancestor) = stack.pop() {
                    if !visited.insert(ancestor) {
                        continue;
                    }
                    if let Some(found) = self.find_entity_in_children(repo, ancestor, name) {
                        return Some(found);
                    }
                    if let Some(data) = repo.get(ancestor).and_then(|e| e.as_type()) {
                        stack.extend(data.inherited.iter().copied());
                        stack.extend(data.implemented.iter().copied());
                    }
                }
            }

            if let Some(file_data) = entity.as_file() {
                for &declared in &file_data.declared_types {
                    let Some(ty) = repo.get(declared) else { continue };
                    if ty.raw_name().as_str() == name
                        || GenericName::suffix_match(name, ty.qualified_name())
                    {
                        return Some(declared);
                    }
                }
            }

            // siblings that are files expose their top-level declarations
            for &child in entity.children() {
                if repo.get(child).is_some_and(|e| e.is_file()) {
                    if let Some(found) = self.find_entity_in_children(repo, child, name) {
                        return Some(found);
                    }
                }
            }

            current = entity.parent();
        }
        None
    }

    fn find_entity_in_children(
        &self,
        repo: &EntityRepo,
        parent: EntityId,
        name: &str,
    ) -> Option<EntityId> {
        repo.get(parent)?
            .children()
            .iter()
            .find_map(|&child| self.match_entity_name(repo, child, name))
    }

    /// Match one entity against a name. Candidate-typed vars search every
    /// candidate type; multi-declaration groups that contain a type yield
    /// the type member.
    fn match_entity_name(&self, repo: &EntityRepo, id: EntityId, name: &str) -> Option<EntityId> {
        let entity = repo.get(id)?;
        if let Some(type_data) = entity.as_type() {
            if !type_data.candidate_types.is_empty() {
                return type_data
                    .candidate_types
                    .iter()
                    .find_map(|&candidate| self.match_single_entity(repo, candidate, name));
            }
        }
        self.match_single_entity(repo, id, name)
    }

    fn match_single_entity(&self, repo: &EntityRepo, id: EntityId, name: &str) -> Option<EntityId> {
        let entity = repo.get(id)?;
        if entity.raw_name().as_str() != name {
            return None;
        }
        if let Some(group) = entity.as_multi_declare() {
            let typed = group.entities.iter().copied().find(|&member| {
                repo.get(member)
                    .is_some_and(|e| e.is_type() && e.raw_name().as_str() == name)
            });
            if let Some(type_member) = typed {
                return Some(type_member);
            }
        }
        Some(id)
    }

    /// Descend from a resolved root through its type's children for the
    /// remaining dotted segments; a missing segment fails the resolution.
    fn find_entity_since(
        &self,
        repo: &EntityRepo,
        root: EntityId,
        segments: &[&str],
        mut index: usize,
    ) -> Option<EntityId> {
        let mut current = root;
        loop {
            if index >= segments.len() {
                return Some(current);
            }
            // entities without a type (imports of packages etc.) stand for
            // themselves
            let Some(current_type) = repo.type_of(current) else {
                return Some(current);
            };
            let children: Vec<EntityId> = repo.get(current_type)?.children().to_vec();
            let next = children.into_iter().find(|&child| {
                repo.get(child)
                    .is_some_and(|e| e.raw_name().as_str() == segments[index])
            })?;
            current = next;
            index += 1;
        }
    }

    /// Look up a single name among a file's imports; names the strategy
    /// cannot bind resolve to the external sentinel.
    fn lookup_type_in_imported(&self, repo: &EntityRepo, file: EntityId, name: &str) -> EntityId {
        self.import_lookup
            .lookup_imported_type(name, file, repo)
            .unwrap_or(EntityId::EXTERNAL)
    }

    // ========== Visible-scope declaration lookups ==========

    /// Look up a function from a container's scope, walking enclosing
    /// containers and following aliases. A multi-declared starting scope
    /// searches every declaration of itself.
    pub fn lookup_functions_in_visible_scope(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        name: &GenericName,
    ) -> Vec<EntityId> {
        let starts = match repo.get(from).and_then(|e| e.multi_declare()) {
            Some(group) => repo
                .get(group)
                .and_then(|e| e.as_multi_declare())
                .map(|d| d.entities.clone())
                .unwrap_or_else(|| vec![from]),
            None => vec![from],
        };
        for start in starts {
            if let Some(found) = self.lookup_function_bottom_up(repo, start, name) {
                return vec![found];
            }
        }
        Vec::new()
    }

    fn lookup_function_bottom_up(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        name: &GenericName,
    ) -> Option<EntityId> {
        let mut current = Some(from);
        while let Some(scope) = current {
            if repo.get(scope).is_some_and(|e| e.is_container()) {
                if let Some(found) = repo.lookup_function_locally(scope, name) {
                    return Some(found);
                }
            }
            if let Some(alias) = self.match_alias_child(repo, scope, name) {
                return Some(alias);
            }
            current = repo.enclosing_container(scope);
        }
        None
    }

    /// Look up a var from a container's scope, walking enclosing
    /// containers; function scopes check parameters first.
    pub fn lookup_var_in_visible_scope(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        name: &GenericName,
    ) -> Option<EntityId> {
        let mut current = Some(from);
        while let Some(scope) = current {
            if let Some(found) = repo.lookup_var_locally(scope, name) {
                return Some(found);
            }
            if let Some(alias) = self.match_alias_child(repo, scope, name) {
                return Some(alias);
            }
            current = repo.enclosing_container(scope);
        }
        None
    }

    fn match_alias_child(
        &self,
        repo: &EntityRepo,
        scope: EntityId,
        name: &GenericName,
    ) -> Option<EntityId> {
        repo.get(scope)?
            .children()
            .iter()
            .copied()
            .find(|&child| {
                repo.get(child)
                    .is_some_and(|e| e.is_alias() && e.raw_name() == name)
            })
            .map(|alias| repo.actual(alias))
    }

    /// Gather every entity named `name` visible from `from`, walking up
    /// through enclosing scopes (and into sibling packages' members).
    fn visible_entities_named(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        name: &GenericName,
    ) -> Vec<EntityId> {
        let mut found = Vec::new();
        let mut searched = HashSet::new();
        let mut pending = vec![from];
        while let Some(start) = pending.pop() {
            let mut current = Some(start);
            while let Some(scope) = current {
                if !searched.insert(scope) {
                    break;
                }
                let Some(entity) = repo.get(scope) else { break };
                if matches!(entity.kind(), EntityKind::Package) {
                    pending.extend(entity.children().iter().copied());
                }
                if let Some(container) = entity.container() {
                    for &func in &container.functions {
                        if repo
                            .get(func)
                            .is_some_and(|f| f.raw_name().as_str() == name.as_str())
                        {
                            found.push(func);
                        }
                    }
                    for &var in &container.vars {
                        if repo.get(var).is_some_and(|v| v.raw_name() == name) {
                            found.push(var);
                        }
                    }
                }
                for &child in entity.children() {
                    if repo
                        .get(child)
                        .is_some_and(|e| e.is_alias() && e.raw_name() == name)
                    {
                        found.push(repo.actual(child));
                    }
                }
                current = entity.parent();
            }
        }
        found
    }

    /// Find an extension function applicable to `target_type` under the
    /// given name. Exact first-parameter-type matches beat supertype
    /// matches; among equals the lexically nearest declaration wins.
    pub fn lookup_extension_function(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        target_type: EntityId,
        name: &GenericName,
    ) -> Option<EntityId> {
        let mut candidates = self.visible_entities_named(repo, from, name);
        if let Some(file) = repo.enclosing_file(from) {
            if let Some(data) = repo.get(file).and_then(|e| e.as_file()) {
                candidates.extend(data.imported_types.iter().copied());
            }
        }

        let mut exact = Vec::new();
        let mut supertype = Vec::new();
        for candidate in candidates {
            let Some(entity) = repo.get(candidate) else { continue };
            let Some(function) = entity.as_function() else { continue };
            if !function.is_extension || entity.raw_name().as_str() != name.as_str() {
                continue;
            }
            let Some(&first_param) = function.parameters.first() else {
                continue;
            };
            let Some(param_type) = repo.type_of(first_param) else {
                continue;
            };
            if param_type == target_type {
                if !exact.contains(&candidate) {
                    exact.push(candidate);
                }
            } else if repo.is_type_parent(param_type, target_type, true)
                && !supertype.contains(&candidate)
            {
                supertype.push(candidate);
            }
        }
        if !exact.is_empty() {
            return repo.nearest(from, &exact);
        }
        if !supertype.is_empty() {
            return repo.nearest(from, &supertype);
        }
        None
    }

    // ========== Candidate types (duck typing) ==========

    /// Candidate types for a declaration-less variable: every declared
    /// type whose method set covers all observed call names.
    pub fn calculate_candidate_types(
        &self,
        repo: &EntityRepo,
        calls: &[FunctionCall],
    ) -> Vec<EntityId> {
        if calls.is_empty() {
            return Vec::new();
        }
        let mut candidates = Vec::new();
        for file in repo.files() {
            let Some(data) = repo.get(file).and_then(|e| e.as_file()) else {
                continue;
            };
            for &declared in &data.declared_types {
                let Some(type_data) = repo.get(declared).and_then(|e| e.as_type()) else {
                    continue;
                };
                let covers_all = calls.iter().all(|call| {
                    type_data.container.functions.iter().any(|&func| {
                        repo.get(func)
                            .is_some_and(|f| f.raw_name().as_str() == call.name.as_str())
                    })
                });
                if covers_all {
                    candidates.push(declared);
                }
            }
        }
        candidates
    }

    // ========== The global resolution pass ==========

    /// Resolve every binding in the repository: phase one infers
    /// declaration-level names file by file, phase two resolves every
    /// container's expression batch.
    pub fn resolve_all(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext) -> Result<()> {
        for file in repo.files() {
            self.infer_file(repo, ctx, file);
        }
        for file in repo.files() {
            self.resolve_file_expressions(repo, ctx, file)?;
        }
        tracing::debug!(unresolved = ctx.unresolved().len(), "resolution pass done");
        Ok(())
    }

    /// Declaration-level inference for one file's subtree
    pub fn infer_file(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext, file: EntityId) {
        let mut stack = vec![file];
        while let Some(id) = stack.pop() {
            self.infer_local(repo, ctx, id);
            if let Some(entity) = repo.get(id) {
                let mut children = entity.children().to_vec();
                children.reverse();
                stack.extend(children);
            }
        }
    }

    /// Expression resolution for every container in one file's subtree
    pub fn resolve_file_expressions(
        &self,
        repo: &mut EntityRepo,
        ctx: &mut ResolutionContext,
        file: EntityId,
    ) -> Result<()> {
        let mut stack = vec![file];
        while let Some(id) = stack.pop() {
            if repo.get(id).is_some_and(|e| e.is_container()) {
                expr::resolve_container(self, repo, ctx, id)?;
            }
            if let Some(entity) = repo.get(id) {
                let mut children = entity.children().to_vec();
                children.reverse();
                stack.extend(children);
            }
        }
        Ok(())
    }

    fn infer_local(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext, id: EntityId) {
        let Some(entity) = repo.get(id) else { return };
        match entity.kind() {
            EntityKind::File(_) => self.infer_file_imports(repo, ctx, id),
            EntityKind::Type(_) => self.infer_type_parents(repo, ctx, id),
            EntityKind::Function(_) => self.infer_function_types(repo, ctx, id),
            EntityKind::Var(_) => self.infer_var_type(repo, ctx, id),
            EntityKind::Alias(_) => self.infer_alias_target(repo, ctx, id),
            EntityKind::Package | EntityKind::MultiDeclare(_) => {}
        }
        self.infer_mixins(repo, ctx, id);
    }

    fn infer_file_imports(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext, file: EntityId) {
        let Some(entity) = repo.get(file) else { return };
        let Some(data) = entity.as_file() else { return };
        // already inferred on a previous pass
        if !data.imported_types.is_empty()
            || !data.imported_files.is_empty()
            || entity.relations().iter().any(|r| r.kind == RelationKind::Import)
        {
            return;
        }
        let imports = data.imports.clone();
        if imports.is_empty() {
            return;
        }
        let mut unresolved = Vec::new();
        let imported_types = self.import_lookup.imported_types(&imports, repo, &mut unresolved);
        for name in unresolved {
            ctx.record_unresolved(&name, Some(file));
        }
        let imported_files = self.import_lookup.imported_files(&imports, repo);
        let related = self.import_lookup.imported_relation_entities(&imports, repo);

        for &target in &related {
            if let Some(entity) = repo.get_mut(file) {
                entity.add_relation(Relation::new(RelationKind::Import, target));
            }
        }
        if let Some(data) = repo.get_mut(file).and_then(|e| e.as_file_mut()) {
            data.imported_types = imported_types;
            data.imported_files = imported_files;
        }
    }

    fn infer_type_parents(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext, id: EntityId) {
        let Some(data) = repo.get(id).and_then(|e| e.as_type()) else { return };
        if !data.inherited.is_empty() || !data.implemented.is_empty() {
            return;
        }
        let inherits = data.inherits_names.clone();
        let implements = data.implements_names.clone();
        if inherits.is_empty() && implements.is_empty() {
            return;
        }

        let mut inherited = Vec::new();
        for name in &inherits {
            if let Some(found) = self.resolve_name(repo, ctx, id, name, true) {
                if let Some(ty) = repo.type_of(found) {
                    inherited.push(ty);
                }
            }
        }
        let mut implemented = Vec::new();
        for name in &implements {
            if let Some(found) = self.resolve_name(repo, ctx, id, name, true) {
                if let Some(ty) = repo.type_of(found) {
                    implemented.push(ty);
                }
            }
        }
        for &target in &inherited {
            if let Some(entity) = repo.get_mut(id) {
                entity.add_relation(Relation::new(RelationKind::Inherit, target));
            }
        }
        for &target in &implemented {
            if let Some(entity) = repo.get_mut(id) {
                entity.add_relation(Relation::new(RelationKind::Implement, target));
            }
        }
        if let Some(data) = repo.get_mut(id).and_then(|e| e.as_type_mut()) {
            data.inherited = inherited;
            data.implemented = implemented;
        }
    }

    fn infer_function_types(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext, id: EntityId) {
        let Some(data) = repo.get(id).and_then(|e| e.as_function()) else { return };
        let return_names = data.return_type_names.clone();
        let throw_names = data.throw_type_names.clone();
        let needs_returns = data.return_types.is_empty() && !return_names.is_empty();
        let needs_throws = data.throw_types.is_empty() && !throw_names.is_empty();

        if needs_returns {
            let mut return_types = Vec::new();
            for name in &return_names {
                if let Some(ty) = self.resolve_type_or_generic(repo, ctx, id, name) {
                    if !return_types.contains(&ty) {
                        return_types.push(ty);
                    }
                }
            }
            for &target in &return_types {
                if !target.is_sentinel() {
                    if let Some(entity) = repo.get_mut(id) {
                        entity.add_relation(Relation::new(RelationKind::Return, target));
                    }
                }
            }
            if let Some(data) = repo.get_mut(id).and_then(|e| e.as_function_mut()) {
                data.return_types = return_types;
            }
        }
        if needs_throws {
            let mut throw_types = Vec::new();
            for name in &throw_names {
                if let Some(ty) = self.infer_type_from_name(repo, ctx, id, name) {
                    if !throw_types.contains(&ty) {
                        throw_types.push(ty);
                    }
                }
            }
            for &target in &throw_types {
                if !target.is_sentinel() {
                    if let Some(entity) = repo.get_mut(id) {
                        entity.add_relation(Relation::new(RelationKind::Throw, target));
                    }
                }
            }
            if let Some(data) = repo.get_mut(id).and_then(|e| e.as_function_mut()) {
                data.throw_types = throw_types;
            }
        }
    }

    fn infer_var_type(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext, id: EntityId) {
        let Some(data) = repo.get(id).and_then(|e| e.as_var()) else { return };
        if data.var_type.is_some() {
            return;
        }
        match data.raw_type.clone() {
            Some(raw_type) => {
                let resolved = self.resolve_type_or_generic(repo, ctx, id, &raw_type);
                if let Some(ty) = resolved {
                    if !ty.is_sentinel() {
                        let is_parameter = repo
                            .get(id)
                            .and_then(|e| e.parent())
                            .and_then(|p| repo.get(p))
                            .and_then(|p| p.as_function())
                            .is_some_and(|f| f.parameters.contains(&id));
                        let kind = if is_parameter {
                            RelationKind::Parameter
                        } else {
                            RelationKind::Use
                        };
                        if let Some(entity) = repo.get_mut(id) {
                            entity.add_relation(Relation::new(kind, ty));
                        }
                    }
                    if let Some(data) = repo.get_mut(id).and_then(|e| e.as_var_mut()) {
                        data.var_type = Some(ty);
                    }
                }
            }
            None => self.fill_candidate_types(repo, id),
        }
    }

    /// Resolve a type name, falling back to the generic-parameter sentinel
    /// when no concrete type matches but the name is declared as a generic
    /// parameter of an enclosing container
    fn resolve_type_or_generic(
        &self,
        repo: &EntityRepo,
        ctx: &mut ResolutionContext,
        from: EntityId,
        name: &GenericName,
    ) -> Option<EntityId> {
        let resolved = self.resolve_name_internal(repo, from, name, true);
        if let Some(ty) = resolved
            .filter(|&e| e != EntityId::EXTERNAL)
            .and_then(|e| repo.type_of(e))
        {
            return Some(ty);
        }
        if self.is_generic_type_parameter(repo, from, name) {
            return Some(EntityId::GENERIC_PARAMETER);
        }
        if !self.builtins.is_built_in(name.as_str()) {
            ctx.record_unresolved(name.as_str(), Some(from));
        }
        resolved
    }

    /// Whether `name` is declared as a generic parameter on `from` or any
    /// enclosing container
    pub fn is_generic_type_parameter(
        &self,
        repo: &EntityRepo,
        from: EntityId,
        name: &GenericName,
    ) -> bool {
        let mut current = Some(from);
        while let Some(id) = current {
            let Some(entity) = repo.get(id) else { break };
            if entity
                .generic_parameters()
                .iter()
                .any(|p| p.as_str() == name.as_str())
            {
                return true;
            }
            current = entity.parent();
        }
        false
    }

    /// Duck typing: give a declaration-less var a type from its observed
    /// calls. One candidate binds directly; several become a synthetic
    /// candidate-set type.
    fn fill_candidate_types(&self, repo: &mut EntityRepo, var: EntityId) {
        let Some(calls) = repo.get(var).and_then(|e| e.as_var()).map(|d| d.calls.clone()) else {
            return;
        };
        if calls.is_empty() {
            return;
        }
        let candidates = self.calculate_candidate_types(repo, &calls);
        if candidates.is_empty() {
            return;
        }
        let var_type = if candidates.len() == 1 {
            candidates[0]
        } else {
            let raw = repo
                .get(var)
                .map(|e| e.raw_name().clone())
                .unwrap_or_default();
            let id = repo.generate_id();
            let holder = Entity::new(
                id,
                raw,
                EntityKind::Type(TypeData {
                    candidate_types: candidates,
                    ..Default::default()
                }),
            );
            repo.add(holder, None)
        };
        if let Some(data) = repo.get_mut(var).and_then(|e| e.as_var_mut()) {
            data.var_type = Some(var_type);
        }
    }

    fn infer_alias_target(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext, id: EntityId) {
        let Some(entity) = repo.get(id) else { return };
        if entity.actual_refer_to().is_some() {
            return;
        }
        let Some(name) = entity.as_alias().map(|d| d.refer_to_name.clone()) else {
            return;
        };
        if let Some(target) = self.resolve_name(repo, ctx, id, &name, true) {
            if target != id {
                if let Some(entity) = repo.get_mut(id) {
                    entity.set_actual_refer_to(target);
                    if !target.is_sentinel() {
                        entity.add_relation(Relation::new(RelationKind::Use, target));
                    }
                }
            }
        }
    }

    fn infer_mixins(&self, repo: &mut EntityRepo, ctx: &mut ResolutionContext, id: EntityId) {
        let Some(data) = repo.get(id).and_then(|e| e.container()) else { return };
        if !data.resolved_mixins.is_empty() {
            return;
        }
        let mixins = data.mixins.clone();
        if mixins.is_empty() {
            return;
        }
        let mut resolved = Vec::new();
        for name in &mixins {
            if let Some(found) = self.resolve_name(repo, ctx, id, name, true) {
                if repo.get(found).is_some_and(|e| e.is_container()) {
                    resolved.push(found);
                }
            }
        }
        for &target in &resolved {
            if let Some(entity) = repo.get_mut(id) {
                entity.add_relation(Relation::new(RelationKind::Mixin, target));
            }
        }
        if let Some(data) = repo.get_mut(id).and_then(|e| e.container_mut()) {
            data.resolved_mixins = resolved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::lang::{NullBuiltIn, QualifiedImportLookup};

    fn resolver() -> BindingResolver {
        BindingResolver::new(Box::new(QualifiedImportLookup), Box::new(NullBuiltIn))
    }

    #[test]
    fn test_this_and_super_resolve_to_enclosing_types() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        let base = builder.found_type(GenericName::new("Base"));
        builder.exit_entity();
        let derived = builder.found_type(GenericName::new("Derived"));
        builder.found_extends(GenericName::new("Base"));
        let method = builder.found_function(GenericName::new("m"), None, vec![]);
        builder.exit_entity();
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        let this = resolver.resolve_name(&repo, &mut ctx, method, &GenericName::new("this"), true);
        assert_eq!(this, Some(derived));
        let sup = resolver.resolve_name(&repo, &mut ctx, method, &GenericName::new("super"), true);
        assert_eq!(sup, Some(base));
    }

    #[test]
    fn test_dotted_name_descends_into_type() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Foo"));
        let bar = builder.found_function(GenericName::new("bar"), None, vec![]);
        builder.exit_entity();
        builder.exit_entity();
        let main = builder.found_function(GenericName::new("main"), None, vec![]);
        builder.exit_entity();

        let repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();

        // `Foo.bar` resolves the root `Foo` in scope, then descends
        let found =
            resolver.resolve_name(&repo, &mut ctx, main, &GenericName::new("Foo.bar"), true);
        assert_eq!(found, Some(bar));
    }

    #[test]
    fn test_inherited_members_visible_from_subtype() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Base"));
        let shared = builder.found_function(GenericName::new("shared"), None, vec![]);
        builder.exit_entity();
        builder.exit_entity();
        let derived = builder.found_type(GenericName::new("Derived"));
        builder.found_extends(GenericName::new("Base"));
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        let found = resolver.lookup_functions_in_visible_scope(
            &repo,
            derived,
            &GenericName::new("shared"),
        );
        assert_eq!(found, vec![shared]);
    }

    #[test]
    fn test_unresolved_names_carry_their_origin() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        let main = builder.found_function(GenericName::new("main"), None, vec![]);
        builder.exit_entity();

        let repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();

        let found =
            resolver.resolve_name(&repo, &mut ctx, main, &GenericName::new("Missing"), true);
        assert!(found.is_none() || found == Some(EntityId::EXTERNAL));
        assert!(ctx
            .unresolved()
            .contains(&UnresolvedSymbol::new("Missing", Some(main))));
    }

    #[test]
    fn test_context_merge_accumulates() {
        let mut first = ResolutionContext::new();
        first.record_unresolved("A", None);
        let mut second = ResolutionContext::new();
        second.record_unresolved("B", Some(EntityId(1)));

        first.merge(second);
        assert_eq!(first.unresolved().len(), 2);
        assert!(first.contains("A"));
        assert!(first.contains("B"));
    }
}
