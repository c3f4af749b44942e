//! Expression resolution - per-container type inference
//!
//! Resolves one container's expression batch: expressions are visited in
//! dependency order (`resolve_first` edges, insertion order as tie-break),
//! each leaf binds its name against the enclosing scope, and resolved
//! types propagate upward through the expression tree. Member accesses on
//! a freshly-typed child look the member up on the child's type, including
//! extension functions and overload narrowing. Every successful binding
//! records one relation on the owning container, de-duplicated per
//! dot-chain.

use crate::entity::expression::{ExprId, ExpressionBatch};
use crate::entity::repo::EntityRepo;
use crate::entity::{EntityId, Relation, RelationKind};
use crate::name::GenericName;
use crate::topo::TopoGraph;
use crate::Result;

use super::{BindingResolver, ResolutionContext};

/// Batches beyond this size are skipped; pathological generated files
/// would otherwise dominate the whole run
const MAX_BATCH_EXPRESSIONS: usize = 10_000;

/// Resolve one container's expression batch, reloading it from the
/// side-store first when evicted and evicting it again afterwards when
/// configured to.
pub(crate) fn resolve_container(
    resolver: &BindingResolver,
    repo: &mut EntityRepo,
    ctx: &mut ResolutionContext,
    container: EntityId,
) -> Result<()> {
    repo.reload_batch(container)?;
    let Some(mut batch) = repo.take_batch(container) else {
        return Ok(());
    };

    // a function's trailing statements determine its deduced return type
    if repo.get(container).is_some_and(|e| e.is_function()) {
        link_return_to_statements(&mut batch, container);
    }

    if batch.len() > MAX_BATCH_EXPRESSIONS {
        tracing::debug!(
            container = container.0,
            size = batch.len(),
            "expression batch too large, skipped"
        );
        repo.put_batch(container, batch);
        return Ok(());
    }

    let mut graph = TopoGraph::new();
    for expr in batch.iter() {
        graph.add_node(expr.id());
    }
    for expr in batch.iter() {
        for &dep in expr.resolve_first() {
            if dep != expr.id() {
                graph.add_edge(dep, expr.id());
            }
        }
    }
    let mut order = Vec::with_capacity(batch.len());
    let mut cycle_members = Vec::new();
    graph.traverse(|id| order.push(id), |id| cycle_members.push(id));
    if !cycle_members.is_empty() {
        tracing::warn!(
            container = container.0,
            count = cycle_members.len(),
            "ordering cycle among expressions, resolving members directly"
        );
    }

    let mut pass = ExprPass {
        resolver,
        repo: &mut *repo,
        ctx: &mut *ctx,
        batch: &mut batch,
        container,
    };
    for id in order.into_iter().chain(cycle_members) {
        pass.resolve(id);
    }

    repo.put_batch(container, batch);
    if resolver.options().evict_after_resolve && repo.has_store() {
        repo.evict_batch(container)?;
    }
    Ok(())
}

/// Every statement expression of a function feeds the function's deduced
/// return type
fn link_return_to_statements(batch: &mut ExpressionBatch, function: EntityId) {
    let ids = batch.ids();
    for id in ids.into_iter().rev() {
        if batch.get(id).is_some_and(|e| e.is_statement()) {
            if let Some(expr) = batch.get_mut(id) {
                expr.add_deduced_type_function(function);
            }
        }
    }
}

/// One container's resolution pass: the batch is detached from the
/// repository, so scope lookups and expression mutation can interleave.
struct ExprPass<'a> {
    resolver: &'a BindingResolver,
    repo: &'a mut EntityRepo,
    ctx: &'a mut ResolutionContext,
    batch: &'a mut ExpressionBatch,
    container: EntityId,
}

impl ExprPass<'_> {
    fn resolve(&mut self, id: ExprId) {
        let (raw_type, identifier) = {
            let Some(expr) = self.batch.get(id) else { return };
            // dot expressions wait for their child's type to propagate up
            if expr.expr_type().is_some() || expr.is_dot() {
                return;
            }
            (expr.raw_type().cloned(), expr.identifier().cloned())
        };
        if raw_type.is_none() && identifier.is_none() {
            return;
        }

        if let Some(raw_type) = raw_type {
            let ty =
                self.resolver
                    .infer_type_from_name(self.repo, self.ctx, self.container, &raw_type);
            if let Some(ty) = ty {
                self.set_type(id, Some(ty), None);
            }
            if self.batch.get(id).is_some_and(|e| e.expr_type().is_some()) {
                return;
            }
        }
        let Some(identifier) = identifier else { return };

        // direct scope resolution, composing the dotted chain upward on
        // failure (`foo` alone may only bind as `foo.bar`)
        let mut composed = identifier.clone();
        let mut entity =
            self.resolver
                .resolve_name(self.repo, self.ctx, self.container, &composed, true);
        if entity.is_none() {
            let mut cursor = id;
            while let Some(parent_id) = self.batch.get(cursor).and_then(|e| e.parent()) {
                let Some(parent) = self.batch.get(parent_id) else { break };
                if !parent.is_dot() {
                    break;
                }
                let Some(member) = parent.identifier() else { break };
                composed = composed.join(member);
                entity = self.resolver.resolve_name(
                    self.repo,
                    self.ctx,
                    self.container,
                    &composed,
                    true,
                );
                if entity.is_some() {
                    break;
                }
                cursor = parent_id;
            }
        }

        let is_call = self.batch.get(id).is_some_and(|e| e.is_call());
        if let Some(entity) = entity {
            if is_call && self.resolver.options().delay_create_expression {
                self.reclassify_delayed_create(id, entity, &composed);
            }
            if is_call && self.is_callable(entity) {
                self.bind_functions(id, vec![entity]);
            } else {
                let ty = self.repo.type_of(entity);
                self.set_type(id, ty, Some(entity));
            }
            return;
        }

        // context scope first, then the lexical scope of the container
        let context = self.context_of(id);
        if let Some(context) = context {
            if let Some(found) =
                self.resolver
                    .resolve_name(self.repo, self.ctx, context, &identifier, false)
            {
                if let Some(ty) = self.repo.type_of(found) {
                    self.set_type(id, Some(ty), Some(found));
                    return;
                }
            }
        }
        if is_call {
            let scope = context.unwrap_or(self.container);
            let mut funcs =
                self.resolver
                    .lookup_functions_in_visible_scope(self.repo, scope, &identifier);
            if funcs.is_empty() && scope != self.container {
                funcs = self.resolver.lookup_functions_in_visible_scope(
                    self.repo,
                    self.container,
                    &identifier,
                );
            }
            self.bind_functions(id, funcs);
        } else {
            let var = context
                .and_then(|c| {
                    self.resolver
                        .lookup_var_in_visible_scope(self.repo, c, &identifier)
                })
                .or_else(|| {
                    self.resolver.lookup_var_in_visible_scope(
                        self.repo,
                        self.container,
                        &identifier,
                    )
                });
            if let Some(var) = var {
                let ty = self.repo.type_of(var);
                self.set_type(id, ty, Some(var));
            }
        }
    }

    /// A construction written as a plain call: the bound entity's type
    /// carries the very name that was called
    fn reclassify_delayed_create(&mut self, id: ExprId, entity: EntityId, composed: &GenericName) {
        let Some(ty) = self.repo.type_of(entity) else { return };
        let named_after_type = self
            .repo
            .get(ty)
            .is_some_and(|e| e.raw_name().as_str() == composed.as_str());
        if named_after_type {
            if let Some(expr) = self.batch.get_mut(id) {
                expr.set_create(true);
                expr.set_call(false);
            }
        }
    }

    fn is_callable(&self, entity: EntityId) -> bool {
        self.repo.get(entity).is_some_and(|e| {
            e.is_function()
                || e.as_multi_declare().is_some_and(|d| {
                    d.entities
                        .iter()
                        .any(|&m| self.repo.get(m).is_some_and(|m| m.is_function()))
                })
        })
    }

    /// Nearest explicit context type on the expression or its ancestors
    fn context_of(&self, id: ExprId) -> Option<EntityId> {
        let mut current = Some(id);
        while let Some(expr_id) = current {
            let expr = self.batch.get(expr_id)?;
            if let Some(context) = expr.context_type() {
                return Some(context);
            }
            current = expr.parent();
        }
        None
    }

    // ========== Type assignment and upward propagation ==========

    /// Assign a type (and referred entity) to an expression, then push the
    /// type up the expression tree as far as parents derive from this
    /// child.
    fn set_type(&mut self, id: ExprId, ty: Option<EntityId>, referred: Option<EntityId>) {
        let mut current = id;
        let mut ty = ty;
        let mut referred = referred;
        loop {
            let changed = self.apply_type(current, ty, referred);
            if !changed {
                break;
            }
            let Some(child_type) = self.batch.get(current).and_then(|e| e.expr_type()) else {
                break;
            };
            let Some(parent_id) = self.batch.get(current).and_then(|e| e.parent()) else {
                break;
            };
            let Some(parent) = self.batch.get(parent_id) else { break };
            if parent.expr_type().is_some()
                || !parent.derive_type_from_child()
                || parent.deduce_type_based_id() != Some(current)
            {
                break;
            }
            if child_type == EntityId::BUILT_IN {
                current = parent_id;
                ty = Some(EntityId::BUILT_IN);
                referred = Some(EntityId::BUILT_IN);
                continue;
            }
            if parent.is_logic() {
                // comparisons and boolean operators are built-in typed
                current = parent_id;
                ty = Some(EntityId::BUILT_IN);
                referred = None;
                continue;
            }
            if parent.is_dot() {
                self.deduce_dot_parent(parent_id, child_type);
                break;
            }
            // other composite parents inherit the child's type verbatim
            current = parent_id;
            ty = Some(child_type);
            referred = None;
        }
    }

    /// Write type/referred onto one expression. Returns whether the type
    /// actually changed; deduced-type back-links and relation recording
    /// fire exactly once.
    fn apply_type(&mut self, id: ExprId, ty: Option<EntityId>, referred: Option<EntityId>) -> bool {
        let mut newly_referred = None;
        let mut changed = false;
        {
            let Some(expr) = self.batch.get_mut(id) else {
                return false;
            };
            if let Some(referred) = referred {
                if expr.referred_entity().is_none() {
                    expr.set_referred_entity(referred);
                    newly_referred = Some(referred);
                }
            }
            if let Some(ty) = ty {
                changed = expr.assign_type(ty);
            }
            // a typed expression with no binding refers to the type itself
            if expr.referred_entity().is_none() {
                if let Some(fallback) = expr.expr_type() {
                    expr.set_referred_entity(fallback);
                    newly_referred = Some(fallback);
                }
            }
        }
        if changed {
            self.propagate_deduced_types(id);
        }
        if let Some(target) = newly_referred {
            self.record_relation(id, target);
        }
        changed
    }

    /// Vars and functions that deduce their type from this expression
    fn propagate_deduced_types(&mut self, id: ExprId) {
        let Some(expr) = self.batch.get(id) else { return };
        let Some(ty) = expr.expr_type() else { return };
        let vars = expr.deduced_type_vars().to_vec();
        let funcs = expr.deduced_type_functions().to_vec();
        for var in vars {
            if let Some(data) = self.repo.get_mut(var).and_then(|e| e.as_var_mut()) {
                if data.var_type.is_none() {
                    data.var_type = Some(ty);
                }
            }
        }
        for func in funcs {
            self.add_return_type(func, ty);
        }
    }

    fn add_return_type(&mut self, func: EntityId, ty: EntityId) {
        let raw = self.repo.get(ty).map(|e| e.raw_name().clone());
        let Some(data) = self.repo.get_mut(func).and_then(|e| e.as_function_mut()) else {
            return;
        };
        if !data.return_types.contains(&ty) {
            data.return_types.push(ty);
            if let Some(raw) = raw {
                if !data.return_type_names.contains(&raw) {
                    data.return_type_names.push(raw);
                }
            }
        }
    }

    // ========== Member deduction on dot parents ==========

    /// The child of a dot expression got its type; bind the member named
    /// by the parent against that type (candidate-typed children search
    /// every candidate).
    fn deduce_dot_parent(&mut self, parent_id: ExprId, child_type: EntityId) {
        if child_type == EntityId::EXTERNAL || child_type == EntityId::GENERIC_PARAMETER {
            return;
        }
        let Some(member) = self
            .batch
            .get(parent_id)
            .and_then(|e| e.identifier().cloned())
        else {
            self.set_type(parent_id, Some(child_type), None);
            return;
        };
        let is_call = self.batch.get(parent_id).is_some_and(|e| e.is_call());

        let targets = self
            .repo
            .get(child_type)
            .and_then(|e| e.as_type())
            .filter(|d| !d.candidate_types.is_empty())
            .map(|d| d.candidate_types.clone())
            .unwrap_or_else(|| vec![child_type]);

        for target in targets {
            if is_call {
                if self.bind_member_call(parent_id, target, &member) {
                    return;
                }
            } else {
                if let Some(var) = self
                    .resolver
                    .lookup_var_in_visible_scope(self.repo, target, &member)
                {
                    let ty = self.repo.type_of(var);
                    self.set_type(parent_id, ty, Some(var));
                    return;
                }
                // property-style access through a function
                if self.bind_member_call(parent_id, target, &member) {
                    return;
                }
            }
        }
        // last resort: infer a type purely from the member name
        let ty = self
            .resolver
            .infer_type_from_name(self.repo, self.ctx, child_type, &member);
        if let Some(ty) = ty {
            self.set_type(parent_id, Some(ty), None);
        }
    }

    fn bind_member_call(&mut self, id: ExprId, target_type: EntityId, member: &GenericName) -> bool {
        let mut funcs = self
            .resolver
            .lookup_functions_in_visible_scope(self.repo, target_type, member);
        if let Some(ext) =
            self.resolver
                .lookup_extension_function(self.repo, self.container, target_type, member)
        {
            if !funcs.contains(&ext) {
                funcs.push(ext);
            }
        }
        if funcs.is_empty() {
            return false;
        }
        self.bind_functions(id, funcs);
        true
    }

    // ========== Call binding, narrowing and generic substitution ==========

    /// Bind a call (or function reference) to the best of the found
    /// functions. Overload groups expand into their members and narrow by
    /// argument arity and type; an ambiguous call binds the whole group.
    fn bind_functions(&mut self, id: ExprId, funcs: Vec<EntityId>) {
        let Some(&first) = funcs.first() else { return };
        let mut candidates = funcs.clone();
        // the name may bind to one member carrying a back-link to its
        // group, or to the aggregate itself (registry and import lookups
        // return the group entity)
        let group = if self
            .repo
            .get(first)
            .is_some_and(|e| e.as_multi_declare().is_some())
        {
            candidates.retain(|&c| c != first);
            Some(first)
        } else {
            self.repo.get(first).and_then(|e| e.multi_declare())
        };
        if let Some(group) = group {
            let members = self
                .repo
                .get(group)
                .and_then(|e| e.as_multi_declare())
                .map(|d| d.entities.clone())
                .unwrap_or_default();
            for member in members {
                if self.repo.get(member).is_some_and(|e| e.is_function())
                    && !candidates.contains(&member)
                {
                    candidates.push(member);
                }
            }
        }
        let Some(&lead) = candidates.first() else { return };
        let is_call = self.batch.get(id).is_some_and(|e| e.is_call());

        let selected = if is_call && candidates.len() > 1 {
            self.narrow_call(id, &candidates)
        } else {
            None
        };
        match selected {
            Some(func) => {
                let ret = self.resolve_call_return(id, func);
                let ty = ret.or_else(|| self.repo.type_of(func));
                self.set_type(id, ty, Some(func));
            }
            None if candidates.len() > 1 => {
                let bound = group.unwrap_or(lead);
                let ty = self.repo.type_of(bound);
                self.set_type(id, ty, Some(bound));
            }
            None => {
                let ret = if is_call {
                    self.resolve_call_return(id, lead)
                } else {
                    None
                };
                let ty = ret.or_else(|| self.repo.type_of(lead));
                self.set_type(id, ty, Some(lead));
            }
        }
    }

    /// Narrow overload candidates by the call shape: a unique candidate
    /// whose every parameter matches the argument types wins, else a
    /// unique arity match, else nothing.
    fn narrow_call(&mut self, id: ExprId, candidates: &[EntityId]) -> Option<EntityId> {
        let call_params = self
            .batch
            .get(id)
            .map(|e| e.call_parameters().to_vec())
            .unwrap_or_default();
        let arg_type_names: Vec<Option<String>> = call_params
            .iter()
            .map(|&param| {
                self.batch
                    .get(param)
                    .and_then(|e| e.expr_type())
                    .and_then(|ty| self.repo.get(ty))
                    .map(|e| e.raw_name().as_str().to_string())
            })
            .collect();

        let mut arity_matches = Vec::new();
        let mut full_matches = Vec::new();
        for &candidate in candidates {
            let Some(entity) = self.repo.get(candidate) else { continue };
            let Some(data) = entity.as_function() else { continue };
            if data.parameters.len() != call_params.len() {
                continue;
            }
            arity_matches.push(candidate);
            let generic_params: Vec<String> = entity
                .generic_parameters()
                .iter()
                .map(|n| n.as_str().to_string())
                .collect();
            let all_match = data
                .parameters
                .iter()
                .zip(arg_type_names.iter())
                .all(|(&param, arg)| {
                    let need = self
                        .repo
                        .get(param)
                        .and_then(|p| p.as_var())
                        .and_then(|v| v.raw_type.clone());
                    match need {
                        None => true,
                        Some(need) if generic_params.contains(&need.as_str().to_string()) => true,
                        Some(need) => arg.as_deref() == Some(need.as_str()),
                    }
                });
            if all_match {
                full_matches.push(candidate);
            }
        }
        if full_matches.len() == 1 {
            return full_matches.first().copied();
        }
        if arity_matches.len() == 1 {
            return arity_matches.first().copied();
        }
        None
    }

    /// Resolve the concrete return type of a call against one function,
    /// binding generic parameters from explicit type arguments and from
    /// argument types. Marks the call explicitly resolved when every
    /// parameter matched unambiguously.
    fn resolve_call_return(&mut self, id: ExprId, func: EntityId) -> Option<EntityId> {
        let entity = self.repo.get(func)?;
        let data = entity.as_function()?;
        let generic_params: Vec<String> = entity
            .generic_parameters()
            .iter()
            .map(|n| n.as_str().to_string())
            .collect();
        let parameters = data.parameters.clone();
        let first_return_name = data.return_type_names.first().cloned();

        let (call_params, type_args) = {
            let expr = self.batch.get(id)?;
            (
                expr.call_parameters().to_vec(),
                expr.call_type_arguments().to_vec(),
            )
        };

        let mut bindings: std::collections::HashMap<String, EntityId> =
            std::collections::HashMap::new();
        if !generic_params.is_empty() && type_args.len() == generic_params.len() {
            for (param, arg) in generic_params.iter().zip(type_args.iter()) {
                if let Some(ty) =
                    self.resolver
                        .infer_type_from_name(self.repo, self.ctx, self.container, arg)
                {
                    bindings.insert(param.clone(), ty);
                }
            }
        }

        let mut all_matched = parameters.len() == call_params.len();
        if parameters.len() == call_params.len() {
            for (&param, &call_param) in parameters.iter().zip(call_params.iter()) {
                let need = self
                    .repo
                    .get(param)
                    .and_then(|p| p.as_var())
                    .and_then(|v| v.raw_type.clone());
                let arg_type = self.batch.get(call_param).and_then(|e| e.expr_type());
                let Some(need) = need else { continue };
                if generic_params.contains(&need.as_str().to_string()) {
                    if let Some(arg_type) = arg_type {
                        if !arg_type.is_sentinel() {
                            bindings.entry(need.as_str().to_string()).or_insert(arg_type);
                        }
                    }
                    continue;
                }
                let matched = arg_type
                    .and_then(|ty| self.repo.get(ty))
                    .is_some_and(|e| e.raw_name().as_str() == need.as_str());
                if !matched {
                    all_matched = false;
                }
            }
        }
        if all_matched {
            if let Some(expr) = self.batch.get_mut(id) {
                expr.set_explicit_call_resolved(true);
            }
        }

        let name = first_return_name?;
        bindings.get(name.as_str()).copied()
    }

    // ========== Relation recording ==========

    /// Record one relation on the owning container for a successful
    /// binding. A dot-chain records the relation once: the first
    /// expression of the chain to bind a given target wins.
    fn record_relation(&mut self, id: ExprId, target: EntityId) {
        let target = self.repo.actual(target);
        if target.is_sentinel() {
            return;
        }
        let kind = {
            let Some(expr) = self.batch.get(id) else { return };
            if expr.is_create() {
                RelationKind::Create
            } else if expr.is_call() {
                RelationKind::Call
            } else if expr.is_cast() {
                RelationKind::Cast
            } else if expr.is_throw() {
                RelationKind::Throw
            } else if expr.is_set() {
                RelationKind::Set
            } else {
                RelationKind::Use
            }
        };
        let key = format!("{}#{}", kind.as_str(), target.0);
        let recorded = self
            .repo
            .get(self.container)
            .and_then(|e| e.container())
            .and_then(|d| d.relation_sources.get(&key).cloned())
            .unwrap_or_default();
        if recorded.iter().any(|&other| self.same_chain(id, other)) {
            return;
        }
        if let Some(entity) = self.repo.get_mut(self.container) {
            entity.add_relation(Relation::new(kind, target));
            if let Some(data) = entity.container_mut() {
                data.relation_sources.entry(key).or_default().push(id);
            }
        }
    }

    /// Whether one expression is an ancestor of the other
    fn same_chain(&self, a: ExprId, b: ExprId) -> bool {
        for (from, to) in [(a, b), (b, a)] {
            let mut current = Some(from);
            while let Some(expr_id) = current {
                if expr_id == to {
                    return true;
                }
                current = self.batch.get(expr_id).and_then(|e| e.parent());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::entity::FunctionCall;
    use crate::lang::{NullBuiltIn, QualifiedImportLookup, StaticBuiltIns};
    use crate::name::GenericName;
    use crate::resolve::{BindingResolver, ResolveOptions};
    use crate::store::MemoryStore;

    fn resolver() -> BindingResolver {
        BindingResolver::new(Box::new(QualifiedImportLookup), Box::new(NullBuiltIn))
    }

    /// `a.x` declares `Int` and `Foo { bar(): Int }`; `b.x` imports `Foo`,
    /// declares `main { var foo: Foo; foo.bar() }`
    fn cross_file_fixture() -> (EntityRepo, EntityId, ExprId, ExprId) {
        let mut builder = GraphBuilder::new();
        builder.start_file("a.x");
        builder.found_type(GenericName::new("Int"));
        builder.exit_entity();
        builder.found_type(GenericName::new("Foo"));
        builder.found_function(GenericName::new("bar"), Some(GenericName::new("Int")), vec![]);
        builder.exit_entity();
        builder.exit_entity();

        builder.start_file("b.x");
        builder.found_import(crate::lang::Import::symbol("a.x.Foo"));
        let main = builder.found_function(GenericName::new("main"), None, vec![]);
        builder.found_var(GenericName::new("foo"), Some(GenericName::new("Foo")));

        let mut receiver = builder.new_expression().unwrap();
        receiver.set_identifier(GenericName::new("foo"));
        let receiver_id = receiver.id();
        let mut call = builder.new_expression().unwrap();
        call.set_dot(true);
        call.set_call(true);
        call.set_identifier(GenericName::new("bar"));
        let call_id = call.id();
        builder.add_expression(receiver);
        builder.add_expression(call);
        builder.set_expression_parent(main, receiver_id, call_id);
        builder.exit_entity();

        (builder.build(), main, receiver_id, call_id)
    }

    #[test]
    fn test_cross_file_member_call_resolves() {
        let (mut repo, main, receiver_id, call_id) = cross_file_fixture();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        let foo_type = repo.get_by_name("a.x.Foo").unwrap();
        let int_type = repo.get_by_name("a.x.Int").unwrap();
        let bar = repo.get_by_name("a.x.Foo.bar").unwrap();

        let batch = repo.batch(main).unwrap();
        assert_eq!(batch.get(receiver_id).unwrap().expr_type(), Some(foo_type));
        assert_eq!(batch.get(call_id).unwrap().expr_type(), Some(int_type));
        assert_eq!(batch.get(call_id).unwrap().referred_entity(), Some(bar));

        let relations = repo.get(main).unwrap().relations();
        assert!(relations
            .iter()
            .any(|r| r.kind == RelationKind::Call && r.target == bar));
        assert!(ctx.unresolved().is_empty());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let (mut repo, main, _, call_id) = cross_file_fixture();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();
        let relations_after_first = repo.get(main).unwrap().relations().len();
        let type_after_first = repo.batch(main).unwrap().get(call_id).unwrap().expr_type();

        resolver.resolve_all(&mut repo, &mut ctx).unwrap();
        assert_eq!(repo.get(main).unwrap().relations().len(), relations_after_first);
        assert_eq!(
            repo.batch(main).unwrap().get(call_id).unwrap().expr_type(),
            type_after_first
        );
    }

    #[test]
    fn test_extension_function_binds_to_receiver_type() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Data"));
        builder.exit_entity();
        builder.found_function(GenericName::new("describe"), None, vec![]);
        builder.mark_extension();
        builder.found_parameter(GenericName::new("d"), Some(GenericName::new("Data")));
        builder.exit_entity();
        let main = builder.found_function(GenericName::new("main"), None, vec![]);
        builder.found_var(GenericName::new("x"), Some(GenericName::new("Data")));

        let mut receiver = builder.new_expression().unwrap();
        receiver.set_identifier(GenericName::new("x"));
        let receiver_id = receiver.id();
        let mut call = builder.new_expression().unwrap();
        call.set_dot(true);
        call.set_call(true);
        call.set_identifier(GenericName::new("describe"));
        let call_id = call.id();
        builder.add_expression(receiver);
        builder.add_expression(call);
        builder.set_expression_parent(main, receiver_id, call_id);
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        let describe = repo.get_by_name("f.x.describe").unwrap();
        let batch = repo.batch(main).unwrap();
        assert_eq!(batch.get(call_id).unwrap().referred_entity(), Some(describe));
    }

    #[test]
    fn test_overload_narrowed_by_arity_and_argument_type() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Int"));
        builder.exit_entity();
        builder.found_function(GenericName::new("run"), None, vec![]);
        builder.exit_entity();
        let run_int =
            builder.found_function(GenericName::new("run"), Some(GenericName::new("Int")), vec![]);
        builder.found_parameter(GenericName::new("n"), Some(GenericName::new("Int")));
        builder.exit_entity();
        let main = builder.found_function(GenericName::new("main"), None, vec![]);

        let mut arg = builder.new_expression().unwrap();
        arg.set_raw_type(GenericName::new("Int"));
        let arg_id = arg.id();
        let mut call = builder.new_expression().unwrap();
        call.set_call(true);
        call.set_identifier(GenericName::new("run"));
        call.add_call_parameter(arg_id);
        call.add_resolve_first(arg_id);
        let call_id = call.id();
        builder.add_expression(arg);
        builder.add_expression(call);
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        let int_type = repo.get_by_name("f.x.Int").unwrap();
        let batch = repo.batch(main).unwrap();
        let call_expr = batch.get(call_id).unwrap();
        assert_eq!(call_expr.referred_entity(), Some(run_int));
        assert_eq!(call_expr.expr_type(), Some(int_type));
        assert!(call_expr.explicit_call_resolved());
    }

    #[test]
    fn test_call_through_name_index_aggregate_still_narrows() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Int"));
        builder.exit_entity();
        builder.found_function(GenericName::new("run"), None, vec![]);
        builder.exit_entity();
        let run_int =
            builder.found_function(GenericName::new("run"), Some(GenericName::new("Int")), vec![]);
        builder.found_parameter(GenericName::new("n"), Some(GenericName::new("Int")));
        builder.exit_entity();
        let main = builder.found_function(GenericName::new("main"), None, vec![]);

        let mut arg = builder.new_expression().unwrap();
        arg.set_raw_type(GenericName::new("Int"));
        let arg_id = arg.id();
        let mut call = builder.new_expression().unwrap();
        call.set_call(true);
        // an absolute name binds through the name index, which returns the
        // multi-declaration group rather than one overload
        call.set_identifier(GenericName::new(".f.x.run"));
        call.add_call_parameter(arg_id);
        call.add_resolve_first(arg_id);
        let call_id = call.id();
        builder.add_expression(arg);
        builder.add_expression(call);
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        let int_type = repo.get_by_name("f.x.Int").unwrap();
        let batch = repo.batch(main).unwrap();
        let call_expr = batch.get(call_id).unwrap();
        assert_eq!(call_expr.referred_entity(), Some(run_int));
        assert_eq!(call_expr.expr_type(), Some(int_type));
    }

    #[test]
    fn test_candidate_type_from_observed_calls() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Socket"));
        builder.found_function(GenericName::new("send"), None, vec![]);
        builder.exit_entity();
        builder.found_function(GenericName::new("close"), None, vec![]);
        builder.exit_entity();
        builder.exit_entity();
        builder.found_type(GenericName::new("Logger"));
        builder.found_function(GenericName::new("close"), None, vec![]);
        builder.exit_entity();
        builder.exit_entity();
        builder.found_function(GenericName::new("main"), None, vec![]);
        let var = builder.found_var(GenericName::new("s"), None).unwrap();
        builder.found_call_on_var(var, FunctionCall::new("send", 1));
        builder.found_call_on_var(var, FunctionCall::new("close", 0));
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        // only Socket's method set covers both send and close
        let socket = repo.get_by_name("f.x.Socket").unwrap();
        let data = repo.get(var).unwrap().as_var().unwrap();
        assert_eq!(data.var_type, Some(socket));
    }

    #[test]
    fn test_built_in_names_never_reported_unresolved() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_function(GenericName::new("main"), None, vec![]);
        builder.found_var(GenericName::new("n"), Some(GenericName::new("Int")));
        builder.found_var(GenericName::new("m"), Some(GenericName::new("Mystery")));
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = BindingResolver::new(
            Box::new(QualifiedImportLookup),
            Box::new(StaticBuiltIns::new(["Int"], Vec::<String>::new())),
        );
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        assert!(!ctx.contains("Int"));
        assert!(ctx.contains("Mystery"));
    }

    #[test]
    fn test_statements_deduce_function_return_type() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Int"));
        builder.exit_entity();
        let func = builder.found_function(GenericName::new("answer"), None, vec![]);
        let mut stmt = builder.new_expression().unwrap();
        stmt.set_raw_type(GenericName::new("Int"));
        stmt.set_statement(true);
        builder.add_expression(stmt);
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        let int_type = repo.get_by_name("f.x.Int").unwrap();
        let data = repo.get(func).unwrap().as_function().unwrap();
        assert_eq!(data.return_types, vec![int_type]);
        assert_eq!(repo.type_of(func), Some(int_type));
    }

    #[test]
    fn test_eviction_after_resolution_roundtrips() {
        let mut builder = GraphBuilder::with_store(Box::new(MemoryStore::new()));
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Int"));
        builder.exit_entity();
        let main = builder.found_function(GenericName::new("main"), None, vec![]);
        let mut expr = builder.new_expression().unwrap();
        expr.set_raw_type(GenericName::new("Int"));
        let expr_id = expr.id();
        builder.add_expression(expr);
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver().with_options(ResolveOptions {
            delay_create_expression: false,
            evict_after_resolve: true,
        });
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        // the batch went to the side-store during resolution
        assert!(repo.batch(main).is_none());
        repo.reload_batch(main).unwrap();
        let int_type = repo.get_by_name("f.x.Int").unwrap();
        assert_eq!(
            repo.batch(main).unwrap().get(expr_id).unwrap().expr_type(),
            Some(int_type)
        );
    }

    #[test]
    fn test_generic_return_substitutes_argument_type() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Int"));
        builder.exit_entity();
        builder.found_function(GenericName::new("identity"), Some(GenericName::new("T")), vec![]);
        builder.found_type_parameter(GenericName::new("T"));
        builder.found_parameter(GenericName::new("x"), Some(GenericName::new("T")));
        builder.exit_entity();
        let main = builder.found_function(GenericName::new("main"), None, vec![]);

        let mut arg = builder.new_expression().unwrap();
        arg.set_raw_type(GenericName::new("Int"));
        let arg_id = arg.id();
        let mut call = builder.new_expression().unwrap();
        call.set_call(true);
        call.set_identifier(GenericName::new("identity"));
        call.add_call_parameter(arg_id);
        call.add_resolve_first(arg_id);
        let call_id = call.id();
        builder.add_expression(arg);
        builder.add_expression(call);
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver();
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        // identity's declared return is the generic parameter T; the call
        // binds T to the argument's type
        let int_type = repo.get_by_name("f.x.Int").unwrap();
        let batch = repo.batch(main).unwrap();
        let call_expr = batch.get(call_id).unwrap();
        assert_eq!(call_expr.expr_type(), Some(int_type));
        assert!(call_expr.explicit_call_resolved());
    }

    #[test]
    fn test_delayed_create_reclassifies_constructor_call() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f.x");
        builder.found_type(GenericName::new("Point"));
        builder.exit_entity();
        let main = builder.found_function(GenericName::new("main"), None, vec![]);
        let mut call = builder.new_expression().unwrap();
        call.set_call(true);
        call.set_identifier(GenericName::new("Point"));
        let call_id = call.id();
        builder.add_expression(call);
        builder.exit_entity();

        let mut repo = builder.build();
        let resolver = resolver().with_options(ResolveOptions {
            delay_create_expression: true,
            evict_after_resolve: false,
        });
        let mut ctx = ResolutionContext::new();
        resolver.resolve_all(&mut repo, &mut ctx).unwrap();

        let point = repo.get_by_name("f.x.Point").unwrap();
        let batch = repo.batch(main).unwrap();
        assert!(batch.get(call_id).unwrap().is_create());
        // reclassification flips the expression from call to construction
        assert!(!batch.get(call_id).unwrap().is_call());
        let relations = repo.get(main).unwrap().relations();
        assert!(relations
            .iter()
            .any(|r| r.kind == RelationKind::Create && r.target == point));
    }
}
