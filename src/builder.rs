//! Graph builder - the ingestion contract consumed by parsers
//!
//! Per-language parsers drive this API with deterministic entity-creation
//! calls (start file, declare type, declare function, ...). A construction
//! stack tracks the current container: every `found_*` call attaches the
//! new entity under the innermost suitable scope, and `exit_entity` pops
//! when the parser leaves a declaration.

use crate::entity::expression::{ExprId, Expression};
use crate::entity::repo::EntityRepo;
use crate::entity::{
    AliasData, Entity, EntityId, EntityKind, FileData, FunctionCall, FunctionData, Location,
    TypeData, VarData,
};
use crate::lang::Import;
use crate::name::GenericName;
use crate::store::ExpressionStore;

/// Builds the entity tree file by file.
pub struct GraphBuilder {
    repo: EntityRepo,
    stack: Vec<EntityId>,
    current_file: Option<EntityId>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            repo: EntityRepo::new(),
            stack: Vec::new(),
            current_file: None,
        }
    }

    /// Builder whose repository evicts expression batches to `store`
    pub fn with_store(store: Box<dyn ExpressionStore>) -> Self {
        Self {
            repo: EntityRepo::new().with_store(store),
            stack: Vec::new(),
            current_file: None,
        }
    }

    /// Finish ingestion and hand over the repository
    pub fn build(self) -> EntityRepo {
        self.repo
    }

    pub fn repo(&self) -> &EntityRepo {
        &self.repo
    }

    pub fn repo_mut(&mut self) -> &mut EntityRepo {
        &mut self.repo
    }

    // ========== Construction stack ==========

    /// Innermost file/type/function on the stack
    pub fn latest_valid_container(&self) -> Option<EntityId> {
        self.stack
            .iter()
            .rev()
            .copied()
            .find(|&id| self.repo.get(id).is_some_and(|e| e.is_container()))
    }

    /// Innermost type on the stack
    pub fn current_type(&self) -> Option<EntityId> {
        self.stack
            .iter()
            .rev()
            .copied()
            .find(|&id| self.repo.get(id).is_some_and(|e| e.is_type()))
    }

    /// Innermost function on the stack
    pub fn current_function(&self) -> Option<EntityId> {
        self.stack
            .iter()
            .rev()
            .copied()
            .find(|&id| self.repo.get(id).is_some_and(|e| e.is_function()))
    }

    pub fn current_file(&self) -> Option<EntityId> {
        self.current_file
    }

    /// Leave the innermost declaration
    pub fn exit_entity(&mut self) {
        self.stack.pop();
    }

    // ========== Declarations ==========

    /// Start ingesting a file; the file becomes the current container
    pub fn start_file(&mut self, name: impl Into<String>) -> EntityId {
        let id = self.repo.generate_id();
        let file = Entity::new(
            id,
            GenericName::new(name.into()),
            EntityKind::File(FileData::default()),
        );
        let file_id = self.repo.add(file, None);
        self.stack.clear();
        self.stack.push(file_id);
        self.current_file = Some(file_id);
        file_id
    }

    /// Declare a type under the current container and enter it
    pub fn found_type(&mut self, raw_name: GenericName) -> EntityId {
        let parent = self.latest_valid_container();
        let id = self.repo.generate_id();
        let entity = Entity::new(id, raw_name, EntityKind::Type(TypeData::default()));
        let type_id = self.repo.add(entity, parent);
        if let Some(file) = parent.and_then(|p| self.repo.enclosing_file(p)) {
            if let Some(data) = self.repo.get_mut(file).and_then(|e| e.as_file_mut()) {
                data.declared_types.push(type_id);
            }
        }
        self.stack.push(type_id);
        type_id
    }

    /// Declare a function under the current container and enter it
    pub fn found_function(
        &mut self,
        raw_name: GenericName,
        return_type: Option<GenericName>,
        throw_types: Vec<GenericName>,
    ) -> EntityId {
        let parent = self.latest_valid_container();
        let id = self.repo.generate_id();
        let mut data = FunctionData::default();
        if let Some(ret) = return_type {
            data.return_type_names.push(ret);
        }
        data.throw_type_names = throw_types;
        let entity = Entity::new(id, raw_name, EntityKind::Function(data));
        let func_id = self.repo.add(entity, parent);
        if let Some(container) = parent {
            if let Some(data) = self
                .repo
                .get_mut(container)
                .and_then(|e| e.container_mut())
            {
                data.functions.push(func_id);
            }
        }
        self.stack.push(func_id);
        func_id
    }

    /// Mark the current function as an extension function
    pub fn mark_extension(&mut self) {
        if let Some(func) = self.current_function() {
            if let Some(data) = self.repo.get_mut(func).and_then(|e| e.as_function_mut()) {
                data.is_extension = true;
            }
        }
    }

    /// Declare a variable in the current container
    pub fn found_var(
        &mut self,
        raw_name: GenericName,
        raw_type: Option<GenericName>,
    ) -> Option<EntityId> {
        let Some(container) = self.latest_valid_container() else {
            tracing::warn!("var {} has no container, skipped", raw_name);
            return None;
        };
        tracing::debug!("var found: {}:{:?}", raw_name, raw_type.as_ref().map(|t| t.uniq_name()));
        let id = self.repo.generate_id();
        let entity = Entity::new(
            id,
            raw_name,
            EntityKind::Var(VarData {
                raw_type,
                ..Default::default()
            }),
        );
        let var_id = self.repo.add(entity, Some(container));
        if let Some(data) = self
            .repo
            .get_mut(container)
            .and_then(|e| e.container_mut())
        {
            data.vars.push(var_id);
        }
        Some(var_id)
    }

    /// Declare a parameter of the current function
    pub fn found_parameter(
        &mut self,
        raw_name: GenericName,
        raw_type: Option<GenericName>,
    ) -> Option<EntityId> {
        let function = self.current_function()?;
        let id = self.repo.generate_id();
        let entity = Entity::new(
            id,
            raw_name,
            EntityKind::Var(VarData {
                raw_type,
                ..Default::default()
            }),
        );
        let param_id = self.repo.add(entity, Some(function));
        if let Some(data) = self.repo.get_mut(function).and_then(|e| e.as_function_mut()) {
            data.parameters.push(param_id);
        }
        Some(param_id)
    }

    /// Record an import declaration on the current file
    pub fn found_import(&mut self, import: Import) {
        if let Some(file) = self.current_file {
            if let Some(data) = self.repo.get_mut(file).and_then(|e| e.as_file_mut()) {
                data.imports.push(import);
            }
        }
    }

    /// Declare an alias forwarding `alias_name` to `original_name`.
    /// Same-name aliases carry no information and are dropped.
    pub fn found_alias(
        &mut self,
        alias_name: GenericName,
        original_name: GenericName,
    ) -> Option<EntityId> {
        if alias_name == original_name {
            return None;
        }
        let parent = self.latest_valid_container();
        let id = self.repo.generate_id();
        let entity = Entity::new(
            id,
            alias_name,
            EntityKind::Alias(AliasData {
                refer_to_name: original_name,
            }),
        );
        Some(self.repo.add(entity, parent))
    }

    /// Record a mixin on the current container
    pub fn found_mixin(&mut self, module_name: GenericName) {
        if let Some(container) = self.latest_valid_container() {
            if let Some(data) = self
                .repo
                .get_mut(container)
                .and_then(|e| e.container_mut())
            {
                data.mixins.push(module_name);
            }
        }
    }

    /// Declare a generic type parameter on the current container
    pub fn found_type_parameter(&mut self, name: GenericName) {
        if let Some(container) = self.latest_valid_container() {
            if let Some(data) = self
                .repo
                .get_mut(container)
                .and_then(|e| e.container_mut())
            {
                data.type_parameters.push(name);
            }
        }
    }

    /// Record an inherited type on the current type
    pub fn found_extends(&mut self, type_name: GenericName) {
        let Some(current) = self.current_type() else {
            tracing::warn!("extends {} outside a type declaration", type_name);
            return;
        };
        if let Some(data) = self.repo.get_mut(current).and_then(|e| e.as_type_mut()) {
            data.inherits_names.push(type_name);
        }
    }

    /// Record an implemented type on the current type
    pub fn found_implements(&mut self, type_name: GenericName) {
        let Some(current) = self.current_type() else {
            tracing::warn!("implements {} outside a type declaration", type_name);
            return;
        };
        if let Some(data) = self.repo.get_mut(current).and_then(|e| e.as_type_mut()) {
            data.implements_names.push(type_name);
        }
    }

    /// Record a call observed on a declaration-less variable, feeding
    /// candidate-type inference
    pub fn found_call_on_var(&mut self, var: EntityId, call: FunctionCall) {
        if let Some(data) = self.repo.get_mut(var).and_then(|e| e.as_var_mut()) {
            data.calls.push(call);
        }
    }

    /// Set the source location of an entity
    pub fn set_location(&mut self, entity: EntityId, location: Location) {
        if let Some(e) = self.repo.get_mut(entity) {
            e.set_location(location);
        }
    }

    // ========== Expressions ==========

    /// New expression id from the shared generator
    pub fn new_expr_id(&mut self) -> ExprId {
        self.repo.generate_expr_id()
    }

    /// Expression owned by the current container, ready to fill in
    pub fn new_expression(&mut self) -> Option<Expression> {
        let container = self.latest_valid_container()?;
        let id = self.repo.generate_expr_id();
        Some(Expression::new(id, container))
    }

    /// Append an expression to its container's batch
    pub fn add_expression(&mut self, expression: Expression) {
        self.repo.add_expression(expression);
    }

    /// Attach `child` under `parent` within a container's batch
    pub fn set_expression_parent(&mut self, container: EntityId, child: ExprId, parent: ExprId) {
        if let Some(batch) = self.repo.batch_mut(container) {
            batch.set_parent(child, parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_determines_ownership() {
        let mut builder = GraphBuilder::new();
        let file = builder.start_file("src/a.x");
        let ty = builder.found_type(GenericName::new("Foo"));
        let func = builder.found_function(GenericName::new("bar"), Some(GenericName::new("Int")), vec![]);
        let param = builder.found_parameter(GenericName::new("n"), Some(GenericName::new("Int"))).unwrap();
        builder.exit_entity(); // bar
        builder.exit_entity(); // Foo

        let repo = builder.build();
        assert_eq!(repo.get(ty).unwrap().parent(), Some(file));
        assert_eq!(repo.get(func).unwrap().parent(), Some(ty));
        assert_eq!(repo.get(func).unwrap().qualified_name(), "src/a.x.Foo.bar");
        let func_data = repo.get(func).unwrap().as_function().unwrap();
        assert_eq!(func_data.parameters, vec![param]);
        let file_data = repo.get(file).unwrap().as_file().unwrap();
        assert_eq!(file_data.declared_types, vec![ty]);
    }

    #[test]
    fn test_same_name_alias_dropped() {
        let mut builder = GraphBuilder::new();
        builder.start_file("f");
        assert!(builder
            .found_alias(GenericName::new("A"), GenericName::new("A"))
            .is_none());
        assert!(builder
            .found_alias(GenericName::new("B"), GenericName::new("A"))
            .is_some());
    }

    #[test]
    fn test_expression_ingestion() {
        let mut builder = GraphBuilder::new();
        let file = builder.start_file("f");
        let expr = builder.new_expression().unwrap();
        let id = expr.id();
        builder.add_expression(expr);

        let repo = builder.build();
        assert_eq!(repo.batch(file).unwrap().len(), 1);
        assert!(repo.batch(file).unwrap().get(id).is_some());
        let data = repo.get(file).unwrap().container().unwrap();
        assert_eq!(data.expr_count, 1);
    }
}
