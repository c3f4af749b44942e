//! Expression trees - per-container expression batches
//!
//! Expressions are parsed syntactic units (calls, member accesses,
//! assignments, casts, ...) whose semantic type is resolved only after the
//! whole entity tree exists. Every link - parent expression, referred
//! entity, deduced-type back-links, owning container - is an integer id,
//! so a batch serialises losslessly to the side-store and reload
//! reconstructs every cross-reference from stored ids alone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{EntityId, Location};
use crate::name::GenericName;

/// Unique expression identifier, drawn from the same generator as entity
/// ids so side-store records never collide across containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub i32);

impl std::fmt::Display for ExprId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single expression node.
///
/// Forms a tree via parent links; `resolve_first` edges add ordering
/// constraints without changing the tree shape. The resolved type and the
/// referred entity are set at most once and never retracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expression {
    id: ExprId,
    /// Source text, kept for diagnostics and call deduction
    text: Option<String>,
    raw_type: Option<GenericName>,
    identifier: Option<GenericName>,
    is_set: bool,
    is_dot: bool,
    is_call: bool,
    is_logic: bool,
    is_create: bool,
    is_cast: bool,
    is_throw: bool,
    is_statement: bool,
    /// Whether this expression derives its type from a child
    derive_type_from_child: bool,
    /// The designated type-determining child; defaults to the first child
    /// to attach, overridden to the right-hand side for assignments
    deduce_type_based_id: Option<ExprId>,
    parent: Option<ExprId>,
    /// Expressions that must resolve before this one
    resolve_first: Vec<ExprId>,
    /// Vars whose type follows this expression's type
    deduced_type_vars: Vec<EntityId>,
    /// Functions whose return type follows this expression's type
    deduced_type_functions: Vec<EntityId>,
    /// Argument expressions when this expression is a call
    call_parameters: Vec<ExprId>,
    /// Explicit call-site type arguments when this expression is a call
    call_type_arguments: Vec<GenericName>,
    referred_entity: Option<EntityId>,
    expr_type: Option<EntityId>,
    /// Explicit context type overriding the lexical enclosing type
    context_type: Option<EntityId>,
    /// Every call parameter matched unambiguously during narrowing
    explicit_call_resolved: bool,
    container: EntityId,
    location: Location,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
}

impl Expression {
    /// Create an expression owned by `container`
    pub fn new(id: ExprId, container: EntityId) -> Self {
        Self {
            id,
            text: None,
            raw_type: None,
            identifier: None,
            is_set: false,
            is_dot: false,
            is_call: false,
            is_logic: false,
            is_create: false,
            is_cast: false,
            is_throw: false,
            is_statement: false,
            derive_type_from_child: true,
            deduce_type_based_id: None,
            parent: None,
            resolve_first: Vec::new(),
            deduced_type_vars: Vec::new(),
            deduced_type_functions: Vec::new(),
            call_parameters: Vec::new(),
            call_type_arguments: Vec::new(),
            referred_entity: None,
            expr_type: None,
            context_type: None,
            explicit_call_resolved: false,
            container,
            location: Location::default(),
        }
    }

    pub fn id(&self) -> ExprId {
        self.id
    }

    pub fn container(&self) -> EntityId {
        self.container
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    pub fn raw_type(&self) -> Option<&GenericName> {
        self.raw_type.as_ref()
    }

    /// Assign the raw type name; empty names are silently rejected
    pub fn set_raw_type(&mut self, name: GenericName) {
        if !valid_name(name.as_str()) {
            return;
        }
        self.raw_type = Some(name);
    }

    pub fn identifier(&self) -> Option<&GenericName> {
        self.identifier.as_ref()
    }

    /// Assign the identifier; empty names are silently rejected
    pub fn set_identifier(&mut self, name: GenericName) {
        if !valid_name(name.as_str()) {
            return;
        }
        self.identifier = Some(name);
    }

    pub fn clear_identifier(&mut self) {
        self.identifier = None;
    }

    // ========== Classification flags ==========

    pub fn is_set(&self) -> bool {
        self.is_set
    }

    pub fn set_set(&mut self, value: bool) {
        self.is_set = value;
    }

    pub fn is_dot(&self) -> bool {
        self.is_dot
    }

    pub fn set_dot(&mut self, value: bool) {
        self.is_dot = value;
    }

    pub fn is_call(&self) -> bool {
        self.is_call
    }

    pub fn set_call(&mut self, value: bool) {
        self.is_call = value;
    }

    pub fn is_logic(&self) -> bool {
        self.is_logic
    }

    pub fn set_logic(&mut self, value: bool) {
        self.is_logic = value;
    }

    pub fn is_create(&self) -> bool {
        self.is_create
    }

    pub fn set_create(&mut self, value: bool) {
        self.is_create = value;
    }

    pub fn is_cast(&self) -> bool {
        self.is_cast
    }

    pub fn set_cast(&mut self, value: bool) {
        self.is_cast = value;
    }

    pub fn is_throw(&self) -> bool {
        self.is_throw
    }

    pub fn set_throw(&mut self, value: bool) {
        self.is_throw = value;
    }

    pub fn is_statement(&self) -> bool {
        self.is_statement
    }

    pub fn set_statement(&mut self, value: bool) {
        self.is_statement = value;
    }

    // ========== Tree links and ordering ==========

    pub fn parent(&self) -> Option<ExprId> {
        self.parent
    }

    pub fn derive_type_from_child(&self) -> bool {
        self.derive_type_from_child
    }

    pub fn disable_derive_type_from_child(&mut self) {
        self.derive_type_from_child = false;
    }

    pub fn deduce_type_based_id(&self) -> Option<ExprId> {
        self.deduce_type_based_id
    }

    pub fn resolve_first(&self) -> &[ExprId] {
        &self.resolve_first
    }

    /// Require `other` to resolve before this expression
    pub fn add_resolve_first(&mut self, other: ExprId) {
        self.resolve_first.push(other);
    }

    // ========== Deduced-type back-links ==========

    pub fn deduced_type_vars(&self) -> &[EntityId] {
        &self.deduced_type_vars
    }

    /// Remember a var whose type follows this expression's type
    pub fn add_deduced_type_var(&mut self, var: EntityId) {
        self.deduced_type_vars.push(var);
    }

    pub fn deduced_type_functions(&self) -> &[EntityId] {
        &self.deduced_type_functions
    }

    /// Remember a function whose return type follows this expression's type
    pub fn add_deduced_type_function(&mut self, function: EntityId) {
        self.deduced_type_functions.push(function);
    }

    // ========== Call shape ==========

    pub fn call_parameters(&self) -> &[ExprId] {
        &self.call_parameters
    }

    pub fn add_call_parameter(&mut self, parameter: ExprId) {
        self.call_parameters.push(parameter);
    }

    pub fn call_type_arguments(&self) -> &[GenericName] {
        &self.call_type_arguments
    }

    pub fn add_call_type_argument(&mut self, argument: GenericName) {
        self.call_type_arguments.push(argument);
    }

    pub fn explicit_call_resolved(&self) -> bool {
        self.explicit_call_resolved
    }

    pub fn set_explicit_call_resolved(&mut self, value: bool) {
        self.explicit_call_resolved = value;
    }

    // ========== Resolution results ==========

    pub fn referred_entity(&self) -> Option<EntityId> {
        self.referred_entity
    }

    pub(crate) fn set_referred_entity(&mut self, entity: EntityId) {
        self.referred_entity = Some(entity);
    }

    pub fn expr_type(&self) -> Option<EntityId> {
        self.expr_type
    }

    /// First assignment wins; the type is never retracted
    pub(crate) fn assign_type(&mut self, expr_type: EntityId) -> bool {
        if self.expr_type.is_some() {
            return false;
        }
        self.expr_type = Some(expr_type);
        true
    }

    pub fn context_type(&self) -> Option<EntityId> {
        self.context_type
    }

    pub fn set_context_type(&mut self, context: EntityId) {
        self.context_type = Some(context);
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut props = String::new();
        for (flag, tag) in [
            (self.is_dot, "[dot]"),
            (self.is_set, "[set]"),
            (self.is_logic, "[bool]"),
            (self.is_call, "[call]"),
            (self.is_create, "[new]"),
            (self.is_throw, "[throw]"),
        ] {
            if flag {
                props.push_str(tag);
            }
        }
        write!(
            f,
            "[{}]|rawType:{}|identifier:{}|prop:{}",
            self.text.as_deref().unwrap_or(""),
            self.raw_type.as_ref().map(|n| n.uniq_name()).unwrap_or_default(),
            self.identifier.as_ref().map(|n| n.uniq_name()).unwrap_or_default(),
            props
        )
    }
}

/// A container's expression batch: expressions in insertion order plus an
/// id index. The index is rebuilt after deserialisation, never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpressionBatch {
    exprs: Vec<Expression>,
    #[serde(skip)]
    index: HashMap<ExprId, usize>,
}

impl ExpressionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an expression to the batch
    pub fn push(&mut self, expression: Expression) {
        self.index.insert(expression.id(), self.exprs.len());
        self.exprs.push(expression);
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn get(&self, id: ExprId) -> Option<&Expression> {
        self.index.get(&id).map(|&slot| &self.exprs[slot])
    }

    pub fn get_mut(&mut self, id: ExprId) -> Option<&mut Expression> {
        self.index.get(&id).copied().map(|slot| &mut self.exprs[slot])
    }

    /// Insertion position of an expression, the stable tie-break order
    pub fn position(&self, id: ExprId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Expression ids in insertion order
    pub fn ids(&self) -> Vec<ExprId> {
        self.exprs.iter().map(|e| e.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Expression> {
        self.exprs.iter()
    }

    /// Attach `child` under `parent`, updating the parent's designated
    /// type-determining child: the first child to attach wins, except that
    /// an assignment parent always follows its most recent (right-hand)
    /// side.
    pub fn set_parent(&mut self, child: ExprId, parent: ExprId) {
        if let Some(child_expr) = self.get_mut(child) {
            child_expr.parent = Some(parent);
        }
        if let Some(parent_expr) = self.get_mut(parent) {
            if parent_expr.deduce_type_based_id.is_none() || parent_expr.is_set {
                parent_expr.deduce_type_based_id = Some(child);
            }
        }
    }

    /// Rebuild the id index after deserialisation
    pub fn reindex(&mut self) {
        self.index = self
            .exprs
            .iter()
            .enumerate()
            .map(|(slot, expr)| (expr.id(), slot))
            .collect();
    }
}
