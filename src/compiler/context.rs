//! Compile-time scope records.
//!
//! One [`Context`] exists per program, function, block, catch clause and
//! `with` body. Contexts live in a [`ContextGraph`] arena and point at their
//! parent by [`ContextId`]; the graph is keyed by the syntax node that opened
//! the scope.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::parser::ast::NodeId;

pub type ContextId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextType {
    Global,
    Module,
    Eval,
    Function,
    Block,
    Catch,
    With,
}

impl ContextType {
    /// Block-like contexts do not own `var` declarations; those hoist outward.
    pub fn is_block_like(&self) -> bool {
        matches!(self, ContextType::Block | ContextType::Catch | ContextType::With)
    }
}

/// Ordered: a later kind of declaration upgrades an earlier one of the same
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MemberType {
    Undefined,
    ThisFunctionName,
    VariableDefinition,
    VariableDeclaration,
    FunctionDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VariableScope {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UsesArgumentsObject {
    Unknown,
    Used,
    NotUsed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub member_type: MemberType,
    pub scope: VariableScope,
    /// Slot in the heap locals or on the stack, see
    /// [`Context::compute_requirements`].
    pub index: usize,
    pub can_escape: bool,
    /// Node of the function bound by a `FunctionDefinition` member.
    pub function: Option<NodeId>,
}

impl Member {
    pub fn is_lexically_scoped(&self) -> bool {
        self.scope != VariableScope::Var
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Context {
    pub id: ContextId,
    pub node: NodeId,
    pub context_type: ContextType,
    pub parent: Option<ContextId>,
    pub children: Vec<ContextId>,
    pub name: Option<String>,
    /// Names of the formals that are plain identifiers, in order.
    pub arguments: Vec<String>,
    pub formals_are_simple: bool,
    /// Names bound by a `catch` clause; a `var` of the same name is allowed.
    pub caught_variables: Vec<String>,
    pub members: IndexMap<String, Member>,
    pub used_variables: IndexSet<String>,
    pub is_strict: bool,
    pub has_direct_eval: bool,
    pub has_with: bool,
    pub has_try: bool,
    pub uses_this: bool,
    pub uses_arguments_object: UsesArgumentsObject,
    pub is_arrow: bool,
    pub is_generator: bool,
    pub has_nested_functions: bool,
    pub max_number_of_arguments: usize,
    pub requires_execution_context: bool,
    pub arguments_can_escape: bool,
    pub all_vars_escape: bool,
    pub heap_local_count: usize,
    pub stack_local_count: usize,
    pub line: usize,
    pub column: usize,
}

impl Context {
    fn new(id: ContextId, node: NodeId, context_type: ContextType, parent: Option<ContextId>) -> Self {
        Context {
            id,
            node,
            context_type,
            parent,
            children: vec![],
            name: None,
            arguments: vec![],
            formals_are_simple: true,
            caught_variables: vec![],
            members: IndexMap::new(),
            used_variables: IndexSet::new(),
            is_strict: false,
            has_direct_eval: false,
            has_with: false,
            has_try: false,
            uses_this: false,
            uses_arguments_object: UsesArgumentsObject::Unknown,
            is_arrow: false,
            is_generator: false,
            has_nested_functions: false,
            max_number_of_arguments: 0,
            requires_execution_context: false,
            arguments_can_escape: false,
            all_vars_escape: false,
            heap_local_count: 0,
            stack_local_count: 0,
            line: 0,
            column: 0,
        }
    }

    pub fn find_member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn is_formal(&self, name: &str) -> bool {
        self.arguments.iter().any(|a| a == name)
    }

    pub fn find_argument(&self, name: &str) -> Option<usize> {
        self.arguments.iter().position(|a| a == name)
    }

    pub fn add_used_variable(&mut self, name: &str) {
        self.used_variables.insert(name.to_string());
    }

    pub fn note_argument_count(&mut self, argc: usize) {
        self.max_number_of_arguments = self.max_number_of_arguments.max(argc);
    }

    /// Assigns member slots. Escaping members of a context that needs a heap
    /// frame get heap local slots, everything else lives on the stack.
    pub fn compute_requirements(&mut self) {
        let mut heap = 0;
        let mut stack = 0;
        let heap_backed = self.requires_execution_context;
        for m in self.members.values_mut() {
            if heap_backed && m.can_escape {
                m.index = heap;
                heap += 1;
            } else {
                m.index = stack;
                stack += 1;
            }
        }
        self.heap_local_count = heap;
        self.stack_local_count = stack;
    }

    pub fn escaping_members(&self) -> impl Iterator<Item = (&String, &Member)> {
        self.members.iter().filter(|(_, m)| m.can_escape)
    }
}

/// Arena of every context of one compilation unit.
#[derive(Debug, Default, Serialize)]
pub struct ContextGraph {
    contexts: Vec<Context>,
    #[serde(skip)]
    by_node: HashMap<NodeId, ContextId>,
}

impl ContextGraph {
    pub fn new() -> Self {
        ContextGraph {
            contexts: vec![],
            by_node: HashMap::new(),
        }
    }

    /// Creates a context for `node`, or returns the existing one. Strictness
    /// is inherited from the parent.
    pub fn new_context(&mut self, node: NodeId, context_type: ContextType, parent: Option<ContextId>) -> ContextId {
        if let Some(id) = self.by_node.get(&node) {
            return *id;
        }
        let id = self.contexts.len();
        let mut c = Context::new(id, node, context_type, parent);
        if let Some(p) = parent {
            c.is_strict = self.contexts[p].is_strict;
            self.contexts[p].children.push(id);
        }
        self.contexts.push(c);
        self.by_node.insert(node, id);
        id
    }

    pub fn root(&self) -> Option<&Context> {
        self.contexts.first()
    }

    pub fn get(&self, id: ContextId) -> &Context {
        &self.contexts[id]
    }

    pub fn get_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.contexts[id]
    }

    pub fn context_for_node(&self, node: NodeId) -> Option<&Context> {
        self.by_node.get(&node).map(|id| &self.contexts[*id])
    }

    pub fn parent(&self, id: ContextId) -> Option<&Context> {
        self.contexts[id].parent.map(|p| &self.contexts[p])
    }

    pub fn children(&self, id: ContextId) -> impl Iterator<Item = &Context> {
        self.contexts[id].children.iter().map(move |c| &self.contexts[*c])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.iter()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Declares `name` in context `id`. Returns false when the declaration
    /// conflicts with an existing binding.
    pub fn add_local_var(
        &mut self,
        id: ContextId,
        name: &str,
        member_type: MemberType,
        scope: VariableScope,
        function: Option<NodeId>,
    ) -> bool {
        if name.is_empty() {
            return true;
        }
        let c = &mut self.contexts[id];
        if member_type != MemberType::FunctionDefinition && c.is_formal(name) {
            return scope == VariableScope::Var;
        }
        let shadows_catch_binding =
            scope == VariableScope::Var && c.caught_variables.iter().any(|v| v == name);
        if !shadows_catch_binding {
            if let Some(existing) = c.members.get_mut(name) {
                if scope != VariableScope::Var || existing.scope != VariableScope::Var {
                    return false;
                }
                if existing.member_type <= member_type {
                    existing.member_type = member_type;
                    existing.function = function;
                }
                return true;
            }
        }
        if c.context_type.is_block_like()
            && scope == VariableScope::Var
            && member_type != MemberType::FunctionDefinition
        {
            if let Some(parent) = c.parent {
                return self.add_local_var(parent, name, member_type, scope, function);
            }
        }
        c.members.insert(
            name.to_string(),
            Member {
                member_type,
                scope,
                index: 0,
                can_escape: false,
                function,
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_in_block() -> (ContextGraph, ContextId, ContextId) {
        let mut graph = ContextGraph::new();
        let f = graph.new_context(1, ContextType::Function, None);
        let b = graph.new_context(2, ContextType::Block, Some(f));
        (graph, f, b)
    }

    #[test]
    fn test_var_in_block_hoists_to_function() {
        let (mut graph, f, b) = function_in_block();
        assert!(graph.add_local_var(b, "x", MemberType::VariableDeclaration, VariableScope::Var, None));
        assert!(graph.get(b).find_member("x").is_none());
        assert!(graph.get(f).find_member("x").is_some());
    }

    #[test]
    fn test_function_definition_stays_in_block() {
        let (mut graph, f, b) = function_in_block();
        assert!(graph.add_local_var(b, "g", MemberType::FunctionDefinition, VariableScope::Var, Some(9)));
        assert!(graph.get(b).find_member("g").is_some());
        assert!(graph.get(f).find_member("g").is_none());
    }

    #[test]
    fn test_lexical_redeclaration_fails() {
        let (mut graph, f, _) = function_in_block();
        assert!(graph.add_local_var(f, "x", MemberType::VariableDefinition, VariableScope::Let, None));
        assert!(!graph.add_local_var(f, "x", MemberType::VariableDefinition, VariableScope::Var, None));
        assert!(graph.add_local_var(f, "y", MemberType::VariableDeclaration, VariableScope::Var, None));
        assert!(!graph.add_local_var(f, "y", MemberType::VariableDefinition, VariableScope::Const, None));
    }

    #[test]
    fn test_member_upgrade_follows_type_order() {
        let (mut graph, f, _) = function_in_block();
        graph.add_local_var(f, "x", MemberType::VariableDefinition, VariableScope::Var, None);
        graph.add_local_var(f, "x", MemberType::FunctionDefinition, VariableScope::Var, Some(4));
        graph.add_local_var(f, "x", MemberType::VariableDeclaration, VariableScope::Var, None);
        let m = graph.get(f).find_member("x").unwrap();
        assert_eq!(m.member_type, MemberType::FunctionDefinition);
        assert_eq!(m.function, Some(4));
        assert_eq!(graph.get(f).members.len(), 1);
    }

    #[test]
    fn test_formal_names_accept_only_var() {
        let (mut graph, f, _) = function_in_block();
        graph.get_mut(f).arguments.push("a".to_string());
        assert!(graph.add_local_var(f, "a", MemberType::VariableDeclaration, VariableScope::Var, None));
        assert!(!graph.add_local_var(f, "a", MemberType::VariableDefinition, VariableScope::Let, None));
        assert!(graph.get(f).members.is_empty());
    }

    #[test]
    fn test_compute_requirements_splits_slots() {
        let (mut graph, f, _) = function_in_block();
        for name in ["a", "b", "c"] {
            graph.add_local_var(f, name, MemberType::VariableDeclaration, VariableScope::Var, None);
        }
        let c = graph.get_mut(f);
        c.requires_execution_context = true;
        c.members.get_mut("b").unwrap().can_escape = true;
        c.compute_requirements();
        assert_eq!(c.heap_local_count, 1);
        assert_eq!(c.stack_local_count, 2);
        assert_eq!(c.members["b"].index, 0);
        assert_eq!(c.members["c"].index, 1);
    }
}
