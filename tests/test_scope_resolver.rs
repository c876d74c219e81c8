//! Integration tests for the scope resolver.
//!
//! Scripts are parsed with the real parser and resolved; assertions look at
//! the resulting context graph.

extern crate justvm;

use justvm::compiler::{
    self, CompileError, Context, ContextGraph, ContextType, MemberType, ResolverOptions, UsesArgumentsObject,
};
use justvm::parser::JsParser;

fn resolve_as(code: &str, default_type: ContextType, options: &ResolverOptions) -> Result<ContextGraph, CompileError> {
    let program = JsParser::parse_to_ast_from_str(code).expect("test script should parse");
    compiler::resolve(&program, default_type, options)
}

fn resolve(code: &str) -> Result<ContextGraph, CompileError> {
    resolve_as(code, ContextType::Global, &ResolverOptions::default())
}

fn function<'g>(graph: &'g ContextGraph, name: &str) -> &'g Context {
    graph
        .iter()
        .find(|c| c.context_type == ContextType::Function && c.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("no function named {}", name))
}

fn syntax_error_name(result: Result<ContextGraph, CompileError>) -> String {
    match result {
        Err(CompileError::Syntax { name, .. }) => name,
        Err(other) => panic!("expected a syntax error, got {:?}", other),
        Ok(_) => panic!("expected a syntax error"),
    }
}

// ── Heap frames ───────────────────────────────────────────────────────

#[test]
fn test_locals_used_only_locally_stay_on_the_stack() {
    let graph = resolve("function f(a) { var b = a + 1; return b; }").unwrap();
    let f = function(&graph, "f");
    assert!(!f.requires_execution_context);
    assert!(!f.arguments_can_escape);
    assert!(f.members.values().all(|m| !m.can_escape));
    assert!(graph.iter().all(|c| !c.requires_execution_context));
}

#[test]
fn test_captured_local_escapes() {
    let graph = resolve("function outer() { var hidden = 1; var plain = 2; return function () { return hidden; }; }")
        .unwrap();
    let outer = function(&graph, "outer");
    assert!(outer.requires_execution_context);
    assert!(outer.find_member("hidden").unwrap().can_escape);
    assert!(!outer.find_member("plain").unwrap().can_escape);
    assert_eq!(outer.heap_local_count, 1);
    assert!(outer.has_nested_functions);
}

#[test]
fn test_captured_formal_escapes_the_argument_vector() {
    let graph = resolve("function outer(x) { return function () { return x; }; }").unwrap();
    let outer = function(&graph, "outer");
    assert!(outer.arguments_can_escape);
    assert!(outer.requires_execution_context);
}

#[test]
fn test_global_never_requires_a_heap_frame() {
    let graph = resolve("var o = {}; var g = 1; with (o) { g = 2; } eval('g'); function f() { return g; }").unwrap();
    let root = graph.root().unwrap();
    assert_eq!(root.context_type, ContextType::Global);
    assert!(root.has_with);
    assert!(root.has_direct_eval);
    assert!(root.all_vars_escape);
    assert!(root.find_member("g").unwrap().can_escape);
    assert!(!root.requires_execution_context);
}

#[test]
fn test_strict_eval_code_requires_a_heap_frame() {
    let options = ResolverOptions::default();
    let strict = resolve_as("'use strict'; var x = 1;", ContextType::Eval, &options).unwrap();
    assert!(strict.root().unwrap().requires_execution_context);
    let sloppy = resolve_as("var x = 1;", ContextType::Eval, &options).unwrap();
    assert!(!sloppy.root().unwrap().requires_execution_context);
}

// ── Conservative escape ───────────────────────────────────────────────

#[test]
fn test_try_makes_every_member_escape() {
    let graph = resolve("function f(a) { var b; var c; try { b = 1; } catch (e) { } }").unwrap();
    let f = function(&graph, "f");
    assert!(f.has_try);
    assert!(f.all_vars_escape);
    assert!(f.requires_execution_context);
    assert!(f.arguments_can_escape);
    assert!(f.members.values().all(|m| m.can_escape));
}

#[test]
fn test_with_makes_every_member_escape() {
    let graph = resolve("function f(o) { var a; var b; with (o) { a; } }").unwrap();
    let f = function(&graph, "f");
    assert!(f.has_with);
    assert!(f.members.values().all(|m| m.can_escape));
    let with = graph.iter().find(|c| c.context_type == ContextType::With).unwrap();
    assert_eq!(with.parent, Some(f.id));
}

#[test]
fn test_direct_eval_propagates_to_ancestors() {
    let graph = resolve("function f() { var a; function g() { eval('a'); } }").unwrap();
    let f = function(&graph, "f");
    let g = function(&graph, "g");
    assert!(g.has_direct_eval);
    assert!(f.has_direct_eval);
    assert!(f.find_member("a").unwrap().can_escape);
}

#[test]
fn test_empty_block_with_eval_is_not_widened() {
    let graph = resolve("function f() { var a; { eval('a'); } }").unwrap();
    let block = graph
        .iter()
        .find(|c| c.context_type == ContextType::Block)
        .unwrap();
    assert!(block.members.is_empty());
    assert!(!block.all_vars_escape);
    assert!(!block.requires_execution_context);
    let f = function(&graph, "f");
    assert!(f.all_vars_escape);
    assert!(f.find_member("a").unwrap().can_escape);
}

#[test]
fn test_block_with_members_and_eval_is_widened() {
    let graph = resolve("function f() { { let b = 1; eval('b'); } }").unwrap();
    let block = graph
        .iter()
        .find(|c| c.context_type == ContextType::Block)
        .unwrap();
    assert!(block.all_vars_escape);
    assert!(block.requires_execution_context);
    assert!(block.find_member("b").unwrap().can_escape);
}

#[test]
fn test_debug_mode_makes_everything_escape() {
    let options = ResolverOptions {
        debug_mode: true,
        ..ResolverOptions::default()
    };
    let graph = resolve_as("function f(a) { var b = a; return b; }", ContextType::Global, &options).unwrap();
    let f = function(&graph, "f");
    assert!(f.requires_execution_context);
    assert!(f.arguments_can_escape);
    assert!(f.members.values().all(|m| m.can_escape));
    assert!(!graph.root().unwrap().requires_execution_context);
}

// ── Declarations ──────────────────────────────────────────────────────

#[test]
fn test_lexical_redeclaration_is_rejected() {
    assert_eq!(syntax_error_name(resolve("let x = 1; let x = 2;")), "x");
    assert_eq!(syntax_error_name(resolve("var y = 1; let y = 2;")), "y");
    assert_eq!(syntax_error_name(resolve("function f() { const z = 1; var z; }")), "z");
}

#[test]
fn test_var_redeclaration_resolves_to_one_member() {
    let graph = resolve("var x = 1; var x = 2; var x;").unwrap();
    let root = graph.root().unwrap();
    assert_eq!(root.members.len(), 1);
    assert_eq!(root.find_member("x").unwrap().member_type, MemberType::VariableDeclaration);
}

#[test]
fn test_const_requires_an_initializer() {
    assert_eq!(syntax_error_name(resolve("const x;")), "x");
    assert!(resolve("const x = 1;").is_ok());
    assert!(resolve("for (const k in {}) { }").is_ok());
}

#[test]
fn test_var_in_block_hoists_to_function() {
    let graph = resolve("function f() { if (true) { var inner = 1; } }").unwrap();
    let f = function(&graph, "f");
    assert!(f.find_member("inner").is_some());
    let block = graph
        .iter()
        .find(|c| c.context_type == ContextType::Block)
        .unwrap();
    assert!(block.find_member("inner").is_none());
}

#[test]
fn test_catch_parameter_is_a_lexical_member() {
    let graph = resolve("try { } catch (e) { var e = 1; }").unwrap();
    let catch = graph
        .iter()
        .find(|c| c.context_type == ContextType::Catch)
        .unwrap();
    assert_eq!(catch.caught_variables, vec!["e".to_string()]);
    assert!(catch.find_member("e").unwrap().is_lexically_scoped());
    assert_eq!(syntax_error_name(resolve("try { } catch (e) { let e = 1; }")), "e");
}

#[test]
fn test_let_in_for_head_opens_a_block() {
    let graph = resolve("for (let i = 0; i < 3; i++) { }").unwrap();
    let root = graph.root().unwrap();
    assert!(root.find_member("i").is_none());
    let head = graph.children(root.id).next().unwrap();
    assert_eq!(head.context_type, ContextType::Block);
    assert!(head.find_member("i").is_some());
}

// ── Functions ─────────────────────────────────────────────────────────

#[test]
fn test_function_name_binding() {
    let graph = resolve("function decl() { } var e = function named() { return named; };").unwrap();
    let root = graph.root().unwrap();
    assert_eq!(root.find_member("decl").unwrap().member_type, MemberType::FunctionDefinition);
    assert!(root.find_member("named").is_none());
    let named = function(&graph, "named");
    assert_eq!(named.find_member("named").unwrap().member_type, MemberType::ThisFunctionName);
    assert!(!named.requires_execution_context);
}

#[test]
fn test_formal_shadows_function_name() {
    let graph = resolve("function f(f) { return f; }").unwrap();
    let f = function(&graph, "f");
    assert!(f.find_member("f").is_none());
    assert_eq!(f.arguments, vec!["f".to_string()]);
}

#[test]
fn test_strict_parameter_named_eval_is_rejected() {
    assert_eq!(syntax_error_name(resolve("function f(eval) { 'use strict'; }")), "eval");
    assert_eq!(syntax_error_name(resolve("'use strict'; function f(arguments) { }")), "arguments");
    assert!(resolve("function f(eval) { }").is_ok());
}

#[test]
fn test_duplicate_parameters() {
    assert!(resolve("function f(a, a) { }").is_ok());
    assert_eq!(syntax_error_name(resolve("function f(a, a) { 'use strict'; }")), "a");
    assert_eq!(syntax_error_name(resolve("function f(a, a = 1) { }")), "a");
}

#[test]
fn test_simple_parameter_classification() {
    let graph = resolve("function s(a, b) { } function d(a, b = 1) { } function r(...rest) { }").unwrap();
    assert!(function(&graph, "s").formals_are_simple);
    assert!(!function(&graph, "d").formals_are_simple);
    assert!(!function(&graph, "r").formals_are_simple);
    assert_eq!(function(&graph, "r").arguments, vec!["rest".to_string()]);
}

#[test]
fn test_max_number_of_arguments() {
    let graph = resolve("f(1, 2, 3); new g(1); var a = [1, 2, 3, 4, 5];").unwrap();
    assert_eq!(graph.root().unwrap().max_number_of_arguments, 5);
}

// ── Arguments object ──────────────────────────────────────────────────

#[test]
fn test_arguments_use_injects_a_member() {
    let graph = resolve("function f(a) { return arguments[0]; }").unwrap();
    let f = function(&graph, "f");
    assert_eq!(f.uses_arguments_object, UsesArgumentsObject::Used);
    assert_eq!(f.find_member("arguments").unwrap().member_type, MemberType::VariableDeclaration);
    assert!(f.arguments_can_escape);
    assert!(f.requires_execution_context);
}

#[test]
fn test_strict_arguments_use_stays_on_the_stack() {
    let graph = resolve("function f(a) { 'use strict'; return arguments.length; }").unwrap();
    let f = function(&graph, "f");
    assert!(f.is_strict);
    assert!(f.find_member("arguments").is_some());
    assert!(!f.requires_execution_context);
}

#[test]
fn test_strict_arguments_read_from_a_block_stays_on_the_stack() {
    let graph = resolve("function f() { 'use strict'; { return arguments[0]; } }").unwrap();
    let f = function(&graph, "f");
    assert_eq!(f.uses_arguments_object, UsesArgumentsObject::Used);
    assert!(!f.find_member("arguments").unwrap().can_escape);
    assert!(!f.arguments_can_escape);
    assert!(!f.requires_execution_context);
    let block = graph.iter().find(|c| c.context_type == ContextType::Block).unwrap();
    assert_eq!(block.uses_arguments_object, UsesArgumentsObject::NotUsed);
}

#[test]
fn test_declared_arguments_suppresses_the_synthetic_binding() {
    let graph = resolve("function p(arguments) { return arguments; }").unwrap();
    let p = function(&graph, "p");
    assert_eq!(p.uses_arguments_object, UsesArgumentsObject::NotUsed);
    assert!(p.find_member("arguments").is_none());
    assert!(!p.requires_execution_context);

    let graph = resolve("function v() { var arguments = 1; return arguments; }").unwrap();
    let v = function(&graph, "v");
    assert_eq!(v.uses_arguments_object, UsesArgumentsObject::NotUsed);
    assert_eq!(v.find_member("arguments").unwrap().member_type, MemberType::VariableDefinition);
    assert!(!v.requires_execution_context);
}

#[test]
fn test_arguments_in_arrow_belongs_to_enclosing_function() {
    let graph = resolve("function outer() { var f = () => () => arguments; return f; }").unwrap();
    let outer = function(&graph, "outer");
    assert_eq!(outer.uses_arguments_object, UsesArgumentsObject::Used);
    assert!(outer.find_member("arguments").unwrap().can_escape);
    for arrow in graph.iter().filter(|c| c.is_arrow) {
        assert_eq!(arrow.uses_arguments_object, UsesArgumentsObject::NotUsed);
        assert!(arrow.find_member("arguments").is_none());
    }
}

#[test]
fn test_top_level_arrow_arguments_keep_the_global_exemption() {
    let graph = resolve("var f = () => arguments;").unwrap();
    let root = graph.root().unwrap();
    assert!(root.find_member("arguments").is_none());
    assert!(!root.requires_execution_context);
}

#[test]
fn test_direct_eval_marks_arguments_used() {
    let graph = resolve("function f() { eval('1'); }").unwrap();
    let f = function(&graph, "f");
    assert_eq!(f.uses_arguments_object, UsesArgumentsObject::Used);
    assert!(f.find_member("arguments").unwrap().can_escape);
}

// ── Strict mode ───────────────────────────────────────────────────────

#[test]
fn test_with_is_rejected_in_strict_mode() {
    assert_eq!(syntax_error_name(resolve("'use strict'; with (o) { }")), "with");
    assert!(resolve("with (o) { }").is_ok());
}

#[test]
fn test_strict_reserved_words() {
    assert_eq!(syntax_error_name(resolve("'use strict'; var interface = 1;")), "interface");
    assert_eq!(syntax_error_name(resolve("function f() { 'use strict'; return package; }")), "package");
    assert!(resolve("var interface = 1;").is_ok());
}

#[test]
fn test_strictness_is_inherited_and_optional() {
    let graph = resolve("function f() { 'use strict'; function g() { } }").unwrap();
    assert!(!graph.root().unwrap().is_strict);
    assert!(function(&graph, "f").is_strict);
    assert!(function(&graph, "g").is_strict);

    let options = ResolverOptions {
        strict: true,
        ..ResolverOptions::default()
    };
    assert!(resolve_as("with (o) { }", ContextType::Global, &options).is_err());
}

#[test]
fn test_escaped_directive_is_not_strict() {
    let graph = resolve(r#"function f() { 'use\x20strict'; with (o) { } }"#).unwrap();
    assert!(!function(&graph, "f").is_strict);
}

#[test]
fn test_function_declaration_positions() {
    assert!(resolve("if (x) function f() { }").is_ok());
    assert!(resolve("{ function f() { } } if (x) { function h() { } }").is_ok());
    assert!(resolve("'use strict'; function f() { function g() { } }").is_ok());
    let err = resolve("'use strict'; if (x) function f() { }");
    assert_eq!(syntax_error_name(err), "f");
    let err = resolve("'use strict'; while (x) function g() { }");
    assert_eq!(syntax_error_name(err), "g");
}

#[test]
fn test_strict_blocks_reject_function_declarations() {
    let err = resolve("'use strict'; { function g() { } }");
    assert_eq!(syntax_error_name(err), "g");
    let err = resolve("'use strict'; if (1) { function h() { } }");
    assert_eq!(syntax_error_name(err), "h");
    let err = resolve("function f() { 'use strict'; try { } catch (e) { function k() { } } }");
    assert_eq!(syntax_error_name(err), "k");
    match resolve("'use strict'; { function g() { } }") {
        Err(e) => assert_eq!(e.message(), "conditional function or closure declaration"),
        Ok(_) => panic!("expected a syntax error"),
    }
}

#[test]
fn test_error_location() {
    let err = resolve("var a = 1;\n  let a = 2;").unwrap_err();
    assert_eq!(err.line_col(), (2, 7));
    assert_eq!(err.message(), "Identifier a has already been declared");
}
