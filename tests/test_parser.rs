extern crate justvm;

use justvm::compiler::CompileError;
use justvm::parser::ast::{
    BinaryOperator, ExpressionType, HasMeta, LiteralType, NumberLiteralType, ProgramData, StatementType,
    VariableDeclarationKind,
};
use justvm::parser::JsParser;

fn parse(code: &str) -> ProgramData {
    match JsParser::parse_to_ast_from_str(code) {
        Ok(p) => p,
        Err(e) => panic!("failed to parse {:?}: {}", code, e),
    }
}

fn expression(statement: &StatementType) -> &ExpressionType {
    match statement {
        StatementType::ExpressionStatement { expression, .. } => expression,
        other => panic!("expected an expression statement, got {:?}", other),
    }
}

#[test]
fn test_variable_declarations() {
    let p = parse("var a = 1, b; let c; const d = 'x';");
    assert_eq!(p.body.len(), 3);
    let kinds: Vec<VariableDeclarationKind> = p
        .body
        .iter()
        .map(|s| match s {
            StatementType::VariableDeclaration(v) => v.kind,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            VariableDeclarationKind::Var,
            VariableDeclarationKind::Let,
            VariableDeclarationKind::Const
        ]
    );
    if let StatementType::VariableDeclaration(v) = &p.body[0] {
        assert_eq!(v.declarations.len(), 2);
        match v.declarations[0].init.as_deref() {
            Some(ExpressionType::Literal(l)) => {
                assert_eq!(l.value, LiteralType::NumberLiteral(NumberLiteralType::IntegerLiteral(1)))
            }
            other => panic!("unexpected initializer {:?}", other),
        }
        assert!(v.declarations[1].init.is_none());
    }
}

#[test]
fn test_multiplication_binds_tighter() {
    let p = parse("1 + 2 * 3;");
    match expression(&p.body[0]) {
        ExpressionType::BinaryExpression { operator, right, .. } => {
            assert!(matches!(operator, BinaryOperator::Add));
            assert!(matches!(
                right.as_ref(),
                ExpressionType::BinaryExpression {
                    operator: BinaryOperator::Multiply,
                    ..
                }
            ));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_semicolons_are_optional() {
    let p = parse("a = 1\nb = 2\n");
    assert_eq!(p.body.len(), 2);
}

#[test]
fn test_function_parameters() {
    let p = parse("function f(a, b = 1, ...c) {}\nfunction g(x, y) { return x; }");
    let functions: Vec<_> = p
        .body
        .iter()
        .map(|s| match s {
            StatementType::FunctionDeclaration(f) => f,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(functions[0].name(), Some("f"));
    assert_eq!(functions[0].params.len(), 3);
    assert!(!functions[0].has_simple_parameter_list());
    assert_eq!(functions[1].name(), Some("g"));
    assert!(functions[1].has_simple_parameter_list());
    assert!(!functions[1].arrow);
}

#[test]
fn test_arrow_function() {
    let p = parse("var f = (a) => a;");
    if let StatementType::VariableDeclaration(v) = &p.body[0] {
        match v.declarations[0].init.as_deref() {
            Some(ExpressionType::ArrowFunctionExpression(f)) => {
                assert!(f.arrow);
                assert_eq!(f.params.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    } else {
        panic!("expected a declaration");
    }
}

#[test]
fn test_directive_keeps_raw_text() {
    let p = parse("'use strict';");
    match expression(&p.body[0]) {
        ExpressionType::Literal(l) => {
            assert_eq!(l.raw, "'use strict'");
            assert_eq!(l.value, LiteralType::StringLiteral("use strict".to_string()));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_try_catch_finally() {
    let p = parse("try { a(); } catch (e) { b(); } finally { c(); }");
    match &p.body[0] {
        StatementType::TryStatement {
            handler, finalizer, ..
        } => {
            assert!(handler.is_some());
            assert!(finalizer.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_positions_are_one_based() {
    let p = parse("\n  foo;");
    let meta = p.body[0].get_meta();
    assert_eq!((meta.line, meta.column), (2, 3));
}

#[test]
fn test_parse_error_location() {
    match JsParser::parse_to_ast_from_str("var a = 1;\nvar = 2;") {
        Err(e @ CompileError::Parse { .. }) => assert_eq!(e.line_col().0, 2),
        other => panic!("expected a parse error, got {:?}", other.map(|p| p.body.len())),
    }
}
