//! Scope resolution and escape analysis.
//!
//! [`resolve`] walks a program once, opening a [`Context`] for every program,
//! function, block, catch clause and `with` body, recording declarations,
//! usages and the flags that widen escape. [`calc_escaping_variables`] then
//! sweeps the whole graph and decides which members must live in a heap
//! backed activation.

use std::collections::HashSet;

use crate::compiler::context::{
    Context, ContextGraph, ContextId, ContextType, MemberType, UsesArgumentsObject, VariableScope,
};
use crate::compiler::error::CompileError;
use crate::parser::ast::*;

const ARGUMENTS: &str = "arguments";
const EVAL: &str = "eval";

const STRICT_RESERVED_WORDS: [&str; 9] = [
    "implements",
    "interface",
    "let",
    "package",
    "private",
    "protected",
    "public",
    "static",
    "yield",
];

#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    /// Every variable escapes, so a debugger can see all of them.
    pub debug_mode: bool,
    pub show_escaping_vars: bool,
    /// Start the top-level context in strict mode.
    pub strict: bool,
}

type ResolveResult<T> = Result<T, CompileError>;

/// Builds the context graph for `program` and runs the escape sweep.
pub fn resolve(
    program: &ProgramData,
    default_type: ContextType,
    options: &ResolverOptions,
) -> Result<ContextGraph, CompileError> {
    let mut resolver = ScopeResolver {
        graph: ContextGraph::new(),
        stack: vec![],
        allow_func_decls: true,
    };
    resolver.visit_program(program, default_type, options.strict)?;
    let mut graph = resolver.graph;
    calc_escaping_variables(&mut graph, options);
    Ok(graph)
}

struct ScopeResolver {
    graph: ContextGraph,
    stack: Vec<ContextId>,
    allow_func_decls: bool,
}

impl ScopeResolver {
    fn current_id(&self) -> ContextId {
        // The program context is pushed before anything else is visited.
        self.stack.last().copied().unwrap_or(0)
    }

    fn current(&self) -> &Context {
        self.graph.get(self.current_id())
    }

    fn current_mut(&mut self) -> &mut Context {
        let id = self.current_id();
        self.graph.get_mut(id)
    }

    fn open_context(&mut self, meta: &Meta, context_type: ContextType) -> ContextId {
        let parent = self.stack.last().copied();
        let id = self.graph.new_context(meta.id, context_type, parent);
        let c = self.graph.get_mut(id);
        c.line = meta.line;
        c.column = meta.column;
        id
    }

    /// Runs `f` with `id` as the current context. The context is popped on
    /// every exit, including an early error.
    fn in_context<T>(&mut self, id: ContextId, f: impl FnOnce(&mut Self) -> ResolveResult<T>) -> ResolveResult<T> {
        self.stack.push(id);
        let result = f(self);
        self.stack.pop();
        result
    }

    fn with_func_decls<T>(&mut self, allow: bool, f: impl FnOnce(&mut Self) -> ResolveResult<T>) -> ResolveResult<T> {
        let saved = self.allow_func_decls;
        self.allow_func_decls = allow;
        let result = f(self);
        self.allow_func_decls = saved;
        result
    }

    fn visit_program(&mut self, program: &ProgramData, default_type: ContextType, strict: bool) -> ResolveResult<()> {
        let id = self.open_context(&program.meta, default_type);
        self.graph.get_mut(id).is_strict = strict;
        self.in_context(id, |s| {
            s.check_directive_prologue(&program.body);
            s.visit_statements(&program.body)
        })
    }

    fn check_directive_prologue(&mut self, body: &[StatementType]) {
        for statement in body {
            if let StatementType::ExpressionStatement { expression, .. } = statement {
                if let ExpressionType::Literal(LiteralData {
                    value: LiteralType::StringLiteral(_),
                    raw,
                    ..
                }) = expression.as_ref()
                {
                    // The raw text is compared so escapes cannot spell the directive.
                    if raw.len() >= 2 && &raw[1..raw.len() - 1] == "use strict" {
                        self.current_mut().is_strict = true;
                    }
                    continue;
                }
            }
            break;
        }
    }

    fn check_name(&self, name: &str, meta: &Meta) -> ResolveResult<()> {
        if self.current().is_strict && STRICT_RESERVED_WORDS.contains(&name) {
            return Err(CompileError::syntax(
                "Unexpected strict mode reserved word",
                name,
                meta,
            ));
        }
        Ok(())
    }

    fn visit_statements(&mut self, statements: &[StatementType]) -> ResolveResult<()> {
        for s in statements {
            self.visit_statement(s)?;
        }
        Ok(())
    }

    /// A statement in a position that only takes one statement, such as a
    /// loop body. Function declarations are only allowed there in sloppy mode.
    fn visit_sub_statement(&mut self, statement: &StatementType) -> ResolveResult<()> {
        let allow = !self.current().is_strict;
        self.with_func_decls(allow, |s| s.visit_statement(statement))
    }

    /// Blocks keep the surrounding allowance in sloppy mode. Strict code has
    /// no block-level function declarations.
    fn block_func_decls(&self) -> bool {
        self.allow_func_decls && !self.current().is_strict
    }

    fn visit_block(&mut self, block: &BlockStatementData) -> ResolveResult<()> {
        let allow = self.block_func_decls();
        let id = self.open_context(&block.meta, ContextType::Block);
        self.graph.get_mut(id).name = Some("Block".to_string());
        self.with_func_decls(allow, |s| s.in_context(id, |s| s.visit_statements(&block.body)))
    }

    fn visit_statement(&mut self, statement: &StatementType) -> ResolveResult<()> {
        match statement {
            StatementType::ExpressionStatement { expression, .. } => self.visit_expression(expression),
            StatementType::BlockStatement(block) => self.visit_block(block),
            StatementType::EmptyStatement { .. }
            | StatementType::DebuggerStatement { .. }
            | StatementType::BreakStatement { .. }
            | StatementType::ContinueStatement { .. } => Ok(()),
            StatementType::WithStatement { meta, object, body } => {
                if self.current().is_strict {
                    return Err(CompileError::syntax(
                        "'with' statement is not allowed in strict mode",
                        "with",
                        meta,
                    ));
                }
                self.current_mut().has_with = true;
                self.visit_expression(object)?;
                let id = self.open_context(meta, ContextType::With);
                self.graph.get_mut(id).name = Some("WithBlock".to_string());
                self.in_context(id, |s| s.visit_sub_statement(body))
            }
            StatementType::ReturnStatement { argument, .. } => match argument {
                Some(e) => self.visit_expression(e),
                None => Ok(()),
            },
            StatementType::LabeledStatement { body, .. } => self.visit_sub_statement(body),
            StatementType::IfStatement {
                test,
                consequent,
                alternate,
                ..
            } => {
                self.visit_expression(test)?;
                self.visit_sub_statement(consequent)?;
                if let Some(a) = alternate {
                    self.visit_sub_statement(a)?;
                }
                Ok(())
            }
            StatementType::SwitchStatement {
                meta,
                discriminant,
                cases,
            } => {
                self.visit_expression(discriminant)?;
                let id = self.open_context(meta, ContextType::Block);
                self.graph.get_mut(id).name = Some("Block".to_string());
                self.in_context(id, |s| {
                    for case in cases {
                        if let Some(t) = &case.test {
                            s.visit_expression(t)?;
                        }
                        s.visit_statements(&case.consequent)?;
                    }
                    Ok(())
                })
            }
            StatementType::ThrowStatement { argument, .. } => self.visit_expression(argument),
            StatementType::TryStatement {
                block,
                handler,
                finalizer,
                ..
            } => {
                self.current_mut().has_try = true;
                self.visit_block(block)?;
                if let Some(h) = handler {
                    self.visit_catch_clause(h)?;
                }
                if let Some(f) = finalizer {
                    self.visit_block(f)?;
                }
                Ok(())
            }
            StatementType::WhileStatement { test, body, .. } => {
                self.visit_expression(test)?;
                self.visit_sub_statement(body)
            }
            StatementType::DoWhileStatement { test, body, .. } => {
                self.visit_sub_statement(body)?;
                self.visit_expression(test)
            }
            StatementType::ForStatement {
                meta,
                init,
                test,
                update,
                body,
            } => {
                let walk = |s: &mut Self| -> ResolveResult<()> {
                    match init {
                        Some(VariableDeclarationOrExpression::VariableDeclaration(d)) => {
                            s.visit_variable_declaration(d, false)?
                        }
                        Some(VariableDeclarationOrExpression::Expression(e)) => s.visit_expression(e)?,
                        None => {}
                    }
                    if let Some(t) = test {
                        s.visit_expression(t)?;
                    }
                    if let Some(u) = update {
                        s.visit_expression(u)?;
                    }
                    s.visit_sub_statement(body)
                };
                match init {
                    Some(VariableDeclarationOrExpression::VariableDeclaration(d))
                        if d.kind != VariableDeclarationKind::Var =>
                    {
                        let id = self.open_context(meta, ContextType::Block);
                        self.in_context(id, walk)
                    }
                    _ => walk(self),
                }
            }
            StatementType::ForInStatement(data) | StatementType::ForOfStatement(data) => {
                let walk = |s: &mut Self| -> ResolveResult<()> {
                    match &data.left {
                        VariableDeclarationOrPattern::VariableDeclaration(d) => {
                            s.visit_variable_declaration(d, true)?
                        }
                        VariableDeclarationOrPattern::Pattern(p) => s.visit_assignment_target(p)?,
                    }
                    s.visit_expression(&data.right)?;
                    s.visit_sub_statement(&data.body)
                };
                match &data.left {
                    VariableDeclarationOrPattern::VariableDeclaration(d)
                        if d.kind != VariableDeclarationKind::Var =>
                    {
                        let id = self.open_context(&data.meta, ContextType::Block);
                        self.in_context(id, walk)
                    }
                    _ => walk(self),
                }
            }
            StatementType::FunctionDeclaration(f) => {
                if !self.allow_func_decls {
                    return Err(CompileError::syntax(
                        "conditional function or closure declaration",
                        f.name().unwrap_or("function"),
                        &f.meta,
                    ));
                }
                self.enter_function(f, true)
            }
            StatementType::VariableDeclaration(d) => self.visit_variable_declaration(d, false),
        }
    }

    fn visit_catch_clause(&mut self, clause: &CatchClauseData) -> ResolveResult<()> {
        let allow = self.block_func_decls();
        let id = self.open_context(&clause.meta, ContextType::Catch);
        self.graph.get_mut(id).name = Some("CatchBlock".to_string());
        self.with_func_decls(allow, |s| {
            s.in_context(id, |s| {
                if let Some(param) = &clause.param {
                    for ident in param.bound_names() {
                        s.check_binding_name(&ident.name, &ident.meta)?;
                        let c = s.graph.get_mut(id);
                        if c.caught_variables.contains(&ident.name) {
                            return Err(CompileError::syntax(
                                format!("Identifier {} has already been declared", ident.name),
                                &ident.name,
                                &ident.meta,
                            ));
                        }
                        c.caught_variables.push(ident.name.clone());
                        s.graph.add_local_var(
                            id,
                            &ident.name,
                            MemberType::VariableDefinition,
                            VariableScope::Let,
                            None,
                        );
                    }
                    s.visit_pattern_expressions(param)?;
                }
                s.visit_statements(&clause.body.body)
            })
        })
    }

    fn check_binding_name(&mut self, name: &str, meta: &Meta) -> ResolveResult<()> {
        if self.current().is_strict && (name == EVAL || name == ARGUMENTS) {
            return Err(CompileError::syntax(
                "Variable name may not be eval or arguments in strict mode",
                name,
                meta,
            ));
        }
        self.check_name(name, meta)?;
        if name == ARGUMENTS {
            self.current_mut().uses_arguments_object = UsesArgumentsObject::NotUsed;
        }
        Ok(())
    }

    /// `in_for_head` marks the single binding of a `for-in`/`for-of` head,
    /// which gets its value from the iteration instead of an initializer.
    fn visit_variable_declaration(&mut self, decl: &VariableDeclarationData, in_for_head: bool) -> ResolveResult<()> {
        let scope = match decl.kind {
            VariableDeclarationKind::Var => VariableScope::Var,
            VariableDeclarationKind::Let => VariableScope::Let,
            VariableDeclarationKind::Const => VariableScope::Const,
        };
        for declarator in &decl.declarations {
            let has_initializer = declarator.init.is_some() || in_for_head;
            for ident in declarator.id.bound_names() {
                let name = ident.name.as_str();
                self.check_binding_name(name, &ident.meta)?;
                if scope == VariableScope::Const && !has_initializer {
                    return Err(CompileError::syntax(
                        "Missing initializer in const declaration",
                        name,
                        &ident.meta,
                    ));
                }
                let already_declared = || {
                    CompileError::syntax(
                        format!("Identifier {} has already been declared", name),
                        name,
                        &ident.meta,
                    )
                };
                let c = self.current();
                let redeclares_catch_binding =
                    scope == VariableScope::Var && c.caught_variables.iter().any(|v| v == name);
                if let Some(m) = c.find_member(name) {
                    if (m.is_lexically_scoped() || scope != VariableScope::Var) && !redeclares_catch_binding {
                        return Err(already_declared());
                    }
                }
                let member_type = if declarator.init.is_some() {
                    MemberType::VariableDefinition
                } else {
                    MemberType::VariableDeclaration
                };
                let id = self.current_id();
                if !self.graph.add_local_var(id, name, member_type, scope, None) {
                    return Err(already_declared());
                }
            }
            self.visit_pattern_expressions(&declarator.id)?;
            if let Some(init) = &declarator.init {
                self.visit_expression(init)?;
            }
        }
        Ok(())
    }

    /// Walks the expressions nested inside a binding pattern: defaults and
    /// computed keys.
    fn visit_pattern_expressions(&mut self, pattern: &PatternType) -> ResolveResult<()> {
        match pattern {
            PatternType::Identifier(_) => Ok(()),
            PatternType::MemberExpression(m) => self.visit_member_expression(m),
            PatternType::ObjectPattern { properties, rest, .. } => {
                for p in properties {
                    if let PropertyKeyType::Computed(e) = &p.key {
                        self.visit_expression(e)?;
                    }
                    self.visit_pattern_expressions(&p.value)?;
                }
                if let Some(r) = rest {
                    self.visit_pattern_expressions(r)?;
                }
                Ok(())
            }
            PatternType::ArrayPattern { elements, .. } => {
                self.current_mut().note_argument_count(elements.len());
                for e in elements.iter().flatten() {
                    self.visit_pattern_expressions(e)?;
                }
                Ok(())
            }
            PatternType::RestElement { argument, .. } => self.visit_pattern_expressions(argument),
            PatternType::AssignmentPattern { left, right, .. } => {
                self.visit_pattern_expressions(left)?;
                self.visit_expression(right)
            }
        }
    }

    /// Left side of an assignment or a plain `for-in`/`for-of` head: every
    /// identifier in it is a use, not a declaration.
    fn visit_assignment_target(&mut self, pattern: &PatternType) -> ResolveResult<()> {
        match pattern {
            PatternType::Identifier(id) => self.visit_identifier(id),
            PatternType::MemberExpression(m) => self.visit_member_expression(m),
            PatternType::ObjectPattern { properties, rest, .. } => {
                for p in properties {
                    if let PropertyKeyType::Computed(e) = &p.key {
                        self.visit_expression(e)?;
                    }
                    self.visit_assignment_target(&p.value)?;
                }
                if let Some(r) = rest {
                    self.visit_assignment_target(r)?;
                }
                Ok(())
            }
            PatternType::ArrayPattern { elements, .. } => {
                self.current_mut().note_argument_count(elements.len());
                for e in elements.iter().flatten() {
                    self.visit_assignment_target(e)?;
                }
                Ok(())
            }
            PatternType::RestElement { argument, .. } => self.visit_assignment_target(argument),
            PatternType::AssignmentPattern { left, right, .. } => {
                self.visit_assignment_target(left)?;
                self.visit_expression(right)
            }
        }
    }

    fn visit_identifier(&mut self, id: &IdentifierData) -> ResolveResult<()> {
        self.check_name(&id.name, &id.meta)?;
        let c = self.current_mut();
        if c.uses_arguments_object == UsesArgumentsObject::Unknown && id.name == ARGUMENTS {
            c.uses_arguments_object = UsesArgumentsObject::Used;
        }
        c.add_used_variable(&id.name);
        Ok(())
    }

    fn visit_member_expression(&mut self, m: &MemberExpressionType) -> ResolveResult<()> {
        match m {
            MemberExpressionType::SimpleMemberExpression { object, .. } => self.visit_expression(object),
            MemberExpressionType::ComputedMemberExpression { object, property, .. } => {
                self.visit_expression(object)?;
                self.visit_expression(property)
            }
        }
    }

    fn visit_arguments(&mut self, arguments: &[ExpressionOrSpreadElement]) -> ResolveResult<()> {
        self.current_mut().note_argument_count(arguments.len());
        for a in arguments {
            match a {
                ExpressionOrSpreadElement::Expression(e) | ExpressionOrSpreadElement::SpreadElement(e) => {
                    self.visit_expression(e)?
                }
            }
        }
        Ok(())
    }

    fn visit_expression(&mut self, expression: &ExpressionType) -> ResolveResult<()> {
        match expression {
            ExpressionType::Identifier(id) => self.visit_identifier(id),
            ExpressionType::Literal(_) => Ok(()),
            ExpressionType::ThisExpression { .. } => {
                self.current_mut().uses_this = true;
                Ok(())
            }
            ExpressionType::ArrayExpression { elements, .. } => {
                self.current_mut().note_argument_count(elements.len());
                for e in elements.iter().flatten() {
                    match e {
                        ExpressionOrSpreadElement::Expression(e)
                        | ExpressionOrSpreadElement::SpreadElement(e) => self.visit_expression(e)?,
                    }
                }
                Ok(())
            }
            ExpressionType::ObjectExpression { properties, .. } => self.with_func_decls(true, |s| {
                for p in properties {
                    if let PropertyKeyType::Computed(e) = &p.key {
                        s.visit_expression(e)?;
                    }
                    s.visit_expression(&p.value)?;
                }
                Ok(())
            }),
            ExpressionType::FunctionExpression(f) | ExpressionType::ArrowFunctionExpression(f) => {
                self.enter_function(f, false)
            }
            ExpressionType::UnaryExpression { argument, .. } | ExpressionType::UpdateExpression { argument, .. } => {
                self.visit_expression(argument)
            }
            ExpressionType::BinaryExpression { left, right, .. }
            | ExpressionType::LogicalExpression { left, right, .. } => {
                self.visit_expression(left)?;
                self.visit_expression(right)
            }
            ExpressionType::AssignmentExpression { left, right, .. } => {
                self.visit_assignment_target(left)?;
                self.visit_expression(right)
            }
            ExpressionType::ConditionalExpression {
                test,
                consequent,
                alternate,
                ..
            } => {
                self.visit_expression(test)?;
                self.visit_expression(consequent)?;
                self.visit_expression(alternate)
            }
            ExpressionType::CallExpression { callee, arguments, .. } => {
                if let ExpressionType::Identifier(id) = callee.as_ref() {
                    let c = self.current_mut();
                    if id.name == EVAL && !c.has_direct_eval {
                        if c.uses_arguments_object == UsesArgumentsObject::Unknown {
                            c.uses_arguments_object = UsesArgumentsObject::Used;
                        }
                        c.has_direct_eval = true;
                    }
                }
                self.visit_expression(callee)?;
                self.visit_arguments(arguments)
            }
            ExpressionType::NewExpression { callee, arguments, .. } => {
                self.visit_expression(callee)?;
                self.visit_arguments(arguments)
            }
            ExpressionType::MemberExpression(m) => self.visit_member_expression(m),
            ExpressionType::SequenceExpression { expressions, .. } => {
                for e in expressions {
                    self.visit_expression(e)?;
                }
                Ok(())
            }
            ExpressionType::YieldExpression { argument, .. } => match argument {
                Some(a) => self.visit_expression(a),
                None => Ok(()),
            },
            ExpressionType::TemplateLiteral(t) => {
                for e in &t.expressions {
                    self.visit_expression(e)?;
                }
                Ok(())
            }
        }
    }

    fn enter_function(&mut self, f: &FunctionData, enter_name: bool) -> ResolveResult<()> {
        let outer = self.current_id();
        let name = f.name().unwrap_or("");
        if self.current().is_strict && (name == EVAL || name == ARGUMENTS) {
            return Err(CompileError::syntax(
                "Function name may not be eval or arguments in strict mode",
                name,
                &f.meta,
            ));
        }
        let id = self.open_context(&f.meta, ContextType::Function);

        self.graph.get_mut(outer).has_nested_functions = true;
        // A function expression's own name is not visible to the enclosing scope.
        if enter_name
            && !self
                .graph
                .add_local_var(outer, name, MemberType::FunctionDefinition, VariableScope::Var, Some(f.meta.id))
        {
            return Err(CompileError::syntax(
                format!("Identifier {} has already been declared", name),
                name,
                &f.meta,
            ));
        }
        if name == ARGUMENTS {
            self.graph.get_mut(outer).uses_arguments_object = UsesArgumentsObject::NotUsed;
        }

        let bound_names: Vec<&IdentifierData> = f.params.iter().flat_map(|p| p.bound_names()).collect();
        let is_simple = f.has_simple_parameter_list();
        {
            let c = self.graph.get_mut(id);
            if !name.is_empty() {
                c.name = Some(name.to_string());
            }
            if bound_names.iter().any(|n| n.name == ARGUMENTS) {
                c.uses_arguments_object = UsesArgumentsObject::NotUsed;
            }
            if f.arrow {
                c.is_arrow = true;
            } else if f.generator {
                c.is_generator = true;
            }
        }
        if !name.is_empty() && !bound_names.iter().any(|n| n.name == name) {
            self.graph
                .add_local_var(id, name, MemberType::ThisFunctionName, VariableScope::Var, None);
        }
        {
            let c = self.graph.get_mut(id);
            c.arguments = f.params.iter().filter_map(formal_name).collect();
            c.formals_are_simple = is_simple;
        }

        self.in_context(id, |s| {
            if let FunctionBodyOrExpression::FunctionBody(body) = &f.body {
                if !s.current().is_strict {
                    s.check_directive_prologue(&body.body);
                }
            }
            let strict = s.current().is_strict;
            for (i, arg) in bound_names.iter().enumerate() {
                if (strict || !is_simple) && bound_names[i + 1..].iter().any(|n| n.name == arg.name) {
                    return Err(CompileError::syntax(
                        format!("Duplicate parameter name '{}' is not allowed.", arg.name),
                        &arg.name,
                        &arg.meta,
                    ));
                }
                if strict && (arg.name == EVAL || arg.name == ARGUMENTS) {
                    return Err(CompileError::syntax(
                        format!("'{}' cannot be used as parameter name in strict mode", arg.name),
                        &arg.name,
                        &arg.meta,
                    ));
                }
                s.check_name(&arg.name, &arg.meta)?;
                if !s.current().is_formal(&arg.name) {
                    s.graph
                        .add_local_var(id, &arg.name, MemberType::VariableDefinition, VariableScope::Var, None);
                }
            }
            for p in &f.params {
                s.visit_pattern_expressions(p)?;
            }
            s.with_func_decls(true, |s| match &f.body {
                FunctionBodyOrExpression::FunctionBody(body) => s.visit_statements(&body.body),
                FunctionBodyOrExpression::Expression(e) => s.visit_expression(e),
            })
        })
    }
}

/// The name of a formal that binds a single identifier, with or without a
/// default or rest marker.
fn formal_name(param: &PatternType) -> Option<String> {
    match param {
        PatternType::Identifier(id) => Some(id.name.clone()),
        PatternType::AssignmentPattern { left, .. } | PatternType::RestElement { argument: left, .. } => {
            match left.as_ref() {
                PatternType::Identifier(id) => Some(id.name.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Whole-graph sweep run once the walk is complete.
pub fn calc_escaping_variables(graph: &mut ContextGraph, options: &ResolverOptions) {
    let ids: Vec<ContextId> = graph.iter().map(|c| c.id).collect();

    // Eval and with anywhere inside a scope can observe all of its bindings.
    for &id in &ids {
        let (eval, with) = {
            let c = graph.get(id);
            (c.has_direct_eval, c.has_with)
        };
        let mut parent = graph.get(id).parent;
        while let Some(p) = parent {
            let c = graph.get_mut(p);
            c.has_direct_eval |= eval;
            c.has_with |= with;
            parent = c.parent;
        }
    }

    // `arguments` in a block or arrow belongs to the enclosing function.
    // Arrows reach it through their closure, so there it escapes.
    let mut read_by_arrow = HashSet::new();
    for &id in &ids {
        let c = graph.get(id);
        if c.uses_arguments_object != UsesArgumentsObject::Used
            || !(c.context_type.is_block_like() || c.is_arrow)
        {
            continue;
        }
        let from_arrow = c.is_arrow;
        let mut target = c.parent;
        while let Some(t) = target {
            let tc = graph.get(t);
            if tc.context_type.is_block_like() || tc.is_arrow {
                target = tc.parent;
            } else {
                break;
            }
        }
        if let Some(t) = target {
            let tc = graph.get_mut(t);
            if tc.find_member(ARGUMENTS).is_none() && !tc.is_formal(ARGUMENTS) {
                tc.uses_arguments_object = UsesArgumentsObject::Used;
                if from_arrow {
                    read_by_arrow.insert(t);
                }
            }
        }
        graph.get_mut(id).uses_arguments_object = UsesArgumentsObject::NotUsed;
    }

    for &inner in &ids {
        let used: Vec<String> = graph.get(inner).used_variables.iter().cloned().collect();
        for var in used {
            let mut current = Some(inner);
            while let Some(cid) = current {
                let c = graph.get_mut(cid);
                if let Some(m) = c.members.get_mut(&var) {
                    if cid != inner {
                        m.can_escape = true;
                        c.requires_execution_context = true;
                    }
                    break;
                }
                if c.find_argument(&var).is_some() {
                    if cid != inner {
                        c.arguments_can_escape = true;
                        c.requires_execution_context = true;
                    }
                    break;
                }
                current = c.parent;
            }
        }
    }

    for &id in &ids {
        let c = graph.get_mut(id);
        let mut all_vars_escape = c.has_with || c.has_try || c.has_direct_eval;
        if all_vars_escape && c.context_type == ContextType::Block && c.members.is_empty() {
            all_vars_escape = false;
        }
        if options.debug_mode {
            all_vars_escape = true;
        }
        if all_vars_escape {
            c.all_vars_escape = true;
            c.requires_execution_context = true;
            c.arguments_can_escape = true;
        }
        // Top-level bindings already live in the global object.
        if c.context_type == ContextType::Global {
            c.requires_execution_context = false;
        }
        if c.context_type == ContextType::Eval && c.is_strict {
            c.requires_execution_context = true;
        }

        // Declared after the use walk; uses from nested blocks never reach it.
        if c.parent.is_none() || c.uses_arguments_object == UsesArgumentsObject::Unknown {
            c.uses_arguments_object = UsesArgumentsObject::NotUsed;
        }
        if c.uses_arguments_object == UsesArgumentsObject::Used {
            let strict = c.is_strict;
            graph.add_local_var(id, ARGUMENTS, MemberType::VariableDeclaration, VariableScope::Var, None);
            if !strict {
                let c = graph.get_mut(id);
                c.arguments_can_escape = true;
                c.requires_execution_context = true;
            }
        }

        let c = graph.get_mut(id);
        if all_vars_escape {
            for m in c.members.values_mut() {
                m.can_escape = true;
            }
        }
        if read_by_arrow.contains(&id) {
            if let Some(m) = c.members.get_mut(ARGUMENTS) {
                m.can_escape = true;
                c.requires_execution_context = true;
            }
        }
        c.compute_requirements();
    }

    if options.show_escaping_vars {
        dump_escaping_variables(graph);
    }
}

fn dump_escaping_variables(graph: &ContextGraph) {
    tracing::debug!("==== escaping variables ====");
    for c in graph.iter() {
        tracing::debug!(
            context = c.id,
            name = c.name.as_deref().unwrap_or(""),
            kind = ?c.context_type,
            parent = ?c.parent,
            requires_execution_context = c.requires_execution_context,
            arguments_escape = c.arguments_can_escape,
            "context"
        );
        for (name, m) in c.members.iter() {
            tracing::debug!(
                context = c.id,
                member = name.as_str(),
                can_escape = m.can_escape,
                lexical = m.is_lexically_scoped(),
                "member"
            );
        }
    }
}
