use std::time::Instant;

use pest::error::{Error, ErrorVariant, LineColLocation};
use pest::iterators::{Pair, Pairs};
use pest::{Parser, Position};
use pest_derive::Parser;

use super::ast::*;
use crate::compiler::error::CompileError;

#[derive(Parser)]
#[grammar = "parser/js_grammar.pest"] // relative to src
pub struct JsParser;

const TAB_WIDTH: usize = 2;

type BuildResult<T> = Result<T, Error<Rule>>;

impl JsParser {
    /// Parses a script into a syntax tree whose nodes carry unique ids.
    pub fn parse_to_ast_from_str(script: &str) -> Result<ProgramData, CompileError> {
        let start = Instant::now();
        let pairs = JsParser::parse(Rule::script, script).map_err(to_compile_error)?;
        let program = AstBuilder::new()
            .build_program(pairs)
            .map_err(to_compile_error)?;
        tracing::debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            statements = program.body.len(),
            "parsed script"
        );
        Ok(program)
    }

    /// Renders the raw pest token tree, one rule per line. Debugging aid.
    pub fn parse_to_token_tree(script: &str) -> Result<String, CompileError> {
        let mut tree = vec![];
        let pairs = JsParser::parse(Rule::script, script).map_err(to_compile_error)?;
        for pair in pairs {
            tree.push(pair_to_string(pair, 0).join("\n"));
        }
        Ok(tree.join("\n"))
    }
}

fn pair_to_string(pair: Pair<Rule>, level: usize) -> Vec<String> {
    let mut tree = vec![];
    let span = pair.as_span();
    let rule_name = format!(
        "{:?} => ({},{}) #{:?}",
        pair.as_rule(),
        span.start(),
        span.end(),
        span.as_str()
    );
    let string_pads = " ".repeat(level * TAB_WIDTH);
    tree.push(format!("{}{}", string_pads, rule_name));
    for child_pair in pair.into_inner() {
        tree.append(pair_to_string(child_pair, level + 1).as_mut());
    }
    tree
}

fn to_compile_error(e: Error<Rule>) -> CompileError {
    let (line, column) = match e.line_col {
        LineColLocation::Pos(p) => p,
        LineColLocation::Span(p, _) => p,
    };
    let message = match &e.variant {
        ErrorVariant::CustomError { message } => message.clone(),
        ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
            format!("Unexpected token, expected one of {:?}", positives)
        }
        ErrorVariant::ParsingError { .. } => "Unexpected token".to_string(),
    };
    CompileError::Parse {
        message,
        line,
        column,
    }
}

fn get_unexpected_error(id: i32, pair: &Pair<Rule>) -> Error<Rule> {
    let message = format!("Unexpected state reached [{:?}] - {}", pair.as_rule(), id);
    Error::new_from_span(ErrorVariant::CustomError { message }, pair.as_span())
}

fn get_custom_error(message: &str, pair: &Pair<Rule>) -> Error<Rule> {
    Error::new_from_span(
        ErrorVariant::CustomError {
            message: message.to_string(),
        },
        pair.as_span(),
    )
}

fn expect_next<'i>(iter: &mut Pairs<'i, Rule>, owner: &Pair<'i, Rule>) -> BuildResult<Pair<'i, Rule>> {
    iter.next().ok_or_else(|| get_unexpected_error(1, owner))
}

struct AstBuilder {
    next_id: NodeId,
}

impl AstBuilder {
    fn new() -> Self {
        AstBuilder { next_id: 0 }
    }

    fn meta(&mut self, pair: &Pair<Rule>) -> Meta {
        let span = pair.as_span();
        self.meta_span(pair, span.end())
    }

    /// Meta starting where `pair` starts and ending at `end`, used for nodes
    /// folded out of an operator chain.
    fn meta_span(&mut self, pair: &Pair<Rule>, end: usize) -> Meta {
        let span = pair.as_span();
        let (line, column) = span.start_pos().line_col();
        let id = self.next_id;
        self.next_id += 1;
        Meta {
            id,
            start_index: span.start(),
            end_index: end,
            line,
            column,
        }
    }

    fn build_program(&mut self, mut pairs: Pairs<Rule>) -> BuildResult<ProgramData> {
        let script = match pairs.next() {
            Some(p) => p,
            None => {
                return Err(Error::new_from_pos(
                    ErrorVariant::CustomError {
                        message: "Empty parse result".to_string(),
                    },
                    Position::from_start(""),
                ))
            }
        };
        let meta = self.meta(&script);
        let body = self.build_statement_list(script.into_inner())?;
        Ok(ProgramData { meta, body })
    }

    fn build_statement_list(&mut self, pairs: Pairs<Rule>) -> BuildResult<Vec<StatementType>> {
        let mut s = vec![];
        for pair in pairs {
            if pair.as_rule() == Rule::EOI {
                continue;
            }
            s.push(self.build_statement(pair)?);
        }
        Ok(s)
    }

    fn build_block(&mut self, pair: Pair<Rule>) -> BuildResult<BlockStatementData> {
        let meta = self.meta(&pair);
        let body = self.build_statement_list(pair.into_inner())?;
        Ok(BlockStatementData { meta, body })
    }

    fn build_statement(&mut self, pair: Pair<Rule>) -> BuildResult<StatementType> {
        let owner = pair.clone();
        Ok(match pair.as_rule() {
            Rule::function_declaration => {
                StatementType::FunctionDeclaration(self.build_function(pair, FunctionKind::Normal)?)
            }
            Rule::lexical_declaration | Rule::variable_statement => {
                StatementType::VariableDeclaration(self.build_variable_declaration(pair)?)
            }
            Rule::block_statement => StatementType::BlockStatement(self.build_block(pair)?),
            Rule::empty_statement => StatementType::EmptyStatement {
                meta: self.meta(&pair),
            },
            Rule::debugger_statement => StatementType::DebuggerStatement {
                meta: self.meta(&pair),
            },
            Rule::expression_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let expression = self.build_expression(expect_next(&mut inner, &owner)?)?;
                StatementType::ExpressionStatement {
                    meta,
                    expression: Box::new(expression),
                }
            }
            Rule::if_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let test = self.build_expression(expect_next(&mut inner, &owner)?)?;
                let consequent = self.build_statement(expect_next(&mut inner, &owner)?)?;
                let alternate = match inner.next() {
                    Some(p) => Some(Box::new(self.build_statement(p)?)),
                    None => None,
                };
                StatementType::IfStatement {
                    meta,
                    test: Box::new(test),
                    consequent: Box::new(consequent),
                    alternate,
                }
            }
            Rule::for_in_statement | Rule::for_of_statement => {
                let is_of = pair.as_rule() == Rule::for_of_statement;
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let left_pair = expect_next(&mut inner, &owner)?;
                let left = if left_pair.as_rule() == Rule::for_declaration {
                    VariableDeclarationOrPattern::VariableDeclaration(
                        self.build_for_declaration(left_pair)?,
                    )
                } else {
                    let target = left_pair.clone();
                    let e = self.build_expression(left_pair)?;
                    VariableDeclarationOrPattern::Pattern(self.expression_to_pattern(e, &target)?)
                };
                let right = self.build_expression(expect_next(&mut inner, &owner)?)?;
                let body = self.build_statement(expect_next(&mut inner, &owner)?)?;
                let data = ForIteratorData {
                    meta,
                    left,
                    right: Box::new(right),
                    body: Box::new(body),
                };
                if is_of {
                    StatementType::ForOfStatement(data)
                } else {
                    StatementType::ForInStatement(data)
                }
            }
            Rule::for_statement => {
                let meta = self.meta(&pair);
                let mut parts: Vec<Pair<Rule>> = pair.into_inner().collect();
                let body_pair = parts.pop().ok_or_else(|| get_unexpected_error(2, &owner))?;
                let mut init = None;
                let mut test = None;
                let mut update = None;
                for p in parts {
                    match p.as_rule() {
                        Rule::for_var_init => {
                            init = Some(VariableDeclarationOrExpression::VariableDeclaration(
                                self.build_variable_declaration(p)?,
                            ))
                        }
                        Rule::for_test => {
                            let t = p.clone();
                            let e = expect_next(&mut p.into_inner(), &t)?;
                            test = Some(Box::new(self.build_expression(e)?));
                        }
                        Rule::for_update => {
                            let t = p.clone();
                            let e = expect_next(&mut p.into_inner(), &t)?;
                            update = Some(Box::new(self.build_expression(e)?));
                        }
                        _ => {
                            init = Some(VariableDeclarationOrExpression::Expression(Box::new(
                                self.build_expression(p)?,
                            )))
                        }
                    }
                }
                StatementType::ForStatement {
                    meta,
                    init,
                    test,
                    update,
                    body: Box::new(self.build_statement(body_pair)?),
                }
            }
            Rule::while_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let test = self.build_expression(expect_next(&mut inner, &owner)?)?;
                let body = self.build_statement(expect_next(&mut inner, &owner)?)?;
                StatementType::WhileStatement {
                    meta,
                    test: Box::new(test),
                    body: Box::new(body),
                }
            }
            Rule::do_while_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let body = self.build_statement(expect_next(&mut inner, &owner)?)?;
                let test = self.build_expression(expect_next(&mut inner, &owner)?)?;
                StatementType::DoWhileStatement {
                    meta,
                    test: Box::new(test),
                    body: Box::new(body),
                }
            }
            Rule::continue_statement | Rule::break_statement => {
                let is_break = pair.as_rule() == Rule::break_statement;
                let meta = self.meta(&pair);
                let label = match pair.into_inner().next() {
                    Some(p) => Some(self.build_identifier(&p)),
                    None => None,
                };
                if is_break {
                    StatementType::BreakStatement { meta, label }
                } else {
                    StatementType::ContinueStatement { meta, label }
                }
            }
            Rule::return_statement => {
                let meta = self.meta(&pair);
                let argument = match pair.into_inner().next() {
                    Some(p) => Some(Box::new(self.build_expression(p)?)),
                    None => None,
                };
                StatementType::ReturnStatement { meta, argument }
            }
            Rule::throw_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let argument = self.build_expression(expect_next(&mut inner, &owner)?)?;
                StatementType::ThrowStatement {
                    meta,
                    argument: Box::new(argument),
                }
            }
            Rule::with_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let object = self.build_expression(expect_next(&mut inner, &owner)?)?;
                let body = self.build_statement(expect_next(&mut inner, &owner)?)?;
                StatementType::WithStatement {
                    meta,
                    object: Box::new(object),
                    body: Box::new(body),
                }
            }
            Rule::switch_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let discriminant = self.build_expression(expect_next(&mut inner, &owner)?)?;
                let mut cases = vec![];
                for clause in inner {
                    let case_meta = self.meta(&clause);
                    let is_default = clause.as_rule() == Rule::default_clause;
                    let mut clause_inner = clause.into_inner();
                    let test = if is_default {
                        None
                    } else {
                        match clause_inner.next() {
                            Some(p) => Some(Box::new(self.build_expression(p)?)),
                            None => return Err(get_unexpected_error(3, &owner)),
                        }
                    };
                    let mut consequent = vec![];
                    for s in clause_inner {
                        consequent.push(self.build_statement(s)?);
                    }
                    cases.push(SwitchCaseData {
                        meta: case_meta,
                        test,
                        consequent,
                    });
                }
                StatementType::SwitchStatement {
                    meta,
                    discriminant: Box::new(discriminant),
                    cases,
                }
            }
            Rule::try_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let block = self.build_block(expect_next(&mut inner, &owner)?)?;
                let mut handler = None;
                let mut finalizer = None;
                for p in inner {
                    match p.as_rule() {
                        Rule::catch_clause => {
                            let catch_meta = self.meta(&p);
                            let clause = p.clone();
                            let mut parts: Vec<Pair<Rule>> = p.into_inner().collect();
                            let body_pair =
                                parts.pop().ok_or_else(|| get_unexpected_error(4, &clause))?;
                            let param = match parts.pop() {
                                Some(target) => Some(self.build_binding_target(target)?),
                                None => None,
                            };
                            handler = Some(CatchClauseData {
                                meta: catch_meta,
                                param,
                                body: self.build_block(body_pair)?,
                            });
                        }
                        Rule::finally_clause => {
                            let clause = p.clone();
                            let b = expect_next(&mut p.into_inner(), &clause)?;
                            finalizer = Some(self.build_block(b)?);
                        }
                        _ => return Err(get_unexpected_error(5, &p)),
                    }
                }
                if handler.is_none() && finalizer.is_none() {
                    return Err(get_custom_error("Missing catch or finally after try", &owner));
                }
                StatementType::TryStatement {
                    meta,
                    block,
                    handler,
                    finalizer,
                }
            }
            Rule::labelled_statement => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let label = self.build_identifier(&expect_next(&mut inner, &owner)?);
                let body = self.build_statement(expect_next(&mut inner, &owner)?)?;
                StatementType::LabeledStatement {
                    meta,
                    label,
                    body: Box::new(body),
                }
            }
            _ => return Err(get_unexpected_error(6, &pair)),
        })
    }

    fn build_variable_declaration(&mut self, pair: Pair<Rule>) -> BuildResult<VariableDeclarationData> {
        let meta = self.meta(&pair);
        let mut kind = VariableDeclarationKind::Var;
        let mut declarations = vec![];
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::let_or_const | Rule::var_let_or_const => {
                    kind = declaration_kind(p.as_str());
                }
                Rule::variable_declaration => {
                    let d_meta = self.meta(&p);
                    let owner = p.clone();
                    let mut inner = p.into_inner();
                    let id = self.build_binding_target(expect_next(&mut inner, &owner)?)?;
                    let init = match inner.next() {
                        Some(e) => Some(Box::new(self.build_expression(e)?)),
                        None => None,
                    };
                    declarations.push(VariableDeclaratorData {
                        meta: d_meta,
                        id,
                        init,
                    });
                }
                _ => return Err(get_unexpected_error(7, &p)),
            }
        }
        Ok(VariableDeclarationData {
            meta,
            declarations,
            kind,
        })
    }

    fn build_for_declaration(&mut self, pair: Pair<Rule>) -> BuildResult<VariableDeclarationData> {
        let meta = self.meta(&pair);
        let owner = pair.clone();
        let mut inner = pair.into_inner();
        let kind = declaration_kind(expect_next(&mut inner, &owner)?.as_str());
        let target = expect_next(&mut inner, &owner)?;
        let d_meta = self.meta(&target);
        let id = self.build_binding_target(target)?;
        Ok(VariableDeclarationData {
            meta,
            declarations: vec![VariableDeclaratorData {
                meta: d_meta,
                id,
                init: None,
            }],
            kind,
        })
    }

    fn build_identifier(&mut self, pair: &Pair<Rule>) -> IdentifierData {
        IdentifierData {
            name: pair.as_str().to_string(),
            meta: self.meta(pair),
        }
    }

    fn build_function(&mut self, pair: Pair<Rule>, kind: FunctionKind) -> BuildResult<FunctionData> {
        let meta = self.meta(&pair);
        let owner = pair.clone();
        let mut generator = false;
        let mut id = None;
        let mut params = vec![];
        let mut body = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::generator_marker => generator = true,
                Rule::identifier => id = Some(self.build_identifier(&p)),
                Rule::formal_parameters => params = self.build_formal_parameters(p)?,
                Rule::function_body => body = Some(self.build_function_body(p)?),
                _ => return Err(get_unexpected_error(8, &p)),
            }
        }
        let body = body.ok_or_else(|| get_unexpected_error(9, &owner))?;
        Ok(FunctionData {
            meta,
            id,
            params,
            body: FunctionBodyOrExpression::FunctionBody(body),
            generator,
            arrow: false,
            kind,
        })
    }

    /// Getter, setter and method definitions inside object literals.
    fn build_method(&mut self, pair: Pair<Rule>, kind: FunctionKind) -> BuildResult<(PropertyKeyType, FunctionData)> {
        let meta = self.meta(&pair);
        let owner = pair.clone();
        let mut generator = false;
        let mut key = None;
        let mut params = vec![];
        let mut body = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::generator_marker => generator = true,
                Rule::formal_parameters => params = self.build_formal_parameters(p)?,
                Rule::function_body => body = Some(self.build_function_body(p)?),
                _ => key = Some(self.build_property_name(p)?),
            }
        }
        let key = key.ok_or_else(|| get_unexpected_error(10, &owner))?;
        let body = body.ok_or_else(|| get_unexpected_error(11, &owner))?;
        Ok((
            key,
            FunctionData {
                meta,
                id: None,
                params,
                body: FunctionBodyOrExpression::FunctionBody(body),
                generator,
                arrow: false,
                kind,
            },
        ))
    }

    fn build_function_body(&mut self, pair: Pair<Rule>) -> BuildResult<FunctionBodyData> {
        let meta = self.meta(&pair);
        let body = self.build_statement_list(pair.into_inner())?;
        Ok(FunctionBodyData { meta, body })
    }

    fn build_formal_parameters(&mut self, pair: Pair<Rule>) -> BuildResult<Vec<PatternType>> {
        let mut params = vec![];
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::formal_parameter => params.push(self.build_binding_element(p)?),
                Rule::rest_parameter => {
                    let meta = self.meta(&p);
                    let owner = p.clone();
                    let target = expect_next(&mut p.into_inner(), &owner)?;
                    params.push(PatternType::RestElement {
                        meta,
                        argument: Box::new(self.build_binding_target(target)?),
                    });
                }
                _ => return Err(get_unexpected_error(12, &p)),
            }
        }
        Ok(params)
    }

    fn build_arrow_function(&mut self, pair: Pair<Rule>) -> BuildResult<FunctionData> {
        let meta = self.meta(&pair);
        let owner = pair.clone();
        let mut inner = pair.into_inner();
        let params_pair = expect_next(&mut inner, &owner)?;
        let mut params = vec![];
        for p in params_pair.into_inner() {
            match p.as_rule() {
                Rule::identifier => params.push(PatternType::Identifier(self.build_identifier(&p))),
                Rule::formal_parameters => params = self.build_formal_parameters(p)?,
                _ => return Err(get_unexpected_error(13, &p)),
            }
        }
        let body_pair = expect_next(&mut inner, &owner)?;
        let body = if body_pair.as_rule() == Rule::function_body {
            FunctionBodyOrExpression::FunctionBody(self.build_function_body(body_pair)?)
        } else {
            FunctionBodyOrExpression::Expression(Box::new(self.build_expression(body_pair)?))
        };
        Ok(FunctionData {
            meta,
            id: None,
            params,
            body,
            generator: false,
            arrow: true,
            kind: FunctionKind::Normal,
        })
    }

    fn build_binding_target(&mut self, pair: Pair<Rule>) -> BuildResult<PatternType> {
        let owner = pair.clone();
        Ok(match pair.as_rule() {
            Rule::identifier => PatternType::Identifier(self.build_identifier(&pair)),
            Rule::object_binding_pattern => {
                let meta = self.meta(&pair);
                let mut properties = vec![];
                let mut rest = None;
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::binding_rest_property => {
                            let r = p.clone();
                            let id = expect_next(&mut p.into_inner(), &r)?;
                            rest = Some(Box::new(PatternType::Identifier(self.build_identifier(&id))));
                        }
                        Rule::binding_property_full => {
                            let p_meta = self.meta(&p);
                            let prop = p.clone();
                            let mut inner = p.into_inner();
                            let key = self.build_property_name(expect_next(&mut inner, &prop)?)?;
                            let value = self.build_binding_element(expect_next(&mut inner, &prop)?)?;
                            properties.push(AssignmentPropertyData {
                                meta: p_meta,
                                key,
                                value,
                                shorthand: false,
                            });
                        }
                        Rule::single_name_binding => {
                            let p_meta = self.meta(&p);
                            let prop = p.clone();
                            let mut inner = p.into_inner();
                            let id_pair = expect_next(&mut inner, &prop)?;
                            let key = PropertyKeyType::Identifier(self.build_identifier(&id_pair));
                            let target = PatternType::Identifier(self.build_identifier(&id_pair));
                            let value = match inner.next() {
                                Some(e) => PatternType::AssignmentPattern {
                                    meta: self.meta(&prop),
                                    left: Box::new(target),
                                    right: Box::new(self.build_expression(e)?),
                                },
                                None => target,
                            };
                            properties.push(AssignmentPropertyData {
                                meta: p_meta,
                                key,
                                value,
                                shorthand: true,
                            });
                        }
                        _ => return Err(get_unexpected_error(14, &p)),
                    }
                }
                PatternType::ObjectPattern {
                    meta,
                    properties,
                    rest,
                }
            }
            Rule::array_binding_pattern => {
                let meta = self.meta(&pair);
                let mut elements = vec![];
                for slot in pair.into_inner() {
                    match slot.clone().into_inner().next() {
                        None => elements.push(None),
                        Some(p) if p.as_rule() == Rule::binding_rest_element => {
                            let r_meta = self.meta(&p);
                            let r = p.clone();
                            let target = expect_next(&mut p.into_inner(), &r)?;
                            elements.push(Some(PatternType::RestElement {
                                meta: r_meta,
                                argument: Box::new(self.build_binding_target(target)?),
                            }));
                        }
                        Some(p) => elements.push(Some(self.build_binding_element(p)?)),
                    }
                }
                drop_trailing_hole(&mut elements);
                PatternType::ArrayPattern { meta, elements }
            }
            _ => return Err(get_unexpected_error(15, &owner)),
        })
    }

    /// A binding target with an optional default (`x = 1`, `{a} = {}`).
    fn build_binding_element(&mut self, pair: Pair<Rule>) -> BuildResult<PatternType> {
        let meta = self.meta(&pair);
        let owner = pair.clone();
        let mut inner = pair.into_inner();
        let target = self.build_binding_target(expect_next(&mut inner, &owner)?)?;
        Ok(match inner.next() {
            Some(e) => PatternType::AssignmentPattern {
                meta,
                left: Box::new(target),
                right: Box::new(self.build_expression(e)?),
            },
            None => target,
        })
    }

    fn build_property_name(&mut self, pair: Pair<Rule>) -> BuildResult<PropertyKeyType> {
        let owner = pair.clone();
        Ok(match pair.as_rule() {
            Rule::computed_property_name => {
                let e = expect_next(&mut pair.into_inner(), &owner)?;
                PropertyKeyType::Computed(Box::new(self.build_expression(e)?))
            }
            Rule::identifier_name | Rule::identifier => {
                PropertyKeyType::Identifier(self.build_identifier(&pair))
            }
            Rule::string_literal | Rule::numeric_literal => {
                PropertyKeyType::Literal(self.build_literal(pair)?)
            }
            _ => return Err(get_unexpected_error(16, &owner)),
        })
    }

    fn build_literal(&mut self, pair: Pair<Rule>) -> BuildResult<LiteralData> {
        let meta = self.meta(&pair);
        let raw = pair.as_str().to_string();
        let value = match pair.as_rule() {
            Rule::null_literal => LiteralType::NullLiteral,
            Rule::boolean_literal => LiteralType::BooleanLiteral(raw == "true"),
            Rule::string_literal => LiteralType::StringLiteral(unescape(&raw[1..raw.len() - 1])),
            Rule::numeric_literal => {
                LiteralType::NumberLiteral(parse_number(&raw).ok_or_else(|| {
                    get_custom_error("Invalid numeric literal", &pair)
                })?)
            }
            _ => return Err(get_unexpected_error(17, &pair)),
        };
        Ok(LiteralData { meta, value, raw })
    }

    fn build_arguments(&mut self, pair: Pair<Rule>) -> BuildResult<Vec<ExpressionOrSpreadElement>> {
        let mut args = vec![];
        for p in pair.into_inner() {
            args.push(self.build_expression_or_spread(p)?);
        }
        Ok(args)
    }

    fn build_expression_or_spread(&mut self, pair: Pair<Rule>) -> BuildResult<ExpressionOrSpreadElement> {
        Ok(if pair.as_rule() == Rule::spread_element {
            let owner = pair.clone();
            let e = expect_next(&mut pair.into_inner(), &owner)?;
            ExpressionOrSpreadElement::SpreadElement(Box::new(self.build_expression(e)?))
        } else {
            ExpressionOrSpreadElement::Expression(Box::new(self.build_expression(pair)?))
        })
    }

    fn build_expression(&mut self, pair: Pair<Rule>) -> BuildResult<ExpressionType> {
        let owner = pair.clone();
        Ok(match pair.as_rule() {
            Rule::expression => {
                let meta = self.meta(&pair);
                let mut expressions = vec![];
                for p in pair.into_inner() {
                    expressions.push(self.build_expression(p)?);
                }
                if expressions.len() == 1 {
                    match expressions.pop() {
                        Some(e) => e,
                        None => return Err(get_unexpected_error(18, &owner)),
                    }
                } else {
                    ExpressionType::SequenceExpression { meta, expressions }
                }
            }
            Rule::parenthesized_expression => {
                let e = expect_next(&mut pair.into_inner(), &owner)?;
                self.build_expression(e)?
            }
            Rule::identifier => ExpressionType::Identifier(self.build_identifier(&pair)),
            Rule::this_expression => ExpressionType::ThisExpression {
                meta: self.meta(&pair),
            },
            Rule::null_literal | Rule::boolean_literal | Rule::numeric_literal | Rule::string_literal => {
                ExpressionType::Literal(self.build_literal(pair)?)
            }
            Rule::template_literal => {
                let meta = self.meta(&pair);
                let mut quasis = vec![];
                let mut expressions = vec![];
                let mut raw_value = String::new();
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::template_chars => raw_value.push_str(p.as_str()),
                        Rule::template_substitution => {
                            quasis.push(template_element(std::mem::take(&mut raw_value), false));
                            let s = p.clone();
                            let e = expect_next(&mut p.into_inner(), &s)?;
                            expressions.push(self.build_expression(e)?);
                        }
                        _ => return Err(get_unexpected_error(19, &p)),
                    }
                }
                quasis.push(template_element(raw_value, true));
                ExpressionType::TemplateLiteral(TemplateLiteralData {
                    meta,
                    quasis,
                    expressions,
                })
            }
            Rule::array_literal => {
                let meta = self.meta(&pair);
                let mut elements = vec![];
                for slot in pair.into_inner() {
                    match slot.into_inner().next() {
                        None => elements.push(None),
                        Some(p) => elements.push(Some(self.build_expression_or_spread(p)?)),
                    }
                }
                drop_trailing_hole(&mut elements);
                ExpressionType::ArrayExpression { meta, elements }
            }
            Rule::object_literal => {
                let meta = self.meta(&pair);
                let mut properties = vec![];
                for p in pair.into_inner() {
                    properties.push(self.build_property(p)?);
                }
                ExpressionType::ObjectExpression { meta, properties }
            }
            Rule::function_expression => {
                ExpressionType::FunctionExpression(self.build_function(pair, FunctionKind::Normal)?)
            }
            Rule::arrow_function => ExpressionType::ArrowFunctionExpression(self.build_arrow_function(pair)?),
            Rule::assignment => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let target_pair = expect_next(&mut inner, &owner)?;
                let operator = assignment_operator(expect_next(&mut inner, &owner)?.as_str())
                    .ok_or_else(|| get_unexpected_error(20, &owner))?;
                let target = self.build_expression(target_pair.clone())?;
                let left = if operator == AssignmentOperator::Equals {
                    self.expression_to_pattern(target, &target_pair)?
                } else {
                    match target {
                        ExpressionType::Identifier(id) => PatternType::Identifier(id),
                        ExpressionType::MemberExpression(m) => PatternType::MemberExpression(m),
                        _ => return Err(get_custom_error("Invalid assignment target", &target_pair)),
                    }
                };
                let right = self.build_expression(expect_next(&mut inner, &owner)?)?;
                ExpressionType::AssignmentExpression {
                    meta,
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            Rule::yield_expression => {
                let meta = self.meta(&pair);
                let mut delegate = false;
                let mut argument = None;
                for p in pair.into_inner() {
                    if p.as_rule() == Rule::yield_delegate {
                        delegate = true;
                    } else {
                        argument = Some(Box::new(self.build_expression(p)?));
                    }
                }
                ExpressionType::YieldExpression {
                    meta,
                    argument,
                    delegate,
                }
            }
            Rule::conditional_expression => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let test = self.build_expression(expect_next(&mut inner, &owner)?)?;
                match inner.next() {
                    None => test,
                    Some(c) => {
                        let consequent = self.build_expression(c)?;
                        let alternate = self.build_expression(expect_next(&mut inner, &owner)?)?;
                        ExpressionType::ConditionalExpression {
                            meta,
                            test: Box::new(test),
                            consequent: Box::new(consequent),
                            alternate: Box::new(alternate),
                        }
                    }
                }
            }
            Rule::logical_or_expression
            | Rule::multiplicative_expression
            | Rule::additive_expression
            | Rule::shift_expression
            | Rule::relational_expression
            | Rule::equality_expression => self.build_operator_chain(pair, None)?,
            Rule::logical_and_expression => self.build_operator_chain(pair, Some("&&"))?,
            Rule::bitwise_or_expression => self.build_operator_chain(pair, Some("|"))?,
            Rule::bitwise_xor_expression => self.build_operator_chain(pair, Some("^"))?,
            Rule::bitwise_and_expression => self.build_operator_chain(pair, Some("&"))?,
            Rule::unary_op_expression => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let operator = match expect_next(&mut inner, &owner)?.as_str() {
                    "-" => UnaryOperator::Minus,
                    "+" => UnaryOperator::Plus,
                    "!" => UnaryOperator::LogicalNot,
                    "~" => UnaryOperator::BitwiseNot,
                    "typeof" => UnaryOperator::TypeOf,
                    "void" => UnaryOperator::Void,
                    "delete" => UnaryOperator::Delete,
                    _ => return Err(get_unexpected_error(21, &owner)),
                };
                let argument = self.build_expression(expect_next(&mut inner, &owner)?)?;
                ExpressionType::UnaryExpression {
                    meta,
                    operator,
                    argument: Box::new(argument),
                }
            }
            Rule::prefix_update | Rule::postfix_update => {
                let prefix = pair.as_rule() == Rule::prefix_update;
                let meta = self.meta(&pair);
                let mut operator = UpdateOperator::PlusPlus;
                let mut argument = None;
                for p in pair.into_inner() {
                    if p.as_rule() == Rule::update_operator {
                        if p.as_str() == "--" {
                            operator = UpdateOperator::MinusMinus;
                        }
                    } else {
                        argument = Some(self.build_expression(p)?);
                    }
                }
                let argument = argument.ok_or_else(|| get_unexpected_error(22, &owner))?;
                ExpressionType::UpdateExpression {
                    meta,
                    operator,
                    argument: Box::new(argument),
                    prefix,
                }
            }
            Rule::left_hand_side_expression | Rule::new_callee => {
                let mut inner = pair.into_inner();
                let mut object = self.build_expression(expect_next(&mut inner, &owner)?)?;
                for tail in inner {
                    let end = tail.as_span().end();
                    let meta = self.meta_span(&owner, end);
                    object = match tail.as_rule() {
                        Rule::arguments => ExpressionType::CallExpression {
                            meta,
                            callee: Box::new(object),
                            arguments: self.build_arguments(tail)?,
                        },
                        Rule::property_access => {
                            let t = tail.clone();
                            let name = expect_next(&mut tail.into_inner(), &t)?;
                            ExpressionType::MemberExpression(MemberExpressionType::SimpleMemberExpression {
                                meta,
                                object: Box::new(object),
                                property: self.build_identifier(&name),
                            })
                        }
                        Rule::computed_access => {
                            let t = tail.clone();
                            let e = expect_next(&mut tail.into_inner(), &t)?;
                            ExpressionType::MemberExpression(
                                MemberExpressionType::ComputedMemberExpression {
                                    meta,
                                    object: Box::new(object),
                                    property: Box::new(self.build_expression(e)?),
                                },
                            )
                        }
                        _ => return Err(get_unexpected_error(23, &tail)),
                    };
                }
                object
            }
            Rule::new_expression => {
                let meta = self.meta(&pair);
                let mut inner = pair.into_inner();
                let callee = self.build_expression(expect_next(&mut inner, &owner)?)?;
                let arguments = match inner.next() {
                    Some(a) => self.build_arguments(a)?,
                    None => vec![],
                };
                ExpressionType::NewExpression {
                    meta,
                    callee: Box::new(callee),
                    arguments,
                }
            }
            _ => return Err(get_unexpected_error(24, &pair)),
        })
    }

    fn build_property(&mut self, pair: Pair<Rule>) -> BuildResult<PropertyData> {
        let meta = self.meta(&pair);
        let owner = pair.clone();
        Ok(match pair.as_rule() {
            Rule::getter_definition | Rule::setter_definition | Rule::method_definition => {
                let (kind, fn_kind) = match pair.as_rule() {
                    Rule::getter_definition => (PropertyKind::Get, FunctionKind::Getter),
                    Rule::setter_definition => (PropertyKind::Set, FunctionKind::Setter),
                    _ => (PropertyKind::Init, FunctionKind::Method),
                };
                let (key, f) = self.build_method(pair, fn_kind)?;
                PropertyData {
                    meta,
                    key,
                    value: Box::new(ExpressionType::FunctionExpression(f)),
                    kind,
                    method: fn_kind == FunctionKind::Method,
                    shorthand: false,
                }
            }
            Rule::property_assignment => {
                let mut inner = pair.into_inner();
                let key = self.build_property_name(expect_next(&mut inner, &owner)?)?;
                let value = self.build_expression(expect_next(&mut inner, &owner)?)?;
                PropertyData {
                    meta,
                    key,
                    value: Box::new(value),
                    kind: PropertyKind::Init,
                    method: false,
                    shorthand: false,
                }
            }
            Rule::shorthand_property => {
                let mut inner = pair.into_inner();
                let id_pair = expect_next(&mut inner, &owner)?;
                let key = PropertyKeyType::Identifier(self.build_identifier(&id_pair));
                let reference = self.build_identifier(&id_pair);
                // `{a = 1}` only makes sense as a destructuring target; it is
                // kept as an assignment so the pattern conversion can pick it up.
                let value = match inner.next() {
                    Some(e) => ExpressionType::AssignmentExpression {
                        meta: self.meta(&owner),
                        operator: AssignmentOperator::Equals,
                        left: Box::new(PatternType::Identifier(reference)),
                        right: Box::new(self.build_expression(e)?),
                    },
                    None => ExpressionType::Identifier(reference),
                };
                PropertyData {
                    meta,
                    key,
                    value: Box::new(value),
                    kind: PropertyKind::Init,
                    method: false,
                    shorthand: true,
                }
            }
            _ => return Err(get_unexpected_error(25, &owner)),
        })
    }

    fn build_operator_chain(&mut self, pair: Pair<Rule>, implicit: Option<&str>) -> BuildResult<ExpressionType> {
        let owner = pair.clone();
        let parts: Vec<Pair<Rule>> = pair.into_inner().collect();
        let mut iter = parts.into_iter();
        let first = iter.next().ok_or_else(|| get_unexpected_error(26, &owner))?;
        let mut left = self.build_expression(first)?;
        loop {
            let op = match implicit {
                Some(op) => op.to_string(),
                None => match iter.next() {
                    Some(p) => p.as_str().to_string(),
                    None => break,
                },
            };
            let right_pair = match iter.next() {
                Some(p) => p,
                None if implicit.is_some() => break,
                None => return Err(get_unexpected_error(27, &owner)),
            };
            let meta = self.meta_span(&owner, right_pair.as_span().end());
            let right = Box::new(self.build_expression(right_pair)?);
            let l = Box::new(left);
            left = match op.as_str() {
                "||" => ExpressionType::LogicalExpression {
                    meta,
                    operator: LogicalOperator::Or,
                    left: l,
                    right,
                },
                "&&" => ExpressionType::LogicalExpression {
                    meta,
                    operator: LogicalOperator::And,
                    left: l,
                    right,
                },
                "??" => ExpressionType::LogicalExpression {
                    meta,
                    operator: LogicalOperator::Nullish,
                    left: l,
                    right,
                },
                other => {
                    let operator =
                        binary_operator(other).ok_or_else(|| get_unexpected_error(28, &owner))?;
                    ExpressionType::BinaryExpression {
                        meta,
                        operator,
                        left: l,
                        right,
                    }
                }
            };
        }
        Ok(left)
    }

    /// Reinterprets an expression as an assignment target. Array and object
    /// literals become destructuring patterns.
    fn expression_to_pattern(&mut self, expr: ExpressionType, pair: &Pair<Rule>) -> BuildResult<PatternType> {
        Ok(match expr {
            ExpressionType::Identifier(id) => PatternType::Identifier(id),
            ExpressionType::MemberExpression(m) => PatternType::MemberExpression(m),
            ExpressionType::ArrayExpression { meta, elements } => {
                let mut patterns = vec![];
                for e in elements {
                    patterns.push(match e {
                        None => None,
                        Some(ExpressionOrSpreadElement::Expression(e)) => {
                            Some(self.expression_to_pattern(*e, pair)?)
                        }
                        Some(ExpressionOrSpreadElement::SpreadElement(e)) => {
                            let argument = self.expression_to_pattern(*e, pair)?;
                            Some(PatternType::RestElement {
                                meta: argument.get_meta().clone(),
                                argument: Box::new(argument),
                            })
                        }
                    });
                }
                PatternType::ArrayPattern {
                    meta,
                    elements: patterns,
                }
            }
            ExpressionType::ObjectExpression { meta, properties } => {
                let mut assignment_properties = vec![];
                for p in properties {
                    if p.kind != PropertyKind::Init || p.method {
                        return Err(get_custom_error("Invalid destructuring assignment target", pair));
                    }
                    assignment_properties.push(AssignmentPropertyData {
                        meta: p.meta,
                        key: p.key,
                        value: self.expression_to_pattern(*p.value, pair)?,
                        shorthand: p.shorthand,
                    });
                }
                PatternType::ObjectPattern {
                    meta,
                    properties: assignment_properties,
                    rest: None,
                }
            }
            ExpressionType::AssignmentExpression {
                meta,
                operator: AssignmentOperator::Equals,
                left,
                right,
            } => PatternType::AssignmentPattern { meta, left, right },
            _ => return Err(get_custom_error("Invalid assignment target", pair)),
        })
    }
}

fn drop_trailing_hole<T>(elements: &mut Vec<Option<T>>) {
    if let Some(None) = elements.last() {
        elements.pop();
    }
}

fn declaration_kind(text: &str) -> VariableDeclarationKind {
    match text {
        "let" => VariableDeclarationKind::Let,
        "const" => VariableDeclarationKind::Const,
        _ => VariableDeclarationKind::Var,
    }
}

fn template_element(raw_value: String, tail: bool) -> TemplateElementData {
    TemplateElementData {
        tail,
        cooked_value: unescape(&raw_value),
        raw_value,
    }
}

fn assignment_operator(text: &str) -> Option<AssignmentOperator> {
    Some(match text {
        "=" => AssignmentOperator::Equals,
        "+=" => AssignmentOperator::AddEquals,
        "-=" => AssignmentOperator::SubtractEquals,
        "*=" => AssignmentOperator::MultiplyEquals,
        "/=" => AssignmentOperator::DivideEquals,
        "%=" => AssignmentOperator::ModuloEquals,
        "<<=" => AssignmentOperator::BitwiseLeftShiftEquals,
        ">>=" => AssignmentOperator::BitwiseRightShiftEquals,
        ">>>=" => AssignmentOperator::BitwiseUnsignedRightShiftEquals,
        "|=" => AssignmentOperator::BitwiseOrEquals,
        "&=" => AssignmentOperator::BitwiseAndEquals,
        "^=" => AssignmentOperator::BitwiseXorEquals,
        "&&=" => AssignmentOperator::LogicalAndEquals,
        "||=" => AssignmentOperator::LogicalOrEquals,
        "??=" => AssignmentOperator::NullishEquals,
        _ => return None,
    })
}

fn binary_operator(text: &str) -> Option<BinaryOperator> {
    Some(match text {
        "==" => BinaryOperator::LooselyEqual,
        "!=" => BinaryOperator::LooselyUnequal,
        "===" => BinaryOperator::StrictlyEqual,
        "!==" => BinaryOperator::StrictlyUnequal,
        "<" => BinaryOperator::LessThan,
        "<=" => BinaryOperator::LessThanEqual,
        ">" => BinaryOperator::GreaterThan,
        ">=" => BinaryOperator::GreaterThanEqual,
        "<<" => BinaryOperator::BitwiseLeftShift,
        ">>" => BinaryOperator::BitwiseRightShift,
        ">>>" => BinaryOperator::BitwiseUnsignedRightShift,
        "+" => BinaryOperator::Add,
        "-" => BinaryOperator::Subtract,
        "*" => BinaryOperator::Multiply,
        "/" => BinaryOperator::Divide,
        "%" => BinaryOperator::Modulo,
        "|" => BinaryOperator::BitwiseOr,
        "&" => BinaryOperator::BitwiseAnd,
        "^" => BinaryOperator::BitwiseXor,
        "in" => BinaryOperator::In,
        "instanceof" => BinaryOperator::InstanceOf,
        _ => return None,
    })
}

fn parse_number(raw: &str) -> Option<NumberLiteralType> {
    if raw.starts_with("0x") || raw.starts_with("0X") {
        return i64::from_str_radix(&raw[2..], 16)
            .ok()
            .map(NumberLiteralType::IntegerLiteral);
    }
    if !raw.contains(|c| c == '.' || c == 'e' || c == 'E') {
        if let Ok(i) = raw.parse::<i64>() {
            return Some(NumberLiteralType::IntegerLiteral(i));
        }
    }
    raw.parse::<f64>().ok().map(NumberLiteralType::FloatLiteral)
}

/// Cooks the body of a string or template literal.
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000C}'),
            Some('v') => out.push('\u{000B}'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            // Line continuation.
            Some('\n') => {}
            Some('\r') => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_handles_common_sequences() {
        assert_eq!(unescape(r"a\nb"), "a\nb");
        assert_eq!(unescape(r"\x41B"), "AB");
        assert_eq!(unescape(r"it\'s"), "it's");
    }

    #[test]
    fn test_parse_number_classifies_integers_and_floats() {
        assert_eq!(parse_number("42"), Some(NumberLiteralType::IntegerLiteral(42)));
        assert_eq!(parse_number("0x1F"), Some(NumberLiteralType::IntegerLiteral(31)));
        assert_eq!(parse_number("1.5"), Some(NumberLiteralType::FloatLiteral(1.5)));
        assert_eq!(parse_number("1e3"), Some(NumberLiteralType::FloatLiteral(1000.0)));
    }

    #[test]
    fn test_token_tree_contains_rules() {
        let tree = JsParser::parse_to_token_tree("var a = 1;").unwrap();
        assert!(tree.contains("variable_statement"));
        assert!(tree.contains("numeric_literal"));
    }

    #[test]
    fn test_node_ids_are_unique() {
        let program = JsParser::parse_to_ast_from_str("var a = 1; function f(x) { return x + a; }").unwrap();
        let mut ids = vec![program.meta.id];
        for s in &program.body {
            ids.push(s.get_meta().id);
        }
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }
}
