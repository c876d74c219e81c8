use std::fmt::Debug;

/// Identity of a syntax node, unique within one parse.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    pub id: NodeId,
    pub start_index: usize,
    pub end_index: usize,
    pub line: usize,
    pub column: usize,
}

pub trait HasMeta {
    fn get_meta(&self) -> &Meta;
}

#[derive(Debug)]
pub struct IdentifierData {
    pub name: String,
    pub meta: Meta,
}

impl HasMeta for IdentifierData {
    fn get_meta(&self) -> &Meta {
        &self.meta
    }
}

#[derive(Debug)]
pub enum ExpressionType {
    Identifier(IdentifierData),
    Literal(LiteralData),
    ThisExpression {
        meta: Meta,
    },
    ArrayExpression {
        meta: Meta,
        elements: Vec<Option<ExpressionOrSpreadElement>>,
    },
    ObjectExpression {
        meta: Meta,
        properties: Vec<PropertyData>,
    },
    FunctionExpression(FunctionData),
    ArrowFunctionExpression(FunctionData),
    UnaryExpression {
        meta: Meta,
        operator: UnaryOperator,
        argument: Box<ExpressionType>,
    },
    UpdateExpression {
        meta: Meta,
        operator: UpdateOperator,
        argument: Box<ExpressionType>,
        prefix: bool,
    },
    BinaryExpression {
        meta: Meta,
        operator: BinaryOperator,
        left: Box<ExpressionType>,
        right: Box<ExpressionType>,
    },
    AssignmentExpression {
        meta: Meta,
        operator: AssignmentOperator,
        left: Box<PatternType>,
        right: Box<ExpressionType>,
    },
    LogicalExpression {
        meta: Meta,
        operator: LogicalOperator,
        left: Box<ExpressionType>,
        right: Box<ExpressionType>,
    },
    ConditionalExpression {
        meta: Meta,
        test: Box<ExpressionType>,
        consequent: Box<ExpressionType>,
        alternate: Box<ExpressionType>,
    },
    CallExpression {
        //A function or method call expression.
        meta: Meta,
        callee: Box<ExpressionType>,
        arguments: Vec<ExpressionOrSpreadElement>,
    },
    NewExpression {
        meta: Meta,
        callee: Box<ExpressionType>,
        arguments: Vec<ExpressionOrSpreadElement>,
    },
    MemberExpression(MemberExpressionType),
    SequenceExpression {
        //A comma-separated sequence of expressions
        meta: Meta,
        expressions: Vec<ExpressionType>,
    },
    YieldExpression {
        meta: Meta,
        argument: Option<Box<ExpressionType>>,
        delegate: bool,
    },
    TemplateLiteral(TemplateLiteralData),
}

impl HasMeta for ExpressionType {
    fn get_meta(&self) -> &Meta {
        match self {
            ExpressionType::Identifier(data) => &data.meta,
            ExpressionType::Literal(data) => &data.meta,
            ExpressionType::ThisExpression { meta } => meta,
            ExpressionType::ArrayExpression { meta, .. } => meta,
            ExpressionType::ObjectExpression { meta, .. } => meta,
            ExpressionType::FunctionExpression(data) => &data.meta,
            ExpressionType::ArrowFunctionExpression(data) => &data.meta,
            ExpressionType::UnaryExpression { meta, .. } => meta,
            ExpressionType::UpdateExpression { meta, .. } => meta,
            ExpressionType::BinaryExpression { meta, .. } => meta,
            ExpressionType::AssignmentExpression { meta, .. } => meta,
            ExpressionType::LogicalExpression { meta, .. } => meta,
            ExpressionType::ConditionalExpression { meta, .. } => meta,
            ExpressionType::CallExpression { meta, .. } => meta,
            ExpressionType::NewExpression { meta, .. } => meta,
            ExpressionType::MemberExpression(data) => data.get_meta(),
            ExpressionType::SequenceExpression { meta, .. } => meta,
            ExpressionType::YieldExpression { meta, .. } => meta,
            ExpressionType::TemplateLiteral(data) => &data.meta,
        }
    }
}

#[derive(Debug)]
pub enum PatternType {
    Identifier(IdentifierData),
    /// Only valid as an assignment target, never in a binding position.
    MemberExpression(MemberExpressionType),
    ObjectPattern {
        meta: Meta,
        properties: Vec<AssignmentPropertyData>,
        rest: Option<Box<PatternType>>,
    },
    ArrayPattern {
        meta: Meta,
        elements: Vec<Option<PatternType>>,
    },
    RestElement {
        meta: Meta,
        argument: Box<PatternType>,
    },
    AssignmentPattern {
        meta: Meta,
        left: Box<PatternType>,
        right: Box<ExpressionType>,
    },
}

impl HasMeta for PatternType {
    fn get_meta(&self) -> &Meta {
        match self {
            PatternType::Identifier(data) => &data.meta,
            PatternType::MemberExpression(data) => data.get_meta(),
            PatternType::ObjectPattern { meta, .. } => meta,
            PatternType::ArrayPattern { meta, .. } => meta,
            PatternType::RestElement { meta, .. } => meta,
            PatternType::AssignmentPattern { meta, .. } => meta,
        }
    }
}

impl PatternType {
    /// Names bound by this pattern, in source order.
    pub fn bound_names(&self) -> Vec<&IdentifierData> {
        let mut names = vec![];
        self.collect_bound_names(&mut names);
        names
    }

    fn collect_bound_names<'a>(&'a self, names: &mut Vec<&'a IdentifierData>) {
        match self {
            PatternType::Identifier(id) => names.push(id),
            PatternType::MemberExpression(_) => {}
            PatternType::ObjectPattern {
                properties, rest, ..
            } => {
                for p in properties {
                    p.value.collect_bound_names(names);
                }
                if let Some(r) = rest {
                    r.collect_bound_names(names);
                }
            }
            PatternType::ArrayPattern { elements, .. } => {
                for e in elements.iter().flatten() {
                    e.collect_bound_names(names);
                }
            }
            PatternType::RestElement { argument, .. } => argument.collect_bound_names(names),
            PatternType::AssignmentPattern { left, .. } => left.collect_bound_names(names),
        }
    }

    pub fn is_simple_identifier(&self) -> bool {
        matches!(self, PatternType::Identifier(_))
    }
}

#[derive(Debug)]
pub struct TemplateLiteralData {
    pub meta: Meta,
    pub quasis: Vec<TemplateElementData>,
    pub expressions: Vec<ExpressionType>,
}

#[derive(Debug)]
pub struct TemplateElementData {
    pub tail: bool,
    pub cooked_value: String,
    pub raw_value: String,
}

#[derive(Debug)]
pub enum FunctionBodyOrExpression {
    FunctionBody(FunctionBodyData),
    Expression(Box<ExpressionType>),
}

#[derive(Debug)]
pub enum MemberExpressionType {
    SimpleMemberExpression {
        meta: Meta,
        object: Box<ExpressionType>,
        property: IdentifierData,
    },
    ComputedMemberExpression {
        meta: Meta,
        object: Box<ExpressionType>,
        property: Box<ExpressionType>,
    },
}

impl HasMeta for MemberExpressionType {
    fn get_meta(&self) -> &Meta {
        match self {
            MemberExpressionType::SimpleMemberExpression { meta, .. } => meta,
            MemberExpressionType::ComputedMemberExpression { meta, .. } => meta,
        }
    }
}

#[derive(Debug)]
pub enum ExpressionOrSpreadElement {
    Expression(Box<ExpressionType>),
    SpreadElement(Box<ExpressionType>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssignmentOperator {
    Equals,
    AddEquals,
    SubtractEquals,
    MultiplyEquals,
    DivideEquals,
    ModuloEquals,
    BitwiseLeftShiftEquals,
    BitwiseRightShiftEquals,
    BitwiseUnsignedRightShiftEquals,
    BitwiseOrEquals,
    BitwiseAndEquals,
    BitwiseXorEquals,
    LogicalAndEquals,
    LogicalOrEquals,
    NullishEquals,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperator {
    Minus,
    Plus,
    LogicalNot,
    BitwiseNot,
    TypeOf,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOperator {
    PlusPlus,
    MinusMinus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOperator {
    LooselyEqual,
    LooselyUnequal,
    StrictlyEqual,
    StrictlyUnequal,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    BitwiseLeftShift,
    BitwiseRightShift,
    BitwiseUnsignedRightShift,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    BitwiseOr,
    BitwiseAnd,
    BitwiseXor,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalOperator {
    Or,
    And,
    Nullish,
}

#[derive(Debug)]
pub struct LiteralData {
    pub meta: Meta,
    pub value: LiteralType,
    /// Source text of the literal, quotes included. Directive prologues are
    /// recognised on this, not on the cooked value.
    pub raw: String,
}

#[derive(Debug, PartialEq)]
pub enum LiteralType {
    StringLiteral(String),
    BooleanLiteral(bool),
    NullLiteral,
    NumberLiteral(NumberLiteralType),
}

#[derive(Debug, PartialEq)]
pub enum NumberLiteralType {
    IntegerLiteral(i64),
    FloatLiteral(f64),
}

#[derive(Debug)]
pub struct ProgramData {
    pub meta: Meta,
    pub body: Vec<StatementType>,
}

impl HasMeta for ProgramData {
    fn get_meta(&self) -> &Meta {
        &self.meta
    }
}

#[derive(Debug)]
pub struct BlockStatementData {
    pub meta: Meta,
    pub body: Vec<StatementType>,
}

#[derive(Debug)]
pub enum StatementType {
    ExpressionStatement {
        meta: Meta,
        expression: Box<ExpressionType>,
    },
    BlockStatement(BlockStatementData),
    EmptyStatement {
        meta: Meta,
    },
    DebuggerStatement {
        meta: Meta,
    },
    WithStatement {
        meta: Meta,
        object: Box<ExpressionType>,
        body: Box<StatementType>,
    },
    ReturnStatement {
        meta: Meta,
        argument: Option<Box<ExpressionType>>,
    },
    LabeledStatement {
        meta: Meta,
        label: IdentifierData,
        body: Box<StatementType>,
    },
    BreakStatement {
        meta: Meta,
        label: Option<IdentifierData>,
    },
    ContinueStatement {
        meta: Meta,
        label: Option<IdentifierData>,
    },
    IfStatement {
        meta: Meta,
        test: Box<ExpressionType>,
        consequent: Box<StatementType>,
        alternate: Option<Box<StatementType>>,
    },
    SwitchStatement {
        meta: Meta,
        discriminant: Box<ExpressionType>,
        cases: Vec<SwitchCaseData>,
    },
    ThrowStatement {
        meta: Meta,
        argument: Box<ExpressionType>,
    },
    TryStatement {
        meta: Meta,
        block: BlockStatementData,
        handler: Option<CatchClauseData>,
        finalizer: Option<BlockStatementData>,
    },
    WhileStatement {
        meta: Meta,
        test: Box<ExpressionType>,
        body: Box<StatementType>,
    },
    DoWhileStatement {
        meta: Meta,
        test: Box<ExpressionType>,
        body: Box<StatementType>,
    },
    ForStatement {
        meta: Meta,
        init: Option<VariableDeclarationOrExpression>,
        test: Option<Box<ExpressionType>>,
        update: Option<Box<ExpressionType>>,
        body: Box<StatementType>,
    },
    ForInStatement(ForIteratorData),
    ForOfStatement(ForIteratorData),
    FunctionDeclaration(FunctionData),
    VariableDeclaration(VariableDeclarationData),
}

impl HasMeta for StatementType {
    fn get_meta(&self) -> &Meta {
        match self {
            StatementType::ExpressionStatement { meta, .. } => meta,
            StatementType::BlockStatement(data) => &data.meta,
            StatementType::EmptyStatement { meta } => meta,
            StatementType::DebuggerStatement { meta } => meta,
            StatementType::WithStatement { meta, .. } => meta,
            StatementType::ReturnStatement { meta, .. } => meta,
            StatementType::LabeledStatement { meta, .. } => meta,
            StatementType::BreakStatement { meta, .. } => meta,
            StatementType::ContinueStatement { meta, .. } => meta,
            StatementType::IfStatement { meta, .. } => meta,
            StatementType::SwitchStatement { meta, .. } => meta,
            StatementType::ThrowStatement { meta, .. } => meta,
            StatementType::TryStatement { meta, .. } => meta,
            StatementType::WhileStatement { meta, .. } => meta,
            StatementType::DoWhileStatement { meta, .. } => meta,
            StatementType::ForStatement { meta, .. } => meta,
            StatementType::ForInStatement(data) => &data.meta,
            StatementType::ForOfStatement(data) => &data.meta,
            StatementType::FunctionDeclaration(data) => &data.meta,
            StatementType::VariableDeclaration(data) => &data.meta,
        }
    }
}

#[derive(Debug)]
pub struct FunctionBodyData {
    pub meta: Meta,
    pub body: Vec<StatementType>,
}

#[derive(Debug)]
pub struct ForIteratorData {
    pub meta: Meta,
    pub left: VariableDeclarationOrPattern,
    pub right: Box<ExpressionType>,
    pub body: Box<StatementType>,
}

#[derive(Debug)]
pub enum VariableDeclarationOrExpression {
    VariableDeclaration(VariableDeclarationData),
    Expression(Box<ExpressionType>),
}

#[derive(Debug)]
pub enum VariableDeclarationOrPattern {
    VariableDeclaration(VariableDeclarationData),
    Pattern(PatternType),
}

#[derive(Debug)]
pub struct VariableDeclarationData {
    pub meta: Meta,
    pub declarations: Vec<VariableDeclaratorData>,
    pub kind: VariableDeclarationKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableDeclarationKind {
    Var,
    Let,
    Const,
}

#[derive(Debug)]
pub struct VariableDeclaratorData {
    pub meta: Meta,
    pub id: PatternType,
    pub init: Option<Box<ExpressionType>>,
}

#[derive(Debug)]
pub struct SwitchCaseData {
    pub meta: Meta,
    pub test: Option<Box<ExpressionType>>,
    pub consequent: Vec<StatementType>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FunctionKind {
    Normal,
    Method,
    Getter,
    Setter,
}

#[derive(Debug)]
pub struct FunctionData {
    pub meta: Meta,
    pub id: Option<IdentifierData>,
    pub params: Vec<PatternType>,
    pub body: FunctionBodyOrExpression,
    pub generator: bool,
    pub arrow: bool,
    pub kind: FunctionKind,
}

impl HasMeta for FunctionData {
    fn get_meta(&self) -> &Meta {
        &self.meta
    }
}

impl FunctionData {
    /// True when every parameter is a plain identifier without default or rest.
    pub fn has_simple_parameter_list(&self) -> bool {
        self.params.iter().all(|p| p.is_simple_identifier())
    }

    pub fn name(&self) -> Option<&str> {
        self.id.as_ref().map(|id| id.name.as_str())
    }
}

#[derive(Debug)]
pub struct CatchClauseData {
    pub meta: Meta,
    pub param: Option<PatternType>,
    pub body: BlockStatementData,
}

#[derive(Debug)]
pub enum PropertyKeyType {
    Identifier(IdentifierData),
    Literal(LiteralData),
    Computed(Box<ExpressionType>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyKind {
    Init,
    Get,
    Set,
}

#[derive(Debug)]
pub struct PropertyData {
    pub meta: Meta,
    pub key: PropertyKeyType,
    pub value: Box<ExpressionType>,
    pub kind: PropertyKind,
    pub method: bool,
    pub shorthand: bool,
}

#[derive(Debug)]
pub struct AssignmentPropertyData {
    pub meta: Meta,
    pub key: PropertyKeyType,
    pub value: PatternType,
    pub shorthand: bool,
}
