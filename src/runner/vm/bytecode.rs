//! Register bytecode: operands, the fixed-size instruction format, compiled
//! functions and a builder that stands in for code generation.

use std::cell::RefCell;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use thiserror::Error;

use crate::compiler::{Context, UsesArgumentsObject};
use crate::runner::ds::value::JsValue;
use crate::runner::vm::call_data::CALL_DATA_HEADER;
use crate::runner::vm::lookup::{Lookup, LookupKind};

/// Instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ── Moves & constants ────────────────────────────────────
    /// result = a.
    Move,
    /// result = runtime string `index`.
    LoadRuntimeString,
    /// result = closure over nested function `index`.
    LoadClosure,
    /// result = this.
    LoadThis,

    // ── Names ────────────────────────────────────────────────
    /// result = scope-chain lookup of name `index`.
    LoadName,
    /// scope-chain store of c into name `index`.
    StoreName,
    /// result = global through lookup `index`.
    GetGlobalLookup,

    // ── Elements & properties ────────────────────────────────
    /// result = a[b].
    LoadElement,
    /// result = a[b] through lookup `index`.
    LoadElementLookup,
    /// a[b] = c.
    StoreElement,
    /// a[b] = c through lookup `index`.
    StoreElementLookup,
    /// result = a.name, name `index`.
    LoadProperty,
    /// result = a.name through lookup `index`.
    GetLookup,
    /// a.name = c, name `index`.
    StoreProperty,
    /// a.name = c through lookup `index`.
    SetLookup,

    // ── Frame ────────────────────────────────────────────────
    /// Allocate `index` temporaries.
    InitStackFrame,

    // ── Calls ────────────────────────────────────────────────
    // The CallData region starts at temp c.index; `argc` arguments follow the
    // header.
    /// result = a(...).
    CallValue,
    /// result = a.name(...), name `index`.
    CallProperty,
    /// result = a.name(...) through lookup `index`.
    CallPropertyLookup,
    /// result = a[b](...).
    CallElement,
    /// result = name(...) resolved on the scope chain, name `index`.
    CallActivationProperty,
    /// result = global(...) through lookup `index`.
    CallGlobalLookup,

    // ── Construct ────────────────────────────────────────────
    /// result = new a(...).
    CreateValue,
    /// result = new a.name(...), name `index`.
    CreateProperty,
    /// result = new a.name(...) through lookup `index`.
    ConstructPropertyLookup,
    /// result = new name(...), name `index`.
    CreateActivationProperty,
    /// result = new global(...) through lookup `index`.
    ConstructGlobalLookup,

    // ── Exceptions ───────────────────────────────────────────
    /// Handler = instruction `index`, or none for `NO_TARGET`.
    SetExceptionHandler,
    /// throw a.
    CallBuiltinThrow,
    /// result = pending exception; clears it.
    GetException,
    /// Pending exception = a.
    SetException,
    /// Re-raise a pending exception.
    CallBuiltinUnwindException,

    // ── Scopes ───────────────────────────────────────────────
    /// Enter a catch scope binding name `index` to the pending exception.
    CallBuiltinPushCatchScope,
    /// Enter a `with` scope over a.
    CallBuiltinPushScope,
    /// Leave the innermost catch or `with` scope.
    CallBuiltinPopScope,
    /// Move the current activation into a heap call context.
    CreateCallContext,

    // ── Builtins ─────────────────────────────────────────────
    /// result = for-in iterator over a.
    CallBuiltinForeachIteratorObject,
    /// result = next key of iterator a, or null.
    CallBuiltinForeachNextPropertyName,
    /// result = delete a.name, name `index`.
    CallBuiltinDeleteMember,
    /// result = delete a[b].
    CallBuiltinDeleteSubscript,
    /// result = delete name, name `index`.
    CallBuiltinDeleteName,
    /// result = typeof name, name `index`.
    CallBuiltinTypeofName,
    /// result = typeof a.
    CallBuiltinTypeofValue,
    /// Declare var name `index`; `argc` is 1 when deletable.
    CallBuiltinDeclareVar,
    /// result = [temps c.index .. c.index + argc].
    CallBuiltinDefineArray,
    /// result = object from `argc` key/value temps starting at c.index.
    CallBuiltinDefineObjectLiteral,
    /// result = arguments object of the current activation.
    CallBuiltinSetupArgumentsObject,
    /// Coerce `this` for sloppy functions.
    CallBuiltinConvertThisToObject,

    // ── Jumps ────────────────────────────────────────────────
    /// Jump to `index`.
    Jump,
    /// Jump to `index` if a is truthy.
    JumpEq,
    /// Jump to `index` if a is falsy.
    JumpNe,
    /// Jump to `index` if a === b.
    JumpStrictEqual,
    /// Jump to `index` if a !== b.
    JumpStrictNotEqual,

    // ── Unary ────────────────────────────────────────────────
    /// result = !a.
    UNot,
    /// result = !a, a known boolean.
    UNotBool,
    /// result = +a.
    UPlus,
    /// result = -a.
    UMinus,
    /// result = ~a.
    UCompl,
    /// result = ~a, a known int32.
    UComplInt,
    /// a = a + 1; result = a.
    PreIncrement,
    /// a = a - 1; result = a.
    PreDecrement,
    /// result = +a; a = a + 1.
    PostIncrement,
    /// result = +a; a = a - 1.
    PostDecrement,

    // ── Binary ───────────────────────────────────────────────
    /// result = a <alu `index`> b.
    Binop,
    /// result = a + b.
    Add,
    /// result = a & b.
    BitAnd,
    /// result = a | b.
    BitOr,
    /// result = a ^ b.
    BitXor,
    /// result = a >> b.
    Shr,
    /// result = a << b.
    Shl,
    /// result = a & imm.
    BitAndConst,
    /// result = a | imm.
    BitOrConst,
    /// result = a ^ imm.
    BitXorConst,
    /// result = a >> imm.
    ShrConst,
    /// result = a << imm.
    ShlConst,
    /// result = a * b.
    Mul,
    /// result = a - b.
    Sub,

    // ── Exit & debugging ─────────────────────────────────────
    /// return a.
    Ret,
    /// Debugger statement at line `index`.
    Debug,
    /// Line marker `index`.
    Line,
}

pub const OPCODE_COUNT: usize = OpCode::Line as usize + 1;

impl OpCode {
    pub const ALL: [OpCode; OPCODE_COUNT] = [
        OpCode::Move,
        OpCode::LoadRuntimeString,
        OpCode::LoadClosure,
        OpCode::LoadThis,
        OpCode::LoadName,
        OpCode::StoreName,
        OpCode::GetGlobalLookup,
        OpCode::LoadElement,
        OpCode::LoadElementLookup,
        OpCode::StoreElement,
        OpCode::StoreElementLookup,
        OpCode::LoadProperty,
        OpCode::GetLookup,
        OpCode::StoreProperty,
        OpCode::SetLookup,
        OpCode::InitStackFrame,
        OpCode::CallValue,
        OpCode::CallProperty,
        OpCode::CallPropertyLookup,
        OpCode::CallElement,
        OpCode::CallActivationProperty,
        OpCode::CallGlobalLookup,
        OpCode::CreateValue,
        OpCode::CreateProperty,
        OpCode::ConstructPropertyLookup,
        OpCode::CreateActivationProperty,
        OpCode::ConstructGlobalLookup,
        OpCode::SetExceptionHandler,
        OpCode::CallBuiltinThrow,
        OpCode::GetException,
        OpCode::SetException,
        OpCode::CallBuiltinUnwindException,
        OpCode::CallBuiltinPushCatchScope,
        OpCode::CallBuiltinPushScope,
        OpCode::CallBuiltinPopScope,
        OpCode::CreateCallContext,
        OpCode::CallBuiltinForeachIteratorObject,
        OpCode::CallBuiltinForeachNextPropertyName,
        OpCode::CallBuiltinDeleteMember,
        OpCode::CallBuiltinDeleteSubscript,
        OpCode::CallBuiltinDeleteName,
        OpCode::CallBuiltinTypeofName,
        OpCode::CallBuiltinTypeofValue,
        OpCode::CallBuiltinDeclareVar,
        OpCode::CallBuiltinDefineArray,
        OpCode::CallBuiltinDefineObjectLiteral,
        OpCode::CallBuiltinSetupArgumentsObject,
        OpCode::CallBuiltinConvertThisToObject,
        OpCode::Jump,
        OpCode::JumpEq,
        OpCode::JumpNe,
        OpCode::JumpStrictEqual,
        OpCode::JumpStrictNotEqual,
        OpCode::UNot,
        OpCode::UNotBool,
        OpCode::UPlus,
        OpCode::UMinus,
        OpCode::UCompl,
        OpCode::UComplInt,
        OpCode::PreIncrement,
        OpCode::PreDecrement,
        OpCode::PostIncrement,
        OpCode::PostDecrement,
        OpCode::Binop,
        OpCode::Add,
        OpCode::BitAnd,
        OpCode::BitOr,
        OpCode::BitXor,
        OpCode::Shr,
        OpCode::Shl,
        OpCode::BitAndConst,
        OpCode::BitOrConst,
        OpCode::BitXorConst,
        OpCode::ShrConst,
        OpCode::ShlConst,
        OpCode::Mul,
        OpCode::Sub,
        OpCode::Ret,
        OpCode::Debug,
        OpCode::Line,
    ];

    pub fn from_u8(byte: u8) -> Option<OpCode> {
        OpCode::ALL.get(byte as usize).copied()
    }
}

/// Operator selected by a `Binop` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    InstanceOf,
}

impl AluOp {
    const ALL: [AluOp; 22] = [
        AluOp::Add,
        AluOp::Sub,
        AluOp::Mul,
        AluOp::Div,
        AluOp::Mod,
        AluOp::Exp,
        AluOp::Shl,
        AluOp::Shr,
        AluOp::UShr,
        AluOp::BitAnd,
        AluOp::BitOr,
        AluOp::BitXor,
        AluOp::Eq,
        AluOp::NotEq,
        AluOp::StrictEq,
        AluOp::StrictNotEq,
        AluOp::Lt,
        AluOp::Le,
        AluOp::Gt,
        AluOp::Ge,
        AluOp::In,
        AluOp::InstanceOf,
    ];

    pub fn from_u32(v: u32) -> Option<AluOp> {
        AluOp::ALL.get(v as usize).copied()
    }
}

/// Address of a value: scope 0 is the constant pool, scope 1 the
/// temporaries, then two scopes (arguments, locals) per activation level
/// counted outward from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Operand {
    pub scope: u32,
    pub index: u32,
}

impl Operand {
    pub const CONSTANTS: u32 = 0;
    pub const TEMPS: u32 = 1;

    pub fn constant(index: u32) -> Self {
        Operand {
            scope: Self::CONSTANTS,
            index,
        }
    }

    pub fn temp(index: u32) -> Self {
        Operand {
            scope: Self::TEMPS,
            index,
        }
    }

    pub fn argument(depth: u32, index: u32) -> Self {
        Operand {
            scope: 2 + 2 * depth,
            index,
        }
    }

    pub fn local(depth: u32, index: u32) -> Self {
        Operand {
            scope: 3 + 2 * depth,
            index,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.scope {
            0 => write!(f, "c{}", self.index),
            1 => write!(f, "t{}", self.index),
            s if s % 2 == 0 => write!(f, "a{}@{}", self.index, (s - 2) / 2),
            s => write!(f, "l{}@{}", self.index, (s - 3) / 2),
        }
    }
}

/// `index` value of a `SetExceptionHandler` that clears the handler.
pub const NO_TARGET: u32 = u32::MAX;

/// A fixed-size instruction. Which fields are meaningful depends on `op`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    pub op: OpCode,
    pub result: Operand,
    pub a: Operand,
    pub b: Operand,
    /// Stored value, or the start of a CallData or argument region.
    pub c: Operand,
    /// Name, lookup, closure, jump target, line, ALU selector or immediate.
    pub index: u32,
    pub argc: u32,
}

impl Instruction {
    pub fn new(op: OpCode) -> Self {
        Instruction {
            op,
            result: Operand::default(),
            a: Operand::default(),
            b: Operand::default(),
            c: Operand::default(),
            index: 0,
            argc: 0,
        }
    }

    pub fn with_result(mut self, result: Operand) -> Self {
        self.result = result;
        self
    }

    pub fn with_a(mut self, a: Operand) -> Self {
        self.a = a;
        self
    }

    pub fn with_b(mut self, b: Operand) -> Self {
        self.b = b;
        self
    }

    pub fn with_c(mut self, c: Operand) -> Self {
        self.c = c;
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn with_argc(mut self, argc: u32) -> Self {
        self.argc = argc;
        self
    }

    /// Immediate operand of the `*Const` instructions.
    pub fn imm(&self) -> i32 {
        self.index as i32
    }
}

/// What the interpreter needs to know about a function from the resolver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionMetadata {
    pub formal_names: Vec<String>,
    /// Names of the heap locals, by slot.
    pub local_names: Vec<String>,
    pub is_strict: bool,
    pub requires_execution_context: bool,
    pub uses_arguments_object: bool,
    pub has_simple_parameters: bool,
    pub line: usize,
}

impl FunctionMetadata {
    pub fn from_context(context: &Context) -> Self {
        let mut local_names = vec![];
        if context.requires_execution_context {
            let mut escaping: Vec<(&String, usize)> = context
                .escaping_members()
                .map(|(name, m)| (name, m.index))
                .collect();
            escaping.sort_by_key(|(_, index)| *index);
            local_names = escaping.into_iter().map(|(name, _)| name.to_string()).collect();
        }
        FunctionMetadata {
            formal_names: context.arguments.clone(),
            local_names,
            is_strict: context.is_strict,
            requires_execution_context: context.requires_execution_context,
            uses_arguments_object: context.uses_arguments_object == UsesArgumentsObject::Used,
            has_simple_parameters: context.formals_are_simple,
            line: context.line,
        }
    }
}

pub struct CompiledFunction {
    pub name: String,
    pub file: String,
    pub code: Vec<Instruction>,
    pub constants: Vec<JsValue>,
    pub runtime_strings: Vec<String>,
    pub nested: Vec<Rc<CompiledFunction>>,
    pub lookups: RefCell<Vec<Lookup>>,
    pub metadata: FunctionMetadata,
}

impl CompiledFunction {
    pub fn runtime_string(&self, index: u32) -> Option<&str> {
        self.runtime_strings.get(index as usize).map(|s| s.as_str())
    }

    pub fn disassemble(&self) -> String {
        let mut out = format!("== {} ({}) ==\n", self.name, self.file);
        for (i, instr) in self.code.iter().enumerate() {
            out.push_str(&format!(
                "{:04}  {:?} result={} a={} b={} c={} index={} argc={}",
                i, instr.op, instr.result, instr.a, instr.b, instr.c, instr.index, instr.argc
            ));
            match instr.op {
                OpCode::LoadRuntimeString
                | OpCode::LoadName
                | OpCode::StoreName
                | OpCode::LoadProperty
                | OpCode::StoreProperty
                | OpCode::CallProperty
                | OpCode::CallActivationProperty
                | OpCode::CreateProperty
                | OpCode::CreateActivationProperty
                | OpCode::CallBuiltinPushCatchScope
                | OpCode::CallBuiltinDeleteMember
                | OpCode::CallBuiltinDeleteName
                | OpCode::CallBuiltinTypeofName
                | OpCode::CallBuiltinDeclareVar => {
                    if let Some(name) = self.runtime_string(instr.index) {
                        out.push_str(&format!("  name=\"{}\"", name));
                    }
                }
                OpCode::Jump
                | OpCode::JumpEq
                | OpCode::JumpNe
                | OpCode::JumpStrictEqual
                | OpCode::JumpStrictNotEqual => {
                    out.push_str(&format!("  -> {:04}", instr.index));
                }
                OpCode::SetExceptionHandler if instr.index != NO_TARGET => {
                    out.push_str(&format!("  -> {:04}", instr.index));
                }
                _ => {}
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("label {0} is used but never bound")]
    UnboundLabel(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Assembles a [`CompiledFunction`]. Jumps may target labels bound later.
pub struct FunctionBuilder {
    name: String,
    file: String,
    code: Vec<Instruction>,
    constants: Vec<JsValue>,
    runtime_strings: Vec<String>,
    nested: Vec<Rc<CompiledFunction>>,
    lookups: Vec<Lookup>,
    metadata: FunctionMetadata,
    labels: Vec<Option<usize>>,
    patches: Vec<(usize, Label)>,
}

impl FunctionBuilder {
    pub fn new(name: &str) -> Self {
        FunctionBuilder {
            name: name.to_string(),
            file: String::new(),
            code: vec![],
            constants: vec![],
            runtime_strings: vec![],
            nested: vec![],
            lookups: vec![],
            metadata: FunctionMetadata::default(),
            labels: vec![],
            patches: vec![],
        }
    }

    pub fn file(mut self, file: &str) -> Self {
        self.file = file.to_string();
        self
    }

    pub fn metadata(mut self, metadata: FunctionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.metadata.is_strict = strict;
        self
    }

    /// Index the next emitted instruction will get.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, instr: Instruction) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    pub fn add_constant(&mut self, value: JsValue) -> Operand {
        if let Some(i) = self.constants.iter().position(|c| c == &value) {
            return Operand::constant(i as u32);
        }
        self.constants.push(value);
        Operand::constant(self.constants.len() as u32 - 1)
    }

    pub fn add_string(&mut self, s: &str) -> u32 {
        if let Some(i) = self.runtime_strings.iter().position(|n| n == s) {
            return i as u32;
        }
        self.runtime_strings.push(s.to_string());
        self.runtime_strings.len() as u32 - 1
    }

    pub fn add_nested(&mut self, function: Rc<CompiledFunction>) -> u32 {
        self.nested.push(function);
        self.nested.len() as u32 - 1
    }

    pub fn add_lookup(&mut self, kind: LookupKind, name: &str) -> u32 {
        self.lookups.push(Lookup::new(kind, name));
        self.lookups.len() as u32 - 1
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    fn emit_to(&mut self, instr: Instruction, label: Label) -> usize {
        let at = self.emit(instr);
        self.patches.push((at, label));
        at
    }

    // ── Moves & names ──

    pub fn mov(&mut self, result: Operand, a: Operand) -> usize {
        self.emit(Instruction::new(OpCode::Move).with_result(result).with_a(a))
    }

    pub fn load_string(&mut self, result: Operand, s: &str) -> usize {
        let index = self.add_string(s);
        self.emit(Instruction::new(OpCode::LoadRuntimeString).with_result(result).with_index(index))
    }

    pub fn load_closure(&mut self, result: Operand, nested: u32) -> usize {
        self.emit(Instruction::new(OpCode::LoadClosure).with_result(result).with_index(nested))
    }

    pub fn load_this(&mut self, result: Operand) -> usize {
        self.emit(Instruction::new(OpCode::LoadThis).with_result(result))
    }

    pub fn load_name(&mut self, result: Operand, name: &str) -> usize {
        let index = self.add_string(name);
        self.emit(Instruction::new(OpCode::LoadName).with_result(result).with_index(index))
    }

    pub fn store_name(&mut self, name: &str, value: Operand) -> usize {
        let index = self.add_string(name);
        self.emit(Instruction::new(OpCode::StoreName).with_c(value).with_index(index))
    }

    pub fn get_global_lookup(&mut self, result: Operand, name: &str) -> usize {
        let index = self.add_lookup(LookupKind::GlobalGetter, name);
        self.emit(Instruction::new(OpCode::GetGlobalLookup).with_result(result).with_index(index))
    }

    // ── Elements & properties ──

    pub fn load_element(&mut self, result: Operand, base: Operand, index: Operand) -> usize {
        self.emit(
            Instruction::new(OpCode::LoadElement)
                .with_result(result)
                .with_a(base)
                .with_b(index),
        )
    }

    pub fn load_element_lookup(&mut self, result: Operand, base: Operand, index: Operand) -> usize {
        let lookup = self.add_lookup(LookupKind::IndexedGetter, "");
        self.emit(
            Instruction::new(OpCode::LoadElementLookup)
                .with_result(result)
                .with_a(base)
                .with_b(index)
                .with_index(lookup),
        )
    }

    pub fn store_element(&mut self, base: Operand, index: Operand, value: Operand) -> usize {
        self.emit(
            Instruction::new(OpCode::StoreElement)
                .with_a(base)
                .with_b(index)
                .with_c(value),
        )
    }

    pub fn store_element_lookup(&mut self, base: Operand, index: Operand, value: Operand) -> usize {
        let lookup = self.add_lookup(LookupKind::IndexedSetter, "");
        self.emit(
            Instruction::new(OpCode::StoreElementLookup)
                .with_a(base)
                .with_b(index)
                .with_c(value)
                .with_index(lookup),
        )
    }

    pub fn load_property(&mut self, result: Operand, base: Operand, name: &str) -> usize {
        let index = self.add_string(name);
        self.emit(
            Instruction::new(OpCode::LoadProperty)
                .with_result(result)
                .with_a(base)
                .with_index(index),
        )
    }

    pub fn get_lookup(&mut self, result: Operand, base: Operand, name: &str) -> usize {
        let index = self.add_lookup(LookupKind::Getter, name);
        self.emit(
            Instruction::new(OpCode::GetLookup)
                .with_result(result)
                .with_a(base)
                .with_index(index),
        )
    }

    pub fn store_property(&mut self, base: Operand, name: &str, value: Operand) -> usize {
        let index = self.add_string(name);
        self.emit(
            Instruction::new(OpCode::StoreProperty)
                .with_a(base)
                .with_c(value)
                .with_index(index),
        )
    }

    pub fn set_lookup(&mut self, base: Operand, name: &str, value: Operand) -> usize {
        let index = self.add_lookup(LookupKind::Setter, name);
        self.emit(
            Instruction::new(OpCode::SetLookup)
                .with_a(base)
                .with_c(value)
                .with_index(index),
        )
    }

    pub fn init_stack_frame(&mut self, size: u32) -> usize {
        self.emit(Instruction::new(OpCode::InitStackFrame).with_index(size))
    }

    // ── Calls ──

    /// Temp holding argument `i` of the CallData region starting at temp
    /// `call_data`.
    pub fn call_arg(call_data: u32, i: u32) -> Operand {
        Operand::temp(call_data + CALL_DATA_HEADER as u32 + i)
    }

    /// Emits a call-shaped instruction. `name` is interned as a runtime
    /// string or a lookup depending on the opcode.
    pub fn call(
        &mut self,
        op: OpCode,
        result: Operand,
        target: CallTarget,
        call_data: u32,
        argc: u32,
    ) -> usize {
        let mut instr = Instruction::new(op)
            .with_result(result)
            .with_c(Operand::temp(call_data))
            .with_argc(argc);
        match target {
            CallTarget::Value(f) => instr = instr.with_a(f),
            CallTarget::Property(base, name) => {
                let index = match op {
                    OpCode::CallPropertyLookup | OpCode::ConstructPropertyLookup => {
                        self.add_lookup(LookupKind::Getter, name)
                    }
                    _ => self.add_string(name),
                };
                instr = instr.with_a(base).with_index(index);
            }
            CallTarget::Element(base, index) => instr = instr.with_a(base).with_b(index),
            CallTarget::Name(name) => {
                let index = match op {
                    OpCode::CallGlobalLookup | OpCode::ConstructGlobalLookup => {
                        self.add_lookup(LookupKind::GlobalGetter, name)
                    }
                    _ => self.add_string(name),
                };
                instr = instr.with_index(index);
            }
        }
        self.emit(instr)
    }

    // ── Exceptions & scopes ──

    pub fn set_exception_handler(&mut self, handler: Option<Label>) -> usize {
        match handler {
            Some(label) => self.emit_to(Instruction::new(OpCode::SetExceptionHandler), label),
            None => self.emit(Instruction::new(OpCode::SetExceptionHandler).with_index(NO_TARGET)),
        }
    }

    pub fn throw(&mut self, value: Operand) -> usize {
        self.emit(Instruction::new(OpCode::CallBuiltinThrow).with_a(value))
    }

    pub fn get_exception(&mut self, result: Operand) -> usize {
        self.emit(Instruction::new(OpCode::GetException).with_result(result))
    }

    pub fn set_exception(&mut self, value: Operand) -> usize {
        self.emit(Instruction::new(OpCode::SetException).with_a(value))
    }

    pub fn unwind_exception(&mut self, result: Operand) -> usize {
        self.emit(Instruction::new(OpCode::CallBuiltinUnwindException).with_result(result))
    }

    pub fn push_catch_scope(&mut self, name: &str) -> usize {
        let index = self.add_string(name);
        self.emit(Instruction::new(OpCode::CallBuiltinPushCatchScope).with_index(index))
    }

    pub fn push_with_scope(&mut self, object: Operand) -> usize {
        self.emit(Instruction::new(OpCode::CallBuiltinPushScope).with_a(object))
    }

    pub fn pop_scope(&mut self) -> usize {
        self.emit(Instruction::new(OpCode::CallBuiltinPopScope))
    }

    pub fn create_call_context(&mut self) -> usize {
        self.emit(Instruction::new(OpCode::CreateCallContext))
    }

    // ── Builtins ──

    /// Builtins taking an optional value operand and an optional name.
    pub fn builtin(&mut self, op: OpCode, result: Operand, a: Operand, name: Option<&str>) -> usize {
        let mut instr = Instruction::new(op).with_result(result).with_a(a);
        if let Some(name) = name {
            instr = instr.with_index(self.add_string(name));
        }
        self.emit(instr)
    }

    pub fn delete_subscript(&mut self, result: Operand, base: Operand, index: Operand) -> usize {
        self.emit(
            Instruction::new(OpCode::CallBuiltinDeleteSubscript)
                .with_result(result)
                .with_a(base)
                .with_b(index),
        )
    }

    pub fn declare_var(&mut self, name: &str, deletable: bool) -> usize {
        let index = self.add_string(name);
        self.emit(
            Instruction::new(OpCode::CallBuiltinDeclareVar)
                .with_index(index)
                .with_argc(deletable as u32),
        )
    }

    pub fn define_array(&mut self, result: Operand, first: u32, count: u32) -> usize {
        self.emit(
            Instruction::new(OpCode::CallBuiltinDefineArray)
                .with_result(result)
                .with_c(Operand::temp(first))
                .with_argc(count),
        )
    }

    /// `first` holds key, value, key, value... for `pairs` properties.
    pub fn define_object_literal(&mut self, result: Operand, first: u32, pairs: u32) -> usize {
        self.emit(
            Instruction::new(OpCode::CallBuiltinDefineObjectLiteral)
                .with_result(result)
                .with_c(Operand::temp(first))
                .with_argc(pairs * 2),
        )
    }

    // ── Jumps ──

    pub fn jump(&mut self, target: Label) -> usize {
        self.emit_to(Instruction::new(OpCode::Jump), target)
    }

    pub fn jump_eq(&mut self, condition: Operand, target: Label) -> usize {
        self.emit_to(Instruction::new(OpCode::JumpEq).with_a(condition), target)
    }

    pub fn jump_ne(&mut self, condition: Operand, target: Label) -> usize {
        self.emit_to(Instruction::new(OpCode::JumpNe).with_a(condition), target)
    }

    pub fn jump_strict_equal(&mut self, a: Operand, b: Operand, target: Label) -> usize {
        self.emit_to(Instruction::new(OpCode::JumpStrictEqual).with_a(a).with_b(b), target)
    }

    pub fn jump_strict_not_equal(&mut self, a: Operand, b: Operand, target: Label) -> usize {
        self.emit_to(Instruction::new(OpCode::JumpStrictNotEqual).with_a(a).with_b(b), target)
    }

    // ── Arithmetic ──

    pub fn unary(&mut self, op: OpCode, result: Operand, a: Operand) -> usize {
        self.emit(Instruction::new(op).with_result(result).with_a(a))
    }

    pub fn binary(&mut self, op: OpCode, result: Operand, a: Operand, b: Operand) -> usize {
        self.emit(Instruction::new(op).with_result(result).with_a(a).with_b(b))
    }

    pub fn binop(&mut self, alu: AluOp, result: Operand, a: Operand, b: Operand) -> usize {
        self.emit(
            Instruction::new(OpCode::Binop)
                .with_result(result)
                .with_a(a)
                .with_b(b)
                .with_index(alu as u32),
        )
    }

    pub fn binary_const(&mut self, op: OpCode, result: Operand, a: Operand, imm: i32) -> usize {
        self.emit(
            Instruction::new(op)
                .with_result(result)
                .with_a(a)
                .with_index(imm as u32),
        )
    }

    // ── Exit & debugging ──

    pub fn ret(&mut self, value: Operand) -> usize {
        self.emit(Instruction::new(OpCode::Ret).with_a(value))
    }

    pub fn debug(&mut self, line: u32) -> usize {
        self.emit(Instruction::new(OpCode::Debug).with_index(line))
    }

    pub fn line(&mut self, line: u32) -> usize {
        self.emit(Instruction::new(OpCode::Line).with_index(line))
    }

    pub fn build(mut self) -> Result<Rc<CompiledFunction>, BuildError> {
        for (at, label) in &self.patches {
            match self.labels[label.0] {
                Some(target) => self.code[*at].index = target as u32,
                None => return Err(BuildError::UnboundLabel(label.0)),
            }
        }
        Ok(Rc::new(CompiledFunction {
            name: self.name,
            file: self.file,
            code: self.code,
            constants: self.constants,
            runtime_strings: self.runtime_strings,
            nested: self.nested,
            lookups: RefCell::new(self.lookups),
            metadata: self.metadata,
        }))
    }
}

/// Callee of a call-shaped instruction.
#[derive(Debug, Clone, Copy)]
pub enum CallTarget<'a> {
    Value(Operand),
    Property(Operand, &'a str),
    Element(Operand, Operand),
    Name(&'a str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_table_matches_discriminants() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(OpCode::from_u8(i as u8), Some(*op));
        }
        assert_eq!(OpCode::from_u8(OPCODE_COUNT as u8), None);
    }

    #[test]
    fn test_alu_table_matches_discriminants() {
        for (i, op) in AluOp::ALL.iter().enumerate() {
            assert_eq!(*op as u32, i as u32);
        }
        assert_eq!(AluOp::from_u32(99), None);
    }

    #[test]
    fn test_operand_scopes() {
        assert_eq!(Operand::argument(0, 1).scope, 2);
        assert_eq!(Operand::local(0, 1).scope, 3);
        assert_eq!(Operand::argument(2, 0).scope, 6);
        assert_eq!(Operand::local(1, 4).to_string(), "l4@1");
    }

    #[test]
    fn test_labels_are_patched() {
        let mut b = FunctionBuilder::new("f");
        let end = b.new_label();
        b.jump(end);
        b.init_stack_frame(0);
        b.bind(end);
        let c = b.add_constant(JsValue::Undefined);
        b.ret(c);
        let f = b.build().unwrap();
        assert_eq!(f.code[0].index, 2);
        assert!(f.disassemble().contains("-> 0002"));
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let mut b = FunctionBuilder::new("f");
        let nowhere = b.new_label();
        b.jump(nowhere);
        assert_eq!(b.build().err(), Some(BuildError::UnboundLabel(0)));
    }

    #[test]
    fn test_constants_and_strings_are_interned() {
        let mut b = FunctionBuilder::new("f");
        assert_eq!(b.add_constant(JsValue::integer(1)), b.add_constant(JsValue::integer(1)));
        assert_eq!(b.add_string("x"), b.add_string("x"));
        assert_ne!(b.add_string("x"), b.add_string("y"));
    }
}
