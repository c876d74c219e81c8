//! Invocation records and the native frame list.
//!
//! A [`CallDataRef`] names a region of the engine's value stack laid out as
//! `[argc, callee, this, arg0, arg1, ...]`. Regions are released in stack
//! order by [`StackScope`], so a record never outlives the call that built it.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::runner::ds::heap::ContextHandle;
use crate::runner::ds::value::JsValue;
use crate::runner::vm::bytecode::CompiledFunction;
use crate::runner::vm::engine::ExecutionEngine;
use crate::runner::vm::error::VmError;
use crate::runner::vm::runtime;

/// Slots in front of the arguments: tag/argc, callee and `this`.
pub const CALL_DATA_HEADER: usize = 3;
/// Argument slots every allocated record has room for.
pub const RESERVED_ARGUMENT_COUNT: usize = 6;

/// The engine's value stack. Temporaries of active frames and allocated
/// call records live here.
#[derive(Default)]
pub struct JsStack {
    values: Vec<JsValue>,
}

impl JsStack {
    pub fn new() -> Self {
        JsStack { values: vec![] }
    }

    /// Pushes `n` undefined slots and returns the index of the first.
    pub fn alloc(&mut self, n: usize) -> usize {
        let base = self.values.len();
        self.values.resize(base + n, JsValue::Undefined);
        base
    }

    pub fn mark(&self) -> usize {
        self.values.len()
    }

    pub fn truncate(&mut self, mark: usize) {
        self.values.truncate(mark);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&JsValue> {
        self.values.get(index)
    }

    pub fn set(&mut self, index: usize, value: JsValue) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn value(&self, index: usize) -> JsValue {
        self.values.get(index).cloned().unwrap_or(JsValue::Undefined)
    }
}

/// Location of an invocation record on the value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallDataRef {
    pub base: usize,
    pub argc: usize,
    /// Argument slots available; at least `argc`.
    pub capacity: usize,
}

impl CallDataRef {
    /// Allocates a fresh record with room for `max(argc, RESERVED_ARGUMENT_COUNT)`
    /// arguments and writes the tag.
    pub fn alloc(stack: &mut JsStack, argc: usize) -> Self {
        let capacity = argc.max(RESERVED_ARGUMENT_COUNT);
        let base = stack.alloc(CALL_DATA_HEADER + capacity);
        stack.set(base, JsValue::integer(argc as i64));
        CallDataRef {
            base,
            argc,
            capacity,
        }
    }

    /// A record laid out by bytecode in an existing region, sized exactly.
    pub fn at(base: usize, argc: usize) -> Self {
        CallDataRef {
            base,
            argc,
            capacity: argc,
        }
    }

    pub fn function_slot(&self) -> usize {
        self.base + 1
    }

    pub fn this_slot(&self) -> usize {
        self.base + 2
    }

    pub fn arg_slot(&self, i: usize) -> usize {
        self.base + CALL_DATA_HEADER + i
    }

    pub fn tag(&self, stack: &JsStack) -> JsValue {
        stack.value(self.base)
    }

    pub fn function(&self, stack: &JsStack) -> JsValue {
        stack.value(self.function_slot())
    }

    pub fn this_value(&self, stack: &JsStack) -> JsValue {
        stack.value(self.this_slot())
    }

    /// Argument `i`, or undefined past `argc`.
    pub fn argument(&self, stack: &JsStack, i: usize) -> JsValue {
        if i < self.argc {
            stack.value(self.arg_slot(i))
        } else {
            JsValue::Undefined
        }
    }

    pub fn arguments(&self, stack: &JsStack) -> Vec<JsValue> {
        (0..self.argc).map(|i| stack.value(self.arg_slot(i))).collect()
    }
}

/// Releases everything allocated on the value stack while it lives.
pub struct StackScope<'e> {
    engine: &'e mut ExecutionEngine,
    mark: usize,
}

impl<'e> StackScope<'e> {
    pub fn new(engine: &'e mut ExecutionEngine) -> Self {
        let mark = engine.stack.mark();
        StackScope { engine, mark }
    }
}

impl Deref for StackScope<'_> {
    type Target = ExecutionEngine;

    fn deref(&self) -> &ExecutionEngine {
        self.engine
    }
}

impl DerefMut for StackScope<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionEngine {
        self.engine
    }
}

impl Drop for StackScope<'_> {
    fn drop(&mut self) {
        self.engine.stack.truncate(self.mark);
    }
}

/// Builds a call record in a [`StackScope`] and invokes it.
pub struct JsCall<'s, 'e> {
    scope: &'s mut StackScope<'e>,
    call_data: CallDataRef,
}

impl<'s, 'e> JsCall<'s, 'e> {
    pub fn new(scope: &'s mut StackScope<'e>, function: Option<JsValue>, argc: usize) -> Self {
        let call_data = CallDataRef::alloc(&mut scope.stack, argc);
        if let Some(f) = function {
            scope.stack.set(call_data.function_slot(), f);
        }
        JsCall { scope, call_data }
    }

    pub fn set_function(&mut self, function: JsValue) {
        self.scope.stack.set(self.call_data.function_slot(), function);
    }

    pub fn set_this(&mut self, this: JsValue) {
        self.scope.stack.set(self.call_data.this_slot(), this);
    }

    /// Writes argument `i`. Indexes past the allocated capacity are ignored.
    pub fn set_arg(&mut self, i: usize, value: JsValue) {
        if i < self.call_data.capacity {
            self.scope.stack.set(self.call_data.arg_slot(i), value);
        }
    }

    pub fn call_data(&self) -> CallDataRef {
        self.call_data
    }

    pub fn call(&mut self) -> Result<JsValue, VmError> {
        runtime::call_function(&mut **self.scope, self.call_data)
    }

    pub fn call_as_constructor(&mut self) -> Result<JsValue, VmError> {
        runtime::construct(&mut **self.scope, self.call_data)
    }
}

/// One entry of the native frame list.
#[derive(Clone)]
pub struct FrameRecord {
    pub parent: Option<usize>,
    pub context: Option<ContextHandle>,
    pub function: Option<Rc<CompiledFunction>>,
    pub line: Option<usize>,
    pub call_data: Option<CallDataRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackTraceEntry {
    pub function: String,
    pub file: String,
    pub line: Option<usize>,
}

/// The engine's list of active frames, innermost last. Cloning yields
/// another handle to the same list.
#[derive(Clone, Default)]
pub struct FrameStack {
    frames: Rc<RefCell<Vec<FrameRecord>>>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn current(&self) -> Option<FrameRecord> {
        self.frames.borrow().last().cloned()
    }

    pub fn set_function(&self, function: Rc<CompiledFunction>) {
        if let Some(top) = self.frames.borrow_mut().last_mut() {
            top.function = Some(function);
        }
    }

    pub fn set_line(&self, line: usize) {
        if let Some(top) = self.frames.borrow_mut().last_mut() {
            top.line = Some(line);
        }
    }

    pub fn set_call_data(&self, call_data: Option<CallDataRef>) {
        if let Some(top) = self.frames.borrow_mut().last_mut() {
            top.call_data = call_data;
        }
    }

    /// Walks the parent links from the innermost frame outward.
    pub fn stack_trace(&self) -> Vec<StackTraceEntry> {
        let frames = self.frames.borrow();
        let mut trace = vec![];
        let mut at = frames.len().checked_sub(1);
        while let Some(i) = at {
            let record = &frames[i];
            trace.push(StackTraceEntry {
                function: record
                    .function
                    .as_ref()
                    .map(|f| f.name.to_string())
                    .unwrap_or_default(),
                file: record
                    .function
                    .as_ref()
                    .map(|f| f.file.to_string())
                    .unwrap_or_default(),
                line: record.line,
            });
            at = record.parent;
        }
        trace
    }
}

/// Pushes a frame record for as long as it lives. Without a context nothing
/// is pushed. The previous top is restored on drop, including while
/// unwinding.
pub struct ScopedStackFrame {
    frames: FrameStack,
    restore_to: Option<usize>,
}

impl ScopedStackFrame {
    pub fn new(frames: &FrameStack, context: Option<ContextHandle>) -> Self {
        let restore_to = context.map(|context| {
            let mut list = frames.frames.borrow_mut();
            let depth = list.len();
            let parent = depth.checked_sub(1);
            let function = parent.and_then(|p| list[p].function.clone());
            list.push(FrameRecord {
                parent,
                context: Some(context),
                function,
                line: None,
                call_data: None,
            });
            depth
        });
        ScopedStackFrame {
            frames: frames.clone(),
            restore_to,
        }
    }

    pub fn is_pushed(&self) -> bool {
        self.restore_to.is_some()
    }
}

impl Drop for ScopedStackFrame {
    fn drop(&mut self) {
        if let Some(depth) = self.restore_to {
            self.frames.frames.borrow_mut().truncate(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_reserves_minimum_and_writes_tag() {
        let mut stack = JsStack::new();
        let cd = CallDataRef::alloc(&mut stack, 2);
        assert_eq!(cd.capacity, RESERVED_ARGUMENT_COUNT);
        assert_eq!(stack.len(), CALL_DATA_HEADER + RESERVED_ARGUMENT_COUNT);
        assert_eq!(cd.tag(&stack), JsValue::integer(2));

        let big = CallDataRef::alloc(&mut stack, 9);
        assert_eq!(big.capacity, 9);
        assert_eq!(big.base, cd.base + CALL_DATA_HEADER + RESERVED_ARGUMENT_COUNT);
    }

    #[test]
    fn test_arguments_past_argc_are_undefined() {
        let mut stack = JsStack::new();
        let cd = CallDataRef::alloc(&mut stack, 1);
        stack.set(cd.arg_slot(0), JsValue::integer(5));
        stack.set(cd.arg_slot(1), JsValue::integer(6));
        assert_eq!(cd.argument(&stack, 0), JsValue::integer(5));
        assert_eq!(cd.argument(&stack, 1), JsValue::Undefined);
        assert_eq!(cd.arguments(&stack), vec![JsValue::integer(5)]);
    }

    #[test]
    fn test_scoped_frame_restores_previous_top() {
        let frames = FrameStack::new();
        let outer = ScopedStackFrame::new(&frames, Some(ContextHandle(0)));
        frames.set_line(3);
        {
            let inner = ScopedStackFrame::new(&frames, Some(ContextHandle(1)));
            assert!(inner.is_pushed());
            assert_eq!(frames.depth(), 2);
            assert_eq!(frames.current().and_then(|f| f.parent), Some(0));
        }
        assert_eq!(frames.depth(), 1);
        assert_eq!(frames.current().and_then(|f| f.line), Some(3));
        drop(outer);
        assert_eq!(frames.depth(), 0);
    }

    #[test]
    fn test_scoped_frame_without_context_pushes_nothing() {
        let frames = FrameStack::new();
        let f = ScopedStackFrame::new(&frames, None);
        assert!(!f.is_pushed());
        assert_eq!(frames.depth(), 0);
    }

    #[test]
    fn test_scoped_frame_restored_on_panic() {
        let frames = FrameStack::new();
        let handle = frames.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _f = ScopedStackFrame::new(&handle, Some(ContextHandle(0)));
            panic!("unwind");
        }));
        assert!(result.is_err());
        assert_eq!(frames.depth(), 0);
    }
}
