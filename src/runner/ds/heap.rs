//! Heap management for the JavaScript runtime.
//!
//! This module provides heap allocation tracking with optional memory limits,
//! the arena of heap-backed execution contexts, and the write barrier that
//! stores into those contexts go through.

use std::collections::HashSet;
use std::rc::Rc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::JsObjectType;
use crate::runner::ds::value::JsValue;
use crate::runner::vm::bytecode::CompiledFunction;

/// Accounted size of an object header.
pub const OBJECT_BYTES: usize = 64;
/// Accounted size of a context header.
pub const CONTEXT_BYTES: usize = 48;
/// Accounted size of one value slot.
pub const VALUE_BYTES: usize = 16;

/// Configuration for the heap manager.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Maximum heap size in bytes. None means unlimited.
    pub max_bytes: Option<usize>,
}

impl HeapConfig {
    /// Create a new heap configuration with no memory limit.
    pub fn unlimited() -> Self {
        HeapConfig { max_bytes: None }
    }

    /// Create a new heap configuration with a memory limit.
    pub fn with_limit(max_bytes: usize) -> Self {
        HeapConfig {
            max_bytes: Some(max_bytes),
        }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Index of an execution context in the heap's context arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub usize);

pub enum ContextKind {
    /// Bindings live on the global object.
    Global,
    /// Activation of a function whose variables escape.
    Call,
    Catch { name: String, value: JsValue },
    With { object: JsObjectType },
}

/// A collector-managed activation record.
pub struct HeapContext {
    pub kind: ContextKind,
    pub outer: Option<ContextHandle>,
    /// Function of a `Call` context; its metadata names the slots.
    pub function: Option<Rc<CompiledFunction>>,
    pub args: Vec<JsValue>,
    pub locals: Vec<JsValue>,
    /// Set once a closure or a mapped `arguments` object holds the context.
    pub captured: bool,
}

impl HeapContext {
    pub fn new(kind: ContextKind, outer: Option<ContextHandle>) -> Self {
        HeapContext {
            kind,
            outer,
            function: None,
            args: vec![],
            locals: vec![],
            captured: false,
        }
    }

    fn accounted_bytes(&self) -> usize {
        CONTEXT_BYTES + (self.args.len() + self.locals.len()) * VALUE_BYTES
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotArea {
    Arguments,
    Locals,
}

/// Heap manager for tracking memory allocations.
pub struct Heap {
    config: HeapConfig,
    allocated_bytes: usize,
    contexts: Vec<Option<HeapContext>>,
    free: Vec<usize>,
    barrier_count: u64,
    remembered: HashSet<ContextHandle>,
}

impl Heap {
    /// Create a new heap with the given configuration.
    pub fn new(config: HeapConfig) -> Self {
        Heap {
            config,
            allocated_bytes: 0,
            contexts: vec![],
            free: vec![],
            barrier_count: 0,
            remembered: HashSet::new(),
        }
    }

    /// Allocate memory on the heap.
    ///
    /// Returns an error if the allocation would exceed the memory limit.
    pub fn allocate(&mut self, bytes: usize) -> Result<(), JErrorType> {
        if let Some(max_bytes) = self.config.max_bytes {
            if self.allocated_bytes + bytes > max_bytes {
                return Err(JErrorType::RangeError("Out of memory".to_string()));
            }
        }
        self.allocated_bytes += bytes;
        Ok(())
    }

    /// Deallocate memory from the heap.
    pub fn deallocate(&mut self, bytes: usize) {
        self.allocated_bytes = self.allocated_bytes.saturating_sub(bytes);
    }

    /// Get the current allocated bytes.
    pub fn get_allocated(&self) -> usize {
        self.allocated_bytes
    }

    /// Get the remaining available bytes, if limited.
    pub fn available_bytes(&self) -> Option<usize> {
        self.config
            .max_bytes
            .map(|max| max.saturating_sub(self.allocated_bytes))
    }

    /// Allocate an activation record in the context arena.
    /// Released slots are reused before the arena grows.
    pub fn new_context(&mut self, context: HeapContext) -> Result<ContextHandle, JErrorType> {
        self.allocate(context.accounted_bytes())?;
        Ok(self.insert(context))
    }

    /// Allocates a context outside the accounted budget. Used for the global
    /// context, which exists before any script runs. Root contexts are never
    /// released.
    pub fn new_root_context(&mut self, mut context: HeapContext) -> ContextHandle {
        context.captured = true;
        self.insert(context)
    }

    fn insert(&mut self, context: HeapContext) -> ContextHandle {
        match self.free.pop() {
            Some(index) => {
                self.contexts[index] = Some(context);
                ContextHandle(index)
            }
            None => {
                self.contexts.push(Some(context));
                ContextHandle(self.contexts.len() - 1)
            }
        }
    }

    pub fn context(&self, handle: ContextHandle) -> Option<&HeapContext> {
        self.contexts.get(handle.0).and_then(Option::as_ref)
    }

    pub fn context_mut(&mut self, handle: ContextHandle) -> Option<&mut HeapContext> {
        self.contexts.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len() - self.free.len()
    }

    /// Marks `handle` and every context enclosing it as reachable from a
    /// longer-lived value, so none of them is released when its activation
    /// exits.
    pub fn capture(&mut self, handle: ContextHandle) {
        let mut at = Some(handle);
        while let Some(h) = at {
            match self.context_mut(h) {
                Some(c) if !c.captured => {
                    c.captured = true;
                    at = c.outer;
                }
                _ => break,
            }
        }
    }

    /// Frees a context nothing captured. Returns whether it was freed.
    pub fn release(&mut self, handle: ContextHandle) -> bool {
        let bytes = match self.context(handle) {
            Some(c) if !c.captured => c.accounted_bytes(),
            _ => return false,
        };
        self.contexts[handle.0] = None;
        self.free.push(handle.0);
        self.remembered.remove(&handle);
        self.deallocate(bytes);
        true
    }

    pub fn load(&self, handle: ContextHandle, area: SlotArea, index: usize) -> Option<&JsValue> {
        let c = self.context(handle)?;
        match area {
            SlotArea::Arguments => c.args.get(index),
            SlotArea::Locals => c.locals.get(index),
        }
    }

    /// Plain store into a context slot. Returns false for a slot outside the
    /// context.
    pub fn store(&mut self, handle: ContextHandle, area: SlotArea, index: usize, value: JsValue) -> bool {
        let slot = self.context_mut(handle).and_then(|c| match area {
            SlotArea::Arguments => c.args.get_mut(index),
            SlotArea::Locals => c.locals.get_mut(index),
        });
        match slot {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Informs the collector that `owner` now references `value`.
    pub fn write_barrier(&mut self, owner: ContextHandle, value: &JsValue) {
        self.barrier_count += 1;
        if let JsValue::Object(_) = value {
            self.remembered.insert(owner);
        }
    }

    /// Number of barrier calls made so far.
    pub fn barrier_count(&self) -> u64 {
        self.barrier_count
    }

    pub fn is_remembered(&self, handle: ContextHandle) -> bool {
        self.remembered.contains(&handle)
    }

    pub fn clear_remembered(&mut self) {
        self.remembered.clear();
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ds::object::{JsObject, ObjectKind};

    #[test]
    fn test_heap_unlimited() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        assert!(heap.allocate(1000).is_ok());
        assert!(heap.allocate(1000000).is_ok());
        assert_eq!(heap.get_allocated(), 1001000);
    }

    #[test]
    fn test_heap_limited() {
        let mut heap = Heap::new(HeapConfig::with_limit(1000));
        assert!(heap.allocate(500).is_ok());
        assert!(heap.allocate(400).is_ok());
        assert_eq!(heap.get_allocated(), 900);

        let result = heap.allocate(200);
        assert_eq!(result, Err(JErrorType::RangeError("Out of memory".to_string())));
    }

    #[test]
    fn test_heap_deallocate() {
        let mut heap = Heap::new(HeapConfig::with_limit(1000));
        heap.allocate(500).unwrap();
        heap.deallocate(300);
        assert_eq!(heap.get_allocated(), 200);
        assert_eq!(heap.available_bytes(), Some(800));
    }

    #[test]
    fn test_context_allocation_is_accounted() {
        let mut heap = Heap::new(HeapConfig::with_limit(CONTEXT_BYTES + 2 * VALUE_BYTES));
        let mut ctx = HeapContext::new(ContextKind::Call, None);
        ctx.locals = vec![JsValue::Undefined, JsValue::Undefined];
        let h = heap.new_context(ctx).unwrap();
        assert_eq!(h, ContextHandle(0));
        assert_eq!(heap.available_bytes(), Some(0));
        assert!(heap.new_context(HeapContext::new(ContextKind::Global, None)).is_err());
    }

    #[test]
    fn test_store_and_load_slots() {
        let mut heap = Heap::default();
        let mut ctx = HeapContext::new(ContextKind::Call, None);
        ctx.args = vec![JsValue::Undefined];
        let h = heap.new_context(ctx).unwrap();
        assert!(heap.store(h, SlotArea::Arguments, 0, JsValue::integer(7)));
        assert!(!heap.store(h, SlotArea::Locals, 0, JsValue::integer(7)));
        assert_eq!(heap.load(h, SlotArea::Arguments, 0), Some(&JsValue::integer(7)));
    }

    #[test]
    fn test_barrier_remembers_object_stores() {
        let mut heap = Heap::default();
        let h = heap.new_context(HeapContext::new(ContextKind::Call, None)).unwrap();
        heap.write_barrier(h, &JsValue::integer(1));
        assert!(!heap.is_remembered(h));
        let o = JsObject::new(ObjectKind::Ordinary, None).into_ref();
        heap.write_barrier(h, &JsValue::Object(o));
        assert!(heap.is_remembered(h));
        assert_eq!(heap.barrier_count(), 2);
        heap.clear_remembered();
        assert!(!heap.is_remembered(h));
    }

    #[test]
    fn test_released_slots_are_reused() {
        let mut heap = Heap::default();
        let mut ctx = HeapContext::new(ContextKind::Call, None);
        ctx.locals = vec![JsValue::Undefined];
        let a = heap.new_context(ctx).unwrap();
        let allocated = heap.get_allocated();
        assert!(heap.release(a));
        assert!(heap.context(a).is_none());
        assert!(!heap.release(a));
        assert_eq!(heap.context_count(), 0);
        assert_eq!(heap.get_allocated(), allocated - CONTEXT_BYTES - VALUE_BYTES);

        let b = heap.new_context(HeapContext::new(ContextKind::Call, None)).unwrap();
        assert_eq!(b, a);
        assert_eq!(heap.context_count(), 1);
    }

    #[test]
    fn test_captured_chain_is_kept() {
        let mut heap = Heap::default();
        let root = heap.new_root_context(HeapContext::new(ContextKind::Global, None));
        let outer = heap.new_context(HeapContext::new(ContextKind::Call, Some(root))).unwrap();
        let inner = heap.new_context(HeapContext::new(ContextKind::Call, Some(outer))).unwrap();
        let sibling = heap.new_context(HeapContext::new(ContextKind::Call, Some(outer))).unwrap();
        heap.capture(inner);
        assert!(!heap.release(inner));
        assert!(!heap.release(outer));
        assert!(!heap.release(root));
        assert!(heap.release(sibling));
        assert_eq!(heap.context_count(), 3);
    }
}
