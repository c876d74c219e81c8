//! The execution engine: heap, value stack, frame list, debug session and
//! the pending-exception slot shared by every activation.

use std::mem;
use std::rc::Rc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::heap::{ContextHandle, ContextKind, Heap, HeapContext, SlotArea, OBJECT_BYTES};
use crate::runner::ds::object::{FunctionObject, JsObject, JsObjectType, NativeFunction, ObjectKind};
use crate::runner::ds::object_property::{PropertyDescriptor, PropertyKey};
use crate::runner::ds::operations::type_conversion::to_string;
use crate::runner::ds::value::JsValue;
use crate::runner::vm::bytecode::CompiledFunction;
use crate::runner::vm::call_data::{CallDataRef, FrameStack, JsStack, StackTraceEntry};
use crate::runner::vm::config::EngineConfig;
use crate::runner::vm::debugger::DebugSession;
use crate::runner::vm::error::VmError;
use crate::runner::vm::interpreter::{self, Activation};
use crate::runner::vm::runtime;

/// Prototypes every engine starts with.
pub struct Intrinsics {
    pub object_prototype: JsObjectType,
    pub function_prototype: JsObjectType,
    pub array_prototype: JsObjectType,
    pub error_prototype: JsObjectType,
}

impl Intrinsics {
    fn new() -> Self {
        let object_prototype = JsObject::new(ObjectKind::Ordinary, None).into_ref();
        let derived = || JsObject::new(ObjectKind::Ordinary, Some(object_prototype.clone())).into_ref();
        let function_prototype = derived();
        let array_prototype = derived();
        let error_prototype = derived();
        {
            let mut e = error_prototype.borrow_mut();
            e.define_own_property("name".into(), PropertyDescriptor::hidden(JsValue::from("Error")));
            e.define_own_property("message".into(), PropertyDescriptor::hidden(JsValue::from("")));
        }
        Intrinsics {
            object_prototype,
            function_prototype,
            array_prototype,
            error_prototype,
        }
    }
}

pub struct ExecutionEngine {
    pub config: EngineConfig,
    pub heap: Heap,
    pub stack: JsStack,
    pub frames: FrameStack,
    pub debug: DebugSession,
    pub has_exception: bool,
    pub exception_value: JsValue,
    /// When false, stores into heap contexts skip the barrier.
    pub write_barrier_active: bool,
    pub global_context: ContextHandle,
    pub intrinsics: Intrinsics,
    global: JsObjectType,
    pub(crate) call_depth: usize,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut heap = Heap::new(config.heap.clone());
        let global_context = heap.new_root_context(HeapContext::new(ContextKind::Global, None));
        let intrinsics = Intrinsics::new();
        let global = JsObject::new(ObjectKind::Ordinary, Some(intrinsics.object_prototype.clone())).into_ref();
        let mut engine = ExecutionEngine {
            write_barrier_active: config.write_barrier_active,
            config,
            heap,
            stack: JsStack::new(),
            frames: FrameStack::new(),
            debug: DebugSession::new(),
            has_exception: false,
            exception_value: JsValue::Undefined,
            global_context,
            intrinsics,
            global,
            call_depth: 0,
        };
        let error = engine.install_native("Error", error_constructor);
        let error_prototype = engine.intrinsics.error_prototype.clone();
        error
            .borrow_mut()
            .define_own_property("prototype".into(), PropertyDescriptor::hidden(JsValue::Object(error_prototype.clone())));
        error_prototype
            .borrow_mut()
            .define_own_property("constructor".into(), PropertyDescriptor::hidden(JsValue::Object(error)));
        engine
    }

    /// Runs top-level code against the global scope.
    pub fn run(&mut self, function: Rc<CompiledFunction>) -> Result<JsValue, VmError> {
        tracing::debug!("running {} from {}", function.name, function.file);
        let activation = Activation {
            function,
            scope: self.global_context,
            call_data: None,
            this: JsValue::Object(self.global_object()),
        };
        interpreter::execute(self, activation)
    }

    /// Calls `function` from the host. An exception the callee did not
    /// handle stays pending and is reported as `VmError::Unhandled`.
    pub fn call_function(&mut self, function: &JsValue, this: JsValue, args: &[JsValue]) -> Result<JsValue, VmError> {
        let v = runtime::call_with_this(self, function, this, args)?;
        if self.has_exception {
            return Err(VmError::Unhandled);
        }
        Ok(v)
    }

    pub fn throw(&mut self, value: JsValue) {
        tracing::debug!("throw {}", value);
        self.exception_value = value;
        self.has_exception = true;
    }

    /// Throws a runtime error as an `Error` object carrying its name and
    /// message. Values thrown by script are thrown as they are.
    pub fn throw_error(&mut self, error: JErrorType) {
        if let JErrorType::Exception(v) = error {
            self.throw(v);
            return;
        }
        let o = JsObject::new(ObjectKind::Error, Some(self.intrinsics.error_prototype.clone())).into_ref();
        {
            let mut b = o.borrow_mut();
            b.define_own_property("name".into(), PropertyDescriptor::hidden(JsValue::from(error.name())));
            b.define_own_property("message".into(), PropertyDescriptor::hidden(JsValue::String(error.message())));
        }
        self.throw(JsValue::Object(o));
    }

    /// Clears and returns the pending exception.
    pub fn take_exception(&mut self) -> Option<JsValue> {
        if !self.has_exception {
            return None;
        }
        self.has_exception = false;
        Some(mem::replace(&mut self.exception_value, JsValue::Undefined))
    }

    /// Defines a host function as a non-enumerable global.
    pub fn install_native(&mut self, name: &str, function: NativeFunction) -> JsObjectType {
        let f = JsObject::new(
            ObjectKind::Function(FunctionObject::Native {
                name: name.to_string(),
                function,
            }),
            Some(self.intrinsics.function_prototype.clone()),
        )
        .into_ref();
        f.borrow_mut()
            .define_own_property("name".into(), PropertyDescriptor::hidden(JsValue::from(name)));
        self.global
            .borrow_mut()
            .define_own_property(PropertyKey::from(name), PropertyDescriptor::hidden(JsValue::Object(f.clone())));
        f
    }

    pub fn global_object(&self) -> JsObjectType {
        self.global.clone()
    }

    /// Own data property of the global object.
    pub fn global_get(&self, name: &str) -> Option<JsValue> {
        match self.global.borrow().get_own_property(&PropertyKey::from(name)) {
            Some(PropertyDescriptor::Data { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Sets a global. An existing data property keeps its attributes.
    pub fn global_set(&mut self, name: &str, value: JsValue) {
        let key = PropertyKey::from(name);
        let mut g = self.global.borrow_mut();
        let desc = match g.get_own_property(&key) {
            Some(PropertyDescriptor::Data {
                writable,
                enumerable,
                configurable,
                ..
            }) => PropertyDescriptor::Data {
                value,
                writable: *writable,
                enumerable: *enumerable,
                configurable: *configurable,
            },
            _ => PropertyDescriptor::data(value),
        };
        g.define_own_property(key, desc);
    }

    /// A plain object for host code; not counted against the heap limit.
    pub fn new_object(&self) -> JsObjectType {
        JsObject::new(ObjectKind::Ordinary, Some(self.intrinsics.object_prototype.clone())).into_ref()
    }

    pub fn new_array(&self, elements: Vec<JsValue>) -> JsObjectType {
        JsObject::new(ObjectKind::Array(elements), Some(self.intrinsics.array_prototype.clone())).into_ref()
    }

    /// Allocates an object on behalf of script.
    pub fn allocate_object(&mut self, kind: ObjectKind, prototype: Option<JsObjectType>) -> Result<JsObjectType, JErrorType> {
        self.heap.allocate(OBJECT_BYTES)?;
        Ok(JsObject::new(kind, prototype).into_ref())
    }

    /// Stores into a heap context slot, through the write barrier when it is
    /// active. Returns false for a slot outside the context.
    pub fn store_context_slot(&mut self, handle: ContextHandle, area: SlotArea, index: usize, value: JsValue) -> bool {
        if self.heap.load(handle, area, index).is_none() {
            return false;
        }
        if self.write_barrier_active {
            self.heap.write_barrier(handle, &value);
        }
        self.heap.store(handle, area, index, value)
    }

    pub fn stack_trace(&self) -> Vec<StackTraceEntry> {
        self.frames.stack_trace()
    }
}

/// `Error(message)`. Called as a constructor it initialises the new object.
fn error_constructor(engine: &mut ExecutionEngine, call_data: &CallDataRef) -> Result<JsValue, JErrorType> {
    let this = call_data.this_value(&engine.stack);
    let target = match &this {
        JsValue::Object(o)
            if o
                .borrow()
                .prototype()
                .map(|p| Rc::ptr_eq(&p, &engine.intrinsics.error_prototype))
                .unwrap_or(false) =>
        {
            o.clone()
        }
        _ => engine.allocate_object(ObjectKind::Error, Some(engine.intrinsics.error_prototype.clone()))?,
    };
    let message = match call_data.argument(&engine.stack, 0) {
        JsValue::Undefined => None,
        m => Some(to_string(&m)?),
    };
    {
        let mut o = target.borrow_mut();
        o.kind = ObjectKind::Error;
        if let Some(m) = message {
            o.define_own_property("message".into(), PropertyDescriptor::hidden(JsValue::String(m)));
        }
    }
    Ok(JsValue::Object(target))
}
