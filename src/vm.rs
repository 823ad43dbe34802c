// File: src/vm.rs
//
// The register VM. Each call runs in its own `Frame`; nested calls recurse
// through `execute_frame` rather than maintaining an explicit call-frame
// stack, so Rust's own stack depth is what `MAX_CALL_DEPTH` guards against.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{DeclKind, Visibility};
use crate::bytecode::{Instruction, OpCode, NO_CATCH_REGISTER};
use crate::errors::{ArdanError, ErrorKind};
use crate::interpreter::environment::ExecutionContext;
use crate::interpreter::event_loop::{new_pending_promise, EventLoop};
use crate::interpreter::object_model::{self, Invoker};
use crate::interpreter::value::{
    ClassData, ClosureData, MethodEntry, ObjectData, PropertyRecord, PromiseStatus, Upvalue, UpvalueHandle, Value,
};
use crate::module::{Chunk, Constant, Module};

/// Rust's own stack overflows can't be caught, so call depth is tracked
/// explicitly and turned into a normal `ArdanError` well before that happens.
const MAX_CALL_DEPTH: usize = 512;

type Registers = Rc<RefCell<[Value; 256]>>;

struct TryHandler {
    catch_register: u8,
    handler_ip: usize,
}

struct Frame {
    chunk_index: u32,
    registers: Registers,
    ip: usize,
    upvalues: Vec<UpvalueHandle>,
    this_binding: Option<Value>,
    arguments: Vec<Value>,
    try_stack: Vec<TryHandler>,
    open_upvalues: Vec<(u8, UpvalueHandle)>,
    /// Set by `Throw`/a propagating error, read by `LoadExceptionValue` and
    /// cleared by `EndFinally` once a catch clause has run.
    pending_exception: Option<Value>,
    /// Where to re-raise `pending_exception` once `ip` reaches it — used for
    /// a `try`/`finally` with no `catch` clause, where the finally block
    /// still has to run before the exception continues upward.
    pending_rethrow_at: Option<usize>,
    /// Staged between a `SetClosureIsLocal`/`SetClosureIndex` pair.
    pending_upvalue_is_local: Option<bool>,
}

impl Frame {
    fn new(chunk_index: u32, upvalues: Vec<UpvalueHandle>, this_binding: Option<Value>, arguments: Vec<Value>) -> Self {
        Frame {
            chunk_index,
            registers: Rc::new(RefCell::new(std::array::from_fn(|_| Value::Undefined))),
            ip: 0,
            upvalues,
            this_binding,
            arguments,
            try_stack: Vec::new(),
            open_upvalues: Vec::new(),
            pending_exception: None,
            pending_rethrow_at: None,
            pending_upvalue_is_local: None,
        }
    }
}

enum Step {
    Continue,
    Return(Value),
}

pub struct Vm {
    module: Module,
    globals: ExecutionContext,
    event_loop: EventLoop,
    arg_stack: Vec<Value>,
    call_depth: usize,
}

impl Vm {
    pub fn new(module: Module) -> Self {
        let globals = ExecutionContext::global();
        crate::builtins::install(&globals);
        Vm { module, globals, event_loop: EventLoop::new(), arg_stack: Vec::new(), call_depth: 0 }
    }

    pub fn run(&mut self) -> Result<Value, ArdanError> {
        let entry = self.module.entry_chunk_index;
        self.call_chunk(entry, Vec::new(), Vec::new(), None)
    }

    /// Swaps in a freshly compiled module and runs it, keeping the existing
    /// globals — the REPL's one persistent binding: each line compiles to
    /// its own module, but `let`/`var` declared in one line stay visible to
    /// the next since they land in the same `ExecutionContext`.
    pub fn run_module(&mut self, module: Module) -> Result<Value, ArdanError> {
        self.module = module;
        self.call_depth = 0;
        self.run()
    }

    fn chunk(&self, index: u32) -> &Chunk {
        &self.module.chunks[index as usize]
    }

    fn call_chunk(
        &mut self,
        chunk_index: u32,
        upvalues: Vec<UpvalueHandle>,
        arguments: Vec<Value>,
        this_binding: Option<Value>,
    ) -> Result<Value, ArdanError> {
        self.call_depth += 1;
        if self.call_depth > MAX_CALL_DEPTH {
            self.call_depth -= 1;
            return Err(ArdanError::new(ErrorKind::StackOverflow, "call stack exceeded maximum depth"));
        }
        let mut frame = Frame::new(chunk_index, upvalues, this_binding, arguments);
        let result = self.execute_frame(&mut frame);
        for (_, handle) in frame.open_upvalues.drain(..) {
            handle.borrow_mut().close();
        }
        self.call_depth -= 1;
        result
    }

    fn execute_frame(&mut self, frame: &mut Frame) -> Result<Value, ArdanError> {
        loop {
            let due_rethrow = frame.pending_rethrow_at.filter(|&target| target == frame.ip).map(|_| {
                frame.pending_rethrow_at = None;
                ArdanError::thrown(frame.pending_exception.take().unwrap_or(Value::Undefined))
            });
            // A due rethrow is dispatched exactly like an instruction error —
            // an enclosing try in this same frame (e.g. one wrapping this
            // try/finally with no catch of its own) still gets first claim.
            let step_result = match due_rethrow {
                Some(err) => Err(err),
                None => {
                    let instr = self.chunk(frame.chunk_index).code[frame.ip];
                    frame.ip += 1;
                    self.execute_instruction(frame, instr)
                }
            };
            match step_result {
                Ok(Step::Continue) => {}
                Ok(Step::Return(value)) => return Ok(value),
                Err(err) => match frame.try_stack.pop() {
                    Some(handler) => {
                        let value = error_to_value(&err);
                        if handler.catch_register != NO_CATCH_REGISTER {
                            self.set_reg(frame, handler.catch_register, value.clone());
                        }
                        frame.pending_exception = Some(value);
                        frame.ip = handler.handler_ip;
                    }
                    None => return Err(err),
                },
            }
        }
    }

    fn reg(&self, frame: &Frame, i: u8) -> Value {
        frame.registers.borrow()[i as usize].clone()
    }

    fn set_reg(&self, frame: &Frame, i: u8, value: Value) {
        frame.registers.borrow_mut()[i as usize] = value;
    }

    fn constant(&self, frame: &Frame, k: u8) -> Constant {
        self.chunk(frame.chunk_index).constants[k as usize].clone()
    }

    fn const_str(&self, frame: &Frame, k: u8) -> Result<String, ArdanError> {
        match self.constant(frame, k) {
            Constant::Str(s) => Ok(s),
            _ => Err(ArdanError::new(ErrorKind::MalformedBytecode, "expected a string constant")),
        }
    }

    fn constant_to_value(&self, constant: Constant) -> Value {
        match constant {
            Constant::Number(n) => Value::Number(n),
            Constant::Str(s) => Value::str(s),
            Constant::Bool(b) => Value::Boolean(b),
            Constant::Null => Value::Null,
            Constant::Undefined => Value::Undefined,
            Constant::Function(descriptor) => Value::FunctionRef(descriptor),
        }
    }

    fn pop_args(&mut self, n: usize) -> Vec<Value> {
        let start = self.arg_stack.len() - n;
        self.arg_stack.split_off(start)
    }

    fn invoke(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, ArdanError> {
        match callee {
            Value::Closure(c) => self.call_chunk(c.descriptor.chunk_index, c.upvalues.clone(), args, c.this_binding.clone()),
            Value::FunctionRef(descriptor) => self.call_chunk(descriptor.chunk_index, Vec::new(), args, None),
            Value::NativeFunction(f) => f(&args),
            other => Err(ArdanError::new(
                ErrorKind::CallNonFunction,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    fn assign_property(&self, target: &Value, name: &str, value: Value, accessor: Option<&Value>) -> Result<(), ArdanError> {
        if let Value::Object(cell) = target {
            let exists = cell.borrow().properties.get(name).is_some();
            if !exists {
                object_model::set_object_literal_property(target, name, value);
                return Ok(());
            }
        }
        object_model::set_property(target, name, value, accessor)
    }

    fn get_property_dynamic(&self, target: &Value, key: &Value, accessor: Option<&Value>) -> Result<Value, ArdanError> {
        if let (Value::Array(arr), Value::Number(n)) = (target, key) {
            let idx = *n as usize;
            return Ok(arr.borrow().elements.get(idx).cloned().unwrap_or(Value::Undefined));
        }
        object_model::get_property(target, &key.to_display_string(), accessor)
    }

    fn set_property_dynamic(&self, target: &Value, key: &Value, value: Value, accessor: Option<&Value>) -> Result<(), ArdanError> {
        if let (Value::Array(arr), Value::Number(n)) = (target, key) {
            let idx = *n as usize;
            let mut data = arr.borrow_mut();
            if idx >= data.elements.len() {
                data.elements.resize(idx + 1, Value::Undefined);
            }
            data.elements[idx] = value;
            return Ok(());
        }
        self.assign_property(target, &key.to_display_string(), value, accessor)
    }

    fn define_class_field(
        &self,
        frame: &Frame,
        instr: Instruction,
        visibility: Visibility,
        kind: DeclKind,
        is_static: bool,
    ) -> Result<(), ArdanError> {
        let class = self.reg(frame, instr.a);
        let name = self.const_str(frame, instr.b)?;
        let value = self.reg(frame, instr.c);
        if let Value::Class(cell) = &class {
            cell.borrow_mut().define_field(name, PropertyRecord { value, kind, visibility }, is_static);
        }
        Ok(())
    }

    fn define_class_method(&self, frame: &Frame, instr: Instruction, visibility: Visibility, is_static: bool) -> Result<(), ArdanError> {
        let class = self.reg(frame, instr.a);
        let name = self.const_str(frame, instr.b)?;
        let closure = self.reg(frame, instr.c);
        if let Value::Class(cell) = &class {
            cell.borrow_mut().methods.insert(name, MethodEntry { visibility, is_static, closure });
        }
        Ok(())
    }

    fn capture_local_upvalue(&self, frame: &mut Frame, slot: u8) -> UpvalueHandle {
        if let Some((_, handle)) = frame.open_upvalues.iter().find(|(s, _)| *s == slot) {
            return handle.clone();
        }
        let handle: UpvalueHandle = Rc::new(RefCell::new(Upvalue::Open { registers: frame.registers.clone(), slot }));
        frame.open_upvalues.push((slot, handle.clone()));
        handle
    }

    fn execute_instruction(&mut self, frame: &mut Frame, instr: Instruction) -> Result<Step, ArdanError> {
        match instr.op {
            OpCode::LoadConst => {
                let constant = self.constant(frame, instr.b);
                let value = self.constant_to_value(constant);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::Move => {
                let value = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::LoadLocalVar => {
                let value = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::LoadGlobalVar => {
                let name = self.const_str(frame, instr.b)?;
                let value = self
                    .globals
                    .get(&name)
                    .ok_or_else(|| ArdanError::new(ErrorKind::UndefinedVariable, format!("`{name}` is not defined")))?;
                self.set_reg(frame, instr.a, value);
            }
            OpCode::StoreLocalVar | OpCode::StoreLocalLet => {
                let value = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::StoreGlobalVar | OpCode::StoreGlobalLet => {
                let name = self.const_str(frame, instr.a)?;
                let value = self.reg(frame, instr.b);
                self.globals.set(&name, value)?;
            }
            OpCode::CreateLocalVar | OpCode::CreateLocalLet | OpCode::CreateLocalConst => {
                let value = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::CreateGlobalVar | OpCode::CreateGlobalLet | OpCode::CreateGlobalConst => {
                let name = self.const_str(frame, instr.a)?;
                let value = self.reg(frame, instr.b);
                let kind = match instr.op {
                    OpCode::CreateGlobalVar => DeclKind::Var,
                    OpCode::CreateGlobalLet => DeclKind::Let,
                    _ => DeclKind::Const,
                };
                self.globals.define(name, value, kind);
            }

            OpCode::Add => {
                let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
                let value = add_values(&lhs, &rhs);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::Subtract => self.numeric_binop(frame, instr, |a, b| a - b),
            OpCode::Multiply => self.numeric_binop(frame, instr, |a, b| a * b),
            OpCode::Divide => self.numeric_binop(frame, instr, |a, b| a / b),
            OpCode::Modulo => self.numeric_binop(frame, instr, |a, b| a % b),
            OpCode::Power => self.numeric_binop(frame, instr, f64::powf),
            OpCode::BitAnd => self.int_binop(frame, instr, |a, b| a & b),
            OpCode::BitOr => self.int_binop(frame, instr, |a, b| a | b),
            OpCode::BitXor => self.int_binop(frame, instr, |a, b| a ^ b),
            OpCode::ShiftLeft => self.int_binop(frame, instr, |a, b| a.wrapping_shl(b as u32)),
            OpCode::ShiftRight => self.int_binop(frame, instr, |a, b| a.wrapping_shr(b as u32)),
            OpCode::UnsignedShiftRight => {
                let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
                let a = to_number(&lhs) as i64 as u32;
                let b = to_number(&rhs) as i64 as u32;
                self.set_reg(frame, instr.a, Value::Number((a.wrapping_shr(b)) as f64));
            }

            OpCode::Negate => {
                let src = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, Value::Number(-to_number(&src)));
            }
            OpCode::Positive => {
                let src = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, Value::Number(to_number(&src)));
            }
            OpCode::LogicalNot => {
                let src = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, Value::Boolean(!src.is_truthy()));
            }
            OpCode::TypeOf => {
                let src = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, Value::str(src.type_name()));
            }
            OpCode::Void => {
                self.set_reg(frame, instr.a, Value::Undefined);
            }
            OpCode::Increment => {
                let src = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, Value::Number(to_number(&src) + 1.0));
            }
            OpCode::Decrement => {
                let src = self.reg(frame, instr.b);
                self.set_reg(frame, instr.a, Value::Number(to_number(&src) - 1.0));
            }

            OpCode::Equal => {
                let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
                self.set_reg(frame, instr.a, Value::Boolean(lhs.loose_eq(&rhs)));
            }
            OpCode::NotEqual => {
                let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
                self.set_reg(frame, instr.a, Value::Boolean(!lhs.loose_eq(&rhs)));
            }
            OpCode::StrictEqual => {
                let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
                self.set_reg(frame, instr.a, Value::Boolean(lhs.strict_eq(&rhs)));
            }
            OpCode::StrictNotEqual => {
                let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
                self.set_reg(frame, instr.a, Value::Boolean(!lhs.strict_eq(&rhs)));
            }
            OpCode::LessThan => self.compare_op(frame, instr, |o| o == std::cmp::Ordering::Less),
            OpCode::LessThanOrEqual => self.compare_op(frame, instr, |o| o != std::cmp::Ordering::Greater),
            OpCode::GreaterThan => self.compare_op(frame, instr, |o| o == std::cmp::Ordering::Greater),
            OpCode::GreaterThanOrEqual => self.compare_op(frame, instr, |o| o != std::cmp::Ordering::Less),
            OpCode::In => {
                let (key, target) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
                self.set_reg(frame, instr.a, op_in(&key, &target));
            }

            OpCode::Jump => frame.ip += instr.bc() as usize,
            OpCode::JumpIfFalse => {
                let cond = self.reg(frame, instr.a);
                if !cond.is_truthy() {
                    frame.ip += instr.bc() as usize;
                }
            }
            OpCode::JumpIfTrue => {
                let cond = self.reg(frame, instr.a);
                if cond.is_truthy() {
                    frame.ip += instr.bc() as usize;
                }
            }
            OpCode::Loop => frame.ip -= instr.bc() as usize,

            OpCode::PushArg => {
                let value = self.reg(frame, instr.a);
                self.arg_stack.push(value);
            }
            OpCode::Call => {
                let callee = self.reg(frame, instr.b);
                let args = self.pop_args(instr.c as usize);
                let result = self.invoke(callee, args)?;
                self.set_reg(frame, instr.a, result);
            }
            OpCode::Return => {
                let value = self.reg(frame, instr.a);
                return Ok(Step::Return(value));
            }

            OpCode::NewArray => self.set_reg(frame, instr.a, Value::array(Vec::new())),
            OpCode::ArrayPush => {
                let (arr, value) = (self.reg(frame, instr.a), self.reg(frame, instr.b));
                if let Value::Array(cell) = &arr {
                    cell.borrow_mut().elements.push(value);
                }
            }
            OpCode::NewObject => self.set_reg(frame, instr.a, Value::object(ObjectData::new())),
            OpCode::SetProperty => {
                let obj = self.reg(frame, instr.a);
                let name = self.const_str(frame, instr.b)?;
                let value = self.reg(frame, instr.c);
                self.assign_property(&obj, &name, value, frame.this_binding.as_ref())?;
            }
            OpCode::GetProperty => {
                let obj = self.reg(frame, instr.b);
                let name = self.const_str(frame, instr.c)?;
                let value = object_model::get_property(&obj, &name, frame.this_binding.as_ref())?;
                self.set_reg(frame, instr.a, value);
            }
            OpCode::GetPropertyDynamic => {
                let (obj, key) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
                let value = self.get_property_dynamic(&obj, &key, frame.this_binding.as_ref())?;
                self.set_reg(frame, instr.a, value);
            }
            OpCode::SetPropertyDynamic => {
                let (obj, key, value) = (self.reg(frame, instr.a), self.reg(frame, instr.b), self.reg(frame, instr.c));
                self.set_property_dynamic(&obj, &key, value, frame.this_binding.as_ref())?;
            }
            OpCode::EnumKeys => {
                let obj = self.reg(frame, instr.b);
                let keys = enum_keys(&obj);
                self.set_reg(frame, instr.a, Value::array(keys));
            }
            OpCode::GetObjectLength => {
                let obj = self.reg(frame, instr.b);
                let len = match &obj {
                    Value::Array(arr) => arr.borrow().elements.len(),
                    Value::Str(s) => s.chars().count(),
                    _ => 0,
                };
                self.set_reg(frame, instr.a, Value::Number(len as f64));
            }

            OpCode::NewClass => {
                let super_value = self.reg(frame, instr.b);
                let superclass = matches!(super_value, Value::Class(_)).then_some(super_value);
                let class = ClassData { superclass, ..ClassData::new(String::new()) };
                self.set_reg(frame, instr.a, Value::Class(Rc::new(RefCell::new(class))));
            }
            OpCode::CreateClassPublicPropertyVar => {
                self.define_class_field(frame, instr, Visibility::Public, DeclKind::Var, false)?
            }
            OpCode::CreateClassProtectedPropertyVar => {
                self.define_class_field(frame, instr, Visibility::Protected, DeclKind::Var, false)?
            }
            OpCode::CreateClassPrivatePropertyVar => {
                self.define_class_field(frame, instr, Visibility::Private, DeclKind::Var, false)?
            }
            OpCode::CreateClassPublicPropertyConst => {
                self.define_class_field(frame, instr, Visibility::Public, DeclKind::Const, false)?
            }
            OpCode::CreateClassProtectedPropertyConst => {
                self.define_class_field(frame, instr, Visibility::Protected, DeclKind::Const, false)?
            }
            OpCode::CreateClassPrivatePropertyConst => {
                self.define_class_field(frame, instr, Visibility::Private, DeclKind::Const, false)?
            }
            OpCode::CreateClassPublicStaticPropertyVar => {
                self.define_class_field(frame, instr, Visibility::Public, DeclKind::Var, true)?
            }
            OpCode::CreateClassProtectedStaticPropertyVar => {
                self.define_class_field(frame, instr, Visibility::Protected, DeclKind::Var, true)?
            }
            OpCode::CreateClassPrivateStaticPropertyVar => {
                self.define_class_field(frame, instr, Visibility::Private, DeclKind::Var, true)?
            }
            OpCode::CreateClassPublicStaticPropertyConst => {
                self.define_class_field(frame, instr, Visibility::Public, DeclKind::Const, true)?
            }
            OpCode::CreateClassProtectedStaticPropertyConst => {
                self.define_class_field(frame, instr, Visibility::Protected, DeclKind::Const, true)?
            }
            OpCode::CreateClassPrivateStaticPropertyConst => {
                self.define_class_field(frame, instr, Visibility::Private, DeclKind::Const, true)?
            }
            OpCode::CreateClassPublicMethod => self.define_class_method(frame, instr, Visibility::Public, false)?,
            OpCode::CreateClassProtectedMethod => self.define_class_method(frame, instr, Visibility::Protected, false)?,
            OpCode::CreateClassPrivateMethod => self.define_class_method(frame, instr, Visibility::Private, false)?,
            OpCode::CreateClassPublicStaticMethod => self.define_class_method(frame, instr, Visibility::Public, true)?,
            OpCode::CreateClassProtectedStaticMethod => self.define_class_method(frame, instr, Visibility::Protected, true)?,
            OpCode::CreateClassPrivateStaticMethod => self.define_class_method(frame, instr, Visibility::Private, true)?,

            OpCode::CreateInstance => {
                let class = self.reg(frame, instr.b);
                let instance = object_model::create_instance(&class, self)?;
                self.set_reg(frame, instr.a, instance);
            }
            OpCode::InvokeConstructor => {
                let obj = self.reg(frame, instr.a);
                let args = self.pop_args(instr.b as usize);
                if matches!(obj, Value::Promise(_)) {
                    self.run_promise_constructor(&obj, args)?;
                } else {
                    let ctor = object_model::get_property(&obj, "constructor", Some(&obj))?;
                    if !matches!(ctor, Value::Undefined) {
                        self.invoke(ctor, args)?;
                    }
                }
            }

            OpCode::Try => {
                let target = frame.ip + instr.bc() as usize;
                frame.try_stack.push(TryHandler { catch_register: instr.a, handler_ip: target });
            }
            OpCode::EndTry => {
                frame.try_stack.pop();
            }
            OpCode::Throw => {
                let value = self.reg(frame, instr.a);
                return Err(ArdanError::thrown(value));
            }
            OpCode::LoadExceptionValue => {
                let value = frame.pending_exception.clone().unwrap_or(Value::Undefined);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::EndFinally => {
                let had_catch = instr.a != 0;
                if frame.pending_exception.is_some() {
                    if had_catch {
                        frame.pending_exception = None;
                    } else {
                        frame.pending_rethrow_at = Some(frame.ip + instr.bc() as usize);
                    }
                }
            }

            OpCode::LoadArguments => self.set_reg(frame, instr.a, Value::array(frame.arguments.clone())),
            OpCode::LoadArgument => {
                let idx_value = self.reg(frame, instr.b);
                let idx = to_number(&idx_value) as usize;
                let value = frame.arguments.get(idx).cloned().unwrap_or(Value::Undefined);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::LoadArgumentsLength => {
                self.set_reg(frame, instr.a, Value::Number(frame.arguments.len() as f64));
            }
            OpCode::Slice => {
                let source = self.reg(frame, instr.b);
                let start_value = self.reg(frame, instr.c);
                let start = to_number(&start_value) as usize;
                let sliced = match &source {
                    Value::Array(arr) => {
                        let data = arr.borrow();
                        if start >= data.elements.len() {
                            Vec::new()
                        } else {
                            data.elements[start..].to_vec()
                        }
                    }
                    _ => Vec::new(),
                };
                self.set_reg(frame, instr.a, Value::array(sliced));
            }

            OpCode::CreateClosure => {
                let constant = self.constant(frame, instr.b);
                let descriptor = match constant {
                    Constant::Function(d) => d,
                    _ => return Err(ArdanError::new(ErrorKind::MalformedBytecode, "expected a function constant")),
                };
                let closure = ClosureData { descriptor, upvalues: Vec::new(), this_binding: None, captured_context: None };
                self.set_reg(frame, instr.a, Value::Closure(Rc::new(closure)));
            }
            OpCode::SetClosureIsLocal => {
                frame.pending_upvalue_is_local = Some(instr.b != 0);
            }
            OpCode::SetClosureIndex => {
                let is_local = frame.pending_upvalue_is_local.take().unwrap_or(false);
                let handle = if is_local {
                    self.capture_local_upvalue(frame, instr.b)
                } else {
                    frame
                        .upvalues
                        .get(instr.b as usize)
                        .cloned()
                        .unwrap_or_else(|| Rc::new(RefCell::new(Upvalue::Closed(Value::Undefined))))
                };
                if let Value::Closure(c) = self.reg(frame, instr.a) {
                    let mut upvalues = c.upvalues.clone();
                    upvalues.push(handle);
                    let rebuilt = ClosureData {
                        descriptor: c.descriptor.clone(),
                        upvalues,
                        this_binding: c.this_binding.clone(),
                        captured_context: c.captured_context.clone(),
                    };
                    self.set_reg(frame, instr.a, Value::Closure(Rc::new(rebuilt)));
                }
            }
            OpCode::LoadUpvalue => {
                let value = frame.upvalues.get(instr.b as usize).map(|h| h.borrow().get()).unwrap_or(Value::Undefined);
                self.set_reg(frame, instr.a, value);
            }
            OpCode::StoreUpvalueVar | OpCode::StoreUpvalueLet => {
                let value = self.reg(frame, instr.b);
                if let Some(handle) = frame.upvalues.get(instr.a as usize).cloned() {
                    handle.borrow_mut().set(value);
                }
            }
            OpCode::StoreUpvalueConst => {
                return Err(ArdanError::new(ErrorKind::AssignToConst, "cannot assign to a captured const binding"));
            }
            OpCode::CloseUpvalue => {
                if let Some(pos) = frame.open_upvalues.iter().position(|(slot, _)| *slot == instr.a) {
                    let (_, handle) = frame.open_upvalues.remove(pos);
                    handle.borrow_mut().close();
                }
            }

            OpCode::GetThis => {
                self.set_reg(frame, instr.a, frame.this_binding.clone().unwrap_or(Value::Undefined));
            }
            OpCode::GetParentObject => {
                let parent = match &frame.this_binding {
                    Some(Value::Object(cell)) => cell.borrow().parent_object.clone().unwrap_or(Value::Undefined),
                    _ => Value::Undefined,
                };
                self.set_reg(frame, instr.a, parent);
            }

            OpCode::Await => {
                let promise = self.reg(frame, instr.b);
                let result = self.exec_await(&promise)?;
                self.set_reg(frame, instr.a, result);
            }
            OpCode::CreatePromise => {
                self.set_reg(frame, instr.a, new_pending_promise());
            }
        }
        Ok(Step::Continue)
    }

    fn numeric_binop(&self, frame: &Frame, instr: Instruction, op: impl Fn(f64, f64) -> f64) {
        let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
        self.set_reg(frame, instr.a, Value::Number(op(to_number(&lhs), to_number(&rhs))));
    }

    fn int_binop(&self, frame: &Frame, instr: Instruction, op: impl Fn(i64, i64) -> i64) {
        let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
        let a = to_number(&lhs) as i64;
        let b = to_number(&rhs) as i64;
        self.set_reg(frame, instr.a, Value::Number(op(a, b) as f64));
    }

    fn compare_op(&self, frame: &Frame, instr: Instruction, matches_ordering: impl Fn(std::cmp::Ordering) -> bool) {
        let (lhs, rhs) = (self.reg(frame, instr.b), self.reg(frame, instr.c));
        let result = compare(&lhs, &rhs).map(&matches_ordering).unwrap_or(false);
        self.set_reg(frame, instr.a, Value::Boolean(result));
    }

    /// `new Promise(executor)`'s native construction path — the VM-level
    /// hook `InvokeConstructor` falls into for the `Promise` native class
    /// instead of a plain `constructor` property lookup, so the executor can
    /// be ordinary compiled bytecode (a closure), not only a native
    /// function: `self.invoke` handles both. `resolve`/`reject` settle the
    /// promise directly rather than through `event_loop::settle` — nothing
    /// can have attached a reaction yet, since the promise hasn't escaped
    /// this constructor call.
    fn run_promise_constructor(&mut self, promise: &Value, args: Vec<Value>) -> Result<(), ArdanError> {
        let Value::Promise(cell) = promise else { return Ok(()) };
        let executor = args.into_iter().next().unwrap_or(Value::Undefined);

        let resolve_target = cell.clone();
        let resolve = Value::native_fn(move |args: &[Value]| {
            let mut data = resolve_target.borrow_mut();
            if data.status == PromiseStatus::Pending {
                data.status = PromiseStatus::Fulfilled;
                data.value = args.first().cloned().unwrap_or(Value::Undefined);
            }
            Ok(Value::Undefined)
        });
        let reject_target = cell.clone();
        let reject = Value::native_fn(move |args: &[Value]| {
            let mut data = reject_target.borrow_mut();
            if data.status == PromiseStatus::Pending {
                data.status = PromiseStatus::Rejected;
                data.value = args.first().cloned().unwrap_or(Value::Undefined);
            }
            Ok(Value::Undefined)
        });
        self.invoke(executor, vec![resolve, reject])?;
        Ok(())
    }

    fn exec_await(&mut self, promise: &Value) -> Result<Value, ArdanError> {
        let Value::Promise(cell) = promise else {
            return Ok(promise.clone());
        };
        loop {
            let (status, value) = {
                let data = cell.borrow();
                (data.status, data.value.clone())
            };
            match status {
                PromiseStatus::Fulfilled => return Ok(value),
                PromiseStatus::Rejected => return Err(ArdanError::thrown(value)),
                PromiseStatus::Pending => match self.event_loop.pop() {
                    Some(task) => {
                        self.invoke(task.callback, vec![task.arg])?;
                    }
                    None => {
                        return Err(ArdanError::new(
                            ErrorKind::DeadlockedAwait,
                            "await is waiting on a promise that nothing left in the event loop can settle",
                        ))
                    }
                },
            }
        }
    }
}

impl Invoker for Vm {
    fn invoke_thunk(&mut self, thunk: &Value) -> Result<Value, ArdanError> {
        self.invoke(thunk.clone(), Vec::new())
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Null => 0.0,
        _ => f64::NAN,
    }
}

fn add_values(lhs: &Value, rhs: &Value) -> Value {
    match (lhs, rhs) {
        (Value::Str(_), _) | (_, Value::Str(_)) => Value::str(format!("{}{}", lhs.to_display_string(), rhs.to_display_string())),
        _ => Value::Number(to_number(lhs) + to_number(rhs)),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.as_ref().cmp(b.as_ref())),
        _ => to_number(lhs).partial_cmp(&to_number(rhs)),
    }
}

fn op_in(key: &Value, target: &Value) -> Value {
    let name = key.to_display_string();
    let present = match target {
        Value::Object(cell) => cell.borrow().properties.get(&name).is_some(),
        Value::Class(cell) => cell.borrow().static_fields.get(&name).is_some(),
        Value::Array(arr) => match name.parse::<usize>() {
            Ok(idx) => idx < arr.borrow().elements.len(),
            Err(_) => arr.borrow().properties.get(&name).is_some(),
        },
        _ => false,
    };
    Value::Boolean(present)
}

fn enum_keys(target: &Value) -> Vec<Value> {
    match target {
        Value::Object(cell) => cell.borrow().properties.keys().map(Value::str).collect(),
        Value::Class(cell) => cell.borrow().static_fields.keys().map(Value::str).collect(),
        Value::Array(arr) => (0..arr.borrow().elements.len()).map(|i| Value::str(i.to_string())).collect(),
        _ => Vec::new(),
    }
}

fn error_to_value(err: &ArdanError) -> Value {
    if let ErrorKind::Thrown(value) = &err.kind {
        return value.clone();
    }
    let mut data = ObjectData::new();
    data.properties.insert("name", PropertyRecord::public_var(Value::str(err.kind.to_string())));
    data.properties.insert("message", PropertyRecord::public_var(Value::str(err.message.clone())));
    Value::object(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn run_source(src: &str) -> Value {
        let tokens = tokenize(src).unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        let module = Compiler::new().compile(&program).unwrap();
        Vm::new(module).run().unwrap()
    }

    #[test]
    fn arithmetic_and_locals() {
        let result = run_source("let x = 2; let y = 3; return x * y + 1;");
        assert!(matches!(result, Value::Number(n) if n == 7.0));
    }

    #[test]
    fn closures_capture_their_enclosing_locals() {
        let result = run_source(
            r#"
            function makeCounter() {
                let count = 0;
                function increment() {
                    count = count + 1;
                    return count;
                }
                increment();
                return increment();
            }
            return makeCounter();
            "#,
        );
        assert!(matches!(result, Value::Number(n) if n == 2.0));
    }

    #[test]
    fn try_catch_runs_finally_and_recovers() {
        let result = run_source(
            r#"
            let log = "";
            try {
                throw "boom";
            } catch (e) {
                log = log + "caught:" + e;
            } finally {
                log = log + ":done";
            }
            return log;
            "#,
        );
        assert_eq!(result.to_display_string(), "caught:boom:done");
    }

    #[test]
    fn try_finally_without_catch_rethrows_after_finally() {
        let result = run_source(
            r#"
            let log = "";
            try {
                try {
                    throw "boom";
                } finally {
                    log = log + "ran-finally";
                }
            } catch (e) {
                log = log + ":outer-caught:" + e;
            }
            return log;
            "#,
        );
        assert_eq!(result.to_display_string(), "ran-finally:outer-caught:boom");
    }

    #[test]
    fn classes_support_instances_and_methods() {
        let result = run_source(
            r#"
            class Point {
                public x;
                public y;
                public constructor(x, y) {
                    this.x = x;
                    this.y = y;
                }
                public sum() {
                    return this.x + this.y;
                }
            }
            let p = new Point(3, 4);
            return p.sum();
            "#,
        );
        assert!(matches!(result, Value::Number(n) if n == 7.0));
    }

    #[test]
    fn for_of_iterates_array_elements() {
        let result = run_source(
            r#"
            let items = [1, 2, 3];
            let total = 0;
            for (let item of items) {
                total = total + item;
            }
            return total;
            "#,
        );
        assert!(matches!(result, Value::Number(n) if n == 6.0));
    }
}
