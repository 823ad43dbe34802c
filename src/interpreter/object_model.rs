// File: src/interpreter/object_model.rs
//
// Instance construction, property access, and visibility enforcement.
// Grounded directly on
// examples/original_source/ardan-lang/Compiler/Turbo/InterpreterTurboVM/ObjectModel/ObjectModel.cpp:
// createInstance/createJSObject/makeObjectInstance/getProperty/setJSObjectClosure
// translate one-to-one to create_instance/get_property/set_property/
// rebind_closures_to below, adapted from shared_ptr + raw this-pointer
// identity to Rc::ptr_eq.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::Visibility;
use crate::errors::{ArdanError, ErrorKind};
use crate::interpreter::value::{ArrayData, ClassData, ClosureData, ObjectData, PropertyRecord, Value};

/// Evaluates a field initializer thunk (a zero-arg closure/function-ref) at
/// instance-construction time. The VM supplies the actual call mechanism.
pub trait Invoker {
    fn invoke_thunk(&mut self, thunk: &Value) -> Result<Value, ArdanError>;
}

fn owner_object_ptr(value: &Value) -> Option<*const ()> {
    match value {
        Value::Object(rc) => Some(Rc::as_ptr(rc) as *const ()),
        _ => None,
    }
}

fn class_ptr(value: &Value) -> Option<*const ()> {
    match value {
        Value::Class(rc) => Some(Rc::as_ptr(rc) as *const ()),
        _ => None,
    }
}

/// Whether `accessor_class` is `owner_class` or one of its descendants,
/// walking the superclass chain.
fn is_owner_or_descendant(mut accessor_class: Value, owner_class: &Value) -> bool {
    let owner_ptr = class_ptr(owner_class);
    loop {
        if class_ptr(&accessor_class) == owner_ptr {
            return true;
        }
        let next = match &accessor_class {
            Value::Class(c) => c.borrow().superclass.clone(),
            _ => None,
        };
        match next {
            Some(parent) => accessor_class = parent,
            None => return false,
        }
    }
}

fn accessor_class_of(accessor: &Value) -> Option<Value> {
    match accessor {
        Value::Object(o) => o.borrow().class.clone(),
        _ => None,
    }
}

/// Checks a privacy-qualified read/write against the current accessor
/// (the `this` of the currently executing method, or `None` outside any
/// method). `owner` is the object or class value the property record
/// actually lives on.
fn check_visibility(visibility: Visibility, owner: &Value, accessor: Option<&Value>) -> Result<(), ArdanError> {
    match visibility {
        Visibility::Public => Ok(()),
        Visibility::Private => {
            let owner_ptr = owner_object_ptr(owner).or_else(|| class_ptr(owner));
            let accessor_ptr = accessor.and_then(|a| owner_object_ptr(a).or_else(|| class_ptr(a)));
            if accessor_ptr.is_some() && accessor_ptr == owner_ptr {
                Ok(())
            } else {
                Err(ArdanError::new(ErrorKind::PrivacyViolation, "cannot access private member from outside its class"))
            }
        }
        Visibility::Protected => {
            let owner_class = match owner {
                Value::Class(_) => owner.clone(),
                Value::Object(o) => match &o.borrow().class {
                    Some(c) => c.clone(),
                    None => return Err(ArdanError::new(ErrorKind::PrivacyViolation, "protected member has no owning class")),
                },
                _ => return Err(ArdanError::new(ErrorKind::PrivacyViolation, "protected member has no owning class")),
            };
            match accessor.and_then(accessor_class_of) {
                Some(accessor_class) if is_owner_or_descendant(accessor_class, &owner_class) => Ok(()),
                _ => Err(ArdanError::new(ErrorKind::PrivacyViolation, "cannot access protected member outside its class hierarchy")),
            }
        }
    }
}

/// Rebinds every closure-valued property of `obj` so its `this_binding`
/// points at `obj` itself. Mirrors `setJSObjectClosure`.
pub fn rebind_closures_to(obj: &Value) {
    let Value::Object(cell) = obj else { return };
    let keys: Vec<String> = cell.borrow().properties.keys().map(str::to_string).collect();
    for key in keys {
        let rebound = {
            let data = cell.borrow();
            let record = data.properties.get(&key).unwrap();
            match &record.value {
                Value::Closure(c) => Some(Value::Closure(Rc::new(ClosureData {
                    descriptor: c.descriptor.clone(),
                    upvalues: c.upvalues.clone(),
                    this_binding: Some(obj.clone()),
                    captured_context: c.captured_context.clone(),
                }))),
                _ => None,
            }
        };
        if let Some(value) = rebound {
            cell.borrow_mut().properties.get_mut(&key).unwrap().value = value;
        }
    }
}

/// Builds one instance's own property map from a class's prototype
/// template, invoking any initializer thunks and rebinding any field
/// closures' `this` to the new object.
fn make_object_instance(class: &Value, invoker: &mut dyn Invoker) -> Result<ObjectData, ArdanError> {
    let mut data = ObjectData::new();
    let Value::Class(class_cell) = class else {
        return Err(ArdanError::new(ErrorKind::CallNonFunction, "cannot instantiate a non-class value"));
    };
    let proto_fields = class_cell.borrow().proto_fields.clone_entries();
    for (name, record) in proto_fields {
        let value = match &record.value {
            Value::FunctionRef(_) => invoker.invoke_thunk(&record.value)?,
            other => other.clone(),
        };
        data.properties.insert(name, PropertyRecord { value, kind: record.kind, visibility: record.visibility });
    }
    data.class = Some(class.clone());
    Ok(data)
}

/// Allocates and fully initializes an instance: own fields, closure
/// rebinding, and the superclass chain (`parent_object`/`parent_class`).
/// Does not run `constructor` — that's `InvokeConstructor`.
pub fn create_instance(class: &Value, invoker: &mut dyn Invoker) -> Result<Value, ArdanError> {
    let Value::Class(class_cell) = class else {
        return Err(ArdanError::new(ErrorKind::CallNonFunction, "cannot instantiate a non-class value"));
    };
    if class_cell.borrow().native {
        // Native classes build their own instance representation (see
        // `ClassData::native_builder`); classes that don't set one still
        // get a bare class-linked object as a fallback.
        let builder = class_cell.borrow().native_builder;
        return match builder {
            Some(build) => Ok(build()),
            None => {
                let mut data = ObjectData::new();
                data.class = Some(class.clone());
                Ok(Value::object(data))
            }
        };
    }

    let data = make_object_instance(class, invoker)?;
    let obj = Value::object(data);
    rebind_closures_to(&obj);

    let superclass = class_cell.borrow().superclass.clone();
    if let Some(parent_class) = superclass {
        let parent_object = create_instance(&parent_class, invoker)?;
        if let Value::Object(cell) = &obj {
            cell.borrow_mut().parent_object = Some(parent_object);
        }
    }

    Ok(obj)
}

/// Finds a method by walking `class` then its superclass chain, returning
/// the method's closure, its declared visibility, and the class that owns
/// it (for visibility checks).
fn find_method(class: &Value, name: &str) -> Option<(Value, Visibility, Value)> {
    let mut current = class.clone();
    loop {
        let (found, superclass) = match &current {
            Value::Class(cell) => {
                let borrowed = cell.borrow();
                (borrowed.methods.get(name).cloned(), borrowed.superclass.clone())
            }
            _ => (None, None),
        };
        if let Some(entry) = found {
            return Some((entry.closure, entry.visibility, current));
        }
        match superclass {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

fn bind_method(method: Value, receiver: &Value) -> Value {
    match method {
        Value::Closure(c) => Value::Closure(Rc::new(ClosureData {
            descriptor: c.descriptor.clone(),
            upvalues: c.upvalues.clone(),
            this_binding: Some(receiver.clone()),
            captured_context: c.captured_context.clone(),
        })),
        other => other,
    }
}

/// `GetProperty` — own map, then methods (own class then superclass
/// chain), then `parent_object`'s own fields. Primitives other than
/// array/string/object/class yield a runtime error; a missing key on an
/// object/array/class yields `undefined`.
pub fn get_property(target: &Value, name: &str, accessor: Option<&Value>) -> Result<Value, ArdanError> {
    match target {
        Value::Object(cell) => {
            if let Some(record) = cell.borrow().properties.get(name) {
                check_visibility(record.visibility, target, accessor)?;
                return Ok(record.value.clone());
            }
            let class = cell.borrow().class.clone();
            if let Some(class) = &class {
                if let Some((method, visibility, owner_class)) = find_method(class, name) {
                    check_visibility(visibility, &owner_class, accessor)?;
                    return Ok(bind_method(method, target));
                }
            }
            let parent = cell.borrow().parent_object.clone();
            if let Some(parent) = parent {
                return get_property(&parent, name, accessor);
            }
            Ok(Value::Undefined)
        }
        Value::Class(cell) => {
            if let Some(record) = cell.borrow().static_fields.get(name) {
                check_visibility(record.visibility, target, accessor)?;
                return Ok(record.value.clone());
            }
            if let Some((method, visibility, owner_class)) = find_method(target, name) {
                check_visibility(visibility, &owner_class, accessor)?;
                return Ok(method);
            }
            Ok(Value::Undefined)
        }
        Value::Array(arr) => {
            if name == "length" {
                return Ok(Value::Number(arr.borrow().elements.len() as f64));
            }
            if let Some(method) = array_method(arr, name) {
                return Ok(method);
            }
            Ok(arr.borrow().properties.get(name).map(|r| r.value.clone()).unwrap_or(Value::Undefined))
        }
        Value::Str(s) => {
            if name == "length" {
                return Ok(Value::Number(s.chars().count() as f64));
            }
            Ok(string_method(s, name).unwrap_or(Value::Undefined))
        }
        Value::Null | Value::Undefined => {
            Err(ArdanError::new(ErrorKind::PropertyAccessOnNonObject, format!("cannot read property `{name}` of {}", target.type_name())))
        }
        _ => Ok(Value::Undefined),
    }
}

/// Binds a small set of mutating/query methods directly to one array's
/// backing storage, closing over its `Rc` so `arr.push(x)` reads as a plain
/// property-get-then-call at the bytecode level (`compile_call` has no
/// separate "method call" opcode) without needing `this` threaded through
/// `Call`.
fn array_method(arr: &Rc<RefCell<ArrayData>>, name: &str) -> Option<Value> {
    let target = arr.clone();
    match name {
        "push" => Some(Value::native_fn(move |args: &[Value]| {
            let mut data = target.borrow_mut();
            data.elements.extend(args.iter().cloned());
            Ok(Value::Number(data.elements.len() as f64))
        })),
        "pop" => Some(Value::native_fn(move |_args: &[Value]| {
            Ok(target.borrow_mut().elements.pop().unwrap_or(Value::Undefined))
        })),
        "join" => Some(Value::native_fn(move |args: &[Value]| {
            let sep = args.first().map(Value::to_display_string).unwrap_or_else(|| ",".to_string());
            let joined = target.borrow().elements.iter().map(Value::to_display_string).collect::<Vec<_>>().join(&sep);
            Ok(Value::str(joined))
        })),
        _ => None,
    }
}

fn string_method(s: &Rc<str>, name: &str) -> Option<Value> {
    let text = s.clone();
    match name {
        "toUpperCase" => Some(Value::native_fn(move |_args: &[Value]| Ok(Value::str(text.to_uppercase())))),
        "toLowerCase" => Some(Value::native_fn(move |_args: &[Value]| Ok(Value::str(text.to_lowercase())))),
        "charAt" => Some(Value::native_fn(move |args: &[Value]| {
            let idx = match args.first() {
                Some(Value::Number(n)) => *n as usize,
                _ => 0,
            };
            Ok(text.chars().nth(idx).map(|c| Value::str(c.to_string())).unwrap_or_else(|| Value::str("")))
        })),
        _ => None,
    }
}

/// `SetProperty` / `SetPropertyDynamic` target. Enforces the same
/// visibility rule as `get_property` and rejects writes to `const` fields.
pub fn set_property(target: &Value, name: &str, value: Value, accessor: Option<&Value>) -> Result<(), ArdanError> {
    match target {
        Value::Object(cell) => {
            let existing_visibility = cell.borrow().properties.get(name).map(|r| (r.visibility, r.kind));
            if let Some((visibility, kind)) = existing_visibility {
                check_visibility(visibility, target, accessor)?;
                if kind == crate::ast::DeclKind::Const {
                    return Err(ArdanError::new(ErrorKind::AssignToConst, format!("cannot assign to const field `{name}`")));
                }
                cell.borrow_mut().properties.get_mut(name).unwrap().value = value;
            } else {
                cell.borrow_mut().properties.insert(name, PropertyRecord::public_var(value));
            }
            Ok(())
        }
        Value::Class(cell) => {
            let existing_visibility = cell.borrow().static_fields.get(name).map(|r| (r.visibility, r.kind));
            if let Some((visibility, kind)) = existing_visibility {
                check_visibility(visibility, target, accessor)?;
                if kind == crate::ast::DeclKind::Const {
                    return Err(ArdanError::new(ErrorKind::AssignToConst, format!("cannot assign to const static field `{name}`")));
                }
                cell.borrow_mut().static_fields.get_mut(name).unwrap().value = value;
            } else {
                cell.borrow_mut().static_fields.insert(name, PropertyRecord::public_var(value));
            }
            Ok(())
        }
        Value::Array(arr) => {
            arr.borrow_mut().properties.insert(name, PropertyRecord::public_var(value));
            Ok(())
        }
        _ => Err(ArdanError::new(ErrorKind::PropertyAccessOnNonObject, format!("cannot set property `{name}` on {}", target.type_name()))),
    }
}

/// An object-literal property: closures are rebound to the enclosing
/// object (so `{ greet() { return this.name } }` sees the literal as
/// `this`), everything else is stored as a public `var`.
pub fn set_object_literal_property(obj: &Value, key: &str, value: Value) {
    let value = match (&obj, &value) {
        (Value::Object(_), Value::Closure(c)) => Value::Closure(Rc::new(ClosureData {
            descriptor: c.descriptor.clone(),
            upvalues: c.upvalues.clone(),
            this_binding: Some(obj.clone()),
            captured_context: c.captured_context.clone(),
        })),
        _ => value,
    };
    if let Value::Object(cell) = obj {
        cell.borrow_mut().properties.insert(key, PropertyRecord::public_var(value));
    }
}

impl ClassData {
    /// Registers a field template, used by the code generator's
    /// `CreateClassXY` opcode handlers in the VM.
    pub fn define_field(&mut self, name: impl Into<String>, record: PropertyRecord, is_static: bool) {
        if is_static {
            self.static_fields.insert(name, record);
        } else {
            self.proto_fields.insert(name, record);
        }
    }
}
