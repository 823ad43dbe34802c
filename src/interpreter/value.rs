// File: src/interpreter/value.rs
//
// Runtime value types for Ardan. Reference-shaped values are
// `Rc<RefCell<_>>` — single-threaded, cooperatively-scheduled VM, so no
// atomics or locking is needed (see module docs on `interpreter::event_loop`).
// Cyclic object/closure graphs are an accepted leak; see the module's
// `this`-rebinding notes in `object_model`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{DeclKind, Visibility};
use crate::errors::ArdanError;
use crate::interpreter::environment::ExecutionContext;
use crate::module::FunctionDescriptor;

/// An insertion-ordered string-keyed map. Plain `HashMap` would make
/// `EnumKeys`/`for-in` iteration order nondeterministic, which would break
/// the determinism invariant; a small linear-scan vector is enough since
/// objects rarely carry more than a handful of properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    entries: Vec<(String, PropertyRecord)>,
}

impl PropertyMap {
    pub fn new() -> Self {
        PropertyMap { entries: Vec::new() }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyRecord> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PropertyRecord> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or overwrites. Returns the previous record, if any.
    pub fn insert(&mut self, key: impl Into<String>, record: PropertyRecord) -> Option<PropertyRecord> {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, record));
        }
        self.entries.push((key, record));
        None
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyRecord)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn clone_entries(&self) -> Vec<(String, PropertyRecord)> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PropertyRecord {
    pub value: Value,
    pub kind: DeclKind,
    pub visibility: Visibility,
}

impl PropertyRecord {
    pub fn public_var(value: Value) -> Self {
        PropertyRecord { value, kind: DeclKind::Var, visibility: Visibility::Public }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArrayData {
    pub elements: Vec<Value>,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone)]
pub struct ObjectData {
    pub properties: PropertyMap,
    /// The class this instance was constructed from, if any.
    pub class: Option<Value>,
    /// The superclass instance's own state, chained for `protected`/method
    /// lookups that fall through to an ancestor.
    pub parent_object: Option<Value>,
}

impl ObjectData {
    pub fn new() -> Self {
        ObjectData { properties: PropertyMap::new(), class: None, parent_object: None }
    }
}

impl Default for ObjectData {
    fn default() -> Self {
        ObjectData::new()
    }
}

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub visibility: Visibility,
    pub is_static: bool,
    pub closure: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ClassData {
    pub name: String,
    pub superclass: Option<Value>,
    /// True for host-provided classes whose instances are built by a Rust
    /// constructor rather than the object model (e.g. `Promise`).
    pub native: bool,
    /// For `native` classes: builds the instance's actual runtime
    /// representation (e.g. a fresh `Value::Promise`) in place of the bare
    /// `ObjectData` `create_instance` would otherwise allocate. A plain `fn`
    /// pointer is enough since a native builder needs no captured state.
    pub native_builder: Option<fn() -> Value>,
    pub static_fields: PropertyMap,
    pub proto_fields: PropertyMap,
    pub methods: HashMap<String, MethodEntry>,
}

impl ClassData {
    pub fn new(name: impl Into<String>) -> Self {
        ClassData { name: name.into(), ..Default::default() }
    }
}

/// An upvalue cell. Open while the frame that owns the captured register
/// is live; closed (value copied out) when that frame returns.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open { registers: Rc<RefCell<[Value; 256]>>, slot: u8 },
    Closed(Value),
}

impl Upvalue {
    pub fn get(&self) -> Value {
        match self {
            Upvalue::Open { registers, slot } => registers.borrow()[*slot as usize].clone(),
            Upvalue::Closed(v) => v.clone(),
        }
    }

    pub fn set(&mut self, value: Value) {
        match self {
            Upvalue::Open { registers, slot } => registers.borrow_mut()[*slot as usize] = value,
            Upvalue::Closed(slot) => *slot = value,
        }
    }

    pub fn close(&mut self) {
        if let Upvalue::Open { registers, slot } = self {
            let value = registers.borrow()[*slot as usize].clone();
            *self = Upvalue::Closed(value);
        }
    }
}

pub type UpvalueHandle = Rc<RefCell<Upvalue>>;

#[derive(Debug, Clone)]
pub struct ClosureData {
    pub descriptor: FunctionDescriptor,
    pub upvalues: Vec<UpvalueHandle>,
    pub this_binding: Option<Value>,
    /// Lexical lookup fallback for globals created after this closure was
    /// built, or accessed through a chain the register allocator didn't
    /// need to capture as an upvalue.
    pub captured_context: Option<Rc<RefCell<ExecutionContext>>>,
}

pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, ArdanError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

#[derive(Clone, Debug)]
pub struct PromiseData {
    pub status: PromiseStatus,
    pub value: Value,
    pub on_fulfilled: Vec<Value>,
    pub on_rejected: Vec<Value>,
}

impl PromiseData {
    pub fn pending() -> Self {
        PromiseData { status: PromiseStatus::Pending, value: Value::Undefined, on_fulfilled: Vec::new(), on_rejected: Vec::new() }
    }
}

/// The tagged runtime value. Reference-shaped variants share ownership via
/// `Rc`; mutation goes through `RefCell`.
#[derive(Clone)]
pub enum Value {
    Number(f64),
    Str(Rc<str>),
    Boolean(bool),
    Null,
    Undefined,
    Array(Rc<RefCell<ArrayData>>),
    Object(Rc<RefCell<ObjectData>>),
    Class(Rc<RefCell<ClassData>>),
    Closure(Rc<ClosureData>),
    FunctionRef(FunctionDescriptor),
    NativeFunction(Rc<NativeFn>),
    Promise(Rc<RefCell<PromiseData>>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Rc::from(s.into().as_str()))
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(ArrayData { elements, properties: PropertyMap::new() })))
    }

    pub fn object(data: ObjectData) -> Self {
        Value::Object(Rc::new(RefCell::new(data)))
    }

    pub fn native_fn(f: impl Fn(&[Value]) -> Result<Value, ArdanError> + 'static) -> Self {
        Value::NativeFunction(Rc::new(f))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Null | Value::Undefined => false,
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Null => "object",
            Value::Undefined => "undefined",
            Value::Array(_) => "object",
            Value::Object(_) => "object",
            Value::Class(_) => "function",
            Value::Closure(_) | Value::FunctionRef(_) | Value::NativeFunction(_) => "function",
            Value::Promise(_) => "object",
        }
    }

    /// `==` — numeric coercion between number/string/boolean, reference
    /// identity for everything else.
    pub fn loose_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null | Undefined, Null | Undefined) => true,
            (Number(a), Number(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Number(a), Str(b)) | (Str(b), Number(a)) => b.parse::<f64>().map(|b| *a == b).unwrap_or(false),
            (Boolean(a), other) => Value::Boolean(*a).strict_eq(other) || Number(if *a { 1.0 } else { 0.0 }).loose_eq(other),
            (Array(a), Array(b)) => Rc::ptr_eq(a, b),
            (Object(a), Object(b)) => Rc::ptr_eq(a, b),
            (Class(a), Class(b)) => Rc::ptr_eq(a, b),
            (Closure(a), Closure(b)) => Rc::ptr_eq(a, b),
            (Promise(a), Promise(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `===` — no coercion.
    pub fn strict_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) | (Undefined, Undefined) => true,
            (Number(a), Number(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Array(a), Array(b)) => Rc::ptr_eq(a, b),
            (Object(a), Object(b)) => Rc::ptr_eq(a, b),
            (Class(a), Class(b)) => Rc::ptr_eq(a, b),
            (Closure(a), Closure(b)) => Rc::ptr_eq(a, b),
            (NativeFunction(a), NativeFunction(b)) => Rc::ptr_eq(a, b),
            (Promise(a), Promise(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            Value::Str(s) => s.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Undefined => "undefined".to_string(),
            Value::Array(arr) => {
                let items: Vec<String> = arr.borrow().elements.iter().map(Value::to_display_string).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Object(obj) => {
                let fields: Vec<String> = obj
                    .borrow()
                    .properties
                    .iter()
                    .map(|(k, r)| format!("{k}: {}", r.value.to_display_string()))
                    .collect();
                format!("{{ {} }}", fields.join(", "))
            }
            Value::Class(class) => format!("[class {}]", class.borrow().name),
            Value::Closure(c) => format!("[function {}]", c.descriptor.name),
            Value::FunctionRef(f) => format!("[function {}]", f.name),
            Value::NativeFunction(_) => "[native function]".to_string(),
            Value::Promise(p) => format!("[object Promise <{:?}>]", p.borrow().status),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}
