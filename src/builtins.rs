// File: src/builtins.rs
//
// Host-provided globals. The VM dispatch loop has no notion of "print" or
// "file system" — those live here, bound into the root environment before
// `Vm::run` starts, the same adapter role the teacher's old builtins module
// played for its own standard library.

use std::fs;

use crate::ast::DeclKind;
use crate::errors::{ArdanError, ErrorKind};
use crate::interpreter::environment::ExecutionContext;
use crate::interpreter::event_loop::new_pending_promise;
use crate::interpreter::value::{ClassData, ObjectData, PromiseStatus, PropertyRecord, Value};

/// Installs every host global the VM expects to find already bound before
/// `run` starts (`console`/`print`, `Math`, the `Array`/`String`/`Boolean`/
/// `Number` constructors, `Promise`, `fs`, `JSON`).
pub fn install(ctx: &ExecutionContext) {
    ctx.define("console", console_object(), DeclKind::Var);
    ctx.define("print", Value::native_fn(print_fn), DeclKind::Var);
    ctx.define("Math", math_object(), DeclKind::Var);
    ctx.define("Array", Value::native_fn(array_ctor), DeclKind::Var);
    ctx.define("String", Value::native_fn(string_ctor), DeclKind::Var);
    ctx.define("Boolean", Value::native_fn(boolean_ctor), DeclKind::Var);
    ctx.define("Number", Value::native_fn(number_ctor), DeclKind::Var);
    ctx.define("Promise", promise_class(), DeclKind::Var);
    ctx.define("fs", fs_object(), DeclKind::Var);
    ctx.define("JSON", json_object(), DeclKind::Var);
}

fn object_with(props: Vec<(&str, Value)>) -> Value {
    let mut data = ObjectData::new();
    for (name, value) in props {
        data.properties.insert(name, PropertyRecord::public_var(value));
    }
    Value::object(data)
}

fn print_fn(args: &[Value]) -> Result<Value, ArdanError> {
    let line = args.iter().map(|v| v.to_display_string()).collect::<Vec<_>>().join(" ");
    println!("{line}");
    Ok(Value::Undefined)
}

fn console_object() -> Value {
    object_with(vec![("log", Value::native_fn(print_fn))])
}

fn arg_number(args: &[Value], i: usize) -> f64 {
    args.get(i).map(value_to_number).unwrap_or(f64::NAN)
}

fn value_to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Boolean(b) => if *b { 1.0 } else { 0.0 },
        Value::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Null => 0.0,
        _ => f64::NAN,
    }
}

fn math_object() -> Value {
    object_with(vec![
        ("PI", Value::Number(std::f64::consts::PI)),
        (
            "abs",
            Value::native_fn(|args: &[Value]| Ok(Value::Number(arg_number(args, 0).abs()))),
        ),
        (
            "pow",
            Value::native_fn(|args: &[Value]| Ok(Value::Number(arg_number(args, 0).powf(arg_number(args, 1))))),
        ),
    ])
}

fn array_ctor(args: &[Value]) -> Result<Value, ArdanError> {
    if args.len() == 1 {
        if let Value::Number(n) = args[0] {
            return Ok(Value::array(vec![Value::Undefined; n as usize]));
        }
    }
    Ok(Value::array(args.to_vec()))
}

fn string_ctor(args: &[Value]) -> Result<Value, ArdanError> {
    Ok(Value::str(args.first().map(Value::to_display_string).unwrap_or_default()))
}

fn boolean_ctor(args: &[Value]) -> Result<Value, ArdanError> {
    Ok(Value::Boolean(args.first().map(Value::is_truthy).unwrap_or(false)))
}

fn number_ctor(args: &[Value]) -> Result<Value, ArdanError> {
    Ok(Value::Number(args.first().map(value_to_number).unwrap_or(0.0)))
}

/// `Promise` is a genuine native class (`ClassData.native == true`):
/// `new Promise(executor)` goes through `create_instance`'s native branch,
/// which calls `native_builder` to allocate a real `Value::Promise` instead
/// of a bare object, and `InvokeConstructor` special-cases `Value::Promise`
/// (see `Vm::run_promise_constructor`) to run the executor with `resolve`/
/// `reject` bound to it. The static `resolve(value)` lives in
/// `static_fields`, reachable the same way any other static is.
fn promise_class() -> Value {
    let mut class = ClassData::new("Promise");
    class.native = true;
    class.native_builder = Some(new_pending_promise);
    class.static_fields.insert("resolve", PropertyRecord::public_var(Value::native_fn(promise_resolve)));
    Value::Class(std::rc::Rc::new(std::cell::RefCell::new(class)))
}

fn promise_resolve(args: &[Value]) -> Result<Value, ArdanError> {
    let promise = new_pending_promise();
    if let Value::Promise(cell) = &promise {
        let mut data = cell.borrow_mut();
        data.status = PromiseStatus::Fulfilled;
        data.value = args.first().cloned().unwrap_or(Value::Undefined);
    }
    Ok(promise)
}

fn fs_object() -> Value {
    object_with(vec![
        ("readFileSync", Value::native_fn(fs_read_file_sync)),
        ("writeFileSync", Value::native_fn(fs_write_file_sync)),
    ])
}

fn fs_read_file_sync(args: &[Value]) -> Result<Value, ArdanError> {
    let path = args.first().map(Value::to_display_string).unwrap_or_default();
    fs::read_to_string(&path)
        .map(Value::str)
        .map_err(|e| ArdanError::new(ErrorKind::MalformedBytecode, format!("fs.readFileSync({path}): {e}")))
}

fn fs_write_file_sync(args: &[Value]) -> Result<Value, ArdanError> {
    let path = args.first().map(Value::to_display_string).unwrap_or_default();
    let contents = args.get(1).map(Value::to_display_string).unwrap_or_default();
    fs::write(&path, contents)
        .map(|_| Value::Undefined)
        .map_err(|e| ArdanError::new(ErrorKind::MalformedBytecode, format!("fs.writeFileSync({path}): {e}")))
}

fn json_object() -> Value {
    object_with(vec![("parse", Value::native_fn(json_parse)), ("stringify", Value::native_fn(json_stringify))])
}

fn json_parse(args: &[Value]) -> Result<Value, ArdanError> {
    let text = args.first().map(Value::to_display_string).unwrap_or_default();
    let parsed: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| ArdanError::new(ErrorKind::ParseError, format!("JSON.parse: {e}")))?;
    Ok(json_to_value(&parsed))
}

fn json_stringify(args: &[Value]) -> Result<Value, ArdanError> {
    let value = args.first().cloned().unwrap_or(Value::Undefined);
    let json = value_to_json(&value);
    serde_json::to_string(&json)
        .map(Value::str)
        .map_err(|e| ArdanError::new(ErrorKind::MalformedBytecode, format!("JSON.stringify: {e}")))
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::str(s.clone()),
        serde_json::Value::Array(items) => Value::array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let mut data = ObjectData::new();
            for (k, v) in map {
                data.properties.insert(k.clone(), PropertyRecord::public_var(json_to_value(v)));
            }
            Value::object(data)
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Null | Value::Undefined => serde_json::Value::Null,
        Value::Array(arr) => serde_json::Value::Array(arr.borrow().elements.iter().map(value_to_json).collect()),
        Value::Object(obj) => {
            let mut map = serde_json::Map::new();
            for (k, record) in obj.borrow().properties.iter() {
                map.insert(k.to_string(), value_to_json(&record.value));
            }
            serde_json::Value::Object(map)
        }
        _ => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_abs_and_pow_work() {
        let math = math_object();
        let Value::Object(cell) = &math else { panic!("expected object") };
        let abs = cell.borrow().properties.get("abs").unwrap().value.clone();
        let Value::NativeFunction(f) = abs else { panic!("expected native fn") };
        let Value::Number(result) = f(&[Value::Number(-3.0)]).unwrap() else { panic!("expected number") };
        assert_eq!(result, 3.0);
    }

    #[test]
    fn json_round_trips_an_object() {
        let original = json_parse(&[Value::str(r#"{"a":1,"b":[true,null]}"#)]).unwrap();
        let stringified = json_stringify(&[original]).unwrap();
        assert!(matches!(stringified, Value::Str(_)));
    }

    #[test]
    fn promise_resolve_settles_immediately() {
        let promise = promise_resolve(&[Value::Number(1.0)]).unwrap();
        let Value::Promise(cell) = promise else { panic!("expected promise") };
        assert_eq!(cell.borrow().status, PromiseStatus::Fulfilled);
    }

    #[test]
    fn promise_class_is_native_with_a_builder_and_a_static_resolve() {
        let Value::Class(cell) = promise_class() else { panic!("expected class") };
        let class = cell.borrow();
        assert!(class.native);
        assert!(class.native_builder.is_some());
        assert!(class.static_fields.get("resolve").is_some());
    }
}
