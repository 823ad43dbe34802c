// Shared helper for the integration test binaries: compiles and runs a
// snippet through the full pipeline, the same way `vm.rs`'s own unit tests
// do for a single chunk.

use ardan::compiler::Compiler;
use ardan::errors::ArdanError;
use ardan::interpreter::value::Value;
use ardan::lexer::tokenize;
use ardan::parser::Parser;
use ardan::vm::Vm;

#[allow(dead_code)]
pub fn run_source(src: &str) -> Result<Value, ArdanError> {
    let tokens = tokenize(src)?;
    let program = Parser::new(tokens).parse_program()?;
    let module = Compiler::new().compile(&program)?;
    Vm::new(module).run()
}

#[allow(dead_code)]
pub fn expect_number(src: &str) -> f64 {
    match run_source(src).unwrap() {
        Value::Number(n) => n,
        other => panic!("expected a number, got {other:?}"),
    }
}

#[allow(dead_code)]
pub fn expect_string(src: &str) -> String {
    match run_source(src).unwrap() {
        Value::Str(s) => s.to_string(),
        other => panic!("expected a string, got {other:?}"),
    }
}
