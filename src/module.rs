// File: src/module.rs
//
// The code generator's output: a `Module` of `Chunk`s plus the binary
// `bin.ardar` encoder/decoder. Grounded on the original `TurboChunk.hpp` /
// `TurboModule.hpp` (examples/original_source/ardan-lang/Compiler/Turbo),
// adapted to Rust ownership (`Vec` instead of `shared_ptr` vectors).

use crate::bytecode::{Instruction, OpCode};
use crate::errors::{ArdanError, ErrorKind};
use std::convert::TryFrom;

/// A function descriptor: everything needed to call into a chunk without
/// yet knowing the closure's captured upvalues.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    pub chunk_index: u32,
    pub arity: u32,
    pub name: String,
    pub upvalue_count: u8,
}

/// A constant-pool entry. Distinct from the runtime `Value` because only
/// these shapes are knowable at compile time — arrays, objects, classes,
/// closures, and native functions are always built at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Function(FunctionDescriptor),
}

/// A linear bytecode buffer plus its local constant pool and metadata.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub max_locals: u32,
    pub arity: u32,
    pub name: String,
}

impl Chunk {
    pub fn new(name: impl Into<String>) -> Self {
        Chunk { code: Vec::new(), constants: Vec::new(), max_locals: 0, arity: 0, name: name.into() }
    }

    /// Appends an instruction and returns its index, for later back-patching.
    pub fn emit(&mut self, op: OpCode, a: u8, b: u8, c: u8) -> usize {
        self.code.push(Instruction::new(op, a, b, c));
        self.code.len() - 1
    }

    /// Rewrites the `b`/`c` operands of the instruction at `at` to the
    /// offset from the instruction *following* `at` to `target`.
    pub fn patch_jump(&mut self, at: usize, target: usize) -> Result<(), ArdanError> {
        let from = at + 1;
        let offset = if target >= from {
            target - from
        } else {
            return Err(ArdanError::new(ErrorKind::MalformedBytecode, "backward patch_jump target; use emit_loop instead"));
        };
        let offset = u16::try_from(offset)
            .map_err(|_| ArdanError::new(ErrorKind::MalformedBytecode, "jump offset exceeds u16 range"))?;
        self.code[at].set_bc(offset);
        Ok(())
    }

    /// Emits a backward `Loop` jump from the current end of the chunk to
    /// `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize) -> Result<(), ArdanError> {
        let from = self.code.len() + 1;
        let offset = from
            .checked_sub(loop_start)
            .ok_or_else(|| ArdanError::new(ErrorKind::MalformedBytecode, "loop target after loop body"))?;
        let offset = u16::try_from(offset)
            .map_err(|_| ArdanError::new(ErrorKind::MalformedBytecode, "loop offset exceeds u16 range"))?;
        let bytes = offset.to_be_bytes();
        self.emit(OpCode::Loop, 0, bytes[0], bytes[1]);
        Ok(())
    }

    /// Adds a constant, returning its pool index. Chunks are capped at 256
    /// constants since `LoadConst`'s `k` operand is a single byte.
    pub fn add_constant(&mut self, value: Constant) -> Result<u8, ArdanError> {
        if let Some(existing) = self.constants.iter().position(|c| *c == value) {
            return Ok(existing as u8);
        }
        let index = self.constants.len();
        u8::try_from(index)
            .map_err(|_| ArdanError::new(ErrorKind::MalformedBytecode, "chunk exceeded 256 constants"))?;
        self.constants.push(value);
        Ok(index as u8)
    }

    pub fn size(&self) -> usize {
        self.code.len()
    }
}

/// Top-level container of chunks and cross-chunk constants, with a
/// designated entry chunk.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub chunks: Vec<Chunk>,
    pub constants: Vec<Constant>,
    pub entry_chunk_index: u32,
    pub version: u32,
}

pub const FORMAT_VERSION: u32 = 1;

impl Module {
    pub fn new() -> Self {
        Module { chunks: Vec::new(), constants: Vec::new(), entry_chunk_index: 0, version: FORMAT_VERSION }
    }

    pub fn add_chunk(&mut self, chunk: Chunk) -> u32 {
        self.chunks.push(chunk);
        (self.chunks.len() - 1) as u32
    }

    /// Cross-chunk constants (currently used for hoisted function
    /// descriptors referenced by more than one chunk) aren't capped at 256
    /// — only per-chunk, `LoadConst`-addressed pools are.
    pub fn add_constant(&mut self, value: Constant) -> u32 {
        if let Some(existing) = self.constants.iter().position(|c| *c == value) {
            return existing as u32;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    pub fn entry_chunk(&self) -> &Chunk {
        &self.chunks[self.entry_chunk_index as usize]
    }
}

// --- bin.ardar binary encoding ---------------------------------------

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_constant(buf: &mut Vec<u8>, c: &Constant) {
    match c {
        Constant::Number(n) => {
            buf.push(0);
            write_f64(buf, *n);
        }
        Constant::Str(s) => {
            buf.push(1);
            write_string(buf, s);
        }
        Constant::Bool(b) => {
            buf.push(2);
            buf.push(if *b { 1 } else { 0 });
        }
        Constant::Null => buf.push(3),
        Constant::Undefined => buf.push(4),
        Constant::Function(f) => {
            buf.push(5);
            write_u32(buf, f.chunk_index);
            write_u32(buf, f.arity);
            write_string(buf, &f.name);
            buf.push(f.upvalue_count);
        }
    }
}

fn write_chunk(buf: &mut Vec<u8>, chunk: &Chunk) {
    write_string(buf, &chunk.name);
    write_u32(buf, chunk.arity);
    write_u32(buf, chunk.max_locals);
    write_u32(buf, chunk.constants.len() as u32);
    for c in &chunk.constants {
        write_constant(buf, c);
    }
    write_u32(buf, chunk.code.len() as u32);
    for instr in &chunk.code {
        buf.push(instr.op.to_byte());
        buf.push(instr.a);
        buf.push(instr.b);
        buf.push(instr.c);
    }
}

/// Serializes `module` to the `bin.ardar` wire format.
pub fn write_module(module: &Module) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, module.version);
    write_u32(&mut buf, module.entry_chunk_index);
    write_u32(&mut buf, module.constants.len() as u32);
    for c in &module.constants {
        write_constant(&mut buf, c);
    }
    write_u32(&mut buf, module.chunks.len() as u32);
    for chunk in &module.chunks {
        write_chunk(&mut buf, chunk);
    }
    buf
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ArdanError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(ArdanError::new(ErrorKind::MalformedBytecode, "unexpected end of bin.ardar stream"));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ArdanError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ArdanError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_be_bytes(bytes))
    }

    fn f64(&mut self) -> Result<f64, ArdanError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_be_bytes(bytes))
    }

    fn string(&mut self) -> Result<String, ArdanError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ArdanError::new(ErrorKind::MalformedBytecode, "non-UTF8 string in bin.ardar stream"))
    }

    fn constant(&mut self) -> Result<Constant, ArdanError> {
        match self.u8()? {
            0 => Ok(Constant::Number(self.f64()?)),
            1 => Ok(Constant::Str(self.string()?)),
            2 => Ok(Constant::Bool(self.u8()? != 0)),
            3 => Ok(Constant::Null),
            4 => Ok(Constant::Undefined),
            5 => {
                let chunk_index = self.u32()?;
                let arity = self.u32()?;
                let name = self.string()?;
                let upvalue_count = self.u8()?;
                Ok(Constant::Function(FunctionDescriptor { chunk_index, arity, name, upvalue_count }))
            }
            tag => Err(ArdanError::new(ErrorKind::MalformedBytecode, format!("unknown constant tag {tag}"))),
        }
    }

    fn chunk(&mut self) -> Result<Chunk, ArdanError> {
        let name = self.string()?;
        let arity = self.u32()?;
        let max_locals = self.u32()?;
        let constant_count = self.u32()?;
        let mut constants = Vec::with_capacity(constant_count as usize);
        for _ in 0..constant_count {
            constants.push(self.constant()?);
        }
        let instr_count = self.u32()?;
        let mut code = Vec::with_capacity(instr_count as usize);
        for _ in 0..instr_count {
            let op_byte = self.u8()?;
            let op = OpCode::from_byte(op_byte)
                .ok_or_else(|| ArdanError::new(ErrorKind::MalformedBytecode, format!("unknown opcode byte {op_byte}")))?;
            let a = self.u8()?;
            let b = self.u8()?;
            let c = self.u8()?;
            code.push(Instruction::new(op, a, b, c));
        }
        Ok(Chunk { code, constants, max_locals, arity, name })
    }
}

/// Deserializes a `bin.ardar` byte stream back into a `Module`. Round-trips
/// with `write_module`: `read_module(&write_module(m)) == m` (structurally).
pub fn read_module(bytes: &[u8]) -> Result<Module, ArdanError> {
    let mut reader = Reader::new(bytes);
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(ArdanError::new(ErrorKind::MalformedBytecode, format!("unsupported bin.ardar version {version}")));
    }
    let entry_chunk_index = reader.u32()?;
    let constant_count = reader.u32()?;
    let mut constants = Vec::with_capacity(constant_count as usize);
    for _ in 0..constant_count {
        constants.push(reader.constant()?);
    }
    let chunk_count = reader.u32()?;
    let mut chunks = Vec::with_capacity(chunk_count as usize);
    for _ in 0..chunk_count {
        chunks.push(reader.chunk()?);
    }
    Ok(Module { chunks, constants, entry_chunk_index, version })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_empty_module() {
        let mut module = Module::new();
        let mut chunk = Chunk::new("main");
        chunk.arity = 0;
        let k = chunk.add_constant(Constant::Undefined).unwrap();
        chunk.emit(OpCode::LoadConst, 1, k, 0);
        chunk.emit(OpCode::Return, 1, 0, 0);
        module.add_chunk(chunk);

        let bytes = write_module(&module);
        let decoded = read_module(&bytes).unwrap();

        assert_eq!(decoded.version, module.version);
        assert_eq!(decoded.entry_chunk_index, module.entry_chunk_index);
        assert_eq!(decoded.chunks.len(), 1);
        assert_eq!(decoded.chunks[0].code, module.chunks[0].code);
        assert_eq!(decoded.chunks[0].constants, module.chunks[0].constants);
    }

    #[test]
    fn round_trips_cross_chunk_constants_and_function_descriptors() {
        let mut module = Module::new();
        let callee = Chunk::new("callee");
        let callee_index = module.add_chunk(callee);
        module.add_constant(Constant::Function(FunctionDescriptor {
            chunk_index: callee_index,
            arity: 2,
            name: "add".to_string(),
            upvalue_count: 0,
        }));
        let mut main = Chunk::new("main");
        main.emit(OpCode::Return, 0, 0, 0);
        module.add_chunk(main);

        let decoded = read_module(&write_module(&module)).unwrap();
        assert_eq!(decoded.constants.len(), 1);
        assert_eq!(decoded.constants[0], Constant::Function(FunctionDescriptor {
            chunk_index: callee_index,
            arity: 2,
            name: "add".to_string(),
            upvalue_count: 0,
        }));
    }

    #[test]
    fn chunk_deduplicates_equal_constants() {
        let mut chunk = Chunk::new("c");
        let a = chunk.add_constant(Constant::Number(1.0)).unwrap();
        let b = chunk.add_constant(Constant::Number(1.0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(chunk.constants.len(), 1);
    }
}
