// File: src/main.rs
//
// Entry point. Four modes, selected by flags, or a flagless run driven by
// `ardan.json` in the working directory.

mod ast;
mod builtins;
mod bytecode;
mod compiler;
mod config;
mod errors;
mod interpreter;
mod lexer;
mod module;
mod parser;
mod repl;
mod vm;

use std::fs;
use std::path::PathBuf;

use clap::Parser as ClapParser;

use crate::compiler::Compiler;
use crate::config::ArdanConfig;
use crate::errors::ArdanError;
use crate::module::Module;
use crate::vm::Vm;

#[derive(ClapParser)]
#[command(name = "ardan", about = "Ardan: a register-based bytecode compiler and VM", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Parse and run a source file directly (same execution engine as --compile_run)
    #[arg(long)]
    interpret: Option<PathBuf>,

    /// Compile a source file to `bin.ardar`
    #[arg(long)]
    compile: bool,

    /// Compile a source file and immediately run it
    #[arg(long)]
    compile_run: bool,

    /// Source file for --compile / --compile_run
    #[arg(short = 'e', long)]
    e: Option<PathBuf>,

    /// Launch the interactive REPL
    #[arg(long)]
    repl: bool,
}

fn main() {
    let cli = Cli::parse();

    let outcome = if cli.repl {
        run_repl()
    } else if let Some(file) = cli.interpret {
        compile_and_run(&file)
    } else if cli.compile {
        let file = cli.e.unwrap_or_else(|| resolve_main_from_config());
        compile_to_file(&file)
    } else if cli.compile_run {
        let file = cli.e.unwrap_or_else(|| resolve_main_from_config());
        compile_and_run(&file)
    } else if let Some(config) = ArdanConfig::discover() {
        compile_and_run(&config.main)
    } else {
        eprintln!("no mode selected and no ardan.json found; see --help");
        std::process::exit(1);
    };

    if let Err(err) = outcome {
        eprint!("{err}");
        std::process::exit(1);
    }
}

fn resolve_main_from_config() -> PathBuf {
    match ArdanConfig::discover() {
        Some(config) => config.main,
        None => {
            eprintln!("no file given and no ardan.json found");
            std::process::exit(1);
        }
    }
}

fn compile_source(file: &PathBuf) -> Result<Module, ArdanError> {
    let source = fs::read_to_string(file)
        .map_err(|e| ArdanError::new(errors::ErrorKind::MalformedBytecode, format!("reading {}: {e}", file.display())))?;
    let tokens = lexer::tokenize(&source)?;
    let program = parser::Parser::new(tokens).parse_program()?;
    Compiler::new().compile(&program)
}

fn compile_and_run(file: &PathBuf) -> Result<(), ArdanError> {
    let module = compile_source(file)?;
    Vm::new(module).run()?;
    Ok(())
}

fn compile_to_file(file: &PathBuf) -> Result<(), ArdanError> {
    let module = compile_source(file)?;
    let bytes = module::write_module(&module);
    fs::write("bin.ardar", bytes)
        .map_err(|e| ArdanError::new(errors::ErrorKind::MalformedBytecode, format!("writing bin.ardar: {e}")))?;
    Ok(())
}

fn run_repl() -> Result<(), ArdanError> {
    let mut repl = repl::Repl::new().map_err(|e| ArdanError::new(errors::ErrorKind::MalformedBytecode, e.to_string()))?;
    repl.run().map_err(|e| ArdanError::new(errors::ErrorKind::MalformedBytecode, e.to_string()))
}
