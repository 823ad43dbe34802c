// File: src/repl.rs
//
// Interactive REPL for Ardan: reads a statement, compiles it to its own
// tiny module, and runs that module on a `Vm` whose globals persist across
// lines, so a `let` on one line is visible on the next.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::compiler::Compiler;
use crate::lexer;
use crate::parser::Parser;
use crate::vm::Vm;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        let empty_module = Compiler::new().compile(&Vec::new())?;
        Ok(Repl { vm: Vm::new(empty_module), editor })
    }

    fn show_banner(&self) {
        println!("{}", "Ardan REPL".bright_cyan().bold());
        println!("  {} :help for commands, :quit to exit", "tip:".dimmed());
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();
        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() { "ardan> ".bright_green().to_string() } else { "....> ".bright_blue().to_string() };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());

                    if buffer.is_empty() && line.trim().starts_with(':') {
                        if self.handle_command(line.trim()) {
                            continue;
                        } else {
                            break;
                        }
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');

                    if is_input_complete(&buffer) {
                        self.eval_input(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C (:quit to exit)".bright_yellow());
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "\ngoodbye".bright_cyan());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {err}", "error:".bright_red());
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_command(&mut self, cmd: &str) -> bool {
        match cmd {
            ":help" | ":h" => {
                self.show_help();
                true
            }
            ":quit" | ":q" | ":exit" => {
                println!("{}", "goodbye".bright_cyan());
                false
            }
            ":clear" | ":c" => {
                print!("\x1B[2J\x1B[1;1H");
                self.show_banner();
                true
            }
            _ => {
                println!("{} unknown command: {cmd}. Type :help.", "error:".bright_red());
                true
            }
        }
    }

    fn show_help(&self) {
        println!();
        println!("  :help, :h    show this message");
        println!("  :quit, :q    exit the REPL");
        println!("  :clear, :c   clear the screen");
        println!();
        println!("  leave braces, brackets or parens unclosed to continue onto the next line");
        println!();
    }

    fn eval_input(&mut self, input: &str) {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return;
        }

        let result = lexer::tokenize(input)
            .and_then(|tokens| Parser::new(tokens).parse_program())
            .and_then(|program| Compiler::new().compile(&program))
            .and_then(|module| self.vm.run_module(module));

        match result {
            Ok(value) => println!("{}", value.to_display_string().dimmed()),
            Err(err) => eprint!("{err}"),
        }
    }
}

/// Balances braces/brackets/parens, tracking string literals so a `{` inside
/// a string doesn't count, to decide whether a multi-line statement is done.
fn is_input_complete(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return true;
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in trimmed.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' | '(' if !in_string => depth += 1,
            '}' | ']' | ')' if !in_string => depth -= 1,
            _ => {}
        }
    }

    !in_string && depth <= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_unbalanced_braces() {
        assert!(!is_input_complete("func greet() {"));
        assert!(is_input_complete("func greet() { return 1; }"));
    }

    #[test]
    fn braces_inside_strings_do_not_count() {
        assert!(is_input_complete(r#"print("{ not a brace }");"#));
    }
}
