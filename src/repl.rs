// File: src/repl.rs
//
// Interactive GavelScript shell (§1 peripheral glue; §6 "a host must
// expose... compile a source string, invoke a callee"). One compile +
// execute per logical input, persistent `Vm` (globals, heap) across
// lines — shaped like the teacher's `repl.rs`: a `rustyline`-backed
// editor, a banner, `:`-prefixed meta-commands, and bracket-balance
// driven multi-line continuation.

use crate::builtins;
use crate::compiler::compile;
use crate::vm::Vm;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        let mut vm = Vm::new();
        builtins::install(&mut vm);
        Ok(Repl { vm, editor })
    }

    fn show_banner(&self) {
        println!("{}", "GavelScript REPL".bright_cyan().bold());
        println!(
            "  {} leave a bracket open to continue on the next line; {} to exit",
            ":help".bright_yellow(),
            ":quit".bright_yellow()
        );
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();
        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() { "gavel> " } else { "   ..> " };
            match self.editor.readline(prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());

                    if buffer.is_empty() && line.trim().starts_with(':') {
                        if !self.handle_command(line.trim()) {
                            break;
                        }
                        continue;
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');

                    if is_balanced(&buffer) {
                        self.eval_input(buffer.trim_end());
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    buffer.clear();
                    println!("{}", "^C".bright_yellow());
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "\ngoodbye".bright_cyan());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {}", "error:".bright_red(), err);
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, cmd: &str) -> bool {
        match cmd {
            ":help" | ":h" => {
                println!("  :help    show this message");
                println!("  :reset   discard the current Vm and start fresh");
                println!("  :quit    exit the REPL");
                true
            }
            ":reset" | ":r" => {
                self.vm = Vm::new();
                builtins::install(&mut self.vm);
                println!("{}", "environment reset".bright_green());
                true
            }
            ":quit" | ":q" | ":exit" => {
                println!("{}", "goodbye".bright_cyan());
                false
            }
            other => {
                println!("{} unknown command {}", "error:".bright_red(), other);
                true
            }
        }
    }

    fn eval_input(&mut self, input: &str) {
        if input.trim().is_empty() {
            return;
        }
        match compile(input, &mut self.vm.heap) {
            Ok(func_ref) => match self.vm.run_function(func_ref) {
                Ok(value) => {
                    if !matches!(value, crate::value::Value::Nil) {
                        println!("{} {}", "=>".bright_blue(), self.vm.heap.display_value(&value));
                    }
                }
                Err(objection) => print!("{}", objection),
            },
            Err(objection) => print!("{}", objection),
        }
    }
}

/// Tracks paren/brace/bracket depth outside of strings and `//` comments,
/// the same delimiter-balance test the teacher's REPL uses to decide
/// whether to keep reading more lines.
fn is_balanced(input: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '/' if !in_string && chars.peek() == Some(&'/') => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '(' | '{' | '[' if !in_string => depth += 1,
            ')' | '}' | ']' if !in_string => depth -= 1,
            _ => {}
        }
    }
    !in_string && depth <= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_tracks_open_brackets() {
        assert!(!is_balanced("function f(a, b\n"));
        assert!(is_balanced("function f(a, b) return a end\n"));
    }

    #[test]
    fn balance_ignores_brackets_in_strings_and_comments() {
        assert!(is_balanced("var s = \"(unbalanced\"\n"));
        assert!(is_balanced("var x = 1 // (\n"));
    }
}
