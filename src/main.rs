// File: src/main.rs
//
// `gavelc`: peripheral CLI glue over the `gavelscript` library (§1, §6
// Expansion). Four subcommands mirroring the teacher's `Cli`/`Commands`
// derive shape: `run` a source file, `repl` for an interactive shell,
// `disasm` to print bytecode without executing it, and `dump`/`undump`
// to exercise the serializer directly.

use clap::{Parser, Subcommand};
use colored::Colorize;
use gavelscript::builtins;
use gavelscript::gc::Heap;
use gavelscript::object::{Obj, ObjRef};
use gavelscript::repl::Repl;
use gavelscript::serialize::{dump, undump};
use gavelscript::value::Value;
use gavelscript::{chunk, compiler, Vm};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "gavelc", about = "GavelScript: an embeddable bytecode-VM scripting language", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a .gavel source file
    Run { file: PathBuf },
    /// Launch the interactive REPL
    Repl,
    /// Print the disassembly of a compiled source file without running it
    Disasm { file: PathBuf },
    /// Compile a source file and write its bytecode to a file
    Dump { file: PathBuf, out: PathBuf },
    /// Load and run a previously dumped bytecode file
    Undump { file: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { file } => run_file(&file),
        Commands::Repl => run_repl(),
        Commands::Disasm { file } => disassemble_file(&file),
        Commands::Dump { file, out } => dump_file(&file, &out),
        Commands::Undump { file } => undump_file(&file),
    }
}

fn read_source(file: &PathBuf) -> Result<String, ExitCode> {
    fs::read_to_string(file).map_err(|e| {
        eprintln!("{} could not read {}: {}", "error:".red().bold(), file.display(), e);
        ExitCode::FAILURE
    })
}

fn run_file(file: &PathBuf) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut vm = Vm::new();
    builtins::install(&mut vm);
    let func_ref = match compiler::compile(&source, &mut vm.heap) {
        Ok(f) => f,
        Err(objection) => {
            eprint!("{}", objection);
            return ExitCode::FAILURE;
        }
    };
    match vm.run_function(func_ref) {
        Ok(_) => ExitCode::SUCCESS,
        Err(objection) => {
            eprint!("{}", objection);
            ExitCode::FAILURE
        }
    }
}

fn run_repl() -> ExitCode {
    match Repl::new() {
        Ok(mut repl) => match repl.run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} {}", "repl error:".red().bold(), e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("{} failed to start repl: {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn disassemble_file(file: &PathBuf) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut heap = Heap::new();
    let func_ref = match compiler::compile(&source, &mut heap) {
        Ok(f) => f,
        Err(objection) => {
            eprint!("{}", objection);
            return ExitCode::FAILURE;
        }
    };
    print_disassembly_recursive(func_ref, &heap);
    ExitCode::SUCCESS
}

/// Walks a Function's constant pool printing nested Function disassembly
/// too — §4.1 calls the layout table "the source of truth for the
/// disassembler", and a full program's bytecode includes every nested
/// closure body, not just the root `_MAIN` chunk.
fn print_disassembly_recursive(func_ref: ObjRef, heap: &Heap) {
    let func = heap.get(func_ref).as_function().expect("disassemble target is a Function");
    let name = func.name.as_deref().unwrap_or("<anonymous>");
    print!("{}", chunk::disassemble(&func.chunk, name, heap));
    let nested: Vec<ObjRef> = func
        .chunk
        .constants
        .iter()
        .filter_map(|c| match c {
            Value::Object(r) if matches!(heap.get(*r), Obj::Function(_)) => Some(*r),
            _ => None,
        })
        .collect();
    for n in nested {
        println!();
        print_disassembly_recursive(n, heap);
    }
}

fn dump_file(file: &PathBuf, out: &PathBuf) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut heap = Heap::new();
    let func_ref = match compiler::compile(&source, &mut heap) {
        Ok(f) => f,
        Err(objection) => {
            eprint!("{}", objection);
            return ExitCode::FAILURE;
        }
    };
    let bytes = match dump(func_ref, &heap) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    match fs::write(out, bytes) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} could not write {}: {}", "error:".red().bold(), out.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn undump_file(file: &PathBuf) -> ExitCode {
    let bytes = match fs::read(file) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{} could not read {}: {}", "error:".red().bold(), file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let mut vm = Vm::new();
    builtins::install(&mut vm);
    let func_ref = match undump(&bytes, &mut vm.heap) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    match vm.run_function(func_ref) {
        Ok(_) => ExitCode::SUCCESS,
        Err(objection) => {
            eprint!("{}", objection);
            ExitCode::FAILURE
        }
    }
}
