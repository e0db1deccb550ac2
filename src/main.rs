use std::fs;
use std::path::{Path, PathBuf};

use axol::backend::vm::{InterpretError, LogLevel, VirtualMachine};
use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

#[derive(Parser)]
#[command(name = "axol")]
#[command(version = "1.0")]
#[command(about = "Axol: a bytecode compiler and stack VM for the Axol scripting language", long_about = None)]
struct Cli {
    /// Script to execute; omit it to get a REPL
    input: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = LogLevel::Release)]
    mode: LogLevel,

    /// Run a full collection at every allocation site (GC debugging)
    #[arg(long)]
    stress_gc: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help/--version 正常退出，其余都按用法错误算
            let is_usage = err.use_stderr();
            let _ = err.print();
            std::process::exit(if is_usage { 64 } else { 0 });
        }
    };

    let mut vm = VirtualMachine::new();
    vm.log_level = cli.mode;
    vm.heap.stress = cli.stress_gc;

    match cli.input {
        Some(path) => run_file(&mut vm, &path),
        None => repl(&mut vm),
    }
}

fn run_file(vm: &mut VirtualMachine, path: &Path) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Unable to open file '{}': {}", path.display(), err);
            std::process::exit(74);
        }
    };

    if vm.log_level != LogLevel::Release {
        println!("[Axol] Running: {}", path.display());
    }

    match vm.interpret(&source) {
        Ok(()) => {}
        Err(InterpretError::CompileError) => std::process::exit(65),
        Err(InterpretError::RuntimeError(_)) => std::process::exit(70),
    }
}

fn repl(vm: &mut VirtualMachine) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Unable to start the line editor: {}", err);
            std::process::exit(74);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                // 出错已经打印过了，REPL 里继续往下走
                let _ = vm.interpret(&line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("REPL read error: {}", err);
                break;
            }
        }
    }
}
