//! Micron compiler CLI.
//!
//! `micc [-I <path>]... <mainModule>` — compiles the main module and
//! everything it imports, writes the textual IR of all compiled modules
//! to stdout and diagnostics to stderr. Exits non-zero if any module
//! failed.

use micc::{tracing_setup, Compiler};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_setup::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut includes: Vec<PathBuf> = Vec::new();
    let mut main_module: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "-I" => {
                i += 1;
                match args.get(i) {
                    Some(path) => includes.push(PathBuf::from(path)),
                    None => {
                        eprintln!("micc: -I expects a path");
                        return ExitCode::from(2);
                    }
                }
            }
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "-V" | "--version" => {
                println!("micc {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            _ if arg.starts_with("-I") => {
                includes.push(PathBuf::from(&arg[2..]));
            }
            _ if arg.starts_with('-') => {
                eprintln!("micc: unknown option '{arg}'");
                print_usage();
                return ExitCode::from(2);
            }
            _ => {
                if main_module.is_some() {
                    eprintln!("micc: exactly one main module expected");
                    return ExitCode::from(2);
                }
                main_module = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let Some(main_module) = main_module else {
        print_usage();
        return ExitCode::from(2);
    };

    let mut compiler = Compiler::new(includes);
    compiler.compile_main(&main_module);

    let stdout = std::io::stdout().lock();
    compiler.manager.render_text(stdout);

    let mut emitter = mic_diagnostic::TerminalEmitter::stderr();
    let diagnostics = compiler.take_diagnostics();
    emitter.emit_all(diagnostics.iter());

    let failed = compiler.manager.failed();
    let total = compiler.manager.slots.len();
    tracing::info!(ok = total - failed, total, "finished");
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_usage() {
    println!("Micron compiler");
    println!();
    println!("Usage: micc [-I <path>]... <mainModule>");
    println!();
    println!("Options:");
    println!("  -I <path>   add a directory to the module search path (repeatable)");
    println!("  -h, --help  show this help message");
    println!("  -V          show version information");
    println!();
    println!("The main module and its imports are compiled; the textual IR of");
    println!("all compiled modules is written to stdout.");
}
