//! Thin CLI front end: compile and run a Tacitus source file (or an inline
//! `-e` string), print the final data stack, exit non-zero on failure.

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use tacitus_vm::{run_source, VmConfig};
use tracing_subscriber::EnvFilter;

/// Run Tacitus source and print the resulting data stack.
#[derive(Parser, Debug)]
#[command(name = "tacitus", version, about)]
struct Args {
    /// Source file to run. Omit when using --eval.
    file: Option<String>,

    /// Evaluate an inline source string instead of reading a file.
    #[arg(short, long)]
    eval: Option<String>,

    /// Global region capacity, in cells.
    #[arg(long, default_value_t = 4096)]
    global_capacity: u32,

    /// Data stack capacity, in cells.
    #[arg(long, default_value_t = 1024)]
    stack_capacity: u32,

    /// Return stack capacity, in cells.
    #[arg(long, default_value_t = 1024)]
    rstack_capacity: u32,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();

    let source = match (&args.file, &args.eval) {
        (Some(_), Some(_)) => {
            eprintln!("error: pass either a file or --eval, not both");
            return ExitCode::FAILURE;
        }
        (None, None) => {
            eprintln!("error: no source given; pass a file or --eval");
            return ExitCode::FAILURE;
        }
        (Some(path), None) => match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: couldn't read {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        (None, Some(s)) => s.clone(),
    };

    let config = VmConfig::default()
        .with_global_capacity(args.global_capacity)
        .with_stack_capacity(args.stack_capacity)
        .with_rstack_capacity(args.rstack_capacity);

    match run_source(config, &source) {
        Ok(outcome) => match outcome.render() {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("error: {} (ip={})", e.kind, e.ip);
            ExitCode::FAILURE
        }
    }
}
