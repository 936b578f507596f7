//! Compile layout files and report syntax and link errors.
//!
//! Usage:
//!   check_layout [OPTIONS] [FILE.fmt ...]
//!   check_layout < file.fmt
//!
//! Options:
//!   --human, -H        Human-readable output, including a summary of each record type
//!   --config FILE      Runtime defaults (TOML) used for linking
//!
//! Errors are printed as `path:line:column: error: message`. The exit status is 1 when
//! any layout fails to compile.

use recfmt::{compile_with, FormatError, LinkedSchema, Linker, RuntimeDefaults, SyntaxError};
use std::io::{self, Read};
use std::path::Path;

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn print_error(path: &str, e: &SyntaxError, style: OutputStyle) {
    match style {
        OutputStyle::Compact => println!(
            "{}:{}:{}: error: {}",
            path,
            e.line.unwrap_or(0),
            e.column.unwrap_or(0),
            e.message
        ),
        OutputStyle::Human => {
            println!("  {} {}:{}: {}", path, e.line.unwrap_or(0), e.column.unwrap_or(0), e.message);
            if let Some(ref tok) = e.token {
                println!("    near: '{}'", tok.escape_debug());
            }
        }
    }
}

/// Layout smells that still link: a condition-less record type hides the ones after it.
fn warnings(schema: &LinkedSchema) -> Vec<String> {
    if schema.classifier.is_some() || schema.record_types.len() < 2 {
        return Vec::new();
    }
    let last = schema.record_types.len() - 1;
    schema
        .record_types
        .iter()
        .enumerate()
        .filter(|(i, rt)| *i < last && rt.predicates.is_empty())
        .map(|(_, rt)| {
            format!(
                "record type '{}' has no conditions; record types after it are never selected",
                rt.name
            )
        })
        .collect()
}

fn print_summary(path: &str, schema: &LinkedSchema) {
    println!("{}: {} layout, {} record type(s)", path, schema.file_type, schema.record_types.len());
    for rt in schema.classifier.iter().chain(schema.record_types.iter()) {
        println!("  {} ({} field(s), length {})", rt.describe_conditions(), rt.fields.len(), rt.length);
    }
}

fn check(path: &str, src: &str, linker: &Linker, style: OutputStyle) -> Result<usize, ()> {
    match compile_with(src, Some(path), linker) {
        Ok(schema) => {
            let warns = warnings(&schema);
            for w in &warns {
                println!("{}: warning: {}", path, w);
            }
            if let OutputStyle::Human = style {
                print_summary(path, &schema);
            }
            Ok(warns.len())
        }
        Err(FormatError::Syntax(e)) => {
            print_error(path, &e, style);
            Err(())
        }
        Err(e) => {
            eprintln!("{}: {}", path, e);
            Err(())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let style = if let Some(pos) = args.iter().position(|a| a == "--human" || a == "-H") {
        args.remove(pos);
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };
    let defaults = match args.iter().position(|a| a == "--config") {
        Some(pos) => {
            args.remove(pos);
            if pos >= args.len() {
                anyhow::bail!("--config needs a file argument");
            }
            let file = args.remove(pos);
            RuntimeDefaults::from_file(&file)?
        }
        None => RuntimeDefaults::default(),
    };
    let linker = Linker::new(defaults);

    let mut failed = 0usize;
    let mut total_warnings = 0usize;
    if args.is_empty() {
        let mut src = String::new();
        io::stdin().read_to_string(&mut src)?;
        match check("<stdin>", &src, &linker, style) {
            Ok(w) => total_warnings += w,
            Err(()) => failed += 1,
        }
    } else {
        for path in &args {
            let display = Path::new(path).display().to_string();
            let src = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{}: {}", display, e);
                    failed += 1;
                    continue;
                }
            };
            match check(&display, &src, &linker, style) {
                Ok(w) => total_warnings += w,
                Err(()) => failed += 1,
            }
        }
    }

    if failed > 0 || total_warnings > 0 {
        eprintln!("check: {} failed layout(s), {} warning(s)", failed, total_warnings);
    }
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
