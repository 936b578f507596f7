//! Decode a data file with a layout and print its records.
//!
//! Usage:
//!   decode_records [OPTIONS] LAYOUT DATA
//!
//! Options:
//!   --limit N          Stop after N records
//!   --human, -H        Indented dump per record instead of one line each
//!   --config FILE      Runtime defaults (TOML)
//!   --verbose, -v      Debug logging (otherwise RUST_LOG, default warn)
//!
//! Records that fail to decode are reported on stderr and skipped.

use recfmt::dump::{record_summary_line, record_to_dump};
use recfmt::{open_formatter, FormatError, Linker, RuntimeDefaults, SchemaCache};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    match args.iter().position(|a| names.contains(&a.as_str())) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn take_value(args: &mut Vec<String>, name: &str) -> anyhow::Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name || a.starts_with(&format!("{}=", name))) else {
        return Ok(None);
    };
    let arg = args.remove(pos);
    if let Some(v) = arg.strip_prefix(&format!("{}=", name)) {
        return Ok(Some(v.to_string()));
    }
    if pos >= args.len() {
        anyhow::bail!("{} needs a value", name);
    }
    Ok(Some(args.remove(pos)))
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = take_flag(&mut args, &["--verbose", "-v"]);
    let human = take_flag(&mut args, &["--human", "-H"]);
    let limit: Option<u32> = take_value(&mut args, "--limit")?
        .map(|s| s.parse())
        .transpose()?;
    let defaults = match take_value(&mut args, "--config")? {
        Some(file) => RuntimeDefaults::from_file(&file)?,
        None => RuntimeDefaults::default(),
    };

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut paths = args.into_iter().map(PathBuf::from);
    let (Some(layout_path), Some(data_path)) = (paths.next(), paths.next()) else {
        anyhow::bail!("usage: decode_records [--limit N] [--human] [--config FILE] LAYOUT DATA");
    };

    let linker = Linker::new(defaults.clone());
    let schema = SchemaCache::global().get_or_link(&layout_path, &linker)?;
    info!("layout {} linked: {} record type(s)", layout_path.display(), schema.record_types.len());

    let mut reader = open_formatter(Arc::clone(&schema), &defaults)?;
    reader.set_input_path(&data_path)?;
    reader.initialize()?;

    let mut decoded = 0u32;
    let mut rejected = 0u32;
    loop {
        if limit.map_or(false, |n| decoded >= n) {
            break;
        }
        match reader.read_record() {
            Ok(Some(record)) => {
                decoded += 1;
                if human {
                    let rt = record.record_type().and_then(|name| schema.record_type(name));
                    println!("{}", record_to_dump(&record, rt));
                } else {
                    println!("{}", record_summary_line(&record));
                }
            }
            Ok(None) => break,
            Err(FormatError::InvalidData(e)) => {
                rejected += 1;
                eprintln!("{}", e);
            }
            Err(e) => {
                reader.close();
                return Err(e.into());
            }
        }
    }
    reader.close();

    eprintln!("layout:   {}", layout_path.display());
    eprintln!("data:     {}", data_path.display());
    eprintln!("decoded:  {}", decoded);
    eprintln!("rejected: {}", rejected);
    Ok(())
}
