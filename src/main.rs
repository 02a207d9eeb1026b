//! `gics` — command-line front end for the columnar time-series codec.
//!
//! Exit codes follow the crate's error taxonomy
//! ([`gics::GicsError::exit_code`]): 0 success, 1 integrity error, 2 schema
//! violation, 3 i/o error, 64 usage error.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gics::{GicsError, ItemKey, Reader, ReaderOptions, SchemaProfile, Writer, WriterOptions};

const EXIT_USAGE: u8 = 64;

#[derive(Parser)]
#[command(name = "gics", about = "Lossless columnar time-series codec", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reads newline-delimited JSON snapshots from stdin and packs them into a file.
    Pack {
        /// Path to a JSON-encoded SchemaProfile. Omit to use the legacy schema.
        #[arg(long)]
        schema: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value_t = 3)]
        level: i32,
    },
    /// Decodes a file and emits every snapshot as newline-delimited JSON.
    Unpack {
        file: PathBuf,
        #[arg(long)]
        password: Option<String>,
    },
    /// Verifies a file's CRC32s and hash chain end-to-end without printing rows.
    Verify {
        file: PathBuf,
        #[arg(long)]
        password: Option<String>,
    },
    /// Skip-scan query for one item key.
    Query {
        file: PathBuf,
        #[arg(long)]
        key: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Prints the file header, schema, and per-segment summary.
    Info {
        file: PathBuf,
        #[arg(long)]
        password: Option<String>,
    },
    /// Forward-scans the file for recoverable segments, trusting no footer or EOS.
    Scan { file: PathBuf },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(msg)) => {
            eprintln!("usage error: {msg}");
            ExitCode::from(EXIT_USAGE)
        }
        Err(CliError::Gics(e)) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

enum CliError {
    Usage(String),
    Gics(GicsError),
}

impl From<GicsError> for CliError {
    fn from(e: GicsError) -> Self {
        CliError::Gics(e)
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Pack { schema, out, password, level } => cmd_pack(schema, out, password, level),
        Command::Unpack { file, password } => cmd_unpack(file, password),
        Command::Verify { file, password } => cmd_verify(file, password),
        Command::Query { file, key, password } => cmd_query(file, key, password),
        Command::Info { file, password } => cmd_info(file, password),
        Command::Scan { file } => cmd_scan(file),
    }
}

fn cmd_pack(schema_path: Option<PathBuf>, out: PathBuf, password: Option<String>, level: i32) -> Result<(), CliError> {
    let schema = match schema_path {
        Some(path) => {
            let bytes = fs::read(&path).map_err(GicsError::from)?;
            Some(SchemaProfile::from_json_bytes(&bytes)?)
        }
        None => None,
    };

    let options = WriterOptions { schema, level, password, ..WriterOptions::default() };
    let mut writer = Writer::new(Vec::new(), options)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(GicsError::from)?;
        if line.trim().is_empty() {
            continue;
        }
        let snapshot: gics::Snapshot = serde_json::from_str(&line)
            .map_err(|e| CliError::Usage(format!("malformed snapshot JSON: {e}")))?;
        writer.push(snapshot)?;
    }

    let bytes = writer.finish()?;
    fs::write(&out, bytes).map_err(GicsError::from)?;
    Ok(())
}

fn cmd_unpack(file: PathBuf, password: Option<String>) -> Result<(), CliError> {
    let data = fs::read(&file).map_err(GicsError::from)?;
    let reader = Reader::new(&data, ReaderOptions { password, ..ReaderOptions::default() })?;
    let snapshots = reader.get_all_generic_snapshots()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for snapshot in snapshots {
        let line = serde_json::to_string(&snapshot).expect("GenericSnapshot serialization cannot fail");
        writeln!(out, "{line}").map_err(GicsError::from)?;
    }
    Ok(())
}

fn cmd_verify(file: PathBuf, password: Option<String>) -> Result<(), CliError> {
    let data = fs::read(&file).map_err(GicsError::from)?;
    let reader = Reader::new(&data, ReaderOptions { password, ..ReaderOptions::default() })?;
    if reader.verify_integrity_only()? {
        println!("OK");
        Ok(())
    } else {
        Err(GicsError::Integrity("integrity check failed".to_string()).into())
    }
}

fn cmd_query(file: PathBuf, key: String, password: Option<String>) -> Result<(), CliError> {
    let data = fs::read(&file).map_err(GicsError::from)?;
    let reader = Reader::new(&data, ReaderOptions { password, ..ReaderOptions::default() })?;
    let schema = reader.get_schema();
    let item_key = match schema.item_id_type {
        gics::ItemIdType::Number => key
            .parse::<i64>()
            .map(ItemKey::Number)
            .map_err(|_| CliError::Usage(format!("--key {key:?} is not a valid integer for this file's numeric item id type")))?,
        gics::ItemIdType::String => ItemKey::String(key),
    };
    let snapshots = reader.query(&item_key)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for snapshot in snapshots {
        let line = serde_json::to_string(&snapshot).expect("Snapshot serialization cannot fail");
        writeln!(out, "{line}").map_err(GicsError::from)?;
    }
    Ok(())
}

fn cmd_info(file: PathBuf, password: Option<String>) -> Result<(), CliError> {
    let data = fs::read(&file).map_err(GicsError::from)?;
    let header = gics::file::parse_header(&data)?;
    println!("version: {:#04x}", header.version);
    println!("encrypted: {}", header.is_encrypted());
    println!("schema: {}", header.schema.as_ref().map(|s| s.id.as_str()).unwrap_or("legacy"));

    if header.is_encrypted() {
        // Validate the password eagerly so a wrong one is reported here
        // rather than surfacing only once `unpack`/`query` is attempted.
        Reader::new(&data, ReaderOptions { password, ..ReaderOptions::default() })?;
    }

    let report = gics::scan(&data);
    println!("segments: {}", report.total_scanned);
    println!("healthy segments: {}", report.healthy_segments);
    if !header.is_encrypted() {
        println!("snapshots (from scan): {}", report.recovered_snapshots.len());
    }
    Ok(())
}

fn cmd_scan(file: PathBuf) -> Result<(), CliError> {
    let report = gics::scan_file(&file).map_err(GicsError::from)?;
    println!("{}", report.summary());
    for seg in &report.segment_log {
        println!(
            "  segment @ {}: {:?} (declared_len={}, declared_snapshots={:?})",
            seg.file_offset, seg.health, seg.declared_total_length, seg.declared_snapshot_count
        );
    }
    Ok(())
}
