//! ChainVault Convert - offline SQL/CSV to JSON converter

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use chainvault_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use chainvault_common::types::SourceFormat;
use chainvault_convert::{convert, parse, CoercionRules, ParseOptions, RowCounter};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "chainvault-convert")]
#[command(author, version, about = "Convert SQL dumps and CSV files to JSON")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a file to JSON
    Convert {
        /// Input file (.sql, .csv, optionally .gz)
        input: PathBuf,

        /// Source format; detected from the file name when omitted
        #[arg(short, long)]
        format: Option<SourceFormat>,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit canonical numbers and true/false in CSV as JSON numbers and booleans
        #[arg(long)]
        infer_types: bool,

        /// CSV field delimiter
        #[arg(short, long, default_value_t = ',')]
        delimiter: char,
    },

    /// Validate a file and report table and row counts without writing JSON
    Inspect {
        input: PathBuf,

        #[arg(short, long)]
        format: Option<SourceFormat>,

        #[arg(short, long, default_value_t = ',')]
        delimiter: char,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .output(LogOutput::Console)
        .log_file_prefix("chainvault-convert")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = run(cli.command) {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Convert {
            input,
            format,
            output,
            infer_types,
            delimiter,
        } => {
            let format = resolve_format(&input, format)?;
            let options = parse_options(delimiter, infer_types)?;
            let reader = open(&input)?;

            let summary = match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let (summary, mut out) = convert(reader, format, &options, BufWriter::new(file))?;
                    out.flush()?;
                    summary
                },
                None => {
                    let stdout = io::stdout().lock();
                    let (summary, mut out) = convert(reader, format, &options, BufWriter::new(stdout))?;
                    out.write_all(b"\n")?;
                    out.flush()?;
                    summary
                },
            };

            info!(
                tables = summary.tables,
                rows = summary.rows,
                bytes = summary.bytes,
                sha256 = %summary.sha256,
                "Converted {}",
                input.display()
            );
            Ok(())
        },
        Command::Inspect {
            input,
            format,
            delimiter,
        } => {
            let format = resolve_format(&input, format)?;
            let options = parse_options(delimiter, false)?;
            let mut counter = RowCounter::default();
            parse(open(&input)?, format, &options, &mut counter)?;

            println!("format:  {}", format);
            println!("tables:  {}", counter.tables);
            println!("rows:    {}", counter.rows);
            Ok(())
        },
    }
}

fn resolve_format(input: &Path, explicit: Option<SourceFormat>) -> Result<SourceFormat> {
    if let Some(format) = explicit {
        return Ok(format);
    }
    let name = input.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    SourceFormat::from_file_name(name)
        .with_context(|| format!("Cannot detect format of {}; pass --format", input.display()))
}

fn parse_options(delimiter: char, infer_types: bool) -> Result<ParseOptions> {
    if !delimiter.is_ascii() {
        bail!("Delimiter must be a single ASCII character");
    }
    Ok(ParseOptions {
        delimiter: delimiter as u8,
        coercion: CoercionRules { infer_types },
        ..ParseOptions::default()
    })
}

fn open(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::new(file))
}
