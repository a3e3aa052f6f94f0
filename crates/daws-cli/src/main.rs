// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use daws_cli::commands::{self, SchemaKind};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "daws", version, about = "DawsOS pattern validation tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a directory of pattern files (integrity checks).
    Validate {
        /// Directory containing one JSON file per pattern.
        dir: PathBuf,
    },

    /// Run the compliance scan over a directory of pattern files.
    Compliance {
        /// Directory containing one JSON file per pattern.
        dir: PathBuf,

        /// Promote warnings to errors (also via STRICT_MODE=true).
        #[arg(long)]
        strict: bool,

        /// Write the full compliance report as JSON.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Print a JSON schema to stdout.
    Schema {
        /// Which schema to print.
        #[arg(value_enum)]
        kind: SchemaArg,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum SchemaArg {
    /// The pattern definition file format.
    Pattern,
    /// The provenance envelope.
    Envelope,
    /// The capability contract declaration.
    Contract,
}

impl From<SchemaArg> for SchemaKind {
    fn from(value: SchemaArg) -> Self {
        match value {
            SchemaArg::Pattern => SchemaKind::Pattern,
            SchemaArg::Envelope => SchemaKind::Envelope,
            SchemaArg::Contract => SchemaKind::Contract,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Validate { dir } => commands::validate(&dir)?,
        Commands::Compliance {
            dir,
            strict,
            export,
        } => {
            let strict = strict || daws_compliance::strict_mode_from_env();
            commands::compliance(&dir, strict, export.as_deref())?
        }
        Commands::Schema { kind } => {
            commands::schema(kind.into())?;
            0
        }
    };

    Ok(ExitCode::from(code))
}
