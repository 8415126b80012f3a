//! Atrac CLI - compile Atra sources to WebAssembly from the command
//! line.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Atra compiler
///
/// Compiles Atra sources to WebAssembly 1.0 binaries (with the SIMD128
/// and tail-call extensions).
#[derive(Parser, Debug)]
#[command(name = "atrac")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Atra to WebAssembly compiler", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "ATRAC_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a source file to a .wasm binary
    Build {
        /// Input source file
        input: PathBuf,

        /// Output path (defaults to the input with a .wasm extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile and print the module bytes as hex
    Dump {
        /// Input source file
        input: PathBuf,
    },

    /// Print the token stream
    Tokens {
        /// Input source file
        input: PathBuf,
    },

    /// Print the parsed AST
    Ast {
        /// Input source file
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().without_time().with_target(false))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Build { input, output } => {
            let source = read(&input)?;
            let module = atra_drv::compile(&source)?;
            let output = output.unwrap_or_else(|| input.with_extension("wasm"));
            fs::write(&output, &module.bytes)
                .with_context(|| format!("failed to write {}", output.display()))?;
            tracing::info!(
                bytes = module.bytes.len(),
                out = %output.display(),
                "wrote module"
            );
            Ok(())
        }

        Commands::Dump { input } => {
            let source = read(&input)?;
            println!("{}", atra_drv::dump(&source)?);
            Ok(())
        }

        Commands::Tokens { input } => {
            let source = read(&input)?;
            for token in atra_lex::Lexer::tokenize(&source) {
                println!("{}:{}: {:?}", token.line(), token.column(), token.kind);
            }
            Ok(())
        }

        Commands::Ast { input } => {
            let source = read(&input)?;
            let program = atra_drv::parse(&source)?;
            println!("{program:#?}");
            Ok(())
        }
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
