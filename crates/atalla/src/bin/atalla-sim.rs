//! Command-line front end for the Atalla simulator
//!
//! Runs single requests, serves a line-per-request loop on stdin, or turns
//! plaintext key fixtures into key blocks under the configured LMK.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use nexum_hsm_atalla::{Response, Simulator, SimulatorConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log everything, down to trace level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run requests given on the command line
    Exec {
        /// Requests such as `<7E#...#>`
        #[arg(required = true)]
        requests: Vec<String>,
    },

    /// Answer one request per line of standard input
    Repl,

    /// Build a key block from a `header,hexkey` plaintext
    Akb {
        /// Plaintext such as `1PUNE000,1111111111111111`
        plaintext: String,
    },
}

/// Run a request, rendering failures as error responses
fn answer(sim: &Simulator, request: &str) -> Response {
    sim.execute(request).unwrap_or_else(|err| {
        tracing::warn!(%err, "request failed");
        Response::error(&err)
    })
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(io::stderr)
        .with_ansi(true)
        .init();

    let config = SimulatorConfig::load(cli.config.as_deref())?;
    let sim = Simulator::from_config(&config).wrap_err("invalid simulator configuration")?;

    let mut stdout = io::stdout().lock();
    match cli.command {
        Commands::Exec { requests } => {
            for request in &requests {
                writeln!(stdout, "{}", answer(&sim, request))?;
            }
        }
        Commands::Repl => {
            for line in io::stdin().lock().lines() {
                let line = line?;
                let request = line.trim();
                if request.is_empty() {
                    continue;
                }
                writeln!(stdout, "{}", answer(&sim, request))?;
                stdout.flush()?;
            }
        }
        Commands::Akb { plaintext } => {
            let block = sim
                .as_akb(&plaintext)
                .wrap_err("cannot build key block")?;
            writeln!(stdout, "{block}")?;
            writeln!(stdout, "check digits: {}", sim.check_digits(&block)?)?;
        }
    }

    Ok(())
}
