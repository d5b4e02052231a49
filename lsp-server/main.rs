mod capabilities;
mod config;
mod handler;
mod json_rpc;
mod model;
mod session;
mod transport;
mod watcher;

use std::ffi::OsString;
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use clap::Parser;
use tokio::io;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Language server for Go text/template files
#[derive(Debug, Parser)]
#[command(name = "go-template-lsp", version)]
struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

/// Accepts the single-dash `-version` flag used by Go tooling
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            if arg == "-version" {
                OsString::from("--version")
            } else {
                arg
            }
        })
        .collect()
}

fn init_logging(log_file: Option<&PathBuf>) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("go_template_lsp=info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    if let Err(err) = init_logging(cli.log_file.as_ref()) {
        eprintln!("Could not open log file: {}", err);
        process::exit(1);
    }

    info!("Starting go-template-lsp {}", env!("CARGO_PKG_VERSION"));

    let reader = io::BufReader::new(io::stdin());
    let writer = io::stdout();

    let connection = transport::bytestream::create_connection(reader, writer);
    if let Err(err) = session::run(connection).await {
        error!("Session ended: {}", err);
        process::exit(1);
    }
}
