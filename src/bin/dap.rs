//! hgdb DAP (Debug Adapter Protocol) binary.
//!
//! Listens on a TCP port (ephemeral when `--listen-port 0`, matching the DAP
//! `launch` attribute `dapPort`, spec.md §6) and speaks Content-Length-framed
//! DAP JSON to whatever IDE dispatcher connects. The actual request/event
//! marshaling lives in `hgdb_adapter::dap`; this binary only owns argument
//! parsing, logging setup, and the accept loop (spec.md §1 Non-goals: "the
//! IDE-side DAP dispatcher wiring ... is out of scope").

use clap::Parser;
use hgdb_adapter::dap::DapServer;
use hgdb_adapter::log::LOGGER_SWITCHER;
use log::{error, info};
use std::path::PathBuf;
use tokio::net::TcpListener;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on. Port 0 binds an ephemeral port, matching DAP
    /// `launch`'s `dapPort: 0` (spec.md §6).
    #[clap(long, default_value = "127.0.0.1:0")]
    listen: String,

    /// Exit after the first DAP session ends (single-client mode).
    #[clap(long)]
    oneshot: bool,

    /// Optional log file for adapter diagnostics. Required before any
    /// logging happens: stdout/stdin are the DAP wire in embedded setups,
    /// so nothing may be written there ahead of the transport.
    #[clap(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    install_logger(&args);

    let listener = TcpListener::bind(&args.listen).await?;
    let local_addr = listener.local_addr()?;
    // The only line this binary ever writes to stdout: the IDE extension
    // reads it back to discover the ephemeral port.
    println!("{}", local_addr.port());
    info!(target: "dap", "listening on {local_addr}");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(target: "dap", "accepted connection from {peer}");
        let (read_half, write_half) = stream.into_split();
        let mut server = DapServer::new(read_half, write_half);
        server.run().await;
        info!(target: "dap", "session with {peer} ended");
        if args.oneshot {
            return Ok(());
        }
    }
}

fn install_logger(args: &Args) {
    match &args.log_file {
        Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let logger = env_logger::Builder::new()
                    .filter_level(log::LevelFilter::Debug)
                    .target(env_logger::Target::Pipe(Box::new(file)))
                    .build();
                LOGGER_SWITCHER.switch(logger, log::LevelFilter::Debug);
            }
            Err(err) => {
                error!("could not open log file {}: {err}", path.display());
            }
        },
        None => {
            // No log file: stay on the no-op logger so nothing touches
            // stdout/stderr, which the DAP wire (in embedded/stdio setups)
            // or the IDE's process output pane may be watching.
        }
    }
}
