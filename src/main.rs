//! `hgdb`: the console front end, connecting straight to a running
//! hardware-simulation runtime (spec.md §6 "Console CLI").
//!
//! `hostname` may begin with `:PORT`, expanded to `localhost:PORT`. Exits
//! non-zero if the initial connection fails (spec.md §6, §7 taxonomy #1/#2).

use clap::Parser;
use hgdb_adapter::adapter::Adapter;
use hgdb_adapter::console::{self, ConsoleApp};
use hgdb_adapter::log::LOGGER_SWITCHER;
use log::info;
use std::process::ExitCode;

#[derive(Parser, Debug, Clone)]
#[command(name = "hgdb", author, version, about, long_about = None)]
struct Args {
    /// hgdb runtime host, or `:PORT` to mean `localhost:PORT`.
    hostname: String,

    /// Symbol-table database file.
    db: String,

    /// Skip issuing the `connection` request on launch (debug aid).
    #[clap(long = "no-db-connection")]
    no_db_connection: bool,

    /// Workspace root used to resolve relative filenames for `l` (spec.md
    /// §4.9 "Filename resolution").
    #[clap(long = "dir")]
    dir: Option<String>,

    /// One `REMOTE:LOCAL` source path prefix rewrite.
    #[clap(long = "map")]
    map: Option<String>,
}

fn parse_hostname(raw: &str) -> (String, u16) {
    if let Some(port) = raw.strip_prefix(':') {
        return ("localhost".to_string(), port.parse().unwrap_or(8888));
    }
    match raw.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(8888)),
        None => (raw.to_string(), 8888),
    }
}

fn parse_mapping(raw: &str) -> Option<(String, String)> {
    raw.split_once(':').map(|(src, dst)| (src.to_string(), dst.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    LOGGER_SWITCHER.switch(env_logger::Builder::from_default_env().build(), log::LevelFilter::Info);

    let (host, port) = parse_hostname(&args.hostname);
    let mut adapter = Adapter::new("hgdb-");
    adapter.start(&host, port);

    if let Err(err) = adapter.wait_connected().await {
        eprintln!("Failed to connect to hgdb at {host}:{port}. Reason: {err}");
        return ExitCode::FAILURE;
    }

    if !args.no_db_connection {
        let mapping = args.map.as_deref().and_then(parse_mapping);
        if let Err(err) = adapter.connect(args.db.clone(), mapping).await {
            eprintln!("Failed to connect to hgdb at {host}:{port}. Reason: {err}");
            return ExitCode::FAILURE;
        }
    }
    info!(target: "console", "connected to hgdb at {host}:{port}");

    let workspace = console::default_workspace(args.dir.as_deref());
    let mut app = match ConsoleApp::new(adapter, workspace) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = app.run().await {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
