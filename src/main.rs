mod audit;
mod config;
mod db;
mod ipc;
mod ledger;
mod registry;
mod store;

use std::io::{self, BufRead, Write};

use config::{Config, DEFAULT_LOG_FILTER, LOG_ENV};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // stdout carries the IPC protocol.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let config = Config::load();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        busy_timeout: config.busy_timeout,
    };
    if let Some(path) = &config.workspace {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            warn!(workspace = %path.display(), error = %e, "startup workspace not opened");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "academicd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // No id to answer to.
            Err(e) => json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string(), "status": 400 }
            }),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
