//!
//! portico server binary
//! ---------------------
//! Command-line entry point for starting the portico HTTP gateway. Supports
//! configuration via CLI flags and environment variables; flags win.

use anyhow::Result;
use std::env;
use std::time::Duration;

use portico::server::ServerConfig;

fn parse_port_env(name: &str) -> Option<u16> {
    match env::var(name) {
        Ok(val) => val.parse::<u16>().ok(),
        Err(_) => None,
    }
}

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return args[i + 1].parse::<u16>().ok();
            }
        i += 1;
    }
    None
}

fn parse_u64_arg(args: &[String], flag: &str) -> Option<u64> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return args[i + 1].parse::<u64>().ok();
            }
        i += 1;
    }
    None
}

fn parse_i64_arg(args: &[String], flag: &str) -> Option<i64> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return args[i + 1].parse::<i64>().ok();
            }
        i += 1;
    }
    None
}

fn parse_string_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            if i + 1 < args.len() { return Some(args[i + 1].clone()); }
            break;
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    println!(r"    ____  ____  ____  ______________________
   / __ \/ __ \/ __ \/_  __/  _/ ____/ __ \
  / /_/ / / / / /_/ / / /  / // /   / / / /
 / ____/ /_/ / _, _/ / / _/ // /___/ /_/ /
/_/    \____/_/ |_| /_/ /___/\____/\____/   ");

    // Initialize tracing subscriber with env filter if provided
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("portico Server\n\nUSAGE:\n  portico_server [--http-port N] [--db-folder PATH] [--ttl-secs N] [--sliding] [--single-session] [--verify-timeout-ms N] [--sweep-secs N]\n\nOPTIONS:\n  --http-port N          HTTP API port (env: PORTICO_HTTP_PORT, default 8080)\n  --db-folder PATH       User table root folder (env: PORTICO_DB_FOLDER, default data)\n  --ttl-secs N           Session lifetime in seconds (env: PORTICO_SESSION_TTL_SECS, default 3600)\n  --sliding              Refresh session expiry on every authorized request (env: PORTICO_SLIDING_SESSIONS)\n  --single-session       A new login revokes the subject's earlier sessions (env: PORTICO_SINGLE_SESSION)\n  --verify-timeout-ms N  Directory verification timeout (env: PORTICO_VERIFY_TIMEOUT_MS, default 3000)\n  --sweep-secs N         Sweeper interval; 0 disables (env: PORTICO_SWEEP_INTERVAL_SECS, default 60)\n");
        return Ok(());
    }

    // Environment first, then CLI flags on top
    let mut cfg = ServerConfig::from_env();

    if let Some(p) = parse_port_arg(&args, "--http-port").or_else(|| parse_port_env("PORTICO_HTTP_PORT")) {
        cfg.http_port = p;
    }
    if let Some(root) = parse_string_arg(&args, "--db-folder") {
        cfg.db_root = root;
    }
    if let Some(secs) = parse_u64_arg(&args, "--ttl-secs") {
        if secs > 0 { cfg.session.ttl = Duration::from_secs(secs); }
    }
    if has_flag(&args, "--sliding") {
        cfg.session.sliding = true;
    }
    if has_flag(&args, "--single-session") {
        cfg.session.single_session_per_subject = true;
    }
    if let Some(ms) = parse_u64_arg(&args, "--verify-timeout-ms") {
        if ms > 0 { cfg.verify_timeout = Duration::from_millis(ms); }
    }
    if let Some(secs) = parse_i64_arg(&args, "--sweep-secs") {
        cfg.sweep_interval_secs = secs;
    }

    println!(
        "portico starting: http={}, db_root={}, ttl_secs={}, sliding={}, single_session={}",
        cfg.http_port, cfg.db_root, cfg.session.ttl.as_secs(), cfg.session.sliding,
        cfg.session.single_session_per_subject
    );
    tracing::info!(
        "Using port: http={}, db_root={}, ttl_secs={}",
        cfg.http_port, cfg.db_root, cfg.session.ttl.as_secs()
    );

    portico::server::run_with_config(cfg).await
}
