//!
//! portico admin shell (pash)
//! --------------------------
//! Interactive operator console for a running portico server. Authenticates
//! over HTTP, then drives the session, user and navigation surfaces from a
//! prompt. A single command can also be run via --cmd before the prompt.

use std::env;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use portico::cli::connectivity::{HttpSession, WsSession};
use portico::cli::{print_kv, print_listing};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--connect <url>] [--user <u>] [--password <p>] [--cmd \"<command>\"]\n\nFlags:\n  --connect <url>   portico server base URL (http(s)://host:port)\n  --user <u>        Username (default: current OS user)\n  --password <p>    Password (default: PASH_PASSWORD env)\n  --cmd <command>   Run one interactive command, then enter the prompt\n  -h, --help        Show this help\n\nInteractive commands:\n  connect <url> [user] [password]   authenticate against a server\n  disconnect                        drop the current session locally\n  whoami                            show the server-side view of this session\n  go <path>                         request a portal path through the guard\n  watch <path> [path ...]           probe paths over one WebSocket connection\n  sessions                          list live and dead sessions (admin)\n  users                             list user accounts (admin)\n  useradd <name> <password> <role>  create or replace an account (admin)\n  userdel <name>                    delete an account (admin)\n  revoke <subject>                  revoke all sessions of a subject (admin)\n  logout                            revoke this session server-side\n  status                            show current connection info\n  help                              show this help\n  quit | exit                       exit the shell\n\nExamples:\n  {program} --connect http://127.0.0.1:8080 --user admin --password portico\n  {program} --connect http://127.0.0.1:8080 --user admin --password portico --cmd sessions\n    pash> go /dashboard\n    pash> revoke u-1f3a"
    );
}

/// Entry point for the portico shell. Parses flags, optionally auto-connects
/// and runs a single command, then starts the interactive prompt.
fn main() -> Result<()> {
    println!(r"                      __
    ____  ____ ______/ /_
   / __ \/ __ `/ ___/ __ \
  / /_/ / /_/ (__  ) / / /
 / .___/\__,_/____/_/ /_/
/_/      portico admin shell");
    // Initialize tracing subscriber so connection errors are visible on the command line
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut connect_url: Option<String> = None;
    let mut connect_user: Option<String> = None;
    let mut connect_password: Option<String> = None;
    let mut one_shot: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--connect" => {
                if i + 1 >= args.len() { eprintln!("--connect requires a URL"); print_usage(&program); std::process::exit(2); }
                connect_url = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--user" => {
                if i + 1 >= args.len() { eprintln!("--user requires a value"); print_usage(&program); std::process::exit(2); }
                connect_user = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--password" => {
                if i + 1 >= args.len() { eprintln!("--password requires a value"); print_usage(&program); std::process::exit(2); }
                connect_password = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--cmd" => {
                if i + 1 >= args.len() { eprintln!("--cmd requires a value"); print_usage(&program); std::process::exit(2); }
                one_shot = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            unk => {
                eprintln!("Unrecognized argument: {}", unk);
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    // Tokio runtime; the prompt itself is blocking
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut session: Option<HttpSession> = None;

    if let Some(url) = connect_url {
        let user = connect_user.unwrap_or_else(whoami::username);
        let pass = connect_password
            .or_else(|| env::var("PASH_PASSWORD").ok())
            .unwrap_or_default();
        match rt.block_on(async { HttpSession::connect(&url, &user, &pass).await }) {
            Ok(s) => {
                println!("connected to {} as {}", url, s.username());
                session = Some(s);
            }
            Err(e) => eprintln!("auto-connect failed: {}", e),
        }
    }

    if let Some(cmd) = one_shot {
        match run_command(&rt, &mut session, &cmd) {
            Ok(_) => {}
            Err(e) => eprintln!("error: {}", e),
        }
    }

    println!("pash interpreter. Type 'help' for commands.");
    let mut rl = DefaultEditor::new()?;
    loop {
        let line = match rl.readline("pash> ") {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => { eprintln!("readline error: {}", e); break; }
        };
        let line = line.trim().to_string();
        if line.is_empty() { continue; }
        let _ = rl.add_history_entry(line.as_str());
        match run_command(&rt, &mut session, &line) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}

fn require(session: &Option<HttpSession>) -> Result<&HttpSession> {
    session.as_ref().ok_or_else(|| anyhow::anyhow!("not connected; use: connect <url> [user] [password]"))
}

fn print_result(val: &serde_json::Value, listing_key: Option<&str>) {
    if let Some(key) = listing_key {
        if print_listing(val, key) { return; }
    }
    let pretty = serde_json::to_string_pretty(val).unwrap_or_else(|_| val.to_string());
    println!("{}", pretty);
}

/// Dispatch one shell command. Returns Ok(false) when the shell should exit.
fn run_command(rt: &tokio::runtime::Runtime, session: &mut Option<HttpSession>, line: &str) -> Result<bool> {
    let up = line.to_uppercase();
    if up == "EXIT" || up == "QUIT" { return Ok(false); }
    if up == "HELP" { print_usage("pash"); return Ok(true); }
    if up == "CONNECT" || up.starts_with("CONNECT ") {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 { eprintln!("usage: connect <url> [user] [password]"); return Ok(true); }
        let url = parts[1];
        let user = if parts.len() > 2 { parts[2].to_string() } else { whoami::username() };
        let pass = if parts.len() > 3 {
            parts[3].to_string()
        } else {
            env::var("PASH_PASSWORD").unwrap_or_default()
        };
        match rt.block_on(async { HttpSession::connect(url, &user, &pass).await }) {
            Ok(s) => { println!("connected to {} as {}", url, s.username()); *session = Some(s); }
            Err(e) => eprintln!("connect failed: {}", e),
        }
        return Ok(true);
    }
    if up == "DISCONNECT" {
        if session.is_some() { *session = None; println!("disconnected"); }
        else { println!("not connected"); }
        return Ok(true);
    }
    if up == "STATUS" {
        match session {
            Some(s) => println!("connected: {}", s.ident()),
            None => println!("not connected"),
        }
        return Ok(true);
    }
    if up == "WHOAMI" {
        let s = require(session)?;
        let v = rt.block_on(async { s.whoami().await })?;
        match v.get("session") {
            Some(info) => print_kv(info),
            None => print_result(&v, None),
        }
        return Ok(true);
    }
    if up == "LOGOUT" {
        let s = require(session)?;
        rt.block_on(async { s.logout().await })?;
        *session = None;
        println!("logged out");
        return Ok(true);
    }
    if up.starts_with("GO ") {
        let path = line[3..].trim();
        let s = require(session)?;
        let v = rt.block_on(async { s.get_json(path).await })?;
        print_result(&v, None);
        return Ok(true);
    }
    if up.starts_with("WATCH ") {
        let paths: Vec<String> = line[6..].split_whitespace().map(|s| s.to_string()).collect();
        if paths.is_empty() { eprintln!("usage: watch <path> [path ...]"); return Ok(true); }
        let s = require(session)?;
        let ws = WsSession::from_http_session(s);
        let answers = rt.block_on(async { ws.probe_paths(&paths).await })?;
        for (path, ans) in paths.iter().zip(answers.iter()) {
            println!("{} -> {}", path, ans);
        }
        return Ok(true);
    }
    if up == "SESSIONS" {
        let s = require(session)?;
        let v = rt.block_on(async { s.get_json("/admin/sessions").await })?;
        print_result(&v, Some("sessions"));
        return Ok(true);
    }
    if up == "USERS" {
        let s = require(session)?;
        let v = rt.block_on(async { s.get_json("/admin/users").await })?;
        print_result(&v, Some("users"));
        return Ok(true);
    }
    if up.starts_with("USERADD ") {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 { eprintln!("usage: useradd <name> <password> <role>"); return Ok(true); }
        let s = require(session)?;
        let body = serde_json::json!({
            "username": parts[1],
            "password": parts[2],
            "role": parts[3].to_lowercase(),
        });
        let v = rt.block_on(async { s.post_json("/admin/users", &body).await })?;
        print_result(&v, None);
        return Ok(true);
    }
    if up.starts_with("USERDEL ") {
        let name = line[8..].trim();
        if name.is_empty() { eprintln!("usage: userdel <name>"); return Ok(true); }
        let s = require(session)?;
        let path = format!("/admin/users/{}", urlencoding::encode(name));
        let v = rt.block_on(async { s.delete_json(&path).await })?;
        print_result(&v, None);
        return Ok(true);
    }
    if up.starts_with("REVOKE ") {
        let subject = line[7..].trim();
        if subject.is_empty() { eprintln!("usage: revoke <subject>"); return Ok(true); }
        let s = require(session)?;
        let v = rt.block_on(async { s.post_json("/admin/revoke", &serde_json::json!({"subject": subject})).await })?;
        print_result(&v, None);
        return Ok(true);
    }
    // A bare path is shorthand for `go <path>`
    if line.starts_with('/') {
        let s = require(session)?;
        let v = rt.block_on(async { s.get_json(line).await })?;
        print_result(&v, None);
        return Ok(true);
    }
    eprintln!("unknown command: {} (try 'help')", line);
    Ok(true)
}
