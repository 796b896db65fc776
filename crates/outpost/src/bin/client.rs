//! The `outpost-client` binary: a line-oriented REPL over the Client
//! Session Layer.
//!
//! A graphical interface is explicitly out of scope (specification §1);
//! this is the thin, ambient CLI surface a complete repo still needs to
//! actually drive the client from a terminal. Mirrors the original
//! prototype's `client.py` `__main__` block: connect to the first
//! reachable server in the configured list, then read commands from
//! stdin until EOF.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use outpost::{init_tracing, resolve_addr};
use outpost_client::ClientSession;
use outpost_config::{ClientConfig, ConfigLoader, ServerAddr};
use outpost_types::MessageId;
use outpost_wire::{Codec, Message};

#[derive(Parser)]
#[command(name = "outpost-client")]
#[command(about = "Outpost chat client: a REPL over the client session layer")]
struct Cli {
    /// Path to an `outpost.toml` config file, layered above defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// `host:port` of a server to try, repeatable; failover tries them
    /// in order. Overrides the configured server list entirely.
    #[arg(long = "server")]
    servers: Vec<String>,

    #[arg(long = "custom-mode")]
    custom_mode: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config: ClientConfig = ConfigLoader::new()
        .with_explicit_file(cli.config.clone())
        .load()
        .context("failed to load client configuration")?;

    if !cli.servers.is_empty() {
        config.servers = cli
            .servers
            .iter()
            .map(|s| parse_server_addr(s))
            .collect::<Result<Vec<_>>>()?;
    }
    if cli.custom_mode {
        config.custom_mode = true;
    }

    run(config)
}

fn parse_server_addr(spec: &str) -> Result<ServerAddr> {
    let (host, port) = spec
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got {spec:?}"))?;
    Ok(ServerAddr {
        host: host.to_string(),
        port: port.parse().context("invalid port")?,
    })
}

/// Parses one `delete_msgs` argument: the 32-character hex id printed
/// alongside every `deliver` notification.
fn parse_msg_id(s: &str) -> Result<MessageId, String> {
    u128::from_str_radix(s, 16)
        .map(MessageId::from_u128)
        .map_err(|_| format!("{s:?} is not a valid message id (expected 32 hex characters)"))
}

fn run(config: ClientConfig) -> Result<()> {
    if config.servers.is_empty() {
        anyhow::bail!("no servers configured; pass --server host:port at least once");
    }

    let servers = config
        .servers
        .iter()
        .map(|s| resolve_addr(&s.host, s.port))
        .collect::<Result<Vec<_>>>()?;
    let codec = if config.custom_mode { Codec::Binary } else { Codec::Json };

    let session = ClientSession::new(servers, codec);
    if !session.connect() {
        eprintln!("could not reach any configured server yet; will keep retrying in the background");
    }

    println!("connected to the outpost cluster. commands: create/login/logoff/list/send/deliver/delete_msgs/delete/quit");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut was_connected = session.is_connected();
    // Every request carries its sender as the wire `src` field (the Chat
    // Core uses it to look up the session), so the REPL has to remember
    // who it's logged in as and stamp it onto every outgoing message.
    let mut current_user: Option<String> = None;

    loop {
        // The client layer does not re-login automatically after a
        // failover reconnect (specification §4.5); this REPL is the
        // higher layer that does it, using the credentials the session
        // remembers from the last `login` it sent.
        if session.is_connected() && !was_connected {
            if let Some((username, password)) = session.last_login() {
                println!("reconnected; replaying login for {username}");
                current_user = Some(username.as_str().to_string());
                session.send(Message::new("login").with_src(username.as_str()).with_body(password));
            }
        }
        was_connected = session.is_connected();

        if let Some(reply) = session.receive() {
            print_incoming(&reply);
        }

        print!("> ");
        io::stdout().flush().ok();
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        match build_request(line, current_user.as_deref()) {
            Ok(request) => {
                match request.cmd.as_str() {
                    "create" | "login" => current_user = Some(request.src.clone()),
                    "logoff" | "delete" => current_user = None,
                    _ => {}
                }
                session.send(request);
            }
            Err(message) => eprintln!("{message}"),
        }

        // Give the reply a moment to arrive before the next prompt.
        std::thread::sleep(Duration::from_millis(150));
        if let Some(reply) = session.receive() {
            print_incoming(&reply);
        }
    }

    session.close();
    Ok(())
}

/// Parses one REPL line into a wire [`Message`]. The grammar mirrors the
/// original prototype's space-separated command syntax. `current_user`
/// (if any) is stamped onto every command besides `create`/`login`, which
/// carry their own username argument instead.
fn build_request(line: &str, current_user: Option<&str>) -> Result<Message, String> {
    let mut parts = line.splitn(3, ' ');
    let cmd = parts.next().unwrap_or_default();
    match cmd {
        "create" | "login" => {
            let username = parts.next().ok_or("usage: create|login <username> <password>")?;
            let password = parts.next().ok_or("usage: create|login <username> <password>")?;
            Ok(Message::new(cmd).with_src(username).with_body(password.as_bytes().to_vec()))
        }
        "logoff" | "list" | "send" | "deliver" | "delete_msgs" | "delete" => {
            let src = current_user.ok_or("not logged in: run create or login first")?;
            match cmd {
                "logoff" | "delete" => Ok(Message::new(cmd).with_src(src)),
                "list" => {
                    let pattern = parts.next().unwrap_or("all");
                    Ok(Message::new("list").with_src(src).with_body(pattern.as_bytes().to_vec()))
                }
                "send" => {
                    let to = parts.next().ok_or("usage: send <username> <message>")?;
                    let body = parts.next().ok_or("usage: send <username> <message>")?;
                    Ok(Message::new("send").with_src(src).with_to(to).with_body(body.as_bytes().to_vec()))
                }
                "deliver" => {
                    let limit: u16 =
                        parts.next().unwrap_or("0").parse().map_err(|_| "limit must be a number".to_string())?;
                    Ok(Message::new("deliver").with_src(src).with_limit(limit))
                }
                "delete_msgs" => {
                    let ids_arg = parts.next().ok_or("usage: delete_msgs <id>[,<id>...]")?;
                    let msg_ids = ids_arg
                        .split(',')
                        .map(|s| parse_msg_id(s.trim()))
                        .collect::<Result<Vec<_>, _>>()?;
                    if msg_ids.is_empty() {
                        return Err("usage: delete_msgs <id>[,<id>...]".to_string());
                    }
                    Ok(Message::new("delete_msgs").with_src(src).with_msg_ids(msg_ids))
                }
                _ => unreachable!(),
            }
        }
        other => Err(format!("unknown command {other:?}")),
    }
}

fn print_incoming(message: &Message) {
    if message.error {
        eprintln!("! {} error: {}", message.cmd, message.body_text());
        return;
    }
    match message.cmd.as_str() {
        "deliver" if !message.msg_ids.is_empty() => {
            let ids: Vec<String> = message.msg_ids.iter().map(ToString::to_string).collect();
            println!("[{}] ({}) {}", message.src, ids.join(","), message.body_text());
        }
        _ => println!("{}: {}", message.cmd, message.body_text()),
    }
}
