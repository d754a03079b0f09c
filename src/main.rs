//! Skimmer - bin inspector
//!
//! Reads bins and requests straight out of a Redis-compatible medium using
//! the same key layout and payload format as the storage engine, and can run
//! one trimming sweep on demand.

use anyhow::{bail, Context};
use skimmer::config::{RedisConfig, StorageConfig};
use skimmer::model::Request;
use skimmer::storage::{RedisStorage, Storage, Sweep};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// What to do once connected
#[derive(Debug)]
enum Action {
    Ping,
    Bin(String),
    Bins(Vec<String>),
    Requests { bin: String, from: i64, to: i64 },
    Request { bin: String, id: String },
    Reap,
}

/// Inspector configuration
struct Config {
    redis: RedisConfig,
    storage: StorageConfig,
    action: Action,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut redis = RedisConfig::default();
        let mut storage = StorageConfig::default();
        let mut positional = Vec::new();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--address" | "-a" => {
                    redis.address = value(&args, i)?.to_string();
                    i += 2;
                }
                "--password" => {
                    redis.password = Some(value(&args, i)?.to_string());
                    i += 2;
                }
                "--prefix" => {
                    redis.prefix = value(&args, i)?.to_string();
                    i += 2;
                }
                "--max-requests" | "-m" => {
                    storage.max_requests = value(&args, i)?
                        .parse()
                        .context("invalid --max-requests")?;
                    i += 2;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("skimmer version {}", skimmer::VERSION);
                    std::process::exit(0);
                }
                flag if flag.starts_with("--") => {
                    print_help();
                    bail!("unknown argument: {}", flag);
                }
                _ => {
                    positional.push(args[i].clone());
                    i += 1;
                }
            }
        }

        // Small pool: the inspector runs one operation at a time
        redis.pool_size = 2;
        redis.runtime_threads = 1;

        let action = parse_action(&positional, storage.max_requests)?;
        Ok(Self {
            redis,
            storage,
            action,
        })
    }
}

fn value(args: &[String], i: usize) -> anyhow::Result<&str> {
    match args.get(i + 1) {
        Some(v) => Ok(v),
        None => bail!("{} requires a value", args[i]),
    }
}

fn parse_action(positional: &[String], max_requests: usize) -> anyhow::Result<Action> {
    let (command, rest) = match positional.split_first() {
        Some((command, rest)) => (command.as_str(), rest),
        None => return Ok(Action::Ping),
    };

    let action = match (command, rest) {
        ("ping", []) => Action::Ping,
        ("bin", [name]) => Action::Bin(name.clone()),
        ("bins", names) if !names.is_empty() => Action::Bins(names.to_vec()),
        ("requests", [bin, window @ ..]) if window.len() <= 2 => {
            let from = match window.first() {
                Some(from) => from.parse().context("invalid window start")?,
                None => 0,
            };
            let to = match window.get(1) {
                Some(to) => to.parse().context("invalid window end")?,
                None => max_requests as i64,
            };
            Action::Requests {
                bin: bin.clone(),
                from,
                to,
            }
        }
        ("request", [bin, id]) => Action::Request {
            bin: bin.clone(),
            id: id.clone(),
        },
        ("reap", []) => Action::Reap,
        _ => {
            print_help();
            bail!("invalid command: {}", positional.join(" "));
        }
    };
    Ok(action)
}

fn print_help() {
    println!(
        r#"
Skimmer - request bin inspector

USAGE:
    skimmer [OPTIONS] [COMMAND]

COMMANDS:
    ping                          Check the medium is reachable (default)
    bin <NAME>                    Show one bin
    bins <NAME>...                Show the bins that exist among NAMEs
    requests <NAME> [FROM] [TO]   List a bin's requests, newest first
    request <NAME> <ID>           Show one request in full
    reap                          Trim request lists queued for cleaning

OPTIONS:
    -a, --address <ADDR>         Medium address (default: 127.0.0.1:6379)
        --password <PASSWORD>    Sent with AUTH on connect
        --prefix <PREFIX>        Key prefix (default: skimmer)
    -m, --max-requests <N>       Requests retained per bin (default: 20)
    -v, --version                Print version information
    -h, --help                   Print this help message

Log verbosity follows RUST_LOG (default: info).
"#
    );
}

fn print_request_line(request: &Request) {
    println!(
        "{}  {}  {} {}  {} bytes  from {}",
        request.id,
        request.created,
        request.method,
        request.request_uri,
        request.body.len(),
        request.remote_addr
    );
}

fn print_request(request: &Request) {
    println!("id:           {}", request.id);
    println!("created:      {}", request.created);
    println!("request:      {} {} {}", request.method, request.request_uri, request.proto);
    println!("host:         {}", request.host);
    println!("remote addr:  {}", request.remote_addr);
    println!("length:       {}", request.content_length);
    for (name, values) in &request.headers {
        println!("header:       {}: {}", name, values.join(", "));
    }
    for (name, values) in &request.form_value {
        println!("form:         {}={}", name, values.join(","));
    }
    for name in &request.form_file {
        println!("file field:   {}", name);
    }
    println!();
    println!("{}", String::from_utf8_lossy(&request.body));
}

fn main() -> anyhow::Result<()> {
    let config = Config::from_args()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let storage = RedisStorage::new(config.redis, config.storage)
        .context("failed to set up storage")?;

    match config.action {
        Action::Ping => {
            storage.ping().context("medium unreachable")?;
            println!("PONG");
        }
        Action::Bin(name) => {
            let bin = storage.lookup_bin(&name)?;
            println!("{:#?}", bin);
        }
        Action::Bins(names) => {
            for bin in storage.lookup_bins(&names)? {
                println!(
                    "{}  updated {}  {} requests{}",
                    bin.name,
                    bin.updated,
                    bin.request_count,
                    if bin.private { "  (private)" } else { "" }
                );
            }
        }
        Action::Requests { bin, from, to } => {
            for request in storage.lookup_requests(&bin, from, to)? {
                print_request_line(&request);
            }
        }
        Action::Request { bin, id } => {
            print_request(&storage.lookup_request(&bin, &id)?);
        }
        Action::Reap => {
            let trimmed = storage.sweep()?;
            info!(trimmed, "Sweep complete");
            println!("{} request lists trimmed", trimmed);
        }
    }

    Ok(())
}
