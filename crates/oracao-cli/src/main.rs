//! oracao-sw - command-line host for the oracao offline cache worker.
//!
//! Drives the worker against the live origin: install a cache generation,
//! route requests through it (online or offline), deliver control messages
//! and inspect what is stored.

mod state;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use oracao_core::lifecycle::Registration;
use oracao_core::models::{Request, Response};
use oracao_core::net::HttpNetwork;
use oracao_core::storage::{CacheStorage, DiskStorage};
use oracao_core::{OfflineCacheManager, WorkerConfig, WorkerHost};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use state::RegistrationStore;

// ============================================================================
// Constants
// ============================================================================

/// Subdirectory of the cache directory holding one file per cache bucket
const CACHES_DIR: &str = "caches";

/// How long to wait for background refreshes before exiting
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

const USAGE: &str = "\
Usage: oracao-sw <command> [options]

Commands:
  install [--force]          Precache the app shell and activate this version
  fetch <path> [options]     Route a request through the worker
      --navigate             Treat the request as a page navigation
      --method <METHOD>      HTTP method (default GET)
      --data <BODY>          Request body
      --output <FILE>        Write the body to FILE instead of stdout
  message <TYPE>             Post {\"type\": TYPE} to the worker (SKIP_WAITING, CHECK_VERSION)
  open <path>                Record an open page controlled by the active version
  close <id>                 Close a page; a waiting version activates once none remain
  status                     Show registration and cached entries
  uninstall                  Delete every cache bucket and the registration
  help                       Show this message

Environment:
  ORACAO_BASE_URL            Origin and scope of the app (default http://localhost:8080/)
  ORACAO_CACHE_VERSION       Version of the cache generation
  ORACAO_ROUTING             split | uniform
  RUST_LOG                   Log filter (default warn)
";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Install {
        force: bool,
    },
    Fetch {
        path: String,
        navigate: bool,
        method: String,
        data: Option<String>,
        output: Option<PathBuf>,
    },
    Message {
        kind: String,
    },
    Open {
        path: String,
    },
    Close {
        id: String,
    },
    Status,
    Uninstall,
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            return Ok(Command::Help);
        };
        let rest = &args[1..];

        match name.as_str() {
            "install" => Ok(Command::Install {
                force: rest.iter().any(|a| a == "--force"),
            }),
            "fetch" => Self::parse_fetch(rest),
            "message" => {
                let kind = rest
                    .first()
                    .ok_or_else(|| anyhow::anyhow!("message requires a type, e.g. SKIP_WAITING"))?;
                Ok(Command::Message { kind: kind.clone() })
            }
            "open" => {
                let path = rest
                    .first()
                    .ok_or_else(|| anyhow::anyhow!("open requires a path, e.g. ./"))?;
                Ok(Command::Open { path: path.clone() })
            }
            "close" => {
                let id = rest
                    .first()
                    .ok_or_else(|| anyhow::anyhow!("close requires a client id, see `status`"))?;
                Ok(Command::Close { id: id.clone() })
            }
            "status" => Ok(Command::Status),
            "uninstall" => Ok(Command::Uninstall),
            "help" | "--help" | "-h" => Ok(Command::Help),
            other => Err(anyhow::anyhow!("Unknown command: {}\n\n{}", other, USAGE)),
        }
    }

    fn parse_fetch(args: &[String]) -> Result<Self> {
        let mut path = None;
        let mut navigate = false;
        let mut method = "GET".to_string();
        let mut data = None;
        let mut output = None;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--navigate" => navigate = true,
                "--method" => method = Self::value(&mut iter, arg)?.to_ascii_uppercase(),
                "--data" => data = Some(Self::value(&mut iter, arg)?),
                "--output" => output = Some(PathBuf::from(Self::value(&mut iter, arg)?)),
                flag if flag.starts_with("--") => {
                    return Err(anyhow::anyhow!("Unknown fetch option: {}", flag));
                }
                value if path.is_none() => path = Some(value.to_string()),
                value => return Err(anyhow::anyhow!("Unexpected argument: {}", value)),
            }
        }

        let path = path.ok_or_else(|| anyhow::anyhow!("fetch requires a path, e.g. ./index.html"))?;
        if navigate && method != "GET" {
            return Err(anyhow::anyhow!("--navigate requests are always GET, got {}", method));
        }
        Ok(Command::Fetch {
            path,
            navigate,
            method,
            data,
            output,
        })
    }

    fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String> {
        iter.next()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))
    }
}

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes buffered log lines when dropped.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if command == Command::Help {
        print!("{}", USAGE);
        return Ok(());
    }

    let mut config = match WorkerConfig::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            WorkerConfig::default()
        }
    };
    config.apply_env()?;

    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    let storage = Arc::new(DiskStorage::new(cache_dir.join(CACHES_DIR)));
    let network = Arc::new(HttpNetwork::new(config.request_timeout())?);
    let worker = Arc::new(OfflineCacheManager::new(config, storage, network)?);

    let store = RegistrationStore::new(cache_dir);
    let registration = restore_registration(&store, &worker);
    let mut host = WorkerHost::new(worker, registration);
    info!(version = %host.worker().version(), scope = %host.worker().scope(), "oracao-sw starting");

    let result = run(&mut host, command.clone()).await;

    match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), host.shutdown()).await {
        Ok(()) => {}
        Err(_) => warn!("Background refresh still running at exit"),
    }

    if command == Command::Uninstall {
        store.clear()?;
    } else {
        store.save(host.registration())?;
    }

    result
}

/// Saved registration for this scope, or a fresh one.
fn restore_registration(store: &RegistrationStore, worker: &OfflineCacheManager) -> Registration {
    match store.load() {
        Ok(Some(registration)) if registration.scope == *worker.scope() => registration,
        Ok(Some(registration)) => {
            warn!(old = %registration.scope, new = %worker.scope(), "Scope changed, starting a new registration");
            Registration::new(worker.scope().clone())
        }
        Ok(None) => Registration::new(worker.scope().clone()),
        Err(e) => {
            warn!(error = %e, "Failed to load registration, starting a new one");
            Registration::new(worker.scope().clone())
        }
    }
}

async fn run(host: &mut WorkerHost, command: Command) -> Result<()> {
    match command {
        Command::Install { force } => install(host, force).await,
        Command::Fetch {
            path,
            navigate,
            method,
            data,
            output,
        } => fetch(host, &path, navigate, &method, data, output).await,
        Command::Message { kind } => message(host, &kind).await,
        Command::Open { path } => {
            let url = host.worker().resolve(&path)?;
            println!("{}", host.open_client(url));
            Ok(())
        }
        Command::Close { id } => {
            if host.registration().client(&id).is_none() {
                return Err(anyhow::anyhow!("No open page with id {}", id));
            }
            if let Some(activate) = host.close_client(&id).await? {
                eprintln!("Activated {}", activate.cache_name);
            }
            Ok(())
        }
        Command::Status => status(host).await,
        Command::Uninstall => uninstall(host).await,
        Command::Help => Ok(()),
    }
}

async fn install(host: &mut WorkerHost, force: bool) -> Result<()> {
    if host.is_current() && !force {
        eprintln!(
            "{} is already active (use --force to reinstall)",
            host.worker().cache_name()
        );
        return Ok(());
    }

    let (report, activated) = host.install().await?;
    eprintln!(
        "Installed {}: {} cached, {} failed",
        report.cache_name,
        report.cached.len(),
        report.failed.len()
    );
    for (path, reason) in &report.failed {
        eprintln!("  ! {}: {}", path, reason);
    }

    match activated {
        Some(activate) => {
            eprintln!("Activated {}", activate.cache_name);
            for name in &activate.deleted {
                eprintln!("  - deleted {}", name);
            }
        }
        None => eprintln!("Waiting: send `oracao-sw message SKIP_WAITING` to activate now"),
    }
    Ok(())
}

async fn fetch(
    host: &WorkerHost,
    path: &str,
    navigate: bool,
    method: &str,
    data: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let url = host.worker().resolve(path)?;
    let method = method
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut request = if navigate {
        Request::navigate(url)
    } else {
        Request::new(method, url)
    };
    if let Some(body) = data {
        request = request.with_body(body);
    }

    let response = host.fetch(request).await?;
    eprintln!("{}", status_line(&response));

    match output {
        Some(path) => std::fs::write(&path, &response.body)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => io::stdout().write_all(&response.body)?,
    }
    Ok(())
}

fn status_line(response: &Response) -> String {
    format!(
        "{} {} ({:?}, {} bytes)",
        response.status,
        response.status_text,
        response.source,
        response.body.len()
    )
}

async fn message(host: &mut WorkerHost, kind: &str) -> Result<()> {
    let data = serde_json::json!({ "type": kind });
    match host.message(data).await? {
        Some(reply) => println!("{}", serde_json::to_string(&reply)?),
        None => eprintln!("(no reply)"),
    }
    if let Some(version) = host.registration().active_version() {
        eprintln!("Active version: {}", version);
    }
    Ok(())
}

async fn status(host: &WorkerHost) -> Result<()> {
    let worker = host.worker();
    let registration = host.registration();

    println!("Scope:    {}", registration.scope);
    println!("Worker:   {} ({})", worker.version(), worker.cache_name());
    for (label, generation) in [
        ("Active", &registration.active),
        ("Waiting", &registration.waiting),
    ] {
        if let Some(g) = generation {
            let changed = g.state_changed_at.with_timezone(&chrono::Local);
            println!(
                "{:<9} {} [{}] since {}",
                format!("{}:", label),
                g.version,
                g.state,
                changed.format("%b %d, %Y %H:%M")
            );
        }
    }
    for client in &registration.clients {
        println!(
            "Page:     {} {} ({})",
            client.id,
            client.url,
            client.controller.as_deref().unwrap_or("uncontrolled")
        );
    }
    println!(
        "Preload:  {}",
        if registration.navigation_preload_enabled { "enabled" } else { "disabled" }
    );

    let storage = worker.storage();
    for name in storage.keys().await? {
        let entries = storage.entries(&name).await?;
        println!();
        println!("{} ({} entries)", name, entries.len());
        for (key, cached) in entries {
            println!(
                "  {:>3} {:>8} B  {:<10} {}",
                cached.data.status,
                cached.data.body.len(),
                cached.age_display(),
                key
            );
        }
    }
    Ok(())
}

async fn uninstall(host: &WorkerHost) -> Result<()> {
    let storage = host.worker().storage();
    for name in storage.keys().await? {
        if storage.delete(&name).await? {
            eprintln!("Deleted {}", name);
        }
    }
    Ok(())
}
