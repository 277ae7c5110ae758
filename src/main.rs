use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use outpost::autosave::{age_minutes, AutosaveSlot};
use outpost::cache::{NoopStorage, PartitionStore, SqliteStorage};
use outpost::config::Config;
use outpost::connectivity::{ConnectivityEvent, ConnectivityMonitor, ReachabilityProbe};
use outpost::net::{HttpTransport, Method, Request, RequestLifecycle, Transport};
use outpost::retry::RetryCoordinator;
use outpost::worker::{Registration, SyncHandler, SyncReport, SYNC_GAME_SAVES};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Offline-first request layer: versioned caching, retry gating, autosave")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/outpost/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin (overrides the config file)
  #[arg(short, long)]
  origin: Option<Url>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Issue a request through the interception engine
  Fetch {
    /// Path relative to the origin, or an absolute URL
    path: String,
    #[arg(short, long, default_value = "GET")]
    method: Method,
    /// Treat the request as a document navigation
    #[arg(long)]
    navigate: bool,
    /// On 429, wait out the countdown and retry once
    #[arg(long)]
    wait: bool,
  },
  /// List cache partitions
  Partitions,
  /// Inspect or change the autosave slot
  Autosave {
    #[command(subcommand)]
    action: AutosaveAction,
  },
  /// Watch connectivity and run deferred syncs on reconnect
  Watch,
}

#[derive(Subcommand, Debug)]
enum AutosaveAction {
  /// Show whether the autosave can be resumed
  Status,
  /// Replace the autosave with the JSON in FILE
  Save { file: PathBuf },
  /// Discard the autosave
  Clear,
}

fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = SqliteStorage::default_path()?
    .parent()
    .map(|p| p.join("logs"))
    .ok_or_else(|| eyre!("Could not determine log directory"))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "outpost.log"));
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("outpost=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .with(verbose.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
    .init();

  Ok(guard)
}

/// Shared pieces every command needs
struct Runtime {
  config: Config,
  storage: Arc<SqliteStorage>,
  network: Arc<dyn Transport>,
  registration: Arc<Registration>,
}

impl Runtime {
  async fn boot(config: Config) -> Result<Self> {
    let storage = Arc::new(SqliteStorage::open()?);
    let partitions: Arc<dyn PartitionStore> = if config.cache.enabled {
      storage.clone()
    } else {
      Arc::new(NoopStorage)
    };
    let network: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);

    let registration = Arc::new(Registration::new(
      partitions,
      storage.clone(),
      Arc::clone(&network),
    ));
    let state = registration.register(config.engine_config()).await?;
    info!(generation = %config.cache.generation, %state, "engine registered");

    Ok(Self {
      config,
      storage,
      network,
      registration,
    })
  }
}

async fn fetch(rt: &Runtime, path: &str, method: Method, navigate: bool, wait: bool) -> Result<()> {
  let url = rt
    .config
    .origin
    .join(path)
    .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
  let request = if navigate {
    Request::navigate(url)
  } else {
    Request::new(method, url)
  };

  let lifecycle =
    RequestLifecycle::new(Arc::clone(&rt.registration)).with_timeout(rt.config.request_timeout());
  let retry = RetryCoordinator::new();
  let mut waited = false;

  let response = loop {
    match lifecycle.issue(request.clone()).await {
      Ok(response) => break response,
      Err(e) if e.is_rate_limited() && wait && !waited => {
        retry.set_retry_after(e.retry_after().unwrap_or(1));
        let mut countdown = retry.subscribe();
        while !countdown.borrow_and_update().can_retry() {
          eprintln!("{}", retry.message());
          if countdown.changed().await.is_err() {
            break;
          }
        }
        waited = true;
      }
      Err(e) => return Err(eyre!("{}", e)),
    }
  };

  eprintln!("{} ({} bytes)", response.status, response.body.len());
  println!("{}", String::from_utf8_lossy(&response.body));
  Ok(())
}

fn partitions(rt: &Runtime) -> Result<()> {
  let namespace = rt.config.engine_config().namespace;
  for name in rt.storage.partitions()? {
    let marker = if namespace.is_current(&name) { "*" } else { " " };
    println!("{} {} ({} entries)", marker, name, rt.storage.entry_count(&name)?);
  }
  Ok(())
}

fn autosave(rt: &Runtime, action: AutosaveAction) -> Result<()> {
  let slot = AutosaveSlot::new(rt.storage.clone()).with_expiration(rt.config.autosave_window());
  let now = Utc::now();

  match action {
    AutosaveAction::Status => match slot.load()? {
      None => println!("No autosave."),
      Some(record) => {
        let minutes = age_minutes(&record, now);
        if slot.load_resumable(now)?.is_some() {
          println!("Autosave from {} minute(s) ago can be resumed.", minutes);
        } else {
          println!("Autosave from {} minute(s) ago has expired.", minutes);
        }
      }
    },
    AutosaveAction::Save { file } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let state: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse {}: {}", file.display(), e))?;
      slot.save(state, now)?;
      println!("Autosave written.");
    }
    AutosaveAction::Clear => {
      slot.clear()?;
      println!("Autosave cleared.");
    }
  }
  Ok(())
}

/// Save sync for the CLI host: there is no local save queue to push, so a
/// fired tag is only recorded.
struct LoggingSync;

#[async_trait]
impl SyncHandler for LoggingSync {
  async fn sync(&self, tag: &str) -> Result<()> {
    info!(tag, "deferred sync fired");
    Ok(())
  }
}

/// Feed one probe result through the monitor. Saves made while offline are
/// queued under the sync tag and pushed once the connection is back.
async fn apply_event(
  registration: &Registration,
  monitor: &ConnectivityMonitor,
  event: ConnectivityEvent,
) -> Option<SyncReport> {
  let reconnected = monitor.handle(event);
  if !monitor.state().online {
    registration.register_sync(SYNC_GAME_SAVES);
  }
  if reconnected {
    Some(registration.on_reconnect().await)
  } else {
    None
  }
}

async fn watch(rt: &Runtime) -> Result<()> {
  let probe = ReachabilityProbe::new(
    Arc::clone(&rt.network),
    rt.config.origin.clone(),
    rt.config.probe_interval(),
  );
  let monitor = ConnectivityMonitor::new(probe.check().await)
    .with_reconnect_window(rt.config.reconnect_window());
  println!("online: {}", monitor.state().online);

  rt.registration
    .set_sync_handler(SYNC_GAME_SAVES, Arc::new(LoggingSync));
  if !monitor.state().online {
    rt.registration.register_sync(SYNC_GAME_SAVES);
  }

  let (tx, mut events) = mpsc::channel(8);
  let probe = probe.spawn(tx);
  let mut state = monitor.subscribe();
  let shutdown = tokio::signal::ctrl_c();
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      Some(event) = events.recv() => {
        if let Some(report) = apply_event(&rt.registration, &monitor, event).await {
          info!(?report, "deferred syncs ran");
        }
      }
      Ok(()) = state.changed() => {
        let current = *state.borrow_and_update();
        match (current.online, current.just_reconnected) {
          (false, _) => println!("offline"),
          (true, true) => println!("back online"),
          (true, false) => println!("online"),
        }
      }
      _ = &mut shutdown => break,
    }
  }

  probe.abort();
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref(), args.origin)?;
  let rt = Runtime::boot(config).await?;

  match args.command {
    Command::Fetch {
      path,
      method,
      navigate,
      wait,
    } => fetch(&rt, &path, method, navigate, wait).await,
    Command::Partitions => partitions(&rt),
    Command::Autosave { action } => autosave(&rt, action),
    Command::Watch => watch(&rt).await,
  }
}
