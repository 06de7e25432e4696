mod cache;
mod config;
mod event;
mod logging;
mod net;
mod offline;
mod router;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use cache::{CacheStore, SqliteStore};
use config::Config;
use event::{Event, EventHandler};
use net::{Destination, HttpNetwork, Method, Request, RequestMode};
use worker::{ConsoleClients, Notification, Outcome, Worker, BACKGROUND_SYNC_TAG, CONTENT_SYNC_TAG};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline-first caching proxy for the heavy-parts storefront")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the worker: prime the app shell, then activate
  Install,

  /// Route a request through the worker
  Fetch {
    /// Path (or absolute URL) to request
    path: String,

    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,

    #[arg(short, long, value_enum)]
    destination: Option<Destination>,

    /// Use `navigate` for page loads
    #[arg(short, long, value_enum)]
    mode: Option<RequestMode>,

    /// Accept header
    #[arg(short, long)]
    accept: Option<String>,

    /// Request body, sent as JSON
    #[arg(short, long)]
    body: Option<String>,
  },

  /// Fire a one-off background sync
  Sync {
    #[arg(default_value = BACKGROUND_SYNC_TAG)]
    tag: String,
  },

  /// Fire a periodic sync
  PeriodicSync {
    #[arg(default_value = CONTENT_SYNC_TAG)]
    tag: String,
  },

  /// Deliver a push message (JSON payload)
  Push { payload: Option<String> },

  /// Click a notification that points at `url`
  NotificationClick {
    #[arg(short, long, default_value = "/")]
    url: String,
  },

  /// List cache partitions and their entry counts
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log_dir()?, args.verbose)?;

  let store = Arc::new(SqliteStore::open(&config.database_path()?)?);

  if let Command::Caches = args.command {
    return print_caches(store.as_ref());
  }

  let network = Arc::new(HttpNetwork::new(&config)?);
  let worker = Worker::new(&config, store, network, Arc::new(ConsoleClients))?;

  let first = match args.command {
    Command::Install => Event::Install,
    command => {
      if !worker.resume()? {
        info!("worker not installed yet, requests go straight to the network");
      }
      build_event(command, &config)?
    }
  };

  // Drain events one at a time; install may queue its own activation.
  let mut events = EventHandler::new();
  let tx = events.sender();
  tx.send(first).map_err(|e| eyre!("Failed to queue event: {}", e))?;

  while let Some(event) = events.next() {
    let kind = event.kind();
    let outcome = match worker.dispatch(event).await {
      Ok(outcome) => outcome,
      Err(e) => {
        error!(event = %kind, state = %worker.state(), error = %e, "event failed");
        if worker.state().is_terminal() {
          eprintln!("worker is redundant; run `swcache install` again once the origin is reachable");
        }
        return Err(e);
      }
    };

    if let Outcome::Installed { skip_waiting: true } = outcome {
      tx.send(Event::Activate)
        .map_err(|e| eyre!("Failed to queue activation: {}", e))?;
    }
    print_outcome(&outcome);
  }

  Ok(())
}

fn build_event(command: Command, config: &Config) -> Result<Event> {
  let event = match command {
    Command::Fetch {
      path,
      method,
      destination,
      mode,
      accept,
      body,
    } => {
      let url = config.resolve(&path)?;
      let mut request = match mode {
        Some(RequestMode::Navigate) => Request::navigate(url),
        Some(mode) => Request::get(url).with_mode(mode),
        None => Request::get(url),
      }
      .with_method(method);

      if let Some(destination) = destination {
        request = request.with_destination(destination);
      }
      if let Some(accept) = accept {
        request = request.with_header("Accept", &accept);
      }
      if let Some(body) = body {
        request = request
          .with_header("Content-Type", "application/json")
          .with_body(body);
      }
      Event::Fetch(request)
    }
    Command::Sync { tag } => Event::Sync { tag },
    Command::PeriodicSync { tag } => Event::PeriodicSync { tag },
    Command::Push { payload } => Event::Push {
      payload: payload.map(String::into_bytes),
    },
    Command::NotificationClick { url } => Event::NotificationClick {
      notification: Notification::for_url(url, &config.app_name),
    },
    other @ (Command::Install | Command::Caches) => {
      return Err(eyre!("{:?} is not delivered as a worker event", other));
    }
  };
  Ok(event)
}

fn print_outcome(outcome: &Outcome) {
  match outcome {
    Outcome::Installed { .. } => println!("installed"),
    Outcome::Activated { deleted, claimed } => {
      println!("activated (claimed {} clients)", claimed);
      for name in deleted {
        println!("  deleted {}", name);
      }
    }
    Outcome::Response(result) => {
      let response = &result.response;
      println!(
        "{} {} [{}]",
        response.status, response.status_text, result.source
      );
      for (name, value) in &response.headers {
        println!("{}: {}", name, value);
      }
      if let Some(cached_at) = result.cached_at {
        println!("cached-at: {}", cached_at.to_rfc3339());
      }
      println!();
      println!("{}", String::from_utf8_lossy(&response.body));
    }
    Outcome::Synced(report) => println!(
      "replayed {}, dropped {}, {} still queued",
      report.replayed, report.dropped, report.remaining
    ),
    Outcome::Refreshed(report) => {
      for url in &report.refreshed {
        println!("refreshed {}", url);
      }
      for url in &report.failed {
        println!("failed    {}", url);
      }
    }
    Outcome::Notified(_) => {}
    Outcome::PushDropped { reason } => println!("push dropped: {}", reason),
    Outcome::Opened { url } => println!("opened {}", url),
    Outcome::Ignored { tag } => println!("no handler for sync tag {:?}", tag),
  }
}

fn print_caches(store: &impl CacheStore) -> Result<()> {
  println!("cache version {}", cache::CACHE_VERSION);
  let names = store.list_store_names()?;
  if names.is_empty() {
    println!("no caches");
    return Ok(());
  }
  for name in names {
    let keys = store.keys(&name)?;
    println!("{:<12} {:>5} entries", name, keys.len());
  }
  Ok(())
}
