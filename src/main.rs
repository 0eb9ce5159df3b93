use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use safari_sync::app::App;
use safari_sync::config::Config;
use safari_sync::intercept::{Destination, Request, WorkerMessage, WorkerReply};
use safari_sync::logging;
use safari_sync::types::CachedLessonItem;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "safari-sync")]
#[command(about = "Offline-first lesson cache and progress sync for STEM Safari")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/safari-sync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, pending sync and storage state
  Status,
  /// Record progress for a lesson or quest
  Save {
    item_id: String,
    /// Completion percentage, 0 to 100
    progress: f64,
    #[arg(default_value_t = 0)]
    xp: u64,
  },
  /// Show stored progress for a lesson or quest
  Progress { item_id: String },
  /// Cache catalog items from a JSON file for offline use
  Cache { file: PathBuf },
  /// List cached catalog items
  Catalog {
    #[arg(short, long)]
    subject: Option<String>,
  },
  /// Replay queued writes now
  Sync,
  /// Fetch a path through the interception layer
  Fetch {
    path: String,
    /// Fetch as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Fetch as a static asset of this kind
    #[arg(long, value_enum)]
    dest: Option<AssetKind>,
  },
  /// Install and activate the background worker, then list cache partitions
  Install,
  /// Keep running, following connectivity until interrupted
  Watch,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AssetKind {
  Document,
  Script,
  Style,
  Image,
  Font,
}

impl From<AssetKind> for Destination {
  fn from(kind: AssetKind) -> Self {
    match kind {
      AssetKind::Document => Destination::Document,
      AssetKind::Script => Destination::Script,
      AssetKind::Style => Destination::Style,
      AssetKind::Image => Destination::Image,
      AssetKind::Font => Destination::Font,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let mut app = App::start(config, args.offline).await?;
  let result = run(&mut app, args.command, args.offline).await;
  app.shutdown().await;
  result
}

async fn run(app: &mut App, command: Command, offline: bool) -> Result<()> {
  match command {
    Command::Status => {
      let coordinator = app.coordinator();
      let queued = app.store().list_outbox_entries().await?.len();
      let catalog = app.store().get_all_catalog_items().await?.len();
      let worker_offline = match app.worker().request(WorkerMessage::GetOfflineStatus).await {
        Some(WorkerReply::OfflineStatus { offline }) => offline,
        _ => !coordinator.is_online(),
      };
      println!("online:        {}", coordinator.is_online());
      println!("worker online: {}", !worker_offline);
      println!("pending sync:  {}", coordinator.has_pending_sync());
      println!("queued writes: {}", queued);
      println!("catalog items: {}", catalog);
      println!(
        "storage:       {}",
        if app.store().is_durable() {
          "durable"
        } else {
          "memory only"
        }
      );
    }
    Command::Save {
      item_id,
      progress,
      xp,
    } => {
      let record = app.coordinator().save_progress(&item_id, progress, xp).await?;
      let queued = if app.coordinator().has_pending_sync() {
        " (queued for sync)"
      } else {
        ""
      };
      println!(
        "{}: {}% {} xp{}",
        record.item_id, record.progress, record.xp_earned, queued
      );
    }
    Command::Progress { item_id } => match app.coordinator().get_progress(&item_id).await? {
      Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
      None => println!("no progress recorded for {}", item_id),
    },
    Command::Cache { file } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let items: Vec<CachedLessonItem> = serde_json::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse catalog items in {}: {}", file.display(), e))?;

      match app
        .worker()
        .request(WorkerMessage::CacheCatalogItems(items))
        .await
      {
        Some(WorkerReply::CatalogCached { stored, failed }) => {
          println!("cached {} items", stored);
          for id in failed {
            println!("failed: {:?}", id);
          }
        }
        _ => return Err(eyre!("Background worker did not answer")),
      }
    }
    Command::Catalog { subject } => {
      let items = match subject {
        Some(subject) => app.coordinator().cached_catalog_for(&subject).await?,
        None => app.coordinator().cached_catalog().await?,
      };
      for item in items {
        println!("{}\t{}", item.id, item.subject);
      }
    }
    Command::Sync => {
      let report = app.coordinator().force_sync().await?;
      println!(
        "replayed {}, dropped {}, still queued {}",
        report.replayed, report.dropped, report.deferred
      );
    }
    Command::Fetch {
      path,
      navigate,
      dest,
    } => {
      let url = app.config().resolve(&path)?;
      let request = match (navigate, dest) {
        (true, _) => Request::navigate(url),
        (false, Some(kind)) => Request::asset(url, kind.into()),
        (false, None) => Request::get(url),
      };
      let response = app.worker().fetch(request).await;
      println!("{}", response.status);
      for (name, value) in &response.headers {
        println!("{}: {}", name, value);
      }
      println!();
      println!("{}", response.text());
    }
    Command::Install => {
      // Messages are served only once install and activation are done
      app.worker().request(WorkerMessage::GetOfflineStatus).await;
      println!("worker {} active", app.config().cache.version);
      for partition in app.response_cache().partitions().await? {
        println!("{}", partition);
      }
    }
    Command::Watch => {
      if !offline {
        app.monitor_connectivity(Client::new())?;
      }
      let mut events = app.coordinator().subscribe();
      info!("watching connectivity, press Ctrl-C to stop");
      loop {
        tokio::select! {
          event = events.recv() => match event {
            Ok(event) => println!("{} {}", event.at.to_rfc3339(), if event.online { "online" } else { "offline" }),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(_) => break,
          },
          _ = tokio::signal::ctrl_c() => break,
        }
      }
    }
  }
  Ok(())
}
