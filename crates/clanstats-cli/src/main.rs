//! clanstats command-line driver.
//!
//! Reads `clanstats.toml` (or the path given with `--config`), opens the
//! SQLite snapshot store and runs one maintenance or query command against
//! it. Output is pretty-printed JSON on stdout; logs go to stderr.

mod client;
mod settings;

use std::{collections::BTreeSet, sync::Arc};

use anyhow::{Context as _, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use clanstats_core::{
  accessor::SnapshotAccessor, entity::PlayerRecord, record::normalize_tag, refresh::Refresher,
  store::SnapshotStore,
};
use clanstats_store_sqlite::SqliteStore;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{client::ApiClient, settings::Settings};

type Pipeline = Refresher<SqliteStore, ApiClient>;

#[derive(Parser)]
#[command(author, version, about = "Clan statistics snapshot engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "clanstats.toml")]
  config: std::path::PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Fetch fresh snapshots and recompute the cached entity rows.
  Refresh {
    #[arg(required = true)]
    tags: Vec<String>,
  },
  /// Recompute an entity row from stored snapshots without fetching.
  Recompute { tag: String },
  /// Run the status rollup and print the result.
  Status,
  /// Print an entity row, or the snapshot nearest to N days ago.
  Show {
    /// Clan tag or slug.
    key:      String,
    #[arg(long, value_name = "N")]
    days_ago: Option<i64>,
  },
  /// Print the hydrated record of a stored player.
  Player {
    /// Player tag or slug.
    key: String,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  let store_path = settings.store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let upstream = ApiClient::new(settings.api())?;
  let pipeline = Refresher::new(SnapshotAccessor::new(Arc::new(store), Arc::new(upstream)));

  match cli.command {
    Command::Refresh { tags } => refresh_all(&pipeline, tags, settings.concurrency).await,
    Command::Recompute { tag } => {
      let entity = pipeline.update_calculations(&tag).await?;
      print_json(&entity)
    }
    Command::Status => {
      let status = pipeline.update_status(&settings.status()?, Utc::now()).await?;
      print_json(&status)
    }
    Command::Show { key, days_ago } => show(&pipeline, &key, days_ago).await,
    Command::Player { key } => {
      let player = find_player(pipeline.accessor().store(), &key).await?;
      print_json(&player.hydrated()?)
    }
  }
}

/// Refresh every distinct tag with at most `concurrency` in flight.
///
/// Tags are normalised and deduplicated first, so two refreshes of the same
/// entity never overlap. A failed tag is reported and the rest carry on.
async fn refresh_all(pipeline: &Pipeline, tags: Vec<String>, concurrency: usize) -> anyhow::Result<()> {
  let tags: BTreeSet<String> = tags.iter().map(|t| normalize_tag(t)).collect();
  let permits = Arc::new(Semaphore::new(concurrency.max(1)));
  let mut tasks = JoinSet::new();

  for tag in tags {
    let pipeline = pipeline.clone();
    let permits = permits.clone();
    tasks.spawn(async move {
      let _permit = permits.acquire_owned().await;
      let result = pipeline.refresh(&tag).await;
      (tag, result)
    });
  }

  let mut failed = 0usize;
  while let Some(joined) = tasks.join_next().await {
    let (tag, result) = joined.context("refresh task panicked")?;
    match result {
      Ok(entity) => {
        tracing::info!(%tag, members = entity.members, "refreshed");
        println!("{tag}\tok");
      }
      Err(e) => {
        failed += 1;
        tracing::error!(%tag, error = %e, transient = e.is_transient(), "refresh failed");
        println!("{tag}\terror: {e}");
      }
    }
  }

  if failed > 0 {
    return Err(anyhow!("{failed} refresh(es) failed"));
  }
  Ok(())
}

/// Print the entity row named by `key`, refreshing it first if it has never
/// been computed. With `days_ago`, print the snapshot nearest that point
/// instead. Either way the view is counted.
async fn show(pipeline: &Pipeline, key: &str, days_ago: Option<i64>) -> anyhow::Result<()> {
  let store = pipeline.accessor().store();
  let tag = resolve_clan(store, key).await?;

  match days_ago {
    Some(days) => {
      let at = days_before(Utc::now(), days)?;
      let snapshot = pipeline.accessor().nearest(&tag, at).await?;
      print_json(&snapshot)?;
    }
    None => {
      let entity = match store.get_entity(&tag).await? {
        Some(entity) => entity,
        None => pipeline.refresh(&tag).await?,
      };
      print_json(&entity)?;
    }
  }

  store.record_page_view(&tag).await?;
  Ok(())
}

/// Map a clan tag or slug to a tag. A stored tag wins; otherwise a unique
/// slug match is used. An unknown key is treated as a tag so that `show`
/// can fetch it.
async fn resolve_clan(store: &SqliteStore, key: &str) -> anyhow::Result<String> {
  let tag = normalize_tag(key);
  if store.get_entity(&tag).await?.is_some() {
    return Ok(tag);
  }

  let matches = store.find_entities_by_slug(key.trim()).await?;
  match matches.as_slice() {
    [] => Ok(tag),
    [only] => Ok(only.tag.clone()),
    many => Err(anyhow!(
      "slug {key:?} matches several clans: {}",
      many.iter().map(|e| e.tag.as_str()).collect::<Vec<_>>().join(", ")
    )),
  }
}

async fn find_player(store: &SqliteStore, key: &str) -> anyhow::Result<PlayerRecord> {
  let tag = normalize_tag(key);
  if let Some(player) = store.get_player(&tag).await? {
    return Ok(player);
  }

  let mut matches = store.find_players_by_slug(key.trim()).await?;
  match matches.len() {
    0 => Err(anyhow!("player {key:?} is not stored")),
    1 => Ok(matches.remove(0)),
    _ => Err(anyhow!(
      "slug {key:?} matches several players: {}",
      matches.iter().map(|p| p.tag.as_str()).collect::<Vec<_>>().join(", ")
    )),
  }
}

/// `now` minus `days` whole days, rejecting counts chrono cannot represent.
fn days_before(now: DateTime<Utc>, days: i64) -> anyhow::Result<DateTime<Utc>> {
  TimeDelta::try_days(days)
    .and_then(|delta| now.checked_sub_signed(delta))
    .ok_or_else(|| anyhow!("--days-ago {days} is out of range"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
