//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use url::Url;

use crate::net::{Headers, Method, Request, Response};

/// A stored response snapshot.
#[derive(Debug, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Named, durable request -> response partitions.
///
/// Writes are atomic per entry and overwrite any previous entry for the same
/// key. Concurrent writers to one key are last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Open a partition, creating it if missing.
  fn open(&self, name: &str) -> Result<()>;

  /// Look up an entry. A missing partition is a miss.
  fn get(&self, name: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Write an entry, creating the partition if needed.
  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()>;

  /// Write several entries into one partition. Either all land or none do.
  fn put_all(&self, name: &str, entries: &[(String, &Response)]) -> Result<()>;

  /// Drop a whole partition. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;

  fn list_store_names(&self) -> Result<Vec<String>>;

  /// Keys held by a partition, sorted.
  fn keys(&self, name: &str) -> Result<Vec<String>>;

  /// Cache version whose activation last completed.
  fn activated_version(&self) -> Result<Option<String>>;

  fn set_activated_version(&self, version: &str) -> Result<()>;
}

/// A mutation that failed while offline, waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
  pub id: i64,
  pub method: Method,
  pub url: String,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub attempts: u32,
  pub queued_at: DateTime<Utc>,
}

impl PendingTask {
  /// Rebuild the original request for replay.
  pub fn to_request(&self) -> Result<Request> {
    let url = Url::parse(&self.url)?;
    Ok(Request {
      headers: self.headers.clone(),
      body: self.body.clone(),
      ..Request::get(url).with_method(self.method)
    })
  }
}

/// Durable FIFO of failed mutations.
pub trait SyncQueue: Send + Sync {
  /// Persist a request, returning its task id.
  fn enqueue(&self, request: &Request) -> Result<i64>;

  /// All pending tasks in submission order.
  fn pending(&self) -> Result<Vec<PendingTask>>;

  fn remove(&self, id: i64) -> Result<()>;

  /// Count one more failed replay, returning the new attempt count.
  fn record_attempt(&self, id: i64) -> Result<u32>;
}

/// Result from a cache operation, including the response and where it came from.
#[derive(Debug)]
pub struct CacheResult {
  pub response: Response,
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  /// Fresh response from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Response served from a partition.
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: CacheSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  /// Synthesized fallback when neither network nor cache could answer.
  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Offline,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Stored entry, served without a freshness check
  Cache,
  /// Fabricated offline response
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::Offline => write!(f, "offline"),
    }
  }
}
