//! Cache layer that orchestrates partitions and network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::traits::{CacheResult, CacheStore};
use crate::net::{Method, Request, Response};

/// Handle to one named partition of a [`CacheStore`].
pub struct Partition<S: CacheStore> {
  storage: Arc<S>,
  origin: Url,
  name: String,
}

impl<S: CacheStore> Partition<S> {
  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    self.storage.put(&self.name, &request.cache_key(&self.origin), response)
  }

  /// Write every entry or none of them.
  pub fn put_all(&self, entries: &[(&Request, &Response)]) -> Result<()> {
    let keyed: Vec<(String, &Response)> = entries
      .iter()
      .map(|(request, response)| (request.cache_key(&self.origin), *response))
      .collect();
    self.storage.put_all(&self.name, &keyed)
  }

  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.keys(&self.name)
  }
}

/// Cache layer that manages caching logic and network fetching.
///
/// Only successful (2xx) responses to GET requests are ever written.
pub struct CacheLayer<S: CacheStore> {
  storage: Arc<S>,
  /// Requests to this origin are keyed by path; others by full URL
  origin: Url,
}

impl<S: CacheStore> CacheLayer<S> {
  /// Create a new cache layer over a shared storage backend.
  pub fn new(storage: Arc<S>, origin: Url) -> Self {
    Self { storage, origin }
  }

  /// Entry key for `request`.
  pub fn key(&self, request: &Request) -> String {
    request.cache_key(&self.origin)
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Open a partition by name, creating it if needed.
  pub fn open(&self, name: &str) -> Result<Partition<S>> {
    self.storage.open(name)?;
    Ok(Partition {
      storage: Arc::clone(&self.storage),
      origin: self.origin.clone(),
      name: name.to_string(),
    })
  }

  /// Delete every partition whose name is not in `current`.
  ///
  /// Returns the deleted names.
  pub fn delete_stale(&self, current: &[&str]) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.list_store_names()? {
      if current.contains(&name.as_str()) {
        continue;
      }
      if self.storage.delete_store(&name)? {
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Network-first fetch.
  ///
  /// 1. Fetch from network; an ok response is stored in `store_into` (if any)
  /// 2. Any network response, ok or not, is returned as-is
  /// 3. On network failure, look up `fallback` and return a hit without a
  ///    freshness check
  ///
  /// `None` means the network failed and the fallback partition missed.
  pub async fn network_first<F, Fut>(
    &self,
    request: &Request,
    store_into: Option<&str>,
    fallback: &str,
    fetcher: F,
  ) -> Result<Option<CacheResult>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetcher().await {
      Ok(response) => {
        if let Some(name) = store_into {
          self.store(name, request, &response);
        }
        Ok(Some(CacheResult::from_network(response)))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, falling back to {}", fallback);
        Ok(
          self
            .storage
            .get(fallback, &self.key(request))?
            .map(CacheResult::from_cache),
        )
      }
    }
  }

  /// Cache-first fetch.
  ///
  /// 1. A hit in `partition` is returned and the network is never consulted
  /// 2. On a miss, fetch; an ok response is stored before returning
  ///
  /// `None` means both the cache and the network came up empty.
  pub async fn cache_first<F, Fut>(
    &self,
    request: &Request,
    partition: &str,
    fetcher: F,
  ) -> Result<Option<CacheResult>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.storage.get(partition, &self.key(request))? {
      return Ok(Some(CacheResult::from_cache(cached)));
    }

    match fetcher().await {
      Ok(response) => {
        self.store(partition, request, &response);
        Ok(Some(CacheResult::from_network(response)))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "cache miss and network failed");
        Ok(None)
      }
    }
  }

  /// Write a duplicate of `response` if it is cacheable. Write failures are
  /// logged and never fail the request.
  fn store(&self, partition: &str, request: &Request, response: &Response) {
    if request.method != Method::Get || !response.ok() {
      return;
    }
    let snapshot = response.duplicate();
    if let Err(e) = self.storage.put(partition, &self.key(request), &snapshot) {
      warn!(url = %request.url, partition, error = %e, "failed to write cache entry");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStore};
  use crate::testing::{get, url};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn layer() -> CacheLayer<MemoryStore> {
    CacheLayer::new(Arc::new(MemoryStore::new()), url("/"))
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_fetcher() {
    let layer = layer();
    let request = get("/assets/logo.png");
    layer
      .open("image-v1")
      .unwrap()
      .put(&request, &Response::new(200, b"png".to_vec()))
      .unwrap();

    let calls = AtomicU32::new(0);
    let result = layer
      .cache_first(&request, "image-v1", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(200, b"fresh".to_vec()))
      })
      .await
      .unwrap()
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.response.body, b"png");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_ok_response() {
    let layer = layer();
    let request = get("/static/app.js");

    let result = layer
      .cache_first(&request, "static-v1", || async {
        Ok(Response::new(200, b"console.log(1)".to_vec()))
      })
      .await
      .unwrap()
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(layer.open("static-v1").unwrap().keys().unwrap(), vec!["/static/app.js"]);
  }

  #[tokio::test]
  async fn test_non_ok_responses_are_not_stored() {
    let layer = layer();
    let request = get("/api/products");

    let result = layer
      .network_first(&request, Some("api-v1"), "api-v1", || async {
        Ok(Response::new(500, b"boom".to_vec()))
      })
      .await
      .unwrap()
      .unwrap();

    assert_eq!(result.response.status, 500);
    assert!(layer.open("api-v1").unwrap().keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_partition() {
    let layer = layer();
    let request = get("/catalog");
    layer
      .open("static-v1")
      .unwrap()
      .put(&request, &Response::new(200, b"<html></html>".to_vec()))
      .unwrap();

    let result = layer
      .network_first(&request, None, "static-v1", || async {
        Err(eyre!("connection refused"))
      })
      .await
      .unwrap()
      .unwrap();
    assert_eq!(result.source, CacheSource::Cache);

    let miss = layer
      .network_first(&get("/other"), None, "static-v1", || async {
        Err(eyre!("connection refused"))
      })
      .await
      .unwrap();
    assert!(miss.is_none());
  }

  #[test]
  fn test_delete_stale_keeps_current() {
    let layer = layer();
    for name in ["static-v1", "api-v1", "image-v1", "static-v0"] {
      layer.open(name).unwrap();
    }

    let deleted = layer
      .delete_stale(&["static-v1", "api-v1", "image-v1"])
      .unwrap();

    assert_eq!(deleted, vec!["static-v0"]);
    assert_eq!(
      layer.storage().list_store_names().unwrap(),
      vec!["api-v1", "image-v1", "static-v1"]
    );
  }
}
