//! Request classification and strategy dispatch.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{
  CacheLayer, CacheResult, CacheStore, SyncQueue, API_CACHE, IMAGE_CACHE, STATIC_CACHE,
};
use crate::net::{Destination, Network, Request};
use crate::offline;

pub const API_PREFIX: &str = "/api/";
pub const STATIC_PREFIX: &str = "/static/";

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif", "bmp"];
pub const STATIC_EXTENSIONS: &[&str] = &["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot", "map"];

/// Caching strategy selected for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Network-first into the API partition
  Api,
  /// Cache-first from the image partition
  Image,
  /// Cache-first from the static partition
  Static,
  /// Network-first with no writes
  Default,
}

impl std::fmt::Display for Strategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Strategy::Api => write!(f, "api"),
      Strategy::Image => write!(f, "image"),
      Strategy::Static => write!(f, "static"),
      Strategy::Default => write!(f, "default"),
    }
  }
}

/// Pick the strategy for a request. First match wins:
///
/// 1. path under `/api/`
/// 2. image destination or image extension
/// 3. script/style destination, `/static/` path or static extension
/// 4. everything else
pub fn classify(request: &Request) -> Strategy {
  let path = request.path();
  if path.starts_with(API_PREFIX) {
    return Strategy::Api;
  }

  let extension = request.extension();
  let has_extension = |list: &[&str]| extension.as_deref().is_some_and(|ext| list.contains(&ext));

  if request.destination == Destination::Image || has_extension(IMAGE_EXTENSIONS) {
    return Strategy::Image;
  }

  if matches!(request.destination, Destination::Script | Destination::Style)
    || path.starts_with(STATIC_PREFIX)
    || has_extension(STATIC_EXTENSIONS)
  {
    return Strategy::Static;
  }

  Strategy::Default
}

/// Routes intercepted requests through the strategy picked by [`classify`].
pub struct Router<S, N>
where
  S: CacheStore + SyncQueue,
  N: Network,
{
  cache: CacheLayer<S>,
  network: Arc<N>,
}

impl<S, N> Router<S, N>
where
  S: CacheStore + SyncQueue,
  N: Network,
{
  pub fn new(storage: Arc<S>, network: Arc<N>, origin: Url) -> Self {
    Self {
      cache: CacheLayer::new(storage, origin),
      network,
    }
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  /// Produce the response for an intercepted request.
  ///
  /// Network failures never surface as errors; only storage failures do.
  pub async fn handle(&self, request: Request) -> Result<CacheResult> {
    let strategy = classify(&request);
    debug!(method = %request.method, url = %request.url, %strategy, "routing request");

    match strategy {
      Strategy::Api => self.api(request).await,
      Strategy::Image => self.image(request).await,
      Strategy::Static => self.static_asset(request).await,
      Strategy::Default => self.default(request).await,
    }
  }

  async fn api(&self, request: Request) -> Result<CacheResult> {
    let served = self
      .cache
      .network_first(&request, Some(API_CACHE), API_CACHE, || {
        self.network.fetch(&request)
      })
      .await?;

    if let Some(result) = served {
      return Ok(result);
    }

    if request.method.is_read() {
      return Ok(CacheResult::offline(offline::api_read_unavailable()));
    }

    match self.cache.storage().enqueue(&request) {
      Ok(id) => debug!(id, method = %request.method, url = %request.url, "queued mutation for background sync"),
      Err(e) => warn!(url = %request.url, error = %e, "failed to queue mutation for background sync"),
    }
    Ok(CacheResult::offline(offline::api_mutation_failed()))
  }

  async fn image(&self, request: Request) -> Result<CacheResult> {
    let served = self
      .cache
      .cache_first(&request, IMAGE_CACHE, || self.network.fetch(&request))
      .await?;

    Ok(served.unwrap_or_else(|| {
      CacheResult::offline(offline::image_placeholder(request.extension().as_deref()))
    }))
  }

  async fn static_asset(&self, request: Request) -> Result<CacheResult> {
    let served = self
      .cache
      .cache_first(&request, STATIC_CACHE, || self.network.fetch(&request))
      .await?;

    Ok(served.unwrap_or_else(|| offline_document_or_unavailable(&request)))
  }

  async fn default(&self, request: Request) -> Result<CacheResult> {
    let served = self
      .cache
      .network_first(&request, None, STATIC_CACHE, || self.network.fetch(&request))
      .await?;

    Ok(served.unwrap_or_else(|| offline_document_or_unavailable(&request)))
  }
}

/// Offline page for documents, plain 503 for everything else.
pub(crate) fn offline_document_or_unavailable(request: &Request) -> CacheResult {
  if request.is_navigation() || request.accepts_html() {
    CacheResult::offline(offline::offline_page())
  } else {
    CacheResult::offline(offline::service_unavailable())
  }
}
