//! Background sync replay and periodic content refresh.

use color_eyre::Result;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::clients::Clients;
use super::Worker;
use crate::cache::{CacheStore, SyncQueue, API_CACHE, CONTENT_SYNC_URLS};
use crate::net::{Network, Request};

/// Tag of the one-off sync fired when connectivity returns.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Tag of the recurring API refresh.
pub const CONTENT_SYNC_TAG: &str = "content-sync";

/// Result of replaying the sync queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Tasks accepted by the server and removed
  pub replayed: usize,
  /// Tasks that hit the retry cap and were discarded
  pub dropped: usize,
  /// Tasks still queued
  pub remaining: usize,
}

/// Result of a periodic content refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
  pub refreshed: Vec<String>,
  pub failed: Vec<String>,
}

impl<S, N, C> Worker<S, N, C>
where
  S: CacheStore + SyncQueue,
  N: Network,
  C: Clients,
{
  /// Replay queued mutations in submission order.
  ///
  /// A 2xx removes the task. Any other status counts an attempt, and a task
  /// reaching `max_attempts` is dropped. A network failure counts an attempt
  /// and ends the batch, since everything after it would fail too.
  pub(crate) async fn replay_pending(&self) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for task in self.store.pending()? {
      let request = task.to_request()?;
      let reachable = match self.network.fetch(&request).await {
        Ok(response) if response.ok() => {
          debug!(id = task.id, url = %task.url, "replayed queued request");
          self.store.remove(task.id)?;
          report.replayed += 1;
          continue;
        }
        Ok(response) => {
          warn!(id = task.id, url = %task.url, status = response.status, "server rejected queued request");
          true
        }
        Err(e) => {
          warn!(id = task.id, url = %task.url, error = %e, "still offline, stopping replay");
          false
        }
      };

      let attempts = self.store.record_attempt(task.id)?;
      if attempts >= self.max_attempts {
        warn!(id = task.id, url = %task.url, attempts, "dropping queued request after too many attempts");
        self.store.remove(task.id)?;
        report.dropped += 1;
      }

      if !reachable {
        break;
      }
    }

    report.remaining = self.store.pending()?.len();
    info!(
      replayed = report.replayed,
      dropped = report.dropped,
      remaining = report.remaining,
      "background sync finished"
    );
    Ok(report)
  }

  /// Re-fetch the content sync URLs into the API partition. Failures are
  /// per URL and never abort the batch.
  pub(crate) async fn refresh_content(&self) -> Result<RefreshReport> {
    let partition = self.router.cache().open(API_CACHE)?;
    let requests = CONTENT_SYNC_URLS
      .iter()
      .map(|path| -> Result<Request> { Ok(Request::get(self.origin.join(path)?)) })
      .collect::<Result<Vec<_>>>()?;

    let results = join_all(requests.iter().map(|request| self.network.fetch(request))).await;

    let mut report = RefreshReport::default();
    for (request, result) in requests.iter().zip(results) {
      let key = self.router.cache().key(request);
      match result {
        Ok(response) if response.ok() => match partition.put(request, &response) {
          Ok(()) => report.refreshed.push(key),
          Err(e) => {
            warn!(url = %key, error = %e, "failed to store refreshed content");
            report.failed.push(key);
          }
        },
        Ok(response) => {
          warn!(url = %key, status = response.status, "content sync got an error status");
          report.failed.push(key);
        }
        Err(e) => {
          warn!(url = %key, error = %e, "content sync fetch failed");
          report.failed.push(key);
        }
      }
    }

    info!(
      refreshed = report.refreshed.len(),
      failed = report.failed.len(),
      "content sync finished"
    );
    Ok(report)
  }
}
