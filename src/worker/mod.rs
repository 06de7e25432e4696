//! The offline worker: lifecycle, fetch interception, sync and push.

mod clients;
mod lifecycle;
mod push;
mod sync;

pub use clients::{Clients, ConsoleClients};
pub use lifecycle::WorkerState;
pub use push::Notification;
pub use sync::{RefreshReport, SyncReport, BACKGROUND_SYNC_TAG, CONTENT_SYNC_TAG};

use color_eyre::Result;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheResult, CacheStore, SyncQueue};
use crate::config::Config;
use crate::event::Event;
use crate::net::Network;
use crate::router::{offline_document_or_unavailable, Router};

#[derive(Debug, Error)]
pub enum WorkerError {
  #[error("install failed while fetching {url}: {reason}")]
  InstallFailed { url: String, reason: String },

  #[error("malformed push payload: {0}")]
  MalformedPushPayload(String),

  #[error("worker is {actual}, expected {expected}")]
  InvalidState {
    expected: WorkerState,
    actual: WorkerState,
  },
}

/// What handling one event produced
#[derive(Debug)]
pub enum Outcome {
  /// Shell primed; `skip_waiting` asks the host to activate right away
  Installed { skip_waiting: bool },
  Activated { deleted: Vec<String>, claimed: usize },
  Response(CacheResult),
  Synced(SyncReport),
  Refreshed(RefreshReport),
  Notified(Notification),
  PushDropped { reason: String },
  Opened { url: String },
  /// Sync event with a tag nobody handles
  Ignored { tag: String },
}

pub struct Worker<S, N, C>
where
  S: CacheStore + SyncQueue,
  N: Network,
  C: Clients,
{
  router: Router<S, N>,
  store: Arc<S>,
  network: Arc<N>,
  clients: Arc<C>,
  state: Mutex<WorkerState>,
  origin: Url,
  app_name: String,
  max_attempts: u32,
}

impl<S, N, C> Worker<S, N, C>
where
  S: CacheStore + SyncQueue,
  N: Network,
  C: Clients,
{
  pub fn new(config: &Config, store: Arc<S>, network: Arc<N>, clients: Arc<C>) -> Result<Self> {
    let origin = config.origin_url()?;
    Ok(Self {
      router: Router::new(Arc::clone(&store), Arc::clone(&network), origin.clone()),
      store,
      network,
      clients,
      state: Mutex::new(WorkerState::default()),
      origin,
      app_name: config.app_name.clone(),
      max_attempts: config.sync.max_attempts.max(1),
    })
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  /// Handle one event from the host.
  pub async fn dispatch(&self, event: Event) -> Result<Outcome> {
    info!(event = %event.kind(), state = %self.state(), "dispatching event");

    match event {
      Event::Install => self.install().await,
      Event::Activate => self.activate(),
      Event::Fetch(request) => {
        if self.state().can_intercept_fetch() {
          return Ok(Outcome::Response(self.router.handle(request).await?));
        }
        debug!(url = %request.url, "worker not active, passing fetch through");
        let result = match self.network.fetch(&request).await {
          Ok(response) => CacheResult::from_network(response),
          Err(e) => {
            warn!(url = %request.url, error = %e, "pass-through fetch failed");
            offline_document_or_unavailable(&request)
          }
        };
        Ok(Outcome::Response(result))
      }
      Event::Sync { tag } if tag == BACKGROUND_SYNC_TAG => Ok(Outcome::Synced(self.replay_pending().await?)),
      Event::PeriodicSync { tag } if tag == CONTENT_SYNC_TAG => {
        Ok(Outcome::Refreshed(self.refresh_content().await?))
      }
      Event::Sync { tag } | Event::PeriodicSync { tag } => {
        debug!(%tag, "ignoring sync with unknown tag");
        Ok(Outcome::Ignored { tag })
      }
      Event::Push { payload } => self.handle_push(payload.as_deref()),
      Event::NotificationClick { notification } => self.handle_notification_click(&notification),
    }
  }
}
