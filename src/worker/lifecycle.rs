//! Install and activate.

use color_eyre::Result;
use futures::future::try_join_all;
use tracing::{info, warn};

use super::clients::Clients;
use super::{Outcome, Worker, WorkerError};
use crate::cache::{CacheStore, SyncQueue, CACHE_VERSION, CURRENT_CACHES, SHELL_FILES, STATIC_CACHE};
use crate::net::{Network, Request, Response};

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
  /// Created, nothing run yet
  #[default]
  Parsed,
  /// Priming the app shell
  Installing,
  /// Installed, waiting to activate
  Installed,
  /// Cleaning up old partitions
  Activating,
  /// Active and intercepting fetches
  Activated,
  /// Install failed or replaced
  Redundant,
}

impl WorkerState {
  /// Check if this state allows fetch interception
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Activated)
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, WorkerState::Redundant)
  }
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

impl<S, N, C> Worker<S, N, C>
where
  S: CacheStore + SyncQueue,
  N: Network,
  C: Clients,
{
  /// Prime the shell partition. Any failed file fails the whole install and
  /// leaves the worker redundant; nothing is written in that case.
  pub(crate) async fn install(&self) -> Result<Outcome> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)?;
    info!(cache = STATIC_CACHE, files = SHELL_FILES.len(), "priming app shell");

    match self.prime_shell().await {
      Ok(()) => {
        self.set_state(WorkerState::Installed);
        Ok(Outcome::Installed { skip_waiting: true })
      }
      Err(e) => {
        warn!(error = %e, "install failed");
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  async fn prime_shell(&self) -> Result<()> {
    let requests = SHELL_FILES
      .iter()
      .map(|path| -> Result<Request> { Ok(Request::get(self.origin.join(path)?)) })
      .collect::<Result<Vec<_>>>()?;

    let cache = self.router.cache();
    let responses: Vec<Response> = try_join_all(requests.iter().map(|request| async move {
      let response = self
        .network
        .fetch(request)
        .await
        .map_err(|e| WorkerError::InstallFailed {
          url: cache.key(request),
          reason: e.to_string(),
        })?;

      if !response.ok() {
        return Err(WorkerError::InstallFailed {
          url: cache.key(request),
          reason: format!("status {}", response.status),
        });
      }
      Ok(response)
    }))
    .await?;

    let entries: Vec<(&Request, &Response)> = requests.iter().zip(&responses).collect();
    cache.open(STATIC_CACHE)?.put_all(&entries)
  }

  /// Drop partitions from older versions and take control of open clients.
  /// A failure puts the worker back to installed so activation can be
  /// retried.
  pub(crate) fn activate(&self) -> Result<Outcome> {
    self.transition(WorkerState::Installed, WorkerState::Activating)?;

    match self.finish_activation() {
      Ok(outcome) => {
        self.set_state(WorkerState::Activated);
        Ok(outcome)
      }
      Err(e) => {
        warn!(error = %e, "activation failed");
        self.set_state(WorkerState::Installed);
        Err(e)
      }
    }
  }

  fn finish_activation(&self) -> Result<Outcome> {
    let deleted = self.router.cache().delete_stale(&CURRENT_CACHES)?;
    for name in &deleted {
      info!(cache = %name, "deleted stale cache");
    }

    let claimed = self.clients.claim()?;
    self.store.set_activated_version(CACHE_VERSION)?;
    info!(claimed, version = CACHE_VERSION, "worker activated");

    Ok(Outcome::Activated { deleted, claimed })
  }

  /// Pick up this version if an earlier run finished activating it.
  pub fn resume(&self) -> Result<bool> {
    if self.state() != WorkerState::Parsed {
      return Ok(false);
    }
    let activated = self.store.activated_version()?.as_deref() == Some(CACHE_VERSION);

    if activated {
      self.set_state(WorkerState::Activated);
    }
    Ok(activated)
  }

  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<(), WorkerError> {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if *state != from {
      return Err(WorkerError::InvalidState {
        expected: from,
        actual: *state,
      });
    }
    *state = to;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_state_display() {
    assert_eq!(WorkerState::Parsed.to_string(), "parsed");
    assert_eq!(WorkerState::Installed.to_string(), "installed");
    assert_eq!(WorkerState::Activated.to_string(), "activated");
    assert_eq!(WorkerState::Redundant.to_string(), "redundant");
  }

  #[test]
  fn test_can_intercept_fetch() {
    assert!(!WorkerState::Parsed.can_intercept_fetch());
    assert!(!WorkerState::Installing.can_intercept_fetch());
    assert!(!WorkerState::Installed.can_intercept_fetch());
    assert!(!WorkerState::Activating.can_intercept_fetch());
    assert!(WorkerState::Activated.can_intercept_fetch());
    assert!(!WorkerState::Redundant.can_intercept_fetch());
    assert!(WorkerState::Redundant.is_terminal());
  }
}
