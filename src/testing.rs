//! Test doubles for the network and the client host.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::net::{Network, Request, Response};
use crate::worker::{Clients, Notification};

pub const ORIGIN: &str = "http://localhost:3001";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn get(path: &str) -> Request {
  Request::get(url(path))
}

pub fn navigate(path: &str) -> Request {
  Request::navigate(url(path))
}

/// Scripted network. Unknown paths answer 404; offline or failing paths error.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, (u16, String, Vec<u8>)>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  log: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, path: &str, status: u16, content_type: &str, body: &[u8]) {
    self.routes.lock().unwrap().insert(
      path.to_string(),
      (status, content_type.to_string(), body.to_vec()),
    );
  }

  /// Make a single path unreachable.
  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(path.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Every request seen, as "METHOD key".
  pub fn requests(&self) -> Vec<String> {
    self.log.lock().unwrap().clone()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let key = request.cache_key(&url("/"));
    self
      .log
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method, key));

    if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&key) {
      return Err(eyre!("network unreachable: {}", key));
    }

    let routes = self.routes.lock().unwrap();
    Ok(match routes.get(&key) {
      Some((status, content_type, body)) => {
        Response::new(*status, body.clone()).with_header("Content-Type", content_type)
      }
      None => Response::new(404, Vec::new()),
    })
  }
}

/// What the worker asked the client host to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
  Claim,
  Show(Notification),
  Close(Notification),
  Focus(String),
  Open(String),
}

/// Client host that records every call. `open_urls` are treated as
/// already-open windows that can be focused.
#[derive(Default)]
pub struct RecordingClients {
  pub open_urls: Mutex<Vec<String>>,
  actions: Mutex<Vec<ClientAction>>,
  claim_fails: AtomicBool,
}

impl RecordingClients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make `claim` error until switched back.
  pub fn set_claim_failing(&self, failing: bool) {
    self.claim_fails.store(failing, Ordering::SeqCst);
  }

  pub fn actions(&self) -> Vec<ClientAction> {
    self.actions.lock().unwrap().clone()
  }

  fn record(&self, action: ClientAction) {
    self.actions.lock().unwrap().push(action);
  }
}

impl Clients for RecordingClients {
  fn claim(&self) -> Result<usize> {
    self.record(ClientAction::Claim);
    if self.claim_fails.load(Ordering::SeqCst) {
      return Err(eyre!("client host unavailable"));
    }
    Ok(self.open_urls.lock().unwrap().len())
  }

  fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.record(ClientAction::Show(notification.clone()));
    Ok(())
  }

  fn close_notification(&self, notification: &Notification) -> Result<()> {
    self.record(ClientAction::Close(notification.clone()));
    Ok(())
  }

  fn focus(&self, url: &str) -> Result<bool> {
    let found = self.open_urls.lock().unwrap().iter().any(|open| open == url);
    if found {
      self.record(ClientAction::Focus(url.to_string()));
    }
    Ok(found)
  }

  fn open_window(&self, url: &str) -> Result<()> {
    self.open_urls.lock().unwrap().push(url.to_string());
    self.record(ClientAction::Open(url.to_string()));
    Ok(())
  }
}
