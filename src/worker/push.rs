//! Push messages and notification clicks.

use color_eyre::Result;
use serde::Deserialize;
use tracing::{info, warn};

use super::clients::Clients;
use super::{Outcome, Worker, WorkerError};
use crate::cache::{CacheStore, SyncQueue};
use crate::net::Network;

pub const NOTIFICATION_ICON: &str = "/icons/icon-192.png";
pub const NOTIFICATION_BADGE: &str = "/icons/badge-72.png";

/// JSON payload of a push message. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PushMessage {
  pub title: Option<String>,
  pub body: Option<String>,
  pub url: Option<String>,
}

/// Parse a raw push payload.
pub fn parse_push_payload(payload: Option<&[u8]>) -> Result<PushMessage, WorkerError> {
  let data = payload
    .filter(|data| !data.is_empty())
    .ok_or_else(|| WorkerError::MalformedPushPayload("empty payload".to_string()))?;

  serde_json::from_slice(data).map_err(|e| WorkerError::MalformedPushPayload(e.to_string()))
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Page opened when the notification is clicked
  pub url: String,
}

impl Notification {
  pub fn from_message(message: PushMessage, app_name: &str) -> Self {
    Self {
      title: message.title.unwrap_or_else(|| app_name.to_string()),
      body: message.body.unwrap_or_default(),
      icon: NOTIFICATION_ICON.to_string(),
      badge: NOTIFICATION_BADGE.to_string(),
      url: message.url.unwrap_or_else(|| "/".to_string()),
    }
  }

  /// Notification that only carries a target page.
  pub fn for_url(url: impl Into<String>, app_name: &str) -> Self {
    Self::from_message(
      PushMessage {
        url: Some(url.into()),
        ..PushMessage::default()
      },
      app_name,
    )
  }
}

impl<S, N, C> Worker<S, N, C>
where
  S: CacheStore + SyncQueue,
  N: Network,
  C: Clients,
{
  /// Show a notification for a push message. Malformed payloads are
  /// dropped.
  pub(crate) fn handle_push(&self, payload: Option<&[u8]>) -> Result<Outcome> {
    let message = match parse_push_payload(payload) {
      Ok(message) => message,
      Err(e) => {
        warn!(error = %e, "dropping push notification");
        return Ok(Outcome::PushDropped { reason: e.to_string() });
      }
    };

    let notification = Notification::from_message(message, &self.app_name);
    self.clients.show_notification(&notification)?;
    Ok(Outcome::Notified(notification))
  }

  /// Close the notification and bring its page to the front.
  pub(crate) fn handle_notification_click(&self, notification: &Notification) -> Result<Outcome> {
    self.clients.close_notification(notification)?;

    let url = if notification.url.is_empty() {
      "/"
    } else {
      notification.url.as_str()
    };
    if !self.clients.focus(url)? {
      info!(url, "opening window for notification");
      self.clients.open_window(url)?;
    }

    Ok(Outcome::Opened {
      url: url.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_full_payload() {
    let message = parse_push_payload(Some(
      br#"{"title":"Order shipped","body":"Your track rollers are on the way","url":"/orders/42"}"#,
    ))
    .unwrap();
    assert_eq!(message.title.as_deref(), Some("Order shipped"));
    assert_eq!(message.url.as_deref(), Some("/orders/42"));
  }

  #[test]
  fn test_parse_rejects_garbage() {
    assert!(matches!(
      parse_push_payload(Some(b"not json")),
      Err(WorkerError::MalformedPushPayload(_))
    ));
    assert!(matches!(
      parse_push_payload(None),
      Err(WorkerError::MalformedPushPayload(_))
    ));
    assert!(matches!(
      parse_push_payload(Some(b"[1,2]")),
      Err(WorkerError::MalformedPushPayload(_))
    ));
  }

  #[test]
  fn test_defaults_fill_missing_fields() {
    let notification = Notification::from_message(PushMessage::default(), "Heavy Parts");
    assert_eq!(notification.title, "Heavy Parts");
    assert_eq!(notification.body, "");
    assert_eq!(notification.url, "/");
    assert_eq!(notification.icon, NOTIFICATION_ICON);
  }
}
