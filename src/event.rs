use tokio::sync::mpsc;

use crate::net::Request;
use crate::worker::Notification;

/// Events delivered by the hosting runtime
#[derive(Debug)]
pub enum Event {
  /// New version is being installed
  Install,
  /// Installed version takes over
  Activate,
  /// Intercepted request that needs a response
  Fetch(Request),
  /// One-off background sync, usually fired on reconnect
  Sync { tag: String },
  /// Recurring sync scheduled by the host
  PeriodicSync { tag: String },
  /// Push message with its raw payload
  Push { payload: Option<Vec<u8>> },
  /// User clicked a shown notification
  NotificationClick { notification: Notification },
}

/// Event kinds, one handler per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Sync,
  PeriodicSync,
  Push,
  NotificationClick,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Event::Install => EventKind::Install,
      Event::Activate => EventKind::Activate,
      Event::Fetch(_) => EventKind::Fetch,
      Event::Sync { .. } => EventKind::Sync,
      Event::PeriodicSync { .. } => EventKind::PeriodicSync,
      Event::Push { .. } => EventKind::Push,
      Event::NotificationClick { .. } => EventKind::NotificationClick,
    }
  }
}

impl std::fmt::Display for EventKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EventKind::Install => write!(f, "install"),
      EventKind::Activate => write!(f, "activate"),
      EventKind::Fetch => write!(f, "fetch"),
      EventKind::Sync => write!(f, "sync"),
      EventKind::PeriodicSync => write!(f, "periodicsync"),
      EventKind::Push => write!(f, "push"),
      EventKind::NotificationClick => write!(f, "notificationclick"),
    }
  }
}

/// Event queue feeding the worker one event at a time
#[derive(Debug)]
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Sender for queueing follow-up events (e.g. activate after install)
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event, or `None` once the queue is drained
  pub fn next(&mut self) -> Option<Event> {
    self.rx.try_recv().ok()
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_events_come_out_in_order() {
    let mut events = EventHandler::new();
    let tx = events.sender();
    tx.send(Event::Install).unwrap();
    tx.send(Event::Activate).unwrap();

    assert_eq!(events.next().map(|e| e.kind()), Some(EventKind::Install));
    assert_eq!(events.next().map(|e| e.kind()), Some(EventKind::Activate));
    assert!(events.next().is_none());
  }

  #[test]
  fn test_kind_names() {
    assert_eq!(EventKind::PeriodicSync.to_string(), "periodicsync");
    assert_eq!(
      Event::Sync {
        tag: "background-sync".into()
      }
      .kind(),
      EventKind::Sync
    );
  }
}
