//! Browsing contexts controlled by the worker.

use color_eyre::Result;
use tracing::info;

use super::push::Notification;

/// What the worker may ask of the pages it controls.
pub trait Clients: Send + Sync {
  /// Take control of every open client. Returns how many were claimed.
  fn claim(&self) -> Result<usize>;

  fn show_notification(&self, notification: &Notification) -> Result<()>;

  fn close_notification(&self, notification: &Notification) -> Result<()>;

  /// Focus a client already showing `url`. Returns false if none is open.
  fn focus(&self, url: &str) -> Result<bool>;

  fn open_window(&self, url: &str) -> Result<()>;
}

/// Client host for the command line: there are no pages, so notifications
/// and windows are printed.
#[derive(Debug, Default)]
pub struct ConsoleClients;

impl Clients for ConsoleClients {
  fn claim(&self) -> Result<usize> {
    Ok(0)
  }

  fn show_notification(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, "showing notification");
    println!("[notification] {}", notification.title);
    if !notification.body.is_empty() {
      println!("  {}", notification.body);
    }
    println!("  -> {}", notification.url);
    Ok(())
  }

  fn close_notification(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, "closing notification");
    Ok(())
  }

  fn focus(&self, _url: &str) -> Result<bool> {
    Ok(false)
  }

  fn open_window(&self, url: &str) -> Result<()> {
    println!("[open] {}", url);
    Ok(())
  }
}
