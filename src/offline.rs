//! Responses fabricated when neither the network nor a partition can answer.

use serde_json::json;

use crate::net::Response;

/// Message of the read-request fallback.
pub const OFFLINE_READ_MESSAGE: &str = "This content is not available in offline mode";

pub const OFFLINE_MUTATION_MESSAGE: &str =
  "Unable to reach the server. Your request will be retried when the connection returns.";

/// 503 JSON body for an API read that could not be served.
pub fn api_read_unavailable() -> Response {
  json_response(json!({
    "error": "Offline",
    "message": OFFLINE_READ_MESSAGE,
  }))
}

/// 503 JSON body for an API mutation that could not reach the server.
pub fn api_mutation_failed() -> Response {
  json_response(json!({
    "error": "Network error",
    "message": OFFLINE_MUTATION_MESSAGE,
  }))
}

fn json_response(body: serde_json::Value) -> Response {
  Response::new(503, body.to_string().into_bytes())
    .with_header("Content-Type", "application/json")
}

/// Empty 404 standing in for an image that can't be loaded.
pub fn image_placeholder(extension: Option<&str>) -> Response {
  Response::new(404, Vec::new()).with_header("Content-Type", image_content_type(extension))
}

/// Map an image extension to its MIME type, `image/png` when unknown.
pub fn image_content_type(extension: Option<&str>) -> &'static str {
  match extension {
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    Some("svg") => "image/svg+xml",
    Some("ico") => "image/x-icon",
    Some("avif") => "image/avif",
    Some("bmp") => "image/bmp",
    _ => "image/png",
  }
}

/// Standalone page shown for navigations while offline.
pub fn offline_page() -> Response {
  Response::new(503, OFFLINE_PAGE.as_bytes().to_vec())
    .with_header("Content-Type", "text/html; charset=utf-8")
}

pub fn service_unavailable() -> Response {
  Response::new(503, b"Service Unavailable".to_vec())
    .with_header("Content-Type", "text/plain; charset=utf-8")
}

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline</title>
  <style>
    body { margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center;
           font-family: system-ui, sans-serif; background: #f4f4f4; color: #222; }
    main { text-align: center; padding: 2rem; }
    h1 { font-size: 1.5rem; margin-bottom: 0.5rem; }
    button { margin-top: 1rem; padding: 0.6rem 1.4rem; font-size: 1rem; border: 0; border-radius: 4px;
             background: #f5a300; color: #111; cursor: pointer; }
  </style>
</head>
<body>
  <main>
    <h1>You are offline</h1>
    <p>Check your connection and try again.</p>
    <button type="button" onclick="window.location.reload()">Retry</button>
  </main>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_api_fallbacks_are_distinguishable() {
    let read = api_read_unavailable();
    let mutation = api_mutation_failed();
    assert_eq!(read.status, 503);
    assert_eq!(mutation.status, 503);
    assert_eq!(read.content_type(), Some("application/json"));

    let read: serde_json::Value = serde_json::from_slice(&read.body).unwrap();
    let mutation: serde_json::Value = serde_json::from_slice(&mutation.body).unwrap();
    assert_eq!(read["message"], OFFLINE_READ_MESSAGE);
    assert!(mutation["error"].is_string());
    assert_ne!(read["message"], mutation["message"]);
  }

  #[test]
  fn test_image_placeholder() {
    let response = image_placeholder(Some("svg"));
    assert_eq!(response.status, 404);
    assert!(response.body.is_empty());
    assert_eq!(response.content_type(), Some("image/svg+xml"));
    assert_eq!(image_content_type(None), "image/png");
  }

  #[test]
  fn test_offline_page_is_self_contained() {
    let page = String::from_utf8(offline_page().body).unwrap();
    assert!(page.starts_with("<!DOCTYPE html>"));
    assert!(page.contains("<button"));
    assert!(page.contains("location.reload()"));
    assert!(!page.contains("src="));
    assert!(!page.contains("href="));
  }
}
