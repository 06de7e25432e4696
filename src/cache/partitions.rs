//! Partition names and the fixed resource lists tied to a cache version.
//!
//! Bumping the version is the only migration: the next activation deletes
//! every partition not named here.

macro_rules! cache_version {
  () => {
    "v1"
  };
}

pub const CACHE_VERSION: &str = cache_version!();

/// App shell: root document, manifest, robots, sitemap
pub const STATIC_CACHE: &str = concat!("static-", cache_version!());
/// Responses to `/api/*` requests
pub const API_CACHE: &str = concat!("api-", cache_version!());
pub const IMAGE_CACHE: &str = concat!("image-", cache_version!());

pub const CURRENT_CACHES: [&str; 3] = [STATIC_CACHE, API_CACHE, IMAGE_CACHE];

/// Files primed into [`STATIC_CACHE`] on install. All or nothing.
pub const SHELL_FILES: &[&str] = &["/", "/manifest.json", "/sitemap.xml", "/robots.txt"];

/// API resources refreshed by the `content-sync` periodic sync.
pub const CONTENT_SYNC_URLS: &[&str] = &["/api/products", "/api/categories"];

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_names_are_version_qualified() {
    assert_eq!(STATIC_CACHE, "static-v1");
    assert_eq!(API_CACHE, "api-v1");
    assert_eq!(IMAGE_CACHE, "image-v1");
    assert!(CURRENT_CACHES.iter().all(|name| name.ends_with(CACHE_VERSION)));
  }
}
