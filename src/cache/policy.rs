//! Request classification into fetch policies.

use url::{Origin, Url};

use crate::net::{Method, Request};

/// File extensions served cache-first
pub const DEFAULT_ASSET_EXTENSIONS: &[&str] = &[
  "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf",
  "otf",
];

/// How a request is handled, checked in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Non-GET or cross-origin: never intercepted
  PassThrough,
  /// HTML document: network-first, offline page fallback
  Navigation,
  /// Backend data: network-first, mirrored into the API partition
  Api,
  /// Script/style/image/font: cache-first with background revalidation
  StaticAsset,
  /// Network-first, any cached copy on failure
  Other,
}

#[derive(Debug, Clone)]
pub struct RoutePolicy {
  origin: Origin,
  api_prefix: String,
  asset_extensions: Vec<String>,
}

impl RoutePolicy {
  pub fn new(origin: &Url, api_prefix: impl Into<String>, asset_extensions: &[String]) -> Self {
    Self {
      origin: origin.origin(),
      api_prefix: api_prefix.into(),
      asset_extensions: asset_extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect(),
    }
  }

  /// Policy with the default `/api/` prefix and asset extensions.
  pub fn for_origin(origin: &Url) -> Self {
    let extensions: Vec<String> = DEFAULT_ASSET_EXTENSIONS
      .iter()
      .map(|ext| ext.to_string())
      .collect();
    Self::new(origin, "/api/", &extensions)
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.method != Method::Get || request.url.origin() != self.origin {
      return RequestClass::PassThrough;
    }

    if request.is_navigation() {
      return RequestClass::Navigation;
    }

    let path = request.url.path();
    if path.starts_with(&self.api_prefix) {
      return RequestClass::Api;
    }

    if self.is_asset_path(path) {
      return RequestClass::StaticAsset;
    }

    RequestClass::Other
  }

  fn is_asset_path(&self, path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
      Some((_, ext)) => {
        let ext = ext.to_ascii_lowercase();
        self.asset_extensions.iter().any(|e| *e == ext)
      }
      None => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Destination;
  use crate::testing::{url, ORIGIN};

  fn policy() -> RoutePolicy {
    RoutePolicy::for_origin(&Url::parse(ORIGIN).unwrap())
  }

  #[test]
  fn test_non_get_passes_through() {
    let req = Request::new(Method::Post, url("/api/saves"));
    assert_eq!(policy().classify(&req), RequestClass::PassThrough);
  }

  #[test]
  fn test_cross_origin_passes_through() {
    let req = Request::get(Url::parse("https://cdn.other.test/lib.js").unwrap());
    assert_eq!(policy().classify(&req), RequestClass::PassThrough);
  }

  #[test]
  fn test_navigation_wins_over_api_prefix() {
    let req = Request::navigate(url("/api/docs"));
    assert_eq!(policy().classify(&req), RequestClass::Navigation);
  }

  #[test]
  fn test_api_and_assets() {
    let p = policy();
    assert_eq!(p.classify(&Request::get(url("/api/characters/1"))), RequestClass::Api);
    assert_eq!(
      p.classify(&Request::get(url("/assets/app.3f2a.JS")).with_destination(Destination::Asset)),
      RequestClass::StaticAsset
    );
    assert_eq!(p.classify(&Request::get(url("/fonts/title.woff2"))), RequestClass::StaticAsset);
    assert_eq!(p.classify(&Request::get(url("/manifest.json"))), RequestClass::Other);
    assert_eq!(p.classify(&Request::get(url("/styles.css/raw"))), RequestClass::Other);
  }

  #[test]
  fn test_custom_extensions_are_normalized() {
    let origin = Url::parse(ORIGIN).unwrap();
    let p = RoutePolicy::new(&origin, "/v1/", &[".WASM".to_string()]);
    assert_eq!(p.classify(&Request::get(url("/pkg/game.wasm"))), RequestClass::StaticAsset);
    assert_eq!(p.classify(&Request::get(url("/v1/state"))), RequestClass::Api);
    assert_eq!(p.classify(&Request::get(url("/app.js"))), RequestClass::Other);
  }
}
