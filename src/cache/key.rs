//! Stable request identity used to key cache entries.

use sha2::{Digest, Sha256};

use crate::net::{Method, Request};

/// Request identity: method plus absolute URL (fragment stripped).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestKey {
  method: Method,
  url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: &url::Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method,
      url: url.to_string(),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(request.method, &request.url)
  }

  /// SHA256 hash for stable, fixed-length keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.description().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable form, stored next to the entry
  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}
