use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// HTTP method of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(format!("unsupported method: {}", other)),
    }
  }
}

/// What the request is for, as reported by the issuing context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  /// Top-level navigation to an HTML document
  Document,
  /// Subresource (script, style, image, font)
  Asset,
  /// Programmatic request (fetch/XHR)
  #[default]
  Empty,
}

/// An outbound request
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Empty,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  /// A top-level document navigation
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Case-insensitive header lookup
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Whether the request asks for an HTML document
  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
      || self
        .header("accept")
        .is_some_and(|accept| accept.contains("text/html"))
  }
}

/// A response, either from the network or replayed from cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Synthesized answer for a navigation that can be served neither from
  /// the network nor from cache.
  pub fn offline() -> Self {
    Self::new(503, "Offline").with_header("content-type", "text/plain")
  }

  /// True for 2xx statuses
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
  pub fn retry_after_secs(&self) -> Option<u64> {
    self.header("retry-after")?.trim().parse().ok()
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_method_parse_is_case_insensitive() {
    assert_eq!("get".parse::<Method>(), Ok(Method::Get));
    assert_eq!("Delete".parse::<Method>(), Ok(Method::Delete));
    assert!("BREW".parse::<Method>().is_err());
  }

  #[test]
  fn test_navigation_detection() {
    let nav = Request::navigate(url("https://app.test/"));
    assert!(nav.is_navigation());

    let html = Request::get(url("https://app.test/play")).with_header("Accept", "text/html,*/*");
    assert!(html.is_navigation());

    let json = Request::get(url("https://app.test/api/x")).with_header("Accept", "application/json");
    assert!(!json.is_navigation());
  }

  #[test]
  fn test_retry_after_parsing() {
    let resp = Response::new(429, "").with_header("Retry-After", " 12 ");
    assert_eq!(resp.retry_after_secs(), Some(12));

    let date = Response::new(429, "").with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT");
    assert_eq!(date.retry_after_secs(), None);
  }

  #[test]
  fn test_offline_response() {
    let resp = Response::offline();
    assert_eq!(resp.status, 503);
    assert!(!resp.ok());
    assert_eq!(resp.body, b"Offline");
    assert_eq!(resp.header("Content-Type"), Some("text/plain"));
  }
}
