//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::net::{FetchError, Request, Response, Transport};

pub const ORIGIN: &str = "https://app.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN)
    .and_then(|base| base.join(path))
    .expect("valid test url")
}

#[derive(Clone)]
enum Script {
  Respond(Response),
  Delay(Duration, Response),
  Fail,
  Hang,
}

/// Transport that answers from a per-URL script. Unscripted URLs fail
/// like an unreachable network.
#[derive(Default)]
pub struct ScriptedTransport {
  routes: Mutex<HashMap<String, Script>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  fn set(&self, path: &str, script: Script) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), script);
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    self.set(path, Script::Respond(Response::new(status, body)));
  }

  pub fn respond_with(&self, path: &str, response: Response) {
    self.set(path, Script::Respond(response));
  }

  pub fn delay(&self, path: &str, delay: Duration, status: u16, body: &str) {
    self.set(path, Script::Delay(delay, Response::new(status, body)));
  }

  pub fn fail(&self, path: &str) {
    self.set(path, Script::Fail);
  }

  pub fn hang(&self, path: &str) {
    self.set(path, Script::Hang);
  }

  pub fn calls_to(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|c| **c == target)
      .count()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    let key = request.url.to_string();
    self.calls.lock().unwrap().push(key.clone());
    let script = self.routes.lock().unwrap().get(&key).cloned();

    match script {
      Some(Script::Respond(response)) => Ok(response),
      Some(Script::Delay(delay, response)) => {
        tokio::time::sleep(delay).await;
        Ok(response)
      }
      Some(Script::Hang) => std::future::pending().await,
      Some(Script::Fail) | None => Err(FetchError::network("connection refused")),
    }
  }
}
