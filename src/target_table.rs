use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// One backend a proxy key points at. Unset fields inherit the default request params.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
  pub key: Arc<str>,
  pub url: Url,
  pub headers: Option<HeaderMap>,
  pub timeout: Option<Duration>,
  pub gzip: Option<bool>,
  pub use_response_headers: Option<bool>,
}

impl Target {
  /// Value for the outbound `Host` header: the hostname, plus the port when the URL names one.
  pub fn host_header(&self) -> String {
    let host = self.url.host_str().unwrap_or_default();
    match self.url.port() {
      Some(port) => format!("{}:{}", host, port),
      None => host.to_string(),
    }
  }
}

/// Proxy key to target mapping, built once at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct TargetTable {
  targets: HashMap<Arc<str>, Arc<Target>>,
}

impl TargetTable {
  pub fn new<I>(targets: I) -> Self
  where
    I: IntoIterator<Item = Target>,
  {
    let targets = targets
      .into_iter()
      .map(|target| (target.key.clone(), Arc::new(target)))
      .collect();

    TargetTable { targets }
  }

  pub fn resolve(&self, key: &str) -> Option<&Arc<Target>> {
    self.targets.get(key)
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }
}
