use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::path::Path;

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Copy, Hash, Eq, Default)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum HttpMethod {
  #[default]
  Get,
  Post,
  Put,
  Delete,
  Head,
  Options,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultParamsConfig {
  pub method: Option<HttpMethod>,
  pub url: Option<String>,
  pub headers: Option<BTreeMap<String, String>>,
  /// Milliseconds.
  pub timeout: Option<u64>,
  pub gzip: Option<bool>,
  pub use_response_headers: Option<bool>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
  pub url: String,
  pub headers: Option<BTreeMap<String, String>>,
  /// Milliseconds.
  pub timeout: Option<u64>,
  pub gzip: Option<bool>,
  pub use_response_headers: Option<bool>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct ThrottleLimitsConfig {
  pub burst: u32,
  /// Requests per second refilled into the bucket.
  pub rate: f64,
}

/// Token bucket request throttling. `burst: 0` together with `rate: 0` means unlimited.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
  pub burst: u32,
  pub rate: f64,
  /// One bucket per client address instead of one shared bucket.
  #[serde(default = "default_per_ip")]
  pub ip: bool,
  /// Per client address limits; the key `localhost` matches every loopback address.
  #[serde(default)]
  pub overrides: BTreeMap<String, ThrottleLimitsConfig>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct ProxyConfigFile {
  #[serde(default = "default_name")]
  pub name: String,
  #[serde(default = "default_cors_sites")]
  pub cors_sites: Vec<String>,
  #[serde(default)]
  pub throttle: Option<ThrottleConfig>,
  #[serde(default)]
  pub default_request_params: DefaultParamsConfig,
  #[serde(default)]
  pub targets: BTreeMap<String, TargetConfig>,
}

fn default_name() -> String {
  String::from("SProxy")
}

fn default_cors_sites() -> Vec<String> {
  vec![String::from("*")]
}

fn default_per_ip() -> bool {
  true
}

impl ProxyConfigFile {
  pub fn load_from_file(path: &Path) -> Result<ProxyConfigFile, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    let config: ProxyConfigFile = serde_yaml::from_reader(file)?;
    Ok(config)
  }

  pub fn from_yaml(content: &str) -> Result<ProxyConfigFile, ConfigError> {
    let config: ProxyConfigFile = serde_yaml::from_str(content)?;
    Ok(config)
  }
}

impl TryFrom<&str> for HttpMethod {
  type Error = String;

  fn try_from(value: &str) -> Result<Self, Self::Error> {
    match value.to_lowercase().as_str() {
      "get" => Ok(HttpMethod::Get),
      "post" => Ok(HttpMethod::Post),
      "put" => Ok(HttpMethod::Put),
      "head" => Ok(HttpMethod::Head),
      "options" => Ok(HttpMethod::Options),
      "delete" => Ok(HttpMethod::Delete),
      _ => Err(format!("unknown http method '{}'", value)),
    }
  }
}

impl TryFrom<String> for HttpMethod {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    HttpMethod::try_from(value.as_str())
  }
}

impl From<HttpMethod> for reqwest::Method {
  fn from(method: HttpMethod) -> Self {
    match method {
      HttpMethod::Get => reqwest::Method::GET,
      HttpMethod::Post => reqwest::Method::POST,
      HttpMethod::Put => reqwest::Method::PUT,
      HttpMethod::Delete => reqwest::Method::DELETE,
      HttpMethod::Head => reqwest::Method::HEAD,
      HttpMethod::Options => reqwest::Method::OPTIONS,
    }
  }
}

impl Display for HttpMethod {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      HttpMethod::Get => f.write_str("GET"),
      HttpMethod::Post => f.write_str("POST"),
      HttpMethod::Put => f.write_str("PUT"),
      HttpMethod::Delete => f.write_str("DELETE"),
      HttpMethod::Head => f.write_str("HEAD"),
      HttpMethod::Options => f.write_str("OPTIONS"),
    }
  }
}
