use crate::route_config::HttpMethod;
use crate::target_table::{Target, TargetTable};
use crate::throttle::ThrottleSettings;
use reqwest::header::HeaderMap;
use std::time::Duration;
use url::Url;

pub const DEFAULT_URL: &str = "http://127.0.0.1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);
pub const DEFAULT_GZIP: bool = true;
pub const DEFAULT_USE_RESPONSE_HEADERS: bool = false;

/// Fully resolved request parameters.
///
/// Used both as the process-wide default layer and as the per-request result
/// of [`RequestParams::merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
  pub method: HttpMethod,
  pub url: Url,
  pub headers: HeaderMap,
  pub timeout: Duration,
  pub gzip: bool,
  pub use_response_headers: bool,
}

impl RequestParams {
  /// Overlays the fields a target sets on top of `self`.
  ///
  /// Precedence, field by field:
  /// - `url`: always the target's.
  /// - `headers`: the target's map when it declares one, replacing the default map as a whole.
  /// - `timeout`, `gzip`, `use_response_headers`: the target's value when set.
  /// - `method`: kept from the defaults; the translator replaces it with the inbound method.
  ///
  /// The result owns its own copies, nothing is shared with the defaults.
  pub fn merge(&self, target: &Target) -> RequestParams {
    RequestParams {
      method: self.method,
      url: target.url.clone(),
      headers: target.headers.as_ref().unwrap_or(&self.headers).clone(),
      timeout: target.timeout.unwrap_or(self.timeout),
      gzip: target.gzip.unwrap_or(self.gzip),
      use_response_headers: target.use_response_headers.unwrap_or(self.use_response_headers),
    }
  }
}

/// The immutable configuration every request is served from.
#[derive(Debug)]
pub struct ProxySettings {
  pub name: String,
  pub cors_sites: Vec<String>,
  /// `None` leaves requests unthrottled.
  pub throttle: Option<ThrottleSettings>,
  pub defaults: RequestParams,
  pub targets: TargetTable,
}
