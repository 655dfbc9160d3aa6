use crate::error::ConfigError;
use crate::proxy_service::proxy_config::{
  ProxySettings, RequestParams, DEFAULT_GZIP, DEFAULT_TIMEOUT, DEFAULT_URL,
  DEFAULT_USE_RESPONSE_HEADERS,
};
use crate::route_config::{
  DefaultParamsConfig, ProxyConfigFile, TargetConfig, ThrottleConfig, ThrottleLimitsConfig,
};
use crate::target_table::{Target, TargetTable};
use crate::throttle::{ThrottleLimits, ThrottleSettings};
use log::info;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub mod negotiator;
pub mod proxy_config;
pub mod proxy_route_service;
pub mod translator;

impl TryFrom<ProxyConfigFile> for ProxySettings {
  type Error = ConfigError;

  /// Validates the whole file and reports every problem at once.
  fn try_from(config: ProxyConfigFile) -> Result<Self, Self::Error> {
    let mut errors: Vec<String> = Vec::new();

    let defaults = extract_defaults(&config.default_request_params, &mut errors);
    let throttle = config
      .throttle
      .as_ref()
      .map(|throttle| extract_throttle(throttle, &mut errors));

    let targets: Vec<Target> = config
      .targets
      .iter()
      .filter_map(|(key, target)| extract_target(key, target, &mut errors))
      .collect();

    let defaults = match defaults {
      Some(defaults) if errors.is_empty() => defaults,
      _ => return Err(ConfigError::Validation(errors)),
    };

    for target in targets.iter() {
      info!("Proxy key '{}' -> {}", target.key, target.url);
    }

    let targets = TargetTable::new(targets);
    info!("{} proxy keys loaded", targets.len());

    Ok(ProxySettings {
      name: config.name,
      cors_sites: config.cors_sites,
      throttle,
      defaults,
      targets,
    })
  }
}

#[inline]
fn extract_defaults(config: &DefaultParamsConfig, errors: &mut Vec<String>) -> Option<RequestParams> {
  let url = config.url.as_deref().unwrap_or(DEFAULT_URL);
  let url = parse_url(url, "default_request_params.url", errors);

  let headers = match &config.headers {
    Some(headers) => extract_headers(headers, "default_request_params", errors),
    None => HeaderMap::new(),
  };

  Some(RequestParams {
    method: config.method.unwrap_or_default(),
    url: url?,
    headers,
    timeout: config.timeout.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT),
    gzip: config.gzip.unwrap_or(DEFAULT_GZIP),
    use_response_headers: config.use_response_headers.unwrap_or(DEFAULT_USE_RESPONSE_HEADERS),
  })
}

#[inline]
fn extract_target(key: &str, config: &TargetConfig, errors: &mut Vec<String>) -> Option<Target> {
  if key.is_empty() || key.contains('/') {
    errors.push(format!("proxy key '{}' must be a single non-empty path segment", key));
    return None;
  }

  let context = format!("targets.{}", key);
  let url = parse_url(&config.url, &format!("{}.url", context), errors);
  let headers = config
    .headers
    .as_ref()
    .map(|headers| extract_headers(headers, &context, errors));

  Some(Target {
    key: Arc::from(key),
    url: url?,
    headers,
    timeout: config.timeout.map(Duration::from_millis),
    gzip: config.gzip,
    use_response_headers: config.use_response_headers,
  })
}

#[inline]
fn extract_throttle(config: &ThrottleConfig, errors: &mut Vec<String>) -> ThrottleSettings {
  let limits_config = ThrottleLimitsConfig {
    burst: config.burst,
    rate: config.rate,
  };

  let overrides = config
    .overrides
    .iter()
    .map(|(client, limits)| {
      let limits = throttle_limits(limits, &format!("throttle.overrides.{}", client), errors);
      (client.clone(), limits)
    })
    .collect();

  ThrottleSettings {
    limits: throttle_limits(&limits_config, "throttle", errors),
    per_ip: config.ip,
    overrides,
  }
}

fn throttle_limits(config: &ThrottleLimitsConfig, field: &str, errors: &mut Vec<String>) -> ThrottleLimits {
  let limits = ThrottleLimits {
    burst: config.burst,
    rate: config.rate,
  };

  if !config.rate.is_finite() || config.rate < 0.0 {
    errors.push(format!("{}.rate: {} must be a non-negative number", field, config.rate));
  } else if config.burst == 0 && !limits.is_unlimited() {
    errors.push(format!("{}.burst: must be at least 1 unless rate is 0 too", field));
  }

  limits
}

#[inline]
fn parse_url(raw: &str, field: &str, errors: &mut Vec<String>) -> Option<Url> {
  match Url::parse(raw) {
    Ok(url) if !matches!(url.scheme(), "http" | "https") => {
      errors.push(format!("{}: scheme of '{}' must be http or https", field, raw));
      None
    }
    Ok(url) if url.host_str().map_or(true, str::is_empty) => {
      errors.push(format!("{}: '{}' has no host", field, raw));
      None
    }
    Ok(url) => Some(url),
    Err(err) => {
      errors.push(format!("{}: '{}' is not an absolute url ({})", field, raw, err));
      None
    }
  }
}

#[inline]
fn extract_headers(
  pairs: &BTreeMap<String, String>,
  context: &str,
  errors: &mut Vec<String>,
) -> HeaderMap {
  let mut header_map = HeaderMap::new();

  for (name, value) in pairs.iter() {
    match header_pair(name, value) {
      Ok((name, value)) => {
        header_map.insert(name, value);
      }
      Err(InvalidHeaderError::InvalidHeaderName(err)) => {
        errors.push(format!("{}.headers: invalid header name '{}' ({})", context, name, err));
      }
      Err(InvalidHeaderError::InvalidHeaderValue(err)) => {
        errors.push(format!("{}.headers: invalid value for '{}' ({})", context, name, err));
      }
    }
  }

  header_map
}

enum InvalidHeaderError {
  InvalidHeaderValue(String),
  InvalidHeaderName(String),
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), InvalidHeaderError> {
  let value = HeaderValue::try_from(value)
    .map_err(|e| InvalidHeaderError::InvalidHeaderValue(e.to_string()))?;

  let name = HeaderName::try_from(name)
    .map_err(|e| InvalidHeaderError::InvalidHeaderName(e.to_string()))?;

  Ok((name, value))
}
