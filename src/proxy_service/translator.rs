use crate::proxy_service::negotiator::EncodedBody;
use crate::proxy_service::proxy_config::RequestParams;
use crate::route_config::HttpMethod;
use crate::target_table::Target;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, HOST};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Everything except the characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

/// Inbound headers that describe the client connection or the client body framing.
const UNFORWARDED_HEADERS: [&str; 10] = [
  "host",
  "content-length",
  "content-type",
  "transfer-encoding",
  "connection",
  "keep-alive",
  "proxy-connection",
  "upgrade",
  "te",
  "accept-encoding",
];

/// The caller's request, detached from the HTTP server types.
#[derive(Debug, Clone)]
pub struct InboundRequest {
  pub method: HttpMethod,
  pub key: String,
  /// Full request path, key segment included.
  pub path: String,
  /// Whatever the `/{proxykey}/*` route captured after the key.
  pub tail: Option<String>,
  pub query: BTreeMap<String, String>,
  pub headers: HeaderMap,
  pub content_type: Option<String>,
  pub body: Bytes,
}

impl InboundRequest {
  pub fn is_debug(&self) -> bool {
    self.query.get("debug").map(String::as_str) == Some("true")
  }
}

/// The single outbound call made for one inbound request.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
  pub method: HttpMethod,
  pub url: Url,
  pub headers: HeaderMap,
  pub body: EncodedBody,
  pub timeout: Duration,
  pub gzip: bool,
  pub use_response_headers: bool,
}

impl OutgoingRequest {
  /// Attaches the negotiated body. Its content type replaces any configured one.
  pub fn with_body(mut self, body: EncodedBody) -> Self {
    if let Some(content_type) = body.content_type() {
      self
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    self.body = body;
    self
  }
}

pub fn translate(inbound: &InboundRequest, target: &Target, defaults: &RequestParams) -> OutgoingRequest {
  let params = defaults.merge(target);
  let url = rewrite_url(&params.url, &inbound.path, &inbound.query);
  let headers = merge_headers(&inbound.headers, &params.headers, &target.host_header());

  OutgoingRequest {
    method: inbound.method,
    url,
    headers,
    body: EncodedBody::Empty,
    timeout: params.timeout,
    gzip: params.gzip,
    use_response_headers: params.use_response_headers,
  }
}

pub fn encode_component(value: &str) -> String {
  utf8_percent_encode(value, COMPONENT).to_string()
}

/// `key=value&...` with values percent-encoded, in the map's (sorted) order.
pub fn encode_pairs(pairs: &BTreeMap<String, String>) -> String {
  pairs
    .iter()
    .map(|(key, value)| format!("{}={}", key, encode_component(value)))
    .collect::<Vec<String>>()
    .join("&")
}

fn rewrite_url(base: &Url, path: &str, query: &BTreeMap<String, String>) -> Url {
  let mut url = base.clone();

  let rest = strip_key_segment(path);
  if !rest.is_empty() {
    let joined = format!("{}{}", base.path().trim_end_matches('/'), rest);
    url.set_path(&joined);
  }

  if !query.is_empty() {
    let encoded = encode_pairs(query);
    let combined = match base.query() {
      Some(existing) if !existing.is_empty() => format!("{}&{}", existing, encoded),
      _ => encoded,
    };
    url.set_query(Some(&combined));
  }

  url
}

/// Drops the first segment of the raw request path. The router only sends
/// requests whose first segment is the key, in whatever encoding the caller used.
fn strip_key_segment(path: &str) -> &str {
  let segments = path.strip_prefix('/').unwrap_or(path);

  match segments.find('/') {
    Some(index) => &segments[index..],
    None => "",
  }
}

fn merge_headers(inbound: &HeaderMap, overrides: &HeaderMap, host: &str) -> HeaderMap {
  let mut headers = inbound.clone();

  for name in UNFORWARDED_HEADERS {
    headers.remove(name);
  }

  for name in overrides.keys() {
    headers.remove(name);
  }

  for (name, value) in overrides.iter() {
    headers.append(name.clone(), value.clone());
  }

  if let Ok(host) = HeaderValue::from_str(host) {
    headers.insert(HOST, host);
  }

  headers
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::proxy_service::proxy_config::DEFAULT_TIMEOUT;
  use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH};

  fn defaults() -> RequestParams {
    RequestParams {
      method: HttpMethod::Get,
      url: Url::parse("http://127.0.0.1").unwrap(),
      headers: HeaderMap::new(),
      timeout: DEFAULT_TIMEOUT,
      gzip: true,
      use_response_headers: false,
    }
  }

  fn target(url: &str) -> Target {
    Target {
      key: "k".into(),
      url: Url::parse(url).unwrap(),
      headers: None,
      timeout: None,
      gzip: None,
      use_response_headers: None,
    }
  }

  fn inbound(path: &str, query: &[(&str, &str)]) -> InboundRequest {
    InboundRequest {
      method: HttpMethod::Get,
      key: "k".into(),
      path: path.into(),
      tail: None,
      query: query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
      headers: HeaderMap::new(),
      content_type: None,
      body: Bytes::new(),
    }
  }

  fn outgoing_url(base: &str, path: &str, query: &[(&str, &str)]) -> String {
    translate(&inbound(path, query), &target(base), &defaults()).url.to_string()
  }

  #[test]
  fn appends_tail_path_and_query() {
    assert_eq!(
      outgoing_url("http://backend.example/api", "/k/items", &[("x", "1")]),
      "http://backend.example/api/items?x=1"
    );
  }

  #[test]
  fn bare_key_maps_to_base_url() {
    assert_eq!(outgoing_url("http://backend.example/api", "/k", &[]), "http://backend.example/api");
    assert_eq!(outgoing_url("http://backend.example", "/k", &[]), "http://backend.example/");
  }

  #[test]
  fn keeps_trailing_slash_and_deeper_segments() {
    assert_eq!(
      outgoing_url("http://backend.example/api", "/k/a/b/", &[]),
      "http://backend.example/api/a/b/"
    );
    assert_eq!(
      outgoing_url("http://backend.example/api/", "/k/a", &[]),
      "http://backend.example/api/a"
    );
  }

  #[test]
  fn only_first_key_segment_is_stripped() {
    assert_eq!(
      outgoing_url("http://backend.example", "/k/k/items", &[]),
      "http://backend.example/k/items"
    );
  }

  #[test]
  fn encoded_key_segment_is_stripped_as_received() {
    let mut request = inbound("/my%20key/items%20list", &[]);
    request.key = "my key".into();

    let outgoing = translate(&request, &target("http://backend.example/api"), &defaults());
    assert_eq!(outgoing.url.as_str(), "http://backend.example/api/items%20list");
  }

  #[test]
  fn query_values_are_percent_encoded_in_key_order() {
    assert_eq!(
      outgoing_url("http://backend.example", "/k/search", &[("q", "x y&z"), ("a", "1")]),
      "http://backend.example/search?a=1&q=x%20y%26z"
    );
  }

  #[test]
  fn appends_to_existing_base_query() {
    assert_eq!(
      outgoing_url("http://backend.example/api?token=abc", "/k/items", &[("x", "1")]),
      "http://backend.example/api/items?token=abc&x=1"
    );
  }

  #[test]
  fn target_headers_win_and_host_is_forced() {
    let mut overrides = HeaderMap::new();
    overrides.insert(AUTHORIZATION, HeaderValue::from_static("Bearer target"));
    let target = Target {
      headers: Some(overrides),
      ..target("http://backend.example:8080/api")
    };

    let mut request = inbound("/k", &[]);
    request.headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer caller"));
    request.headers.insert(HOST, HeaderValue::from_static("proxy.example"));
    request.headers.insert(ACCEPT, HeaderValue::from_static("text/plain"));
    request.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));

    let outgoing = translate(&request, &target, &defaults());

    assert_eq!(outgoing.headers.get(AUTHORIZATION).unwrap(), "Bearer target");
    assert_eq!(outgoing.headers.get(HOST).unwrap(), "backend.example:8080");
    assert_eq!(outgoing.headers.get(ACCEPT).unwrap(), "text/plain");
    assert!(outgoing.headers.get(CONTENT_LENGTH).is_none());
    assert_eq!(outgoing.headers.get_all(AUTHORIZATION).iter().count(), 1);
  }

  #[test]
  fn host_override_in_target_headers_is_ignored() {
    let mut overrides = HeaderMap::new();
    overrides.insert(HOST, HeaderValue::from_static("spoofed.example"));
    let target = Target {
      headers: Some(overrides),
      ..target("http://backend.example")
    };

    let outgoing = translate(&inbound("/k", &[]), &target, &defaults());
    assert_eq!(outgoing.headers.get(HOST).unwrap(), "backend.example");
  }

  #[test]
  fn carries_merged_params_and_inbound_method() {
    let target = Target {
      timeout: Some(Duration::from_millis(250)),
      use_response_headers: Some(true),
      ..target("http://backend.example")
    };
    let mut request = inbound("/k", &[]);
    request.method = HttpMethod::Delete;

    let outgoing = translate(&request, &target, &defaults());

    assert_eq!(outgoing.method, HttpMethod::Delete);
    assert_eq!(outgoing.timeout, Duration::from_millis(250));
    assert!(outgoing.gzip);
    assert!(outgoing.use_response_headers);
    assert!(matches!(outgoing.body, EncodedBody::Empty));
  }

  #[test]
  fn debug_flag_requires_literal_true() {
    assert!(inbound("/k", &[("debug", "true")]).is_debug());
    assert!(!inbound("/k", &[("debug", "1")]).is_debug());
    assert!(!inbound("/k", &[]).is_debug());
  }

  #[test]
  fn encodes_like_encode_uri_component() {
    assert_eq!(encode_component("a b/c?d=é!*'()~-_."), "a%20b%2Fc%3Fd%3D%C3%A9!*'()~-_.");
  }
}
