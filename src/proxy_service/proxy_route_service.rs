use crate::error::ProxyError;
use crate::http_client::UpstreamClients;
use crate::proxy_service::negotiator::{mime_essence, negotiate, parse_form, BodyFormat};
use crate::proxy_service::proxy_config::ProxySettings;
use crate::proxy_service::translator::{translate, InboundRequest, OutgoingRequest};
use crate::route_config::HttpMethod;
use crate::target_table::Target;
use actix_web::http::header::ContentType;
use actix_web::web::{Payload, Query};
use actix_web::{HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Upstream response headers that only make sense on the upstream connection.
const UNRELAYED_HEADERS: [&str; 8] = [
  "connection",
  "keep-alive",
  "proxy-connection",
  "transfer-encoding",
  "content-length",
  "te",
  "trailer",
  "upgrade",
];

const EMPTY_JSON: &str = "{}";

pub struct ProxyRouteService {
  settings: Arc<ProxySettings>,
  clients: UpstreamClients,
  max_body_size: usize,
}

#[derive(Debug)]
pub struct UpstreamResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl ProxyRouteService {
  pub fn new(settings: ProxySettings, clients: UpstreamClients, max_body_size: usize) -> Self {
    Self {
      settings: Arc::new(settings),
      clients,
      max_body_size,
    }
  }

  pub fn settings(&self) -> &ProxySettings {
    &self.settings
  }

  pub fn max_body_size(&self) -> usize {
    self.max_body_size
  }

  /// Looks the key up before anything about the request body is touched.
  pub fn resolve(&self, key: &str) -> Result<Arc<Target>, ProxyError> {
    match self.settings.targets.resolve(key) {
      Some(target) => Ok(target.clone()),
      None => {
        info!("Proxy key '{}' not found", key);
        Err(ProxyError::KeyNotFound)
      }
    }
  }

  /// Runs one inbound request for a resolved target through echo, translate, negotiate, forward and relay.
  pub async fn exec(&self, target: &Target, inbound: InboundRequest) -> Result<HttpResponse, ProxyError> {
    if inbound.is_debug() {
      return Ok(echo(&inbound));
    }

    let outgoing = translate(&inbound, target, &self.settings.defaults);
    let body = negotiate(inbound.method, inbound.content_type.as_deref(), &inbound.body)?;
    let outgoing = outgoing.with_body(body);

    let use_response_headers = outgoing.use_response_headers;
    let client = self.clients.select(outgoing.gzip);
    let upstream = forward(client, outgoing).await?;

    Ok(relay(upstream, use_response_headers))
  }
}

/// Detaches the request from actix and reads the whole body, up to `limit` bytes.
pub async fn read_inbound(
  req: &HttpRequest,
  mut payload: Payload,
  limit: usize,
) -> Result<InboundRequest, ProxyError> {
  let method = HttpMethod::try_from(req.method().as_str()).map_err(|_| ProxyError::MethodNotSupported)?;

  let query = match Query::<BTreeMap<String, String>>::from_query(req.query_string()) {
    Ok(query_params) => query_params.into_inner(),
    Err(err) => {
      warn!("Unable to parse query parameters {}", err);
      BTreeMap::new()
    }
  };

  let mut headers = HeaderMap::new();
  for (name, value) in req.headers().iter() {
    headers.append(name.clone(), value.clone());
  }

  let content_type = req
    .headers()
    .get(CONTENT_TYPE)
    .and_then(|value| value.to_str().ok())
    .map(str::to_string);

  let mut body_buffer = BytesMut::new();
  while let Some(chunk) = payload.next().await {
    let bytes = chunk.map_err(|err| ProxyError::PayloadRead(err.to_string()))?;
    if body_buffer.len() + bytes.len() > limit {
      return Err(ProxyError::PayloadRead(format!("payload exceeds {} bytes", limit)));
    }
    body_buffer.extend_from_slice(&bytes);
  }

  Ok(InboundRequest {
    method,
    key: req.match_info().get("proxykey").unwrap_or_default().to_string(),
    path: req.path().to_string(),
    tail: req.match_info().get("tail").map(str::to_string),
    query,
    headers,
    content_type,
    body: body_buffer.freeze(),
  })
}

/// Makes exactly one upstream call. Any transport failure, including reading
/// the response body, collapses into [`ProxyError::UpstreamTransport`].
pub async fn forward(client: &Client, request: OutgoingRequest) -> Result<UpstreamResponse, ProxyError> {
  let OutgoingRequest {
    method,
    url,
    headers,
    body,
    timeout,
    ..
  } = request;

  let target_url = url.to_string();
  let mut builder = client
    .request(method.into(), url)
    .headers(headers)
    .timeout(timeout);

  if let Some(bytes) = body.into_bytes() {
    builder = builder.body(bytes);
  }

  let proxy_response: Result<UpstreamResponse, reqwest::Error> = async move {
    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    Ok(UpstreamResponse { status, headers, body })
  }
  .await;

  match proxy_response {
    Ok(upstream) => {
      debug!("{} {} -> {}", method, target_url, upstream.status);
      Ok(upstream)
    }
    Err(err) => {
      error!("Proxy request {} {} failed ({}): {}", method, target_url, transport_cause(&err), err);
      Err(ProxyError::UpstreamTransport(err))
    }
  }
}

fn transport_cause(err: &reqwest::Error) -> &'static str {
  if err.is_timeout() {
    "timeout"
  } else if err.is_connect() {
    "connect"
  } else if err.is_body() || err.is_decode() {
    "body"
  } else {
    "request"
  }
}

/// Maps the upstream response onto the caller's response, keeping the upstream status code.
pub fn relay(upstream: UpstreamResponse, use_response_headers: bool) -> HttpResponse {
  let UpstreamResponse { status, headers, body } = upstream;
  let mut response = HttpResponse::build(status);

  if use_response_headers {
    for (name, value) in headers.iter() {
      if !UNRELAYED_HEADERS.contains(&name.as_str()) {
        response.append_header((name.clone(), value.clone()));
      }
    }
  }

  if body.is_empty() || !is_structured(&headers) {
    return response.body(body);
  }

  if !use_response_headers {
    response.insert_header(ContentType::json());
  }

  response.body(structured_body(&body))
}

fn is_structured(headers: &HeaderMap) -> bool {
  headers
    .get(CONTENT_TYPE)
    .and_then(|value| value.to_str().ok())
    .map(mime_essence)
    .map_or(false, |essence| essence == "application/json" || essence.ends_with("+json"))
}

fn structured_body(body: &[u8]) -> String {
  match serde_json::from_slice::<Value>(body).and_then(|value| serde_json::to_string(&value)) {
    Ok(json) => json,
    Err(err) => {
      warn!("Upstream json body could not be serialized, relaying empty object: {}", err);
      EMPTY_JSON.to_string()
    }
  }
}

#[derive(Serialize)]
struct DiagnosticEcho<'a> {
  proxykey: &'a str,
  method: HttpMethod,
  path: &'a str,
  params: BTreeMap<&'a str, &'a str>,
  query: &'a BTreeMap<String, String>,
  body: Value,
  headers: BTreeMap<&'a str, String>,
}

/// Reflects what the proxy received instead of forwarding it.
pub fn echo(inbound: &InboundRequest) -> HttpResponse {
  let mut params = BTreeMap::new();
  params.insert("proxykey", inbound.key.as_str());
  if let Some(tail) = &inbound.tail {
    params.insert("*", tail.as_str());
  }

  let mut headers: BTreeMap<&str, String> = BTreeMap::new();
  for (name, value) in inbound.headers.iter() {
    let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
    match headers.entry(name.as_str()) {
      Entry::Occupied(mut existing) => {
        let existing = existing.get_mut();
        existing.push_str(", ");
        existing.push_str(&value);
      }
      Entry::Vacant(slot) => {
        slot.insert(value);
      }
    }
  }

  HttpResponse::Ok().json(DiagnosticEcho {
    proxykey: &inbound.key,
    method: inbound.method,
    path: &inbound.path,
    params,
    query: &inbound.query,
    body: echo_body(inbound),
    headers,
  })
}

fn echo_body(inbound: &InboundRequest) -> Value {
  if inbound.body.is_empty() {
    return Value::Null;
  }

  let lossy = || Value::String(String::from_utf8_lossy(&inbound.body).into_owned());

  match inbound.content_type.as_deref().and_then(BodyFormat::from_content_type) {
    Some(BodyFormat::Json) => serde_json::from_slice(&inbound.body).unwrap_or_else(|_| lossy()),
    Some(BodyFormat::UrlEncoded) => Value::Object(
      parse_form(&inbound.body)
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect(),
    ),
    _ => lossy(),
  }
}
