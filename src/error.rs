use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::path::PathBuf;
use thiserror::Error;

/// Every way a proxied request can end without an upstream response.
///
/// The `Display` text of each variant is the exact body sent to the caller,
/// so nothing about the backend leaks through it.
#[derive(Debug, Error)]
pub enum ProxyError {
  #[error("Not Found")]
  KeyNotFound,
  #[error("Method Not Supported")]
  MethodNotSupported,
  #[error("Unsupported Content Type")]
  MissingContentType,
  #[error("Unsupported Content Type")]
  UnsupportedContentType(String),
  #[error("Content Type Not Supported")]
  MultipartNotSupported,
  #[error("Request Failed")]
  UpstreamTransport(#[source] reqwest::Error),
  #[error("Bad Request")]
  PayloadRead(String),
  #[error("Too Many Requests")]
  Throttled,
}

impl ResponseError for ProxyError {
  fn status_code(&self) -> StatusCode {
    match self {
      ProxyError::KeyNotFound => StatusCode::NOT_FOUND,
      ProxyError::MethodNotSupported => StatusCode::METHOD_NOT_ALLOWED,
      ProxyError::MissingContentType
      | ProxyError::UnsupportedContentType(_)
      | ProxyError::MultipartNotSupported => StatusCode::BAD_GATEWAY,
      ProxyError::UpstreamTransport(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ProxyError::PayloadRead(_) => StatusCode::BAD_REQUEST,
      ProxyError::Throttled => StatusCode::TOO_MANY_REQUESTS,
    }
  }

  fn error_response(&self) -> HttpResponse {
    HttpResponse::build(self.status_code())
      .insert_header(ContentType::plaintext())
      .body(self.to_string())
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("unable to open config file '{}': {}", .path.display(), .source)]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("unable to parse config file: {0}")]
  Parse(#[from] serde_yaml::Error),
  #[error("invalid configuration: {}", .0.join("; "))]
  Validation(Vec<String>),
  #[error("unable to build http client: {0}")]
  HttpClient(#[from] reqwest::Error),
}

impl From<ConfigError> for std::io::Error {
  fn from(error: ConfigError) -> Self {
    match error {
      ConfigError::Io { source, .. } => source,
      other => std::io::Error::new(std::io::ErrorKind::Other, other),
    }
  }
}
