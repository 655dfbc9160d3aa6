use crate::error::ProxyError;
use crate::proxy_service::translator::encode_pairs;
use crate::route_config::HttpMethod;
use bytes::Bytes;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
  UrlEncoded,
  Json,
  Xml,
}

/// Accepted request content types, matched on the lowercased mime essence.
const BODY_FORMATS: [(&str, BodyFormat); 3] = [
  ("application/x-www-form-urlencoded", BodyFormat::UrlEncoded),
  ("application/json", BodyFormat::Json),
  ("application/xml", BodyFormat::Xml),
];

impl BodyFormat {
  pub fn from_content_type(content_type: &str) -> Option<BodyFormat> {
    let essence = mime_essence(content_type);

    BODY_FORMATS
      .iter()
      .find(|(mime, _)| *mime == essence)
      .map(|(_, format)| *format)
  }

  pub fn mime(&self) -> &'static str {
    match self {
      BodyFormat::UrlEncoded => "application/x-www-form-urlencoded",
      BodyFormat::Json => "application/json",
      BodyFormat::Xml => "application/xml",
    }
  }
}

/// Body as it will be sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedBody {
  Empty,
  Form(String),
  Json(Bytes),
  Xml(Bytes),
}

impl EncodedBody {
  pub fn content_type(&self) -> Option<&'static str> {
    match self {
      EncodedBody::Empty => None,
      EncodedBody::Form(_) => Some(BodyFormat::UrlEncoded.mime()),
      EncodedBody::Json(_) => Some(BodyFormat::Json.mime()),
      EncodedBody::Xml(_) => Some(BodyFormat::Xml.mime()),
    }
  }

  pub fn into_bytes(self) -> Option<Bytes> {
    match self {
      EncodedBody::Empty => None,
      EncodedBody::Form(form) => Some(Bytes::from(form)),
      EncodedBody::Json(bytes) | EncodedBody::Xml(bytes) => Some(bytes),
    }
  }
}

/// Decides how the inbound body travels upstream, or rejects the request.
pub fn negotiate(
  method: HttpMethod,
  content_type: Option<&str>,
  body: &Bytes,
) -> Result<EncodedBody, ProxyError> {
  match method {
    HttpMethod::Get => Ok(EncodedBody::Empty),
    HttpMethod::Head | HttpMethod::Options => Err(ProxyError::MethodNotSupported),
    HttpMethod::Post | HttpMethod::Put | HttpMethod::Delete => {
      let content_type = match content_type.map(str::trim) {
        Some(content_type) if !content_type.is_empty() => content_type,
        _ => return Err(ProxyError::MissingContentType),
      };

      if content_type.to_lowercase().contains("multipart") {
        return Err(ProxyError::MultipartNotSupported);
      }

      match BodyFormat::from_content_type(content_type) {
        Some(BodyFormat::UrlEncoded) => Ok(EncodedBody::Form(encode_pairs(&parse_form(body)))),
        Some(BodyFormat::Json) => Ok(encode_json(body)),
        Some(BodyFormat::Xml) => Ok(EncodedBody::Xml(body.clone())),
        None => Err(ProxyError::UnsupportedContentType(content_type.to_string())),
      }
    }
  }
}

/// Decodes an urlencoded body; a repeated field keeps its last value.
pub fn parse_form(body: &[u8]) -> BTreeMap<String, String> {
  url::form_urlencoded::parse(body).into_owned().collect()
}

fn encode_json(body: &Bytes) -> EncodedBody {
  if body.is_empty() {
    return EncodedBody::Empty;
  }

  match serde_json::from_slice::<serde_json::Value>(body).and_then(|value| serde_json::to_vec(&value)) {
    Ok(encoded) => EncodedBody::Json(Bytes::from(encoded)),
    Err(_) => EncodedBody::Json(body.clone()),
  }
}

pub(crate) fn mime_essence(content_type: &str) -> String {
  content_type
    .split(';')
    .next()
    .unwrap_or_default()
    .trim()
    .to_lowercase()
}
