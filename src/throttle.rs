use crate::error::ProxyError;
use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{web, Error, ResponseError};
use dashmap::DashMap;
use log::warn;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

const CLEANUP_THRESHOLD: usize = 1000;
const LOCALHOST: &str = "localhost";
/// Bucket key when all clients share one bucket.
const SHARED_BUCKET: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleLimits {
  pub burst: u32,
  pub rate: f64,
}

impl ThrottleLimits {
  pub fn is_unlimited(&self) -> bool {
    self.burst == 0 && self.rate == 0.0
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleSettings {
  pub limits: ThrottleLimits,
  pub per_ip: bool,
  pub overrides: HashMap<String, ThrottleLimits>,
}

struct Bucket {
  tokens: f64,
  refilled_at: Instant,
}

/// Token buckets keyed by client address.
pub struct Throttle {
  settings: ThrottleSettings,
  buckets: DashMap<IpAddr, Bucket>,
}

impl Throttle {
  pub fn new(settings: ThrottleSettings) -> Self {
    Throttle {
      settings,
      buckets: DashMap::new(),
    }
  }

  pub fn admit(&self, peer: Option<IpAddr>) -> bool {
    self.admit_at(peer, Instant::now())
  }

  fn admit_at(&self, peer: Option<IpAddr>, now: Instant) -> bool {
    let limits = match peer {
      Some(ip) => self.limits_for(ip),
      None => self.settings.limits,
    };

    if limits.is_unlimited() {
      return true;
    }

    let key = match peer {
      Some(ip) if self.settings.per_ip => ip,
      _ => SHARED_BUCKET,
    };

    self.cleanup_if_needed(now);

    let capacity = f64::from(limits.burst);
    let mut bucket = self.buckets.entry(key).or_insert(Bucket {
      tokens: capacity,
      refilled_at: now,
    });

    let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
    bucket.tokens = (bucket.tokens + elapsed * limits.rate).min(capacity);
    bucket.refilled_at = now;

    if bucket.tokens < 1.0 {
      return false;
    }

    bucket.tokens -= 1.0;
    true
  }

  fn limits_for(&self, ip: IpAddr) -> ThrottleLimits {
    let overrides = &self.settings.overrides;

    overrides
      .get(&ip.to_string())
      .or_else(|| ip.is_loopback().then(|| overrides.get(LOCALHOST)).flatten())
      .copied()
      .unwrap_or(self.settings.limits)
  }

  /// Forgets buckets that have refilled completely.
  fn cleanup_if_needed(&self, now: Instant) {
    if self.buckets.len() > CLEANUP_THRESHOLD {
      let limits = self.settings.limits;
      self.buckets.retain(|_, bucket| {
        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens + elapsed * limits.rate < f64::from(limits.burst)
      });
    }
  }
}

/// Rejects a request with 429 when its client has no token left.
/// Requests pass untouched when no `web::Data<Throttle>` is registered.
pub async fn throttle_requests<B: MessageBody>(
  req: ServiceRequest,
  next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
  let peer = req.peer_addr().map(|addr| addr.ip());
  let admitted = req
    .app_data::<web::Data<Throttle>>()
    .map_or(true, |throttle| throttle.admit(peer));

  if !admitted {
    warn!("Throttled {} {} from {:?}", req.method(), req.path(), peer);
    let response = ProxyError::Throttled.error_response();
    return Ok(req.into_response(response).map_into_right_body());
  }

  next.call(req).await.map(ServiceResponse::map_into_left_body)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::Ipv6Addr;
  use std::time::Duration;

  fn throttle(burst: u32, rate: f64, per_ip: bool) -> Throttle {
    let mut overrides = HashMap::new();
    overrides.insert(LOCALHOST.to_string(), ThrottleLimits { burst: 0, rate: 0.0 });
    overrides.insert("10.0.0.9".to_string(), ThrottleLimits { burst: 5, rate: 0.0 });

    Throttle::new(ThrottleSettings {
      limits: ThrottleLimits { burst, rate },
      per_ip,
      overrides,
    })
  }

  fn ip(last: u8) -> Option<IpAddr> {
    Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
  }

  #[test]
  fn rejects_once_burst_is_spent() {
    let throttle = throttle(3, 0.5, true);
    let now = Instant::now();

    for _ in 0..3 {
      assert!(throttle.admit_at(ip(1), now));
    }
    assert!(!throttle.admit_at(ip(1), now));
  }

  #[test]
  fn refills_at_rate() {
    let throttle = throttle(1, 0.5, true);
    let now = Instant::now();

    assert!(throttle.admit_at(ip(1), now));
    assert!(!throttle.admit_at(ip(1), now + Duration::from_secs(1)));
    assert!(throttle.admit_at(ip(1), now + Duration::from_secs(2)));
  }

  #[test]
  fn buckets_are_per_client_address() {
    let throttle = throttle(1, 0.0, true);
    let now = Instant::now();

    assert!(throttle.admit_at(ip(1), now));
    assert!(!throttle.admit_at(ip(1), now));
    assert!(throttle.admit_at(ip(2), now));
  }

  #[test]
  fn shared_bucket_when_not_per_ip() {
    let throttle = throttle(1, 0.0, false);
    let now = Instant::now();

    assert!(throttle.admit_at(ip(1), now));
    assert!(!throttle.admit_at(ip(2), now));
    assert!(!throttle.admit_at(None, now));
  }

  #[test]
  fn overrides_replace_limits() {
    let throttle = throttle(1, 0.0, true);
    let now = Instant::now();

    for _ in 0..50 {
      assert!(throttle.admit_at(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), now));
      assert!(throttle.admit_at(Some(IpAddr::V6(Ipv6Addr::LOCALHOST)), now));
    }

    for _ in 0..5 {
      assert!(throttle.admit_at(ip(9), now));
    }
    assert!(!throttle.admit_at(ip(9), now));
  }
}
