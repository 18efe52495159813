//! Admin gate for the reset endpoints: shared-secret token, literal
//! confirmation header, and a per-client rate limit. Everything here runs
//! before the orchestrator is touched.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::time::Duration;

use axum::http::HeaderMap;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter, clock::DefaultClock};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

type KeyedRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const CONFIRM_HEADER: &str = "x-confirm-reset";
pub const ADMIN_USER_HEADER: &str = "x-admin-user";

/// Literal value the confirmation header must carry.
pub const CONFIRM_VALUE: &str = "DELETE";
pub const DEFAULT_ADMIN_USER: &str = "admin";
pub const DEFAULT_RATE_LIMIT_PERIOD: Duration = Duration::from_secs(600);

/// Who passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub started_by: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    /// Missing or wrong token, or no token configured.
    Forbidden,
    /// Missing or wrong confirmation value.
    MissingConfirmation,
    RateLimited { retry_after_secs: u64 },
}

pub struct AdminGate {
    /// HMAC of the configured token under a per-process key; `None` when no
    /// token is configured, which rejects everything.
    token_tag: Option<Vec<u8>>,
    mac_key: [u8; 16],
    limiter: KeyedRateLimiter,
    trust_forwarded_headers: bool,
}

impl AdminGate {
    pub fn new(admin_token: Option<&str>, rate_limit_period: Duration) -> Self {
        let mac_key = *uuid::Uuid::new_v4().as_bytes();
        let token_tag = admin_token
            .filter(|t| !t.is_empty())
            .map(|t| tag(&mac_key, t.as_bytes()));
        // One permit per period, no burst. A zero period is rejected by config
        // validation; fall back to one per hour if one slips through.
        let quota = Quota::with_period(rate_limit_period)
            .unwrap_or_else(|| Quota::per_hour(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        Self {
            token_tag,
            mac_key,
            limiter: RateLimiter::keyed(quota),
            trust_forwarded_headers: false,
        }
    }

    /// Take the caller IP from `X-Forwarded-For`/`X-Real-IP`. Only safe when
    /// every request arrives through a proxy that sets those headers.
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    /// Caller IP the rate limit is keyed on: the forwarded address when
    /// forwarded headers are trusted, otherwise the socket peer, then
    /// `0.0.0.0`.
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
        if self.trust_forwarded_headers
            && let Some(ip) = forwarded_ip(headers)
        {
            return ip;
        }
        peer.map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// Number of clients currently tracked by the rate limiter.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Constant-time token check. Used alone by the read endpoints.
    pub fn check_token(&self, headers: &HeaderMap) -> Result<(), GateRejection> {
        let Some(expected) = &self.token_tag else {
            return Err(GateRejection::Forbidden);
        };
        let provided = headers
            .get(ADMIN_TOKEN_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        let mut mac = HmacSha256::new_from_slice(&self.mac_key).map_err(|_| GateRejection::Forbidden)?;
        mac.update(provided);
        mac.verify_slice(expected).map_err(|_| GateRejection::Forbidden)
    }

    /// Full trigger check: token, then confirmation, then rate limit. A
    /// request rejected by an earlier step never spends a rate-limit permit.
    pub fn check_trigger(
        &self,
        headers: &HeaderMap,
        client_ip: IpAddr,
    ) -> Result<AdminIdentity, GateRejection> {
        self.check_token(headers)?;

        let confirmed = headers
            .get(CONFIRM_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == CONFIRM_VALUE);
        if !confirmed {
            return Err(GateRejection::MissingConfirmation);
        }

        // Forget clients whose bucket has refilled.
        self.limiter.retain_recent();
        if let Err(not_until) = self.limiter.check_key(&client_ip) {
            let retry_after_secs = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1);
            return Err(GateRejection::RateLimited { retry_after_secs });
        }

        Ok(AdminIdentity {
            started_by: admin_user(headers),
            ip_address: client_ip.to_string(),
        })
    }
}

fn tag(key: &[u8], message: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn admin_user(headers: &HeaderMap) -> String {
    headers
        .get(ADMIN_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ADMIN_USER)
        .to_string()
}

/// Address appended by the nearest proxy: the last `X-Forwarded-For` entry,
/// then `X-Real-IP`. Earlier entries are whatever the client sent.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok())
        && let Some(last) = forwarded_for.rsplit(',').next()
        && let Ok(ip) = last.trim().parse()
    {
        return Some(ip);
    }
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|real_ip| real_ip.trim().parse().ok())
}
