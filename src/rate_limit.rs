//! Per-client fixed-window request budget.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::AppState;
use crate::config::RateLimitConfig;
use crate::error::BridgeError;

/// Outcome of [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
struct RateRecord {
    count: u32,
    window_reset: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    capacity: u32,
    records: Mutex<HashMap<String, RateRecord>>,
}

impl RateLimiter {
    pub fn new(window: Duration, capacity: u32) -> Self {
        Self {
            window,
            capacity,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.window(), config.max_requests)
    }

    pub fn admit(&self, client_id: &str) -> Admission {
        self.admit_at(client_id, Instant::now())
    }

    pub fn admit_at(&self, client_id: &str, now: Instant) -> Admission {
        let mut records = self.lock();

        match records.get_mut(client_id) {
            Some(record) if now <= record.window_reset => {
                if record.count < self.capacity {
                    record.count += 1;
                    Admission::Allowed
                } else {
                    Admission::Denied {
                        retry_after_secs: retry_after_secs(record.window_reset - now),
                    }
                }
            }
            _ => {
                records.insert(
                    client_id.to_string(),
                    RateRecord {
                        count: 1,
                        window_reset: now + self.window,
                    },
                );
                Admission::Allowed
            }
        }
    }

    /// Drop every record whose window has passed. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| now <= record.window_reset);
        before - records.len()
    }

    pub fn reset(&self, client_id: &str) {
        self.lock().remove(client_id);
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RateRecord>> {
        // A poisoned map only holds counters; keep serving with its contents.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sweep expired records on a fixed interval, independent of traffic.
pub fn spawn_cleanup(limiter: Arc<RateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = limiter.cleanup();
            if removed > 0 {
                debug!("Rate limiter sweep removed {} expired client(s)", removed);
            }
        }
    })
}

/// Whole seconds until `remaining` elapses, rounded up and never zero.
fn retry_after_secs(remaining: Duration) -> u64 {
    remaining.as_millis().div_ceil(1000).max(1) as u64
}

/// Client identity: first `X-Forwarded-For` hop, else the peer address.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    match (forwarded, peer) {
        (Some(hop), _) => hop.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Middleware rejecting over-budget clients with 429.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_id(request.headers(), peer);

    match state.rate_limiter.admit(&client) {
        Admission::Allowed => {
            debug!("Admitted request from {}", client);
            next.run(request).await
        }
        Admission::Denied { retry_after_secs } => {
            warn!(
                "Rate limit exceeded for {} on {}, retry after {}s",
                client,
                request.uri().path(),
                retry_after_secs
            );
            BridgeError::RateLimited { retry_after_secs }.into_response()
        }
    }
}
