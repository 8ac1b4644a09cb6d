// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Rate Limiting
//!
//! Token buckets keyed by client address, with a separate budget per API
//! route. Registration is far stricter than the other signed routes.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Token bucket for rate limiting a single client.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: u32, refill_rate: f64) -> Self {
        TokenBucket {
            tokens: max_tokens as f64,
            max_tokens: max_tokens as f64,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_update = now;
    }

    /// Returns true if a token was consumed, false if rate limited.
    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter for multiple clients sharing one budget.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, TokenBucket>>,
    max_per_minute: u32,
}

impl RateLimiter {
    /// `max_per_minute` is the burst size and the per-minute refill.
    pub fn new(max_per_minute: u32) -> Self {
        RateLimiter {
            buckets: RwLock::new(HashMap::new()),
            max_per_minute,
        }
    }

    /// Tries to consume a token for this client.
    pub fn consume(&self, client_id: &str) -> bool {
        let mut buckets = self.buckets.write().unwrap();
        let bucket = buckets.entry(client_id.to_string()).or_insert_with(|| {
            TokenBucket::new(self.max_per_minute, self.max_per_minute as f64 / 60.0)
        });
        bucket.try_consume()
    }

    /// Removes buckets idle for at least `max_idle`. Returns the number removed.
    pub fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.write().unwrap();
        let now = Instant::now();
        let initial_count = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_update) < max_idle);
        initial_count - buckets.len()
    }

    pub fn client_count(&self) -> usize {
        self.buckets.read().unwrap().len()
    }
}

/// Per-route limiters with a shared fallback budget.
pub struct RouteLimits {
    routes: HashMap<&'static str, RateLimiter>,
    fallback: RateLimiter,
}

impl RouteLimits {
    pub fn new(default_per_minute: u32) -> Self {
        RouteLimits {
            routes: HashMap::new(),
            fallback: RateLimiter::new(default_per_minute),
        }
    }

    /// Gives `route` its own budget.
    pub fn with_route(mut self, route: &'static str, per_minute: u32) -> Self {
        self.routes.insert(route, RateLimiter::new(per_minute));
        self
    }

    pub fn consume(&self, route: &str, client_id: &str) -> bool {
        match self.routes.get(route) {
            Some(limiter) => limiter.consume(client_id),
            None => self.fallback.consume(&format!("{}|{}", route, client_id)),
        }
    }

    /// Buckets held across every route.
    pub fn client_count(&self) -> usize {
        self.routes
            .values()
            .map(|l| l.client_count())
            .sum::<usize>()
            + self.fallback.client_count()
    }

    pub fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        self.routes
            .values()
            .map(|l| l.cleanup_inactive(max_idle))
            .sum::<usize>()
            + self.fallback.cleanup_inactive(max_idle)
    }
}
