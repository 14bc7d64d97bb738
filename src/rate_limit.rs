use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actix_web::HttpRequest;
use dashmap::DashMap;

/// Bucket shared by every client we cannot identify.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { base: Instant::now(), offset: Mutex::new(Duration::ZERO) }
    }

    pub fn advance(&self, by: Duration) {
        let mut off = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *off += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = *self.offset.lock().unwrap_or_else(|p| p.into_inner());
        self.base + off
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
}

/// Fixed-window counter keyed by client (pod local, never evicted).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, WindowEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { store: Arc::new(DashMap::new()), clock }
    }

    /// Count this request against `key` and report whether it is within
    /// `limit`. The shard lock is held across update and decision.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> bool {
        let now = self.clock.now();
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert(WindowEntry { count: 0, window_start: now });
        if now.saturating_duration_since(entry.window_start) > window {
            *entry = WindowEntry { count: 1, window_start: now };
        } else {
            entry.count = entry.count.saturating_add(1);
        }
        entry.count <= limit
    }

    pub fn tracked_clients(&self) -> usize {
        self.store.len()
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub health_limit: u32,
    pub health_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { health_limit: 10, health_window: Duration::from_secs(60) }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn u32_env(name: &str, default: u32) -> u32 { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            health_limit: u32_env("HEALTH_RL_LIMIT", 10),
            health_window: dur_env("HEALTH_RL_WINDOW", 60),
        }
    }
}

/// Limiter plus its limits, as handed to the health route.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn admit(&self, client: &str) -> bool { self.limiter.check(client, self.cfg.health_limit, self.cfg.health_window) }
    pub fn retry_after_secs(&self) -> u64 { self.cfg.health_window.as_secs() }
}

/// First `X-Forwarded-For` entry, else the peer address, else the shared
/// unknown bucket.
pub fn client_key(req: &HttpRequest) -> String {
    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(first) = forwarded {
        return first.to_string();
    }
    req.peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn limiter() -> (InMemoryRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (InMemoryRateLimiter::with_clock(clock.clone()), clock)
    }

    #[test]
    fn fixed_window_basic() {
        let (rl, _) = limiter();
        let window = Duration::from_secs(60);
        for _ in 0..3 { assert!(rl.check("k", 3, window)); }
        assert!(!rl.check("k", 3, window));
        assert!(rl.check("other", 3, window));
    }

    #[test]
    fn window_resets_only_after_strictly_exceeding() {
        let (rl, clock) = limiter();
        let window = Duration::from_secs(60);
        assert!(rl.check("k", 1, window));
        clock.advance(Duration::from_secs(60));
        assert!(!rl.check("k", 1, window));
        clock.advance(Duration::from_millis(1));
        assert!(rl.check("k", 1, window));
    }

    #[test]
    fn concurrent_burst_admits_exactly_limit() {
        let (rl, _) = limiter();
        let window = Duration::from_secs(60);
        let results: Vec<bool> = std::thread::scope(|s| {
            let hs: Vec<_> = (0..32).map(|_| s.spawn(|| rl.check("burst", 10, window))).collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|a| **a).count(), 10);
    }

    #[test]
    fn client_key_prefers_forwarded_for() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", " 203.0.113.7 , 10.0.0.1"))
            .peer_addr("192.0.2.1:5555".parse().unwrap())
            .to_http_request();
        assert_eq!(client_key(&req), "203.0.113.7");
    }

    #[test]
    fn client_key_falls_back_to_peer_then_unknown() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "  "))
            .peer_addr("192.0.2.1:5555".parse().unwrap())
            .to_http_request();
        assert_eq!(client_key(&req), "192.0.2.1");
        let req = TestRequest::default().to_http_request();
        assert_eq!(client_key(&req), UNKNOWN_CLIENT);
    }
}
