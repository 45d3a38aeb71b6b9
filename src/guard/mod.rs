//! Request loop guard.
//!
//! Observes every outbound request, detects abusive repetition toward a
//! single URL, and temporarily blocks that URL while other traffic flows
//! normally. Repeated 429s or transport failures escalate to the same block.

mod clock;
mod credentials;
mod detect;
mod ignore;
mod maintenance;
mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{
    CredentialWiper, NoopWiper, SessionStore, DEFAULT_AUTH_COOKIES, DEFAULT_AUTH_KEYS,
};
pub use detect::{detect_loop, LoopReason};
pub use ignore::{IgnoreList, DEFAULT_IGNORE_PATTERNS};
pub use state::{
    remaining_secs, BlockedUrl, Escalation, EscalationCause, GuardState, GuardStats,
    RequestRecord, SweepReport,
};

use crate::config::GuardConfig;
use state::StateAdmission;

/// Outcome of checking a request before it is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Guard disabled or URL ignored; forward without observation.
    Bypass,
    /// Request recorded; forward and report the outcome.
    Forward,
    /// URL is under an active block; do not send.
    Blocked {
        blocked_until: i64,
        remaining_secs: u64,
    },
    /// Loop detected just now; URL blocked, do not send.
    LoopDetected {
        reason: LoopReason,
        blocked_until: i64,
    },
}

impl Admission {
    /// Whether the request should reach the transport.
    pub fn should_forward(&self) -> bool {
        matches!(self, Admission::Bypass | Admission::Forward)
    }

    /// Whether the transport outcome should be reported back.
    pub fn is_observed(&self) -> bool {
        matches!(self, Admission::Forward)
    }
}

pub(crate) struct GuardInner {
    config: GuardConfig,
    state: RwLock<GuardState>,
    enabled: AtomicBool,
    clock: Arc<dyn Clock>,
    wiper: Arc<dyn CredentialWiper>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl GuardInner {
    async fn sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        state.sweep(now, &self.config)
    }
}

impl Drop for GuardInner {
    fn drop(&mut self) {
        let slot = self.maintenance.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Builder for [`LoopGuard`].
pub struct LoopGuardBuilder {
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    wiper: Arc<dyn CredentialWiper>,
}

impl LoopGuardBuilder {
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn credential_wiper(mut self, wiper: impl CredentialWiper + 'static) -> Self {
        self.wiper = Arc::new(wiper);
        self
    }

    pub fn build(self) -> LoopGuard {
        let enabled = self.config.enabled;
        LoopGuard {
            inner: Arc::new(GuardInner {
                config: self.config,
                state: RwLock::new(GuardState::new()),
                enabled: AtomicBool::new(enabled),
                clock: self.clock,
                wiper: self.wiper,
                maintenance: Mutex::new(None),
            }),
        }
    }
}

/// Shared handle to one guard instance. Clones observe the same state.
#[derive(Clone)]
pub struct LoopGuard {
    inner: Arc<GuardInner>,
}

impl std::fmt::Debug for LoopGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopGuard")
            .field("enabled", &self.is_enabled())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl LoopGuard {
    /// Create a guard using the system clock and no credential wipe.
    pub fn new(config: GuardConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: GuardConfig) -> LoopGuardBuilder {
        LoopGuardBuilder {
            config,
            clock: Arc::new(SystemClock),
            wiper: Arc::new(NoopWiper),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.inner.config
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    fn is_ignored(&self, url: &str) -> bool {
        self.inner.config.ignore.matches(url)
    }

    /// Decide whether a request may be sent, recording it when it may.
    ///
    /// Block check, loop detection, and recording happen under one lock.
    pub async fn admit(&self, url: &str, method: &str) -> Admission {
        if !self.is_enabled() || self.is_ignored(url) {
            return Admission::Bypass;
        }

        let now = self.now();
        let decision = {
            let mut state = self.inner.state.write().await;
            state.admit(url, method, now, &self.inner.config)
        };

        match decision {
            StateAdmission::Forward => {
                debug!("Forwarding {} {}", method, url);
                Admission::Forward
            }
            StateAdmission::Blocked { blocked_until } => {
                let remaining_secs = remaining_secs(blocked_until, now);
                warn!("Request blocked: {} ({}s remaining)", url, remaining_secs);
                Admission::Blocked {
                    blocked_until,
                    remaining_secs,
                }
            }
            StateAdmission::LoopDetected {
                reason,
                blocked_until,
            } => {
                warn!("Request loop detected and blocked: {} ({})", url, reason);
                self.after_block(url);
                Admission::LoopDetected {
                    reason,
                    blocked_until,
                }
            }
        }
    }

    /// Report the status of a forwarded request.
    ///
    /// 429 counts toward the error threshold; any 2xx resets it.
    pub async fn observe_status(&self, url: &str, status: u16) {
        if !self.is_enabled() || self.is_ignored(url) {
            return;
        }

        if status == 429 {
            self.escalate(url, EscalationCause::RateLimited).await;
        } else if (200..300).contains(&status) {
            let mut state = self.inner.state.write().await;
            state.record_success(url);
        }
    }

    /// Report a transport failure for a forwarded request.
    pub async fn observe_failure(&self, url: &str) {
        if !self.is_enabled() || self.is_ignored(url) {
            return;
        }
        self.escalate(url, EscalationCause::TransportError).await;
    }

    async fn escalate(&self, url: &str, cause: EscalationCause) -> Escalation {
        let now = self.now();
        let escalation = {
            let mut state = self.inner.state.write().await;
            state.record_failure(url, now, &self.inner.config)
        };

        match escalation {
            Escalation::Counted { errors } => {
                debug!("{} consecutive {} for {}", errors, cause, url);
            }
            Escalation::Blocked { errors, .. } => {
                warn!(
                    "URL blocked after {} consecutive {}: {}",
                    errors, cause, url
                );
                self.after_block(url);
            }
        }
        escalation
    }

    /// Block a URL for the configured duration. Returns the expiry, or
    /// `None` for ignored URLs, which are never blocked.
    pub async fn block(&self, url: &str) -> Option<i64> {
        if self.is_ignored(url) {
            return None;
        }
        let now = self.now();
        let blocked_until = {
            let mut state = self.inner.state.write().await;
            state.block(url, now, &self.inner.config)
        };
        info!("Blocked {} until {}", url, blocked_until);
        self.after_block(url);
        Some(blocked_until)
    }

    /// Runs outside the state lock so the wiper may call back into the guard.
    fn after_block(&self, url: &str) {
        if self.inner.config.is_login_url(url) {
            warn!("Login endpoint blocked, wiping stored credentials");
            self.inner.wiper.wipe(url);
        }
    }

    /// Whether a URL is under an active block. Ignored URLs never are.
    pub async fn is_blocked(&self, url: &str) -> bool {
        if self.is_ignored(url) {
            return false;
        }
        let now = self.now();
        let mut state = self.inner.state.write().await;
        state.is_blocked(url, now).is_some()
    }

    /// Run loop detection for a URL against current history without recording.
    pub async fn detect_loop(&self, url: &str) -> Option<LoopReason> {
        if !self.is_enabled() || self.is_ignored(url) {
            return None;
        }
        let now = self.now();
        let state = self.inner.state.read().await;
        detect_loop(state.history(), url, now, &self.inner.config)
    }

    /// Clear history, blocks, and error counters.
    pub async fn force_reset(&self) {
        self.inner.state.write().await.reset();
        info!("Loop guard state reset");
    }

    /// Lift every block, keeping history and error counters.
    pub async fn clear_blocks(&self) {
        let cleared = self.inner.state.write().await.clear_blocks();
        info!("Cleared {} URL blocks", cleared);
    }

    pub async fn stats(&self) -> GuardStats {
        let now = self.now();
        self.inner.state.read().await.stats(now)
    }

    pub async fn blocked_urls(&self) -> Vec<BlockedUrl> {
        let now = self.now();
        self.inner.state.read().await.blocked_urls(now)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Toggle the guard. Disabling stops maintenance but keeps state.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if enabled {
            self.start();
        } else {
            self.stop();
        }
        if was != enabled {
            info!(
                "Loop guard {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    /// Start the maintenance sweep if enabled and not already running.
    pub fn start(&self) {
        if !self.is_enabled() {
            return;
        }
        let mut slot = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *slot = maintenance::spawn(Arc::downgrade(&self.inner), self.inner.config.sweep_interval);
    }

    /// Stop the maintenance sweep.
    pub fn stop(&self) {
        let mut slot = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    pub fn is_maintenance_running(&self) -> bool {
        self.inner
            .maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const START: i64 = 1_700_000_000_000;
    const WIDGETS: &str = "https://portal.example/api/widgets";
    const LOGIN: &str = "https://portal.example/api/auth/login";

    fn guard_with_clock() -> (LoopGuard, ManualClock) {
        let clock = ManualClock::new(START);
        let guard = LoopGuard::builder(GuardConfig::base_default())
            .clock(clock.clone())
            .build();
        (guard, clock)
    }

    #[tokio::test]
    async fn test_first_request_forwards() {
        let (guard, _) = guard_with_clock();
        assert_eq!(guard.admit(WIDGETS, "GET").await, Admission::Forward);
        assert_eq!(guard.stats().await.total_requests, 1);
    }

    #[tokio::test]
    async fn test_ignored_urls_never_recorded_or_blocked() {
        let (guard, _) = guard_with_clock();
        let health = "https://portal.example/api/health";
        for _ in 0..100 {
            assert_eq!(guard.admit(health, "GET").await, Admission::Bypass);
            guard.observe_status(health, 429).await;
        }
        assert_eq!(guard.block(health).await, None);
        assert!(!guard.is_blocked(health).await);
        assert_eq!(guard.detect_loop(health).await, None);
        assert_eq!(guard.stats().await, GuardStats::default());
    }

    #[tokio::test]
    async fn test_rapid_requests_trip_uniform_rule() {
        let (guard, clock) = guard_with_clock();
        for _ in 0..5 {
            assert_eq!(guard.admit(WIDGETS, "GET").await, Admission::Forward);
            clock.advance(Duration::from_millis(10));
        }
        match guard.admit(WIDGETS, "GET").await {
            Admission::LoopDetected { reason, .. } => {
                assert!(matches!(reason, LoopReason::UniformInterval { count: 5, .. }));
            }
            other => panic!("expected loop, got {:?}", other),
        }
        assert!(guard.is_blocked(WIDGETS).await);
    }

    #[tokio::test]
    async fn test_remaining_time_counts_down_then_recovers() {
        let (guard, clock) = guard_with_clock();
        guard.block(WIDGETS).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            match guard.admit(WIDGETS, "GET").await {
                Admission::Blocked { remaining_secs, .. } => seen.push(remaining_secs),
                other => panic!("expected block, got {:?}", other),
            }
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(seen, vec![3, 2, 1]);

        // Block has elapsed; evaluated normally
        assert_eq!(guard.admit(WIDGETS, "GET").await, Admission::Forward);
    }

    #[tokio::test]
    async fn test_blocks_are_per_url() {
        let (guard, _) = guard_with_clock();
        guard.block(WIDGETS).await;
        assert!(guard.is_blocked(WIDGETS).await);
        assert_eq!(
            guard.admit("https://portal.example/api/courses", "GET").await,
            Admission::Forward
        );
    }

    #[tokio::test]
    async fn test_429_escalation_and_reset() {
        let (guard, _) = guard_with_clock();
        for _ in 0..9 {
            guard.observe_status(WIDGETS, 429).await;
        }
        guard.observe_status(WIDGETS, 200).await;
        assert_eq!(guard.stats().await.urls_with_errors, 0);
        for _ in 0..9 {
            guard.observe_failure(WIDGETS).await;
        }
        assert!(!guard.is_blocked(WIDGETS).await);

        guard.observe_status(WIDGETS, 429).await;
        assert!(guard.is_blocked(WIDGETS).await);
    }

    #[tokio::test]
    async fn test_non_success_statuses_do_not_reset() {
        let (guard, _) = guard_with_clock();
        guard.observe_status(WIDGETS, 429).await;
        guard.observe_status(WIDGETS, 500).await;
        guard.observe_status(WIDGETS, 304).await;
        assert_eq!(guard.stats().await.urls_with_errors, 1);
    }

    #[tokio::test]
    async fn test_login_block_wipes_credentials() {
        let wipes = Arc::new(AtomicUsize::new(0));
        let counter = wipes.clone();
        let guard = LoopGuard::builder(GuardConfig::base_default())
            .clock(ManualClock::new(START))
            .credential_wiper(move |_: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        guard.block(WIDGETS).await;
        assert_eq!(wipes.load(Ordering::SeqCst), 0);

        guard.block(LOGIN).await;
        assert_eq!(wipes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_loop_clears_session_store() {
        let store = SessionStore::new();
        store.set_local("token", "stale");
        let clock = ManualClock::new(START);
        let guard = LoopGuard::builder(GuardConfig::base_default())
            .clock(clock.clone())
            .credential_wiper(store.clone())
            .build();

        for _ in 0..5 {
            guard.admit(LOGIN, "POST").await;
            clock.advance(Duration::from_millis(5));
        }
        assert!(matches!(
            guard.admit(LOGIN, "POST").await,
            Admission::LoopDetected { .. }
        ));
        assert_eq!(store.token(), None);
    }

    #[tokio::test]
    async fn test_disabled_guard_is_transparent() {
        let (guard, _) = guard_with_clock();
        guard.set_enabled(false);
        for _ in 0..100 {
            assert_eq!(guard.admit(WIDGETS, "GET").await, Admission::Bypass);
            guard.observe_failure(WIDGETS).await;
        }
        assert_eq!(guard.detect_loop(WIDGETS).await, None);
        assert_eq!(guard.stats().await, GuardStats::default());
    }

    #[tokio::test]
    async fn test_disable_keeps_state() {
        let (guard, _) = guard_with_clock();
        guard.admit(WIDGETS, "GET").await;
        guard.block(WIDGETS).await;
        guard.set_enabled(false);
        let stats = guard.stats().await;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.blocked_urls, 1);
    }

    #[tokio::test]
    async fn test_force_reset_and_clear_blocks() {
        let (guard, _) = guard_with_clock();
        guard.admit(WIDGETS, "GET").await;
        guard.observe_status(WIDGETS, 429).await;
        guard.block(WIDGETS).await;

        guard.clear_blocks().await;
        guard.clear_blocks().await;
        assert_eq!(
            guard.stats().await,
            GuardStats {
                total_requests: 1,
                blocked_urls: 0,
                urls_with_errors: 1,
            }
        );

        guard.force_reset().await;
        assert_eq!(guard.stats().await, GuardStats::default());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let (guard, _) = guard_with_clock();
        let other = guard.clone();
        other.block(WIDGETS).await;
        assert!(guard.is_blocked(WIDGETS).await);
        assert_eq!(guard.blocked_urls().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_sweeps_on_interval() {
        let (guard, clock) = guard_with_clock();
        guard.observe_status(WIDGETS, 429).await;
        guard.admit(WIDGETS, "GET").await;
        guard.start();
        assert!(guard.is_maintenance_running());

        clock.advance(Duration::from_secs(2 * 60 * 60));
        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;

        assert_eq!(guard.stats().await, GuardStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_enabled_controls_maintenance() {
        let (guard, _) = guard_with_clock();
        guard.start();
        assert!(guard.is_maintenance_running());

        guard.set_enabled(false);
        assert!(!guard.is_maintenance_running());

        // Starting while disabled is a no-op
        guard.start();
        assert!(!guard.is_maintenance_running());

        guard.set_enabled(true);
        assert!(guard.is_maintenance_running());
    }

    #[test]
    fn test_start_without_runtime_does_not_panic() {
        let guard = LoopGuard::new(GuardConfig::base_default());
        guard.start();
        assert!(!guard.is_maintenance_running());
    }
}
