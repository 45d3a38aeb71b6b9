//! Guard state: request history, active blocks, and consecutive error counts.
//!
//! All operations take the current time explicitly so the state machine can
//! be driven deterministically; the owning [`LoopGuard`](super::LoopGuard)
//! supplies time from its clock.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::Serialize;

use super::detect::{detect_loop, LoopReason};
use crate::config::{duration_ms, GuardConfig};

/// One observed outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub url: String,
    pub method: String,
    /// Unix timestamp ms at capture time.
    pub timestamp_ms: i64,
}

impl RequestRecord {
    pub fn new(url: &str, method: &str, timestamp_ms: i64) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            timestamp_ms,
        }
    }
}

/// What fed a URL's consecutive error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationCause {
    /// Upstream answered 429.
    RateLimited,
    /// The transport failed before a response arrived.
    TransportError,
}

impl fmt::Display for EscalationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationCause::RateLimited => f.write_str("429 responses"),
            EscalationCause::TransportError => f.write_str("transport errors"),
        }
    }
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Counter incremented, still below threshold.
    Counted { errors: u32 },
    /// Threshold reached and the URL is now blocked.
    Blocked { errors: u32, blocked_until: i64 },
}

/// Snapshot of guard state sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStats {
    pub total_requests: usize,
    pub blocked_urls: usize,
    pub urls_with_errors: usize,
}

/// An active block, for operator inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedUrl {
    pub url: String,
    pub blocked_until: i64,
    pub remaining_ms: u64,
}

/// What a maintenance sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub records_pruned: usize,
    pub blocks_expired: usize,
    pub error_counters_cleared: usize,
}

/// Admission decision reached while holding the state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateAdmission {
    /// URL is under an active block.
    Blocked { blocked_until: i64 },
    /// Traffic pattern is a loop; the URL has just been blocked.
    LoopDetected {
        reason: LoopReason,
        blocked_until: i64,
    },
    /// Request recorded and may be forwarded.
    Forward,
}

/// Mutable guard state.
#[derive(Debug, Default)]
pub struct GuardState {
    requests: VecDeque<RequestRecord>,
    blocked_until: HashMap<String, i64>,
    consecutive_errors: HashMap<String, u32>,
}

impl GuardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a request against blocks and loop rules, recording it if it passes.
    pub fn admit(
        &mut self,
        url: &str,
        method: &str,
        now_ms: i64,
        config: &GuardConfig,
    ) -> StateAdmission {
        if let Some(blocked_until) = self.is_blocked(url, now_ms) {
            return StateAdmission::Blocked { blocked_until };
        }

        if let Some(reason) = detect_loop(&self.requests, url, now_ms, config) {
            let blocked_until = self.block(url, now_ms, config);
            return StateAdmission::LoopDetected {
                reason,
                blocked_until,
            };
        }

        self.record(url, method, now_ms, config);
        StateAdmission::Forward
    }

    /// Append a request record, dropping the oldest beyond capacity.
    pub fn record(&mut self, url: &str, method: &str, now_ms: i64, config: &GuardConfig) {
        self.requests.push_back(RequestRecord::new(url, method, now_ms));
        while self.requests.len() > config.history_capacity {
            self.requests.pop_front();
        }
    }

    /// Block a URL for the configured duration. Returns the expiry.
    pub fn block(&mut self, url: &str, now_ms: i64, config: &GuardConfig) -> i64 {
        let blocked_until = now_ms.saturating_add(duration_ms(config.block_duration));
        self.blocked_until.insert(url.to_string(), blocked_until);
        blocked_until
    }

    /// Expiry of an active block, removing the entry if it has lapsed.
    pub fn is_blocked(&mut self, url: &str, now_ms: i64) -> Option<i64> {
        let blocked_until = *self.blocked_until.get(url)?;
        if now_ms >= blocked_until {
            self.blocked_until.remove(url);
            return None;
        }
        Some(blocked_until)
    }

    /// Count a failure and block once the threshold is reached.
    pub fn record_failure(&mut self, url: &str, now_ms: i64, config: &GuardConfig) -> Escalation {
        let errors = {
            let counter = self.consecutive_errors.entry(url.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        if errors >= config.error_threshold {
            let blocked_until = self.block(url, now_ms, config);
            Escalation::Blocked {
                errors,
                blocked_until,
            }
        } else {
            Escalation::Counted { errors }
        }
    }

    /// Reset the consecutive error counter after a success.
    pub fn record_success(&mut self, url: &str) {
        self.consecutive_errors.remove(url);
    }

    pub fn error_count(&self, url: &str) -> u32 {
        self.consecutive_errors.get(url).copied().unwrap_or(0)
    }

    /// Prune stale history and expired blocks, and forget all error counts.
    pub fn sweep(&mut self, now_ms: i64, config: &GuardConfig) -> SweepReport {
        let cutoff = now_ms.saturating_sub(duration_ms(config.history_retention));

        let before = self.requests.len();
        self.requests.retain(|r| r.timestamp_ms > cutoff);
        let records_pruned = before - self.requests.len();

        let before = self.blocked_until.len();
        self.blocked_until.retain(|_, until| now_ms < *until);
        let blocks_expired = before - self.blocked_until.len();

        let error_counters_cleared = self.consecutive_errors.len();
        self.consecutive_errors.clear();

        SweepReport {
            records_pruned,
            blocks_expired,
            error_counters_cleared,
        }
    }

    /// Wipe history, blocks, and error counters.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.blocked_until.clear();
        self.consecutive_errors.clear();
    }

    /// Remove every block, keeping history and error counters.
    pub fn clear_blocks(&mut self) -> usize {
        let cleared = self.blocked_until.len();
        self.blocked_until.clear();
        cleared
    }

    /// Current sizes. Only unexpired blocks are counted.
    pub fn stats(&self, now_ms: i64) -> GuardStats {
        GuardStats {
            total_requests: self.requests.len(),
            blocked_urls: self
                .blocked_until
                .values()
                .filter(|until| now_ms < **until)
                .count(),
            urls_with_errors: self.consecutive_errors.values().filter(|c| **c > 0).count(),
        }
    }

    /// Unexpired blocks, soonest to expire first.
    pub fn blocked_urls(&self, now_ms: i64) -> Vec<BlockedUrl> {
        let mut blocked: Vec<BlockedUrl> = self
            .blocked_until
            .iter()
            .filter(|(_, until)| now_ms < **until)
            .map(|(url, until)| BlockedUrl {
                url: url.clone(),
                blocked_until: *until,
                remaining_ms: until.saturating_sub(now_ms) as u64,
            })
            .collect();
        blocked.sort_by(|a, b| a.blocked_until.cmp(&b.blocked_until).then(a.url.cmp(&b.url)));
        blocked
    }

    pub fn history(&self) -> &VecDeque<RequestRecord> {
        &self.requests
    }
}

/// Whole seconds remaining until `blocked_until`, rounded up.
pub fn remaining_secs(blocked_until: i64, now_ms: i64) -> u64 {
    let remaining_ms = blocked_until.saturating_sub(now_ms).max(0) as u64;
    remaining_ms.div_ceil(1000)
}
