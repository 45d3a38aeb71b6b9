//! Loop detection heuristics.
//!
//! Rules are evaluated per URL in a fixed order and the first match wins:
//! burst (too many in the short window), sustained (too many in the long
//! window), and uniform interval (many requests with a tiny mean gap, the
//! signature of a synchronous retry loop rather than organic bursts).

use std::collections::VecDeque;
use std::fmt;

use super::state::RequestRecord;
use crate::config::{duration_ms, GuardConfig};

/// Why a URL was classified as looping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopReason {
    /// Too many requests within the burst window.
    Burst { count: usize },
    /// Too many requests within the sustained window.
    Sustained { count: usize },
    /// Burst-window requests arriving with a suspiciously small mean gap.
    UniformInterval { count: usize, mean_gap_ms: f64 },
}

impl fmt::Display for LoopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopReason::Burst { count } => write!(f, "{} requests in burst window", count),
            LoopReason::Sustained { count } => {
                write!(f, "{} requests in sustained window", count)
            }
            LoopReason::UniformInterval { count, mean_gap_ms } => write!(
                f,
                "{} requests with mean interval {:.1}ms",
                count, mean_gap_ms
            ),
        }
    }
}

/// Classify recent traffic to `url` against the configured rules.
///
/// Does not modify the history.
pub fn detect_loop(
    history: &VecDeque<RequestRecord>,
    url: &str,
    now_ms: i64,
    config: &GuardConfig,
) -> Option<LoopReason> {
    let burst_window_ms = duration_ms(config.burst_window);
    let sustained_window_ms = duration_ms(config.sustained_window);

    let same_url = || history.iter().filter(|r| r.url == url);

    let burst: Vec<i64> = same_url()
        .filter(|r| now_ms.saturating_sub(r.timestamp_ms) < burst_window_ms)
        .map(|r| r.timestamp_ms)
        .collect();

    if burst.len() >= config.burst_threshold {
        return Some(LoopReason::Burst { count: burst.len() });
    }

    let sustained = same_url()
        .filter(|r| now_ms.saturating_sub(r.timestamp_ms) < sustained_window_ms)
        .count();

    if sustained >= config.sustained_threshold {
        return Some(LoopReason::Sustained { count: sustained });
    }

    if burst.len() >= config.uniform_min_samples && burst.len() >= 2 {
        let total_gap: i64 = burst.windows(2).map(|w| w[1] - w[0]).sum();
        let mean_gap_ms = total_gap as f64 / (burst.len() - 1) as f64;
        if mean_gap_ms < config.uniform_max_mean_gap.as_millis() as f64 {
            return Some(LoopReason::UniformInterval {
                count: burst.len(),
                mean_gap_ms,
            });
        }
    }

    None
}
