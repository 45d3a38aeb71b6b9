//! Probe a URL through the guard.

use std::collections::BTreeMap;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Method, Response};
use serde::Serialize;

use crate::cli::icons::{arrow, error, success, warning};
use loopguard::guard::BlockedUrl;
use loopguard::http_client::ClientError;
use loopguard::{GuardConfig, GuardStats, HttpClient, Intervention, LoopGuard};

pub struct ProbeOptions {
    pub count: usize,
    pub interval: Duration,
    pub method: String,
    pub timeout: Duration,
    pub json: bool,
}

/// How a single probe request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Upstream(u16),
    Blocked,
    Loop,
    Failed,
}

impl Outcome {
    fn from_response(response: &Response) -> Self {
        match Intervention::from_response(response) {
            Some(Intervention::Loop) => Outcome::Loop,
            Some(Intervention::Blocked { .. }) => Outcome::Blocked,
            None => Outcome::Upstream(response.status().as_u16()),
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeSummary {
    url: String,
    sent: usize,
    upstream: BTreeMap<u16, usize>,
    loop_detected: usize,
    blocked: usize,
    failed: usize,
    /// 1-based index of the first request the guard refused.
    first_intervention: Option<usize>,
    stats: GuardStats,
    blocked_urls: Vec<BlockedUrl>,
}

impl ProbeSummary {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: Outcome) {
        self.sent += 1;
        match outcome {
            Outcome::Upstream(status) => *self.upstream.entry(status).or_default() += 1,
            Outcome::Blocked => self.blocked += 1,
            Outcome::Loop => self.loop_detected += 1,
            Outcome::Failed => self.failed += 1,
        }
        if matches!(outcome, Outcome::Blocked | Outcome::Loop) && self.first_intervention.is_none()
        {
            self.first_intervention = Some(self.sent);
        }
    }

    fn intercepted(&self) -> usize {
        self.blocked + self.loop_detected
    }
}

/// Send `count` requests to `url` and report what the guard did with them.
pub async fn cmd_probe(config: GuardConfig, url: &str, options: ProbeOptions) -> anyhow::Result<()> {
    let method = Method::from_bytes(options.method.to_uppercase().as_bytes())?;
    let guard = LoopGuard::new(config);
    guard.start();
    let client = HttpClient::new(guard.clone(), options.timeout)?;

    if guard.config().ignore.matches(url) {
        eprintln!(
            "{} URL matches the ignore-list; requests will not be guarded",
            warning()
        );
    }

    let pb = ProgressBar::new(options.count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("#>-"),
    );

    let mut summary = ProbeSummary::new(url);
    for i in 0..options.count {
        let outcome = match client.request(method.clone(), url, None).await {
            Ok(response) => Outcome::from_response(&response),
            Err(ClientError::Transport(e)) => {
                tracing::debug!("Request {} failed: {}", i + 1, e);
                Outcome::Failed
            }
            Err(e) => {
                pb.finish_and_clear();
                return Err(e.into());
            }
        };
        summary.record(outcome);
        pb.set_message(format!("{:?}", outcome));
        pb.inc(1);

        if i + 1 < options.count && !options.interval.is_zero() {
            tokio::time::sleep(options.interval).await;
        }
    }
    pb.finish_and_clear();

    summary.stats = guard.stats().await;
    summary.blocked_urls = guard.blocked_urls().await;
    guard.stop();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ProbeSummary) {
    let marker = if summary.intercepted() > 0 {
        warning()
    } else {
        success()
    };
    println!(
        "{} {} requests to {}",
        marker,
        summary.sent,
        style(&summary.url).cyan()
    );

    for (status, count) in &summary.upstream {
        println!("  {} upstream {}: {}", arrow(), status, count);
    }
    if summary.loop_detected > 0 {
        println!("  {} loop detected: {}", arrow(), summary.loop_detected);
    }
    if summary.blocked > 0 {
        println!("  {} blocked: {}", arrow(), summary.blocked);
    }
    if summary.failed > 0 {
        println!("  {} {} transport errors: {}", arrow(), error(), summary.failed);
    }
    if let Some(first) = summary.first_intervention {
        println!("  {} first intervention at request #{}", arrow(), first);
    }

    println!();
    println!("{}", style("Guard state").bold());
    println!("  Total requests:   {}", summary.stats.total_requests);
    println!("  Blocked URLs:     {}", summary.stats.blocked_urls);
    println!("  URLs with errors: {}", summary.stats.urls_with_errors);
    for blocked in &summary.blocked_urls {
        println!(
            "  {} {} ({}ms remaining)",
            arrow(),
            blocked.url,
            blocked.remaining_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopguard::http_client::{blocked_response, loop_response};

    #[test]
    fn test_outcome_classification() {
        assert_eq!(Outcome::from_response(&loop_response()), Outcome::Loop);
        assert_eq!(
            Outcome::from_response(&blocked_response(1_700_000_003_000, 3)),
            Outcome::Blocked
        );

        let upstream = http::Response::builder()
            .status(429)
            .body(Vec::new())
            .unwrap();
        assert_eq!(
            Outcome::from_response(&Response::from(upstream)),
            Outcome::Upstream(429)
        );
    }

    #[test]
    fn test_summary_tracks_first_intervention() {
        let mut summary = ProbeSummary::new("https://portal.example/api/widgets");
        for _ in 0..20 {
            summary.record(Outcome::Upstream(200));
        }
        summary.record(Outcome::Loop);
        summary.record(Outcome::Blocked);
        summary.record(Outcome::Failed);

        assert_eq!(summary.sent, 23);
        assert_eq!(summary.upstream[&200], 20);
        assert_eq!(summary.intercepted(), 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.first_intervention, Some(21));
    }
}
