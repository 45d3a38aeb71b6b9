//! Classify a URL against the guard configuration.

use console::style;

use crate::cli::icons::{arrow, success, warning};
use loopguard::{GuardConfig, LoopGuard};

pub async fn cmd_check(config: GuardConfig, url: &str) -> anyhow::Result<()> {
    let guard = LoopGuard::new(config);
    let config = guard.config();

    println!("{}", style(url).cyan());

    if !guard.is_enabled() {
        println!("  {} guard disabled, requests pass through", warning());
    }

    let matched: Vec<&str> = config
        .ignore
        .patterns()
        .iter()
        .map(String::as_str)
        .filter(|pattern| url.contains(pattern))
        .collect();
    if matched.is_empty() {
        println!("  {} guarded", success());
    } else {
        println!("  {} ignored (matches {})", warning(), matched.join(", "));
    }

    if config.is_login_url(url) {
        println!(
            "  {} login endpoint: a block here wipes stored credentials",
            warning()
        );
    }

    match guard.detect_loop(url).await {
        Some(reason) => println!("  {} loop detector: {}", warning(), reason),
        None => println!("  {} loop detector: no loop in a fresh guard", arrow()),
    }

    println!(
        "  {} loop after {} requests in {}ms, or {} in {}s",
        arrow(),
        config.burst_threshold,
        config.burst_window.as_millis(),
        config.sustained_threshold,
        config.sustained_window.as_secs()
    );
    println!(
        "  {} blocked for {}ms after a loop or {} consecutive errors",
        arrow(),
        config.block_duration.as_millis(),
        config.error_threshold
    );

    Ok(())
}
