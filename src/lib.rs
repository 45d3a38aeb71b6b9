//! loopguard - client-side HTTP request loop detection and circuit breaking.
//!
//! A [`LoopGuard`](guard::LoopGuard) watches outbound requests per URL,
//! blocks URLs that are hammered in a tight loop or keep failing, and answers
//! blocked calls with a synthetic 429 instead of touching the network.
//! [`HttpClient`](http_client::HttpClient) and
//! [`GuardedTransport`](http_client::GuardedTransport) wire it in front of
//! reqwest or any other [`Transport`](http_client::Transport).

pub mod config;
pub mod guard;
pub mod http_client;

pub use config::{ConfigError, ConfigFile, GuardConfig};
pub use guard::{Admission, GuardStats, LoopGuard, LoopReason};
pub use http_client::{GuardedTransport, HttpClient, Intervention, Transport};
