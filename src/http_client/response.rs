//! Synthetic responses for short-circuited requests.
//!
//! These are real `reqwest::Response` values so callers handle them like any
//! other 429: status, headers, and a JSON body.

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};

/// Header carrying the block expiry (Unix ms) on blocked responses.
pub const BLOCKED_UNTIL_HEADER: &str = "x-blocked-until";

/// Header marking a response produced by fresh loop detection.
pub const LOOP_DETECTED_HEADER: &str = "x-loop-detected";

/// JSON body of a synthetic 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedBody {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_blocked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_loop: Option<bool>,
    /// Seconds until the block lifts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<u64>,
}

/// Response for a request to a URL that is already blocked.
pub fn blocked_response(blocked_until: i64, remaining_secs: u64) -> Response {
    let body = BlockedBody {
        success: false,
        message: format!(
            "Request temporarily blocked. Retry in {} seconds.",
            remaining_secs
        ),
        is_blocked: Some(true),
        is_loop: None,
        remaining_time: Some(remaining_secs),
    };
    json_429(
        &body,
        [
            (
                HeaderName::from_static(BLOCKED_UNTIL_HEADER),
                HeaderValue::from(blocked_until),
            ),
            (RETRY_AFTER, HeaderValue::from(remaining_secs)),
        ],
    )
}

/// Response for a request that just tripped loop detection.
pub fn loop_response() -> Response {
    let body = BlockedBody {
        success: false,
        message: "Request loop detected and blocked.".to_string(),
        is_blocked: None,
        is_loop: Some(true),
        remaining_time: None,
    };
    json_429(
        &body,
        [(
            HeaderName::from_static(LOOP_DETECTED_HEADER),
            HeaderValue::from_static("true"),
        )],
    )
}

fn json_429<const N: usize>(body: &BlockedBody, headers: [(HeaderName, HeaderValue); N]) -> Response {
    let json = serde_json::to_vec(body).unwrap_or_default();
    let mut response = http::Response::new(json);
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let map = response.headers_mut();
    map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in headers {
        map.insert(name, value);
    }
    Response::from(response)
}

/// How the guard intervened in a response, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intervention {
    /// URL was already blocked; request never sent.
    Blocked {
        blocked_until: Option<i64>,
        retry_after_secs: Option<u64>,
    },
    /// Loop detected; request never sent.
    Loop,
}

impl Intervention {
    /// Classify a response. Real upstream 429s return `None`.
    pub fn from_response(response: &Response) -> Option<Self> {
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return None;
        }
        let headers = response.headers();
        let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        if header_str(LOOP_DETECTED_HEADER) == Some("true") {
            return Some(Intervention::Loop);
        }

        let blocked_until = header_str(BLOCKED_UNTIL_HEADER)?;
        Some(Intervention::Blocked {
            blocked_until: blocked_until.parse().ok(),
            retry_after_secs: header_str(RETRY_AFTER.as_str()).and_then(|v| v.parse().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocked_response_shape() {
        let response = blocked_response(1_700_000_003_000, 3);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.status().canonical_reason(),
            Some("Too Many Requests")
        );
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[BLOCKED_UNTIL_HEADER], "1700000003000");
        assert_eq!(response.headers()[RETRY_AFTER], "3");
        assert!(response.headers().get(LOOP_DETECTED_HEADER).is_none());

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "success": false,
                "message": "Request temporarily blocked. Retry in 3 seconds.",
                "isBlocked": true,
                "remainingTime": 3
            })
        );
    }

    #[tokio::test]
    async fn test_loop_response_shape() {
        let response = loop_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[LOOP_DETECTED_HEADER], "true");
        assert!(response.headers().get(RETRY_AFTER).is_none());

        let body: BlockedBody = response.json().await.unwrap();
        assert!(!body.success);
        assert_eq!(body.is_loop, Some(true));
        assert_eq!(body.is_blocked, None);
        assert_eq!(body.remaining_time, None);
    }

    #[test]
    fn test_intervention_classification() {
        assert_eq!(
            Intervention::from_response(&loop_response()),
            Some(Intervention::Loop)
        );
        assert_eq!(
            Intervention::from_response(&blocked_response(42, 2)),
            Some(Intervention::Blocked {
                blocked_until: Some(42),
                retry_after_secs: Some(2),
            })
        );

        // Upstream 429 with Retry-After is not a guard intervention
        let mut upstream = http::Response::new(Vec::<u8>::new());
        *upstream.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        upstream
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from_static("10"));
        assert_eq!(Intervention::from_response(&Response::from(upstream)), None);

        let ok = Response::from(http::Response::new(Vec::<u8>::new()));
        assert_eq!(Intervention::from_response(&ok), None);
    }
}
