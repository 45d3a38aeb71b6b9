//! Transport abstraction and the guard interceptor.

use async_trait::async_trait;
use reqwest::{Request, Response};

use super::response::{blocked_response, loop_response};
use crate::guard::{Admission, LoopGuard};

/// Something that turns a request into a response.
///
/// The guard sits between callers and a `Transport`, so every call site is
/// covered by configuring the client once.
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn send(&self, request: Request) -> Result<Response, Self::Error>;
}

#[async_trait]
impl Transport for reqwest::Client {
    type Error = reqwest::Error;

    async fn send(&self, request: Request) -> Result<Response, Self::Error> {
        self.execute(request).await
    }
}

/// Transport layer that runs every request through a [`LoopGuard`].
///
/// Blocked and looping requests get a synthetic 429 without touching the
/// inner transport. Real outcomes, including errors, are returned unchanged
/// after being reported to the guard.
#[derive(Debug, Clone)]
pub struct GuardedTransport<T> {
    inner: T,
    guard: LoopGuard,
}

impl<T: Transport> GuardedTransport<T> {
    pub fn new(inner: T, guard: LoopGuard) -> Self {
        Self { inner, guard }
    }

    pub fn guard(&self) -> &LoopGuard {
        &self.guard
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for GuardedTransport<T> {
    type Error = T::Error;

    async fn send(&self, request: Request) -> Result<Response, Self::Error> {
        let url = request.url().to_string();
        let method = request.method().to_string();

        match self.guard.admit(&url, &method).await {
            Admission::Bypass => return self.inner.send(request).await,
            Admission::Blocked {
                blocked_until,
                remaining_secs,
            } => return Ok(blocked_response(blocked_until, remaining_secs)),
            Admission::LoopDetected { .. } => return Ok(loop_response()),
            Admission::Forward => {}
        }

        match self.inner.send(request).await {
            Ok(response) => {
                self.guard
                    .observe_status(&url, response.status().as_u16())
                    .await;
                Ok(response)
            }
            Err(e) => {
                self.guard.observe_failure(&url).await;
                Err(e)
            }
        }
    }
}
