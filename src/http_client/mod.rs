//! HTTP client with request loop protection.

mod response;
mod transport;

pub use response::{
    blocked_response, loop_response, BlockedBody, Intervention, BLOCKED_UNTIL_HEADER,
    LOOP_DETECTED_HEADER,
};
pub use transport::{GuardedTransport, Transport};

use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Body, Client, Method, Request, Response};
use serde::Serialize;
use url::Url;

use crate::guard::{LoopGuard, SessionStore};

/// Default user agent for the built-in reqwest transport.
pub const USER_AGENT: &str = concat!("loopguard/", env!("CARGO_PKG_VERSION"));

/// Errors from [`HttpClient`] requests.
#[derive(Debug, thiserror::Error)]
pub enum ClientError<E: std::error::Error + 'static> {
    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("Failed to serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(E),
}

/// HTTP client whose every request passes through a [`LoopGuard`].
#[derive(Debug, Clone)]
pub struct HttpClient<T = Client> {
    transport: GuardedTransport<T>,
    session: Option<SessionStore>,
}

impl HttpClient<Client> {
    /// Create a client over reqwest with the given timeout.
    pub fn new(guard: LoopGuard, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()?;
        Ok(Self::with_transport(client, guard))
    }
}

impl<T: Transport> HttpClient<T> {
    /// Create a client over a custom transport.
    pub fn with_transport(transport: T, guard: LoopGuard) -> Self {
        Self {
            transport: GuardedTransport::new(transport, guard),
            session: None,
        }
    }

    /// Attach a session store; its token is sent as a bearer credential.
    pub fn with_session(mut self, session: SessionStore) -> Self {
        self.session = Some(session);
        self
    }

    pub fn guard(&self) -> &LoopGuard {
        self.transport.guard()
    }

    pub fn session(&self) -> Option<&SessionStore> {
        self.session.as_ref()
    }

    /// Send a prepared request through the guard.
    pub async fn send(&self, request: Request) -> Result<Response, ClientError<T::Error>> {
        self.transport
            .send(request)
            .await
            .map_err(ClientError::Transport)
    }

    /// Build and send a request with an optional body.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<(Vec<u8>, &'static str)>,
    ) -> Result<Response, ClientError<T::Error>> {
        let parsed = Url::parse(url).map_err(|source| ClientError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let mut request = Request::new(method, parsed);

        if let Some(token) = self.session.as_ref().and_then(|s| s.token()) {
            request.headers_mut().insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        if let Some((bytes, content_type)) = body {
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            *request.body_mut() = Some(Body::from(bytes));
        }

        self.send(request).await
    }

    pub async fn get(&self, url: &str) -> Result<Response, ClientError<T::Error>> {
        self.request(Method::GET, url, None).await
    }

    /// POST a JSON body.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<Response, ClientError<T::Error>> {
        let bytes = serde_json::to_vec(body)?;
        self.request(Method::POST, url, Some((bytes, "application/json")))
            .await
    }
}
