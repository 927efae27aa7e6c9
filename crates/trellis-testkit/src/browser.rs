// crates/trellis-testkit/src/browser.rs
// ============================================================================
// Module: Test Browser
// Description: Blocking HTTP client that keeps cookies between requests.
// Purpose: Drive a running test server the way a browser session would.
// Dependencies: reqwest, serde, url
// ============================================================================

//! ## Overview
//! [`TestBrowser`] wraps a blocking `reqwest` client with a shared cookie jar,
//! so a session cookie issued by one response is sent with every later
//! request. Request timeouts default to 30 seconds and are raised by
//! `TRELLIS_TEST_TIMEOUT_SEC`. After [`TestBrowser::shutdown`] every request
//! fails with [`BrowserError::Closed`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::cookie::CookieStore;
use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::timeouts::DEFAULT_TIMEOUT;
use crate::timeouts::TimeoutError;
use crate::timeouts::resolve_timeout;

// ============================================================================
// SECTION: Responses
// ============================================================================

/// Buffered HTTP response.
#[derive(Debug, Clone)]
pub struct BrowserResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body as text.
    pub body: String,
}

impl BrowserResponse {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns a header value when present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

// ============================================================================
// SECTION: Browser
// ============================================================================

/// Cookie-persisting HTTP client for tests.
pub struct TestBrowser {
    /// Client; `None` once shut down.
    client: Option<Client>,
    /// Cookie jar shared with the client.
    jar: Arc<Jar>,
    /// Effective request timeout.
    timeout: Duration,
}

impl TestBrowser {
    /// Creates a browser with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] when the timeout override is invalid or the
    /// client cannot be built.
    pub fn new() -> Result<Self, BrowserError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a browser with a specific request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] when the timeout override is invalid or the
    /// client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, BrowserError> {
        let timeout = resolve_timeout(timeout)?;
        let jar = Arc::new(Jar::default());
        let client = build_client(&jar, timeout)?;
        Ok(Self {
            client: Some(client),
            jar,
            timeout,
        })
    }

    /// Returns the effective request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true once the browser has been shut down.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.client.is_none()
    }

    /// Issues a GET and returns the body regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] when the URL is invalid or the request fails.
    pub fn get_text(&self, url: &str) -> Result<String, BrowserError> {
        Ok(self.get(url)?.body)
    }

    /// Issues a GET with extra request headers and returns the body.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] when the URL is invalid or the request fails.
    pub fn get_text_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<String, BrowserError> {
        let mut request = self.client()?.get(parse_url(url)?);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        Ok(send(url, request)?.body)
    }

    /// Issues a GET and decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Decode`] when the body is not the expected JSON.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BrowserError> {
        let response = self.get(url)?;
        serde_json::from_str(&response.body).map_err(|err| BrowserError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }

    /// Issues a GET and returns the full response.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] when the URL is invalid or the request fails.
    pub fn get(&self, url: &str) -> Result<BrowserResponse, BrowserError> {
        let request = self.client()?.get(parse_url(url)?);
        send(url, request)
    }

    /// Posts URL-encoded form fields.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] when the URL is invalid or the request fails.
    pub fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<BrowserResponse, BrowserError> {
        let request = self.client()?.post(parse_url(url)?).form(&fields);
        send(url, request)
    }

    /// Posts a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] when the URL is invalid or the request fails.
    pub fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<BrowserResponse, BrowserError> {
        let request = self.client()?.post(parse_url(url)?).json(body);
        send(url, request)
    }

    /// Returns the cookies the browser would send to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::InvalidUrl`] when `url` cannot be parsed.
    pub fn cookies(&self, url: &str) -> Result<BTreeMap<String, String>, BrowserError> {
        let url = parse_url(url)?;
        let Some(header) = self.jar.cookies(&url) else {
            return Ok(BTreeMap::new());
        };
        let header = header.to_str().unwrap_or_default();
        Ok(header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }

    /// Returns one cookie the browser would send to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::InvalidUrl`] when `url` cannot be parsed.
    pub fn cookie(&self, url: &str, name: &str) -> Result<Option<String>, BrowserError> {
        Ok(self.cookies(url)?.remove(name))
    }

    /// Forgets every stored cookie.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] when the browser is closed or the client
    /// cannot be rebuilt.
    pub fn clear_cookies(&mut self) -> Result<(), BrowserError> {
        if self.client.is_none() {
            return Err(BrowserError::Closed);
        }
        let jar = Arc::new(Jar::default());
        self.client = Some(build_client(&jar, self.timeout)?);
        self.jar = jar;
        Ok(())
    }

    /// Releases the client. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn shutdown(&mut self) -> Result<(), BrowserError> {
        self.client = None;
        Ok(())
    }

    /// Returns the live client.
    fn client(&self) -> Result<&Client, BrowserError> {
        self.client.as_ref().ok_or(BrowserError::Closed)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a client bound to `jar`.
fn build_client(jar: &Arc<Jar>, timeout: Duration) -> Result<Client, BrowserError> {
    Client::builder()
        .cookie_provider(Arc::clone(jar))
        .timeout(timeout)
        .build()
        .map_err(|err| BrowserError::Setup(err.to_string()))
}

/// Parses `url`, mapping failures to [`BrowserError::InvalidUrl`].
fn parse_url(url: &str) -> Result<Url, BrowserError> {
    Url::parse(url).map_err(|err| BrowserError::InvalidUrl {
        url: url.to_string(),
        message: err.to_string(),
    })
}

/// Sends `request` and buffers the response.
fn send(url: &str, request: RequestBuilder) -> Result<BrowserResponse, BrowserError> {
    let request_error = |err: reqwest::Error| BrowserError::Request {
        url: url.to_string(),
        message: err.to_string(),
    };
    let response = request.send().map_err(request_error)?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.text().map_err(request_error)?;
    Ok(BrowserResponse {
        status,
        headers,
        body,
    })
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Browser errors.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The browser was shut down.
    #[error("browser is closed")]
    Closed,
    /// The URL could not be parsed.
    #[error("invalid url {url}: {message}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Parser message.
        message: String,
    },
    /// The request could not be sent or its body read.
    #[error("request to {url} failed: {message}")]
    Request {
        /// Requested URL.
        url: String,
        /// Client message.
        message: String,
    },
    /// The response body was not the expected JSON.
    #[error("response from {url} is not the expected json: {message}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Decoder message.
        message: String,
    },
    /// The HTTP client could not be built.
    #[error("http client setup failed: {0}")]
    Setup(String),
    /// The timeout override is invalid.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}
