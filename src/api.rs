//! HTTP collaborator for the UNICEF SDMX warehouse.
//!
//! Thin blocking wrapper over `reqwest`: bounded retries with fixed backoff
//! for transient failures, and a typed classification of the outcome so the
//! fallback orchestrator never inspects message strings. Dataflow-level
//! fallback lives in `fetch`, not here.

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client as HttpClient;
use reqwest::redirect::Policy;
use thiserror::Error;

/// Base URL of the public UNICEF SDMX REST endpoint.
pub const BASE_URL: &str = "https://sdmx.data.unicef.org/ws/public/sdmxapi/rest";

/// SDMX agency identifier for the UNICEF warehouse.
pub const AGENCY: &str = "UNICEF";

/// Outcome classes a transport call can fail with.
#[derive(Debug, Error)]
pub enum FetchError {
    /// 404-class answer: the dataflow/indicator combination has no data.
    /// Eligible for dataflow fallback.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// Network error or 5xx that survived the retry budget.
    #[error("transport failure after {attempts} attempt(s): {reason}")]
    Transient { attempts: u32, reason: String },

    /// Any other non-2xx status. Propagated as-is, never retried here.
    #[error("request failed with HTTP {status}")]
    Status { status: u16 },
}

/// Issues GET requests and returns the body as text.
///
/// The trait seam exists so the orchestrator and the metadata store can be
/// exercised with canned payloads.
pub trait Transport {
    fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    max_retries: u32,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(3)
    }
}

impl HttpTransport {
    pub fn new(max_retries: u32) -> Self {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30)) // total request timeout
            .connect_timeout(Duration::from_secs(10)) // connect timeout
            .redirect(Policy::limited(5)) // cap redirects
            .user_agent(concat!("ucd_rs/", env!("CARGO_PKG_VERSION"))) // set user agent
            .build()
            .expect("reqwest client build");
        Self {
            http,
            max_retries: max_retries.max(1),
        }
    }
}

impl Transport for HttpTransport {
    fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let mut last_err: Option<String> = None;
        let backoffs = [100u64, 300, 700, 1500, 3000];
        for attempt in 0..self.max_retries {
            match self.http.get(url).send() {
                Ok(r) if r.status().is_success() => {
                    return r.text().map_err(|e| FetchError::Transient {
                        attempts: attempt + 1,
                        reason: format!("read body: {e}"),
                    });
                }
                Ok(r) if r.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(FetchError::NotFound { url: url.into() });
                }
                Ok(r) if r.status().is_server_error() => {
                    last_err = Some(format!("HTTP {}", r.status()));
                }
                Ok(r) => {
                    return Err(FetchError::Status {
                        status: r.status().as_u16(),
                    });
                }
                Err(e) => last_err = Some(e.to_string()),
            }
            let pause = backoffs[(attempt as usize).min(backoffs.len() - 1)];
            debug!("GET {url} failed ({last_err:?}), retrying in {pause}ms");
            std::thread::sleep(Duration::from_millis(pause));
        }
        Err(FetchError::Transient {
            attempts: self.max_retries,
            reason: last_err.unwrap_or_else(|| "unknown".into()),
        })
    }
}

impl From<FetchError> for crate::error::Error {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::NotFound { url } => crate::error::Error::Transport {
                attempts: 1,
                reason: format!("not found: {url}"),
            },
            FetchError::Transient { attempts, reason } => {
                crate::error::Error::Transport { attempts, reason }
            }
            FetchError::Status { status } => crate::error::Error::HttpStatus { status },
        }
    }
}
