use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT_SEC: u64 = 10;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {0}")]
    BuildClient(#[source] reqwest::Error),

    #[error("Invalid URL '{base}' + '{path}': {source}")]
    Url {
        base: String,
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP request error: {0}")]
    Request(#[source] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: Url, status: StatusCode },
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SEC))
            .build()
            .map_err(HttpError::BuildClient)?;
        Ok(HttpClient { client })
    }

    /// Fetch a body as text. A 404 is `Ok(None)`; any other non-success
    /// status is an error.
    pub async fn get_text(&self, url: &Url) -> Result<Option<String>, HttpError> {
        debug!(%url, "GET");
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(HttpError::Request)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.clone(),
                status,
            });
        }

        resp.text().await.map(Some).map_err(HttpError::Request)
    }
}

/// Join `path` onto `base`, which is treated as a directory.
pub fn join_url(base: &Url, path: &str) -> Result<Url, HttpError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path).map_err(|source| HttpError::Url {
        base: base.to_string(),
        path: path.to_owned(),
        source,
    })
}
