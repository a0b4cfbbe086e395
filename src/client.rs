//! Outbound HTTP client (§4.10), built on `reqwest`. Redirects are
//! followed by hand rather than via `reqwest`'s built-in policy because the
//! spec's method-preservation rule for 301/302 differs from `reqwest`'s
//! browser-like default (which always downgrades POST to GET) — grounded
//! on `original_source/framework/include/blaze/client.h`'s `fetch`/
//! `FetchResponse` shape.

use crate::config::ClientConfig;
use reqwest::{
    header::{HeaderMap, HeaderValue, LOCATION},
    multipart::Form,
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid redirect location")]
    InvalidRedirect,
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("response body was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A fully-drained response: status, case-insensitive multi-value headers,
/// and a buffered body (§4.10).
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: bytes::Bytes,
}

impl FetchResponse {
    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    /// The first value of `name`, case-insensitively (§4.10).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of `name`, in response order (§4.10 "multi-value").
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers.get_all(name).iter().filter_map(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body).map_err(ClientError::from)
    }

    async fn from_reqwest(resp: reqwest::Response) -> Result<Self, ClientError> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        Ok(Self { status, headers, body })
    }
}

/// An HTTP client with redirect-following, timeout and TLS behavior
/// configured once at construction (§4.10, §4.12).
pub struct HttpClient {
    inner: reqwest::Client,
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { inner, config })
    }

    pub async fn get(&self, url: &str) -> Result<FetchResponse, ClientError> {
        self.fetch(Method::GET, url, None).await
    }

    pub async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<FetchResponse, ClientError> {
        let bytes = serde_json::to_vec(body)?;
        self.fetch_with(Method::POST, url, Some(bytes.into()), |b| {
            b.header(reqwest::header::CONTENT_TYPE, "application/json")
        })
        .await
    }

    pub async fn post_multipart(&self, url: &str, form: Form) -> Result<FetchResponse, ClientError> {
        let resp = self
            .inner
            .request(Method::POST, url)
            .multipart(form)
            .send()
            .await?;
        FetchResponse::from_reqwest(resp).await
    }

    pub async fn fetch(
        &self,
        method: Method,
        url: &str,
        body: Option<bytes::Bytes>,
    ) -> Result<FetchResponse, ClientError> {
        self.fetch_with(method, url, body, |b| b).await
    }

    async fn fetch_with(
        &self,
        method: Method,
        url: &str,
        mut body: Option<bytes::Bytes>,
        decorate: impl Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<FetchResponse, ClientError> {
        let mut current_url = reqwest::Url::parse(url)?;
        let mut current_method = method;
        let mut redirects = 0usize;

        loop {
            let mut req = self.inner.request(current_method.clone(), current_url.clone());
            if let Some(b) = &body {
                req = req.body(b.clone());
            }
            req = decorate(req);

            let resp = req.send().await?;
            let status = resp.status();

            if status.is_redirection() {
                if redirects >= self.config.max_redirects {
                    return Err(ClientError::TooManyRedirects(self.config.max_redirects));
                }
                if let Some(location) = location_of(&resp) {
                    current_url = current_url.join(&location)?;

                    if status == StatusCode::SEE_OTHER {
                        current_method = Method::GET;
                        body = None;
                    } else if matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
                        && !self.config.preserve_method_on_redirect
                    {
                        current_method = Method::GET;
                        body = None;
                    }

                    redirects += 1;
                    continue;
                }
            }

            return FetchResponse::from_reqwest(resp).await;
        }
    }
}

fn location_of(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(LOCATION)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_default_config() {
        let client = HttpClient::new(ClientConfig::default());
        assert!(client.is_ok());
    }
}
