use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{HeaderName, CONTENT_TYPE, ETAG, LOCATION};
use reqwest::StatusCode;
use url::Url;

use crate::error::{Error, Result};

pub(crate) const SDP_MIME_TYPE: &str = "application/sdp";

const SCHEME_HTTP: &str = "http";
const SCHEME_HTTPS: &str = "https";

/// WhipAnswer is what a WHIP endpoint hands back for an accepted offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WhipAnswer {
    /// Absolute url of the session resource, used for teardown.
    pub(crate) resource_url: Url,
    pub(crate) etag: Option<String>,
    pub(crate) sdp: String,
}

/// WhipClient performs the HTTP half of WHIP (RFC 9725): one POST carrying
/// the complete offer, and one DELETE of the returned resource.
pub(crate) struct WhipClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl WhipClient {
    pub(crate) fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(WhipClient { http, timeout })
    }

    /// offer posts `sdp` to `endpoint` and returns the answer. Redirects are
    /// followed and the resource location is resolved against the final url.
    pub(crate) async fn offer(
        &self,
        endpoint: &Url,
        auth_token: Option<&str>,
        sdp: String,
    ) -> Result<WhipAnswer> {
        let mut request = self
            .http
            .post(endpoint.clone())
            .header(CONTENT_TYPE, SDP_MIME_TYPE)
            .body(sdp);
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        debug!("whip POST {endpoint}");
        let response = request.send().await.map_err(|err| self.map_err(err))?;

        let status = response.status();
        let final_url = response.url().clone();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let location = header(LOCATION);
        let etag = header(ETAG);
        let content_type = header(CONTENT_TYPE);

        let body = response.text().await.map_err(|err| self.map_err(err))?;

        if status != StatusCode::CREATED {
            return Err(Error::ErrWhipStatus {
                status: status.as_u16(),
                body,
            });
        }

        let location = location.ok_or(Error::ErrWhipMissingLocation)?;
        let resource_url = final_url.join(&location)?;

        if !content_type.as_deref().map_or(false, |v| v.starts_with(SDP_MIME_TYPE)) {
            warn!("whip answer from {final_url} has content type {content_type:?}");
        }
        if body.trim().is_empty() {
            return Err(Error::ErrWhipEmptyAnswer);
        }

        Ok(WhipAnswer {
            resource_url,
            etag,
            sdp: body,
        })
    }

    /// delete ends the session resource on the endpoint.
    pub(crate) async fn delete(&self, resource_url: &Url, auth_token: Option<&str>) -> Result<()> {
        let mut request = self.http.delete(resource_url.clone());
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        debug!("whip DELETE {resource_url}");
        let response = request.send().await.map_err(|err| self.map_err(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ErrWhipStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    fn map_err(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::ErrWhipTimeout(self.timeout.as_millis() as u64)
        } else {
            Error::Http(err)
        }
    }
}

/// parse_endpoint validates a destination url. Only http and https are
/// meaningful to WHIP.
pub(crate) fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        SCHEME_HTTP | SCHEME_HTTPS => Ok(url),
        scheme => Err(Error::ErrUnsupportedUrlScheme(scheme.to_owned())),
    }
}

/// bearer_token treats an empty credential the same as no credential.
pub(crate) fn bearer_token(auth_token: Option<&str>) -> Option<&str> {
    auth_token.filter(|token| !token.is_empty())
}
