//! Blocking HTTP client for the three wire interactions: manifest fetch,
//! JWKS fetch, and sign-response submission.
//!
//! Calls respect the caller's context: the effective timeout is the smaller
//! of the configured default and the context deadline, and cancellation
//! surfaces as [`SignerError::Cancelled`].

use crate::domain::manifest::Manifest;
use crate::domain::response::{SignResponse, SubmitReceipt};
use crate::infra::config::AppConfig;
use crate::infra::context::Context;
use crate::infra::error::{SignerError, SignerResult};
use crate::services::manifest_verify::Jwks;
use std::io::Read;
use std::time::Duration;

const SUBMIT_BODY_LIMIT: usize = 4096;

pub struct HttpClient {
    fetch_timeout: Duration,
    submit_timeout: Duration,
}

impl HttpClient {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.fetch_timeout_seconds),
            submit_timeout: Duration::from_secs(config.submit_timeout_seconds),
        }
    }

    /// Retrieve and parse a manifest. Returns the parsed manifest together
    /// with the raw bytes for diagnostics.
    pub fn fetch_manifest(&self, url: &str, ctx: &Context) -> SignerResult<(Manifest, Vec<u8>)> {
        ctx.check()?;
        log::debug!("fetching manifest from {url}");
        let response = self
            .client(ctx, self.fetch_timeout)?
            .get(url)
            .send()
            .map_err(|e| self.network_error(ctx, e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SignerError::UnexpectedStatus {
                code: status.as_u16(),
            });
        }
        let raw = response.bytes().map_err(|e| self.network_error(ctx, e))?;
        let manifest: Manifest = serde_json::from_slice(&raw)
            .map_err(|e| SignerError::FetchFailed(format!("manifest decode failed: {e}")))?;
        log::debug!("fetched manifest requestId={}", manifest.request_id);
        Ok((manifest, raw.to_vec()))
    }

    /// Fetch the organizer's JWKS.
    pub fn fetch_jwks(&self, url: &str, ctx: &Context) -> SignerResult<Jwks> {
        ctx.check()?;
        log::debug!("fetching JWKS from {url}");
        let response = self
            .client(ctx, self.fetch_timeout)?
            .get(url)
            .send()
            .map_err(|e| self.network_error(ctx, e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SignerError::UnexpectedStatus {
                code: status.as_u16(),
            });
        }
        response
            .json::<Jwks>()
            .map_err(|e| SignerError::FetchFailed(format!("JWKS decode failed: {e}")))
    }

    /// POST the sign response to the callback URL and decode the receipt.
    pub fn submit(
        &self,
        callback_url: &str,
        sign_response: &SignResponse,
        ctx: &Context,
    ) -> SignerResult<SubmitReceipt> {
        ctx.check()?;
        let body = serde_json::to_vec(sign_response)?;
        log::debug!("submitting {} bytes to {callback_url}", body.len());

        let response = self
            .client(ctx, self.submit_timeout)?
            .post(callback_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(|e| self.network_error(ctx, e))?;

        let status = response.status();
        let code = status.as_u16();
        let mut body_text = String::new();
        let _ = response
            .take(SUBMIT_BODY_LIMIT as u64)
            .read_to_string(&mut body_text);

        if code != 200 && code != 201 {
            return Err(SignerError::SubmitFailed {
                code,
                body: body_text.trim().to_string(),
            });
        }

        serde_json::from_str::<SubmitReceipt>(&body_text).map_err(|_| SignerError::SubmitFailed {
            code,
            body: body_text.trim().to_string(),
        })
    }

    fn client(&self, ctx: &Context, default_timeout: Duration) -> SignerResult<reqwest::blocking::Client> {
        let timeout = ctx.remaining(default_timeout);
        if timeout.is_zero() {
            return Err(SignerError::Cancelled);
        }
        reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignerError::FetchFailed(e.to_string()))
    }

    fn network_error(&self, ctx: &Context, error: reqwest::Error) -> SignerError {
        if ctx.is_cancelled() {
            SignerError::Cancelled
        } else {
            SignerError::FetchFailed(error.to_string())
        }
    }
}
