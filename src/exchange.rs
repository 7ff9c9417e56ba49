// HTTP side of the pipeline: the key handshake at startup, and one auth-door
// POST per scanned card.

use crate::config::{Config, HandshakeConfig};
use crate::credential::CredentialEnvelope;
use crate::error::{SetupError, TransportError};
use crate::key_exchange::KeyExchange;
use crate::signing::{AttachSigning, NoSignature, SigningDigest};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, TRANSFER_ENCODING};
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Credentials every scan is authenticated with. Fixed once setup finishes.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub api_key: String,
    pub secret_key: u64,
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// What came back from one auth-door request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub status: u16,
    /// An `X-API-KEY` header the server sent back, if any. It is reported here
    /// rather than written onto a request that has already gone out.
    pub issued_api_key: Option<String>,
    /// Only filled for non-chunked responses.
    pub body: Option<String>,
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct GateClient {
    client: Client,
    base_url: String,
    auth_path: String,
    signer: Box<dyn AttachSigning>,
}

impl GateClient {
    pub fn new(base_url: &str, auth_path: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;

        Ok(GateClient {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth_path: auth_path.to_owned(),
            signer: Box::new(NoSignature),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        GateClient::new(
            &config.base_url(),
            &config.auth_path,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn with_signer(mut self, signer: Box<dyn AttachSigning>) -> Self {
        self.signer = signer;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Sends one credential to the auth-door endpoint.
    ///
    /// Any HTTP status counts as a completed exchange; only failing to get a
    /// response at all is an error.
    pub fn authenticate(
        &self,
        context: &AuthContext,
        digest: &SigningDigest,
        envelope: &CredentialEnvelope,
    ) -> Result<AuthOutcome, TransportError> {
        let url = self.url(&self.auth_path);
        let body = envelope.to_body();

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            header_value(API_KEY_HEADER, &context.api_key)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.signer.attach(digest, &mut headers)?;

        tracing::debug!(%url, body_len = body.len(), "sending auth request");
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .map_err(|e| TransportError::from_send(&url, e))?;
        tracing::debug!(
            %url,
            status = response.status().as_u16(),
            "auth response headers received"
        );

        Ok(observe_response(&url, response))
    }

    /// Runs the key exchange and returns the context the server now expects.
    pub fn handshake(&self, params: &HandshakeConfig) -> Result<AuthContext, SetupError> {
        let exchange = KeyExchange::new(params)?;
        self.handshake_with(params, &exchange)
    }

    pub fn handshake_with(
        &self,
        params: &HandshakeConfig,
        exchange: &KeyExchange,
    ) -> Result<AuthContext, SetupError> {
        let url = self.url(&params.path);
        tracing::info!(%url, "starting key exchange with gate server");

        let response = self
            .client
            .post(&url)
            .json(&exchange.request())
            .send()
            .map_err(|e| TransportError::from_send(&url, e))?;

        let status = response.status();
        let api_key = response
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().map_err(|source| TransportError::Body {
            url: url.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(SetupError::Handshake(format!(
                "server answered {} to the key exchange",
                status
            )));
        }
        let api_key = api_key.ok_or_else(|| {
            SetupError::Handshake(format!("no {} header in key exchange response", API_KEY_HEADER))
        })?;
        let server_public: u64 = body.trim().parse().map_err(|_| {
            SetupError::Handshake(format!("server public value {:?} is not a number", body.trim()))
        })?;

        let secret_key = exchange.shared_secret(server_public)?;
        tracing::info!("key exchange complete, api key issued");

        Ok(AuthContext {
            api_key,
            secret_key,
        })
    }

    /// Asks the server whether it still holds a record for `api_key`.
    /// The check lives next to the init endpoint.
    pub fn check_api_key(
        &self,
        params: &HandshakeConfig,
        api_key: &str,
    ) -> Result<bool, TransportError> {
        let url = self.url(&check_api_key_path(&params.path));
        let response = self
            .client
            .put(&url)
            .header(API_KEY_HEADER, header_value(API_KEY_HEADER, api_key)?)
            .send()
            .map_err(|e| TransportError::from_send(&url, e))?;

        let valid = response.status() == StatusCode::OK;
        tracing::debug!(%url, status = response.status().as_u16(), valid, "checked api key");
        Ok(valid)
    }
}

fn check_api_key_path(handshake_path: &str) -> String {
    match handshake_path.rfind('/') {
        Some(index) => format!("{}/check-api-key", &handshake_path[..index]),
        None => "/check-api-key".to_owned(),
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

// Logs every header, picks out a server-issued API key, and keeps the body
// only when it was not chunked and could be read.
fn observe_response(url: &str, response: Response) -> AuthOutcome {
    let status = response.status().as_u16();
    let mut issued_api_key = None;
    let mut chunked = false;

    for (name, value) in response.headers() {
        tracing::debug!(header = %name, value = ?value, "auth response header");
        if name.as_str().eq_ignore_ascii_case(API_KEY_HEADER) {
            issued_api_key = value.to_str().ok().map(str::to_owned);
        }
        if *name == TRANSFER_ENCODING {
            chunked = value
                .to_str()
                .map(|v| v.to_ascii_lowercase().contains("chunked"))
                .unwrap_or(false);
        }
    }

    let body = if chunked {
        None
    } else {
        // The status already carries the gate's decision
        match response.text() {
            Ok(text) => {
                tracing::debug!(len = text.len(), body = %text, "auth response body");
                Some(text)
            }
            Err(e) => {
                tracing::warn!(%url, status, error = %e, "failed to read auth response body");
                None
            }
        }
    };

    AuthOutcome {
        status,
        issued_api_key,
        body,
    }
}
