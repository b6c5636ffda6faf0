//! Bearer token acquisition via the OAuth client-credentials exchange.
//!
//! The manager never dispatches anything itself: [`TokenManager::request`]
//! builds the exchange, the orchestrator sends it, and the reply comes back
//! through [`TokenManager::accept_reply`].

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::wire;
use slides_transport::{HttpRequest, HttpResponse, RequestBody};
use std::fmt;
use tracing::{debug, info};

/// A short-lived opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} chars>)", self.0.len())
    }
}

/// Holds the current credential for one orchestrator instance.
#[derive(Debug, Default)]
pub struct TokenManager {
    credential: Option<Credential>,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached credential, if one has been acquired.
    pub fn cached(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Drop the cached credential so the next stage takes the refresh detour.
    pub fn clear(&mut self) {
        if self.credential.take().is_some() {
            debug!("Cached bearer token discarded");
        }
    }

    /// The client-credentials exchange:
    /// `POST {api_base}/connect/token` with a form-encoded body.
    pub fn request(config: &ConverterConfig) -> Result<HttpRequest, ConvertError> {
        let url = wire::endpoint(config, &["connect", "token"])?;
        Ok(HttpRequest::post(url)
            .header("Accept", "application/json")
            .body(RequestBody::Form(vec![
                ("grant_type".to_string(), "client_credentials".to_string()),
                ("client_id".to_string(), config.client_id.clone()),
                ("client_secret".to_string(), config.client_secret.clone()),
            ])))
    }

    /// Validate a token reply and cache the credential it carries.
    ///
    /// The reply must be JSON with a non-empty string `access_token`.
    pub fn accept_reply(&mut self, response: &HttpResponse) -> Result<Credential, ConvertError> {
        let body = wire::json_body(response).map_err(|detail| ConvertError::AuthFailed { detail })?;

        let token = match body.get("access_token") {
            None => {
                return Err(ConvertError::AuthFailed {
                    detail: "reply has no access_token".into(),
                })
            }
            Some(value) => value.as_str().ok_or_else(|| ConvertError::AuthFailed {
                detail: format!("access_token is not a string: {value}"),
            })?,
        };
        if token.is_empty() {
            return Err(ConvertError::AuthFailed {
                detail: "access_token is empty".into(),
            });
        }

        info!("Bearer token acquired");
        let credential = Credential::new(token);
        self.credential = Some(credential.clone());
        Ok(credential)
    }
}
