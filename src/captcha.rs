// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Captcha verification for the registration path.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::CaptchaError;

pub const HCAPTCHA_SITEVERIFY_URL: &str = "https://hcaptcha.com/siteverify";

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Returns true only if the service positively confirmed the token.
    async fn verify(&self, token: &str) -> bool;
}

/// Response body of the siteverify endpoint.
#[derive(Debug, Deserialize)]
pub struct SiteVerifyResponse {
    pub success: bool,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Vec<String>,
}

/// hCaptcha siteverify client. The HTTP client is shared for the lifetime
/// of the hub.
pub struct HCaptchaVerifier {
    client: reqwest::Client,
    secret: String,
    endpoint: String,
}

impl HCaptchaVerifier {
    pub fn new(client: reqwest::Client, secret: String) -> Self {
        Self::with_endpoint(client, secret, HCAPTCHA_SITEVERIFY_URL.to_string())
    }

    pub fn with_endpoint(client: reqwest::Client, secret: String, endpoint: String) -> Self {
        HCaptchaVerifier {
            client,
            secret,
            endpoint,
        }
    }

    async fn site_verify(&self, token: &str) -> Result<SiteVerifyResponse, CaptchaError> {
        if self.secret.is_empty() {
            return Err(CaptchaError::NotConfigured);
        }
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("secret", self.secret.as_str()), ("response", token)])
            .send()
            .await?
            .error_for_status()?
            .json::<SiteVerifyResponse>()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl CaptchaVerifier for HCaptchaVerifier {
    async fn verify(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        match self.site_verify(token).await {
            Ok(response) => {
                if !response.success {
                    warn!("Captcha refused: {:?}", response.error_codes);
                }
                response.success
            }
            Err(e) => {
                warn!("Captcha verification error: {}", e);
                false
            }
        }
    }
}

/// Accepts every token. For development and tests only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCaptcha;

#[async_trait]
impl CaptchaVerifier for DisabledCaptcha {
    async fn verify(&self, _token: &str) -> bool {
        true
    }
}
