//! Thin JSON client for the assessment backend.
//!
//! Every collaborator client (transcription, synthesis, generation, question
//! source, response sink) goes through [`BackendClient`], passing the error
//! constructor for its own failure kind.

use crate::config::EndpointConfig;
use crate::error::VoiceError;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum number of error body bytes echoed into an error message.
const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug, Clone)]
pub struct BackendClient {
    config: EndpointConfig,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: EndpointConfig) -> Result<Self, VoiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.identity {
            Some(identity) => request.header(AUTHORIZATION, format!("Bearer {}", identity)),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        path: &str,
        fail: fn(String) -> VoiceError,
    ) -> Result<Response, VoiceError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| fail(format!("request to {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(fail(format!("{} returned {}: {}", path, status, body)));
        }
        Ok(response)
    }

    /// POSTs a JSON body and decodes a JSON response.
    pub async fn post_json<B, R>(
        &self,
        path: &str,
        body: &B,
        fail: fn(String) -> VoiceError,
    ) -> Result<R, VoiceError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.http.post(self.config.url(path)).json(body);
        let response = self.send(request, path, fail).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| fail(format!("invalid response from {}: {}", path, e)))
    }

    /// PUTs a JSON body and decodes a JSON response.
    pub async fn put_json<B, R>(
        &self,
        path: &str,
        body: &B,
        fail: fn(String) -> VoiceError,
    ) -> Result<R, VoiceError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.http.put(self.config.url(path)).json(body);
        let response = self.send(request, path, fail).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| fail(format!("invalid response from {}: {}", path, e)))
    }

    /// POSTs a JSON body and returns the raw response bytes.
    pub async fn post_json_for_bytes<B>(
        &self,
        path: &str,
        body: &B,
        fail: fn(String) -> VoiceError,
    ) -> Result<Vec<u8>, VoiceError>
    where
        B: Serialize + ?Sized,
    {
        let request = self.http.post(self.config.url(path)).json(body);
        let response = self.send(request, path, fail).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| fail(format!("failed to read body from {}: {}", path, e)))?;
        Ok(bytes.to_vec())
    }

    /// GETs and decodes a JSON response.
    pub async fn get_json<R>(&self, path: &str, fail: fn(String) -> VoiceError) -> Result<R, VoiceError>
    where
        R: DeserializeOwned,
    {
        let request = self.http.get(self.config.url(path));
        let response = self.send(request, path, fail).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| fail(format!("invalid response from {}: {}", path, e)))
    }
}
