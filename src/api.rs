use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{ApiError, ErrorPayload};
use crate::models::{CompanyUpdate, NewApplication, NewCompany};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

/// One call against the dashboard backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    ListCompanies,
    CreateCompany(NewCompany),
    UpdateCompany { id: i64, update: CompanyUpdate },
    ListApplications { company_id: i64 },
    ListAllApplications,
    CreateApplication { company_id: i64, application: NewApplication },
    DeleteApplication { id: i64 },
}

impl ApiRequest {
    pub fn method(&self) -> Method {
        match self {
            ApiRequest::ListCompanies
            | ApiRequest::ListApplications { .. }
            | ApiRequest::ListAllApplications => Method::Get,
            ApiRequest::CreateCompany(_) | ApiRequest::CreateApplication { .. } => Method::Post,
            ApiRequest::UpdateCompany { .. } => Method::Patch,
            ApiRequest::DeleteApplication { .. } => Method::Delete,
        }
    }

    pub fn path(&self) -> String {
        match self {
            ApiRequest::ListCompanies | ApiRequest::CreateCompany(_) => "/companies".to_string(),
            ApiRequest::UpdateCompany { id, .. } => format!("/companies/{}", id),
            ApiRequest::ListApplications { company_id }
            | ApiRequest::CreateApplication { company_id, .. } => {
                format!("/companies/{}/applications", company_id)
            }
            ApiRequest::ListAllApplications => "/applications".to_string(),
            ApiRequest::DeleteApplication { id } => format!("/applications/{}", id),
        }
    }

    /// Request bodies are wrapped under the resource name, which the backend requires.
    pub fn body(&self) -> Option<Value> {
        match self {
            ApiRequest::CreateCompany(new) => Some(json!({ "company": new })),
            ApiRequest::UpdateCompany { update, .. } => Some(json!({ "company": update })),
            ApiRequest::CreateApplication { application, .. } => {
                Some(json!({ "application": application }))
            }
            _ => None,
        }
    }
}

// --- Remote API trait ---

pub trait RemoteApi: Send + Sync {
    /// Perform the request. Success yields the parsed body (`Value::Null` for
    /// an empty one).
    fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError>;
}

// --- HTTP implementation ---

#[derive(Debug)]
pub struct HttpApi {
    base_url: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    fn url(&self, request: &ApiRequest) -> String {
        format!("{}{}", self.base_url, request.path())
    }
}

impl RemoteApi for HttpApi {
    fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let url = self.url(request);
        debug!(method = ?request.method(), %url, "sending request");

        let mut builder = match request.method() {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };
        builder = builder.header("Accept", "application/json");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body() {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        debug!(status = status.as_u16(), bytes = text.len(), "response received");

        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Server {
            status: status.as_u16(),
            payload: ErrorPayload::Message(format!("Malformed response body: {}", e)),
        })
    }
}
