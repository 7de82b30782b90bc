//! Typed CRUD client for the application's REST API

pub mod resources;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use testbed_common::EnvironmentConfig;
use tracing::debug;

pub use resources::{
    Case, Config, ConfigGroup, Plan, PlanEntry, Priority, Project, Resource, ResultField, Section,
    Status, Suite, Template, User,
};

use crate::error::{E2eError, E2eResult};

/// HTTP verb of an API command; reads are GET, everything else POST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
}

/// One API command, e.g. `add_project` or `get_case/12`
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: ApiMethod,
    pub command: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(command: impl Into<String>) -> Self {
        Self {
            method: ApiMethod::Get,
            command: command.into(),
            body: None,
        }
    }

    pub fn post(command: impl Into<String>, body: Value) -> Self {
        Self {
            method: ApiMethod::Post,
            command: command.into(),
            body: Some(body),
        }
    }
}

/// Sends API commands and returns the decoded JSON reply
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> E2eResult<Value>;
}

/// `reqwest` transport with basic auth
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn from_config(config: &EnvironmentConfig) -> E2eResult<Self> {
        Self::new(config.base_url(), &config.username, &config.password)
    }

    pub fn url(&self, command: &str) -> String {
        format!("{}/index.php?/api/v2/{}", self.base_url, command)
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> E2eResult<Value> {
        let url = self.url(&request.command);
        let method = match request.method {
            ApiMethod::Get => Method::GET,
            ApiMethod::Post => Method::POST,
        };
        debug!("API {} {}", method, request.command);

        let mut builder = self
            .client
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(E2eError::Api {
                status_code: status.as_u16(),
                error_text: error_text(&text),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// The `error` member of an error reply, or the raw body
fn error_text(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Typed CRUD operations over an [`ApiTransport`]
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn ApiTransport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn ApiTransport>) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &EnvironmentConfig) -> E2eResult<Self> {
        Ok(Self::new(Arc::new(HttpTransport::from_config(config)?)))
    }

    /// `add_<kind>[/<parent>]`
    pub async fn add<R: Resource>(
        &self,
        parent: Option<&str>,
        fields: &impl Serialize,
    ) -> E2eResult<R> {
        let command = with_parent(format!("add_{}", R::KIND), parent);
        let value = self
            .transport
            .send(ApiRequest::post(command, serde_json::to_value(fields)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `get_<kind>/<id>`
    pub async fn get<R: Resource>(&self, id: &str) -> E2eResult<R> {
        let value = self
            .transport
            .send(ApiRequest::get(format!("get_{}/{}", R::KIND, id)))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `get_<plural>[/<parent>]`; accepts bare arrays and paginated objects
    pub async fn list<R: Resource>(&self, parent: Option<&str>) -> E2eResult<Vec<R>> {
        let command = with_parent(format!("get_{}", R::PLURAL), parent);
        let value = self.transport.send(ApiRequest::get(command)).await?;
        let items = match value {
            Value::Array(items) => Value::Array(items),
            Value::Object(mut object) => object.remove(R::PLURAL).ok_or_else(|| {
                E2eError::ApiResponse(format!("list response has no `{}` member", R::PLURAL))
            })?,
            other => {
                return Err(E2eError::ApiResponse(format!(
                    "unexpected list response: {}",
                    other
                )))
            }
        };
        Ok(serde_json::from_value(items)?)
    }

    /// `update_<kind>/<id>`
    pub async fn update<R: Resource>(&self, id: &str, fields: &impl Serialize) -> E2eResult<R> {
        let command = format!("update_{}/{}", R::KIND, id);
        let value = self
            .transport
            .send(ApiRequest::post(command, serde_json::to_value(fields)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn delete<R: Resource>(&self, resource: &R) -> E2eResult<()> {
        self.delete_command(&resource.delete_command()).await
    }

    /// Run a prepared delete command such as `delete_project/7`
    pub async fn delete_command(&self, command: &str) -> E2eResult<()> {
        self.transport
            .send(ApiRequest::post(command, Value::Object(Default::default())))
            .await?;
        Ok(())
    }
}

fn with_parent(command: String, parent: Option<&str>) -> String {
    match parent {
        Some(parent) => format!("{}/{}", command, parent),
        None => command,
    }
}
