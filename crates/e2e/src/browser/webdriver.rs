//! W3C WebDriver protocol client

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::capabilities::Capabilities;
use super::service::DriverService;
use crate::error::{E2eError, E2eResult};

/// Key under which W3C drivers return element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// How to locate an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
    Id(String),
    Name(String),
    LinkText(String),
}

impl Locator {
    /// W3C location strategy and selector
    pub fn strategy(&self) -> (&'static str, String) {
        match self {
            Locator::Css(s) => ("css selector", s.clone()),
            Locator::XPath(s) => ("xpath", s.clone()),
            Locator::Id(s) => ("css selector", format!("[id=\"{}\"]", s)),
            Locator::Name(s) => ("css selector", format!("[name=\"{}\"]", s)),
            Locator::LinkText(s) => ("link text", s.clone()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::XPath(s) => write!(f, "xpath={}", s),
            Locator::Id(s) => write!(f, "id={}", s),
            Locator::Name(s) => write!(f, "name={}", s),
            Locator::LinkText(s) => write!(f, "link={}", s),
        }
    }
}

/// Opaque reference to an element in the current page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// Session timeouts; `None` leaves a timeout unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub implicit: Option<Duration>,
    pub page_load: Option<Duration>,
    pub script: Option<Duration>,
}

impl Timeouts {
    pub fn implicit(wait: Duration) -> Self {
        Self {
            implicit: Some(wait),
            ..Default::default()
        }
    }

    pub(crate) fn to_json(self) -> Value {
        let mut body = serde_json::Map::new();
        if let Some(t) = self.implicit {
            body.insert("implicit".into(), json!(t.as_millis() as u64));
        }
        if let Some(t) = self.page_load {
            body.insert("pageLoad".into(), json!(t.as_millis() as u64));
        }
        if let Some(t) = self.script {
            body.insert("script".into(), json!(t.as_millis() as u64));
        }
        Value::Object(body)
    }
}

/// A live browser automation session
#[async_trait]
pub trait WebDriver: Send + Sync {
    fn session_id(&self) -> &str;

    async fn navigate(&self, url: &str) -> E2eResult<()>;

    async fn current_url(&self) -> E2eResult<String>;

    async fn find_element(&self, locator: &Locator) -> E2eResult<ElementRef>;

    async fn find_elements(&self, locator: &Locator) -> E2eResult<Vec<ElementRef>>;

    async fn click(&self, element: &ElementRef) -> E2eResult<()>;

    async fn clear(&self, element: &ElementRef) -> E2eResult<()>;

    async fn send_keys(&self, element: &ElementRef, text: &str) -> E2eResult<()>;

    async fn is_selected(&self, element: &ElementRef) -> E2eResult<bool>;

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> E2eResult<Value>;

    async fn set_timeouts(&self, timeouts: Timeouts) -> E2eResult<()>;

    async fn maximize_window(&self) -> E2eResult<()>;

    async fn minimize_window(&self) -> E2eResult<()>;

    async fn fullscreen_window(&self) -> E2eResult<()>;

    async fn delete_all_cookies(&self) -> E2eResult<()>;

    /// End the session; the driver must not be used afterwards
    async fn quit(&self) -> E2eResult<()>;
}

/// WebDriver session spoken over HTTP
pub struct HttpWebDriver {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
    /// Local driver process backing this session, if any
    service: Mutex<Option<DriverService>>,
}

impl HttpWebDriver {
    /// Open a new session on the driver at `endpoint`
    pub async fn new_session(
        endpoint: &str,
        capabilities: Capabilities,
        service: Option<DriverService>,
    ) -> E2eResult<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        let body = json!({ "capabilities": { "alwaysMatch": Value::Object(capabilities) } });
        let value = send(
            &client,
            Method::POST,
            &format!("{}/session", endpoint),
            Some(body),
            "new session",
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| E2eError::WebDriver {
                command: "new session".to_string(),
                error: "invalid response".to_string(),
                message: format!("no sessionId in {}", value),
            })?
            .to_string();

        debug!("Opened WebDriver session {} at {}", session_id, endpoint);
        Ok(Self {
            client,
            endpoint,
            session_id,
            service: Mutex::new(service),
        })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> E2eResult<Value> {
        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        send(&self.client, method, &url, body, path).await
    }

    async fn post(&self, path: &str, body: Value) -> E2eResult<Value> {
        self.command(Method::POST, path, Some(body)).await
    }

    async fn get(&self, path: &str) -> E2eResult<Value> {
        self.command(Method::GET, path, None).await
    }

    async fn stop_service(&self) {
        let service = self.service.lock().take();
        if let Some(mut service) = service {
            if let Err(e) = service.shutdown().await {
                warn!("Failed to stop driver process: {}", e);
            }
        }
    }
}

#[async_trait]
impl WebDriver for HttpWebDriver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn navigate(&self, url: &str) -> E2eResult<()> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn current_url(&self) -> E2eResult<String> {
        let value = self.get("/url").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn find_element(&self, locator: &Locator) -> E2eResult<ElementRef> {
        let (using, selector) = locator.strategy();
        match self
            .post("/element", json!({ "using": using, "value": selector }))
            .await
        {
            Ok(value) => element_ref(&value),
            Err(E2eError::WebDriver { error, .. }) if error == "no such element" => {
                Err(E2eError::ElementNotFound(locator.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn find_elements(&self, locator: &Locator) -> E2eResult<Vec<ElementRef>> {
        let (using, selector) = locator.strategy();
        let value = self
            .post("/elements", json!({ "using": using, "value": selector }))
            .await?;
        value
            .as_array()
            .map(|items| items.iter().map(element_ref).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn click(&self, element: &ElementRef) -> E2eResult<()> {
        self.post(&format!("/element/{}/click", element.0), json!({}))
            .await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> E2eResult<()> {
        self.post(&format!("/element/{}/clear", element.0), json!({}))
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> E2eResult<()> {
        self.post(
            &format!("/element/{}/value", element.0),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn is_selected(&self, element: &ElementRef) -> E2eResult<bool> {
        let value = self.get(&format!("/element/{}/selected", element.0)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> E2eResult<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    async fn set_timeouts(&self, timeouts: Timeouts) -> E2eResult<()> {
        self.post("/timeouts", timeouts.to_json()).await?;
        Ok(())
    }

    async fn maximize_window(&self) -> E2eResult<()> {
        self.post("/window/maximize", json!({})).await?;
        Ok(())
    }

    async fn minimize_window(&self) -> E2eResult<()> {
        self.post("/window/minimize", json!({})).await?;
        Ok(())
    }

    async fn fullscreen_window(&self) -> E2eResult<()> {
        self.post("/window/fullscreen", json!({})).await?;
        Ok(())
    }

    async fn delete_all_cookies(&self) -> E2eResult<()> {
        self.command(Method::DELETE, "/cookie", None).await?;
        Ok(())
    }

    async fn quit(&self) -> E2eResult<()> {
        let result = self.command(Method::DELETE, "", None).await;
        self.stop_service().await;
        result.map(|_| ())
    }
}

fn element_ref(value: &Value) -> E2eResult<ElementRef> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| E2eError::WebDriver {
            command: "find element".to_string(),
            error: "invalid response".to_string(),
            message: format!("no element reference in {}", value),
        })
}

/// Send one WebDriver request and unwrap the `value` member of the reply
async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
    command: &str,
) -> E2eResult<Value> {
    debug!("WebDriver {} {}", method, url);
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    let payload: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text)?
    };
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(E2eError::WebDriver {
            command: command.to_string(),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or(status.as_str())
                .to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_strategies() {
        assert_eq!(
            Locator::Id("name".into()).strategy(),
            ("css selector", "[id=\"name\"]".to_string())
        );
        assert_eq!(
            Locator::XPath("//a".into()).strategy(),
            ("xpath", "//a".to_string())
        );
        assert_eq!(Locator::Css("#x".into()).to_string(), "css=#x");
    }

    #[test]
    fn test_timeouts_json_only_sets_given_values() {
        let body = Timeouts::implicit(Duration::from_secs(10)).to_json();
        assert_eq!(body, json!({ "implicit": 10000 }));
    }

    #[test]
    fn test_element_ref_parsing() {
        let value = json!({ ELEMENT_KEY: "abc" });
        assert_eq!(element_ref(&value).unwrap(), ElementRef("abc".to_string()));
        assert!(element_ref(&json!({})).is_err());
    }
}
