//! In-process fakes for the browser, REST and login seams

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use testbed_common::EnvironmentConfig;
use testbed_e2e::api::{ApiRequest, ApiTransport};
use testbed_e2e::browser::{
    ElementRef, Locator, SessionFactory, SessionRequest, Timeouts, WebDriver,
};
use testbed_e2e::{BrowserSession, Credentials, E2eError, E2eResult, LoginFlow};

/// Minimal configuration pointing at a fake server
pub fn config() -> EnvironmentConfig {
    EnvironmentConfig::from_yaml(
        "server_name: https://testbed.example/\nusername: admin\npassword: secret\n",
    )
    .unwrap()
}

/// Shared record of driver calls, in order
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.lock().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn contains(&self, call: &str) -> bool {
        self.count(call) > 0
    }

    fn push(&self, call: impl Into<String>) {
        self.0.lock().push(call.into());
    }
}

/// WebDriver that records every call and fails the ones it is told to
#[derive(Clone, Default)]
pub struct FakeDriver {
    log: CallLog,
    failing: HashSet<String>,
    missing: HashSet<String>,
    selected: bool,
}

impl FakeDriver {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    /// Make `command` (e.g. `quit`) fail
    pub fn failing(mut self, command: &str) -> Self {
        self.failing.insert(command.to_string());
        self
    }

    /// Report `locator` as absent from the page
    pub fn missing(mut self, locator: &Locator) -> Self {
        self.missing.insert(locator.to_string());
        self
    }

    /// Every checkbox reports as already ticked
    pub fn all_selected(mut self) -> Self {
        self.selected = true;
        self
    }

    pub fn session(self, engine: testbed_e2e::EngineType) -> BrowserSession {
        BrowserSession::from_driver(engine, Box::new(self))
    }

    fn call(&self, command: &str, detail: String) -> E2eResult<()> {
        let entry = if detail.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, detail)
        };
        self.log.push(entry);
        if self.failing.contains(command) {
            return Err(E2eError::WebDriver {
                command: command.to_string(),
                error: "unknown error".to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WebDriver for FakeDriver {
    fn session_id(&self) -> &str {
        "fake-session"
    }

    async fn navigate(&self, url: &str) -> E2eResult<()> {
        self.call("navigate", url.to_string())
    }

    async fn current_url(&self) -> E2eResult<String> {
        self.call("current_url", String::new())?;
        Ok("about:blank".to_string())
    }

    async fn find_element(&self, locator: &Locator) -> E2eResult<ElementRef> {
        self.call("find_element", locator.to_string())?;
        if self.missing.contains(&locator.to_string()) {
            return Err(E2eError::ElementNotFound(locator.to_string()));
        }
        Ok(ElementRef(locator.to_string()))
    }

    async fn find_elements(&self, locator: &Locator) -> E2eResult<Vec<ElementRef>> {
        self.call("find_elements", locator.to_string())?;
        if self.missing.contains(&locator.to_string()) {
            return Ok(Vec::new());
        }
        Ok(vec![ElementRef(locator.to_string())])
    }

    async fn click(&self, element: &ElementRef) -> E2eResult<()> {
        self.call("click", element.0.clone())
    }

    async fn clear(&self, element: &ElementRef) -> E2eResult<()> {
        self.call("clear", element.0.clone())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> E2eResult<()> {
        self.call("send_keys", format!("{} {}", element.0, text))
    }

    async fn is_selected(&self, element: &ElementRef) -> E2eResult<bool> {
        self.call("is_selected", element.0.clone())?;
        Ok(self.selected)
    }

    async fn execute_script(&self, script: &str, _args: Vec<Value>) -> E2eResult<Value> {
        self.call("execute_script", script.to_string())?;
        Ok(Value::Null)
    }

    async fn set_timeouts(&self, timeouts: Timeouts) -> E2eResult<()> {
        let implicit = timeouts.implicit.map(|t| t.as_millis()).unwrap_or_default();
        self.call("set_timeouts", format!("implicit={}", implicit))
    }

    async fn maximize_window(&self) -> E2eResult<()> {
        self.call("maximize_window", String::new())
    }

    async fn minimize_window(&self) -> E2eResult<()> {
        self.call("minimize_window", String::new())
    }

    async fn fullscreen_window(&self) -> E2eResult<()> {
        self.call("fullscreen_window", String::new())
    }

    async fn delete_all_cookies(&self) -> E2eResult<()> {
        self.call("delete_all_cookies", String::new())
    }

    async fn quit(&self) -> E2eResult<()> {
        self.call("quit", String::new())
    }
}

/// Session factory handing out clones of one fake driver
#[derive(Clone)]
pub struct FakeFactory {
    driver: Option<FakeDriver>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<SessionRequest>>>,
}

impl FakeFactory {
    pub fn new(driver: FakeDriver) -> Self {
        Self {
            driver: Some(driver),
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Factory whose driver binary cannot be started
    pub fn broken() -> Self {
        Self {
            driver: None,
            ..Self::new(FakeDriver::default())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self, request: SessionRequest) -> E2eResult<Box<dyn WebDriver>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        match &self.driver {
            Some(driver) => Ok(Box::new(driver.clone())),
            None => Err(E2eError::DriverStartup(
                "Failed to spawn chromedriver: No such file or directory".to_string(),
            )),
        }
    }
}

/// REST transport answering from a script and recording every request
#[derive(Clone, Default)]
pub struct FakeTransport {
    failures: Arc<Mutex<HashMap<String, (u16, String)>>>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
    next_id: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with an API error
    pub fn fail(self, command: &str, status_code: u16, error_text: &str) -> Self {
        self.failures
            .lock()
            .insert(command.to_string(), (status_code, error_text.to_string()));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }
}

#[async_trait]
impl ApiTransport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> E2eResult<Value> {
        self.requests.lock().push(request.clone());
        if let Some((status_code, error_text)) = self.failures.lock().get(&request.command) {
            return Err(E2eError::Api {
                status_code: *status_code,
                error_text: error_text.clone(),
            });
        }

        if request.command.starts_with("add_") {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let name = request
                .body
                .as_ref()
                .and_then(|b| b.get("name"))
                .cloned()
                .unwrap_or(Value::Null);
            return Ok(json!({ "id": id, "name": name }));
        }
        Ok(Value::Null)
    }
}

/// Login flow failing a fixed number of times before succeeding
pub struct FakeLogin {
    failures: usize,
    attempts: AtomicUsize,
}

impl FakeLogin {
    pub fn succeeding() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginFlow for FakeLogin {
    async fn login(&self, session: &BrowserSession, _credentials: &Credentials) -> E2eResult<()> {
        session.driver()?;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(E2eError::Login(format!("attempt {}", attempt)));
        }
        Ok(())
    }
}
