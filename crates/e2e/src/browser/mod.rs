//! Browser session manager
//!
//! Resolves an engine name, acquires a WebDriver session through a
//! per-engine [`SessionFactory`], folds the configured [`SessionOptions`]
//! into the new-session capabilities and runs the configured
//! [`SessionAction`]s once the session is live.

pub mod capabilities;
pub mod service;
pub mod webdriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use testbed_common::config::BrowserSection;
use tracing::{debug, info, warn};

pub use capabilities::Capabilities;
pub use service::{DriverConfig, DriverService};
pub use webdriver::{ElementRef, HttpWebDriver, Locator, Timeouts, WebDriver};

use crate::error::{E2eError, E2eResult};

/// Implicit element wait set when a session starts
pub const IMPLICIT_WAIT: Duration = Duration::from_secs(10);

/// Browser engines a session can be acquired for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    Firefox,
    Chrome,
    Ie,
    Edge,
    HeadlessEngine,
    Safari,
    Opera,
    Remote,
}

impl EngineType {
    pub const ALL: [EngineType; 8] = [
        EngineType::Firefox,
        EngineType::Chrome,
        EngineType::Ie,
        EngineType::Edge,
        EngineType::HeadlessEngine,
        EngineType::Safari,
        EngineType::Opera,
        EngineType::Remote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Firefox => "firefox",
            EngineType::Chrome => "chrome",
            EngineType::Ie => "ie",
            EngineType::Edge => "edge",
            EngineType::HeadlessEngine => "headless_engine",
            EngineType::Safari => "safari",
            EngineType::Opera => "opera",
            EngineType::Remote => "remote",
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        EngineType::ALL
            .into_iter()
            .find(|engine| engine.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| E2eError::UnknownEngine(s.to_string()))
    }
}

/// Case-insensitive engine lookup; unknown names are an error
pub fn resolve_engine_type(name: &str) -> E2eResult<EngineType> {
    name.parse()
}

/// Typed options folded into the new-session capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub headless: bool,
    pub window_size: Option<(u32, u32)>,
    pub accept_insecure_certs: bool,
    pub args: Vec<String>,
    pub page_load_timeout: Option<Duration>,
    pub script_timeout: Option<Duration>,
}

/// Zero-argument operation run on a session right after acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    MaximizeWindow,
    MinimizeWindow,
    FullscreenWindow,
    DeleteAllCookies,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::MaximizeWindow => "maximize_window",
            SessionAction::MinimizeWindow => "minimize_window",
            SessionAction::FullscreenWindow => "fullscreen_window",
            SessionAction::DeleteAllCookies => "delete_all_cookies",
        }
    }

    async fn run(self, driver: &dyn WebDriver) -> E2eResult<()> {
        match self {
            SessionAction::MaximizeWindow => driver.maximize_window().await,
            SessionAction::MinimizeWindow => driver.minimize_window().await,
            SessionAction::FullscreenWindow => driver.fullscreen_window().await,
            SessionAction::DeleteAllCookies => driver.delete_all_cookies().await,
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionAction {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maximize_window" => Ok(SessionAction::MaximizeWindow),
            "minimize_window" => Ok(SessionAction::MinimizeWindow),
            "fullscreen_window" => Ok(SessionAction::FullscreenWindow),
            "delete_all_cookies" => Ok(SessionAction::DeleteAllCookies),
            other => Err(E2eError::Config(format!(
                "unknown browser action: {}",
                other
            ))),
        }
    }
}

/// Options plus ordered actions for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfiguration {
    pub options: SessionOptions,
    pub actions: Vec<SessionAction>,
}

impl SessionConfiguration {
    /// Build from the `browser` section of the merged config
    pub fn from_section(section: &BrowserSection) -> E2eResult<Self> {
        let actions = section
            .actions
            .iter()
            .map(|name| name.parse())
            .collect::<E2eResult<Vec<_>>>()?;

        Ok(Self {
            options: SessionOptions {
                headless: section.headless.unwrap_or(false),
                window_size: section.window_size.map(|[w, h]| (w, h)),
                accept_insecure_certs: section.accept_insecure_certs,
                args: section.args.clone(),
                page_load_timeout: section.page_load_timeout_secs.map(Duration::from_secs),
                script_timeout: section.script_timeout_secs.map(Duration::from_secs),
            },
            actions,
        })
    }
}

/// What a factory needs to open one session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub engine: EngineType,
    pub capabilities: Capabilities,
    pub remote_endpoint: Option<String>,
}

/// Opens live sessions for one or more engines
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, request: SessionRequest) -> E2eResult<Box<dyn WebDriver>>;
}

/// Spawns the engine's driver binary and opens a session on it
#[derive(Debug, Clone)]
pub struct LocalDriverFactory {
    binaries: HashMap<EngineType, PathBuf>,
    startup_timeout: Duration,
}

impl LocalDriverFactory {
    pub fn new() -> Self {
        Self {
            binaries: HashMap::new(),
            startup_timeout: Duration::from_secs(30),
        }
    }

    /// Use `path` instead of the driver looked up on `PATH`
    pub fn with_binary(mut self, engine: EngineType, path: impl Into<PathBuf>) -> Self {
        self.binaries.insert(engine, path.into());
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

impl Default for LocalDriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for LocalDriverFactory {
    async fn create(&self, request: SessionRequest) -> E2eResult<Box<dyn WebDriver>> {
        let mut config = DriverConfig::for_engine(request.engine).ok_or_else(|| {
            E2eError::DriverStartup(format!("{} has no local driver", request.engine))
        })?;
        if let Some(path) = self.binaries.get(&request.engine) {
            config.binary_path = path.clone();
        }
        config.startup_timeout = self.startup_timeout;

        let service = DriverService::spawn(config).await?;
        let endpoint = service.base_url().to_string();
        let driver = HttpWebDriver::new_session(&endpoint, request.capabilities, Some(service)).await?;
        Ok(Box::new(driver))
    }
}

/// Opens sessions on an already running WebDriver endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteFactory;

#[async_trait]
impl SessionFactory for RemoteFactory {
    async fn create(&self, request: SessionRequest) -> E2eResult<Box<dyn WebDriver>> {
        let endpoint = request
            .remote_endpoint
            .ok_or(E2eError::MissingEndpoint(request.engine))?;
        let driver = HttpWebDriver::new_session(&endpoint, request.capabilities, None).await?;
        Ok(Box::new(driver))
    }
}

/// Registry of session factories keyed by engine
#[derive(Clone, Default)]
pub struct SessionManager {
    factories: HashMap<EngineType, Arc<dyn SessionFactory>>,
}

impl SessionManager {
    /// Manager with no factories registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Local drivers for every engine and a remote factory for REMOTE
    pub fn with_defaults() -> Self {
        let local: Arc<dyn SessionFactory> = Arc::new(LocalDriverFactory::new());
        let mut manager = Self::new();
        for engine in EngineType::ALL {
            if engine != EngineType::Remote {
                manager.factories.insert(engine, local.clone());
            }
        }
        manager.register(EngineType::Remote, RemoteFactory)
    }

    pub fn register(mut self, engine: EngineType, factory: impl SessionFactory + 'static) -> Self {
        self.factories.insert(engine, Arc::new(factory));
        self
    }

    /// Spawn `path` as the driver for `engine`
    pub fn with_driver_override(self, engine: EngineType, path: impl Into<PathBuf>) -> Self {
        self.register(engine, LocalDriverFactory::new().with_binary(engine, path))
    }

    /// Acquire a live session for `engine` and apply `config` to it.
    ///
    /// REMOTE needs `remote_endpoint`; without one this fails with
    /// [`E2eError::MissingEndpoint`] before any factory is called. Any other
    /// factory failure is reported as [`E2eError::EngineUnavailable`].
    ///
    /// `capabilities` may be `None` for REMOTE too: the factory always gets
    /// an object holding at least the folded session options, and a grid
    /// picks its default browser when `browserName` is absent.
    pub async fn acquire_session(
        &self,
        engine: EngineType,
        config: &SessionConfiguration,
        capabilities: Option<Capabilities>,
        remote_endpoint: Option<&str>,
    ) -> E2eResult<BrowserSession> {
        if engine == EngineType::Remote && remote_endpoint.is_none() {
            return Err(E2eError::MissingEndpoint(engine));
        }

        let factory = self
            .factories
            .get(&engine)
            .ok_or_else(|| E2eError::EngineUnavailable {
                engine,
                reason: "no session factory registered".to_string(),
            })?;

        let mut caps = capabilities::base_capabilities(engine, capabilities);
        let warnings = capabilities::apply_options(engine, &config.options, &mut caps);
        for warning in &warnings {
            warn!("{}", warning);
        }

        info!("Acquiring {} session", engine);
        let request = SessionRequest {
            engine,
            capabilities: caps,
            remote_endpoint: remote_endpoint.map(str::to_string),
        };
        let driver = factory.create(request).await.map_err(|e| match e {
            E2eError::MissingEndpoint(_) | E2eError::EngineUnavailable { .. } => e,
            other => E2eError::EngineUnavailable {
                engine,
                reason: other.to_string(),
            },
        })?;

        let mut session = BrowserSession::from_driver(engine, driver);
        session.warnings = warnings;
        apply_configuration(&mut session, config).await;
        Ok(session)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut engines: Vec<_> = self.factories.keys().map(EngineType::as_str).collect();
        engines.sort_unstable();
        f.debug_struct("SessionManager")
            .field("engines", &engines)
            .finish()
    }
}

/// Run the configured actions on `session`.
///
/// A failing action is recorded as a warning on the session and returned;
/// it never aborts the remaining actions.
pub async fn apply_configuration(
    session: &mut BrowserSession,
    config: &SessionConfiguration,
) -> Vec<String> {
    let mut warnings = Vec::new();
    if let Some(driver) = session.driver.as_deref() {
        for action in &config.actions {
            debug!("Running session action {}", action);
            if let Err(e) = action.run(driver).await {
                let warning = format!("session action {} failed: {}", action, e);
                warn!("{}", warning);
                warnings.push(warning);
            }
        }
    } else if !config.actions.is_empty() {
        warnings.push("session released before configuration".to_string());
    }
    session.warnings.extend(warnings.iter().cloned());
    warnings
}

/// Exclusively owned browser session
pub struct BrowserSession {
    engine: EngineType,
    driver: Option<Box<dyn WebDriver>>,
    warnings: Vec<String>,
}

impl BrowserSession {
    pub fn from_driver(engine: EngineType, driver: Box<dyn WebDriver>) -> Self {
        Self {
            engine,
            driver: Some(driver),
            warnings: Vec::new(),
        }
    }

    pub fn engine(&self) -> EngineType {
        self.engine
    }

    /// False once the session has been released
    pub fn is_active(&self) -> bool {
        self.driver.is_some()
    }

    /// Warnings collected while acquiring and configuring the session
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// The live driver, or `NullSession` after release
    pub fn driver(&self) -> E2eResult<&dyn WebDriver> {
        self.driver.as_deref().ok_or(E2eError::NullSession)
    }

    /// Maximize, navigate to `base_url` and set the implicit wait
    pub async fn start(&self, base_url: &str) -> E2eResult<()> {
        let driver = self.driver()?;
        driver.maximize_window().await?;
        driver.navigate(base_url).await?;
        driver.set_timeouts(Timeouts::implicit(IMPLICIT_WAIT)).await?;
        info!("Started {} session at {}", self.engine, base_url);
        Ok(())
    }

    /// Clear cookies and quit. Releasing twice is a no-op.
    pub async fn release(&mut self) -> E2eResult<()> {
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };

        if let Err(e) = driver.delete_all_cookies().await {
            warn!("Failed to clear cookies before quitting: {}", e);
        }
        driver.quit().await?;
        info!("Released {} session", self.engine);
        Ok(())
    }
}

impl fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserSession")
            .field("engine", &self.engine)
            .field("active", &self.is_active())
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// Start `session`; an absent session is `NullSession`
pub async fn start_session(session: Option<&BrowserSession>, base_url: &str) -> E2eResult<()> {
    session.ok_or(E2eError::NullSession)?.start(base_url).await
}

pub async fn release_session(session: &mut BrowserSession) -> E2eResult<()> {
    session.release().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("chrome", EngineType::Chrome)]
    #[test_case("CHROME", EngineType::Chrome)]
    #[test_case("FireFox", EngineType::Firefox)]
    #[test_case("Headless_Engine", EngineType::HeadlessEngine)]
    #[test_case(" remote ", EngineType::Remote)]
    fn test_resolve_engine_type(name: &str, expected: EngineType) {
        assert_eq!(resolve_engine_type(name).unwrap(), expected);
    }

    #[test]
    fn test_every_engine_round_trips_its_name() {
        for engine in EngineType::ALL {
            assert_eq!(resolve_engine_type(engine.as_str()).unwrap(), engine);
        }
    }

    #[test]
    fn test_unknown_engine() {
        let err = resolve_engine_type("netscape").unwrap_err();
        assert!(matches!(err, E2eError::UnknownEngine(name) if name == "netscape"));
    }

    #[test]
    fn test_configuration_from_section() {
        let section = BrowserSection {
            headless: Some(true),
            window_size: Some([1024, 768]),
            actions: vec!["maximize_window".into(), "Delete_All_Cookies".into()],
            script_timeout_secs: Some(5),
            ..Default::default()
        };

        let config = SessionConfiguration::from_section(&section).unwrap();
        assert!(config.options.headless);
        assert_eq!(config.options.window_size, Some((1024, 768)));
        assert_eq!(config.options.script_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            config.actions,
            vec![SessionAction::MaximizeWindow, SessionAction::DeleteAllCookies]
        );
    }

    #[test]
    fn test_unknown_action_is_config_error() {
        let section = BrowserSection {
            actions: vec!["shake_window".into()],
            ..Default::default()
        };
        assert!(matches!(
            SessionConfiguration::from_section(&section),
            Err(E2eError::Config(_))
        ));
    }

    #[test]
    fn test_default_manager_covers_every_engine() {
        let manager = SessionManager::with_defaults();
        for engine in EngineType::ALL {
            assert!(manager.factories.contains_key(&engine));
        }
    }
}
