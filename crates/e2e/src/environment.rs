//! Fixture lifecycle orchestrator
//!
//! A [`TestEnvironment`] owns the browser session, the database fixture and
//! every REST fixture a suite creates. Setup runs in dependency order and
//! tears down whatever it already acquired when a later step fails.
//! [`TestEnvironment::teardown`] attempts every cleanup step regardless of
//! earlier failures and reports what went wrong.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use testbed_common::{DatabaseFixture, EnvironmentConfig, EnvironmentFlags, RuntimeContext};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{ApiClient, ApiTransport, Config, ConfigGroup, Project, Resource};
use crate::browser::{
    resolve_engine_type, start_session, BrowserSession, EngineType, SessionConfiguration,
    SessionManager,
};
use crate::error::{E2eError, E2eResult, TeardownFailure, TeardownStep};
use crate::pages::{self, Credentials, LoginFlow, LoginPage, SiteSettingsPage};

/// A REST fixture scheduled for deletion at teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFixture {
    pub kind: &'static str,
    pub id: String,
    delete_command: String,
}

impl TrackedFixture {
    pub fn of<R: Resource>(resource: &R) -> Self {
        Self {
            kind: R::KIND,
            id: resource.id(),
            delete_command: resource.delete_command(),
        }
    }

    pub fn delete_command(&self) -> &str {
        &self.delete_command
    }
}

/// Outcome of a teardown that had no critical failure
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Fixtures deleted
    pub deleted: usize,
    /// Non-critical steps that failed
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Kind of suite being set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuiteKind {
    Ui,
    Api,
}

/// Collects the overrides for one [`TestEnvironment`]
pub struct TestEnvironmentBuilder {
    config: EnvironmentConfig,
    runtime: Option<RuntimeContext>,
    session_manager: Option<SessionManager>,
    transport: Option<Arc<dyn ApiTransport>>,
    login_flow: Option<Arc<dyn LoginFlow>>,
    database: Option<DatabaseFixture>,
}

impl TestEnvironmentBuilder {
    pub fn with_runtime(mut self, runtime: RuntimeContext) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_session_manager(mut self, manager: SessionManager) -> Self {
        self.session_manager = Some(manager);
        self
    }

    pub fn with_api_transport(mut self, transport: Arc<dyn ApiTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_login_flow(mut self, flow: Arc<dyn LoginFlow>) -> Self {
        self.login_flow = Some(flow);
        self
    }

    /// Use this fixture instead of the one described by `database`
    pub fn with_database(mut self, fixture: DatabaseFixture) -> Self {
        self.database = Some(fixture);
        self
    }

    /// Database, browser session and login helper
    pub async fn setup_ui(self) -> E2eResult<TestEnvironment> {
        self.setup(SuiteKind::Ui).await
    }

    /// Everything `setup_ui` does, then a logged-in REST client with the
    /// API enabled and a fresh project for the suite
    pub async fn setup_api(self) -> E2eResult<TestEnvironment> {
        self.setup(SuiteKind::Api).await
    }

    async fn setup(self, kind: SuiteKind) -> E2eResult<TestEnvironment> {
        let TestEnvironmentBuilder {
            mut config,
            runtime,
            session_manager,
            transport,
            login_flow,
            database,
        } = self;

        if let Some(runtime) = &runtime {
            config.apply_runtime(runtime);
        }

        let engine = resolve_engine_type(&config.browser.engine)
            .map_err(|e| e.in_stage("configuration"))?;
        let session_config = SessionConfiguration::from_section(&config.browser)
            .map_err(|e| e.in_stage("configuration"))?;
        let database = match (database, &config.database) {
            (Some(fixture), _) => Some(fixture),
            (None, Some(section)) => Some(
                DatabaseFixture::from_section(section)
                    .map_err(|e| E2eError::from(e).in_stage("configuration"))?,
            ),
            (None, None) => None,
        };
        let manager = session_manager.unwrap_or_else(|| default_session_manager(&config, engine));

        // Classified once per process; later environments share the first result
        let flags = EnvironmentFlags::global(&config);
        info!(
            "Setting up {:?} suite against {} (hosted: {}, enterprise: {}, trial: {})",
            kind,
            config.base_url(),
            flags.hosted,
            flags.enterprise,
            flags.trial
        );

        let login_flow = login_flow
            .unwrap_or_else(|| Arc::new(LoginPage::new(config.base_url())) as Arc<dyn LoginFlow>);
        let mut env = TestEnvironment {
            config,
            flags,
            session: None,
            login_flow,
            api: None,
            project: None,
            database,
            fixtures: Vec::new(),
            torn_down: false,
        };

        let provisioned = env
            .provision(kind, &manager, engine, &session_config, transport)
            .await;
        if let Err(e) = provisioned {
            error!("Setup failed: {}", e);
            if let Err(teardown) = env.teardown().await {
                error!("Teardown after failed setup also failed: {}", teardown);
            }
            return Err(e);
        }

        Ok(env)
    }
}

fn default_session_manager(config: &EnvironmentConfig, engine: EngineType) -> SessionManager {
    let manager = SessionManager::with_defaults();
    match &config.browser.driver_path {
        Some(path) if engine != EngineType::Remote => manager.with_driver_override(engine, path),
        _ => manager,
    }
}

/// Resources one suite runs against
pub struct TestEnvironment {
    config: EnvironmentConfig,
    flags: EnvironmentFlags,
    session: Option<BrowserSession>,
    login_flow: Arc<dyn LoginFlow>,
    api: Option<ApiClient>,
    project: Option<Project>,
    database: Option<DatabaseFixture>,
    fixtures: Vec<TrackedFixture>,
    torn_down: bool,
}

impl TestEnvironment {
    pub fn builder(config: EnvironmentConfig) -> TestEnvironmentBuilder {
        TestEnvironmentBuilder {
            config,
            runtime: None,
            session_manager: None,
            transport: None,
            login_flow: None,
            database: None,
        }
    }

    async fn provision(
        &mut self,
        kind: SuiteKind,
        manager: &SessionManager,
        engine: EngineType,
        session_config: &SessionConfiguration,
        transport: Option<Arc<dyn ApiTransport>>,
    ) -> E2eResult<()> {
        if let Some(database) = self.database.as_mut() {
            database
                .prepare()
                .await
                .map_err(|e| E2eError::from(e).in_stage("database"))?;
        }

        let session = manager
            .acquire_session(
                engine,
                session_config,
                Some(self.config.browser.capabilities.clone()),
                self.config.browser.remote_endpoint.as_deref(),
            )
            .await
            .map_err(|e| e.in_stage("browser"))?;
        let session = self.session.insert(session);
        start_session(Some(&*session), self.config.base_url())
            .await
            .map_err(|e| e.in_stage("browser"))?;

        if kind == SuiteKind::Ui {
            return Ok(());
        }

        let client = match transport {
            Some(transport) => ApiClient::new(transport),
            None => ApiClient::from_config(&self.config).map_err(|e| e.in_stage("api"))?,
        };
        self.simple_login().await.map_err(|e| e.in_stage("login"))?;
        if self.config.api.enabled {
            SiteSettingsPage::new(self.config.base_url())
                .enable_api(self.session()?)
                .await
                .map_err(|e| e.in_stage("api"))?;
        }
        self.api = Some(client);

        let name = project_name(self.config.api.project_name.as_deref());
        let project = self
            .create_project(&name)
            .await
            .map_err(|e| e.in_stage("project"))?;
        self.project = Some(project);
        Ok(())
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn flags(&self) -> EnvironmentFlags {
        self.flags
    }

    pub fn session(&self) -> E2eResult<&BrowserSession> {
        self.session.as_ref().ok_or(E2eError::NullSession)
    }

    pub fn login_flow(&self) -> &dyn LoginFlow {
        self.login_flow.as_ref()
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.config.username, &self.config.password)
    }

    /// Log in with the configured user, retrying transient failures
    pub async fn simple_login(&self) -> E2eResult<()> {
        pages::simple_login(self.login_flow(), self.session()?, &self.credentials()).await
    }

    /// REST client; only API suites have one
    pub fn api(&self) -> E2eResult<&ApiClient> {
        self.api
            .as_ref()
            .ok_or_else(|| E2eError::Config("REST client is only set up for API suites".into()))
    }

    /// The project created for an API suite
    pub fn project(&self) -> E2eResult<&Project> {
        self.project
            .as_ref()
            .ok_or_else(|| E2eError::Config("no suite project; use setup_api".into()))
    }

    pub fn database(&self) -> Option<&DatabaseFixture> {
        self.database.as_ref()
    }

    /// Fixtures still scheduled for deletion, oldest first
    pub fn tracked(&self) -> &[TrackedFixture] {
        &self.fixtures
    }

    /// Schedule `resource` for deletion at teardown
    pub fn track<R: Resource>(&mut self, resource: &R) {
        let fixture = TrackedFixture::of(resource);
        debug!("Tracking {} {}", fixture.kind, fixture.id);
        self.fixtures.push(fixture);
    }

    pub async fn create_project(&mut self, name: &str) -> E2eResult<Project> {
        let project: Project = self
            .api()?
            .add(None, &json!({ "name": name, "suite_mode": 1 }))
            .await?;
        info!("Created project {} ({})", project.name, project.id);
        self.track(&project);
        Ok(project)
    }

    pub async fn create_config_group(
        &mut self,
        project_id: u64,
        name: &str,
    ) -> E2eResult<ConfigGroup> {
        let group: ConfigGroup = self
            .api()?
            .add(Some(&project_id.to_string()), &json!({ "name": name }))
            .await?;
        self.track(&group);
        Ok(group)
    }

    pub async fn create_config(&mut self, group_id: u64, name: &str) -> E2eResult<Config> {
        let config: Config = self
            .api()?
            .add(Some(&group_id.to_string()), &json!({ "name": name }))
            .await?;
        self.track(&config);
        Ok(config)
    }

    /// Release the session, delete tracked fixtures newest first, then run
    /// the database teardown.
    ///
    /// Every step is attempted. Failed fixture deletions are reported in the
    /// returned [`TeardownReport`] and stay tracked; a failed session
    /// release or database teardown makes the whole call fail with
    /// [`E2eError::Teardown`]. A second call is a no-op.
    pub async fn teardown(&mut self) -> E2eResult<TeardownReport> {
        if self.torn_down {
            return Ok(TeardownReport::default());
        }
        self.torn_down = true;

        let mut report = TeardownReport::default();
        let mut critical = Vec::new();

        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.release().await {
                warn!("Failed to release browser session: {}", e);
                critical.push(TeardownFailure {
                    step: TeardownStep::ReleaseSession,
                    error: e,
                });
            }
        }

        match self.api.clone() {
            Some(api) => {
                let mut kept = Vec::new();
                while let Some(fixture) = self.fixtures.pop() {
                    match api.delete_command(fixture.delete_command()).await {
                        Ok(()) => {
                            debug!("Deleted {} {}", fixture.kind, fixture.id);
                            report.deleted += 1;
                        }
                        Err(e) => {
                            warn!("Failed to delete {} {}: {}", fixture.kind, fixture.id, e);
                            report.failures.push(TeardownFailure {
                                step: TeardownStep::DeleteFixture {
                                    kind: fixture.kind,
                                    id: fixture.id.clone(),
                                },
                                error: e,
                            });
                            kept.push(fixture);
                        }
                    }
                }
                kept.reverse();
                self.fixtures = kept;
            }
            None if !self.fixtures.is_empty() => {
                warn!(
                    "{} fixture(s) tracked without a REST client; leaving them in place",
                    self.fixtures.len()
                );
            }
            None => {}
        }

        if let Some(database) = self.database.as_mut() {
            if let Err(e) = database.teardown().await {
                critical.push(TeardownFailure {
                    step: TeardownStep::DatabaseTeardown,
                    error: e.into(),
                });
            }
        }

        if critical.is_empty() {
            info!(
                "Teardown finished: {} fixture(s) deleted, {} failure(s)",
                report.deleted,
                report.failures.len()
            );
            Ok(report)
        } else {
            critical.append(&mut report.failures);
            Err(E2eError::Teardown(critical))
        }
    }

    /// Run `test` against this environment, then tear it down.
    ///
    /// Teardown also runs when `test` panics; the panic resumes afterwards.
    /// A test error wins over a teardown error, which is only logged.
    pub async fn run<T, F>(mut self, test: F) -> E2eResult<T>
    where
        F: for<'a> FnOnce(&'a mut TestEnvironment) -> BoxFuture<'a, E2eResult<T>>,
    {
        let outcome = AssertUnwindSafe(test(&mut self)).catch_unwind().await;
        let teardown = self.teardown().await;

        match outcome {
            Err(panic) => {
                if let Err(e) = teardown {
                    error!("Teardown after panicking test failed: {}", e);
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Err(e)) => {
                if let Err(teardown) = teardown {
                    error!("Teardown after failed test failed: {}", teardown);
                }
                Err(e)
            }
            Ok(Ok(value)) => {
                teardown?;
                Ok(value)
            }
        }
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!(
                "TestEnvironment dropped without teardown; {} fixture(s) left behind",
                self.fixtures.len()
            );
        }
    }
}

fn project_name(prefix: Option<&str>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix.unwrap_or("testbed"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PlanEntry;

    #[test]
    fn test_project_names_are_unique() {
        let a = project_name(None);
        let b = project_name(Some("smoke"));
        assert!(a.starts_with("testbed-"));
        assert!(b.starts_with("smoke-"));
        assert_ne!(project_name(None), project_name(None));
    }

    #[test]
    fn test_tracked_fixture_uses_resource_delete_command() {
        let entry = PlanEntry {
            id: "abc".into(),
            suite_id: None,
            name: None,
            plan_id: 9,
        };
        let fixture = TrackedFixture::of(&entry);
        assert_eq!(fixture.kind, "plan_entry");
        assert_eq!(fixture.delete_command(), "delete_plan_entry/9/abc");
    }
}
