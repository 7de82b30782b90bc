//! Page helpers driven through a browser session

use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

use crate::browser::{BrowserSession, Locator};
use crate::error::{E2eError, E2eResult};

/// Attempts `simple_login` makes before surfacing the last error
pub const LOGIN_ATTEMPTS: usize = 3;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One complete UI login
#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn login(&self, session: &BrowserSession, credentials: &Credentials) -> E2eResult<()>;
}

#[derive(Debug, Clone)]
pub struct LoginLocators {
    pub username: Locator,
    pub password: Locator,
    pub submit: Locator,
    /// Present only once logged in
    pub user_menu: Locator,
}

impl Default for LoginLocators {
    fn default() -> Self {
        Self {
            username: Locator::Id("name".into()),
            password: Locator::Id("password".into()),
            submit: Locator::Id("button_primary".into()),
            user_menu: Locator::Id("navigation-user".into()),
        }
    }
}

/// The application's login form
#[derive(Debug, Clone)]
pub struct LoginPage {
    base_url: String,
    locators: LoginLocators,
}

impl LoginPage {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            locators: LoginLocators::default(),
        }
    }

    pub fn with_locators(mut self, locators: LoginLocators) -> Self {
        self.locators = locators;
        self
    }

    pub fn url(&self) -> String {
        format!("{}/index.php?/auth/login", self.base_url)
    }
}

#[async_trait]
impl LoginFlow for LoginPage {
    async fn login(&self, session: &BrowserSession, credentials: &Credentials) -> E2eResult<()> {
        let driver = session.driver()?;
        driver.navigate(&self.url()).await?;

        let name = driver.find_element(&self.locators.username).await?;
        driver.clear(&name).await?;
        driver.send_keys(&name, &credentials.username).await?;

        let password = driver.find_element(&self.locators.password).await?;
        driver.clear(&password).await?;
        driver.send_keys(&password, &credentials.password).await?;

        let submit = driver.find_element(&self.locators.submit).await?;
        driver.click(&submit).await?;

        match driver.find_element(&self.locators.user_menu).await {
            Ok(_) => Ok(()),
            Err(E2eError::ElementNotFound(_)) => Err(E2eError::Login(format!(
                "{} is not logged in after submitting the form",
                credentials.username
            ))),
            Err(e) => Err(e),
        }
    }
}

/// Log in through `flow`, retrying up to [`LOGIN_ATTEMPTS`] times.
///
/// Every attempt starts from scratch; the error of the last attempt is
/// returned when all of them fail.
pub async fn simple_login(
    flow: &dyn LoginFlow,
    session: &BrowserSession,
    credentials: &Credentials,
) -> E2eResult<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match flow.login(session, credentials).await {
            Ok(()) => {
                info!("Logged in as {} (attempt {})", credentials.username, attempt);
                return Ok(());
            }
            Err(e) if attempt < LOGIN_ATTEMPTS => {
                warn!("Login attempt {} failed: {}", attempt, e);
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteSettingsLocators {
    pub api_tab: Locator,
    pub enable_api: Locator,
    pub save: Locator,
}

impl Default for SiteSettingsLocators {
    fn default() -> Self {
        Self {
            api_tab: Locator::Css("a[href='#api']".into()),
            enable_api: Locator::Id("api_enabled".into()),
            save: Locator::Id("accept".into()),
        }
    }
}

/// Administration > Site Settings
#[derive(Debug, Clone)]
pub struct SiteSettingsPage {
    base_url: String,
    locators: SiteSettingsLocators,
}

impl SiteSettingsPage {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            locators: SiteSettingsLocators::default(),
        }
    }

    pub fn with_locators(mut self, locators: SiteSettingsLocators) -> Self {
        self.locators = locators;
        self
    }

    pub fn url(&self) -> String {
        format!("{}/index.php?/admin/site_settings", self.base_url)
    }

    /// Turn the REST API on; returns whether the setting changed
    pub async fn enable_api(&self, session: &BrowserSession) -> E2eResult<bool> {
        let driver = session.driver()?;
        driver.navigate(&self.url()).await?;

        let tab = driver.find_element(&self.locators.api_tab).await?;
        driver.click(&tab).await?;

        let checkbox = driver.find_element(&self.locators.enable_api).await?;
        if driver.is_selected(&checkbox).await? {
            return Ok(false);
        }
        driver.click(&checkbox).await?;

        let save = driver.find_element(&self.locators.save).await?;
        driver.click(&save).await?;
        info!("Enabled the REST API");
        Ok(true)
    }
}
