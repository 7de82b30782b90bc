//! Testbed E2E environment provisioning
//!
//! Sets up and tears down what an end-to-end suite runs against:
//! - a WebDriver browser session for one of several engines
//! - a database in a known state (setup script, dump replay, teardown)
//! - REST fixtures created for the suite and deleted afterwards
//!
//! # Architecture
//!
//! ```text
//! TestEnvironment
//!   ├── setup_ui() / setup_api()
//!   │     ├── DatabaseFixture::prepare()      (testbed-common)
//!   │     ├── SessionManager::acquire_session()
//!   │     │     └── BrowserSession::start()
//!   │     └── simple_login(), ApiClient, suite project
//!   ├── track(), create_project(), create_config_group(), create_config()
//!   ├── run(test)        teardown on every exit path
//!   └── teardown()       session, fixtures newest first, database
//! ```

pub mod api;
pub mod browser;
pub mod environment;
pub mod error;
pub mod logging;
pub mod pages;

pub use api::{ApiClient, ApiTransport, HttpTransport, Resource};
pub use browser::{
    resolve_engine_type, BrowserSession, EngineType, SessionAction, SessionConfiguration,
    SessionManager, SessionOptions, WebDriver,
};
pub use environment::{TeardownReport, TestEnvironment, TestEnvironmentBuilder, TrackedFixture};
pub use error::{E2eError, E2eResult, TeardownFailure, TeardownStep};
pub use pages::{simple_login, Credentials, LoginFlow, LoginPage, LOGIN_ATTEMPTS};
