//! Database fixture lifecycle
//!
//! ```text
//! Uninitialized ─prepare─▶ SetupRun? ─▶ DumpReplayed? ─▶ Ready ─teardown─▶ TeardownRun? ─▶ Closed
//! ```
//!
//! The setup and dump steps are skipped when their script is absent, the
//! teardown step when no teardown script was registered.

use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{execute, replay_dump, DatabaseConfig, SqlScript};
use crate::config::DatabaseSection;
use crate::{Error, Result};

/// Lifecycle state of a [`DatabaseFixture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Uninitialized,
    SetupRun,
    DumpReplayed,
    Ready,
    TeardownRun,
    Closed,
}

impl fmt::Display for FixtureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FixtureState::Uninitialized => "uninitialized",
            FixtureState::SetupRun => "setup_run",
            FixtureState::DumpReplayed => "dump_replayed",
            FixtureState::Ready => "ready",
            FixtureState::TeardownRun => "teardown_run",
            FixtureState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Database state owned by one suite
#[derive(Debug, Clone)]
pub struct DatabaseFixture {
    config: DatabaseConfig,
    setup: SqlScript,
    dump: Option<PathBuf>,
    teardown: Option<SqlScript>,
    state: FixtureState,
}

impl DatabaseFixture {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            setup: SqlScript::default(),
            dump: None,
            teardown: None,
            state: FixtureState::Uninitialized,
        }
    }

    /// Build a fixture from the database section, reading any script files it names
    pub fn from_section(section: &DatabaseSection) -> Result<Self> {
        let mut fixture = Self::new(DatabaseConfig::from_section(section)?);
        if let Some(path) = &section.setup {
            fixture.setup = SqlScript::read(path)?;
        }
        if let Some(path) = &section.teardown {
            fixture.teardown = Some(SqlScript::read(path)?);
        }
        fixture.dump = section.dump.clone();
        Ok(fixture)
    }

    pub fn with_setup(mut self, script: SqlScript) -> Self {
        self.setup = script;
        self
    }

    pub fn with_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump = Some(path.into());
        self
    }

    pub fn with_teardown(mut self, script: SqlScript) -> Self {
        self.teardown = Some(script);
        self
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn state(&self) -> FixtureState {
        self.state
    }

    pub fn has_teardown(&self) -> bool {
        self.teardown.is_some()
    }

    /// Run setup and dump replay, leaving the fixture `Ready`
    pub async fn prepare(&mut self) -> Result<()> {
        if self.state != FixtureState::Uninitialized {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: FixtureState::Ready.to_string(),
            });
        }

        if !self.setup.is_empty() {
            info!(
                "Running {} database setup statement(s) on {}",
                self.setup.len(),
                self.config.dialect
            );
            execute(&self.setup, &self.config, false).await?;
            self.state = FixtureState::SetupRun;
        }

        if let Some(dump) = &self.dump {
            replay_dump(dump, &self.config).await?;
            self.state = FixtureState::DumpReplayed;
        }

        self.state = FixtureState::Ready;
        Ok(())
    }

    /// Run the teardown script, if any, and close the fixture.
    ///
    /// A fixture whose setup never committed closes without running
    /// teardown. The fixture is closed even when the teardown script fails,
    /// so a second call is a no-op.
    pub async fn teardown(&mut self) -> Result<()> {
        match self.state {
            FixtureState::Closed => return Ok(()),
            FixtureState::Uninitialized => {
                self.state = FixtureState::Closed;
                return Ok(());
            }
            _ => {}
        }

        let result = match &self.teardown {
            Some(script) if !script.is_empty() => {
                info!(
                    "Running {} database teardown statement(s) on {}",
                    script.len(),
                    self.config.dialect
                );
                execute(script, &self.config, false).await.map(|_| {
                    self.state = FixtureState::TeardownRun;
                })
            }
            _ => Ok(()),
        };

        if let Err(e) = &result {
            warn!("Database teardown failed: {}", e);
        }
        self.state = FixtureState::Closed;
        result
    }
}
