//! Environment classification
//!
//! Suites branch on the kind of deployment they run against. The flags are
//! derived from the merged configuration once per process.

use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::EnvironmentConfig;

static GLOBAL: OnceCell<EnvironmentFlags> = OnceCell::new();

/// Deployment flags derived from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentFlags {
    pub hosted: bool,
    pub enterprise: bool,
    pub trial: bool,
}

impl EnvironmentFlags {
    /// Derive the flags from a merged configuration
    pub fn classify(config: &EnvironmentConfig) -> Self {
        let hosted_db = config
            .database
            .as_ref()
            .map(|db| db.dbtype.eq_ignore_ascii_case("hosted"))
            .unwrap_or(false);

        Self {
            hosted: config.hosted || hosted_db,
            enterprise: config.enterprise,
            trial: config.trial,
        }
    }

    /// Process-wide flags; the first configuration seen decides them
    pub fn global(config: &EnvironmentConfig) -> Self {
        *GLOBAL.get_or_init(|| Self::classify(config))
    }

    /// Flags already computed for this process, if any
    pub fn current() -> Option<Self> {
        GLOBAL.get().copied()
    }

    /// Self-managed deployment (not hosted)
    pub fn self_managed(&self) -> bool {
        !self.hosted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_flags() {
        let config = EnvironmentConfig::from_yaml(
            "server_name: https://x\nhosted: true\nenterprise: true\n",
        )
        .unwrap();
        let flags = EnvironmentFlags::classify(&config);
        assert!(flags.hosted);
        assert!(flags.enterprise);
        assert!(!flags.trial);
        assert!(!flags.self_managed());
    }

    #[test]
    fn test_hosted_dbtype_implies_hosted() {
        let config = EnvironmentConfig::from_yaml(
            "server_name: https://x\ndatabase:\n  dbtype: Hosted\n",
        )
        .unwrap();
        assert!(EnvironmentFlags::classify(&config).hosted);
    }

    #[test]
    fn test_defaults_are_self_managed() {
        let config = EnvironmentConfig::from_yaml("server_name: https://x\n").unwrap();
        assert_eq!(EnvironmentFlags::classify(&config), EnvironmentFlags::default());
    }

    #[test]
    fn test_global_is_computed_once() {
        let first = EnvironmentConfig::from_yaml("server_name: https://x\ntrial: true\n").unwrap();
        let second = EnvironmentConfig::from_yaml("server_name: https://y\n").unwrap();

        let a = EnvironmentFlags::global(&first);
        let b = EnvironmentFlags::global(&second);
        assert_eq!(a, b);
        assert_eq!(EnvironmentFlags::current(), Some(a));
    }
}
