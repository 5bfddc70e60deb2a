//! Environment selection and override-file resolution.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::document::ConfigDocument;
use crate::config::env_interpolation::{process_env, EnvLookup};
use crate::config::loader::{ConfigError, ConfigLoader};

/// Variable naming the active environment.
pub const ENV_SELECTOR: &str = "TRELLIS_ENV";
/// Truthy value forces the development environment.
pub const FORCE_DEV_FLAG: &str = "TRELLIS_FORCE_DEV";
/// Overrides the directory holding `app.yaml`.
pub const CONFIG_DIR_VAR: &str = "TRELLIS_CONFIG_DIR";

pub const DEFAULT_CONFIG_DIR: &str = "config";
pub const BASE_FILE: &str = "app.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
    Custom(String),
}

impl Environment {
    /// Parse an environment name. Known names match case-insensitively;
    /// unknown names become `Custom` with their case kept, so `QA` selects
    /// `app.QA.yaml`. An empty name means development.
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        match name.to_ascii_lowercase().as_str() {
            "" | "dev" | "development" => Environment::Development,
            "stage" | "staging" => Environment::Staging,
            "prod" | "production" => Environment::Production,
            _ => Environment::Custom(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
            Environment::Custom(name) => name,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    /// File name of this environment's override document.
    pub fn override_file(&self) -> String {
        format!("app.{}.yaml", self.as_str())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Environment {
    fn from(name: &str) -> Self {
        Environment::parse(name)
    }
}

/// Result of environment resolution.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub environment: Environment,
    /// The file the loader started from.
    pub source: PathBuf,
    pub document: ConfigDocument,
}

/// Picks the environment and loads the matching configuration files.
#[derive(Clone)]
pub struct EnvironmentResolver {
    env: Arc<EnvLookup>,
    config_dir: Option<PathBuf>,
}

impl fmt::Debug for EnvironmentResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentResolver")
            .field("config_dir", &self.config_dir)
            .finish_non_exhaustive()
    }
}

impl EnvironmentResolver {
    pub fn from_process_env() -> Self {
        Self {
            env: process_env(),
            config_dir: None,
        }
    }

    /// Resolver reading variables through `lookup` instead of the process
    /// environment.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            env: Arc::new(lookup),
            config_dir: None,
        }
    }

    /// Explicit directory; takes precedence over `TRELLIS_CONFIG_DIR`.
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn environment(&self) -> Environment {
        if self.flag(FORCE_DEV_FLAG) {
            return Environment::Development;
        }
        (self.env)(ENV_SELECTOR)
            .map(|name| Environment::parse(&name))
            .unwrap_or_default()
    }

    pub fn resolved_config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        (self.env)(CONFIG_DIR_VAR)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR))
    }

    /// Load the configuration for the environment named by the process
    /// variables.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let environment = self.environment();
        self.resolve_for(environment)
    }

    /// Load the configuration for an explicit environment.
    pub fn resolve_for(&self, environment: Environment) -> Result<ResolvedConfig, ConfigError> {
        let dir = self.resolved_config_dir();
        let base = dir.join(BASE_FILE);
        let overlay = dir.join(environment.override_file());
        let loader = ConfigLoader::with_shared_env(self.env.clone());

        let (source, document) = if overlay.is_file() {
            let base_ref = base.is_file().then_some(base.as_path());
            let document = loader.load_override(&overlay, base_ref)?;
            (overlay, document)
        } else {
            tracing::debug!(
                environment = %environment,
                missing = %overlay.display(),
                "No environment override, using base configuration"
            );
            let document = loader.load(&base)?;
            (base, document)
        };

        tracing::info!(
            environment = %environment,
            source = %source.display(),
            keys = document.len(),
            "Configuration resolved"
        );

        Ok(ResolvedConfig {
            environment,
            source,
            document,
        })
    }

    fn flag(&self, name: &str) -> bool {
        (self.env)(name)
            .map(|value| is_truthy(&value))
            .unwrap_or(false)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir, vars: &[(&str, &str)]) -> EnvironmentResolver {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvironmentResolver::with_lookup(move |name| vars.get(name).cloned())
            .config_dir(dir.path())
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::parse("PROD"), Environment::Production);
        assert_eq!(Environment::parse("stage"), Environment::Staging);
        assert_eq!(Environment::parse(""), Environment::Development);
        assert_eq!(Environment::parse("qa"), Environment::Custom("qa".into()));
        assert_eq!(Environment::parse(" QA "), Environment::Custom("QA".into()));
        assert_eq!(Environment::parse("QA").override_file(), "app.QA.yaml");
        assert_eq!(Environment::Staging.override_file(), "app.staging.yaml");
    }

    #[test]
    fn test_force_dev_flag_wins() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir, &[(ENV_SELECTOR, "production"), (FORCE_DEV_FLAG, "yes")]);
        assert_eq!(r.environment(), Environment::Development);

        let r = resolver(&dir, &[(ENV_SELECTOR, "production"), (FORCE_DEV_FLAG, "0")]);
        assert_eq!(r.environment(), Environment::Production);
    }

    #[test]
    fn test_config_dir_from_variable() {
        let r = EnvironmentResolver::with_lookup(|name| {
            (name == CONFIG_DIR_VAR).then(|| "/etc/trellis".to_string())
        });
        assert_eq!(r.resolved_config_dir(), PathBuf::from("/etc/trellis"));
        let r = EnvironmentResolver::with_lookup(|_| None);
        assert_eq!(r.resolved_config_dir(), PathBuf::from(DEFAULT_CONFIG_DIR));
    }

    #[test]
    fn test_missing_override_falls_back_to_base() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(BASE_FILE), "name: base\n").unwrap();

        let resolved = resolver(&dir, &[(ENV_SELECTOR, "staging")]).resolve().unwrap();
        assert_eq!(resolved.environment, Environment::Staging);
        assert!(resolved.source.ends_with(BASE_FILE));
        assert_eq!(resolved.document.get("name").unwrap(), &Value::from("base"));
    }

    #[test]
    fn test_custom_environment_keeps_file_case() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(BASE_FILE), "name: base\n").unwrap();
        fs::write(dir.path().join("app.QA.yaml"), "name: qa\n").unwrap();

        let resolved = resolver(&dir, &[(ENV_SELECTOR, "QA")]).resolve().unwrap();
        assert_eq!(resolved.environment, Environment::Custom("QA".into()));
        assert!(resolved.source.ends_with("app.QA.yaml"));
        assert_eq!(resolved.document.get("name").unwrap(), &Value::from("qa"));
    }

    #[test]
    fn test_override_file_is_layered_on_base() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(BASE_FILE), "name: base\nport: 1\n").unwrap();
        fs::write(dir.path().join("app.production.yaml"), "port: 2\n").unwrap();

        let resolved = resolver(&dir, &[(ENV_SELECTOR, "prod")]).resolve().unwrap();
        assert!(resolved.source.ends_with("app.production.yaml"));
        assert_eq!(resolved.document.get("name").unwrap(), &Value::from("base"));
        assert_eq!(resolved.document.get("port").unwrap(), &Value::from(2));
    }

    #[test]
    fn test_missing_base_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = resolver(&dir, &[]).resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
