//! Settings loaded from an optional TOML file and `MANTTO_*` environment
//! variables, plus tracing setup.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{MaintenanceError, MaintenanceResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub query_timeout_secs: u64,
    pub evaluations_table: String,
    pub rules_table: String,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Precedence: `MANTTO_*` variables, then the file, then `DATABASE_URL`
    /// and built-in defaults.
    pub fn load(path: Option<&Path>) -> MaintenanceResult<Self> {
        let mut builder = Config::builder()
            .set_default("max_connections", 5)?
            .set_default("query_timeout_secs", 10)?
            .set_default("evaluations_table", "evaluaciones")?
            .set_default("rules_table", "plan_mantto_general")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_default("database_url", url)?;
        }
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("MANTTO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if settings.database_url.trim().is_empty() {
            return Err(MaintenanceError::Config(
                "database_url must point at a Postgres instance".to_string(),
            ));
        }
        if settings.query_timeout_secs == 0 {
            return Err(MaintenanceError::Config(
                "query_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(settings)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Logs go to stderr; stdout carries only the flag lines.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
            _ => {
                fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
database_url = "postgres://mantto@localhost/zbeltia"
rules_table = "mantto.plan_mantto_general"
query_timeout_secs = 3

[logging]
format = "json"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.database_url, "postgres://mantto@localhost/zbeltia");
        assert_eq!(settings.rules_table, "mantto.plan_mantto_general");
        assert_eq!(settings.evaluations_table, "evaluaciones");
        assert_eq!(settings.max_connections, 5);
        assert_eq!(settings.query_timeout(), Duration::from_secs(3));
        assert_eq!(settings.logging.format, "json");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "database_url = \"postgres://localhost/zbeltia\"\nquery_timeout_secs = 0"
        )
        .unwrap();

        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, MaintenanceError::Config(_)));
    }
}
