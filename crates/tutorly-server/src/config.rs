//! Server configuration loaded from a TOML file.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;
use tutorly_db::DbConfig;
use tutorly_scheduling::SchedulingConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub scheduling: SchedulingConfig,
    /// Minimum spacing between two runs of the same compliance scan.
    pub scan_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            scheduling: SchedulingConfig::default(),
            scan_interval_secs: 3600,
        }
    }
}

impl ServerConfig {
    /// Read the file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let config: ServerConfig = toml::from_str(
            r#"
            scan_interval_secs = 600

            [db]
            url = "db.internal:8000"

            [scheduling]
            utc_offset_minutes = 120
            reminder_thresholds_days = [3, 7]
            "#,
        )
        .unwrap();

        assert_eq!(config.scan_interval_secs, 600);
        assert_eq!(config.db.url, "db.internal:8000");
        assert_eq!(config.db.namespace, "tutorly");
        assert_eq!(config.scheduling.utc_offset_minutes, 120);
        assert_eq!(config.scheduling.reminder_thresholds_days, vec![3, 7]);
        assert_eq!(config.scheduling.invoice_due_days, 5);
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = ServerConfig::load(Path::new("/nonexistent/tutorly.toml")).unwrap();
        assert_eq!(config.scan_interval_secs, 3600);
        assert_eq!(config.scheduling.default_horizon_days, 84);
    }
}
