use std::fmt;
use std::path::Path;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;

use crate::domain::errors::MigrationError;

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_share_base() -> u32 {
    100
}

/// Settings file of a migration run.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub source: StoreSettings,
    pub destination: StoreSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Connection to one etcd cluster and the key prefix the schema lives under.
#[derive(Clone, Deserialize)]
pub struct StoreSettings {
    pub endpoints: Vec<String>,
    pub prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, role: &str) -> Result<(), Report<MigrationError>> {
        if self.endpoints.is_empty() {
            return Err(invalid(format!("{role} has no endpoints")));
        }
        if let Some(endpoint) = self
            .endpoints
            .iter()
            .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
        {
            return Err(invalid(format!(
                "{role} endpoint {endpoint} must start with http:// or https://"
            )));
        }
        if self.prefix.trim_end_matches('/').is_empty() {
            return Err(invalid(format!("{role} prefix must not be empty")));
        }
        if self.timeout_secs == 0 {
            return Err(invalid(format!("{role} timeout_secs must be positive")));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(invalid(format!(
                "{role} username and password must be given together"
            )));
        }
        Ok(())
    }

    fn same_location(&self, other: &StoreSettings) -> bool {
        let normalize = |e: &String| e.trim_end_matches('/').to_string();
        self.prefix.trim_end_matches('/') == other.prefix.trim_end_matches('/')
            && self
                .endpoints
                .iter()
                .map(normalize)
                .any(|e| other.endpoints.iter().map(normalize).any(|o| o == e))
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("endpoints", &self.endpoints)
            .field("prefix", &self.prefix)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Shares per CPU in a freshly created node's pool
    #[serde(default = "default_share_base")]
    pub share_base: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            share_base: default_share_base(),
        }
    }
}

fn invalid(message: String) -> Report<MigrationError> {
    Report::new(MigrationError::Configuration { message })
}

impl Settings {
    /// Read and validate a settings file.
    pub async fn load(path: &Path) -> Result<Self, Report<MigrationError>> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .change_context_lazy(|| MigrationError::Configuration {
                message: format!("cannot read {}", path.display()),
            })?;
        Self::from_yaml(&raw).attach_printable_lazy(|| format!("settings file: {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self, Report<MigrationError>> {
        let settings: Settings =
            serde_yaml::from_str(raw).change_context(MigrationError::Configuration {
                message: "malformed settings".to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Report<MigrationError>> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;
        if self.scheduler.share_base == 0 {
            return Err(invalid("scheduler share_base must be positive".to_string()));
        }
        if self.source.same_location(&self.destination) {
            return Err(invalid(
                "source and destination point at the same endpoint and prefix".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    const MINIMAL: &str = r#"
source:
  endpoints: ["http://127.0.0.1:2379"]
  prefix: /eru-core
destination:
  endpoints: ["http://127.0.0.1:2379"]
  prefix: /eru
"#;

    fn message(err: &Report<MigrationError>) -> String {
        err.current_context().to_string()
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let settings = Settings::from_yaml(MINIMAL).expect("settings should parse");

        assert_eq!(settings.log_level, "INFO");
        assert_eq!(settings.scheduler.share_base, 100);
        assert_eq!(settings.source.timeout(), Duration::from_secs(10));
        assert_eq!(settings.destination.username, None);
    }

    #[test]
    fn same_endpoint_and_prefix_is_rejected() {
        let raw = MINIMAL.replace("prefix: /eru-core", "prefix: /eru/");

        let err = Settings::from_yaml(&raw).expect_err("settings should be rejected");

        assert!(message(&err).contains("same endpoint and prefix"));
    }

    #[test]
    fn partial_credentials_are_rejected() {
        let raw = MINIMAL.replace("prefix: /eru\n", "prefix: /eru\n  username: root\n");

        let err = Settings::from_yaml(&raw).expect_err("settings should be rejected");

        assert!(message(&err).contains("username and password"));
    }

    #[test]
    fn endpoint_scheme_is_checked() {
        let raw = MINIMAL.replacen("http://127.0.0.1:2379", "127.0.0.1:2379", 1);

        let err = Settings::from_yaml(&raw).expect_err("settings should be rejected");

        assert!(message(&err).contains("must start with http://"));
    }

    #[test]
    fn zero_share_base_is_rejected() {
        let raw = format!("{MINIMAL}scheduler:\n  share_base: 0\n");

        let err = Settings::from_yaml(&raw).expect_err("settings should be rejected");

        assert!(message(&err).contains("share_base"));
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let raw = MINIMAL.replace(
            "prefix: /eru\n",
            "prefix: /eru\n  username: root\n  password: hunter2\n",
        );
        let settings = Settings::from_yaml(&raw).expect("settings should parse");

        let rendered = format!("{settings:?}");

        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test(tokio::test)]
    async fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        file.write_all(MINIMAL.as_bytes())
            .expect("temp file should be written");

        let settings = Settings::load(file.path())
            .await
            .expect("settings should load");

        assert_eq!(settings.destination.prefix, "/eru");
    }

    #[test(tokio::test)]
    async fn missing_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("temp dir should be created");

        let err = Settings::load(&dir.path().join("absent.yaml"))
            .await
            .expect_err("load should fail");

        assert!(matches!(
            err.current_context(),
            MigrationError::Configuration { .. }
        ));
    }
}
