//! Environment-derived settings.
//!
//! Every external service has its own section. A missing section never
//! fails loading; the feature that needs it reports a `ConfigError`
//! naming the first missing variable when it is used.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

const DEFAULT_RELEASE_JOB_PREFIX: &str = "csx-inference-release-qual";
const DEFAULT_PRECHECK_JOB_NAME: &str = "csx-inference-model-qual-v2";
const DEFAULT_DASHBOARD_USERNAME: &str = "relqual";
const DEFAULT_EPIC_TYPE_NAME: &str = "Epic";
const DEFAULT_TASK_TYPE_NAME: &str = "Task";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_IDLE_POLLS_BEFORE_STOP: u32 = 3;

/// Complete runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub jenkins: JenkinsSettings,
    pub dashboard: DashboardSettings,
    pub jira: JiraSettings,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Default)]
pub struct JenkinsSettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<SecretString>,
    pub template_job_name: Option<String>,
    pub naming: JobNaming,
}

/// Naming convention for CI jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNaming {
    /// Prefix of the per-release job cloned during initialization.
    pub release_job_prefix: String,
    /// Fixed job used for pre-check runs.
    pub precheck_job_name: String,
}

impl Default for JobNaming {
    fn default() -> Self {
        Self {
            release_job_prefix: DEFAULT_RELEASE_JOB_PREFIX.to_string(),
            precheck_job_name: DEFAULT_PRECHECK_JOB_NAME.to_string(),
        }
    }
}

impl JobNaming {
    /// Name of the CI job that runs release qualification for `release_target`.
    pub fn release_job_name(&self, release_target: &str) -> String {
        format!("{}-{}", self.release_job_prefix, release_target)
    }
}

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub base_url: Option<String>,
    pub default_username: String,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            default_username: DEFAULT_DASHBOARD_USERNAME.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct JiraSettings {
    pub url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<SecretString>,
    pub project_key: Option<String>,
    pub epic_type_name: String,
    pub task_type_name: String,
    pub epic_link_field_id: Option<String>,
    pub components_field_id: Option<String>,
    pub components_value_id: Option<String>,
}

impl Clone for JenkinsSettings {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            username: self.username.clone(),
            api_token: self.api_token.as_ref().map(clone_secret),
            template_job_name: self.template_job_name.clone(),
            naming: self.naming.clone(),
        }
    }
}

impl Clone for JiraSettings {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            email: self.email.clone(),
            api_token: self.api_token.as_ref().map(clone_secret),
            project_key: self.project_key.clone(),
            epic_type_name: self.epic_type_name.clone(),
            task_type_name: self.task_type_name.clone(),
            epic_link_field_id: self.epic_link_field_id.clone(),
            components_field_id: self.components_field_id.clone(),
            components_value_id: self.components_value_id.clone(),
        }
    }
}

impl Default for JiraSettings {
    fn default() -> Self {
        Self {
            url: None,
            email: None,
            api_token: None,
            project_key: None,
            epic_type_name: DEFAULT_EPIC_TYPE_NAME.to_string(),
            task_type_name: DEFAULT_TASK_TYPE_NAME.to_string(),
            epic_link_field_id: None,
            components_field_id: None,
            components_value_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub database_path: Option<PathBuf>,
    pub http_timeout: Duration,
    pub poll_interval: Duration,
    pub idle_polls_before_stop: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            idle_polls_before_stop: DEFAULT_IDLE_POLLS_BEFORE_STOP,
        }
    }
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads settings through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secret = |name: &str| get(name).map(SecretString::from);

        let naming_defaults = JobNaming::default();
        let jenkins = JenkinsSettings {
            url: get("JENKINS_URL").map(strip_trailing_slash),
            username: get("JENKINS_USERNAME"),
            api_token: secret("JENKINS_API_TOKEN"),
            template_job_name: get("JENKINS_TEMPLATE_JOB_NAME"),
            naming: JobNaming {
                release_job_prefix: get("JENKINS_RELEASE_JOB_PREFIX")
                    .unwrap_or(naming_defaults.release_job_prefix),
                precheck_job_name: get("JENKINS_PRECHECK_JOB_NAME")
                    .unwrap_or(naming_defaults.precheck_job_name),
            },
        };

        let dashboard = DashboardSettings {
            base_url: get("DASHBOARD_API_BASE_URL").map(strip_trailing_slash),
            default_username: get("DASHBOARD_DEFAULT_USERNAME")
                .unwrap_or_else(|| DEFAULT_DASHBOARD_USERNAME.to_string()),
        };

        let jira = JiraSettings {
            url: get("JIRA_URL").map(strip_trailing_slash),
            email: get("ATLASSIAN_EMAIL"),
            api_token: secret("ATLASSIAN_API_TOKEN"),
            project_key: get("JIRA_PROJECT_KEY"),
            epic_type_name: get("JIRA_EPIC_ISSUE_TYPE_NAME")
                .unwrap_or_else(|| DEFAULT_EPIC_TYPE_NAME.to_string()),
            task_type_name: get("JIRA_TASK_ISSUE_TYPE_NAME")
                .unwrap_or_else(|| DEFAULT_TASK_TYPE_NAME.to_string()),
            epic_link_field_id: get("JIRA_EPIC_LINK_FIELD_ID"),
            components_field_id: get("JIRA_COMPONENTS_FIELD_ID"),
            components_value_id: get("JIRA_COMPONENTS_VALUE_ID"),
        };

        let runtime = RuntimeSettings {
            database_path: get("RELQUAL_DATABASE_PATH").map(PathBuf::from),
            http_timeout: Duration::from_secs(parse_positive(
                get("RELQUAL_HTTP_TIMEOUT_SECS"),
                "RELQUAL_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            poll_interval: Duration::from_secs(parse_positive(
                get("RELQUAL_POLL_INTERVAL_SECS"),
                "RELQUAL_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            idle_polls_before_stop: parse_positive(
                get("RELQUAL_IDLE_POLLS_BEFORE_STOP"),
                "RELQUAL_IDLE_POLLS_BEFORE_STOP",
                DEFAULT_IDLE_POLLS_BEFORE_STOP,
            )?,
        };

        Ok(Self {
            jenkins,
            dashboard,
            jira,
            runtime,
        })
    }

    /// Resolved database path: explicit setting or `~/.relqual/data/relqual.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.runtime
            .database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

/// Returns the value or a `MissingVar` error for `name`.
pub fn require<'a, T: ?Sized>(value: Option<&'a T>, name: &'static str) -> Result<&'a T, ConfigError> {
    value.ok_or(ConfigError::MissingVar { name })
}

pub(crate) fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn strip_trailing_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_or<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            reason: format!("'{}': {}", raw, e),
        }),
    }
}

/// Like [`parse_or`] for counts and durations, where zero is rejected.
fn parse_positive<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let parsed = parse_or(value, name, default)?;
    if parsed == T::default() {
        return Err(ConfigError::InvalidValue {
            name,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert!(settings.jenkins.url.is_none());
        assert_eq!(
            settings.jenkins.naming.release_job_name("r2540"),
            "csx-inference-release-qual-r2540"
        );
        assert_eq!(settings.jira.epic_type_name, "Epic");
        assert_eq!(settings.dashboard.default_username, "relqual");
        assert_eq!(settings.runtime.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.runtime.idle_polls_before_stop, 3);
    }

    #[test]
    fn test_values_are_trimmed_and_urls_normalized() {
        let settings = Settings::from_lookup(lookup(&[
            ("JENKINS_URL", "https://ci.example.com/ "),
            ("JENKINS_API_TOKEN", " secret "),
            ("JIRA_URL", "https://tickets.example.com/"),
            ("JENKINS_RELEASE_JOB_PREFIX", "qual"),
        ]))
        .unwrap();
        assert_eq!(settings.jenkins.url.as_deref(), Some("https://ci.example.com"));
        assert_eq!(
            settings.jenkins.api_token.as_ref().unwrap().expose_secret(),
            "secret"
        );
        assert_eq!(settings.jira.url.as_deref(), Some("https://tickets.example.com"));
        assert_eq!(settings.jenkins.naming.release_job_name("r0001"), "qual-r0001");
    }

    #[test]
    fn test_empty_values_are_unset() {
        let settings = Settings::from_lookup(lookup(&[("DASHBOARD_API_BASE_URL", "   ")])).unwrap();
        assert!(settings.dashboard.base_url.is_none());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = Settings::from_lookup(lookup(&[("RELQUAL_POLL_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "RELQUAL_POLL_INTERVAL_SECS",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_idle_polls_rejected() {
        let err = Settings::from_lookup(lookup(&[("RELQUAL_IDLE_POLLS_BEFORE_STOP", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_zero_interval_and_timeout_rejected() {
        for name in ["RELQUAL_POLL_INTERVAL_SECS", "RELQUAL_HTTP_TIMEOUT_SECS"] {
            match Settings::from_lookup(lookup(&[(name, "0")])) {
                Err(ConfigError::InvalidValue { name: got, reason }) => {
                    assert_eq!(got, name);
                    assert_eq!(reason, "must be at least 1");
                }
                other => panic!("{} = 0 accepted: {:?}", name, other.map(|_| ())),
            }
        }

        let settings = Settings::from_lookup(lookup(&[("RELQUAL_POLL_INTERVAL_SECS", "1")])).unwrap();
        assert_eq!(settings.runtime.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_require_names_missing_var() {
        let value: Option<&str> = None;
        assert_eq!(
            require(value, "JIRA_URL").unwrap_err(),
            ConfigError::MissingVar { name: "JIRA_URL" }
        );
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("JENKINS_TEMPLATE_JOB_NAME", "qual-template");
        let settings = Settings::from_env().unwrap();
        std::env::remove_var("JENKINS_TEMPLATE_JOB_NAME");
        assert_eq!(
            settings.jenkins.template_job_name.as_deref(),
            Some("qual-template")
        );
    }
}
