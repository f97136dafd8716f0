//! Release records and release request inputs.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

fn release_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^r\d{4}$").expect("release id pattern is valid"))
}

/// A validated release identifier such as `r2540`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ReleaseId(String);

impl ReleaseId {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let value = value.trim();
        if release_id_pattern().is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ValidationError::InvalidReleaseId(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReleaseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cross-system links for one release target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub release_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jenkins_job_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jenkins_job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira_epic_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira_epic_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Links to upsert for a release. `None` fields leave stored values alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseLinks {
    pub jenkins_job_url: Option<String>,
    pub jenkins_job_name: Option<String>,
    pub jira_epic_key: Option<String>,
    pub jira_epic_url: Option<String>,
}

/// One model's release request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRelease {
    pub model_name: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub branch: String,
    pub app_tag: String,
    #[serde(default)]
    pub miq_branch: String,
    #[serde(default)]
    pub profile: String,
    pub labels: String,
    pub release_target: String,
    /// Target hardware pool.
    #[serde(default)]
    pub multibox: Option<String>,
    #[serde(default)]
    pub usernode: Option<String>,
    #[serde(default)]
    pub monitor_link: Option<String>,
}

impl ModelRelease {
    /// Checks required fields and the release target format.
    pub fn validate(&self) -> Result<ReleaseId, ValidationError> {
        let model = self.model_name.trim();
        if model.is_empty() {
            return Err(ValidationError::MissingField {
                model: "<unnamed>".to_string(),
                field: "modelName",
            });
        }

        let required = [
            ("branch", &self.branch),
            ("appTag", &self.app_tag),
            ("labels", &self.labels),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    model: model.to_string(),
                    field,
                });
            }
        }

        if self.miq_branch.trim().is_empty() && self.profile.trim().is_empty() {
            return Err(ValidationError::MissingProfile {
                model: model.to_string(),
            });
        }

        ReleaseId::parse(&self.release_target)
    }

    /// Owner to record on external systems, falling back to `default_user`.
    pub fn owner_or<'a>(&'a self, default_user: &'a str) -> &'a str {
        self.owner
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(default_user)
    }
}

/// A validated, non-empty set of model releases sharing one release target.
#[derive(Debug, Clone)]
pub struct ReleaseBatch {
    target: ReleaseId,
    items: Vec<ModelRelease>,
}

impl ReleaseBatch {
    pub fn new(items: Vec<ModelRelease>) -> Result<Self, ValidationError> {
        if items.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }

        let targets: BTreeSet<&str> = items.iter().map(|r| r.release_target.trim()).collect();
        if targets.len() != 1 {
            return Err(ValidationError::MixedReleaseTargets {
                targets: targets.into_iter().collect::<Vec<_>>().join(", "),
            });
        }

        let mut target = None;
        for item in &items {
            target = Some(item.validate()?);
        }

        match target {
            Some(target) => Ok(Self { target, items }),
            None => Err(ValidationError::EmptyBatch),
        }
    }

    pub fn target(&self) -> &ReleaseId {
        &self.target
    }

    pub fn items(&self) -> &[ModelRelease] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, target: &str) -> ModelRelease {
        ModelRelease {
            model_name: name.to_string(),
            owner: Some("Ada Lovelace".to_string()),
            branch: "release/2.5".to_string(),
            app_tag: "app-2.5.0".to_string(),
            miq_branch: "main".to_string(),
            profile: String::new(),
            labels: "qual".to_string(),
            release_target: target.to_string(),
            multibox: None,
            usernode: None,
            monitor_link: None,
        }
    }

    #[test]
    fn test_release_id_format() {
        assert!(ReleaseId::parse("r2540").is_ok());
        assert_eq!(ReleaseId::parse(" r0001 ").unwrap().as_str(), "r0001");
        assert!(ReleaseId::parse("R2540").is_err());
        assert!(ReleaseId::parse("r254").is_err());
        assert!(ReleaseId::parse("r25400").is_err());
        assert!(ReleaseId::parse("2540").is_err());
    }

    #[test]
    fn test_batch_requires_items() {
        assert_eq!(
            ReleaseBatch::new(vec![]).unwrap_err(),
            ValidationError::EmptyBatch
        );
    }

    #[test]
    fn test_batch_rejects_mixed_targets() {
        let err = ReleaseBatch::new(vec![model("a", "r2540"), model("b", "r2541")]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MixedReleaseTargets {
                targets: "r2540, r2541".to_string()
            }
        );
    }

    #[test]
    fn test_batch_exposes_shared_target() {
        let batch = ReleaseBatch::new(vec![model("a", "r2540"), model("b", "r2540")]).unwrap();
        assert_eq!(batch.target().as_str(), "r2540");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_missing_profile_and_miq_branch() {
        let mut item = model("a", "r2540");
        item.miq_branch = String::new();
        assert_eq!(
            item.validate().unwrap_err(),
            ValidationError::MissingProfile {
                model: "a".to_string()
            }
        );
        item.profile = "release".to_string();
        assert!(item.validate().is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let mut item = model("a", "r2540");
        item.app_tag = " ".to_string();
        assert_eq!(
            item.validate().unwrap_err(),
            ValidationError::MissingField {
                model: "a".to_string(),
                field: "appTag"
            }
        );
    }

    #[test]
    fn test_owner_fallback() {
        let mut item = model("a", "r2540");
        assert_eq!(item.owner_or("ops"), "Ada Lovelace");
        item.owner = Some("  ".to_string());
        assert_eq!(item.owner_or("ops"), "ops");
        item.owner = None;
        assert_eq!(item.owner_or("ops"), "ops");
    }

    #[test]
    fn test_model_release_deserializes_camel_case() {
        let item: ModelRelease = serde_json::from_str(
            r#"{"modelName":"llama","branch":"b","appTag":"t","miqBranch":"main",
                "labels":"l","releaseTarget":"r2540","monitorLink":"http://mon"}"#,
        )
        .unwrap();
        assert_eq!(item.model_name, "llama");
        assert_eq!(item.profile, "");
        assert_eq!(item.monitor_link.as_deref(), Some("http://mon"));
    }
}
