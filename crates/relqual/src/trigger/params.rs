//! Build parameter set for the qualification job.

use crate::model::ModelRelease;

const DEFAULT_MULTIBOX: &str = "dh1";
const DEFAULT_USERNODE: &str = "net004-us-sr04.sck2.cerebrascloud.com";

/// Parameters the job always receives with these fixed values.
const FIXED_PARAMETERS: &[(&str, &str)] = &[
    ("CUSTOM_MODEL_NAME", ""),
    ("MODEL_VARIANT_PARAMS", ""),
    ("PICK_DEFAULT_DRAFT_MODEL", "true"),
    ("DRAFT_MODEL_NAME", ""),
    ("CUSTOM_MODEL_CONFIG_FILE", ""),
    ("PROFILE_MODE", "release"),
    ("PROFILE_FLOW_NAME_FILTER", ""),
    ("PROFILE_ATTR_FILTER", ""),
    ("SERVER_MODE", "replica (Full replica server - requires systems)"),
    (
        "SERVER_CONFIG_PARAMS",
        "job_priority=p2\njob_timeout_s=172800\nreadiness_timeout_s=86400\n",
    ),
    ("CEREBRAS_API_HOST", ""),
    ("CEREBRAS_API_PORT", ""),
    ("APP_TAG_FROM_WORKSPACE", "false"),
    ("NAMESPACE", "inf-integ"),
    ("CONSTRAINTS", ""),
    ("USE_LOCAL_CHECKPOINT", "true"),
    ("REMOTEWORKDIRROOT", "/n0/lab/test"),
    ("RELEASE_DRY_RUN", "false"),
    ("RELEASE_KILL_SERVER_ON_ABORT", "true"),
    ("ENABLE_SERVER_AUTO_RECOVERY", "true"),
    (
        "TRAIN_PYTEST_ADDOPTS",
        "--cifparam runconfig.job_priority=p1 --cifparam runconfig.disable_version_check=true",
    ),
    ("CUSTOM_TRAIN_FILE", ""),
    ("COMMIT", ""),
    ("LOGLEVEL", "INFO"),
    ("BUILDID", "latest"),
    ("TRIGGER_AUTOMATED_MSG", "false"),
    ("EXTRA_ENV_VARS", ""),
    ("LAUNCH_AUTO_BISECT_JOB", "false"),
    (
        "IMPORT_SECRETS_FROM_VAULT",
        "OPENAI_API_KEY,EVAL_GITHUB_TOKEN,CEREBRAS_API_KEY,HF_TOKEN",
    ),
    ("BUILD_NAME_SUFFIX", ""),
    ("TEST_BRANCH", ""),
];

fn non_empty_or<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(default)
}

/// Form parameters for one model's build of `job_name`.
pub fn build_parameters(item: &ModelRelease, job_name: &str) -> Vec<(&'static str, String)> {
    let model_name = item.model_name.trim();
    let mut params: Vec<(&'static str, String)> = vec![
        ("project", job_name.to_string()),
        ("MODEL_NAME", model_name.to_string()),
        ("RELEASE_PROFILE", item.profile.trim().to_string()),
        ("MIQ_PROFILE_BRANCH", item.miq_branch.trim().to_string()),
        ("APP_TAG", item.app_tag.trim().to_string()),
        (
            "MULTIBOX",
            non_empty_or(item.multibox.as_deref(), DEFAULT_MULTIBOX).to_string(),
        ),
        (
            "USERNODE",
            non_empty_or(item.usernode.as_deref(), DEFAULT_USERNODE).to_string(),
        ),
        ("TRAIN_NAME", job_name.to_string()),
        ("branch", item.branch.trim().to_string()),
        (
            "Notes",
            format!("Triggered from Release Form Builder for {}", model_name),
        ),
        ("TARGET_RELEASE", item.release_target.trim().to_string()),
        ("JOB_LABELS", item.labels.trim().to_string()),
    ];
    params.extend(
        FIXED_PARAMETERS
            .iter()
            .map(|(name, value)| (*name, value.to_string())),
    );
    params
}
