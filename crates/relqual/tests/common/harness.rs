//! Mock upstream services plus an in-memory store.

#![allow(dead_code)]

use std::collections::HashMap;

use relqual::clients::{http_client, JenkinsClient};
use relqual::{Actions, Database, Initializer, Reconciler, Settings};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEMPLATE_JOB: &str = "csx-inference-release-qual-template";

pub struct TestHarness {
    pub jenkins: MockServer,
    pub dashboard: MockServer,
    pub jira: MockServer,
    pub db: Database,
    pub settings: Settings,
}

impl TestHarness {
    /// Starts the three mock services and loads settings pointing at them.
    pub async fn start() -> Self {
        let jenkins = MockServer::start().await;
        let dashboard = MockServer::start().await;
        let jira = MockServer::start().await;

        let vars: HashMap<&str, String> = HashMap::from([
            ("JENKINS_URL", jenkins.uri()),
            ("JENKINS_USERNAME", "ci-bot".to_string()),
            ("JENKINS_API_TOKEN", "jenkins-token".to_string()),
            ("JENKINS_TEMPLATE_JOB_NAME", TEMPLATE_JOB.to_string()),
            ("DASHBOARD_API_BASE_URL", format!("{}/api", dashboard.uri())),
            ("JIRA_URL", jira.uri()),
            ("ATLASSIAN_EMAIL", "bot@example.com".to_string()),
            ("ATLASSIAN_API_TOKEN", "jira-token".to_string()),
            ("JIRA_PROJECT_KEY", "QUAL".to_string()),
            ("JIRA_EPIC_LINK_FIELD_ID", "customfield_10014".to_string()),
            ("JIRA_COMPONENTS_FIELD_ID", "customfield_10200".to_string()),
            ("JIRA_COMPONENTS_VALUE_ID", "10301".to_string()),
            ("RELQUAL_HTTP_TIMEOUT_SECS", "5".to_string()),
        ]);
        let settings = Settings::from_lookup(|name| vars.get(name).cloned())
            .expect("harness settings should load");
        let db = Database::open_in_memory().expect("in-memory database");

        Self {
            jenkins,
            dashboard,
            jira,
            db,
            settings,
        }
    }

    pub fn actions(&self) -> Actions {
        Actions::new(self.settings.clone(), self.db.clone()).expect("actions")
    }

    pub fn initializer(&self) -> Initializer {
        let http = http_client(self.settings.runtime.http_timeout).expect("http client");
        Initializer::new(&self.settings, http, self.db.clone()).expect("initializer")
    }

    pub fn reconciler(&self) -> Reconciler {
        let http = http_client(self.settings.runtime.http_timeout).expect("http client");
        let jenkins = JenkinsClient::new(http, &self.settings.jenkins).expect("jenkins client");
        Reconciler::new(jenkins, self.db.clone())
    }

    /// Dashboard reports `targets` as its active release targets.
    pub async fn mount_targets(&self, targets: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/api/target-release"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "release": targets })))
            .mount(&self.dashboard)
            .await;
    }

    pub async fn mount_crumb(&self) {
        Mock::given(method("GET"))
            .and(path("/crumbIssuer/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "crumb": "abc123",
                "crumbRequestField": "Jenkins-Crumb"
            })))
            .mount(&self.jenkins)
            .await;
    }

    pub fn jenkins_url(&self, suffix: &str) -> String {
        format!("{}{}", self.jenkins.uri(), suffix)
    }
}
