//! Builders for model release requests.

#![allow(dead_code)]

use relqual::ModelRelease;

pub struct ModelReleaseBuilder {
    release: ModelRelease,
}

impl ModelReleaseBuilder {
    /// A valid request for `model_name` targeting r2540.
    pub fn new(model_name: &str) -> Self {
        Self {
            release: ModelRelease {
                model_name: model_name.to_string(),
                owner: None,
                branch: "release/2.5".to_string(),
                app_tag: "app-2.5.0".to_string(),
                miq_branch: "main".to_string(),
                profile: String::new(),
                labels: "qual".to_string(),
                release_target: "r2540".to_string(),
                multibox: None,
                usernode: None,
                monitor_link: None,
            },
        }
    }

    pub fn target(mut self, release_target: &str) -> Self {
        self.release.release_target = release_target.to_string();
        self
    }

    pub fn owner(mut self, owner: &str) -> Self {
        self.release.owner = Some(owner.to_string());
        self
    }

    pub fn multibox(mut self, multibox: &str) -> Self {
        self.release.multibox = Some(multibox.to_string());
        self
    }

    pub fn build(self) -> ModelRelease {
        self.release
    }
}

/// One request per model name, all targeting `release_target`.
pub fn batch(release_target: &str, model_names: &[&str]) -> Vec<ModelRelease> {
    model_names
        .iter()
        .map(|name| ModelReleaseBuilder::new(name).target(release_target).build())
        .collect()
}
