pub mod settings;

pub use settings::{
    require, DashboardSettings, JenkinsSettings, JiraSettings, JobNaming, RuntimeSettings,
    Settings,
};
