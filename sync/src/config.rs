//! Session configuration.

use std::env;

/// Name used when a session is not given one.
pub const DEFAULT_NAME: &str = "[DEFAULT]";

/// Connection options for a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Session name, recorded in the mirror
    pub name: String,
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    /// Database URL; derived from the project id when absent
    pub database_url: Option<String>,
    /// Deprecated single-URL form, rejected by [`SyncOptions::validate`]
    pub url: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            project_id: None,
            api_key: None,
            database_url: None,
            url: None,
        }
    }
}

impl SyncOptions {
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Load options from environment variables.
    ///
    /// Reads `MIRROR_PROJECT_ID`, `MIRROR_API_KEY`, `MIRROR_DATABASE_URL` and
    /// `MIRROR_APP_NAME`. Call `dotenvy::dotenv()` first to pick up a `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let options = Self {
            name: env::var("MIRROR_APP_NAME").unwrap_or_else(|_| DEFAULT_NAME.to_string()),
            project_id: env::var("MIRROR_PROJECT_ID").ok(),
            api_key: env::var("MIRROR_API_KEY").ok(),
            database_url: env::var("MIRROR_DATABASE_URL").ok(),
            url: None,
        };
        options.validate()?;
        Ok(options)
    }

    /// Check required parameters and derive the remote configuration.
    pub fn validate(&self) -> Result<RemoteConfig, ConfigError> {
        if self.url.is_some() {
            return Err(ConfigError::DeprecatedUrl);
        }
        let project_id = self
            .project_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingProjectId)?;
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(RemoteConfig {
            api_key: api_key.to_string(),
            auth_domain: format!("{}.firebaseapp.com", project_id),
            database_url: self
                .database_url
                .clone()
                .unwrap_or_else(|| format!("https://{}.firebaseio.com", project_id)),
            storage_bucket: format!("{}.appspot.com", project_id),
        })
    }
}

/// Connection parameters handed to a remote store client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub database_url: String,
    pub storage_bucket: String,
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("project_id is required (MIRROR_PROJECT_ID)")]
    MissingProjectId,

    #[error("api_key is required (MIRROR_API_KEY)")]
    MissingApiKey,

    #[error("the url option is no longer supported, use project_id and database_url")]
    DeprecatedUrl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_remote_config() {
        let config = SyncOptions::new("demo", "key").validate().unwrap();
        assert_eq!(config.auth_domain, "demo.firebaseapp.com");
        assert_eq!(config.database_url, "https://demo.firebaseio.com");
        assert_eq!(config.storage_bucket, "demo.appspot.com");

        let config = SyncOptions::new("demo", "key")
            .with_database_url("https://custom.example.com")
            .validate()
            .unwrap();
        assert_eq!(config.database_url, "https://custom.example.com");
    }

    #[test]
    fn rejects_missing_parameters() {
        let options = SyncOptions::default();
        assert_eq!(options.name, DEFAULT_NAME);
        assert_eq!(options.validate(), Err(ConfigError::MissingProjectId));

        let options = SyncOptions {
            project_id: Some("demo".into()),
            ..Default::default()
        };
        assert_eq!(options.validate(), Err(ConfigError::MissingApiKey));

        let options = SyncOptions {
            url: Some("https://demo.firebaseio.com".into()),
            ..SyncOptions::new("demo", "key")
        };
        assert_eq!(options.validate(), Err(ConfigError::DeprecatedUrl));
    }
}
