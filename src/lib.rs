//! Lianyi clinic management core library
//!
//! Patient registration, session logging, history review and a session timer on
//! top of a hosted document store, gated by a per-identity authorization record.

pub mod core;
pub mod db;
pub mod error;
pub mod models;
pub mod ui;

pub use crate::core::ClinicClient;

/// Application configuration
pub mod config {
    use std::time::Duration;

    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize)]
    pub struct Config {
        pub firebase: FirebaseConfig,
        #[serde(default)]
        pub identity: IdentityConfig,
        pub listen: ListenConfig,
    }

    /// Project identifiers of the hosted store and identity service. Opaque values.
    #[derive(Debug, Clone, Deserialize)]
    pub struct FirebaseConfig {
        pub api_key: String,
        pub auth_domain: String,
        pub project_id: String,
        pub storage_bucket: String,
        pub messaging_sender_id: String,
        pub app_id: String,
    }

    /// Account signed in by the command line client.
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct IdentityConfig {
        pub email: Option<String>,
        pub display_name: Option<String>,
        pub id_token: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ListenConfig {
        pub poll_interval_ms: u64,
    }

    impl ListenConfig {
        pub fn poll_interval(&self) -> Duration {
            Duration::from_millis(self.poll_interval_ms.max(1))
        }
    }

    /// Load configuration from file
    pub fn load_config() -> Result<Config, config::ConfigError> {
        let env = std::env::var("LIANYI_ENV").unwrap_or_else(|_| "development".into());

        config::Config::builder()
            // Start with default settings
            .set_default("firebase.api_key", "")?
            .set_default("firebase.auth_domain", "")?
            .set_default("firebase.project_id", "")?
            .set_default("firebase.storage_bucket", "")?
            .set_default("firebase.messaging_sender_id", "")?
            .set_default("firebase.app_id", "")?
            .set_default("listen.poll_interval_ms", 2_000)?
            .add_source(config::File::with_name("config/default").required(false))
            // Override with environment-specific settings
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables, e.g. LIANYI__FIREBASE__PROJECT_ID
            .add_source(config::Environment::with_prefix("LIANYI").separator("__"))
            .build()?
            .try_deserialize()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn defaults_deserialize_without_files() {
            let config: Config = config::Config::builder()
                .set_default("firebase.api_key", "k")
                .unwrap()
                .set_default("firebase.auth_domain", "clinic.example.com")
                .unwrap()
                .set_default("firebase.project_id", "clinic")
                .unwrap()
                .set_default("firebase.storage_bucket", "")
                .unwrap()
                .set_default("firebase.messaging_sender_id", "")
                .unwrap()
                .set_default("firebase.app_id", "")
                .unwrap()
                .set_default("listen.poll_interval_ms", 0)
                .unwrap()
                .build()
                .unwrap()
                .try_deserialize()
                .unwrap();

            assert_eq!(config.firebase.project_id, "clinic");
            assert!(config.identity.email.is_none());
            assert_eq!(config.listen.poll_interval(), Duration::from_millis(1));
        }
    }
}
