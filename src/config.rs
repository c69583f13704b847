// Configuration: file, environment and defaults
use crate::http::{Credentials, HttpClientConfig, HttpTransport, Transport};
use crate::loader::Loader;
use crate::registry::ServiceRegistry;
use crate::resolver::{CacheMode, CachingResolver, DefaultResolver, ResourceResolver};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DtsConfig {
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub load: LoadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root; no caching when unset. Must already exist.
    pub directory: Option<PathBuf>,
    pub mode: CacheMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts for failed downloads
    pub retry_attempts: u32,
    /// Retry delay in milliseconds
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub user_agent: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadConfig {
    pub schemas: bool,
    pub linkbases: bool,
    /// Deadline for async loads in seconds
    pub timeout_seconds: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let client = HttpClientConfig::default();
        Self {
            timeout_seconds: client.timeout_seconds,
            retry_attempts: client.retry_attempts,
            retry_delay_ms: client.retry_delay_ms,
            max_retry_delay_ms: client.max_retry_delay_ms,
            user_agent: None,
            username: None,
            password: None,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            schemas: true,
            linkbases: true,
            timeout_seconds: None,
        }
    }
}

impl NetworkConfig {
    pub fn client_config(&self) -> HttpClientConfig {
        let mut client = HttpClientConfig {
            timeout_seconds: self.timeout_seconds,
            retry_attempts: self.retry_attempts,
            retry_delay_ms: self.retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
            ..Default::default()
        };
        if let Some(agent) = &self.user_agent {
            client.user_agent = agent.clone();
        }
        client
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.username
            .as_ref()
            .map(|user| Credentials::new(user.clone(), self.password.clone()))
    }
}

impl DtsConfig {
    /// Load configuration from a file (TOML or JSON)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(Error::Config(format!(
                "unsupported configuration file format: {}",
                ext
            ))),
            None => match toml::from_str::<Self>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str(&content)?),
            },
        }
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(self) -> Result<Self> {
        self.apply_environment_overrides_with(&SystemEnvProvider)
    }

    pub fn apply_environment_overrides_with(mut self, env: &impl EnvProvider) -> Result<Self> {
        if let Some(dir) = env.get("CRABRL_DTS_CACHE_DIR") {
            self.cache.directory = Some(PathBuf::from(dir));
        }

        if let Some(mode) = env.get("CRABRL_DTS_CACHE_MODE") {
            self.cache.mode = match mode.to_lowercase().as_str() {
                "populate" => CacheMode::Populate,
                "no-store" => CacheMode::NoStore,
                "offline" => CacheMode::Offline,
                _ => {
                    return Err(Error::Config(format!(
                        "Invalid CRABRL_DTS_CACHE_MODE value: {}",
                        mode
                    )))
                }
            };
        }

        if let Some(timeout) = env.get("CRABRL_DTS_TIMEOUT") {
            self.network.timeout_seconds = timeout.parse().map_err(|_| {
                Error::Config(format!("Invalid CRABRL_DTS_TIMEOUT value: {}", timeout))
            })?;
        }

        if let Some(retries) = env.get("CRABRL_DTS_RETRIES") {
            self.network.retry_attempts = retries.parse().map_err(|_| {
                Error::Config(format!("Invalid CRABRL_DTS_RETRIES value: {}", retries))
            })?;
        }

        if let Some(user) = env.get("CRABRL_DTS_USER") {
            self.network.username = Some(user);
        }

        if let Some(password) = env.get("CRABRL_DTS_PASSWORD") {
            self.network.password = Some(password);
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.timeout_seconds == 0 {
            return Err(Error::Config(
                "network.timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.network.max_retry_delay_ms < self.network.retry_delay_ms {
            return Err(Error::Config(
                "network.max_retry_delay_ms is below network.retry_delay_ms".to_string(),
            ));
        }
        if self.cache.mode == CacheMode::Offline && self.cache.directory.is_none() {
            return Err(Error::Config(
                "offline cache mode needs cache.directory".to_string(),
            ));
        }
        if self.network.password.is_some() && self.network.username.is_none() {
            return Err(Error::Config(
                "network.password is set without network.username".to_string(),
            ));
        }
        Ok(())
    }

    /// Default bindings, with the resource resolver built from the cache
    /// and network sections.
    pub fn build_registry(&self) -> Result<ServiceRegistry> {
        self.validate()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(self.network.client_config()));
        let credentials = self.network.credentials();

        let resolver: Arc<dyn ResourceResolver> = match &self.cache.directory {
            Some(directory) => {
                let mut resolver = CachingResolver::with_mode(directory, self.cache.mode)?
                    .with_transport(transport);
                if let Some(credentials) = credentials {
                    resolver = resolver.with_credentials(credentials);
                }
                Arc::new(resolver)
            }
            None => {
                let mut resolver = DefaultResolver::with_transport(transport);
                if let Some(credentials) = credentials {
                    resolver = resolver.with_credentials(credentials);
                }
                Arc::new(resolver)
            }
        };

        let registry = ServiceRegistry::with_defaults();
        registry.register_instance::<dyn ResourceResolver>(resolver);
        Ok(registry)
    }

    /// A loader configured from the `load` section.
    pub fn loader(&self, registry: &ServiceRegistry) -> Result<Loader> {
        let loader = Loader::new(registry)?
            .with_schema_loading(self.load.schemas)
            .with_linkbase_loading(self.load.linkbases);
        Ok(match self.load.timeout_seconds {
            Some(seconds) => loader.with_timeout(Duration::from_secs(seconds)),
            None => loader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct MockEnv(HashMap<&'static str, &'static str>);

    impl EnvProvider for MockEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = DtsConfig::default();
        assert_eq!(config.cache.directory, None);
        assert_eq!(config.cache.mode, CacheMode::Populate);
        assert_eq!(config.network.timeout_seconds, 30);
        assert_eq!(config.network.retry_attempts, 3);
        assert!(config.load.schemas && config.load.linkbases);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crabrl-dts.toml");
        std::fs::write(
            &path,
            r#"
[cache]
directory = "/var/cache/xbrl"
mode = "offline"

[network]
timeout_seconds = 5
username = "filer"
"#,
        )
        .unwrap();

        let config = DtsConfig::load_from_file(&path).unwrap();
        assert_eq!(config.cache.directory, Some(PathBuf::from("/var/cache/xbrl")));
        assert_eq!(config.cache.mode, CacheMode::Offline);
        assert_eq!(config.network.timeout_seconds, 5);
        assert_eq!(config.network.retry_attempts, 3);
        assert_eq!(
            config.network.credentials(),
            Some(Credentials::new("filer", None))
        );
        assert_eq!(config.load, LoadConfig::default());
    }

    #[test]
    fn test_load_json_and_reject_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("config.json");
        std::fs::write(&json, r#"{"load": {"linkbases": false, "timeout_seconds": 10}}"#).unwrap();
        let config = DtsConfig::load_from_file(&json).unwrap();
        assert!(!config.load.linkbases);
        assert_eq!(config.load.timeout_seconds, Some(10));

        let yaml = dir.path().join("config.yaml");
        std::fs::write(&yaml, "load: {}").unwrap();
        assert!(matches!(DtsConfig::load_from_file(&yaml), Err(Error::Config(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let env = MockEnv(HashMap::from([
            ("CRABRL_DTS_CACHE_DIR", "/tmp/dts-cache"),
            ("CRABRL_DTS_CACHE_MODE", "no-store"),
            ("CRABRL_DTS_TIMEOUT", "12"),
            ("CRABRL_DTS_RETRIES", "0"),
            ("CRABRL_DTS_USER", "filer"),
            ("CRABRL_DTS_PASSWORD", "secret"),
        ]));
        let config = DtsConfig::default().apply_environment_overrides_with(&env).unwrap();
        assert_eq!(config.cache.directory, Some(PathBuf::from("/tmp/dts-cache")));
        assert_eq!(config.cache.mode, CacheMode::NoStore);
        assert_eq!(config.network.timeout_seconds, 12);
        assert_eq!(config.network.retry_attempts, 0);
        assert_eq!(
            config.network.credentials(),
            Some(Credentials::new("filer", Some("secret".to_string())))
        );
    }

    #[test]
    fn test_invalid_environment_values() {
        for (key, value) in [
            ("CRABRL_DTS_TIMEOUT", "soon"),
            ("CRABRL_DTS_RETRIES", "-1"),
            ("CRABRL_DTS_CACHE_MODE", "sometimes"),
        ] {
            let env = MockEnv(HashMap::from([(key, value)]));
            assert!(matches!(
                DtsConfig::default().apply_environment_overrides_with(&env),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn test_validation() {
        let mut config = DtsConfig::default();
        config.cache.mode = CacheMode::Offline;
        assert!(config.validate().is_err());

        let mut config = DtsConfig::default();
        config.network.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = DtsConfig::default();
        config.network.password = Some("secret".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_registry_checks_cache_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DtsConfig::default();
        config.cache.directory = Some(dir.path().join("missing"));
        assert!(matches!(config.build_registry(), Err(Error::Config(_))));

        config.cache.directory = Some(dir.path().to_path_buf());
        let registry = config.build_registry().unwrap();
        assert!(registry.resolve::<dyn ResourceResolver>().is_ok());
        assert!(config.loader(&registry).is_ok());
    }
}
