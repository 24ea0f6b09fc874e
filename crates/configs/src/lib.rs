use anyhow::Result;
use serde::{Deserialize, Serialize};
use anyhow::anyhow;

/// A single `[[services]]` entry, kept as a raw field map.
/// Field names and value types are checked by the service registry reconciler.
pub type ServiceSpecMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub kube: KubeConfig,
    #[serde(default)]
    pub services: Vec<ServiceSpecMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Kept for compatibility with multi-threaded deployments; the hub runs on a
    /// current-thread runtime and ignores values above one.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { worker_threads: Some(1) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
            sqlx_logging: false,
        }
    }
}

fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 600 }
fn default_acquire_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Where the hub API listens, e.g. `http://127.0.0.1:8081/`.
    #[serde(default = "default_bind_url")]
    pub bind_url: String,
    /// URL prefix of the whole deployment; always starts and ends with `/`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Public host used for subdomain hosting, e.g. `https://hub.example.org`.
    #[serde(default)]
    pub subdomain_host: String,
    /// Host that pods use to reach the hub API (`HUB_SERVICE_HOST` in-cluster).
    #[serde(default)]
    pub connect_host: Option<String>,
    /// Seconds between service health checks; 0 disables.
    #[serde(default = "default_service_check_interval")]
    pub service_check_interval_secs: u64,
    /// Seconds between last-activity refreshes; 0 disables.
    #[serde(default = "default_last_activity_interval")]
    pub last_activity_interval_secs: u64,
    #[serde(default)]
    pub reachability: ReachabilityConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_url: default_bind_url(),
            base_url: default_base_url(),
            subdomain_host: String::new(),
            connect_host: None,
            service_check_interval_secs: default_service_check_interval(),
            last_activity_interval_secs: default_last_activity_interval(),
            reachability: ReachabilityConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

fn default_bind_url() -> String { "http://127.0.0.1:8081/".into() }
fn default_base_url() -> String { "/".into() }
fn default_service_check_interval() -> u64 { 60 }
fn default_last_activity_interval() -> u64 { 300 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachabilityConfig {
    #[serde(default = "default_managed_tries")]
    pub managed_tries: u32,
    #[serde(default = "default_external_tries")]
    pub external_tries: u32,
    #[serde(default = "default_per_try_timeout_ms")]
    pub per_try_timeout_ms: u64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            managed_tries: default_managed_tries(),
            external_tries: default_external_tries(),
            per_try_timeout_ms: default_per_try_timeout_ms(),
        }
    }
}

fn default_managed_tries() -> u32 { 10 }
fn default_external_tries() -> u32 { 1 }
fn default_per_try_timeout_ms() -> u64 { 1000 }

/// Internal TLS used when probing services.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_file: Option<String>,
    #[serde(default)]
    pub accept_invalid_hostnames: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// REST API of the configurable-http-proxy.
    #[serde(default = "default_proxy_api_url")]
    pub api_url: String,
    /// Public URL of the proxy, only used for logging.
    #[serde(default = "default_proxy_public_url")]
    pub public_url: String,
    /// Filled from `CONFIGPROXY_AUTH_TOKEN` when empty.
    #[serde(default)]
    pub auth_token: String,
    /// Launch the proxy as a child process instead of expecting it to run.
    #[serde(default)]
    pub should_start: bool,
    #[serde(default = "default_proxy_command")]
    pub command: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_url: default_proxy_api_url(),
            public_url: default_proxy_public_url(),
            auth_token: String::new(),
            should_start: false,
            command: default_proxy_command(),
        }
    }
}

fn default_proxy_api_url() -> String { "http://127.0.0.1:8001".into() }
fn default_proxy_public_url() -> String { "http://0.0.0.0:8000".into() }
fn default_proxy_command() -> Vec<String> { vec!["configurable-http-proxy".into()] }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeConfig {
    /// Filled from `POD_NAMESPACE` when empty, then `default`.
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    #[serde(default = "default_pod_name_template")]
    pub pod_name_template: String,
    #[serde(default = "default_pvc_name_template")]
    pub pvc_name_template: String,
    #[serde(default = "default_volume_name_template")]
    pub volume_name_template: String,
    #[serde(default = "default_storage_capacity")]
    pub storage_capacity: String,
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    /// Environment variables copied from the hub process into every pod.
    #[serde(default = "default_env_keep")]
    pub env_keep: Vec<String>,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            kubectl: default_kubectl(),
            pod_name_template: default_pod_name_template(),
            pvc_name_template: default_pvc_name_template(),
            volume_name_template: default_volume_name_template(),
            storage_capacity: default_storage_capacity(),
            start_timeout_secs: default_start_timeout(),
            env_keep: default_env_keep(),
        }
    }
}

fn default_kubectl() -> String { "kubectl".into() }
fn default_pod_name_template() -> String { "jupyter-service{servername}".into() }
fn default_pvc_name_template() -> String { "claim-service{servername}".into() }
fn default_volume_name_template() -> String { "volume-service{servername}".into() }
fn default_storage_capacity() -> String { "1G".into() }
fn default_start_timeout() -> u64 { 60 }
fn default_env_keep() -> Vec<String> {
    ["PATH", "PYTHONPATH", "CONDA_ROOT", "CONDA_DEFAULT_ENV", "VIRTUAL_ENV", "LANG", "LC_ALL"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "hub_config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let cfg: AppConfig = toml::from_str(&content)?;
    Ok(cfg)
}

/// Write the default configuration as TOML.
pub fn write_default(path: &str) -> Result<()> {
    let content = toml::to_string_pretty(&AppConfig::default())?;
    std::fs::write(path, content)?;
    Ok(())
}

impl AppConfig {
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = load_default()?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.database.normalize_from_env();
        self.database.validate()?;
        self.hub.normalize()?;
        self.proxy.normalize_from_env();
        self.kube.normalize_from_env();
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn normalize_from_env(&mut self) {
        if self.url.trim().is_empty() {
            self.url = std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://jupyterhub.sqlite?mode=rwc".to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        let lower = self.url.to_lowercase();
        if !(lower.starts_with("postgresql://") || lower.starts_with("postgres://") || lower.starts_with("sqlite:")) {
            return Err(anyhow!("database.url must start with postgres://, postgresql:// or sqlite:"));
        }
        if self.min_connections == 0 {
            return Err(anyhow!("database.min_connections must be >= 1"));
        }
        if self.max_connections < self.min_connections {
            return Err(anyhow!("database.max_connections must be >= min_connections"));
        }
        if self.connect_timeout_secs == 0 || self.acquire_timeout_secs == 0 {
            return Err(anyhow!("database timeouts must be positive"));
        }
        Ok(())
    }
}

impl HubConfig {
    fn normalize(&mut self) -> Result<()> {
        if !self.base_url.starts_with('/') {
            self.base_url.insert(0, '/');
        }
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
        if self.connect_host.as_deref().map_or(true, |h| h.trim().is_empty()) {
            self.connect_host = std::env::var("HUB_SERVICE_HOST").ok().filter(|h| !h.is_empty());
        }
        let lower = self.bind_url.to_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(anyhow!("hub.bind_url must be an http:// or https:// URL"));
        }
        if self.reachability.managed_tries == 0 || self.reachability.external_tries == 0 {
            return Err(anyhow!("hub.reachability tries must be >= 1"));
        }
        if self.reachability.per_try_timeout_ms == 0 {
            return Err(anyhow!("hub.reachability.per_try_timeout_ms must be positive"));
        }
        Ok(())
    }
}

impl ProxyConfig {
    pub fn normalize_from_env(&mut self) {
        if self.auth_token.trim().is_empty() {
            if let Ok(token) = std::env::var("CONFIGPROXY_AUTH_TOKEN") {
                self.auth_token = token;
            }
        }
    }
}

impl KubeConfig {
    pub fn normalize_from_env(&mut self) {
        if self.namespace.trim().is_empty() {
            self.namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        }
    }
}
