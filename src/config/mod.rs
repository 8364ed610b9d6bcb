use crate::cors::CorsConfig;
use crate::error::{GatewayError, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info};

/// Config file read when no path is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

/// Main gateway configuration
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend base URLs per route group
    #[serde(default)]
    pub services: ServicesConfig,
    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// CORS policy
    #[serde(default)]
    pub cors: CorsConfig,
    /// Route definitions
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
    /// Prometheus endpoint
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Backend request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Largest request body the gateway buffers before forwarding
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Route group a route is forwarded to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceGroup {
    Auth,
    ProjectDefect,
    Content,
}

impl ServiceGroup {
    pub const ALL: [ServiceGroup; 3] = [
        ServiceGroup::Auth,
        ServiceGroup::ProjectDefect,
        ServiceGroup::Content,
    ];

    /// Name used in logs, metrics and the aggregate health report
    pub fn service_name(&self) -> &'static str {
        match self {
            ServiceGroup::Auth => "auth-service",
            ServiceGroup::ProjectDefect => "project-defect-service",
            ServiceGroup::Content => "content-service",
        }
    }
}

/// Backend base URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_auth_service")]
    pub auth: String,
    #[serde(default = "default_project_defect_service")]
    pub project_defect: String,
    #[serde(default = "default_content_service")]
    pub content: String,
}

impl ServicesConfig {
    pub fn base_url(&self, group: ServiceGroup) -> &str {
        match group {
            ServiceGroup::Auth => &self.auth,
            ServiceGroup::ProjectDefect => &self.project_defect,
            ServiceGroup::Content => &self.content,
        }
    }
}

/// Route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route path pattern (e.g., "/api/users/:id")
    pub path: String,
    /// Allowed HTTP methods (if empty, all methods allowed)
    #[serde(default)]
    pub methods: Vec<String>,
    /// Route group whose backend receives the request
    pub service: ServiceGroup,
}

impl RouteConfig {
    fn new(path: &str, methods: &[&str], service: ServiceGroup) -> Self {
        Self {
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            service,
        }
    }
}

/// Bearer token verification
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret tokens are signed with
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: SecretString,
    /// Paths reachable without a token
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            public_paths: default_public_paths(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Rate for requests outside every other tier
    #[serde(default = "default_global_rate")]
    pub global: String,
    /// Rate for `/auth/*`
    #[serde(default = "default_auth_rate")]
    pub auth: String,
    /// Rate for other `/api/*` paths
    #[serde(default = "default_api_rate")]
    pub api: String,
    /// Rate for uploads
    #[serde(default = "default_upload_rate")]
    pub upload: String,
    /// Path prefix whose POST requests count as uploads
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    /// Count in Redis instead of in process
    #[serde(default)]
    pub use_redis: bool,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Bound on the startup connection and health probe
    #[serde(default = "default_redis_probe_timeout")]
    pub redis_probe_timeout_secs: u64,
    /// Honor `X-Real-IP` / `X-Forwarded-For`
    #[serde(default)]
    pub trust_proxy: bool,
    /// Peer addresses exempt from rate limiting
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            global: default_global_rate(),
            auth: default_auth_rate(),
            api: default_api_rate(),
            upload: default_upload_rate(),
            upload_path: default_upload_path(),
            use_redis: false,
            redis_url: default_redis_url(),
            redis_probe_timeout_secs: default_redis_probe_timeout(),
            trust_proxy: false,
            whitelist: vec![],
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    // Attachment uploads pass through the gateway
    32 * 1024 * 1024
}

fn default_auth_service() -> String {
    "http://auth-service:8081".to_string()
}

fn default_project_defect_service() -> String {
    "http://project-defect-service:8082".to_string()
}

fn default_content_service() -> String {
    "http://content-service:8083".to_string()
}

fn default_jwt_secret() -> SecretString {
    SecretString::new("development-secret-key".to_string())
}

fn default_public_paths() -> Vec<String> {
    vec!["/auth/register".to_string(), "/auth/login".to_string()]
}

fn default_global_rate() -> String {
    "1000-H".to_string()
}

fn default_auth_rate() -> String {
    "10-M".to_string()
}

fn default_api_rate() -> String {
    "100-M".to_string()
}

fn default_upload_rate() -> String {
    "20-H".to_string()
}

fn default_upload_path() -> String {
    "/api/attachments".to_string()
}

fn default_redis_url() -> String {
    "redis://redis:6379".to_string()
}

fn default_redis_probe_timeout() -> u64 {
    3
}

/// Routes of the deployment
pub fn default_routes() -> Vec<RouteConfig> {
    use ServiceGroup::*;

    vec![
        RouteConfig::new("/auth/register", &["POST"], Auth),
        RouteConfig::new("/auth/login", &["POST"], Auth),
        RouteConfig::new("/api/me", &["GET"], Auth),
        RouteConfig::new("/api/users", &["GET"], Auth),
        RouteConfig::new("/api/users/engineers", &["GET"], Auth),
        RouteConfig::new("/api/users/managers", &["GET"], Auth),
        RouteConfig::new("/api/users/:id", &["GET", "PUT"], Auth),
        RouteConfig::new("/api/projects", &["GET", "POST"], ProjectDefect),
        RouteConfig::new("/api/projects/:id", &["GET", "PUT", "DELETE"], ProjectDefect),
        RouteConfig::new("/api/defects", &["GET", "POST"], ProjectDefect),
        RouteConfig::new("/api/defects/my", &["GET"], ProjectDefect),
        RouteConfig::new("/api/defects/:id", &["GET", "PUT", "DELETE"], ProjectDefect),
        RouteConfig::new("/api/defects/:id/status", &["PATCH"], ProjectDefect),
        RouteConfig::new("/api/comments/defect/:defect_id", &["GET", "POST"], Content),
        RouteConfig::new("/api/comments/:id", &["PUT", "DELETE"], Content),
        RouteConfig::new("/api/attachments/defect/:defect_id", &["GET", "POST"], Content),
        RouteConfig::new("/api/attachments/:id/download", &["GET"], Content),
        RouteConfig::new("/api/attachments/:id", &["DELETE"], Content),
        RouteConfig::new("/api/reports/defects", &["GET"], Content),
        RouteConfig::new("/api/reports/defects/export", &["GET"], Content),
        RouteConfig::new("/api/reports/project/:project_id", &["GET"], Content),
        RouteConfig::new("/api/reports/user-activity", &["GET"], Content),
    ]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            services: ServicesConfig::default(),
            auth: AuthConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
            cors: CorsConfig::default(),
            routes: default_routes(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
            max_body_bytes: default_max_body_bytes(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            auth: default_auth_service(),
            project_defect: default_project_defect_service(),
            content: default_content_service(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load the file at `path`, or [`DEFAULT_CONFIG_PATH`] when none is given,
    /// then apply environment overrides.
    ///
    /// A missing default file means built-in defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_default(path, Path::new(DEFAULT_CONFIG_PATH))
    }

    fn load_with_default(path: Option<&str>, default_path: &Path) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if default_path.exists() => Self::from_file(default_path)?,
            None => {
                info!("No config file at {}, using defaults", default_path.display());
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// Empty values count as unset. Booleans are enabled only by the literal
    /// value `true`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(port) = lookup("GATEWAY_PORT") {
            self.server.port = port.trim().parse().map_err(|_| {
                GatewayError::Config(format!("GATEWAY_PORT is not a valid port: {}", port))
            })?;
        }

        let strings: [(&str, &mut String); 8] = [
            ("AUTH_SERVICE_URL", &mut self.services.auth),
            ("PROJECT_DEFECT_SERVICE_URL", &mut self.services.project_defect),
            ("CONTENT_SERVICE_URL", &mut self.services.content),
            ("RATE_LIMIT_GLOBAL", &mut self.rate_limiting.global),
            ("RATE_LIMIT_AUTH", &mut self.rate_limiting.auth),
            ("RATE_LIMIT_API", &mut self.rate_limiting.api),
            ("RATE_LIMIT_UPLOAD", &mut self.rate_limiting.upload),
            ("REDIS_URL", &mut self.rate_limiting.redis_url),
        ];
        for (name, slot) in strings {
            if let Some(value) = lookup(name) {
                debug!(variable = name, "Applying environment override");
                *slot = value;
            }
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = SecretString::new(secret);
        }
        if let Some(flag) = lookup("USE_REDIS_RATELIMIT") {
            self.rate_limiting.use_redis = flag == "true";
        }
        if let Some(flag) = lookup("TRUST_PROXY") {
            self.rate_limiting.trust_proxy = flag == "true";
        }
        if let Some(list) = lookup("WHITELIST_IPS") {
            self.rate_limiting.whitelist = list
                .split(',')
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.expose_secret().is_empty() {
            return Err(GatewayError::Config(
                "JWT secret cannot be empty".to_string(),
            ));
        }

        if self.server.timeout_secs == 0 {
            return Err(GatewayError::Config(
                "Backend timeout must be > 0".to_string(),
            ));
        }

        if self.server.max_body_bytes == 0 {
            return Err(GatewayError::Config(
                "Maximum body size must be > 0".to_string(),
            ));
        }

        for group in ServiceGroup::ALL {
            let base = self.services.base_url(group);
            let parsed = url::Url::parse(base).map_err(|e| {
                GatewayError::Config(format!(
                    "Invalid URL for {}: {} ({})",
                    group.service_name(),
                    base,
                    e
                ))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(GatewayError::Config(format!(
                    "Backend URL must start with http:// or https:// for {}",
                    group.service_name()
                )));
            }
        }

        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(GatewayError::InvalidRoute(format!(
                    "Route path must start with '/': {}",
                    route.path
                )));
            }

            for method in &route.methods {
                let method_upper = method.to_uppercase();
                if !["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"]
                    .contains(&method_upper.as_str())
                {
                    return Err(GatewayError::InvalidRoute(format!(
                        "Invalid HTTP method '{}' for route: {}",
                        method, route.path
                    )));
                }
            }
        }

        for entry in &self.rate_limiting.whitelist {
            if entry.trim().parse::<IpAddr>().is_err() {
                return Err(GatewayError::Config(format!(
                    "Whitelist entry is not an IP address: {}",
                    entry
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090
  timeout_secs: 5
  log_format: json

services:
  auth: "http://localhost:3001"

rate_limiting:
  auth: "3-M"
  use_redis: true
  whitelist: ["10.0.0.1"]

routes:
  - path: "/api/users/:id"
    methods: ["GET"]
    service: auth
"#;

        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.services.auth, "http://localhost:3001");
        assert_eq!(config.services.content, "http://content-service:8083");
        assert_eq!(config.rate_limiting.auth, "3-M");
        assert_eq!(config.rate_limiting.api, "100-M");
        assert!(config.rate_limiting.use_redis);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].service, ServiceGroup::Auth);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.rate_limiting.global, "1000-H");
        assert_eq!(config.rate_limiting.upload, "20-H");
        assert_eq!(config.rate_limiting.upload_path, "/api/attachments");
        assert_eq!(config.rate_limiting.redis_url, "redis://redis:6379");
        assert!(!config.rate_limiting.trust_proxy);
        assert_eq!(config.auth.jwt_secret.expose_secret(), "development-secret-key");
        assert_eq!(config.routes.len(), default_routes().len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides_from(env(&[
                ("GATEWAY_PORT", "9999"),
                ("CONTENT_SERVICE_URL", "http://localhost:7000"),
                ("JWT_SECRET", "s3cret"),
                ("RATE_LIMIT_API", "5-S"),
                ("USE_REDIS_RATELIMIT", "true"),
                ("TRUST_PROXY", "yes"),
                ("WHITELIST_IPS", " 10.0.0.1, ,192.168.1.5 "),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.services.content, "http://localhost:7000");
        assert_eq!(config.auth.jwt_secret.expose_secret(), "s3cret");
        assert_eq!(config.rate_limiting.api, "5-S");
        assert!(config.rate_limiting.use_redis);
        assert!(!config.rate_limiting.trust_proxy);
        assert_eq!(
            config.rate_limiting.whitelist,
            vec!["10.0.0.1".to_string(), "192.168.1.5".to_string()]
        );
    }

    #[test]
    fn test_default_config_carries_route_table() {
        let config = GatewayConfig::default();
        assert_eq!(config.routes.len(), default_routes().len());
        assert!(config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("gateway.yaml");

        let config = GatewayConfig::load_with_default(None, &default_path).unwrap();
        assert_eq!(config.routes.len(), default_routes().len());
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_default_file_is_read_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("gateway.yaml");
        std::fs::write(&default_path, "server:\n  timeout_secs: 7\n").unwrap();

        let config = GatewayConfig::load_with_default(None, &default_path).unwrap();
        assert_eq!(config.server.timeout_secs, 7);
        assert_eq!(config.routes.len(), default_routes().len());
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides_from(env(&[("GATEWAY_PORT", ""), ("JWT_SECRET", "")]))
            .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.jwt_secret.expose_secret(), "development-secret-key");
    }

    #[test]
    fn test_load_explicit_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 7070\nrate_limiting:\n  upload: \"2-M\"").unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.rate_limiting.upload, "2-M");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");

        let result = GatewayConfig::load(missing.to_str());
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides_from(env(&[("GATEWAY_PORT", "eighty")]));
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides_from(env(&[("JWT_SECRET", "very-private-value")]))
            .unwrap();
        assert!(!format!("{:?}", config).contains("very-private-value"));
    }

    #[test]
    fn test_validate_empty_secret() {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = SecretString::new(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_backend() {
        let mut config = GatewayConfig::default();
        config.services.project_defect = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.services.project_defect = "ftp://files:21".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_whitelist_entries() {
        let mut config = GatewayConfig::default();
        config.rate_limiting.whitelist = vec!["10.0.0.0/8".to_string()];
        assert!(config.validate().is_err());

        config.rate_limiting.whitelist = vec!["10.0.0.1".to_string(), "::1".to_string()];
        assert!(config.validate().is_ok());

        config.rate_limiting.whitelist = vec![" 10.0.0.2 ".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_method() {
        let mut config = GatewayConfig::default();
        config.routes = vec![RouteConfig::new(
            "/api/test",
            &["INVALID"],
            ServiceGroup::Content,
        )];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_rate_strings_are_not_config_errors() {
        let mut config = GatewayConfig::default();
        config.rate_limiting.global = "garbage".to_string();
        assert!(config.validate().is_ok());
    }
}
