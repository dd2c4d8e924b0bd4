use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxSettings,
    pub database: DatabaseSettings,
    pub session: SessionSettings,
    pub labs: LabContentSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxSettings {
    /// Image used for terminal labs that declare no environment_image.
    pub default_image: String,
    /// Fallback memory cap when a lab declares no limit.
    pub memory_limit_mb: u64,
    /// Fallback CPU share when a lab declares no limit.
    pub cpu_share: f64,
    /// Fallback wall-clock timeout.
    pub default_timeout_seconds: u64,
    /// Writable scratch directory inside the sandbox.
    pub workdir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// Image for the per-user database container.
    pub image: String,
    pub superuser: String,
    pub password: Secret<String>,
    /// How long to wait for a freshly started database to accept
    /// connections.
    pub ready_timeout_seconds: u64,
    pub memory_limit_mb: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    /// Sessions older than this are reclaimed by the reaper.
    pub max_age_seconds: u64,
    pub reap_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabContentSettings {
    /// Directory of YAML lab definitions loaded at startup.
    pub content_dir: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("SKILLFORGE_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map SKILLFORGE__SERVER__PORT=3000 to server.port
            .add_source(Environment::with_prefix("SKILLFORGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 3000,
            },
            sandbox: SandboxSettings::default(),
            database: DatabaseSettings::default(),
            session: SessionSettings::default(),
            labs: LabContentSettings {
                content_dir: "labs".into(),
            },
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            default_image: "alpine:3.19".into(),
            memory_limit_mb: 256,
            cpu_share: 0.5,
            default_timeout_seconds: 30,
            workdir: "/workspace".into(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            image: "postgres:15-alpine".into(),
            superuser: "postgres".into(),
            password: Secret::new("labpassword".into()),
            ready_timeout_seconds: 30,
            memory_limit_mb: 256,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_age_seconds: 3600,
            reap_interval_seconds: 300,
        }
    }
}
