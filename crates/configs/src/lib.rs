use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), worker_threads: Some(4) }
    }
}

/// Where the registry lives on disk and how often it is flushed.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_registry_file")]
    pub registry_file: String,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,
    #[serde(default = "default_backup_file")]
    pub backup_file: String,
    /// Flush after read-only and failed operations as well as mutations.
    #[serde(default = "default_flush_on_read")]
    pub flush_on_read: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            registry_file: default_registry_file(),
            credentials_file: default_credentials_file(),
            backup_file: default_backup_file(),
            flush_on_read: default_flush_on_read(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `compact` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self { Self { format: default_log_format() } }
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 5000 }
fn default_data_dir() -> String { "data".into() }
fn default_registry_file() -> String { "database.json".into() }
fn default_credentials_file() -> String { "passcodes.json".into() }
fn default_backup_file() -> String { "data_backup.json".into() }
fn default_flush_on_read() -> bool { true }
fn default_log_format() -> String { "compact".into() }

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let cfg: AppConfig = toml::from_str(&content)?;
    Ok(cfg)
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

impl AppConfig {
    /// Config file first; without one, defaults overridden by environment variables.
    pub fn load_and_validate() -> Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_and_validate_from(&path)
    }

    /// Only a missing file falls back to the environment; unreadable, unparseable
    /// or invalid files are errors.
    pub fn load_and_validate_from(path: &str) -> Result<Self> {
        let mut cfg = match load_from_file(path) {
            Ok(cfg) => cfg,
            Err(e) if is_not_found(&e) => Self::from_env(),
            Err(e) => return Err(e.context(format!("config file {path}"))),
        };
        cfg.normalize_and_validate()
            .map_err(|e| e.context(format!("config file {path}")))?;
        Ok(cfg)
    }

    /// Defaults overridden by `SERVER_HOST`, `SERVER_PORT`, `TOKIO_WORKER_THREADS`,
    /// `DATA_DIR`, `FLUSH_ON_READ` and `LOG_FORMAT`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(host) = std::env::var("SERVER_HOST") {
            cfg.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            cfg.server.port = port;
        }
        if let Some(w) = std::env::var("TOKIO_WORKER_THREADS").ok().and_then(|v| v.parse::<usize>().ok()) {
            cfg.server.worker_threads = Some(w);
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            cfg.storage.data_dir = dir;
        }
        if let Some(flag) = std::env::var("FLUSH_ON_READ").ok().and_then(|v| v.parse::<bool>().ok()) {
            cfg.storage.flush_on_read = flag;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            cfg.logging.format = format;
        }
        cfg
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        // 归一化 server
        self.server.normalize()?;
        self.storage.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = default_host();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be in 1..=65535"));
        }
        if let Some(w) = self.worker_threads {
            if w == 0 { self.worker_threads = Some(4); }
        } else {
            self.worker_threads = Some(4);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir is empty"));
        }
        let files = [
            ("registry_file", &self.registry_file),
            ("credentials_file", &self.credentials_file),
            ("backup_file", &self.backup_file),
        ];
        for (field, name) in files {
            if name.trim().is_empty() {
                return Err(anyhow!("storage.{field} is empty"));
            }
            if name.contains('/') || name.contains('\\') {
                return Err(anyhow!("storage.{field} must be a bare file name, got {name:?}"));
            }
        }
        // 三个文件必须互不相同，否则 flush 会互相覆盖
        if self.registry_file == self.credentials_file
            || self.registry_file == self.backup_file
            || self.credentials_file == self.backup_file
        {
            return Err(anyhow!("storage file names must be distinct"));
        }
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf { PathBuf::from(&self.data_dir).join(&self.registry_file) }
    pub fn credentials_path(&self) -> PathBuf { PathBuf::from(&self.data_dir).join(&self.credentials_file) }
    pub fn backup_path(&self) -> PathBuf { PathBuf::from(&self.data_dir).join(&self.backup_file) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() -> Result<()> {
        let mut cfg: AppConfig = toml::from_str("")?;
        cfg.normalize_and_validate()?;
        assert_eq!(cfg.server.bind_addr(), "127.0.0.1:5000");
        assert_eq!(cfg.server.worker_threads, Some(4));
        assert!(cfg.storage.flush_on_read);
        assert_eq!(cfg.storage.registry_path(), PathBuf::from("data").join("database.json"));
        assert_eq!(cfg.storage.credentials_path(), PathBuf::from("data").join("passcodes.json"));
        assert_eq!(cfg.storage.backup_path(), PathBuf::from("data").join("data_backup.json"));
        Ok(())
    }

    #[test]
    fn partial_sections_are_filled_in() -> Result<()> {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 8088

            [storage]
            data_dir = "/var/lib/osdb"
            flush_on_read = false
            "#,
        )?;
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8088);
        assert_eq!(cfg.storage.data_dir, "/var/lib/osdb");
        assert_eq!(cfg.storage.registry_file, "database.json");
        assert!(!cfg.storage.flush_on_read);
        Ok(())
    }

    #[test]
    fn rejects_bad_storage_and_port() {
        let mut cfg = AppConfig::default();
        cfg.storage.registry_file = "../escape.json".into();
        assert!(cfg.normalize_and_validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.storage.backup_file = cfg.storage.registry_file.clone();
        assert!(cfg.normalize_and_validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.server.port = 0;
        assert!(cfg.normalize_and_validate().is_err());
    }

    fn write_temp(name: &str, content: &str) -> Result<String> {
        let path = std::env::temp_dir().join(format!("osdb_cfg_{}_{name}.toml", std::process::id()));
        std::fs::write(&path, content)?;
        Ok(path.to_string_lossy().to_string())
    }

    #[test]
    fn missing_file_falls_back_to_env() -> Result<()> {
        let path = std::env::temp_dir().join(format!("osdb_cfg_{}_absent.toml", std::process::id()));
        assert!(AppConfig::load_and_validate_from(&path.to_string_lossy()).is_ok());
        Ok(())
    }

    #[test]
    fn broken_file_is_an_error_not_a_fallback() -> Result<()> {
        let path = write_temp("broken", "[server\nport = ")?;
        let res = AppConfig::load_and_validate_from(&path);
        std::fs::remove_file(&path)?;
        assert!(res.is_err());
        Ok(())
    }

    #[test]
    fn invalid_file_is_an_error_not_defaults() -> Result<()> {
        let path = write_temp(
            "dup",
            "[storage]\ndata_dir = \"/srv/db\"\nbackup_file = \"database.json\"\n",
        )?;
        let res = AppConfig::load_and_validate_from(&path);
        std::fs::remove_file(&path)?;
        let err = res.err().map(|e| format!("{e:#}")).unwrap_or_default();
        assert!(err.contains("distinct"), "{err}");
        Ok(())
    }

    #[test]
    fn valid_file_is_used() -> Result<()> {
        let path = write_temp("valid", "[storage]\ndata_dir = \"/srv/db\"\n")?;
        let res = AppConfig::load_and_validate_from(&path);
        std::fs::remove_file(&path)?;
        assert_eq!(res?.storage.data_dir, "/srv/db");
        Ok(())
    }
}
