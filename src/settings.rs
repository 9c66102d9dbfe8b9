use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::storage::CacheMode;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub cache: Cache,
    pub policy: Policy,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Namespace the compiled tree is stored under
    pub namespace: String,
    /// Directory holding cache snapshots. Default: data/cache
    pub dir: PathBuf,
    /// `compile` rebuilds from metadata and saves; `serve` loads the snapshot
    pub mode: CacheMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Directory of `.kdl` policy metadata files. Default: policies
    pub facts_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Links {
    /// Presenter path -> class name mappings for link checks. When empty,
    /// presenter paths are used as class names directly.
    #[serde(default)]
    pub presenters: Vec<PresenterMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenterMapping {
    /// Presenter path as written in links, e.g. "Admin:User"
    pub presenter: String,
    /// Class name the policy metadata uses, e.g. "App.AdminModule.UserPresenter"
    pub class: String,
}

impl Links {
    pub fn presenter_table(&self) -> HashMap<String, String> {
        self.presenters
            .iter()
            .map(|m| (m.presenter.clone(), m.class.clone()))
            .collect()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            namespace: "acl".to_string(),
            dir: PathBuf::from("data/cache"),
            mode: CacheMode::Serve,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            facts_dir: PathBuf::from("policies"),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default("cache.namespace", Cache::default().namespace)
            .into_diagnostic()?
            .set_default(
                "cache.dir",
                Cache::default().dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("cache.mode", "serve")
            .into_diagnostic()?
            .set_default(
                "policy.facts_dir",
                Policy::default().facts_dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: WARDEN__CACHE__MODE=compile, etc.
        builder = builder.add_source(config::Environment::with_prefix("WARDEN").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize paths to be relative to current dir
        if s.cache.dir.is_relative() {
            s.cache.dir = std::env::current_dir().into_diagnostic()?.join(&s.cache.dir);
        }
        if s.policy.facts_dir.is_relative() {
            s.policy.facts_dir = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.policy.facts_dir);
        }

        Ok(s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    /// Serializes every test that reads the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sets a variable for the guard's lifetime, holding the env lock.
    struct EnvVar {
        key: &'static str,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvVar {
        fn set(key: &'static str, value: &str) -> Self {
            let lock = env_lock();
            env::set_var(key, value);
            Self { key, _lock: lock }
        }
    }

    impl Drop for EnvVar {
        fn drop(&mut self) {
            env::remove_var(self.key);
        }
    }

    #[test]
    fn test_settings_load_defaults() {
        let _env = env_lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.cache.namespace, "acl");
        assert_eq!(settings.cache.mode, CacheMode::Serve);
        assert!(settings.links.presenters.is_empty());
    }

    #[test]
    fn test_settings_load_from_file() {
        let _env = env_lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "0.0.0.0"
port = 9191

[cache]
namespace = "backoffice"
mode = "compile"

[[links.presenters]]
presenter = "Admin:User"
class = "App.AdminModule.UserPresenter"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9191);
        assert_eq!(settings.cache.namespace, "backoffice");
        assert_eq!(settings.cache.mode, CacheMode::Compile);
        assert_eq!(
            settings
                .links
                .presenter_table()
                .get("Admin:User")
                .map(String::as_str),
            Some("App.AdminModule.UserPresenter")
        );
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[cache]
dir = "/var/lib/warden/from-file"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        // Env should override file
        let _env = EnvVar::set("WARDEN__CACHE__DIR", "/var/lib/warden/from-env");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.cache.dir, PathBuf::from("/var/lib/warden/from-env"));
    }

    #[test]
    fn test_env_var_is_removed_after_scope() {
        {
            let _env = EnvVar::set("WARDEN__CACHE__NAMESPACE", "scoped");
            assert_eq!(env::var("WARDEN__CACHE__NAMESPACE").as_deref(), Ok("scoped"));
        }
        let _env = env_lock();
        assert!(env::var("WARDEN__CACHE__NAMESPACE").is_err());
    }

    #[test]
    fn test_settings_path_normalization() {
        let _env = env_lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[policy]
facts_dir = "relative/policies"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert!(settings.policy.facts_dir.is_absolute());
        assert!(settings.policy.facts_dir.ends_with("relative/policies"));
    }

    #[test]
    fn test_listen_addr() {
        let settings = Settings::default();
        assert_eq!(settings.listen_addr(), "127.0.0.1:8090");
    }
}
