use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::HostdeckConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "hostdeck.toml",
    "hostdeck.yaml",
    "hostdeck.yml",
    "hostdeck.json",
];

/// Environment variable holding the identity token secret.
pub const SECRET_ENV: &str = "HOSTDECK_JWT_SECRET";

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Restrict config discovery to `path` (project-local and user-global
/// locations are skipped).
pub fn set_config_dir(path: PathBuf) {
    *lock(&CONFIG_DIR_OVERRIDE) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *lock(&CONFIG_DIR_OVERRIDE) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    lock(&CONFIG_DIR_OVERRIDE).clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<HostdeckConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply
/// environment overrides.
///
/// Search order:
/// 1. `./hostdeck.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/hostdeck/hostdeck.{toml,yaml,yml,json}` (user-global)
///
/// When nothing is found the defaults are written to the user-global path.
pub fn discover_and_load() -> HostdeckConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                HostdeckConfig::default()
            })
        },
        None => {
            debug!("no config file found, writing default config");
            let config = HostdeckConfig::default();
            if let Err(e) = write_default_config(&config) {
                warn!(error = %e, "failed to write default config file");
            }
            config
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// The environment secret wins over whatever the file says.
fn apply_env_overrides(config: &mut HostdeckConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(secret) = lookup(SECRET_ENV).filter(|s| !s.is_empty()) {
        config.auth.secret = Some(Secret::new(secret));
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return CONFIG_FILENAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists());
    }

    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            let dir = home_dir()?.join(".config").join("hostdeck");
            CONFIG_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
        })
}

/// Returns the config directory: override, or `~/.config/hostdeck/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("hostdeck"))
}

/// Returns the data directory: `~/.hostdeck/`.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".hostdeck"))
        .unwrap_or_else(|| PathBuf::from(".hostdeck"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn write_default_config(config: &HostdeckConfig) -> anyhow::Result<()> {
    let path = config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hostdeck.toml");
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(&path, &toml_str)?;
    debug!(path = %path.display(), "wrote default config file");
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<HostdeckConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn parses_toml_sections() {
        let raw = r#"
            [server]
            port = 9000

            [auth]
            secret = "abc"
            require_identity = false

            [terminal]
            shell = "/bin/sh"
        "#;
        let cfg = parse_config(raw, Path::new("hostdeck.toml")).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(
            cfg.auth.secret.as_ref().unwrap().expose_secret().as_str(),
            "abc"
        );
        assert!(!cfg.auth.require_identity);
        assert_eq!(cfg.auth.cookie_name, "jwt");
        assert_eq!(cfg.terminal.shell, "/bin/sh");
        assert_eq!(cfg.monitor.interval_secs, 2);
        assert_eq!(cfg.monitor.top_processes, 10);
    }

    #[test]
    fn parses_yaml_and_json() {
        let yaml = "monitor:\n  interval_secs: 5\n";
        let cfg = parse_config(yaml, Path::new("hostdeck.yaml")).unwrap();
        assert_eq!(cfg.monitor.interval_secs, 5);

        let json = r#"{"terminal":{"cols":120,"rows":40}}"#;
        let cfg = parse_config(json, Path::new("hostdeck.json")).unwrap();
        assert_eq!((cfg.terminal.cols, cfg.terminal.rows), (120, 40));
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(parse_config("", Path::new("hostdeck.ini")).is_err());
    }

    #[test]
    fn secret_is_never_serialized() {
        let mut cfg = HostdeckConfig::default();
        cfg.auth.secret = Some(Secret::new("do-not-leak".into()));
        let out = toml::to_string_pretty(&cfg).unwrap();
        assert!(!out.contains("do-not-leak"));
        assert!(out.contains("cookie_name"));
    }

    #[test]
    fn env_secret_overrides_file() {
        let mut cfg = HostdeckConfig::default();
        cfg.auth.secret = Some(Secret::new("from-file".into()));
        apply_env_overrides(&mut cfg, |name| {
            (name == SECRET_ENV).then(|| "from-env".to_string())
        });
        assert_eq!(
            cfg.auth.secret.as_ref().unwrap().expose_secret().as_str(),
            "from-env"
        );

        let mut cfg = HostdeckConfig::default();
        apply_env_overrides(&mut cfg, |_| Some(String::new()));
        assert!(cfg.auth.secret.is_none());
    }

    #[test]
    fn load_config_from_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hostdeck.toml"),
            "[server]\nbind = \"0.0.0.0\"\n",
        )
        .unwrap();
        let cfg = load_config(&dir.path().join("hostdeck.toml")).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0");
    }
}
