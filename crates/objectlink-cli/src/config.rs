//! Configuration loading from `~/.objectlink/config.toml`.

use objectlink_types::LinkConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load configuration from `path`, or the default location when `None`.
///
/// A missing file yields defaults. An unreadable or invalid file is logged
/// and also yields defaults.
pub fn load_config(path: Option<&Path>) -> LinkConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return LinkConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match LinkConfig::from_toml_str(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                LinkConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            LinkConfig::default()
        }
    }
}

/// Get the objectlink home directory.
pub fn objectlink_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".objectlink")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    objectlink_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectlink_types::WireFormat;
    use std::io::Write;

    #[test]
    fn test_load_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("missing.toml")));
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen_addr = "0.0.0.0:9100"
format = "msgpack"
invoke_timeout_ms = 250
"#
        )
        .unwrap();

        let config = load_config(Some(file.path()));
        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.format, WireFormat::MsgPack);
        assert_eq!(config.invoke_timeout_ms, 250);
        assert_eq!(config.outbound_queue, LinkConfig::default().outbound_queue);
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "format = \"xml\"").unwrap();
        assert_eq!(load_config(Some(file.path())), LinkConfig::default());
    }

    #[test]
    fn test_default_path_under_home() {
        assert!(default_config_path().ends_with(".objectlink/config.toml"));
    }
}
