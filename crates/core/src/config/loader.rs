//! File + environment loading.

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use super::types::{Config, ConfigError};

/// Load configuration from a TOML file with `SUBLARR_`-prefixed environment
/// overrides (`SUBLARR_SERVER_PORT=9000` sets `server.port`).
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut figment = Figment::new();
    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("SUBLARR_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Parse configuration from a TOML string (tests and embedded defaults).
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_from_str() {
        let config = load_config_from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_load_from_str_invalid() {
        assert!(matches!(
            load_config_from_str("[server\nport ="),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nhost = \"127.0.0.1\"\nport = 3000\n\n[media]\nlanguages = [\"de\"]"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.media.languages, vec!["de"]);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/sublarr.toml")).unwrap();
        assert_eq!(config.server.port, 8096);
    }
}
