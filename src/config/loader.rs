use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix of environment overrides, e.g. `GATEHOUSE_BREAKER__COOLDOWN=10s`.
pub const ENV_PREFIX: &str = "GATEHOUSE";

/// Load configuration from an optional file layered with `GATEHOUSE_*`
/// environment variables. Supports YAML, JSON and TOML by extension.
pub async fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: Option<&str>) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        };
        builder = builder.add_source(File::new(config_path, format));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build gateway configuration")?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.unwrap_or("<environment>")
        )
    })?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::{io::Write, path::PathBuf, time::Duration};

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
routes_path: "/var/lib/gatehouse/routes.json"
default_rate_limit: 120
breaker:
  failure_threshold: 3
  cooldown: "10s"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str()).await.unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(
            config.routes_path,
            PathBuf::from("/var/lib/gatehouse/routes.json")
        );
        assert_eq!(config.default_rate_limit, 120);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown().unwrap(), Duration::from_secs(10));
        assert_eq!(config.proxy.timeout().unwrap(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:3001"
roleguard_path = "roleguard.yaml"

[auth]
jwt_secret = "s3cret"

[guardian]
sensitive_prefixes = ["/zones"]
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str()).await.unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3001");
        assert_eq!(config.roleguard_path, Some(PathBuf::from("roleguard.yaml")));
        assert_eq!(config.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.guardian.sensitive_prefixes, vec!["/zones"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(path.to_str()).await.is_err());
    }
}
