use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_MODEL_ID: &str = "rajistics/finetuned-indian-food";
pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on the uploaded file, in bytes.
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub id: String,
    pub revision: String,
    /// TorchScript export of the model inside the repository.
    pub weights_file: String,
    /// Read artifacts from here instead of the hub.
    pub local_dir: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub hub_url: String,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            weights_file: "model.pt".to_string(),
            local_dir: None,
            cache_dir: PathBuf::from(".model-cache"),
            hub_url: DEFAULT_HUB_URL.to_string(),
            token: None,
        }
    }
}

impl AppConfig {
    /// Builds the config from the optional YAML file named by `CLASSIFIER_CONFIG`,
    /// then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var("CLASSIFIER_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_str(&config_str).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// `lookup` is `env::var` in production; tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: port,
            })?;
        }
        if let Some(limit) = get("MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = match limit.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MAX_UPLOAD_BYTES",
                        value: limit,
                    });
                }
            };
        }

        if let Some(id) = get("MODEL_ID") {
            self.model.id = id;
        }
        if let Some(revision) = get("MODEL_REVISION") {
            self.model.revision = revision;
        }
        if let Some(file) = get("MODEL_FILE") {
            self.model.weights_file = file;
        }
        if let Some(dir) = get("MODEL_DIR") {
            self.model.local_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get("MODEL_CACHE_DIR") {
            self.model.cache_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = get("HF_ENDPOINT") {
            self.model.hub_url = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(token) = get("HF_TOKEN") {
            self.model.token = Some(token);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_the_food_model() {
        let config = AppConfig::default();
        assert_eq!(config.model.id, DEFAULT_MODEL_ID);
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.bind_address(), "0.0.0.0:8081");
        assert!(config.model.local_dir.is_none());
    }

    #[test]
    fn env_overrides_win() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("PORT", "9000"),
                ("MODEL_ID", "org/other-model"),
                ("MODEL_DIR", "/models/other"),
                ("HF_ENDPOINT", "http://mirror.local/"),
                ("MAX_UPLOAD_BYTES", "2048"),
                ("HF_TOKEN", ""),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_upload_bytes, 2048);
        assert_eq!(config.model.id, "org/other-model");
        assert_eq!(config.model.local_dir, Some(PathBuf::from("/models/other")));
        assert_eq!(config.model.hub_url, "http://mirror.local");
        assert_eq!(config.model.token, None);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));

        let err = config
            .apply_overrides(lookup_from(&[("MAX_UPLOAD_BYTES", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "MAX_UPLOAD_BYTES",
                ..
            }
        ));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 5001\nmodel:\n  weights_file: traced.pt").unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.model.weights_file, "traced.pt");
        assert_eq!(config.model.id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::from_file("/nonexistent/classifier.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
