use serde::Deserialize;
use std::collections::HashMap;

use super::ModelLoadError;

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

/// Dense index -> label table taken from the model's `id2label` map.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Result<Self, ModelLoadError> {
        if labels.is_empty() {
            return Err(ModelLoadError::Labels("label set is empty".into()));
        }
        Ok(Self { labels })
    }

    /// Parses the model's `config.json`.
    pub fn from_config_json(raw: &str) -> Result<Self, ModelLoadError> {
        let config: ModelConfigFile = serde_json::from_str(raw)
            .map_err(|e| ModelLoadError::Labels(format!("config.json: {}", e)))?;

        let mut indexed = Vec::with_capacity(config.id2label.len());
        for (key, label) in config.id2label {
            let index: usize = key
                .trim()
                .parse()
                .map_err(|_| ModelLoadError::Labels(format!("non-numeric class id '{}'", key)))?;
            indexed.push((index, label));
        }
        indexed.sort_by_key(|(index, _)| *index);

        for (expected, (index, _)) in indexed.iter().enumerate() {
            if *index != expected {
                return Err(ModelLoadError::Labels(format!(
                    "class ids are not contiguous: expected {}, found {}",
                    expected, index
                )));
            }
        }

        Self::new(indexed.into_iter().map(|(_, label)| label).collect())
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[cfg(test)]
    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}
