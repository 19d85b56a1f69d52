use futures::{Stream, StreamExt};
use reqwest::Client as HttpClient;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use url::Url;

use super::ModelLoadError;
use crate::config::ModelConfig;

pub const CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_FILE: &str = "preprocessor_config.json";

/// Local paths of everything needed to build a classifier.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub config: PathBuf,
    pub preprocessor: PathBuf,
    pub weights: PathBuf,
}

/// Resolves model files from a local directory or the model hub, with an on-disk cache.
#[derive(Clone)]
pub struct ModelRepository {
    http_client: HttpClient,
    config: ModelConfig,
}

impl ModelRepository {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http_client: HttpClient::new(),
            config,
        }
    }

    /// `{hub}/{model_id}/resolve/{revision}/{file}`
    pub fn file_url(&self, file: &str) -> Result<Url, ModelLoadError> {
        let mut url = Url::parse(&self.config.hub_url)?;
        url.path_segments_mut()
            .map_err(|_| ModelLoadError::Hub(format!("cannot be a base URL: {}", self.config.hub_url)))?
            .pop_if_empty()
            .extend(self.config.id.split('/').filter(|s| !s.is_empty()))
            .push("resolve")
            .push(&self.config.revision)
            .push(file);
        Ok(url)
    }

    pub fn cache_path(&self, file: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(self.config.id.replace('/', "--"))
            .join(&self.config.revision)
            .join(file)
    }

    pub async fn fetch(&self, file: &str) -> Result<PathBuf, ModelLoadError> {
        if let Some(dir) = &self.config.local_dir {
            return local_artifact(dir, file).await;
        }

        let path = self.cache_path(file);
        if is_non_empty_file(&path).await {
            log::debug!("Using cached {}", path.display());
            return Ok(path);
        }

        let url = self.file_url(file)?;
        log::info!("Downloading {}", url);

        let mut request = self.http_client.get(url.clone());
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ModelLoadError::Hub(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let written = save_stream(response.bytes_stream(), &path)
            .await
            .map_err(|e| match e {
                ModelLoadError::Hub(reason) => ModelLoadError::Hub(format!("GET {}: {}", url, reason)),
                other => other,
            })?;

        log::info!("Saved {} ({} bytes)", path.display(), written);
        Ok(path)
    }

    pub async fn fetch_all(&self) -> Result<ModelArtifacts, ModelLoadError> {
        Ok(ModelArtifacts {
            config: self.fetch(CONFIG_FILE).await?,
            preprocessor: self.fetch(PREPROCESSOR_FILE).await?,
            weights: self.fetch(&self.config.weights_file).await?,
        })
    }
}

/// Streams chunks into `<path>.part`, then renames it over `path`.
/// The partial file is removed on any failure, including an empty body.
async fn save_stream<S, B, E>(stream: S, path: &Path) -> Result<u64, ModelLoadError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    ModelLoadError: From<E>,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let result = copy_stream(stream, &partial).await;
    match result {
        Ok(written) if written > 0 => {
            tokio::fs::rename(&partial, path).await?;
            Ok(written)
        }
        Ok(_) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(ModelLoadError::Hub("empty body".into()))
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn copy_stream<S, B, E>(stream: S, partial: &Path) -> Result<u64, ModelLoadError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    ModelLoadError: From<E>,
{
    futures::pin_mut!(stream);
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(chunk.as_ref()).await?;
        written += chunk.as_ref().len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn is_non_empty_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

async fn local_artifact(dir: &Path, file: &str) -> Result<PathBuf, ModelLoadError> {
    let path = dir.join(file);
    if is_non_empty_file(&path).await {
        Ok(path)
    } else {
        Err(ModelLoadError::MissingArtifact(path.display().to_string()))
    }
}
