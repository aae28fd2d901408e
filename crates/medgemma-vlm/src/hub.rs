use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};

use crate::error::VlmError;

/// Environment variable holding the HuggingFace access token.
pub const TOKEN_ENV: &str = "HF_TOKEN";

/// A model checkpoint on the HuggingFace Hub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSource {
    pub model_id: String,
    pub revision: String,
    /// Access token for gated repositories. When `None` the cached login is used.
    pub token: Option<String>,
}

impl ModelSource {
    /// Create a source for `model_id` at `revision`, reading the token from `HF_TOKEN`.
    pub fn new(model_id: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            revision: revision.into(),
            token: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        }
    }

    /// Open the repository through the synchronous hub api.
    pub fn repo(&self) -> Result<ApiRepo, VlmError> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(token) = &self.token {
            builder = builder.with_token(Some(token.clone()));
        }
        let api = builder.build()?;
        Ok(api.repo(Repo::with_revision(
            self.model_id.clone(),
            RepoType::Model,
            self.revision.clone(),
        )))
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.model_id, self.revision)
    }
}

/// List the distinct shard files referenced by a safetensors index, sorted by name.
pub fn weight_map_files(index: &serde_json::Value) -> Result<Vec<String>, VlmError> {
    let weight_map = index
        .get("weight_map")
        .and_then(|w| w.as_object())
        .ok_or_else(|| VlmError::MissingFile("weight_map".to_string()))?;

    let files = weight_map
        .values()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect::<BTreeSet<_>>();

    Ok(files.into_iter().collect())
}

/// Download every shard referenced by `index_file`.
pub fn load_safetensors(repo: &ApiRepo, index_file: &str) -> Result<Vec<PathBuf>, VlmError> {
    let index_path = repo.get(index_file)?;
    let index = read_json(&index_path)?;
    weight_map_files(&index)?
        .iter()
        .map(|f| repo.get(f).map_err(VlmError::from))
        .collect()
}

/// Resolve the weights of a repository: the sharded index when present, otherwise a
/// single `model.safetensors`.
pub fn load_weights(repo: &ApiRepo) -> Result<Vec<PathBuf>, VlmError> {
    match load_safetensors(repo, "model.safetensors.index.json") {
        Ok(files) => Ok(files),
        Err(e) => {
            log::debug!("no sharded index ({e}), trying model.safetensors");
            Ok(vec![repo.get("model.safetensors")?])
        }
    }
}

/// Fetch a file that checkpoints are allowed to omit.
pub fn get_optional(repo: &ApiRepo, filename: &str) -> Option<PathBuf> {
    match repo.get(filename) {
        Ok(path) => Some(path),
        Err(e) => {
            log::debug!("optional file {filename} not available: {e}");
            None
        }
    }
}

/// Read and parse a json file.
pub fn read_json(path: impl AsRef<Path>) -> Result<serde_json::Value, VlmError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
