use std::sync::{Arc, Mutex};

use medgemma_vlm::{
    blip::BlipCaptioner, medgemma::MedGemma, ImageCaptioner, TextGenerator, VlmError,
};

use crate::config::ServeConfig;
use crate::error::ApiError;

type Loader<M> = Box<dyn Fn() -> Result<M, VlmError> + Send + Sync>;

/// A lazily loaded model.
///
/// The slot stays empty when loading fails; every use retries the load first.
pub struct ModelSlot<M> {
    name: &'static str,
    model: Mutex<Option<M>>,
    loader: Loader<M>,
}

impl<M: Send> ModelSlot<M> {
    pub fn new(
        name: &'static str,
        loader: impl Fn() -> Result<M, VlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            model: Mutex::new(None),
            loader: Box::new(loader),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    /// Load the model at startup. A failure is logged and left for the first request
    /// to retry.
    pub fn preload(&self) -> bool {
        let mut model = self.lock();
        if model.is_some() {
            log::info!("{} model is already loaded", self.name);
            return true;
        }

        match (self.loader)() {
            Ok(m) => {
                *model = Some(m);
                log::info!("{} model loaded successfully on startup", self.name);
                true
            }
            Err(e) => {
                log::warn!(
                    "{} model could not be loaded on startup: {e}. It will be retried on the first request",
                    self.name
                );
                false
            }
        }
    }

    /// Run `f` on the model, loading it first if the slot is empty.
    pub fn run<R>(&self, f: impl FnOnce(&mut M) -> Result<R, VlmError>) -> Result<R, ApiError> {
        let mut guard = self.lock();

        if guard.is_none() {
            log::warn!("{} model not loaded. Attempting to load now...", self.name);
            let loaded = (self.loader)().map_err(|e| {
                log::error!("failed to load the {} model: {e}", self.name);
                ApiError::ModelUnavailable(self.name.to_string())
            })?;
            *guard = Some(loaded);
        }

        let model = guard
            .as_mut()
            .ok_or_else(|| ApiError::ModelUnavailable(self.name.to_string()))?;
        f(model).map_err(ApiError::Inference)
    }

    // poisoning is ignored, the kv cache is reset on every call
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<M>> {
        self.model.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared state of the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub explainer: Arc<ModelSlot<Box<dyn TextGenerator>>>,
    pub captioner: Arc<ModelSlot<Box<dyn ImageCaptioner>>>,
    pub max_new_tokens: usize,
}

impl AppState {
    /// State backed by the MedGemma and BLIP checkpoints of `config`.
    pub fn from_config(config: &ServeConfig) -> Self {
        let medgemma = config.medgemma.clone();
        let blip = config.blip.clone();

        Self {
            explainer: Arc::new(ModelSlot::new("MedGemma", move || {
                MedGemma::new(medgemma.clone()).map(|m| Box::new(m) as Box<dyn TextGenerator>)
            })),
            captioner: Arc::new(ModelSlot::new("BLIP", move || {
                BlipCaptioner::new(blip.clone()).map(|m| Box::new(m) as Box<dyn ImageCaptioner>)
            })),
            max_new_tokens: config.medgemma.max_new_tokens,
        }
    }

    /// Load both models, keeping the server up if either fails.
    pub fn preload(&self) {
        log::info!("Attempting to load the models on startup...");
        self.explainer.preload();
        self.captioner.preload();
        if !self.explainer.is_loaded() {
            log::warn!("/api/explain-term will not work until MedGemma loads");
        }
        if !self.captioner.is_loaded() {
            log::warn!("/api/explain-image will not work until BLIP loads");
        }
    }
}
