pub mod image_processor;

use std::time::Instant;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::blip;
use image::DynamicImage;
use tokenizers::Tokenizer;

use crate::device;
use crate::error::VlmError;
use crate::generation::StopTokens;
use crate::hub::ModelSource;
use crate::traits::ImageCaptioner;

/// Default BLIP checkpoint.
pub const DEFAULT_MODEL_ID: &str = "Salesforce/blip-image-captioning-large";

/// Revision of the default checkpoint that carries safetensors weights.
pub const DEFAULT_REVISION: &str = "refs/pr/18";

// [DEC] starts the caption, [SEP] ends it
const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

/// Configuration for the BLIP captioner
#[derive(Clone, Debug)]
pub struct BlipConfig {
    pub source: ModelSource,
    /// The maximum caption length in tokens.
    pub max_tokens: usize,
    pub force_cpu: bool,
}

impl Default for BlipConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::new(DEFAULT_MODEL_ID, DEFAULT_REVISION),
            max_tokens: 64,
            force_cpu: false,
        }
    }
}

/// The BLIP image captioning model
pub struct BlipCaptioner {
    model: blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    stop_tokens: StopTokens,
    max_tokens: usize,
    device: Device,
}

impl BlipCaptioner {
    /// Create a new BLIP captioner, downloading the checkpoint if needed.
    pub fn new(config: BlipConfig) -> Result<Self, VlmError> {
        // the captioner is small enough to always run in full precision
        let (device, _) = device::select_device(config.force_cpu);
        log::info!(
            "Loading BLIP ({}) onto {}",
            config.source,
            device::describe(&device)
        );

        let repo = config.source.repo()?;
        let tokenizer = Tokenizer::from_file(repo.get("tokenizer.json")?)?;
        let weights = repo.get("model.safetensors")?;

        let blip_config = blip::Config::image_captioning_large();
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        let model = blip::BlipForConditionalGeneration::new(&blip_config, vb)?;
        log::info!("BLIP ({}) loaded", config.source);

        Ok(Self {
            model,
            tokenizer,
            stop_tokens: StopTokens::from_ids(vec![SEP_TOKEN_ID]),
            max_tokens: config.max_tokens,
            device,
        })
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Generate a caption for `image`.
    ///
    /// # Arguments
    ///
    /// * `image` - The image to describe, any size and color type.
    ///
    /// # Returns
    ///
    /// * `caption` - The decoded caption, trimmed.
    pub fn caption(&mut self, image: &DynamicImage) -> Result<String, VlmError> {
        let pixels = image_processor::preprocess(image, &self.device)?.unsqueeze(0)?;

        self.model.reset_kv_cache();
        let image_embeds = self.model.vision_model().forward(&pixels)?;

        // greedy decoding, the seed is unused
        let mut logits_processor = LogitsProcessor::new(1337, None, None);
        let mut tokens = vec![BOS_TOKEN_ID];

        let start_gen = Instant::now();
        for index in 0..self.max_tokens {
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .text_decoder()
                .forward(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;

            let token = logits_processor.sample(&logits)?;
            if self.stop_tokens.contains(token) {
                break;
            }
            tokens.push(token);
        }
        log::debug!(
            "caption of {} tokens in {:.2?}",
            tokens.len() - 1,
            start_gen.elapsed()
        );

        let caption = self.tokenizer.decode(&tokens[1..], true)?;
        Ok(caption.trim().to_string())
    }
}

impl ImageCaptioner for BlipCaptioner {
    fn caption(&mut self, image: &DynamicImage) -> Result<String, VlmError> {
        BlipCaptioner::caption(self, image)
    }
}
