mod config;

pub use config::{
    text_config_from_json, weights_prefix_for, MedGemmaConfig, DEFAULT_MODEL_ID,
    MULTIMODAL_WEIGHTS_PREFIX,
};

use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::gemma3::Model;
use tokenizers::Tokenizer;

use crate::chat::{ChatTemplate, Message};
use crate::device;
use crate::error::VlmError;
use crate::generation::{self, DecodeStep, GenerationConfig, Sampler, StopTokens};
use crate::hub;
use crate::prompts;
use crate::traits::TextGenerator;

/// Tokens closing a model turn.
const STOP_TOKENS: [&str; 2] = ["<end_of_turn>", "<eos>"];

/// The MedGemma model
///
/// Runs the Gemma 3 language model of a MedGemma checkpoint to answer chat prompts.
///
/// NOTE: to run the model with Cuda, you need to pass the `--features cuda` flag to the `cargo run` command.
pub struct MedGemma {
    model: Model,
    tokenizer: Tokenizer,
    template: ChatTemplate,
    stop_tokens: StopTokens,
    generation: GenerationConfig,
    max_new_tokens: usize,
    device: Device,
    dtype: DType,
}

impl MedGemma {
    /// Create a new MedGemma model, downloading the checkpoint if needed.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the MedGemma model
    pub fn new(config: MedGemmaConfig) -> Result<Self, VlmError> {
        let (device, dtype) = device::select_device(config.force_cpu);
        log::info!(
            "Loading MedGemma ({}) onto {} with dtype {dtype:?}",
            config.source,
            device::describe(&device)
        );

        let repo = config.source.repo()?;

        let model_config = hub::read_json(repo.get("config.json")?)?;
        let text_config = text_config_from_json(&model_config)?;

        let tokenizer = Tokenizer::from_file(repo.get("tokenizer.json")?)?;
        let tokenizer_config = hub::read_json(repo.get("tokenizer_config.json")?)?;
        let chat_template_json = hub::get_optional(&repo, "chat_template.json")
            .map(hub::read_json)
            .transpose()?;
        let template =
            ChatTemplate::from_tokenizer_config(&tokenizer_config, chat_template_json.as_ref())?;
        let stop_tokens = StopTokens::resolve(&tokenizer, &STOP_TOKENS)?;

        let weights = hub::load_weights(&repo)?;
        log::debug!("weights: {weights:?}");
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &device)? };
        let prefix = config
            .weights_prefix
            .clone()
            .unwrap_or_else(|| weights_prefix_for(&model_config).to_string());
        let vb = if prefix.is_empty() { vb } else { vb.pp(prefix) };

        let model = Model::new(config.use_flash_attn, &text_config, vb)?;
        log::info!("MedGemma ({}) loaded", config.source);

        Ok(Self {
            model,
            tokenizer,
            template,
            stop_tokens,
            generation: config.generation,
            max_new_tokens: config.max_new_tokens,
            device,
            dtype,
        })
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Generate the model turn answering `messages`.
    ///
    /// # Arguments
    ///
    /// * `messages` - The conversation, optionally starting with a system message.
    /// * `max_new_tokens` - The maximum number of generated tokens.
    ///
    /// # Returns
    ///
    /// * `response` - The decoded text without special tokens, trimmed.
    pub fn generate(
        &mut self,
        messages: &[Message],
        max_new_tokens: usize,
    ) -> Result<String, VlmError> {
        let prompt = self.template.render(messages, true)?;
        log::debug!("prompt: {prompt:?}");

        // the template already carries <bos>
        let encoding = self.tokenizer.encode(prompt.as_str(), false)?;

        let mut step = GemmaStep {
            model: &mut self.model,
            device: &self.device,
        };
        let mut sampler = Sampler::new(&self.generation);

        let start_gen = Instant::now();
        let generated = generation::decode(
            &mut step,
            &mut sampler,
            &self.stop_tokens,
            encoding.get_ids(),
            max_new_tokens,
        )?;
        let dt = start_gen.elapsed();
        log::info!(
            "{} tokens generated ({:.2} token/s)",
            generated.len(),
            generated.len() as f64 / dt.as_secs_f64(),
        );

        let response = self.tokenizer.decode(&generated, true)?;
        Ok(response.trim().to_string())
    }

    /// Explain a medical term for a medical student, within the configured token budget.
    pub fn explain_term(&mut self, term: &str) -> Result<String, VlmError> {
        self.generate(&prompts::explain_term(term), self.max_new_tokens)
    }
}

struct GemmaStep<'a> {
    model: &'a mut Model,
    device: &'a Device,
}

impl DecodeStep for GemmaStep<'_> {
    fn reset(&mut self) {
        self.model.clear_kv_cache();
    }

    fn forward(&mut self, input: &[u32], start_pos: usize) -> Result<Tensor, VlmError> {
        let input = Tensor::new(input, self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&input, start_pos)?;
        Ok(logits.squeeze(0)?.squeeze(0)?)
    }
}

impl TextGenerator for MedGemma {
    fn generate(
        &mut self,
        messages: &[Message],
        max_new_tokens: usize,
    ) -> Result<String, VlmError> {
        MedGemma::generate(self, messages, max_new_tokens)
    }
}
