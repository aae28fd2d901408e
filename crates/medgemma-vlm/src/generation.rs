use candle_core::{DType, Tensor};
use candle_transformers::generation::LogitsProcessor;
use tokenizers::Tokenizer;

use crate::error::VlmError;

/// Sampling parameters of a decode loop.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationConfig {
    pub seed: u64,
    /// Sampling temperature; `None` decodes greedily.
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 299792458,
            temperature: None,
            top_p: None,
            repeat_penalty: 1.0,
            repeat_last_n: 64,
        }
    }
}

/// Turns the logits of the last position into the next token.
pub struct Sampler {
    logits_processor: LogitsProcessor,
    repeat_penalty: f32,
    repeat_last_n: usize,
}

impl Sampler {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            logits_processor: LogitsProcessor::new(config.seed, config.temperature, config.top_p),
            repeat_penalty: config.repeat_penalty,
            repeat_last_n: config.repeat_last_n,
        }
    }

    /// Sample the next token.
    ///
    /// # Arguments
    ///
    /// * `logits` - The logits of the last position with shape [vocab].
    /// * `history` - The tokens seen so far, used for the repeat penalty.
    pub fn sample(&mut self, logits: &Tensor, history: &[u32]) -> Result<u32, VlmError> {
        let logits = logits.to_dtype(DType::F32)?;

        let logits = if self.repeat_penalty == 1. {
            logits
        } else {
            let start_at = history.len().saturating_sub(self.repeat_last_n);
            candle_transformers::utils::apply_repeat_penalty(
                &logits,
                self.repeat_penalty,
                &history[start_at..],
            )?
        };

        if logits.to_vec1::<f32>()?.iter().any(|v| !v.is_finite()) {
            return Err(VlmError::InvalidLogits(
                "Non-finite values (NaN or +/-Inf) found in logits".to_string(),
            ));
        }

        Ok(self.logits_processor.sample(&logits)?)
    }
}

/// Token ids that end a generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StopTokens {
    ids: Vec<u32>,
}

impl StopTokens {
    /// Resolve `names` with a vocabulary lookup, skipping unknown tokens.
    ///
    /// Fails when none of the names is known.
    pub fn from_lookup(
        names: &[&str],
        lookup: impl Fn(&str) -> Option<u32>,
    ) -> Result<Self, VlmError> {
        let ids = names.iter().filter_map(|n| lookup(n)).collect::<Vec<_>>();
        if ids.is_empty() {
            return Err(VlmError::EosTokenNotFound(
                names.iter().map(|n| n.to_string()).collect(),
            ));
        }
        Ok(Self { ids })
    }

    /// Resolve `names` in the tokenizer vocabulary.
    pub fn resolve(tokenizer: &Tokenizer, names: &[&str]) -> Result<Self, VlmError> {
        Self::from_lookup(names, |n| tokenizer.token_to_id(n))
    }

    /// Stop tokens given directly by id.
    pub fn from_ids(ids: Vec<u32>) -> Self {
        Self { ids }
    }

    #[inline]
    pub fn contains(&self, token: u32) -> bool {
        self.ids.contains(&token)
    }
}

/// One forward pass of a causal language model over its kv cache.
pub trait DecodeStep {
    /// Drop the kv cache before a new prompt.
    fn reset(&mut self);

    /// Logits of the last position of `input` with shape [vocab].
    ///
    /// `start_pos` is the position of the first token of `input` in the sequence.
    fn forward(&mut self, input: &[u32], start_pos: usize) -> Result<Tensor, VlmError>;
}

/// Run the decode loop on `prompt` and return the generated tokens.
///
/// The whole prompt is fed on the first step, then one token per step. Generation stops on a
/// stop token, which is not returned, or after `max_new_tokens` tokens.
pub fn decode(
    step: &mut impl DecodeStep,
    sampler: &mut Sampler,
    stop_tokens: &StopTokens,
    prompt: &[u32],
    max_new_tokens: usize,
) -> Result<Vec<u32>, VlmError> {
    if prompt.is_empty() {
        return Err(VlmError::EmptyPrompt);
    }

    step.reset();
    let mut tokens = prompt.to_vec();
    for index in 0..max_new_tokens {
        let context_size = if index > 0 { 1 } else { tokens.len() };
        let start_pos = tokens.len().saturating_sub(context_size);
        let logits = step.forward(&tokens[start_pos..], start_pos)?;

        let next_token = sampler.sample(&logits, &tokens)?;
        if stop_tokens.contains(next_token) {
            break;
        }
        tokens.push(next_token);
    }

    Ok(tokens.split_off(prompt.len()))
}
