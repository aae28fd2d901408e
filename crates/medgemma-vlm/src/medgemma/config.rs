use candle_transformers::models::gemma3;
use serde_json::{json, Value};

use crate::error::VlmError;
use crate::generation::GenerationConfig;
use crate::hub::ModelSource;

/// Default MedGemma checkpoint.
pub const DEFAULT_MODEL_ID: &str = "google/medgemma-4b-it";

/// Variable prefix of the language model inside multimodal checkpoints.
pub const MULTIMODAL_WEIGHTS_PREFIX: &str = "language_model";

/// Configuration for the MedGemma model
#[derive(Clone, Debug)]
pub struct MedGemmaConfig {
    pub source: ModelSource,
    pub max_new_tokens: usize,
    pub generation: GenerationConfig,
    pub force_cpu: bool,
    pub use_flash_attn: bool,
    /// Prefix of the text model variables in the checkpoint. Detected from `config.json`
    /// when `None`.
    pub weights_prefix: Option<String>,
}

impl Default for MedGemmaConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::new(DEFAULT_MODEL_ID, "main"),
            max_new_tokens: 300,
            generation: GenerationConfig::default(),
            force_cpu: false,
            use_flash_attn: false,
            weights_prefix: None,
        }
    }
}

// Gemma 3 text defaults for fields `config.json` is allowed to omit.
fn text_defaults() -> Value {
    json!({
        "attention_bias": false,
        "head_dim": 256,
        "hidden_activation": "gelu_pytorch_tanh",
        "hidden_size": 2304,
        "intermediate_size": 9216,
        "num_attention_heads": 8,
        "num_hidden_layers": 26,
        "num_key_value_heads": 4,
        "rms_norm_eps": 1e-6,
        "rope_theta": 1_000_000.0,
        "rope_local_base_freq": 10_000.0,
        "vocab_size": 262_208,
        "final_logit_softcapping": null,
        "attn_logit_softcapping": null,
        "query_pre_attn_scalar": 256,
        "sliding_window": 4096,
        "sliding_window_pattern": 6,
        "max_position_embeddings": 131_072,
    })
}

/// Build the Gemma 3 text config from a checkpoint `config.json`.
///
/// Multimodal checkpoints nest the language model under `text_config`; text-only ones
/// are read as is. Missing fields take the Gemma 3 defaults.
pub fn text_config_from_json(value: &Value) -> Result<gemma3::Config, VlmError> {
    let text = value.get("text_config").unwrap_or(value);
    let Value::Object(fields) = text else {
        return Err(VlmError::MissingFile("text_config".to_string()));
    };

    let mut merged = match text_defaults() {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(serde_json::from_value(Value::Object(merged))?)
}

/// Variable prefix of the text model for a checkpoint `config.json`.
pub fn weights_prefix_for(value: &Value) -> &'static str {
    if value.get("text_config").is_some() {
        MULTIMODAL_WEIGHTS_PREFIX
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multimodal_config_reads_text_config() -> Result<(), VlmError> {
        let value = json!({
            "architectures": ["Gemma3ForConditionalGeneration"],
            "model_type": "gemma3",
            "text_config": {
                "hidden_size": 2560,
                "intermediate_size": 10240,
                "model_type": "gemma3_text",
                "num_hidden_layers": 34,
                "rope_scaling": { "factor": 8.0, "rope_type": "linear" },
                "sliding_window": 1024
            },
            "vision_config": { "hidden_size": 1152 }
        });
        let cfg = text_config_from_json(&value)?;
        assert_eq!(cfg.hidden_size, 2560);
        assert_eq!(cfg.intermediate_size, 10240);
        assert_eq!(cfg.num_hidden_layers, 34);
        assert_eq!(cfg.sliding_window, 1024);
        // defaults
        assert_eq!(cfg.vocab_size, 262_208);
        assert_eq!(cfg.head_dim, 256);
        assert_eq!(cfg.num_key_value_heads, 4);
        assert!(cfg.final_logit_softcapping.is_none());
        assert_eq!(weights_prefix_for(&value), MULTIMODAL_WEIGHTS_PREFIX);
        Ok(())
    }

    #[test]
    fn text_only_config() -> Result<(), VlmError> {
        let value = json!({
            "model_type": "gemma3_text",
            "hidden_size": 5376,
            "num_attention_heads": 32,
            "num_hidden_layers": 62,
            "num_key_value_heads": 16,
            "query_pre_attn_scalar": 168,
            "final_logit_softcapping": 30.0
        });
        let cfg = text_config_from_json(&value)?;
        assert_eq!(cfg.hidden_size, 5376);
        assert_eq!(cfg.num_attention_heads, 32);
        assert_eq!(cfg.query_pre_attn_scalar, 168);
        assert_eq!(cfg.final_logit_softcapping, Some(30.0));
        assert_eq!(weights_prefix_for(&value), "");
        Ok(())
    }

    #[test]
    fn invalid_text_config() {
        let res = text_config_from_json(&json!({ "text_config": 3 }));
        assert!(matches!(res, Err(VlmError::MissingFile(_))));
    }

    #[test]
    fn default_config() {
        let cfg = MedGemmaConfig::default();
        assert_eq!(cfg.source.model_id, DEFAULT_MODEL_ID);
        assert_eq!(cfg.max_new_tokens, 300);
        assert!(cfg.generation.temperature.is_none());
    }
}
