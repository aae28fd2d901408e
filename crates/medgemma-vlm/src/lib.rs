//! # MedGemma vision-language models
//!
//! Model wrappers behind the MedGemma educational API.
//!
//! - **MedGemma**: Google's medical Gemma 3 model, used here for text generation
//!   through its chat template.
//! - **BLIP**: Salesforce's image captioning model.
//!
//! Weights, tokenizers and chat templates are fetched from the HuggingFace Hub and
//! executed with candle. Nothing in this crate implements the networks themselves.

/// Salesforce BLIP image captioning.
pub mod blip;

/// Chat message types and template rendering.
pub mod chat;

/// Compute device and dtype selection.
pub mod device;

/// Error types for the crate.
pub mod error;

/// Token sampling and stop conditions shared by the decode loops.
pub mod generation;

/// HuggingFace Hub checkpoint resolution.
pub mod hub;

/// MedGemma text generation.
pub mod medgemma;

/// Prompt construction for the educational endpoints.
pub mod prompts;

mod traits;

pub use error::VlmError;
pub use traits::{ImageCaptioner, TextGenerator};
