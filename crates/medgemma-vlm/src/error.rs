/// An error type for the model wrappers.
#[derive(thiserror::Error, Debug)]
pub enum VlmError {
    /// Error while resolving or downloading files from the hub.
    #[error(transparent)]
    FailedToLoadModel(#[from] hf_hub::api::sync::ApiError),

    /// Error raised by a candle tensor operation.
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    /// Error raised by the tokenizer.
    #[error(transparent)]
    TokenizerError(#[from] tokenizers::Error),

    /// Error while compiling or rendering a chat template.
    #[error(transparent)]
    TemplateError(#[from] minijinja::Error),

    /// Error while decoding an image.
    #[error("Failed to decode the image. {0}")]
    ImageDecodeError(#[from] image::ImageError),

    /// Error while reading a file.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Error while parsing a json file.
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    /// A checkpoint file or field is missing.
    #[error("Missing file or field: {0}")]
    MissingFile(String),

    /// None of the stop tokens exist in the vocabulary.
    #[error("Cannot find any stop token in the vocabulary: {0:?}")]
    EosTokenNotFound(Vec<String>),

    /// The logits contain NaN or infinite values.
    #[error("Invalid logits detected: {0}")]
    InvalidLogits(String),

    /// The rendered prompt produced no tokens.
    #[error("The prompt is empty")]
    EmptyPrompt,
}
