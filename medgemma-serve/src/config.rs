use argh::FromArgs;

use medgemma_vlm::blip::{self, BlipConfig};
use medgemma_vlm::hub::ModelSource;
use medgemma_vlm::medgemma::{self, MedGemmaConfig};

/// Origins of the web frontend during development.
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

#[derive(FromArgs, Debug)]
/// Serve the MedGemma educational API
pub struct Args {
    /// address to bind [env: HOST] (default: 0.0.0.0)
    #[argh(option)]
    host: Option<String>,

    /// port to listen on [env: PORT] (default: 8000)
    #[argh(option)]
    port: Option<u16>,

    /// checkpoint of the MedGemma model on the HuggingFace Hub [env: MODEL_ID]
    #[argh(option)]
    model_id: Option<String>,

    /// revision of the MedGemma checkpoint
    #[argh(option, default = "String::from(\"main\")")]
    revision: String,

    /// checkpoint of the BLIP captioner on the HuggingFace Hub [env: CAPTION_MODEL_ID]
    #[argh(option)]
    caption_model_id: Option<String>,

    /// revision of the BLIP checkpoint
    #[argh(option, default = "String::from(blip::DEFAULT_REVISION)")]
    caption_revision: String,

    /// maximum number of tokens generated per answer
    #[argh(option, default = "300")]
    max_new_tokens: usize,

    /// maximum number of tokens of an image caption
    #[argh(option, default = "64")]
    caption_max_tokens: usize,

    /// allowed CORS origin, can be repeated (default: the local frontend)
    #[argh(option)]
    cors_origin: Vec<String>,

    /// maximum size of an uploaded image in MiB
    #[argh(option, default = "20")]
    max_upload_mb: usize,

    /// run the models on the CPU even if an accelerator is available
    #[argh(switch)]
    cpu: bool,

    /// load the models on the first request instead of at startup
    #[argh(switch)]
    no_preload: bool,

    /// log the device diagnostics and exit
    #[argh(switch)]
    check_device: bool,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed.
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Resolved server configuration.
#[derive(Debug)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    pub medgemma: MedGemmaConfig,
    pub blip: BlipConfig,
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
    pub force_cpu: bool,
    pub preload: bool,
    pub check_device: bool,
}

impl ServeConfig {
    /// Resolve the command line arguments against the process environment.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        Self::resolve(args, |name| std::env::var(name).ok())
    }

    /// Resolve the command line arguments, falling back to `env` for unset options.
    pub fn resolve(
        args: Args,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let host = args
            .host
            .or_else(|| env("HOST"))
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let port = match args.port {
            Some(port) => port,
            None => match env("PORT") {
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        name: "PORT",
                        value,
                    })?,
                None => 8000,
            },
        };

        let model_id = args
            .model_id
            .or_else(|| env("MODEL_ID"))
            .unwrap_or_else(|| medgemma::DEFAULT_MODEL_ID.to_string());
        let caption_model_id = args
            .caption_model_id
            .or_else(|| env("CAPTION_MODEL_ID"))
            .unwrap_or_else(|| blip::DEFAULT_MODEL_ID.to_string());

        let cors_origins = if args.cors_origin.is_empty() {
            DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect()
        } else {
            args.cors_origin
        };

        Ok(Self {
            host,
            port,
            medgemma: MedGemmaConfig {
                source: ModelSource::new(model_id, args.revision),
                max_new_tokens: args.max_new_tokens,
                force_cpu: args.cpu,
                ..Default::default()
            },
            blip: BlipConfig {
                source: ModelSource::new(caption_model_id, args.caption_revision),
                max_tokens: args.caption_max_tokens,
                force_cpu: args.cpu,
            },
            cors_origins,
            max_upload_bytes: args.max_upload_mb * 1024 * 1024,
            force_cpu: args.cpu,
            preload: !args.no_preload,
            check_device: args.check_device,
        })
    }

    #[inline]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
