use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// Root of all persisted state (`DATA_ROOT`).
    pub data_root: String,

    /// Listen address (`BIND_ADDR`), loopback by default.
    pub bind_addr: String,

    /// Default tracing filter (`LOG_LEVEL`).
    pub log_level: String,

    /// Per-call timeout for embedding and upstream chat requests.
    #[validate(range(min = 1, max = 3600))]
    pub upstream_timeout_secs: u64,

    /// Chunker cap, in characters (the coarse token proxy).
    #[validate(range(min = 64, max = 8192))]
    pub chunk_chars: usize,

    /// Per-base top-k for RAG retrieval.
    #[validate(range(min = 1, max = 64))]
    pub rag_top_k: usize,

    /// Global cap on retrieved snippets across bases.
    #[validate(range(min = 1, max = 256))]
    pub rag_global_limit: usize,

    /// Model context window in the character proxy; history is budgeted to
    /// half of this.
    #[validate(range(min = 512, max = 1_048_576))]
    pub context_length: usize,

    pub language: String,

    /// Port the managed local runtime listens on.
    #[validate(range(min = 1024, max = 65535))]
    pub runtime_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let data_root = std::env::var("DATA_ROOT").unwrap_or_else(|_| {
            format!(
                "{}/.loomchat",
                std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
            )
        });

        let settings = config::Config::builder()
            .set_default("data_root", data_root.clone())?
            .set_default("bind_addr", "127.0.0.1:7071")?
            .set_default("log_level", "info")?
            .set_default("upstream_timeout_secs", 120_i64)?
            .set_default("chunk_chars", 600_i64)?
            .set_default("rag_top_k", 4_i64)?
            .set_default("rag_global_limit", 12_i64)?
            .set_default("context_length", 8192_i64)?
            .set_default("language", "en")?
            .set_default("runtime_port", 11435_i64)?
            .add_source(config::File::with_name(&format!("{}/config", data_root)).required(false))
            .set_override_option("bind_addr", std::env::var("BIND_ADDR").ok())?
            .set_override_option("log_level", std::env::var("LOG_LEVEL").ok())?
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn runtime_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.runtime_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: ".".to_string(),
            bind_addr: "127.0.0.1:7071".to_string(),
            log_level: "info".to_string(),
            upstream_timeout_secs: 120,
            chunk_chars: 600,
            rag_top_k: 4,
            rag_global_limit: 12,
            context_length: 8192,
            language: "en".to_string(),
            runtime_port: 11435,
        }
    }
}
