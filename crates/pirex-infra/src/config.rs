//! Configuration loading: layered defaults -> optional file -> environment,
//! using the `config` crate the way the teacher's `BrainConfig::from_env`
//! loaded Brain AI's settings, generalized here to three layers instead of
//! a bespoke `env::var` dance per field.
//!
//! Precedence (later wins): `PirexConfig::default()` serialized as the base
//! layer, then an optional TOML file at `path`, then environment variables
//! prefixed `PIREX__` with `__` as the nesting separator (e.g.
//! `PIREX__CACHE__ITEM_METADATA_TTL_SECS=7200`).

use config::{Config, Environment, File};
use pirex_types::{PirexConfig, PirexError, Result};

pub fn load(path: Option<&str>) -> Result<PirexConfig> {
    let defaults_json =
        serde_json::to_string(&PirexConfig::default()).map_err(|e| PirexError::fatal(e.to_string()))?;

    let mut builder = Config::builder().add_source(File::from_str(&defaults_json, config::FileFormat::Json));

    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path).required(false));
    }

    builder = builder.add_source(Environment::with_prefix("PIREX").separator("__"));

    let cfg = builder.build().map_err(|e| PirexError::validation(format!("config load failed: {e}")))?;
    cfg.try_deserialize().map_err(|e| PirexError::validation(format!("config deserialize failed: {e}")))
}

pub fn validate(cfg: &PirexConfig) -> Result<()> {
    if cfg.embedding.text_dimension == 0 {
        return Err(PirexError::validation("embedding.text_dimension must be positive"));
    }
    if cfg.pipeline.worker_count == 0 {
        return Err(PirexError::validation("pipeline.worker_count must be positive"));
    }
    if cfg.cache.item_metadata_ttl_secs == 0 {
        return Err(PirexError::validation("cache.item_metadata_ttl_secs must be positive"));
    }
    Ok(())
}
