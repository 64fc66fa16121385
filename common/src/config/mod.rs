use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::params::GenerationParams;

/// Optional overrides layered on top of [`GenerationParams`] defaults.
///
/// ```toml
/// [context]
/// n_ctx = 1024
///
/// [sampling]
/// temp = 0.2
/// ```
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub context: ContextConfig,
    pub model: ModelConfig,
    pub prompt: PromptConfig,
    pub sampling: SamplingConfig,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    pub seed: Option<u32>,
    pub n_ctx: Option<u32>,
    pub n_batch: Option<u32>,
    /// `0` keeps the CPU-count heuristic.
    pub n_threads: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub n_gpu_layers: Option<i32>,
    pub vram_budget_gb: Option<f32>,
    pub use_mmap: Option<bool>,
    pub use_mlock: Option<bool>,
    pub reset_gpu_index: Option<bool>,
    pub disable_gpu_index: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct PromptConfig {
    pub input_prefix: Option<String>,
    pub input_suffix: Option<String>,
    pub use_chat_template: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    pub temp: Option<f32>,
    pub top_k: Option<i32>,
    pub top_p: Option<f32>,
    pub penalty_last_n: Option<usize>,
    pub penalty_repeat: Option<f32>,
    pub penalty_freq: Option<f32>,
    pub penalty_present: Option<f32>,
    pub n_prev: Option<usize>,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(config_str).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.context.n_ctx == Some(0) {
            bail!("context.n_ctx must be positive");
        }
        if self.context.n_batch == Some(0) {
            bail!("context.n_batch must be positive");
        }
        if let Some(top_p) = self.sampling.top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                bail!("sampling.top_p must be in (0, 1], got {}", top_p);
            }
        }
        if let Some(temp) = self.sampling.temp {
            if !temp.is_finite() {
                bail!("sampling.temp must be finite");
            }
        }
        if self.sampling.n_prev == Some(0) {
            bail!("sampling.n_prev must be positive");
        }
        Ok(())
    }

    /// Overwrite only the fields present in the config.
    pub fn apply(&self, params: &mut GenerationParams) {
        let ctx = &self.context;
        if let Some(seed) = ctx.seed {
            params.seed = seed;
        }
        if let Some(n_ctx) = ctx.n_ctx {
            params.n_ctx = n_ctx;
        }
        if let Some(n_batch) = ctx.n_batch {
            params.n_batch = n_batch;
        }
        if let Some(n_threads) = ctx.n_threads.filter(|n| *n > 0) {
            params.n_threads = n_threads;
            params.n_threads_batch = n_threads;
        }

        let model = &self.model;
        set(&mut params.n_gpu_layers, model.n_gpu_layers);
        set(&mut params.vram_budget_gb, model.vram_budget_gb);
        set(&mut params.use_mmap, model.use_mmap);
        set(&mut params.use_mlock, model.use_mlock);
        set(&mut params.reset_gpu_index, model.reset_gpu_index);
        set(&mut params.disable_gpu_index, model.disable_gpu_index);

        let prompt = &self.prompt;
        set(&mut params.input_prefix, prompt.input_prefix.clone());
        set(&mut params.input_suffix, prompt.input_suffix.clone());
        set(&mut params.use_chat_template, prompt.use_chat_template);

        let s = &self.sampling;
        let sp = &mut params.sampling;
        set(&mut sp.temp, s.temp);
        set(&mut sp.top_k, s.top_k);
        set(&mut sp.top_p, s.top_p);
        set(&mut sp.penalty_last_n, s.penalty_last_n);
        set(&mut sp.penalty_repeat, s.penalty_repeat);
        set(&mut sp.penalty_freq, s.penalty_freq);
        set(&mut sp.penalty_present, s.penalty_present);
        set(&mut sp.n_prev, s.n_prev);
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_keeps_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        let mut params = GenerationParams::new("m.gguf");
        let before = params.clone();
        config.apply(&mut params);
        assert_eq!(params.n_ctx, before.n_ctx);
        assert_eq!(params.seed, before.seed);
        assert_eq!(params.sampling, before.sampling);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = EngineConfig::from_toml(
            r#"
            [context]
            n_ctx = 2048
            n_threads = 4

            [model]
            n_gpu_layers = 12
            vram_budget_gb = 3.5

            [prompt]
            use_chat_template = true
            input_prefix = "Q: "

            [sampling]
            temp = 0.0
            top_k = 1
            "#,
        )
        .unwrap();

        let mut params = GenerationParams::new("m.gguf");
        config.apply(&mut params);
        assert_eq!(params.n_ctx, 2048);
        assert_eq!(params.n_threads, 4);
        assert_eq!(params.n_threads_batch, 4);
        assert_eq!(params.n_gpu_layers, 12);
        assert_eq!(params.vram_budget_gb, 3.5);
        assert!(params.use_chat_template);
        assert_eq!(params.input_prefix, "Q: ");
        assert_eq!(params.input_suffix, "Assistance: ");
        assert!(params.sampling.is_greedy());
        assert_eq!(params.sampling.top_k, 1);
        assert_eq!(params.sampling.top_p, 0.95);
    }

    #[test]
    fn test_zero_threads_keeps_heuristic() {
        let config = EngineConfig::from_toml("[context]\nn_threads = 0\n").unwrap();
        let mut params = GenerationParams::new("m.gguf");
        let threads = params.n_threads;
        config.apply(&mut params);
        assert_eq!(params.n_threads, threads);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(EngineConfig::from_toml("[context]\nn_ctx = 0\n").is_err());
        assert!(EngineConfig::from_toml("[sampling]\ntop_p = 1.5\n").is_err());
        assert!(EngineConfig::from_toml("[sampling]\nn_prev = 0\n").is_err());
        assert!(EngineConfig::from_toml("[context]\nunknown = 1\n").is_err());
        assert!(EngineConfig::from_toml("not toml at all = = =").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[context]\nseed = 7").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.context.seed, Some(7));

        let missing = EngineConfig::from_file("/nonexistent/powerinfer.toml");
        assert!(missing.unwrap_err().to_string().contains("Failed to read config file"));
    }
}
