use serde::Serialize;
use tracing::info;

use crate::sampling::SamplingParams;

pub const DEFAULT_SEED: u32 = 4396;
pub const DEFAULT_N_CTX: u32 = 512;
pub const DEFAULT_N_BATCH: u32 = 512;
pub const DEFAULT_INPUT_PREFIX: &str = "User: ";
pub const DEFAULT_INPUT_SUFFIX: &str = "Assistance: ";

const MAX_THREADS: usize = 8;

/// Everything the app configures for one loaded model.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationParams {
    pub model: String,
    pub seed: u32,
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: u32,
    pub n_threads_batch: u32,
    pub n_gpu_layers: i32,
    /// PowerInfer VRAM budget; negative means all available.
    pub vram_budget_gb: f32,
    pub use_mmap: bool,
    pub use_mlock: bool,
    pub reset_gpu_index: bool,
    pub disable_gpu_index: bool,
    pub input_prefix: String,
    pub input_suffix: String,
    /// Document prompt prepended to every message (set from an uploaded PDF).
    pub prompt: String,
    pub use_chat_template: bool,
    pub sampling: SamplingParams,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>) -> Self {
        let n_threads = default_threads();
        info!("Using {} threads", n_threads);

        Self {
            model: model.into(),
            seed: DEFAULT_SEED,
            n_ctx: DEFAULT_N_CTX,
            n_batch: DEFAULT_N_BATCH,
            n_threads,
            n_threads_batch: n_threads,
            n_gpu_layers: 0,
            vram_budget_gb: -1.0,
            use_mmap: true,
            use_mlock: false,
            reset_gpu_index: false,
            disable_gpu_index: false,
            input_prefix: DEFAULT_INPUT_PREFIX.to_string(),
            input_suffix: DEFAULT_INPUT_SUFFIX.to_string(),
            prompt: String::new(),
            use_chat_template: false,
            sampling: SamplingParams::default(),
        }
    }

    /// The text that actually gets tokenized for a user message.
    pub fn compose_input(&self, text: &str) -> String {
        if self.use_chat_template {
            format!(
                "{}\n{}{}\n{}",
                self.prompt, self.input_prefix, text, self.input_suffix
            )
        } else {
            format!("{}\n{}", self.prompt, text)
        }
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn clear_prompt(&mut self) {
        self.prompt.clear();
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Leave two cores to the UI, never use more than eight.
pub fn default_threads() -> u32 {
    let online = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    threads_for(online)
}

fn threads_for(online: usize) -> u32 {
    online.saturating_sub(2).clamp(1, MAX_THREADS) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = GenerationParams::new("/sdcard/model.gguf");
        assert_eq!(params.model, "/sdcard/model.gguf");
        assert_eq!(params.seed, 4396);
        assert_eq!(params.n_ctx, 512);
        assert_eq!(params.n_threads, params.n_threads_batch);
        assert!((1..=8).contains(&params.n_threads));
        assert_eq!(params.input_prefix, "User: ");
        assert_eq!(params.input_suffix, "Assistance: ");
        assert!(params.prompt.is_empty());
    }

    #[test]
    fn test_thread_heuristic() {
        assert_eq!(threads_for(1), 1);
        assert_eq!(threads_for(2), 1);
        assert_eq!(threads_for(4), 2);
        assert_eq!(threads_for(8), 6);
        assert_eq!(threads_for(16), 8);
    }

    #[test]
    fn test_compose_input_plain() {
        let mut params = GenerationParams::new("m");
        assert_eq!(params.compose_input("hi"), "\nhi");

        params.set_prompt("Document text");
        assert_eq!(params.compose_input("hi"), "Document text\nhi");

        params.clear_prompt();
        assert_eq!(params.compose_input("hi"), "\nhi");
    }

    #[test]
    fn test_compose_input_with_template() {
        let mut params = GenerationParams::new("m");
        params.use_chat_template = true;
        params.set_prompt("Doc");
        assert_eq!(
            params.compose_input("What is it?"),
            "Doc\nUser: What is it?\nAssistance: "
        );
    }

    #[test]
    fn test_to_json() {
        let params = GenerationParams::new("model.gguf");
        let json: serde_json::Value = serde_json::from_str(&params.to_json().unwrap()).unwrap();
        assert_eq!(json["model"], "model.gguf");
        assert_eq!(json["n_ctx"], 512);
        assert_eq!(json["sampling"]["top_k"], 40);
    }
}
