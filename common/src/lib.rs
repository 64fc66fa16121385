// ============================================================================
// PowerInfer Android - engine-agnostic core
// ============================================================================
//
// Everything the JNI layer needs that does not touch the native library:
// generation parameters, TOML overrides, decode batches, sampler state,
// UTF-8 streaming and the completion loop itself.
// ============================================================================

pub mod batch;
pub mod config;
pub mod engine;
pub mod params;
pub mod sampling;
pub mod utf8;

pub use batch::Batch;
pub use config::EngineConfig;
pub use engine::{Generation, InferenceContext};
pub use params::GenerationParams;
pub use sampling::{Sampler, SamplingParams};
pub use utf8::Utf8Stream;

/// Token id as used by the llama C API.
pub type Token = i32;
/// Position of a token inside a sequence.
pub type Pos = i32;
/// KV-cache sequence id.
pub type SeqId = i32;
