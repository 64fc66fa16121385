// ============================================================================
// Raw PowerInfer llama.h API (for Android)
// ============================================================================
//
// Mirrors the C API of the PowerInfer fork of llama.cpp that libllama.so is
// built from. Struct layouts must match that header exactly: fields are only
// ever read from the *_default_params() results and patched, never built
// from scratch.
// ============================================================================

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_uint, c_void};

#[repr(C)]
pub struct llama_model {
    _private: [u8; 0],
}

#[repr(C)]
pub struct llama_context {
    _private: [u8; 0],
}

pub type llama_token = i32;
pub type llama_pos = i32;
pub type llama_seq_id = i32;

pub type llama_progress_callback = Option<unsafe extern "C" fn(progress: f32, ctx: *mut c_void)>;

pub type ggml_log_callback =
    Option<unsafe extern "C" fn(level: c_uint, text: *const c_char, user_data: *mut c_void)>;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct llama_model_params {
    pub n_gpu_layers: i32,
    pub main_gpu: i32,
    /// PowerInfer: VRAM budget in GB, -1 for all available.
    pub vram_budget_gb: f32,
    pub tensor_split: *const f32,
    pub progress_callback: llama_progress_callback,
    pub progress_callback_user_data: *mut c_void,
    pub vocab_only: bool,
    pub use_mmap: bool,
    pub use_mlock: bool,
    /// PowerInfer: rebuild the GPU neuron index.
    pub reset_gpu_index: bool,
    /// PowerInfer: ignore the GPU neuron index.
    pub disable_gpu_index: bool,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct llama_context_params {
    pub seed: u32,
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: u32,
    pub n_threads_batch: u32,
    pub rope_scaling_type: i8,
    pub rope_freq_base: f32,
    pub rope_freq_scale: f32,
    pub yarn_ext_factor: f32,
    pub yarn_attn_factor: f32,
    pub yarn_beta_fast: f32,
    pub yarn_beta_slow: f32,
    pub yarn_orig_ctx: u32,
    pub mul_mat_q: bool,
    pub f16_kv: bool,
    pub logits_all: bool,
    pub embedding: bool,
}

// Batch structure for llama_decode
#[repr(C)]
pub struct llama_batch {
    pub n_tokens: i32,
    pub token: *mut llama_token,
    pub embd: *mut f32,
    pub pos: *mut llama_pos,
    pub n_seq_id: *mut i32,
    pub seq_id: *mut *mut llama_seq_id,
    pub logits: *mut i8,
    pub all_pos_0: llama_pos,
    pub all_pos_1: llama_pos,
    pub all_seq_id: llama_seq_id,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct llama_token_data {
    pub id: llama_token,
    pub logit: f32,
    pub p: f32,
}

#[repr(C)]
pub struct llama_token_data_array {
    pub data: *mut llama_token_data,
    pub size: usize,
    pub sorted: bool,
}

extern "C" {
    // Backend functions
    pub fn llama_backend_init(numa: bool);
    pub fn llama_backend_free();
    pub fn llama_log_set(log_callback: ggml_log_callback, user_data: *mut c_void);
    pub fn llama_print_system_info() -> *const c_char;

    pub fn llama_model_default_params() -> llama_model_params;
    pub fn llama_context_default_params() -> llama_context_params;

    pub fn llama_load_model_from_file(
        path_model: *const c_char,
        params: llama_model_params,
    ) -> *mut llama_model;
    pub fn llama_free_model(model: *mut llama_model);

    pub fn llama_new_context_with_model(
        model: *mut llama_model,
        params: llama_context_params,
    ) -> *mut llama_context;
    pub fn llama_free(ctx: *mut llama_context);

    // Utility functions
    pub fn llama_n_ctx(ctx: *const llama_context) -> u32;
    pub fn llama_n_vocab(model: *const llama_model) -> c_int;
    pub fn llama_token_eos(model: *const llama_model) -> llama_token;

    pub fn llama_tokenize(
        model: *const llama_model,
        text: *const c_char,
        text_len: c_int,
        tokens: *mut llama_token,
        n_max_tokens: c_int,
        add_bos: bool,
        special: bool,
    ) -> c_int;
    pub fn llama_token_to_piece(
        model: *const llama_model,
        token: llama_token,
        buf: *mut c_char,
        length: c_int,
    ) -> c_int;

    // Generation functions
    pub fn llama_decode(ctx: *mut llama_context, batch: llama_batch) -> c_int;
    pub fn llama_get_logits_ith(ctx: *mut llama_context, i: i32) -> *mut f32;

    // KV cache management
    pub fn llama_kv_cache_clear(ctx: *mut llama_context);

    // Sampling primitives
    pub fn llama_sample_repetition_penalties(
        ctx: *mut llama_context,
        candidates: *mut llama_token_data_array,
        last_tokens: *const llama_token,
        penalty_last_n: usize,
        penalty_repeat: f32,
        penalty_freq: f32,
        penalty_present: f32,
    );
    pub fn llama_sample_top_k(
        ctx: *mut llama_context,
        candidates: *mut llama_token_data_array,
        k: c_int,
        min_keep: usize,
    );
    pub fn llama_sample_top_p(
        ctx: *mut llama_context,
        candidates: *mut llama_token_data_array,
        p: f32,
        min_keep: usize,
    );
    pub fn llama_sample_temp(
        ctx: *mut llama_context,
        candidates: *mut llama_token_data_array,
        temp: f32,
    );
    pub fn llama_sample_token(
        ctx: *mut llama_context,
        candidates: *mut llama_token_data_array,
    ) -> llama_token;
    pub fn llama_sample_token_greedy(
        ctx: *mut llama_context,
        candidates: *mut llama_token_data_array,
    ) -> llama_token;
}
