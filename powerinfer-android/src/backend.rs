// ============================================================================
// PowerInfer-backed model and context
// ============================================================================

use anyhow::{anyhow, bail, Context as _, Result};
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use common::{Batch, Generation, GenerationParams, InferenceContext, Sampler, Token};

use crate::handle::NativeHandle;
use crate::sys;

// Global backend initialization flag
static BACKEND_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the library backend (idempotent).
pub fn backend_init(numa: bool) {
    if BACKEND_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Backend already initialized");
        return;
    }
    unsafe { sys::llama_backend_init(numa) };
    info!("Backend initialized (numa = {})", numa);
}

pub fn backend_free() {
    if BACKEND_INITIALIZED.swap(false, Ordering::SeqCst) {
        unsafe { sys::llama_backend_free() };
        info!("Backend freed");
    }
}

pub fn system_info() -> String {
    let info = unsafe { sys::llama_print_system_info() };
    if info.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(info) }.to_string_lossy().into_owned()
}

unsafe extern "C" fn llama_log_callback(level: c_uint, text: *const c_char, _user_data: *mut c_void) {
    if text.is_null() {
        return;
    }
    let text = CStr::from_ptr(text).to_string_lossy();
    crate::logging::forward_native_log(level, &text);
}

/// Send everything the library prints to the Rust logger.
pub fn route_native_logs() {
    unsafe { sys::llama_log_set(Some(llama_log_callback), std::ptr::null_mut()) };
}

pub struct Model {
    raw: NonNull<sys::llama_model>,
}

impl NativeHandle for Model {
    const TAG: u32 = u32::from_be_bytes(*b"MODL");
    const NAME: &'static str = "model";
}

impl Model {
    pub fn load(params: &GenerationParams) -> Result<Self> {
        let path = CString::new(params.model.as_str()).context("model path contains a NUL byte")?;

        let mut model_params = unsafe { sys::llama_model_default_params() };
        model_params.n_gpu_layers = params.n_gpu_layers;
        model_params.vram_budget_gb = params.vram_budget_gb;
        model_params.use_mmap = params.use_mmap;
        model_params.use_mlock = params.use_mlock;
        model_params.reset_gpu_index = params.reset_gpu_index;
        model_params.disable_gpu_index = params.disable_gpu_index;

        info!("Loading model from {}", params.model);
        let raw = unsafe { sys::llama_load_model_from_file(path.as_ptr(), model_params) };
        let raw = NonNull::new(raw)
            .ok_or_else(|| anyhow!("llama_load_model_from_file() returned null for {}", params.model))?;

        Ok(Self { raw })
    }

    pub fn as_ptr(&self) -> *mut sys::llama_model {
        self.raw.as_ptr()
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        unsafe { sys::llama_free_model(self.raw.as_ptr()) };
    }
}

/// A llama context bound to the model it was created from.
///
/// The model must outlive it; the Kotlin side frees the context before the
/// model.
pub struct LlamaContext {
    raw: NonNull<sys::llama_context>,
    model: NonNull<sys::llama_model>,
    candidates: Vec<sys::llama_token_data>,
}

impl LlamaContext {
    pub fn new(model: &Model, params: &GenerationParams) -> Result<Self> {
        let mut ctx_params = unsafe { sys::llama_context_default_params() };
        ctx_params.seed = params.seed;
        ctx_params.n_ctx = params.n_ctx;
        ctx_params.n_batch = params.n_batch;
        ctx_params.n_threads = params.n_threads;
        ctx_params.n_threads_batch = params.n_threads_batch;

        let raw = unsafe { sys::llama_new_context_with_model(model.as_ptr(), ctx_params) };
        let raw = NonNull::new(raw).ok_or_else(|| anyhow!("llama_new_context_with_model() returned null"))?;

        Ok(Self {
            raw,
            model: model.raw,
            candidates: Vec::new(),
        })
    }
}

/// What the `context` handle points at: the llama context plus the
/// streaming state of the conversation running on it.
pub struct Context {
    pub llama: LlamaContext,
    pub generation: Generation,
}

impl NativeHandle for Context {
    const TAG: u32 = u32::from_be_bytes(*b"CTXT");
    const NAME: &'static str = "context";
}

impl Context {
    pub fn new(model: &Model, params: &GenerationParams) -> Result<Self> {
        Ok(Self {
            llama: LlamaContext::new(model, params)?,
            generation: Generation::new(),
        })
    }
}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        unsafe { sys::llama_free(self.raw.as_ptr()) };
    }
}

impl InferenceContext for LlamaContext {
    fn n_ctx(&self) -> u32 {
        unsafe { sys::llama_n_ctx(self.raw.as_ptr()) }
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        let text_len = c_int::try_from(text.len()).context("prompt too long")?;
        let mut tokens: Vec<Token> = vec![0; text.len() + add_bos as usize];

        let mut n = unsafe {
            sys::llama_tokenize(
                self.model.as_ptr(),
                text.as_ptr() as *const c_char,
                text_len,
                tokens.as_mut_ptr(),
                tokens.len() as c_int,
                add_bos,
                false,
            )
        };
        if n < 0 {
            tokens.resize(n.unsigned_abs() as usize, 0);
            n = unsafe {
                sys::llama_tokenize(
                    self.model.as_ptr(),
                    text.as_ptr() as *const c_char,
                    text_len,
                    tokens.as_mut_ptr(),
                    tokens.len() as c_int,
                    add_bos,
                    false,
                )
            };
            if n < 0 {
                bail!("llama_tokenize() still needs {} tokens", -n);
            }
        }

        tokens.truncate(n as usize);
        Ok(tokens)
    }

    fn token_to_piece(&self, token: Token) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 8];
        let mut n = unsafe {
            sys::llama_token_to_piece(
                self.model.as_ptr(),
                token,
                buf.as_mut_ptr() as *mut c_char,
                buf.len() as c_int,
            )
        };
        if n < 0 {
            buf.resize(n.unsigned_abs() as usize, 0);
            n = unsafe {
                sys::llama_token_to_piece(
                    self.model.as_ptr(),
                    token,
                    buf.as_mut_ptr() as *mut c_char,
                    buf.len() as c_int,
                )
            };
            if n < 0 {
                bail!("llama_token_to_piece() failed for token {}", token);
            }
        }

        buf.truncate(n as usize);
        Ok(buf)
    }

    fn token_eos(&self) -> Token {
        unsafe { sys::llama_token_eos(self.model.as_ptr()) }
    }

    fn decode(&mut self, batch: &Batch) -> Result<()> {
        // The library only reads through these pointers.
        let mut seq_ptrs: Vec<*mut sys::llama_seq_id> = batch
            .seq_ids()
            .iter()
            .map(|ids| ids.as_ptr() as *mut sys::llama_seq_id)
            .collect();

        let (token, embd) = if batch.is_embedding() {
            (std::ptr::null_mut(), batch.embeddings().as_ptr() as *mut f32)
        } else {
            (batch.tokens().as_ptr() as *mut Token, std::ptr::null_mut())
        };

        let raw = sys::llama_batch {
            n_tokens: batch.n_tokens() as i32,
            token,
            embd,
            pos: batch.positions().as_ptr() as *mut sys::llama_pos,
            n_seq_id: batch.n_seq_ids().as_ptr() as *mut i32,
            seq_id: seq_ptrs.as_mut_ptr(),
            logits: batch.logits().as_ptr() as *mut i8,
            all_pos_0: 0,
            all_pos_1: 0,
            all_seq_id: 0,
        };

        let ret = unsafe { sys::llama_decode(self.raw.as_ptr(), raw) };
        if ret != 0 {
            bail!("llama_decode() returned {}", ret);
        }
        Ok(())
    }

    fn sample(&mut self, sampler: &Sampler, idx: usize) -> Result<Token> {
        let params = sampler.params();
        let ctx = self.raw.as_ptr();

        let n_vocab = unsafe { sys::llama_n_vocab(self.model.as_ptr()) };
        if n_vocab <= 0 {
            bail!("model reports an empty vocabulary");
        }
        let logits = unsafe { sys::llama_get_logits_ith(ctx, idx as i32) };
        if logits.is_null() {
            bail!("no logits for batch row {}", idx);
        }
        let logits = unsafe { std::slice::from_raw_parts(logits, n_vocab as usize) };

        self.candidates.clear();
        self.candidates
            .extend(logits.iter().enumerate().map(|(id, &logit)| sys::llama_token_data {
                id: id as Token,
                logit,
                p: 0.0,
            }));
        let mut cur = sys::llama_token_data_array {
            data: self.candidates.as_mut_ptr(),
            size: self.candidates.len(),
            sorted: false,
        };

        unsafe {
            if params.penalties_enabled() {
                let window = sampler.penalty_window();
                if !window.is_empty() {
                    sys::llama_sample_repetition_penalties(
                        ctx,
                        &mut cur,
                        window.as_ptr(),
                        window.len(),
                        params.penalty_repeat,
                        params.penalty_freq,
                        params.penalty_present,
                    );
                }
            }

            if params.is_greedy() {
                return Ok(sys::llama_sample_token_greedy(ctx, &mut cur));
            }

            if params.top_k > 0 {
                sys::llama_sample_top_k(ctx, &mut cur, params.top_k, 1);
            }
            if params.top_p < 1.0 {
                sys::llama_sample_top_p(ctx, &mut cur, params.top_p, 1);
            }
            sys::llama_sample_temp(ctx, &mut cur, params.temp);
            Ok(sys::llama_sample_token(ctx, &mut cur))
        }
    }

    fn kv_cache_clear(&mut self) {
        unsafe { sys::llama_kv_cache_clear(self.raw.as_ptr()) };
    }
}
