use anyhow::{bail, Context as _, Result};
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::params::GenerationParams;
use crate::sampling::Sampler;
use crate::utf8::Utf8Stream;
use crate::Token;

/// The primitives the completion loop needs from the inference library.
pub trait InferenceContext {
    fn n_ctx(&self) -> u32;

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>>;

    /// Raw bytes of one token; may be a partial UTF-8 sequence.
    fn token_to_piece(&self, token: Token) -> Result<Vec<u8>>;

    fn token_eos(&self) -> Token;

    fn decode(&mut self, batch: &Batch) -> Result<()>;

    /// Draw the next token from the logits of batch row `idx`.
    fn sample(&mut self, sampler: &Sampler, idx: usize) -> Result<Token>;

    fn kv_cache_clear(&mut self);
}

/// Streaming state of the conversation running on one context.
#[derive(Debug, Default)]
pub struct Generation {
    stream: Utf8Stream,
    finished: bool,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Tokenize and decode the prompt. Returns the prompt length, which is
    /// the position of the first generated token.
    pub fn begin<C: InferenceContext>(
        &mut self,
        ctx: &mut C,
        batch: &mut Batch,
        params: &GenerationParams,
        text: &str,
        n_len: i32,
    ) -> Result<i32> {
        self.stream.clear();
        self.finished = false;

        let input = params.compose_input(text);
        let tokens = ctx.tokenize(&input, true).context("Failed to tokenize prompt")?;

        let n_ctx = ctx.n_ctx();
        let n_kv_req = (n_len.max(0) as usize).max(tokens.len());
        info!("n_len = {}, n_ctx = {}, n_kv_req = {}", n_len, n_ctx, n_kv_req);

        if n_kv_req > n_ctx as usize {
            warn!("n_kv_req > n_ctx, the required KV cache size is not big enough");
        }
        if tokens.is_empty() {
            bail!("prompt produced no tokens");
        }
        if tokens.len() > batch.capacity() {
            bail!(
                "prompt has {} tokens but the batch holds {}",
                tokens.len(),
                batch.capacity()
            );
        }

        for &id in &tokens {
            if let Ok(piece) = ctx.token_to_piece(id) {
                debug!("{}", String::from_utf8_lossy(&piece));
            }
        }

        batch.clear();
        for (i, &token) in tokens.iter().enumerate() {
            batch.add(token, i as i32, &[0], false)?;
        }
        // Logits are only needed for the last prompt token.
        batch.set_last_logits(true)?;

        ctx.decode(batch).context("llama_decode() failed on the prompt")?;

        Ok(batch.n_tokens() as i32)
    }

    /// Sample, stream and decode one token.
    ///
    /// Returns `None` once the generation is over. `Some("")` means the token
    /// was consumed but its text is still an incomplete code point. After
    /// every `Some` the caller advances `n_cur`.
    ///
    /// The token sampled at `n_cur == n_len` is still emitted and decoded;
    /// the step after it returns `None`.
    pub fn step<C: InferenceContext>(
        &mut self,
        ctx: &mut C,
        batch: &mut Batch,
        sampler: &mut Sampler,
        n_len: i32,
        n_cur: i32,
    ) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        let idx = match batch.last_index() {
            Some(idx) => idx,
            None => bail!("nothing was decoded; call completion_init first"),
        };

        let new_token = ctx.sample(sampler, idx)?;
        sampler.accept(new_token);

        if new_token == ctx.token_eos() {
            info!("This is the last token");
            self.finished = true;
            let rest = self.stream.flush_lossy();
            return Ok(if rest.is_empty() { None } else { Some(rest) });
        }

        let piece = ctx.token_to_piece(new_token)?;
        let mut text = self.stream.push(&piece);
        debug!(
            "cached: {} bytes, new_token_chars: `{}`, id: {}",
            self.stream.pending(),
            String::from_utf8_lossy(&piece),
            new_token
        );

        batch.clear();
        batch.add(new_token, n_cur, &[0], true)?;

        ctx.decode(batch).context("llama_decode() failed")?;

        if n_cur >= n_len {
            info!("This is the last token");
            self.finished = true;
            text.push_str(&self.stream.flush_lossy());
        }

        Ok(Some(text))
    }

    /// Drop the conversation from the KV cache.
    pub fn finish<C: InferenceContext>(&mut self, ctx: &mut C) {
        ctx.kv_cache_clear();
        self.stream.clear();
        self.finished = false;
    }
}
