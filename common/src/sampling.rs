use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::Token;

/// Sampling knobs handed to the native sampling primitives.
///
/// Defaults match the inference library's own sampling defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature. `<= 0` selects greedy decoding.
    pub temp: f32,
    /// `<= 0` disables top-k.
    pub top_k: i32,
    /// `1.0` disables nucleus sampling.
    pub top_p: f32,
    /// How many of the last accepted tokens are penalized. `0` disables.
    pub penalty_last_n: usize,
    pub penalty_repeat: f32,
    pub penalty_freq: f32,
    pub penalty_present: f32,
    /// Size of the accepted-token ring.
    pub n_prev: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temp: 0.80,
            top_k: 40,
            top_p: 0.95,
            penalty_last_n: 64,
            penalty_repeat: 1.10,
            penalty_freq: 0.0,
            penalty_present: 0.0,
            n_prev: 64,
        }
    }
}

impl SamplingParams {
    pub fn is_greedy(&self) -> bool {
        self.temp <= 0.0
    }

    pub fn penalties_enabled(&self) -> bool {
        self.penalty_last_n > 0
            && (self.penalty_repeat != 1.0 || self.penalty_freq != 0.0 || self.penalty_present != 0.0)
    }
}

/// Per-conversation sampler state: the params plus the accepted-token ring.
#[derive(Debug, Clone)]
pub struct Sampler {
    params: SamplingParams,
    prev: VecDeque<Token>,
}

impl Sampler {
    pub fn new(params: SamplingParams) -> Self {
        let capacity = params.n_prev.max(1);
        Self {
            params,
            prev: VecDeque::with_capacity(capacity),
        }
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    pub fn accept(&mut self, token: Token) {
        let cap = self.params.n_prev.max(1);
        while self.prev.len() >= cap {
            self.prev.pop_front();
        }
        self.prev.push_back(token);
    }

    pub fn last(&self) -> Option<Token> {
        self.prev.back().copied()
    }

    /// The tokens the repetition penalty applies to, oldest first.
    pub fn penalty_window(&self) -> Vec<Token> {
        let n = self.params.penalty_last_n.min(self.prev.len());
        self.prev.iter().skip(self.prev.len() - n).copied().collect()
    }

    pub fn history_len(&self) -> usize {
        self.prev.len()
    }

    pub fn reset(&mut self) {
        self.prev.clear();
    }
}
