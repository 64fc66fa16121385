use anyhow::{bail, Context, Result};

use crate::{Pos, SeqId, Token};

/// A decode batch with Rust-owned columns.
///
/// The native `llama_batch` is only a view built over these columns at
/// decode time, so nothing here needs manual freeing.
#[derive(Debug, Clone)]
pub struct Batch {
    capacity: usize,
    embd: usize,
    n_seq_max: usize,
    n_tokens: usize,
    token: Vec<Token>,
    embd_values: Vec<f32>,
    pos: Vec<Pos>,
    n_seq_id: Vec<i32>,
    seq_id: Vec<Vec<SeqId>>,
    logits: Vec<i8>,
}

impl Batch {
    /// `embd == 0` makes a token batch, otherwise each entry holds `embd` floats.
    pub fn new(n_tokens: usize, embd: usize, n_seq_max: usize) -> Result<Self> {
        if n_tokens == 0 {
            bail!("batch capacity must be positive");
        }
        if n_seq_max == 0 {
            bail!("n_seq_max must be positive");
        }

        let (token, embd_values) = if embd > 0 {
            let len = n_tokens
                .checked_mul(embd)
                .with_context(|| format!("batch of {} x {} embeddings overflows", n_tokens, embd))?;
            (Vec::new(), zeroed(len)?)
        } else {
            (zeroed(n_tokens)?, Vec::new())
        };

        let mut seq_id = Vec::new();
        seq_id
            .try_reserve_exact(n_tokens)
            .with_context(|| format!("cannot allocate a batch of {} entries", n_tokens))?;
        seq_id.resize_with(n_tokens, Vec::new);

        Ok(Self {
            capacity: n_tokens,
            embd,
            n_seq_max,
            n_tokens: 0,
            token,
            embd_values,
            pos: zeroed(n_tokens)?,
            n_seq_id: zeroed(n_tokens)?,
            seq_id,
            logits: zeroed(n_tokens)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn n_tokens(&self) -> usize {
        self.n_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.n_tokens == 0
    }

    pub fn is_embedding(&self) -> bool {
        self.embd > 0
    }

    pub fn embd(&self) -> usize {
        self.embd
    }

    pub fn clear(&mut self) {
        self.n_tokens = 0;
    }

    pub fn add(&mut self, token: Token, pos: Pos, seq_ids: &[SeqId], logits: bool) -> Result<()> {
        if self.is_embedding() {
            bail!("cannot add a token to an embedding batch");
        }
        let i = self.reserve_slot(seq_ids)?;
        self.token[i] = token;
        self.fill_slot(i, pos, seq_ids, logits);
        Ok(())
    }

    pub fn add_embedding(
        &mut self,
        values: &[f32],
        pos: Pos,
        seq_ids: &[SeqId],
        logits: bool,
    ) -> Result<()> {
        if !self.is_embedding() {
            bail!("cannot add an embedding to a token batch");
        }
        if values.len() != self.embd {
            bail!("embedding has {} values, batch expects {}", values.len(), self.embd);
        }
        let i = self.reserve_slot(seq_ids)?;
        self.embd_values[i * self.embd..(i + 1) * self.embd].copy_from_slice(values);
        self.fill_slot(i, pos, seq_ids, logits);
        Ok(())
    }

    pub fn set_logits(&mut self, index: usize, flag: bool) -> Result<()> {
        if index >= self.n_tokens {
            bail!("logits index {} out of range (n_tokens = {})", index, self.n_tokens);
        }
        self.logits[index] = flag as i8;
        Ok(())
    }

    pub fn set_last_logits(&mut self, flag: bool) -> Result<()> {
        match self.n_tokens.checked_sub(1) {
            Some(last) => self.set_logits(last, flag),
            None => bail!("batch is empty"),
        }
    }

    /// Index of the last row, the one sampled from after a decode.
    pub fn last_index(&self) -> Option<usize> {
        self.n_tokens.checked_sub(1)
    }

    pub fn tokens(&self) -> &[Token] {
        if self.is_embedding() {
            &[]
        } else {
            &self.token[..self.n_tokens]
        }
    }

    pub fn embeddings(&self) -> &[f32] {
        &self.embd_values[..self.n_tokens * self.embd]
    }

    pub fn positions(&self) -> &[Pos] {
        &self.pos[..self.n_tokens]
    }

    pub fn n_seq_ids(&self) -> &[i32] {
        &self.n_seq_id[..self.n_tokens]
    }

    pub fn seq_ids(&self) -> &[Vec<SeqId>] {
        &self.seq_id[..self.n_tokens]
    }

    pub fn logits(&self) -> &[i8] {
        &self.logits[..self.n_tokens]
    }

    fn reserve_slot(&self, seq_ids: &[SeqId]) -> Result<usize> {
        if self.n_tokens >= self.capacity {
            bail!("batch is full ({} entries)", self.capacity);
        }
        if seq_ids.is_empty() || seq_ids.len() > self.n_seq_max {
            bail!(
                "entry needs 1..={} sequence ids, got {}",
                self.n_seq_max,
                seq_ids.len()
            );
        }
        Ok(self.n_tokens)
    }

    fn fill_slot(&mut self, i: usize, pos: Pos, seq_ids: &[SeqId], logits: bool) {
        self.pos[i] = pos;
        self.n_seq_id[i] = seq_ids.len() as i32;
        self.seq_id[i].clear();
        self.seq_id[i].extend_from_slice(seq_ids);
        self.logits[i] = logits as i8;
        self.n_tokens += 1;
    }
}

/// A zero-filled column, failing instead of aborting on huge sizes.
fn zeroed<T: Default + Clone>(len: usize) -> Result<Vec<T>> {
    let mut column = Vec::new();
    column
        .try_reserve_exact(len)
        .with_context(|| format!("cannot allocate a batch column of {} entries", len))?;
    column.resize(len, T::default());
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_clear() {
        let mut batch = Batch::new(4, 0, 1).unwrap();
        batch.add(1, 0, &[0], false).unwrap();
        batch.add(2, 1, &[0], false).unwrap();
        batch.set_last_logits(true).unwrap();

        assert_eq!(batch.n_tokens(), 2);
        assert_eq!(batch.tokens(), &[1, 2]);
        assert_eq!(batch.positions(), &[0, 1]);
        assert_eq!(batch.logits(), &[0, 1]);
        assert_eq!(batch.n_seq_ids(), &[1, 1]);
        assert_eq!(batch.last_index(), Some(1));

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.last_index(), None);
        assert!(batch.tokens().is_empty());
    }

    #[test]
    fn test_full_batch_rejects_tokens() {
        let mut batch = Batch::new(1, 0, 1).unwrap();
        batch.add(7, 0, &[0], true).unwrap();
        let err = batch.add(8, 1, &[0], true).unwrap_err();
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn test_seq_id_limit() {
        let mut batch = Batch::new(2, 0, 2).unwrap();
        batch.add(1, 0, &[0, 1], false).unwrap();
        assert!(batch.add(2, 1, &[0, 1, 2], false).is_err());
        assert!(batch.add(2, 1, &[], false).is_err());
        assert_eq!(batch.seq_ids()[0], vec![0, 1]);
    }

    #[test]
    fn test_embedding_batch() {
        let mut batch = Batch::new(2, 3, 1).unwrap();
        assert!(batch.is_embedding());
        assert!(batch.add(1, 0, &[0], false).is_err());
        assert!(batch.add_embedding(&[1.0, 2.0], 0, &[0], false).is_err());

        batch.add_embedding(&[1.0, 2.0, 3.0], 0, &[0], true).unwrap();
        assert_eq!(batch.embeddings(), &[1.0, 2.0, 3.0]);
        assert!(batch.tokens().is_empty());
    }

    #[test]
    fn test_oversized_batch_is_an_error() {
        let err = Batch::new(usize::MAX, 2, 1).unwrap_err();
        assert!(err.to_string().contains("overflows"));

        // What Kotlin can pass at most: either overflows or cannot be allocated.
        assert!(Batch::new(i32::MAX as usize, i32::MAX as usize, 1).is_err());
    }

    #[test]
    fn test_set_last_logits_on_empty_batch() {
        let mut batch = Batch::new(2, 0, 1).unwrap();
        assert!(batch.set_last_logits(true).is_err());
        assert!(Batch::new(0, 0, 1).is_err());
    }
}
