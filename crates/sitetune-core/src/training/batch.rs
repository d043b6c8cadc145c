use crate::error::{CoreError, CoreResult};
use candle_core::{Device, Tensor};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Token ids and attention mask of one example, padded to a fixed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSequence {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl EncodedSequence {
    /// Number of non-padding tokens.
    #[must_use]
    pub fn real_len(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

/// Tokenizes text with truncation and fixed-length padding.
#[derive(Clone)]
pub struct SequenceEncoder {
    tokenizer: Tokenizer,
    max_len: usize,
}

impl SequenceEncoder {
    pub fn new(mut tokenizer: Tokenizer, max_len: usize, pad_id: u32, pad_token: String) -> CoreResult<Self> {
        tokenizer
            .with_truncation(Some(TruncationParams { max_length: max_len, ..TruncationParams::default() }))
            .map_err(CoreError::tokenizer)?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_len),
            pad_id,
            pad_token,
            ..PaddingParams::default()
        }));
        Ok(Self { tokenizer, max_len })
    }

    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn encode(&self, texts: &[String]) -> CoreResult<Vec<EncodedSequence>> {
        let encodings = self.tokenizer.encode_batch(texts.to_vec(), true).map_err(CoreError::tokenizer)?;
        Ok(encodings
            .into_iter()
            .map(|e| EncodedSequence { ids: e.get_ids().to_vec(), attention_mask: e.get_attention_mask().to_vec() })
            .collect())
    }
}

/// Find the padding token: the first of `candidates` in the vocabulary, else `fallback_id`.
pub fn resolve_pad_token(tokenizer: &Tokenizer, candidates: &[&str], fallback_id: Option<u32>) -> CoreResult<(u32, String)> {
    if let Some((id, token)) = candidates.iter().find_map(|t| tokenizer.token_to_id(t).map(|id| (id, (*t).to_string()))) {
        return Ok((id, token));
    }
    fallback_id
        .and_then(|id| tokenizer.id_to_token(id).map(|token| (id, token)))
        .ok_or_else(|| CoreError::tokenizer("tokenizer has no padding token"))
}

/// Stack sequences into `(batch, seq)` id and mask tensors.
pub fn stack(sequences: &[&EncodedSequence], device: &Device) -> CoreResult<(Tensor, Tensor)> {
    let seq_len = sequences.first().map_or(0, |s| s.ids.len());
    if sequences.iter().any(|s| s.ids.len() != seq_len) {
        return Err(CoreError::Model("sequences in a batch must have equal length".to_string()));
    }
    let ids: Vec<u32> = sequences.iter().flat_map(|s| s.ids.iter().copied()).collect();
    let mask: Vec<u32> = sequences.iter().flat_map(|s| s.attention_mask.iter().copied()).collect();
    let shape = (sequences.len(), seq_len);
    Ok((Tensor::from_vec(ids, shape, device)?, Tensor::from_vec(mask, shape, device)?))
}
