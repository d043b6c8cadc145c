//! DistilBERT encoder with a sequence-classification head.

use super::{dropout, padding_bias, LayerNorm};
use candle_core::{IndexOp, Result, Tensor, D};
use candle_nn::{embedding, linear, Embedding, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const LAYER_NORM_EPS: f64 = 1e-12;

fn default_dropout() -> f32 {
    0.1
}

fn default_seq_classif_dropout() -> f32 {
    0.2
}

fn default_max_position_embeddings() -> usize {
    512
}

/// `config.json` of a DistilBERT checkpoint. Unknown keys are preserved on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistilBertConfig {
    pub vocab_size: usize,
    pub dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub hidden_dim: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    #[serde(default = "default_dropout")]
    pub attention_dropout: f32,
    #[serde(default = "default_seq_classif_dropout")]
    pub seq_classif_dropout: f32,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub pad_token_id: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DistilBertConfig {
    /// Number of labels recorded in `id2label`, if any.
    #[must_use]
    pub fn num_labels(&self) -> Option<usize> {
        self.extra.get("id2label").and_then(Value::as_object).map(Map::len)
    }

    /// Record a classification head with `num_labels` generic labels.
    pub fn set_num_labels(&mut self, num_labels: usize) {
        let id2label: Map<String, Value> =
            (0..num_labels).map(|i| (i.to_string(), Value::String(format!("LABEL_{i}")))).collect();
        let label2id: Map<String, Value> = (0..num_labels).map(|i| (format!("LABEL_{i}"), Value::from(i))).collect();
        self.extra.insert("id2label".to_string(), Value::Object(id2label));
        self.extra.insert("label2id".to_string(), Value::Object(label2id));
        self.extra.insert(
            "architectures".to_string(),
            Value::Array(vec![Value::String("DistilBertForSequenceClassification".to_string())]),
        );
        self.extra.insert("problem_type".to_string(), Value::String("single_label_classification".to_string()));
    }
}

struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    layer_norm: LayerNorm,
    dropout: f32,
}

impl Embeddings {
    fn new(cfg: &DistilBertConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            word_embeddings: embedding(cfg.vocab_size, cfg.dim, vb.pp("word_embeddings"))?,
            position_embeddings: embedding(cfg.max_position_embeddings, cfg.dim, vb.pp("position_embeddings"))?,
            layer_norm: LayerNorm::new(cfg.dim, LAYER_NORM_EPS, vb.pp("LayerNorm"))?,
            dropout: cfg.dropout,
        })
    }

    fn forward(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let words = self.word_embeddings.forward(input_ids)?;
        let positions = self.position_embeddings.forward(&positions)?;
        let xs = self.layer_norm.forward(&words.broadcast_add(&positions)?)?;
        dropout(&xs, self.dropout, train)
    }
}

struct MultiHeadSelfAttention {
    q_lin: Linear,
    k_lin: Linear,
    v_lin: Linear,
    out_lin: Linear,
    n_heads: usize,
    head_dim: usize,
    dropout: f32,
}

impl MultiHeadSelfAttention {
    fn new(cfg: &DistilBertConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            q_lin: linear(cfg.dim, cfg.dim, vb.pp("q_lin"))?,
            k_lin: linear(cfg.dim, cfg.dim, vb.pp("k_lin"))?,
            v_lin: linear(cfg.dim, cfg.dim, vb.pp("v_lin"))?,
            out_lin: linear(cfg.dim, cfg.dim, vb.pp("out_lin"))?,
            n_heads: cfg.n_heads,
            head_dim: cfg.dim / cfg.n_heads,
            dropout: cfg.attention_dropout,
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        xs.reshape((batch, seq_len, self.n_heads, self.head_dim))?.transpose(1, 2)?.contiguous()
    }

    fn forward(&self, xs: &Tensor, mask_bias: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq_len, dim) = xs.dims3()?;
        let scale = 1.0 / (self.head_dim as f64).sqrt();

        let q = (self.split_heads(&self.q_lin.forward(xs)?)? * scale)?;
        let k = self.split_heads(&self.k_lin.forward(xs)?)?;
        let v = self.split_heads(&self.v_lin.forward(xs)?)?;

        let scores = q.matmul(&k.t()?.contiguous()?)?.broadcast_add(mask_bias)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let weights = dropout(&weights, self.dropout, train)?;

        let context = weights.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((batch, seq_len, dim))?;
        self.out_lin.forward(&context)
    }
}

struct TransformerBlock {
    attention: MultiHeadSelfAttention,
    sa_layer_norm: LayerNorm,
    lin1: Linear,
    lin2: Linear,
    output_layer_norm: LayerNorm,
    dropout: f32,
}

impl TransformerBlock {
    fn new(cfg: &DistilBertConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attention: MultiHeadSelfAttention::new(cfg, vb.pp("attention"))?,
            sa_layer_norm: LayerNorm::new(cfg.dim, LAYER_NORM_EPS, vb.pp("sa_layer_norm"))?,
            lin1: linear(cfg.dim, cfg.hidden_dim, vb.pp("ffn").pp("lin1"))?,
            lin2: linear(cfg.hidden_dim, cfg.dim, vb.pp("ffn").pp("lin2"))?,
            output_layer_norm: LayerNorm::new(cfg.dim, LAYER_NORM_EPS, vb.pp("output_layer_norm"))?,
            dropout: cfg.dropout,
        })
    }

    fn forward(&self, xs: &Tensor, mask_bias: &Tensor, train: bool) -> Result<Tensor> {
        let attn = self.attention.forward(xs, mask_bias, train)?;
        let xs = self.sa_layer_norm.forward(&(attn + xs)?)?;

        let ffn = self.lin2.forward(&self.lin1.forward(&xs)?.gelu_erf()?)?;
        let ffn = dropout(&ffn, self.dropout, train)?;
        self.output_layer_norm.forward(&(ffn + xs)?)
    }
}

/// `DistilBertForSequenceClassification` with Hugging Face parameter names.
pub struct DistilBertForSequenceClassification {
    embeddings: Embeddings,
    layers: Vec<TransformerBlock>,
    pre_classifier: Linear,
    classifier: Linear,
    seq_classif_dropout: f32,
    num_labels: usize,
}

impl DistilBertForSequenceClassification {
    pub fn new(cfg: &DistilBertConfig, num_labels: usize, vb: VarBuilder) -> Result<Self> {
        if cfg.n_heads == 0 || cfg.dim % cfg.n_heads != 0 {
            candle_core::bail!("dim {} is not divisible by n_heads {}", cfg.dim, cfg.n_heads);
        }
        let encoder = vb.pp("distilbert");
        let embeddings = Embeddings::new(cfg, encoder.pp("embeddings"))?;
        let layers = (0..cfg.n_layers)
            .map(|i| TransformerBlock::new(cfg, encoder.pp("transformer").pp("layer").pp(i)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embeddings,
            layers,
            pre_classifier: linear(cfg.dim, cfg.dim, vb.pp("pre_classifier"))?,
            classifier: linear(cfg.dim, num_labels, vb.pp("classifier"))?,
            seq_classif_dropout: cfg.seq_classif_dropout,
            num_labels,
        })
    }

    #[must_use]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Logits of shape `(batch, num_labels)`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let mask_bias = padding_bias(attention_mask)?;
        let mut hidden = self.embeddings.forward(input_ids, train)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask_bias, train)?;
        }

        let pooled = hidden.i((.., 0))?;
        let pooled = self.pre_classifier.forward(&pooled)?.relu()?;
        let pooled = dropout(&pooled, self.seq_classif_dropout, train)?;
        self.classifier.forward(&pooled)
    }
}
