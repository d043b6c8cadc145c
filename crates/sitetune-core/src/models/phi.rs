//! Phi decoder-only language model returning logits for every position.

use super::{dropout, padding_bias, LayerNorm, MASK_VALUE};
use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{embedding, linear, Embedding, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_partial_rotary_factor() -> f64 {
    0.5
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

fn default_hidden_act() -> String {
    "gelu_new".to_string()
}

/// `config.json` of a Phi checkpoint. Unknown keys are preserved on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhiConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    #[serde(default = "default_partial_rotary_factor")]
    pub partial_rotary_factor: f64,
    #[serde(default)]
    pub qk_layernorm: bool,
    #[serde(default)]
    pub resid_pdrop: f32,
    #[serde(default)]
    pub embd_pdrop: f32,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PhiConfig {
    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    fn kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }
}

fn activation(name: &str, xs: &Tensor) -> Result<Tensor> {
    match name {
        "gelu_new" | "gelu_pytorch_tanh" | "gelu_fast" => xs.gelu(),
        "gelu" => xs.gelu_erf(),
        "relu" => xs.relu(),
        other => candle_core::bail!("unsupported activation {other}"),
    }
}

struct RotaryEmbedding {
    dim: usize,
    inv_freq: Vec<f32>,
}

impl RotaryEmbedding {
    fn new(cfg: &PhiConfig) -> Self {
        let dim = (cfg.partial_rotary_factor * cfg.head_dim() as f64) as usize;
        let inv_freq = (0..dim)
            .step_by(2)
            .map(|i| 1f32 / cfg.rope_theta.powf(i as f64 / dim as f64) as f32)
            .collect();
        Self { dim, inv_freq }
    }

    fn cos_sin(&self, seq_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
        let half = self.inv_freq.len();
        let inv_freq = Tensor::from_vec(self.inv_freq.clone(), (1, half), device)?;
        let positions = Tensor::arange(0u32, seq_len as u32, device)?.to_dtype(DType::F32)?.reshape((seq_len, 1))?;
        let freqs = positions.matmul(&inv_freq)?;
        let emb = Tensor::cat(&[&freqs, &freqs], D::Minus1)?;
        Ok((emb.cos()?, emb.sin()?))
    }

    /// Rotate the first `dim` channels of `(batch, heads, seq, head_dim)`; pass the rest through.
    fn apply(&self, xs: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
        if self.dim == 0 {
            return Ok(xs.clone());
        }
        let head_dim = xs.dim(D::Minus1)?;
        let rot = xs.narrow(D::Minus1, 0, self.dim)?;
        let half = self.dim / 2;
        let x1 = rot.narrow(D::Minus1, 0, half)?;
        let x2 = rot.narrow(D::Minus1, half, half)?;
        let rotated_half = Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)?;
        let rot = (rot.broadcast_mul(cos)? + rotated_half.broadcast_mul(sin)?)?;
        if self.dim == head_dim {
            return Ok(rot);
        }
        let pass = xs.narrow(D::Minus1, self.dim, head_dim - self.dim)?;
        Tensor::cat(&[&rot, &pass], D::Minus1)
    }
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    dense: Linear,
    q_layernorm: Option<LayerNorm>,
    k_layernorm: Option<LayerNorm>,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn new(cfg: &PhiConfig, vb: VarBuilder) -> Result<Self> {
        let head_dim = cfg.head_dim();
        let kv_dim = cfg.kv_heads() * head_dim;
        let (q_layernorm, k_layernorm) = if cfg.qk_layernorm {
            (
                Some(LayerNorm::new(head_dim, cfg.layer_norm_eps, vb.pp("q_layernorm"))?),
                Some(LayerNorm::new(head_dim, cfg.layer_norm_eps, vb.pp("k_layernorm"))?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            q_proj: linear(cfg.hidden_size, cfg.num_attention_heads * head_dim, vb.pp("q_proj"))?,
            k_proj: linear(cfg.hidden_size, kv_dim, vb.pp("k_proj"))?,
            v_proj: linear(cfg.hidden_size, kv_dim, vb.pp("v_proj"))?,
            dense: linear(cfg.num_attention_heads * head_dim, cfg.hidden_size, vb.pp("dense"))?,
            q_layernorm,
            k_layernorm,
            num_heads: cfg.num_attention_heads,
            num_kv_heads: cfg.kv_heads(),
            head_dim,
        })
    }

    fn repeat_kv(&self, xs: Tensor) -> Result<Tensor> {
        let n_rep = self.num_heads / self.num_kv_heads;
        if n_rep == 1 {
            return Ok(xs);
        }
        let (batch, kv_heads, seq_len, head_dim) = xs.dims4()?;
        xs.unsqueeze(2)?
            .broadcast_as((batch, kv_heads, n_rep, seq_len, head_dim))?
            .reshape((batch, kv_heads * n_rep, seq_len, head_dim))
    }

    fn forward(&self, xs: &Tensor, bias: &Tensor, rotary: &RotaryEmbedding, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        let split = |t: Tensor, heads: usize| -> Result<Tensor> {
            t.reshape((batch, seq_len, heads, self.head_dim))?.transpose(1, 2)?.contiguous()
        };

        let mut q = split(self.q_proj.forward(xs)?, self.num_heads)?;
        let mut k = split(self.k_proj.forward(xs)?, self.num_kv_heads)?;
        let v = split(self.v_proj.forward(xs)?, self.num_kv_heads)?;
        if let (Some(q_ln), Some(k_ln)) = (&self.q_layernorm, &self.k_layernorm) {
            q = q_ln.forward(&q)?;
            k = k_ln.forward(&k)?;
        }

        let q = rotary.apply(&q, cos, sin)?;
        let k = self.repeat_kv(rotary.apply(&k, cos, sin)?)?;
        let v = self.repeat_kv(v)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?.broadcast_add(bias)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let context = weights.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((batch, seq_len, self.num_heads * self.head_dim))?;
        self.dense.forward(&context)
    }
}

struct Mlp {
    fc1: Linear,
    fc2: Linear,
    act: String,
}

impl Mlp {
    fn new(cfg: &PhiConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(cfg.hidden_size, cfg.intermediate_size, vb.pp("fc1"))?,
            fc2: linear(cfg.intermediate_size, cfg.hidden_size, vb.pp("fc2"))?,
            act: cfg.hidden_act.clone(),
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.fc2.forward(&activation(&self.act, &self.fc1.forward(xs)?)?)
    }
}

struct DecoderLayer {
    self_attn: Attention,
    mlp: Mlp,
    input_layernorm: LayerNorm,
    resid_pdrop: f32,
}

impl DecoderLayer {
    fn new(cfg: &PhiConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::new(cfg, vb.pp("self_attn"))?,
            mlp: Mlp::new(cfg, vb.pp("mlp"))?,
            input_layernorm: LayerNorm::new(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("input_layernorm"))?,
            resid_pdrop: cfg.resid_pdrop,
        })
    }

    fn forward(
        &self,
        xs: &Tensor,
        bias: &Tensor,
        rotary: &RotaryEmbedding,
        cos: &Tensor,
        sin: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        // Attention and MLP both read the same normalized input.
        let normed = self.input_layernorm.forward(xs)?;
        let attn = dropout(&self.self_attn.forward(&normed, bias, rotary, cos, sin)?, self.resid_pdrop, train)?;
        let ff = dropout(&self.mlp.forward(&normed)?, self.resid_pdrop, train)?;
        (attn + ff)? + xs
    }
}

/// `PhiForCausalLM` with Hugging Face parameter names.
pub struct PhiForCausalLM {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    final_layernorm: LayerNorm,
    lm_head: Linear,
    rotary: RotaryEmbedding,
    embd_pdrop: f32,
}

impl PhiForCausalLM {
    pub fn new(cfg: &PhiConfig, vb: VarBuilder) -> Result<Self> {
        if cfg.num_attention_heads == 0 || cfg.hidden_size % cfg.num_attention_heads != 0 {
            candle_core::bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                cfg.hidden_size,
                cfg.num_attention_heads
            );
        }
        if cfg.num_attention_heads % cfg.kv_heads() != 0 {
            candle_core::bail!("num_attention_heads must be a multiple of num_key_value_heads");
        }
        let model = vb.pp("model");
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| DecoderLayer::new(cfg, model.pp("layers").pp(i)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embed_tokens: embedding(cfg.vocab_size, cfg.hidden_size, model.pp("embed_tokens"))?,
            layers,
            final_layernorm: LayerNorm::new(cfg.hidden_size, cfg.layer_norm_eps, model.pp("final_layernorm"))?,
            lm_head: linear(cfg.hidden_size, cfg.vocab_size, vb.pp("lm_head"))?,
            rotary: RotaryEmbedding::new(cfg),
            embd_pdrop: cfg.embd_pdrop,
        })
    }

    /// Logits of shape `(batch, seq, vocab)`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let device = input_ids.device();
        let bias = causal_bias(seq_len, device)?.broadcast_add(&padding_bias(attention_mask)?)?;
        let (cos, sin) = self.rotary.cos_sin(seq_len, device)?;

        let mut hidden = dropout(&self.embed_tokens.forward(input_ids)?, self.embd_pdrop, train)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &bias, &self.rotary, &cos, &sin, train)?;
        }
        self.lm_head.forward(&self.final_layernorm.forward(&hidden)?)
    }
}

fn causal_bias(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { MASK_VALUE as f32 } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (1, 1, seq_len, seq_len), device)
}
