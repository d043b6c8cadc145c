//! Transformer models trained by the fine-tuning backends.
//!
//! Both models keep Hugging Face parameter names so pretrained checkpoints can
//! be copied into a `VarMap` and saved back in a form other tools understand.

pub mod distilbert;
pub mod phi;
pub mod weights;

pub use distilbert::{DistilBertConfig, DistilBertForSequenceClassification};
pub use phi::{PhiConfig, PhiForCausalLM};
pub use weights::{load_pretrained, LoadReport, ModelFiles};

use candle_core::{DType, Result, Tensor, D};
use candle_nn::{Init, VarBuilder};

/// Large negative bias used for masked attention scores.
pub(crate) const MASK_VALUE: f64 = -1e9;

/// Layer normalization written with primitive tensor ops so it has a backward pass.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(size, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

/// Turn a `(batch, seq)` 1/0 attention mask into an additive `(batch, 1, 1, seq)` bias.
pub(crate) fn padding_bias(attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, seq) = attention_mask.dims2()?;
    let mask = attention_mask.to_dtype(DType::F32)?;
    mask.affine(-MASK_VALUE, MASK_VALUE)?.reshape((batch, 1, 1, seq))
}

pub(crate) fn dropout(xs: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(xs, p)
    } else {
        Ok(xs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_layer_norm_normalizes_last_dim() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ln = LayerNorm::new(4, 1e-5, vb.pp("ln"))?;

        let xs = Tensor::new(&[[1f32, 2., 3., 4.], [10., 10., 10., 10.]], &Device::Cpu)?;
        let out = ln.forward(&xs)?.to_vec2::<f32>()?;

        let mean: f32 = out[0].iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!(out[1].iter().all(|v| v.abs() < 1e-3));
        Ok(())
    }

    #[test]
    fn test_padding_bias_masks_padding_only() -> Result<()> {
        let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu)?;
        let bias = padding_bias(&mask)?;
        assert_eq!(bias.dims(), &[1, 1, 1, 3]);
        let values = bias.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], 0.0);
        assert!(values[2] < -1e8);
        Ok(())
    }
}
