//! Interface to the external weight store and per-layer parameter staging.

use alloc::format;
use alloc::string::String;

use crate::{
    err::{QconvError, QconvResult},
    fixed::{bias_to_fixed, multiplier},
};

/// Convolution weights as the store hands them out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvWeights<'a> {
    /// `real = data[i] * scale`.
    Int8 { data: &'a [i8], scale: f32 },
    Float(&'a [f32]),
}

impl ConvWeights<'_> {
    pub fn len(&self) -> usize {
        match self {
            ConvWeights::Int8 { data, .. } => data.len(),
            ConvWeights::Float(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named, immutable model tensors.
pub trait WeightStore {
    fn conv_weights(&self, name: &str) -> Option<ConvWeights<'_>>;

    /// A float tensor such as a bias vector.
    fn tensor(&self, name: &str) -> Option<&[f32]>;
}

/// `model.3.conv.weight` -> `model.3.conv.bias`.
pub fn bias_name_for(weight_name: &str) -> Option<String> {
    weight_name
        .strip_suffix(".weight")
        .map(|prefix| format!("{prefix}.bias"))
}

/// Parameters of one integer convolution, derived once per invocation.
#[derive(Debug, Clone, Copy)]
pub struct QuantizedConv<'a> {
    /// Canonical `(oc, ic, kh, kw)` tensor.
    pub weights: &'a [i8],
    /// The same tensor in software layout, if the caller keeps one.
    pub packed: Option<&'a [u32]>,
    /// Accumulator-domain bias.
    pub bias: Option<&'a [i32]>,
    pub multiplier: u32,
}

impl<'a> QuantizedConv<'a> {
    /// Converts the float bias into `stage` and the scale into a multiplier.
    pub fn prepare(
        weights: &'a [i8],
        scale: f32,
        bias: Option<&[f32]>,
        stage: &'a mut [i32],
    ) -> QconvResult<Self> {
        let bias = match bias {
            Some(b) => {
                if stage.len() < b.len() {
                    return Err(QconvError::ShapeMismatch {
                        expected: b.len(),
                        actual: stage.len(),
                    });
                }
                let stage = &mut stage[..b.len()];
                for (dst, &v) in stage.iter_mut().zip(b) {
                    *dst = bias_to_fixed(Some(v), scale);
                }
                Some(&*stage)
            }
            None => None,
        };
        Ok(Self {
            weights,
            packed: None,
            bias,
            multiplier: multiplier(scale),
        })
    }

    /// Looks up `name` and its bias in `store`.
    pub fn from_store<S: WeightStore + ?Sized>(
        store: &'a S,
        name: &str,
        stage: &'a mut [i32],
    ) -> QconvResult<Self> {
        let weights = store.conv_weights(name).ok_or(QconvError::MissingTensor)?;
        let ConvWeights::Int8 { data, scale } = weights else {
            return Err(QconvError::NotQuantized);
        };
        let bias = bias_name_for(name).and_then(|b| store.tensor(&b));
        Self::prepare(data, scale, bias, stage)
    }

    pub fn with_packed(mut self, packed: &'a [u32]) -> Self {
        self.packed = Some(packed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        w: [i8; 4],
        b: [f32; 2],
        f: [f32; 4],
    }

    impl WeightStore for Fixture {
        fn conv_weights(&self, name: &str) -> Option<ConvWeights<'_>> {
            match name {
                "m.0.conv.weight" => Some(ConvWeights::Int8 {
                    data: &self.w,
                    scale: 0.01,
                }),
                "m.1.conv.weight" => Some(ConvWeights::Float(&self.f)),
                _ => None,
            }
        }

        fn tensor(&self, name: &str) -> Option<&[f32]> {
            (name == "m.0.conv.bias").then_some(&self.b[..])
        }
    }

    #[test]
    fn bias_names() {
        assert_eq!(bias_name_for("a.b.weight").as_deref(), Some("a.b.bias"));
        assert_eq!(bias_name_for(".weight").as_deref(), Some(".bias"));
        assert_eq!(bias_name_for("a.b.running_mean"), None);
    }

    #[test]
    fn from_store_stages_bias_and_multiplier() {
        let store = Fixture {
            w: [1, 2, 3, 4],
            b: [2.0, -1.0],
            f: [0.0; 4],
        };
        let mut stage = [0i32; 8];
        let conv = QuantizedConv::from_store(&store, "m.0.conv.weight", &mut stage).unwrap();
        assert_eq!(conv.multiplier, 655);
        assert_eq!(conv.bias, Some(&[204_800, -102_400][..]));
        assert_eq!(conv.weights, &[1, 2, 3, 4]);

        let mut stage = [0i32; 1];
        assert!(matches!(
            QuantizedConv::from_store(&store, "m.0.conv.weight", &mut stage),
            Err(QconvError::ShapeMismatch { .. })
        ));
        assert_eq!(
            QuantizedConv::from_store(&store, "m.1.conv.weight", &mut stage).err(),
            Some(QconvError::NotQuantized)
        );
        assert_eq!(
            QuantizedConv::from_store(&store, "nope.weight", &mut stage).err(),
            Some(QconvError::MissingTensor)
        );
    }
}
