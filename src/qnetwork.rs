use tch::{
    nn::{self, Module},
    Tensor,
};

use crate::error::{DqnError, Result};

/// (filters, kernel, stride) of each convolution, as in the Nature DQN.
const CONV_LAYERS: [(i64, usize, usize); 3] = [(32, 8, 4), (64, 4, 2), (64, 3, 1)];
const HIDDEN_UNITS: i64 = 512;

/// Spatial size after a convolution without padding.
pub fn conv_output_size(size: usize, kernel: usize, stride: usize) -> Option<usize> {
    if size < kernel || stride == 0 {
        return None;
    }
    Some((size - kernel) / stride + 1)
}

/// Convolutional Q-network mapping a `[batch, channels, height, width]`
/// frame stack to one Q-value per action.
#[derive(Debug)]
pub struct QNetwork {
    seq: nn::Sequential,
    num_actions: usize,
}

impl QNetwork {
    pub fn new(vs: &nn::Path, input_shape: [usize; 3], num_actions: usize) -> Result<Self> {
        let [channels, height, width] = input_shape;

        let (mut h, mut w) = (height, width);
        for (_, kernel, stride) in CONV_LAYERS {
            h = conv_output_size(h, kernel, stride).ok_or_else(|| too_small(input_shape))?;
            w = conv_output_size(w, kernel, stride).ok_or_else(|| too_small(input_shape))?;
        }
        let flat_size = CONV_LAYERS[2].0 * (h * w) as i64;

        let mut seq = nn::seq();
        let mut in_channels = channels as i64;
        for (i, (filters, kernel, stride)) in CONV_LAYERS.into_iter().enumerate() {
            let config = nn::ConvConfig {
                stride: stride as i64,
                ..Default::default()
            };
            seq = seq
                .add(nn::conv2d(
                    vs / format!("conv{}", i + 1),
                    in_channels,
                    filters,
                    kernel as i64,
                    config,
                ))
                .add_fn(|xs| xs.relu());
            in_channels = filters;
        }

        let seq = seq
            .add_fn(|xs| xs.flat_view())
            .add(nn::linear(vs / "fc1", flat_size, HIDDEN_UNITS, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(
                vs / "q_values",
                HIDDEN_UNITS,
                num_actions as i64,
                Default::default(),
            ));

        Ok(Self { seq, num_actions })
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }
}

fn too_small(input_shape: [usize; 3]) -> DqnError {
    DqnError::Config(format!(
        "input {input_shape:?} is too small for the convolutional stack"
    ))
}

impl nn::Module for QNetwork {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.seq.forward(xs)
    }
}
