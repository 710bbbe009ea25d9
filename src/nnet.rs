//! Dense neural network: typed layers and the network container.
//!
//! The on-disk `NN02` section carries the context sizes and a list of
//! `LAY0` layer records. Layers form a closed set, so they are a tagged
//! enum and `propagate` is a match, with no trait objects on the hot path.

use ndarray::{Array1, Array2, Axis};

use crate::error::{Error, Result};
use crate::io::BinaryReader;

pub const NNET_SECTION: &str = "NN02";
pub const LAYER_SECTION: &str = "LAY0";

/// Variance epsilon applied by [`Layer::BatchNorm`]. The layer payload
/// stores an epsilon too, but it is pinned to this value on load; see the
/// loader.
pub const BATCH_NORM_EPS: f32 = 1e-5;

// On-disk layer type ids.
const LAYER_LINEAR: i32 = 0;
const LAYER_RELU: i32 = 1;
const LAYER_NORMALIZE: i32 = 2;
const LAYER_SOFTMAX: i32 = 3;
const LAYER_SPLICE: i32 = 6;
const LAYER_BATCH_NORM: i32 = 7;
const LAYER_LOG_SOFTMAX: i32 = 8;
const LAYER_NARROW: i32 = 9;

pub enum Layer {
    /// `out = in · W + b`; `weight` is stored input-major (`[in_dim, out_dim]`).
    Linear {
        weight: Array2<f32>,
        bias: Array1<f32>,
    },
    Relu,
    /// Scale each row to squared norm `D` (the row dimension).
    Normalize,
    Softmax,
    LogSoftmax,
    /// Concatenate rows at fixed offsets around each row, clamped to the
    /// batch edges.
    Splice { offsets: Vec<i32> },
    /// Normalize each column by the batch mean and variance.
    BatchNorm { eps: f32 },
    /// Drop `left` rows from the top and `right` from the bottom; batches
    /// too short to narrow pass through unchanged.
    Narrow { left: usize, right: usize },
}

impl Layer {
    pub fn propagate(&self, input: &Array2<f32>) -> Array2<f32> {
        match self {
            Layer::Linear { weight, bias } => {
                let mut out = input.dot(weight);
                for mut row in out.rows_mut() {
                    row += bias;
                }
                out
            }
            Layer::Relu => input.mapv(|x| x.max(0.0)),
            Layer::Normalize => {
                let d = input.ncols() as f32;
                let mut out = input.clone();
                for mut row in out.rows_mut() {
                    let squared_sum: f32 = row.iter().map(|x| x * x).sum();
                    let scale = (d / squared_sum).sqrt();
                    row.mapv_inplace(|x| x * scale);
                }
                out
            }
            Layer::Softmax => {
                let mut out = input.clone();
                for mut row in out.rows_mut() {
                    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                    row.mapv_inplace(|x| (x - max).exp());
                    let sum: f32 = row.sum();
                    row.mapv_inplace(|x| x / sum);
                }
                out
            }
            Layer::LogSoftmax => {
                let mut out = input.clone();
                for mut row in out.rows_mut() {
                    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                    let log_sum = max + row.iter().map(|x| (x - max).exp()).sum::<f32>().ln();
                    row.mapv_inplace(|x| x - log_sum);
                }
                out
            }
            Layer::Splice { offsets } => {
                let (rows, cols) = input.dim();
                if rows == 0 {
                    return Array2::zeros((0, offsets.len() * cols));
                }
                let mut out = Array2::zeros((rows, offsets.len() * cols));
                for r in 0..rows {
                    for (i, &offset) in offsets.iter().enumerate() {
                        let src = (r as i64 + offset as i64).clamp(0, rows as i64 - 1) as usize;
                        out.row_mut(r)
                            .slice_mut(ndarray::s![i * cols..(i + 1) * cols])
                            .assign(&input.row(src));
                    }
                }
                out
            }
            Layer::BatchNorm { eps } => {
                let rows = input.nrows() as f32;
                let mean = input.mean_axis(Axis(0)).expect("non-empty batch");
                let mut out = input - &mean;
                for mut col in out.columns_mut() {
                    let var: f32 = col.iter().map(|x| x * x).sum::<f32>() / rows;
                    let inv_std = 1.0 / (var + eps).sqrt();
                    col.mapv_inplace(|x| x * inv_std);
                }
                out
            }
            Layer::Narrow { left, right } => {
                let rows = input.nrows();
                if rows <= left + right {
                    input.clone()
                } else {
                    input
                        .slice(ndarray::s![*left..rows - right, ..])
                        .to_owned()
                }
            }
        }
    }

    fn read<R: std::io::Read>(reader: &mut BinaryReader<R>) -> Result<Layer> {
        reader.expect_tag(LAYER_SECTION)?;
        let layer_type = reader.read_i32()?;
        match layer_type {
            LAYER_LINEAR => {
                let weight = reader.read_matrix()?;
                let bias = reader.read_f32_vector()?;
                if bias.len() != weight.ncols() {
                    return Err(Error::corruption(
                        reader.path(),
                        format!(
                            "linear layer: bias of {} values for {} outputs",
                            bias.len(),
                            weight.ncols()
                        ),
                    ));
                }
                Ok(Layer::Linear { weight, bias })
            }
            LAYER_RELU => Ok(Layer::Relu),
            LAYER_NORMALIZE => Ok(Layer::Normalize),
            LAYER_SOFTMAX => Ok(Layer::Softmax),
            LAYER_LOG_SOFTMAX => Ok(Layer::LogSoftmax),
            LAYER_SPLICE => {
                let count = reader.read_i32()?;
                if count <= 0 {
                    return Err(Error::corruption(
                        reader.path(),
                        format!("splice layer with {} offsets", count),
                    ));
                }
                let offsets = reader.read_i32_slice(count as usize)?;
                Ok(Layer::Splice { offsets })
            }
            LAYER_BATCH_NORM => {
                // Some converters wrote other epsilons here; decoding has
                // always run with 1e-5, so pin it.
                let stored_eps = reader.read_f32()?;
                if (stored_eps - BATCH_NORM_EPS).abs() > f32::EPSILON {
                    log::debug!(
                        "batch norm: stored eps {} replaced with {}",
                        stored_eps,
                        BATCH_NORM_EPS
                    );
                }
                Ok(Layer::BatchNorm {
                    eps: BATCH_NORM_EPS,
                })
            }
            LAYER_NARROW => {
                let left = reader.read_i32()?;
                let right = reader.read_i32()?;
                if left < 0 || right < 0 {
                    return Err(Error::corruption(
                        reader.path(),
                        format!("narrow layer bounds {} / {}", left, right),
                    ));
                }
                Ok(Layer::Narrow {
                    left: left as usize,
                    right: right as usize,
                })
            }
            other => Err(Error::corruption(
                reader.path(),
                format!("unexpected layer type {}", other),
            )),
        }
    }
}

/// An ordered stack of layers plus the temporal context the stack needs.
pub struct Nnet {
    layers: Vec<Layer>,
    left_context: usize,
    right_context: usize,
}

impl Nnet {
    pub fn read<R: std::io::Read>(reader: &mut BinaryReader<R>) -> Result<Self> {
        reader.expect_tag(NNET_SECTION)?;
        let left_context = reader.read_i32()?;
        let right_context = reader.read_i32()?;
        let num_layers = reader.read_i32()?;
        if left_context < 0 || right_context < 0 || num_layers < 0 {
            return Err(Error::corruption(
                reader.path(),
                format!(
                    "network header: contexts {} / {}, {} layers",
                    left_context, right_context, num_layers
                ),
            ));
        }

        let mut layers = Vec::with_capacity(num_layers as usize);
        for _ in 0..num_layers {
            layers.push(Layer::read(reader)?);
        }

        Ok(Nnet {
            layers,
            left_context: left_context as usize,
            right_context: right_context as usize,
        })
    }

    pub fn propagate(&self, input: &Array2<f32>) -> Array2<f32> {
        let mut batch = input.clone();
        for layer in &self.layers {
            batch = layer.propagate(&batch);
        }
        batch
    }

    pub fn left_context(&self) -> usize {
        self.left_context
    }

    pub fn right_context(&self) -> usize {
        self.right_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn assert_rows_eq(out: &Array2<f32>, expected: &[&[f32]], tol: f32) {
        assert_eq!(out.nrows(), expected.len());
        for (r, row) in expected.iter().enumerate() {
            assert_eq!(out.ncols(), row.len());
            for (c, want) in row.iter().enumerate() {
                assert!(
                    (out[[r, c]] - want).abs() < tol,
                    "[{}, {}]: {} vs {}",
                    r,
                    c,
                    out[[r, c]],
                    want
                );
            }
        }
    }

    #[test]
    fn linear() {
        // W maps 3 inputs to 4 outputs.
        let w = arr2(&[
            [0.1, 0.8, 0.9],
            [0.4, 0.2, 0.7],
            [0.2, 0.1, 0.1],
            [0.4, 0.3, 0.2],
        ]);
        let layer = Layer::Linear {
            weight: w.t().to_owned(),
            bias: ndarray::arr1(&[0.1, -0.1, 0.2, -0.2]),
        };
        let y = layer.propagate(&arr2(&[[0.3, -0.1, 0.9]]));
        assert_rows_eq(&y, &[&[0.86, 0.63, 0.34, 0.07]], 1e-3);
    }

    #[test]
    fn relu() {
        let y = Layer::Relu.propagate(&arr2(&[[0.3, -0.1, 0.9, 0.2]]));
        assert_rows_eq(&y, &[&[0.3, 0.0, 0.9, 0.2]], 1e-6);
    }

    #[test]
    fn softmax() {
        let y = Layer::Softmax.propagate(&arr2(&[[0.3, -0.1, 0.9, 0.2]]));
        assert_rows_eq(&y, &[&[0.2274135, 0.15243983, 0.41437442, 0.20577225]], 1e-3);
    }

    #[test]
    fn log_softmax() {
        let x = arr2(&[
            [0.6926, 0.5312, 0.3551],
            [0.1014, 0.4569, 0.6337],
            [0.5657, 0.8495, 0.8210],
            [0.0483, 0.1684, 0.9234],
        ]);
        let y = Layer::LogSoftmax.propagate(&x);
        assert_rows_eq(
            &y,
            &[
                &[-0.9418, -1.1032, -1.2793],
                &[-1.4182, -1.0627, -0.8859],
                &[-1.2862, -1.0024, -1.0309],
                &[-1.5100, -1.3899, -0.6349],
            ],
            1e-3,
        );
    }

    #[test]
    fn normalize_scales_to_row_dim() {
        let y = Layer::Normalize.propagate(&arr2(&[[0.3, -0.1, 0.9, 0.2]]));
        let squared_sum: f32 = y.row(0).iter().map(|x| x * x).sum();
        assert!((squared_sum - 4.0).abs() < 1e-4);
    }

    #[test]
    fn splice_clamps_edges() {
        let x = arr2(&[[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]]);
        let layer = Layer::Splice {
            offsets: vec![-2, 1],
        };
        let y = layer.propagate(&x);
        assert_rows_eq(
            &y,
            &[
                &[1.0, 1.0, 2.0, 2.0],
                &[1.0, 1.0, 3.0, 3.0],
                &[1.0, 1.0, 4.0, 4.0],
                &[2.0, 2.0, 4.0, 4.0],
            ],
            1e-6,
        );
    }

    #[test]
    fn batch_norm() {
        let x = arr2(&[
            [0.6926, 0.5312, 0.3551],
            [0.1014, 0.4569, 0.6337],
            [0.5657, 0.8495, 0.8210],
            [0.0483, 0.1684, 0.9234],
        ]);
        let layer = Layer::BatchNorm {
            eps: BATCH_NORM_EPS,
        };
        let y = layer.propagate(&x);
        assert_rows_eq(
            &y,
            &[
                &[1.2105, 0.1228, -1.5185],
                &[-0.8905, -0.1840, -0.2297],
                &[0.7593, 1.4357, 0.6372],
                &[-1.0793, -1.3745, 1.1110],
            ],
            1e-3,
        );
    }

    #[test]
    fn narrow_drops_rows_or_passes_short_batches() {
        let x = arr2(&[
            [0.1, 0.8, 0.9],
            [0.4, 0.2, 0.7],
            [0.2, 0.1, 0.1],
            [0.4, 0.3, 0.2],
            [0.5, 0.6, 0.7],
        ]);
        let layer = Layer::Narrow { left: 1, right: 2 };
        let y = layer.propagate(&x);
        assert_rows_eq(&y, &[&[0.4, 0.2, 0.7], &[0.2, 0.1, 0.1]], 1e-6);

        let short = x.slice(ndarray::s![..3, ..]).to_owned();
        let y = layer.propagate(&short);
        assert_eq!(y, short);
    }
}
