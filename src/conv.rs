use crate::error::{Result, TileError};
use crate::kernel::{ConvKernel, ConvTileArgs};
use crate::layout::DataLayout;
use crate::shape::TensorShape;
use crate::tensor::Tensor;
use crate::tiled_tensor::TiledTensor;
use crate::tiling::{TilingConfig, TilingOptimizer};

/// Compare two buffers element-wise with a tolerance `eps`.
/// Panics on the first element that differs by more than `eps`.
pub fn assert_close_f32(actual: &[f32], expected: &[f32], eps: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= eps,
            "Mismatch at index {}: got {}, expected {}, tolerance {}",
            i,
            a,
            e,
            eps
        );
    }
}

/* ============================================================
   Convolution parameters
   ============================================================ */

/// Kernel extent and strides of a "same"-padded NHWC convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    pub kernel_rows: usize,
    pub kernel_cols: usize,
    pub row_stride: usize,
    pub col_stride: usize,
}

impl ConvParams {
    pub fn new(kernel_rows: usize, kernel_cols: usize) -> Self {
        Self {
            kernel_rows,
            kernel_cols,
            row_stride: 1,
            col_stride: 1,
        }
    }

    pub fn with_stride(mut self, row_stride: usize, col_stride: usize) -> Self {
        self.row_stride = row_stride;
        self.col_stride = col_stride;
        self
    }

    /// Input halo: half the kernel on each spatial axis.
    pub fn input_halos(&self) -> Vec<usize> {
        vec![0, self.kernel_rows / 2, self.kernel_cols / 2, 0]
    }

    /// `(N, ceil(H/sr), ceil(W/sc), K)` for an NHWC input with `filters` filters.
    pub fn output_dims(&self, input: &TensorShape, filters: usize) -> Result<Vec<usize>> {
        let [n, h, w, _] = input.dims4()?;
        Ok(vec![
            n,
            h.div_ceil(self.row_stride),
            w.div_ceil(self.col_stride),
            filters,
        ])
    }

    /// Validate a convolution problem before any tiling takes place.
    pub fn check_shapes(
        &self,
        input: &TensorShape,
        weights: &TensorShape,
        output: &TensorShape,
    ) -> Result<()> {
        for (tensor, shape) in [("input", input), ("weights", weights), ("output", output)] {
            if shape.layout() != DataLayout::NHWC {
                return Err(TileError::LayoutMismatch {
                    tensor,
                    expected: DataLayout::NHWC,
                    actual: shape.layout(),
                });
            }
        }
        if self.row_stride == 0 || self.col_stride == 0 {
            return Err(TileError::Config("strides must be positive".into()));
        }
        if self.kernel_rows == 0 || self.kernel_cols == 0 {
            return Err(TileError::Config("kernel extent must be positive".into()));
        }

        let [k, r, s, wc] = weights.dims4()?;
        if r != self.kernel_rows || s != self.kernel_cols {
            return Err(TileError::KernelExtentMismatch {
                rows: r,
                cols: s,
                kernel_rows: self.kernel_rows,
                kernel_cols: self.kernel_cols,
            });
        }
        if wc != input[3] {
            return Err(TileError::ShapeMismatch {
                what: "weight channels",
                expected: vec![input[3]],
                actual: vec![wc],
            });
        }

        let expected = self.output_dims(input, k)?;
        if output.dims() != expected.as_slice() {
            return Err(TileError::ShapeMismatch {
                what: "output shape",
                expected,
                actual: output.dims().to_vec(),
            });
        }
        Ok(())
    }
}

/* ============================================================
   Channel tile reconciliation
   ============================================================ */

/// One kernel call's pair of channel tile cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStep {
    pub input: usize,
    pub weight: usize,
    /// False only for the first call on an output tile.
    pub accumulate: bool,
}

/// Walks input and weight channel tiles in lockstep.
///
/// Equal counts advance both cursors; a single input channel tile is
/// reused against every weight channel tile; a single weight channel tile
/// is reused against every input channel tile.
#[derive(Debug, Clone)]
pub struct ChannelTilePairs {
    inputs: usize,
    weights: usize,
    cursor: (usize, usize),
    done: bool,
}

impl ChannelTilePairs {
    pub fn new(inputs: usize, weights: usize) -> Result<Self> {
        if inputs != weights && inputs > 1 && weights > 1 {
            return Err(TileError::UnreconciledChannelTiles { input: inputs, weights });
        }
        Ok(Self {
            inputs,
            weights,
            cursor: (0, 0),
            done: inputs == 0 || weights == 0,
        })
    }
}

impl Iterator for ChannelTilePairs {
    type Item = ChannelStep;

    fn next(&mut self) -> Option<ChannelStep> {
        if self.done {
            return None;
        }
        let (i, w) = self.cursor;
        let step = ChannelStep {
            input: i,
            weight: w,
            accumulate: !(i == 0 && w == 0),
        };

        self.cursor = if self.inputs == self.weights {
            (i + 1, w + 1)
        } else if self.inputs == 1 {
            (i, w + 1)
        } else {
            (i + 1, w)
        };
        self.done = self.cursor.0 >= self.inputs || self.cursor.1 >= self.weights;
        Some(step)
    }
}

/* ============================================================
   Operator
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Uninitialized,
    Tiled,
    Executing,
    Done,
}

/// Work done by one operator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvStats {
    pub kernel_calls: usize,
    pub input_tiles: usize,
    pub weight_tiles: usize,
    pub output_tiles: usize,
}

/// NHWC convolution driven tile by tile through a [`ConvKernel`].
pub struct ConvolutionOp<K> {
    name: String,
    params: ConvParams,
    optimizer: TilingOptimizer,
    kernel: K,
    tiling: Option<TilingConfig>,
    state: OpState,
}

impl<K: ConvKernel> ConvolutionOp<K> {
    pub fn new(name: impl Into<String>, params: ConvParams, optimizer: TilingOptimizer, kernel: K) -> Self {
        Self {
            name: name.into(),
            params,
            optimizer,
            kernel,
            tiling: None,
            state: OpState::Uninitialized,
        }
    }

    /// Use fixed tile shapes instead of asking the optimizer.
    pub fn with_tiling(mut self, tiling: TilingConfig) -> Self {
        self.tiling = Some(tiling);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &ConvParams {
        &self.params
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn run(
        &mut self,
        input: &Tensor<f32>,
        weights: &Tensor<f32>,
        output: &mut Tensor<f32>,
    ) -> Result<ConvStats> {
        self.state = OpState::Uninitialized;
        self.params
            .check_shapes(input.shape(), weights.shape(), output.shape())?;

        let tiling = match &self.tiling {
            Some(t) => t.clone(),
            None => self.optimizer.compute_basic_tile_shapes(
                &self.params,
                input.shape(),
                weights.shape(),
                output.shape(),
            )?,
        };
        tracing::debug!(op = %self.name, "tile shapes: {tiling}");

        let tiled_in = TilingOptimizer::generate_tiled_tensor(input, &tiling.inputs, &tiling.input_halos)?;
        let tiled_w = TilingOptimizer::generate_tiled_tensor(weights, &tiling.weights, &[0; 4])?;
        let mut tiled_out = TilingOptimizer::generate_tiled_tensor(output, &tiling.outputs, &[0; 4])?;
        self.state = OpState::Tiled;

        self.check_tiled(&tiling, &tiled_in, &tiled_w, &tiled_out)?;

        self.state = OpState::Executing;
        let kernel_calls = self.run_nhwc(&tiled_in, &tiled_w, &mut tiled_out)?;

        TilingOptimizer::untile_tiled_tensor(&tiled_out, output)?;
        self.state = OpState::Done;

        let stats = ConvStats {
            kernel_calls,
            input_tiles: tiled_in.len(),
            weight_tiles: tiled_w.len(),
            output_tiles: tiled_out.len(),
        };
        tracing::info!(
            op = %self.name,
            kernel_calls = stats.kernel_calls,
            input_tiles = stats.input_tiles,
            weight_tiles = stats.weight_tiles,
            output_tiles = stats.output_tiles,
            "convolution complete"
        );
        Ok(stats)
    }

    /// Reject tile grids the iteration cannot service, before any kernel call.
    fn check_tiled(
        &self,
        tiling: &TilingConfig,
        inputs: &TiledTensor<f32>,
        weights: &TiledTensor<f32>,
        outputs: &TiledTensor<f32>,
    ) -> Result<()> {
        let [_, w_rows, w_cols, _] = tiling.weights.dims4()?;
        if w_rows != self.params.kernel_rows || w_cols != self.params.kernel_cols {
            return Err(TileError::KernelExtentMismatch {
                rows: w_rows,
                cols: w_cols,
                kernel_rows: self.params.kernel_rows,
                kernel_cols: self.params.kernel_cols,
            });
        }
        if tiling.input_halos != self.params.input_halos() {
            return Err(TileError::InvalidTiling(format!(
                "input halo {:?} does not match a {}x{} kernel",
                tiling.input_halos, self.params.kernel_rows, self.params.kernel_cols
            )));
        }

        let in_grid = inputs.shape().dims4()?;
        let w_grid = weights.shape().dims4()?;
        let out_grid = outputs.shape().dims4()?;

        if in_grid[2] != 1 || out_grid[2] != 1 {
            return Err(TileError::InvalidTiling("the width axis cannot be tiled".into()));
        }
        if in_grid[..2] != out_grid[..2] {
            return Err(TileError::InvalidTiling(format!(
                "output grid {:?} does not follow input grid {:?}",
                out_grid, in_grid
            )));
        }
        if out_grid[3] != w_grid[0] {
            return Err(TileError::InvalidTiling(format!(
                "{} output channel tiles for {} filter tiles",
                out_grid[3], w_grid[0]
            )));
        }

        let in_tile = tiling.inputs.dims4()?;
        let out_tile = tiling.outputs.dims4()?;
        let w_tile = tiling.weights.dims4()?;
        if out_tile[3] != w_tile[0] {
            return Err(TileError::InvalidTiling(format!(
                "output tile holds {} channels, weight tile {} filters",
                out_tile[3], w_tile[0]
            )));
        }
        if in_tile[0] != out_tile[0] {
            return Err(TileError::InvalidTiling("input and output batch tiles differ".into()));
        }
        if in_grid[1] > 1 && in_tile[1] != out_tile[1] * self.params.row_stride {
            return Err(TileError::InvalidTiling(format!(
                "{} input rows per tile do not produce {} output rows at stride {}",
                in_tile[1], out_tile[1], self.params.row_stride
            )));
        }

        ChannelTilePairs::new(in_grid[3], w_grid[3])?;
        if in_grid[3] == w_grid[3] && in_grid[3] > 1 {
            let in_idx = inputs.start_index();
            let w_idx = weights.start_index();
            for c in 0..in_grid[3] {
                let a = inputs.region(in_idx.at(&[0, 0, 0, c])?)?;
                let b = weights.region(w_idx.at(&[0, 0, 0, c])?)?;
                if a.start(3) != b.start(3) || a.len(3) != b.len(3) {
                    return Err(TileError::InvalidTiling(format!(
                        "channel tile {c} covers {}..{} of the input but {}..{} of the weights",
                        a.start(3),
                        a.end(3),
                        b.start(3),
                        b.end(3)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Main tile loop; returns the number of kernel calls.
    fn run_nhwc(
        &self,
        inputs: &TiledTensor<f32>,
        weights: &TiledTensor<f32>,
        outputs: &mut TiledTensor<f32>,
    ) -> Result<usize> {
        let in_grid = inputs.shape().dims4()?;
        let w_grid = weights.shape().dims4()?;
        let in_idx = inputs.start_index();
        let w_idx = weights.start_index();
        let out_idx = outputs.start_index();
        let mut calls = 0;

        for n in 0..in_grid[0] {
            for h in 0..in_grid[1] {
                for f in 0..w_grid[0] {
                    let o = out_idx.at(&[n, h, 0, f])?;
                    for step in ChannelTilePairs::new(in_grid[3], w_grid[3])? {
                        let i = in_idx.at(&[n, h, 0, step.input])?;
                        let wi = w_idx.at(&[f, 0, 0, step.weight])?;
                        tracing::debug!("Input: {i}, weights: {wi}, output: {o}");

                        let in_region = inputs.region(i)?;
                        let w_region = weights.region(wi)?;
                        let lo = in_region.start(3).max(w_region.start(3));
                        let hi = in_region.end(3).min(w_region.end(3));

                        let in_tile = inputs.get(i)?;
                        let w_tile = weights.get(wi)?;
                        let out_tile = outputs.get_mut(o)?;

                        let args = ConvTileArgs {
                            input_dims: in_tile.shape().dims4()?,
                            weight_dims: w_tile.shape().dims4()?,
                            output_dims: out_tile.shape().dims4()?,
                            input_pad: in_tile.shape().padding(3),
                            weight_pad: w_tile.shape().padding(3),
                            output_pad: out_tile.shape().padding(3),
                            row_stride: self.params.row_stride,
                            col_stride: self.params.col_stride,
                            filter_tile: f,
                            input_chan_tile: step.input,
                            weight_chan_tile: step.weight,
                            input_chan_start: lo - in_region.start(3),
                            weight_chan_start: lo - w_region.start(3),
                            num_chans: hi.saturating_sub(lo),
                            accumulate: step.accumulate,
                        };
                        self.kernel
                            .conv3d(in_tile.data(), w_tile.data(), out_tile.data_mut(), &args);
                        calls += 1;
                    }
                }
            }
        }
        Ok(calls)
    }
}
