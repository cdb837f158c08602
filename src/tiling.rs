use std::fmt;

use crate::config::HardwareConfig;
use crate::conv::ConvParams;
use crate::copy::copy_region;
use crate::error::{Result, TileError};
use crate::layout::{align_up, DataLayout};
use crate::shape::TensorShape;
use crate::tensor::Tensor;
use crate::tiled_tensor::{GridCoords, Tile, TiledTensor};

/// Tile shapes chosen for one convolution, plus the input halo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingConfig {
    pub inputs: TensorShape,
    pub weights: TensorShape,
    pub outputs: TensorShape,
    pub input_halos: Vec<usize>,
}

impl fmt::Display for TilingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inputs {} halo {:?}, weights {}, outputs {}",
            self.inputs, self.input_halos, self.weights, self.outputs
        )
    }
}

/// One input/output tiling candidate and its cost.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    batch: usize,
    rows: usize,
    chans: usize,
    out_rows: usize,
    kernel_calls: usize,
    input_tiles: usize,
}

/// Derives tile shapes from hardware limits and cuts tensors into tiles.
///
/// Every method is a pure function of its arguments and the hardware
/// constants held here.
#[derive(Debug, Clone)]
pub struct TilingOptimizer {
    hw: HardwareConfig,
}

impl TilingOptimizer {
    pub fn new(hw: HardwareConfig) -> Self {
        Self { hw }
    }

    pub fn hardware(&self) -> &HardwareConfig {
        &self.hw
    }

    fn aligned(&self, n: usize) -> usize {
        align_up(n, self.hw.alignment)
    }

    /* ============================================================
       Tile shape selection
       ============================================================ */

    /// Pick input, weight and output tile shapes for an NHWC convolution.
    ///
    /// Weights are tiled by filters (at most one per PE) and channels (the
    /// remaining MAC budget); input tiles keep the full channel depth when it
    /// fits, otherwise they match the weight channel tile. Among the feasible
    /// input tilings the one with the fewest kernel invocations wins, ties
    /// going to the larger tile.
    pub fn compute_basic_tile_shapes(
        &self,
        params: &ConvParams,
        input: &TensorShape,
        weights: &TensorShape,
        output: &TensorShape,
    ) -> Result<TilingConfig> {
        params.check_shapes(input, weights, output)?;
        self.hw.validate()?;

        let [n, h, w, c] = input.dims4()?;
        let [k, r, s, _] = weights.dims4()?;
        let [_, _, out_w, _] = output.dims4()?;
        let halos = params.input_halos();
        let spad = self.hw.spad_elems();

        let (filters, wchans) = self.weight_tile(k, r, s, c)?;

        let mut chan_options = vec![c];
        if wchans != c {
            chan_options.push(wchans);
        }
        let mut batch_options = vec![n];
        if n != 1 {
            batch_options.push(1);
        }
        let sr = params.row_stride;
        let row_options: Vec<usize> = std::iter::once(h)
            .chain((1..=(h - 1) / sr).rev().map(|m| m * sr))
            .collect();

        let mut best: Option<Candidate> = None;
        for &chans in &chan_options {
            for &batch in &batch_options {
                for &rows in &row_options {
                    let out_rows = rows.div_ceil(sr);
                    let in_elems =
                        batch * (rows + 2 * halos[1]) * (w + 2 * halos[2]) * self.aligned(chans);
                    let out_elems = batch * out_rows * out_w * self.aligned(filters);
                    if in_elems > spad || out_elems > spad {
                        continue;
                    }

                    let spatial_tiles = n.div_ceil(batch) * h.div_ceil(rows);
                    let cand = Candidate {
                        batch,
                        rows,
                        chans,
                        out_rows,
                        kernel_calls: spatial_tiles
                            * k.div_ceil(filters)
                            * c.div_ceil(chans).max(c.div_ceil(wchans)),
                        input_tiles: spatial_tiles * c.div_ceil(chans),
                    };
                    let better = match best {
                        None => true,
                        Some(b) => {
                            (cand.kernel_calls, cand.input_tiles) < (b.kernel_calls, b.input_tiles)
                        }
                    };
                    if better {
                        best = Some(cand);
                    }
                }
            }
        }

        let best = best.ok_or(TileError::TileDoesNotFit {
            tensor: "input",
            capacity: spad,
        })?;
        if best.rows == sr && h > sr {
            tracing::warn!(
                rows = best.rows,
                "input tiles degraded to a single output row; expect many kernel calls"
            );
        }

        let align = self.hw.alignment;
        let config = TilingConfig {
            inputs: TensorShape::with_alignment(
                vec![best.batch, best.rows, w, best.chans],
                DataLayout::NHWC,
                align,
            )?,
            weights: TensorShape::with_alignment(vec![filters, r, s, wchans], DataLayout::NHWC, align)?,
            outputs: TensorShape::with_alignment(
                vec![best.batch, best.out_rows, out_w, filters],
                DataLayout::NHWC,
                align,
            )?,
            input_halos: halos,
        };

        tracing::debug!(
            kernel_calls = best.kernel_calls,
            input_tiles = best.input_tiles,
            "tiling: {config}"
        );
        Ok(config)
    }

    /// Largest (filters, channels) weight tile within the MAC budget that
    /// fits one scratchpad; filters are shrunk last.
    fn weight_tile(&self, k: usize, r: usize, s: usize, c: usize) -> Result<(usize, usize)> {
        let spad = self.hw.spad_elems();
        let budget = self.hw.compute_budget();

        for filters in (1..=k.min(self.hw.num_pes)).rev() {
            let max_chans = c.min(budget / filters);
            for chans in (1..=max_chans).rev() {
                if filters * r * s * self.aligned(chans) <= spad {
                    return Ok((filters, chans));
                }
            }
        }
        Err(TileError::TileDoesNotFit {
            tensor: "weight",
            capacity: spad,
        })
    }

    /* ============================================================
       Tiling and untiling
       ============================================================ */

    /// Cut `source` into a grid of `tile_shape` tiles, each widened by
    /// `halos[axis]` elements on both sides of every axis.
    ///
    /// Edge tiles get the remainder of the extent. Halo elements that fall
    /// outside the source are zero; nothing outside `[0, extent)` is read.
    pub fn generate_tiled_tensor<T: Copy + Default>(
        source: &Tensor<T>,
        tile_shape: &TensorShape,
        halos: &[usize],
    ) -> Result<TiledTensor<T>> {
        let origin = source.shape();
        let src_dims = origin.dims();
        let rank = src_dims.len();

        if tile_shape.layout() != origin.layout() {
            return Err(TileError::LayoutMismatch {
                tensor: "tile shape",
                expected: origin.layout(),
                actual: tile_shape.layout(),
            });
        }
        if halos.len() != rank {
            return Err(TileError::ShapeMismatch {
                what: "halo rank",
                expected: vec![rank],
                actual: vec![halos.len()],
            });
        }

        let tile_dims: Vec<usize> = tile_shape
            .dims()
            .iter()
            .zip(src_dims)
            .map(|(&t, &s)| t.min(s))
            .collect();
        let grid_dims: Vec<usize> = src_dims
            .iter()
            .zip(&tile_dims)
            .map(|(&s, &t)| s.div_ceil(t))
            .collect();

        let grid = TensorShape::new(grid_dims.clone(), origin.layout())?;
        let mut tiled = TiledTensor::new(grid, origin.clone(), halos.to_vec())?;
        let index = tiled.start_index();
        let src = source.as_view();

        for coord in GridCoords::new(grid_dims) {
            let mut start = Vec::with_capacity(rank);
            let mut len = Vec::with_capacity(rank);
            let mut extent = Vec::with_capacity(rank);
            let mut lo = Vec::with_capacity(rank);
            let mut span = Vec::with_capacity(rank);
            let mut dst_off = Vec::with_capacity(rank);

            for d in 0..rank {
                let st = coord[d] * tile_dims[d];
                let ln = tile_dims[d].min(src_dims[d] - st);
                let l = st.saturating_sub(halos[d]);
                let hi = src_dims[d].min(st + ln + halos[d]);

                start.push(st);
                len.push(ln);
                extent.push(ln + 2 * halos[d]);
                lo.push(l);
                span.push(hi - l);
                dst_off.push(l + halos[d] - st);
            }

            let mut tile = Tensor::new(tile_shape.reshaped(extent)?);
            {
                let mut dst = tile.as_view_mut();
                let mut window = dst.subview_mut(&dst_off, &span);
                copy_region(&src.subview(&lo, &span), &mut window);
            }
            tiled.set(index.at(&coord)?, tile, Tile::new(start, len))?;
        }

        tracing::debug!(
            origin = %origin,
            grid = %tiled.shape(),
            halos = ?halos,
            "generated tiled tensor"
        );
        Ok(tiled)
    }

    /// Write the core (halo stripped) of every tile back into `dest`.
    pub fn untile_tiled_tensor<T: Copy>(tiled: &TiledTensor<T>, dest: &mut Tensor<T>) -> Result<()> {
        if dest.shape().dims() != tiled.origin_shape().dims() {
            return Err(TileError::ShapeMismatch {
                what: "untile destination",
                expected: tiled.origin_shape().dims().to_vec(),
                actual: dest.shape().dims().to_vec(),
            });
        }
        for i in 0..tiled.len() {
            tiled.get(i)?;
        }

        let mut dst = dest.as_view_mut();
        for (region, tile) in tiled.tiles() {
            let src = tile.as_view();
            let core = src.subview(tiled.halos(), region.lens());
            let mut window = dst.subview_mut(region.starts(), region.lens());
            copy_region(&core, &mut window);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DataInit;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn nhwc(dims: Vec<usize>) -> TensorShape {
        TensorShape::new(dims, DataLayout::NHWC).unwrap()
    }

    fn hw(num_pes: usize, num_maccs_per_pe: usize, spad_elems: usize, alignment: usize) -> HardwareConfig {
        HardwareConfig {
            num_pes,
            num_maccs_per_pe,
            spad_bytes: spad_elems * 4,
            alignment,
            ..HardwareConfig::default()
        }
    }

    fn sequential(dims: Vec<usize>, alignment: usize) -> Tensor<f32> {
        let shape = TensorShape::with_alignment(dims, DataLayout::NHWC, alignment).unwrap();
        Tensor::from_init(shape, DataInit::Sequential, &mut StdRng::seed_from_u64(0))
    }

    #[test]
    fn matched_channel_tiles_when_input_does_not_fit() {
        let opt = TilingOptimizer::new(hw(4, 2, 256, 1));
        let params = ConvParams::new(3, 3);
        let cfg = opt
            .compute_basic_tile_shapes(
                &params,
                &nhwc(vec![1, 8, 8, 4]),
                &nhwc(vec![8, 3, 3, 4]),
                &nhwc(vec![1, 8, 8, 8]),
            )
            .unwrap();

        assert_eq!(cfg.weights.dims(), &[4, 3, 3, 2]);
        assert_eq!(cfg.inputs.dims(), &[1, 8, 8, 2]);
        assert_eq!(cfg.outputs.dims(), &[1, 8, 8, 4]);
        assert_eq!(cfg.input_halos, vec![0, 1, 1, 0]);
    }

    #[test]
    fn input_keeps_full_depth_when_it_fits() {
        let opt = TilingOptimizer::new(hw(4, 1, 8192, 1));
        let cfg = opt
            .compute_basic_tile_shapes(
                &ConvParams::new(3, 3),
                &nhwc(vec![1, 8, 8, 4]),
                &nhwc(vec![8, 3, 3, 4]),
                &nhwc(vec![1, 8, 8, 8]),
            )
            .unwrap();

        assert_eq!(cfg.weights.dims(), &[4, 3, 3, 1]);
        assert_eq!(cfg.inputs.dims(), &[1, 8, 8, 4]);
    }

    #[test]
    fn rows_split_on_stride_multiples() {
        // full rows need 11*8*8 = 704 elements, four rows need 6*8*8 = 384
        let opt = TilingOptimizer::new(hw(8, 32, 400, 8));
        let params = ConvParams::new(3, 3).with_stride(2, 2);
        let cfg = opt
            .compute_basic_tile_shapes(
                &params,
                &nhwc(vec![1, 9, 6, 3]),
                &nhwc(vec![4, 3, 3, 3]),
                &nhwc(vec![1, 5, 3, 4]),
            )
            .unwrap();

        assert_eq!(cfg.inputs.dims(), &[1, 4, 6, 3]);
        assert_eq!(cfg.outputs.dims(), &[1, 2, 3, 4]);
        assert_eq!(cfg.weights.dims(), &[4, 3, 3, 3]);
    }

    #[test]
    fn tile_shapes_are_deterministic() {
        let opt = TilingOptimizer::new(hw(8, 32, 700, 8));
        let params = ConvParams::new(5, 5);
        let (i, w, o) = (
            nhwc(vec![2, 13, 11, 17]),
            nhwc(vec![12, 5, 5, 17]),
            nhwc(vec![2, 13, 11, 12]),
        );

        let first = opt.compute_basic_tile_shapes(&params, &i, &w, &o);
        let second = opt.compute_basic_tile_shapes(&params, &i, &w, &o);
        assert_eq!(first.is_ok(), second.is_ok());
        if let (Ok(a), Ok(b)) = (first, second) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn nothing_fits_tiny_scratchpad() {
        let opt = TilingOptimizer::new(hw(8, 32, 8, 8));
        let err = opt
            .compute_basic_tile_shapes(
                &ConvParams::new(3, 3),
                &nhwc(vec![1, 4, 4, 8]),
                &nhwc(vec![8, 3, 3, 8]),
                &nhwc(vec![1, 4, 4, 8]),
            )
            .unwrap_err();
        assert!(matches!(err, TileError::TileDoesNotFit { tensor: "weight", .. }));
    }

    #[test]
    fn wrong_output_shape_is_config_error() {
        let opt = TilingOptimizer::new(HardwareConfig::default());
        let err = opt
            .compute_basic_tile_shapes(
                &ConvParams::new(3, 3),
                &nhwc(vec![1, 4, 4, 8]),
                &nhwc(vec![8, 3, 3, 8]),
                &nhwc(vec![1, 4, 4, 4]),
            )
            .unwrap_err();
        assert!(matches!(err, TileError::ShapeMismatch { .. }));
    }

    #[test]
    fn edge_tiles_are_smaller() {
        let src = sequential(vec![1, 7, 5, 3], 1);
        let tiled = TilingOptimizer::generate_tiled_tensor(&src, &nhwc(vec![1, 3, 5, 2]), &[0; 4]).unwrap();

        assert_eq!(tiled.shape().dims(), &[1, 3, 1, 2]);
        let idx = tiled.start_index();
        let last = idx.at(&[0, 2, 0, 1]).unwrap();
        assert_eq!(tiled.get(last).unwrap().shape().dims(), &[1, 1, 5, 1]);
        assert_eq!(tiled.region(last).unwrap().starts(), &[0, 6, 0, 2]);
        assert_eq!(*tiled.get(last).unwrap().get(&[0, 0, 4, 0]), *src.get(&[0, 6, 4, 2]));
    }

    #[test]
    fn halo_clamped_at_boundaries() {
        // one column, one channel: values equal their row index
        let src = sequential(vec![1, 5, 1, 1], 1);
        let tiled =
            TilingOptimizer::generate_tiled_tensor(&src, &nhwc(vec![1, 2, 1, 1]), &[0, 1, 0, 0]).unwrap();
        let rows = |i: usize| -> Vec<f32> { tiled.get(i).unwrap().data().to_vec() };

        // first tile: zero above, rows 0..2, row 2 below
        assert_eq!(rows(0), vec![0.0, 0.0, 1.0, 2.0]);
        // interior tile: full halo on both sides
        assert_eq!(rows(1), vec![1.0, 2.0, 3.0, 4.0]);
        // edge tile holds one core row, zero below
        assert_eq!(rows(2), vec![3.0, 4.0, 0.0]);
    }

    #[test]
    fn tiles_carry_channel_padding() {
        let src = sequential(vec![1, 2, 2, 5], 8);
        let tiled = TilingOptimizer::generate_tiled_tensor(
            &src,
            &TensorShape::with_alignment(vec![1, 2, 2, 3], DataLayout::NHWC, 4).unwrap(),
            &[0; 4],
        )
        .unwrap();

        let t1 = tiled.get(1).unwrap();
        assert_eq!(t1.shape().dims(), &[1, 2, 2, 2]);
        assert_eq!(t1.shape().padding(3), 2);
        assert_eq!(t1.data()[..4], [3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn untile_reconstructs_source() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..8 {
            let dims = vec![
                rng.random_range(1..3),
                rng.random_range(1..12),
                rng.random_range(1..12),
                rng.random_range(1..10),
            ];
            let tile = vec![
                1,
                rng.random_range(1..=dims[1]),
                rng.random_range(1..=dims[2]),
                rng.random_range(1..=dims[3]),
            ];
            let halos = [0, rng.random_range(0..3), rng.random_range(0..3), 0];

            let shape = TensorShape::with_alignment(dims.clone(), DataLayout::NHWC, 8).unwrap();
            let src = Tensor::from_init(shape.clone(), DataInit::Random { lo: -1.0, hi: 1.0 }, &mut rng);

            let tile_shape = TensorShape::with_alignment(tile, DataLayout::NHWC, 8).unwrap();
            let tiled = TilingOptimizer::generate_tiled_tensor(&src, &tile_shape, &halos).unwrap();
            let mut back = Tensor::new(shape);
            TilingOptimizer::untile_tiled_tensor(&tiled, &mut back).unwrap();

            assert_eq!(back, src, "dims {dims:?} halos {halos:?}");
        }
    }

    #[test]
    fn untile_rejects_incomplete_and_mismatched() {
        let src = sequential(vec![1, 4, 4, 2], 1);
        let tiled = TilingOptimizer::generate_tiled_tensor(&src, &nhwc(vec![1, 2, 4, 2]), &[0; 4]).unwrap();

        let mut wrong: Tensor<f32> = Tensor::new(nhwc(vec![1, 4, 4, 3]));
        assert!(matches!(
            TilingOptimizer::untile_tiled_tensor(&tiled, &mut wrong),
            Err(TileError::ShapeMismatch { .. })
        ));

        let empty: TiledTensor<f32> = TiledTensor::new(
            nhwc(vec![1, 2, 1, 1]),
            nhwc(vec![1, 4, 4, 2]),
            vec![0; 4],
        )
        .unwrap();
        let mut dest = Tensor::new(nhwc(vec![1, 4, 4, 2]));
        assert!(matches!(
            TilingOptimizer::untile_tiled_tensor(&empty, &mut dest),
            Err(TileError::TileNotPopulated(0))
        ));
    }
}
