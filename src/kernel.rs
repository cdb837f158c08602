use std::ffi::OsStr;

use libloading::Library;

use crate::error::Result;

/* ============================================================
   Kernel call arguments
   ============================================================ */

/// Everything the fixed-function kernel needs besides the tile buffers.
///
/// Dims are logical NHWC extents; `*_pad` is the channel padding of each
/// tile so the kernel can recover its storage strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvTileArgs {
    pub input_dims: [usize; 4],
    pub weight_dims: [usize; 4],
    pub output_dims: [usize; 4],
    pub input_pad: usize,
    pub weight_pad: usize,
    pub output_pad: usize,
    pub row_stride: usize,
    pub col_stride: usize,
    /// Output-filter tile index (W in the tile loop).
    pub filter_tile: usize,
    /// Input channel tile cursor.
    pub input_chan_tile: usize,
    /// Weight channel tile cursor.
    pub weight_chan_tile: usize,
    /// First channel of the input tile taking part in this call.
    pub input_chan_start: usize,
    /// First channel of the weight tile taking part in this call.
    pub weight_chan_start: usize,
    pub num_chans: usize,
    /// Add into the output tile instead of overwriting it.
    pub accumulate: bool,
}

/* ============================================================
   Kernel trait
   ============================================================ */

/// Fixed-function convolution over one (input, weight, output) tile triple.
///
/// Calls block until the output tile has been written.
pub trait ConvKernel {
    fn conv3d(&self, input: &[f32], weights: &[f32], output: &mut [f32], args: &ConvTileArgs);
}

impl<K: ConvKernel + ?Sized> ConvKernel for Box<K> {
    fn conv3d(&self, input: &[f32], weights: &[f32], output: &mut [f32], args: &ConvTileArgs) {
        (**self).conv3d(input, weights, output, args)
    }
}

impl<K: ConvKernel + ?Sized> ConvKernel for &K {
    fn conv3d(&self, input: &[f32], weights: &[f32], output: &mut [f32], args: &ConvTileArgs) {
        (**self).conv3d(input, weights, output, args)
    }
}

/* ============================================================
   Software kernel
   ============================================================ */

/// Software model of the SMV convolution datapath.
///
/// Computes a valid convolution over the input tile (whose halo already
/// provides the border rows and columns) for exactly `output_dims` rows
/// and columns. Taps that fall outside the input tile read as zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceKernel;

impl ConvKernel for ReferenceKernel {
    fn conv3d(&self, input: &[f32], weights: &[f32], output: &mut [f32], args: &ConvTileArgs) {
        let [_, in_rows, in_cols, in_chans] = args.input_dims;
        let [filters, k_rows, k_cols, w_chans] = args.weight_dims;
        let [out_n, out_rows, out_cols, out_chans] = args.output_dims;

        let in_cs = in_chans + args.input_pad;
        let w_cs = w_chans + args.weight_pad;
        let o_cs = out_chans + args.output_pad;

        for n in 0..out_n {
            for orow in 0..out_rows {
                for ocol in 0..out_cols {
                    for f in 0..filters.min(out_chans) {
                        let mut acc = 0.0f32;
                        for kr in 0..k_rows {
                            let irow = orow * args.row_stride + kr;
                            if irow >= in_rows {
                                continue;
                            }
                            for kc in 0..k_cols {
                                let icol = ocol * args.col_stride + kc;
                                if icol >= in_cols {
                                    continue;
                                }
                                let ib = ((n * in_rows + irow) * in_cols + icol) * in_cs
                                    + args.input_chan_start;
                                let wb = ((f * k_rows + kr) * k_cols + kc) * w_cs
                                    + args.weight_chan_start;
                                for c in 0..args.num_chans {
                                    acc += input[ib + c] * weights[wb + c];
                                }
                            }
                        }

                        let o = ((n * out_rows + orow) * out_cols + ocol) * o_cs + f;
                        if args.accumulate {
                            output[o] += acc;
                        } else {
                            output[o] = acc;
                        }
                    }
                }
            }
        }
    }
}

/* ============================================================
   Vendor kernel loaded from a shared library
   ============================================================ */

pub type Conv3dFn = unsafe extern "C" fn(
    input: *const f32,
    weights: *const f32,
    output: *mut f32,
    input_dims: *const i32,
    weight_dims: *const i32,
    output_dims: *const i32,
    input_pad: i32,
    weight_pad: i32,
    output_pad: i32,
    row_stride: i32,
    col_stride: i32,
    input_chan_start: i32,
    weight_chan_start: i32,
    num_chans: i32,
    filter_tile: i32,
    chan_tile: i32,
    accumulate: bool,
);

pub const CONV3D_SYMBOL: &[u8; 25] = b"convtile_conv3d_f32_nhwc\0";

/// Kernel resolved from a shared library exporting [`CONV3D_SYMBOL`].
pub struct DylibKernel {
    _lib: Library,
    conv3d: Conv3dFn,
}

impl DylibKernel {
    pub fn open<P: AsRef<OsStr>>(path: P) -> Result<Self> {
        // SAFETY: loading runs the library's initialisers; the symbol type
        // must match the C declaration of the kernel.
        unsafe {
            let lib = Library::new(path.as_ref())?;
            let conv3d = *lib.get::<Conv3dFn>(CONV3D_SYMBOL)?;
            tracing::info!(path = ?path.as_ref(), "loaded convolution kernel library");
            Ok(Self { _lib: lib, conv3d })
        }
    }
}

fn dims_i32(d: [usize; 4]) -> [i32; 4] {
    d.map(|x| x as i32)
}

impl ConvKernel for DylibKernel {
    fn conv3d(&self, input: &[f32], weights: &[f32], output: &mut [f32], args: &ConvTileArgs) {
        let input_dims = dims_i32(args.input_dims);
        let weight_dims = dims_i32(args.weight_dims);
        let output_dims = dims_i32(args.output_dims);

        // SAFETY: buffers are the full storage of their tiles and the dims
        // passed alongside describe exactly that storage.
        unsafe {
            (self.conv3d)(
                input.as_ptr(),
                weights.as_ptr(),
                output.as_mut_ptr(),
                input_dims.as_ptr(),
                weight_dims.as_ptr(),
                output_dims.as_ptr(),
                args.input_pad as i32,
                args.weight_pad as i32,
                args.output_pad as i32,
                args.row_stride as i32,
                args.col_stride as i32,
                args.input_chan_start as i32,
                args.weight_chan_start as i32,
                args.num_chans as i32,
                args.filter_tile as i32,
                args.input_chan_tile as i32,
                args.accumulate,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_1x1(accumulate: bool) -> ConvTileArgs {
        ConvTileArgs {
            input_dims: [1, 1, 1, 2],
            weight_dims: [1, 1, 1, 2],
            output_dims: [1, 1, 1, 1],
            input_pad: 0,
            weight_pad: 0,
            output_pad: 0,
            row_stride: 1,
            col_stride: 1,
            filter_tile: 0,
            input_chan_tile: 0,
            weight_chan_tile: 0,
            input_chan_start: 0,
            weight_chan_start: 0,
            num_chans: 2,
            accumulate,
        }
    }

    #[test]
    fn overwrite_then_accumulate() {
        let k = ReferenceKernel;
        let mut out = [100.0f32];

        k.conv3d(&[1.0, 2.0], &[3.0, 4.0], &mut out, &args_1x1(false));
        assert_eq!(out[0], 11.0);

        k.conv3d(&[1.0, 2.0], &[3.0, 4.0], &mut out, &args_1x1(true));
        assert_eq!(out[0], 22.0);
    }

    #[test]
    fn channel_window_and_padding() {
        // input has 4 channels padded to 8, weight slice reads channels 2..4
        let mut input = vec![0.0f32; 8];
        input[..4].copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let weights = [10.0f32, 100.0];
        let mut out = [0.0f32; 8];

        let args = ConvTileArgs {
            input_dims: [1, 1, 1, 4],
            weight_dims: [1, 1, 1, 2],
            output_dims: [1, 1, 1, 1],
            input_pad: 4,
            output_pad: 7,
            input_chan_start: 2,
            ..args_1x1(false)
        };
        k_run(&args, &input, &weights, &mut out);

        assert_eq!(out[0], 3.0 * 10.0 + 4.0 * 100.0);
        assert!(out[1..].iter().all(|v| *v == 0.0));
    }

    fn k_run(args: &ConvTileArgs, input: &[f32], weights: &[f32], out: &mut [f32]) {
        let boxed: Box<dyn ConvKernel> = Box::new(ReferenceKernel);
        boxed.conv3d(input, weights, out, args);
    }

    #[test]
    fn valid_3x3_over_haloed_tile() {
        // 3x3 input of ones, 3x3 kernel of ones, one output pixel = 9
        let input = vec![1.0f32; 9];
        let weights = vec![1.0f32; 9];
        let mut out = [0.0f32];
        let args = ConvTileArgs {
            input_dims: [1, 3, 3, 1],
            weight_dims: [1, 3, 3, 1],
            output_dims: [1, 1, 1, 1],
            num_chans: 1,
            ..args_1x1(false)
        };

        ReferenceKernel.conv3d(&input, &weights, &mut out, &args);
        assert_eq!(out[0], 9.0);
    }

    #[test]
    fn missing_library_is_load_error() {
        let err = DylibKernel::open("/nonexistent/libconvtile_kernels.so").err();
        assert!(matches!(err, Some(crate::error::TileError::KernelLoad(_))));
    }
}
