use crate::config::{BackendKind, HardwareConfig};
use crate::conv::{ConvParams, ConvStats, ConvolutionOp};
use crate::error::Result;
use crate::kernel::{ConvKernel, ConvTileArgs, DylibKernel, ReferenceKernel};
use crate::tensor::Tensor;
use crate::tiling::TilingOptimizer;

/// Something that can run an NHWC convolution end to end.
pub trait ConvolutionBackend {
    fn name(&self) -> &str;

    fn run(
        &mut self,
        input: &Tensor<f32>,
        weights: &Tensor<f32>,
        output: &mut Tensor<f32>,
    ) -> Result<ConvStats>;
}

impl<K: ConvKernel> ConvolutionBackend for ConvolutionOp<K> {
    fn name(&self) -> &str {
        ConvolutionOp::name(self)
    }

    fn run(
        &mut self,
        input: &Tensor<f32>,
        weights: &Tensor<f32>,
        output: &mut Tensor<f32>,
    ) -> Result<ConvStats> {
        ConvolutionOp::run(self, input, weights, output)
    }
}

/// Untiled convolution: the whole input, padded once, in a single kernel call.
#[derive(Debug, Clone)]
pub struct ReferenceConvolution {
    name: String,
    params: ConvParams,
}

impl ReferenceConvolution {
    pub fn new(name: impl Into<String>, params: ConvParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl ConvolutionBackend for ReferenceConvolution {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &mut self,
        input: &Tensor<f32>,
        weights: &Tensor<f32>,
        output: &mut Tensor<f32>,
    ) -> Result<ConvStats> {
        self.params
            .check_shapes(input.shape(), weights.shape(), output.shape())?;

        let padded =
            TilingOptimizer::generate_tiled_tensor(input, input.shape(), &self.params.input_halos())?;
        let tile = padded.get(0)?;

        let channels = input.shape()[3];
        let args = ConvTileArgs {
            input_dims: tile.shape().dims4()?,
            weight_dims: weights.shape().dims4()?,
            output_dims: output.shape().dims4()?,
            input_pad: tile.shape().padding(3),
            weight_pad: weights.shape().padding(3),
            output_pad: output.shape().padding(3),
            row_stride: self.params.row_stride,
            col_stride: self.params.col_stride,
            filter_tile: 0,
            input_chan_tile: 0,
            weight_chan_tile: 0,
            input_chan_start: 0,
            weight_chan_start: 0,
            num_chans: channels,
            accumulate: false,
        };
        ReferenceKernel.conv3d(tile.data(), weights.data(), output.data_mut(), &args);

        tracing::info!(op = %self.name, "reference convolution complete");
        Ok(ConvStats {
            kernel_calls: 1,
            input_tiles: 1,
            weight_tiles: 1,
            output_tiles: 1,
        })
    }
}

/// Build the backend selected by `hw.backend`.
///
/// The tiled backend uses the kernel from `hw.kernel_library` when one is
/// configured and the software kernel otherwise.
pub fn build_backend(
    name: &str,
    params: ConvParams,
    hw: &HardwareConfig,
) -> Result<Box<dyn ConvolutionBackend>> {
    hw.validate()?;
    match hw.backend {
        BackendKind::Reference => Ok(Box::new(ReferenceConvolution::new(name, params))),
        BackendKind::Smv => {
            let optimizer = TilingOptimizer::new(hw.clone());
            match &hw.kernel_library {
                Some(path) => {
                    let kernel = DylibKernel::open(path)?;
                    Ok(Box::new(ConvolutionOp::new(name, params, optimizer, kernel)))
                }
                None => Ok(Box::new(ConvolutionOp::new(
                    name,
                    params,
                    optimizer,
                    ReferenceKernel,
                ))),
            }
        }
    }
}
