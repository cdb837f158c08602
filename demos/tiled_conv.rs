use std::path::Path;

use convtile::backend::{build_backend, ConvolutionBackend, ReferenceConvolution};
use convtile::config::HardwareConfig;
use convtile::conv::{assert_close_f32, ConvParams};
use convtile::layout::DataLayout;
use convtile::shape::TensorShape;
use convtile::tensor::{DataInit, Tensor};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

/// ----------------------
/// Tiled 3x3 convolution on the SMV model, checked against the untiled path.
///
///   cargo run --example tiled_conv [hardware.toml]
/// ----------------------
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let hw = match std::env::args().nth(1) {
        Some(path) => HardwareConfig::from_file(Path::new(&path))?,
        None => HardwareConfig {
            spad_bytes: 16 * 1024,
            ..HardwareConfig::default()
        },
    };

    let (n, h, w, c, k) = (1, 32, 32, 48, 24);
    let params = ConvParams::new(3, 3);
    let align = hw.alignment;
    let nhwc = |dims: Vec<usize>| TensorShape::with_alignment(dims, DataLayout::NHWC, align);

    let mut rng = StdRng::seed_from_u64(0);
    let init = DataInit::Random { lo: -1.0, hi: 1.0 };
    let input = Tensor::from_init(nhwc(vec![n, h, w, c])?, init, &mut rng);
    let weights = Tensor::from_init(nhwc(vec![k, 3, 3, c])?, init, &mut rng);
    let out_shape = nhwc(params.output_dims(input.shape(), k)?)?;

    let mut tiled_out = Tensor::new(out_shape.clone());
    let mut smv = build_backend("conv3x3", params, &hw)?;
    let stats = smv.run(&input, &weights, &mut tiled_out)?;

    let mut ref_out = Tensor::new(out_shape);
    ReferenceConvolution::new("conv3x3-ref", params).run(&input, &weights, &mut ref_out)?;

    assert_close_f32(tiled_out.data(), ref_out.data(), 1e-3);

    println!("input   {}", input.shape());
    println!("weights {}", weights.shape());
    println!("output  {}", tiled_out.shape());
    println!(
        "{} kernel calls over {} input / {} weight / {} output tiles",
        stats.kernel_calls, stats.input_tiles, stats.weight_tiles, stats.output_tiles
    );
    println!("Tiled convolution matches reference!");
    Ok(())
}
