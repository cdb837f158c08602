use crate::layout::DataLayout;

/// Errors raised while tiling tensors or driving the convolution kernel.
///
/// Configuration errors are detected before any kernel call. Indexing errors
/// point at a bug in tile-count computation and abort the operation.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    /* ---------- configuration ---------- */
    #[error("invalid shape {dims:?}: {reason}")]
    InvalidShape { dims: Vec<usize>, reason: &'static str },

    #[error("{tensor} has layout {actual}, expected {expected}")]
    LayoutMismatch {
        tensor: &'static str,
        expected: DataLayout,
        actual: DataLayout,
    },

    #[error("{what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("weight tile is {rows}x{cols} but the kernel is configured as {kernel_rows}x{kernel_cols}")]
    KernelExtentMismatch {
        rows: usize,
        cols: usize,
        kernel_rows: usize,
        kernel_cols: usize,
    },

    #[error("no {tensor} tile fits a scratchpad of {capacity} elements")]
    TileDoesNotFit { tensor: &'static str, capacity: usize },

    #[error("cannot reconcile {input} input channel tiles with {weights} weight channel tiles")]
    UnreconciledChannelTiles { input: usize, weights: usize },

    #[error("invalid tiling: {0}")]
    InvalidTiling(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load kernel library: {0}")]
    KernelLoad(#[from] libloading::Error),

    /* ---------- indexing ---------- */
    #[error("tile coordinate {coord} out of range on axis {axis} (extent {extent})")]
    IndexOutOfRange { axis: usize, coord: usize, extent: usize },

    #[error("tile slot {index} out of range ({len} slots)")]
    SlotOutOfRange { index: usize, len: usize },

    #[error("tile slot {0} has not been populated")]
    TileNotPopulated(usize),
}

pub type Result<T> = std::result::Result<T, TileError>;
