use std::fmt;

/// Axis ordering of a tensor's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataLayout {
    /// batch, channel, height, width
    NCHW,
    /// batch, height, width, channel
    NHWC,
    /// batch, features
    NC,
    /// flat vector
    X,
}

impl DataLayout {
    /// Number of axes a shape with this layout must have.
    pub fn rank(self) -> usize {
        match self {
            DataLayout::NCHW | DataLayout::NHWC => 4,
            DataLayout::NC => 2,
            DataLayout::X => 1,
        }
    }

    /// Index of the channel axis, if the layout has one.
    pub fn channel_axis(self) -> Option<usize> {
        match self {
            DataLayout::NCHW => Some(1),
            DataLayout::NHWC => Some(3),
            DataLayout::NC => Some(1),
            DataLayout::X => None,
        }
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataLayout::NCHW => "NCHW",
            DataLayout::NHWC => "NHWC",
            DataLayout::NC => "NC",
            DataLayout::X => "X",
        };
        f.write_str(s)
    }
}

/* ---------- stride helpers ---------- */

/// Row-major strides over `extents`, where the innermost extent already
/// includes any alignment padding.
pub fn row_major_stride(extents: &[usize]) -> Vec<usize> {
    let mut stride = vec![0; extents.len()];
    let mut acc = 1;
    for i in (0..extents.len()).rev() {
        stride[i] = acc;
        acc *= extents[i];
    }
    stride
}

/// Round `n` up to the next multiple of `alignment`.
pub fn align_up(n: usize, alignment: usize) -> usize {
    n.div_ceil(alignment) * alignment
}
