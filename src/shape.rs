use std::fmt;

use crate::error::{Result, TileError};
use crate::layout::{align_up, row_major_stride, DataLayout};

/// Extents, layout tag and innermost-axis alignment of a tensor.
///
/// Only the innermost axis is ever padded: its storage extent is rounded up
/// to a multiple of `alignment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorShape {
    dims: Vec<usize>,
    layout: DataLayout,
    alignment: usize,
}

impl TensorShape {
    pub fn new(dims: Vec<usize>, layout: DataLayout) -> Result<Self> {
        Self::with_alignment(dims, layout, 1)
    }

    pub fn with_alignment(dims: Vec<usize>, layout: DataLayout, alignment: usize) -> Result<Self> {
        if dims.len() != layout.rank() {
            return Err(TileError::InvalidShape {
                dims,
                reason: "rank does not match layout",
            });
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(TileError::InvalidShape {
                dims,
                reason: "extents must be positive",
            });
        }
        if alignment == 0 {
            return Err(TileError::InvalidShape {
                dims,
                reason: "alignment must be positive",
            });
        }
        Ok(Self { dims, layout, alignment })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Extents of a rank-4 shape as an array.
    pub fn dims4(&self) -> Result<[usize; 4]> {
        self.dims
            .as_slice()
            .try_into()
            .map_err(|_| TileError::ShapeMismatch {
                what: "tensor rank",
                expected: vec![4],
                actual: vec![self.dims.len()],
            })
    }

    /// Number of logical elements (padding excluded).
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Padding applied on `axis`; zero everywhere but the innermost axis.
    pub fn padding(&self, axis: usize) -> usize {
        if axis + 1 == self.dims.len() {
            let last = self.dims[axis];
            align_up(last, self.alignment) - last
        } else {
            0
        }
    }

    /// Extents as laid out in memory, padding included.
    pub fn storage_dims(&self) -> Vec<usize> {
        let mut out = self.dims.clone();
        let last = out.len() - 1;
        out[last] += self.padding(last);
        out
    }

    /// Number of elements backing a tensor of this shape.
    pub fn storage_size(&self) -> usize {
        self.storage_dims().iter().product()
    }

    pub fn strides(&self) -> Vec<usize> {
        row_major_stride(&self.storage_dims())
    }

    /// Linear storage offset of `coord`. No bounds checking.
    pub fn offset(&self, coord: &[usize]) -> usize {
        coord
            .iter()
            .zip(self.strides())
            .map(|(c, s)| c * s)
            .sum()
    }

    /// Same layout and alignment with new extents.
    pub fn reshaped(&self, dims: Vec<usize>) -> Result<Self> {
        Self::with_alignment(dims, self.layout, self.alignment)
    }
}

impl std::ops::Index<usize> for TensorShape {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.dims[axis]
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ") {}", self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_with_channel_padding() {
        let s = TensorShape::with_alignment(vec![1, 4, 5, 3], DataLayout::NHWC, 8).unwrap();

        assert_eq!(s.size(), 60);
        assert_eq!(s.padding(3), 5);
        assert_eq!(s.padding(1), 0);
        assert_eq!(s.storage_dims(), vec![1, 4, 5, 8]);
        assert_eq!(s.storage_size(), 160);
        assert_eq!(s.strides(), vec![160, 40, 8, 1]);
        assert_eq!(s.offset(&[0, 1, 2, 1]), 57);
        assert_eq!(s.to_string(), "(1,4,5,3) NHWC");
    }

    #[test]
    fn shape_rejects_bad_extents() {
        assert!(matches!(
            TensorShape::new(vec![1, 0, 2, 2], DataLayout::NHWC),
            Err(TileError::InvalidShape { .. })
        ));
        assert!(matches!(
            TensorShape::new(vec![4, 4], DataLayout::NHWC),
            Err(TileError::InvalidShape { .. })
        ));
        assert!(TensorShape::with_alignment(vec![4], DataLayout::X, 0).is_err());
    }

    #[test]
    fn unpadded_shape_is_dense() {
        let s = TensorShape::new(vec![2, 3], DataLayout::NC).unwrap();
        assert_eq!(s.storage_size(), s.size());
        assert_eq!(s[1], 3);
    }
}
