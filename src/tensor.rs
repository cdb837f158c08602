use rand::Rng;

use crate::error::{Result, TileError};
use crate::layout::row_major_stride;
use crate::shape::TensorShape;

/* ========================= Tensor ========================= */

/// Owned, typed, dense N-d buffer. Never resized after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    data: Vec<T>,
    shape: TensorShape,
}

/// How freshly allocated activations and weights are filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataInit {
    /// Every logical element set to the same value.
    Fixed(f32),
    /// Element `i` (in logical row-major order) set to `i`.
    Sequential,
    /// Uniform values in `[lo, hi)`.
    Random { lo: f32, hi: f32 },
}

impl<T: Copy + Default> Tensor<T> {
    /// Zero-filled (`T::default()`) tensor, padding included.
    pub fn new(shape: TensorShape) -> Self {
        Self {
            data: vec![T::default(); shape.storage_size()],
            shape,
        }
    }
}

impl<T> Tensor<T> {
    pub fn from_data(shape: TensorShape, data: Vec<T>) -> Result<Self> {
        if data.len() != shape.storage_size() {
            return Err(TileError::ShapeMismatch {
                what: "tensor storage",
                expected: vec![shape.storage_size()],
                actual: vec![data.len()],
            });
        }
        Ok(Self { data, shape })
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn get(&self, coord: &[usize]) -> &T {
        &self.data[self.shape.offset(coord)]
    }

    pub fn set(&mut self, coord: &[usize], value: T) {
        let idx = self.shape.offset(coord);
        self.data[idx] = value;
    }

    pub fn as_view(&self) -> TensorView<'_, T> {
        TensorView {
            data: &self.data,
            offset: 0,
            dims: self.shape.dims().to_vec(),
            strides: self.shape.strides(),
        }
    }

    pub fn as_view_mut(&mut self) -> TensorViewMut<'_, T> {
        let strides = self.shape.strides();
        TensorViewMut {
            data: &mut self.data,
            offset: 0,
            dims: self.shape.dims().to_vec(),
            strides,
        }
    }
}

impl Tensor<f32> {
    /// Allocate and fill the logical elements; padding stays zero.
    pub fn from_init<R: Rng>(shape: TensorShape, init: DataInit, rng: &mut R) -> Self {
        let mut t = Tensor::new(shape);
        let dims = t.shape.dims().to_vec();
        let last = dims[dims.len() - 1];
        let storage_last = t.shape.storage_dims()[dims.len() - 1];

        let mut logical = 0usize;
        for (i, v) in t.data.iter_mut().enumerate() {
            if i % storage_last >= last {
                continue;
            }
            *v = match init {
                DataInit::Fixed(x) => x,
                DataInit::Sequential => logical as f32,
                DataInit::Random { lo, hi } => rng.random_range(lo..hi),
            };
            logical += 1;
        }
        t
    }
}

/* ========================= TensorView ========================= */

/// Borrowed window over a sub-region of a tensor buffer.
pub struct TensorView<'a, T> {
    data: &'a [T],
    offset: usize,
    dims: Vec<usize>,
    strides: Vec<usize>,
}

pub struct TensorViewMut<'a, T> {
    data: &'a mut [T],
    offset: usize,
    dims: Vec<usize>,
    strides: Vec<usize>,
}

fn linear(offset: usize, strides: &[usize], crd: &[usize]) -> usize {
    offset + crd.iter().zip(strides).map(|(c, s)| c * s).sum::<usize>()
}

fn dense(dims: &[usize], strides: &[usize]) -> bool {
    row_major_stride(dims) == strides
}

impl<'a, T> TensorView<'a, T> {
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// True when the window covers one unbroken run of memory.
    pub fn is_contiguous(&self) -> bool {
        dense(&self.dims, &self.strides)
    }

    pub fn get(&self, crd: &[usize]) -> &'a T {
        &self.data[linear(self.offset, &self.strides, crd)]
    }

    /// The window as a slice; only meaningful when contiguous.
    pub fn as_slice(&self) -> &'a [T] {
        &self.data[self.offset..self.offset + self.size()]
    }

    /* ---------- N-D subview ---------- */

    pub fn subview(&self, start: &[usize], dims: &[usize]) -> TensorView<'a, T> {
        TensorView {
            data: self.data,
            offset: linear(self.offset, &self.strides, start),
            dims: dims.to_vec(),
            strides: self.strides.clone(),
        }
    }
}

impl<'a, T> TensorViewMut<'a, T> {
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_contiguous(&self) -> bool {
        dense(&self.dims, &self.strides)
    }

    pub fn get_mut(&mut self, crd: &[usize]) -> &mut T {
        let idx = linear(self.offset, &self.strides, crd);
        &mut self.data[idx]
    }

    pub fn as_slice_mut(&mut self) -> &mut [T] {
        let end = self.offset + self.size();
        &mut self.data[self.offset..end]
    }

    pub fn subview_mut(&mut self, start: &[usize], dims: &[usize]) -> TensorViewMut<'_, T> {
        TensorViewMut {
            offset: linear(self.offset, &self.strides, start),
            data: &mut *self.data,
            dims: dims.to_vec(),
            strides: self.strides.clone(),
        }
    }
}

/* ========================= Tests ========================= */
