use crate::tensor::{TensorView, TensorViewMut};

/// Copy every element of `src` into `dst`. Both windows must have the same
/// extents; strides may differ (padded tiles, sub-regions).
pub fn copy_region<T: Copy>(src: &TensorView<'_, T>, dst: &mut TensorViewMut<'_, T>) {
    assert_eq!(src.dims(), dst.dims(), "copy_region: extent mismatch");

    if src.is_contiguous() && dst.is_contiguous() {
        dst.as_slice_mut().copy_from_slice(src.as_slice());
        return;
    }

    // strided fallback: innermost axis copied run by run
    copy_recursive(src, dst, 0, &mut Vec::with_capacity(src.dims().len()));
}

fn copy_recursive<T: Copy>(
    src: &TensorView<'_, T>,
    dst: &mut TensorViewMut<'_, T>,
    dim: usize,
    idx: &mut Vec<usize>,
) {
    let ndims = src.dims().len();
    if dim + 1 == ndims {
        let run = src.dims()[dim];
        let mut start = idx.clone();
        start.push(0);
        let mut span = vec![1; ndims];
        span[dim] = run;

        let s = src.subview(&start, &span);
        let mut d = dst.subview_mut(&start, &span);
        for i in 0..run {
            let mut crd = vec![0; ndims];
            crd[dim] = i;
            *d.get_mut(&crd) = *s.get(&crd);
        }
        return;
    }

    for i in 0..src.dims()[dim] {
        idx.push(i);
        copy_recursive(src, dst, dim + 1, idx);
        idx.pop();
    }
}
