//! Raw array buffers exchanged between data sources and the slicer.
//!
//! Arrays are stored as little-endian, C-ordered bytes together with their
//! element type and shape. Keeping the payload in a [`Bytes`] buffer makes
//! clones cheap, so the same slice can sit in the cache and travel to
//! subscribers without copying.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Element type of an [`ArrayData`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    U16,
    U32,
    I32,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DType::U8 => 1,
            DType::U16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    fn decode(self, chunk: &[u8]) -> f64 {
        match self {
            DType::U8 => u8::read(chunk) as f64,
            DType::U16 => u16::read(chunk) as f64,
            DType::U32 => u32::read(chunk) as f64,
            DType::I32 => i32::read(chunk) as f64,
            DType::F32 => f32::read(chunk) as f64,
            DType::F64 => f64::read(chunk),
        }
    }
}

/// Scalar types that can be stored in an [`ArrayData`].
pub trait Element: Copy + Send + Sync + 'static {
    /// The matching element type tag
    const DTYPE: DType;

    /// Append the little-endian encoding of `self`.
    fn put(self, buf: &mut BytesMut);

    /// Decode one element from exactly `DTYPE.size()` bytes.
    fn read(chunk: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;

            fn put(self, buf: &mut BytesMut) {
                buf.extend_from_slice(&self.to_le_bytes());
            }

            fn read(chunk: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(chunk);
                <$t>::from_le_bytes(raw)
            }
        }
    };
}

impl_element!(u8, DType::U8);
impl_element!(u16, DType::U16);
impl_element!(u32, DType::U32);
impl_element!(i32, DType::I32);
impl_element!(f32, DType::F32);
impl_element!(f64, DType::F64);

/// Row-major element strides for `shape`.
pub(crate) fn c_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Advance a row-major multi-index. Returns `false` once it wraps around.
fn advance(index: &mut [usize], shape: &[usize]) -> bool {
    for axis in (0..index.len()).rev() {
        index[axis] += 1;
        if index[axis] < shape[axis] {
            return true;
        }
        index[axis] = 0;
    }
    false
}

/// An N-dimensional array buffer.
///
/// Equality compares dtype, shape and the raw bytes, so two slices are equal
/// exactly when their content is byte-for-byte identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayData {
    dtype: DType,
    shape: Vec<usize>,
    bytes: Bytes,
}

impl ArrayData {
    /// Wrap an existing buffer, checking that its length matches the shape.
    pub fn new(dtype: DType, shape: Vec<usize>, bytes: Bytes) -> Result<Self, SourceError> {
        let expected = shape.iter().product::<usize>() * dtype.size();
        if bytes.len() != expected {
            return Err(SourceError::InvalidIndex(format!(
                "buffer of {} bytes does not match shape {:?} ({} bytes expected)",
                bytes.len(),
                shape,
                expected
            )));
        }
        Ok(Self {
            dtype,
            shape,
            bytes,
        })
    }

    /// Build an array from typed values in row-major order.
    pub fn from_elements<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self, SourceError> {
        let mut buf = BytesMut::with_capacity(values.len() * T::DTYPE.size());
        for &value in values {
            value.put(&mut buf);
        }
        Self::new(T::DTYPE, shape, buf.freeze())
    }

    /// Build an array by evaluating `f` at every multi-index.
    pub fn from_fn<T: Element>(shape: Vec<usize>, mut f: impl FnMut(&[usize]) -> T) -> Self {
        let total: usize = shape.iter().product();
        let mut buf = BytesMut::with_capacity(total * T::DTYPE.size());
        if total > 0 {
            let mut index = vec![0usize; shape.len()];
            loop {
                f(&index).put(&mut buf);
                if !advance(&mut index, &shape) {
                    break;
                }
            }
        }
        Self {
            dtype: T::DTYPE,
            shape,
            bytes: buf.freeze(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw little-endian buffer.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Memory footprint of the buffer in bytes.
    pub fn nbytes(&self) -> usize {
        self.bytes.len()
    }

    /// Value of the element at flat position `i`, widened to `f64`.
    pub fn value_f64(&self, i: usize) -> Option<f64> {
        let size = self.dtype.size();
        let chunk = self.bytes.get(i * size..(i + 1) * size)?;
        Some(self.dtype.decode(chunk))
    }

    /// Decode the whole buffer into typed values.
    ///
    /// Returns `None` when `T` does not match the stored dtype.
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if T::DTYPE != self.dtype {
            return None;
        }
        Some(
            self.bytes
                .chunks_exact(self.dtype.size())
                .map(T::read)
                .collect(),
        )
    }

    /// Extract the sub-array spanned by `displayed` with every other axis
    /// fixed at the given index.
    ///
    /// `fixed` holds `(axis, index)` pairs. Together with `displayed` it must
    /// name every axis exactly once. The output axes follow the order of
    /// `displayed`, so `[1, 0]` yields a transposed plane.
    pub fn gather(&self, fixed: &[(usize, usize)], displayed: &[usize]) -> Result<Self, SourceError> {
        let ndim = self.shape.len();
        let mut seen = vec![false; ndim];
        for &axis in fixed.iter().map(|(axis, _)| axis).chain(displayed) {
            if axis >= ndim || seen[axis] {
                return Err(SourceError::InvalidIndex(format!(
                    "axes {:?} + {:?} do not cover {} dimensions exactly once",
                    fixed, displayed, ndim
                )));
            }
            seen[axis] = true;
        }
        if seen.iter().any(|covered| !covered) {
            return Err(SourceError::InvalidIndex(format!(
                "axes {:?} + {:?} do not cover {} dimensions",
                fixed, displayed, ndim
            )));
        }

        let strides = c_strides(&self.shape);
        let mut base = 0usize;
        for &(axis, index) in fixed {
            if index >= self.shape[axis] {
                return Err(SourceError::InvalidIndex(format!(
                    "index {} out of bounds for axis {} of length {}",
                    index, axis, self.shape[axis]
                )));
            }
            base += index * strides[axis];
        }

        let out_shape: Vec<usize> = displayed.iter().map(|&axis| self.shape[axis]).collect();
        let out_strides: Vec<usize> = displayed.iter().map(|&axis| strides[axis]).collect();
        let total: usize = out_shape.iter().product();
        let size = self.dtype.size();
        let mut buf = BytesMut::with_capacity(total * size);

        if total > 0 {
            let mut index = vec![0usize; out_shape.len()];
            loop {
                let offset = base
                    + index
                        .iter()
                        .zip(&out_strides)
                        .map(|(i, stride)| i * stride)
                        .sum::<usize>();
                let start = offset * size;
                buf.extend_from_slice(&self.bytes[start..start + size]);
                if !advance(&mut index, &out_shape) {
                    break;
                }
            }
        }

        Ok(Self {
            dtype: self.dtype,
            shape: out_shape,
            bytes: buf.freeze(),
        })
    }

    /// Nearest-neighbour downsampling by an integer factor per axis.
    ///
    /// The output length along each axis is `ceil(len / factor)`.
    pub fn downsample(&self, factors: &[usize]) -> Result<Self, SourceError> {
        if factors.len() != self.shape.len() || factors.contains(&0) {
            return Err(SourceError::InvalidIndex(format!(
                "downsample factors {:?} do not fit shape {:?}",
                factors, self.shape
            )));
        }

        let strides = c_strides(&self.shape);
        let out_shape: Vec<usize> = self
            .shape
            .iter()
            .zip(factors)
            .map(|(len, factor)| len.div_ceil(*factor))
            .collect();
        let total: usize = out_shape.iter().product();
        let size = self.dtype.size();
        let mut buf = BytesMut::with_capacity(total * size);

        if total > 0 {
            let mut index = vec![0usize; out_shape.len()];
            loop {
                let offset: usize = index
                    .iter()
                    .zip(factors)
                    .zip(&strides)
                    .map(|((i, factor), stride)| i * factor * stride)
                    .sum();
                let start = offset * size;
                buf.extend_from_slice(&self.bytes[start..start + size]);
                if !advance(&mut index, &out_shape) {
                    break;
                }
            }
        }

        Ok(Self {
            dtype: self.dtype,
            shape: out_shape,
            bytes: buf.freeze(),
        })
    }
}
