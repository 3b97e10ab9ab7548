use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::error::StoreError;
use super::metadata::{DataType, FillValue};

/// Compound record of two single-precision floats
///
/// This is the element type of vendor filter-coefficient arrays. It is
/// stored as an Arrow struct with exactly the fields `real` and `imag`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Complex64 {
    /// Real part
    pub real: f32,
    /// Imaginary part
    pub imag: f32,
}

impl Complex64 {
    /// Create a new complex value
    pub fn new(real: f32, imag: f32) -> Self {
        Self { real, imag }
    }
}

/// Flat, row-major element buffer of one block of an array
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// 64-bit floats
    Float64(Vec<f64>),
    /// 64-bit integers
    Int64(Vec<i64>),
    /// Strings
    Utf8(Vec<String>),
    /// Compound complex records
    Complex64(Vec<Complex64>),
}

impl ArrayData {
    /// Empty buffer of the given type
    pub fn empty(dtype: DataType) -> Self {
        Self::with_capacity(dtype, 0)
    }

    /// Empty buffer of the given type with reserved capacity
    pub fn with_capacity(dtype: DataType, capacity: usize) -> Self {
        match dtype {
            DataType::Float64 => ArrayData::Float64(Vec::with_capacity(capacity)),
            DataType::Int64 => ArrayData::Int64(Vec::with_capacity(capacity)),
            DataType::Utf8 => ArrayData::Utf8(Vec::with_capacity(capacity)),
            DataType::Complex64 => ArrayData::Complex64(Vec::with_capacity(capacity)),
        }
    }

    /// Buffer of `len` copies of the fill value
    pub fn filled(dtype: DataType, fill: &FillValue, len: usize) -> Self {
        match dtype {
            DataType::Float64 => {
                let value = match fill {
                    FillValue::Nan => f64::NAN,
                    FillValue::Int(v) => *v as f64,
                    _ => 0.0,
                };
                ArrayData::Float64(vec![value; len])
            }
            DataType::Int64 => {
                let value = match fill {
                    FillValue::Int(v) => *v,
                    _ => 0,
                };
                ArrayData::Int64(vec![value; len])
            }
            DataType::Utf8 => {
                let value = match fill {
                    FillValue::Text(s) => s.clone(),
                    _ => String::new(),
                };
                ArrayData::Utf8(vec![value; len])
            }
            DataType::Complex64 => ArrayData::Complex64(vec![Complex64::default(); len]),
        }
    }

    /// Element type of this buffer
    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::Float64(_) => DataType::Float64,
            ArrayData::Int64(_) => DataType::Int64,
            ArrayData::Utf8(_) => DataType::Utf8,
            ArrayData::Complex64(_) => DataType::Complex64,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Float64(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Utf8(v) => v.len(),
            ArrayData::Complex64(v) => v.len(),
        }
    }

    /// Returns true if the buffer holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Float elements, if this is a `Float64` buffer
    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            ArrayData::Float64(v) => Some(v),
            _ => None,
        }
    }

    /// Integer elements, if this is an `Int64` buffer
    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            ArrayData::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// String elements, if this is a `Utf8` buffer
    pub fn as_utf8(&self) -> Option<&[String]> {
        match self {
            ArrayData::Utf8(v) => Some(v),
            _ => None,
        }
    }

    /// Complex elements, if this is a `Complex64` buffer
    pub fn as_complex64(&self) -> Option<&[Complex64]> {
        match self {
            ArrayData::Complex64(v) => Some(v),
            _ => None,
        }
    }

    /// Copy of the elements in `range`
    pub fn slice(&self, range: Range<usize>) -> ArrayData {
        match self {
            ArrayData::Float64(v) => ArrayData::Float64(v[range].to_vec()),
            ArrayData::Int64(v) => ArrayData::Int64(v[range].to_vec()),
            ArrayData::Utf8(v) => ArrayData::Utf8(v[range].to_vec()),
            ArrayData::Complex64(v) => ArrayData::Complex64(v[range].to_vec()),
        }
    }

    /// Append the elements of `other` in `range`
    pub fn extend_from(&mut self, other: &ArrayData, range: Range<usize>) -> Result<(), StoreError> {
        match (self, other) {
            (ArrayData::Float64(dst), ArrayData::Float64(src)) => dst.extend_from_slice(&src[range]),
            (ArrayData::Int64(dst), ArrayData::Int64(src)) => dst.extend_from_slice(&src[range]),
            (ArrayData::Utf8(dst), ArrayData::Utf8(src)) => dst.extend_from_slice(&src[range]),
            (ArrayData::Complex64(dst), ArrayData::Complex64(src)) => {
                dst.extend_from_slice(&src[range])
            }
            (dst, src) => return Err(type_mismatch(dst.dtype(), src.dtype())),
        }
        Ok(())
    }

    /// Overwrite elements starting at `offset` with the elements of `other` in `range`
    fn write_at(&mut self, offset: usize, other: &ArrayData, range: Range<usize>) -> Result<(), StoreError> {
        let end = offset + range.len();
        match (self, other) {
            (ArrayData::Float64(dst), ArrayData::Float64(src)) => {
                dst[offset..end].copy_from_slice(&src[range])
            }
            (ArrayData::Int64(dst), ArrayData::Int64(src)) => {
                dst[offset..end].copy_from_slice(&src[range])
            }
            (ArrayData::Utf8(dst), ArrayData::Utf8(src)) => {
                dst[offset..end].clone_from_slice(&src[range])
            }
            (ArrayData::Complex64(dst), ArrayData::Complex64(src)) => {
                dst[offset..end].copy_from_slice(&src[range])
            }
            (dst, src) => return Err(type_mismatch(dst.dtype(), src.dtype())),
        }
        Ok(())
    }

    /// Embed this block (of `shape`) at the origin of a larger block of `target` shape
    ///
    /// Axis 0 must agree; every other axis of `target` must be at least as
    /// large as in `shape`. Cells outside the source are set to `fill`.
    pub fn pad_to(&self, shape: &[u64], target: &[u64], fill: &FillValue) -> Result<ArrayData, StoreError> {
        let invalid = || {
            StoreError::InvalidFormat(format!("cannot pad block of shape {shape:?} to {target:?}"))
        };
        let expected: usize = shape.iter().product::<u64>() as usize;
        if expected != self.len() {
            return Err(StoreError::LengthMismatch {
                array: String::new(),
                expected,
                found: self.len(),
            });
        }
        if shape.len() != target.len() || shape.is_empty() || shape[0] != target[0] {
            return Err(invalid());
        }
        if shape.iter().zip(target).any(|(s, t)| s > t) {
            return Err(invalid());
        }
        if shape == target {
            return Ok(self.clone());
        }

        let rank = shape.len();
        let target_len: usize = target.iter().product::<u64>() as usize;
        let mut out = ArrayData::filled(self.dtype(), fill, target_len);

        let inner = shape[rank - 1] as usize;
        let target_inner = target[rank - 1] as usize;
        let outer: usize = shape[..rank - 1].iter().product::<u64>() as usize;
        let mut index = vec![0u64; rank - 1];

        for row in 0..outer {
            let mut offset = 0usize;
            for (axis, &i) in index.iter().enumerate() {
                offset = offset * target[axis] as usize + i as usize;
            }
            offset *= target_inner;

            let start = row * inner;
            out.write_at(offset, self, start..start + inner)?;

            for axis in (0..rank - 1).rev() {
                index[axis] += 1;
                if index[axis] < shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }

        Ok(out)
    }
}

fn type_mismatch(expected: DataType, found: DataType) -> StoreError {
    StoreError::DataTypeMismatch {
        array: String::new(),
        expected,
        found,
    }
}
