use crate::error::{TableError, TableResult};
use crate::types::{DataType, Scalar};
use num_complex::{Complex32, Complex64};
use std::fmt;

/// Array shape, first axis varying fastest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn vector(len: usize) -> Self {
        Self(vec![len])
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of elements; an empty shape holds nothing.
    pub fn nelements(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.iter().product()
        }
    }

    /// Flat offset of a multi-dimensional index, `None` when out of bounds.
    pub fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.0.len() {
            return None;
        }
        let mut offset = 0usize;
        let mut step = 1usize;
        for (&i, &dim) in index.iter().zip(&self.0) {
            if i >= dim {
                return None;
            }
            offset += i * step;
            step *= dim;
        }
        Some(offset)
    }

    /// Inverse of [`Shape::offset`].
    pub fn index_of(&self, mut offset: usize) -> Vec<usize> {
        let mut index = Vec::with_capacity(self.0.len());
        for &dim in &self.0 {
            if dim == 0 {
                index.push(0);
                continue;
            }
            index.push(offset % dim);
            offset /= dim;
        }
        index
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

/// A strided section of an array: per axis `start..end` (end exclusive) with a stride.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slicer {
    pub start: Vec<usize>,
    pub end: Vec<usize>,
    pub stride: Vec<usize>,
}

impl Slicer {
    pub fn new(start: Vec<usize>, end: Vec<usize>, stride: Vec<usize>) -> Self {
        Self { start, end, stride }
    }

    /// Unit-stride section.
    pub fn range(start: Vec<usize>, end: Vec<usize>) -> Self {
        let stride = vec![1; start.len()];
        Self { start, end, stride }
    }

    pub fn full(shape: &Shape) -> Self {
        Self::range(vec![0; shape.ndim()], shape.0.clone())
    }

    /// Shape of the section when applied to an array of `shape`.
    pub fn result_shape(&self, shape: &Shape) -> TableResult<Shape> {
        let ndim = shape.ndim();
        if self.start.len() != ndim || self.end.len() != ndim || self.stride.len() != ndim {
            return Err(TableError::Conformance(format!(
                "slicer has {} axes, array {shape} has {ndim}",
                self.start.len()
            )));
        }
        let mut dims = Vec::with_capacity(ndim);
        for axis in 0..ndim {
            let (start, end, stride) = (self.start[axis], self.end[axis], self.stride[axis]);
            if stride == 0 || start > end || end > shape.0[axis] {
                return Err(TableError::Conformance(format!(
                    "slicer axis {axis} ({start}..{end} step {stride}) outside array {shape}"
                )));
            }
            dims.push((end - start).div_ceil(stride));
        }
        Ok(Shape(dims))
    }

    /// Flat offsets (into an array of `shape`) of every element in the section, in section order.
    pub fn offsets(&self, shape: &Shape) -> TableResult<Vec<usize>> {
        let section = self.result_shape(shape)?;
        let count = section.nelements();
        let mut offsets = Vec::with_capacity(count);
        for flat in 0..count {
            let local = section.index_of(flat);
            let mut offset = 0usize;
            let mut step = 1usize;
            for axis in 0..shape.ndim() {
                offset += (self.start[axis] + local[axis] * self.stride[axis]) * step;
                step *= shape.0[axis];
            }
            offsets.push(offset);
        }
        Ok(offsets)
    }
}

macro_rules! array_data {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Packed element storage of an array, one vector per element type.
        #[derive(Clone, Debug, PartialEq)]
        pub enum ArrayData {
            $($variant(Vec<$ty>),)*
        }

        impl ArrayData {
            pub fn empty(data_type: DataType) -> ArrayData {
                match data_type {
                    $(DataType::$variant => ArrayData::$variant(Vec::new()),)*
                }
            }

            pub fn filled(value: &Scalar, len: usize) -> ArrayData {
                match value {
                    $(Scalar::$variant(v) => ArrayData::$variant(vec![v.clone(); len]),)*
                }
            }

            pub fn data_type(&self) -> DataType {
                match self {
                    $(ArrayData::$variant(_) => DataType::$variant,)*
                }
            }

            pub fn len(&self) -> usize {
                match self {
                    $(ArrayData::$variant(v) => v.len(),)*
                }
            }

            pub fn get(&self, index: usize) -> Option<Scalar> {
                match self {
                    $(ArrayData::$variant(v) => v.get(index).cloned().map(Scalar::$variant),)*
                }
            }

            pub fn push(&mut self, value: Scalar) -> TableResult<()> {
                let to = self.data_type();
                let value = value.promote_to(to)?;
                match (self, value) {
                    $((ArrayData::$variant(v), Scalar::$variant(x)) => v.push(x),)*
                    (_, value) => {
                        return Err(TableError::InvalidPromotion { from: value.data_type(), to })
                    }
                }
                Ok(())
            }

            pub fn extend_from(&mut self, other: &ArrayData) -> TableResult<()> {
                match (self, other) {
                    $((ArrayData::$variant(v), ArrayData::$variant(o)) => v.extend_from_slice(o),)*
                    (this, other) => {
                        for value in other.iter() {
                            this.push(value)?;
                        }
                    }
                }
                Ok(())
            }

            /// Elements at the given flat offsets; callers pass in-bounds offsets.
            pub fn select(&self, offsets: &[usize]) -> ArrayData {
                match self {
                    $(ArrayData::$variant(v) => {
                        ArrayData::$variant(offsets.iter().map(|&i| v[i].clone()).collect())
                    })*
                }
            }

            /// Overwrites the elements at `offsets` with `values` (same length, same type).
            pub fn assign(&mut self, offsets: &[usize], values: &ArrayData) -> TableResult<()> {
                if offsets.len() != values.len() {
                    return Err(TableError::LengthMismatch {
                        expected: offsets.len() as u64,
                        actual: values.len() as u64,
                    });
                }
                let values = values.promote_to(self.data_type())?;
                match (self, &values) {
                    $((ArrayData::$variant(v), ArrayData::$variant(src)) => {
                        for (&i, x) in offsets.iter().zip(src) {
                            v[i] = x.clone();
                        }
                    })*
                    (this, values) => {
                        return Err(TableError::InvalidPromotion {
                            from: values.data_type(),
                            to: this.data_type(),
                        })
                    }
                }
                Ok(())
            }
        }
    };
}

array_data!(
    Bool(bool),
    UInt8(u8),
    Int8(i8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Complex(Complex32),
    DComplex(Complex64),
    String(String),
);

impl ArrayData {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Scalar> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    pub fn from_scalars(data_type: DataType, values: Vec<Scalar>) -> TableResult<ArrayData> {
        let mut data = ArrayData::empty(data_type);
        for value in values {
            data.push(value)?;
        }
        Ok(data)
    }

    pub fn promote_to(&self, to: DataType) -> TableResult<ArrayData> {
        if self.data_type() == to {
            return Ok(self.clone());
        }
        if !self.data_type().can_promote_to(to) {
            return Err(TableError::InvalidPromotion {
                from: self.data_type(),
                to,
            });
        }
        ArrayData::from_scalars(to, self.iter().collect())
    }
}

/// An N-dimensional array value with its shape.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayValue {
    shape: Shape,
    data: ArrayData,
}

impl ArrayValue {
    pub fn new(shape: Shape, data: ArrayData) -> TableResult<Self> {
        if shape.nelements() != data.len() {
            return Err(TableError::Conformance(format!(
                "shape {shape} needs {} elements, got {}",
                shape.nelements(),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array over `data`.
    pub fn vector(data: ArrayData) -> Self {
        Self {
            shape: Shape::vector(data.len()),
            data,
        }
    }

    pub fn filled(shape: Shape, value: &Scalar) -> Self {
        let data = ArrayData::filled(value, shape.nelements());
        Self { shape, data }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn nelements(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self, index: &[usize]) -> TableResult<Scalar> {
        self.shape
            .offset(index)
            .and_then(|offset| self.data.get(offset))
            .ok_or_else(|| {
                TableError::Conformance(format!("index {index:?} outside array {}", self.shape))
            })
    }

    pub fn slice(&self, slicer: &Slicer) -> TableResult<ArrayValue> {
        let shape = slicer.result_shape(&self.shape)?;
        let offsets = slicer.offsets(&self.shape)?;
        Ok(ArrayValue {
            shape,
            data: self.data.select(&offsets),
        })
    }

    /// Writes `values` into the section; the section shape must match exactly.
    pub fn put_slice(&mut self, slicer: &Slicer, values: &ArrayValue) -> TableResult<()> {
        let shape = slicer.result_shape(&self.shape)?;
        if shape != values.shape {
            return Err(TableError::Conformance(format!(
                "section shape {shape} differs from value shape {}",
                values.shape
            )));
        }
        let offsets = slicer.offsets(&self.shape)?;
        self.data.assign(&offsets, &values.data)
    }

    pub fn promote_to(&self, to: DataType) -> TableResult<ArrayValue> {
        Ok(ArrayValue {
            shape: self.shape.clone(),
            data: self.data.promote_to(to)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fortran_order_offsets() {
        let shape = Shape::new(vec![2, 3]);
        assert_eq!(shape.offset(&[1, 0]), Some(1));
        assert_eq!(shape.offset(&[0, 1]), Some(2));
        assert_eq!(shape.offset(&[1, 2]), Some(5));
        assert_eq!(shape.offset(&[2, 0]), None);
        assert_eq!(shape.index_of(5), vec![1, 2]);
    }

    #[test]
    fn strided_slice() {
        let data = ArrayData::Int32((0..12).collect());
        let array = ArrayValue::new(Shape::new(vec![4, 3]), data).unwrap();
        let slicer = Slicer::new(vec![0, 1], vec![4, 3], vec![2, 1]);
        let section = array.slice(&slicer).unwrap();
        assert_eq!(section.shape(), &Shape::new(vec![2, 2]));
        assert_eq!(section.data(), &ArrayData::Int32(vec![4, 6, 8, 10]));
    }
}
