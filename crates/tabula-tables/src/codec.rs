use crate::array::{ArrayData, ArrayValue, Shape};
use crate::error::{TableError, TableResult};
use crate::storage::Cell;
use crate::types::{DataType, Scalar};
use num_complex::{Complex32, Complex64};

/// Cursor over a little-endian byte buffer; every read checks the remaining length.
#[derive(Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

macro_rules! read_le {
    ($($name:ident -> $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> TableResult<$ty> {
                let bytes = self.read_bytes(std::mem::size_of::<$ty>())?;
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                Ok(<$ty>::from_le_bytes(buf))
            }
        )*
    };
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> TableResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                TableError::Corrupt(format!(
                    "need {len} bytes at offset {}, only {} left",
                    self.pos,
                    self.remaining()
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> TableResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    read_le!(
        read_i8 -> i8,
        read_u16 -> u16,
        read_i16 -> i16,
        read_u32 -> u32,
        read_i32 -> i32,
        read_u64 -> u64,
        read_i64 -> i64,
        read_f32 -> f32,
        read_f64 -> f64,
    );

    pub fn read_string(&mut self) -> TableResult<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TableError::Corrupt("string is not valid utf-8".to_string()))
    }

    pub fn read_len(&mut self) -> TableResult<usize> {
        usize::try_from(self.read_u64()?)
            .map_err(|_| TableError::Corrupt("length does not fit in memory".to_string()))
    }

    /// Reads `len` bytes and checks they spell `magic`.
    pub fn expect_magic(&mut self, magic: &[u8]) -> TableResult<()> {
        let found = self.read_bytes(magic.len())?;
        if found != magic {
            return Err(TableError::Corrupt(format!(
                "bad magic {:?}, expected {:?}",
                String::from_utf8_lossy(found),
                String::from_utf8_lossy(magic)
            )));
        }
        Ok(())
    }
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_string(buf: &mut Vec<u8>, value: &str) -> TableResult<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| TableError::Invalid(format!("string of {} bytes too large", value.len())))?;
    put_u32(buf, len);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn write_u32_at(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Some(u32::from_le_bytes(raw))
}

/// Appends the fixed-width (or length-prefixed, for strings) encoding of one value.
pub fn encode_scalar(value: &Scalar, buf: &mut Vec<u8>) -> TableResult<()> {
    match value {
        Scalar::Bool(v) => buf.push(u8::from(*v)),
        Scalar::UInt8(v) => buf.push(*v),
        Scalar::Int8(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::Int16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::UInt16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::UInt32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::UInt64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Scalar::Complex(v) => {
            buf.extend_from_slice(&v.re.to_le_bytes());
            buf.extend_from_slice(&v.im.to_le_bytes());
        }
        Scalar::DComplex(v) => {
            buf.extend_from_slice(&v.re.to_le_bytes());
            buf.extend_from_slice(&v.im.to_le_bytes());
        }
        Scalar::String(v) => put_string(buf, v)?,
    }
    Ok(())
}

pub fn decode_scalar(data_type: DataType, reader: &mut ByteReader<'_>) -> TableResult<Scalar> {
    let value = match data_type {
        DataType::Bool => match reader.read_u8()? {
            0 => Scalar::Bool(false),
            1 => Scalar::Bool(true),
            other => return Err(TableError::Corrupt(format!("invalid bool byte {other}"))),
        },
        DataType::UInt8 => Scalar::UInt8(reader.read_u8()?),
        DataType::Int8 => Scalar::Int8(reader.read_i8()?),
        DataType::Int16 => Scalar::Int16(reader.read_i16()?),
        DataType::UInt16 => Scalar::UInt16(reader.read_u16()?),
        DataType::Int32 => Scalar::Int32(reader.read_i32()?),
        DataType::UInt32 => Scalar::UInt32(reader.read_u32()?),
        DataType::Int64 => Scalar::Int64(reader.read_i64()?),
        DataType::UInt64 => Scalar::UInt64(reader.read_u64()?),
        DataType::Float => Scalar::Float(reader.read_f32()?),
        DataType::Double => Scalar::Double(reader.read_f64()?),
        DataType::Complex => {
            let re = reader.read_f32()?;
            let im = reader.read_f32()?;
            Scalar::Complex(Complex32::new(re, im))
        }
        DataType::DComplex => {
            let re = reader.read_f64()?;
            let im = reader.read_f64()?;
            Scalar::DComplex(Complex64::new(re, im))
        }
        DataType::String => Scalar::String(reader.read_string()?),
    };
    Ok(value)
}

/// Packed elements only; the shape is known by the caller.
pub(crate) fn encode_array_data(data: &ArrayData, buf: &mut Vec<u8>) -> TableResult<()> {
    for value in data.iter() {
        encode_scalar(&value, buf)?;
    }
    Ok(())
}

pub(crate) fn decode_array_data(
    data_type: DataType,
    len: usize,
    reader: &mut ByteReader<'_>,
) -> TableResult<ArrayData> {
    let mut data = ArrayData::empty(data_type);
    for _ in 0..len {
        data.push(decode_scalar(data_type, reader)?)?;
    }
    Ok(data)
}

pub(crate) fn encode_shape(shape: &Shape, buf: &mut Vec<u8>) {
    put_u32(buf, shape.ndim() as u32);
    for &dim in shape.dims() {
        put_u64(buf, dim as u64);
    }
}

pub(crate) fn decode_shape(reader: &mut ByteReader<'_>) -> TableResult<Shape> {
    let ndim = reader.read_u32()? as usize;
    if ndim > reader.remaining() / 8 {
        return Err(TableError::Corrupt(format!("implausible array rank {ndim}")));
    }
    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        dims.push(reader.read_len()?);
    }
    Ok(Shape(dims))
}

/// `ndim`, the dimensions, then the packed elements.
pub(crate) fn encode_array(array: &ArrayValue, buf: &mut Vec<u8>) -> TableResult<()> {
    encode_shape(array.shape(), buf);
    encode_array_data(array.data(), buf)
}

pub(crate) fn decode_array(
    data_type: DataType,
    reader: &mut ByteReader<'_>,
) -> TableResult<ArrayValue> {
    let shape = decode_shape(reader)?;
    let data = decode_array_data(data_type, shape.nelements(), reader)?;
    ArrayValue::new(shape, data)
}

const CELL_UNDEFINED: u8 = 0;
const CELL_SCALAR: u8 = 1;
const CELL_ARRAY: u8 = 2;

pub(crate) fn encode_cell(cell: &Cell, buf: &mut Vec<u8>) -> TableResult<()> {
    match cell {
        Cell::Undefined => buf.push(CELL_UNDEFINED),
        Cell::Scalar(value) => {
            buf.push(CELL_SCALAR);
            encode_scalar(value, buf)?;
        }
        Cell::Array(array) => {
            buf.push(CELL_ARRAY);
            encode_array(array, buf)?;
        }
    }
    Ok(())
}

pub(crate) fn decode_cell(data_type: DataType, reader: &mut ByteReader<'_>) -> TableResult<Cell> {
    match reader.read_u8()? {
        CELL_UNDEFINED => Ok(Cell::Undefined),
        CELL_SCALAR => Ok(Cell::Scalar(decode_scalar(data_type, reader)?)),
        CELL_ARRAY => Ok(Cell::Array(decode_array(data_type, reader)?)),
        tag => Err(TableError::Corrupt(format!("unknown cell tag {tag}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_input_is_corrupt() {
        let mut buf = Vec::new();
        encode_scalar(&Scalar::String("hello".into()), &mut buf).unwrap();
        buf.truncate(6);
        let err = decode_scalar(DataType::String, &mut ByteReader::new(&buf)).unwrap_err();
        assert!(matches!(err, TableError::Corrupt(_)));
    }

    #[test]
    fn cells_decode_to_what_was_encoded() {
        let array = ArrayValue::new(
            Shape::new(vec![2, 2]),
            ArrayData::Double(vec![1.0, 2.0, 3.0, 4.0]),
        )
        .unwrap();
        let mut buf = Vec::new();
        encode_cell(&Cell::Array(array.clone()), &mut buf).unwrap();
        encode_cell(&Cell::Undefined, &mut buf).unwrap();
        let mut reader = ByteReader::new(&buf);
        assert_eq!(decode_cell(DataType::Double, &mut reader).unwrap(), Cell::Array(array));
        assert_eq!(decode_cell(DataType::Double, &mut reader).unwrap(), Cell::Undefined);
        assert_eq!(reader.remaining(), 0);
    }
}
