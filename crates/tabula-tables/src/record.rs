use crate::array::ArrayValue;
use crate::codec::{decode_array, decode_scalar, encode_array, encode_scalar, put_string, put_u32, ByteReader};
use crate::error::{TableError, TableResult};
use crate::types::{DataType, Scalar};

/// Ordered, named collection of typed values; used for table and column keywords and as the
/// row source of record expressions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, RecordField)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordField {
    Scalar(Scalar),
    Array(ArrayValue),
    Record(Record),
}

impl RecordField {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            RecordField::Scalar(value) => Some(value.data_type()),
            RecordField::Array(array) => Some(array.data_type()),
            RecordField::Record(_) => None,
        }
    }
}

impl From<Scalar> for RecordField {
    fn from(value: Scalar) -> Self {
        RecordField::Scalar(value)
    }
}

impl From<ArrayValue> for RecordField {
    fn from(value: ArrayValue) -> Self {
        RecordField::Array(value)
    }
}

impl From<Record> for RecordField {
    fn from(value: Record) -> Self {
        RecordField::Record(value)
    }
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecordField)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&RecordField> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RecordField> {
        self.fields
            .iter_mut()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Looks up a dotted path such as `sub.field` through nested records.
    pub fn get_path(&self, path: &str) -> Option<&RecordField> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            match current {
                RecordField::Record(record) => current = record.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Sets a field, replacing an existing one of the same name in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<RecordField>) {
        let name = name.into();
        let value = value.into();
        match self.get_mut(&name) {
            Some(slot) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<RecordField> {
        let index = self.fields.iter().position(|(field, _)| field == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> TableResult<()> {
        if self.contains(new) {
            return Err(TableError::DuplicateColumn(new.to_string()));
        }
        let entry = self
            .fields
            .iter_mut()
            .find(|(field, _)| field == old)
            .ok_or_else(|| TableError::UnknownColumn(old.to_string()))?;
        entry.0 = new.to_string();
        Ok(())
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> TableResult<()> {
        put_u32(buf, self.fields.len() as u32);
        for (name, field) in &self.fields {
            put_string(buf, name)?;
            match field {
                RecordField::Scalar(value) => {
                    buf.push(1);
                    buf.push(value.data_type().code());
                    encode_scalar(value, buf)?;
                }
                RecordField::Array(array) => {
                    buf.push(2);
                    buf.push(array.data_type().code());
                    encode_array(array, buf)?;
                }
                RecordField::Record(record) => {
                    buf.push(3);
                    record.encode(buf)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> TableResult<Record> {
        let count = reader.read_u32()? as usize;
        let mut record = Record::new();
        for _ in 0..count {
            let name = reader.read_string()?;
            let field = match reader.read_u8()? {
                1 => {
                    let data_type = DataType::from_code(reader.read_u8()?)?;
                    RecordField::Scalar(decode_scalar(data_type, reader)?)
                }
                2 => {
                    let data_type = DataType::from_code(reader.read_u8()?)?;
                    RecordField::Array(decode_array(data_type, reader)?)
                }
                3 => RecordField::Record(Record::decode(reader)?),
                tag => return Err(TableError::Corrupt(format!("unknown record field tag {tag}"))),
            };
            record.fields.push((name, field));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_paths_and_encoding() {
        let mut inner = Record::new();
        inner.set("unit", Scalar::from("Hz"));
        let mut record = Record::new();
        record.set("version", Scalar::Int32(2));
        record.set("meta", inner);
        assert_eq!(
            record.get_path("meta.unit"),
            Some(&RecordField::Scalar(Scalar::from("Hz")))
        );
        assert_eq!(record.get_path("version.x"), None);

        let mut buf = Vec::new();
        record.encode(&mut buf).unwrap();
        let decoded = Record::decode(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(decoded, record);
    }
}
