use crate::array::ArrayValue;
use crate::codec::{decode_array, encode_array, put_u64, ByteReader};
use crate::error::{TableError, TableResult};
use crate::types::DataType;

/// Side store for variable-shape array cells.
///
/// A cell refers to its array through a slot number; slot 0 means "undefined". Re-setting a
/// slot with an array of the same shape overwrites it in place, anything else takes a new slot.
/// Slots released by the storage manager are handed out again before the heap grows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArrayHeap {
    slots: Vec<Option<ArrayValue>>,
    free: Vec<u64>,
}

impl ArrayHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, released ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots holding an array.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn index(slot: u64) -> Option<usize> {
        usize::try_from(slot).ok()?.checked_sub(1)
    }

    pub fn get(&self, slot: u64) -> Option<&ArrayValue> {
        self.slots.get(Self::index(slot)?)?.as_ref()
    }

    /// Stores `array` in a released slot, or a fresh one.
    pub fn allocate(&mut self, array: ArrayValue) -> u64 {
        while let Some(slot) = self.free.pop() {
            if let Some(entry) = Self::index(slot).and_then(|i| self.slots.get_mut(i)) {
                *entry = Some(array);
                return slot;
            }
        }
        self.slots.push(Some(array));
        self.slots.len() as u64
    }

    /// Stores `array` for the cell that currently owns `slot`, returning the slot to use.
    pub fn replace(&mut self, slot: u64, array: ArrayValue) -> u64 {
        let reusable = Self::index(slot).filter(|&i| {
            self.slots
                .get(i)
                .and_then(Option::as_ref)
                .is_some_and(|old| old.shape() == array.shape())
        });
        match reusable {
            Some(index) => {
                self.slots[index] = Some(array);
                slot
            }
            None => self.allocate(array),
        }
    }

    /// Drops the array in `slot` so the slot can be reused; unknown or free slots are ignored.
    pub fn release(&mut self, slot: u64) {
        if let Some(entry) = Self::index(slot).and_then(|i| self.slots.get_mut(i)) {
            if entry.take().is_some() {
                self.free.push(slot);
            }
        }
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> TableResult<()> {
        put_u64(buf, self.slots.len() as u64);
        for slot in &self.slots {
            match slot {
                Some(array) => {
                    buf.push(1);
                    encode_array(array, buf)?;
                }
                None => buf.push(0),
            }
        }
        Ok(())
    }

    pub(crate) fn read(data_type: DataType, reader: &mut ByteReader<'_>) -> TableResult<Self> {
        let count = reader.read_len()?;
        if count > reader.remaining() {
            return Err(TableError::Corrupt(format!("array heap claims {count} slots")));
        }
        let mut heap = Self {
            slots: Vec::with_capacity(count),
            free: Vec::new(),
        };
        for index in 0..count {
            if reader.read_u8()? == 0 {
                heap.slots.push(None);
                heap.free.push(index as u64 + 1);
            } else {
                heap.slots.push(Some(decode_array(data_type, reader)?));
            }
        }
        Ok(heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{ArrayData, Shape};

    fn ints(values: Vec<i32>) -> ArrayValue {
        ArrayValue::vector(ArrayData::Int32(values))
    }

    #[test]
    fn same_shape_reuses_slot() {
        let mut heap = ArrayHeap::new();
        let slot = heap.allocate(ints(vec![1, 2]));
        assert_eq!(heap.replace(slot, ints(vec![3, 4])), slot);
        assert_eq!(heap.len(), 1);

        let grown = heap.replace(slot, ints(vec![5, 6, 7]));
        assert_ne!(grown, slot);
        assert_eq!(heap.get(grown).map(|a| a.shape().clone()), Some(Shape::vector(3)));
        assert_eq!(heap.get(0), None);
    }

    #[test]
    fn released_slots_are_reused() {
        let mut heap = ArrayHeap::new();
        let first = heap.allocate(ints(vec![1]));
        let second = heap.allocate(ints(vec![2, 3]));
        heap.release(first);
        heap.release(first);
        assert_eq!(heap.get(first), None);
        assert_eq!(heap.live(), 1);

        assert_eq!(heap.allocate(ints(vec![4, 5, 6])), first);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.get(second).map(|a| a.shape().clone()), Some(Shape::vector(2)));
    }
}
