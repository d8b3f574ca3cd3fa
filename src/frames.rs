use crate::error::{Error, Result};

/// Fixed number of per-frame resources indexed by frame slot.
#[derive(Debug)]
pub struct FrameSlots<T> {
    slots: Vec<T>,
}

impl<T> FrameSlots<T> {
    pub fn new<F>(count: usize, mut create: F) -> Result<Self>
        where F: FnMut(usize) -> Result<T> {
        let slots = (0..count).map(|i| create(i)).collect::<Result<Vec<_>>>()?;
        Ok(Self { slots })
    }

    pub fn get(&self, index: usize) -> Result<&T> {
        self.slots.get(index).ok_or(Error::FrameSlotOutOfRange {
            index,
            count: self.slots.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}
