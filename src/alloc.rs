//! GPU buffer allocation contract.
//!
//! Components that need GPU memory take a [`BufferAllocator`] instead of a
//! device so the layout and build logic can run against an in-memory fake.

use crate::error::Result;

/// Required alignment of constant buffer views and root constant buffer
/// addresses.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    /// GPU local memory.
    Default,
    /// CPU writable, GPU readable.
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Common,
    UnorderedAccess,
    AccelerationStructure,
    GenericRead,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub heap: HeapKind,
    pub state: ResourceState,
    pub unordered_access: bool,
}

impl<'a> BufferDesc<'a> {
    /// Build-time workspace for an acceleration structure.
    pub fn scratch(name: &'a str, size: u64, state: ResourceState) -> Self {
        Self {
            name,
            size,
            heap: HeapKind::Default,
            state,
            unordered_access: true,
        }
    }

    pub fn acceleration_structure(name: &'a str, size: u64) -> Self {
        Self {
            name,
            size,
            heap: HeapKind::Default,
            state: ResourceState::AccelerationStructure,
            unordered_access: true,
        }
    }

    pub fn upload(name: &'a str, size: u64) -> Self {
        Self {
            name,
            size,
            heap: HeapKind::Upload,
            state: ResourceState::GenericRead,
            unordered_access: false,
        }
    }
}

pub trait GpuBuffer {
    fn gpu_address(&self) -> u64;

    fn size(&self) -> u64;

    /// Copies `data` at `offset`, mapping the buffer only for the duration
    /// of the copy.
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;
}

pub trait BufferAllocator {
    type Buffer: GpuBuffer;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer>;

    /// Upload heap buffer initialized with `data`.
    fn upload(&self, name: &str, data: &[u8]) -> Result<Self::Buffer> {
        let buffer = self.create_buffer(
            &BufferDesc::upload(name, data.len() as u64))?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Upload heap buffer padded to hold a constant buffer view.
    fn upload_constants(&self, name: &str, data: &[u8]) -> Result<Self::Buffer> {
        let size = align_up(data.len() as u64, CONSTANT_BUFFER_ALIGNMENT);
        let buffer = self.create_buffer(&BufferDesc::upload(name, size))?;
        buffer.write(0, data)?;
        Ok(buffer)
    }
}
