//! Descriptor heap bookkeeping.

use crate::error::{Error, Result};

/// Linear allocator over the slots of a descriptor heap.
///
/// Handles are derived from the heap start and the device specific
/// increment, never by bumping raw pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapCursor {
    cpu_start: usize,
    gpu_start: u64,
    increment: usize,
    capacity: usize,
    next: usize,
}

/// One allocated slot of a [`HeapCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSlot {
    pub index: usize,
    pub cpu: usize,
    pub gpu: u64,
}

impl HeapCursor {
    pub fn new(cpu_start: usize, gpu_start: u64, increment: usize,
               capacity: usize) -> Self {
        Self {
            cpu_start,
            gpu_start,
            increment,
            capacity,
            next: 0,
        }
    }

    pub fn alloc(&mut self) -> Result<DescriptorSlot> {
        if self.next >= self.capacity {
            return Err(Error::DescriptorHeapFull { capacity: self.capacity });
        }

        let slot = self.slot(self.next);
        self.next += 1;
        Ok(slot)
    }

    pub fn slot(&self, index: usize) -> DescriptorSlot {
        DescriptorSlot {
            index,
            cpu: self.cpu_start + index * self.increment,
            gpu: self.gpu_start + (index * self.increment) as u64,
        }
    }

    pub fn gpu_start(&self) -> u64 {
        self.gpu_start
    }
}

#[cfg(windows)]
pub use self::d3d12_heap::DescriptorHeap;

#[cfg(windows)]
mod d3d12_heap {
    use core::cell::Cell;

    use super::{DescriptorSlot, HeapCursor};
    use crate::d3d12::*;
    use crate::error::{ApiResult, Result};

    pub struct DescriptorHeap {
        pub heap: ID3D12DescriptorHeap,
        cursor: Cell<HeapCursor>,
    }

    impl DescriptorHeap {
        pub fn new(device: &ID3D12Device5, typ: D3D12_DESCRIPTOR_HEAP_TYPE,
                   count: usize, shader_visible: bool) -> Result<Self> {
            let heap: ID3D12DescriptorHeap = unsafe {
                device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    Type: typ,
                    NumDescriptors: count as u32,
                    Flags: if shader_visible {
                        D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                    } else {
                        D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                    },
                    ..Default::default()
                }).api("CreateDescriptorHeap")?
            };

            let (cpu_start, gpu_start, increment) = unsafe {
                let gpu_start = if shader_visible {
                    heap.GetGPUDescriptorHandleForHeapStart().ptr
                } else {
                    0
                };
                (heap.GetCPUDescriptorHandleForHeapStart().ptr,
                 gpu_start,
                 device.GetDescriptorHandleIncrementSize(typ) as usize)
            };

            Ok(Self {
                heap,
                cursor: Cell::new(HeapCursor::new(cpu_start, gpu_start,
                                                  increment, count)),
            })
        }

        pub fn alloc_descriptor(&self) -> Result<DescriptorSlot> {
            let mut cursor = self.cursor.get();
            let slot = cursor.alloc()?;
            self.cursor.set(cursor);
            Ok(slot)
        }

        pub fn gpu_start(&self) -> D3D12_GPU_DESCRIPTOR_HANDLE {
            D3D12_GPU_DESCRIPTOR_HANDLE { ptr: self.cursor.get().gpu_start() }
        }
    }

    impl DescriptorSlot {
        pub fn cpu_handle(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
            D3D12_CPU_DESCRIPTOR_HANDLE { ptr: self.cpu }
        }
    }
}
