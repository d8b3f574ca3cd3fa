//! In-memory stand-ins for the GPU used by unit tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::accel::{AccelerationStructureBackend, BuildCommand, BuildInputs,
                   PrebuildInfo};
use crate::alloc::{align_up, BufferAllocator, BufferDesc, GpuBuffer, HeapKind,
                   ResourceState};
use crate::error::{Error, Result};

/// Committed resources are placed on 64KiB boundaries.
const PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FakeBuffer {
    name: String,
    address: u64,
    data: Rc<RefCell<Vec<u8>>>,
}

impl FakeBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

impl GpuBuffer for FakeBuffer {
    fn gpu_address(&self) -> u64 {
        self.address
    }

    fn size(&self) -> u64 {
        self.data.borrow().len() as u64
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut contents = self.data.borrow_mut();
        let end = offset as usize + data.len();
        if end > contents.len() {
            return Err(Error::BufferOverflow {
                name: self.name.clone(),
                offset,
                len: data.len(),
                size: contents.len() as u64,
            });
        }
        contents[offset as usize..end].copy_from_slice(data);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedBuffer {
    pub name: String,
    pub size: u64,
    pub heap: HeapKind,
    pub state: ResourceState,
    pub unordered_access: bool,
    pub address: u64,
}

/// Records every buffer and build command instead of talking to a device.
pub struct FakeDevice {
    next_address: Cell<u64>,
    created: RefCell<Vec<CreatedBuffer>>,
    builds: RefCell<Vec<BuildCommand>>,
    barriers: RefCell<Vec<u64>>,
    fail_allocation_of: Option<String>,
    raytracing: bool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            next_address: Cell::new(0x1_0000_0000),
            created: RefCell::new(Vec::new()),
            builds: RefCell::new(Vec::new()),
            barriers: RefCell::new(Vec::new()),
            fail_allocation_of: None,
            raytracing: true,
        }
    }

    /// Fails every allocation whose name is `name`.
    pub fn failing_allocation(name: &str) -> Self {
        Self {
            fail_allocation_of: Some(name.to_string()),
            ..Self::new()
        }
    }

    pub fn without_raytracing() -> Self {
        Self {
            raytracing: false,
            ..Self::new()
        }
    }

    pub fn created(&self) -> Vec<CreatedBuffer> {
        self.created.borrow().clone()
    }

    pub fn created_named(&self, name: &str) -> Option<CreatedBuffer> {
        self.created.borrow().iter().find(|b| b.name == name).cloned()
    }

    pub fn builds(&self) -> Vec<BuildCommand> {
        self.builds.borrow().clone()
    }

    pub fn barriers(&self) -> Vec<u64> {
        self.barriers.borrow().clone()
    }
}

impl BufferAllocator for FakeDevice {
    type Buffer = FakeBuffer;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<FakeBuffer> {
        if self.fail_allocation_of.as_deref() == Some(desc.name) {
            return Err(Error::Allocation {
                name: desc.name.to_string(),
                size: desc.size,
            });
        }

        let address = self.next_address.get();
        let footprint = align_up(desc.size.max(1), PLACEMENT_ALIGNMENT);
        self.next_address.set(address + footprint);

        self.created.borrow_mut().push(CreatedBuffer {
            name: desc.name.to_string(),
            size: desc.size,
            heap: desc.heap,
            state: desc.state,
            unordered_access: desc.unordered_access,
            address,
        });

        Ok(FakeBuffer {
            name: desc.name.to_string(),
            address,
            data: Rc::new(RefCell::new(vec![0; desc.size as usize])),
        })
    }
}

impl AccelerationStructureBackend for FakeDevice {
    fn prebuild_info(&self, inputs: &BuildInputs) -> Result<PrebuildInfo> {
        if !self.raytracing {
            return Err(Error::CapabilityMissing("fake device".into()));
        }

        // Deliberately unaligned so callers have to round.
        Ok(match inputs {
            BuildInputs::Triangles(g) => PrebuildInfo {
                scratch_size: 1000 + g.index_count as u64 * 4,
                result_size: 2000 + g.vertex_count as u64 * 8,
            },
            BuildInputs::Instances { count, .. } => PrebuildInfo {
                scratch_size: 300 + *count as u64 * 64,
                result_size: 500 + *count as u64 * 128,
            },
        })
    }

    fn record_build(&self, build: &BuildCommand) {
        self.builds.borrow_mut().push(build.clone());
    }

    fn record_uav_barrier(&self, buffer: &FakeBuffer) {
        self.barriers.borrow_mut().push(buffer.gpu_address());
    }
}
