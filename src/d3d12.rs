use windows::core::{Interface, PCSTR};
use windows::Win32::Foundation::{HANDLE, BOOL, CloseHandle};
use windows::Win32::System::{
    Threading::{WaitForSingleObjectEx, CreateEventA},
    WindowsProgramming::INFINITE
};

use core::ptr::{null, null_mut};
use core::ffi::c_void;
use core::cell::Cell;
use core::mem::size_of;

use log::{info, warn};

pub use windows::Win32::Graphics::{
    Direct3D::*,
    Direct3D12::*,
    Dxgi::*,
    Dxgi::Common::*,
};

use crate::accel::{AccelerationStructureBackend, BuildCommand, BuildInputs,
                   PrebuildInfo};
use crate::alloc::{BufferAllocator, BufferDesc, GpuBuffer, HeapKind,
                   ResourceState};
use crate::config::Config;
use crate::error::{ApiResult, Error, Result};
use crate::frames::FrameSlots;
use crate::win32::Window;

pub const BACKBUFFER_COUNT: usize = 2;

/// Committed buffer resource.
pub struct Buffer {
    pub resource: ID3D12Resource,
    name: String,
    size: u64,
}

impl GpuBuffer for Buffer {
    fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            return Err(Error::BufferOverflow {
                name: self.name.clone(),
                offset,
                len: data.len(),
                size: self.size,
            });
        }

        unsafe {
            // Nothing is read back on the CPU.
            let read_range = D3D12_RANGE { Begin: 0, End: 0 };
            let mut ptr: *mut c_void = null_mut();
            self.resource.Map(0, &read_range, &mut ptr).api("Map")?;

            let map = core::slice::from_raw_parts_mut(ptr as *mut u8,
                                                      self.size as usize);
            map[offset as usize..offset as usize + data.len()]
                .copy_from_slice(data);

            self.resource.Unmap(0, null());
        }

        Ok(())
    }
}

pub struct Context {
    pub device: ID3D12Device5,
    command_queue: ID3D12CommandQueue,
    swapchain: IDXGISwapChain3,
    render_targets: FrameSlots<ID3D12Resource>,
    command_allocator: ID3D12CommandAllocator,
    pub command_list: ID3D12GraphicsCommandList4,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    fence_value: Cell<u64>,
    vsync: bool,
}

fn adapter_name(desc: &DXGI_ADAPTER_DESC1) -> String {
    let len = desc.Description.iter()
        .position(|c| *c == 0)
        .unwrap_or(desc.Description.len());
    String::from_utf16_lossy(&desc.Description[..len])
}

fn create_device(factory: &IDXGIFactory6, use_warp: bool)
    -> Result<ID3D12Device5> {

    let adapters: Vec<IDXGIAdapter1> = if use_warp {
        vec![unsafe {
            factory.EnumWarpAdapter::<IDXGIAdapter1>().api("EnumWarpAdapter")?
        }]
    } else {
        (0..).map_while(|i| unsafe { factory.EnumAdapters1(i) }.ok()).collect()
    };

    for adapter in adapters {
        let desc = unsafe { adapter.GetDesc1().api("GetDesc1")? };
        let software = desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0;
        if software && !use_warp {
            continue;
        }

        let mut device: Option<ID3D12Device5> = None;
        let created = unsafe {
            D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_12_1, &mut device)
        };
        if let (Ok(()), Some(device)) = (created, device) {
            info!("Using adapter {}", adapter_name(&desc));
            return Ok(device);
        }
    }

    Err(Error::CapabilityMissing(
        "no adapter supports feature level 12.1".into()))
}

fn check_raytracing_support(device: &ID3D12Device5) -> Result<()> {
    let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS5::default();
    unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_D3D12_OPTIONS5,
            &mut options as *mut _ as *mut c_void,
            size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS5>() as u32)
            .api("CheckFeatureSupport")?;
    }

    if options.RaytracingTier.0 < D3D12_RAYTRACING_TIER_1_0.0 {
        return Err(Error::CapabilityMissing(
            "raytracing tier 1.0 is not available on this device".into()));
    }
    Ok(())
}

fn heap_type(heap: HeapKind) -> D3D12_HEAP_TYPE {
    match heap {
        HeapKind::Default => D3D12_HEAP_TYPE_DEFAULT,
        HeapKind::Upload => D3D12_HEAP_TYPE_UPLOAD,
    }
}

fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::AccelerationStructure =>
            D3D12_RESOURCE_STATE_RAYTRACING_ACCELERATION_STRUCTURE,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
    }
}

impl Context {
    pub fn init(window: &Window, config: &Config) -> Result<Self> {
        if config.debug_layer {
            let mut debug_interface: Option<ID3D12Debug> = None;
            let enabled = unsafe { D3D12GetDebugInterface(&mut debug_interface) };
            match (enabled, debug_interface) {
                (Ok(()), Some(debug)) => unsafe { debug.EnableDebugLayer() },
                _ => warn!("D3D12 debug layer is not available"),
            }
        }

        let factory: IDXGIFactory6 = unsafe {
            CreateDXGIFactory().api("CreateDXGIFactory")?
        };

        let device = create_device(&factory, config.use_warp)?;
        check_raytracing_support(&device)?;

        let command_queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            }).api("CreateCommandQueue")?
        };

        let swapchain_desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: BACKBUFFER_COUNT as u32,
            Width: window.width(),
            Height: window.height(),
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, ..Default::default() },
            ..Default::default()
        };
        let swapchain: IDXGISwapChain3 = unsafe {
            factory.CreateSwapChainForHwnd(&command_queue,
                                           window.handle,
                                           &swapchain_desc,
                                           null(),
                                           None)
                .api("CreateSwapChainForHwnd")?
        }.cast().api("IDXGISwapChain3")?;

        let render_targets = FrameSlots::new(BACKBUFFER_COUNT, |i| unsafe {
            swapchain.GetBuffer::<ID3D12Resource>(i as u32).api("GetBuffer")
        })?;

        let command_allocator: ID3D12CommandAllocator = unsafe {
            device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .api("CreateCommandAllocator")?
        };

        // Created open, setup commands are recorded right away.
        let command_list: ID3D12GraphicsCommandList4 = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT,
                                     &command_allocator, None)
                .api("CreateCommandList")?
        };

        let fence: ID3D12Fence = unsafe {
            device.CreateFence(0, D3D12_FENCE_FLAG_NONE).api("CreateFence")?
        };

        let fence_event: HANDLE = unsafe {
            CreateEventA(null(), BOOL(0), BOOL(0), PCSTR(null()))
                .api("CreateEventA")?
        };

        Ok(Self {
            device,
            command_queue,
            swapchain,
            render_targets,
            command_allocator,
            command_list,
            fence,
            fence_event,
            fence_value: Cell::new(0),
            vsync: config.vsync,
        })
    }

    pub fn create_resource(&self, name: &str, resource_desc: &ResourceDesc,
                           initial_state: D3D12_RESOURCE_STATES,
                           heap_type: D3D12_HEAP_TYPE)
        -> Result<ID3D12Resource> {
        let mut result: Option<ID3D12Resource> = None;
        let created = unsafe {
            self.device.CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: heap_type,
                    ..Default::default()
                },
                D3D12_HEAP_FLAG_NONE,
                &resource_desc.0,
                initial_state,
                null(),
                &mut result
            )
        };

        match (created, result) {
            (Ok(()), Some(resource)) => {
                let wide: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
                unsafe {
                    // Names only show up in debuggers, failure is harmless.
                    let _ = resource.SetName(
                        windows::core::PCWSTR(wide.as_ptr()));
                }
                Ok(resource)
            }
            _ => Err(Error::Allocation {
                name: name.to_string(),
                size: resource_desc.0.Width * resource_desc.0.Height as u64,
            }),
        }
    }

    pub fn create_unordered_access_view_tex2d(&self, resource: &ID3D12Resource,
                                              descriptor: D3D12_CPU_DESCRIPTOR_HANDLE) {
        unsafe {
            self.device.CreateUnorderedAccessView(resource, None,
                &D3D12_UNORDERED_ACCESS_VIEW_DESC {
                    ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                    ..Default::default()
                }, descriptor);
        }
    }

    pub fn create_acceleration_structure_view(&self, location: u64,
                       descriptor: D3D12_CPU_DESCRIPTOR_HANDLE) {
        unsafe {
            self.device.CreateShaderResourceView(None,
                &D3D12_SHADER_RESOURCE_VIEW_DESC {
                    ViewDimension:
                        D3D12_SRV_DIMENSION_RAYTRACING_ACCELERATION_STRUCTURE,
                    Shader4ComponentMapping:
                        D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        RaytracingAccelerationStructure:
                            D3D12_RAYTRACING_ACCELERATION_STRUCTURE_SRV {
                                Location: location,
                            }
                    },
                    ..Default::default()
                }, descriptor);
        }
    }

    pub fn create_constant_buffer_view(&self, location: u64, size: u64,
                                       descriptor: D3D12_CPU_DESCRIPTOR_HANDLE) {
        unsafe {
            self.device.CreateConstantBufferView(
                &D3D12_CONSTANT_BUFFER_VIEW_DESC {
                    BufferLocation: location,
                    SizeInBytes: size as u32,
                }, descriptor);
        }
    }

    /// Closes and submits the command list, then blocks until the GPU has
    /// executed it.
    pub fn execute_and_wait(&self) -> Result<()> {
        unsafe {
            self.command_list.Close().api("Close")?;
            self.command_queue.ExecuteCommandLists(
                &[Some(self.command_list.clone().into())]);
        }
        self.wait_idle()
    }

    /// Resets the allocator and reopens the command list. Only valid once
    /// the previous submission has completed.
    pub fn reset_commands(&self) -> Result<()> {
        unsafe {
            self.command_allocator.Reset().api("Reset")?;
            self.command_list.Reset(&self.command_allocator, None)
                .api("ResetCommandList")?;
        }
        Ok(())
    }

    pub fn back_buffer(&self) -> Result<&ID3D12Resource> {
        let index = unsafe { self.swapchain.GetCurrentBackBufferIndex() };
        self.render_targets.get(index as usize)
    }

    pub fn present(&self) -> Result<()> {
        unsafe {
            self.swapchain.Present(if self.vsync {1} else {0}, 0)
                .ok()
                .api("Present")
        }
    }

    /// Signals the next fence value and waits for the GPU to reach it.
    pub fn wait_idle(&self) -> Result<()> {
        let value = self.fence_value.get() + 1;
        self.fence_value.set(value);

        unsafe {
            self.command_queue.Signal(&self.fence, value).api("Signal")?;
            if self.fence.GetCompletedValue() < value {
                self.fence.SetEventOnCompletion(value, self.fence_event)
                    .api("SetEventOnCompletion")?;
                WaitForSingleObjectEx(self.fence_event, INFINITE, BOOL(0));
            }
        }

        Ok(())
    }

    pub fn transition(&self, resource: &ID3D12Resource,
                      before: D3D12_RESOURCE_STATES,
                      after: D3D12_RESOURCE_STATES) {
        let barriers = [ResourceBarrier::transition(resource, before, after)];
        unsafe {
            self.command_list.ResourceBarrier(&barriers);
            drop_barriers(barriers);
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            warn!("Could not idle the GPU before teardown: {e}");
        }
        unsafe { CloseHandle(self.fence_event); }
    }
}

impl BufferAllocator for Context {
    type Buffer = Buffer;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Buffer> {
        let resource_desc = if desc.unordered_access {
            ResourceDesc::uav_buffer(desc.size as usize)
        } else {
            ResourceDesc::buffer(desc.size as usize)
        };

        let resource = self.create_resource(desc.name, &resource_desc,
                                            resource_state(desc.state),
                                            heap_type(desc.heap))?;
        Ok(Buffer {
            resource,
            name: desc.name.to_string(),
            size: desc.size,
        })
    }
}

/// Native description of `inputs`. Triangle inputs point at `geometry`,
/// which must outlive every use of the result.
fn native_inputs(inputs: &BuildInputs,
                 geometry: &mut D3D12_RAYTRACING_GEOMETRY_DESC)
    -> D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {

    match inputs {
        BuildInputs::Triangles(g) => {
            *geometry = D3D12_RAYTRACING_GEOMETRY_DESC {
                Type: D3D12_RAYTRACING_GEOMETRY_TYPE_TRIANGLES,
                Flags: D3D12_RAYTRACING_GEOMETRY_FLAG_OPAQUE,
                Anonymous: D3D12_RAYTRACING_GEOMETRY_DESC_0 {
                    Triangles: D3D12_RAYTRACING_GEOMETRY_TRIANGLES_DESC {
                        VertexBuffer: D3D12_GPU_VIRTUAL_ADDRESS_AND_STRIDE {
                            StartAddress: g.vertex_address,
                            StrideInBytes: g.vertex_stride,
                        },
                        VertexFormat: DXGI_FORMAT_R32G32B32_FLOAT,
                        VertexCount: g.vertex_count,
                        IndexFormat: DXGI_FORMAT_R32_UINT,
                        IndexCount: g.index_count,
                        IndexBuffer: g.index_address,
                        Transform3x4: 0,
                    }
                },
            };

            D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
                Type: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL,
                Flags: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_NONE,
                NumDescs: 1,
                DescsLayout: D3D12_ELEMENTS_LAYOUT_ARRAY,
                Anonymous: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                    pGeometryDescs: geometry,
                },
            }
        }

        BuildInputs::Instances { address, count } => {
            D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
                Type: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_TOP_LEVEL,
                Flags: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_NONE,
                NumDescs: *count,
                DescsLayout: D3D12_ELEMENTS_LAYOUT_ARRAY,
                Anonymous: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                    InstanceDescs: *address,
                },
            }
        }
    }
}

impl AccelerationStructureBackend for Context {
    fn prebuild_info(&self, inputs: &BuildInputs) -> Result<PrebuildInfo> {
        let mut geometry = D3D12_RAYTRACING_GEOMETRY_DESC::default();
        let native = native_inputs(inputs, &mut geometry);

        let mut info =
            D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO::default();
        unsafe {
            self.device.GetRaytracingAccelerationStructurePrebuildInfo(
                &native, &mut info);
        }

        if info.ResultDataMaxSizeInBytes == 0 {
            return Err(Error::CapabilityMissing(
                "acceleration structure prebuild returned no size".into()));
        }

        Ok(PrebuildInfo {
            scratch_size: info.ScratchDataSizeInBytes,
            result_size: info.ResultDataMaxSizeInBytes,
        })
    }

    fn record_build(&self, build: &BuildCommand) {
        let mut geometry = D3D12_RAYTRACING_GEOMETRY_DESC::default();
        let desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC {
            DestAccelerationStructureData: build.dest,
            Inputs: native_inputs(&build.inputs, &mut geometry),
            SourceAccelerationStructureData: 0,
            ScratchAccelerationStructureData: build.scratch,
        };
        unsafe {
            self.command_list.BuildRaytracingAccelerationStructure(&desc, &[]);
        }
    }

    fn record_uav_barrier(&self, buffer: &Buffer) {
        let barriers = [ResourceBarrier::uav(&buffer.resource)];
        unsafe {
            self.command_list.ResourceBarrier(&barriers);
            drop_barriers(barriers);
        }
    }
}

pub struct ResourceDesc(D3D12_RESOURCE_DESC);
impl ResourceDesc {
    pub fn tex2d(format: DXGI_FORMAT, width: u32, height: u32,
                 flags: D3D12_RESOURCE_FLAGS) -> Self {
        Self(D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: width.into(),
            Height: height,
            DepthOrArraySize: 1,
            Format: format,
            Flags: flags,
            MipLevels: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        })
    }

    pub fn uav2d(format: DXGI_FORMAT, width: u32, height: u32) -> Self {
        Self::tex2d(format, width, height,
                    D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS)
    }

    fn buffer_with_flags(size: usize, flags: D3D12_RESOURCE_FLAGS) -> Self {
        Self(D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: size as u64,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: flags,
        })
    }

    pub fn buffer(size: usize) -> Self {
        Self::buffer_with_flags(size, D3D12_RESOURCE_FLAG_NONE)
    }

    pub fn uav_buffer(size: usize) -> Self {
        Self::buffer_with_flags(size, D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS)
    }
}

pub struct ResourceBarrier;

impl ResourceBarrier {
    pub fn transition(resource: &ID3D12Resource, before: D3D12_RESOURCE_STATES,
                      after: D3D12_RESOURCE_STATES) -> D3D12_RESOURCE_BARRIER {
        D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: core::mem::ManuallyDrop::new(
                    D3D12_RESOURCE_TRANSITION_BARRIER {
                        pResource: Some(resource.clone()),
                        Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                        StateBefore: before,
                        StateAfter: after,
                    }
                )
            }
        }
    }

    pub fn uav(resource: &ID3D12Resource) -> D3D12_RESOURCE_BARRIER {
        D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                UAV: core::mem::ManuallyDrop::new(
                    D3D12_RESOURCE_UAV_BARRIER {
                        pResource: Some(resource.clone()),
                    }
                )
            }
        }
    }
}

/// Releases the resource reference held by a barrier built with
/// [`ResourceBarrier`].
pub unsafe fn drop_barrier(b: D3D12_RESOURCE_BARRIER) {
    match b.Type {
        D3D12_RESOURCE_BARRIER_TYPE_TRANSITION => {
            core::mem::ManuallyDrop::into_inner(b.Anonymous.Transition);
        },
        D3D12_RESOURCE_BARRIER_TYPE_UAV => {
            core::mem::ManuallyDrop::into_inner(b.Anonymous.UAV);
        },
        _ => {}
    }
}

pub unsafe fn drop_barriers<const N: usize>(barriers:
                                            [D3D12_RESOURCE_BARRIER; N]) {
    for b in barriers {
        drop_barrier(b);
    }
}
