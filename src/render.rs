use bytemuck::bytes_of;
use log::{debug, info};

use crate::accel::{build_scene, SceneAccelerationStructures};
use crate::alloc::{BufferAllocator, GpuBuffer};
use crate::camera::{Camera, FrameCounter, Key, Movement};
use crate::config::Config;
use crate::d3d12::{self, Buffer, Context, ResourceDesc};
use crate::error::Result;
use crate::heap::DescriptorHeap;
use crate::pipeline::RayTracingPipeline;
use crate::sbt::ShaderBindingTable;
use crate::scene::{self, Scene};
use crate::shaders;
use crate::win32::Window;

pub struct Renderer {
    // Dropped first so the GPU is idle before anything below is released.
    context: Context,

    pipeline: RayTracingPipeline,
    heap: DescriptorHeap,
    binding_table: ShaderBindingTable<Buffer>,

    output: d3d12::ID3D12Resource,
    _accumulation: d3d12::ID3D12Resource,

    camera_buffer: Buffer,
    frame_buffer: Buffer,

    _acceleration_structures: SceneAccelerationStructures<Buffer>,
    _scene: Scene<Buffer>,

    camera: Camera,
    frames: FrameCounter,

    width: u32,
    height: u32,
}

impl Renderer {
    pub fn init(window: &Window, config: &Config) -> Result<Self> {
        let width = window.width();
        let height = window.height();

        let context = Context::init(window, config)?;

        let libraries = shaders::load_libraries(&config.shader_dir)?;
        let pipeline = shaders::pipeline(libraries).generate(&context.device)?;

        let scene = Scene::upload(&context, &scene::sample_objects(),
                                  &scene::sample_light())?;

        // The command list is still open from device creation.
        let mut acceleration_structures = build_scene(&context, &scene.instances())?;
        context.execute_and_wait()?;
        acceleration_structures.release_scratch();
        info!("Acceleration structures built for {} instances",
              acceleration_structures.instances.len());

        let output = context.create_resource("output",
            &ResourceDesc::uav2d(d3d12::DXGI_FORMAT_R8G8B8A8_UNORM, width, height),
            d3d12::D3D12_RESOURCE_STATE_COPY_SOURCE,
            d3d12::D3D12_HEAP_TYPE_DEFAULT)?;

        let accumulation = context.create_resource("accumulation",
            &ResourceDesc::uav2d(d3d12::DXGI_FORMAT_R32G32B32A32_FLOAT, width, height),
            d3d12::D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
            d3d12::D3D12_HEAP_TYPE_DEFAULT)?;

        let camera = Camera::new(config.aspect_ratio());
        let frames = FrameCounter::default();

        let camera_buffer = context.upload_constants("camera",
                                                     bytes_of(&camera.constants()))?;
        let frame_buffer = context.upload_constants("frame constants",
            bytes_of(&shaders::FrameConstants::default()))?;

        let heap = DescriptorHeap::new(&context.device,
            d3d12::D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            shaders::HEAP_DESCRIPTOR_COUNT, true)?;

        let output_slot = heap.alloc_descriptor()?;
        context.create_unordered_access_view_tex2d(&output,
                                                   output_slot.cpu_handle());

        let accumulation_slot = heap.alloc_descriptor()?;
        context.create_unordered_access_view_tex2d(&accumulation,
                                                   accumulation_slot.cpu_handle());

        let tlas_slot = heap.alloc_descriptor()?;
        context.create_acceleration_structure_view(
            acceleration_structures.top_level.gpu_address(),
            tlas_slot.cpu_handle());

        let camera_slot = heap.alloc_descriptor()?;
        context.create_constant_buffer_view(camera_buffer.gpu_address(),
                                            camera_buffer.size(),
                                            camera_slot.cpu_handle());

        debug!("Descriptor heap slots: output {}, accumulation {}, scene {}, camera {}",
               output_slot.index, accumulation_slot.index, tlas_slot.index,
               camera_slot.index);

        let binding_table = scene
            .binding_table(heap.gpu_start().ptr, frame_buffer.gpu_address())
            .build(&context, &pipeline.identifiers)?;

        Ok(Self {
            context,
            pipeline,
            heap,
            binding_table,
            output,
            _accumulation: accumulation,
            camera_buffer,
            frame_buffer,
            _acceleration_structures: acceleration_structures,
            _scene: scene,
            camera,
            frames,
            width,
            height,
        })
    }

    pub fn handle_key(&mut self, key: Key) {
        if let Some(movement) = Movement::from_key(key) {
            self.camera.apply(movement);
            self.frames.reset();
        }
    }

    pub fn render(&mut self) -> Result<()> {
        self.camera_buffer.write(0, bytes_of(&self.camera.constants()))?;
        self.frame_buffer.write(0, bytes_of(&self.frames.next_frame()))?;

        let context = &self.context;
        context.reset_commands()?;

        let regions = self.binding_table.dispatch_regions();
        let desc = d3d12::D3D12_DISPATCH_RAYS_DESC {
            RayGenerationShaderRecord: d3d12::D3D12_GPU_VIRTUAL_ADDRESS_RANGE {
                StartAddress: regions.ray_generation.start,
                SizeInBytes: regions.ray_generation.size,
            },
            MissShaderTable: d3d12::D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: regions.miss.start,
                SizeInBytes: regions.miss.size,
                StrideInBytes: regions.miss.stride,
            },
            HitGroupTable: d3d12::D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: regions.hit_group.start,
                SizeInBytes: regions.hit_group.size,
                StrideInBytes: regions.hit_group.stride,
            },
            CallableShaderTable: Default::default(),
            Width: self.width,
            Height: self.height,
            Depth: 1,
        };

        context.transition(&self.output,
            d3d12::D3D12_RESOURCE_STATE_COPY_SOURCE,
            d3d12::D3D12_RESOURCE_STATE_UNORDERED_ACCESS);

        unsafe {
            let command_list = &context.command_list;
            command_list.SetDescriptorHeaps(&[Some(self.heap.heap.clone())]);
            command_list.SetComputeRootSignature(
                &self.pipeline.global_root_signature);
            command_list.SetPipelineState1(&self.pipeline.state_object);
            command_list.DispatchRays(&desc);
        }

        context.transition(&self.output,
            d3d12::D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
            d3d12::D3D12_RESOURCE_STATE_COPY_SOURCE);

        let back_buffer = context.back_buffer()?;
        context.transition(back_buffer,
            d3d12::D3D12_RESOURCE_STATE_PRESENT,
            d3d12::D3D12_RESOURCE_STATE_COPY_DEST);

        unsafe {
            context.command_list.CopyResource(back_buffer, &self.output);
        }

        context.transition(back_buffer,
            d3d12::D3D12_RESOURCE_STATE_COPY_DEST,
            d3d12::D3D12_RESOURCE_STATE_PRESENT);

        context.execute_and_wait()?;
        context.present()
    }
}
