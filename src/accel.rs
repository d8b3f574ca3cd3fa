//! Bottom and top level acceleration structure builders.

use bytemuck::{Pod, Zeroable, cast_slice};
use log::{debug, info};

use math::mat::Mat4;

use crate::alloc::{align_up, BufferAllocator, BufferDesc, GpuBuffer,
                   ResourceState};
use crate::error::{Error, Result};

/// Ray types traced by the shaders. Every instance owns one hit group record
/// per ray type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayType {
    Primary = 0,
    Shadow = 1,
}

pub const RAY_TYPE_COUNT: u32 = 2;

pub const ACCELERATION_STRUCTURE_ALIGNMENT: u64 = 256;
pub const INSTANCE_DESCS_ALIGNMENT: u64 = 16;

/// Instance ids and hit group contributions are 24-bit fields, and the
/// contribution of instance `i` is `RAY_TYPE_COUNT * i`.
pub const MAX_INSTANCES: usize = (1 << 24) / RAY_TYPE_COUNT as usize;

const INSTANCE_MASK_ALL: u32 = 0xFF;
const INSTANCE_FLAG_NONE: u32 = 0;

/// Index of the hit group record used by `instance` for `ray_type`.
pub fn hit_group_index(instance: u32, ray_type: RayType) -> u32 {
    instance * RAY_TYPE_COUNT + ray_type as u32
}

/// Binary layout of one top level instance as consumed by the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceDesc {
    pub transform: [f32; 12],
    /// Instance id in the low 24 bits, mask in the high 8.
    pub id_and_mask: u32,
    /// Hit group contribution in the low 24 bits, flags in the high 8.
    pub contribution_and_flags: u32,
    pub acceleration_structure: u64,
}

impl InstanceDesc {
    pub fn new(index: u32, contribution: u32, transform: &Mat4,
               blas_address: u64) -> Self {
        Self {
            transform: transform.to_rows_3x4(),
            id_and_mask: (index & 0xFF_FFFF) | INSTANCE_MASK_ALL << 24,
            contribution_and_flags: (contribution & 0xFF_FFFF)
                | INSTANCE_FLAG_NONE << 24,
            acceleration_structure: blas_address,
        }
    }

    pub fn instance_id(&self) -> u32 {
        self.id_and_mask & 0xFF_FFFF
    }

    pub fn mask(&self) -> u32 {
        self.id_and_mask >> 24
    }

    pub fn hit_group_contribution(&self) -> u32 {
        self.contribution_and_flags & 0xFF_FFFF
    }

    pub fn flags(&self) -> u32 {
        self.contribution_and_flags >> 24
    }
}

/// Triangle geometry of one bottom level structure: RGB32F positions at the
/// start of each vertex, 32-bit indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub vertex_address: u64,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub index_address: u64,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuildInputs {
    Triangles(Geometry),
    Instances { address: u64, count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrebuildInfo {
    pub scratch_size: u64,
    pub result_size: u64,
}

impl PrebuildInfo {
    pub fn aligned(self) -> Self {
        Self {
            scratch_size: align_up(self.scratch_size,
                                   ACCELERATION_STRUCTURE_ALIGNMENT),
            result_size: align_up(self.result_size,
                                  ACCELERATION_STRUCTURE_ALIGNMENT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildCommand {
    pub inputs: BuildInputs,
    pub dest: u64,
    pub scratch: u64,
}

/// Device side of acceleration structure construction. Builds are recorded
/// on an open command list; the caller submits and waits for them.
pub trait AccelerationStructureBackend: BufferAllocator {
    /// Sizes needed to build `inputs`. Fails when the device cannot build
    /// acceleration structures.
    fn prebuild_info(&self, inputs: &BuildInputs) -> Result<PrebuildInfo>;

    fn record_build(&self, build: &BuildCommand);

    fn record_uav_barrier(&self, buffer: &Self::Buffer);
}

pub struct AccelerationStructureBuffers<B> {
    /// Build workspace, dropped once the build has retired on the GPU.
    pub scratch: Option<B>,
    pub result: B,
    /// Top level only.
    pub instance_desc: Option<B>,
}

impl<B: GpuBuffer> AccelerationStructureBuffers<B> {
    pub fn gpu_address(&self) -> u64 {
        self.result.gpu_address()
    }

    pub fn release_scratch(&mut self) {
        self.scratch = None;
    }
}

pub fn build_bottom_level<D: AccelerationStructureBackend>(
    device: &D, name: &str, geometry: &Geometry)
    -> Result<AccelerationStructureBuffers<D::Buffer>> {

    let inputs = BuildInputs::Triangles(*geometry);
    let info = device.prebuild_info(&inputs)?.aligned();

    debug!("{name}: scratch {} bytes, result {} bytes",
           info.scratch_size, info.result_size);

    let scratch = device.create_buffer(&BufferDesc::scratch(
            &format!("{name} scratch"), info.scratch_size,
            ResourceState::Common))?;
    let result = device.create_buffer(&BufferDesc::acceleration_structure(
            name, info.result_size))?;

    device.record_build(&BuildCommand {
        inputs,
        dest: result.gpu_address(),
        scratch: scratch.gpu_address(),
    });
    device.record_uav_barrier(&result);

    Ok(AccelerationStructureBuffers {
        scratch: Some(scratch),
        result,
        instance_desc: None,
    })
}

/// Instances of the top level structure in registration order.
#[derive(Debug, Default, Clone)]
pub struct TopLevelInstances {
    descs: Vec<InstanceDesc>,
}

impl TopLevelInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instance and returns its index. The hit group
    /// contribution reserves one record per ray type.
    pub fn add(&mut self, blas_address: u64, transform: &Mat4) -> Result<u32> {
        let index = next_instance_index(self.descs.len())?;
        self.descs.push(InstanceDesc::new(index, RAY_TYPE_COUNT * index,
                                          transform, blas_address));
        Ok(index)
    }

    pub fn descs(&self) -> &[InstanceDesc] {
        &self.descs
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    pub fn buffer_size(&self) -> u64 {
        align_up((self.descs.len() * core::mem::size_of::<InstanceDesc>()) as u64,
                 INSTANCE_DESCS_ALIGNMENT)
    }
}

fn next_instance_index(count: usize) -> Result<u32> {
    if count >= MAX_INSTANCES {
        return Err(Error::TooManyInstances { limit: MAX_INSTANCES });
    }
    Ok(count as u32)
}

pub fn build_top_level<D: AccelerationStructureBackend>(
    device: &D, instances: &TopLevelInstances)
    -> Result<AccelerationStructureBuffers<D::Buffer>> {

    if instances.is_empty() {
        return Err(Error::EmptyTopLevel);
    }

    let instance_desc = device.create_buffer(&BufferDesc::upload(
            "instance descriptors", instances.buffer_size()))?;
    instance_desc.write(0, cast_slice(instances.descs()))?;

    let inputs = BuildInputs::Instances {
        address: instance_desc.gpu_address(),
        count: instances.len() as u32,
    };
    let info = device.prebuild_info(&inputs)?.aligned();

    let scratch = device.create_buffer(&BufferDesc::scratch(
            "top level scratch", info.scratch_size,
            ResourceState::UnorderedAccess))?;
    let result = device.create_buffer(&BufferDesc::acceleration_structure(
            "top level acceleration structure", info.result_size))?;

    device.record_build(&BuildCommand {
        inputs,
        dest: result.gpu_address(),
        scratch: scratch.gpu_address(),
    });
    device.record_uav_barrier(&result);

    Ok(AccelerationStructureBuffers {
        scratch: Some(scratch),
        result,
        instance_desc: Some(instance_desc),
    })
}

pub struct SceneAccelerationStructures<B> {
    pub bottom_levels: Vec<AccelerationStructureBuffers<B>>,
    pub top_level: AccelerationStructureBuffers<B>,
    pub instances: TopLevelInstances,
}

impl<B: GpuBuffer> SceneAccelerationStructures<B> {
    pub fn release_scratch(&mut self) {
        for blas in self.bottom_levels.iter_mut() {
            blas.release_scratch();
        }
        self.top_level.release_scratch();
    }
}

/// Records one bottom level build per object, then a single top level build
/// over all of them. Instance `i` is object `i`.
pub fn build_scene<D: AccelerationStructureBackend>(
    device: &D, objects: &[(Geometry, Mat4)])
    -> Result<SceneAccelerationStructures<D::Buffer>> {

    let mut bottom_levels = Vec::with_capacity(objects.len());
    let mut instances = TopLevelInstances::new();

    for (i, (geometry, transform)) in objects.iter().enumerate() {
        let blas = build_bottom_level(device, &format!("blas {i}"), geometry)?;
        instances.add(blas.gpu_address(), transform)?;
        bottom_levels.push(blas);
    }

    let top_level = build_top_level(device, &instances)?;

    info!("Recorded {} bottom level builds and one top level build ({} bytes)",
          bottom_levels.len(), top_level.result.size());

    Ok(SceneAccelerationStructures {
        bottom_levels,
        top_level,
        instances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapKind;
    use crate::testing::FakeDevice;

    use math::vec::Vec3;

    fn geometry(vertex_count: u32, index_count: u32) -> Geometry {
        Geometry {
            vertex_address: 0x10000,
            vertex_count,
            vertex_stride: 32,
            index_address: 0x20000,
            index_count,
        }
    }

    #[test]
    fn instance_desc_is_64_bytes() {
        assert_eq!(core::mem::size_of::<InstanceDesc>(), 64);
    }

    #[test]
    fn instance_index_follows_registration_order() {
        let mut instances = TopLevelInstances::new();
        for i in 0..5u64 {
            let index = instances.add(0x1000 * (i + 1), &Mat4::identity()).unwrap();
            assert_eq!(index as u64, i);
        }

        for (i, desc) in instances.descs().iter().enumerate() {
            assert_eq!(desc.instance_id(), i as u32);
            assert_eq!(desc.hit_group_contribution(), 2 * i as u32);
            assert_eq!(desc.mask(), 0xFF);
            assert_eq!(desc.flags(), 0);
            assert_eq!(desc.acceleration_structure, 0x1000 * (i as u64 + 1));
        }
    }

    #[test]
    fn instance_count_stops_before_contribution_overflows() {
        let last = MAX_INSTANCES - 1;
        let index = next_instance_index(last).unwrap();
        let desc = InstanceDesc::new(index, RAY_TYPE_COUNT * index,
                                     &Mat4::identity(), 0);
        assert_eq!(desc.instance_id(), index);
        assert_eq!(desc.hit_group_contribution(), RAY_TYPE_COUNT * index);

        assert!(matches!(next_instance_index(MAX_INSTANCES),
                         Err(Error::TooManyInstances { limit }) if limit == 1 << 23));
    }

    #[test]
    fn hit_group_index_interleaves_ray_types() {
        assert_eq!(hit_group_index(0, RayType::Primary), 0);
        assert_eq!(hit_group_index(0, RayType::Shadow), 1);
        assert_eq!(hit_group_index(3, RayType::Primary), 6);
        assert_eq!(hit_group_index(3, RayType::Shadow), 7);
    }

    #[test]
    fn instance_transform_is_row_major_3x4() {
        let t = Mat4::translation(Vec3::new(0., -1.75, 0.));
        let desc = InstanceDesc::new(0, 0, &t, 0);
        assert_eq!(desc.transform[3], 0.);
        assert_eq!(desc.transform[7], -1.75);
        assert_eq!(desc.transform[11], 0.);
        assert_eq!(desc.transform[0], 1.);
    }

    #[test]
    fn bottom_level_allocates_aligned_buffers() {
        let device = FakeDevice::new();
        let blas = build_bottom_level(&device, "sphere", &geometry(24, 36))
            .unwrap();

        let scratch = device.created_named("sphere scratch").unwrap();
        assert_eq!(scratch.size, align_up(1000 + 36 * 4, 256));
        assert_eq!(scratch.heap, HeapKind::Default);
        assert_eq!(scratch.state, ResourceState::Common);
        assert!(scratch.unordered_access);

        let result = device.created_named("sphere").unwrap();
        assert_eq!(result.size, align_up(2000 + 24 * 8, 256));
        assert_eq!(result.state, ResourceState::AccelerationStructure);

        let builds = device.builds();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].inputs, BuildInputs::Triangles(geometry(24, 36)));
        assert_eq!(builds[0].dest, blas.gpu_address());
        assert_eq!(device.barriers(), vec![blas.gpu_address()]);
    }

    #[test]
    fn top_level_consumes_all_instances_in_one_build() {
        let device = FakeDevice::new();
        let mut instances = TopLevelInstances::new();
        instances.add(0xA000, &Mat4::identity()).unwrap();
        instances.add(0xB000, &Mat4::translation(Vec3::new(2., 0., 2.))).unwrap();

        let tlas = build_top_level(&device, &instances).unwrap();

        let builds = device.builds();
        assert_eq!(builds.len(), 1);
        let instance_buffer = tlas.instance_desc.as_ref().unwrap();
        assert_eq!(builds[0].inputs, BuildInputs::Instances {
            address: instance_buffer.gpu_address(),
            count: 2,
        });

        let written: Vec<InstanceDesc> = instance_buffer.contents()
            .chunks_exact(64)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(written, instances.descs());

        let descs = device.created_named("instance descriptors").unwrap();
        assert_eq!(descs.heap, HeapKind::Upload);
        assert_eq!(descs.state, ResourceState::GenericRead);
        assert_eq!(descs.size, 128);

        let scratch = device.created_named("top level scratch").unwrap();
        assert_eq!(scratch.state, ResourceState::UnorderedAccess);
    }

    #[test]
    fn empty_top_level_is_rejected() {
        let device = FakeDevice::new();
        assert!(matches!(build_top_level(&device, &TopLevelInstances::new()),
                         Err(Error::EmptyTopLevel)));
    }

    #[test]
    fn missing_capability_fails_before_any_build() {
        let device = FakeDevice::without_raytracing();
        let result = build_scene(&device,
                                 &[(geometry(3, 3), Mat4::identity())]);
        assert!(matches!(result, Err(Error::CapabilityMissing(_))));
        assert!(device.builds().is_empty());
    }

    #[test]
    fn scene_builds_blas_per_object_then_tlas() {
        let device = FakeDevice::new();
        let objects = vec![
            (geometry(24, 36), Mat4::identity()),
            (geometry(8, 12), Mat4::translation(Vec3::new(0., 4.5, 0.))),
            (geometry(4, 6), Mat4::identity()),
        ];

        let mut scene = build_scene(&device, &objects).unwrap();

        let builds = device.builds();
        assert_eq!(builds.len(), 4);
        assert!(builds[..3].iter().all(|b| matches!(b.inputs, BuildInputs::Triangles(_))));
        assert!(matches!(builds[3].inputs, BuildInputs::Instances { count: 3, .. }));

        for (i, desc) in scene.instances.descs().iter().enumerate() {
            assert_eq!(desc.acceleration_structure,
                       scene.bottom_levels[i].gpu_address());
        }

        scene.release_scratch();
        assert!(scene.bottom_levels.iter().all(|b| b.scratch.is_none()));
        assert!(scene.top_level.scratch.is_none());
    }
}
