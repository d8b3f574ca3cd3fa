//! The fixed scene: a sphere on a table in a closed room lit from above.

use bytemuck::bytes_of;
use log::info;

use math::{
    vec::{Vec3, Vec4},
    mat::Mat4,
};

use crate::accel::Geometry;
use crate::alloc::{BufferAllocator, GpuBuffer};
use crate::error::Result;
use crate::geometry::{box_mesh, sphere, Mesh, VERTEX_STRIDE};
use crate::sbt::{ShaderArgument, ShaderBindingTableBuilder};
use crate::shaders::{Light, Material, MaterialType, HIT_GROUP, MISS,
                     RAY_GENERATION, SHADOW_HIT_GROUP, SHADOW_MISS};

pub struct SceneObject {
    pub name: &'static str,
    pub mesh: Mesh,
    pub material: Material,
    pub transform: Mat4,
}

fn object(name: &'static str, mesh: Mesh, material: Material,
          position: Vec3) -> SceneObject {
    SceneObject {
        name,
        mesh,
        material,
        transform: Mat4::translation(position),
    }
}

fn diffuse(r: f32, g: f32, b: f32) -> Material {
    Material::new(Vec4::new(r, g, b, 1.0), Vec4::default(), MaterialType::Diffuse)
}

fn specular(r: f32, g: f32, b: f32) -> Material {
    Material::new(Vec4::new(r, g, b, 1.0), Vec4::default(), MaterialType::Specular)
}

pub const LIGHT_POSITION: Vec3 = Vec3::new(0.0, 4.5, 0.0);
pub const LIGHT_SIZE: Vec3 = Vec3::new(1.0, 0.1, 1.0);
pub const LIGHT_EMISSION: f32 = 10.0;

/// Objects in instance order.
pub fn sample_objects() -> Vec<SceneObject> {
    let leg = Vec3::new(0.5, 3.0, 0.5);
    let coarse = [1, 1, 1];

    vec![
        object("sphere", sphere(1.0), specular(1.0, 1.0, 1.0), Vec3::from_scalar(0.0)),
        object("skybox", box_mesh(Vec3::new(8.0, 10.0, 8.0), coarse),
               diffuse(0.8, 0.8, 0.8), Vec3::from_scalar(0.0)),
        object("front left leg", box_mesh(leg, coarse),
               diffuse(0.960, 0.949, 0.6), Vec3::new(-2.0, 0.0, -2.0)),
        object("front right leg", box_mesh(leg, coarse),
               diffuse(0.960, 0.6, 0.933), Vec3::new(2.0, 0.0, -2.0)),
        object("back left leg", box_mesh(leg, coarse),
               diffuse(0.6, 0.725, 0.960), Vec3::new(-2.0, 0.0, 2.0)),
        object("back right leg", box_mesh(leg, coarse),
               diffuse(0.698, 0.960, 0.6), Vec3::new(2.0, 0.0, 2.0)),
        object("table top", box_mesh(Vec3::new(4.5, 0.5, 4.5), coarse),
               specular(0.960, 0.6, 0.717), Vec3::new(0.0, -1.75, 0.0)),
        object("light", box_mesh(LIGHT_SIZE, coarse),
               Material::new(Vec4::new(1.0, 1.0, 1.0, 0.0),
                             Vec4::new(LIGHT_EMISSION, LIGHT_EMISSION, LIGHT_EMISSION, 0.0),
                             MaterialType::Light),
               LIGHT_POSITION),
    ]
}

pub fn sample_light() -> Light {
    Light {
        position: LIGHT_POSITION.extend(1.0),
        size: LIGHT_SIZE.extend(0.0),
        emission: Vec3::from_scalar(LIGHT_EMISSION).extend(0.0),
    }
}

/// GPU side of a [`SceneObject`].
pub struct RenderObject<B> {
    pub name: &'static str,
    pub vertex_buffer: B,
    pub index_buffer: B,
    pub material_buffer: B,
    pub vertex_count: u32,
    pub index_count: u32,
    pub transform: Mat4,
}

impl<B: GpuBuffer> RenderObject<B> {
    pub fn upload<A>(allocator: &A, object: &SceneObject) -> Result<Self>
        where A: BufferAllocator<Buffer = B> {

        let name = object.name;
        Ok(RenderObject {
            name,
            vertex_buffer: allocator.upload(&format!("{name} vertices"),
                                            object.mesh.vertex_bytes())?,
            index_buffer: allocator.upload(&format!("{name} indices"),
                                           object.mesh.index_bytes())?,
            material_buffer: allocator.upload_constants(&format!("{name} material"),
                                                        bytes_of(&object.material))?,
            vertex_count: object.mesh.vertices.len() as u32,
            index_count: object.mesh.indices.len() as u32,
            transform: object.transform,
        })
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            vertex_address: self.vertex_buffer.gpu_address(),
            vertex_count: self.vertex_count,
            vertex_stride: VERTEX_STRIDE,
            index_address: self.index_buffer.gpu_address(),
            index_count: self.index_count,
        }
    }

    pub fn set_material(&self, material: &Material) -> Result<()> {
        self.material_buffer.write(0, bytes_of(material))
    }

    fn hit_arguments(&self, light: u64, heap_start: u64) -> Vec<ShaderArgument> {
        vec![
            ShaderArgument::Address(self.vertex_buffer.gpu_address()),
            ShaderArgument::Address(self.index_buffer.gpu_address()),
            ShaderArgument::Address(self.material_buffer.gpu_address()),
            ShaderArgument::Address(light),
            ShaderArgument::DescriptorTable(heap_start),
        ]
    }
}

pub struct Scene<B> {
    pub objects: Vec<RenderObject<B>>,
    pub light_buffer: B,
}

impl<B: GpuBuffer> Scene<B> {
    pub fn upload<A>(allocator: &A, objects: &[SceneObject], light: &Light)
        -> Result<Self>
        where A: BufferAllocator<Buffer = B> {

        let objects = objects.iter()
            .map(|o| RenderObject::upload(allocator, o))
            .collect::<Result<Vec<_>>>()?;
        let light_buffer = allocator.upload_constants("light", bytes_of(light))?;

        let (vertices, indices) = objects.iter()
            .fold((0, 0), |(v, i), o| (v + o.vertex_count, i + o.index_count));
        info!("Uploaded {} objects ({vertices} vertices, {indices} indices)",
              objects.len());

        Ok(Scene { objects, light_buffer })
    }

    /// Geometry and transform of each object, in instance order.
    pub fn instances(&self) -> Vec<(Geometry, Mat4)> {
        self.objects.iter()
            .map(|o| (o.geometry(), o.transform))
            .collect()
    }

    /// Records for one frame of the sample: the ray generation shader reads
    /// the heap and the frame counter, and each object gets a primary and a
    /// shadow hit group record in instance order.
    pub fn binding_table(&self, heap_start: u64, frame_constants: u64)
        -> ShaderBindingTableBuilder {

        let mut sbt = ShaderBindingTableBuilder::new();
        sbt.add_ray_generation(RAY_GENERATION, vec![
            ShaderArgument::DescriptorTable(heap_start),
            ShaderArgument::Address(frame_constants),
        ]);
        sbt.add_miss(MISS, Vec::new());
        sbt.add_miss(SHADOW_MISS, Vec::new());

        let light = self.light_buffer.gpu_address();
        for object in &self.objects {
            sbt.add_hit_group(HIT_GROUP, object.hit_arguments(light, heap_start));
            sbt.add_hit_group(SHADOW_HIT_GROUP, object.hit_arguments(light, heap_start));
        }
        sbt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{build_scene, hit_group_index, RayType};
    use crate::pipeline::{ShaderIdentifier, ShaderIdentifiers, ShaderLibrary,
                          SHADER_IDENTIFIER_SIZE};
    use crate::sbt::SHADER_BINDING_TABLE_NAME;
    use crate::shaders::{self, LIBRARIES};
    use crate::testing::{FakeBuffer, FakeDevice};

    fn identifiers() -> ShaderIdentifiers {
        let libraries = LIBRARIES.iter()
            .map(|l| ShaderLibrary {
                name: l.name.to_string(),
                bytecode: Vec::new(),
                exports: l.exports.iter().map(|e| e.to_string()).collect(),
            })
            .collect();

        let mut next = 0u8;
        shaders::pipeline(libraries).resolve().unwrap()
            .resolve_identifiers(|_| {
                next += 1;
                Some(ShaderIdentifier([next; SHADER_IDENTIFIER_SIZE]))
            })
            .unwrap()
    }

    fn upload(device: &FakeDevice, objects: &[SceneObject]) -> Scene<FakeBuffer> {
        Scene::upload(device, objects, &sample_light()).unwrap()
    }

    #[test]
    fn sample_scene_order() {
        let objects = sample_objects();
        let names: Vec<&str> = objects.iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["sphere", "skybox", "front left leg", "front right leg",
                               "back left leg", "back right leg", "table top", "light"]);

        assert_eq!(objects[0].material.kind, MaterialType::Specular as u32 as f32);
        assert_eq!(objects[1].material.kind, MaterialType::Diffuse as u32 as f32);
        assert_eq!(objects[7].material.kind, MaterialType::Light as u32 as f32);
        assert_eq!(objects[7].material.emission.x, LIGHT_EMISSION);
        assert_eq!(objects[6].transform.transform_point(Vec3::from_scalar(0.0)),
                   Vec3::new(0.0, -1.75, 0.0));
    }

    #[test]
    fn upload_creates_buffers_per_object() {
        let device = FakeDevice::new();
        let objects = sample_objects();
        let scene = upload(&device, &objects);

        assert_eq!(scene.objects.len(), 8);
        assert_eq!(device.created().len(), 8 * 3 + 1);

        let sphere = &scene.objects[0];
        assert_eq!(sphere.vertex_count as usize, objects[0].mesh.vertices.len());
        assert_eq!(sphere.vertex_buffer.contents(), objects[0].mesh.vertex_bytes());
        assert_eq!(sphere.material_buffer.size(), 256);

        let light = device.created_named("light").unwrap();
        assert_eq!(light.address, scene.light_buffer.gpu_address());
        assert_eq!(&scene.light_buffer.contents()[..48], bytes_of(&sample_light()));
    }

    #[test]
    fn material_can_be_rewritten() {
        let device = FakeDevice::new();
        let scene = upload(&device, &sample_objects()[..1]);

        let red = diffuse(1.0, 0.0, 0.0);
        scene.objects[0].set_material(&red).unwrap();
        assert_eq!(&scene.objects[0].material_buffer.contents()[..48], bytes_of(&red));
    }

    #[test]
    fn hit_records_follow_instances() {
        let device = FakeDevice::new();
        let scene = upload(&device, &sample_objects());
        let sbt = scene.binding_table(0xAB00, 0xCD00);

        let records = sbt.hit_groups();
        assert_eq!(records.len(), 16);
        for (i, object) in scene.objects.iter().enumerate() {
            let primary = &records[hit_group_index(i as u32, RayType::Primary) as usize];
            let shadow = &records[hit_group_index(i as u32, RayType::Shadow) as usize];
            assert_eq!(primary.shader, HIT_GROUP);
            assert_eq!(shadow.shader, SHADOW_HIT_GROUP);
            assert_eq!(primary.arguments, shadow.arguments);
            assert_eq!(primary.arguments[0],
                       ShaderArgument::Address(object.vertex_buffer.gpu_address()));
            assert_eq!(primary.arguments[4], ShaderArgument::DescriptorTable(0xAB00));
        }
    }

    #[test]
    fn single_sphere_end_to_end() {
        let device = FakeDevice::new();
        let objects: Vec<SceneObject> = sample_objects().into_iter().take(1).collect();
        let scene = upload(&device, &objects);

        let structures = build_scene(&device, &scene.instances()).unwrap();
        let descs = structures.instances.descs();
        assert_eq!(descs.len(), 1);
        assert_eq!(descs[0].instance_id(), 0);
        assert_eq!(descs[0].hit_group_contribution(), 0);

        let table = scene.binding_table(0x1000, 0x2000)
            .build(&device, &identifiers())
            .unwrap();
        assert_eq!(table.layout.ray_generation.count, 1);
        assert_eq!(table.layout.miss.count, 2);
        assert_eq!(table.layout.hit_group.count, 2);
        assert!(device.created_named(SHADER_BINDING_TABLE_NAME).is_some());
    }

    #[test]
    fn sample_table_matches_pipeline() {
        let device = FakeDevice::new();
        let scene = upload(&device, &sample_objects());

        let table = scene.binding_table(0x1000, 0x2000)
            .build(&device, &identifiers())
            .unwrap();
        // Ray generation and hit records carry arguments, miss records don't.
        assert_eq!(table.layout.ray_generation.stride, 64);
        assert_eq!(table.layout.miss.stride, 32);
        assert_eq!(table.layout.hit_group.stride, 96);
        assert_eq!(table.layout.hit_group.size, 16 * 96);
    }
}
