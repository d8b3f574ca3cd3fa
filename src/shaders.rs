//! Shader libraries, constant buffer layouts and the fixed pipeline of the
//! sample.

use std::fs;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use log::debug;

use math::{vec::Vec4, mat::Mat4};

use crate::error::{Error, Result};
use crate::pipeline::{PipelineBuilder, ShaderLibrary};
use crate::root_signature::{DescriptorKind::*, DescriptorRange, RootSignatureDesc};

pub const RAY_GENERATION: &str = "RayGen";
pub const MISS: &str = "Miss";
pub const SHADOW_MISS: &str = "ShadowMiss";
pub const CLOSEST_HIT: &str = "ObjectClosestHit";
pub const SHADOW_CLOSEST_HIT: &str = "ShadowClosestHit";
pub const HIT_GROUP: &str = "HitGroup";
pub const SHADOW_HIT_GROUP: &str = "ShadowHitGroup";

pub struct LibraryFile {
    pub name: &'static str,
    pub file: &'static str,
    pub exports: &'static [&'static str],
}

pub const LIBRARIES: [LibraryFile; 4] = [
    LibraryFile { name: "RayGen", file: "RayGen.lib.bin", exports: &[RAY_GENERATION] },
    LibraryFile { name: "Miss", file: "Miss.lib.bin", exports: &[MISS] },
    LibraryFile { name: "Hit", file: "Hit.lib.bin", exports: &[CLOSEST_HIT] },
    LibraryFile {
        name: "ShadowRay",
        file: "ShadowRay.lib.bin",
        exports: &[SHADOW_CLOSEST_HIT, SHADOW_MISS],
    },
];

/// Color, shadow flag and hit distance.
pub const MAX_PAYLOAD_SIZE: u32 = 7 * 4;
/// Barycentrics.
pub const MAX_ATTRIBUTE_SIZE: u32 = 2 * 4;
pub const MAX_RECURSION_DEPTH: u32 = 10;

// Slots of the shader visible CBV/SRV/UAV heap.
pub const OUTPUT_SLOT: u32 = 0;
pub const ACCUMULATION_SLOT: u32 = 1;
pub const TLAS_SLOT: u32 = 2;
pub const CAMERA_SLOT: u32 = 3;
pub const HEAP_DESCRIPTOR_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MaterialType {
    Diffuse = 0,
    Specular = 1,
    Refractive = 2,
    Light = 3,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Material {
    pub color: Vec4,
    pub emission: Vec4,
    /// A [`MaterialType`], read as a float by the shaders.
    pub kind: f32,
    pub _padding: [f32; 3],
}

impl Material {
    pub fn new(color: Vec4, emission: Vec4, kind: MaterialType) -> Self {
        Self {
            color,
            emission,
            kind: kind as u32 as f32,
            _padding: [0.0; 3],
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Light {
    pub position: Vec4,
    pub size: Vec4,
    pub emission: Vec4,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct CameraConstants {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_inverse: Mat4,
    pub projection_inverse: Mat4,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct FrameConstants {
    pub frames_since_move: u32,
    pub _padding: [u32; 3],
}

pub fn load_libraries(dir: &Path) -> Result<Vec<ShaderLibrary>> {
    LIBRARIES.iter()
        .map(|l| -> Result<ShaderLibrary> {
            let path = dir.join(l.file);
            let bytecode = fs::read(&path)
                .map_err(|source| Error::ShaderLoad { path: path.clone(), source })?;
            debug!("Loaded {} ({} bytes)", path.display(), bytecode.len());
            Ok(ShaderLibrary {
                name: l.name.to_string(),
                bytecode,
                exports: l.exports.iter().map(|e| e.to_string()).collect(),
            })
        })
        .collect()
}

/// Output and accumulation images, the scene and the camera, followed by the
/// frame counter.
pub fn ray_generation_signature() -> RootSignatureDesc {
    RootSignatureDesc::local()
        .table(vec![
            DescriptorRange::new(Uav, 0, 1, OUTPUT_SLOT),
            DescriptorRange::new(Uav, 1, 1, ACCUMULATION_SLOT),
            DescriptorRange::new(Srv, 0, 1, TLAS_SLOT),
            DescriptorRange::new(Cbv, 0, 1, CAMERA_SLOT),
        ])
        .descriptor(Cbv, 1)
}

pub fn miss_signature() -> RootSignatureDesc {
    RootSignatureDesc::local()
}

/// Vertices, indices, material, light and the scene for secondary rays.
pub fn hit_signature() -> RootSignatureDesc {
    RootSignatureDesc::local()
        .descriptor(Srv, 0)
        .descriptor(Srv, 1)
        .descriptor(Cbv, 0)
        .descriptor(Cbv, 1)
        .table(vec![DescriptorRange::new(Srv, 2, 1, TLAS_SLOT)])
}

/// Shadow hits read the same resources as primary hits but keep their own
/// signature so the two can diverge.
pub fn shadow_hit_signature() -> RootSignatureDesc {
    hit_signature()
}

pub fn pipeline(libraries: Vec<ShaderLibrary>) -> PipelineBuilder {
    let mut pipeline = PipelineBuilder::new();
    for library in libraries {
        pipeline.add_library(library);
    }

    pipeline
        .add_hit_group(HIT_GROUP, CLOSEST_HIT)
        .add_hit_group(SHADOW_HIT_GROUP, SHADOW_CLOSEST_HIT)
        .add_root_signature_association(ray_generation_signature(), &[RAY_GENERATION])
        .add_root_signature_association(miss_signature(), &[MISS, SHADOW_MISS])
        .add_root_signature_association(hit_signature(), &[HIT_GROUP])
        .add_root_signature_association(shadow_hit_signature(), &[SHADOW_HIT_GROUP])
        .set_max_payload_size(MAX_PAYLOAD_SIZE)
        .set_max_attribute_size(MAX_ATTRIBUTE_SIZE)
        .set_max_recursion_depth(MAX_RECURSION_DEPTH);

    pipeline
}
