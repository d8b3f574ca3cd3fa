//! Ray tracing pipeline assembly.
//!
//! [`PipelineBuilder`] collects shader libraries, hit groups, root signature
//! associations and limits. [`PipelineBuilder::resolve`] checks every name
//! reference; generating the state object then resolves each shader name
//! once into a [`ShaderIdentifiers`] table used to write the shader binding
//! table.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::root_signature::{ArgumentKind, RootSignatureDesc};

pub const SHADER_IDENTIFIER_SIZE: usize = 32;

pub const MAX_ATTRIBUTE_SIZE: u32 = 32;
pub const MAX_TRACE_RECURSION_DEPTH: u32 = 31;

/// Compiled DXIL library and the entry points it exports.
#[derive(Clone)]
pub struct ShaderLibrary {
    pub name: String,
    pub bytecode: Vec<u8>,
    pub exports: Vec<String>,
}

impl fmt::Debug for ShaderLibrary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ShaderLibrary")
            .field("name", &self.name)
            .field("bytes", &self.bytecode.len())
            .field("exports", &self.exports)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitGroup {
    pub name: String,
    pub closest_hit: String,
    pub any_hit: Option<String>,
    pub intersection: Option<String>,
}

impl HitGroup {
    fn imports(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.closest_hit)
            .chain(self.any_hit.iter())
            .chain(self.intersection.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootSignatureAssociation {
    pub signature: RootSignatureDesc,
    pub shaders: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_payload_size: 4 * 4,
            max_attribute_size: 2 * 4,
            max_recursion_depth: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineBuilder {
    libraries: Vec<ShaderLibrary>,
    hit_groups: Vec<HitGroup>,
    associations: Vec<RootSignatureAssociation>,
    limits: PipelineLimits,
}

/// A name the shader binding table can refer to: a ray generation or miss
/// entry point, or a hit group.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressableShader {
    pub name: String,
    /// Index into the builder's associations, if any.
    pub association: Option<usize>,
    pub arguments: Vec<ArgumentKind>,
}

/// Result of name resolution over a [`PipelineBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineLayout {
    /// Every entry point exported by the libraries.
    pub exports: Vec<String>,
    pub addressable: Vec<AddressableShader>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_library(&mut self, library: ShaderLibrary) -> &mut Self {
        self.libraries.push(library);
        self
    }

    pub fn add_hit_group(&mut self, name: &str, closest_hit: &str) -> &mut Self {
        self.hit_groups.push(HitGroup {
            name: name.to_string(),
            closest_hit: closest_hit.to_string(),
            any_hit: None,
            intersection: None,
        });
        self
    }

    pub fn add_root_signature_association(&mut self,
                                          signature: RootSignatureDesc,
                                          shaders: &[&str]) -> &mut Self {
        self.associations.push(RootSignatureAssociation {
            signature,
            shaders: shaders.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn set_max_payload_size(&mut self, size: u32) -> &mut Self {
        self.limits.max_payload_size = size;
        self
    }

    pub fn set_max_attribute_size(&mut self, size: u32) -> &mut Self {
        self.limits.max_attribute_size = size;
        self
    }

    pub fn set_max_recursion_depth(&mut self, depth: u32) -> &mut Self {
        self.limits.max_recursion_depth = depth;
        self
    }

    pub fn limits(&self) -> PipelineLimits {
        self.limits
    }

    pub fn libraries(&self) -> &[ShaderLibrary] {
        &self.libraries
    }

    pub fn hit_groups(&self) -> &[HitGroup] {
        &self.hit_groups
    }

    pub fn associations(&self) -> &[RootSignatureAssociation] {
        &self.associations
    }

    /// Checks every name reference and the pipeline limits.
    pub fn resolve(&self) -> Result<PipelineLayout> {
        let limits = self.limits;
        if limits.max_payload_size == 0 {
            return Err(Error::InvalidPipeline("payload size is zero".into()));
        }
        if limits.max_attribute_size > MAX_ATTRIBUTE_SIZE {
            return Err(Error::InvalidPipeline(format!(
                "attribute size {} exceeds {MAX_ATTRIBUTE_SIZE} bytes",
                limits.max_attribute_size)));
        }
        if !(1..=MAX_TRACE_RECURSION_DEPTH).contains(&limits.max_recursion_depth) {
            return Err(Error::InvalidPipeline(format!(
                "recursion depth {} outside 1..={MAX_TRACE_RECURSION_DEPTH}",
                limits.max_recursion_depth)));
        }

        let mut exports: Vec<String> = Vec::new();
        let mut known: HashSet<&str> = HashSet::new();
        for library in &self.libraries {
            if library.exports.is_empty() {
                return Err(Error::InvalidPipeline(format!(
                    "library {} exports nothing", library.name)));
            }
            for export in &library.exports {
                if !known.insert(export) {
                    return Err(Error::InvalidPipeline(format!(
                        "{export} is exported twice")));
                }
                exports.push(export.clone());
            }
        }

        let mut imported: HashSet<&str> = HashSet::new();
        for group in &self.hit_groups {
            for import in group.imports() {
                if !exports.contains(import) {
                    return Err(Error::UnresolvedShader {
                        name: import.clone(),
                        context: format!("hit group {}", group.name),
                    });
                }
                imported.insert(import);
            }
        }
        for group in &self.hit_groups {
            if !known.insert(&group.name) {
                return Err(Error::InvalidPipeline(format!(
                    "hit group {} collides with another name", group.name)));
            }
        }

        let mut association_of: HashMap<&str, usize> = HashMap::new();
        for (i, association) in self.associations.iter().enumerate() {
            for shader in &association.shaders {
                if !known.contains(shader.as_str()) {
                    return Err(Error::UnresolvedShader {
                        name: shader.clone(),
                        context: "a root signature association".into(),
                    });
                }
                // Local signatures bind to the hit group, not its shaders.
                if imported.contains(shader.as_str()) {
                    return Err(Error::InvalidPipeline(format!(
                        "{shader} is imported by a hit group, associate the hit group instead")));
                }
                if association_of.insert(shader, i).is_some() {
                    return Err(Error::InvalidPipeline(format!(
                        "{shader} is associated with two root signatures")));
                }
            }
        }

        let addressable = exports.iter()
            .filter(|e| !imported.contains(e.as_str()))
            .chain(self.hit_groups.iter().map(|g| &g.name))
            .map(|name| {
                let association = association_of.get(name.as_str()).copied();
                AddressableShader {
                    name: name.clone(),
                    association,
                    arguments: association
                        .map(|i| self.associations[i].signature.argument_kinds())
                        .unwrap_or_default(),
                }
            })
            .collect();

        Ok(PipelineLayout { exports, addressable })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShaderIdentifier(pub [u8; SHADER_IDENTIFIER_SIZE]);

impl fmt::Debug for ShaderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderExport {
    pub identifier: ShaderIdentifier,
    /// Arguments the local root signature of this shader expects.
    pub arguments: Vec<ArgumentKind>,
}

/// Shader name to identifier mapping of a generated pipeline.
#[derive(Debug, Default, Clone)]
pub struct ShaderIdentifiers {
    table: HashMap<String, ShaderExport>,
}

impl ShaderIdentifiers {
    pub fn get(&self, name: &str) -> Result<&ShaderExport> {
        self.table.get(name).ok_or_else(|| Error::UnresolvedShader {
            name: name.to_string(),
            context: "the shader binding table".into(),
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }
}

impl PipelineLayout {
    /// Looks up the identifier of every addressable shader exactly once.
    pub fn resolve_identifiers<F>(&self, mut lookup: F) -> Result<ShaderIdentifiers>
        where F: FnMut(&str) -> Option<ShaderIdentifier> {

        let mut table = HashMap::with_capacity(self.addressable.len());
        for shader in &self.addressable {
            let identifier = lookup(&shader.name).ok_or_else(|| {
                Error::UnresolvedShader {
                    name: shader.name.clone(),
                    context: "the generated pipeline".into(),
                }
            })?;
            table.insert(shader.name.clone(), ShaderExport {
                identifier,
                arguments: shader.arguments.clone(),
            });
        }

        Ok(ShaderIdentifiers { table })
    }

    pub fn unassociated(&self) -> impl Iterator<Item = &AddressableShader> {
        self.addressable.iter().filter(|s| s.association.is_none())
    }
}

#[cfg(windows)]
pub use self::d3d12_pipeline::RayTracingPipeline;

#[cfg(windows)]
mod d3d12_pipeline {
    use core::ffi::c_void;
    use core::ptr::null;

    use log::{debug, info};
    use windows::core::{Interface, PCWSTR};

    use super::*;
    use crate::d3d12::*;
    use crate::error::ApiResult;

    pub struct RayTracingPipeline {
        pub state_object: ID3D12StateObject,
        pub global_root_signature: ID3D12RootSignature,
        pub identifiers: ShaderIdentifiers,
        _local_root_signatures: Vec<ID3D12RootSignature>,
    }

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn subobject<T>(typ: D3D12_STATE_SUBOBJECT_TYPE, desc: &T)
        -> D3D12_STATE_SUBOBJECT {
        D3D12_STATE_SUBOBJECT {
            Type: typ,
            pDesc: desc as *const T as *const c_void,
        }
    }

    impl PipelineBuilder {
        pub fn generate(&self, device: &ID3D12Device5)
            -> Result<RayTracingPipeline> {

            let layout = self.resolve()?;

            // Every descriptor below points into these vectors, which are
            // fully built before any pointer is taken.
            let export_names: Vec<Vec<Vec<u16>>> = self.libraries.iter()
                .map(|l| l.exports.iter().map(|e| wide(e)).collect())
                .collect();

            let export_descs: Vec<Vec<D3D12_EXPORT_DESC>> = export_names.iter()
                .map(|names| names.iter().map(|n| D3D12_EXPORT_DESC {
                    Name: PCWSTR(n.as_ptr()),
                    ExportToRename: PCWSTR(null()),
                    Flags: D3D12_EXPORT_FLAG_NONE,
                }).collect())
                .collect();

            let library_descs: Vec<D3D12_DXIL_LIBRARY_DESC> = self.libraries.iter()
                .zip(export_descs.iter())
                .map(|(l, exports)| D3D12_DXIL_LIBRARY_DESC {
                    DXILLibrary: D3D12_SHADER_BYTECODE {
                        pShaderBytecode: l.bytecode.as_ptr() as *const c_void,
                        BytecodeLength: l.bytecode.len(),
                    },
                    NumExports: exports.len() as u32,
                    pExports: exports.as_ptr() as *mut D3D12_EXPORT_DESC,
                })
                .collect();

            let hit_group_names: Vec<[Option<Vec<u16>>; 4]> = self.hit_groups.iter()
                .map(|g| [
                    Some(wide(&g.name)),
                    Some(wide(&g.closest_hit)),
                    g.any_hit.as_deref().map(wide),
                    g.intersection.as_deref().map(wide),
                ])
                .collect();

            let name_ptr = |n: &Option<Vec<u16>>| match n {
                Some(n) => PCWSTR(n.as_ptr()),
                None => PCWSTR(null()),
            };

            let hit_group_descs: Vec<D3D12_HIT_GROUP_DESC> = hit_group_names.iter()
                .map(|[name, closest, any, intersection]| D3D12_HIT_GROUP_DESC {
                    HitGroupExport: name_ptr(name),
                    Type: D3D12_HIT_GROUP_TYPE_TRIANGLES,
                    AnyHitShaderImport: name_ptr(any),
                    ClosestHitShaderImport: name_ptr(closest),
                    IntersectionShaderImport: name_ptr(intersection),
                })
                .collect();

            let mut local_signatures = self.associations.iter()
                .map(|a| a.signature.create(device))
                .collect::<Result<Vec<_>>>()?;

            // Shaders without an explicit association get an empty local
            // signature.
            let unassociated: Vec<&str> = layout.unassociated()
                .map(|s| s.name.as_str())
                .collect();
            let mut associated_names: Vec<Vec<&str>> = self.associations.iter()
                .map(|a| a.shaders.iter().map(String::as_str).collect())
                .collect();
            if !unassociated.is_empty() {
                local_signatures.push(RootSignatureDesc::local().create(device)?);
                associated_names.push(unassociated);
            }

            let local_signature_descs: Vec<D3D12_LOCAL_ROOT_SIGNATURE> =
                local_signatures.iter()
                    .map(|rs| D3D12_LOCAL_ROOT_SIGNATURE {
                        pLocalRootSignature: Some(rs.clone()),
                    })
                    .collect();

            let association_names: Vec<Vec<Vec<u16>>> = associated_names.iter()
                .map(|names| names.iter().map(|n| wide(n)).collect())
                .collect();
            let association_ptrs: Vec<Vec<PCWSTR>> = association_names.iter()
                .map(|names| names.iter().map(|n| PCWSTR(n.as_ptr())).collect())
                .collect();

            let config_names: Vec<Vec<u16>> = layout.exports.iter()
                .map(|e| wide(e))
                .collect();
            let config_ptrs: Vec<PCWSTR> = config_names.iter()
                .map(|n| PCWSTR(n.as_ptr()))
                .collect();

            let shader_config = D3D12_RAYTRACING_SHADER_CONFIG {
                MaxPayloadSizeInBytes: self.limits.max_payload_size,
                MaxAttributeSizeInBytes: self.limits.max_attribute_size,
            };

            let global_signature = RootSignatureDesc::global().create(device)?;
            let global_signature_desc = D3D12_GLOBAL_ROOT_SIGNATURE {
                pGlobalRootSignature: Some(global_signature.clone()),
            };

            let pipeline_config = D3D12_RAYTRACING_PIPELINE_CONFIG {
                MaxTraceRecursionDepth: self.limits.max_recursion_depth,
            };

            let subobject_count = library_descs.len()
                + hit_group_descs.len()
                + 2 * local_signature_descs.len()
                + 2 // shader config and its association
                + 1 // global root signature
                + 1; // pipeline config

            // Associations point at earlier subobjects, so the vector must
            // never reallocate.
            let mut subobjects: Vec<D3D12_STATE_SUBOBJECT> =
                Vec::with_capacity(subobject_count);

            for desc in &library_descs {
                subobjects.push(subobject(
                    D3D12_STATE_SUBOBJECT_TYPE_DXIL_LIBRARY, desc));
            }
            for desc in &hit_group_descs {
                subobjects.push(subobject(
                    D3D12_STATE_SUBOBJECT_TYPE_HIT_GROUP, desc));
            }

            let first_local_signature = subobjects.len();
            for desc in &local_signature_descs {
                subobjects.push(subobject(
                    D3D12_STATE_SUBOBJECT_TYPE_LOCAL_ROOT_SIGNATURE, desc));
            }

            let shader_config_index = subobjects.len();
            subobjects.push(subobject(
                D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_SHADER_CONFIG,
                &shader_config));
            subobjects.push(subobject(
                D3D12_STATE_SUBOBJECT_TYPE_GLOBAL_ROOT_SIGNATURE,
                &global_signature_desc));
            subobjects.push(subobject(
                D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_PIPELINE_CONFIG,
                &pipeline_config));

            let base = subobjects.as_ptr();
            let mut association_descs: Vec<D3D12_SUBOBJECT_TO_EXPORTS_ASSOCIATION> =
                association_ptrs.iter()
                    .enumerate()
                    .map(|(i, names)| D3D12_SUBOBJECT_TO_EXPORTS_ASSOCIATION {
                        pSubobjectToAssociate: unsafe {
                            base.add(first_local_signature + i)
                        },
                        NumExports: names.len() as u32,
                        pExports: names.as_ptr(),
                    })
                    .collect();
            association_descs.push(D3D12_SUBOBJECT_TO_EXPORTS_ASSOCIATION {
                pSubobjectToAssociate: unsafe { base.add(shader_config_index) },
                NumExports: config_ptrs.len() as u32,
                pExports: config_ptrs.as_ptr(),
            });

            for desc in &association_descs {
                subobjects.push(subobject(
                    D3D12_STATE_SUBOBJECT_TYPE_SUBOBJECT_TO_EXPORTS_ASSOCIATION,
                    desc));
            }
            debug_assert_eq!(subobjects.len(), subobject_count);
            debug_assert_eq!(subobjects.as_ptr(), base);

            let state_object: ID3D12StateObject = unsafe {
                device.CreateStateObject(&D3D12_STATE_OBJECT_DESC {
                    Type: D3D12_STATE_OBJECT_TYPE_RAYTRACING_PIPELINE,
                    NumSubobjects: subobjects.len() as u32,
                    pSubobjects: subobjects.as_ptr(),
                }).api("CreateStateObject")?
            };

            let properties: ID3D12StateObjectProperties = state_object.cast()
                .api("ID3D12StateObjectProperties")?;

            let identifiers = layout.resolve_identifiers(|name| {
                let name = wide(name);
                unsafe {
                    let id = properties.GetShaderIdentifier(PCWSTR(name.as_ptr()));
                    if id.is_null() {
                        return None;
                    }
                    let mut bytes = [0u8; SHADER_IDENTIFIER_SIZE];
                    bytes.copy_from_slice(core::slice::from_raw_parts(
                        id as *const u8, SHADER_IDENTIFIER_SIZE));
                    Some(ShaderIdentifier(bytes))
                }
            })?;

            for shader in &layout.addressable {
                debug!("{} -> {:?}", shader.name,
                       identifiers.get(&shader.name)?.identifier);
            }
            info!("Generated ray tracing pipeline: {} subobjects, {} shader identifiers",
                  subobject_count, identifiers.len());

            Ok(RayTracingPipeline {
                state_object,
                global_root_signature: global_signature,
                identifiers,
                _local_root_signatures: local_signatures,
            })
        }
    }
}
