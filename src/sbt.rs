//! Shader binding table layout and serialization.
//!
//! The table holds three sections (ray generation, miss, hit group). Every
//! record in a section uses the same stride: a shader identifier followed by
//! the largest argument list in the section, rounded to the record alignment.

use log::{debug, info};

use crate::alloc::{align_up, BufferAllocator, BufferDesc, GpuBuffer};
use crate::error::{Error, Result};
use crate::pipeline::{ShaderIdentifiers, SHADER_IDENTIFIER_SIZE};
use crate::root_signature::ArgumentKind;

pub const SHADER_RECORD_ALIGNMENT: u64 = 32;
pub const SHADER_TABLE_ALIGNMENT: u64 = 64;
pub const ARGUMENT_SIZE: u64 = 8;

pub const SHADER_BINDING_TABLE_NAME: &str = "shader binding table";

/// One 8-byte root argument of a shader record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderArgument {
    /// GPU virtual address of a buffer, for root CBV/SRV/UAV parameters.
    Address(u64),
    /// GPU descriptor handle of the first descriptor of a table.
    DescriptorTable(u64),
}

impl ShaderArgument {
    pub fn kind(&self) -> ArgumentKind {
        match self {
            ShaderArgument::Address(_) => ArgumentKind::Address,
            ShaderArgument::DescriptorTable(_) => ArgumentKind::DescriptorTable,
        }
    }

    pub fn value(&self) -> u64 {
        match *self {
            ShaderArgument::Address(v) | ShaderArgument::DescriptorTable(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderRecord {
    pub shader: String,
    pub arguments: Vec<ShaderArgument>,
}

pub fn record_stride(max_arguments: usize) -> u64 {
    align_up(SHADER_IDENTIFIER_SIZE as u64 + ARGUMENT_SIZE * max_arguments as u64,
             SHADER_RECORD_ALIGNMENT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionLayout {
    pub offset: u64,
    pub stride: u64,
    pub count: usize,
    pub size: u64,
}

impl SectionLayout {
    fn new(offset: u64, records: &[ShaderRecord]) -> Self {
        let max_arguments = records.iter()
            .map(|r| r.arguments.len())
            .max()
            .unwrap_or(0);
        let stride = record_stride(max_arguments);
        Self {
            offset,
            stride,
            count: records.len(),
            size: stride * records.len() as u64,
        }
    }

    /// Offset of the section that follows this one.
    fn end(&self) -> u64 {
        self.offset + align_up(self.size, SHADER_TABLE_ALIGNMENT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub ray_generation: SectionLayout,
    pub miss: SectionLayout,
    pub hit_group: SectionLayout,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StridedRange {
    pub start: u64,
    pub size: u64,
    pub stride: u64,
}

/// What a ray dispatch needs to locate each section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRegions {
    pub ray_generation: AddressRange,
    pub miss: StridedRange,
    pub hit_group: StridedRange,
}

impl TableLayout {
    pub fn dispatch_regions(&self, base: u64) -> DispatchRegions {
        let strided = |s: &SectionLayout| StridedRange {
            start: base + s.offset,
            size: s.size,
            stride: s.stride,
        };
        DispatchRegions {
            ray_generation: AddressRange {
                start: base + self.ray_generation.offset,
                size: self.ray_generation.size,
            },
            miss: strided(&self.miss),
            hit_group: strided(&self.hit_group),
        }
    }
}

#[derive(Debug, Default)]
pub struct ShaderBindingTableBuilder {
    ray_generation: Vec<ShaderRecord>,
    miss: Vec<ShaderRecord>,
    hit_group: Vec<ShaderRecord>,
}

fn record(shader: &str, arguments: Vec<ShaderArgument>) -> ShaderRecord {
    ShaderRecord { shader: shader.to_string(), arguments }
}

impl ShaderBindingTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ray_generation(&mut self, shader: &str,
                              arguments: Vec<ShaderArgument>) -> &mut Self {
        self.ray_generation.push(record(shader, arguments));
        self
    }

    pub fn add_miss(&mut self, shader: &str,
                    arguments: Vec<ShaderArgument>) -> &mut Self {
        self.miss.push(record(shader, arguments));
        self
    }

    /// Hit group records are indexed by the GPU as instance contribution plus
    /// ray type, so they must be added per instance in registration order.
    pub fn add_hit_group(&mut self, shader: &str,
                         arguments: Vec<ShaderArgument>) -> &mut Self {
        self.hit_group.push(record(shader, arguments));
        self
    }

    pub fn hit_groups(&self) -> &[ShaderRecord] {
        &self.hit_group
    }

    pub fn layout(&self) -> TableLayout {
        let ray_generation = SectionLayout::new(0, &self.ray_generation);
        let miss = SectionLayout::new(ray_generation.end(), &self.miss);
        let hit_group = SectionLayout::new(miss.end(), &self.hit_group);
        TableLayout {
            ray_generation,
            miss,
            hit_group,
            size: hit_group.end(),
        }
    }

    fn sections(&self) -> [(&[ShaderRecord], &'static str); 3] {
        [
            (self.ray_generation.as_slice(), "ray generation"),
            (self.miss.as_slice(), "miss"),
            (self.hit_group.as_slice(), "hit group"),
        ]
    }

    /// Checks the record counts and that every record matches the local root
    /// signature of its shader.
    pub fn validate(&self, identifiers: &ShaderIdentifiers) -> Result<()> {
        if self.ray_generation.len() != 1 {
            return Err(Error::InvalidBindingTable(format!(
                "expected exactly one ray generation record, got {}",
                self.ray_generation.len())));
        }

        for (records, _) in self.sections() {
            for record in records {
                let export = identifiers.get(&record.shader)?;
                let found: Vec<ArgumentKind> = record.arguments.iter()
                    .map(ShaderArgument::kind)
                    .collect();
                if found != export.arguments {
                    return Err(Error::ArgumentMismatch {
                        shader: record.shader.clone(),
                        expected: export.arguments.clone(),
                        found,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn serialize(&self, identifiers: &ShaderIdentifiers) -> Result<Vec<u8>> {
        self.validate(identifiers)?;

        let layout = self.layout();
        let mut bytes = vec![0u8; layout.size as usize];
        let sections = [layout.ray_generation, layout.miss, layout.hit_group];

        for ((records, name), section) in self.sections().into_iter().zip(sections) {
            for (i, record) in records.iter().enumerate() {
                let start = (section.offset + section.stride * i as u64) as usize;
                let identifier = identifiers.get(&record.shader)?.identifier;
                bytes[start..start + SHADER_IDENTIFIER_SIZE]
                    .copy_from_slice(&identifier.0);

                let mut at = start + SHADER_IDENTIFIER_SIZE;
                for argument in &record.arguments {
                    bytes[at..at + ARGUMENT_SIZE as usize]
                        .copy_from_slice(&argument.value().to_le_bytes());
                    at += ARGUMENT_SIZE as usize;
                }
                debug!("{name} record {i}: {} at {start} ({} arguments)",
                       record.shader, record.arguments.len());
            }
        }

        Ok(bytes)
    }

    pub fn build<A: BufferAllocator>(&self, allocator: &A,
                                     identifiers: &ShaderIdentifiers)
        -> Result<ShaderBindingTable<A::Buffer>> {

        let bytes = self.serialize(identifiers)?;
        let layout = self.layout();

        let buffer = allocator.create_buffer(
            &BufferDesc::upload(SHADER_BINDING_TABLE_NAME, layout.size))?;
        buffer.write(0, &bytes)?;

        info!("Shader binding table: {} bytes, {} ray generation / {} miss / {} hit group records",
              layout.size, layout.ray_generation.count, layout.miss.count,
              layout.hit_group.count);

        Ok(ShaderBindingTable { buffer, layout })
    }
}

pub struct ShaderBindingTable<B> {
    pub buffer: B,
    pub layout: TableLayout,
}

impl<B: GpuBuffer> ShaderBindingTable<B> {
    pub fn dispatch_regions(&self) -> DispatchRegions {
        self.layout.dispatch_regions(self.buffer.gpu_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineBuilder, ShaderIdentifier, ShaderLibrary};
    use crate::root_signature::{DescriptorKind, RootSignatureDesc};
    use crate::testing::FakeDevice;
    use ShaderArgument::*;

    fn identifiers() -> ShaderIdentifiers {
        let library = |name: &str, exports: &[&str]| ShaderLibrary {
            name: name.to_string(),
            bytecode: Vec::new(),
            exports: exports.iter().map(|e| e.to_string()).collect(),
        };

        let hit = RootSignatureDesc::local()
            .descriptor(DescriptorKind::Srv, 0)
            .descriptor(DescriptorKind::Srv, 1)
            .descriptor(DescriptorKind::Cbv, 0);

        let mut pipeline = PipelineBuilder::new();
        pipeline
            .add_library(library("RayGen", &["RayGen"]))
            .add_library(library("Miss", &["Miss", "ShadowMiss"]))
            .add_library(library("Hit", &["ClosestHit", "ShadowClosestHit"]))
            .add_hit_group("HitGroup", "ClosestHit")
            .add_hit_group("ShadowHitGroup", "ShadowClosestHit")
            .add_root_signature_association(
                RootSignatureDesc::local()
                    .table(Vec::new())
                    .descriptor(DescriptorKind::Cbv, 1),
                &["RayGen"])
            .add_root_signature_association(hit.clone(), &["HitGroup"])
            .add_root_signature_association(hit, &["ShadowHitGroup"]);

        let names = ["RayGen", "Miss", "ShadowMiss", "HitGroup", "ShadowHitGroup"];
        pipeline.resolve().unwrap()
            .resolve_identifiers(|name| {
                let i = names.iter().position(|n| *n == name)? as u8;
                Some(ShaderIdentifier([i + 1; SHADER_IDENTIFIER_SIZE]))
            })
            .unwrap()
    }

    fn hit_arguments(object: u64) -> Vec<ShaderArgument> {
        vec![Address(0x1000 * object), Address(0x1000 * object + 0x100),
             Address(0x1000 * object + 0x200)]
    }

    fn table(objects: u64, misses: &[&str]) -> ShaderBindingTableBuilder {
        let mut sbt = ShaderBindingTableBuilder::new();
        sbt.add_ray_generation("RayGen", vec![DescriptorTable(0xD000), Address(0xF000)]);
        for miss in misses {
            sbt.add_miss(miss, Vec::new());
        }
        for object in 0..objects {
            sbt.add_hit_group("HitGroup", hit_arguments(object));
            sbt.add_hit_group("ShadowHitGroup", hit_arguments(object));
        }
        sbt
    }

    #[test]
    fn stride_covers_identifier_and_arguments() {
        assert_eq!(record_stride(0), 32);
        assert_eq!(record_stride(1), 64);
        assert_eq!(record_stride(4), 64);
        assert_eq!(record_stride(5), 96);

        for args in 0..16 {
            let stride = record_stride(args);
            assert!(stride >= SHADER_IDENTIFIER_SIZE as u64 + ARGUMENT_SIZE * args as u64);
            assert_eq!(stride % SHADER_RECORD_ALIGNMENT, 0);
        }
    }

    #[test]
    fn section_sizes_and_offsets() {
        let layout = table(3, &["Miss", "ShadowMiss"]).layout();

        assert_eq!(layout.ray_generation.offset, 0);
        assert_eq!(layout.ray_generation.stride, 64);
        assert_eq!(layout.ray_generation.size, 64);

        assert_eq!(layout.miss.offset, 64);
        assert_eq!(layout.miss.stride, 32);
        assert_eq!(layout.miss.size, 2 * 32);

        assert_eq!(layout.hit_group.offset, 128);
        assert_eq!(layout.hit_group.count, 6);
        assert_eq!(layout.hit_group.stride, 64);
        assert_eq!(layout.hit_group.size, 6 * 64);

        assert_eq!(layout.size, 128 + 384);
        for section in [layout.ray_generation, layout.miss, layout.hit_group] {
            assert_eq!(section.size, section.count as u64 * section.stride);
            assert_eq!(section.offset % SHADER_TABLE_ALIGNMENT, 0);
        }
    }

    #[test]
    fn empty_miss_section_leaves_no_gap() {
        let layout = table(1, &[]).layout();

        assert_eq!(layout.miss.size, 0);
        assert_eq!(layout.miss.offset, 64);
        assert_eq!(layout.hit_group.offset, layout.miss.offset);
        assert_eq!(layout.size, 64 + 2 * 64);
    }

    #[test]
    fn odd_section_is_padded_to_table_alignment() {
        let layout = table(1, &["Miss"]).layout();
        assert_eq!(layout.miss.size, 32);
        assert_eq!(layout.hit_group.offset, 128);
    }

    #[test]
    fn records_are_written_in_order() {
        let identifiers = identifiers();
        let sbt = table(2, &["Miss", "ShadowMiss"]);
        let layout = sbt.layout();
        let bytes = sbt.serialize(&identifiers).unwrap();

        assert_eq!(bytes.len() as u64, layout.size);

        let raygen = &bytes[..64];
        assert_eq!(&raygen[..32], &[1; 32]);
        assert_eq!(&raygen[32..40], &0xD000u64.to_le_bytes());
        assert_eq!(&raygen[40..48], &0xF000u64.to_le_bytes());
        assert!(raygen[48..].iter().all(|b| *b == 0));

        assert_eq!(&bytes[64..96], &[2; 32]);
        assert_eq!(&bytes[96..128], &[3; 32]);

        let hits = &bytes[128..];
        let expected = [(4u8, 0u64), (5, 0), (4, 1), (5, 1)];
        for (i, (id, object)) in expected.iter().enumerate() {
            let record = &hits[i * 64..(i + 1) * 64];
            assert_eq!(&record[..32], &[*id; 32]);
            assert_eq!(&record[32..40], &(0x1000 * object).to_le_bytes());
            assert_eq!(&record[48..56], &(0x1000 * object + 0x200).to_le_bytes());
            assert!(record[56..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn two_hit_records_per_object() {
        for objects in [1, 4, 8] {
            let sbt = table(objects, &["Miss"]);
            let names: Vec<&str> = sbt.hit_groups().iter()
                .map(|r| r.shader.as_str())
                .collect();
            assert_eq!(names.len() as u64, 2 * objects);
            assert!(names.chunks(2).all(|c| c == ["HitGroup", "ShadowHitGroup"]));
        }
    }

    #[test]
    fn requires_one_ray_generation_record() {
        let identifiers = identifiers();

        let mut sbt = ShaderBindingTableBuilder::new();
        sbt.add_miss("Miss", Vec::new());
        assert!(matches!(sbt.serialize(&identifiers),
                         Err(Error::InvalidBindingTable(_))));

        let mut sbt = table(1, &[]);
        sbt.add_ray_generation("RayGen", vec![DescriptorTable(0), Address(0)]);
        assert!(matches!(sbt.serialize(&identifiers),
                         Err(Error::InvalidBindingTable(_))));
    }

    #[test]
    fn arguments_must_match_signature() {
        let identifiers = identifiers();

        let mut sbt = table(0, &["Miss"]);
        sbt.add_hit_group("HitGroup", vec![Address(1), Address(2)]);
        match sbt.serialize(&identifiers) {
            Err(Error::ArgumentMismatch { shader, expected, found }) => {
                assert_eq!(shader, "HitGroup");
                assert_eq!(expected.len(), 3);
                assert_eq!(found.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut sbt = ShaderBindingTableBuilder::new();
        sbt.add_ray_generation("RayGen", vec![Address(0), Address(0)]);
        assert!(matches!(sbt.serialize(&identifiers),
                         Err(Error::ArgumentMismatch { .. })));
    }

    #[test]
    fn unknown_shader_is_unresolved() {
        let mut sbt = table(1, &["Miss"]);
        sbt.add_miss("MissingMiss", Vec::new());
        assert!(matches!(sbt.serialize(&identifiers()),
                         Err(Error::UnresolvedShader { name, .. }) if name == "MissingMiss"));
    }

    #[test]
    fn build_uploads_table() {
        let device = FakeDevice::new();
        let sbt = table(2, &["Miss", "ShadowMiss"]);
        let table = sbt.build(&device, &identifiers()).unwrap();

        let created = device.created_named(SHADER_BINDING_TABLE_NAME).unwrap();
        assert_eq!(created.size, table.layout.size);
        assert_eq!(table.buffer.contents(), sbt.serialize(&identifiers()).unwrap());

        let base = table.buffer.gpu_address();
        let regions = table.dispatch_regions();
        assert_eq!(regions.ray_generation, AddressRange { start: base, size: 64 });
        assert_eq!(regions.miss, StridedRange { start: base + 64, size: 64, stride: 32 });
        assert_eq!(regions.hit_group,
                   StridedRange { start: base + 128, size: 4 * 64, stride: 64 });
    }

    #[test]
    fn allocation_failure_is_reported() {
        let device = FakeDevice::failing_allocation(SHADER_BINDING_TABLE_NAME);
        let result = table(1, &["Miss"]).build(&device, &identifiers());

        match result {
            Err(e @ Error::Allocation { .. }) => {
                assert!(e.to_string().contains(SHADER_BINDING_TABLE_NAME));
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("built a table without a buffer"),
        }
        assert!(device.created().is_empty());
    }
}
