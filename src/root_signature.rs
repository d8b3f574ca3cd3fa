//! Root signature descriptions.
//!
//! A description is plain data so shader binding table records can be checked
//! against it; the native object is only created when the pipeline is
//! generated.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Cbv,
    Srv,
    Uav,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorRange {
    pub kind: DescriptorKind,
    pub base_register: u32,
    pub count: u32,
    pub space: u32,
    /// Offset of the first descriptor from the start of the table.
    pub heap_offset: u32,
}

impl DescriptorRange {
    pub fn new(kind: DescriptorKind, base_register: u32, count: u32,
               heap_offset: u32) -> Self {
        Self { kind, base_register, count, space: 0, heap_offset }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RootParameter {
    /// Root CBV/SRV/UAV read through a GPU virtual address.
    Descriptor { kind: DescriptorKind, register: u32, space: u32 },
    /// Descriptor table read through a descriptor heap pointer.
    Table(Vec<DescriptorRange>),
}

/// What an 8-byte shader record argument holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    Address,
    DescriptorTable,
}

impl RootParameter {
    pub fn argument_kind(&self) -> ArgumentKind {
        match self {
            RootParameter::Descriptor { .. } => ArgumentKind::Address,
            RootParameter::Table(_) => ArgumentKind::DescriptorTable,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub local: bool,
}

impl RootSignatureDesc {
    pub fn local() -> Self {
        Self { parameters: Vec::new(), local: true }
    }

    pub fn global() -> Self {
        Self { parameters: Vec::new(), local: false }
    }

    pub fn descriptor(mut self, kind: DescriptorKind, register: u32) -> Self {
        self.parameters.push(RootParameter::Descriptor { kind, register, space: 0 });
        self
    }

    pub fn table(mut self, ranges: Vec<DescriptorRange>) -> Self {
        self.parameters.push(RootParameter::Table(ranges));
        self
    }

    /// Kinds of the arguments a shader record bound to this signature holds,
    /// in parameter order.
    pub fn argument_kinds(&self) -> Vec<ArgumentKind> {
        self.parameters.iter().map(RootParameter::argument_kind).collect()
    }
}

#[cfg(windows)]
mod d3d12_root_signature {
    use super::*;
    use crate::d3d12::*;
    use crate::error::{ApiResult, Error, Result};

    impl DescriptorKind {
        fn range_type(self) -> D3D12_DESCRIPTOR_RANGE_TYPE {
            match self {
                DescriptorKind::Cbv => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
                DescriptorKind::Srv => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                DescriptorKind::Uav => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
            }
        }

        fn parameter_type(self) -> D3D12_ROOT_PARAMETER_TYPE {
            match self {
                DescriptorKind::Cbv => D3D12_ROOT_PARAMETER_TYPE_CBV,
                DescriptorKind::Srv => D3D12_ROOT_PARAMETER_TYPE_SRV,
                DescriptorKind::Uav => D3D12_ROOT_PARAMETER_TYPE_UAV,
            }
        }
    }

    impl RootSignatureDesc {
        pub fn create(&self, device: &ID3D12Device5)
            -> Result<ID3D12RootSignature> {

            // Ranges must stay alive until serialization.
            let ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = self.parameters.iter()
                .map(|p| match p {
                    RootParameter::Table(ranges) => ranges.iter()
                        .map(|r| D3D12_DESCRIPTOR_RANGE {
                            RangeType: r.kind.range_type(),
                            NumDescriptors: r.count,
                            BaseShaderRegister: r.base_register,
                            RegisterSpace: r.space,
                            OffsetInDescriptorsFromTableStart: r.heap_offset,
                        })
                        .collect(),
                    RootParameter::Descriptor { .. } => Vec::new(),
                })
                .collect();

            let parameters: Vec<D3D12_ROOT_PARAMETER> = self.parameters.iter()
                .zip(ranges.iter())
                .map(|(p, r)| match p {
                    RootParameter::Descriptor { kind, register, space } =>
                        D3D12_ROOT_PARAMETER {
                            ParameterType: kind.parameter_type(),
                            Anonymous: D3D12_ROOT_PARAMETER_0 {
                                Descriptor: D3D12_ROOT_DESCRIPTOR {
                                    ShaderRegister: *register,
                                    RegisterSpace: *space,
                                },
                            },
                            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                        },
                    RootParameter::Table(_) => D3D12_ROOT_PARAMETER {
                        ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                        Anonymous: D3D12_ROOT_PARAMETER_0 {
                            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                                NumDescriptorRanges: r.len() as u32,
                                pDescriptorRanges: r.as_ptr(),
                            },
                        },
                        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                    },
                })
                .collect();

            let desc = D3D12_ROOT_SIGNATURE_DESC {
                NumParameters: parameters.len() as u32,
                pParameters: parameters.as_ptr(),
                NumStaticSamplers: 0,
                pStaticSamplers: core::ptr::null(),
                Flags: if self.local {
                    D3D12_ROOT_SIGNATURE_FLAG_LOCAL_ROOT_SIGNATURE
                } else {
                    D3D12_ROOT_SIGNATURE_FLAG_NONE
                },
            };

            let mut blob: Option<ID3DBlob> = None;
            let mut error_blob: Option<ID3DBlob> = None;
            let serialized = unsafe {
                D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1,
                                            &mut blob, &mut error_blob)
            };

            if let Err(e) = serialized {
                let message = error_blob.as_ref()
                    .map(|b| unsafe { blob_to_string(b) })
                    .unwrap_or_else(|| e.message().to_string());
                return Err(Error::RootSignature(message));
            }

            let blob = blob.ok_or_else(|| Error::RootSignature(
                    "serializer returned no blob".into()))?;

            unsafe {
                let data = core::slice::from_raw_parts(
                    blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
                device.CreateRootSignature(0, data).api("CreateRootSignature")
            }
        }
    }

    unsafe fn blob_to_string(blob: &ID3DBlob) -> String {
        let data = core::slice::from_raw_parts(
            blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
        String::from_utf8_lossy(data).trim_end_matches('\0').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DescriptorKind::*;

    #[test]
    fn argument_kinds_follow_parameter_order() {
        let desc = RootSignatureDesc::local()
            .descriptor(Srv, 0)
            .table(vec![DescriptorRange::new(Srv, 2, 1, 2)])
            .descriptor(Cbv, 1);

        assert!(desc.local);
        assert_eq!(desc.argument_kinds(), vec![
            ArgumentKind::Address,
            ArgumentKind::DescriptorTable,
            ArgumentKind::Address,
        ]);
    }

    #[test]
    fn empty_signature_takes_no_arguments() {
        assert!(RootSignatureDesc::local().argument_kinds().is_empty());
        assert!(!RootSignatureDesc::global().local);
    }
}
