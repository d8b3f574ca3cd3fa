use std::path::PathBuf;

use thiserror::Error;

#[cfg(any(windows, test))]
use crate::root_signature::ArgumentKind;

// Only the Windows renderer raises most of these.
#[derive(Error, Debug)]
#[cfg_attr(not(any(windows, test)), allow(dead_code))]
pub enum Error {
    #[error("Ray tracing is not supported: {0}")]
    CapabilityMissing(String),

    #[error("Could not allocate {size} bytes for the {name}")]
    Allocation { name: String, size: u64 },

    #[error("Write of {len} bytes at offset {offset} overflows the {name} ({size} bytes)")]
    BufferOverflow { name: String, offset: u64, len: usize, size: u64 },

    #[error("Top level acceleration structures hold at most {limit} instances")]
    TooManyInstances { limit: usize },

    #[error("Cannot build a top level acceleration structure without instances")]
    EmptyTopLevel,

    #[error("Unresolved shader name '{name}' referenced by {context}")]
    UnresolvedShader { name: String, context: String },

    #[error("Invalid ray tracing pipeline: {0}")]
    InvalidPipeline(String),

    #[cfg(any(windows, test))]
    #[error("Shader record for '{shader}' expects arguments {expected:?}, got {found:?}")]
    ArgumentMismatch {
        shader: String,
        expected: Vec<ArgumentKind>,
        found: Vec<ArgumentKind>,
    },

    #[error("Invalid shader binding table: {0}")]
    InvalidBindingTable(String),

    #[error("Descriptor heap is full ({capacity} descriptors)")]
    DescriptorHeapFull { capacity: usize },

    #[error("Frame slot {index} out of range ({count} slots)")]
    FrameSlotOutOfRange { index: usize, count: usize },

    #[error("Failed to serialize root signature: {0}")]
    RootSignature(String),

    #[error("Failed to load shader library {}", .path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Direct3D 12 ray tracing requires Windows")]
    UnsupportedPlatform,

    #[error("{call} failed: {message}")]
    Api { call: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attaches the name of the failing call to a native API error.
#[cfg(windows)]
pub trait ApiResult<T> {
    fn api(self, call: &'static str) -> Result<T>;
}

#[cfg(windows)]
impl<T> ApiResult<T> for windows::core::Result<T> {
    fn api(self, call: &'static str) -> Result<T> {
        self.map_err(|e| Error::Api {
            call,
            message: format!("{} ({:?})", e.message(), e.code()),
        })
    }
}
