use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
#[cfg(windows)]
pub const WINDOW_TITLE: &str = "D3D12 Hello DXR";

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(not(any(windows, test)), allow(dead_code))]
pub struct Config {
    pub width: u32,
    pub height: u32,
    /// Directory holding the compiled `*.lib.bin` shader libraries.
    pub shader_dir: PathBuf,
    pub use_warp: bool,
    pub debug_layer: bool,
    pub vsync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            shader_dir: PathBuf::from("res"),
            use_warp: false,
            debug_layer: cfg!(debug_assertions),
            vsync: true,
        }
    }
}

impl Config {
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut config = Config::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--width" => config.width = parse_size(&arg, args.next())?,
                "--height" => config.height = parse_size(&arg, args.next())?,
                "--shaders" => {
                    let dir = args.next().ok_or_else(|| missing_value(&arg))?;
                    config.shader_dir = PathBuf::from(dir);
                }
                // -warp is the spelling the DirectX samples accept.
                "--warp" | "-warp" | "/warp" => config.use_warp = true,
                "--debug" => config.debug_layer = true,
                "--no-debug" => config.debug_layer = false,
                "--no-vsync" => config.vsync = false,
                _ => return Err(Error::InvalidArgument(
                        format!("unknown flag '{arg}'"))),
            }
        }

        Ok(config)
    }

    #[cfg(any(windows, test))]
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

fn missing_value(flag: &str) -> Error {
    Error::InvalidArgument(format!("{flag} expects a value"))
}

fn parse_size(flag: &str, value: Option<String>) -> Result<u32> {
    let value = value.ok_or_else(|| missing_value(flag))?;
    match value.parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(Error::InvalidArgument(
                format!("{flag} expects a positive integer, got '{value}'"))),
    }
}
