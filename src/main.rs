//#![windows_subsystem = "windows"]

use log::error;

mod config;
mod error;

// Platform independent setup planning, driven by the Windows renderer.
#[cfg(any(windows, test))]
mod accel;
#[cfg(any(windows, test))]
mod alloc;
#[cfg(any(windows, test))]
mod camera;
#[cfg(any(windows, test))]
mod frames;
#[cfg(any(windows, test))]
mod geometry;
#[cfg(any(windows, test))]
mod heap;
#[cfg(any(windows, test))]
mod pipeline;
#[cfg(any(windows, test))]
mod root_signature;
#[cfg(any(windows, test))]
mod sbt;
#[cfg(any(windows, test))]
mod scene;
#[cfg(any(windows, test))]
mod shaders;

#[cfg(windows)]
mod d3d12;
#[cfg(windows)]
mod render;
#[cfg(windows)]
mod win32;

#[cfg(test)]
mod testing;

use config::Config;
use error::Result;

#[cfg(windows)]
fn run(config: Config) -> Result<()> {
    use render::Renderer;
    use win32::Event;

    let mut window = win32::create_window(config::WINDOW_TITLE,
                                          config.width, config.height)?;
    let mut renderer = Renderer::init(&window, &config)?;

    'main: loop {
        while let Some(event) = window.poll_events() {
            match event {
                Event::Quit => break 'main,
                Event::KeyPress(key) => renderer.handle_key(key),
            }
        }

        renderer.render()?;
    }

    Ok(())
}

#[cfg(not(windows))]
fn run(_config: Config) -> Result<()> {
    Err(error::Error::UnsupportedPlatform)
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let result = Config::from_args(std::env::args().skip(1)).and_then(run);

    if let Err(e) = result {
        error!("{e}");
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = std::error::Error::source(cause);
        }
        std::process::exit(1);
    }
}
