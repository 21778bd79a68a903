//! stackctl - inspect a stackfb setup
//!
//! Everything runs in-process against an emulated framebuffer, so the
//! tool works without display hardware. It is meant for checking a config
//! file before deploying it and for watching the built-in stacking window
//! manager react to input.
//!
//! # Usage
//!
//! ```sh
//! # Print the effective configuration as TOML
//! stackctl config
//!
//! # List the video modes of the emulated framebuffer
//! stackctl --modes 800x600,1024x768 modes
//!
//! # Describe the surface pools as JSON
//! stackctl pools
//!
//! # Open three windows, click one and print the stack top to bottom
//! stackctl --config ./config.toml demo
//! ```
//!
//! Options:
//! - `--config PATH`: read this file instead of searching the usual places
//! - `--modes LIST`: comma separated `WIDTHxHEIGHT` mode table
//! - `--fb-size BYTES`: size of the emulated video memory
//!
//! Logging is controlled by `RUST_LOG`.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use surface::{
    FbdevPool, FramebufferDevice, MemoryFramebuffer, PixelFormat, PoolRegistry, ResourceId, Surface, SurfaceConfig,
    SurfaceTypes, SystemPool, VideoMode,
};
use wm::types::{InputEvent, Rect, StackingClass, WindowDescription, WindowEvent, WindowId, WindowOptions};
use wm::{ClientSession, Config, ModuleRegistry, Session};

/// Physical address reported by the emulated framebuffer
const EMULATED_PHYS: u64 = 0xd000_0000;

/// Default mode table of the emulated framebuffer
const DEFAULT_MODES: &str = "640x480,800x600,1024x768";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Config,
    Modes,
    Pools,
    Demo,
}

#[derive(Debug, Clone, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    modes: Vec<VideoMode>,
    fb_size: usize,
    command: Command,
}

fn usage() -> &'static str {
    "usage: stackctl [--config PATH] [--modes WxH,...] [--fb-size BYTES] <config|modes|pools|demo>"
}

fn parse_mode(arg: &str) -> Result<VideoMode> {
    let (w, h) = arg
        .trim()
        .split_once('x')
        .with_context(|| format!("mode '{arg}' is not WIDTHxHEIGHT"))?;
    let xres: u32 = w.parse().with_context(|| format!("bad width in mode '{arg}'"))?;
    let yres: u32 = h.parse().with_context(|| format!("bad height in mode '{arg}'"))?;
    if xres == 0 || yres == 0 {
        bail!("mode '{arg}' has a zero dimension");
    }
    Ok(VideoMode::new(xres, yres, 0))
}

fn parse_modes(list: &str) -> Result<Vec<VideoMode>> {
    let modes = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_mode)
        .collect::<Result<Vec<_>>>()?;
    if modes.is_empty() {
        bail!("mode list is empty");
    }
    Ok(modes)
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut config = None;
    let mut modes = None;
    let mut fb_size = 16 << 20;
    let mut command = None;

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i).with_context(|| format!("{arg} needs a value"))
        };
        match arg {
            "--config" => config = Some(PathBuf::from(value()?)),
            "--modes" => modes = Some(parse_modes(value()?)?),
            "--fb-size" => {
                let raw = value()?;
                fb_size = raw.parse().with_context(|| format!("bad --fb-size '{raw}'"))?;
            }
            "-h" | "--help" => bail!("{}", usage()),
            "config" | "modes" | "pools" | "demo" if command.is_none() => {
                command = Some(match arg {
                    "config" => Command::Config,
                    "modes" => Command::Modes,
                    "pools" => Command::Pools,
                    _ => Command::Demo,
                });
            }
            other => bail!("unexpected argument '{other}'\n{}", usage()),
        }
        i += 1;
    }

    let Some(command) = command else {
        bail!("{}", usage());
    };
    let modes = match modes {
        Some(modes) => modes,
        None => parse_modes(DEFAULT_MODES)?,
    };
    Ok(Options {
        config,
        modes,
        fb_size,
        command,
    })
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Respect NO_COLOR environment variable for testing
    let use_ansi = std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_ansi(use_ansi),
        )
        .with(filter)
        .init();
}

fn load_config(options: &Options) -> Result<Config> {
    let config = match &options.config {
        Some(path) => Config::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// System memory plus an fbdev pool on an emulated framebuffer
fn build_pools(config: &Config, options: &Options) -> Result<(Arc<PoolRegistry>, Arc<MemoryFramebuffer>, Arc<FbdevPool>)> {
    let fb = Arc::new(
        MemoryFramebuffer::new(options.fb_size, EMULATED_PHYS, options.modes.clone())
            .context("creating emulated framebuffer")?,
    );
    let fbdev = Arc::new(FbdevPool::init(fb.clone()).context("initializing framebuffer pool")?);
    let registry = Arc::new(PoolRegistry::new());
    registry.register(Arc::new(
        SystemPool::init(config.system_pool_size).context("initializing system pool")?,
    ));
    registry.register(fbdev.clone());
    Ok((registry, fb, fbdev))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_config(options: &Options) -> Result<()> {
    let config = load_config(options)?;
    print!("{}", toml::to_string_pretty(&config).context("serializing configuration")?);
    Ok(())
}

fn run_modes(options: &Options) -> Result<()> {
    let fb = MemoryFramebuffer::new(options.fb_size, EMULATED_PHYS, options.modes.clone())?;
    print_json(&fb.modes())
}

fn run_pools(options: &Options) -> Result<()> {
    let config = load_config(options)?;
    let (registry, _fb, _fbdev) = build_pools(&config, options)?;
    let descriptions: Vec<_> = registry
        .descriptions()
        .into_iter()
        .map(|(id, description)| serde_json::json!({ "id": id, "pool": description }))
        .collect();
    print_json(&descriptions)
}

#[derive(Debug, Serialize)]
struct WindowReport {
    id: WindowId,
    bounds: Rect,
    opacity: u8,
    stacking: StackingClass,
    options: WindowOptions,
    events: Vec<WindowEvent>,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    wm: wm::WmInfo,
    mode: Option<VideoMode>,
    windows: Vec<WindowReport>,
}

fn run_demo(options: &Options) -> Result<()> {
    let config = Config {
        wm: Some(wm::backends::stacking::StackingBackend::NAME.to_string()),
        ..load_config(options)?
    };
    let (registry, fb, _fbdev) = build_pools(&config, options)?;
    let mode = options.modes[0];
    let (width, height) = (mode.xres as i32, mode.yres as i32);

    let primary = Surface::new(
        &registry,
        SurfaceConfig::new(mode.xres, mode.yres, PixelFormat::Rgb16),
        SurfaceTypes::LAYER,
        ResourceId::PRIMARY_LAYER,
    )
    .context("allocating the primary layer")?;

    let session = Session::create(std::process::id(), config, registry, ModuleRegistry::builtin())?;
    let context = session.create_context(width, height)?;
    let stack = context.stack().context("layer context has no stack")?;
    let client = ClientSession::new(&session, context.clone());

    let mut windows = Vec::new();
    let mut buffers = Vec::new();
    for n in 0..3 {
        let origin = 40 + n * 60;
        let window = client.create_window(&WindowDescription::new(origin, origin, width / 3, height / 3))?;
        window.set_opacity(0xff)?;
        buffers.push(window.create_event_buffer()?);
        windows.push(window);
    }
    tracing::info!(count = windows.len(), "demo windows created");

    // Click into the bottom window where no other window covers it
    for event in [
        InputEvent::Motion { x: 45, y: 45 },
        InputEvent::ButtonPress { button: 1 },
        InputEvent::ButtonRelease { button: 1 },
        InputEvent::KeyPress {
            symbol: 'a' as u32,
            modifiers: 0,
        },
    ] {
        stack.process_input(&event)?;
    }

    let mut reports = Vec::new();
    for id in stack.windows()? {
        let (bounds, opacity, stacking, window_options) = {
            let state = stack.lock();
            let Some(window) = state.window(id) else { continue };
            let config = window.config();
            (config.bounds, config.opacity, config.stacking, config.options)
        };
        let mut events = Vec::new();
        if let Some(index) = windows.iter().position(|w| w.id().ok() == Some(id)) {
            while let Some(event) = buffers[index].next_event()? {
                events.push(event);
            }
        }
        reports.push(WindowReport {
            id,
            bounds,
            opacity,
            stacking,
            options: window_options,
            events,
        });
    }

    print_json(&DemoReport {
        wm: session.core().get_info(),
        mode: fb.current_mode().map(|(mode, _)| mode),
        windows: reports,
    })?;

    drop(buffers);
    for window in windows {
        window.release()?;
    }
    drop(client);
    drop(stack);
    drop(context);
    drop(primary);
    // The stack is still registered with the core until an emergency shutdown closes it
    session.shutdown(true)?;
    Ok(())
}

fn main() -> Result<()> {
    setup_logging();

    let args: Vec<String> = env::args().collect();
    let options = parse_args(&args)?;
    tracing::debug!(?options, "starting");

    match options.command {
        Command::Config => run_config(&options),
        Command::Modes => run_modes(&options),
        Command::Pools => run_pools(&options),
        Command::Demo => run_demo(&options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("stackctl").chain(list.iter().copied()).map(String::from).collect()
    }

    #[test]
    fn command_is_required() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["--fb-size", "1024"])).is_err());
    }

    #[test]
    fn defaults_apply_without_options() {
        let options = parse_args(&args(&["pools"])).unwrap();
        assert_eq!(options.command, Command::Pools);
        assert_eq!(options.config, None);
        assert_eq!(options.modes.len(), 3);
        assert_eq!((options.modes[0].xres, options.modes[0].yres), (640, 480));
    }

    #[test]
    fn options_may_follow_the_command() {
        let options = parse_args(&args(&["demo", "--modes", "320x240", "--config", "/tmp/stack.toml"])).unwrap();
        assert_eq!(options.command, Command::Demo);
        assert_eq!(options.modes, vec![VideoMode::new(320, 240, 0)]);
        assert_eq!(options.config, Some(PathBuf::from("/tmp/stack.toml")));
    }

    #[test]
    fn missing_option_value_is_an_error() {
        let err = parse_args(&args(&["modes", "--fb-size"])).unwrap_err();
        assert!(err.to_string().contains("--fb-size"), "{err}");
    }

    #[test]
    fn second_command_is_rejected() {
        assert!(parse_args(&args(&["modes", "pools"])).is_err());
    }

    #[test]
    fn malformed_modes_are_rejected() {
        assert!(parse_mode("640").is_err());
        assert!(parse_mode("0x480").is_err());
        assert!(parse_mode("wide x tall").is_err());
        assert!(parse_modes(" , ").is_err());
        assert_eq!(parse_modes("800x600, 1024x768").unwrap().len(), 2);
    }
}
