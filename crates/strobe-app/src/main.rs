// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use strobe_core::init_tracing;
use strobe_platform::WinitWindow;
use strobe_render::{PlatformWindow, RenderLoop};
use strobe_render_vk::{ShaderSet, VkRenderer, VkRendererDesc};
use tracing::info;

mod config;
mod cube;

use config::{PresentModeCfg, ShaderCfg};
use cube::{cube_texture, cube_vertices, Camera, SpinningCube};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file to read
    #[arg(long, default_value = "strobe.toml")]
    config: PathBuf,
    /// Overrides `render.present_mode`
    #[arg(long)]
    present_mode: Option<PresentModeCfg>,
    /// Turn on the validation layer if it is installed
    #[arg(long)]
    validation: bool,
}

fn load_shaders(cfg: &ShaderCfg) -> Result<ShaderSet> {
    match (&cfg.vert, &cfg.frag) {
        (Some(vert), Some(frag)) => {
            info!("shaders from {} + {}", vert.display(), frag.display());
            Ok(ShaderSet::from_files(vert, frag)?)
        }
        (None, None) => builtin_shaders(),
        _ => bail!("[shaders] needs both vert and frag"),
    }
}

#[cfg(feature = "builtin-shaders")]
fn builtin_shaders() -> Result<ShaderSet> {
    Ok(ShaderSet::builtin()?)
}

#[cfg(not(feature = "builtin-shaders"))]
fn builtin_shaders() -> Result<ShaderSet> {
    bail!("no [shaders] paths configured and built without the builtin-shaders feature")
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = config::load_cfg(&args.config);

    let present = args.present_mode.unwrap_or(cfg.render.present_mode);
    let validation = args.validation || cfg.render.validation;
    info!("present = {present:?}, validation = {validation}");

    let shaders = load_shaders(&cfg.shaders).context("loading shaders")?;

    let mut window =
        WinitWindow::new(&cfg.window.to_window_config()).context("creating window")?;
    info!("platform = {}", window.platform_name());

    let desc = VkRendererDesc {
        app_name: cfg.window.title.clone(),
        validation,
        present: present.into(),
        clear_color: cfg.render.clear_color,
        shaders,
        vertices: cube_vertices(),
        texture: cube_texture(),
        uniform_size: std::mem::size_of::<Camera>() as u64,
    };
    let renderer = VkRenderer::new(&window, desc, Box::new(SpinningCube::default()))
        .context("vulkan init")?;
    info!("device = {}", renderer.device_name());

    let mut render_loop = RenderLoop::new(renderer).context("frame slots")?;
    let stats = render_loop.run(&mut window)?;
    info!(
        "exit: {} frames, {} rebuilds, {} pauses",
        stats.frames, stats.rebuilds, stats.pauses
    );

    // surface goes before the window
    drop(render_loop);
    Ok(())
}
