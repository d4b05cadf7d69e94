// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod hello;
mod triangle;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use drakon_core::{config::DEFAULT_CONFIG_FILE, init_tracing, load_config, AppCfg};
use drakon_game::{GameLoop, LoopStats};
use drakon_platform::{HeadlessPlatform, Platform, WindowDesc, WinitPlatform};
use drakon_render::{
    headless::{HeadlessBackend, HeadlessSettings},
    Backend, PipelineConfig, Renderer, RendererConfig,
};
use drakon_render_vk::{VkBackend, VkSettings};
use hello::HelloGame;
use std::path::{Path, PathBuf};
use tracing::info;

/// Iterations for a headless run when `--frames` is not given.
const HEADLESS_FRAMES: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Direct3D 12 on Windows, Vulkan elsewhere
    Auto,
    Vulkan,
    Dx12,
    /// No window and no GPU
    Headless,
}

impl BackendKind {
    fn resolve(self) -> BackendKind {
        match self {
            BackendKind::Auto if cfg!(windows) => BackendKind::Dx12,
            BackendKind::Auto => BackendKind::Vulkan,
            other => other,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer backend
    #[arg(long, value_enum, default_value_t = BackendKind::Auto)]
    backend: BackendKind,

    /// Config file (defaults to drakon.toml in the working directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

fn renderer_config(cfg: &AppCfg) -> RendererConfig {
    RendererConfig {
        frames_in_flight: cfg.render.frames_in_flight(),
        clear_color: cfg.render.clear_color,
    }
}

fn window_desc(cfg: &AppCfg) -> WindowDesc {
    WindowDesc {
        title: cfg.window.title.clone(),
        width: cfg.window.width,
        height: cfg.window.height,
    }
}

fn run<B: Backend, P: Platform>(
    platform: P,
    renderer: Renderer<B>,
    desc: WindowDesc,
    triangle: PipelineConfig,
    frames: Option<u64>,
) -> Result<LoopStats> {
    let mut game_loop = GameLoop::new(platform, renderer, desc);
    if let Some(n) = frames {
        game_loop = game_loop.with_max_iterations(n);
    }
    let mut game = HelloGame::new(triangle);
    Ok(game_loop.run(&mut game)?)
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_config(
        args.config
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_CONFIG_FILE)),
    );

    let kind = args.backend.resolve();
    info!("backend = {kind:?}");
    info!("vsync cfg = {}", cfg.render.vsync);

    let stats = match kind {
        BackendKind::Auto | BackendKind::Vulkan => {
            let settings = VkSettings {
                vsync: cfg.render.vsync,
                validation: cfg.render.validation,
            };
            run(
                WinitPlatform::new()?,
                Renderer::<VkBackend>::new(renderer_config(&cfg), settings),
                window_desc(&cfg),
                triangle::spirv_config(),
                args.frames,
            )?
        }
        #[cfg(windows)]
        BackendKind::Dx12 => {
            use drakon_render_dx12::{Dx12Backend, Dx12Settings};
            let settings = Dx12Settings {
                vsync: cfg.render.vsync,
            };
            run(
                WinitPlatform::new()?,
                Renderer::<Dx12Backend>::new(renderer_config(&cfg), settings),
                window_desc(&cfg),
                triangle::hlsl_config(),
                args.frames,
            )?
        }
        #[cfg(not(windows))]
        BackendKind::Dx12 => anyhow::bail!("the dx12 backend is only available on Windows"),
        BackendKind::Headless => run(
            HeadlessPlatform::new(),
            Renderer::<HeadlessBackend>::new(renderer_config(&cfg), HeadlessSettings::default()),
            window_desc(&cfg),
            triangle::hlsl_config(),
            Some(args.frames.unwrap_or(HEADLESS_FRAMES)),
        )?,
    };

    info!(
        "{} frames rendered, {} failed over {} iterations",
        stats.frames_rendered, stats.frames_failed, stats.iterations
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_resolves_per_platform() {
        let expected = if cfg!(windows) {
            BackendKind::Dx12
        } else {
            BackendKind::Vulkan
        };
        assert_eq!(BackendKind::Auto.resolve(), expected);
        assert_eq!(BackendKind::Headless.resolve(), BackendKind::Headless);
    }

    #[test]
    fn cli_parses_backend_and_frames() {
        let args = Args::parse_from(["drakon", "--backend", "headless", "--frames", "5"]);
        assert_eq!(args.backend, BackendKind::Headless);
        assert_eq!(args.frames, Some(5));
        assert!(args.config.is_none());

        let args = Args::parse_from(["drakon"]);
        assert_eq!(args.backend, BackendKind::Auto);
    }

    #[test]
    fn headless_run_renders_every_frame() {
        let cfg = AppCfg::default();
        let stats = run(
            HeadlessPlatform::new(),
            Renderer::<HeadlessBackend>::new(renderer_config(&cfg), HeadlessSettings::default()),
            window_desc(&cfg),
            triangle::hlsl_config(),
            Some(10),
        )
        .unwrap();
        assert_eq!(stats.iterations, 10);
        assert_eq!(stats.frames_rendered, 10);
    }
}
