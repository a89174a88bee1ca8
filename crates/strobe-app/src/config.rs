// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strobe_platform::{WindowBackend, WindowConfig};
use strobe_render_vk::PresentPreference;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub shaders: ShaderCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub backend: BackendCfg,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "strobe".into(),
            width: 1280,
            height: 720,
            backend: BackendCfg::Auto,
        }
    }
}

impl WindowCfg {
    pub fn to_window_config(&self) -> WindowConfig {
        WindowConfig {
            title: self.title.clone(),
            width: self.width.max(1),
            height: self.height.max(1),
            backend: match self.backend {
                BackendCfg::Auto => WindowBackend::Auto,
                BackendCfg::X11 => WindowBackend::X11,
                BackendCfg::Wayland => WindowBackend::Wayland,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendCfg {
    #[default]
    Auto,
    X11,
    Wayland,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::LowLatency,
            validation: false,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.05, 0.05, 0.08, 1.0]
}

/// Shared by the config file and `--present-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    LowLatency,
    Vsync,
}

impl From<PresentModeCfg> for PresentPreference {
    fn from(value: PresentModeCfg) -> Self {
        match value {
            PresentModeCfg::LowLatency => PresentPreference::LowLatency,
            PresentModeCfg::Vsync => PresentPreference::Vsync,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ShaderCfg {
    pub vert: Option<PathBuf>,
    pub frag: Option<PathBuf>,
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing file means defaults; a broken one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => {
            info!("no config at {}, using defaults", path.display());
            return AppCfg::default();
        }
    };
    match parse_cfg(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.backend, BackendCfg::Auto);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::LowLatency);
        assert!(!cfg.render.validation);
        assert!(cfg.shaders.vert.is_none());
    }

    #[test]
    fn partial_sections_keep_the_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            title = "spin"
            backend = "wayland"

            [render]
            present_mode = "vsync"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "spin");
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.window.backend, BackendCfg::Wayland);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Vsync);
        assert_eq!(cfg.render.clear_color, default_clear());
    }

    #[test]
    fn shader_paths_are_read() {
        let cfg = parse_cfg(
            r#"
            [shaders]
            vert = "a.vert.spv"
            frag = "a.frag.spv"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.shaders.vert.as_deref(), Some(Path::new("a.vert.spv")));
        assert_eq!(cfg.shaders.frag.as_deref(), Some(Path::new("a.frag.spv")));
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(parse_cfg("[render]\npresent_mode = \"immediate\"").is_err());
        assert!(parse_cfg("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_cfg(Path::new("/nonexistent/strobe.toml"));
        assert_eq!(cfg.window.title, "strobe");
    }

    #[test]
    fn zero_window_size_is_bumped() {
        let w = WindowCfg {
            width: 0,
            ..WindowCfg::default()
        };
        let wc = w.to_window_config();
        assert_eq!(wc.width, 1);
        assert_eq!(wc.backend, WindowBackend::Auto);
    }
}
