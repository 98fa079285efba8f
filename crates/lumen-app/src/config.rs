// SPDX-License-Identifier: CEPL-1.0
//! `lumen.toml` loading.

use std::fs;
use std::path::Path;
use std::time::Duration;

use lumen_render::options::{DEFAULT_CLEAR_COLOR, DEFAULT_FRAME_TIMEOUT, DEFAULT_IMAGE_COUNT};
use lumen_render::{RenderOptions, UpdateMode};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub update_mode: UpdateModeCfg,
    /// Unset means "whatever the platform prefers".
    #[serde(default)]
    pub prefer_mailbox: Option<bool>,
    #[serde(default = "default_image_count")]
    pub image_count: u32,
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateModeCfg {
    OnDemand,
    #[default]
    Continuous,
    MaxFrameRate,
}

impl From<UpdateModeCfg> for UpdateMode {
    fn from(m: UpdateModeCfg) -> Self {
        match m {
            UpdateModeCfg::OnDemand => UpdateMode::OnDemand,
            UpdateModeCfg::Continuous => UpdateMode::Continuous,
            UpdateModeCfg::MaxFrameRate => UpdateMode::MaxFrameRate,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            update_mode: UpdateModeCfg::default(),
            prefer_mailbox: None,
            image_count: default_image_count(),
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    DEFAULT_CLEAR_COLOR
}
fn default_image_count() -> u32 {
    DEFAULT_IMAGE_COUNT
}
fn default_frame_timeout_ms() -> u64 {
    DEFAULT_FRAME_TIMEOUT.as_millis() as u64
}

impl RenderCfg {
    /// `mode_override` comes from the command line and beats the file.
    pub fn to_options(&self, mode_override: Option<UpdateMode>) -> RenderOptions {
        RenderOptions {
            update_mode: mode_override.unwrap_or(self.update_mode.into()),
            prefer_mailbox: self.prefer_mailbox,
            image_count: self.image_count,
            frame_timeout: Duration::from_millis(self.frame_timeout_ms.max(1)),
            clear_color: self.clear_color,
        }
    }
}

pub fn parse_cfg(s: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(s)
}

/// Missing file means defaults; a broken one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("ignoring {}: {e}", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("no config at {} ({e}), using defaults", path.display());
            AppCfg::default()
        }
    }
}
