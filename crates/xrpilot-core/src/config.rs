//! Application and session settings with JSON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{BlendMode, FormFactor, ReferenceSpaceKind, ViewConfigurationType};

/// Extension enabling the OpenGL graphics binding.
pub const OPENGL_ENABLE_EXTENSION: &str = "XR_KHR_opengl_enable";

/// Application and session settings, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrConfig {
    pub application_name: String,
    pub engine_name: String,
    pub requested_layers: Vec<String>,
    pub requested_extensions: Vec<String>,
    pub form_factor: FormFactor,
    pub blend_mode: BlendMode,
    pub view_configuration: ViewConfigurationType,
    pub reference_space: ReferenceSpaceKind,
    /// Reassert the graphics context around runtime calls known to switch it.
    pub reassert_graphics_context: bool,
    /// Present to the desktop mirror every N frames; 0 disables it.
    pub mirror_interval: u32,
}

impl Default for XrConfig {
    fn default() -> Self {
        Self {
            application_name: "xrpilot".to_string(),
            engine_name: "xrpilot".to_string(),
            requested_layers: Vec::new(),
            requested_extensions: vec![OPENGL_ENABLE_EXTENSION.to_string()],
            form_factor: FormFactor::default(),
            blend_mode: BlendMode::default(),
            view_configuration: ViewConfigurationType::default(),
            reference_space: ReferenceSpaceKind::default(),
            reassert_graphics_context: true,
            mirror_interval: 0,
        }
    }
}

impl XrConfig {
    pub fn load(path: impl AsRef<Path>) -> xrpilot_common::Result<Self> {
        xrpilot_common::read_json_file(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> xrpilot_common::Result<()> {
        xrpilot_common::write_json_file(path, self)
    }
}
