//! Boundary to the graphics backend that draws staged pixel buffers into
//! swapchain images.

use bytes::Bytes;
use tracing::debug;

use crate::runtime::ProjectionView;
use crate::types::{ApiVersionRange, ViewConfigurationView};
use crate::{XrError, XrResult};

/// Graphics API family, used to pick the swapchain format preference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsApi {
    OpenGl,
    Vulkan,
}

// GL internal formats
const GL_RGB10_A2: u32 = 0x8059;
const GL_RGBA16F: u32 = 0x881A;
const GL_RGBA8: u32 = 0x8058;
const GL_RGBA8_SNORM: u32 = 0x8F97;

// VkFormat values
const VK_FORMAT_R8G8B8A8_UNORM: u32 = 37;
const VK_FORMAT_R8G8B8A8_SRGB: u32 = 43;
const VK_FORMAT_B8G8R8A8_UNORM: u32 = 44;
const VK_FORMAT_B8G8R8A8_SRGB: u32 = 50;

impl GraphicsApi {
    /// Swapchain formats in order of preference.
    pub fn format_preferences(self) -> &'static [u32] {
        match self {
            GraphicsApi::OpenGl => &[GL_RGB10_A2, GL_RGBA16F, GL_RGBA8, GL_RGBA8_SNORM],
            GraphicsApi::Vulkan => &[
                VK_FORMAT_B8G8R8A8_SRGB,
                VK_FORMAT_R8G8B8A8_SRGB,
                VK_FORMAT_B8G8R8A8_UNORM,
                VK_FORMAT_R8G8B8A8_UNORM,
            ],
        }
    }

    pub fn format_name(self, format: u32) -> &'static str {
        match (self, format) {
            (GraphicsApi::OpenGl, GL_RGB10_A2) => "GL_RGB10_A2",
            (GraphicsApi::OpenGl, GL_RGBA16F) => "GL_RGBA16F",
            (GraphicsApi::OpenGl, GL_RGBA8) => "GL_RGBA8",
            (GraphicsApi::OpenGl, GL_RGBA8_SNORM) => "GL_RGBA8_SNORM",
            (GraphicsApi::Vulkan, VK_FORMAT_B8G8R8A8_SRGB) => "VK_FORMAT_B8G8R8A8_SRGB",
            (GraphicsApi::Vulkan, VK_FORMAT_R8G8B8A8_SRGB) => "VK_FORMAT_R8G8B8A8_SRGB",
            (GraphicsApi::Vulkan, VK_FORMAT_B8G8R8A8_UNORM) => "VK_FORMAT_B8G8R8A8_UNORM",
            (GraphicsApi::Vulkan, VK_FORMAT_R8G8B8A8_UNORM) => "VK_FORMAT_R8G8B8A8_UNORM",
            _ => "UNKNOWN_FORMAT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn from_rgba_flag(is_rgba: bool) -> Self {
        if is_rgba {
            PixelLayout::Rgba
        } else {
            PixelLayout::Rgb
        }
    }

    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }
}

/// Pixel buffer staged for one view, tightly packed, 8 bits per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedFrame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Bytes,
    /// Rows are stored top-down and must be flipped for bottom-up targets.
    pub flip_vertical: bool,
}

impl StagedFrame {
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: impl Into<Bytes>,
    ) -> XrResult<Self> {
        let data = data.into();
        if width == 0 || height == 0 {
            return Err(XrError::InvalidFrame(format!("empty extent {width}x{height}")));
        }
        let needed = width as usize * height as usize * layout.channels();
        if data.len() < needed {
            return Err(XrError::InvalidFrame(format!(
                "{width}x{height} {layout:?} needs {needed} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
            flip_vertical: false,
        })
    }

    pub fn flipped(mut self, flip_vertical: bool) -> Self {
        self.flip_vertical = flip_vertical;
        self
    }
}

pub trait GraphicsBackend {
    /// Graphics binding handed to session creation.
    type Binding;
    /// Swapchain image handle, matching the runtime's.
    type Image: Copy;

    fn api(&self) -> GraphicsApi;

    /// Reject a device whose API version lies outside `range`.
    fn check_requirements(&mut self, range: &ApiVersionRange) -> XrResult<()>;

    /// Create (or adopt) the device/context and describe it for the runtime.
    fn bind_device(&mut self, views: &[ViewConfigurationView]) -> XrResult<Self::Binding>;

    fn init_resources(&mut self) -> XrResult<()>;

    fn supported_sample_count(&self, view: &ViewConfigurationView) -> u32;

    /// Called once per swapchain with its freshly enumerated images.
    fn prepare_images(&mut self, _images: &[Self::Image]) -> XrResult<()> {
        Ok(())
    }

    /// Make the backend's context current again if a runtime call switched it.
    /// Returns `true` when a switch was detected. Must be idempotent.
    fn reacquire_context(&mut self, site: &'static str) -> bool;

    fn render_view_from_buffer(
        &mut self,
        view: &ProjectionView,
        image: Self::Image,
        frame: &StagedFrame,
    ) -> XrResult<()>;

    /// Present the most recently rendered view to a desktop window.
    fn present_mirror(&mut self, _frame_index: u64) -> XrResult<()> {
        Ok(())
    }
}

/// Compatibility shim for runtimes that change the thread's current graphics
/// context inside wait-frame, acquire and wait-image.
///
/// All context reassertion goes through [`ContextShim::reassert`]; disabling
/// the shim turns every site into a no-op.
#[derive(Debug, Clone)]
pub struct ContextShim {
    enabled: bool,
    switches_detected: u64,
}

impl ContextShim {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            switches_detected: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of times a runtime call was caught switching the context.
    pub fn switches_detected(&self) -> u64 {
        self.switches_detected
    }

    pub fn reassert<G: GraphicsBackend + ?Sized>(&mut self, backend: &mut G, site: &'static str) {
        if !self.enabled {
            return;
        }
        if backend.reacquire_context(site) {
            self.switches_detected += 1;
            debug!(site, total = self.switches_detected, "graphics context reasserted");
        }
    }
}

impl Default for ContextShim {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_preferences_order() {
        assert_eq!(GraphicsApi::OpenGl.format_preferences()[0], GL_RGB10_A2);
        assert_eq!(
            GraphicsApi::Vulkan.format_preferences()[0],
            VK_FORMAT_B8G8R8A8_SRGB
        );
        assert_eq!(GraphicsApi::OpenGl.format_name(GL_RGBA8), "GL_RGBA8");
        assert_eq!(GraphicsApi::Vulkan.format_name(GL_RGBA8), "UNKNOWN_FORMAT");
    }

    #[test]
    fn test_staged_frame_length_check() {
        assert!(StagedFrame::new(2, 2, PixelLayout::Rgb, vec![0u8; 12]).is_ok());
        let short = StagedFrame::new(2, 2, PixelLayout::Rgba, vec![0u8; 12]);
        assert!(matches!(short, Err(XrError::InvalidFrame(_))));
        let empty = StagedFrame::new(0, 2, PixelLayout::Rgba, Vec::<u8>::new());
        assert!(matches!(empty, Err(XrError::InvalidFrame(_))));
    }

    #[test]
    fn test_pixel_layout_from_flag() {
        assert_eq!(PixelLayout::from_rgba_flag(true).channels(), 4);
        assert_eq!(PixelLayout::from_rgba_flag(false).channels(), 3);
    }
}
