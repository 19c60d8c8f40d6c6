use std::ffi::{c_void, CString};
use std::num::NonZeroU32;
use std::ptr;

use glow::HasContext;
use log::{debug, info, warn};
use openxr as xr;
use x11::{glx, xlib};

use xrpilot_core::runtime::ProjectionView;
use xrpilot_core::{
    ApiVersion, ApiVersionRange, GraphicsApi, GraphicsBackend, PixelLayout, StagedFrame,
    ViewConfigurationView, XrError, XrResult,
};

const WINDOW_TITLE: &str = "xrpilot mirror";
const INITIAL_WINDOW_SIZE: u32 = 16;

struct GlxContext {
    display: *mut xlib::Display,
    fb_config: glx::GLXFBConfig,
    visualid: u64,
    drawable: glx::GLXDrawable,
    context: glx::GLXContext,
}

impl GlxContext {
    unsafe fn new() -> XrResult<Self> {
        let display = xlib::XOpenDisplay(ptr::null());
        if display.is_null() {
            return Err(XrError::graphics("XOpenDisplay failed"));
        }

        let screen = xlib::XDefaultScreen(display);
        let attrs = [
            glx::GLX_X_RENDERABLE,
            1,
            glx::GLX_DRAWABLE_TYPE,
            glx::GLX_WINDOW_BIT,
            glx::GLX_RENDER_TYPE,
            glx::GLX_RGBA_BIT,
            glx::GLX_X_VISUAL_TYPE,
            glx::GLX_TRUE_COLOR,
            glx::GLX_RED_SIZE,
            8,
            glx::GLX_GREEN_SIZE,
            8,
            glx::GLX_BLUE_SIZE,
            8,
            glx::GLX_ALPHA_SIZE,
            8,
            glx::GLX_DEPTH_SIZE,
            24,
            glx::GLX_STENCIL_SIZE,
            8,
            glx::GLX_DOUBLEBUFFER,
            1,
            0,
        ];

        let mut fbcount = 0;
        let fb_configs = glx::glXChooseFBConfig(display, screen, attrs.as_ptr(), &mut fbcount);
        if fb_configs.is_null() || fbcount == 0 {
            xlib::XCloseDisplay(display);
            return Err(XrError::graphics("glXChooseFBConfig failed"));
        }
        let fb_config = *fb_configs;

        let visual_info = glx::glXGetVisualFromFBConfig(display, fb_config);
        if visual_info.is_null() {
            xlib::XFree(fb_configs as *mut _);
            xlib::XCloseDisplay(display);
            return Err(XrError::graphics("glXGetVisualFromFBConfig failed"));
        }
        let visualid = (*visual_info).visualid;

        let root = xlib::XDefaultRootWindow(display);
        let colormap =
            xlib::XCreateColormap(display, root, (*visual_info).visual, xlib::AllocNone);

        let mut swa: xlib::XSetWindowAttributes = std::mem::zeroed();
        swa.colormap = colormap;
        swa.event_mask = 0;
        let window = xlib::XCreateWindow(
            display,
            root,
            0,
            0,
            INITIAL_WINDOW_SIZE,
            INITIAL_WINDOW_SIZE,
            0,
            (*visual_info).depth,
            xlib::InputOutput as u32,
            (*visual_info).visual,
            xlib::CWColormap,
            &mut swa,
        );
        if let Ok(title) = CString::new(WINDOW_TITLE) {
            xlib::XStoreName(display, window, title.as_ptr());
        }
        xlib::XMapWindow(display, window);

        let context =
            glx::glXCreateNewContext(display, fb_config, glx::GLX_RGBA_TYPE, ptr::null_mut(), 1);
        if context.is_null() {
            xlib::XFree(visual_info as *mut _);
            xlib::XFree(fb_configs as *mut _);
            xlib::XDestroyWindow(display, window);
            xlib::XCloseDisplay(display);
            return Err(XrError::graphics("glXCreateNewContext failed"));
        }

        if glx::glXMakeCurrent(display, window, context) == 0 {
            glx::glXDestroyContext(display, context);
            xlib::XFree(visual_info as *mut _);
            xlib::XFree(fb_configs as *mut _);
            xlib::XDestroyWindow(display, window);
            xlib::XCloseDisplay(display);
            return Err(XrError::graphics("glXMakeCurrent failed"));
        }

        xlib::XFree(visual_info as *mut _);
        xlib::XFree(fb_configs as *mut _);

        Ok(Self {
            display,
            fb_config,
            visualid,
            drawable: window,
            context,
        })
    }

    fn is_current(&self) -> bool {
        unsafe { glx::glXGetCurrentContext() == self.context }
    }

    fn make_current(&self) -> bool {
        unsafe { glx::glXMakeCurrent(self.display, self.drawable, self.context) != 0 }
    }

    fn resize(&self, width: u32, height: u32) {
        unsafe {
            xlib::XResizeWindow(self.display, self.drawable, width, height);
            xlib::XFlush(self.display);
        }
    }

    fn swap_buffers(&self) {
        unsafe { glx::glXSwapBuffers(self.display, self.drawable) }
    }
}

impl Drop for GlxContext {
    fn drop(&mut self) {
        unsafe {
            glx::glXMakeCurrent(self.display, 0, ptr::null_mut());
            glx::glXDestroyContext(self.display, self.context);
            xlib::XDestroyWindow(self.display, self.drawable);
            xlib::XCloseDisplay(self.display);
        }
    }
}

/// GL objects used to copy staged buffers into swapchain images.
struct BlitResources {
    staging: glow::NativeTexture,
    staging_size: (u32, u32),
    read_fbo: glow::NativeFramebuffer,
    draw_fbo: glow::NativeFramebuffer,
}

/// Last staged upload, replayed into the mirror window. The mirror reads
/// the backend's staging texture; swapchain images belong to the runtime
/// once released.
#[derive(Clone, Copy)]
struct MirrorSource {
    width: i32,
    height: i32,
    flip_vertical: bool,
}

impl MirrorSource {
    fn from_frame(frame: &StagedFrame) -> Self {
        Self {
            width: frame.width as i32,
            height: frame.height as i32,
            flip_vertical: frame.flip_vertical,
        }
    }

    /// Destination rectangle `(x0, y0, x1, y1)` covering a window of `size`.
    fn destination(&self, size: (u32, u32)) -> (i32, i32, i32, i32) {
        let (y0, y1) = vertical_span(0, size.1 as i32, self.flip_vertical);
        (0, y0, size.0 as i32, y1)
    }
}

/// Destination rows for a blit, swapped to flip the image vertically.
fn vertical_span(y: i32, height: i32, flip: bool) -> (i32, i32) {
    if flip {
        (y + height, y)
    } else {
        (y, y + height)
    }
}

fn texture(name: u32) -> Option<glow::NativeTexture> {
    NonZeroU32::new(name).map(glow::NativeTexture)
}

/// OpenGL backend on an X11 window, driving the `XR_KHR_opengl_enable`
/// binding. The window doubles as the desktop mirror.
pub struct GlxBackend {
    gl: glow::Context,
    resources: Option<BlitResources>,
    mirror_size: (u32, u32),
    mirror_source: Option<MirrorSource>,
    max_samples: u32,
    // Dropped last; the GL objects above belong to it.
    glx: GlxContext,
}

impl GlxBackend {
    pub fn new() -> XrResult<Self> {
        let glx = unsafe { GlxContext::new()? };
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                CString::new(name)
                    .ok()
                    .and_then(|name| glx::glXGetProcAddress(name.as_ptr() as *const u8))
                    .map_or(ptr::null(), |proc_addr| proc_addr as *const c_void)
            })
        };
        let max_samples = unsafe { gl.get_parameter_i32(glow::MAX_SAMPLES) }.max(1) as u32;
        let version = gl.version();
        info!(
            "GLX context ready: GL {}.{} ({}), max samples {max_samples}",
            version.major, version.minor, version.vendor_info
        );
        Ok(Self {
            gl,
            resources: None,
            mirror_size: (INITIAL_WINDOW_SIZE, INITIAL_WINDOW_SIZE),
            mirror_source: None,
            max_samples,
            glx,
        })
    }

    fn context_version(&self) -> ApiVersion {
        let version = self.gl.version();
        ApiVersion::new(version.major as u16, version.minor as u16, 0)
    }

    /// Ensure the staging texture matches `frame` and upload its pixels.
    unsafe fn upload(gl: &glow::Context, resources: &mut BlitResources, frame: &StagedFrame) {
        let format = match frame.layout {
            PixelLayout::Rgb => glow::RGB,
            PixelLayout::Rgba => glow::RGBA,
        };
        gl.bind_texture(glow::TEXTURE_2D, Some(resources.staging));
        if resources.staging_size != (frame.width, frame.height) {
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                frame.width as i32,
                frame.height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                None,
            );
            resources.staging_size = (frame.width, frame.height);
        }
        gl.tex_sub_image_2d(
            glow::TEXTURE_2D,
            0,
            0,
            0,
            frame.width as i32,
            frame.height as i32,
            format,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(&frame.data),
        );
        gl.bind_texture(glow::TEXTURE_2D, None);
    }
}

impl GraphicsBackend for GlxBackend {
    type Binding = xr::opengl::SessionCreateInfo;
    type Image = u32;

    fn api(&self) -> GraphicsApi {
        GraphicsApi::OpenGl
    }

    fn check_requirements(&mut self, range: &ApiVersionRange) -> XrResult<()> {
        let version = self.context_version();
        if !range.contains(version) {
            warn!("GL {version} outside runtime requirements {range}");
            return Err(XrError::UnsupportedGraphicsApi(*range));
        }
        debug!("GL {version} within runtime requirements {range}");
        Ok(())
    }

    fn bind_device(&mut self, views: &[ViewConfigurationView]) -> XrResult<Self::Binding> {
        if let Some(view) = views.first() {
            let width = (view.recommended_width / 2).max(1);
            let height = (view.recommended_height / 2).max(1);
            self.glx.resize(width, height);
            self.mirror_size = (width, height);
        }
        Ok(xr::opengl::SessionCreateInfo::Xlib {
            x_display: self.glx.display as *mut _,
            visualid: self.glx.visualid as u32,
            glx_fb_config: self.glx.fb_config as *mut _,
            glx_drawable: self.glx.drawable,
            glx_context: self.glx.context as *mut _,
        })
    }

    fn init_resources(&mut self) -> XrResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let gl = &self.gl;
        let resources = unsafe {
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            let staging = gl.create_texture().map_err(XrError::graphics)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(staging));
            for (param, value) in [
                (glow::TEXTURE_MIN_FILTER, glow::LINEAR),
                (glow::TEXTURE_MAG_FILTER, glow::LINEAR),
                (glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE),
                (glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE),
            ] {
                gl.tex_parameter_i32(glow::TEXTURE_2D, param, value as i32);
            }
            gl.bind_texture(glow::TEXTURE_2D, None);
            BlitResources {
                staging,
                staging_size: (0, 0),
                read_fbo: gl.create_framebuffer().map_err(XrError::graphics)?,
                draw_fbo: gl.create_framebuffer().map_err(XrError::graphics)?,
            }
        };
        self.resources = Some(resources);
        Ok(())
    }

    fn supported_sample_count(&self, view: &ViewConfigurationView) -> u32 {
        view.recommended_sample_count.clamp(1, self.max_samples)
    }

    fn prepare_images(&mut self, images: &[u32]) -> XrResult<()> {
        let gl = &self.gl;
        for &image in images {
            unsafe {
                gl.bind_texture(glow::TEXTURE_2D, texture(image));
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
                gl.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_WRAP_S,
                    glow::CLAMP_TO_EDGE as i32,
                );
                gl.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_WRAP_T,
                    glow::CLAMP_TO_EDGE as i32,
                );
            }
        }
        unsafe { gl.bind_texture(glow::TEXTURE_2D, None) };
        debug!("prepared {} swapchain textures", images.len());
        Ok(())
    }

    fn reacquire_context(&mut self, site: &'static str) -> bool {
        if self.glx.is_current() {
            return false;
        }
        if !self.glx.make_current() {
            warn!("failed to restore GLX context after {site}");
        }
        true
    }

    fn render_view_from_buffer(
        &mut self,
        view: &ProjectionView,
        image: u32,
        frame: &StagedFrame,
    ) -> XrResult<()> {
        let resources = self
            .resources
            .as_mut()
            .ok_or(XrError::InvalidState("graphics resources not initialized"))?;
        let target = texture(image)
            .ok_or_else(|| XrError::graphics("swapchain image is texture 0"))?;
        let gl = &self.gl;
        let rect = view.image_rect;
        let (dst_y0, dst_y1) = vertical_span(rect.y, rect.height, frame.flip_vertical);
        unsafe {
            Self::upload(gl, resources, frame);

            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(resources.read_fbo));
            gl.framebuffer_texture_2d(
                glow::READ_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(resources.staging),
                0,
            );
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(resources.draw_fbo));
            gl.framebuffer_texture_2d(
                glow::DRAW_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(target),
                0,
            );
            let status = gl.check_framebuffer_status(glow::DRAW_FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                return Err(XrError::graphics(format!(
                    "swapchain framebuffer incomplete ({status:#x})"
                )));
            }
            gl.blit_framebuffer(
                0,
                0,
                frame.width as i32,
                frame.height as i32,
                rect.x,
                dst_y0,
                rect.x + rect.width,
                dst_y1,
                glow::COLOR_BUFFER_BIT,
                glow::LINEAR,
            );
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        self.mirror_source = Some(MirrorSource::from_frame(frame));
        Ok(())
    }

    fn present_mirror(&mut self, frame_index: u64) -> XrResult<()> {
        let (Some(resources), Some(source)) = (self.resources.as_ref(), self.mirror_source) else {
            return Ok(());
        };
        let gl = &self.gl;
        let (dst_x0, dst_y0, dst_x1, dst_y1) = source.destination(self.mirror_size);
        unsafe {
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(resources.read_fbo));
            gl.framebuffer_texture_2d(
                glow::READ_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(resources.staging),
                0,
            );
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
            gl.blit_framebuffer(
                0,
                0,
                source.width,
                source.height,
                dst_x0,
                dst_y0,
                dst_x1,
                dst_y1,
                glow::COLOR_BUFFER_BIT,
                glow::LINEAR,
            );
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        self.glx.swap_buffers();
        debug!("mirror presented at frame {frame_index}");
        Ok(())
    }
}

impl Drop for GlxBackend {
    fn drop(&mut self) {
        if let Some(resources) = self.resources.take() {
            if !self.glx.is_current() {
                self.glx.make_current();
            }
            unsafe {
                self.gl.delete_texture(resources.staging);
                self.gl.delete_framebuffer(resources.read_fbo);
                self.gl.delete_framebuffer(resources.draw_fbo);
            }
        }
    }
}
