// src/gpu/egl.rs
//! EGL + GLES2 implementation of [`Gpu`].
//!
//! libEGL is loaded at runtime. The dmabuf import entry points
//! (`eglCreateImageKHR`, `eglDestroyImageKHR`, `glEGLImageTargetTexture2DOES`)
//! are often missing from the library's symbol table, so they are resolved
//! through `eglGetProcAddress` once at construction.

use super::{DmaBufImport, Gpu, ImageHandle, TextureHandle, GL_TEXTURE_EXTERNAL_OES};
use anyhow::{anyhow, bail, Context, Result};
use glow::HasContext;
use khronos_egl as egl;
use log::{debug, error, info, trace, warn};
use std::ffi::c_void;
use std::num::NonZeroU32;
use std::os::fd::AsRawFd;
use std::ptr;

type EglInstance = egl::DynamicInstance<egl::EGL1_4>;

type CreateImageKhrFn = unsafe extern "system" fn(
    display: *mut c_void,
    context: *mut c_void,
    target: u32,
    buffer: *mut c_void,
    attrib_list: *const i32,
) -> *mut c_void;
type DestroyImageKhrFn = unsafe extern "system" fn(display: *mut c_void, image: *mut c_void) -> u32;
type ImageTargetTexture2dOesFn = unsafe extern "system" fn(target: u32, image: *mut c_void);

// EGL_EXT_image_dma_buf_import
const EGL_LINUX_DMA_BUF_EXT: u32 = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: i32 = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: i32 = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: i32 = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: i32 = 0x3274;
const EGL_WIDTH: i32 = 0x3057;
const EGL_HEIGHT: i32 = 0x3056;
const EGL_NONE: i32 = 0x3038;

const DMA_BUF_IMPORT_EXTENSION: &str = "EGL_EXT_image_dma_buf_import";
const LIBEGL: &str = "libEGL.so.1";
/// Upper bound on queued GL errors drained before a checked call.
const MAX_DRAINED_GL_ERRORS: usize = 64;

/// Where the drawing surface comes from.
#[derive(Debug, Clone, Copy)]
pub enum SurfaceTarget {
    /// A native window owned by the display driver.
    Window(egl::NativeWindowType),
    /// An offscreen pbuffer of the given size.
    Pbuffer { width: u32, height: u32 },
}

pub struct EglGpu {
    egl: EglInstance,
    display: Option<egl::Display>,
    surface: Option<egl::Surface>,
    context: Option<egl::Context>,
    gl: glow::Context,
    create_image: CreateImageKhrFn,
    destroy_image: DestroyImageKhrFn,
    image_target_texture: ImageTargetTexture2dOesFn,
}

/// Releases a partially built EGL session unless disarmed.
struct SessionGuard<'a> {
    egl: &'a EglInstance,
    display: Option<egl::Display>,
    surface: Option<egl::Surface>,
    context: Option<egl::Context>,
}

impl SessionGuard<'_> {
    fn disarm(&mut self) -> (egl::Display, egl::Surface, egl::Context) {
        match (self.display.take(), self.surface.take(), self.context.take()) {
            (Some(d), Some(s), Some(c)) => (d, s, c),
            // Only called once every field is populated.
            _ => unreachable!("SessionGuard disarmed before the session was complete"),
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        release_session(self.egl, &mut self.display, &mut self.surface, &mut self.context);
    }
}

fn release_session(
    egl: &EglInstance,
    display: &mut Option<egl::Display>,
    surface: &mut Option<egl::Surface>,
    context: &mut Option<egl::Context>,
) {
    let Some(dpy) = *display else {
        return;
    };
    let _ = egl.make_current(dpy, None, None, None);
    if let Some(ctx) = context.take() {
        if let Err(e) = egl.destroy_context(dpy, ctx) {
            warn!("eglDestroyContext failed: {}", e);
        }
    }
    if let Some(surf) = surface.take() {
        if let Err(e) = egl.destroy_surface(dpy, surf) {
            warn!("eglDestroySurface failed: {}", e);
        }
    }
    if let Err(e) = egl.terminate(dpy) {
        warn!("eglTerminate failed: {}", e);
    }
    *display = None;
    debug!("EGL session released");
}

fn load_proc<F: Copy>(egl: &EglInstance, name: &str) -> Result<F> {
    let f = egl
        .get_proc_address(name)
        .ok_or_else(|| anyhow!("{} is not provided by the EGL implementation", name))?;
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<extern "system" fn()>());
    // SAFETY: `F` is the documented signature of the named entry point.
    Ok(unsafe { std::mem::transmute_copy::<extern "system" fn(), F>(&f) })
}

fn egl_error_text(egl: &EglInstance) -> String {
    match egl.get_error() {
        Some(e) => e.to_string(),
        None => "no EGL error reported".to_string(),
    }
}

impl EglGpu {
    /// Opens an EGL session on `native_display`.
    ///
    /// Chooses a GLES2-renderable config, creates the surface described by
    /// `target` and a client-version-2 context, makes it current and loads GL.
    /// Anything created before a failing step is released before returning.
    ///
    /// # Safety
    /// `native_display` (and the window in `target`, if any) must stay valid
    /// until this session is released.
    pub unsafe fn new(native_display: egl::NativeDisplayType, target: SurfaceTarget) -> Result<Self> {
        let lib = unsafe { libloading::Library::new(LIBEGL) }
            .with_context(|| format!("Failed to load {}", LIBEGL))?;
        let egl = unsafe { EglInstance::load_required_from(lib) }
            .map_err(|e| anyhow!("Failed to load EGL entry points from {}: {}", LIBEGL, e))?;

        let create_image: CreateImageKhrFn = load_proc(&egl, "eglCreateImageKHR")?;
        let destroy_image: DestroyImageKhrFn = load_proc(&egl, "eglDestroyImageKHR")?;
        let image_target_texture: ImageTargetTexture2dOesFn =
            load_proc(&egl, "glEGLImageTargetTexture2DOES")?;

        let display = unsafe { egl.get_display(native_display) }
            .ok_or_else(|| anyhow!("Got no EGL display"))?;
        let (major, minor) = egl.initialize(display).context("Unable to initialize EGL")?;
        info!("EGL {}.{} initialized", major, minor);

        let mut guard = SessionGuard {
            egl: &egl,
            display: Some(display),
            surface: None,
            context: None,
        };

        match egl.query_string(Some(display), egl::EXTENSIONS) {
            Ok(exts) if !exts.to_string_lossy().contains(DMA_BUF_IMPORT_EXTENSION) => {
                warn!("{} not advertised; texture import will likely fail", DMA_BUF_IMPORT_EXTENSION);
            }
            Ok(_) => {}
            Err(e) => warn!("Could not query EGL extensions: {}", e),
        }

        let mut config_attribs = vec![
            egl::BUFFER_SIZE,
            16,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES2_BIT,
        ];
        if let SurfaceTarget::Pbuffer { .. } = target {
            config_attribs.extend_from_slice(&[egl::SURFACE_TYPE, egl::PBUFFER_BIT]);
        }
        config_attribs.push(egl::NONE);

        let config = egl
            .choose_first_config(display, &config_attribs)
            .with_context(|| format!("Failed to choose config ({})", egl_error_text(&egl)))?
            .ok_or_else(|| anyhow!("No EGL config is GLES2-renderable with a 16-bit buffer"))?;

        let surface = match target {
            SurfaceTarget::Window(window) => unsafe {
                egl.create_window_surface(display, config, window, None)
            },
            SurfaceTarget::Pbuffer { width, height } => egl.create_pbuffer_surface(
                display,
                config,
                &[egl::WIDTH, width as i32, egl::HEIGHT, height as i32, egl::NONE],
            ),
        }
        .context("Unable to create EGL surface")?;
        guard.surface = Some(surface);

        egl.bind_api(egl::OPENGL_ES_API)
            .context("Unable to bind the OpenGL ES API")?;
        let context = egl
            .create_context(display, config, None, &[egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE])
            .context("Unable to create EGL context")?;
        guard.context = Some(context);

        egl.make_current(display, Some(surface), Some(surface), Some(context))
            .context("eglMakeCurrent failed on the new context")?;

        let mut gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name)
                    .map_or(ptr::null(), |p| p as *const c_void)
            })
        };
        install_debug_callback(&mut gl);

        let (display, surface, context) = guard.disarm();
        drop(guard);

        Ok(Self {
            egl,
            display: Some(display),
            surface: Some(surface),
            context: Some(context),
            gl,
            create_image,
            destroy_image,
            image_target_texture,
        })
    }

    fn live(&self) -> Result<(egl::Display, egl::Surface, egl::Context)> {
        match (self.display, self.surface, self.context) {
            (Some(d), Some(s), Some(c)) => Ok((d, s, c)),
            _ => bail!("EGL session has already been released"),
        }
    }

    fn clear_gl_errors(&self) {
        for _ in 0..MAX_DRAINED_GL_ERRORS {
            if unsafe { self.gl.get_error() } == glow::NO_ERROR {
                return;
            }
        }
    }

    fn check_gl_error(&self, operation: &str) -> Result<()> {
        match unsafe { self.gl.get_error() } {
            glow::NO_ERROR => Ok(()),
            code => Err(anyhow!("{} failed (GL error 0x{:04x})", operation, code)),
        }
    }
}

fn install_debug_callback(gl: &mut glow::Context) {
    if !gl.supports_debug() {
        debug!("GL debug output not supported by this context");
        return;
    }
    unsafe {
        gl.enable(glow::DEBUG_OUTPUT);
        gl.debug_message_callback(|_source, kind, id, severity, message| {
            if kind == glow::DEBUG_TYPE_ERROR {
                error!("GL CALLBACK: ** GL ERROR ** id={} severity=0x{:x}: {}", id, severity, message);
            } else {
                debug!("GL CALLBACK: type=0x{:x} severity=0x{:x}: {}", kind, severity, message);
            }
        });
    }
}

fn native_texture(texture: TextureHandle) -> Option<glow::NativeTexture> {
    NonZeroU32::new(texture.0).map(glow::NativeTexture)
}

impl Gpu for EglGpu {
    fn make_current(&self) -> Result<()> {
        let (display, surface, context) = self.live()?;
        self.egl
            .make_current(display, Some(surface), Some(surface), Some(context))
            .context("eglMakeCurrent failed")
    }

    fn swap_buffers(&self) -> Result<()> {
        let (display, surface, _) = self.live()?;
        self.egl
            .swap_buffers(display, surface)
            .context("eglSwapBuffers failed")
    }

    fn set_viewport(&self, width: i32, height: i32) {
        unsafe { self.gl.viewport(0, 0, width, height) };
    }

    fn import_dmabuf(&self, import: &DmaBufImport<'_>) -> Result<ImageHandle> {
        let (display, _, _) = self.live()?;
        let attribs = [
            EGL_WIDTH,
            import.width as i32,
            EGL_HEIGHT,
            import.height as i32,
            EGL_LINUX_DRM_FOURCC_EXT,
            import.fourcc.0 as i32,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            import.fd.as_raw_fd(),
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            DmaBufImport::PLANE_OFFSET as i32,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            import.stride as i32,
            EGL_NONE,
        ];
        let image = unsafe {
            (self.create_image)(
                display.as_ptr(),
                ptr::null_mut(),
                EGL_LINUX_DMA_BUF_EXT,
                ptr::null_mut(),
                attribs.as_ptr(),
            )
        };
        if image.is_null() {
            bail!(
                "eglCreateImageKHR failed for {}x{} {} stride {} ({})",
                import.width,
                import.height,
                import.fourcc,
                import.stride,
                egl_error_text(&self.egl)
            );
        }
        trace!("Imported dmabuf fd {} as EGLImage {:p}", import.fd.as_raw_fd(), image);
        Ok(ImageHandle(image as usize))
    }

    fn destroy_image(&self, image: ImageHandle) {
        let Some(display) = self.display else {
            warn!("destroy_image called after EGL release; image leaked with the display");
            return;
        };
        let ok = unsafe { (self.destroy_image)(display.as_ptr(), image.0 as *mut c_void) };
        if ok == 0 {
            warn!("eglDestroyImageKHR failed ({})", egl_error_text(&self.egl));
        }
    }

    fn create_external_texture(&self) -> Result<TextureHandle> {
        self.clear_gl_errors();
        let texture = unsafe { self.gl.create_texture() }
            .map_err(|e| anyhow!("glGenTextures failed: {}", e))?;
        unsafe {
            self.gl.bind_texture(GL_TEXTURE_EXTERNAL_OES, Some(texture));
            self.gl.tex_parameter_i32(
                GL_TEXTURE_EXTERNAL_OES,
                glow::TEXTURE_MIN_FILTER,
                glow::LINEAR as i32,
            );
            self.gl.tex_parameter_i32(
                GL_TEXTURE_EXTERNAL_OES,
                glow::TEXTURE_MAG_FILTER,
                glow::LINEAR as i32,
            );
        }
        if let Err(e) = self.check_gl_error("Configuring external texture") {
            unsafe { self.gl.delete_texture(texture) };
            return Err(e);
        }
        Ok(TextureHandle(texture.0.get()))
    }

    fn attach_image(&self, texture: TextureHandle, image: ImageHandle) -> Result<()> {
        let native = native_texture(texture).ok_or_else(|| anyhow!("Texture name 0 is not a texture"))?;
        self.clear_gl_errors();
        unsafe {
            self.gl.bind_texture(GL_TEXTURE_EXTERNAL_OES, Some(native));
            (self.image_target_texture)(GL_TEXTURE_EXTERNAL_OES, image.0 as *mut c_void);
        }
        self.check_gl_error("glEGLImageTargetTexture2DOES")
    }

    fn bind_external_texture(&self, texture: TextureHandle) {
        unsafe {
            self.gl
                .bind_texture(GL_TEXTURE_EXTERNAL_OES, native_texture(texture))
        };
    }

    fn delete_texture(&self, texture: TextureHandle) {
        if let Some(native) = native_texture(texture) {
            unsafe { self.gl.delete_texture(native) };
        }
    }

    fn gl(&self) -> Option<&glow::Context> {
        Some(&self.gl)
    }

    fn release(&mut self) {
        release_session(&self.egl, &mut self.display, &mut self.surface, &mut self.context);
    }
}

impl Drop for EglGpu {
    fn drop(&mut self) {
        self.release();
    }
}
