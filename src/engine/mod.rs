// src/engine/mod.rs
//! Engine context and render loop.
//!
//! ## Lifecycle
//! 1. `Engine::start` - driver selection; the engine is `DriverSelected`.
//! 2. `Engine::run` - makes the context current and runs `Application::init`
//!    (`Ready`), then loops (`Running`) until the application says stop or a
//!    frame fails fatally.
//! 3. `Application::cleanup` always runs, then teardown (`TornDown`):
//!    textures, driver destroy, then context, surface and display.
//!
//! `run` consumes the engine, so a torn-down engine cannot be restarted.
//! Dropping an engine that never ran tears it down as well.


use crate::display::{DisplayDriver, DriverRegistry};
use crate::gpu::{DmaBufImport, Gpu};
use crate::texture::{FrameSource, FrameStatus, SharedTexture, TextureId, TextureRegistry};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace, warn};
use std::any::Any;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    DriverSelected,
    Ready,
    Running,
    TornDown,
}

/// Returned by `Application::frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// The hosting application's side of the render loop.
pub trait Application {
    /// Called once with the context current, before the first frame.
    fn init(&mut self, engine: &mut Engine) -> Result<()>;

    /// Draws one frame. Errors are fatal to the loop.
    fn frame(&mut self, engine: &mut Engine) -> Result<LoopControl>;

    /// Called once before teardown, whether or not `init` succeeded.
    fn cleanup(&mut self, _engine: &mut Engine) {}
}

pub struct Engine {
    state: EngineState,
    driver_name: &'static str,
    driver: Option<Box<dyn DisplayDriver>>,
    gpu: Box<dyn Gpu>,
    textures: TextureRegistry,
    app_data: Option<Box<dyn Any>>,
}

impl Engine {
    /// Selects the first registered driver whose `init` succeeds.
    pub fn start(registry: &DriverRegistry) -> Result<Self> {
        let selected = registry.select().context("Failed to initialise any display driver")?;
        Ok(Self::with_driver(selected.name, selected.driver, selected.gpu))
    }

    /// Builds an engine around an already initialised driver and its GPU session.
    pub fn with_driver(name: &'static str, driver: Box<dyn DisplayDriver>, gpu: Box<dyn Gpu>) -> Self {
        info!("Engine using display driver '{}'", name);
        Self {
            state: EngineState::DriverSelected,
            driver_name: name,
            driver: Some(driver),
            gpu,
            textures: TextureRegistry::new(),
            app_data: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver_name
    }

    pub fn gpu(&self) -> &dyn Gpu {
        self.gpu.as_ref()
    }

    /// GL entry points for drawing, if the session has a real GL context.
    pub fn gl(&self) -> Option<&glow::Context> {
        self.gpu.gl()
    }

    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    // --- Application data ---

    pub fn set_app_data<T: Any>(&mut self, data: T) {
        self.app_data = Some(Box::new(data));
    }

    pub fn app_data<T: Any>(&self) -> Option<&T> {
        self.app_data.as_ref()?.downcast_ref()
    }

    pub fn app_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.app_data.as_mut()?.downcast_mut()
    }

    pub fn take_app_data<T: Any>(&mut self) -> Option<T> {
        let data = self.app_data.take()?;
        match data.downcast::<T>() {
            Ok(data) => Some(*data),
            Err(data) => {
                self.app_data = Some(data);
                None
            }
        }
    }

    // --- Shared textures ---

    /// Imports a dmabuf as a new auto-updating texture.
    pub fn create_shared_texture(
        &mut self,
        import: &DmaBufImport<'_>,
        source: Option<Box<dyn FrameSource>>,
    ) -> Result<TextureId> {
        let texture = SharedTexture::import(self.gpu.as_ref(), import, source)?;
        let id = self.textures.insert(texture);
        debug!("Registered texture {:?} ({} live)", id, self.textures.len());
        Ok(id)
    }

    /// Unlinks and releases a texture. `None` and stale ids are no-ops;
    /// returns whether anything was destroyed.
    pub fn destroy_texture(&mut self, id: impl Into<Option<TextureId>>) -> bool {
        let Some(id) = id.into() else {
            return false;
        };
        match self.textures.remove(id) {
            Some(texture) => {
                texture.release(self.gpu.as_ref());
                true
            }
            None => false,
        }
    }

    pub fn texture(&self, id: TextureId) -> Option<&SharedTexture> {
        self.textures.get(id)
    }

    pub fn update_texture(&mut self, id: TextureId) -> Result<FrameStatus> {
        self.textures
            .get_mut(id)
            .ok_or_else(|| anyhow!("No live texture {:?}", id))?
            .update()
    }

    pub fn play(&mut self, id: TextureId) -> bool {
        self.textures.get_mut(id).map(SharedTexture::play).is_some()
    }

    pub fn pause(&mut self, id: TextureId) -> bool {
        self.textures.get_mut(id).map(SharedTexture::pause).is_some()
    }

    /// Binds the texture to the sampler-external target of the active unit.
    pub fn bind_texture(&self, id: TextureId) -> bool {
        match self.textures.get(id) {
            Some(texture) => {
                self.gpu.bind_external_texture(texture.gl_texture());
                true
            }
            None => false,
        }
    }

    /// Updates every auto-updating texture once. Failures are logged and the
    /// texture is kept. Returns how many textures got a new frame.
    pub fn update_textures(&mut self) -> usize {
        let mut refreshed = 0;
        let mut cursor = self.textures.first_id();
        while let Some(id) = cursor {
            cursor = self.textures.next_id(id);
            let Some(texture) = self.textures.get_mut(id) else {
                continue;
            };
            if !texture.auto_update() {
                continue;
            }
            match texture.update() {
                Ok(FrameStatus::Refreshed) => refreshed += 1,
                Ok(FrameStatus::Unchanged) => {}
                Err(e) => warn!(
                    "Updating texture {:?} failed ({} in a row): {:#}",
                    id,
                    texture.failure_streak(),
                    e
                ),
            }
        }
        refreshed
    }

    // --- Loop ---

    /// Runs the application to completion and tears the engine down.
    pub fn run<A: Application + ?Sized>(mut self, app: &mut A) -> Result<()> {
        let result = self.run_session(app);
        if let Err(e) = &result {
            warn!("Render session ended with an error: {:#}", e);
        }

        if let Err(e) = self.gpu.make_current() {
            warn!("Could not make context current for cleanup: {:#}", e);
        }
        app.cleanup(&mut self);
        self.teardown();
        result
    }

    fn run_session<A: Application + ?Sized>(&mut self, app: &mut A) -> Result<()> {
        self.gpu
            .make_current()
            .context("Failed to make the rendering context current")?;
        app.init(self).context("Application initialisation failed")?;
        self.state = EngineState::Ready;

        info!("Entering render loop");
        self.state = EngineState::Running;
        let mut frames: u64 = 0;
        loop {
            match self.run_frame(app)? {
                LoopControl::Continue => frames += 1,
                LoopControl::Stop => break,
            }
        }
        info!("Render loop stopped after {} frames", frames);
        Ok(())
    }

    fn run_frame<A: Application + ?Sized>(&mut self, app: &mut A) -> Result<LoopControl> {
        self.gpu.make_current().context("eglMakeCurrent failed in frame")?;
        if let Some(driver) = self.driver.as_mut() {
            driver.before_frame(self.gpu.as_ref());
        }

        let refreshed = self.update_textures();
        trace!("{} textures refreshed", refreshed);

        if app.frame(self).context("Application frame failed")? == LoopControl::Stop {
            return Ok(LoopControl::Stop);
        }

        if let Some(driver) = self.driver.as_mut() {
            driver.after_frame(self.gpu.as_ref());
        }
        self.gpu.swap_buffers()?;
        Ok(LoopControl::Continue)
    }

    fn teardown(&mut self) {
        if self.state == EngineState::TornDown {
            return;
        }
        let mut released = 0;
        while let Some((_, texture)) = self.textures.pop_front() {
            texture.release(self.gpu.as_ref());
            released += 1;
        }
        debug!("Released {} textures", released);

        let mut driver = self.driver.take();
        if let Some(driver) = driver.as_mut() {
            driver.destroy();
        }
        self.gpu.release();
        drop(driver);

        self.app_data = None;
        self.state = EngineState::TornDown;
        info!("Engine torn down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.teardown();
    }
}
