// src/display/mock.rs
//! Display driver for tests: hands out a shared `MockGpu` and records hooks.

use super::driver::DisplayDriver;
use crate::gpu::mock::{CallLog, MockGpu};
use crate::gpu::Gpu;
use anyhow::{bail, Result};
use std::cell::Cell;
use std::rc::Rc;

pub struct MockDriver {
    gpu: Rc<MockGpu>,
    pub fail_init: bool,
    pub frames: Rc<Cell<u32>>,
    log: Option<CallLog>,
    tag: &'static str,
}

impl MockDriver {
    pub fn new(gpu: Rc<MockGpu>) -> Self {
        Self {
            gpu,
            fail_init: false,
            frames: Rc::new(Cell::new(0)),
            log: None,
            tag: "driver",
        }
    }

    /// Records hook calls as `<tag>.<hook>`.
    pub fn with_log(gpu: Rc<MockGpu>, log: CallLog, tag: &'static str) -> Self {
        let mut driver = Self::new(gpu);
        driver.log = Some(log);
        driver.tag = tag;
        driver
    }

    pub fn failing(gpu: Rc<MockGpu>) -> Self {
        let mut driver = Self::new(gpu);
        driver.fail_init = true;
        driver
    }

    fn record(&self, hook: &str) {
        if let Some(log) = &self.log {
            log.borrow_mut().push(format!("{}.{}", self.tag, hook));
        }
    }
}

impl DisplayDriver for MockDriver {
    fn init(&mut self) -> Result<Box<dyn Gpu>> {
        self.record("init");
        if self.fail_init {
            bail!("mock driver init failure");
        }
        Ok(Box::new(self.gpu.clone()))
    }

    fn before_frame(&mut self, gpu: &dyn Gpu) {
        self.record("before_frame");
        self.frames.set(self.frames.get() + 1);
        gpu.set_viewport(320, 240);
    }

    fn after_frame(&mut self, _gpu: &dyn Gpu) {
        self.record("after_frame");
    }

    fn destroy(&mut self) {
        self.record("destroy");
    }
}

impl Drop for MockDriver {
    fn drop(&mut self) {
        self.record("drop");
    }
}
