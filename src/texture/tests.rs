// src/texture/tests.rs

use super::*;
use crate::gpu::mock::{CallLog, MockGpu};
use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::os::fd::AsFd;
use std::rc::Rc;

const YUYV: FourCc = FourCc::from_bytes(*b"YUYV");

fn with_import<R>(f: impl FnOnce(&DmaBufImport<'_>) -> R) -> R {
    let file = File::open("/dev/null").expect("open /dev/null");
    let import = DmaBufImport {
        fd: file.as_fd(),
        width: 640,
        height: 480,
        fourcc: YUYV,
        stride: 1280,
    };
    f(&import)
}

struct ScriptedSource {
    results: Vec<Result<FrameStatus>>,
    updates: Rc<Cell<u32>>,
    released: Rc<Cell<bool>>,
    log: Option<CallLog>,
}

impl ScriptedSource {
    fn new(results: Vec<Result<FrameStatus>>) -> (Self, Rc<Cell<u32>>, Rc<Cell<bool>>) {
        let updates = Rc::new(Cell::new(0));
        let released = Rc::new(Cell::new(false));
        (
            Self {
                results,
                updates: updates.clone(),
                released: released.clone(),
                log: None,
            },
            updates,
            released,
        )
    }
}

impl FrameSource for ScriptedSource {
    fn update(&mut self) -> Result<FrameStatus> {
        self.updates.set(self.updates.get() + 1);
        if self.results.is_empty() {
            Ok(FrameStatus::Unchanged)
        } else {
            self.results.remove(0)
        }
    }

    fn release(&mut self) {
        if let Some(log) = &self.log {
            log.borrow_mut().push("source.release".to_string());
        }
        self.released.set(true);
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.set(true);
    }
}

#[test_log::test]
fn it_should_allocate_one_texture_and_one_image_per_import() -> Result<()> {
    let gpu = MockGpu::new();
    let texture = with_import(|import| SharedTexture::import(&gpu, import, None))?;
    assert_eq!(gpu.live_textures(), 1);
    assert_eq!(gpu.live_images(), 1);
    assert!(texture.auto_update());
    assert_eq!(texture.size(), (640, 480));
    assert_eq!(texture.fourcc(), YUYV);
    assert_eq!(texture.gl_target(), crate::gpu::GL_TEXTURE_EXTERNAL_OES);

    texture.release(&gpu);
    assert_eq!(gpu.live_textures(), 0);
    assert_eq!(gpu.live_images(), 0);
    Ok(())
}

#[test_log::test]
fn it_should_leave_no_texture_behind_when_import_fails() {
    let gpu = MockGpu::new();
    gpu.fail_import.set(true);
    let (source, _, released) = ScriptedSource::new(vec![]);
    let result = with_import(|import| SharedTexture::import(&gpu, import, Some(Box::new(source))));
    assert!(result.is_err());
    assert_eq!(gpu.live_textures(), 0);
    assert_eq!(gpu.live_images(), 0);
    assert!(released.get(), "source must be dropped with the failed create");
}

#[test_log::test]
fn it_should_release_the_image_when_texture_allocation_fails() {
    let gpu = MockGpu::new();
    gpu.fail_texture.set(true);
    let result = with_import(|import| SharedTexture::import(&gpu, import, None));
    assert!(result.is_err());
    assert_eq!(gpu.live_images(), 0);
    assert_eq!(gpu.live_textures(), 0);
}

#[test_log::test]
fn it_should_unwind_texture_then_image_when_attach_fails() {
    let log: CallLog = Rc::new(RefCell::new(Vec::new()));
    let gpu = MockGpu::with_log(log.clone());
    gpu.fail_attach.set(true);
    let result = with_import(|import| SharedTexture::import(&gpu, import, None));
    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("Creating gl texture"));
    assert_eq!(gpu.live_images(), 0);
    assert_eq!(gpu.live_textures(), 0);
    assert_eq!(*log.borrow(), vec!["gpu.delete_texture", "gpu.destroy_image"]);
}

#[test_log::test]
fn it_should_release_source_before_gpu_objects() -> Result<()> {
    let log: CallLog = Rc::new(RefCell::new(Vec::new()));
    let gpu = MockGpu::with_log(log.clone());
    let (mut source, _, _) = ScriptedSource::new(vec![]);
    source.log = Some(log.clone());
    let texture = with_import(|import| SharedTexture::import(&gpu, import, Some(Box::new(source))))?;
    texture.release(&gpu);
    assert_eq!(
        *log.borrow(),
        vec!["source.release", "gpu.delete_texture", "gpu.destroy_image"]
    );
    Ok(())
}

#[test_log::test]
fn it_should_report_no_new_frame_without_a_source() -> Result<()> {
    let gpu = MockGpu::new();
    let mut texture = with_import(|import| SharedTexture::import(&gpu, import, None))?;
    assert_eq!(texture.update()?, FrameStatus::Unchanged);
    assert_eq!(texture.update()?.code(), 0);
    texture.release(&gpu);
    Ok(())
}

#[test_log::test]
fn it_should_track_consecutive_update_failures() -> Result<()> {
    let gpu = MockGpu::new();
    let (source, updates, _) = ScriptedSource::new(vec![
        Err(anyhow!("ioctl hiccup")),
        Err(anyhow!("ioctl hiccup")),
        Ok(FrameStatus::Refreshed),
    ]);
    let mut texture = with_import(|import| SharedTexture::import(&gpu, import, Some(Box::new(source))))?;
    assert!(texture.update().is_err());
    assert!(texture.update().is_err());
    assert_eq!(texture.failure_streak(), 2);
    assert_eq!(texture.update()?, FrameStatus::Refreshed);
    assert_eq!(texture.failure_streak(), 0);
    assert_eq!(updates.get(), 3);
    texture.release(&gpu);
    Ok(())
}

#[test]
fn it_should_toggle_auto_update_without_touching_gpu_objects() -> Result<()> {
    let gpu = MockGpu::new();
    let mut texture = with_import(|import| SharedTexture::import(&gpu, import, None))?;
    texture.pause();
    assert!(!texture.auto_update());
    texture.play();
    assert!(texture.auto_update());
    assert_eq!(gpu.live_textures(), 1);
    texture.release(&gpu);
    Ok(())
}

#[test]
fn it_should_free_gpu_objects_only_through_release() {
    let gpu = MockGpu::new();
    drop(new_texture(&gpu));
    assert_eq!(gpu.live_textures(), 1, "drop leaves the texture to the owner");
    assert_eq!(gpu.live_images(), 1);

    new_texture(&gpu).release(&gpu);
    assert_eq!(gpu.live_textures(), 1);
    assert_eq!(gpu.live_images(), 1);
}

// --- Registry ---

fn new_texture(gpu: &MockGpu) -> SharedTexture {
    with_import(|import| SharedTexture::import(gpu, import, None)).expect("mock import")
}

#[test]
fn it_should_iterate_in_insertion_order() {
    let gpu = MockGpu::new();
    let mut registry = TextureRegistry::new();
    let a = registry.insert(new_texture(&gpu));
    let b = registry.insert(new_texture(&gpu));
    let c = registry.insert(new_texture(&gpu));
    assert_eq!(registry.ids(), vec![a, b, c]);

    registry.remove(b).expect("b is live").release(&gpu);
    assert_eq!(registry.ids(), vec![a, c]);
    assert!(registry.is_consistent());

    let d = registry.insert(new_texture(&gpu));
    assert_eq!(registry.ids(), vec![a, c, d]);
    assert!(registry.is_consistent());
}

#[test]
fn it_should_walk_ids_by_cursor_in_insertion_order() {
    let gpu = MockGpu::new();
    let mut registry = TextureRegistry::new();
    assert!(registry.first_id().is_none());

    let a = registry.insert(new_texture(&gpu));
    let b = registry.insert(new_texture(&gpu));
    let c = registry.insert(new_texture(&gpu));
    registry.remove(b).expect("b is live").release(&gpu);
    let d = registry.insert(new_texture(&gpu));

    let mut walked = Vec::new();
    let mut cursor = registry.first_id();
    while let Some(id) = cursor {
        walked.push(id);
        cursor = registry.next_id(id);
    }
    assert_eq!(walked, vec![a, c, d]);
    assert_eq!(walked, registry.ids());
    assert!(registry.next_id(b).is_none(), "stale ids have no successor");

    while let Some((_, texture)) = registry.pop_front() {
        texture.release(&gpu);
    }
}

#[test]
fn it_should_ignore_stale_and_repeated_removals() {
    let gpu = MockGpu::new();
    let mut registry = TextureRegistry::new();
    let a = registry.insert(new_texture(&gpu));
    registry.remove(a).expect("a is live").release(&gpu);
    assert!(registry.remove(a).is_none());

    // The slot is reused, but the old id must not alias the new texture.
    let b = registry.insert(new_texture(&gpu));
    assert_ne!(a, b);
    assert!(registry.get(a).is_none());
    assert!(registry.remove(a).is_none());
    assert!(registry.contains(b));
    assert_eq!(registry.len(), 1);
}

#[test]
fn it_should_keep_links_consistent_across_create_destroy_sequences() {
    let gpu = MockGpu::new();
    let mut registry = TextureRegistry::new();
    let mut live: Vec<TextureId> = Vec::new();
    let mut created = 0usize;
    let mut destroyed = 0usize;
    let mut seed: u32 = 0x2545_f491;

    for _ in 0..500 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let roll = (seed >> 16) % 3;
        if roll == 0 && !live.is_empty() {
            let victim = live.remove((seed as usize >> 4) % live.len());
            registry.remove(victim).expect("victim is live").release(&gpu);
            destroyed += 1;
        } else {
            live.push(registry.insert(new_texture(&gpu)));
            created += 1;
        }
        assert_eq!(registry.len(), created - destroyed);
        assert!(registry.is_consistent());
    }
    assert_eq!(registry.ids(), live);
    assert_eq!(gpu.live_textures(), created - destroyed);

    while let Some((_, texture)) = registry.pop_front() {
        texture.release(&gpu);
    }
    assert!(registry.is_empty());
    assert!(registry.is_consistent());
    assert_eq!(gpu.live_textures(), 0);
    assert_eq!(gpu.live_images(), 0);
}
