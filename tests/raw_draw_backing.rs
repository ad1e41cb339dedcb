// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Deferred rasterization through raster and Skia representations.

use shared_images::backing::SharedImageBacking;
use shared_images::backing::raw_draw::RawDrawImageBacking;
use shared_images::color::{AlphaType, Color4f, ColorSpace, SurfaceOrigin};
use shared_images::config::{MaterializationPolicy, SharedImageConfig};
use shared_images::context_state::SharedContextState;
use shared_images::error::Error;
use shared_images::format::SharedImageFormat;
use shared_images::geometry::{Rect, Size};
use shared_images::imp::SoftwareBackend;
use shared_images::mailbox::Mailbox;
use shared_images::memory::MemoryTypeTracker;
use shared_images::paint::PaintOp;
use shared_images::representation::{
    ProduceContext, RasterRepresentation, RasterWriteParams, SkiaRepresentation,
};
use shared_images::software::{Canvas, Pixmap};
use shared_images::usage::Usage;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn context() -> Arc<SharedContextState> {
    SharedContextState::new(Arc::new(SoftwareBackend::gl()), SharedImageConfig::default())
}

fn backing(size: Size, usage: Usage) -> Arc<RawDrawImageBacking> {
    Arc::new(
        RawDrawImageBacking::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            size,
            ColorSpace::srgb(),
            SurfaceOrigin::TopLeft,
            AlphaType::Premultiplied,
            usage,
            MaterializationPolicy::SaveLayers,
        )
        .unwrap(),
    )
}

fn produce() -> ProduceContext {
    ProduceContext::detached(Arc::new(MemoryTypeTracker::new()))
}

fn counting_callback(counter: &Arc<AtomicUsize>) -> Box<dyn FnOnce() + Send> {
    let counter = counter.clone();
    Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn red_clear_materializes_on_skia_read() {
    let ctx = context();
    let backing = backing(Size::new(64, 64), Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();
    let mut skia = backing.clone().produce_skia(produce(), ctx.clone()).unwrap();

    let buffer = raster.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
    buffer.push(PaintOp::Clear(Color4f::RED));
    raster.end_write_access(None).unwrap();
    assert!(!backing.is_materialized());

    let access = skia.begin_read_access().unwrap();
    let texture = access.handle.backend_texture().clone();
    assert!(texture.is_valid());
    assert_eq!(texture.size(), Size::new(64, 64));
    assert_eq!(texture.read_pixel(0, 0), Some([255, 0, 0, 255]));
    assert_eq!(texture.read_pixel(63, 63), Some([255, 0, 0, 255]));
    skia.end_read_access().unwrap();

    assert!(raster.begin_read_access().unwrap().is_none());
}

#[test]
fn save_layer_materializes_eagerly_when_visible() {
    let ctx = context();
    let backing = backing(Size::new(8, 8), Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();

    let buffer = raster.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
    buffer.extend([
        PaintOp::SaveLayer { bounds: None, alpha: 255 },
        PaintOp::DrawRect { rect: Rect::new(0, 0, 4, 4), color: Color4f::GREEN },
        PaintOp::Restore,
    ]);
    raster.end_write_access(None).unwrap();

    let texture = backing.backend_texture().expect("texture after visible complex write");
    assert!(texture.is_valid());
    assert_eq!(texture.read_pixel(1, 1), Some([0, 255, 0, 255]));
    assert_eq!(backing.estimated_size_for_mem_tracking(), 8 * 8 * 4);
    assert!(raster.begin_read_access().unwrap().is_none());
}

#[test]
fn save_layer_stays_recorded_when_hidden() {
    let ctx = context();
    let backing = backing(Size::new(8, 8), Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();

    let params = RasterWriteParams { visible: false, ..RasterWriteParams::default() };
    let buffer = raster.begin_write_access(ctx, params).unwrap();
    buffer.extend([PaintOp::SaveLayer { bounds: None, alpha: 128 }, PaintOp::Restore]);
    raster.end_write_access(None).unwrap();

    assert!(!backing.is_materialized());
    // complex content is never replayed by raster readers
    assert!(raster.begin_read_access().unwrap().is_none());
    assert_eq!(backing.read_count(), 0);
}

#[test]
fn second_writer_is_rejected_without_disturbing_the_first() {
    let ctx = context();
    let backing = backing(Size::new(4, 4), Usage::RASTER);
    let mut first = backing.clone().produce_raster(produce()).unwrap();
    let mut second = backing.clone().produce_raster(produce()).unwrap();

    let buffer = first.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
    buffer.push(PaintOp::Clear(Color4f::BLUE));
    let err = second.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap_err();
    assert!(matches!(err, Error::BackingBeingWritten));
    assert!(err.is_busy());
    assert!(backing.is_being_written());
    assert_eq!(backing.recorded_op_count(), Some(1));

    first.end_write_access(None).unwrap();
    let third = second.begin_write_access(ctx, RasterWriteParams::default()).unwrap();
    // a new write starts from an empty recording
    assert!(third.is_empty());
    second.end_write_access(None).unwrap();
}

#[test]
fn writer_is_rejected_while_read() {
    let ctx = context();
    let backing = backing(Size::new(4, 4), Usage::RASTER);
    let mut writer = backing.clone().produce_raster(produce()).unwrap();
    let mut reader = backing.clone().produce_raster(produce()).unwrap();

    let buffer = writer.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
    buffer.push(PaintOp::Clear(Color4f::WHITE));
    writer.end_write_access(None).unwrap();

    let read = reader.begin_read_access().unwrap().expect("simple content is replayable");
    assert_eq!(read.paint_op_buffer.len(), 1);
    assert!(matches!(
        writer.begin_write_access(ctx.clone(), RasterWriteParams::default()),
        Err(Error::BackingBeingRead)
    ));
    reader.end_read_access().unwrap();
    writer.begin_write_access(ctx, RasterWriteParams::default()).unwrap();
    writer.end_write_access(None).unwrap();
}

#[test]
fn replay_is_idempotent() {
    let ctx = context();
    let size = Size::new(16, 16);
    let backing = backing(size, Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();

    let params =
        RasterWriteParams { clear_color: Some(Color4f::WHITE), ..RasterWriteParams::default() };
    let buffer = raster.begin_write_access(ctx.clone(), params).unwrap();
    buffer.extend([
        PaintOp::Translate { dx: 2, dy: 2 },
        PaintOp::DrawRect { rect: Rect::new(0, 0, 6, 6), color: Color4f::BLUE.with_alpha(0.5) },
        PaintOp::ClipRect(Rect::new(4, 4, 8, 8)),
        PaintOp::DrawRect { rect: Rect::new(0, 0, 16, 16), color: Color4f::RED.with_alpha(0.25) },
    ]);
    raster.end_write_access(None).unwrap();

    let replay = |raster: &mut Box<dyn RasterRepresentation>| -> Pixmap {
        let access = raster.begin_read_access().unwrap().expect("replayable");
        let mut canvas = Canvas::new(Pixmap::transparent(size.width, size.height));
        if let Some(color) = access.clear_color {
            canvas.clear(color);
        }
        access.paint_op_buffer.playback(&mut canvas);
        raster.end_read_access().unwrap();
        canvas.into_pixmap()
    };
    let first = replay(&mut raster);
    let second = replay(&mut raster);
    assert_eq!(first, second);

    let mut skia = backing.clone().produce_skia(produce(), ctx).unwrap();
    let access = skia.begin_read_access().unwrap();
    assert_eq!(access.handle.backend_texture().read_pixels(), first);
    skia.end_read_access().unwrap();
}

#[test]
fn release_callback_runs_exactly_once() {
    let ctx = context();
    let backing = backing(Size::new(4, 4), Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    let buffer = raster.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
    buffer.push(PaintOp::Clear(Color4f::RED));
    raster.end_write_access(Some(counting_callback(&released))).unwrap();
    // ops are still needed for replay
    assert_eq!(released.load(Ordering::SeqCst), 0);

    // the next write no longer needs them
    raster.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    raster.end_write_access(None).unwrap();

    raster.begin_write_access(ctx, RasterWriteParams::default()).unwrap();
    raster.end_write_access(None).unwrap();
    drop(raster);
    drop(backing);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn eager_materialization_releases_immediately() {
    let ctx = context();
    let backing = backing(Size::new(4, 4), Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    let buffer = raster.begin_write_access(ctx, RasterWriteParams::default()).unwrap();
    buffer.extend([PaintOp::SaveLayer { bounds: None, alpha: 255 }, PaintOp::Restore]);
    raster.end_write_access(Some(counting_callback(&released))).unwrap();
    assert!(backing.is_materialized());
    assert_eq!(released.load(Ordering::SeqCst), 1);

    drop(raster);
    drop(backing);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn pending_callback_runs_when_backing_drops() {
    let ctx = context();
    let backing = backing(Size::new(4, 4), Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    raster.begin_write_access(ctx, RasterWriteParams::default()).unwrap();
    raster.end_write_access(Some(counting_callback(&released))).unwrap();
    drop(raster);
    assert_eq!(released.load(Ordering::SeqCst), 0);
    drop(backing);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn skia_read_during_write_is_rejected() {
    let ctx = context();
    let backing = backing(Size::new(4, 4), Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();
    let mut skia = backing.clone().produce_skia(produce(), ctx.clone()).unwrap();

    raster.begin_write_access(ctx, RasterWriteParams::default()).unwrap();
    assert!(matches!(skia.begin_read_access(), Err(Error::BackingBeingWritten)));
    raster.end_write_access(None).unwrap();
    skia.begin_read_access().unwrap();
    skia.end_read_access().unwrap();
}

#[test]
fn materialization_failure_leaves_ops_recorded() {
    let backend = Arc::new(SoftwareBackend::gl());
    let ctx = SharedContextState::new(backend.clone(), SharedImageConfig::default());
    let backing = backing(Size::new(4, 4), Usage::RASTER);
    let mut raster = backing.clone().produce_raster(produce()).unwrap();
    let mut skia = backing.clone().produce_skia(produce(), ctx.clone()).unwrap();

    let buffer = raster.begin_write_access(ctx, RasterWriteParams::default()).unwrap();
    buffer.push(PaintOp::Clear(Color4f::GREEN));
    raster.end_write_access(None).unwrap();

    backend.set_fail_texture_creation(true);
    assert!(skia.begin_read_access().is_err());
    assert_eq!(backing.read_count(), 0);
    assert_eq!(backing.recorded_op_count(), Some(1));

    backend.set_fail_texture_creation(false);
    let access = skia.begin_read_access().unwrap();
    assert_eq!(access.handle.backend_texture().read_pixel(2, 2), Some([0, 255, 0, 255]));
    skia.end_read_access().unwrap();
}
