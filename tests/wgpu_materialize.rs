// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Materializing raw-draw content into real GPU textures.
//!
//! Skipped on machines without a usable adapter.
#![cfg(feature = "backend_wgpu")]

use shared_images::backing::raw_draw::RawDrawImageBacking;
use shared_images::backing::SharedImageBacking;
use shared_images::color::{AlphaType, Color4f, ColorSpace, SurfaceOrigin};
use shared_images::config::{MaterializationPolicy, SharedImageConfig};
use shared_images::context_state::SharedContextState;
use shared_images::format::SharedImageFormat;
use shared_images::geometry::{Rect, Size};
use shared_images::imp::{NativeTexture, WgpuBackend};
use shared_images::mailbox::Mailbox;
use shared_images::memory::MemoryTypeTracker;
use shared_images::paint::PaintOp;
use shared_images::representation::{
    ProduceContext, RasterRepresentation, RasterWriteParams, SkiaRepresentation,
};
use shared_images::usage::Usage;
use std::sync::Arc;

fn context() -> Option<Arc<SharedContextState>> {
    match WgpuBackend::new() {
        Ok(backend) => Some(SharedContextState::new(
            Arc::new(backend),
            SharedImageConfig::default(),
        )),
        Err(e) => {
            println!("skipping: no wgpu device ({e})");
            None
        }
    }
}

fn backing(size: Size) -> Arc<RawDrawImageBacking> {
    Arc::new(
        RawDrawImageBacking::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            size,
            ColorSpace::srgb(),
            SurfaceOrigin::TopLeft,
            AlphaType::Premultiplied,
            Usage::RASTER | Usage::DISPLAY_READ,
            MaterializationPolicy::SaveLayers,
        )
        .unwrap(),
    )
}

fn produce() -> ProduceContext {
    ProduceContext::detached(Arc::new(MemoryTypeTracker::new()))
}

#[test]
fn skia_read_creates_a_wgpu_texture() {
    let Some(ctx) = context() else {
        return;
    };
    // 100 wide rows need padding to the copy alignment
    let backing = backing(Size::new(100, 3));
    let mut raster = backing.clone().produce_raster(produce()).unwrap();
    let mut skia = backing.clone().produce_skia(produce(), ctx.clone()).unwrap();

    let buffer = raster.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
    buffer.push(PaintOp::Clear(Color4f::RED));
    raster.end_write_access(None).unwrap();

    let access = skia.begin_read_access().unwrap();
    let texture = access.handle.backend_texture().clone();
    assert!(matches!(texture.native(), Some(NativeTexture::Wgpu(_))));
    assert_eq!(texture.read_pixel(99, 2), Some([255, 0, 0, 255]));
    skia.end_read_access().unwrap();
    ctx.flush().unwrap();
}

#[test]
fn eager_materialization_submits_work() {
    let Some(ctx) = context() else {
        return;
    };
    let backing = backing(Size::new(16, 16));
    let mut raster = backing.clone().produce_raster(produce()).unwrap();

    let buffer = raster.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
    buffer.extend([
        PaintOp::SaveLayer { bounds: Some(Rect::new(0, 0, 8, 8)), alpha: 255 },
        PaintOp::DrawRect { rect: Rect::new(0, 0, 16, 16), color: Color4f::BLUE },
        PaintOp::Restore,
    ]);
    raster.end_write_access(None).unwrap();

    let texture = backing.backend_texture().expect("materialized");
    assert_eq!(texture.read_pixel(0, 0), Some([0, 0, 255, 255]));
    assert_eq!(backing.estimated_size_for_mem_tracking(), 16 * 16 * 4);

    drop(raster);
    drop(backing);
    assert!(!texture.is_valid());
}
