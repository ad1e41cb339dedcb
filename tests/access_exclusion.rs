// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Random begin/end interleavings never let a writer coexist with anything else.

use proptest::prelude::*;
use shared_images::backing::external_vk::ExternalVkImageBacking;
use shared_images::backing::raw_draw::RawDrawImageBacking;
use shared_images::backing::SharedImageBacking;
use shared_images::color::{AlphaType, ColorSpace, SurfaceOrigin};
use shared_images::config::{MaterializationPolicy, SharedImageConfig};
use shared_images::context_state::SharedContextState;
use shared_images::error::Error;
use shared_images::factory::SharedImageRequest;
use shared_images::format::SharedImageFormat;
use shared_images::geometry::Size;
use shared_images::imp::SoftwareBackend;
use shared_images::mailbox::Mailbox;
use shared_images::memory::MemoryTypeTracker;
use shared_images::representation::{ProduceContext, RasterRepresentation, RasterWriteParams};
use shared_images::usage::Usage;
use std::sync::Arc;

const REPRESENTATIONS: usize = 3;

#[derive(Debug, Clone, Copy)]
enum Op {
    BeginWrite(usize),
    EndWrite(usize),
    BeginRead(usize),
    EndRead(usize),
}

fn op() -> impl Strategy<Value = Op> {
    let rep = 0..REPRESENTATIONS;
    prop_oneof![
        rep.clone().prop_map(Op::BeginWrite),
        rep.clone().prop_map(Op::EndWrite),
        rep.clone().prop_map(Op::BeginRead),
        rep.prop_map(Op::EndRead),
    ]
}

/// Expected state: which representation writes, and how many reads each holds.
#[derive(Debug, Default)]
struct Model {
    writer: Option<usize>,
    reads: [usize; REPRESENTATIONS],
}

impl Model {
    fn total_reads(&self) -> usize {
        self.reads.iter().sum()
    }

    /// Applies `op` and returns the error kind the implementation must report, if any.
    fn apply(&mut self, op: Op) -> Result<(), &'static str> {
        match op {
            Op::BeginWrite(i) => {
                if self.writer.is_some() {
                    Err("written")
                } else if self.total_reads() > 0 {
                    Err("read")
                } else {
                    self.writer = Some(i);
                    Ok(())
                }
            }
            Op::EndWrite(i) => {
                if self.writer == Some(i) {
                    self.writer = None;
                    Ok(())
                } else {
                    Err("not begun")
                }
            }
            Op::BeginRead(i) => {
                if self.writer.is_some() {
                    Err("written")
                } else {
                    self.reads[i] += 1;
                    Ok(())
                }
            }
            Op::EndRead(i) => {
                if self.reads[i] > 0 {
                    self.reads[i] -= 1;
                    Ok(())
                } else {
                    Err("not begun")
                }
            }
        }
    }
}

fn kind(e: &Error) -> &'static str {
    match e {
        Error::BackingBeingWritten => "written",
        Error::BackingBeingRead => "read",
        Error::AccessNotBegun { .. } => "not begun",
        _ => "other",
    }
}

fn raw_draw_backing() -> Arc<RawDrawImageBacking> {
    Arc::new(
        RawDrawImageBacking::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(4, 4),
            ColorSpace::srgb(),
            SurfaceOrigin::TopLeft,
            AlphaType::Premultiplied,
            Usage::RASTER,
            MaterializationPolicy::SaveLayers,
        )
        .unwrap(),
    )
}

proptest! {
    #[test]
    fn raw_draw_raster_access_matches_model(ops in prop::collection::vec(op(), 1..64)) {
        let ctx =
            SharedContextState::new(Arc::new(SoftwareBackend::gl()), SharedImageConfig::default());
        let backing = raw_draw_backing();
        let mut reps: Vec<Box<dyn RasterRepresentation>> = (0..REPRESENTATIONS)
            .map(|_| {
                let produce = ProduceContext::detached(Arc::new(MemoryTypeTracker::new()));
                backing.clone().produce_raster(produce).unwrap()
            })
            .collect();
        let mut model = Model::default();

        for op in ops {
            let expected = model.apply(op);
            let actual: Result<(), Error> = match op {
                Op::BeginWrite(i) => reps[i]
                    .begin_write_access(ctx.clone(), RasterWriteParams::default())
                    .map(|_| ()),
                Op::EndWrite(i) => reps[i].end_write_access(None),
                // no ops are ever recorded, so replay is always offered
                Op::BeginRead(i) => {
                    reps[i].begin_read_access().map(|access| assert!(access.is_some()))
                }
                Op::EndRead(i) => reps[i].end_read_access(),
            };
            prop_assert_eq!(expected, actual.as_ref().map_err(kind).copied());

            prop_assert_eq!(backing.is_being_written(), model.writer.is_some());
            prop_assert_eq!(backing.read_count(), model.total_reads());
            prop_assert!(!(backing.is_being_written() && backing.read_count() > 0));
        }

        drop(reps);
        prop_assert!(!backing.is_being_written());
        prop_assert_eq!(backing.read_count(), 0);
    }

    #[test]
    fn external_vk_access_matches_model(ops in prop::collection::vec(op(), 1..64)) {
        let ctx = SharedContextState::new(
            Arc::new(SoftwareBackend::vulkan()),
            SharedImageConfig::default(),
        );
        let request = SharedImageRequest::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(4, 4),
            Usage::GLES2 | Usage::RASTER,
        );
        let backing = ExternalVkImageBacking::create(ctx.clone(), &request).unwrap();
        let mut model = Model::default();

        for op in ops {
            // the backing counts accesses, not who holds them
            let op = match op {
                Op::EndWrite(_) => Op::EndWrite(model.writer.unwrap_or(0)),
                Op::EndRead(_) => Op::EndRead(model.reads.iter().position(|r| *r > 0).unwrap_or(0)),
                other => other,
            };
            let expected = model.apply(op);
            let actual: Result<(), Error> = match op {
                Op::BeginWrite(_) => backing
                    .begin_access(false, false)
                    .map(|s| backing.return_pending_semaphores_with_fence_helper(s)),
                Op::BeginRead(_) => backing
                    .begin_access(true, false)
                    .map(|s| backing.return_pending_semaphores_with_fence_helper(s)),
                Op::EndWrite(_) => backing.end_access(
                    false,
                    ctx.get_or_create_semaphore().ok(),
                    false,
                ),
                Op::EndRead(_) => backing.end_access(
                    true,
                    ctx.get_or_create_semaphore().ok(),
                    false,
                ),
            };
            prop_assert_eq!(expected, actual.as_ref().map_err(kind).copied());
            prop_assert_eq!(backing.is_write_in_progress(), model.writer.is_some());
            prop_assert_eq!(backing.reads_in_progress(), model.total_reads());
        }
    }
}

#[test]
fn busy_errors_are_classified() {
    assert!(Error::BackingBeingRead.is_busy());
    assert!(Error::BackingBeingWritten.is_busy());
    assert!(!Error::ContextLost.is_busy());
    assert!(!Error::NoContextState.is_busy());
}
