// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Crate-wide error type.

use crate::backing::BackingType;
use crate::format::SharedImageFormat;
use crate::mailbox::Mailbox;
use crate::representation::{AccessMode, RepresentationKind};
use crate::usage::Usage;

/// Everything that can go wrong while creating, accessing or destroying a shared image.
///
/// The variants fall in four groups:
///
/// * busy/contention ([`Error::BackingBeingRead`], [`Error::BackingBeingWritten`]), which
///   callers should treat as "try again later" (see [`Error::is_busy`]),
/// * resource and context failures (texture or surface creation, context loss),
/// * contract violations (ending an access that was never begun, destroying an
///   untracked mailbox, skipping a required queue-family transition),
/// * capability errors (a backing that cannot produce a given representation).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the backing is being read")]
    BackingBeingRead,
    #[error("the backing is being written")]
    BackingBeingWritten,
    #[error("previous access hasn't ended yet (mode: {0})")]
    AccessAlreadyInProgress(AccessMode),
    #[error("{expected} access was not begun (mode: {actual})")]
    AccessNotBegun {
        expected: AccessMode,
        actual: AccessMode,
    },
    #[error("the graphics context is lost")]
    ContextLost,
    #[error("the backing has no graphics context to materialize into")]
    NoContextState,
    #[error("backend texture creation failed: {0}")]
    TextureCreationFailed(String),
    #[error("surface creation failed: {0}")]
    SurfaceCreationFailed(String),
    #[error("no external semaphore is available")]
    SemaphoreUnavailable,
    #[error("the image must be transitioned to the external queue family before ending access")]
    MissingQueueFamilyTransition,
    #[error("the backing for {0} has been destroyed")]
    BackingDestroyed(Mailbox),
    #[error("mailbox {0} is not registered")]
    UnknownMailbox(Mailbox),
    #[error("mailbox {0} is already registered")]
    DuplicateMailbox(Mailbox),
    #[error("mailbox {0} is not tracked by this client")]
    UntrackedMailbox(Mailbox),
    #[error("the zero mailbox does not name a shared image")]
    ZeroMailbox,
    #[error("{kind} representations are not supported by {backing} backings")]
    UnsupportedRepresentation {
        kind: RepresentationKind,
        backing: BackingType,
    },
    #[error("no backing factory supports this request")]
    NoSupportingFactory,
    #[error("{0} is not implemented for this backing")]
    NotImplemented(&'static str),
    #[error("format {0} is not supported here")]
    UnsupportedFormat(SharedImageFormat),
    #[error("invalid usage {0:?}")]
    InvalidUsage(Usage),
    #[error("invalid size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("pixel data has {actual} bytes, expected {expected}")]
    PixelDataMismatch { expected: usize, actual: usize },
    #[error("present failed: {0}")]
    PresentFailed(String),
    #[error(transparent)]
    PngEncoding(#[from] png::EncodingError),
    #[cfg(feature = "backend_wgpu")]
    #[error(transparent)]
    RequestAdapter(#[from] wgpu::RequestAdapterError),
    #[cfg(feature = "backend_wgpu")]
    #[error(transparent)]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

impl Error {
    /// True for the recoverable contention errors that callers are expected to retry
    /// on their own schedule (the core never retries or queues).
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::BackingBeingRead | Error::BackingBeingWritten)
    }

    /// True for errors caused by a lost or abandoned graphics context.
    pub fn is_context_lost(&self) -> bool {
        matches!(self, Error::ContextLost)
    }
}
