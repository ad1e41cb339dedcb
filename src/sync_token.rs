// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Cross-context ordering tokens and fences.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandBufferNamespace {
    #[default]
    Invalid,
    GpuIo,
    InProcess,
}

/// Proof that some GPU work has been sequenced on a command buffer.
///
/// A token is "verified" once the service has confirmed it was issued by the client that
/// presents it.  Destroying an image with a token defers the destruction until the named
/// work has been sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SyncToken {
    pub namespace: CommandBufferNamespace,
    pub command_buffer_id: u64,
    pub release_count: u64,
    pub verified: bool,
}

impl SyncToken {
    pub fn new(
        namespace: CommandBufferNamespace,
        command_buffer_id: u64,
        release_count: u64,
    ) -> Self {
        SyncToken { namespace, command_buffer_id, release_count, verified: false }
    }

    /// The empty token; nothing has to be waited for.
    pub fn empty() -> Self {
        SyncToken::default()
    }

    pub fn has_data(&self) -> bool {
        self.namespace != CommandBufferNamespace::Invalid
    }

    pub fn set_verified(&mut self) {
        self.verified = true;
    }
}

/// A CPU-visible fence the client signals once it is done writing through a
/// GPU memory buffer.
#[derive(Debug, Clone)]
pub struct GpuFence {
    id: u64,
    signaled: Arc<AtomicBool>,
}

static NEXT_FENCE: AtomicU64 = AtomicU64::new(1);

impl GpuFence {
    pub fn new() -> Self {
        GpuFence {
            id: NEXT_FENCE.fetch_add(1, Ordering::Relaxed),
            signaled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Handle that can be sent across the IPC boundary.
    pub fn handle(&self) -> GpuFenceHandle {
        GpuFenceHandle { id: self.id }
    }
}

impl Default for GpuFence {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuFenceHandle {
    pub id: u64,
}
