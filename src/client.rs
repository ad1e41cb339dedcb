// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Client-side bookkeeping.

[`ClientSharedImageInterface`] forwards to a [`SharedImageInterfaceProxy`] (the IPC
boundary) and remembers every mailbox it created.  Destroying a mailbox it does not own
is refused, and whatever is still owned when the interface drops is destroyed then, so
an abnormal shutdown does not leak service-side images.

[`InProcessSharedImageInterface`] is a proxy that talks to a [`SharedImageFactory`] in the
same process.

```
use shared_images::client::{
    ClientSharedImageInterface, InProcessSharedImageInterface, SharedImageInfo,
};
use shared_images::config::SharedImageConfig;
use shared_images::context_state::SharedContextState;
use shared_images::format::SharedImageFormat;
use shared_images::geometry::Size;
use shared_images::imp::SoftwareBackend;
use shared_images::usage::Usage;
use shared_images::sync_token::SyncToken;
use std::sync::Arc;

let context =
    SharedContextState::new(Arc::new(SoftwareBackend::gl()), SharedImageConfig::default());
let proxy = Arc::new(InProcessSharedImageInterface::new(context));
let client = ClientSharedImageInterface::new(proxy.clone());
let mailbox = client.create_shared_image(&SharedImageInfo::new(
    SharedImageFormat::RGBA_8888,
    Size::new(4, 4),
    Usage::GLES2,
));
assert!(!mailbox.is_zero());
client.destroy_shared_image(&SyncToken::empty(), &mailbox).unwrap();
assert_eq!(proxy.manager().live_backing_count(), 0);
```
*/

use crate::color::{AlphaType, ColorSpace, SurfaceOrigin};
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::factory::{GpuMemoryBuffer, SharedImageFactory, SharedImageRequest};
use crate::format::SharedImageFormat;
use crate::geometry::Size;
use crate::mailbox::Mailbox;
use crate::manager::SharedImageManager;
use crate::sync_token::{CommandBufferNamespace, GpuFence, SyncToken};
use crate::usage::Usage;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What a client asks for; the mailbox is chosen by the proxy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedImageInfo {
    pub format: SharedImageFormat,
    pub size: Size,
    pub color_space: ColorSpace,
    pub surface_origin: SurfaceOrigin,
    pub alpha_type: AlphaType,
    pub usage: Usage,
}

impl SharedImageInfo {
    pub fn new(format: SharedImageFormat, size: Size, usage: Usage) -> Self {
        SharedImageInfo {
            format,
            size,
            color_space: ColorSpace::srgb(),
            surface_origin: SurfaceOrigin::TopLeft,
            alpha_type: AlphaType::Premultiplied,
            usage,
        }
    }

    pub fn to_request(&self, mailbox: Mailbox) -> SharedImageRequest {
        SharedImageRequest {
            mailbox,
            format: self.format,
            size: self.size,
            color_space: self.color_space,
            surface_origin: self.surface_origin,
            alpha_type: self.alpha_type,
            usage: self.usage,
            is_thread_safe: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapChainMailboxes {
    pub front_buffer: Mailbox,
    pub back_buffer: Mailbox,
}

/// The service as seen from the client.  Failed creations return the zero mailbox.
pub trait SharedImageInterfaceProxy: Send + Sync + Debug {
    fn create_shared_image(&self, info: &SharedImageInfo) -> Mailbox;

    fn create_shared_image_with_data(&self, info: &SharedImageInfo, pixel_data: &[u8]) -> Mailbox;

    fn create_shared_image_from_gmb(
        &self,
        info: &SharedImageInfo,
        gmb: &GpuMemoryBuffer,
    ) -> Mailbox;

    fn create_swap_chain(
        &self,
        format: SharedImageFormat,
        size: Size,
        usage: Usage,
    ) -> SwapChainMailboxes;

    fn present_swap_chain(&self, sync_token: &SyncToken, back_buffer: &Mailbox);

    fn update_shared_image(
        &self,
        sync_token: &SyncToken,
        in_fence: Option<GpuFence>,
        mailbox: &Mailbox,
    );

    fn destroy_shared_image(&self, sync_token: &SyncToken, mailbox: &Mailbox);

    fn gen_unverified_sync_token(&self) -> SyncToken;

    fn gen_verified_sync_token(&self) -> SyncToken;

    fn wait_sync_token(&self, sync_token: &SyncToken);

    fn flush(&self);

    fn usage_for_mailbox(&self, mailbox: &Mailbox) -> Usage;

    /// Tells the service about a mailbox created by someone else.
    fn notify_mailbox_added(&self, mailbox: &Mailbox, usage: Usage);
}

#[derive(Debug)]
pub struct ClientSharedImageInterface {
    proxy: Arc<dyn SharedImageInterfaceProxy>,
    mailboxes: Mutex<HashSet<Mailbox>>,
}

impl ClientSharedImageInterface {
    pub fn new(proxy: Arc<dyn SharedImageInterfaceProxy>) -> Self {
        ClientSharedImageInterface { proxy, mailboxes: Mutex::new(HashSet::new()) }
    }

    fn mailboxes(&self) -> MutexGuard<'_, HashSet<Mailbox>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_mailbox(&self, mailbox: Mailbox) -> Mailbox {
        if !mailbox.is_zero() {
            self.mailboxes().insert(mailbox);
        }
        mailbox
    }

    pub fn create_shared_image(&self, info: &SharedImageInfo) -> Mailbox {
        self.add_mailbox(self.proxy.create_shared_image(info))
    }

    pub fn create_shared_image_with_data(
        &self,
        info: &SharedImageInfo,
        pixel_data: &[u8],
    ) -> Mailbox {
        self.add_mailbox(self.proxy.create_shared_image_with_data(info, pixel_data))
    }

    pub fn create_shared_image_from_gmb(
        &self,
        info: &SharedImageInfo,
        gmb: &GpuMemoryBuffer,
    ) -> Mailbox {
        self.add_mailbox(self.proxy.create_shared_image_from_gmb(info, gmb))
    }

    pub fn create_swap_chain(
        &self,
        format: SharedImageFormat,
        size: Size,
        usage: Usage,
    ) -> SwapChainMailboxes {
        let mailboxes = self.proxy.create_swap_chain(format, size, usage);
        self.add_mailbox(mailboxes.front_buffer);
        self.add_mailbox(mailboxes.back_buffer);
        mailboxes
    }

    pub fn present_swap_chain(&self, sync_token: &SyncToken, back_buffer: &Mailbox) {
        self.proxy.present_swap_chain(sync_token, back_buffer)
    }

    pub fn update_shared_image(&self, sync_token: &SyncToken, mailbox: &Mailbox) {
        self.proxy.update_shared_image(sync_token, None, mailbox)
    }

    pub fn update_shared_image_with_fence(
        &self,
        sync_token: &SyncToken,
        in_fence: GpuFence,
        mailbox: &Mailbox,
    ) {
        self.proxy.update_shared_image(sync_token, Some(in_fence), mailbox)
    }

    /// Destroys a mailbox this client created.  Anything else is refused.
    pub fn destroy_shared_image(
        &self,
        sync_token: &SyncToken,
        mailbox: &Mailbox,
    ) -> Result<(), Error> {
        if !self.mailboxes().remove(mailbox) {
            tracing::error!(%mailbox, "destroying a mailbox this client does not own");
            return Err(Error::UntrackedMailbox(*mailbox));
        }
        self.proxy.destroy_shared_image(sync_token, mailbox);
        Ok(())
    }

    pub fn gen_unverified_sync_token(&self) -> SyncToken {
        self.proxy.gen_unverified_sync_token()
    }

    pub fn gen_verified_sync_token(&self) -> SyncToken {
        self.proxy.gen_verified_sync_token()
    }

    pub fn wait_sync_token(&self, sync_token: &SyncToken) {
        self.proxy.wait_sync_token(sync_token)
    }

    pub fn flush(&self) {
        self.proxy.flush()
    }

    pub fn usage_for_mailbox(&self, mailbox: &Mailbox) -> Usage {
        self.proxy.usage_for_mailbox(mailbox)
    }

    pub fn notify_mailbox_added(&self, mailbox: &Mailbox, usage: Usage) {
        self.proxy.notify_mailbox_added(mailbox, usage)
    }

    pub fn is_tracked(&self, mailbox: &Mailbox) -> bool {
        self.mailboxes().contains(mailbox)
    }

    pub fn tracked_count(&self) -> usize {
        self.mailboxes().len()
    }
}

impl Drop for ClientSharedImageInterface {
    fn drop(&mut self) {
        let leaked: Vec<Mailbox> =
            self.mailboxes.get_mut().unwrap_or_else(PoisonError::into_inner).drain().collect();
        if !leaked.is_empty() {
            tracing::debug!(count = leaked.len(), "destroying shared images left by the client");
        }
        for mailbox in leaked {
            self.proxy.destroy_shared_image(&SyncToken::empty(), &mailbox);
        }
    }
}

static NEXT_COMMAND_BUFFER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct SequenceState {
    release_count: u64,
    last_waited: Option<SyncToken>,
    foreign_usage: HashMap<Mailbox, Usage>,
}

/// A proxy that runs the service in-process.  Sync tokens are sequenced on one
/// in-process command buffer; every call executes immediately.
#[derive(Debug)]
pub struct InProcessSharedImageInterface {
    factory: SharedImageFactory,
    command_buffer_id: u64,
    state: Mutex<SequenceState>,
}

impl InProcessSharedImageInterface {
    pub fn new(context_state: Arc<SharedContextState>) -> Self {
        Self::with_manager(context_state, SharedImageManager::new())
    }

    pub fn with_manager(
        context_state: Arc<SharedContextState>,
        manager: SharedImageManager,
    ) -> Self {
        InProcessSharedImageInterface {
            factory: SharedImageFactory::new(context_state, manager),
            command_buffer_id: NEXT_COMMAND_BUFFER.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(SequenceState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SequenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn factory(&self) -> &SharedImageFactory {
        &self.factory
    }

    pub fn manager(&self) -> &SharedImageManager {
        self.factory.manager()
    }

    pub fn last_waited_sync_token(&self) -> Option<SyncToken> {
        self.state().last_waited
    }

    fn created(&self, mailbox: Mailbox, result: Result<(), Error>) -> Mailbox {
        match result {
            Ok(()) => mailbox,
            Err(e) => {
                tracing::error!(error = %e, "shared image creation failed");
                Mailbox::ZERO
            }
        }
    }

    fn next_sync_token(&self) -> SyncToken {
        let mut state = self.state();
        state.release_count += 1;
        SyncToken::new(
            CommandBufferNamespace::InProcess,
            self.command_buffer_id,
            state.release_count,
        )
    }
}

impl SharedImageInterfaceProxy for InProcessSharedImageInterface {
    fn create_shared_image(&self, info: &SharedImageInfo) -> Mailbox {
        let mailbox = Mailbox::generate();
        self.created(mailbox, self.factory.create_shared_image(&info.to_request(mailbox)))
    }

    fn create_shared_image_with_data(&self, info: &SharedImageInfo, pixel_data: &[u8]) -> Mailbox {
        let mailbox = Mailbox::generate();
        self.created(
            mailbox,
            self.factory.create_shared_image_with_data(&info.to_request(mailbox), pixel_data),
        )
    }

    fn create_shared_image_from_gmb(
        &self,
        info: &SharedImageInfo,
        gmb: &GpuMemoryBuffer,
    ) -> Mailbox {
        let mailbox = Mailbox::generate();
        self.created(
            mailbox,
            self.factory.create_shared_image_from_gmb(&info.to_request(mailbox), gmb),
        )
    }

    fn create_swap_chain(
        &self,
        format: SharedImageFormat,
        size: Size,
        usage: Usage,
    ) -> SwapChainMailboxes {
        let front_buffer = Mailbox::generate();
        let back_buffer = Mailbox::generate();
        match self.factory.create_swap_chain(front_buffer, back_buffer, format, size, usage) {
            Ok(()) => SwapChainMailboxes { front_buffer, back_buffer },
            Err(e) => {
                tracing::error!(error = %e, "swap chain creation failed");
                SwapChainMailboxes::default()
            }
        }
    }

    fn present_swap_chain(&self, sync_token: &SyncToken, back_buffer: &Mailbox) {
        self.wait_sync_token(sync_token);
        if let Err(e) = self.factory.present_swap_chain(back_buffer) {
            tracing::error!(mailbox = %back_buffer, error = %e, "present failed");
        }
    }

    fn update_shared_image(
        &self,
        sync_token: &SyncToken,
        in_fence: Option<GpuFence>,
        mailbox: &Mailbox,
    ) {
        self.wait_sync_token(sync_token);
        if let Err(e) = self.factory.update_shared_image(mailbox, in_fence) {
            tracing::error!(%mailbox, error = %e, "update failed");
        }
    }

    fn destroy_shared_image(&self, sync_token: &SyncToken, mailbox: &Mailbox) {
        self.wait_sync_token(sync_token);
        if let Err(e) = self.factory.destroy_shared_image(mailbox) {
            tracing::error!(%mailbox, error = %e, "destroy failed");
        }
    }

    fn gen_unverified_sync_token(&self) -> SyncToken {
        self.next_sync_token()
    }

    fn gen_verified_sync_token(&self) -> SyncToken {
        let mut token = self.next_sync_token();
        token.set_verified();
        token
    }

    fn wait_sync_token(&self, sync_token: &SyncToken) {
        if !sync_token.has_data() {
            return;
        }
        let mut state = self.state();
        if sync_token.command_buffer_id == self.command_buffer_id
            && sync_token.release_count > state.release_count
        {
            tracing::warn!(
                release = sync_token.release_count,
                "waiting on a sync token that was never released"
            );
        }
        state.last_waited = Some(*sync_token);
    }

    fn flush(&self) {
        if let Err(e) = self.factory.context_state().flush() {
            tracing::error!(error = %e, "flush failed");
        }
    }

    fn usage_for_mailbox(&self, mailbox: &Mailbox) -> Usage {
        self.manager()
            .usage(mailbox)
            .or_else(|| self.state().foreign_usage.get(mailbox).copied())
            .unwrap_or_else(Usage::empty)
    }

    fn notify_mailbox_added(&self, mailbox: &Mailbox, usage: Usage) {
        self.state().foreign_usage.insert(*mailbox, usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedImageConfig;
    use crate::imp::SoftwareBackend;

    fn client() -> (Arc<InProcessSharedImageInterface>, ClientSharedImageInterface) {
        let ctx =
            SharedContextState::new(Arc::new(SoftwareBackend::gl()), SharedImageConfig::default());
        let proxy = Arc::new(InProcessSharedImageInterface::new(ctx));
        (proxy.clone(), ClientSharedImageInterface::new(proxy))
    }

    #[test]
    fn failed_creation_is_not_tracked() {
        let (_proxy, client) = client();
        let mailbox = client.create_shared_image(&SharedImageInfo::new(
            SharedImageFormat::RGBA_8888,
            Size::new(0, 0),
            Usage::GLES2,
        ));
        assert!(mailbox.is_zero());
        assert_eq!(client.tracked_count(), 0);
    }

    #[test]
    fn sync_tokens_are_sequenced() {
        let (proxy, client) = client();
        let a = client.gen_unverified_sync_token();
        let b = client.gen_verified_sync_token();
        assert!(b.release_count > a.release_count);
        assert!(!a.verified && b.verified);
        client.wait_sync_token(&b);
        assert_eq!(proxy.last_waited_sync_token(), Some(b));
    }

    #[test]
    fn foreign_mailbox_usage() {
        let (_proxy, client) = client();
        let foreign = Mailbox::generate();
        assert_eq!(client.usage_for_mailbox(&foreign), Usage::empty());
        client.notify_mailbox_added(&foreign, Usage::DISPLAY_READ);
        assert_eq!(client.usage_for_mailbox(&foreign), Usage::DISPLAY_READ);
        assert!(!client.is_tracked(&foreign));
    }
}
