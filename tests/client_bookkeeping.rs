// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Mailbox ownership on the client side of the shared image interface.

use proptest::prelude::*;
use shared_images::client::{
    ClientSharedImageInterface, InProcessSharedImageInterface, SharedImageInfo,
    SharedImageInterfaceProxy, SwapChainMailboxes,
};
use shared_images::config::SharedImageConfig;
use shared_images::context_state::SharedContextState;
use shared_images::error::Error;
use shared_images::factory::GpuMemoryBuffer;
use shared_images::format::{ResourceFormat, SharedImageFormat};
use shared_images::geometry::Size;
use shared_images::imp::SoftwareBackend;
use shared_images::mailbox::Mailbox;
use shared_images::sync_token::{CommandBufferNamespace, GpuFence, SyncToken};
use shared_images::usage::Usage;
use std::sync::{Arc, Mutex};

fn in_process() -> Arc<InProcessSharedImageInterface> {
    let ctx =
        SharedContextState::new(Arc::new(SoftwareBackend::gl()), SharedImageConfig::default());
    Arc::new(InProcessSharedImageInterface::new(ctx))
}

fn info() -> SharedImageInfo {
    SharedImageInfo::new(
        SharedImageFormat::RGBA_8888,
        Size::new(4, 4),
        Usage::GLES2 | Usage::DISPLAY_READ,
    )
}

/// Forwards to an in-process service and records every destroy it sees.
#[derive(Debug)]
struct RecordingProxy {
    inner: Arc<InProcessSharedImageInterface>,
    destroyed: Mutex<Vec<Mailbox>>,
}

impl RecordingProxy {
    fn new() -> Arc<Self> {
        Arc::new(RecordingProxy { inner: in_process(), destroyed: Mutex::new(Vec::new()) })
    }

    fn destroyed(&self) -> Vec<Mailbox> {
        self.destroyed.lock().unwrap().clone()
    }
}

impl SharedImageInterfaceProxy for RecordingProxy {
    fn create_shared_image(&self, info: &SharedImageInfo) -> Mailbox {
        self.inner.create_shared_image(info)
    }

    fn create_shared_image_with_data(&self, info: &SharedImageInfo, pixel_data: &[u8]) -> Mailbox {
        self.inner.create_shared_image_with_data(info, pixel_data)
    }

    fn create_shared_image_from_gmb(
        &self,
        info: &SharedImageInfo,
        gmb: &GpuMemoryBuffer,
    ) -> Mailbox {
        self.inner.create_shared_image_from_gmb(info, gmb)
    }

    fn create_swap_chain(
        &self,
        format: SharedImageFormat,
        size: Size,
        usage: Usage,
    ) -> SwapChainMailboxes {
        self.inner.create_swap_chain(format, size, usage)
    }

    fn present_swap_chain(&self, sync_token: &SyncToken, back_buffer: &Mailbox) {
        self.inner.present_swap_chain(sync_token, back_buffer)
    }

    fn update_shared_image(
        &self,
        sync_token: &SyncToken,
        in_fence: Option<GpuFence>,
        mailbox: &Mailbox,
    ) {
        self.inner.update_shared_image(sync_token, in_fence, mailbox)
    }

    fn destroy_shared_image(&self, sync_token: &SyncToken, mailbox: &Mailbox) {
        self.destroyed.lock().unwrap().push(*mailbox);
        self.inner.destroy_shared_image(sync_token, mailbox)
    }

    fn gen_unverified_sync_token(&self) -> SyncToken {
        self.inner.gen_unverified_sync_token()
    }

    fn gen_verified_sync_token(&self) -> SyncToken {
        self.inner.gen_verified_sync_token()
    }

    fn wait_sync_token(&self, sync_token: &SyncToken) {
        self.inner.wait_sync_token(sync_token)
    }

    fn flush(&self) {
        self.inner.flush()
    }

    fn usage_for_mailbox(&self, mailbox: &Mailbox) -> Usage {
        self.inner.usage_for_mailbox(mailbox)
    }

    fn notify_mailbox_added(&self, mailbox: &Mailbox, usage: Usage) {
        self.inner.notify_mailbox_added(mailbox, usage)
    }
}

proptest! {
    #[test]
    fn drop_destroys_exactly_the_remaining_mailboxes(
        (created, destroyed) in (1usize..12).prop_flat_map(|n| (Just(n), 0..=n))
    ) {
        let proxy = RecordingProxy::new();
        let client = ClientSharedImageInterface::new(proxy.clone());
        let mailboxes: Vec<Mailbox> =
            (0..created).map(|_| client.create_shared_image(&info())).collect();
        prop_assert!(mailboxes.iter().all(|m| !m.is_zero()));
        prop_assert_eq!(client.tracked_count(), created);

        let token = client.gen_unverified_sync_token();
        for mailbox in &mailboxes[..destroyed] {
            prop_assert!(client.destroy_shared_image(&token, mailbox).is_ok());
        }
        prop_assert_eq!(client.tracked_count(), created - destroyed);
        prop_assert_eq!(proxy.inner.manager().live_backing_count(), created - destroyed);

        drop(client);
        let swept = proxy.destroyed().len() - destroyed;
        prop_assert_eq!(swept, created - destroyed);
        let mut remaining: Vec<Mailbox> = proxy.destroyed()[destroyed..].to_vec();
        remaining.sort();
        let mut expected: Vec<Mailbox> = mailboxes[destroyed..].to_vec();
        expected.sort();
        prop_assert_eq!(remaining, expected);
        prop_assert_eq!(proxy.inner.manager().live_backing_count(), 0);
    }
}

#[test]
fn untracked_destroy_is_rejected_and_not_forwarded() {
    let proxy = RecordingProxy::new();
    let owner = ClientSharedImageInterface::new(proxy.clone());
    let other = ClientSharedImageInterface::new(proxy.clone());

    let mailbox = owner.create_shared_image(&info());
    let token = SyncToken::empty();
    assert!(matches!(
        other.destroy_shared_image(&token, &mailbox),
        Err(Error::UntrackedMailbox(m)) if m == mailbox
    ));
    assert!(matches!(
        owner.destroy_shared_image(&token, &Mailbox::generate()),
        Err(Error::UntrackedMailbox(_))
    ));
    assert!(proxy.destroyed().is_empty());
    assert!(proxy.inner.manager().is_registered(&mailbox));

    owner.destroy_shared_image(&token, &mailbox).unwrap();
    // a second destroy of the same mailbox is untracked too
    assert!(matches!(
        owner.destroy_shared_image(&token, &mailbox),
        Err(Error::UntrackedMailbox(_))
    ));
    assert_eq!(proxy.destroyed(), vec![mailbox]);

    drop(other);
    drop(owner);
    assert_eq!(proxy.destroyed(), vec![mailbox]);
}

#[test]
fn every_creation_path_is_tracked() {
    let proxy = in_process();
    let client = ClientSharedImageInterface::new(proxy.clone());

    let pixels = vec![0x80u8; 4 * 4 * 4];
    let with_data = client.create_shared_image_with_data(&info(), &pixels);
    assert!(!with_data.is_zero());

    let gmb = GpuMemoryBuffer::new(Size::new(4, 4), ResourceFormat::Rgba8888).unwrap();
    gmb.write(&pixels).unwrap();
    let from_gmb = client.create_shared_image_from_gmb(&info(), &gmb);
    assert!(!from_gmb.is_zero());

    let swap_chain = client.create_swap_chain(
        SharedImageFormat::RGBA_8888,
        Size::new(4, 4),
        Usage::DISPLAY_READ,
    );
    assert!(!swap_chain.front_buffer.is_zero() && !swap_chain.back_buffer.is_zero());

    for mailbox in [with_data, from_gmb, swap_chain.front_buffer, swap_chain.back_buffer] {
        assert!(client.is_tracked(&mailbox));
    }
    assert_eq!(client.tracked_count(), 4);
    assert_eq!(proxy.manager().live_backing_count(), 4);

    let token = client.gen_verified_sync_token();
    client.update_shared_image(&token, &from_gmb);
    client.present_swap_chain(&token, &swap_chain.back_buffer);
    client.flush();

    drop(client);
    assert_eq!(proxy.manager().live_backing_count(), 0);
}

#[test]
fn failed_creation_returns_zero_and_is_not_tracked() {
    let proxy = in_process();
    let client = ClientSharedImageInterface::new(proxy.clone());

    let wrong_length = client.create_shared_image_with_data(&info(), &[0u8; 3]);
    assert!(wrong_length.is_zero());
    let no_usage = client.create_shared_image(&SharedImageInfo::new(
        SharedImageFormat::RGBA_8888,
        Size::new(4, 4),
        Usage::empty(),
    ));
    assert!(no_usage.is_zero());
    let swap_chain =
        client.create_swap_chain(SharedImageFormat::NV12, Size::new(4, 4), Usage::DISPLAY_READ);
    assert_eq!(swap_chain, SwapChainMailboxes::default());

    assert_eq!(client.tracked_count(), 0);
    assert_eq!(proxy.manager().live_backing_count(), 0);
}

#[test]
fn usage_is_reported_for_owned_and_foreign_mailboxes() {
    let proxy = in_process();
    let client = ClientSharedImageInterface::new(proxy.clone());
    let owned = client.create_shared_image(&info());
    assert_eq!(client.usage_for_mailbox(&owned), Usage::GLES2 | Usage::DISPLAY_READ);

    let foreign = Mailbox::generate();
    client.notify_mailbox_added(&foreign, Usage::RASTER);
    assert_eq!(client.usage_for_mailbox(&foreign), Usage::RASTER);
    assert!(!client.is_tracked(&foreign));
}

#[test]
fn sync_tokens_wait_in_order() {
    let proxy = in_process();
    let client = ClientSharedImageInterface::new(proxy.clone());
    let first = client.gen_unverified_sync_token();
    let second = client.gen_unverified_sync_token();
    assert_eq!(first.namespace, CommandBufferNamespace::InProcess);
    assert_eq!(first.command_buffer_id, second.command_buffer_id);
    assert_eq!(second.release_count, first.release_count + 1);

    client.wait_sync_token(&SyncToken::empty());
    assert_eq!(proxy.last_waited_sync_token(), None);
    client.wait_sync_token(&second);
    assert_eq!(proxy.last_waited_sync_token(), Some(second));
}
