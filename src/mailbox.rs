// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Opaque names for shared images.

use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MAILBOX: AtomicU64 = AtomicU64::new(1);

/// A globally unique (within the GPU process) name for one shared image.
///
/// Mailboxes are the only way images are named across the client/service boundary.
/// The all-zero mailbox is reserved and never names an image.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mailbox([u8; 16]);

impl Mailbox {
    /// The reserved "no image" mailbox.
    pub const ZERO: Mailbox = Mailbox([0; 16]);

    /// Generates a fresh, never-before-seen mailbox.
    pub fn generate() -> Mailbox {
        let serial = NEXT_MAILBOX.fetch_add(1, Ordering::Relaxed);
        let mut name = [0u8; 16];
        name[..8].copy_from_slice(&serial.to_le_bytes());
        name[8..12].copy_from_slice(&std::process::id().to_le_bytes());
        // tag byte, keeps generated names distinct from hand-built ones in tests
        name[15] = 0x5a;
        Mailbox(name)
    }

    pub const fn from_bytes(name: [u8; 16]) -> Mailbox {
        Mailbox(name)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Mailbox::ZERO
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl Debug for Mailbox {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mailbox({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::Mailbox;
    use std::collections::HashSet;

    #[test]
    fn generated_mailboxes_are_unique_and_nonzero() {
        let names: HashSet<Mailbox> = (0..256).map(|_| Mailbox::generate()).collect();
        assert_eq!(names.len(), 256);
        assert!(names.iter().all(|m| !m.is_zero()));
    }

    #[test]
    fn zero_mailbox() {
        assert!(Mailbox::ZERO.is_zero());
        assert!(Mailbox::default().is_zero());
        assert_eq!(Mailbox::ZERO.to_string(), "0".repeat(32));
    }
}
