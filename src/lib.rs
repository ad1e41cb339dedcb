// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! shared_images is the backing layer of a GPU shared-image service.

A *shared image* is a texture-like object named by a 16-byte [`mailbox::Mailbox`] and used
from several graphics APIs and processes.  Each image has exactly one *backing*, which owns
the storage, and any number of *representations*, which are API-specific views that carry
their own begin/end access protocol.

# Layers

| Layer                       | Module                      | Responsibility                                             |
|-----------------------------|-----------------------------|------------------------------------------------------------|
| Client bookkeeping          | [`client`]                  | Track created mailboxes, destroy leftovers on drop         |
| Factory                     | [`factory`]                 | Validate requests, pick the first backing factory that fits |
| Manager                     | [`manager`]                 | Mailbox registry, representation ref-counting              |
| Backings                    | [`backing`]                 | Storage and access state: raw draw, Vulkan, GL, swap chain |
| Representations             | [`representation`]          | Raster, Skia, GL passthrough, overlay access               |
| Context                     | [`context_state`]           | Surface cache, semaphore pool, deferred cleanup            |
| Graphics backends           | [`imp`]                     | Software (always) and wgpu (feature `backend_wgpu`)        |

# Raw draw

A raw-draw backing records paint operations instead of rasterizing them.  The ops are
replayed into a real texture only when a consumer needs pixels, or eagerly when the
recording is costly to keep around (see [`paint::MaterializationPolicy`]).

# Access rules

A backing is *idle*, *being read* by one or more readers, or *being written* by exactly one
writer.  Contended begins fail with [`Error::BackingBeingRead`] or
[`Error::BackingBeingWritten`]; nothing blocks.
*/

pub mod backing;
pub mod client;
pub mod color;
pub mod config;
pub mod context_state;
pub mod error;
pub mod factory;
pub mod format;
pub mod geometry;
pub mod imp;
pub mod mailbox;
pub mod manager;
pub mod memory;
pub mod paint;
pub mod representation;
pub mod semaphore;
pub mod software;
pub mod surface;
pub mod sync_token;
pub mod texture;
pub mod usage;

pub use error::Error;
