//! Overlay Blocks
//!
//! Per-viewer virtual blocks for a block-world game server. An overlay is a
//! block (cell), a named set of blocks (group) or an origin-relative bulk map
//! (structure) that only its registered viewers see. The true world is never
//! modified; outbound world-sync packets are rewritten per viewer and inbound
//! digging/placement against overlays is intercepted.
//!
//! ## Architecture
//!
//! ```text
//! OverlayBusAgent  (bus.rs)          ← tick loop, frame fan-out
//!   └── OverlayService  (service.rs) ← tick domain, inbound queue
//!         ├── OverlayRegistry  (registry.rs)   ← spatial index, lifecycle
//!         │     └── Overlay  (overlay/)        ← cell | group | structure
//!         ├── PacketRewriter   (rewrite.rs)    ← outbound substitution
//!         ├── BreakTracker     (breaking.rs)   ← mining state machine
//!         └── OverlayListener  (listener.rs)   ← join/quit, interact, place
//!
//! EngineContext  (host.rs)  ← WorldAuthority, ViewerDirectory, PacketSink,
//!                              EventBus, BoundingGeometry
//! ```
//!
//! The host supplies the collaborators in [`host`]; [`terrain`] provides
//! in-memory versions used by the standalone server and the tests.

pub mod breaking;
pub mod codec;
pub mod config;
pub mod deferred;
pub mod error;
pub mod events;
pub mod geometry;
pub mod host;
pub mod listener;
pub mod metadata;
pub mod overlay;
pub mod protocol;
pub mod registry;
pub mod rewrite;
pub mod service;
pub mod terrain;
pub mod types;
pub mod viewer;

// The bus agent requires the `server` feature.
#[cfg(feature = "server")]
pub mod bus;

#[cfg(feature = "server")]
pub use bus::{OverlayBusAgent, OverlayBusConfig};
pub use error::{OverlayError, Result};
pub use events::{BreakDecision, Decision, EventBus, NoopEvents};
pub use host::{EngineContext, PacketSink, ViewerDirectory, WorldAuthority};
pub use overlay::{Overlay, OverlayHandle, OverlayId, OverlayKind, OverlaySettings};
pub use registry::OverlayRegistry;
pub use service::{OverlayService, TickEvents};
pub use types::{
    BlockFace, BlockPos, BlockState, OverlayServiceConfig, OverlayStats, Position, ViewerId, ViewerInfo,
};
