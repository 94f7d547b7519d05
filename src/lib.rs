//! Mudline - authoritative room simulation core.
//!
//! The server side of a co-op top-down trench shooter: each room owns
//! its world state, simulates it at a fixed 60 Hz, and replicates to
//! clients at lower, bounded rates. Transport and rendering are
//! external; the seams are `commands::ClientCommand` inbound and
//! `snapshot::OutboundMessage` outbound.

pub mod commands;
pub mod config;
pub mod entities;
pub mod environment;
pub mod error;
pub mod events;
pub mod loot;
pub mod profiler;
pub mod rng;
pub mod room;
pub mod server;
pub mod snapshot;
pub mod spatial;
pub mod systems;

pub use commands::{ClientCommand, InputFrame};
pub use config::{GameModeConfig, LevelType};
pub use entities::*;
pub use environment::{Aabb, Environment, GeomFilter, OrientedBox};
pub use events::{EventBus, GameEvent};
pub use loot::LootManager;
pub use room::{Room, Scene, TICK_DT};
pub use server::{spawn_room, RoomHandle, RoomManager};
pub use snapshot::{Broadcaster, OutboundMessage, Subscriber};
pub use spatial::{BodyKind, SpatialEntry, SpatialGrid};
pub use systems::*;
