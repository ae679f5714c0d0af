//! # realm_gameserver
//!
//! The world gameserver: one event loop owning the entity-component store,
//! the networked-object registry, every peer session and the media plane.
//!
//! ## Startup Sequence
//!
//! 1. Connect to NATS and attach the outbound sink.
//! 2. Start media workers and instance routers.
//! 3. Create the outgoing data producer, piped to every instance router.
//! 4. End stale instance records, resolve the location and create this
//!    server's instance record.
//! 5. Start the tick and sweep timers.
//! 6. Subscribe to peer subjects and run the event loop.
//!
//! Steps run through [`startup::Pipeline`], which enforces the order and
//! names the stage that failed.

pub mod components;
pub mod config;
pub mod media;
pub mod nats;
pub mod registry;
pub mod server;
pub mod services;
pub mod session;
pub mod startup;
pub mod sweeper;
pub mod tick;
pub mod transport;

pub use config::{MediaConfig, ServerConfig};
pub use registry::{Authority, NetworkObject, NetworkObjectRegistry, RegistryError};
pub use server::{GameServer, Responder, ServerEvent, ServerHandle, event_channel};
pub use services::{InMemoryDirectory, LookupError, WorldServices};
pub use session::{Session, SessionState};
pub use transport::{Outbound, ServerTransport};
