//! A reliable bulk-data transfer engine: segments arbitrarily large
//! payloads over a point-to-point link, requests missing parts by content
//! hash with an adaptively-sized sliding window, and proves completion back
//! to the sender.
//!
//! The engine owns no transport of its own — it is generic over the
//! [`Link`](link::Link) trait, which a caller implements once per real
//! connection. [`ResourceManager`](resource::manager::ResourceManager) is
//! the entry point: start an outgoing transfer with `start_send`, feed it
//! inbound packets with `handle_packet`, and drive retries/timeouts with
//! `tick`.

pub mod advertisement;
pub mod buffer;
pub mod codec;
pub mod compress;
pub mod config;
pub mod crypt;
pub mod error;
pub mod hash;
pub mod link;
pub mod packet;
pub mod resource;
pub mod wire;

pub use config::ResourceConfig;
pub use error::{ParcelError, Result};
pub use hash::Hash;
pub use link::Link;
pub use packet::{LinkPacket, PacketContext, PacketType};
pub use resource::manager::ResourceManager;
pub use resource::{ResourceEvent, ResourceEventKind, ResourcePayload, ResourceProgress, ResourceStatus};
