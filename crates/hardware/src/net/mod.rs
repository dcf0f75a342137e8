//! Network-facing plumbing shared by the caches.
//!
//! This module provides:
//! 1. **Packets:** The envelope carrying coherence, memory and credit messages, addressed
//!    to a node and a port within it.
//! 2. **Port adapter:** Per-link output buffering with lookup-latency release and credits.
//! 3. **Destination maps:** Address to home L2 / memory controller selection.

/// Address to node mapping.
pub mod dest_map;

/// Network packet envelope.
pub mod packet;

/// Credit-controlled output port.
pub mod port;

pub use dest_map::{DestMap, PageBasedMap, SingleDestMap};
pub use packet::{NetworkPacket, Payload, PortId};
pub use port::PortAdapter;
