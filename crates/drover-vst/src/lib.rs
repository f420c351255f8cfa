//! drover-vst — the VelocyStream transport: chunk framing, message
//! assembly, multiplexed connections, the per-host pool, and the
//! authentication handshake.

pub mod chunk;
pub mod connection;
pub mod handshake;
pub mod message;
pub mod transport;

pub use chunk::{Chunk, Version};
pub use connection::VstConnection;
pub use handshake::{auth_callback, ConnectCallback};
pub use message::MessageStore;
pub use transport::{VstTransport, VstTransportConfig};
