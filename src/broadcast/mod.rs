//! Client registry and frame fan-out

pub mod fanout;
pub mod registry;

pub use fanout::{broadcast_tick, BroadcastLoop, TickReport};
pub use registry::{ClientHandle, ClientId, ClientInfo, ClientRegistry, Offer, SharedRegistry};
