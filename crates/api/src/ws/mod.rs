//! WebSocket binding for broadcast-delivered tasks.
//!
//! Each connection is one room observer; rooms themselves live in
//! [`modelhub_core::RoomManager`].

mod handler;

pub use handler::ws_handler;
