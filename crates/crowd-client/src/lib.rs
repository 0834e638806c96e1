//! Real-time frame-event client for the crowd detection backend.
//!
//! Decoded push events flow through the live-state reducer, the aggregate
//! accumulator and the replay buffer, all owned by a single
//! [`session::SessionController`]. The dual-player synchroniser runs
//! independently, driven only by player events.

pub mod aggregate;
pub mod browser;
pub mod camera;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod live_state;
pub mod notice;
pub mod push_channel;
pub mod replay;
pub mod server;
pub mod session;
pub mod sync;

pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use event::FrameEvent;
pub use session::{SessionController, SessionHandle, ViewUpdate};
