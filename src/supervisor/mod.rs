//! Stream supervision
//!
//! - Stream records and the lifecycle state machine
//! - Event channel for state changes and failures
//! - The supervisor owning every transcoder process

pub mod events;
pub mod manager;
pub mod stream;

pub use events::log_events;
pub use manager::{output_location_for, StreamSupervisor};
pub use stream::{Stream, StreamState};
