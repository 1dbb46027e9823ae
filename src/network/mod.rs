pub mod connection;
pub mod framing;
pub mod listener;

pub use connection::{handle_connection, ConnectionEnd};
pub use framing::{encode_frame, FrameDecoder, FrameEvent, FrameState};
pub use listener::{ListenerSettings, TenantListener};
