pub mod config;
pub mod error;
pub mod events;
pub mod framing;
pub mod listener;
pub mod protocol;
pub mod relay;
pub mod relayer;
pub mod transport;

pub use error::{Error, Result};
pub use events::{EventSink, RelayEvent, TracingSink};
pub use framing::{Frame, FrameCodec};
pub use relayer::Relayer;
