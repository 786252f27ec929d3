//! Timed DMX channel transitions and pan/tilt arc motion for Art-Net
//! universes.
//!
//! Each universe is a [`UniverseSender`]: a 512-channel frame, the
//! transitions currently writing into it and the scheduler deciding when the
//! frame goes out. [`driver::spawn_sender`] runs a sender on its own task and
//! [`Controller`] routes payloads across several of them.

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod receiver;
pub mod router;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod transition;
pub mod transport;

pub use transition_curves::{
    ArcConfig, ArcSolver, Curve, PanTilt, PlaybackInterval, DEFAULT_GAMMA,
};

pub use command::{Bucket, Command, Payload};
pub use config::{ControllerConfig, ReceiverConfig, ReceiverOutput, SenderConfig};
pub use driver::{open_sender, spawn_sender, Controller, SenderHandle};
pub use error::{
    ConfigError, CurveError, GeometryError, SenderError, StoreError, TransportError,
    ValidationError,
};
pub use frame::{ChannelFrame, CHANNEL_COUNT};
pub use receiver::{FrameReceiver, ReceivedMessage};
pub use router::{RoutingTable, UniverseAddress};
pub use scheduler::Scheduler;
pub use sender::UniverseSender;
pub use store::{FrameStore, MemoryFrameStore, SqliteFrameStore};
pub use transition::{Timing, Transition, TransitionState};
pub use transport::{DmxOutput, FrameLog, LogOutput, RecordingOutput};
