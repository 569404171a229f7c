//! Boundary interfaces: time source, outbound sink and wire formatting

pub mod clock;
pub mod sink;
pub mod formatting;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use sink::{ChannelSink, EventSink, RecordingSink};
pub use formatting::WireFormatter;
