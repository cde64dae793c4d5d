// 媒体转发：JT/T 1078 码流 -> PS over RTP over TCP

pub mod adapter;
pub mod packager;

pub use adapter::{StreamAdapter, StreamAdapterFactory, StreamConfig};
pub use packager::{presentation_timestamp, FramePackager, MAX_CLOCK_DRIFT_MS};
