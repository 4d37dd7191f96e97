pub mod feed;
pub mod source;

pub use feed::{feed_lines, spawn_jsonl_feed};
pub use source::{ChannelSource, Delivery, MessageSource, TransportError};
