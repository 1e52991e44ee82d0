pub mod decoder;
pub mod feed;
pub mod frame;
#[cfg(feature = "v4l2")]
pub mod v4l2;
pub mod writer;

pub use feed::{CaptureFeed, FeedFactory, SyntheticFeeds};
pub use frame::Frame;
pub use frame::PixelFormat;
#[cfg(feature = "v4l2")]
pub use v4l2::{V4l2Capture, V4l2Feeds};
pub use writer::{CaptureWriter, WriterSettings};
