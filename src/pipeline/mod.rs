pub mod retrieval;
pub mod ringbuf;
pub mod storage;

pub use retrieval::{combined_latest, combined_oldest, step_pair};
pub use ringbuf::{FrameRef, RingStats, RingStore};
pub use storage::StorageRoot;
