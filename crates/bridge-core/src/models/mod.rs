pub mod delivery;
pub mod segment;
pub mod task;

pub use delivery::{DeliveryAttempt, DeliveryStatus};
pub use segment::{NewSegment, Segment, SegmentPatch, SegmentStatus};
pub use task::{NewTask, Task, TaskPatch, TaskStatus};
