pub mod assembler;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod store;

pub use assembler::{AssembledSegment, AssembledTranscript, ReadyCheck, TranscriptMetadata};
pub use coordinator::{CompletionCoordinator, CompletionOutcome, CompletionPolicy, ResultNotifier};
pub use error::{BridgeError, ErrorCategory};
pub use models::{DeliveryAttempt, DeliveryStatus, NewSegment, NewTask, Segment, SegmentPatch, SegmentStatus, Task, TaskPatch, TaskStatus};
pub use store::{BlobEntry, BlobStore, TaskSegmentStore};
