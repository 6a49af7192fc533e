pub mod error;
pub mod event;
pub mod types;

pub use error::{ContextKind, Result, TrackerError};
pub use event::{
    AllocatedClass, Allocation, AllocationEvent, ContextBatch, EncodedStack, EventBatch,
    EventKind, JniRefEvent, JniRefKind, SamplingChange, StackFrame, ThreadInfo,
    FULL_TRACKING_INTERVAL,
};
pub use types::{
    ALLOCATED_BEFORE_WINDOW, APP_HEAP_ID, ClassTag, DEFAULT_HEAP_ID, HeapId, IMAGE_HEAP_ID,
    JNI_HEAP_ID, MethodId, NO_CONTEXT_ID, NOT_FREED, QueryRange, SliceKind, StackId, Tag,
    ThreadId, Timestamp, ZYGOTE_HEAP_ID, heap_name,
};
