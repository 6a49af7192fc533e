// ============================================================================
// Context Cache
// ============================================================================
//
// Append-only cache of the metadata that allocation events reference by id:
// classes, encoded call stacks, threads and the stack frames of methods.
//
// The agent always publishes metadata before the events that use it, so the
// cache is brought up to a window's end (plus a lookahead) before any event
// batch of that window is interpreted. An id that is still unknown at that
// point is a protocol violation and surfaces as MissingContext.
//
// ============================================================================

pub mod class_db;

pub use class_db::{ClassDb, ClassEntry};

use crate::core::{
    ContextBatch, ContextKind, MethodId, NO_CONTEXT_ID, QueryRange, Result, SliceKind,
    StackFrame, StackId, ThreadId, Timestamp, TrackerError,
};
use crate::eventlog::{EventLog, RetryPolicy};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Encoded call stack: method ids of the frames, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackEntry {
    pub stack_id: StackId,
    pub method_ids: Vec<MethodId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    pub thread_id: ThreadId,
    pub name: String,
}

/// Read-only handle onto the method frames resolved so far.
///
/// Cloning is cheap; clones observe frames merged later by the worker.
#[derive(Clone, Default)]
pub struct FrameLookup {
    frames: Arc<RwLock<im::HashMap<MethodId, StackFrame>>>,
}

impl FrameLookup {
    pub fn get(&self, method_id: MethodId) -> Result<Option<StackFrame>> {
        let frames = self.frames.read()?;
        Ok(frames.get(&method_id).cloned())
    }

    /// Point-in-time copy of every known frame. O(1) thanks to structural sharing.
    pub fn snapshot(&self) -> Result<im::HashMap<MethodId, StackFrame>> {
        Ok(self.frames.read()?.clone())
    }

    pub fn len(&self) -> usize {
        self.frames.read().map(|frames| frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_missing(&self, methods: Vec<StackFrame>) -> Result<()> {
        if methods.is_empty() {
            return Ok(());
        }
        let mut frames = self.frames.write()?;
        for method in methods {
            if !frames.contains_key(&method.method_id) {
                frames.insert(method.method_id, method);
            }
        }
        Ok(())
    }
}

pub struct ContextCache {
    classes: ClassDb,
    callstacks: HashMap<StackId, Arc<CallstackEntry>>,
    threads: HashMap<ThreadId, Arc<ThreadEntry>>,
    frames: FrameLookup,
    high_water_mark: Timestamp,
    lookahead: i64,
}

impl ContextCache {
    pub fn new(lookahead: i64) -> Self {
        Self {
            classes: ClassDb::new(),
            callstacks: HashMap::new(),
            threads: HashMap::new(),
            frames: FrameLookup::default(),
            high_water_mark: Timestamp::MIN,
            lookahead: lookahead.max(0),
        }
    }

    /// Newest context batch timestamp merged so far.
    pub fn high_water_mark(&self) -> Timestamp {
        self.high_water_mark
    }

    /// Fetch and merge all metadata introduced between the high-water mark
    /// and `end_time` plus the lookahead. No-op when `end_time` is already
    /// covered.
    pub async fn ensure_context(
        &mut self,
        log: &dyn EventLog,
        end_time: Timestamp,
        retry: &RetryPolicy,
    ) -> Result<()> {
        if self.high_water_mark >= end_time {
            return Ok(());
        }

        let range = QueryRange::between(
            self.high_water_mark,
            end_time.saturating_add(self.lookahead),
        );
        let batches = retry
            .run(range, SliceKind::Context, || log.contexts(range.start, range.end))
            .await?;

        debug!("merging {} context batches for {}", batches.len(), range);
        for batch in batches {
            self.merge(batch)?;
        }
        Ok(())
    }

    /// Merge one context batch. Known ids keep their first definition.
    pub fn merge(&mut self, batch: ContextBatch) -> Result<()> {
        for class in &batch.classes {
            self.classes
                .register_class(class.classloader_id, &class.class_name, class.class_id);
        }
        for stack in batch.stacks {
            self.callstacks
                .entry(stack.stack_id)
                .or_insert_with(|| {
                    Arc::new(CallstackEntry {
                        stack_id: stack.stack_id,
                        method_ids: stack.method_ids,
                    })
                });
        }
        for thread in batch.threads {
            self.threads.entry(thread.thread_id).or_insert_with(|| {
                Arc::new(ThreadEntry {
                    thread_id: thread.thread_id,
                    name: thread.thread_name,
                })
            });
        }
        self.frames.insert_missing(batch.methods)?;
        self.high_water_mark = self.high_water_mark.max(batch.timestamp);
        Ok(())
    }

    pub fn class(&self, class_tag: i32) -> Result<Arc<ClassEntry>> {
        self.classes
            .entry(class_tag)
            .ok_or(TrackerError::MissingContext {
                kind: ContextKind::Class,
                id: class_tag as i64,
            })
    }

    /// Resolve a callstack id; `0` means the event carried no stack.
    pub fn callstack(&self, stack_id: StackId) -> Result<Option<Arc<CallstackEntry>>> {
        if stack_id == NO_CONTEXT_ID {
            return Ok(None);
        }
        self.callstacks
            .get(&stack_id)
            .cloned()
            .map(Some)
            .ok_or(TrackerError::MissingContext {
                kind: ContextKind::Callstack,
                id: stack_id as i64,
            })
    }

    /// Resolve a thread id; `0` means the event carried no thread.
    pub fn thread(&self, thread_id: ThreadId) -> Result<Option<Arc<ThreadEntry>>> {
        if thread_id == NO_CONTEXT_ID {
            return Ok(None);
        }
        self.threads
            .get(&thread_id)
            .cloned()
            .map(Some)
            .ok_or(TrackerError::MissingContext {
                kind: ContextKind::Thread,
                id: thread_id as i64,
            })
    }

    pub fn classes(&self) -> &ClassDb {
        &self.classes
    }

    pub fn frame_lookup(&self) -> FrameLookup {
        self.frames.clone()
    }
}
