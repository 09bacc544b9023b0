// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Task registry (single-flight controller)
//
// Holds the one in-flight generation. A new arrival swaps itself into the
// slot and supersedes whatever was there. The slot lock is held only for
// the swap; supersession itself is synchronous (cancel + buffered writes),
// so no lock is ever held across upstream I/O.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::sink::ClientSink;
use crate::stream::ChunkFramer;

/// Notice written to a superseded client before its stream is closed.
pub const SUPERSEDED_NOTICE: &str = "\n\n[new request received, regenerating]";

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Filtering = 1,
    Thinking = 2,
    Outputting = 3,
    Done = 4,
    Failed = 5,
    Superseded = 6,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Filtering,
            2 => Phase::Thinking,
            3 => Phase::Outputting,
            4 => Phase::Done,
            5 => Phase::Failed,
            6 => Phase::Superseded,
            _ => Phase::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Filtering => "filtering",
            Phase::Thinking => "thinking",
            Phase::Outputting => "outputting",
            Phase::Done => "done",
            Phase::Failed => "failed",
            Phase::Superseded => "superseded",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ActiveTask
// ---------------------------------------------------------------------------

/// The in-flight request: its client sink, cancel handle and one-shot flags.
#[derive(Debug)]
pub struct ActiveTask {
    pub id: u64,
    pub request_id: String,
    pub sink: ClientSink,
    pub cancel: CancellationToken,
    pub framer: ChunkFramer,
    reasoning_emitted: AtomicBool,
    tool_follow_up: AtomicBool,
    phase: AtomicU8,
}

impl ActiveTask {
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// True if reasoning has already reached the client for this request.
    pub fn reasoning_emitted(&self) -> bool {
        self.reasoning_emitted.load(Ordering::Acquire)
    }

    /// Claim the right to emit reasoning. Returns true only for the first caller.
    pub fn mark_reasoning_emitted(&self) -> bool {
        !self.reasoning_emitted.swap(true, Ordering::AcqRel)
    }

    pub fn is_tool_follow_up(&self) -> bool {
        self.tool_follow_up.load(Ordering::Acquire)
    }

    pub fn set_tool_follow_up(&self, value: bool) {
        self.tool_follow_up.store(value, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// TaskRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TaskRegistry {
    slot: Mutex<Option<Arc<ActiveTask>>>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task and return it together with whatever it displaced.
    pub fn acquire(
        &self,
        request_id: impl Into<String>,
        sink: ClientSink,
        cancel: CancellationToken,
        framer: ChunkFramer,
    ) -> (Arc<ActiveTask>, Option<Arc<ActiveTask>>) {
        let task = Arc::new(ActiveTask {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            request_id: request_id.into(),
            sink,
            cancel,
            framer,
            reasoning_emitted: AtomicBool::new(false),
            tool_follow_up: AtomicBool::new(false),
            phase: AtomicU8::new(Phase::Idle as u8),
        });

        let previous = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.replace(Arc::clone(&task))
        };
        (task, previous)
    }

    /// Abort `task`: cancel its upstream call, then, if its client is still
    /// connected, write one notice chunk and terminate the stream.
    pub fn supersede(&self, task: &ActiveTask) {
        task.cancel.cancel();
        task.set_phase(Phase::Superseded);

        if task.sink.is_open() && task.sink.open_stream() {
            let notice = task.framer.content_chunk(SUPERSEDED_NOTICE, Some("stop"));
            task.sink.write_chunk(&notice);
        }
        task.sink.finish();

        tracing::info!(
            request_id = %task.request_id,
            task_id = task.id,
            "request superseded by a newer one"
        );
    }

    /// Clear the slot if it still holds exactly `task`.
    pub fn release(&self, task: &Arc<ActiveTask>) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, task) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// The task currently holding the slot.
    pub fn current(&self) -> Option<Arc<ActiveTask>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
