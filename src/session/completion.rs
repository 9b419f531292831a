//! Completion detection for reply streams without an end marker

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// How a session decides that the last frame has arrived.
///
/// The reply protocol carries no end-of-stream message, so completion has to
/// be inferred from the frame ids seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Complete as soon as `frame_id == expected - 1` is observed.
    ///
    /// Matches what existing clients do. If the last frame overtakes earlier
    /// ones, the session completes on it and the consumer is cancelled: frames
    /// that arrive after it are lost, never delivered to the stream. Use
    /// [`CompletionPolicy::AllFrames`] when every frame must be seen.
    #[default]
    LastFrameId,

    /// Complete once every id in `0..expected` has been observed.
    ///
    /// Tolerates reordering; a dropped frame keeps the session open until its
    /// deadline.
    AllFrames,
}

/// Tracks observed frame ids for one session.
#[derive(Debug)]
pub(crate) struct CompletionTracker {
    policy: CompletionPolicy,
    expected: i32,
    /// Distinct ids in `0..expected`, grown as frames arrive
    seen: HashSet<i32>,
    completed: bool,
}

impl CompletionTracker {
    pub(crate) fn new(policy: CompletionPolicy, expected: i32) -> Self {
        Self { policy, expected, seen: HashSet::new(), completed: false }
    }

    /// Record a frame id. Returns `true` exactly once, for the frame that
    /// completes the session.
    pub(crate) fn observe(&mut self, frame_id: i32) -> bool {
        if self.completed {
            return false;
        }

        let done = match self.policy {
            CompletionPolicy::LastFrameId => frame_id == self.expected - 1,
            CompletionPolicy::AllFrames => {
                if (0..self.expected).contains(&frame_id) {
                    self.seen.insert(frame_id);
                }
                usize::try_from(self.expected).is_ok_and(|expected| self.seen.len() == expected)
            }
        };

        self.completed = done;
        done
    }
}
