//! Two-level connect queue
//!
//! A pixel id sits in at most one of the two queues. High priority entries
//! always dispatch before low priority ones.

use std::collections::VecDeque;

use pixels_core::PixelId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    High,
}

/// Effect of an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Added at the back of the requested queue
    Added,
    /// Moved from the low queue to the back of the high queue
    Promoted,
    /// Already queued at the same or a higher priority
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub high: Vec<PixelId>,
    pub low: Vec<PixelId>,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectQueue {
    high: VecDeque<PixelId>,
    low: VecDeque<PixelId>,
}

impl ConnectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, id: PixelId, priority: Priority) -> Enqueued {
        match (self.priority_of(id), priority) {
            (None, Priority::High) => {
                self.high.push_back(id);
                Enqueued::Added
            }
            (None, Priority::Low) => {
                self.low.push_back(id);
                Enqueued::Added
            }
            (Some(Priority::Low), Priority::High) => {
                self.low.retain(|p| *p != id);
                self.high.push_back(id);
                Enqueued::Promoted
            }
            // a low request never demotes
            (Some(_), _) => Enqueued::Unchanged,
        }
    }

    pub fn priority_of(&self, id: PixelId) -> Option<Priority> {
        if self.high.contains(&id) {
            Some(Priority::High)
        } else if self.low.contains(&id) {
            Some(Priority::Low)
        } else {
            None
        }
    }

    pub fn contains(&self, id: PixelId) -> bool {
        self.priority_of(id).is_some()
    }

    pub fn remove(&mut self, id: PixelId) -> Option<Priority> {
        let priority = self.priority_of(id)?;
        match priority {
            Priority::High => self.high.retain(|p| *p != id),
            Priority::Low => self.low.retain(|p| *p != id),
        }
        Some(priority)
    }

    /// Front of the high queue, else front of the low queue
    pub fn pop_next(&mut self) -> Option<(PixelId, Priority)> {
        self.pop_next_where(|_| true)
    }

    /// First entry in dispatch order accepted by `eligible`. Skipped entries
    /// keep their place.
    pub fn pop_next_where<F>(&mut self, mut eligible: F) -> Option<(PixelId, Priority)>
    where
        F: FnMut(PixelId) -> bool,
    {
        if let Some(pos) = self.high.iter().position(|id| eligible(*id)) {
            return self.high.remove(pos).map(|id| (id, Priority::High));
        }
        if let Some(pos) = self.low.iter().position(|id| eligible(*id)) {
            return self.low.remove(pos).map(|id| (id, Priority::Low));
        }
        None
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            high: self.high.iter().copied().collect(),
            low: self.low.iter().copied().collect(),
        }
    }
}
