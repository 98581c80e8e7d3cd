use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redelivery {
    /// The message may be delivered again; `attempt` failures so far.
    Retry { attempt: u32 },
    /// The cap was reached and the entry evicted; the message is failed.
    Exhausted { attempts: u32 },
}

/// Failed-attempt counter per message id, capped at `max_redeliver`.
///
/// An entry lives only while its count is below the cap. It is removed on
/// success (`clear`) or when the cap is reached.
#[derive(Debug)]
pub struct RedeliveryTracker {
    max_redeliver: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl RedeliveryTracker {
    pub fn new(max_redeliver: u32) -> Self {
        Self {
            max_redeliver,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_redeliver(&self) -> u32 {
        self.max_redeliver
    }

    pub fn record_failure(&self, message_id: &str) -> Redelivery {
        let mut attempts = self.entries();
        let count = attempts.get(message_id).copied().unwrap_or(0) + 1;
        if count >= self.max_redeliver {
            attempts.remove(message_id);
            Redelivery::Exhausted { attempts: count }
        } else {
            attempts.insert(message_id.to_string(), count);
            Redelivery::Retry { attempt: count }
        }
    }

    pub fn clear(&self, message_id: &str) {
        self.entries().remove(message_id);
    }

    pub fn attempts(&self, message_id: &str) -> u32 {
        self.entries().get(message_id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // a panic mid-update leaves the counts usable
    fn entries(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
