use runtime::work_queue::{WorkId, WorkQueue};
use thiserror::Error;

use crate::command::Command;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("command queue is full ({max_len} pending), dropping {}", .command.name())]
pub struct CommandQueueFull {
    pub command: Command,
    pub max_len: usize,
}

/// Per-layer FIFO of commands with backpressure.
///
/// A command that supersedes the newest pending one replaces it in place, so
/// bursts of `SetLayer` or `Override` collapse to the latest value.
#[derive(Debug)]
pub struct CommandQueue {
    inner: WorkQueue<Command>,
}

impl CommandQueue {
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: WorkQueue::with_max_len(max_pending),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner
            .max_len()
            .is_some_and(|max_len| self.inner.len() >= max_len)
    }

    pub fn push(&mut self, command: Command) -> Result<WorkId, CommandQueueFull> {
        if let Some((id, newest)) = self.inner.back_mut()
            && command.supersedes(newest)
        {
            *newest = command;
            return Ok(id);
        }
        self.inner
            .try_push(command)
            .map_err(|(full, command)| CommandQueueFull {
                command,
                max_len: full.max_len,
            })
    }

    pub fn pop_next(&mut self) -> Option<Command> {
        self.inner.pop_next().map(|(_, command)| command)
    }
}
