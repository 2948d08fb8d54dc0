//! FIFO buffer for outbound commands issued while the connection is not open.

use std::collections::VecDeque;
use std::mem;

/// Commands waiting for the connection to open.
#[derive(Debug)]
pub struct PendingQueue<C> {
    items: VecDeque<C>,
}

impl<C> Default for PendingQueue<C> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<C> PendingQueue<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: C) {
        self.items.push_back(command);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Run every queued command in arrival order, each exactly once.
    ///
    /// The queue is drained in batches: the current contents are swapped out
    /// and executed, and anything `run` enqueues meanwhile is picked up by the
    /// next batch. If `run` hands a command back, that command and the rest of
    /// its batch are put back at the front, ahead of commands enqueued during
    /// the drain, and the flush stops.
    ///
    /// Returns the number of commands executed.
    pub fn flush<F>(&mut self, mut run: F) -> usize
    where
        F: FnMut(&mut Self, C) -> Result<(), C>,
    {
        let mut executed = 0;

        loop {
            let mut batch = mem::take(&mut self.items);
            if batch.is_empty() {
                return executed;
            }

            while let Some(command) = batch.pop_front() {
                if let Err(command) = run(self, command) {
                    batch.push_front(command);
                    batch.append(&mut self.items);
                    self.items = batch;
                    return executed;
                }
                executed += 1;
            }
        }
    }
}
