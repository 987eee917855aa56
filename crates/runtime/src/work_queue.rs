use std::collections::VecDeque;

/// Deterministic FIFO work queue.
///
/// Key properties:
/// - Items run strictly in insertion order.
/// - Every item gets a monotonically increasing id.
/// - Optional backpressure via a deterministic maximum pending length.
/// - The newest pending item may be replaced in place (coalescing).

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkQueueFull {
    pub max_len: usize,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    next_id: u64,
    items: VecDeque<(WorkId, T)>,
    max_len: Option<usize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: VecDeque::new(),
            max_len: None,
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len.max(1)),
            ..Self::default()
        }
    }

    pub fn max_len(&self) -> Option<usize> {
        self.max_len
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, payload: T) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.push_back((id, payload));
        id
    }

    pub fn try_push(&mut self, payload: T) -> Result<WorkId, (WorkQueueFull, T)> {
        if let Some(max_len) = self.max_len
            && self.items.len() >= max_len
        {
            return Err((WorkQueueFull { max_len }, payload));
        }
        Ok(self.push(payload))
    }

    /// Newest pending item, if any.
    pub fn back_mut(&mut self) -> Option<(WorkId, &mut T)> {
        self.items.back_mut().map(|(id, payload)| (*id, payload))
    }

    pub fn pop_next(&mut self) -> Option<(WorkId, T)> {
        self.items.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkId, WorkQueue, WorkQueueFull};

    #[test]
    fn pops_in_insertion_order() {
        let mut q = WorkQueue::new();
        q.push("a");
        q.push("b");
        q.push("c");

        let order: Vec<_> = std::iter::from_fn(|| q.pop_next().map(|(_, v)| v)).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn ids_keep_increasing_after_pops() {
        let mut q = WorkQueue::new();
        let a = q.push(1);
        q.pop_next();
        let b = q.push(2);
        assert_eq!((a, b), (WorkId(0), WorkId(1)));
    }

    #[test]
    fn backpressure_returns_the_payload() {
        let mut q = WorkQueue::with_max_len(2);
        assert!(q.try_push("a").is_ok());
        assert!(q.try_push("b").is_ok());

        let (err, payload) = q.try_push("c").unwrap_err();
        assert_eq!(err, WorkQueueFull { max_len: 2 });
        assert_eq!(payload, "c");
    }

    #[test]
    fn back_mut_replaces_newest_item() {
        let mut q = WorkQueue::new();
        q.push("a");
        let b = q.push("b");

        let (id, slot) = q.back_mut().unwrap();
        assert_eq!(id, b);
        *slot = "b2";

        q.pop_next();
        assert_eq!(q.pop_next().map(|(_, v)| v), Some("b2"));
    }
}
