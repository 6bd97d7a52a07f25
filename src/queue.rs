use std::sync::Arc;

use tokio::sync::oneshot;

use crate::worker::{Worker, WorkerId};

/// An outstanding acquire request. `priority` decides match order;
/// `seq` is the insertion sequence, used only to break ties in favour of
/// FIFO among equal priorities (spec §3: "ties broken by heap
/// implementation... implementers should prefer [FIFO] where cheap").
pub struct Ticket {
    pub priority: i64,
    seq: u64,
    index: usize,
    delivery: Option<oneshot::Sender<Arc<Worker>>>,
    /// Set only between a dispatcher's pop and its delivery write; read by
    /// the supervisor's eviction sweep. Normally `None` while a ticket sits
    /// in the queue, since pop and delivery happen atomically in the
    /// dispatcher loop (see spec §4.4, "rarely non-empty").
    attached_worker: Option<WorkerId>,
}

impl Ticket {
    pub fn new(priority: i64, seq: u64) -> (Self, oneshot::Receiver<Arc<Worker>>) {
        let (tx, rx) = oneshot::channel();
        (
            Ticket {
                priority,
                seq,
                index: usize::MAX,
                delivery: Some(tx),
                attached_worker: None,
            },
            rx,
        )
    }

    /// Writes the matched worker into this ticket's delivery slot exactly
    /// once. A second call is a programming error in the dispatcher and is
    /// silently dropped rather than panicking, since the receiving task may
    /// already be gone (client disconnect).
    pub fn deliver(mut self, worker: Arc<Worker>) {
        if let Some(tx) = self.delivery.take() {
            let _ = tx.send(worker);
        }
    }

    pub fn attached_worker_is(&self, id: &WorkerId) -> bool {
        self.attached_worker.as_ref() == Some(id)
    }

    /// `true` if higher priority than `other`, with earlier insertion
    /// breaking ties (max-heap ordering key).
    fn outranks(&self, other: &Ticket) -> bool {
        (self.priority, other.seq).cmp(&(other.priority, self.seq)) == std::cmp::Ordering::Greater
    }
}

/// Indexed binary max-heap of [`Ticket`]s, keyed by `priority` descending.
/// `remove_if` is O(log n) per match thanks to the index each ticket
/// carries, rather than the O(n log n) heap-reinit some ports of this
/// design fall back to.
#[derive(Default)]
pub struct PriorityQueue {
    heap: Vec<Ticket>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        PriorityQueue { heap: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn push(&mut self, mut ticket: Ticket) {
        let idx = self.heap.len();
        ticket.index = idx;
        self.heap.push(ticket);
        self.sift_up(idx);
    }

    pub fn pop(&mut self) -> Option<Ticket> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let mut top = self.heap.pop()?;
        top.index = usize::MAX;
        if !self.heap.is_empty() {
            self.heap[0].index = 0;
            self.sift_down(0);
        }
        Some(top)
    }

    /// Removes every queued ticket matching `pred`, re-establishing the
    /// heap property afterwards. Used by the supervisor's dead-worker
    /// sweep (spec §4.4 step 3).
    pub fn remove_if(&mut self, pred: impl Fn(&Ticket) -> bool) -> Vec<Ticket> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.heap.len() {
            if pred(&self.heap[i]) {
                removed.push(self.remove_at(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    fn remove_at(&mut self, index: usize) -> Ticket {
        let last = self.heap.len() - 1;
        self.heap.swap(index, last);
        let mut removed = self.heap.pop().unwrap();
        removed.index = usize::MAX;
        if index < self.heap.len() {
            self.heap[index].index = index;
            self.sift_down(index);
            self.sift_up(index);
        }
        removed
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx].outranks(&self.heap[parent]) {
                self.heap.swap(idx, parent);
                self.heap[idx].index = idx;
                self.heap[parent].index = parent;
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let (left, right) = (2 * idx + 1, 2 * idx + 2);
            let mut largest = idx;
            if left < len && self.heap[left].outranks(&self.heap[largest]) {
                largest = left;
            }
            if right < len && self.heap[right].outranks(&self.heap[largest]) {
                largest = right;
            }
            if largest == idx {
                break;
            }
            self.heap.swap(idx, largest);
            self.heap[idx].index = idx;
            self.heap[largest].index = largest;
            idx = largest;
        }
    }

    #[cfg(test)]
    pub fn mark_attached(&mut self, seq_in_queue: usize, worker: WorkerId) {
        self.heap[seq_in_queue].attached_worker = Some(worker);
    }
}
