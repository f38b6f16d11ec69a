use autarch_types::{Event, TypeFilter};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Per-subscriber delivery queue: a bounded max-heap ordered by
/// [`Event::delivery_order_key`] so the most urgent pending event is always
/// delivered next, with a `Notify` to wake a waiting consumer.
pub struct Subscriber {
    pub subscriber_id: String,
    pub type_filter: TypeFilter,
    queue: Mutex<BinaryHeap<Event>>,
    capacity: usize,
    notify: Notify,
    pub dropped: AtomicU64,
}

impl Subscriber {
    pub fn new(subscriber_id: String, type_filter: TypeFilter, capacity: usize) -> Self {
        Self {
            subscriber_id,
            type_filter,
            queue: Mutex::new(BinaryHeap::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Pushes `event` onto the queue. If full, the lowest-priority event
    /// between the incoming one and the queue's current resident minimum is
    /// the one dropped — never the resident if the incoming event is itself
    /// the weaker of the two, so a low-priority arrival can't evict a
    /// higher-priority pending one.
    pub fn offer(&self, event: Event) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            match lowest_priority_index(&queue) {
                Some((lowest, resident_min)) if resident_min < event => {
                    let mut rest: Vec<Event> = queue.drain().collect();
                    rest.remove(lowest);
                    *queue = rest.into_iter().collect();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                _ => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        queue.push(event);
        drop(queue);
        self.notify.notify_one();
    }

    /// Waits for and pops the highest-priority pending event.
    pub async fn recv(&self) -> Event {
        loop {
            {
                let mut queue = self.queue.lock().unwrap();
                if let Some(event) = queue.pop() {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// `BinaryHeap` has no peek-min; find the weakest-priority entry by scanning.
/// Subscriber queues are small (default 256), so a linear scan is cheap
/// relative to the alternative of maintaining a second index structure.
fn lowest_priority_index(queue: &BinaryHeap<Event>) -> Option<(usize, Event)> {
    queue
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(idx, event)| (idx, event.clone()))
}
