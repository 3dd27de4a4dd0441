//! Bounded SPSC ring buffer used by the benchmark harness to shuttle per-thread throughput
//! samples to a reporting thread without contending on a shared counter.
//!
//! Single producer, single consumer, fixed capacity (rounded up to a power of two). `head`/`tail`
//! are unbounded `u64` sequence numbers rather than wrapped indices, so the slot for a sequence
//! number is only computed at access time via `seq & mask`.
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct RingBuffer<T> {
    head: AtomicU64,
    tail: AtomicU64,
    mask: usize,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(1);
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
        RingBuffer {
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            mask: capacity - 1,
            buffer: buffer.into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push `item`. Returns `false` if the ring is full; the producer is expected to retry or
    /// drop the sample.
    pub fn push(&self, item: T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) as usize >= self.capacity() {
            return false;
        }
        let idx = (tail as usize) & self.mask;
        unsafe { (*self.buffer[idx].get()).write(item) };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pop one item. Returns `None` if the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = (head as usize) & self.mask;
        let item = unsafe { (*self.buffer[idx].get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Drain every currently available item into `out`, advancing head once.
    pub fn drain_into(&self, out: &mut Vec<T>) {
        while let Some(item) = self.pop() {
            out.push(item);
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & self.mask;
            unsafe { (*self.buffer[idx].get()).assume_init_drop() };
            pos = pos.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_order() {
        let r = RingBuffer::new(4);
        assert!(r.push(1));
        assert!(r.push(2));
        assert_eq!(r.pop(), Some(1));
        assert_eq!(r.pop(), Some(2));
        assert_eq!(r.pop(), None);
    }

    #[test]
    fn test_capacity_rounds_up_and_rejects_overflow() {
        let r = RingBuffer::new(3);
        assert_eq!(r.capacity(), 4);
        for i in 0..4 {
            assert!(r.push(i));
        }
        assert!(!r.push(99));
        assert_eq!(r.len(), 4);
    }

    #[test]
    fn test_drain_into() {
        let r = RingBuffer::new(8);
        for i in 0..5 {
            r.push(i);
        }
        let mut out = Vec::new();
        r.drain_into(&mut out);
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(r.is_empty());
    }

    #[test]
    fn test_drop_runs_on_remaining_items() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }
        DROPS.store(0, Ordering::SeqCst);
        {
            let r = RingBuffer::new(4);
            r.push(Counted);
            r.push(Counted);
            r.pop();
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_spsc_threads() {
        use std::sync::Arc;
        use std::thread;

        let r = Arc::new(RingBuffer::new(16));
        let producer = {
            let r = r.clone();
            thread::spawn(move || {
                let mut i = 0u64;
                while i < 1000 {
                    if r.push(i) {
                        i += 1;
                    }
                }
            })
        };
        let consumer = {
            let r = r.clone();
            thread::spawn(move || {
                let mut received = Vec::new();
                while received.len() < 1000 {
                    if let Some(v) = r.pop() {
                        received.push(v);
                    }
                }
                received
            })
        };
        producer.join().unwrap();
        let received = consumer.join().unwrap();
        assert_eq!(received, (0u64..1000).collect::<Vec<_>>());
    }
}
