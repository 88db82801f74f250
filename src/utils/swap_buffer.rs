use std::{
    mem,
    sync::{Mutex, MutexGuard, PoisonError},
};

struct Buffers<T> {
    active: Vec<T>,
    spare: Vec<T>,
}

/// Double buffered queue
///
/// Producers append to the active buffer under a short lock. A drainer swaps
/// the active buffer out in O(1) and processes it outside the lock, then
/// hands the emptied allocation back with [`SwapBuffer::recycle`] so the next
/// swap reuses it.
pub struct SwapBuffer<T> {
    inner: Mutex<Buffers<T>>,
}

impl<T> Default for SwapBuffer<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T> SwapBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Buffers {
                active: Vec::with_capacity(capacity),
                spare: Vec::with_capacity(capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffers<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().active.push(item);
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().active.is_empty()
    }

    /// Takes everything queued so far, leaving the spare buffer active
    pub fn swap(&self) -> Vec<T> {
        let mut guard = self.lock();
        if guard.active.is_empty() {
            return Vec::new();
        }
        let buffers = &mut *guard;
        mem::swap(&mut buffers.active, &mut buffers.spare);
        mem::take(&mut buffers.spare)
    }

    /// Returns a drained buffer so its allocation becomes the next spare
    pub fn recycle(&self, mut drained: Vec<T>) {
        drained.clear();
        let mut guard = self.lock();
        if guard.spare.capacity() < drained.capacity() {
            guard.spare = drained;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn swap_drains_in_order() {
        let buf = SwapBuffer::with_capacity(4);
        buf.push(1);
        buf.push(2);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.swap(), vec![1, 2]);
        assert!(buf.is_empty());
        assert!(buf.swap().is_empty());
    }

    #[test]
    fn recycled_allocation_is_reused() {
        let buf = SwapBuffer::with_capacity(0);
        for i in 0..64 {
            buf.push(i);
        }
        let drained = buf.swap();
        let cap = drained.capacity();
        buf.recycle(drained);
        buf.push(100);
        let next = buf.swap();
        assert_eq!(next, vec![100]);
        buf.recycle(next);
        for i in 0..64 {
            buf.push(i);
        }
        assert!(buf.swap().capacity() >= cap);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let buf = Arc::new(SwapBuffer::with_capacity(16));
        let mut collected = Vec::new();
        let handles = (0..4)
            .map(|t| {
                let buf = buf.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        buf.push(t * 1000 + i);
                    }
                })
            })
            .collect::<Vec<_>>();
        while handles.iter().any(|h| !h.is_finished()) {
            let drained = buf.swap();
            collected.extend(drained.iter().copied());
            buf.recycle(drained);
        }
        for h in handles {
            h.join().expect("producer panicked");
        }
        collected.extend(buf.swap());
        collected.sort_unstable();
        assert_eq!(collected, (0..4000).collect::<Vec<_>>());
    }
}
