use crossbeam_channel::{Receiver, RecvError, Sender};

/// Counting semaphore built on a bounded channel pre-filled with one token
/// per permit.
///
/// `acquire` blocks until a token is available. The returned [`Permit`]
/// puts its token back when dropped, so a permit can never be released
/// twice or leaked by an early return.
pub struct PermitPool {
    tx: Sender<()>,
    rx: Receiver<()>,
    capacity: usize,
}

impl PermitPool {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel was just sized for exactly these tokens.
            let _ = tx.try_send(());
        }
        Self { tx, rx, capacity }
    }

    /// Blocks until a permit is free.
    pub fn acquire(&self) -> Result<Permit, RecvError> {
        self.rx.recv()?;
        Ok(Permit {
            tx: self.tx.clone(),
        })
    }

    #[cfg(test)]
    fn try_acquire(&self) -> Option<Permit> {
        self.rx.try_recv().ok().map(|_| Permit {
            tx: self.tx.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.rx.len()
    }
}

/// One unit of classification concurrency. Released on drop.
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    tx: Sender<()>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_starts_full() {
        let pool = PermitPool::new(2);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let pool = PermitPool::new(0);
        assert_eq!(pool.capacity(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_drop_returns_permit() {
        let pool = PermitPool::new(1);
        let permit = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());
        drop(permit);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = Arc::new(PermitPool::new(1));
        let held = pool.acquire().unwrap();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let _permit = pool.acquire().unwrap();
                done_tx.send(()).unwrap();
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(held);
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        waiter.join().unwrap();
    }

    #[test]
    fn test_never_more_holders_than_capacity() {
        let pool = Arc::new(PermitPool::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (pool, active, peak) = (Arc::clone(&pool), Arc::clone(&active), Arc::clone(&peak));
                thread::spawn(move || {
                    let _permit = pool.acquire().unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }
}
