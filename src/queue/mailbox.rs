//! # Worker Mailbox
//!
//! The FIFO between submitters and the single worker thread. Submitters on
//! any thread push items and learn whether a worker must be (re)spawned;
//! the worker receives in strict enqueue order, waiting on the wakeup
//! condvar with the idle timeout when the queue runs dry.
//!
//! The worker-liveness flag lives inside the same mutex as the queue, so
//! exactly one worker exists: a push either finds a live worker or flips
//! the flag and spawns one, never both. Retirement re-checks the queue
//! under the lock, closing the window where an item arrives while the
//! worker is flushing on its way out.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct MailboxState<T> {
    items: VecDeque<T>,
    worker_running: bool,
    disposed: bool,
}

pub(crate) struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
    wakeup: Condvar,
}

/// What the worker found when asking for the next item.
pub(crate) enum RecvOutcome<T> {
    Item(T),
    /// Queue empty for the whole idle timeout; flush and try to retire.
    TimedOut,
    /// The tangle is being torn down; stop immediately.
    Disposed,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                items: VecDeque::new(),
                worker_running: false,
                disposed: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Enqueues an item. `Ok(spawn)` tells the caller whether it must spawn
    /// the worker; a disposed mailbox returns the item back.
    pub fn push(&self, item: T) -> Result<bool, T> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(item);
        }
        state.items.push_back(item);
        let spawn = !state.worker_running;
        if spawn {
            state.worker_running = true;
        }
        drop(state);
        self.wakeup.notify_one();
        Ok(spawn)
    }

    /// Worker-side receive: next item, idle timeout, or disposal.
    pub fn recv(&self, idle_timeout: Duration) -> RecvOutcome<T> {
        let mut state = self.state.lock();
        loop {
            if state.disposed {
                return RecvOutcome::Disposed;
            }
            if let Some(item) = state.items.pop_front() {
                return RecvOutcome::Item(item);
            }
            let timed_out = self
                .wakeup
                .wait_for(&mut state, idle_timeout)
                .timed_out();
            if timed_out && state.items.is_empty() && !state.disposed {
                return RecvOutcome::TimedOut;
            }
        }
    }

    /// Attempts to retire the worker after an idle timeout. Fails (returns
    /// false) when an item slipped in since, in which case the worker keeps
    /// running.
    pub fn retire(&self) -> bool {
        let mut state = self.state.lock();
        if state.items.is_empty() && !state.disposed {
            state.worker_running = false;
            true
        } else {
            false
        }
    }

    /// Marks the worker stopped without conditions; used on disposal exit.
    pub fn mark_worker_stopped(&self) {
        self.state.lock().worker_running = false;
    }

    /// Poisons the mailbox and drains whatever was pending.
    pub fn dispose(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.disposed = true;
        let drained = state.items.drain(..).collect();
        drop(state);
        self.wakeup.notify_all();
        drained
    }

    /// Drains any stragglers (items pushed between drain and worker exit).
    pub fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn pending(&self) -> usize {
        self.state.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_requests_spawn_only_once() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.push(1), Ok(true));
        assert_eq!(mailbox.push(2), Ok(false));
        assert_eq!(mailbox.pending(), 2);
    }

    #[test]
    fn recv_returns_items_in_order() {
        let mailbox = Mailbox::new();
        mailbox.push(1).unwrap();
        mailbox.push(2).unwrap();
        mailbox.push(3).unwrap();

        for expected in 1..=3 {
            match mailbox.recv(Duration::from_secs(1)) {
                RecvOutcome::Item(item) => assert_eq!(item, expected),
                _ => panic!("expected item"),
            }
        }
    }

    #[test]
    fn recv_times_out_on_empty_queue() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        mailbox.push(1).unwrap();
        let _ = mailbox.recv(Duration::from_secs(1));

        match mailbox.recv(Duration::from_millis(10)) {
            RecvOutcome::TimedOut => {}
            _ => panic!("expected timeout"),
        }
    }

    #[test]
    fn recv_wakes_on_cross_thread_push() {
        let mailbox = Arc::new(Mailbox::new());
        let pusher = Arc::clone(&mailbox);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pusher.push(7u32).unwrap();
        });

        match mailbox.recv(Duration::from_secs(5)) {
            RecvOutcome::Item(7) => {}
            _ => panic!("expected pushed item"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn retire_fails_if_item_arrived() {
        let mailbox = Mailbox::new();
        mailbox.push(1).unwrap();
        let _ = mailbox.recv(Duration::from_secs(1));

        mailbox.push(2).unwrap();
        assert!(!mailbox.retire());

        let _ = mailbox.recv(Duration::from_secs(1));
        assert!(mailbox.retire());

        // After retirement the next push requests a fresh spawn.
        assert_eq!(mailbox.push(3), Ok(true));
    }

    #[test]
    fn dispose_drains_and_rejects_pushes() {
        let mailbox = Mailbox::new();
        mailbox.push(1).unwrap();
        mailbox.push(2).unwrap();

        let drained = mailbox.dispose();
        assert_eq!(drained, vec![1, 2]);
        assert!(mailbox.is_disposed());
        assert_eq!(mailbox.push(3), Err(3));

        match mailbox.recv(Duration::from_millis(10)) {
            RecvOutcome::Disposed => {}
            _ => panic!("expected disposed"),
        }
    }
}
