//! Single-threaded job queue that owns all session mutation.
//!
//! Worker threads never touch session state. They post jobs through a
//! [`DispatchHandle`]; the owner of the [`Dispatcher`] runs them against the
//! context on its own thread, one tick at a time.
//!
//! ```rust,ignore
//! let mut dispatcher = Dispatcher::<Vec<u32>>::new();
//! let handle = dispatcher.handle();
//! std::thread::spawn(move || handle.post(|v| v.push(1)));
//! let mut ctx = Vec::new();
//! dispatcher.run_until_idle(&mut ctx, Duration::from_secs(1));
//! ```

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

/// A unit of work run on the dispatcher thread.
pub type Job<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

enum Envelope<C> {
    Now(Job<C>),
    At(Instant, Job<C>),
}

struct Timer<C> {
    deadline: Instant,
    seq: u64,
    job: Job<C>,
}

impl<C> PartialEq for Timer<C> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<C> Eq for Timer<C> {}

impl<C> PartialOrd for Timer<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Timer<C> {
    // Reversed so the max-heap yields the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Marks background work whose result has not been delivered yet.
///
/// Dropping the token (after its completion job ran, or if the job is lost)
/// releases it.
#[derive(Debug)]
pub struct WorkToken {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for WorkToken {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}

/// Cloneable, thread-safe sending side of a [`Dispatcher`].
pub struct DispatchHandle<C> {
    tx: Sender<Envelope<C>>,
    in_flight: Arc<AtomicUsize>,
}

impl<C> Clone for DispatchHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<C> DispatchHandle<C> {
    /// Run `job` on the next tick.
    pub fn post(&self, job: impl FnOnce(&mut C) + Send + 'static) {
        if self.tx.send(Envelope::Now(Box::new(job))).is_err() {
            tracing::debug!("dispatcher gone, dropping job");
        }
    }

    /// Run `job` on the first tick at or after `delay` from now.
    pub fn post_after(&self, delay: Duration, job: impl FnOnce(&mut C) + Send + 'static) {
        if delay.is_zero() {
            return self.post(job);
        }
        let deadline = Instant::now() + delay;
        if self.tx.send(Envelope::At(deadline, Box::new(job))).is_err() {
            tracing::debug!("dispatcher gone, dropping timer");
        }
    }

    /// Register outstanding background work.
    pub fn begin_work(&self) -> WorkToken {
        self.in_flight.fetch_add(1, AtomicOrdering::AcqRel);
        WorkToken {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(AtomicOrdering::Acquire)
    }
}

pub struct Dispatcher<C> {
    rx: Receiver<Envelope<C>>,
    handle: DispatchHandle<C>,
    pending: VecDeque<Job<C>>,
    timers: BinaryHeap<Timer<C>>,
    seq: u64,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            rx,
            handle: DispatchHandle {
                tx,
                in_flight: Arc::new(AtomicUsize::new(0)),
            },
            pending: VecDeque::new(),
            timers: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn handle(&self) -> DispatchHandle<C> {
        self.handle.clone()
    }

    fn accept(&mut self, envelope: Envelope<C>) {
        match envelope {
            Envelope::Now(job) => self.pending.push_back(job),
            Envelope::At(deadline, job) => {
                self.seq += 1;
                self.timers.push(Timer {
                    deadline,
                    seq: self.seq,
                    job,
                });
            }
        }
    }

    /// Run one tick: every job queued before this call, then due timers.
    ///
    /// Jobs posted while the tick runs wait for the next one. Returns the number
    /// of jobs run.
    pub fn run_pending(&mut self, ctx: &mut C) -> usize {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => self.accept(envelope),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        let mut batch: Vec<Job<C>> = self.pending.drain(..).collect();
        let now = Instant::now();
        while self.timers.peek().is_some_and(|t| t.deadline <= now) {
            if let Some(timer) = self.timers.pop() {
                batch.push(timer.job);
            }
        }

        let ran = batch.len();
        for job in batch {
            job(ctx);
        }
        ran
    }

    /// True when nothing is queued, scheduled, or still running in the background.
    pub fn is_idle(&self) -> bool {
        self.handle.in_flight() == 0
            && self.pending.is_empty()
            && self.timers.is_empty()
            && self.rx.is_empty()
    }

    /// Tick until idle or until `timeout` elapses. Returns whether idle was reached.
    pub fn run_until_idle(&mut self, ctx: &mut C, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending(ctx);
            if self.is_idle() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let mut wait = deadline - now;
            if let Some(timer) = self.timers.peek() {
                wait = wait.min(timer.deadline.saturating_duration_since(now));
            }
            match self.rx.recv_timeout(wait) {
                Ok(envelope) => self.accept(envelope),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_runs_on_next_tick_in_order() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new();
        let handle = dispatcher.handle();
        handle.post(|v| v.push(1));
        handle.post(|v| v.push(2));

        let mut ctx = Vec::new();
        assert_eq!(dispatcher.run_pending(&mut ctx), 2);
        assert_eq!(ctx, vec![1, 2]);
        assert_eq!(dispatcher.run_pending(&mut ctx), 0);
    }

    #[test]
    fn test_jobs_posted_during_tick_wait() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new();
        let handle = dispatcher.handle();
        let inner = dispatcher.handle();
        handle.post(move |v| {
            v.push(1);
            inner.post(|v| v.push(2));
        });

        let mut ctx = Vec::new();
        dispatcher.run_pending(&mut ctx);
        assert_eq!(ctx, vec![1]);
        dispatcher.run_pending(&mut ctx);
        assert_eq!(ctx, vec![1, 2]);
    }

    #[test]
    fn test_post_from_other_thread() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new();
        let handle = dispatcher.handle();
        let token = handle.begin_work();
        std::thread::spawn(move || {
            let token = token;
            handle.post(move |v| {
                v.push(7);
                drop(token);
            });
        });

        let mut ctx = Vec::new();
        assert!(dispatcher.run_until_idle(&mut ctx, Duration::from_secs(5)));
        assert_eq!(ctx, vec![7]);
    }

    #[test]
    fn test_post_after_waits_for_deadline() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new();
        let handle = dispatcher.handle();
        handle.post_after(Duration::from_millis(50), |v| v.push(2));
        handle.post(|v| v.push(1));

        let mut ctx = Vec::new();
        let start = Instant::now();
        dispatcher.run_pending(&mut ctx);
        assert_eq!(ctx, vec![1]);
        assert!(!dispatcher.is_idle());

        assert!(dispatcher.run_until_idle(&mut ctx, Duration::from_secs(5)));
        assert_eq!(ctx, vec![1, 2]);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new();
        let handle = dispatcher.handle();
        handle.post_after(Duration::from_millis(40), |v| v.push(2));
        handle.post_after(Duration::from_millis(10), |v| v.push(1));

        let mut ctx = Vec::new();
        assert!(dispatcher.run_until_idle(&mut ctx, Duration::from_secs(5)));
        assert_eq!(ctx, vec![1, 2]);
    }

    #[test]
    fn test_run_until_idle_times_out_with_outstanding_work() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new();
        let _token = dispatcher.handle().begin_work();
        let mut ctx = Vec::new();
        assert!(!dispatcher.run_until_idle(&mut ctx, Duration::from_millis(20)));
    }

    #[test]
    fn test_work_token_releases_on_drop() {
        let dispatcher = Dispatcher::<()>::new();
        let handle = dispatcher.handle();
        let token = handle.begin_work();
        assert_eq!(handle.in_flight(), 1);
        drop(token);
        assert_eq!(handle.in_flight(), 0);
        assert!(dispatcher.is_idle());
    }
}
