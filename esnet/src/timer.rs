//! One timer queue per stack.
//!
//! Retransmission, delayed acknowledgment, persist, `TimeWait` and reassembly expiry are all
//! callbacks scheduled here. Callbacks run without the queue lock held, so they may schedule and
//! cancel freely. They hold weak references to their owner so a pending timer never keeps a
//! closed connection alive.
//!
//! Driving the queue is up to the owner: a background thread started with [`Timers::start`]
//! follows the system clock, while tests advance a manual clock and call
//! [`Timers::run_expired`].
//!
//! [`Timers::start`]: struct.Timers.html#method.start
//! [`Timers::run_expired`]: struct.Timers.html#method.run_expired
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::time::{Clock, Duration, Instant};

/// Identifies a scheduled callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(u64);

type Callback = Box<dyn FnOnce() + Send>;

/// The timer queue.
pub struct Timers {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    wakeup: Condvar,
}

struct State {
    queue: BTreeMap<(Instant, Token), Callback>,
    deadlines: HashMap<Token, Instant>,
    next_token: u64,
    running: bool,
}

impl Timers {
    /// An empty queue reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Timers> {
        Arc::new(Timers {
            clock,
            state: Mutex::new(State {
                queue: BTreeMap::new(),
                deadlines: HashMap::new(),
                next_token: 1,
                running: false,
            }),
            wakeup: Condvar::new(),
        })
    }

    /// The current time of the clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// The clock of this queue.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `callback` once `at` is reached.
    pub fn schedule<F>(&self, at: Instant, callback: F) -> Token
        where F: FnOnce() + Send + 'static
    {
        let mut state = self.state.lock();
        let token = Token(state.next_token);
        state.next_token += 1;
        let earliest = state.queue.keys().next().map(|&(at, _)| at);
        state.queue.insert((at, token), Box::new(callback));
        state.deadlines.insert(token, at);
        if earliest.map_or(true, |earliest| at < earliest) {
            self.wakeup.notify_all();
        }
        token
    }

    /// Run `callback` after `delay`.
    pub fn schedule_after<F>(&self, delay: Duration, callback: F) -> Token
        where F: FnOnce() + Send + 'static
    {
        self.schedule(self.now() + delay, callback)
    }

    /// Drop a scheduled callback. Returns whether it was still pending.
    pub fn cancel(&self, token: Token) -> bool {
        let mut state = self.state.lock();
        match state.deadlines.remove(&token) {
            Some(at) => state.queue.remove(&(at, token)).is_some(),
            None => false,
        }
    }

    /// The earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.lock().queue.keys().next().map(|&(at, _)| at)
    }

    /// The number of pending callbacks.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Run every callback that is due. Returns the number run.
    pub fn run_expired(&self) -> usize {
        let mut count = 0;
        loop {
            let now = self.now();
            let callback = {
                let mut state = self.state.lock();
                let key = match state.queue.keys().next() {
                    Some(&(at, token)) if at <= now => (at, token),
                    _ => break,
                };
                state.deadlines.remove(&key.1);
                state.queue.remove(&key)
            };
            if let Some(callback) = callback {
                callback();
                count += 1;
            }
        }
        count
    }

    /// Run callbacks on a background thread following the clock.
    ///
    /// The thread ends after `stop`.
    pub fn start(self: &Arc<Self>) -> thread::JoinHandle<()> {
        self.state.lock().running = true;
        let timers = self.clone();
        thread::spawn(move || timers.run())
    }

    /// End the background thread.
    pub fn stop(&self) {
        self.state.lock().running = false;
        self.wakeup.notify_all();
    }

    fn run(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if !state.running {
                    break;
                }
                let now = self.now();
                match state.queue.keys().next().map(|&(at, _)| at) {
                    Some(at) if at <= now => (),
                    Some(at) => {
                        let wait = at - now;
                        self.wakeup.wait_for(&mut state, wait);
                    },
                    None => self.wakeup.wait(&mut state),
                }
            }
            self.run_expired();
        }
        net_debug!("timer thread stopped");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::time::ManualClock;

    #[test]
    fn runs_in_deadline_order() {
        let clock = Arc::new(ManualClock::new());
        let timers = Timers::new(clock.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        for &(delay, tag) in &[(300u64, 3), (100, 1), (200, 2)] {
            let order = order.clone();
            timers.schedule_after(Duration::from_millis(delay), move || order.lock().push(tag));
        }
        assert_eq!(timers.run_expired(), 0);
        clock.advance(Duration::from_millis(250));
        assert_eq!(timers.run_expired(), 2);
        clock.advance(Duration::from_millis(50));
        assert_eq!(timers.run_expired(), 1);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn cancelled_never_run() {
        let clock = Arc::new(ManualClock::new());
        let timers = Timers::new(clock.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let token = timers.schedule_after(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(timers.next_deadline(), Some(Instant::from_millis(10)));
        assert!(timers.cancel(token));
        assert!(!timers.cancel(token));
        clock.advance(Duration::from_secs(1));
        assert_eq!(timers.run_expired(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_may_reschedule() {
        let clock = Arc::new(ManualClock::new());
        let timers = Timers::new(clock.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let (inner, counter) = (Arc::downgrade(&timers), hits.clone());
        timers.schedule_after(Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(timers) = inner.upgrade() {
                let counter = counter.clone();
                timers.schedule_after(Duration::from_millis(1), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        clock.advance(Duration::from_millis(1));
        assert_eq!(timers.run_expired(), 1);
        clock.advance(Duration::from_millis(1));
        assert_eq!(timers.run_expired(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
