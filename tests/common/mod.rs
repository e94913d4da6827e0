#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tripswitch::{CircuitBreaker, StateChangeListener};

/// Records transition notifications in arrival order.
pub struct RecordingListener {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        RecordingListener {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

impl StateChangeListener for RecordingListener {
    fn on_opened(&self, _breaker: &CircuitBreaker) {
        self.events.lock().unwrap().push("opened");
    }

    fn on_closed(&self, _breaker: &CircuitBreaker) {
        self.events.lock().unwrap().push("closed");
    }

    fn on_half_opened(&self, _breaker: &CircuitBreaker) {
        self.events.lock().unwrap().push("half_opened");
    }
}

/// Counts transition notifications, for races where only the totals matter.
pub struct CountingListener {
    opened: AtomicUsize,
    half_opened: AtomicUsize,
    closed: AtomicUsize,
}

impl CountingListener {
    pub fn new() -> Self {
        CountingListener {
            opened: AtomicUsize::new(0),
            half_opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn half_opened(&self) -> usize {
        self.half_opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl StateChangeListener for CountingListener {
    fn on_opened(&self, _breaker: &CircuitBreaker) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn on_closed(&self, _breaker: &CircuitBreaker) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_half_opened(&self, _breaker: &CircuitBreaker) {
        self.half_opened.fetch_add(1, Ordering::SeqCst);
    }
}
