//! Windowed statistical monitor.
//!
//! A [`Monitor`] is a cheap cloneable handle over a fixed-size circular window
//! of observations. Application threads push samples; field adaptors and
//! constraint trackers read the window statistics.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Window size used by [`Monitor::default`].
pub const DEFAULT_WINDOW: usize = 1;

#[derive(Debug)]
struct Window {
    samples: VecDeque<f64>,
    capacity: usize,
    started: Option<Instant>,
}

/// Thread-safe observation window.
#[derive(Clone, Debug)]
pub struct Monitor {
    inner: Arc<Mutex<Window>>,
}

impl Monitor {
    /// Monitor keeping the last `capacity` observations (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Window {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                started: None,
            })),
        }
    }

    fn window(&self) -> MutexGuard<'_, Window> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Producers ────────────────────────────────────────────────────────

    /// Push an observation, evicting the oldest one when the window is full.
    pub fn push(&self, value: f64) {
        let mut w = self.window();
        if w.samples.len() == w.capacity {
            w.samples.pop_front();
        }
        w.samples.push_back(value);
    }

    /// Alias of [`Monitor::push`] for one-shot measurements.
    pub fn measure(&self, value: f64) {
        self.push(value);
    }

    /// Open an observation bracket.
    pub fn start(&self) {
        self.window().started = Some(Instant::now());
    }

    /// Close the bracket opened by [`Monitor::start`] and record `value`.
    ///
    /// Returns `false` (and records nothing) when no bracket was open.
    pub fn stop(&self, value: f64) -> bool {
        let opened = self.window().started.take().is_some();
        if opened {
            self.push(value);
        }
        opened
    }

    /// Close the bracket and record the elapsed wall time in seconds.
    pub fn stop_elapsed(&self) -> Option<f64> {
        let started = self.window().started.take()?;
        let elapsed = started.elapsed().as_secs_f64();
        self.push(elapsed);
        Some(elapsed)
    }

    /// Drop every observation.
    pub fn clear(&self) {
        let mut w = self.window();
        w.samples.clear();
        w.started = None;
    }

    // ── Statistics ───────────────────────────────────────────────────────

    /// Number of stored observations.
    pub fn len(&self) -> usize {
        self.window().samples.len()
    }

    /// `true` when nothing has been observed.
    pub fn is_empty(&self) -> bool {
        self.window().samples.is_empty()
    }

    /// `true` when the window holds `capacity` observations.
    pub fn is_full(&self) -> bool {
        let w = self.window();
        w.samples.len() == w.capacity
    }

    /// Window size.
    pub fn capacity(&self) -> usize {
        self.window().capacity
    }

    /// Most recent observation.
    pub fn last(&self) -> Option<f64> {
        self.window().samples.back().copied()
    }

    /// Arithmetic mean of the window.
    pub fn average(&self) -> Option<f64> {
        let w = self.window();
        mean(&w.samples)
    }

    /// Sample standard deviation (n - 1) of the window; 0 for one sample.
    pub fn standard_deviation(&self) -> Option<f64> {
        let w = self.window();
        let avg = mean(&w.samples)?;
        let n = w.samples.len();
        if n < 2 {
            return Some(0.0);
        }
        let sum_sq: f64 = w.samples.iter().map(|x| (x - avg) * (x - avg)).sum();
        Some((sum_sq / (n - 1) as f64).sqrt())
    }

    /// Smallest observation.
    pub fn min(&self) -> Option<f64> {
        self.window().samples.iter().copied().reduce(f64::min)
    }

    /// Largest observation.
    pub fn max(&self) -> Option<f64> {
        self.window().samples.iter().copied().reduce(f64::max)
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

fn mean(samples: &VecDeque<f64>) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_monitor_has_no_statistics() {
        let m = Monitor::new(4);
        assert!(m.is_empty());
        assert_eq!(m.average(), None);
        assert_eq!(m.standard_deviation(), None);
        assert_eq!(m.min(), None);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let m = Monitor::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            m.push(v);
        }
        assert!(m.is_full());
        assert_eq!(m.len(), 3);
        assert_eq!(m.average(), Some(3.0));
        assert_eq!(m.min(), Some(2.0));
        assert_eq!(m.max(), Some(4.0));
        assert_eq!(m.last(), Some(4.0));
    }

    #[test]
    fn test_standard_deviation() {
        let m = Monitor::new(4);
        for v in [2.0, 4.0, 4.0, 6.0] {
            m.push(v);
        }
        let sd = m.standard_deviation().unwrap();
        assert!((sd - (8.0_f64 / 3.0).sqrt()).abs() < 1e-12, "got {}", sd);
    }

    #[test]
    fn test_default_window_is_one() {
        let m = Monitor::default();
        m.push(1.0);
        m.push(5.0);
        assert_eq!(m.capacity(), 1);
        assert_eq!(m.average(), Some(5.0));
    }

    #[test]
    fn test_start_stop_bracket() {
        let m = Monitor::new(2);
        assert!(!m.stop(3.0));
        assert!(m.is_empty());
        m.start();
        assert!(m.stop(3.0));
        assert_eq!(m.last(), Some(3.0));
        m.start();
        assert!(m.stop_elapsed().is_some());
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_clones_share_the_window() {
        let m = Monitor::new(2);
        let producer = m.clone();
        let h = std::thread::spawn(move || producer.measure(7.0));
        h.join().unwrap();
        assert_eq!(m.average(), Some(7.0));
        m.clear();
        assert!(m.is_empty());
    }
}
