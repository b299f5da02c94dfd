//! One-shot event timer over the host clock.
//!
//! A [`ClockTimer`] anchors a reference instant (`origin`) at creation and
//! lets the scheduler enqueue typed events at millisecond offsets from it.
//! Events are drained with [`ClockTimer::take_due`] in strictly
//! non-decreasing due-time order (ties fire in schedule order).
//!
//! There is no per-event cancellation. [`ClockTimer::dispose`] kills the
//! whole instance: a disposed timer never returns anything as due, which is
//! the engine's sole mechanism for cancelling everything a session
//! scheduled.

use crate::host::AudioHost;
use std::collections::BTreeMap;

/// Jitter margin subtracted from the host's output latency when computing
/// the look-ahead pad for visual events, in milliseconds.
const LOOKAHEAD_MARGIN_MS: f64 = 60.0;

/// An event returned by [`ClockTimer::take_due`].
#[derive(Clone, Debug, PartialEq)]
pub struct Fired<E> {
    /// The host-clock instant the event was due at, in seconds.
    pub at: f64,
    /// The scheduled event.
    pub event: E,
}

/// One-shot typed-event timer anchored to the host clock.
pub struct ClockTimer<E> {
    origin: f64,
    lookahead_pad: f64,
    queue: BTreeMap<(i64, u64), E>,
    seq: u64,
    disposed: bool,
}

impl<E> ClockTimer<E> {
    /// Create a timer anchored at the host's current time.
    ///
    /// The look-ahead pad is captured once here:
    /// `max(0, output_latency_ms - 60) / 1000` seconds. Visual events
    /// scheduled with `use_lookahead` are delayed by the pad so they fire
    /// closer to when the corresponding audio becomes audible.
    pub fn new(host: &dyn AudioHost) -> Self {
        let pad_ms = (host.output_latency() * 1000.0 - LOOKAHEAD_MARGIN_MS).max(0.0);
        Self {
            origin: host.now(),
            lookahead_pad: pad_ms / 1000.0,
            queue: BTreeMap::new(),
            seq: 0,
            disposed: false,
        }
    }

    /// The reference instant, in host-clock seconds.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Convert a schedule offset to an absolute host-clock instant.
    pub fn resolve(&self, offset_ms: f64) -> f64 {
        self.origin + offset_ms / 1000.0
    }

    /// Enqueue `event` to fire once at `origin + offset_ms`, optionally
    /// padded by the look-ahead compensation.
    ///
    /// No-op on a disposed timer.
    pub fn schedule(&mut self, event: E, offset_ms: f64, use_lookahead: bool) {
        if self.disposed {
            return;
        }
        let mut due = self.resolve(offset_ms);
        if use_lookahead {
            due += self.lookahead_pad;
        }
        let key = ((due * 1e6).round() as i64, self.seq);
        self.seq += 1;
        self.queue.insert(key, event);
    }

    /// Drain every event due at or before `now`, in due-time order.
    ///
    /// Returns nothing once disposed, regardless of what was scheduled.
    pub fn take_due(&mut self, now: f64) -> Vec<Fired<E>> {
        if self.disposed {
            return Vec::new();
        }
        let now_us = (now * 1e6).round() as i64;
        let mut fired = Vec::new();
        while let Some((&(due_us, _), _)) = self.queue.first_key_value() {
            if due_us > now_us {
                break;
            }
            if let Some(((due_us, _), event)) = self.queue.pop_first() {
                fired.push(Fired {
                    at: due_us as f64 / 1e6,
                    event,
                });
            }
        }
        fired
    }

    /// Number of events still pending.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Mark the timer dead and drop everything it held.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.queue.clear();
    }

    /// Whether the timer has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;

    #[test]
    fn test_events_fire_in_offset_order() {
        let host = ManualHost::new();
        let mut timer: ClockTimer<&str> = ClockTimer::new(&host);
        timer.schedule("b", 500.0, false);
        timer.schedule("a", 250.0, false);
        timer.schedule("c", 500.0, false);

        host.advance(1.0);
        let fired = timer.take_due(host.now());
        let order: Vec<&str> = fired.iter().map(|f| f.event).collect();
        // Equal offsets keep schedule order.
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_nothing_fires_before_due() {
        let host = ManualHost::new();
        let mut timer: ClockTimer<u32> = ClockTimer::new(&host);
        timer.schedule(1, 100.0, false);
        host.advance(0.05);
        assert!(timer.take_due(host.now()).is_empty());
        host.advance(0.05);
        assert_eq!(timer.take_due(host.now()).len(), 1);
    }

    #[test]
    fn test_disposed_timer_is_dead() {
        let host = ManualHost::new();
        let mut timer: ClockTimer<u32> = ClockTimer::new(&host);
        timer.schedule(1, 0.0, false);
        timer.schedule(2, 10.0, false);
        timer.dispose();

        host.advance(1.0);
        assert!(timer.take_due(host.now()).is_empty());
        assert!(timer.is_disposed());
        assert_eq!(timer.pending(), 0);

        // Scheduling after dispose is a no-op as well.
        timer.schedule(3, 0.0, false);
        assert!(timer.take_due(host.now()).is_empty());
    }

    #[test]
    fn test_lookahead_pad_delays_visual_events() {
        let host = ManualHost::new();
        host.set_latency(0.2); // pad = max(0, 200 - 60) = 140 ms
        let mut timer: ClockTimer<&str> = ClockTimer::new(&host);
        timer.schedule("visual", 0.0, true);
        timer.schedule("audio", 0.0, false);

        host.advance(0.1);
        let fired = timer.take_due(host.now());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].event, "audio");

        host.advance(0.05);
        let fired = timer.take_due(host.now());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].event, "visual");
    }

    #[test]
    fn test_small_latency_pads_nothing() {
        let host = ManualHost::new();
        host.set_latency(0.05); // 50 ms < 60 ms margin -> pad 0
        let mut timer: ClockTimer<&str> = ClockTimer::new(&host);
        timer.schedule("visual", 100.0, true);
        host.advance(0.1);
        assert_eq!(timer.take_due(host.now()).len(), 1);
    }

    #[test]
    fn test_resolve_is_anchored_at_creation() {
        let host = ManualHost::new();
        host.advance(2.0);
        let timer: ClockTimer<u32> = ClockTimer::new(&host);
        assert!((timer.origin() - 2.0).abs() < 1e-9);
        assert!((timer.resolve(500.0) - 2.5).abs() < 1e-9);
    }
}
