//! Typed change-notification channels.
//!
//! The raster engine and the timing governor each expose a subscription point
//! typed by their own event enum. Delivery is a synchronous callback on the
//! emitting thread, and producers only emit when the underlying state actually
//! changed, so subscribers never see spurious notifications.

type Listener<E> = Box<dyn Fn(&E) + Send>;

/// A synchronous fan-out channel for one event type.
pub struct EventBus<E> {
    listeners: Vec<Listener<E>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Register a callback invoked for every emitted event.
    pub fn subscribe(&mut self, listener: impl Fn(&E) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Deliver `event` to every subscriber, in subscription order.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Events published by the raster engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEvent {
    /// A complete frame has been rasterized and is ready for presentation.
    FrameReady { frame: u64 },
    /// The border color register changed to a new value.
    BorderColorChanged { color: u32 },
}

/// Events published by the timing governor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GovernorEvent {
    /// Periodic performance report, emitted once per measurement interval.
    PerformanceReport {
        /// Achieved speed as a percentage of the target cycle rate.
        performance_pct: u32,
        /// Share of the interval spent in deliberate throttle waits.
        throttle_pct: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn delivers_to_all_subscribers_in_order() {
        let mut bus = EventBus::new();
        let (tx_a, rx) = mpsc::channel();
        let tx_b = tx_a.clone();
        bus.subscribe(move |e: &VideoEvent| tx_a.send(("a", *e)).unwrap());
        bus.subscribe(move |e: &VideoEvent| tx_b.send(("b", *e)).unwrap());

        bus.emit(&VideoEvent::FrameReady { frame: 3 });

        assert_eq!(rx.recv().unwrap(), ("a", VideoEvent::FrameReady { frame: 3 }));
        assert_eq!(rx.recv().unwrap(), ("b", VideoEvent::FrameReady { frame: 3 }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        let bus: EventBus<GovernorEvent> = EventBus::new();
        bus.emit(&GovernorEvent::PerformanceReport {
            performance_pct: 100,
            throttle_pct: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn each_emit_delivers_exactly_once() {
        let mut bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        bus.subscribe(move |e: &VideoEvent| tx.send(*e).unwrap());

        bus.emit(&VideoEvent::BorderColorChanged { color: 0xFF00_00FF });
        bus.emit(&VideoEvent::FrameReady { frame: 1 });

        assert_eq!(
            rx.try_recv().unwrap(),
            VideoEvent::BorderColorChanged { color: 0xFF00_00FF }
        );
        assert_eq!(rx.try_recv().unwrap(), VideoEvent::FrameReady { frame: 1 });
        assert!(rx.try_recv().is_err());
    }
}
