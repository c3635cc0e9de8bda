//! Event dispatch.
//!
//! Events are queued by the background loops and handed to the registered
//! handlers on a single thread, one at a time, in the order they were
//! queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::debug;
use mqlink_core::properties::{AuthProperties, DisconnectProperties};
use mqlink_core::Publish;
use parking_lot::{Condvar, Mutex};

use crate::delivery::EventSink;
use crate::events::ClientEvent;

/// Handler for client events.
///
/// Implement `on_event` to see everything, or override the per-event
/// methods, which do nothing by default. Closures taking `&ClientEvent`
/// are handlers too.
///
/// Handlers run on the dispatch thread and must not call
/// `Client::add_handler`.
pub trait EventHandler: Send {
    fn on_event(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::PublishReceived { message } => self.on_message(message),
            ClientEvent::Published { packet_id, success } => self.on_published(*packet_id, *success),
            ClientEvent::Subscribed {
                packet_id,
                return_codes,
            } => self.on_subscribed(*packet_id, return_codes),
            ClientEvent::Unsubscribed { packet_id, .. } => self.on_unsubscribed(*packet_id),
            ClientEvent::SubscribeFailed { packet_id } | ClientEvent::UnsubscribeFailed { packet_id } => {
                self.on_request_failed(*packet_id)
            }
            ClientEvent::ConnectionOpened { session_present } => self.on_connect(*session_present),
            ClientEvent::ConnectionClosed { reason } => self.on_disconnect(reason.as_deref()),
            ClientEvent::ConnectionClosedByServer {
                reason_code,
                properties,
            } => self.on_server_disconnect(*reason_code, properties),
            ClientEvent::AuthReceived {
                reason_code,
                properties,
            } => self.on_auth(*reason_code, properties),
        }
    }

    /// Called when a message is received.
    #[allow(unused_variables)]
    fn on_message(&mut self, message: &Publish) {}

    /// Called when a publish completed or was given up.
    #[allow(unused_variables)]
    fn on_published(&mut self, packet_id: u16, success: bool) {}

    /// Called when a subscribe request has been acknowledged.
    ///
    /// # Arguments
    /// * `packet_id` - The packet identifier of the subscribe request
    /// * `return_codes` - The return codes for each topic (0x00-0x02 = granted QoS, 0x80 = failure)
    #[allow(unused_variables)]
    fn on_subscribed(&mut self, packet_id: u16, return_codes: &[u8]) {}

    /// Called when an unsubscribe request has been acknowledged.
    #[allow(unused_variables)]
    fn on_unsubscribed(&mut self, packet_id: u16) {}

    /// Called when a SUBSCRIBE or UNSUBSCRIBE ran out of retries.
    #[allow(unused_variables)]
    fn on_request_failed(&mut self, packet_id: u16) {}

    /// Called when connected to the broker.
    #[allow(unused_variables)]
    fn on_connect(&mut self, session_present: bool) {}

    /// Called when disconnected from the broker.
    #[allow(unused_variables)]
    fn on_disconnect(&mut self, reason: Option<&str>) {}

    /// Called when the broker sent DISCONNECT (5.0).
    #[allow(unused_variables)]
    fn on_server_disconnect(&mut self, reason_code: u8, properties: &DisconnectProperties) {}

    /// Called when the broker sent AUTH (5.0).
    #[allow(unused_variables)]
    fn on_auth(&mut self, reason_code: u8, properties: &AuthProperties) {}
}

impl<F> EventHandler for F
where
    F: FnMut(&ClientEvent) + Send,
{
    fn on_event(&mut self, event: &ClientEvent) {
        self(event)
    }
}

/// Wake handle: a flag plus a condition variable. A notify that arrives
/// before the wait is not lost.
#[derive(Debug, Default)]
pub struct Signal {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        *self.flag.lock() = true;
        self.condvar.notify_all();
    }

    /// Forget a pending notification.
    pub fn reset(&self) {
        *self.flag.lock() = false;
    }

    /// Wait for a notification, at most `timeout` (`None` = no limit).
    /// Returns true when notified, consuming the notification.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut flag = self.flag.lock();
        if !*flag {
            match timeout {
                Some(timeout) => {
                    let _ = self.condvar.wait_while_for(&mut flag, |set| !*set, timeout);
                }
                None => self.condvar.wait_while(&mut flag, |set| !*set),
            }
        }
        std::mem::replace(&mut *flag, false)
    }
}

/// Event queue plus handler table.
///
/// Each connection gets its own dispatch thread, tagged with the epoch
/// `restart` returned. A thread whose epoch has been superseded finishes
/// the batch in hand and exits.
#[derive(Default)]
pub struct Dispatcher {
    queue: Mutex<VecDeque<ClientEvent>>,
    handlers: Mutex<Vec<Box<dyn EventHandler>>>,
    signal: Signal,
    stopping: AtomicBool,
    epoch: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Box<dyn EventHandler>) {
        self.handlers.lock().push(handler);
    }

    pub fn push(&self, event: ClientEvent) {
        self.queue.lock().push_back(event);
        self.signal.notify();
    }

    /// Hand every queued event to the handlers. Returns the number delivered.
    ///
    /// The handler lock is taken before the queue is drained, so two dispatch
    /// threads never deliver out of order.
    pub fn dispatch_pending(&self) -> usize {
        let mut handlers = self.handlers.lock();
        let events: Vec<ClientEvent> = self.queue.lock().drain(..).collect();
        for event in &events {
            for handler in handlers.iter_mut() {
                handler.on_event(event);
            }
        }
        events.len()
    }

    /// Dispatch loop body for one epoch. Returns once `close_with` was
    /// called and the queue has drained, or once a newer epoch started.
    pub fn run(&self, epoch: u64) {
        while self.epoch() == epoch {
            self.dispatch_pending();
            if self.stopping.load(Ordering::SeqCst) && self.queue.lock().is_empty() {
                debug!("Dispatcher stopped");
                return;
            }
            self.signal.wait(None);
        }
        // The wakeup may have been meant for the newer thread
        self.signal.notify();
        debug!("Dispatcher handed over to epoch {}", self.epoch());
    }

    /// Arm the dispatcher for a new connection. Returns the epoch the new
    /// dispatch thread should run.
    pub fn restart(&self) -> u64 {
        self.stopping.store(false, Ordering::SeqCst);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.signal.notify();
        epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Queue the last event of a connection and let `run` return once it
    /// has been delivered. Nothing can restart the dispatcher between the
    /// push and the stop.
    pub fn close_with(&self, event: ClientEvent) {
        {
            let mut queue = self.queue.lock();
            queue.push_back(event);
            self.stopping.store(true, Ordering::SeqCst);
        }
        self.signal.notify();
    }
}

impl EventSink for Dispatcher {
    fn emit(&self, event: ClientEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct Counter {
        published: Arc<Mutex<Vec<(u16, bool)>>>,
    }

    impl EventHandler for Counter {
        fn on_published(&mut self, packet_id: u16, success: bool) {
            self.published.lock().push((packet_id, success));
        }
    }

    #[test]
    fn test_signal_is_sticky() {
        let signal = Signal::new();
        signal.notify();
        assert!(signal.wait(Some(Duration::from_millis(1))));
        let start = Instant::now();
        assert!(!signal.wait(Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_handlers_see_events_in_order() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.add_handler(Box::new(move |event: &ClientEvent| {
            sink.lock().push(event.clone());
        }));
        let counter = Counter::default();
        let published = counter.published.clone();
        dispatcher.add_handler(Box::new(counter));

        for id in 1..=3 {
            dispatcher.emit(ClientEvent::Published {
                packet_id: id,
                success: id != 2,
            });
        }
        assert_eq!(dispatcher.dispatch_pending(), 3);
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(*published.lock(), vec![(1, true), (2, false), (3, true)]);
    }

    #[test]
    fn test_run_drains_before_stopping() {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.add_handler(Box::new(move |event: &ClientEvent| {
            sink.lock().push(event.clone());
        }));

        let epoch = dispatcher.restart();
        let runner = dispatcher.clone();
        let handle = thread::spawn(move || runner.run(epoch));
        dispatcher.push(ClientEvent::ConnectionOpened {
            session_present: false,
        });
        dispatcher.close_with(ClientEvent::ConnectionClosed { reason: None });
        handle.join().unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ClientEvent::ConnectionOpened {
                    session_present: false
                },
                ClientEvent::ConnectionClosed { reason: None },
            ]
        );
    }

    #[test]
    fn test_superseded_thread_hands_over_in_order() {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reconnect = dispatcher.clone();
        let next = Arc::new(Mutex::new(None));
        let next_handle = next.clone();
        dispatcher.add_handler(Box::new(move |event: &ClientEvent| {
            sink.lock().push(event.clone());
            // Reconnect from inside a handler, as a client handler would
            if let ClientEvent::ConnectionClosed { reason: None } = event {
                let epoch = reconnect.restart();
                let runner = reconnect.clone();
                *next_handle.lock() = Some(thread::spawn(move || runner.run(epoch)));
                reconnect.push(ClientEvent::ConnectionOpened {
                    session_present: true,
                });
            }
        }));

        let first = dispatcher.restart();
        let runner = dispatcher.clone();
        let old = thread::spawn(move || runner.run(first));
        dispatcher.close_with(ClientEvent::ConnectionClosed { reason: None });
        old.join().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        dispatcher.close_with(ClientEvent::ConnectionClosed {
            reason: Some("done".into()),
        });
        let handle = next.lock().take().unwrap();
        handle.join().unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0], ClientEvent::ConnectionClosed { reason: None });
        assert_eq!(
            seen[1],
            ClientEvent::ConnectionOpened {
                session_present: true
            }
        );
    }
}
