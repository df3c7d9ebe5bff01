//! Notification bus
//!
//! Post-processing notifications (connected, tick, start, end, ...) delivered to
//! registered observers. Observers are either callbacks or channels; each emission is
//! delivered synchronously, in registration order. Delivery happens outside the
//! observer lock, so a callback may emit or register; observers it adds only see
//! later emissions.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::session::{ClientDescriptor, UserProfile};
use crate::simulation::Simulation;

/// Notification emitted by the synchronization engine
///
/// `A` is the engine's action type and `R` its command-response type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification<A, R> {
    /// First full import after construction
    Connected,
    /// Local presentation clock advanced
    LocalTick { count: u64 },
    /// Explicit resync response imported
    Download,
    ClientAdded { client: ClientDescriptor },
    ClientClosed { client: ClientDescriptor },
    UserJoined { user: Option<UserProfile> },
    UserReady { user: UserProfile },
    Ready,
    Unready,
    Start,
    Pause,
    Unpause,
    Forfeit { user: Option<UserProfile> },
    End,
    /// Incremental turn applied
    Tick {
        turn: u64,
        #[serde(skip)]
        actions: Vec<A>,
        #[serde(skip)]
        command_responses: Vec<R>,
    },
    /// Server turn did not follow the local turn; a download was requested
    Desync { local_turn: u64, server_turn: u64 },
    /// Inbound frame was dropped without being applied
    FrameDropped { reason: String },
    /// Transport closed or failed
    Disconnected { code: Option<u16>, reason: String },
}

/// Notification type for a given simulation engine
pub type SessionNotification<S> =
    Notification<<S as Simulation>::Action, <S as Simulation>::CommandResponse>;

/// Discriminant of a [`Notification`], used to filter observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Connected,
    LocalTick,
    Download,
    ClientAdded,
    ClientClosed,
    UserJoined,
    UserReady,
    Ready,
    Unready,
    Start,
    Pause,
    Unpause,
    Forfeit,
    End,
    Tick,
    Desync,
    FrameDropped,
    Disconnected,
}

impl<A, R> Notification<A, R> {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Connected => NotificationKind::Connected,
            Notification::LocalTick { .. } => NotificationKind::LocalTick,
            Notification::Download => NotificationKind::Download,
            Notification::ClientAdded { .. } => NotificationKind::ClientAdded,
            Notification::ClientClosed { .. } => NotificationKind::ClientClosed,
            Notification::UserJoined { .. } => NotificationKind::UserJoined,
            Notification::UserReady { .. } => NotificationKind::UserReady,
            Notification::Ready => NotificationKind::Ready,
            Notification::Unready => NotificationKind::Unready,
            Notification::Start => NotificationKind::Start,
            Notification::Pause => NotificationKind::Pause,
            Notification::Unpause => NotificationKind::Unpause,
            Notification::Forfeit { .. } => NotificationKind::Forfeit,
            Notification::End => NotificationKind::End,
            Notification::Tick { .. } => NotificationKind::Tick,
            Notification::Desync { .. } => NotificationKind::Desync,
            Notification::FrameDropped { .. } => NotificationKind::FrameDropped,
            Notification::Disconnected { .. } => NotificationKind::Disconnected,
        }
    }
}

type Callback<N> = Arc<dyn Fn(&N) + Send + Sync>;

enum Sink<N> {
    Callback(Callback<N>),
    Channel(mpsc::UnboundedSender<N>),
}

impl<N> Clone for Sink<N> {
    fn clone(&self) -> Self {
        match self {
            Sink::Callback(callback) => Sink::Callback(Arc::clone(callback)),
            Sink::Channel(tx) => Sink::Channel(tx.clone()),
        }
    }
}

struct Observer<N> {
    filter: Option<NotificationKind>,
    sink: Sink<N>,
}

/// Fan-out of notifications to observers
pub struct NotificationBus<N> {
    observers: Mutex<Vec<Observer<N>>>,
}

impl<A, R> NotificationBus<Notification<A, R>>
where
    A: Clone,
    R: Clone,
{
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Observe one kind of notification
    pub fn on<F>(&self, kind: NotificationKind, callback: F)
    where
        F: Fn(&Notification<A, R>) + Send + Sync + 'static,
    {
        self.register(Some(kind), Sink::Callback(Arc::new(callback)));
    }

    /// Observe every notification
    pub fn on_any<F>(&self, callback: F)
    where
        F: Fn(&Notification<A, R>) + Send + Sync + 'static,
    {
        self.register(None, Sink::Callback(Arc::new(callback)));
    }

    /// Receive every notification on a channel
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notification<A, R>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(None, Sink::Channel(tx));
        rx
    }

    /// Receive one kind of notification on a channel
    pub fn subscribe_kind(
        &self,
        kind: NotificationKind,
    ) -> mpsc::UnboundedReceiver<Notification<A, R>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(Some(kind), Sink::Channel(tx));
        rx
    }

    /// Deliver to every matching observer in registration order
    pub fn emit(&self, notification: Notification<A, R>) {
        let kind = notification.kind();
        let sinks: Vec<_> = self
            .lock()
            .iter()
            .filter(|observer| observer.filter.map_or(true, |filter| filter == kind))
            .map(|observer| observer.sink.clone())
            .collect();

        let mut closed = false;
        for sink in sinks {
            match sink {
                Sink::Callback(callback) => callback(&notification),
                Sink::Channel(tx) => closed |= tx.send(notification.clone()).is_err(),
            }
        }

        if closed {
            self.lock()
                .retain(|observer| !matches!(&observer.sink, Sink::Channel(tx) if tx.is_closed()));
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    fn register(&self, filter: Option<NotificationKind>, sink: Sink<Notification<A, R>>) {
        self.lock().push(Observer { filter, sink });
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Observer<Notification<A, R>>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<A: Clone, R: Clone> Default for NotificationBus<Notification<A, R>> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestNotification = Notification<u32, String>;
    type TestBus = NotificationBus<TestNotification>;

    #[test]
    fn test_callbacks_in_registration_order() {
        let bus = TestBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.on_any(move |_| order.lock().unwrap().push(name));
        }
        bus.emit(Notification::Start);

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_callback_may_emit_and_register() {
        let bus = Arc::new(TestBus::new());
        let mut ends = bus.subscribe_kind(NotificationKind::End);

        let weak = Arc::downgrade(&bus);
        bus.on(NotificationKind::Start, move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.on(NotificationKind::Pause, |_| {});
                bus.emit(Notification::End);
            }
        });
        bus.emit(Notification::Start);

        assert_eq!(ends.try_recv().unwrap(), Notification::End);
        assert_eq!(bus.observer_count(), 3);
    }

    #[test]
    fn test_kind_filter() {
        let bus = TestBus::new();
        let ends = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&ends);
        bus.on(NotificationKind::End, move |_| *counter.lock().unwrap() += 1);

        bus.emit(Notification::Start);
        bus.emit(Notification::LocalTick { count: 3 });
        bus.emit(Notification::End);

        assert_eq!(*ends.lock().unwrap(), 1);
    }

    #[test]
    fn test_channel_subscription() {
        let bus = TestBus::new();
        let mut all = bus.subscribe();
        let mut ticks = bus.subscribe_kind(NotificationKind::Tick);

        bus.emit(Notification::Connected);
        bus.emit(Notification::Tick {
            turn: 1,
            actions: vec![7],
            command_responses: vec!["ok".to_string()],
        });

        assert_eq!(all.try_recv().unwrap(), Notification::Connected);
        assert_eq!(all.try_recv().unwrap().kind(), NotificationKind::Tick);
        match ticks.try_recv().unwrap() {
            Notification::Tick {
                turn,
                actions,
                command_responses,
            } => {
                assert_eq!(turn, 1);
                assert_eq!(actions, vec![7]);
                assert_eq!(command_responses, vec!["ok".to_string()]);
            }
            other => panic!("Expected Tick, got {:?}", other),
        }
        assert!(ticks.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus = TestBus::new();
        let rx = bus.subscribe();
        bus.on_any(|_| {});
        assert_eq!(bus.observer_count(), 2);

        drop(rx);
        bus.emit(Notification::Pause);
        assert_eq!(bus.observer_count(), 1);
    }

    #[test]
    fn test_notification_json() {
        let json = serde_json::to_value(TestNotification::Desync {
            local_turn: 0,
            server_turn: 3,
        })
        .unwrap();
        assert_eq!(json["kind"], "desync");
        assert_eq!(json["server_turn"], 3);
    }
}
