//! Window event channels
//!
//! Every window owns an `EventHub`. Listeners attach a channel sender and
//! receive the events posted to the window. Event buffers are filtered by
//! the window's enabled-event mask, interface reactions see everything.
//! `DESTROYED` always passes the filter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{WmError, WmResult};
use crate::types::{WindowEvent, WindowEventType};
use crate::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    sink: Sender<WindowEvent>,
    filtered: bool,
}

#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver posted events to `sink`; `filtered` listeners only get the
    /// types enabled on the window
    pub fn attach(&self, sink: Sender<WindowEvent>, filtered: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers().push(Subscriber { id, sink, filtered });
        id
    }

    /// Returns whether the subscription was still attached
    pub fn detach(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn post(&self, event: &WindowEvent, enabled: WindowEventType) {
        let pass = enabled.intersects(event.kind) || event.kind.contains(WindowEventType::DESTROYED);
        // Listeners whose receiving side is gone are dropped
        self.subscribers()
            .retain(|s| if s.filtered && !pass { true } else { s.sink.send(*event).is_ok() });
    }
}

struct BufferInner {
    receiver: Receiver<WindowEvent>,
    pending: VecDeque<WindowEvent>,
    attached: Vec<(Arc<Window>, SubscriptionId)>,
    released: bool,
}

/// A queue collecting events of several windows
///
/// Each attached window is kept alive by one shared reference until it is
/// detached, destroyed or the buffer is released.
pub struct EventBuffer {
    sink: Sender<WindowEvent>,
    refs: AtomicU32,
    inner: Mutex<BufferInner>,
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventBuffer {
    pub fn new() -> Arc<Self> {
        let (sink, receiver) = mpsc::channel();
        Arc::new(Self {
            sink,
            refs: AtomicU32::new(1),
            inner: Mutex::new(BufferInner {
                receiver,
                pending: VecDeque::new(),
                attached: Vec::new(),
                released: false,
            }),
        })
    }

    fn inner(&self) -> WmResult<MutexGuard<'_, BufferInner>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.released {
            return Err(WmError::Destroyed);
        }
        Ok(inner)
    }

    pub fn add_ref(&self) -> WmResult<()> {
        let _inner = self.inner()?;
        self.refs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop one reference; the last one detaches every window
    pub fn release(&self) -> WmResult<()> {
        let detached = {
            let mut inner = self.inner()?;
            if self.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
                return Ok(());
            }
            inner.released = true;
            inner.pending.clear();
            std::mem::take(&mut inner.attached)
        };
        for (window, subscription) in detached {
            window.detach_events(subscription);
            window.unref();
        }
        Ok(())
    }

    pub fn attach(&self, window: &Arc<Window>) -> WmResult<()> {
        let mut inner = self.inner()?;
        if inner.attached.iter().any(|(w, _)| w.id() == window.id()) {
            return Err(WmError::invalid("window already attached"));
        }
        window.ref_window()?;
        let subscription = match window.attach_events(self.sink.clone(), true) {
            Ok(subscription) => subscription,
            Err(e) => {
                drop(inner);
                window.unref();
                return Err(e);
            }
        };
        inner.attached.push((window.clone(), subscription));
        Ok(())
    }

    pub fn detach(&self, window: &Window) -> WmResult<()> {
        let entry = {
            let mut inner = self.inner()?;
            let index = inner
                .attached
                .iter()
                .position(|(w, _)| w.id() == window.id())
                .ok_or_else(|| WmError::ItemNotFound(format!("window {} not attached", window.id())))?;
            inner.attached.swap_remove(index)
        };
        let (window, subscription) = entry;
        window.detach_events(subscription);
        window.unref();
        Ok(())
    }

    /// Move delivered events into the pending queue, dropping destroyed
    /// windows
    fn collect(&self, inner: &mut BufferInner) {
        let mut gone = Vec::new();
        while let Ok(event) = inner.receiver.try_recv() {
            self.accept(inner, event, &mut gone);
        }
        Self::finish(gone);
    }

    fn accept(&self, inner: &mut BufferInner, event: WindowEvent, gone: &mut Vec<(Arc<Window>, SubscriptionId)>) {
        if event.kind.contains(WindowEventType::DESTROYED) {
            if let Some(index) = inner.attached.iter().position(|(w, _)| w.id() == event.window) {
                gone.push(inner.attached.swap_remove(index));
            }
        }
        inner.pending.push_back(event);
    }

    fn finish(gone: Vec<(Arc<Window>, SubscriptionId)>) {
        for (window, subscription) in gone {
            window.detach_events(subscription);
            window.unref();
        }
    }

    pub fn has_event(&self) -> WmResult<bool> {
        let mut inner = self.inner()?;
        self.collect(&mut inner);
        Ok(!inner.pending.is_empty())
    }

    /// Take the oldest event without waiting
    pub fn next_event(&self) -> WmResult<Option<WindowEvent>> {
        let mut inner = self.inner()?;
        self.collect(&mut inner);
        Ok(inner.pending.pop_front())
    }

    pub fn peek_event(&self) -> WmResult<Option<WindowEvent>> {
        let mut inner = self.inner()?;
        self.collect(&mut inner);
        Ok(inner.pending.front().copied())
    }

    /// Wait up to `timeout` for an event
    pub fn wait_event_timeout(&self, timeout: Duration) -> WmResult<Option<WindowEvent>> {
        let mut inner = self.inner()?;
        self.collect(&mut inner);
        if let Some(event) = inner.pending.pop_front() {
            return Ok(Some(event));
        }
        let mut gone = Vec::new();
        let result = match inner.receiver.recv_timeout(timeout) {
            Ok(event) => {
                self.accept(&mut inner, event, &mut gone);
                Ok(inner.pending.pop_front())
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WmError::Destroyed),
        };
        drop(inner);
        Self::finish(gone);
        result
    }

    /// Block until an event arrives
    pub fn wait_event(&self) -> WmResult<WindowEvent> {
        loop {
            if let Some(event) = self.wait_event_timeout(Duration::from_millis(100))? {
                return Ok(event);
            }
        }
    }

    /// Ids of the windows currently attached
    pub fn attached(&self) -> WmResult<Vec<crate::types::WindowId>> {
        Ok(self.inner()?.attached.iter().map(|(w, _)| w.id()).collect())
    }
}
