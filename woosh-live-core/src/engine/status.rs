use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::ipc::events::{LiveStatus, LiveStatusEvent};

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 256;

#[derive(Debug, Default)]
struct StatusInner {
    stored: LiveStatus,
    speaking: bool,
    last_emitted: LiveStatus,
}

impl StatusInner {
    fn projected(&self) -> LiveStatus {
        if self.stored == LiveStatus::Connected && self.speaking {
            LiveStatus::Speaking
        } else {
            self.stored
        }
    }
}

/// Stored status plus the speaking flag, projected and broadcast on change.
///
/// Written by the controller and by the session loop; events are sent while
/// the lock is held so subscribers see transitions in order.
pub(crate) struct StatusHub {
    inner: Mutex<StatusInner>,
    tx: broadcast::Sender<LiveStatusEvent>,
}

impl StatusHub {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            inner: Mutex::new(StatusInner::default()),
            tx,
        }
    }

    pub(crate) fn status(&self) -> LiveStatus {
        self.inner.lock().projected()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LiveStatusEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, status: LiveStatus, detail: Option<String>) {
        self.update(detail, |inner| {
            inner.stored = status;
            if status != LiveStatus::Connected {
                inner.speaking = false;
            }
        });
    }

    pub(crate) fn set_speaking(&self, speaking: bool) {
        self.update(None, |inner| inner.speaking = speaking);
    }

    fn update(&self, detail: Option<String>, f: impl FnOnce(&mut StatusInner)) {
        let mut inner = self.inner.lock();
        f(&mut inner);
        let status = inner.projected();
        if status == inner.last_emitted && detail.is_none() {
            return;
        }
        inner.last_emitted = status;
        debug!(%status, "live status changed");
        let _ = self.tx.send(LiveStatusEvent { status, detail });
    }
}
