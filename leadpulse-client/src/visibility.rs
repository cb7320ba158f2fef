//! Host visibility signal
//!
//! Long-lived streams behave differently when nobody is looking: on
//! returning to the foreground the client reconnects immediately instead
//! of waiting out a backoff, and a connection that went silent while
//! hidden is torn down and rebuilt. The host reports transitions here;
//! supervisors watch them.

use std::sync::Arc;

use tokio::sync::watch;

/// Whether the host application is in front of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Foreground,
    Background,
}

/// Handle the host uses to report visibility transitions
///
/// Cheap to clone; every clone feeds the same signal. Repeated reports of
/// the same value are dropped, so callers can wire this straight to a
/// noisy event source.
#[derive(Debug, Clone)]
pub struct VisibilityHandle {
    tx: Arc<watch::Sender<Visibility>>,
}

impl VisibilityHandle {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Visibility::Foreground);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }

    /// Report the current visibility. Only actual transitions wake the
    /// supervisors.
    pub fn set(&self, visibility: Visibility) {
        self.tx.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
    }

    pub fn foreground(&self) {
        self.set(Visibility::Foreground);
    }

    pub fn background(&self) {
        self.set(Visibility::Background);
    }

    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }
}
