use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation signal shared by every pipeline stage.
///
/// The atomic flag answers non-blocking `is_cancelled()` checks between work
/// items. The channel half never carries a message: it closes when the scan
/// is cancelled, so any `select!` blocked on a channel send or receive can
/// race `recv(token.signal())` and wake immediately.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Receiver that becomes disconnected (readable in `select!`) on cancel.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

/// Owning side of a cancellation pair. Held by the scan manager.
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    tx: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
        // Dropping the sender disconnects every signal() receiver.
        self.tx.lock().unwrap().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Create a linked (handle, token) pair for one scan.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded::<()>(0);
    let flag = Arc::new(AtomicBool::new(false));
    (
        CancelHandle {
            flag: Arc::clone(&flag),
            tx: Mutex::new(Some(tx)),
        },
        CancelToken { flag, signal: rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;

    #[test]
    fn test_cancel_sets_flag_and_unblocks_select() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());

        // A select racing the signal must complete immediately now.
        select! {
            recv(token.signal()) -> _ => {}
            default(std::time::Duration::from_secs(1)) => panic!("signal did not fire"),
        }
    }
}
