//! Cancellation and OS signal forwarding

use nix::sys::signal::Signal;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Requests cancellation of a watch session
///
/// Cancelling stops the watch and delivers a signal to the wrapped command;
/// the command's exit code is still what the session returns.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<Option<Signal>>>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel, sending SIGTERM to the command
    pub fn cancel(&self) {
        self.forward(Signal::SIGTERM);
    }

    /// Cancel, sending `signal` to the command
    ///
    /// Repeated calls re-deliver the signal.
    pub fn forward(&self, signal: Signal) {
        self.tx.send_replace(Some(signal));
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Signal>> {
        self.tx.subscribe()
    }
}

/// Route SIGINT and SIGTERM received by this process to `handle`
///
/// Handlers are installed before this returns, so no signal arriving
/// afterwards takes the default (fatal) action.
pub fn forward_os_signals(handle: CancelHandle) -> std::io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => Signal::SIGINT,
                Some(()) = terminate.recv() => Signal::SIGTERM,
                else => break,
            };
            info!("Received {}, stopping watch", received);
            handle.forward(received);
        }
    }))
}

/// Resolve with the requested signal once cancellation is requested
pub(crate) async fn cancelled(rx: &mut watch::Receiver<Option<Signal>>) -> Signal {
    // Copy out so no borrow of the channel is held across an await
    let requested = rx.wait_for(|s| s.is_some()).await.map(|s| *s);
    match requested {
        Ok(signal) => signal.unwrap_or(Signal::SIGTERM),
        Err(_) => std::future::pending().await,
    }
}

/// Next request to deliver; once `delivered`, only newer requests count
pub(crate) async fn next_request(rx: &mut watch::Receiver<Option<Signal>>, delivered: bool) -> Signal {
    if !delivered {
        return cancelled(rx).await;
    }
    loop {
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
        let requested = *rx.borrow_and_update();
        if let Some(signal) = requested {
            return signal;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_before_wait_is_seen() {
        let handle = CancelHandle::new();
        let mut rx = handle.subscribe();
        handle.forward(Signal::SIGINT);

        assert!(handle.is_cancelled());
        assert_eq!(cancelled(&mut rx).await, Signal::SIGINT);
    }

    #[tokio::test]
    async fn test_uncancelled_handle_stays_pending() {
        let handle = CancelHandle::new();
        let mut rx = handle.subscribe();
        let result = tokio::time::timeout(Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delivered_request_waits_for_a_new_one() {
        let handle = CancelHandle::new();
        let mut rx = handle.subscribe();
        handle.cancel();
        assert_eq!(next_request(&mut rx, false).await, Signal::SIGTERM);

        let pending = tokio::time::timeout(Duration::from_millis(50), next_request(&mut rx, true)).await;
        assert!(pending.is_err());

        handle.forward(Signal::SIGINT);
        assert_eq!(next_request(&mut rx, true).await, Signal::SIGINT);
    }

    #[tokio::test]
    async fn test_os_signal_is_forwarded() {
        let handle = CancelHandle::new();
        let task = forward_os_signals(handle.clone()).unwrap();

        nix::sys::signal::raise(Signal::SIGTERM).unwrap();
        let mut rx = handle.subscribe();
        let signal = tokio::time::timeout(Duration::from_secs(5), cancelled(&mut rx))
            .await
            .unwrap();
        assert_eq!(signal, Signal::SIGTERM);
        task.abort();
    }
}
