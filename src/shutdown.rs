use tokio::sync::watch;

/// One-shot broadcast cancellation signal. Every dependent task polls the
/// receiver at the start of each write/read cycle, so cancellation latency is
/// bounded by one full cycle.
pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Fires the shutdown signal on ctrl-c.
pub fn spawn_signal_handler(tx: ShutdownSender) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received ctrl-c, shutting down");
            let _ = tx.send(true);
        }
    });
}

/// Waits until the signal fires or the sender side is dropped.
pub async fn wait(rx: &mut ShutdownReceiver) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
}
