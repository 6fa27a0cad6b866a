use tokio::sync::watch;

/// A synchronization utility designed for sending / receiving shutdown
/// signals.
///
/// Features:
///
/// - Multi-producer and multi-consumer - simply clone to get another handle.
/// - Consumers observe shutdown signals that were sent before they started
///   waiting (unlike [`tokio::sync::broadcast`]).
/// - It is safe to send a shutdown signal multiple times (e.g. by accident).
///
/// Internally this is a [`watch`] channel over a single `bool`; sending a
/// signal flips the value to `true` and `recv` resolves once it observes
/// `true`. If every sender is dropped, waiters also resolve, since nothing
/// can signal them anymore.
#[derive(Clone, Debug)]
pub struct ShutdownChannel {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownChannel {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Send a shutdown signal, causing all actors waiting on this channel to
    /// complete their call to [`recv`].
    ///
    /// [`recv`]: ShutdownChannel::recv
    pub fn send(&self) {
        let _ = self.tx.send(true);
    }

    /// Wait for a shutdown signal.
    /// If a shutdown signal was already sent, this fn returns immediately.
    pub async fn recv(&mut self) {
        // `wait_for` also resolves with `Err` once all senders are dropped;
        // treat that the same as a signal.
        let _ = self.rx.wait_for(|&sent| sent).await;
    }

    /// Immediately returns whether a shutdown signal has been sent.
    pub fn try_recv(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn recv_observes_earlier_send() {
        let channel = ShutdownChannel::new();
        channel.send();
        channel.send(); // double-send is fine

        let mut late_subscriber = channel.clone();
        late_subscriber.recv().await;
        assert!(channel.try_recv());
    }

    #[tokio::test]
    async fn try_recv_is_false_before_send() {
        let channel = ShutdownChannel::new();
        assert!(!channel.try_recv());
    }
}
