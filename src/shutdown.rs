use tokio::sync::{broadcast, mpsc};

/// One Trigger, many Receivers. Triggering broadcasts the signal and then
/// waits for every receiver to drop, so tasks get to finish their loop
/// iteration before the process exits.
pub fn channel() -> (Trigger, Receiver) {
    let (signal_tx, _) = broadcast::channel(1);
    let (alive_tx, alive_rx) = mpsc::channel(1);

    let receiver = Receiver {
        receiver: signal_tx.subscribe(),
        signal: signal_tx.clone(),
        _alive: alive_tx,
    };

    let trigger = Trigger {
        signal: signal_tx,
        idle: alive_rx,
    };

    (trigger, receiver)
}

pub struct Trigger {
    signal: broadcast::Sender<()>,
    idle: mpsc::Receiver<()>,
}

impl Trigger {
    pub async fn shutdown(mut self) {
        let _ = self.signal.send(());
        drop(self.signal);

        let _ = self.idle.recv().await;
    }
}

#[derive(Debug)]
pub struct Receiver {
    signal: broadcast::Sender<()>,
    receiver: broadcast::Receiver<()>,
    _alive: mpsc::Sender<()>,
}

impl Receiver {
    /// Resolves once shutdown has been triggered.
    pub async fn recv(&mut self) {
        let _ = self.receiver.recv().await;
    }

    /// Non-blocking check for loop heads.
    pub fn is_triggered(&mut self) -> bool {
        !matches!(
            self.receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        )
    }
}

impl Clone for Receiver {
    fn clone(&self) -> Self {
        Self {
            receiver: self.signal.subscribe(),
            signal: self.signal.clone(),
            _alive: self._alive.clone(),
        }
    }
}
