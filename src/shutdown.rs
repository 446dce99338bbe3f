use tokio::sync::watch;

/// Broadcast side of the cooperative cancellation signal.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

/// Cloneable view each worker polls between generation cycles.
#[derive(Clone, Debug)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownSignal, ShutdownListener) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSignal { tx }, ShutdownListener { rx })
}

impl ShutdownSignal {
    /// Raises the signal. Returns `true` only for the call that raised it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownListener {
    /// Non-blocking poll.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is raised or the sender is gone.
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|raised| *raised).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_exactly_once() {
        let (signal, listener) = channel();
        let other = listener.clone();
        assert!(!listener.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(listener.is_triggered());
        assert!(other.is_triggered());
        assert!(signal.listener().is_triggered());
    }

    #[tokio::test]
    async fn waiters_wake_on_trigger() {
        let (signal, mut listener) = channel();
        let waiter = tokio::spawn(async move { listener.triggered().await });
        signal.trigger();
        waiter.await.unwrap();
    }
}
