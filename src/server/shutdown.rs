use tokio::sync::oneshot;

pub(crate) fn shutdown_signal() -> (RpcServerShutdownHandle, RpcServerShutdownSignal) {
    let (tx, rx) = oneshot::channel();

    (RpcServerShutdownHandle { tx: Some(tx) }, RpcServerShutdownSignal { rx })
}

/// Owner side of the server's lifetime. The server stops on `shutdown()` or when this is dropped.
pub(crate) struct RpcServerShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl RpcServerShutdownHandle {
    pub(crate) fn shutdown(&mut self) {
        if let Some(tx) = self.tx.take() {
            // The server may already be gone.
            let _ = tx.send(());
        }
    }
}

pub(crate) struct RpcServerShutdownSignal {
    rx: oneshot::Receiver<()>,
}

impl RpcServerShutdownSignal {
    /// Resolves once the handle asks for shutdown or is dropped.
    pub(crate) async fn wait(self) {
        let _ = self.rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn signal_fires_on_shutdown_or_drop() {
        let (mut handle, signal) = shutdown_signal();
        handle.shutdown();
        handle.shutdown();
        timeout(Duration::from_secs(1), signal.wait()).await.unwrap();

        let (handle, signal) = shutdown_signal();
        drop(handle);
        timeout(Duration::from_secs(1), signal.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn signal_waits_while_handle_alive() {
        let (_handle, signal) = shutdown_signal();
        assert!(timeout(Duration::from_millis(20), signal.wait()).await.is_err());
    }
}
