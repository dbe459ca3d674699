use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Why the RPC server of a replica is going away.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ShutdownCause {
    /// The replica was dropped, e.g. its node shut down.
    ReplicaStopped,
    /// The replica hit an error it can't continue from.
    ReplicaFault(String),
}

pub(crate) fn shutdown_signal() -> (RpcServerShutdownHandle, RpcServerShutdownSignal) {
    let (tx, rx) = oneshot::channel();

    (RpcServerShutdownHandle { tx: Some(tx) }, RpcServerShutdownSignal { rx })
}

/// Owned by the replica. Dropping it shuts the server down with `ReplicaStopped`.
pub(crate) struct RpcServerShutdownHandle {
    tx: Option<oneshot::Sender<ShutdownCause>>,
}

impl RpcServerShutdownHandle {
    pub(crate) fn shut_down(&mut self, cause: ShutdownCause) {
        if let Some(tx) = self.tx.take() {
            // Server already gone.
            let _ = tx.send(cause);
        }
    }
}

/// Resolves once the server should stop.
pub(crate) struct RpcServerShutdownSignal {
    rx: oneshot::Receiver<ShutdownCause>,
}

impl Future for RpcServerShutdownSignal {
    type Output = ShutdownCause;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|sent| sent.unwrap_or(ShutdownCause::ReplicaStopped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_handle_means_replica_stopped() {
        let (handle, signal) = shutdown_signal();
        drop(handle);
        assert_eq!(signal.await, ShutdownCause::ReplicaStopped);
    }

    #[tokio::test]
    async fn first_cause_wins() {
        let (mut handle, signal) = shutdown_signal();
        handle.shut_down(ShutdownCause::ReplicaFault("disk".into()));
        handle.shut_down(ShutdownCause::ReplicaStopped);
        assert_eq!(signal.await, ShutdownCause::ReplicaFault("disk".into()));
    }
}
