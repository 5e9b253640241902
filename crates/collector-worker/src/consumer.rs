use crate::{Error, Result, RoleName, Worker, queue::QueueReceiver};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A message waiting in a worker queue, with an optional reply slot for `ask`.
pub(crate) struct Envelope<M, R> {
    pub(crate) message: M,
    pub(crate) reply: Option<oneshot::Sender<Result<R>>>,
}

/// Consumer task driving one queued worker instance.
///
/// Drains the instance's queue strictly in FIFO order and calls
/// [`Worker::on_work`] for one message at a time; this is what gives queued
/// workers their single-writer guarantee.
///
/// # Arguments
///
/// - `role`: Role served by the worker (used for logs and errors).
/// - `instance`: Index of this instance within its provider.
/// - `worker`: The worker instance owned by this consumer.
/// - `rx`: Receiving half of the instance's queue.
/// - `shutdown`: Registry-wide token; once cancelled, the loop exits after the
///   message in progress.
///
/// # Failure behavior
///
/// - `ask` messages get the failure back through their reply slot.
/// - `tell` messages are logged and dropped. There is no retry and no
///   dead-letter queue.
pub(crate) async fn worker_loop<W: Worker>(
    role: RoleName,
    instance: usize,
    worker: Arc<W>,
    mut rx: QueueReceiver<Envelope<W::Message, W::Output>>,
    shutdown: CancellationToken,
) {
    tracing::trace!(role, instance, "worker started");

    loop {
        let envelope = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::debug!(role, instance, "worker received shutdown signal");
                break;
            }
            envelope = rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let Envelope { message, reply } = envelope;
        let result = worker.on_work(message).await;

        match (result, reply) {
            (Ok(output), Some(reply)) => {
                // The asker may have given up; nothing else to do then.
                let _ = reply.send(Ok(output));
            }
            (Err(source), Some(reply)) => {
                let _ = reply.send(Err(Error::Invocation {
                    role: role.to_string(),
                    source,
                }));
            }
            (Err(error), None) => {
                tracing::error!(role, instance, %error, "worker failed, message dropped");
            }
            (Ok(_), None) => {}
        }
    }

    tracing::trace!(role, instance, "worker stopped");
}
