use std::sync::Arc;

use kahawa_core::audit::{AuditEvent, AuditSink, TracingAuditSink};
use kahawa_db::repositories::AuditRepository;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Forwards audit events to a writer task so request handlers never wait on
/// the audit table. Every event is also logged through tracing.
#[derive(Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::UnboundedSender<AuditEvent>,
    tracing: TracingAuditSink,
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.tracing.emit(event.clone());
        if let Err(error) = self.sender.send(event) {
            warn!(
                event_name = "audit.writer_closed",
                event_type = %error.0.event_type,
                "audit writer has stopped; event only logged"
            );
        }
    }
}

/// Returns the sink plus the writer task. The task ends once every sink
/// clone has been dropped and the queue is empty.
pub fn spawn_audit_writer(
    repository: Arc<dyn AuditRepository>,
) -> (ChannelAuditSink, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<AuditEvent>();

    let handle = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if let Err(error) = repository.append(&event).await {
                warn!(
                    event_name = "audit.persist_failed",
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %error,
                    "could not persist audit event"
                );
            }
        }
    });

    (ChannelAuditSink { sender, tracing: TracingAuditSink }, handle)
}
