//! Stock handlers installed by the connection driver.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;

use crate::observability::metrics::ChannelMetricsRecorder;
use crate::pipeline::handler::{Cause, Handler, UserEvent};
use crate::pipeline::Context;

/// Wire logging through `tracing`.
///
/// Logs at `trace` so it costs nothing unless the target is enabled.
#[derive(Debug)]
pub struct LoggingHandler {
    label: &'static str,
}

impl LoggingHandler {
    pub fn new() -> Self {
        Self { label: "wire" }
    }

    /// Logger for TLS records, installed next to the handshake handler.
    pub fn tls() -> Self {
        Self { label: "tls" }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for LoggingHandler {
    fn on_channel_active(&mut self, ctx: &mut Context<'_>) {
        tracing::trace!(connection_id = %ctx.channel_id(), layer = self.label, "ACTIVE");
        ctx.fire_channel_active();
    }

    fn on_read(&mut self, ctx: &mut Context<'_>, msg: Bytes) {
        tracing::trace!(connection_id = %ctx.channel_id(), layer = self.label, bytes = msg.len(), "READ");
        ctx.fire_read(msg);
    }

    fn on_user_event(&mut self, ctx: &mut Context<'_>, event: UserEvent) {
        tracing::trace!(connection_id = %ctx.channel_id(), layer = self.label, event = ?event, "USER_EVENT");
        ctx.fire_user_event(event);
    }

    fn on_exception_caught(&mut self, ctx: &mut Context<'_>, cause: Cause) {
        tracing::trace!(connection_id = %ctx.channel_id(), layer = self.label, error = %cause, "EXCEPTION");
        ctx.fire_exception_caught(cause);
    }

    fn on_inactive(&mut self, ctx: &mut Context<'_>) {
        tracing::trace!(connection_id = %ctx.channel_id(), layer = self.label, "INACTIVE");
        ctx.fire_inactive();
    }

    fn on_write(&mut self, ctx: &mut Context<'_>, msg: Bytes) {
        tracing::trace!(connection_id = %ctx.channel_id(), layer = self.label, bytes = msg.len(), "WRITE");
        ctx.write(msg);
    }

    fn on_close(&mut self, ctx: &mut Context<'_>) {
        tracing::trace!(connection_id = %ctx.channel_id(), layer = self.label, "CLOSE");
        ctx.close();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Holds the connection's metrics recorder and counts payload bytes.
pub struct ChannelMetricsHandler {
    recorder: Arc<dyn ChannelMetricsRecorder>,
}

impl ChannelMetricsHandler {
    pub fn new(recorder: Arc<dyn ChannelMetricsRecorder>) -> Self {
        Self { recorder }
    }

    pub fn recorder(&self) -> Arc<dyn ChannelMetricsRecorder> {
        Arc::clone(&self.recorder)
    }
}

impl Handler for ChannelMetricsHandler {
    fn on_read(&mut self, ctx: &mut Context<'_>, msg: Bytes) {
        if let Some(remote) = ctx.remote_address() {
            self.recorder.record_data_received(remote, msg.len());
        }
        ctx.fire_read(msg);
    }

    fn on_write(&mut self, ctx: &mut Context<'_>, msg: Bytes) {
        if let Some(remote) = ctx.remote_address() {
            self.recorder.record_data_sent(remote, msg.len());
        }
        ctx.write(msg);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ConnectionId, RemoteAddress};
    use crate::pipeline::{Pipeline, StageName};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ByteCounter {
        received: Mutex<usize>,
        sent: Mutex<usize>,
    }

    impl ChannelMetricsRecorder for ByteCounter {
        fn record_tls_handshake_time(&self, _: &RemoteAddress, _: Duration, _: &str) {}

        fn record_data_received(&self, _: &RemoteAddress, bytes: usize) {
            *self.received.lock().unwrap() += bytes;
        }

        fn record_data_sent(&self, _: &RemoteAddress, bytes: usize) {
            *self.sent.lock().unwrap() += bytes;
        }
    }

    #[test]
    fn metrics_handler_counts_both_directions() {
        let recorder = Arc::new(ByteCounter::default());
        let remote = RemoteAddress::inet("example.com", 443);
        let mut p = Pipeline::new(ConnectionId::new(), Some(remote));
        p.add_last(StageName::ChannelMetricsHandler, ChannelMetricsHandler::new(recorder.clone()))
            .unwrap();

        p.fire_read(Bytes::from_static(b"12345"));
        p.write(Bytes::from_static(b"12"));

        assert_eq!(*recorder.received.lock().unwrap(), 5);
        assert_eq!(*recorder.sent.lock().unwrap(), 2);
        assert!(p.get::<ChannelMetricsHandler>(StageName::ChannelMetricsHandler).is_some());
    }

    #[test]
    fn logging_handler_is_transparent() {
        let mut p = Pipeline::new(ConnectionId::new(), None);
        p.add_last(StageName::LoggingHandler, LoggingHandler::new()).unwrap();

        p.fire_read(Bytes::from_static(b"x"));
        p.write(Bytes::from_static(b"y"));

        assert_eq!(p.take_inbound().len(), 1);
        assert_eq!(p.take_outbound(), vec![Bytes::from_static(b"y")]);
    }
}
