//! One-shot handshake timing observer.
//!
//! Sits behind the handshake handler (or behind wire logging), measures the
//! time from `registered` to `HandshakeCompleted`, reports it once and takes
//! itself out of the pipeline.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use crate::net::RemoteAddress;
use crate::observability::metrics::{ChannelMetricsRecorder, STATUS_ERROR, STATUS_SUCCESS};
use crate::pipeline::{ChannelMetricsHandler, Context, Handler, HandshakeCompletion, StageName, UserEvent};

enum ObserverState {
    Unarmed,
    Armed {
        started: Instant,
        recorder: Option<Arc<dyn ChannelMetricsRecorder>>,
    },
    Completed,
}

/// Pipeline stage installed as [`StageName::SslReader`].
pub struct HandshakeTimingObserver {
    state: ObserverState,
}

impl HandshakeTimingObserver {
    pub fn new() -> Self {
        Self {
            state: ObserverState::Unarmed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, ObserverState::Completed)
    }

    fn complete(&mut self, ctx: &mut Context<'_>, completion: &HandshakeCompletion) {
        let previous = std::mem::replace(&mut self.state, ObserverState::Completed);
        ctx.remove_self();

        if let ObserverState::Armed {
            started,
            recorder: Some(recorder),
        } = previous
        {
            let elapsed = started.elapsed();
            let status = if completion.is_success() { STATUS_SUCCESS } else { STATUS_ERROR };
            let unknown = RemoteAddress::Opaque("unknown".into());
            let remote = ctx.remote_address().unwrap_or(&unknown);
            recorder.record_tls_handshake_time(remote, elapsed, status);
            tracing::debug!(
                connection_id = %ctx.channel_id(),
                remote_address = %remote,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                status,
                "TLS handshake timed"
            );
        }

        match completion {
            HandshakeCompletion::Success => ctx.fire_channel_active(),
            HandshakeCompletion::Failure(cause) => ctx.fire_exception_caught(Arc::clone(cause)),
        }
    }
}

impl Default for HandshakeTimingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for HandshakeTimingObserver {
    fn on_registered(&mut self, ctx: &mut Context<'_>) {
        if let ObserverState::Unarmed = self.state {
            let recorder = ctx
                .get::<ChannelMetricsHandler>(StageName::ChannelMetricsHandler)
                .map(ChannelMetricsHandler::recorder);
            self.state = ObserverState::Armed {
                started: Instant::now(),
                recorder,
            };
        }
        ctx.fire_registered();
    }

    fn on_channel_active(&mut self, ctx: &mut Context<'_>) {
        // Swallowed; re-fired once the handshake succeeds.
        ctx.read();
    }

    fn on_read_complete(&mut self, ctx: &mut Context<'_>) {
        if !self.is_completed() {
            ctx.read();
        }
        ctx.fire_read_complete();
    }

    fn on_user_event(&mut self, ctx: &mut Context<'_>, event: UserEvent) {
        if let UserEvent::HandshakeCompleted(completion) = &event {
            self.complete(ctx, completion);
        }
        ctx.fire_user_event(event);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
