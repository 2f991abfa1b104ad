//! Handler contract and pipeline signals.

use std::any::Any;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::pipeline::Context;

/// Shared failure cause carried by `exception_caught` and handshake outcomes.
pub type Cause = Arc<dyn Error + Send + Sync>;

/// Outcome of a TLS handshake.
#[derive(Debug, Clone)]
pub enum HandshakeCompletion {
    Success,
    Failure(Cause),
}

impl HandshakeCompletion {
    pub fn is_success(&self) -> bool {
        matches!(self, HandshakeCompletion::Success)
    }

    /// Failure cause, if the handshake failed.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            HandshakeCompletion::Success => None,
            HandshakeCompletion::Failure(cause) => Some(cause),
        }
    }
}

/// User events travelling inbound.
#[derive(Debug, Clone)]
pub enum UserEvent {
    /// The TLS handshake finished, successfully or not.
    HandshakeCompleted(HandshakeCompletion),
    /// The peer sent a TLS close_notify alert.
    CloseNotifyReceived,
}

/// Inbound signal, flowing from the transport towards the application.
#[derive(Debug, Clone)]
pub enum Inbound {
    Registered,
    Active,
    Read(Bytes),
    ReadComplete,
    UserEvent(UserEvent),
    ExceptionCaught(Cause),
    Inactive,
    Tick(Instant),
}

/// Outbound operation, flowing from the application towards the transport.
#[derive(Debug, Clone)]
pub enum Outbound {
    Write(Bytes),
    /// Request that the transport reads more data.
    Read,
    Close,
}

/// A pipeline participant.
///
/// Every callback has a forwarding default, so a handler only overrides the
/// signals it cares about. Handlers run on the connection's own task and are
/// never called concurrently.
pub trait Handler: Send + 'static {
    fn on_registered(&mut self, ctx: &mut Context<'_>) {
        ctx.fire_registered();
    }

    fn on_channel_active(&mut self, ctx: &mut Context<'_>) {
        ctx.fire_channel_active();
    }

    fn on_read(&mut self, ctx: &mut Context<'_>, msg: Bytes) {
        ctx.fire_read(msg);
    }

    fn on_read_complete(&mut self, ctx: &mut Context<'_>) {
        ctx.fire_read_complete();
    }

    fn on_user_event(&mut self, ctx: &mut Context<'_>, event: UserEvent) {
        ctx.fire_user_event(event);
    }

    fn on_exception_caught(&mut self, ctx: &mut Context<'_>, cause: Cause) {
        ctx.fire_exception_caught(cause);
    }

    fn on_inactive(&mut self, ctx: &mut Context<'_>) {
        ctx.fire_inactive();
    }

    fn on_tick(&mut self, ctx: &mut Context<'_>, now: Instant) {
        ctx.fire_tick(now);
    }

    fn on_write(&mut self, ctx: &mut Context<'_>, msg: Bytes) {
        ctx.write(msg);
    }

    fn on_read_request(&mut self, ctx: &mut Context<'_>) {
        ctx.read();
    }

    fn on_close(&mut self, ctx: &mut Context<'_>) {
        ctx.close();
    }

    /// Used by [`Pipeline::get`](crate::pipeline::Pipeline::get) to downcast.
    fn as_any(&self) -> &dyn Any;
}
