//! Ordered handler chain and its dispatcher.
//!
//! # Dispatch model
//! ```text
//! transport ──inbound──▶ [stage 0] ─▶ [stage 1] ─▶ ... ─▶ tail queue (driver)
//! transport ◀─outbound── [stage 0] ◀─ [stage 1] ◀─ ... ◀─ Pipeline::write
//! ```
//!
//! While a handler runs it is taken out of its slot, so it can inspect the
//! rest of the chain through its [`Context`] and schedule its own removal.
//! Signals it emits are delivered depth-first once it returns, to the stage
//! that is its neighbour at that moment. Signals still queued for a stage that
//! has since removed itself follow it to the neighbour it had when it left.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use bytes::Bytes;

use crate::net::{ConnectionId, RemoteAddress};
use crate::pipeline::handler::{Cause, Handler, Inbound, Outbound, UserEvent};
use crate::pipeline::{PipelineError, StageName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StageId(u64);

struct Stage {
    id: StageId,
    name: StageName,
    handler: Option<Box<dyn Handler>>,
}

enum Emitted {
    Inbound(Inbound),
    Outbound(Outbound),
}

/// Neighbours a stage had when it removed itself.
struct Departed {
    id: StageId,
    next: Option<StageId>,
    prev: Option<StageId>,
}

enum Hop {
    /// `None` targets the tail.
    Inbound { at: Option<StageId>, signal: Inbound },
    /// `None` targets the transport.
    Outbound { at: Option<StageId>, op: Outbound },
}

/// Identity of the connection a pipeline belongs to.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: ConnectionId,
    pub remote: Option<RemoteAddress>,
}

/// Per-connection handler chain.
pub struct Pipeline {
    channel: ChannelInfo,
    stages: Vec<Stage>,
    next_stage_id: u64,
    /// Inbound signals that passed every stage.
    inbound: VecDeque<Inbound>,
    /// Bytes that reached the transport end.
    outbound: VecDeque<Bytes>,
    read_requested: bool,
    close_requested: bool,
}

impl Pipeline {
    /// Create an empty pipeline for a connection.
    pub fn new(id: ConnectionId, remote: Option<RemoteAddress>) -> Self {
        Self {
            channel: ChannelInfo { id, remote },
            stages: Vec::new(),
            next_stage_id: 0,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            read_requested: false,
            close_requested: false,
        }
    }

    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    // --- Structure ---

    pub fn add_first<H: Handler>(&mut self, name: StageName, handler: H) -> Result<(), PipelineError> {
        self.insert_at(0, name, Box::new(handler))
    }

    pub fn add_last<H: Handler>(&mut self, name: StageName, handler: H) -> Result<(), PipelineError> {
        let len = self.stages.len();
        self.insert_at(len, name, Box::new(handler))
    }

    /// Insert `handler` immediately after the stage named `base`.
    pub fn add_after<H: Handler>(
        &mut self,
        base: StageName,
        name: StageName,
        handler: H,
    ) -> Result<(), PipelineError> {
        self.add_after_boxed(base, name, Box::new(handler))
    }

    pub fn add_after_boxed(
        &mut self,
        base: StageName,
        name: StageName,
        handler: Box<dyn Handler>,
    ) -> Result<(), PipelineError> {
        let index = self.position(base).ok_or(PipelineError::NoSuchStage(base))?;
        self.insert_at(index + 1, name, handler)
    }

    /// Insert `handler` immediately before the stage named `base`.
    pub fn add_before<H: Handler>(
        &mut self,
        base: StageName,
        name: StageName,
        handler: H,
    ) -> Result<(), PipelineError> {
        let index = self.position(base).ok_or(PipelineError::NoSuchStage(base))?;
        self.insert_at(index, name, Box::new(handler))
    }

    pub fn add_first_boxed(&mut self, name: StageName, handler: Box<dyn Handler>) -> Result<(), PipelineError> {
        self.insert_at(0, name, handler)
    }

    fn insert_at(&mut self, index: usize, name: StageName, handler: Box<dyn Handler>) -> Result<(), PipelineError> {
        if self.contains(name) {
            return Err(PipelineError::DuplicateStage(name));
        }
        let id = StageId(self.next_stage_id);
        self.next_stage_id += 1;
        self.stages.insert(index, Stage { id, name, handler: Some(handler) });
        Ok(())
    }

    /// Remove a stage by name. Removing an absent stage is not an error.
    pub fn remove(&mut self, name: StageName) -> Option<Box<dyn Handler>> {
        let index = self.position(name)?;
        self.stages.remove(index).handler
    }

    pub fn contains(&self, name: StageName) -> bool {
        self.position(name).is_some()
    }

    /// Look up a stage and downcast its handler.
    pub fn get<T: 'static>(&self, name: StageName) -> Option<&T> {
        find_handler(&self.stages, name)
    }

    /// Stage names from the transport end to the application end.
    pub fn names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn position(&self, name: StageName) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    fn position_of(&self, id: StageId) -> Option<usize> {
        self.stages.iter().position(|s| s.id == id)
    }

    // --- Inbound entry points (transport side) ---

    pub fn fire_registered(&mut self) {
        self.fire(Inbound::Registered);
    }

    pub fn fire_channel_active(&mut self) {
        self.fire(Inbound::Active);
    }

    pub fn fire_read(&mut self, msg: Bytes) {
        self.fire(Inbound::Read(msg));
    }

    pub fn fire_read_complete(&mut self) {
        self.fire(Inbound::ReadComplete);
    }

    pub fn fire_user_event(&mut self, event: UserEvent) {
        self.fire(Inbound::UserEvent(event));
    }

    pub fn fire_exception_caught(&mut self, cause: Cause) {
        self.fire(Inbound::ExceptionCaught(cause));
    }

    pub fn fire_inactive(&mut self) {
        self.fire(Inbound::Inactive);
    }

    pub fn fire_tick(&mut self, now: Instant) {
        self.fire(Inbound::Tick(now));
    }

    fn fire(&mut self, signal: Inbound) {
        let at = self.stages.first().map(|s| s.id);
        self.run(Hop::Inbound { at, signal });
    }

    // --- Outbound entry points (application side) ---

    pub fn write(&mut self, msg: Bytes) {
        self.submit(Outbound::Write(msg));
    }

    pub fn read(&mut self) {
        self.submit(Outbound::Read);
    }

    pub fn close(&mut self) {
        self.submit(Outbound::Close);
    }

    fn submit(&mut self, op: Outbound) {
        let at = self.stages.last().map(|s| s.id);
        self.run(Hop::Outbound { at, op });
    }

    // --- Driver side ---

    /// Drain inbound signals that reached the end of the chain.
    pub fn take_inbound(&mut self) -> Vec<Inbound> {
        self.inbound.drain(..).collect()
    }

    /// Drain bytes that must be written to the transport.
    pub fn take_outbound(&mut self) -> Vec<Bytes> {
        self.outbound.drain(..).collect()
    }

    /// Whether a stage asked for a read since the last call.
    pub fn take_read_request(&mut self) -> bool {
        std::mem::take(&mut self.read_requested)
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    // --- Dispatcher ---

    fn run(&mut self, first: Hop) {
        let mut departed = Vec::new();
        let mut queue = VecDeque::from([first]);
        while let Some(hop) = queue.pop_front() {
            let next = match hop {
                Hop::Inbound { at, signal } => match self.resolve(at, &departed, true) {
                    Some(index) => self.invoke(index, Emitted::Inbound(signal), &mut departed),
                    None => {
                        self.inbound.push_back(signal);
                        continue;
                    }
                },
                Hop::Outbound { at, op } => match self.resolve(at, &departed, false) {
                    Some(index) => self.invoke(index, Emitted::Outbound(op), &mut departed),
                    None => {
                        self.reach_transport(op);
                        continue;
                    }
                },
            };
            for hop in next.into_iter().rev() {
                queue.push_front(hop);
            }
        }
    }

    /// Position of the stage a hop should land on, following stages that
    /// removed themselves during this dispatch.
    fn resolve(&self, mut at: Option<StageId>, departed: &[Departed], inbound: bool) -> Option<usize> {
        while let Some(id) = at {
            if let Some(index) = self.position_of(id) {
                return Some(index);
            }
            let gone = departed.iter().find(|d| d.id == id)?;
            at = if inbound { gone.next } else { gone.prev };
        }
        None
    }

    fn reach_transport(&mut self, op: Outbound) {
        match op {
            Outbound::Write(msg) => self.outbound.push_back(msg),
            Outbound::Read => self.read_requested = true,
            Outbound::Close => self.close_requested = true,
        }
    }

    fn invoke(&mut self, index: usize, signal: Emitted, departed: &mut Vec<Departed>) -> Vec<Hop> {
        let name = self.stages[index].name;
        let Some(mut handler) = self.stages[index].handler.take() else {
            // Slot is only empty while its handler runs; pass the signal along.
            return vec![self.hop_from(index, false, signal)];
        };

        let mut ctx = Context {
            channel: &self.channel,
            stages: &self.stages,
            name,
            emitted: Vec::new(),
            remove_self: false,
        };
        deliver(handler.as_mut(), &mut ctx, signal);
        let Context { emitted, remove_self, .. } = ctx;

        if remove_self {
            departed.push(Departed {
                id: self.stages[index].id,
                next: self.stages.get(index + 1).map(|s| s.id),
                prev: index.checked_sub(1).and_then(|prev| self.stages.get(prev)).map(|s| s.id),
            });
            self.stages.remove(index);
        } else {
            self.stages[index].handler = Some(handler);
        }

        emitted
            .into_iter()
            .map(|signal| self.hop_from(index, remove_self, signal))
            .collect()
    }

    /// Route a signal emitted by the stage that sits (or sat) at `index`.
    fn hop_from(&self, index: usize, removed: bool, signal: Emitted) -> Hop {
        match signal {
            Emitted::Inbound(signal) => {
                let next = if removed { index } else { index + 1 };
                Hop::Inbound { at: self.stages.get(next).map(|s| s.id), signal }
            }
            Emitted::Outbound(op) => {
                let at = index.checked_sub(1).and_then(|prev| self.stages.get(prev)).map(|s| s.id);
                Hop::Outbound { at, op }
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("channel", &self.channel.id)
            .field("stages", &self.names())
            .finish()
    }
}

fn deliver(handler: &mut dyn Handler, ctx: &mut Context<'_>, signal: Emitted) {
    match signal {
        Emitted::Inbound(Inbound::Registered) => handler.on_registered(ctx),
        Emitted::Inbound(Inbound::Active) => handler.on_channel_active(ctx),
        Emitted::Inbound(Inbound::Read(msg)) => handler.on_read(ctx, msg),
        Emitted::Inbound(Inbound::ReadComplete) => handler.on_read_complete(ctx),
        Emitted::Inbound(Inbound::UserEvent(event)) => handler.on_user_event(ctx, event),
        Emitted::Inbound(Inbound::ExceptionCaught(cause)) => handler.on_exception_caught(ctx, cause),
        Emitted::Inbound(Inbound::Inactive) => handler.on_inactive(ctx),
        Emitted::Inbound(Inbound::Tick(now)) => handler.on_tick(ctx, now),
        Emitted::Outbound(Outbound::Write(msg)) => handler.on_write(ctx, msg),
        Emitted::Outbound(Outbound::Read) => handler.on_read_request(ctx),
        Emitted::Outbound(Outbound::Close) => handler.on_close(ctx),
    }
}

fn find_handler<'a, T: 'static>(stages: &'a [Stage], name: StageName) -> Option<&'a T> {
    stages
        .iter()
        .find(|s| s.name == name)
        .and_then(|s| s.handler.as_ref())
        .and_then(|h| h.as_any().downcast_ref::<T>())
}

/// View of the pipeline handed to a running handler.
pub struct Context<'a> {
    channel: &'a ChannelInfo,
    stages: &'a [Stage],
    name: StageName,
    emitted: Vec<Emitted>,
    remove_self: bool,
}

impl<'a> Context<'a> {
    /// Name of the stage being invoked.
    pub fn name(&self) -> StageName {
        self.name
    }

    pub fn channel_id(&self) -> ConnectionId {
        self.channel.id
    }

    pub fn remote_address(&self) -> Option<&RemoteAddress> {
        self.channel.remote.as_ref()
    }

    /// Look up another stage and downcast its handler.
    pub fn get<T: 'static>(&self, name: StageName) -> Option<&'a T> {
        find_handler(self.stages, name)
    }

    pub fn contains(&self, name: StageName) -> bool {
        self.stages.iter().any(|s| s.name == name)
    }

    /// Schedule removal of the invoking stage once it returns.
    ///
    /// Returns `false` if removal was already scheduled.
    pub fn remove_self(&mut self) -> bool {
        !std::mem::replace(&mut self.remove_self, true)
    }

    pub fn fire_registered(&mut self) {
        self.emitted.push(Emitted::Inbound(Inbound::Registered));
    }

    pub fn fire_channel_active(&mut self) {
        self.emitted.push(Emitted::Inbound(Inbound::Active));
    }

    pub fn fire_read(&mut self, msg: Bytes) {
        self.emitted.push(Emitted::Inbound(Inbound::Read(msg)));
    }

    pub fn fire_read_complete(&mut self) {
        self.emitted.push(Emitted::Inbound(Inbound::ReadComplete));
    }

    pub fn fire_user_event(&mut self, event: UserEvent) {
        self.emitted.push(Emitted::Inbound(Inbound::UserEvent(event)));
    }

    pub fn fire_exception_caught(&mut self, cause: Cause) {
        self.emitted.push(Emitted::Inbound(Inbound::ExceptionCaught(cause)));
    }

    pub fn fire_inactive(&mut self) {
        self.emitted.push(Emitted::Inbound(Inbound::Inactive));
    }

    pub fn fire_tick(&mut self, now: Instant) {
        self.emitted.push(Emitted::Inbound(Inbound::Tick(now)));
    }

    pub fn write(&mut self, msg: Bytes) {
        self.emitted.push(Emitted::Outbound(Outbound::Write(msg)));
    }

    pub fn read(&mut self) {
        self.emitted.push(Emitted::Outbound(Outbound::Read));
    }

    pub fn close(&mut self) {
        self.emitted.push(Emitted::Outbound(Outbound::Close));
    }
}
