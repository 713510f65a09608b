//! Deferred replies for pipelines and transactions.
//!
//! Every queued command hands back a [`Response`] bound to its position in
//! the batch. The batch owns the matching slot and fills it once the
//! server has answered; until then the placeholder is unreadable.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use crate::core::command::Cmd;
use crate::proto::frame::Frame;
use crate::{Error, Result};

#[derive(Debug)]
enum Outcome {
    Reply(Frame),
    Discarded,
}

type Slot = Arc<OnceLock<Outcome>>;

/// A placeholder for the reply to one queued command.
///
/// Readable with [`get`](Response::get) after the owning pipeline has been
/// synced or the owning transaction executed.
pub struct Response<T> {
    slot: Slot,
    convert: fn(Frame) -> Result<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Response<T> {
    /// Returns the converted reply.
    ///
    /// # Errors
    ///
    /// - [`Error::ResponseNotReady`] before the batch has executed
    /// - [`Error::Discarded`] if the batch was dropped, discarded, or the
    ///   transaction aborted because a watched key changed
    /// - [`Error::Server`] if the server rejected this particular command
    pub fn get(&self) -> Result<T> {
        match self.slot.get() {
            None => Err(Error::ResponseNotReady),
            Some(Outcome::Discarded) => Err(Error::Discarded),
            Some(Outcome::Reply(frame)) => (self.convert)(frame.clone()),
        }
    }

    /// Returns true once a reply has been received for this command.
    pub fn is_ready(&self) -> bool {
        matches!(self.slot.get(), Some(Outcome::Reply(_)))
    }
}

impl<T> Clone for Response<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            convert: self.convert,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("outcome", &self.slot.get())
            .finish()
    }
}

/// Commands queued in memory together with the slots of their placeholders.
///
/// Dropping a batch with commands still queued marks their placeholders as
/// discarded.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    commands: Vec<Frame>,
    slots: Vec<Slot>,
}

impl Batch {
    pub(crate) fn push<T>(&mut self, cmd: Cmd, convert: fn(Frame) -> Result<T>) -> Response<T> {
        let slot: Slot = Arc::new(OnceLock::new());
        self.commands.push(cmd.into_frame());
        self.slots.push(Arc::clone(&slot));
        Response {
            slot,
            convert,
            _marker: PhantomData,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Moves the queued commands out for sending.
    pub(crate) fn take(&mut self) -> (Vec<Frame>, Pending) {
        let commands = std::mem::take(&mut self.commands);
        let slots = std::mem::take(&mut self.slots);
        (commands, Pending { slots })
    }

    /// Drops every queued command without sending it.
    pub(crate) fn discard(&mut self) {
        drop(self.take());
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Slots of commands that have been sent and await their replies.
///
/// Slots left unfilled when this is dropped (I/O failure, aborted EXEC)
/// are marked discarded.
#[derive(Debug)]
pub(crate) struct Pending {
    slots: Vec<Slot>,
}

impl Pending {
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Fills the slots in order with the given replies.
    pub(crate) fn fulfil(self, replies: &[Frame]) {
        for (slot, reply) in self.slots.iter().zip(replies) {
            let _ = slot.set(Outcome::Reply(reply.clone()));
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        for slot in &self.slots {
            let _ = slot.set(Outcome::Discarded);
        }
    }
}
