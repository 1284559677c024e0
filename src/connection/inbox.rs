//! Holding area for inbound messages awaiting a receiver.

use std::collections::VecDeque;

use super::Receiver;
use crate::message::Message;

/// Either the registered receiver or the messages that arrived before one was
/// attached, in arrival order.
#[derive(Default)]
pub(super) struct Inbox {
    receiver: Option<Receiver>,
    buffered: VecDeque<Message>,
}

impl Inbox {
    pub(super) fn receiver(&self) -> Option<&Receiver> { self.receiver.as_ref() }

    pub(super) fn buffer(&mut self, message: Message) { self.buffered.push_back(message); }

    /// Install `receiver`, returning the backlog it must see first.
    pub(super) fn attach(&mut self, receiver: Receiver) -> VecDeque<Message> {
        self.receiver = Some(receiver);
        std::mem::take(&mut self.buffered)
    }

    /// Drop the receiver, keeping any backlog for a later attach.
    pub(super) fn detach(&mut self) { self.receiver = None; }

    pub(super) fn buffered_len(&self) -> usize { self.buffered.len() }
}
