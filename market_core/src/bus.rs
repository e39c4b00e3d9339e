//! Tag-routed channel between households and the market.
//!
//! Requests from every household share one queue and carry the household id as
//! their tag. Bills go back through per-household mailboxes keyed by
//! `id + REPLY_OFFSET`, keeping the request and reply address spaces disjoint.

use std::collections::HashMap;
use std::sync::RwLock;

use crossbeam_channel::{unbounded, Receiver, Sender};
use market_runtime::{encode_bill, encode_request, HouseholdId, SettlementRequest};
use thiserror::Error;

/// A routed message: `tag` selects the destination, `payload` is wire text.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub tag: u64,
    pub payload: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("settlement request queue is closed")]
    RequestsClosed,
    #[error("no mailbox registered for tag {0}")]
    UnknownMailbox(u64),
    #[error("mailbox for tag {0} is closed")]
    MailboxClosed(u64),
    #[error("mailbox for tag {0} is already registered")]
    DuplicateMailbox(u64),
    #[error("tag {0} does not name a household")]
    InvalidTag(u64),
}

#[derive(Debug)]
pub struct SettlementBus {
    requests_tx: Sender<Envelope>,
    requests_rx: Receiver<Envelope>,
    mailboxes: RwLock<HashMap<u64, Sender<Envelope>>>,
}

impl Default for SettlementBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementBus {
    pub fn new() -> Self {
        let (requests_tx, requests_rx) = unbounded();
        Self {
            requests_tx,
            requests_rx,
            mailboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Opens the reply mailbox for `household`. Each household registers once.
    pub fn register(&self, household: HouseholdId) -> Result<Receiver<Envelope>, BusError> {
        let tag = household.reply_tag();
        let mut mailboxes = self.mailboxes.write().expect("mailbox registry poisoned");
        if mailboxes.contains_key(&tag) {
            return Err(BusError::DuplicateMailbox(tag));
        }
        let (sender, receiver) = unbounded();
        mailboxes.insert(tag, sender);
        Ok(receiver)
    }

    pub fn unregister(&self, household: HouseholdId) {
        self.mailboxes
            .write()
            .expect("mailbox registry poisoned")
            .remove(&household.reply_tag());
    }

    pub fn submit(
        &self,
        household: HouseholdId,
        request: &SettlementRequest,
    ) -> Result<(), BusError> {
        self.submit_raw(household.request_tag(), encode_request(request))
    }

    /// Queues an already encoded payload under an arbitrary tag.
    pub fn submit_raw(&self, tag: u64, payload: String) -> Result<(), BusError> {
        self.requests_tx
            .send(Envelope { tag, payload })
            .map_err(|_| BusError::RequestsClosed)
    }

    /// Queue the market drains one envelope at a time.
    pub fn requests(&self) -> &Receiver<Envelope> {
        &self.requests_rx
    }

    /// Sends `bill` to the mailbox at `household`'s reply tag.
    pub fn reply(&self, household: HouseholdId, bill: f64) -> Result<(), BusError> {
        let tag = household.reply_tag();
        let mailboxes = self.mailboxes.read().expect("mailbox registry poisoned");
        let mailbox = mailboxes.get(&tag).ok_or(BusError::UnknownMailbox(tag))?;
        mailbox
            .send(Envelope {
                tag,
                payload: encode_bill(bill),
            })
            .map_err(|_| BusError::MailboxClosed(tag))
    }
}
