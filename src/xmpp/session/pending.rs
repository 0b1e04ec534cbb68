/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::mpsc;
use std::time::Duration;

use tracing::debug;

use crate::xml::Element;
use crate::xmpp::Error;

// Each registration gets its own ticket, so a stale handle for a reused
// id never removes the newer waiter.
struct Waiter {
    ticket: u64,
    tx: mpsc::SyncSender<Element>,
}

#[derive(Default)]
struct Table {
    waiters: HashMap<String, Waiter>,
    next_ticket: u64,
    closed: bool,
}

/// Outstanding IQ requests keyed by id.
///
/// Cloning gives another handle to the same table.
#[derive(Clone, Default)]
pub struct PendingIqs {
    table: Arc<Mutex<Table>>,
}

impl PendingIqs {
    pub fn new() -> Self {
        PendingIqs::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a waiter for the response with the given id.
    ///
    /// Must be called before the request is written, otherwise a fast
    /// response may arrive before anyone waits for it.
    pub fn register(&self, id: &str) -> Result<PendingIq, Error> {
        let (tx, rx) = mpsc::sync_channel(1);
        let mut table = self.lock();
        if table.closed {
            return Err(Error::Closed);
        }
        if table.waiters.contains_key(id) {
            return Err(Error::Usage("an IQ with this id is already pending"));
        }
        let ticket = table.next_ticket;
        table.next_ticket += 1;
        table.waiters.insert(id.to_string(), Waiter { ticket, tx });
        Ok(PendingIq {
            id: id.to_string(),
            ticket,
            pending: self.clone(),
            rx,
        })
    }

    /// Hands a response to its waiter. Returns false if nobody waits
    /// for this id, in which case the response is unsolicited.
    pub fn deliver(&self, id: &str, response: Element) -> bool {
        let Some(waiter) = self.lock().waiters.remove(id) else {
            debug!(id, "dropping unsolicited IQ response");
            return false;
        };
        // The receiver is gone if the waiter gave up in the meantime.
        waiter.tx.try_send(response).is_ok()
    }

    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails every waiter with [Error::Closed] and refuses new ones.
    pub fn close(&self) {
        let mut table = self.lock();
        table.closed = true;
        table.waiters.clear();
    }

    fn cancel(&self, id: &str, ticket: u64) {
        let mut table = self.lock();
        if table.waiters.get(id).is_some_and(|waiter| waiter.ticket == ticket) {
            table.waiters.remove(id);
        }
    }
}

/// Handle for an IQ request awaiting its response.
///
/// Dropping the handle cancels the wait and forgets the id, a response
/// arriving later is discarded.
pub struct PendingIq {
    id: String,
    ticket: u64,
    pending: PendingIqs,
    rx: mpsc::Receiver<Element>,
}

impl PendingIq {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Blocks until the response arrives or the timeout expires.
    pub fn wait(self, timeout: Duration) -> Result<Element, Error> {
        match self.rx.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }

    pub fn cancel(self) {}
}

impl Drop for PendingIq {
    fn drop(&mut self) {
        self.pending.cancel(&self.id, self.ticket);
    }
}
