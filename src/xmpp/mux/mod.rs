/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! Routing of inbound stanzas to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::xml::Element;
use crate::xml::Name;
use crate::xml::StartElement;
use crate::xml::Token;
use crate::xml::TokenReader;
use crate::xml::TokenWriter;
use crate::xml::skip;

use super::Error;
use super::session::PendingIqs;
use super::stanza::Iq;
use super::stanza::IqType;
use super::stanza::Kind;

/// Receives top level elements of a stream.
pub trait Handler: Send + Sync {
    /// Called with the start tag already consumed. The reader is scoped
    /// to the element content and ends with `None` at its end tag.
    fn handle_xmpp(
        &self,
        reader: &mut dyn TokenReader,
        writer: &mut dyn TokenWriter,
        start: &StartElement,
    ) -> Result<(), Error>;
}

/// Answers IQ requests with a particular payload.
pub trait IqHandler: Send + Sync {
    /// The reader covers the content of the payload element. At most one
    /// response element may be written.
    fn handle_iq(
        &self,
        iq: &Iq,
        reader: &mut dyn TokenReader,
        writer: &mut dyn TokenWriter,
        payload: &StartElement,
    ) -> Result<(), Error>;
}

/// Stanza multiplexer.
///
/// IQ requests are routed by type and payload name, messages and
/// presences to a single handler each. IQ responses complete the
/// matching pending request.
#[derive(Clone, Default)]
pub struct Mux {
    iq: HashMap<(IqType, Name), Arc<dyn IqHandler>>,
    message: Option<Arc<dyn Handler>>,
    presence: Option<Arc<dyn Handler>>,
    fallback: Option<Arc<dyn Handler>>,
    pending: Option<PendingIqs>,
}

impl Mux {
    pub fn new() -> Self {
        Mux::default()
    }

    /// Registers a handler for `get` or `set` requests whose payload has
    /// the given name. A previous handler for the same key is replaced.
    pub fn iq(mut self, kind: IqType, payload: Name, handler: impl IqHandler + 'static) -> Self {
        if !kind.is_request() {
            debug!(%kind, "ignoring handler for IQ responses");
            return self;
        }
        self.iq.insert((kind, payload), Arc::new(handler));
        self
    }

    pub fn message(mut self, handler: impl Handler + 'static) -> Self {
        self.message = Some(Arc::new(handler));
        self
    }

    pub fn presence(mut self, handler: impl Handler + 'static) -> Self {
        self.presence = Some(Arc::new(handler));
        self
    }

    /// Handler for elements no other handler wants.
    pub fn fallback(mut self, handler: impl Handler + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Table of outstanding requests that IQ responses are delivered to.
    pub fn pending(mut self, pending: PendingIqs) -> Self {
        self.pending = Some(pending);
        self
    }

    fn handle_iq_stanza(
        &self,
        reader: &mut dyn TokenReader,
        writer: &mut dyn TokenWriter,
        start: &StartElement,
    ) -> Result<(), Error> {
        let iq = Iq::from_start(start)?;
        let element = Element::read_content(reader, start.clone())?;
        if !iq.kind.is_request() {
            if let Some(pending) = &self.pending {
                pending.deliver(&iq.id, element);
            }
            return Ok(());
        }
        let mut children = element.elements();
        let (Some(payload), None) = (children.next(), children.next()) else {
            debug!(id = %iq.id, "IQ request without a single payload");
            return Ok(());
        };
        let Some(handler) = self.iq.get(&(iq.kind, payload.name.clone())) else {
            debug!(id = %iq.id, payload = %payload.name, "no handler for IQ request");
            return Ok(());
        };
        let mut response = ResponseWriter::new(writer);
        let result =
            handler.handle_iq(&iq, &mut payload.inner_reader(), &mut response, &payload.start());
        // A finished response goes out even if the handler failed later.
        if response.complete() {
            response.flush()?;
        } else if !response.responded() {
            warn!(id = %iq.id, payload = %payload.name, "IQ request left without a response");
        }
        result
    }
}

impl Handler for Mux {
    fn handle_xmpp(
        &self,
        reader: &mut dyn TokenReader,
        writer: &mut dyn TokenWriter,
        start: &StartElement,
    ) -> Result<(), Error> {
        let handler = match Kind::classify(&start.name) {
            Some(Kind::Iq) => return self.handle_iq_stanza(reader, writer, start),
            Some(Kind::Message) => self.message.as_ref().or(self.fallback.as_ref()),
            Some(Kind::Presence) => self.presence.as_ref().or(self.fallback.as_ref()),
            None => self.fallback.as_ref(),
        };
        match handler {
            Some(handler) => handler.handle_xmpp(reader, writer, start),
            None => skip(reader),
        }
    }
}

/// Writer that lets exactly one top level element through.
pub struct ResponseWriter<'a> {
    inner: &'a mut dyn TokenWriter,
    depth: usize,
    written: bool,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(inner: &'a mut dyn TokenWriter) -> Self {
        ResponseWriter {
            inner,
            depth: 0,
            written: false,
        }
    }

    pub fn responded(&self) -> bool {
        self.written
    }

    /// True once the response element has been written up to its end tag.
    pub fn complete(&self) -> bool {
        self.written && self.depth == 0
    }
}

impl TokenWriter for ResponseWriter<'_> {
    fn write_token(&mut self, token: &Token) -> Result<(), Error> {
        match token {
            Token::Start(_) => {
                if self.depth == 0 {
                    if self.written {
                        return Err(Error::DuplicateResponse);
                    }
                    self.written = true;
                }
                self.depth += 1;
            }
            Token::End(_) => self.depth = self.depth.saturating_sub(1),
            _ => (),
        }
        self.inner.write_token(token)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests;
