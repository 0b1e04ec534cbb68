/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! Stream negotiation and the negotiated session.

mod pending;

use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;

use quick_xml::escape::escape;
use tracing::debug;
use tracing::trace;
use tracing::warn;
use uuid::Uuid;

use crate::xml::Decoder;
use crate::xml::Element;
use crate::xml::Encoder;
use crate::xml::Inner;
use crate::xml::Name;
use crate::xml::StartElement;
use crate::xml::Token;
use crate::xml::TokenReader;
use crate::xml::TokenWriter;
use crate::xml::skip;

pub use pending::PendingIq;
pub use pending::PendingIqs;

use super::Error;
use super::Jid;
use super::constants::CLIENT_NS;
use super::constants::FEATURES_TAG;
use super::constants::STREAM_NS;
use super::constants::STREAM_TAG;
use super::description;
use super::feature::FeatureData;
use super::feature::StreamFeature;
use super::mux::Handler;
use super::mux::Mux;
use super::stanza::Iq;
use super::state::SessionState;
use super::transport::Transport;
use super::transport::WriteHalf;

type StreamReader = Decoder<Box<dyn Read + Send>>;
type StreamWriter = Encoder<Box<dyn WriteHalf>>;

fn new_reader(transport_reader: Box<dyn Read + Send>) -> StreamReader {
    Decoder::new(transport_reader)
}

fn new_writer(transport_writer: Box<dyn WriteHalf>) -> StreamWriter {
    let mut writer = Encoder::new(transport_writer);
    writer.set_default_namespace(CLIENT_NS);
    writer
}

/// Configuration of a stream negotiation.
///
/// `location` is the service the stream is addressed to, `origin` the
/// entity on the client end. Features are tried in the order they are
/// added.
pub struct SessionBuilder {
    location: Jid,
    origin: Jid,
    client: bool,
    features: Vec<Arc<dyn StreamFeature>>,
}

impl SessionBuilder {
    pub fn new(location: Jid, origin: Jid) -> Self {
        SessionBuilder {
            location,
            origin,
            client: true,
            features: Vec::new(),
        }
    }

    /// Negotiate as the initiating entity. This is the default.
    pub fn client(mut self) -> Self {
        self.client = true;
        self
    }

    /// Negotiate as the receiving entity.
    pub fn server(mut self) -> Self {
        self.client = false;
        self
    }

    pub fn feature(mut self, feature: Arc<dyn StreamFeature>) -> Self {
        self.features.push(feature);
        self
    }

    /// Runs the negotiation to completion over the given transport.
    ///
    /// On failure the transport is shut down.
    pub fn negotiate(self, transport: Transport) -> Result<Session, Error> {
        let mut session = Session::new(transport, self.location, self.origin, self.client);
        match session.negotiate_features(&self.features) {
            Ok(()) => Ok(session),
            Err(err) => {
                debug!(%err, "stream negotiation failed");
                session.shutdown();
                Err(err)
            }
        }
    }
}

/// An XMPP stream between two entities.
///
/// During negotiation the session is exclusively owned by the running
/// feature. Afterwards it is typically shared in an [Arc] between a read
/// loop started by [serve()](Session::serve) and any number of writers.
pub struct Session {
    state: SessionState,
    client: bool,
    location: Jid,
    origin: Jid,
    stream_id: String,
    reader: Mutex<Option<StreamReader>>,
    writer: Mutex<Option<StreamWriter>>,
    pending: PendingIqs,
    serving: AtomicBool,
}

enum Round {
    Ready,
    Restart,
}

impl Session {
    pub(crate) fn new(transport: Transport, location: Jid, origin: Jid, client: bool) -> Self {
        let stream_id = if client {
            String::new()
        } else {
            Uuid::new_v4().to_string()
        };
        Session {
            state: SessionState::EMPTY,
            client,
            location,
            origin,
            stream_id,
            reader: Mutex::new(Some(new_reader(transport.reader))),
            writer: Mutex::new(Some(new_writer(transport.writer))),
            pending: PendingIqs::new(),
            serving: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_client(&self) -> bool {
        self.client
    }

    pub fn location(&self) -> &Jid {
        &self.location
    }

    pub fn origin(&self) -> &Jid {
        &self.origin
    }

    /// Stream id assigned by the receiving entity.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn pending(&self) -> &PendingIqs {
        &self.pending
    }

    fn raw_streams(&mut self) -> Result<(&mut StreamReader, &mut StreamWriter), Error> {
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut();
        let writer = self
            .writer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut();
        match (reader, writer) {
            (Some(reader), Some(writer)) => Ok((reader, writer)),
            _ => Err(Error::BadStream(description::NO_TRANSPORT)),
        }
    }

    /// Token streams for a running negotiation step.
    pub fn streams(&mut self) -> Result<(&mut dyn TokenReader, &mut dyn TokenWriter), Error> {
        let (reader, writer) = self.raw_streams()?;
        let reader: &mut dyn TokenReader = reader;
        let writer: &mut dyn TokenWriter = writer;
        Ok((reader, writer))
    }

    /// Takes the transport away from the session, e.g. for wrapping it
    /// in TLS. The returned [Negotiated](super::feature::Negotiated) step
    /// must supply a replacement.
    ///
    /// Fails if the peer already sent data which was read ahead.
    pub fn release_transport(&mut self) -> Result<Transport, Error> {
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let writer = self
            .writer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let (Some(reader), Some(writer)) = (reader, writer) else {
            return Err(Error::BadStream(description::NO_TRANSPORT));
        };
        let writer = writer.into_inner()?;
        let reader = reader.into_inner()?;
        Ok(Transport::new(reader, writer))
    }

    fn install(&mut self, transport: Transport) {
        *self.reader.get_mut().unwrap_or_else(PoisonError::into_inner) =
            Some(new_reader(transport.reader));
        *self.writer.get_mut().unwrap_or_else(PoisonError::into_inner) =
            Some(new_writer(transport.writer));
    }

    fn header(&self) -> String {
        let (from, to) = if self.client {
            (&self.origin, &self.location)
        } else {
            (&self.location, &self.origin)
        };
        let mut header = format!(
            "<?xml version='1.0'?><{STREAM_TAG}:{STREAM_TAG} xmlns='{CLIENT_NS}' \
             xmlns:{STREAM_TAG}='{STREAM_NS}' version='1.0' xml:lang='en' \
             from='{}' to='{}'",
            escape(from.full()),
            escape(to.full()),
        );
        if !self.client {
            header.push_str(&format!(" id='{}'", escape(self.stream_id.as_str())));
        }
        header.push('>');
        header
    }

    fn send_header(&mut self) -> Result<(), Error> {
        let header = self.header();
        let (_, writer) = self.raw_streams()?;
        writer.set_default_namespace(CLIENT_NS);
        writer.write_raw(header.as_bytes())?;
        writer.flush()
    }

    fn receive_header(&mut self) -> Result<(), Error> {
        let (reader, _) = self.raw_streams()?;
        let start = loop {
            match reader.token()? {
                Some(token) if token.is_whitespace() => continue,
                Some(Token::Start(start)) if start.name.is(STREAM_NS, STREAM_TAG) => break start,
                _ => return Err(Error::BadStream(description::NO_HEADER)),
            }
        };
        if self.client {
            if let Some(id) = start.attr("id") {
                self.stream_id = id.to_string();
            }
        }
        self.state |= SessionState::RECEIVED;
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), Error> {
        if self.client {
            self.send_header()?;
            self.receive_header()
        } else {
            self.receive_header()?;
            self.send_header()
        }
    }

    fn restart_stream(&mut self) {
        let slot = self.reader.get_mut().unwrap_or_else(PoisonError::into_inner);
        *slot = slot.take().map(Decoder::restart);
    }

    fn negotiate_features(&mut self, features: &[Arc<dyn StreamFeature>]) -> Result<(), Error> {
        let mut done = vec![false; features.len()];
        loop {
            self.start_stream()?;
            let round = if self.client {
                self.client_round(features, &mut done)?
            } else {
                self.server_round(features, &mut done)?
            };
            match round {
                Round::Ready => {
                    self.state |= SessionState::READY;
                    debug!(state = %self.state, "stream negotiated");
                    return Ok(());
                }
                Round::Restart => {
                    debug!(state = %self.state, "restarting stream");
                    self.restart_stream();
                }
            }
        }
    }

    fn read_features(
        &mut self,
        features: &[Arc<dyn StreamFeature>],
        done: &[bool],
    ) -> Result<Vec<(usize, bool, FeatureData)>, Error> {
        let state = self.state;
        let (reader, _) = self.raw_streams()?;
        loop {
            match reader.token()? {
                Some(token) if token.is_whitespace() => continue,
                Some(Token::Start(start)) if start.name.is(STREAM_NS, FEATURES_TAG) => break,
                _ => return Err(Error::BadStream(description::NO_FEATURES)),
            }
        }
        let mut offered = Vec::new();
        let mut inner = Inner::new(reader);
        while let Some(token) = inner.token()? {
            let Token::Start(child) = token else {
                continue;
            };
            let found = features
                .iter()
                .enumerate()
                .find(|(i, f)| !done[*i] && f.name() == child.name && f.eligible(state));
            match found {
                Some((index, feature)) => {
                    let mut scoped = Inner::new(&mut inner);
                    let (required, data) = feature.parse(&mut scoped, &child)?;
                    scoped.drain()?;
                    trace!(feature = %child.name, required, "feature offered");
                    offered.push((index, required, data));
                }
                None => skip(&mut inner)?,
            }
        }
        offered.sort_by_key(|(index, _, _)| *index);
        Ok(offered)
    }

    fn client_round(
        &mut self,
        features: &[Arc<dyn StreamFeature>],
        done: &mut [bool],
    ) -> Result<Round, Error> {
        let mut offered = self.read_features(features, done)?;
        loop {
            let state = self.state;
            let pos = offered.iter().position(|(index, required, _)| {
                *required && !done[*index] && features[*index].eligible(state)
            });
            let Some(pos) = pos else {
                return Ok(Round::Ready);
            };
            let (index, _, data) = offered.remove(pos);
            let restart = self.run_feature(features[index].as_ref(), data)?;
            done[index] = true;
            if restart {
                return Ok(Round::Restart);
            }
        }
    }

    fn server_round(
        &mut self,
        features: &[Arc<dyn StreamFeature>],
        done: &mut [bool],
    ) -> Result<Round, Error> {
        let state = self.state;
        let mut listed = Vec::new();
        {
            let (_, writer) = self.raw_streams()?;
            let start = StartElement::new(Name::new(STREAM_NS, FEATURES_TAG));
            let end = start.end();
            writer.write_token(&Token::Start(start))?;
            for (index, feature) in features.iter().enumerate() {
                if done[index] || !feature.eligible(state) {
                    continue;
                }
                let required = feature.list(writer, StartElement::new(feature.name()))?;
                listed.push((index, required));
            }
            writer.write_token(&end)?;
            writer.flush()?;
        }
        loop {
            if !listed
                .iter()
                .any(|(index, required)| *required && !done[*index])
            {
                return Ok(Round::Ready);
            }
            let (reader, _) = self.raw_streams()?;
            let token = loop {
                match reader.token()? {
                    Some(token) if token.is_whitespace() => continue,
                    Some(token) => break token,
                    None => return Err(Error::BadStream(description::STREAM_CLOSED)),
                }
            };
            // Selection elements like <auth/> differ from the advertised
            // <mechanisms/>, so features are matched by namespace.
            let Token::Start(start) = &token else {
                return Err(Error::UnexpectedPayload);
            };
            let Some(&(index, _)) = listed
                .iter()
                .find(|(index, _)| !done[*index] && features[*index].name().space == start.name.space)
            else {
                return Err(Error::UnexpectedPayload);
            };
            reader.unread(token);
            let restart = self.run_feature(features[index].as_ref(), FeatureData::Empty)?;
            done[index] = true;
            if restart {
                return Ok(Round::Restart);
            }
        }
    }

    // Returns true if the stream has to be restarted.
    fn run_feature(&mut self, feature: &dyn StreamFeature, data: FeatureData) -> Result<bool, Error> {
        let before = self.state;
        let mut data = data;
        let mut replaced = false;
        loop {
            let step = feature.negotiate(self, data)?;
            self.state |= step.state;
            if let Some(transport) = step.transport {
                self.install(transport);
                replaced = true;
            }
            match step.data {
                Some(next) => data = next,
                None => break,
            }
        }
        debug!(feature = %feature.name(), state = %self.state, "feature negotiated");
        let authenticated =
            !before.contains(SessionState::AUTHN) && self.state.contains(SessionState::AUTHN);
        Ok(replaced || authenticated)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<StreamWriter>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes a complete element and flushes it.
    pub fn send(&self, element: &Element) -> Result<(), Error> {
        trace!(stanza = %element.name, "sending");
        let mut guard = self.lock_writer();
        let Some(writer) = guard.as_mut() else {
            return Err(Error::Closed);
        };
        element.encode(writer)
    }

    /// Sends an IQ request and registers for its response.
    ///
    /// The response is routed back by the read loop of [serve()](Session::serve).
    pub fn send_iq(&self, iq: &Iq, payload: Option<Element>) -> Result<PendingIq, Error> {
        if !iq.kind.is_request() {
            return Err(Error::Usage("only get and set IQs have responses"));
        }
        let waiter = self.pending.register(&iq.id)?;
        let mut element = Element::from_start(iq.start_element());
        if let Some(payload) = payload {
            element = element.with_child(payload);
        }
        self.send(&element)?;
        Ok(waiter)
    }

    /// Buffered writer which sends everything written between flushes
    /// as one unit.
    pub fn writer(&self) -> StanzaWriter<'_> {
        StanzaWriter {
            session: self,
            tokens: Vec::new(),
        }
    }

    /// Starts the read loop on a new thread, dispatching every inbound
    /// stanza to `mux`.
    ///
    /// The loop ends when the peer closes the stream or a fatal error
    /// occurs. The session is closed afterwards.
    pub fn serve(self: &Arc<Self>, mux: Mux) -> Result<JoinHandle<Result<(), Error>>, Error> {
        if self.serving.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyServing);
        }
        let session = Arc::clone(self);
        let mux = mux.pending(self.pending.clone());
        let handle = thread::Builder::new()
            .name("iks-session".to_string())
            .spawn(move || {
                let result = session.read_loop(&mux);
                if let Err(err) = &result {
                    warn!(%err, "session read loop failed");
                }
                if let Err(err) = session.close() {
                    debug!(%err, "closing session after read loop");
                }
                result
            })?;
        Ok(handle)
    }

    fn read_loop(&self, handler: &dyn Handler) -> Result<(), Error> {
        let mut guard = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(reader) = guard.as_mut() else {
            return Err(Error::BadStream(description::NO_TRANSPORT));
        };
        loop {
            let start = match reader.token()? {
                Some(Token::Start(start)) => start,
                // Closing tag of the stream root
                Some(Token::End(_)) | None => return Ok(()),
                Some(_) => continue,
            };
            trace!(stanza = %start.name, "received");
            let mut inner = Inner::new(&mut *reader);
            let mut writer = self.writer();
            match handler
                .handle_xmpp(&mut inner, &mut writer, &start)
                .and_then(|()| writer.flush())
            {
                Ok(()) => (),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(%err, stanza = %start.name, "stanza handler failed"),
            }
            inner.drain()?;
        }
    }

    /// Ends the stream and fails all pending IQ waiters.
    ///
    /// Calling it more than once is harmless.
    pub fn close(&self) -> Result<(), Error> {
        self.pending.close();
        let mut guard = self.lock_writer();
        let Some(mut writer) = guard.take() else {
            return Ok(());
        };
        debug!("closing stream");
        let result = writer
            .write_raw(format!("</{STREAM_TAG}:{STREAM_TAG}>").as_bytes())
            .and_then(|()| writer.flush());
        writer.get_mut().shutdown()?;
        result
    }

    fn shutdown(&mut self) {
        self.pending.close();
        if let Some(mut writer) = self
            .writer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = writer.flush();
            let _ = writer.get_mut().shutdown();
        }
    }
}

/// Writer handed to stanza handlers.
///
/// Tokens are buffered until [flush()](TokenWriter::flush), which writes
/// them to the stream under a single lock so concurrent writers never
/// interleave inside a stanza. Unflushed tokens are discarded on drop.
pub struct StanzaWriter<'a> {
    session: &'a Session,
    tokens: Vec<Token>,
}

impl TokenWriter for StanzaWriter<'_> {
    fn write_token(&mut self, token: &Token) -> Result<(), Error> {
        self.tokens.push(token.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.tokens.is_empty() {
            return Ok(());
        }
        let mut guard = self.session.lock_writer();
        let Some(writer) = guard.as_mut() else {
            return Err(Error::Closed);
        };
        for token in self.tokens.drain(..) {
            writer.write_token(&token)?;
        }
        writer.flush()
    }
}

#[cfg(test)]
mod tests;
