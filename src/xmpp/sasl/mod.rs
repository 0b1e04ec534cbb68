/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! SASL authentication as a stream feature, RFC 6120 section 6.

mod failure;
mod mechanism;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::xml::Element;
use crate::xml::Name;
use crate::xml::StartElement;
use crate::xml::Token;
use crate::xml::TokenReader;
use crate::xml::TokenWriter;
use crate::xml::read_text;
use crate::xml::skip;

pub use failure::Condition;
pub use failure::Failure;
pub use mechanism::Credentials;
pub use mechanism::Exchange;
pub use mechanism::Mechanism;
pub use mechanism::Plain;
pub use mechanism::Step;

use super::Error;
use super::constants::SASL_NS;
use super::description;
use super::feature::FeatureData;
use super::feature::Negotiated;
use super::feature::StreamFeature;
use super::session::Session;
use super::state::SessionState;

/// Decides whether a successfully authenticated client may proceed.
pub type Permissions = dyn Fn(&dyn Exchange) -> bool + Send + Sync;

fn encode_payload(data: &[u8]) -> String {
    STANDARD.encode(data)
}

// A lone "=" stands for an empty message.
fn decode_payload(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    STANDARD.decode(text)
}

fn list_mechanisms(
    writer: &mut dyn TokenWriter,
    start: StartElement,
    mechanisms: &[Arc<dyn Mechanism>],
) -> Result<bool, Error> {
    let end = start.end();
    writer.write_token(&Token::Start(start))?;
    for mechanism in mechanisms {
        Element::new(Name::new(SASL_NS, "mechanism"))
            .with_text(mechanism.name())
            .write_to(writer)?;
    }
    writer.write_token(&end)?;
    Ok(true)
}

fn parse_mechanisms(
    reader: &mut dyn TokenReader,
    start: &StartElement,
) -> Result<(bool, FeatureData), Error> {
    if !start.name.is(SASL_NS, "mechanisms") {
        return Err(Error::UnexpectedPayload);
    }
    let mut names = Vec::new();
    while let Some(token) = reader.token()? {
        let Token::Start(child) = token else {
            continue;
        };
        if child.name.is(SASL_NS, "mechanism") {
            names.push(read_text(reader)?.trim().to_string());
        } else {
            skip(reader)?;
        }
    }
    Ok((true, FeatureData::Mechanisms(names)))
}

// Next start element, skipping whitespace between elements.
fn next_start(reader: &mut dyn TokenReader) -> Result<StartElement, Error> {
    loop {
        match reader.token()? {
            Some(Token::Start(start)) => return Ok(start),
            Some(token) if token.is_whitespace() => continue,
            Some(_) => return Err(Error::UnexpectedPayload),
            None => return Err(Error::BadStream(description::UNEXPECTED_EOF)),
        }
    }
}

fn send_failure(writer: &mut dyn TokenWriter, condition: Condition) -> Result<(), Error> {
    debug!(%condition, "rejecting SASL exchange");
    Failure::new(condition).to_element().encode(writer)
}

fn feature_name() -> Name {
    Name::new(SASL_NS, "mechanisms")
}

/// SASL in the initiating entity role.
pub struct SaslClient {
    identity: String,
    password: String,
    mechanisms: Vec<Arc<dyn Mechanism>>,
}

impl SaslClient {
    /// Mechanisms are listed in order of preference.
    ///
    /// The username is the localpart of the session origin. `identity`
    /// is the authorization identity, leave it empty to act as yourself.
    pub fn new(
        identity: &str,
        password: &str,
        mechanisms: Vec<Arc<dyn Mechanism>>,
    ) -> Result<Self, Error> {
        if mechanisms.is_empty() {
            return Err(Error::Usage("SASL needs at least one mechanism"));
        }
        Ok(SaslClient {
            identity: identity.to_string(),
            password: password.to_string(),
            mechanisms,
        })
    }
}

impl StreamFeature for SaslClient {
    fn name(&self) -> Name {
        feature_name()
    }

    fn necessary(&self) -> SessionState {
        SessionState::RECEIVED
    }

    fn prohibited(&self) -> SessionState {
        SessionState::AUTHN
    }

    fn list(&self, writer: &mut dyn TokenWriter, start: StartElement) -> Result<bool, Error> {
        list_mechanisms(writer, start, &self.mechanisms)
    }

    fn parse(
        &self,
        reader: &mut dyn TokenReader,
        start: &StartElement,
    ) -> Result<(bool, FeatureData), Error> {
        parse_mechanisms(reader, start)
    }

    fn negotiate(&self, session: &mut Session, data: FeatureData) -> Result<Negotiated, Error> {
        let offered = match data {
            FeatureData::Mechanisms(names) => names,
            FeatureData::Empty => Vec::new(),
        };
        let mechanism = self
            .mechanisms
            .iter()
            .find(|mechanism| offered.iter().any(|name| name == mechanism.name()))
            .ok_or(Error::NoSupportedMechanism)?;
        let credentials = Credentials {
            authzid: self.identity.clone(),
            username: session.origin().localpart().unwrap_or_default().to_string(),
            password: self.password.clone(),
        };
        debug!(mechanism = mechanism.name(), "starting SASL exchange");
        let mut exchange = mechanism.client(&credentials);
        let initial = exchange.step(&[])?;

        let (reader, writer) = session.streams()?;
        let payload = if initial.data.is_empty() {
            "=".to_string()
        } else {
            encode_payload(&initial.data)
        };
        Element::new(Name::new(SASL_NS, "auth"))
            .with_attr("mechanism", mechanism.name())
            .with_text(payload)
            .encode(writer)?;

        loop {
            let start = next_start(reader)?;
            if start.name.space != SASL_NS {
                return Err(Error::UnexpectedPayload);
            }
            match start.name.local.as_str() {
                "challenge" => {
                    let challenge = decode_payload(&read_text(reader)?)?;
                    let step = exchange.step(&challenge)?;
                    Element::new(Name::new(SASL_NS, "response"))
                        .with_text(encode_payload(&step.data))
                        .encode(writer)?;
                }
                "success" => {
                    let additional = decode_payload(&read_text(reader)?)?;
                    if !additional.is_empty() {
                        exchange.step(&additional)?;
                    }
                    debug!(mechanism = mechanism.name(), "authenticated");
                    return Ok(Negotiated::done(SessionState::AUTHN));
                }
                "failure" => {
                    let failure = Failure::decode(reader)?;
                    return Err(Error::Failure(failure));
                }
                _ => return Err(Error::UnexpectedPayload),
            }
        }
    }
}

/// SASL in the receiving entity role.
pub struct SaslServer {
    permissions: Box<Permissions>,
    mechanisms: Vec<Arc<dyn Mechanism>>,
}

impl SaslServer {
    /// `permissions` is consulted after a mechanism completes, it sees
    /// the finished exchange and the credentials it carries.
    pub fn new(
        permissions: impl Fn(&dyn Exchange) -> bool + Send + Sync + 'static,
        mechanisms: Vec<Arc<dyn Mechanism>>,
    ) -> Result<Self, Error> {
        if mechanisms.is_empty() {
            return Err(Error::Usage("SASL needs at least one mechanism"));
        }
        Ok(SaslServer {
            permissions: Box::new(permissions),
            mechanisms,
        })
    }

    fn authenticate(
        &self,
        reader: &mut dyn TokenReader,
        writer: &mut dyn TokenWriter,
        start: &StartElement,
    ) -> Result<Negotiated, Error> {
        let name = start.attr("mechanism").unwrap_or_default().to_string();
        let initial = read_text(reader)?;
        let Some(mechanism) = self.mechanisms.iter().find(|m| m.name() == name) else {
            send_failure(writer, Condition::InvalidMechanism)?;
            return Err(Error::Failure(Failure::new(Condition::InvalidMechanism)));
        };
        let Ok(mut input) = decode_payload(&initial) else {
            send_failure(writer, Condition::IncorrectEncoding)?;
            return Err(Error::Failure(Failure::new(Condition::IncorrectEncoding)));
        };
        debug!(mechanism = %name, "client started SASL exchange");
        let mut exchange = mechanism.server();
        loop {
            let step = match exchange.step(&input) {
                Ok(step) => step,
                Err(err) => {
                    send_failure(writer, Condition::MalformedRequest)?;
                    return Err(err);
                }
            };
            if !step.more {
                if !(self.permissions)(exchange.as_ref()) {
                    send_failure(writer, Condition::NotAuthorized)?;
                    return Err(Error::Authn);
                }
                let mut success = Element::new(Name::new(SASL_NS, "success"));
                if !step.data.is_empty() {
                    success = success.with_text(encode_payload(&step.data));
                }
                success.encode(writer)?;
                debug!(mechanism = %name, "client authenticated");
                return Ok(Negotiated::done(SessionState::AUTHN));
            }
            Element::new(Name::new(SASL_NS, "challenge"))
                .with_text(encode_payload(&step.data))
                .encode(writer)?;
            // Anything but an element is rejected without writing a failure.
            let next = next_start(reader)?;
            if next.name.is(SASL_NS, "abort") {
                skip(reader)?;
                send_failure(writer, Condition::Aborted)?;
                return Err(Error::Terminated);
            }
            if !next.name.is(SASL_NS, "response") {
                skip(reader)?;
                send_failure(writer, Condition::MalformedRequest)?;
                return Err(Error::UnexpectedPayload);
            }
            input = match decode_payload(&read_text(reader)?) {
                Ok(input) => input,
                Err(_) => {
                    send_failure(writer, Condition::IncorrectEncoding)?;
                    return Err(Error::Failure(Failure::new(Condition::IncorrectEncoding)));
                }
            };
        }
    }
}

impl StreamFeature for SaslServer {
    fn name(&self) -> Name {
        feature_name()
    }

    fn necessary(&self) -> SessionState {
        SessionState::RECEIVED
    }

    fn prohibited(&self) -> SessionState {
        SessionState::AUTHN
    }

    fn list(&self, writer: &mut dyn TokenWriter, start: StartElement) -> Result<bool, Error> {
        list_mechanisms(writer, start, &self.mechanisms)
    }

    fn parse(
        &self,
        reader: &mut dyn TokenReader,
        start: &StartElement,
    ) -> Result<(bool, FeatureData), Error> {
        parse_mechanisms(reader, start)
    }

    fn negotiate(&self, session: &mut Session, _data: FeatureData) -> Result<Negotiated, Error> {
        let (reader, writer) = session.streams()?;
        let start = next_start(reader)?;
        if start.name.space == SASL_NS {
            match start.name.local.as_str() {
                "auth" => return self.authenticate(reader, writer, &start),
                "failure" => {
                    let failure = Failure::decode(reader)?;
                    return Err(Error::Failure(failure));
                }
                "abort" => {
                    skip(reader)?;
                    send_failure(writer, Condition::Aborted)?;
                    return Err(Error::Terminated);
                }
                _ => (),
            }
        }
        skip(reader)?;
        send_failure(writer, Condition::MalformedRequest)?;
        Err(Error::UnexpectedPayload)
    }
}
