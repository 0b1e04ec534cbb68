/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! STARTTLS stream feature, RFC 6120 section 5.

use std::sync::Arc;

use rustls::ClientConfig;
use rustls::ServerConfig;
use tracing::debug;

use crate::xml::Element;
use crate::xml::Name;
use crate::xml::StartElement;
use crate::xml::Token;
use crate::xml::TokenReader;
use crate::xml::TokenWriter;
use crate::xml::skip;

use super::Error;
use super::constants::TLS_NS;
use super::description;
use super::feature::FeatureData;
use super::feature::Negotiated;
use super::feature::StreamFeature;
use super::session::Session;
use super::state::SessionState;
use super::tls;

enum Role {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

/// Upgrades the transport to TLS.
pub struct StartTls {
    role: Role,
    required: bool,
}

impl StartTls {
    pub fn client(config: Arc<ClientConfig>) -> Self {
        StartTls {
            role: Role::Client(config),
            required: true,
        }
    }

    pub fn server(config: Arc<ServerConfig>) -> Self {
        StartTls {
            role: Role::Server(config),
            required: true,
        }
    }

    /// Whether the server advertises the upgrade as mandatory. A client
    /// only negotiates required features.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

fn next_element(reader: &mut dyn TokenReader) -> Result<StartElement, Error> {
    loop {
        match reader.token()? {
            Some(Token::Start(start)) => return Ok(start),
            Some(token) if token.is_whitespace() => continue,
            Some(_) => return Err(Error::UnexpectedPayload),
            None => return Err(Error::BadStream(description::UNEXPECTED_EOF)),
        }
    }
}

impl StreamFeature for StartTls {
    fn name(&self) -> Name {
        Name::new(TLS_NS, "starttls")
    }

    fn necessary(&self) -> SessionState {
        SessionState::RECEIVED
    }

    fn prohibited(&self) -> SessionState {
        SessionState::SECURE | SessionState::AUTHN
    }

    fn list(&self, writer: &mut dyn TokenWriter, start: StartElement) -> Result<bool, Error> {
        let mut element = Element::from_start(start);
        if self.required {
            element = element.with_child(Element::new(Name::new(TLS_NS, "required")));
        }
        element.write_to(writer)?;
        Ok(self.required)
    }

    fn parse(
        &self,
        reader: &mut dyn TokenReader,
        start: &StartElement,
    ) -> Result<(bool, FeatureData), Error> {
        if start.name != self.name() {
            return Err(Error::UnexpectedPayload);
        }
        let mut required = false;
        while let Some(token) = reader.token()? {
            if let Token::Start(child) = token {
                if child.name.is(TLS_NS, "required") {
                    required = true;
                }
                skip(reader)?;
            }
        }
        Ok((required, FeatureData::Empty))
    }

    fn negotiate(&self, session: &mut Session, _data: FeatureData) -> Result<Negotiated, Error> {
        let (reader, writer) = session.streams()?;
        match &self.role {
            Role::Client(config) => {
                Element::new(Name::new(TLS_NS, "starttls")).encode(writer)?;
                let answer = next_element(reader)?;
                skip(reader)?;
                if answer.name.is(TLS_NS, "failure") {
                    return Err(Error::BadStream(description::TLS_REFUSED));
                }
                if !answer.name.is(TLS_NS, "proceed") {
                    return Err(Error::UnexpectedPayload);
                }
                let domain = session.location().domainpart().to_string();
                let transport = session.release_transport()?;
                debug!(%domain, "starting TLS handshake");
                Ok(Negotiated {
                    state: SessionState::SECURE,
                    transport: Some(tls::client(transport, config.clone(), &domain)?),
                    data: None,
                })
            }
            Role::Server(config) => {
                let request = next_element(reader)?;
                skip(reader)?;
                if !request.name.is(TLS_NS, "starttls") {
                    Element::new(Name::new(TLS_NS, "failure")).encode(writer)?;
                    return Err(Error::UnexpectedPayload);
                }
                Element::new(Name::new(TLS_NS, "proceed")).encode(writer)?;
                let transport = session.release_transport()?;
                debug!("accepting TLS handshake");
                Ok(Negotiated {
                    state: SessionState::SECURE,
                    transport: Some(tls::server(transport, config.clone())?),
                    data: None,
                })
            }
        }
    }
}
