/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! Stanza envelopes.

use std::fmt::Display;

use uuid::Uuid;

use crate::xml::Name;
use crate::xml::StartElement;

use super::Error;
use super::constants::CLIENT_NS;
use super::constants::SERVER_NS;
use super::constants::XML_NS;

/// The three kinds of top level stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Iq,
    Message,
    Presence,
}

impl Kind {
    /// Classifies a top level element by its local name.
    ///
    /// Stanzas in the client or server content namespace count, as well
    /// as elements without a namespace.
    pub fn classify(name: &Name) -> Option<Kind> {
        if !(name.space.is_empty() || name.space == CLIENT_NS || name.space == SERVER_NS) {
            return None;
        }
        match name.local.as_str() {
            "iq" => Some(Kind::Iq),
            "message" => Some(Kind::Message),
            "presence" => Some(Kind::Presence),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    pub fn parse(value: &str) -> Option<IqType> {
        match value {
            "get" => Some(IqType::Get),
            "set" => Some(IqType::Set),
            "result" => Some(IqType::Result),
            "error" => Some(IqType::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IqType::Get => "get",
            IqType::Set => "set",
            IqType::Result => "result",
            IqType::Error => "error",
        }
    }

    /// Requests expect exactly one response, results and errors are
    /// responses themselves.
    pub fn is_request(self) -> bool {
        matches!(self, IqType::Get | IqType::Set)
    }
}

impl Display for IqType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes of an `<iq/>` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iq {
    pub id: String,
    pub kind: IqType,
    pub to: Option<String>,
    pub from: Option<String>,
    pub lang: Option<String>,
}

impl Iq {
    /// Creates an IQ with a fresh random id.
    pub fn new(kind: IqType) -> Self {
        Iq {
            id: Uuid::new_v4().to_string(),
            kind,
            to: None,
            from: None,
            lang: None,
        }
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn from_start(start: &StartElement) -> Result<Iq, Error> {
        let kind = start
            .attr("type")
            .and_then(IqType::parse)
            .ok_or(Error::UnexpectedPayload)?;
        let mut iq = Iq {
            id: String::new(),
            kind,
            to: None,
            from: None,
            lang: None,
        };
        for attr in &start.attrs {
            if attr.name.space == XML_NS {
                if attr.name.local == "lang" {
                    iq.lang = Some(attr.value.clone());
                }
                continue;
            }
            match attr.name.local.as_str() {
                "id" => iq.id = attr.value.clone(),
                "to" => iq.to = Some(attr.value.clone()),
                "from" => iq.from = Some(attr.value.clone()),
                _ => (),
            }
        }
        Ok(iq)
    }

    pub fn start_element(&self) -> StartElement {
        let mut start = StartElement::new(Name::new(CLIENT_NS, "iq"))
            .with_attr("type", self.kind.as_str());
        if let Some(from) = &self.from {
            start = start.with_attr("from", from.as_str());
        }
        if let Some(to) = &self.to {
            start = start.with_attr("to", to.as_str());
        }
        start.with_attr("id", self.id.as_str())
    }

    /// Envelope of a successful response to this request.
    pub fn result(&self) -> Iq {
        self.response(IqType::Result)
    }

    /// Envelope of an error response to this request.
    pub fn error(&self) -> Iq {
        self.response(IqType::Error)
    }

    fn response(&self, kind: IqType) -> Iq {
        Iq {
            id: self.id.clone(),
            kind,
            to: self.from.clone(),
            from: self.to.clone(),
            lang: None,
        }
    }
}
