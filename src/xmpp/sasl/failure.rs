/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::fmt::Display;

use crate::xml::Element;
use crate::xml::Name;
use crate::xml::Token;
use crate::xml::TokenReader;
use crate::xml::read_text;
use crate::xml::skip;
use crate::xmpp::Error;
use crate::xmpp::constants::SASL_NS;
use crate::xmpp::constants::XML_NS;

/// SASL failure conditions, RFC 6120 section 6.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Aborted,
    AccountDisabled,
    CredentialsExpired,
    EncryptionRequired,
    IncorrectEncoding,
    InvalidAuthzid,
    InvalidMechanism,
    MalformedRequest,
    MechanismTooWeak,
    NotAuthorized,
    TemporaryAuthFailure,
}

const CONDITIONS: [(Condition, &str); 11] = [
    (Condition::Aborted, "aborted"),
    (Condition::AccountDisabled, "account-disabled"),
    (Condition::CredentialsExpired, "credentials-expired"),
    (Condition::EncryptionRequired, "encryption-required"),
    (Condition::IncorrectEncoding, "incorrect-encoding"),
    (Condition::InvalidAuthzid, "invalid-authzid"),
    (Condition::InvalidMechanism, "invalid-mechanism"),
    (Condition::MalformedRequest, "malformed-request"),
    (Condition::MechanismTooWeak, "mechanism-too-weak"),
    (Condition::NotAuthorized, "not-authorized"),
    (Condition::TemporaryAuthFailure, "temporary-auth-failure"),
];

impl Condition {
    pub fn as_str(self) -> &'static str {
        CONDITIONS
            .iter()
            .find(|(condition, _)| *condition == self)
            .map_or("not-authorized", |(_, name)| *name)
    }

    pub fn parse(name: &str) -> Option<Condition> {
        CONDITIONS
            .iter()
            .find(|(_, local)| *local == name)
            .map(|(condition, _)| *condition)
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a `<failure/>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub condition: Condition,
    pub lang: Option<String>,
    pub text: Option<String>,
}

impl Failure {
    pub fn new(condition: Condition) -> Self {
        Failure {
            condition,
            lang: None,
            text: None,
        }
    }

    pub fn with_text(mut self, lang: Option<&str>, text: &str) -> Self {
        self.lang = lang.map(str::to_string);
        self.text = Some(text.to_string());
        self
    }

    /// Decodes the content of a `<failure/>` element whose start tag was
    /// just read. The end tag is consumed.
    ///
    /// Missing or unknown conditions decode as not-authorized.
    pub fn decode(reader: &mut (impl TokenReader + ?Sized)) -> Result<Failure, Error> {
        let mut failure = Failure::new(Condition::NotAuthorized);
        loop {
            let Some(token) = reader.token()? else {
                return Err(Error::BadStream(crate::xmpp::description::UNEXPECTED_EOF));
            };
            let start = match token {
                Token::Start(start) => start,
                Token::End(_) => return Ok(failure),
                _ => continue,
            };
            if !(start.name.space == SASL_NS || start.name.space.is_empty()) {
                skip(reader)?;
                continue;
            }
            if start.name.local == "text" {
                failure.lang = start
                    .attrs
                    .iter()
                    .find(|attr| attr.name.is(XML_NS, "lang"))
                    .map(|attr| attr.value.clone());
                failure.text = Some(read_text(reader)?);
                continue;
            }
            if let Some(condition) = Condition::parse(&start.name.local) {
                failure.condition = condition;
            }
            skip(reader)?;
        }
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::new(Name::new(SASL_NS, "failure"))
            .with_child(Element::new(Name::local(self.condition.as_str())));
        if let Some(text) = &self.text {
            let mut child = Element::new(Name::local("text")).with_text(text.as_str());
            if let Some(lang) = &self.lang {
                child.attrs.push(crate::xml::Attr::new(
                    Name::new(XML_NS, "lang"),
                    lang.as_str(),
                ));
            }
            element = element.with_child(child);
        }
        element
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}: {}", self.condition, text),
            None => write!(f, "{}", self.condition),
        }
    }
}
