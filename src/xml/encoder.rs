/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::io::BufWriter;
use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::BytesEnd;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;

use super::StartElement;
use super::Token;
use super::TokenWriter;
use crate::Error;
use crate::xmpp::constants::XML_NS;

/// Buffered token writer producing namespace qualified XML.
///
/// Element names never get prefixes, an element gets an `xmlns` attribute
/// when its namespace differs from the default namespace in scope.
/// Attributes in a namespace are written with a generated `nsN` prefix. Elements
/// without a namespace inherit whatever is in scope. Empty elements are
/// written with separate start and end tags.
pub struct Encoder<W: Write> {
    writer: Writer<BufWriter<W>>,
    default_ns: String,
    scopes: Vec<String>,
}

impl<W: Write> Encoder<W> {
    pub fn new(output: W) -> Self {
        Encoder {
            writer: Writer::new(BufWriter::new(output)),
            default_ns: String::new(),
            scopes: Vec::new(),
        }
    }

    /// Sets the namespace which is already in scope at the top level.
    ///
    /// Inside an XMPP stream this is the content namespace declared by
    /// the stream header, e.g. `jabber:client`.
    pub fn set_default_namespace(&mut self, space: &str) {
        self.default_ns = space.to_string();
        self.scopes.clear();
    }

    /// Writes bytes as is, bypassing the token structure.
    ///
    /// This is needed for the stream framing which opens a root element
    /// that is never closed by a matching token.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.writer.get_mut().write_all(bytes)?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref().get_ref()
    }

    pub fn get_mut(&mut self) -> &mut W {
        self.writer.get_mut().get_mut()
    }

    /// Flushes and releases the underlying output.
    pub fn into_inner(self) -> Result<W, Error> {
        self.writer
            .into_inner()
            .into_inner()
            .map_err(|err| Error::Io(err.into_error()))
    }

    fn start(&mut self, start: &StartElement) -> Result<(), Error> {
        let in_scope = self.scopes.last().unwrap_or(&self.default_ns);
        let space = if start.name.space.is_empty() {
            in_scope.clone()
        } else {
            start.name.space.clone()
        };
        let mut element = BytesStart::new(start.name.local.as_str());
        if space != *in_scope {
            element.push_attribute(("xmlns", space.as_str()));
        }
        // Namespaced attributes get a prefix declared on this element.
        let mut prefixed: Vec<&str> = Vec::new();
        for attr in &start.attrs {
            let value = attr.value.as_str();
            if attr.name.space.is_empty() {
                if attr.name.local != "xmlns" {
                    element.push_attribute((attr.name.local.as_str(), value));
                }
            } else if attr.name.space == XML_NS {
                let key = format!("xml:{}", attr.name.local);
                element.push_attribute((key.as_str(), value));
            } else {
                let index = match prefixed.iter().position(|ns| *ns == attr.name.space) {
                    Some(index) => index,
                    None => {
                        prefixed.push(attr.name.space.as_str());
                        let declaration = format!("xmlns:ns{}", prefixed.len() - 1);
                        element.push_attribute((declaration.as_str(), attr.name.space.as_str()));
                        prefixed.len() - 1
                    }
                };
                let key = format!("ns{index}:{}", attr.name.local);
                element.push_attribute((key.as_str(), value));
            }
        }
        self.writer.write_event(Event::Start(element))?;
        self.scopes.push(space);
        Ok(())
    }
}

impl<W: Write> TokenWriter for Encoder<W> {
    fn write_token(&mut self, token: &Token) -> Result<(), Error> {
        match token {
            Token::Start(start) => self.start(start)?,
            Token::End(name) => {
                self.scopes.pop();
                self.writer
                    .write_event(Event::End(BytesEnd::new(name.local.as_str())))?;
            }
            Token::CharData(text) => {
                self.writer
                    .write_event(Event::Text(BytesText::new(text.as_str())))?;
            }
            Token::Comment(text) => {
                self.writer
                    .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.writer.get_mut().flush()?;
        Ok(())
    }
}
