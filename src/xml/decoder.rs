/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::io::BufReader;
use std::io::Read;

use quick_xml::NsReader;
use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::name::ResolveResult;

use super::Attr;
use super::Name;
use super::StartElement;
use super::Token;
use super::TokenReader;
use crate::Error;
use crate::xmpp::constants::XML_NS;
use crate::xmpp::description;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Namespace aware pull tokenizer over a byte stream.
///
/// Empty element tags are reported as a start token followed by an end
/// token. XML declarations, processing instructions and document type
/// declarations are silently skipped since they have no meaning inside
/// an XMPP stream.
pub struct Decoder<R: Read> {
    reader: NsReader<BufReader<R>>,
    buffer: Vec<u8>,
    pushed: Option<Token>,
}

fn new_reader<R: Read>(input: BufReader<R>) -> NsReader<BufReader<R>> {
    let mut reader = NsReader::from_reader(input);
    reader.config_mut().expand_empty_elements = true;
    reader
}

fn utf8(bytes: &[u8]) -> Result<String, Error> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => Err(Error::BadStream(description::INVALID_UTF8)),
    }
}

fn namespace(result: ResolveResult) -> Result<String, Error> {
    match result {
        ResolveResult::Bound(ns) => utf8(ns.as_ref()),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(_) => Err(Error::BadStream(description::UNKNOWN_PREFIX)),
    }
}

impl<R: Read> Decoder<R> {
    pub fn new(input: R) -> Self {
        Decoder {
            reader: new_reader(BufReader::new(input)),
            buffer: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            pushed: None,
        }
    }

    /// Pushes a token back so the next [token()](TokenReader::token) call
    /// returns it again.
    ///
    /// Only a single token can be pending, a second push replaces the first.
    pub fn unread(&mut self, token: Token) {
        self.pushed = Some(token);
    }

    /// Starts parsing a new document on the same input.
    ///
    /// Used for stream restarts where the peer sends a fresh XML
    /// declaration and stream header. Bytes already buffered from the
    /// input are kept.
    pub fn restart(self) -> Self {
        Decoder {
            reader: new_reader(self.reader.into_inner()),
            buffer: self.buffer,
            pushed: None,
        }
    }

    /// Releases the underlying input.
    ///
    /// Fails if the decoder has read ahead bytes which were not consumed
    /// yet, since handing the input to someone else would lose them.
    pub fn into_inner(self) -> Result<R, Error> {
        let input = self.reader.into_inner();
        if self.pushed.is_some() || !input.buffer().is_empty() {
            return Err(Error::BadStream(description::UNREAD_DATA));
        }
        Ok(input.into_inner())
    }
}

fn start_element<R>(
    reader: &NsReader<R>,
    event: &quick_xml::events::BytesStart,
) -> Result<StartElement, Error> {
    let (result, local) = reader.resolve_element(event.name());
    let name = Name {
        space: namespace(result)?,
        local: utf8(local.as_ref())?,
    };
    let mut attrs = Vec::new();
    for attr in event.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let name = match attr.key.prefix() {
            Some(prefix) if prefix.as_ref() == b"xml" => Name {
                space: XML_NS.to_string(),
                local: utf8(attr.key.local_name().as_ref())?,
            },
            _ => {
                let (result, local) = reader.resolve_attribute(attr.key);
                Name {
                    space: namespace(result)?,
                    local: utf8(local.as_ref())?,
                }
            }
        };
        let value = attr.unescape_value()?.into_owned();
        attrs.push(Attr { name, value });
    }
    Ok(StartElement { name, attrs })
}

fn end_name<R>(reader: &NsReader<R>, qname: QName) -> Result<Name, Error> {
    let (result, local) = reader.resolve_element(qname);
    Ok(Name {
        space: namespace(result)?,
        local: utf8(local.as_ref())?,
    })
}

impl<R: Read> TokenReader for Decoder<R> {
    fn token(&mut self) -> Result<Option<Token>, Error> {
        if let Some(token) = self.pushed.take() {
            return Ok(Some(token));
        }
        loop {
            self.buffer.clear();
            let event = self.reader.read_event_into(&mut self.buffer)?;
            let token = match event {
                Event::Start(start) => Token::Start(start_element(&self.reader, &start)?),
                Event::End(end) => Token::End(end_name(&self.reader, end.name())?),
                Event::Text(text) => Token::CharData(text.unescape()?.into_owned()),
                Event::CData(data) => Token::CharData(utf8(&data.into_inner())?),
                Event::Comment(text) => Token::Comment(utf8(&text)?),
                Event::Eof => return Ok(None),
                // Declarations, processing instructions and doctypes
                _ => continue,
            };
            return Ok(Some(token));
        }
    }
}
