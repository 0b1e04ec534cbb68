/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! Token level access to XML streams.
//!
//! XMPP never sees a complete document: the stream root stays open for
//! the whole session and everything happens one child element at a
//! time. This module exposes the stream as a pull based sequence of
//! namespace resolved [Token]s and a push based writer with explicit
//! flushing.

mod decoder;
mod element;
mod encoder;

use std::fmt::Display;

pub use decoder::Decoder;
pub use element::Element;
pub use element::ElementReader;
pub use element::Node;
pub use encoder::Encoder;

use crate::Error;

/// A namespace qualified XML name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    /// Namespace URI, empty if the name is not in any namespace.
    pub space: String,
    /// Local part of the name without any prefix.
    pub local: String,
}

impl Name {
    pub fn new(space: impl Into<String>, local: impl Into<String>) -> Self {
        Name {
            space: space.into(),
            local: local.into(),
        }
    }

    /// Creates a name without a namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Name {
            space: String::new(),
            local: local.into(),
        }
    }

    pub fn is(&self, space: &str, local: &str) -> bool {
        self.space == space && self.local == local
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.space.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.space, self.local)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: Name,
    pub value: String,
}

impl Attr {
    pub fn new(name: Name, value: impl Into<String>) -> Self {
        Attr {
            name,
            value: value.into(),
        }
    }
}

/// Start tag of an element with its attributes.
///
/// Namespace declarations are not part of the attribute list, they are
/// already resolved into the [Name]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: Name,
    pub attrs: Vec<Attr>,
}

impl StartElement {
    pub fn new(name: Name) -> Self {
        StartElement {
            name,
            attrs: Vec::new(),
        }
    }

    /// Appends an attribute without a namespace.
    pub fn with_attr(mut self, local: &str, value: impl Into<String>) -> Self {
        self.attrs.push(Attr::new(Name::local(local), value));
        self
    }

    /// Value of the first attribute with the given local name.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.local == local)
            .map(|attr| attr.value.as_str())
    }

    /// Sets or replaces an attribute without a namespace.
    pub fn set_attr(&mut self, local: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|attr| attr.name.local == local) {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attr::new(Name::local(local), value)),
        }
    }

    pub fn end(&self) -> Token {
        Token::End(self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Start(StartElement),
    End(Name),
    CharData(String),
    Comment(String),
}

impl Token {
    /// True for character data consisting only of XML whitespace.
    pub fn is_whitespace(&self) -> bool {
        match self {
            Token::CharData(text) => text
                .bytes()
                .all(|c| matches!(c, b' ' | b'\t' | b'\r' | b'\n')),
            _ => false,
        }
    }
}

/// Pull side of a token stream.
pub trait TokenReader {
    /// Returns the next token, or `None` at the end of the input.
    ///
    /// Reads from network transports block until a complete token is
    /// available.
    fn token(&mut self) -> Result<Option<Token>, Error>;
}

/// Push side of a token stream.
///
/// Tokens may be buffered, nothing is guaranteed to reach the wire
/// before [flush()](TokenWriter::flush) is called.
pub trait TokenWriter {
    fn write_token(&mut self, token: &Token) -> Result<(), Error>;
    fn flush(&mut self) -> Result<(), Error>;
}

impl<T: TokenReader + ?Sized> TokenReader for &mut T {
    fn token(&mut self) -> Result<Option<Token>, Error> {
        (**self).token()
    }
}

impl<T: TokenWriter + ?Sized> TokenWriter for &mut T {
    fn write_token(&mut self, token: &Token) -> Result<(), Error> {
        (**self).write_token(token)
    }

    fn flush(&mut self) -> Result<(), Error> {
        (**self).flush()
    }
}

/// Reader over the content of the element whose start tag was just read.
///
/// Returns `None` once the matching end tag is consumed, so the
/// underlying reader is left positioned right after the element. Nesting
/// works, an inner reader also ends where its parent reader ends.
pub struct Inner<'a, R: TokenReader + ?Sized> {
    reader: &'a mut R,
    depth: usize,
    done: bool,
}

impl<'a, R: TokenReader + ?Sized> Inner<'a, R> {
    pub fn new(reader: &'a mut R) -> Self {
        Inner {
            reader,
            depth: 0,
            done: false,
        }
    }

    /// Consumes whatever is left of the element.
    pub fn drain(&mut self) -> Result<(), Error> {
        while self.token()?.is_some() {}
        Ok(())
    }
}

impl<R: TokenReader + ?Sized> TokenReader for Inner<'_, R> {
    fn token(&mut self) -> Result<Option<Token>, Error> {
        if self.done {
            return Ok(None);
        }
        let Some(token) = self.reader.token()? else {
            self.done = true;
            // A reader which is itself scoped ends where our end tag would be.
            if self.depth == 0 {
                return Ok(None);
            }
            return Err(Error::BadStream(crate::xmpp::description::UNEXPECTED_EOF));
        };
        match &token {
            Token::Start(_) => self.depth += 1,
            Token::End(_) => {
                if self.depth == 0 {
                    self.done = true;
                    return Ok(None);
                }
                self.depth -= 1;
            }
            _ => (),
        }
        Ok(Some(token))
    }
}

/// Skips the rest of the element whose start tag was just read.
pub fn skip(reader: &mut (impl TokenReader + ?Sized)) -> Result<(), Error> {
    Inner::new(reader).drain()
}

/// Collects the character data of the element whose start tag was just
/// read, ignoring any nested markup. The end tag is consumed.
pub fn read_text(reader: &mut (impl TokenReader + ?Sized)) -> Result<String, Error> {
    let mut inner = Inner::new(reader);
    let mut text = String::new();
    let mut depth = 0usize;
    while let Some(token) = inner.token()? {
        match token {
            Token::Start(_) => depth += 1,
            Token::End(_) => depth -= 1,
            Token::CharData(data) if depth == 0 => text.push_str(&data),
            _ => (),
        }
    }
    Ok(text)
}
