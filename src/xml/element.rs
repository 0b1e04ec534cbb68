/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::collections::VecDeque;
use std::fmt::Display;

use super::Attr;
use super::Encoder;
use super::Name;
use super::StartElement;
use super::Token;
use super::TokenReader;
use super::TokenWriter;
use crate::Error;
use crate::xmpp::description;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An owned XML element tree.
///
/// Stanzas are small, so materializing them is cheap and lets the
/// routing code look at the whole element before deciding who gets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: Name,
    pub attrs: Vec<Attr>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: Name) -> Self {
        Element {
            name,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn from_start(start: StartElement) -> Self {
        Element {
            name: start.name,
            attrs: start.attrs,
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, local: &str, value: impl Into<String>) -> Self {
        self.set_attr(local, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.local == local)
            .map(|attr| attr.value.as_str())
    }

    pub fn set_attr(&mut self, local: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|attr| attr.name.local == local) {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attr::new(Name::local(local), value)),
        }
    }

    /// Child elements, skipping any character data.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Concatenated character data of the direct children.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.children {
            if let Node::Text(data) = node {
                text.push_str(data);
            }
        }
        text
    }

    pub fn start(&self) -> StartElement {
        StartElement {
            name: self.name.clone(),
            attrs: self.attrs.clone(),
        }
    }

    /// Builds the element whose start tag was just read from the reader.
    ///
    /// Reading stops after the matching end tag. Comments are dropped.
    pub fn read_from(
        reader: &mut (impl TokenReader + ?Sized),
        start: StartElement,
    ) -> Result<Element, Error> {
        build(reader, start, false)
    }

    /// Builds the element from a reader scoped to its content, like the
    /// one a [Handler](crate::xmpp::mux::Handler) gets.
    ///
    /// The end of the reader closes the element. A matching end tag is
    /// accepted too, so an unscoped reader works as well.
    pub fn read_content(
        reader: &mut (impl TokenReader + ?Sized),
        start: StartElement,
    ) -> Result<Element, Error> {
        build(reader, start, true)
    }

    /// Writes the element tokens without flushing.
    pub fn write_to(&self, writer: &mut (impl TokenWriter + ?Sized)) -> Result<(), Error> {
        writer.write_token(&Token::Start(self.start()))?;
        for node in &self.children {
            match node {
                Node::Element(element) => element.write_to(writer)?,
                Node::Text(text) => writer.write_token(&Token::CharData(text.clone()))?,
            }
        }
        writer.write_token(&Token::End(self.name.clone()))
    }

    /// Writes the element and flushes the writer exactly once.
    pub fn encode(&self, writer: &mut (impl TokenWriter + ?Sized)) -> Result<(), Error> {
        self.write_to(writer)?;
        writer.flush()
    }

    /// Token reader over the content of the element only.
    ///
    /// This is the view a handler gets after the start tag has been read,
    /// it ends right before the closing tag.
    pub fn inner_reader(&self) -> ElementReader {
        let mut tokens = VecDeque::new();
        self.collect_tokens(&mut tokens);
        tokens.pop_front();
        tokens.pop_back();
        ElementReader { tokens }
    }

    fn collect_tokens(&self, tokens: &mut VecDeque<Token>) {
        tokens.push_back(Token::Start(self.start()));
        for node in &self.children {
            match node {
                Node::Element(element) => element.collect_tokens(tokens),
                Node::Text(text) => tokens.push_back(Token::CharData(text.clone())),
            }
        }
        tokens.push_back(Token::End(self.name.clone()));
    }
}

fn build(
    reader: &mut (impl TokenReader + ?Sized),
    start: StartElement,
    scoped: bool,
) -> Result<Element, Error> {
    let mut stack = vec![Element::from_start(start)];
    loop {
        let token = match reader.token()? {
            Some(token) => token,
            None if scoped && stack.len() == 1 => {
                return stack.pop().ok_or(Error::BadStream(description::UNEXPECTED_EOF));
            }
            None => return Err(Error::BadStream(description::UNEXPECTED_EOF)),
        };
        match token {
            Token::Start(start) => stack.push(Element::from_start(start)),
            Token::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(Error::BadStream(description::UNEXPECTED_EOF));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => return Ok(element),
                }
            }
            Token::CharData(text) => {
                if let Some(current) = stack.last_mut() {
                    current.children.push(Node::Text(text));
                }
            }
            Token::Comment(_) => (),
        }
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut encoder = Encoder::new(Vec::new());
        self.encode(&mut encoder).map_err(|_| std::fmt::Error)?;
        let bytes = encoder.into_inner().map_err(|_| std::fmt::Error)?;
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

/// Token reader over a materialized element.
#[derive(Debug, Clone)]
pub struct ElementReader {
    tokens: VecDeque<Token>,
}

impl TokenReader for ElementReader {
    fn token(&mut self) -> Result<Option<Token>, Error> {
        Ok(self.tokens.pop_front())
    }
}
