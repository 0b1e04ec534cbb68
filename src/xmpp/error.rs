/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use thiserror::Error;

use super::jid::BadJid;
use super::sasl::Failure;

/// Errors from stream negotiation, authentication and stanza routing.
///
/// Variants are kept distinct where the caller might act differently,
/// e.g. a [Failure] carries the SASL condition so a client can decide
/// whether trying another mechanism makes sense, and [Error::Terminated]
/// separates a peer giving up from a peer being rejected.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport level failure. Always fatal for the session.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream is not well-formed XML.
    #[error("invalid XML syntax: {0}")]
    BadXml(#[from] quick_xml::Error),

    /// The XML is fine but does not follow the stream framing rules.
    #[error("invalid stream protocol: {0}")]
    BadStream(&'static str),

    /// Received element is not one of the alternatives allowed at that
    /// point of the negotiation.
    #[error("unexpected payload")]
    UnexpectedPayload,

    /// Peer reported a SASL failure.
    #[error("authentication failed: {0}")]
    Failure(Failure),

    /// Credentials were valid for the mechanism but permission was denied.
    #[error("authentication rejected")]
    Authn,

    /// Peer aborted the authentication exchange.
    #[error("negotiation terminated by peer")]
    Terminated,

    #[error("no supported SASL mechanism")]
    NoSupportedMechanism,

    /// The mechanism engine could not process a message.
    #[error("SASL mechanism error: {0}")]
    Mechanism(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// API called in a way which can never work.
    #[error("invalid usage: {0}")]
    Usage(&'static str),

    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("session is closed")]
    Closed,

    #[error("timed out waiting for response")]
    Timeout,

    #[error("session is already being served")]
    AlreadyServing,

    /// A handler tried to answer an IQ request more than once.
    #[error("IQ response already sent")]
    DuplicateResponse,

    #[error(transparent)]
    BadJid(#[from] BadJid),

    /// Peer answered a request with an error stanza.
    #[error("stanza error: {0}")]
    StanzaError(String),
}

impl Error {
    /// True for errors after which the stream cannot be used anymore.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_) | Error::BadXml(_) | Error::BadStream(_) | Error::Closed => true,
            #[cfg(feature = "tls")]
            Error::Tls(_) => true,
            _ => false,
        }
    }
}

pub(crate) mod description {
    pub(crate) const UNEXPECTED_EOF: &str = "stream ended in the middle of an element";
    pub(crate) const INVALID_UTF8: &str = "names and text must be valid UTF-8";
    pub(crate) const UNKNOWN_PREFIX: &str = "namespace prefix is not declared";
    pub(crate) const UNREAD_DATA: &str = "buffered data would be lost on transport release";
    pub(crate) const NO_HEADER: &str = "expected stream header";
    pub(crate) const NO_FEATURES: &str = "expected stream features";
    pub(crate) const NO_TRANSPORT: &str = "transport was released and not replaced";
    pub(crate) const STREAM_CLOSED: &str = "peer closed the stream during negotiation";
    pub(crate) const TLS_REFUSED: &str = "peer refused STARTTLS";
}
