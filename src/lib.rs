/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! Negotiation and routing core of an XMPP endpoint.
//!
//! A [Session] is created by running the stream feature negotiation
//! ([SessionBuilder]) over a [Transport]. Once ready, inbound stanzas are
//! dispatched by a [Mux] and IQ requests sent through the session are
//! correlated with their responses.

pub mod xml;
pub mod xmpp;

pub use xmpp::Error;
pub use xmpp::Jid;
pub use xmpp::Session;
pub use xmpp::SessionBuilder;
pub use xmpp::SessionState;
pub use xmpp::Transport;
pub use xmpp::mux::Mux;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
