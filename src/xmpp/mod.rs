/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! XMPP stream negotiation and stanza routing.

#[cfg(feature = "tls")]
mod client;
pub mod constants;
mod error;
mod feature;
mod jid;
pub mod mux;
pub mod ping;
pub mod sasl;
mod session;
mod stanza;
#[cfg(feature = "tls")]
mod starttls;
mod state;
#[cfg(feature = "tls")]
pub mod tls;
mod transport;

#[cfg(feature = "tls")]
pub use client::XmppClient;
#[cfg(feature = "tls")]
pub use client::XmppClientBuilder;
pub use error::Error;
pub(crate) use error::description;
pub use feature::FeatureData;
pub use feature::Negotiated;
pub use feature::StreamFeature;
pub use jid::BadJid;
pub use jid::Jid;
pub use session::PendingIq;
pub use session::PendingIqs;
pub use session::Session;
pub use session::SessionBuilder;
pub use session::StanzaWriter;
pub use stanza::Iq;
pub use stanza::IqType;
pub use stanza::Kind;
#[cfg(feature = "tls")]
pub use starttls::StartTls;
pub use state::SessionState;
pub use transport::Transport;
pub use transport::WriteHalf;
pub use transport::duplex;
