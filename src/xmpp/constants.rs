/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! Protocol constants shared by the whole crate.

pub const CLIENT_PORT: u16 = 5222;

pub const STREAM_NS: &str = "http://etherx.jabber.org/streams";

pub const CLIENT_NS: &str = "jabber:client";

pub const SERVER_NS: &str = "jabber:server";

pub const SASL_NS: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

pub const TLS_NS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

pub const STANZAS_NS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

pub const PING_NS: &str = "urn:xmpp:ping";

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

pub const STREAM_TAG: &str = "stream";

pub const FEATURES_TAG: &str = "features";
