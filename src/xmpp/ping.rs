/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! XEP-0199: XMPP Ping.

use std::time::Duration;

use crate::xml::Element;
use crate::xml::Name;
use crate::xml::StartElement;
use crate::xml::TokenReader;
use crate::xml::TokenWriter;

use super::Error;
use super::Jid;
use super::constants::PING_NS;
use super::constants::STANZAS_NS;
use super::mux::IqHandler;
use super::mux::Mux;
use super::session::Session;
use super::stanza::Iq;
use super::stanza::IqType;

fn payload_name() -> Name {
    Name::new(PING_NS, "ping")
}

/// Answers ping requests with an empty result.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingHandler;

impl IqHandler for PingHandler {
    fn handle_iq(
        &self,
        iq: &Iq,
        _reader: &mut dyn TokenReader,
        writer: &mut dyn TokenWriter,
        payload: &StartElement,
    ) -> Result<(), Error> {
        if iq.kind != IqType::Get || payload.name != payload_name() {
            return Ok(());
        }
        Element::from_start(iq.result().start_element()).encode(writer)
    }
}

/// Adds the ping responder to a multiplexer.
pub fn register(mux: Mux) -> Mux {
    mux.iq(IqType::Get, payload_name(), PingHandler)
}

/// Pings `to` and waits for the answer.
///
/// The session must be served for the answer to arrive.
pub fn send(session: &Session, to: &Jid, timeout: Duration) -> Result<(), Error> {
    let iq = Iq::new(IqType::Get).to(to.full());
    let waiter = session.send_iq(&iq, Some(Element::new(payload_name())))?;
    let reply = waiter.wait(timeout)?;
    match reply.attr("type") {
        Some("result") => Ok(()),
        Some("error") => Err(Error::StanzaError(error_condition(&reply))),
        _ => Err(Error::UnexpectedPayload),
    }
}

fn error_condition(reply: &Element) -> String {
    reply
        .elements()
        .filter(|child| child.name.local == "error")
        .flat_map(Element::elements)
        .find(|condition| condition.name.space == STANZAS_NS)
        .map_or_else(
            || "undefined-condition".to_string(),
            |condition| condition.name.local.clone(),
        )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::xml::Decoder;
    use crate::xml::Encoder;
    use crate::xml::Inner;
    use crate::xml::Token;
    use crate::xmpp::mux::Handler;

    use super::*;

    fn handle(mux: &Mux, request: &str) -> String {
        let mut decoder = Decoder::new(request.as_bytes());
        let Some(Token::Start(start)) = decoder.token().unwrap() else {
            panic!("start expected");
        };
        let mut encoder = Encoder::new(Vec::new());
        mux.handle_xmpp(&mut Inner::new(&mut decoder), &mut encoder, &start).unwrap();
        assert_eq!(decoder.token().unwrap(), None);
        String::from_utf8(encoder.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn answers_ping() {
        let mux = register(Mux::new());
        let out = handle(
            &mux,
            "<iq xmlns='jabber:client' type='get' to='to@example.net' id='123'>\
             <ping xmlns='urn:xmpp:ping'/></iq>",
        );
        assert_eq!(
            out,
            r#"<iq xmlns="jabber:client" type="result" from="to@example.net" id="123"></iq>"#
        );
    }

    #[test]
    fn ignores_wrong_type() {
        let mux = Mux::new().iq(IqType::Set, payload_name(), PingHandler);
        let out = handle(
            &mux,
            "<iq type='set' id='1'><ping xmlns='urn:xmpp:ping'/></iq>",
        );
        assert_eq!(out, "");
    }

    #[test]
    fn ignores_wrong_payload() {
        let mux = Mux::new().iq(IqType::Get, Name::new(PING_NS, "badlocal"), PingHandler);
        let out = handle(
            &mux,
            "<iq type='get' id='1'><badlocal xmlns='urn:xmpp:ping'/></iq>",
        );
        assert_eq!(out, "");
    }

    #[test]
    fn error_reply_condition() {
        let reply = Element::new(Name::new("jabber:client", "iq"))
            .with_attr("type", "error")
            .with_child(
                Element::new(Name::local("error")).with_child(Element::new(Name::new(
                    STANZAS_NS,
                    "service-unavailable",
                ))),
            );
        assert_eq!(error_condition(&reply), "service-unavailable");
        assert_eq!(
            error_condition(&Element::new(Name::local("iq"))),
            "undefined-condition"
        );
    }

    #[test]
    fn handler_is_shareable() {
        let handler: Arc<dyn IqHandler> = Arc::new(PingHandler);
        let iq = Iq::new(IqType::Get).to("a@example.net");
        let mut encoder = Encoder::new(Vec::new());
        handler
            .handle_iq(
                &iq,
                &mut Element::new(payload_name()).inner_reader(),
                &mut encoder,
                &StartElement::new(payload_name()),
            )
            .unwrap();
        let out = String::from_utf8(encoder.into_inner().unwrap()).unwrap();
        assert!(out.starts_with(r#"<iq xmlns="jabber:client" type="result" from="a@example.net""#));
    }
}
