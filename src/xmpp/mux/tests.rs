/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::sync::Mutex;
use std::time::Duration;

use crate::xml::Decoder;
use crate::xml::Encoder;
use crate::xml::Inner;
use crate::xml::skip;
use crate::xmpp::constants::PING_NS;
use crate::xmpp::ping::PingHandler;

use super::*;

struct Twice;

impl IqHandler for Twice {
    fn handle_iq(
        &self,
        iq: &Iq,
        _reader: &mut dyn TokenReader,
        writer: &mut dyn TokenWriter,
        _payload: &StartElement,
    ) -> Result<(), Error> {
        Element::from_start(iq.result().start_element()).write_to(writer)?;
        Element::from_start(iq.result().start_element()).write_to(writer)?;
        writer.flush()
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn seen(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Handler for Arc<Recorder> {
    fn handle_xmpp(
        &self,
        reader: &mut dyn TokenReader,
        _writer: &mut dyn TokenWriter,
        start: &StartElement,
    ) -> Result<(), Error> {
        self.0.lock().unwrap().push(start.name.local.clone());
        skip(reader)
    }
}

fn ping_mux() -> Mux {
    Mux::new().iq(IqType::Get, Name::new(PING_NS, "ping"), PingHandler)
}

fn handle(mux: &Mux, stanza: &str) -> (Result<(), Error>, String) {
    let mut decoder = Decoder::new(stanza.as_bytes());
    let Some(Token::Start(start)) = decoder.token().unwrap() else {
        panic!("start expected");
    };
    let mut encoder = Encoder::new(Vec::new());
    encoder.set_default_namespace("jabber:client");
    // Same scoping as the session read loop.
    let mut inner = Inner::new(&mut decoder);
    let result = mux.handle_xmpp(&mut inner, &mut encoder, &start);
    if result.is_ok() {
        assert_eq!(inner.token().unwrap(), None);
    }
    inner.drain().unwrap();
    assert_eq!(decoder.token().unwrap(), None);
    let out = String::from_utf8(encoder.into_inner().unwrap()).unwrap();
    (result, out)
}

#[test]
fn ping_gets_one_response() {
    let (result, out) = handle(
        &ping_mux(),
        "<iq xmlns='jabber:client' type='get' id='p1' from='juliet@example.com/balcony'>\
         <ping xmlns='urn:xmpp:ping'/></iq>",
    );
    result.unwrap();
    assert_eq!(
        out,
        r#"<iq type="result" to="juliet@example.com/balcony" id="p1"></iq>"#
    );
}

#[test]
fn unmatched_request_is_silent() {
    let mux = ping_mux();
    for stanza in [
        "<iq type='get' id='1'><query xmlns='jabber:iq:version'/></iq>",
        "<iq type='set' id='2'><ping xmlns='urn:xmpp:ping'/></iq>",
        "<iq type='get' id='3'></iq>",
        "<iq type='get' id='4'><ping xmlns='urn:xmpp:ping'/><ping xmlns='urn:xmpp:ping'/></iq>",
    ] {
        let (result, out) = handle(&mux, stanza);
        result.unwrap();
        assert_eq!(out, "", "{stanza}");
    }
}

#[test]
fn stanzas_in_other_namespaces_are_not_routed() {
    let (result, out) = handle(
        &ping_mux(),
        "<iq xmlns='jabber:component:accept' type='get' id='1'>\
         <ping xmlns='urn:xmpp:ping'/></iq>",
    );
    result.unwrap();
    assert_eq!(out, "");

    let (result, out) = handle(
        &ping_mux(),
        "<iq xmlns='jabber:server' type='get' id='1'><ping xmlns='urn:xmpp:ping'/></iq>",
    );
    result.unwrap();
    assert!(out.starts_with("<iq type=\"result\""));
}

#[test]
fn second_response_is_refused() {
    let mux = Mux::new().iq(IqType::Get, Name::new(PING_NS, "ping"), Twice);
    let (result, out) = handle(
        &mux,
        "<iq type='get' id='1'><ping xmlns='urn:xmpp:ping'/></iq>",
    );
    assert!(matches!(result, Err(Error::DuplicateResponse)));
    assert_eq!(out, r#"<iq type="result" id="1"></iq>"#);
}

#[test]
fn responses_complete_pending_requests() {
    let pending = PendingIqs::new();
    let waiter = pending.register("r1").unwrap();
    let mux = ping_mux().pending(pending.clone());

    let (result, out) = handle(&mux, "<iq type='result' id='unknown'/>");
    result.unwrap();
    assert_eq!(out, "");
    assert_eq!(pending.len(), 1);

    let (result, out) = handle(
        &mux,
        "<iq type='result' id='r1'><pong xmlns='urn:example'/></iq>",
    );
    result.unwrap();
    assert_eq!(out, "");
    let response = waiter.wait(Duration::from_secs(1)).unwrap();
    assert_eq!(response.attr("id"), Some("r1"));
    assert_eq!(response.elements().count(), 1);
    assert!(pending.is_empty());
}

#[test]
fn cancelled_request_drops_response() {
    let pending = PendingIqs::new();
    let waiter = pending.register("c1").unwrap();
    waiter.cancel();
    assert!(pending.is_empty());
    let mux = Mux::new().pending(pending.clone());
    let (result, _) = handle(&mux, "<iq type='error' id='c1'/>");
    result.unwrap();
    assert!(pending.is_empty());
}

#[test]
fn routes_by_stanza_kind() {
    let messages = Arc::new(Recorder::default());
    let presences = Arc::new(Recorder::default());
    let others = Arc::new(Recorder::default());
    let mux = Mux::new()
        .message(messages.clone())
        .presence(presences.clone())
        .fallback(others.clone());

    for stanza in [
        "<message xmlns='jabber:client'><body>hi</body></message>",
        "<presence/>",
        "<r xmlns='urn:xmpp:sm:3'/>",
        "<message xmlns='urn:example'/>",
    ] {
        handle(&mux, stanza).0.unwrap();
    }
    assert_eq!(messages.seen(), ["message"]);
    assert_eq!(presences.seen(), ["presence"]);
    assert_eq!(others.seen(), ["r", "message"]);
}

#[test]
fn response_writer_counts_top_level_elements() {
    let mut encoder = Encoder::new(Vec::new());
    let mut writer = ResponseWriter::new(&mut encoder);
    assert!(!writer.responded());
    writer
        .write_token(&Token::Start(StartElement::new(Name::local("a"))))
        .unwrap();
    assert!(writer.responded());
    assert!(!writer.complete());
    Element::new(Name::local("b")).write_to(&mut writer).unwrap();
    writer.write_token(&Token::End(Name::local("a"))).unwrap();
    assert!(writer.complete());
    assert!(matches!(
        Element::new(Name::local("c")).write_to(&mut writer),
        Err(Error::DuplicateResponse)
    ));
}
