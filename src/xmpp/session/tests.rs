/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::io::Write;
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc;
use std::time::Duration;

use crate::xml::read_text;
use crate::xmpp::feature::Negotiated;
use crate::xmpp::mux::IqHandler;
use crate::xmpp::ping;
use crate::xmpp::sasl::Condition;
use crate::xmpp::sasl::Mechanism;
use crate::xmpp::sasl::Plain;
use crate::xmpp::sasl::SaslClient;
use crate::xmpp::sasl::SaslServer;
use crate::xmpp::stanza::IqType;
use crate::xmpp::transport::WriteHalf;
use crate::xmpp::transport::duplex;
use crate::xmpp::transport::testing::scripted;

use super::*;

const TIMEOUT: Duration = Duration::from_secs(5);

fn location() -> Jid {
    Jid::new("example.net").unwrap()
}

fn origin() -> Jid {
    Jid::new("test@example.net").unwrap()
}

fn plain() -> Vec<Arc<dyn Mechanism>> {
    vec![Arc::new(Plain) as Arc<dyn Mechanism>]
}

fn pair(
    client: SessionBuilder,
    server: SessionBuilder,
) -> (Result<Session, Error>, Result<Session, Error>) {
    let (a, b) = duplex();
    let server = thread::spawn(move || server.negotiate(b));
    let client = client.negotiate(a);
    (client, server.join().unwrap())
}

fn authenticated_pair() -> (Arc<Session>, Arc<Session>) {
    let (client, server) = pair(
        SessionBuilder::new(location(), origin())
            .client()
            .feature(Arc::new(SaslClient::new("", "", plain()).unwrap())),
        SessionBuilder::new(location(), origin())
            .server()
            .feature(Arc::new(SaslServer::new(|_| true, plain()).unwrap())),
    );
    (Arc::new(client.unwrap()), Arc::new(server.unwrap()))
}

struct Messages(Mutex<mpsc::Sender<String>>);

impl Handler for Messages {
    fn handle_xmpp(
        &self,
        reader: &mut dyn TokenReader,
        _writer: &mut dyn TokenWriter,
        _start: &StartElement,
    ) -> Result<(), Error> {
        while let Some(token) = reader.token()? {
            if let Token::Start(child) = token {
                if child.name.local == "body" {
                    let body = read_text(reader)?;
                    let _ = self.0.lock().unwrap().send(body);
                } else {
                    skip(reader)?;
                }
            }
        }
        Ok(())
    }
}

const WRAP_NS: &str = "urn:example:wrap";

// Counts the bytes moving through a transport.
struct Counted<T> {
    inner: T,
    bytes: Arc<AtomicUsize>,
}

impl Read for Counted<Box<dyn Read + Send>> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }
}

impl Write for Counted<Box<dyn WriteHalf>> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl WriteHalf for Counted<Box<dyn WriteHalf>> {
    fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown()
    }
}

// Layer upgrade in the style of STARTTLS, with a pass-through layer.
struct Wrap {
    bytes: Arc<AtomicUsize>,
}

impl Wrap {
    fn new() -> Self {
        Wrap {
            bytes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl StreamFeature for Wrap {
    fn name(&self) -> Name {
        Name::new(WRAP_NS, "wrap")
    }

    fn necessary(&self) -> SessionState {
        SessionState::RECEIVED
    }

    fn prohibited(&self) -> SessionState {
        SessionState::SECURE
    }

    fn list(&self, writer: &mut dyn TokenWriter, start: StartElement) -> Result<bool, Error> {
        Element::from_start(start).write_to(writer)?;
        Ok(true)
    }

    fn parse(
        &self,
        _reader: &mut dyn TokenReader,
        _start: &StartElement,
    ) -> Result<(bool, FeatureData), Error> {
        Ok((true, FeatureData::Empty))
    }

    fn negotiate(&self, session: &mut Session, _data: FeatureData) -> Result<Negotiated, Error> {
        let client = session.is_client();
        let (reader, writer) = session.streams()?;
        if client {
            Element::new(self.name()).encode(writer)?;
        }
        let Some(Token::Start(start)) = reader.token()? else {
            return Err(Error::UnexpectedPayload);
        };
        skip(reader)?;
        if !client {
            assert_eq!(start.name, self.name());
            Element::new(Name::new(WRAP_NS, "proceed")).encode(writer)?;
        }
        let transport = session.release_transport()?;
        let transport = Transport::new(
            Box::new(Counted {
                inner: transport.reader,
                bytes: self.bytes.clone(),
            }),
            Box::new(Counted {
                inner: transport.writer,
                bytes: self.bytes.clone(),
            }),
        );
        Ok(Negotiated {
            state: SessionState::SECURE,
            transport: Some(transport),
            data: None,
        })
    }
}

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

#[test]
fn state_bits() {
    let mut state = SessionState::RECEIVED;
    assert!(state.contains(SessionState::RECEIVED));
    assert!(!state.contains(SessionState::RECEIVED | SessionState::AUTHN));
    state |= SessionState::AUTHN;
    assert!(state.contains(SessionState::RECEIVED | SessionState::AUTHN));
    assert!(state.intersects(SessionState::SECURE | SessionState::AUTHN));
    assert_eq!(state.to_string(), "received|authn");
    assert_eq!(SessionState::EMPTY.to_string(), "empty");
}

#[test]
fn negotiates_without_features() {
    let (client, server) = pair(
        SessionBuilder::new(location(), origin()),
        SessionBuilder::new(location(), origin()).server(),
    );
    let (client, server) = (client.unwrap(), server.unwrap());
    assert_eq!(client.state(), SessionState::RECEIVED | SessionState::READY);
    assert_eq!(server.state(), SessionState::RECEIVED | SessionState::READY);
    assert!(client.is_client());
    assert!(!server.is_client());
    assert_eq!(client.stream_id(), server.stream_id());
    assert!(!server.stream_id().is_empty());
}

#[test]
fn negotiates_sasl() {
    let (client, server) = authenticated_pair();
    let expected = SessionState::RECEIVED | SessionState::AUTHN | SessionState::READY;
    assert_eq!(client.state(), expected);
    assert_eq!(server.state(), expected);
    assert!(!client.state().contains(SessionState::SECURE));
    assert_eq!(client.origin().localpart(), Some("test"));
}

#[test]
fn rejected_authentication() {
    let (client, server) = pair(
        SessionBuilder::new(location(), origin())
            .feature(Arc::new(SaslClient::new("", "", plain()).unwrap())),
        SessionBuilder::new(location(), origin())
            .server()
            .feature(Arc::new(SaslServer::new(|_| false, plain()).unwrap())),
    );
    match client {
        Err(Error::Failure(failure)) => assert_eq!(failure.condition, Condition::NotAuthorized),
        Err(err) => panic!("unexpected error {err}"),
        Ok(_) => panic!("client should not authenticate"),
    }
    assert!(matches!(server, Err(Error::Authn)));
}

#[test]
fn rejects_bad_header() {
    let (transport, capture) = scripted("<stream xmlns='jabber:client'>");
    let result = SessionBuilder::new(location(), origin()).negotiate(transport);
    assert!(matches!(
        result,
        Err(Error::BadStream(description::NO_HEADER))
    ));
    assert!(capture.text().contains("<stream:stream"));

    let (transport, _) = scripted("");
    let result = SessionBuilder::new(location(), origin())
        .server()
        .negotiate(transport);
    assert!(matches!(
        result,
        Err(Error::BadStream(description::NO_HEADER))
    ));
}

#[test]
fn server_writes_features() {
    let (transport, capture) = scripted(
        "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
         xmlns:stream='http://etherx.jabber.org/streams' to='example.net' version='1.0'>\
         <auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>AHRlc3QA</auth>",
    );
    let result = SessionBuilder::new(location(), origin())
        .server()
        .feature(Arc::new(SaslServer::new(|_| true, plain()).unwrap()))
        .negotiate(transport);
    // The client never restarts the stream.
    assert!(result.is_err());
    let out = capture.text();
    assert!(out.starts_with("<?xml version='1.0'?><stream:stream xmlns='jabber:client'"));
    assert!(out.contains(
        "<features xmlns=\"http://etherx.jabber.org/streams\">\
         <mechanisms xmlns=\"urn:ietf:params:xml:ns:xmpp-sasl\">\
         <mechanism>PLAIN</mechanism></mechanisms></features>"
    ));
    assert!(out.ends_with("<success xmlns=\"urn:ietf:params:xml:ns:xmpp-sasl\"></success>"));
}

#[test]
fn replaced_transport_restarts_stream() {
    let client_wrap = Arc::new(Wrap::new());
    let server_wrap = Arc::new(Wrap::new());
    let (client, server) = pair(
        SessionBuilder::new(location(), origin())
            .feature(client_wrap.clone())
            .feature(Arc::new(SaslClient::new("", "", plain()).unwrap())),
        SessionBuilder::new(location(), origin())
            .server()
            .feature(server_wrap.clone())
            .feature(Arc::new(SaslServer::new(|_| true, plain()).unwrap())),
    );
    let (client, server) = (Arc::new(client.unwrap()), Arc::new(server.unwrap()));
    let expected =
        SessionState::RECEIVED | SessionState::SECURE | SessionState::AUTHN | SessionState::READY;
    assert_eq!(client.state(), expected);
    assert_eq!(server.state(), expected);
    // Headers, features and SASL all went through the new layer.
    let client_bytes = client_wrap.bytes.load(Ordering::SeqCst);
    assert!(client_bytes > 0);
    assert_eq!(client_bytes, server_wrap.bytes.load(Ordering::SeqCst));

    let server_loop = server.serve(ping::register(Mux::new())).unwrap();
    let client_loop = client.serve(Mux::new()).unwrap();
    ping::send(&client, &location(), TIMEOUT).unwrap();
    assert!(client_wrap.bytes.load(Ordering::SeqCst) > client_bytes);
    client.close().unwrap();
    client_loop.join().unwrap().unwrap();
    server_loop.join().unwrap().unwrap();
}

#[test]
fn release_checks_unread_data() {
    let (transport, _) = scripted("<a/><b/>");
    let mut session = Session::new(transport, location(), origin(), true);
    let (reader, _) = session.streams().unwrap();
    reader.token().unwrap();
    assert!(matches!(
        session.release_transport(),
        Err(Error::BadStream(description::UNREAD_DATA))
    ));
    assert!(matches!(
        session.streams(),
        Err(Error::BadStream(description::NO_TRANSPORT))
    ));
}

#[test]
fn ping_round_trip() {
    let (client, server) = authenticated_pair();
    let server_loop = server.serve(ping::register(Mux::new())).unwrap();
    let client_loop = client.serve(Mux::new()).unwrap();

    ping::send(&client, &location(), TIMEOUT).unwrap();
    assert!(client.pending().is_empty());

    client.close().unwrap();
    client_loop.join().unwrap().unwrap();
    server_loop.join().unwrap().unwrap();
    assert!(matches!(client.send(&Element::new(Name::local("iq"))), Err(Error::Closed)));
}

#[test]
fn first_response_survives_handler_error() {
    let (client, server) = authenticated_pair();
    let payload = Name::new("urn:example:twice", "query");
    let server_loop = server
        .serve(Mux::new().iq(IqType::Get, payload.clone(), Twice))
        .unwrap();
    let client_loop = client.serve(Mux::new()).unwrap();

    for _ in 0..2 {
        let iq = Iq::new(IqType::Get).to("example.net");
        let waiter = client.send_iq(&iq, Some(Element::new(payload.clone()))).unwrap();
        let response = waiter.wait(TIMEOUT).unwrap();
        assert_eq!(response.attr("type"), Some("result"));
        assert_eq!(response.attr("id"), Some(iq.id.as_str()));
    }

    client.close().unwrap();
    client_loop.join().unwrap().unwrap();
    server_loop.join().unwrap().unwrap();
}

#[test]
fn reused_id_keeps_new_waiter() {
    let pending = PendingIqs::new();
    let first = pending.register("r").unwrap();
    assert!(pending.deliver("r", Element::new(Name::local("iq"))));
    let second = pending.register("r").unwrap();
    drop(first);
    assert_eq!(pending.len(), 1);
    assert!(pending.deliver("r", Element::new(Name::local("iq")).with_attr("id", "r")));
    assert_eq!(second.wait(TIMEOUT).unwrap().attr("id"), Some("r"));
}

#[test]
fn unanswered_request_times_out() {
    let (client, server) = authenticated_pair();
    let client_loop = client.serve(Mux::new()).unwrap();

    let iq = Iq::new(IqType::Get).to("example.net");
    let waiter = client
        .send_iq(&iq, Some(Element::new(Name::new("urn:xmpp:ping", "ping"))))
        .unwrap();
    assert_eq!(client.pending().len(), 1);
    assert!(matches!(
        waiter.wait(Duration::from_millis(50)),
        Err(Error::Timeout)
    ));
    assert!(client.pending().is_empty());
    assert!(!client.pending().deliver(&iq.id, Element::new(Name::local("iq"))));

    // Peer vanishes without closing the stream.
    drop(server);
    let _ = client_loop.join().unwrap();
    assert!(matches!(client.pending().register("late"), Err(Error::Closed)));
}

#[test]
fn only_requests_are_tracked() {
    let (client, _server) = authenticated_pair();
    let result = client.send_iq(&Iq::new(IqType::Result), None);
    assert!(matches!(result, Err(Error::Usage(_))));
    assert!(client.pending().is_empty());
}

#[test]
fn routes_messages() {
    let (client, server) = authenticated_pair();
    let (tx, rx) = mpsc::channel();
    let server_loop = server
        .serve(Mux::new().message(Messages(Mutex::new(tx))))
        .unwrap();
    assert!(matches!(
        server.serve(Mux::new()),
        Err(Error::AlreadyServing)
    ));

    let message = Element::new(Name::new("jabber:client", "message"))
        .with_attr("to", "example.net")
        .with_child(Element::new(Name::new("jabber:client", "body")).with_text("Wherefore art thou?"));
    client.send(&message).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "Wherefore art thou?");

    client.close().unwrap();
    server_loop.join().unwrap().unwrap();
}

#[test]
fn stanza_writer_sends_on_flush() {
    let (transport, capture) = scripted("");
    let session = Session::new(transport, location(), origin(), true);
    let mut writer = session.writer();
    Element::new(Name::new("jabber:client", "presence"))
        .write_to(&mut writer)
        .unwrap();
    assert_eq!(capture.text(), "");
    writer.flush().unwrap();
    assert_eq!(capture.text(), "<presence></presence>");
}
