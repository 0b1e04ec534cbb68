/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rustls::ClientConfig;
use tracing::debug;

use super::Error;
use super::Jid;
use super::constants::CLIENT_PORT;
use super::mux::Mux;
use super::ping;
use super::sasl::Mechanism;
use super::sasl::Plain;
use super::sasl::SaslClient;
use super::session::Session;
use super::session::SessionBuilder;
use super::starttls::StartTls;
use super::tls;
use super::transport::Transport;

pub struct XmppClientBuilder {
    jid: Jid,
    server: Option<String>,
    connection_timeout: Duration,
    password: String,
    tls: bool,
    tls_config: Option<Arc<ClientConfig>>,
    mechanisms: Vec<Arc<dyn Mechanism>>,
}

impl XmppClientBuilder {
    pub fn new(jid: Jid) -> Self {
        XmppClientBuilder {
            jid,
            server: None,
            connection_timeout: Duration::from_secs(30),
            password: String::new(),
            tls: true,
            tls_config: None,
            mechanisms: Vec::new(),
        }
    }

    /// Host to connect to instead of the domain of the JID, optionally
    /// with a port.
    pub fn server(mut self, server: Option<String>) -> Self {
        self.server = server;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    /// Disabling TLS sends the password in clear text with PLAIN.
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Adds a SASL mechanism. PLAIN is used if none is added.
    pub fn mechanism(mut self, mechanism: Arc<dyn Mechanism>) -> Self {
        self.mechanisms.push(mechanism);
        self
    }

    fn resolve(&self) -> Result<TcpStream, Error> {
        let host = match &self.server {
            Some(server) => server.as_str(),
            None => self.jid.domainpart(),
        };
        // Rust resolver does require a port number but does NOT provide
        // a way to provide a default one :(
        let column_pos = host.find(':');
        let bracket_pos = host.find(']');
        let need_port = match (column_pos, bracket_pos) {
            (None, None) | (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(column), Some(bracket)) => column < bracket,
        };
        let mut addrs = if need_port {
            (host, CLIENT_PORT).to_socket_addrs()
        } else {
            host.to_socket_addrs()
        }?;
        let Some(addr) = addrs.next() else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "server name did not resolve to an address",
            )));
        };
        debug!(%addr, "connecting");
        Ok(TcpStream::connect_timeout(&addr, self.connection_timeout)?)
    }

    /// Connects, secures the stream and authenticates.
    pub fn connect(self) -> Result<XmppClient, Error> {
        let stream = self.resolve()?;
        let location = Jid::new(self.jid.domainpart())?;
        let mut builder = SessionBuilder::new(location, self.jid.clone()).client();
        if self.tls {
            let config = self.tls_config.unwrap_or_else(tls::default_client_config);
            builder = builder.feature(Arc::new(StartTls::client(config)));
        }
        let mechanisms = if self.mechanisms.is_empty() {
            vec![Arc::new(Plain) as Arc<dyn Mechanism>]
        } else {
            self.mechanisms
        };
        builder = builder.feature(Arc::new(SaslClient::new("", &self.password, mechanisms)?));
        let session = builder.negotiate(Transport::tcp(stream)?)?;
        debug!(state = %session.state(), "client session ready");
        Ok(XmppClient {
            session: Arc::new(session),
            read_loop: None,
        })
    }
}

pub struct XmppClient {
    session: Arc<Session>,
    read_loop: Option<JoinHandle<Result<(), Error>>>,
}

impl XmppClient {
    pub fn build(jid: Jid) -> XmppClientBuilder {
        XmppClientBuilder::new(jid)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Starts dispatching inbound stanzas. Pings register their own
    /// responder.
    pub fn serve(&mut self, mux: Mux) -> Result<(), Error> {
        self.read_loop = Some(self.session.serve(ping::register(mux))?);
        Ok(())
    }

    pub fn ping(&self, to: &Jid, timeout: Duration) -> Result<(), Error> {
        ping::send(&self.session, to, timeout)
    }

    /// Closes the stream and waits for the read loop to finish.
    pub fn close(mut self) -> Result<(), Error> {
        self.session.close()?;
        match self.read_loop.take() {
            Some(handle) => handle.join().unwrap_or(Err(Error::Closed)),
            None => Ok(()),
        }
    }
}
