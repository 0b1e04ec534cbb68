/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! Boundary to SASL mechanism engines.

use crate::xmpp::Error;

/// Identity an exchange authenticates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Authorization identity, empty to act as the authenticated user.
    pub authzid: String,
    pub username: String,
    pub password: String,
}

/// Result of feeding one message into an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    /// The exchange needs another round trip.
    pub more: bool,
    /// Message for the peer, empty if there is nothing to send.
    pub data: Vec<u8>,
}

/// One side of a running authentication exchange.
pub trait Exchange: Send {
    /// Processes a message from the peer. The client starts with empty
    /// input to produce its initial response.
    fn step(&mut self, input: &[u8]) -> Result<Step, Error>;

    /// Identity claimed by the client, once known.
    fn credentials(&self) -> Option<&Credentials>;
}

/// A SASL mechanism able to start exchanges in either role.
pub trait Mechanism: Send + Sync {
    fn name(&self) -> &str;
    fn client(&self, credentials: &Credentials) -> Box<dyn Exchange>;
    fn server(&self) -> Box<dyn Exchange>;
}

/// The PLAIN mechanism of RFC 4616.
///
/// It sends the password in clear text, so it should only be used over
/// an encrypted transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn client(&self, credentials: &Credentials) -> Box<dyn Exchange> {
        Box::new(PlainClient {
            credentials: credentials.clone(),
            sent: false,
        })
    }

    fn server(&self) -> Box<dyn Exchange> {
        Box::new(PlainServer { credentials: None })
    }
}

struct PlainClient {
    credentials: Credentials,
    sent: bool,
}

impl Exchange for PlainClient {
    fn step(&mut self, _input: &[u8]) -> Result<Step, Error> {
        if self.sent {
            // Additional data with success, nothing to verify for PLAIN
            return Ok(Step::default());
        }
        self.sent = true;
        let creds = &self.credentials;
        let mut data = Vec::with_capacity(
            creds.authzid.len() + creds.username.len() + creds.password.len() + 2,
        );
        data.extend_from_slice(creds.authzid.as_bytes());
        data.push(0);
        data.extend_from_slice(creds.username.as_bytes());
        data.push(0);
        data.extend_from_slice(creds.password.as_bytes());
        Ok(Step { more: false, data })
    }

    fn credentials(&self) -> Option<&Credentials> {
        Some(&self.credentials)
    }
}

struct PlainServer {
    credentials: Option<Credentials>,
}

impl Exchange for PlainServer {
    fn step(&mut self, input: &[u8]) -> Result<Step, Error> {
        if input.is_empty() {
            // No initial response, ask for it with an empty challenge.
            return Ok(Step {
                more: true,
                data: Vec::new(),
            });
        }
        let parts: Vec<&[u8]> = input.split(|c| *c == 0).collect();
        let [authzid, username, password] = parts.as_slice() else {
            return Err(Error::Mechanism("PLAIN message needs three fields".to_string()));
        };
        if username.is_empty() {
            return Err(Error::Mechanism("PLAIN username is empty".to_string()));
        }
        let text = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::Mechanism("PLAIN fields must be UTF-8".to_string()))
        };
        self.credentials = Some(Credentials {
            authzid: text(*authzid)?,
            username: text(*username)?,
            password: text(*password)?,
        });
        Ok(Step::default())
    }

    fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}
