/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! TLS layer for transports, driven by rustls.

use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use rustls::ClientConfig;
use rustls::ClientConnection;
use rustls::Connection;
use rustls::RootCertStore;
use rustls::ServerConfig;
use rustls::ServerConnection;
use rustls::pki_types::ServerName;

use super::Error;
use super::transport::Transport;
use super::transport::WriteHalf;

const READ_BUFFER_SIZE: usize = 4096;

/// Client configuration trusting the Mozilla root certificates.
pub fn default_client_config() -> Arc<ClientConfig> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Wraps a transport in the client side of a TLS connection to `domain`.
pub fn client(
    transport: Transport,
    config: Arc<ClientConfig>,
    domain: &str,
) -> Result<Transport, Error> {
    let name = ServerName::try_from(domain.to_owned())
        .map_err(|_| Error::Usage("TLS server name is not a valid DNS name"))?;
    let conn = ClientConnection::new(config, name)?;
    Ok(wrap(transport, Connection::from(conn)))
}

/// Wraps a transport in the server side of a TLS connection.
pub fn server(transport: Transport, config: Arc<ServerConfig>) -> Result<Transport, Error> {
    let conn = ServerConnection::new(config)?;
    Ok(wrap(transport, Connection::from(conn)))
}

fn wrap(transport: Transport, conn: Connection) -> Transport {
    let shared = Arc::new(Mutex::new(Shared {
        conn,
        writer: transport.writer,
    }));
    Transport::new(
        Box::new(TlsReader {
            shared: shared.clone(),
            inner: transport.reader,
            buffer: vec![0; READ_BUFFER_SIZE],
        }),
        Box::new(TlsWriter { shared }),
    )
}

// Connection state shared by both halves. The inner reader is kept
// outside so a blocking socket read never holds the lock.
struct Shared {
    conn: Connection,
    writer: Box<dyn WriteHalf>,
}

impl Shared {
    fn write_pending(&mut self) -> std::io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.writer)?;
        }
        self.writer.flush()
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

struct TlsReader {
    shared: Arc<Mutex<Shared>>,
    inner: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl Read for TlsReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            {
                let mut shared = lock(&self.shared);
                match shared.conn.reader().read(buf) {
                    Ok(n) => return Ok(n),
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => (),
                    Err(err) => return Err(err),
                }
                shared.write_pending()?;
            }
            let n = self.inner.read(&mut self.buffer)?;
            if n == 0 {
                return Ok(0);
            }
            let mut shared = lock(&self.shared);
            let mut input = &self.buffer[..n];
            while !input.is_empty() {
                shared.conn.read_tls(&mut input)?;
                if let Err(err) = shared.conn.process_new_packets() {
                    // Let the peer see the alert before giving up.
                    let _ = shared.write_pending();
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, err));
                }
            }
            shared.write_pending()?;
        }
    }
}

struct TlsWriter {
    shared: Arc<Mutex<Shared>>,
}

impl Write for TlsWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut shared = lock(&self.shared);
        let n = shared.conn.writer().write(buf)?;
        shared.write_pending()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut shared = lock(&self.shared);
        shared.conn.writer().flush()?;
        shared.write_pending()
    }
}

impl WriteHalf for TlsWriter {
    fn shutdown(&mut self) -> std::io::Result<()> {
        let mut shared = lock(&self.shared);
        shared.conn.send_close_notify();
        // The peer may already be gone, the socket is closed regardless.
        let _ = shared.write_pending();
        shared.writer.shutdown()
    }
}
