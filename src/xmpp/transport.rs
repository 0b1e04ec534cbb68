/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::TcpStream;
use std::sync::mpsc;

/// Write half of a transport.
///
/// Shutting down must make the peer see the end of the stream, and for
/// full duplex sockets it also unblocks our own pending reads.
pub trait WriteHalf: Write + Send {
    fn shutdown(&mut self) -> std::io::Result<()>;
}

/// A bidirectional byte stream split into independently owned halves.
///
/// The session reads from one thread and writes from others, so the
/// halves must be usable concurrently.
pub struct Transport {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn WriteHalf>,
}

impl Transport {
    pub fn new(reader: Box<dyn Read + Send>, writer: Box<dyn WriteHalf>) -> Self {
        Transport { reader, writer }
    }

    pub fn tcp(stream: TcpStream) -> std::io::Result<Self> {
        let reader = stream.try_clone()?;
        Ok(Transport {
            reader: Box::new(reader),
            writer: Box::new(TcpWriter(stream)),
        })
    }
}

struct TcpWriter(TcpStream);

impl Write for TcpWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl WriteHalf for TcpWriter {
    fn shutdown(&mut self) -> std::io::Result<()> {
        match self.0.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }
}

/// Creates two in-memory transports connected to each other.
///
/// Whatever is written to one side can be read from the other. Reads
/// block until data arrives, and return end of file once the opposite
/// writer is shut down or dropped.
pub fn duplex() -> (Transport, Transport) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();
    (
        Transport::new(Box::new(PipeReader::new(b_rx)), Box::new(PipeWriter(Some(a_tx)))),
        Transport::new(Box::new(PipeReader::new(a_rx)), Box::new(PipeWriter(Some(b_tx)))),
    )
}

struct PipeReader {
    rx: mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl PipeReader {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pos == self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct PipeWriter(Option<mpsc::Sender<Vec<u8>>>);

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let Some(tx) = &self.0 else {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        };
        if buf.is_empty() {
            return Ok(0);
        }
        tx.send(buf.to_vec())
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl WriteHalf for PipeWriter {
    fn shutdown(&mut self) -> std::io::Result<()> {
        self.0 = None;
        Ok(())
    }
}
