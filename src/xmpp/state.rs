/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::fmt::Display;
use std::ops::BitOr;
use std::ops::BitOrAssign;

/// Set of negotiation milestones reached by a session.
///
/// Bits are only ever added while a session lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SessionState(u8);

impl SessionState {
    pub const EMPTY: SessionState = SessionState(0);
    /// The peer's stream header has been read.
    pub const RECEIVED: SessionState = SessionState(1);
    /// The transport is encrypted.
    pub const SECURE: SessionState = SessionState(1 << 1);
    /// The peer is authenticated.
    pub const AUTHN: SessionState = SessionState(1 << 2);
    /// Feature negotiation has finished, stanzas may flow.
    pub const READY: SessionState = SessionState(1 << 3);

    /// True if every bit of `other` is set.
    pub fn contains(self, other: SessionState) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    pub fn intersects(self, other: SessionState) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for SessionState {
    type Output = SessionState;

    fn bitor(self, rhs: SessionState) -> SessionState {
        SessionState(self.0 | rhs.0)
    }
}

impl BitOrAssign for SessionState {
    fn bitor_assign(&mut self, rhs: SessionState) {
        self.0 |= rhs.0;
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (SessionState::RECEIVED, "received"),
            (SessionState::SECURE, "secure"),
            (SessionState::AUTHN, "authn"),
            (SessionState::READY, "ready"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "empty")?;
        }
        Ok(())
    }
}
