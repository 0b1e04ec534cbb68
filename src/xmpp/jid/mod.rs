/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

mod error;

use std::fmt::Display;
use std::str::FromStr;

pub use error::BadJid;
use error::description;

const MAX_PART_SIZE: usize = 1023;

fn check_part(part: &str, empty: &'static str) -> Result<(), BadJid> {
    if part.is_empty() {
        return Err(BadJid(empty));
    }
    if part.len() > MAX_PART_SIZE {
        return Err(BadJid(description::PART_TOO_LONG));
    }
    Ok(())
}

/// The address of an entity in the XMPP protocol.
///
/// Only the structure is validated here: each present part must be
/// non-empty and at most 1023 octets, and a trailing dot on the domain
/// is dropped as per RFC 7622 section 3.2. No string preparation is done.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Jid {
    full: String,
    local_end: Option<usize>,
    resource_start: Option<usize>,
}

impl Jid {
    pub fn new(jid: &str) -> Result<Self, BadJid> {
        let (bare, resource) = match jid.split_once('/') {
            Some((bare, resource)) => (bare, Some(resource)),
            None => (jid, None),
        };
        let (local, domain) = match bare.split_once('@') {
            Some((local, domain)) => (Some(local), domain),
            None => (None, bare),
        };
        let domain = domain.strip_suffix('.').unwrap_or(domain);
        check_part(domain, description::DOMAIN_EMPTY)?;
        if let Some(local) = local {
            check_part(local, description::LOCAL_EMPTY)?;
        }
        if let Some(resource) = resource {
            check_part(resource, description::RESOURCE_EMPTY)?;
        }

        let mut full = String::with_capacity(jid.len());
        let mut local_end = None;
        if let Some(local) = local {
            full.push_str(local);
            local_end = Some(full.len());
            full.push('@');
        }
        full.push_str(domain);
        let mut resource_start = None;
        if let Some(resource) = resource {
            full.push('/');
            resource_start = Some(full.len());
            full.push_str(resource);
        }
        Ok(Jid {
            full,
            local_end,
            resource_start,
        })
    }

    pub fn full(&self) -> &str {
        &self.full
    }

    /// The JID without the resource part.
    pub fn bare(&self) -> &str {
        match self.resource_start {
            Some(pos) => &self.full[..pos - 1],
            None => &self.full,
        }
    }

    pub fn localpart(&self) -> Option<&str> {
        self.local_end.map(|end| &self.full[..end])
    }

    pub fn domainpart(&self) -> &str {
        let start = self.local_end.map_or(0, |end| end + 1);
        &self.bare()[start..]
    }

    pub fn resourcepart(&self) -> Option<&str> {
        self.resource_start.map(|start| &self.full[start..])
    }

    pub fn is_bare(&self) -> bool {
        self.resource_start.is_none()
    }
}

impl FromStr for Jid {
    type Err = BadJid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::new(s)
    }
}

impl Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full)
    }
}

#[cfg(test)]
mod tests;
