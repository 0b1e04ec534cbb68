/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use crate::xml::Name;
use crate::xml::StartElement;
use crate::xml::TokenReader;
use crate::xml::TokenWriter;

use super::Error;
use super::session::Session;
use super::state::SessionState;
use super::transport::Transport;

/// Data a feature carries from parsing the advertisement into its
/// negotiation, or from one negotiation step into the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureData {
    Empty,
    /// SASL mechanism names offered by the server.
    Mechanisms(Vec<String>),
}

/// Outcome of a single negotiation step.
pub struct Negotiated {
    /// Bits to merge into the session state.
    pub state: SessionState,
    /// Replacement transport, e.g. after a TLS upgrade.
    pub transport: Option<Transport>,
    /// When set, the feature is called again with this data.
    pub data: Option<FeatureData>,
}

impl Negotiated {
    pub fn done(state: SessionState) -> Self {
        Negotiated {
            state,
            transport: None,
            data: None,
        }
    }
}

/// A unit of stream negotiation advertised in `<stream:features/>`.
///
/// Implementations are stateless descriptors shared between sessions.
/// Anything a negotiation needs to remember goes into [FeatureData].
pub trait StreamFeature: Send + Sync {
    /// Name of the element advertising this feature.
    fn name(&self) -> Name;

    /// State bits which must be set for the feature to be offered.
    fn necessary(&self) -> SessionState;

    /// State bits which must be clear for the feature to be offered.
    fn prohibited(&self) -> SessionState;

    /// Writes the advertisement element, returns true if the feature is
    /// required. The writer is flushed by the caller.
    fn list(&self, writer: &mut dyn TokenWriter, start: StartElement) -> Result<bool, Error>;

    /// Decodes the advertisement whose start tag is `start`.
    ///
    /// The reader is scoped to the element content. Returns whether the
    /// peer requires the feature and the data for [negotiate()](StreamFeature::negotiate).
    fn parse(
        &self,
        reader: &mut dyn TokenReader,
        start: &StartElement,
    ) -> Result<(bool, FeatureData), Error>;

    /// Runs the negotiation over the session streams.
    fn negotiate(&self, session: &mut Session, data: FeatureData) -> Result<Negotiated, Error>;

    /// Whether the feature may run in the given state.
    fn eligible(&self, state: SessionState) -> bool {
        state.contains(self.necessary()) && !state.intersects(self.prohibited())
    }
}
