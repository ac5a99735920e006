// Path: crates/qkd-api/src/role.rs
//! The two symmetric roles a module endpoint can take (§2, GLOSSARY).

/// Disambiguates which side of a module pair binds (`listen`) and which
/// connects (`peer`), and which side leads each request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Alice: connects out via `peer`, leads each handshake.
    Initiator,
    /// Bob: accepts via `listen`, responds to the initiator's lead.
    Responder,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        matches!(self, Self::Initiator)
    }

    pub fn is_responder(self) -> bool {
        matches!(self, Self::Responder)
    }

    /// The configuration prefix segment for this role (`alice` / `bob`),
    /// used to resolve `<pfx>.alice.*` / `<pfx>.bob.*` options (§4.6).
    pub fn config_segment(self) -> &'static str {
        match self {
            Self::Initiator => "alice",
            Self::Responder => "bob",
        }
    }
}
