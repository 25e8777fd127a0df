//! Protocol-level error types.
//!
//! This crate is `no_std`-compatible, so [`ProtocolError`] avoids anything
//! that requires an allocator when the `alloc`/`std` features are disabled.
//! Variants that carry a message use a `&'static str` rather than an owned
//! `String` for that reason.

use core::fmt;

/// Errors produced while decoding or encoding TDS protocol structures.
///
/// These are wire-level errors: malformed packets, truncated buffers, and
/// values outside the documented protocol ranges. Higher-level crates wrap
/// this in their own error enums rather than exposing it directly to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A packet header or token claimed more bytes than are available.
    IncompletePacket {
        /// Bytes required to proceed.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
    /// Ran out of bytes while decoding a fixed-size field.
    UnexpectedEof,
    /// Packet `type` byte did not match a known [`crate::packet::PacketType`].
    InvalidPacketType(u8),
    /// Packet status byte had bits outside the defined flag set.
    InvalidPacketStatus(u8),
    /// Packet length exceeded the negotiated or maximum packet size.
    PacketTooLarge {
        /// The length that was rejected.
        length: usize,
        /// The maximum permitted length.
        max: usize,
    },
    /// Token type byte did not match a known [`crate::token::TokenType`], or
    /// matched one that requires decode context this call site didn't supply.
    InvalidTokenType(u8),
    /// A PRELOGIN option token was not recognized.
    InvalidPreloginOption(u8),
    /// A length-prefixed or enum-tagged field had a value outside its valid range.
    InvalidField {
        /// Name of the field that failed validation.
        field: &'static str,
        /// The offending value.
        value: u32,
    },
    /// UTF-16 bytes did not form a valid string.
    StringEncoding(&'static str),
    /// A scalar type this codec intentionally never supports (XML, CLR UDT,
    /// SQL_VARIANT, HIERARCHYID, IMAGE/TEXT/NTEXT — see spec §4.1).
    UnsupportedType {
        /// The TDS type id byte encountered.
        type_id: u8,
        /// Human-readable type name for error messages.
        name: &'static str,
    },
    /// A ENVCHANGE, LOGINACK, or FEDAUTHINFO token carried a type code this
    /// parser doesn't recognize.
    UnknownVariant {
        /// What kind of enum failed to parse (e.g. "EnvChangeType").
        kind: &'static str,
        /// The raw value that didn't match.
        value: u32,
    },
    /// Collation bytes could not be mapped to a known code page.
    UnknownCollation(u32),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompletePacket { expected, actual } => write!(
                f,
                "incomplete packet: expected at least {expected} bytes, got {actual}"
            ),
            Self::UnexpectedEof => write!(f, "unexpected end of buffer while decoding"),
            Self::InvalidPacketType(b) => write!(f, "invalid packet type: 0x{b:02X}"),
            Self::InvalidPacketStatus(b) => write!(f, "invalid packet status bits: 0x{b:02X}"),
            Self::PacketTooLarge { length, max } => {
                write!(f, "packet length {length} exceeds maximum {max}")
            }
            Self::InvalidTokenType(b) => write!(f, "invalid or unhandled token type: 0x{b:02X}"),
            Self::InvalidPreloginOption(b) => write!(f, "invalid PRELOGIN option: 0x{b:02X}"),
            Self::InvalidField { field, value } => {
                write!(f, "invalid value {value} for field `{field}`")
            }
            Self::StringEncoding(msg) => write!(f, "string encoding error: {msg}"),
            Self::UnsupportedType { type_id, name } => write!(
                f,
                "unsupported SQL Server type {name} (0x{type_id:02X}); this connector does not decode XML, CLR UDT, SQL_VARIANT, HIERARCHYID, or IMAGE/TEXT/NTEXT"
            ),
            Self::UnknownVariant { kind, value } => {
                write!(f, "unknown {kind} variant: {value}")
            }
            Self::UnknownCollation(lcid) => write!(f, "unknown collation LCID: {lcid:#010x}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ProtocolError {}
