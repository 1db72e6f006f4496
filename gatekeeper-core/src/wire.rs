//! Wire messages and bounds checking.
//!
//! One request or response per binary WebSocket message:
//! ```text
//! +-------------+----------------------+
//! | OPCODE (1B) | PAYLOAD (N bytes)    |
//! +-------------+----------------------+
//! ```
//!
//! Requests:
//! ```text
//! 0x10 HANDSHAKE_INIT      [client_public]
//! 0x11 HANDSHAKE_VALIDATE  [handshake_id:16][sig_len:1 (0|32)][sig]
//! 0x12 UPLOAD              [name_len:2 BE][name][type_len:2 BE][type][bytes..]
//! ```
//!
//! Responses:
//! ```text
//! 0x20 HANDSHAKE_STARTED     [handshake_id:16][server_public:32]
//! 0x21 HANDSHAKE_ACCEPTED    [session_key:32][json HandshakeReport]
//! 0x22 HANDSHAKE_SUSPICIOUS  [json HandshakeReport]
//! 0x23 FILE_DECISION         [json FileReport]
//! 0x05 ERROR                 [code:1]
//! ```

use thiserror::Error;

use crate::error::GateError;
use crate::keys::{HandshakeId, SessionKey, HANDSHAKE_ID_LEN, KEY_LEN};
use crate::report::{FileReport, HandshakeReport};

/// Upper bound for the INIT payload. Anything longer is not a key.
pub const MAX_KEY_PAYLOAD: usize = 64;

/// Message opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Client public value; starts a handshake.
    HandshakeInit = 0x10,
    /// Validate a pending handshake.
    HandshakeValidate = 0x11,
    /// Upload a file for classification.
    Upload = 0x12,
    /// Handshake id and server public value.
    HandshakeStarted = 0x20,
    /// Session key and report.
    HandshakeAccepted = 0x21,
    /// Report only; no key.
    HandshakeSuspicious = 0x22,
    /// File decision report.
    FileDecision = 0x23,
    /// Error code.
    Error = 0x05,
}

impl Opcode {
    /// Parse opcode from byte. Unknown bytes are an error. No fallback.
    pub fn from_byte(byte: u8) -> Result<Self, ErrorCode> {
        match byte {
            0x10 => Ok(Self::HandshakeInit),
            0x11 => Ok(Self::HandshakeValidate),
            0x12 => Ok(Self::Upload),
            0x20 => Ok(Self::HandshakeStarted),
            0x21 => Ok(Self::HandshakeAccepted),
            0x22 => Ok(Self::HandshakeSuspicious),
            0x23 => Ok(Self::FileDecision),
            0x05 => Ok(Self::Error),
            _ => Err(ErrorCode::UnknownOpcode),
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Error codes carried in ERROR responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u8)]
pub enum ErrorCode {
    /// Message violates the wire format.
    #[error("invalid format")]
    InvalidFormat = 0x01,
    /// Opcode not known or not valid in this direction.
    #[error("unknown opcode")]
    UnknownOpcode = 0x02,
    /// Client public value rejected.
    #[error("invalid key material")]
    InvalidKeyMaterial = 0x03,
    /// No such handshake.
    #[error("session not found")]
    SessionNotFound = 0x04,
    /// Handshake timed out.
    #[error("session expired")]
    SessionExpired = 0x05,
    /// Handshake not pending.
    #[error("invalid session state")]
    InvalidSessionState = 0x06,
    /// Upload had no bytes.
    #[error("empty input")]
    EmptyInput = 0x07,
    /// Message exceeds the configured limit.
    #[error("payload too large")]
    PayloadTooLarge = 0x08,
    /// Server-side failure.
    #[error("internal error")]
    Internal = 0x09,
}

impl ErrorCode {
    /// Parse an error code byte.
    pub fn from_byte(byte: u8) -> Result<Self, ErrorCode> {
        match byte {
            0x01 => Ok(Self::InvalidFormat),
            0x02 => Ok(Self::UnknownOpcode),
            0x03 => Ok(Self::InvalidKeyMaterial),
            0x04 => Ok(Self::SessionNotFound),
            0x05 => Ok(Self::SessionExpired),
            0x06 => Ok(Self::InvalidSessionState),
            0x07 => Ok(Self::EmptyInput),
            0x08 => Ok(Self::PayloadTooLarge),
            0x09 => Ok(Self::Internal),
            _ => Err(Self::InvalidFormat),
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl From<GateError> for ErrorCode {
    fn from(err: GateError) -> Self {
        match err {
            GateError::MalformedFrame => Self::InvalidFormat,
            GateError::InvalidKeyMaterial => Self::InvalidKeyMaterial,
            GateError::SessionNotFound => Self::SessionNotFound,
            GateError::SessionExpired => Self::SessionExpired,
            GateError::InvalidSessionState => Self::InvalidSessionState,
            GateError::EmptyInput => Self::EmptyInput,
            GateError::InternalError => Self::Internal,
        }
    }
}

/// Client → server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Start a handshake. Key validity is checked by the gate, not here.
    HandshakeInit {
        /// Raw client public value.
        client_public: Vec<u8>,
    },
    /// Validate a pending handshake.
    HandshakeValidate {
        /// Handshake to validate.
        handshake_id: HandshakeId,
        /// Optional key-confirmation signature.
        signature: Option<[u8; KEY_LEN]>,
    },
    /// Classify and decide a file.
    Upload {
        /// Filename, if the client sent one.
        filename: Option<String>,
        /// Claimed MIME type, if the client sent one.
        claimed_type: Option<String>,
        /// File bytes.
        data: Vec<u8>,
    },
}

impl Request {
    /// Parse a request message.
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::InvalidFormat`] for empty or badly sized payloads
    /// - [`ErrorCode::UnknownOpcode`] for unknown or response opcodes
    pub fn parse(msg: &[u8]) -> Result<Self, ErrorCode> {
        let (&op, payload) = msg.split_first().ok_or(ErrorCode::InvalidFormat)?;
        match Opcode::from_byte(op)? {
            Opcode::HandshakeInit => {
                if payload.is_empty() || payload.len() > MAX_KEY_PAYLOAD {
                    return Err(ErrorCode::InvalidFormat);
                }
                Ok(Self::HandshakeInit {
                    client_public: payload.to_vec(),
                })
            }
            Opcode::HandshakeValidate => {
                let mut reader = Reader::new(payload);
                let handshake_id = HandshakeId::from_bytes(reader.array::<HANDSHAKE_ID_LEN>()?);
                let signature = match reader.u8()? {
                    0 => None,
                    n if n as usize == KEY_LEN => Some(reader.array::<KEY_LEN>()?),
                    _ => return Err(ErrorCode::InvalidFormat),
                };
                reader.finish()?;
                Ok(Self::HandshakeValidate {
                    handshake_id,
                    signature,
                })
            }
            Opcode::Upload => {
                let mut reader = Reader::new(payload);
                let filename = reader.short_string()?;
                let claimed_type = reader.short_string()?;
                Ok(Self::Upload {
                    filename,
                    claimed_type,
                    data: reader.rest().to_vec(),
                })
            }
            _ => Err(ErrorCode::UnknownOpcode),
        }
    }

    /// Serialize the request.
    pub fn to_wire(&self) -> Result<Vec<u8>, ErrorCode> {
        let mut out = Vec::new();
        match self {
            Self::HandshakeInit { client_public } => {
                out.push(Opcode::HandshakeInit.to_byte());
                out.extend_from_slice(client_public);
            }
            Self::HandshakeValidate {
                handshake_id,
                signature,
            } => {
                out.push(Opcode::HandshakeValidate.to_byte());
                out.extend_from_slice(handshake_id.as_bytes());
                match signature {
                    Some(sig) => {
                        out.push(KEY_LEN as u8);
                        out.extend_from_slice(sig);
                    }
                    None => out.push(0),
                }
            }
            Self::Upload {
                filename,
                claimed_type,
                data,
            } => {
                out.push(Opcode::Upload.to_byte());
                put_short_string(&mut out, filename.as_deref())?;
                put_short_string(&mut out, claimed_type.as_deref())?;
                out.extend_from_slice(data);
            }
        }
        Ok(out)
    }
}

/// Server → client response.
#[derive(Debug)]
pub enum Response {
    /// Handshake created.
    HandshakeStarted {
        /// New handshake id.
        handshake_id: HandshakeId,
        /// Ephemeral server public value.
        server_public: [u8; KEY_LEN],
    },
    /// Key released.
    HandshakeAccepted {
        /// The session key.
        session_key: SessionKey,
        /// Decision details.
        report: HandshakeReport,
    },
    /// Key withheld.
    HandshakeSuspicious(HandshakeReport),
    /// File decision.
    FileDecision(FileReport),
    /// Request failed.
    Error(ErrorCode),
}

impl Response {
    /// Parse a response message.
    pub fn parse(msg: &[u8]) -> Result<Self, ErrorCode> {
        let (&op, payload) = msg.split_first().ok_or(ErrorCode::InvalidFormat)?;
        match Opcode::from_byte(op)? {
            Opcode::HandshakeStarted => {
                let mut reader = Reader::new(payload);
                let handshake_id = HandshakeId::from_bytes(reader.array::<HANDSHAKE_ID_LEN>()?);
                let server_public = reader.array::<KEY_LEN>()?;
                reader.finish()?;
                Ok(Self::HandshakeStarted {
                    handshake_id,
                    server_public,
                })
            }
            Opcode::HandshakeAccepted => {
                let mut reader = Reader::new(payload);
                let session_key = SessionKey::from_bytes(reader.array::<KEY_LEN>()?);
                let report = json(reader.rest())?;
                Ok(Self::HandshakeAccepted {
                    session_key,
                    report,
                })
            }
            Opcode::HandshakeSuspicious => Ok(Self::HandshakeSuspicious(json(payload)?)),
            Opcode::FileDecision => Ok(Self::FileDecision(json(payload)?)),
            Opcode::Error => match payload {
                [code] => Ok(Self::Error(ErrorCode::from_byte(*code)?)),
                _ => Err(ErrorCode::InvalidFormat),
            },
            _ => Err(ErrorCode::UnknownOpcode),
        }
    }

    /// Serialize the response.
    pub fn to_wire(&self) -> Result<Vec<u8>, ErrorCode> {
        let mut out = Vec::new();
        match self {
            Self::HandshakeStarted {
                handshake_id,
                server_public,
            } => {
                out.push(Opcode::HandshakeStarted.to_byte());
                out.extend_from_slice(handshake_id.as_bytes());
                out.extend_from_slice(server_public);
            }
            Self::HandshakeAccepted {
                session_key,
                report,
            } => {
                out.push(Opcode::HandshakeAccepted.to_byte());
                out.extend_from_slice(session_key.as_bytes());
                serde_json::to_writer(&mut out, report).map_err(|_| ErrorCode::Internal)?;
            }
            Self::HandshakeSuspicious(report) => {
                out.push(Opcode::HandshakeSuspicious.to_byte());
                serde_json::to_writer(&mut out, report).map_err(|_| ErrorCode::Internal)?;
            }
            Self::FileDecision(report) => {
                out.push(Opcode::FileDecision.to_byte());
                serde_json::to_writer(&mut out, report).map_err(|_| ErrorCode::Internal)?;
            }
            Self::Error(code) => {
                out.push(Opcode::Error.to_byte());
                out.push(code.to_byte());
            }
        }
        Ok(out)
    }

    /// ERROR response for `code`.
    pub fn error(code: impl Into<ErrorCode>) -> Self {
        Self::Error(code.into())
    }
}

fn json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ErrorCode> {
    serde_json::from_slice(bytes).map_err(|_| ErrorCode::InvalidFormat)
}

fn put_short_string(out: &mut Vec<u8>, value: Option<&str>) -> Result<(), ErrorCode> {
    let bytes = value.unwrap_or_default().as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| ErrorCode::InvalidFormat)?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ErrorCode> {
        if self.buf.len() < n {
            return Err(ErrorCode::InvalidFormat);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, ErrorCode> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ErrorCode> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Length-prefixed UTF-8; zero length reads as `None`.
    fn short_string(&mut self) -> Result<Option<String>, ErrorCode> {
        let len = u16::from_be_bytes(self.array::<2>()?) as usize;
        let raw = self.take(len)?;
        if raw.is_empty() {
            return Ok(None);
        }
        let text = std::str::from_utf8(raw).map_err(|_| ErrorCode::InvalidFormat)?;
        Ok(Some(text.to_string()))
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn finish(&self) -> Result<(), ErrorCode> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ErrorCode::InvalidFormat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{OracleSignal, Outcome, Severity};

    #[test]
    fn test_opcode_roundtrip() {
        for byte in [0x10, 0x11, 0x12, 0x20, 0x21, 0x22, 0x23, 0x05] {
            assert_eq!(Opcode::from_byte(byte).unwrap().to_byte(), byte);
        }
        assert_eq!(Opcode::from_byte(0x00), Err(ErrorCode::UnknownOpcode));
        assert_eq!(Opcode::from_byte(0xFF), Err(ErrorCode::UnknownOpcode));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Request::parse(&[]), Err(ErrorCode::InvalidFormat));
    }

    #[test]
    fn test_response_opcode_rejected_as_request() {
        assert_eq!(Request::parse(&[0x20, 1, 2]), Err(ErrorCode::UnknownOpcode));
    }

    #[test]
    fn test_init_bounds() {
        assert_eq!(Request::parse(&[0x10]), Err(ErrorCode::InvalidFormat));
        let mut long = vec![0x10];
        long.extend_from_slice(&[7u8; MAX_KEY_PAYLOAD + 1]);
        assert_eq!(Request::parse(&long), Err(ErrorCode::InvalidFormat));

        // short keys pass the codec; the gate rejects them
        let req = Request::parse(&[0x10, 1, 2, 3]).unwrap();
        assert_eq!(
            req,
            Request::HandshakeInit {
                client_public: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn test_validate_without_signature() {
        let mut msg = vec![0x11];
        msg.extend_from_slice(&[0xAA; 16]);
        msg.push(0);
        let req = Request::parse(&msg).unwrap();
        assert_eq!(
            req,
            Request::HandshakeValidate {
                handshake_id: HandshakeId::from_bytes([0xAA; 16]),
                signature: None,
            }
        );
        assert_eq!(req.to_wire().unwrap(), msg);
    }

    #[test]
    fn test_validate_signature_length_checked() {
        let mut msg = vec![0x11];
        msg.extend_from_slice(&[0xAA; 16]);
        msg.push(16);
        msg.extend_from_slice(&[1u8; 16]);
        assert_eq!(Request::parse(&msg), Err(ErrorCode::InvalidFormat));

        let mut trailing = vec![0x11];
        trailing.extend_from_slice(&[0xAA; 16]);
        trailing.push(0);
        trailing.push(9);
        assert_eq!(Request::parse(&trailing), Err(ErrorCode::InvalidFormat));
    }

    #[test]
    fn test_upload_fields() {
        let req = Request::Upload {
            filename: Some("invoice.txt".to_string()),
            claimed_type: None,
            data: b"hello".to_vec(),
        };
        let wire = req.to_wire().unwrap();
        assert_eq!(&wire[..3], &[0x12, 0, 11]);
        assert_eq!(Request::parse(&wire).unwrap(), req);
    }

    #[test]
    fn test_upload_truncated_name() {
        let msg = [0x12, 0, 20, b'a', b'b'];
        assert_eq!(Request::parse(&msg), Err(ErrorCode::InvalidFormat));
    }

    #[test]
    fn test_upload_name_not_utf8() {
        let msg = [0x12, 0, 2, 0xFF, 0xFE, 0, 0, 1];
        assert_eq!(Request::parse(&msg), Err(ErrorCode::InvalidFormat));
    }

    #[test]
    fn test_error_response() {
        let wire = Response::error(GateError::SessionExpired).to_wire().unwrap();
        assert_eq!(wire, vec![0x05, 0x05]);
        assert!(matches!(
            Response::parse(&wire).unwrap(),
            Response::Error(ErrorCode::SessionExpired)
        ));
        assert_eq!(Response::parse(&[0x05, 0x42]).err(), Some(ErrorCode::InvalidFormat));
    }

    #[test]
    fn test_gate_errors_keep_codes() {
        assert_eq!(GateError::InvalidKeyMaterial.code(), 0x03);
        assert_eq!(GateError::SessionNotFound.code(), 0x04);
        assert_eq!(GateError::EmptyInput.code(), 0x07);
    }

    #[test]
    fn test_accepted_response() {
        let id = HandshakeId::from_bytes([1; 16]);
        let report = HandshakeReport {
            handshake_id: id,
            outcome: Outcome::Accept,
            signature_valid: true,
            combined_score: 0.25,
            severity: Severity::Low,
            reason_codes: Vec::new(),
            oracle: OracleSignal::Unavailable {
                reason: "timeout".to_string(),
            },
            key_fingerprint: Some("00112233aabbccdd".to_string()),
            alert_id: None,
        };
        let wire = Response::HandshakeAccepted {
            session_key: SessionKey::from_bytes([9; KEY_LEN]),
            report: report.clone(),
        }
        .to_wire()
        .unwrap();
        assert_eq!(wire[0], 0x21);
        assert_eq!(&wire[1..33], &[9u8; KEY_LEN]);

        let Response::HandshakeAccepted {
            session_key,
            report: parsed,
        } = Response::parse(&wire).unwrap()
        else {
            panic!("expected accepted");
        };
        assert_eq!(session_key.as_bytes(), &[9u8; KEY_LEN]);
        assert_eq!(parsed, report);
    }
}
