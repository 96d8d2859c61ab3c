//! AMP: the typed, multi-field wire framing protocol used on TCP connections.
//!
//! Frame layout: one byte field count, then per field one byte type tag,
//! four bytes big-endian payload length, then that many payload bytes.
//! Deliberately trivial so independent implementations can interoperate
//! bit-exactly.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const TAG_BLOB: u8 = 0x00;
const TAG_STRING: u8 = 0x01;
const TAG_BIGINT: u8 = 0x02;
const TAG_JSON: u8 = 0x03;

const MAX_FIELDS: usize = 255;

/// A single AMP field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Raw bytes, length taken verbatim.
    Blob(Vec<u8>),
    /// UTF-8 text, no trailing NUL.
    Str(String),
    /// Signed 64-bit integer, carried on the wire as decimal ASCII text.
    BigInt(i64),
    /// A JSON value, carried on the wire as UTF-8 text.
    Json(serde_json::Value),
}

impl Field {
    fn tag(&self) -> u8 {
        match self {
            Field::Blob(_) => TAG_BLOB,
            Field::Str(_) => TAG_STRING,
            Field::BigInt(_) => TAG_BIGINT,
            Field::Json(_) => TAG_JSON,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Field::Blob(b) => b.clone(),
            Field::Str(s) => s.clone().into_bytes(),
            Field::BigInt(n) => n.to_string().into_bytes(),
            Field::Json(v) => v.to_string().into_bytes(),
        }
    }
}

/// A decode failure. Maps onto `MeshlinkError::MalformedFrame` at call sites.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message must have 1..=255 fields, got {0}")]
    FieldCount(usize),
    #[error("truncated frame")]
    Truncated,
    #[error("unknown field type tag: {0}")]
    UnknownTag(u8),
    #[error("field payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("BIGINT payload is not a valid base-10 i64")]
    InvalidBigInt,
    #[error("JSON field does not parse: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A fully decoded AMP message: an ordered, non-empty sequence of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Message(Vec<Field>);

impl Message {
    /// Build a message, validating the 1..=255 field count invariant.
    pub fn new(fields: Vec<Field>) -> Result<Self, FrameError> {
        if fields.is_empty() || fields.len() > MAX_FIELDS {
            return Err(FrameError::FieldCount(fields.len()));
        }
        Ok(Message(fields))
    }

    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.0
    }

    pub fn first(&self) -> Option<&Field> {
        self.0.first()
    }
}

/// Encode a message into its wire representation.
pub fn encode(msg: &Message) -> Vec<u8> {
    let fields = msg.fields();
    let mut out = Vec::with_capacity(1 + fields.len() * 5);
    out.push(fields.len() as u8);
    for field in fields {
        let payload = field.payload();
        out.push(field.tag());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
    }
    out
}

/// Decode a complete in-memory frame (field count + all fields present).
pub fn decode(buf: &[u8]) -> Result<Message, FrameError> {
    let mut cursor = 0usize;
    let count = *buf.first().ok_or(FrameError::Truncated)? as usize;
    cursor += 1;
    if count == 0 {
        return Err(FrameError::FieldCount(0));
    }

    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = *buf.get(cursor).ok_or(FrameError::Truncated)?;
        cursor += 1;
        let len_bytes: [u8; 4] = buf
            .get(cursor..cursor + 4)
            .ok_or(FrameError::Truncated)?
            .try_into()
            .map_err(|_| FrameError::Truncated)?;
        cursor += 4;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let payload = buf.get(cursor..cursor + len).ok_or(FrameError::Truncated)?;
        cursor += len;

        fields.push(decode_field(tag, payload)?);
    }

    Message::new(fields)
}

fn decode_field(tag: u8, payload: &[u8]) -> Result<Field, FrameError> {
    match tag {
        TAG_BLOB => Ok(Field::Blob(payload.to_vec())),
        TAG_STRING => {
            let s = std::str::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)?;
            Ok(Field::Str(s.to_owned()))
        }
        TAG_BIGINT => {
            let s = std::str::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)?;
            let n: i64 = s.parse().map_err(|_| FrameError::InvalidBigInt)?;
            Ok(Field::BigInt(n))
        }
        TAG_JSON => {
            let s = std::str::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)?;
            let v: serde_json::Value = serde_json::from_str(s)?;
            Ok(Field::Json(v))
        }
        other => Err(FrameError::UnknownTag(other)),
    }
}

/// Write a message to an async byte stream.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), FrameError> {
    let bytes = encode(msg);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message from an async byte stream.
///
/// Reads the field-count byte, then each field's tag+length+payload in turn.
/// A clean EOF before any byte is read surfaces as `FrameError::Io` with
/// `ErrorKind::UnexpectedEof`, which callers treat as a closed connection.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, FrameError> {
    let count = reader.read_u8().await?;
    if count == 0 {
        return Err(FrameError::FieldCount(0));
    }

    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = reader.read_u8().await?;
        let len = reader.read_u32().await?;
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        fields.push(decode_field(tag, &payload)?);
    }

    Message::new(fields)
}
