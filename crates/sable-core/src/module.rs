//! Compiled-module container format and prepared scripts
//!
//! A compiled module wraps a source body in a fixed header so tooling can
//! identify and validate it without a runtime:
//!
//! ```text
//! offset  size  field
//! 0       8     magic  ("SBLMOD\r\n")
//! 8       4     version (u32 LE)
//! 12      4     body length (u32 LE)
//! 16      n     body (source bytes)
//! 16+n    rest  epilogue (opaque trailing bytes, may be empty)
//! ```
//!
//! The sniff/sanity/epilogue functions are pure functions over byte
//! buffers; no runtime is required.

use thiserror::Error;

use crate::error::{EngineError, EngineResult};

/// Magic number for compiled Sable modules.
pub const MAGIC: [u8; 8] = *b"SBLMOD\r\n";

/// Current container version.
pub const VERSION: u32 = 2;

/// Header length in bytes (magic + version + body length).
pub const HEADER_LEN: usize = 16;

/// Container decoding errors
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Buffer shorter than the fixed header
    #[error("truncated module: {0} bytes, header needs {HEADER_LEN}")]
    Truncated(usize),

    /// Magic number mismatch
    #[error("invalid magic number")]
    InvalidMagic,

    /// Version newer than this build understands
    #[error("unsupported module version {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Declared body length exceeds the buffer
    #[error("body length {body} overruns buffer of {len} bytes")]
    BodyOverrun {
        /// Declared body length
        body: usize,
        /// Actual buffer length past the header
        len: usize,
    },
}

/// Format sniff: does this buffer start with a module header?
pub fn is_module(data: &[u8]) -> bool {
    data.len() >= MAGIC.len() && data[..MAGIC.len()] == MAGIC
}

/// Split a module buffer into `(version, body, epilogue)`.
pub fn decode(data: &[u8]) -> Result<(u32, &[u8], &[u8]), ContainerError> {
    if data.len() < HEADER_LEN {
        return Err(ContainerError::Truncated(data.len()));
    }
    if !is_module(data) {
        return Err(ContainerError::InvalidMagic);
    }
    let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if version > VERSION {
        return Err(ContainerError::UnsupportedVersion(version));
    }
    let body_len = u32::from_le_bytes([data[12], data[13], data[14], data[15]]) as usize;
    let rest = &data[HEADER_LEN..];
    if body_len > rest.len() {
        return Err(ContainerError::BodyOverrun {
            body: body_len,
            len: rest.len(),
        });
    }
    Ok((version, &rest[..body_len], &rest[body_len..]))
}

/// Header and length consistency check.
pub fn sanity_check(data: &[u8]) -> bool {
    decode(data).is_ok()
}

/// The epilogue region of a valid module buffer.
pub fn epilogue(data: &[u8]) -> Option<&[u8]> {
    decode(data).ok().map(|(_, _, epi)| epi)
}

/// Encode a body (and optional epilogue) into a module buffer.
pub fn encode(body: &[u8], epilogue: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + epilogue.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(epilogue);
    out
}

/// A parsed script, ready for repeated evaluation.
///
/// Independent of any engine instance: parsing happens once here,
/// instantiation happens per evaluation. Evaluating against an engine
/// that has since been destroyed is the caller's contract violation.
pub struct PreparedScript {
    id: String,
    doc: serde_json::Value,
}

impl PreparedScript {
    /// Parse source bytes (raw or module-wrapped) under an identifier.
    pub fn compile(bytes: &[u8], id: &str) -> EngineResult<Self> {
        let body = if is_module(bytes) {
            decode(bytes)
                .map_err(|e| EngineError::Fault(format!("{id}: {e}")))?
                .1
        } else {
            bytes
        };
        let doc = serde_json::from_slice(body)
            .map_err(|e| EngineError::Fault(format!("{id}: {e}")))?;
        Ok(PreparedScript {
            id: id.to_string(),
            doc,
        })
    }

    /// The identifier supplied at compile time.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn doc(&self) -> &serde_json::Value {
        &self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_and_sanity() {
        let module = encode(b"null", b"");
        assert!(is_module(&module));
        assert!(sanity_check(&module));

        assert!(!is_module(b"null"));
        assert!(!is_module(b""));
        assert!(!sanity_check(b"SBLMOD\r\n")); // header truncated
    }

    #[test]
    fn decode_rejects_bad_headers() {
        let mut module = encode(b"[1,2]", b"tail");
        let (version, body, epi) = decode(&module).unwrap();
        assert_eq!(version, VERSION);
        assert_eq!(body, &b"[1,2]"[..]);
        assert_eq!(epi, &b"tail"[..]);

        module[0] = b'X';
        assert!(matches!(decode(&module), Err(ContainerError::InvalidMagic)));

        let mut newer = encode(b"1", b"");
        newer[8..12].copy_from_slice(&(VERSION + 1).to_le_bytes());
        assert!(matches!(
            decode(&newer),
            Err(ContainerError::UnsupportedVersion(_))
        ));

        let mut overrun = encode(b"1", b"");
        overrun[12..16].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            decode(&overrun),
            Err(ContainerError::BodyOverrun { .. })
        ));
    }

    #[test]
    fn epilogue_region() {
        let module = encode(b"{}", b"\x01\x02\x03");
        assert_eq!(epilogue(&module), Some(&b"\x01\x02\x03"[..]));

        let bare = encode(b"{}", b"");
        assert_eq!(epilogue(&bare), Some(&b""[..]));

        assert_eq!(epilogue(b"not a module"), None);
    }

    #[test]
    fn prepared_script_accepts_raw_and_wrapped() {
        let raw = PreparedScript::compile(b"{\"k\":3}", "raw.sbl").unwrap();
        assert_eq!(raw.id(), "raw.sbl");

        let wrapped = encode(b"{\"k\":3}", b"");
        let prepared = PreparedScript::compile(&wrapped, "wrapped.sbl").unwrap();
        assert_eq!(prepared.doc(), raw.doc());

        assert!(PreparedScript::compile(b"{nope", "bad.sbl").is_err());
    }
}
