//! Little-endian binary readers/writers for profile files, record tags, and
//! the profile error type shared across this crate.

use std::fmt;
use std::io::{self, Read, Write};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while reading, writing, or combining profiles.
#[derive(Debug)]
pub enum ProfileError {
    /// Underlying file or stream failure.
    Io(io::Error),
    /// Header/data inconsistency or an unknown record tag.
    Format(String),
    /// A structurally valid profile used in the wrong place (wrong kind,
    /// unexpected histogram shape).
    Semantic(String),
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::Io(e) => write!(f, "profile i/o error: {e}"),
            ProfileError::Format(m) => write!(f, "profile format error: {m}"),
            ProfileError::Semantic(m) => write!(f, "profile semantic error: {m}"),
        }
    }
}

impl std::error::Error for ProfileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProfileError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProfileError {
    fn from(e: io::Error) -> Self {
        ProfileError::Io(e)
    }
}

pub type ProfileResult<T> = Result<T, ProfileError>;

// =============================================================================
// Record tags
// =============================================================================

/// Record tags appearing in raw and combined profile files. Raw trial
/// records (`Argument`/`Edge`/`Path`/`Call`) are produced by the
/// instrumented runtime; the `Combined*` tags head serialized combined
/// profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RecordTag {
    Argument = 1,
    Edge = 4,
    Path = 5,
    Call = 8,
    CombinedEdge = 9,
    CombinedPath = 10,
    CombinedCall = 11,
}

impl RecordTag {
    pub fn from_u32(v: u32) -> Option<RecordTag> {
        match v {
            1 => Some(RecordTag::Argument),
            4 => Some(RecordTag::Edge),
            5 => Some(RecordTag::Path),
            8 => Some(RecordTag::Call),
            9 => Some(RecordTag::CombinedEdge),
            10 => Some(RecordTag::CombinedPath),
            11 => Some(RecordTag::CombinedCall),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordTag::Argument => "argument",
            RecordTag::Edge => "edge",
            RecordTag::Path => "path",
            RecordTag::Call => "call",
            RecordTag::CombinedEdge => "combined-edge",
            RecordTag::CombinedPath => "combined-path",
            RecordTag::CombinedCall => "combined-call",
        }
    }
}

// =============================================================================
// Reader / writer
// =============================================================================

/// Little-endian primitive reader over any byte source.
pub struct ProfileReader<R> {
    inner: R,
}

impl<R: Read> ProfileReader<R> {
    pub fn new(inner: R) -> Self {
        ProfileReader { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next record tag; `Ok(None)` at a clean end of stream.
    pub fn read_tag(&mut self) -> ProfileResult<Option<u32>> {
        let mut buf = [0u8; 4];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_u32(&mut self) -> ProfileResult<u32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> ProfileResult<f64> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub fn read_u32_vec(&mut self, n: usize) -> ProfileResult<Vec<u32>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_u32()?);
        }
        Ok(out)
    }

    /// Skip `n` bytes (alignment padding and skipped payloads).
    pub fn skip(&mut self, n: usize) -> ProfileResult<()> {
        let mut remaining = n;
        let mut buf = [0u8; 64];
        while remaining > 0 {
            let take = remaining.min(buf.len());
            self.inner.read_exact(&mut buf[..take])?;
            remaining -= take;
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> ProfileResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Little-endian primitive writer.
pub struct ProfileWriter<W> {
    inner: W,
}

impl<W: Write> ProfileWriter<W> {
    pub fn new(inner: W) -> Self {
        ProfileWriter { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_u32(&mut self, v: u32) -> ProfileResult<()> {
        self.inner.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> ProfileResult<()> {
        self.inner.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_tag(&mut self, tag: RecordTag) -> ProfileResult<()> {
        self.write_u32(tag as u32)
    }

    pub fn flush(&mut self) -> ProfileResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Padding needed to 4-byte-align a payload of `len` bytes.
#[inline]
pub fn align4_padding(len: usize) -> usize {
    (4 - (len & 3)) & 3
}
