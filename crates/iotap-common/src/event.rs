use core::fmt;

/// Size in bytes of an encoded [`RawEvent`].
pub const RAW_EVENT_SIZE: usize = 8;

const _: () = assert!(core::mem::size_of::<RawEvent>() == RAW_EVENT_SIZE);

/// Monitored operation.
///
/// The discriminant is the tag written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OperationKind {
    Read = 1,
    Write = 2,
}

impl OperationKind {
    pub const fn tag(self) -> u32 {
        self as u32
    }

    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            _ => None,
        }
    }

    /// Name of the syscall monitored for this operation.
    pub const fn syscall(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sys_{}", self.syscall())
    }
}

/// Record emitted for every accepted invocation.
///
/// Layout, little-endian, no padding:
///
/// | offset | size | field |
/// |--------|------|-------|
/// | 0      | 4    | `pid` |
/// | 4      | 4    | `kind` ([`OperationKind`] tag) |
///
/// The consumer decodes it without any schema negotiation: changing this
/// layout breaks every deployed consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RawEvent {
    pub pid: u32,
    pub kind: u32,
}

impl RawEvent {
    #[inline(always)]
    pub const fn new(pid: u32, kind: OperationKind) -> Self {
        Self {
            pid,
            kind: kind.tag(),
        }
    }

    /// `None` when the record carries a tag unknown to this build.
    pub const fn operation(&self) -> Option<OperationKind> {
        OperationKind::from_tag(self.kind)
    }

    pub fn to_bytes(&self) -> [u8; RAW_EVENT_SIZE] {
        let mut bytes = [0; RAW_EVENT_SIZE];
        bytes[..4].copy_from_slice(&self.pid.to_le_bytes());
        bytes[4..].copy_from_slice(&self.kind.to_le_bytes());
        bytes
    }

    /// Decode a record from the start of `bytes`.
    ///
    /// Perf buffers are padded to 8 bytes, trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < RAW_EVENT_SIZE {
            return Err(DecodeError::Truncated { len: bytes.len() });
        }
        let mut pid = [0; 4];
        let mut kind = [0; 4];
        pid.copy_from_slice(&bytes[..4]);
        kind.copy_from_slice(&bytes[4..RAW_EVENT_SIZE]);
        Ok(Self {
            pid: u32::from_le_bytes(pid),
            kind: u32::from_le_bytes(kind),
        })
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation() {
            Some(operation) => write!(f, "{} {}", self.pid, operation),
            None => write!(f, "{} unknown({})", self.pid, self.kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(
                f,
                "record too short: {len} bytes, expected at least {RAW_EVENT_SIZE}"
            ),
        }
    }
}
