use thiserror::Error;

/// Failures while emitting a module. The writer itself is total over
/// well-formed layout graphs; only the byte sink can fail.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("i/o failure while writing module: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while decoding a module. All of these are fatal for the load.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unexpected end of stream")]
    EndOfStream,
    #[error("i/o failure while reading module: {0}")]
    Io(std::io::Error),
    #[error("unknown record type tag {0}")]
    UnknownTypeTag(u8),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("unknown operand kind {0}")]
    UnknownOperandKind(u8),
    #[error("unknown number type {0}")]
    UnknownNumberType(u8),
    #[error("record {0} is referenced but never defined")]
    UnresolvedRecord(u64),
    #[error("record {0} has the wrong kind for this reference")]
    RecordKindMismatch(u64),
    #[error("invalid module: {0}")]
    InvalidModule(&'static str),
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::EndOfStream
        } else {
            Self::Io(err)
        }
    }
}
