//! Error types for the script decompiler

use thiserror::Error;

/// Decompiler errors
///
/// Only conditions that stop the pipeline are represented here. Best-effort
/// conditions (operand stack underflow, join-point stack mismatches) are logged
/// where they are detected and never surface as an `Err`.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Input errors
    /// Input file could not be read
    #[error("Failed to read {path}: {message}")]
    Io {
        /// Path that was being read
        path: String,
        /// Underlying I/O error description
        message: String,
    },

    /// Filename carries neither architecture marker
    ///
    /// **Triggered by:** A path containing neither `xsc` nor `ysc`
    #[error("Unknown architecture, path: {path}")]
    UnknownArchitecture {
        /// Offending path
        path: String,
    },

    /// Resource container is truncated or has an unrecognized header
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    // Decoding errors
    /// Raw bytecode could not be decoded
    #[error("Decode error at 0x{address:06x}: {message}")]
    Decode {
        /// Address of the instruction being decoded
        address: u32,
        /// Error description
        message: String,
    },

    /// Native-name database failed to load
    ///
    /// **Recovery:** Classified as Recoverable; calls fall back to raw hashes
    #[error("Native database error: {0}")]
    NativeDb(String),

    // Internal invariant violations
    /// Instruction stream was advanced past its last instruction
    ///
    /// **Triggered by:** Control-flow discovery and interpretation disagreeing
    /// about where a block ends
    #[error("Unexpected end of instruction stream at position {position}")]
    EndOfStream {
        /// Cursor position at the time of the read
        position: usize,
    },

    /// A return instruction declared more than one return value
    #[error("Unable to infer return value of function: return at 0x{address:06x} yields {count} values")]
    UnsupportedReturnArity {
        /// Address of the return instruction
        address: u32,
        /// Declared return-value count
        count: u8,
    },

    /// Two returns of one function yield different numbers of values
    #[error("Conflicting return arity in {function}: return at 0x{address:06x} yields {found} values, expected {existing}")]
    ReturnArityConflict {
        /// Function identifier
        function: String,
        /// Address of the offending return
        address: u32,
        /// Value count of the first return seen
        existing: u8,
        /// Value count of this return
        found: u8,
    },

    /// Output variable was inferred twice with incompatible types
    #[error("Conflicting return types in {function}: {existing} vs {inferred}")]
    ReturnTypeConflict {
        /// Function identifier
        function: String,
        /// Previously inferred type
        existing: String,
        /// Newly inferred type
        inferred: String,
    },

    /// Instruction kind paired with an operand payload of the wrong shape
    #[error("Operand payload does not match {kind} at 0x{address:06x}")]
    OperandMismatch {
        /// Address of the instruction
        address: u32,
        /// Instruction kind name
        kind: String,
    },
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Fatal error that aborts the run
    Fatal,
    /// Recoverable error; the pipeline degrades and continues
    Recoverable,
}

impl Error {
    /// Create a decode error at an address
    pub fn decode(address: u32, msg: impl Into<String>) -> Self {
        Error::Decode {
            address,
            message: msg.into(),
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::NativeDb(_) => ErrorSeverity::Recoverable,
            _ => ErrorSeverity::Fatal,
        }
    }

    /// Whether this error must terminate the process
    pub fn is_fatal(&self) -> bool {
        self.classify() == ErrorSeverity::Fatal
    }
}

/// Result type for decompiler operations
pub type Result<T> = std::result::Result<T, Error>;
