use crate::types::encoding::DecodeError;
use hitvm_derive::Error;

/// Errors raised while loading, assembling or executing HIT programs.
#[derive(Debug, Error)]
pub enum VMError {
    /// Program container failed header or table validation.
    #[error("malformed program: {reason}")]
    MalformedProgram { reason: String },
    /// Unknown opcode encountered in bytecode.
    #[error("invalid instruction 0x{opcode:02x} at offset {offset}")]
    InvalidInstruction { opcode: u8, offset: usize },
    /// Operand read ran past the end of the image.
    #[error("unexpected end of bytecode at {ip}: wanted {requested} bytes, {available} available")]
    UnexpectedEndOfBytecode {
        ip: usize,
        requested: usize,
        available: usize,
    },
    /// Instruction pointer left the image.
    #[error("invalid instruction pointer {ip}")]
    InvalidIP { ip: usize },
    /// Arithmetic operand outside the register file.
    #[error("location {location} is not a register")]
    InvalidRegister { location: u8 },
    /// `div` with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,
    /// Event name not present in the registry.
    #[error("unknown event: {name}")]
    UnknownEvent { name: String },
    /// Unrecognized mnemonic during assembly.
    #[error("invalid instruction name: {name}")]
    InvalidInstructionName { name: String },
    /// Wrong number of operands for an instruction.
    #[error("{instruction} expects {expected} operands, got {actual}")]
    ArityMismatch {
        instruction: String,
        expected: usize,
        actual: usize,
    },
    /// Operand token could not be parsed for its kind.
    #[error("invalid {kind} operand: {token}")]
    InvalidOperand { kind: &'static str, token: String },
    /// Label defined more than once.
    #[error("duplicate label: {label}")]
    DuplicateLabel { label: String },
    /// Reference to an undefined label.
    #[error("undefined label: {label}")]
    UndefinedLabel { label: String },
    /// Assembly error with source location.
    #[error("line {line}:{offset}: {source}")]
    AssemblyError {
        line: usize,
        offset: usize,
        source: String,
    },
    /// A resource group with this name is already registered.
    #[error("resource group already registered: {name}")]
    DuplicateGroup { name: String },
    /// No resource group with this name is registered.
    #[error("unknown resource group: {name}")]
    UnknownGroup { name: String },
    /// Malformed line in an event or symbol list.
    #[error("line {line}: {reason}")]
    EventListError { line: usize, reason: String },
    /// File I/O failure.
    #[error("io error on {path}: {source}")]
    IoError { path: String, source: String },
}

impl From<DecodeError> for VMError {
    fn from(err: DecodeError) -> Self {
        let reason = match err {
            DecodeError::UnexpectedEof => "truncated",
            DecodeError::InvalidValue => "invalid value",
            DecodeError::LengthOverflow => "table too large",
        };
        VMError::MalformedProgram {
            reason: reason.to_string(),
        }
    }
}
