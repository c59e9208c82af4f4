//! The error catalog and diagnostic types.

use std::fmt;

/// Everything that can go wrong on a source line.
///
/// Most kinds are line-scoped: they are reported with their location and
/// assembly carries on so one run can surface several problems. The few
/// fatal kinds (I/O failures, ungated unstable opcodes) abort the run and
/// the output file is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    OutOfRange,
    SeekOutOfRange,
    BadIncbinSize,
    NotANumber,
    UnknownLabel,
    Illegal,
    IncompleteExp,
    LabelDefined,
    MissingOperand,
    DivZero,
    BadAddr,
    NeedName,
    CantCreateFile,
    CantOpen,
    CantWrite,
    CompareFailed { offset: i64, byte: u8 },
    CantSeek,
    CantSeekEnum,
    InvalidHeader,
    ExtraEndm,
    ExtraEndr,
    ExtraEnde,
    ExtraEndinl,
    NoEndif,
    NoEndm,
    NoEndr,
    NoEnde,
    NoEndinl,
    RecursiveMacro,
    RecursiveEquate,
    IfNestLimit,
    UndefinedPc,
    PcOutOfRange,
    BranchOutOfRange,
    ExtraChars,
    MacroInExpression,
    UnstableOpcode,
    HighlyUnstableOpcode,
    User(String),
}

impl ErrorKind {
    /// Fatal kinds abort the whole run instead of just the current line.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::CantCreateFile
                | ErrorKind::CantWrite
                | ErrorKind::CantSeek
                | ErrorKind::UnstableOpcode
                | ErrorKind::HighlyUnstableOpcode
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::OutOfRange => write!(f, "Value out of range."),
            ErrorKind::SeekOutOfRange => write!(f, "Seek position out of range."),
            ErrorKind::BadIncbinSize => write!(f, "INCBIN size is out of range."),
            ErrorKind::NotANumber => write!(f, "Not a number."),
            ErrorKind::UnknownLabel => write!(f, "Unknown label."),
            ErrorKind::Illegal => write!(f, "Illegal instruction."),
            ErrorKind::IncompleteExp => write!(f, "Incomplete expression."),
            ErrorKind::LabelDefined => write!(f, "Label already defined."),
            ErrorKind::MissingOperand => write!(f, "Missing operand."),
            ErrorKind::DivZero => write!(f, "Divide by zero."),
            ErrorKind::BadAddr => write!(f, "Can't determine address."),
            ErrorKind::NeedName => write!(f, "Need a name."),
            ErrorKind::CantCreateFile => write!(f, "Can't create output file."),
            ErrorKind::CantOpen => write!(f, "Can't open file."),
            ErrorKind::CantWrite => write!(f, "Write error."),
            ErrorKind::CompareFailed { offset, byte } => {
                write!(f, "Compare failed. Byte at 0x{offset:08x} was 0x{byte:02x}.")
            }
            ErrorKind::CantSeek => write!(f, "Can't seek in file."),
            ErrorKind::CantSeekEnum => write!(f, "Can't seek in enum mode."),
            ErrorKind::InvalidHeader => write!(f, "iNES header invalid."),
            ErrorKind::ExtraEndm => write!(f, "ENDM without MACRO."),
            ErrorKind::ExtraEndr => write!(f, "ENDR without REPT."),
            ErrorKind::ExtraEnde => write!(f, "ENDE without ENUM."),
            ErrorKind::ExtraEndinl => write!(f, "ENDINL without IGNORENL."),
            ErrorKind::NoEndif => write!(f, "Missing ENDIF."),
            ErrorKind::NoEndm => write!(f, "Missing ENDM."),
            ErrorKind::NoEndr => write!(f, "Missing ENDR."),
            ErrorKind::NoEnde => write!(f, "Missing ENDE."),
            ErrorKind::NoEndinl => write!(f, "Missing ENDINL."),
            ErrorKind::RecursiveMacro => write!(f, "Recursive MACRO not allowed."),
            ErrorKind::RecursiveEquate => write!(f, "Recursive EQU not allowed."),
            ErrorKind::IfNestLimit => write!(f, "Too many nested IFs."),
            ErrorKind::UndefinedPc => write!(f, "PC is undefined (use ORG first)"),
            ErrorKind::PcOutOfRange => write!(f, "PC out of range."),
            ErrorKind::BranchOutOfRange => write!(f, "Branch out of range."),
            ErrorKind::ExtraChars => write!(f, "Extra characters on line."),
            ErrorKind::MacroInExpression => write!(f, "Can't use macro in expression."),
            ErrorKind::UnstableOpcode => {
                write!(f, "Unstable instruction (gate it with UNSTABLE).")
            }
            ErrorKind::HighlyUnstableOpcode => {
                write!(f, "Highly unstable instruction (gate it with HUNSTABLE).")
            }
            ErrorKind::User(msg) => write!(f, "{msg}"),
        }
    }
}

/// One reported problem, with its source location. For lines produced by a
/// macro or repeat expansion, `file` carries the expansion site as
/// `file(line):name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub line: usize,
    pub kind: ErrorKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}): {}", self.file, self.line, self.kind)
    }
}

/// An error that can occur during the assembly process
#[derive(Debug)]
pub enum Error {
    /// The source (or an included file) could not be read
    Read { path: String },
    /// An auxiliary output file could not be written
    Write { path: String },
    /// Assembly aborted on a fatal problem
    Fatal(Diagnostic),
    /// Assembly finished but hard errors were reported
    Failed { first: Diagnostic, count: usize },
    /// The source produced no output bytes
    NothingToDo,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Read { path } => write!(f, "failed to read file {path}"),
            Error::Write { path } => write!(f, "failed to write file {path}"),
            Error::Fatal(diag) => write!(f, "{diag}"),
            Error::Failed { first, count } => {
                if *count == 1 {
                    write!(f, "{first}")
                } else {
                    write!(f, "{first} ({count} errors total)")
                }
            }
            Error::NothingToDo => write!(f, "nothing to do: no output was generated"),
        }
    }
}
