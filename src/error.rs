//! Error handling for the Redfire SNMP client

use crate::asn1::Oid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ASN.1 syntax error: {0}")]
    Syntax(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("The requested SNMP operation timed out")]
    Timeout,

    #[error("Failed to connect")]
    NoConnection,

    #[error("Failed to establish authentication parameters")]
    NoAuthParams,

    #[error("Failed to decrypt SNMP response")]
    Decryption,

    #[error("USM report: {0}")]
    AuthV3(&'static str),

    #[error("Too many rows")]
    TooManyRows,

    #[error("{}", status_message(.status, .oid.as_ref()))]
    Status { status: ErrorStatus, oid: Option<Oid> },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse result: {0}")]
    ParseResult(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    pub fn syntax<S: Into<String>>(msg: S) -> Self {
        Self::Syntax(msg.into())
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn parse_result<S: Into<String>>(msg: S) -> Self {
        Self::ParseResult(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Agent error-status reply, with the offending OID when the
    /// error-index was in range.
    pub fn status(status: ErrorStatus, oid: Option<Oid>) -> Self {
        Self::Status { status, oid }
    }
}

fn status_message(status: &ErrorStatus, oid: Option<&Oid>) -> String {
    match oid {
        Some(oid) => format!("message: {status} oid: {oid}"),
        None => format!("message: {status}"),
    }
}

/// SNMP error-status codes 1..=18 from a response PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorStatus {
    TooBig = 1,
    NoSuchName = 2,
    BadValue = 3,
    ReadOnly = 4,
    GenErr = 5,
    NoAccess = 6,
    WrongType = 7,
    WrongLength = 8,
    WrongEncoding = 9,
    WrongValue = 10,
    NoCreation = 11,
    InconsistentValue = 12,
    ResourceUnavailable = 13,
    CommitFailed = 14,
    UndoFailed = 15,
    AuthorizationError = 16,
    NotWritable = 17,
    InconsistentName = 18,
}

impl ErrorStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => Self::TooBig,
            2 => Self::NoSuchName,
            3 => Self::BadValue,
            4 => Self::ReadOnly,
            5 => Self::GenErr,
            6 => Self::NoAccess,
            7 => Self::WrongType,
            8 => Self::WrongLength,
            9 => Self::WrongEncoding,
            10 => Self::WrongValue,
            11 => Self::NoCreation,
            12 => Self::InconsistentValue,
            13 => Self::ResourceUnavailable,
            14 => Self::CommitFailed,
            15 => Self::UndoFailed,
            16 => Self::AuthorizationError,
            17 => Self::NotWritable,
            18 => Self::InconsistentName,
            _ => return None,
        })
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::TooBig => {
                "The agent could not place the results of the requested SNMP \
                 operation in a single SNMP message."
            }
            Self::NoSuchName => {
                "The requested SNMP operation identified an unknown variable."
            }
            Self::BadValue => {
                "The requested SNMP operation tried to change a variable but \
                 it specified either a syntax or value error."
            }
            Self::ReadOnly => {
                "The requested SNMP operation tried to change a variable that \
                 was not allowed to change, according to the community \
                 profile of the variable."
            }
            Self::GenErr => {
                "An error other than one of those listed here occurred during \
                 the requested SNMP operation."
            }
            Self::NoAccess => "The specified SNMP variable is not accessible.",
            Self::WrongType => {
                "The value specifies a type that is inconsistent with the \
                 type required for the variable."
            }
            Self::WrongLength => {
                "The value specifies a length that is inconsistent with the \
                 length required for the variable."
            }
            Self::WrongEncoding => {
                "The value contains an Abstract Syntax Notation One (ASN.1) \
                 encoding that is inconsistent with the ASN.1 tag of the \
                 field."
            }
            Self::WrongValue => "The value cannot be assigned to the variable.",
            Self::NoCreation => {
                "The variable does not exist, and the agent cannot create it."
            }
            Self::InconsistentValue => {
                "The value is inconsistent with values of other managed \
                 objects."
            }
            Self::ResourceUnavailable => {
                "Assigning the value to the variable requires allocation of \
                 resources that are currently unavailable."
            }
            Self::CommitFailed => {
                "No validation errors occurred, but no variables were updated."
            }
            Self::UndoFailed => {
                "No validation errors occurred. Some variables were updated \
                 because it was not possible to undo their assignment."
            }
            Self::AuthorizationError => "An authorization error occurred.",
            Self::NotWritable => {
                "The variable exists but the agent cannot modify it."
            }
            Self::InconsistentName => {
                "The variable does not exist; the agent cannot create it \
                 because the named object instance is inconsistent with the \
                 values of other managed objects."
            }
        };
        f.write_str(msg)
    }
}
