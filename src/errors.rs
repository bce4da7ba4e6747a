use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;

use crate::locks::LockError;
use crate::store::StoreError;

#[derive(Debug)]
pub enum DavError {
    XmlReadError,  // error reading/parsing xml
    XmlParseError, // error interpreting xml
    InvalidPath,   // error parsing path
    IllegalPath,   // path not valid here
    ForbiddenPath, // too many dotdots
    UnknownDavMethod,
    Status(StatusCode),
    StatusClose(StatusCode),
    StoreError(StoreError),
    LockError(LockError),
    IoError(io::Error),
    XmlReaderError(xml::reader::Error),
    XmlWriterError(xml::writer::Error),
    XmlNameError(String), // element name without a prefix
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::StoreError(e) => Some(e),
            DavError::LockError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::XmlReaderError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlReaderError(_) => write!(f, "XML parse error"),
            DavError::XmlWriterError(_) => write!(f, "XML generate error"),
            DavError::XmlNameError(n) => write!(f, "XML element name without prefix: {}", n),
            DavError::IoError(_) => write!(f, "I/O error"),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl From<StoreError> for DavError {
    fn from(e: StoreError) -> Self {
        DavError::StoreError(e)
    }
}

impl From<LockError> for DavError {
    fn from(e: LockError) -> Self {
        DavError::LockError(e)
    }
}

impl From<DavError> for io::Error {
    fn from(e: DavError) -> Self {
        match e {
            DavError::IoError(e) => e,
            e => io::Error::other(e),
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<xml::reader::Error> for DavError {
    fn from(e: xml::reader::Error) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriterError(e)
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn storeerror_to_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        StoreError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        StoreError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Forbidden => StatusCode::FORBIDDEN,
        StoreError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::StoreError(e) => storeerror_to_status(e),
            DavError::LockError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::XmlReaderError(_) => StatusCode::BAD_REQUEST,
            DavError::XmlWriterError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::XmlNameError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(self, DavError::Status(_) | DavError::StoreError(_))
    }

    // Faults that abort the transaction. Everything else is a
    // protocol answer the executor chose deliberately.
    pub(crate) fn is_unexpected(&self) -> bool {
        self.statuscode().is_server_error()
    }
}
