/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::{fmt::Display, io::ErrorKind};

#[derive(Debug, Clone)]
pub struct RezipError {
    /// standard error code
    exit_code: ExitCode,

    /// diagnostic message including location. Content should not be relied on.
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExitCode {
    /// the reference DEFLATE stream is malformed
    InvalidDeflate = 1,
    /// the reference gzip member header is malformed or unsupported
    InvalidGzipHeader = 2,
    /// the reference ended in the middle of a block or header
    ShortRead = 3,
    /// reading from the reference source failed
    SourceRead = 4,
    /// writing to the output sink failed
    SinkWrite = 5,
    /// an operation was attempted after close
    UseAfterClose = 6,
    /// the reference cursor could not be realigned with the output
    ResyncFailure = 7,
    /// a reference block decoded to more bytes than allowed
    BlockTooLarge = 8,
    /// an earlier fatal error left the session unusable
    SessionFailed = 9,
    /// the configuration can't be written as a valid gzip stream
    InvalidConfig = 10,
    OsError = 17,
}

impl ExitCode {
    /// errors raised while reading the reference that only disable the fast path
    /// instead of failing the session
    pub fn is_reference_error(&self) -> bool {
        matches!(
            self,
            ExitCode::InvalidDeflate
                | ExitCode::InvalidGzipHeader
                | ExitCode::ShortRead
                | ExitCode::BlockTooLarge
                | ExitCode::ResyncFailure
        )
    }

    /// value used as the process exit code
    pub fn as_integer_error_code(self) -> i32 {
        self as i32
    }
}

impl Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for RezipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}: {1}", self.exit_code, self.message)
    }
}

pub type Result<T> = std::result::Result<T, RezipError>;

impl RezipError {
    pub fn new(exit_code: ExitCode, message: &str) -> RezipError {
        RezipError {
            exit_code,
            message: message.to_owned(),
        }
    }

    pub fn wrap(exit_code: ExitCode, e: &impl Display) -> RezipError {
        RezipError {
            exit_code,
            message: e.to_string(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    #[track_caller]
    pub fn add_context(&mut self) {
        let caller = std::panic::Location::caller();
        self.message
            .push_str(&format!("\n at {}:{}", caller.file(), caller.line()));
    }
}

#[cold]
#[track_caller]
pub fn err_exit_code<T>(error_code: ExitCode, message: &str) -> Result<T> {
    let mut e = RezipError::new(error_code, message);
    e.add_context();
    Err(e)
}

/// appends the location of the caller to the error message while it is being propagated
pub trait AddContext<T> {
    #[track_caller]
    fn context(self) -> Result<T>;
}

impl<T, E: Into<RezipError>> AddContext<T> for core::result::Result<T, E> {
    #[track_caller]
    fn context(self) -> Result<T> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => {
                let mut e = e.into();
                e.add_context();
                Err(e)
            }
        }
    }
}

/// translates std::io::Error into RezipError
impl From<std::io::Error> for RezipError {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        match e.downcast::<RezipError>() {
            Ok(le) => le,
            Err(e) => {
                let caller = std::panic::Location::caller();
                RezipError {
                    exit_code: get_io_error_exit_code(&e),
                    message: format!("error {} at {}", e, caller),
                }
            }
        }
    }
}

fn get_io_error_exit_code(e: &std::io::Error) -> ExitCode {
    if e.kind() == ErrorKind::UnexpectedEof {
        ExitCode::ShortRead
    } else {
        ExitCode::OsError
    }
}

/// translates RezipError into std::io::Error, which involves putting into a Box and using Other
impl From<RezipError> for std::io::Error {
    fn from(e: RezipError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

impl std::error::Error for RezipError {}

#[test]
fn test_error_translation() {
    // test wrapping inside an io error
    fn my_std_error() -> core::result::Result<(), std::io::Error> {
        Err(RezipError::new(ExitCode::InvalidDeflate, "test error").into())
    }

    let e: RezipError = my_std_error().unwrap_err().into();
    assert_eq!(e.exit_code, ExitCode::InvalidDeflate);
    assert_eq!(e.message, "test error");

    // an IO error should be translated into an OsError
    let e: RezipError =
        std::io::Error::new(std::io::ErrorKind::NotFound, "file not found").into();
    assert_eq!(e.exit_code, ExitCode::OsError);

    // truncated input is a short read
    let e: RezipError = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into();
    assert_eq!(e.exit_code, ExitCode::ShortRead);
    assert!(e.exit_code().is_reference_error());
}

#[test]
fn test_context_appends_location() {
    fn fails() -> Result<()> {
        err_exit_code(ExitCode::BlockTooLarge, "too big")
    }

    let e = fails().context().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::BlockTooLarge);
    assert!(e.message().starts_with("too big"));
    assert!(e.message().contains("rezip_error.rs"));
}
