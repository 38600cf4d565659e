use std::{io, string};

use thiserror::Error;

/// Any error the serial side might encounter.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// Utf8 related errors.
    #[error("Problem with UTF8 conversion")]
    Utf8(#[from] string::FromUtf8Error),

    /// The port could not be opened.
    #[error("Could not open port at {path}, problem: {problem}")]
    Open {
        /// The port we tried to open.
        path: String,

        /// What went wrong.
        problem: String,
    },

    /// A line grew beyond what any controller would send.
    #[error("Line exceeded {0} bytes without a delimiter")]
    LineTooLong(usize),
}
