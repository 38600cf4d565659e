use std::io;

use thiserror::Error;

use crate::router::Rejection;

/// Errors that may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The configuration file could not be read.
    #[error("Could not read configuration file: {0}")]
    ConfigIo(#[from] io::Error),

    /// The configuration file is not valid RON.
    #[error("Could not parse configuration: {0}")]
    ConfigParse(#[from] ron::error::SpannedError),

    /// The router would not give the controller a slot.
    #[error("Controller rejected: {0}")]
    Rejected(#[from] Rejection),

    /// The websocket listener could not be set up.
    #[error("Could not serve on {address}: {problem}")]
    Bind {
        /// The address we tried to listen on.
        address: String,

        /// What went wrong.
        problem: String,
    },

    /// Something unexpected happened on the server side.
    #[error("Internal issue: {0}")]
    InternalIssue(String),
}

impl Error {
    /// The message of a [`Error::BadConfig`], if that is what this is.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    /// The [`Rejection`] inside, if this is [`Error::Rejected`].
    pub fn try_into_rejected(self) -> Result<Rejection, Self> {
        if let Self::Rejected(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}
