use thiserror::Error;

use crate::capability::CoordError;
use crate::client::{ConnectError, ImportError, ResolveError, ViewError};
use crate::config::ConfigError;
use crate::tree::ParseError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the canonical per-engine
/// errors, each of which stays usable on its own.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Coord(e) => coord_transience(e),
            Error::Resolve(ResolveError::Coord(e)) => coord_transience(e),
            Error::Resolve(_) => Transience::Permanent,
            Error::View(ViewError::Coord(e)) => coord_transience(e),
            Error::View(ViewError::Stale(_)) => Transience::Retryable,
            Error::View(ViewError::Resolve(ResolveError::Coord(e))) => coord_transience(e),
            Error::View(_) => Transience::Permanent,
            Error::Import(ImportError::Coord(e)) => coord_transience(e),
            Error::Import(ImportError::Resolve(ResolveError::Coord(e))) => coord_transience(e),
            Error::Import(ImportError::Resolve(_)) => Transience::Permanent,
            Error::Import(ImportError::Parse(_)) | Error::Parse(_) => Transience::Permanent,
            Error::Connect(ConnectError::Coord(e)) => coord_transience(e),
            Error::Connect(ConnectError::ConnectionFailure { .. }) => Transience::Retryable,
            Error::Connect(ConnectError::EventsUnavailable) => Transience::Permanent,
            Error::Config(_) => Transience::Permanent,
        }
    }
}

fn coord_transience(err: &CoordError) -> Transience {
    if err.is_retryable() {
        Transience::Retryable
    } else {
        Transience::Permanent
    }
}

pub type Result<T> = std::result::Result<T, Error>;
