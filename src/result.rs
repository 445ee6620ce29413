use std::fmt::Display;

use miette::miette;

#[derive(Debug)]
pub enum Error {
    /// The path resolves outside of the managed root
    Forbidden(String),

    /// The target path does not exist
    NotFound(String),

    /// The target exists but is not the kind of entry the operation works on
    WrongType {
        path: String,
        expected: &'static str,
    },

    /// A batch is already running, a new one cannot be started
    AlreadyRunning,

    /// A batch was requested without any file
    EmptyInput,

    Miette(miette::Report),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Forbidden(path) => write!(f, "Path '{path}' is outside of the managed root"),
            Error::NotFound(path) => write!(f, "Path '{path}' not found"),
            Error::WrongType { path, expected } => write!(f, "Path '{path}' must be {expected}"),
            Error::AlreadyRunning => write!(f, "A batch is already running"),
            Error::EmptyInput => write!(f, "No file provided"),
            Error::Miette(report) => write!(f, "{report}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<miette::Report> for Error {
    fn from(err: miette::Report) -> Self {
        Error::Miette(err)
    }
}

impl From<Error> for miette::Report {
    fn from(err: Error) -> Self {
        match err {
            Error::Miette(err) => err,
            err => miette!("{err}"),
        }
    }
}

impl Error {
    pub fn wrap_err_with<D, F>(self, f: F) -> Error
    where
        D: Display + Send + Sync + 'static,
        F: FnOnce() -> D,
    {
        match self {
            Error::Miette(report) => Error::Miette(report.wrap_err(f())),
            err => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
