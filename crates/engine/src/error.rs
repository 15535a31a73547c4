use sstable::TableError;
use std::io;
use thiserror::Error;
use wal::WalError;

/// Engine errors.
///
/// Structural failures (`Corrupt*`) carry the file and offset they were
/// found at in the message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("corrupt log: {0}")]
    CorruptLog(String),

    #[error("corrupt filter block: {0}")]
    CorruptFilterBlock(String),

    #[error("corrupt table: {0}")]
    CorruptTable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine hit an unrecoverable error earlier and refuses further work.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error reports damaged on-disk data.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptManifest(_)
                | Error::CorruptLog(_)
                | Error::CorruptFilterBlock(_)
                | Error::CorruptTable(_)
        )
    }

    /// Converts a table error, naming the file it came from.
    pub(crate) fn from_table(context: impl Into<String>, e: TableError) -> Self {
        let context = context.into();
        match e {
            TableError::Io(source) => Error::Io { context, source },
            TableError::Corrupt(msg) => Error::CorruptTable(format!("{}: {}", context, msg)),
            TableError::CorruptFilterBlock(msg) => {
                Error::CorruptFilterBlock(format!("{}: {}", context, msg))
            }
            TableError::Empty => Error::InvalidArgument(format!("{}: empty table", context)),
        }
    }

    /// Like [`from_table`](Self::from_table) for an error an iterator keeps
    /// as its status.
    pub(crate) fn from_table_status(context: impl Into<String>, e: &TableError) -> Self {
        let context = context.into();
        match e {
            TableError::Io(source) => Error::Io {
                context,
                source: io::Error::new(source.kind(), source.to_string()),
            },
            TableError::Corrupt(msg) => Error::CorruptTable(format!("{}: {}", context, msg)),
            TableError::CorruptFilterBlock(msg) => {
                Error::CorruptFilterBlock(format!("{}: {}", context, msg))
            }
            TableError::Empty => Error::InvalidArgument(format!("{}: empty table", context)),
        }
    }

    /// Converts a log error; `corrupt` builds the variant for damaged
    /// records (log or manifest).
    pub(crate) fn from_wal(
        context: impl Into<String>,
        e: WalError,
        corrupt: fn(String) -> Error,
    ) -> Self {
        let context = context.into();
        match e {
            WalError::Io(source) => Error::Io { context, source },
            WalError::Corrupt { offset, reason } => {
                corrupt(format!("{} at offset {}: {}", context, offset, reason))
            }
            WalError::MalformedBatch(msg) => corrupt(format!("{}: {}", context, msg)),
        }
    }
}

/// Attaches context to raw I/O results.
pub(crate) trait IoContext<T> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::io(f(), e))
    }
}
