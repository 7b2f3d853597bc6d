//! Error types and result definitions for sync operations.
//!
//! Every failure of a sync run is a [`SyncError`]: a classified [`ErrorKind`], a static
//! description, optional dynamic detail (table, column and the database message), an optional
//! source and the captured callsite. Which status a failed run reports is decided by the
//! orchestrator from the kind and the stage that failed.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use postgres::schema::IdentifierError;

/// Result type of fallible sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the sync engine.
#[derive(Debug, Clone)]
pub struct SyncError {
    payload: ErrorPayload,
}

/// Categories of errors raised while synchronizing a table.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration Errors
    ConfigError,
    MissingKeyColumn,
    InvalidIdentifier,

    // Input Errors
    ExtractError,

    // Connection Errors
    ConnectionFailed,
    AuthenticationError,

    // Schema Errors
    SchemaError,
    MissingTable,

    // Data Errors
    ConstraintViolation,
    ConversionError,
    ValueTooLong,

    // Execution Errors
    QueryFailed,
    TransactionFailed,
    OperationCanceled,
    ResourceExhausted,

    // IO Errors
    IoError,

    Unknown,
}

impl ErrorKind {
    /// Returns `true` for kinds that mean the database could not be reached at all.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed | ErrorKind::AuthenticationError
        )
    }

    /// Returns `true` for kinds raised before any data is touched because the run is
    /// misconfigured.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigError | ErrorKind::MissingKeyColumn | ErrorKind::InvalidIdentifier
        )
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    pub fn description(&self) -> &str {
        &self.payload.description
    }

    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Prefixes the detail with `context`, typically the table or column being processed.
    pub fn with_context(mut self, context: impl fmt::Display) -> Self {
        let detail = match self.payload.detail.take() {
            Some(detail) => format!("{context}: {detail}"),
            None => context.to_string(),
        };
        self.payload.detail = Some(Cow::Owned(detail));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SyncError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            },
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let payload = &self.payload;
        let location = payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        write_detail(payload.detail.as_deref(), f)?;
        write_backtrace(payload.backtrace.as_ref(), f)?;

        Ok(())
    }
}

impl error::Error for SyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

fn write_backtrace(backtrace: &Backtrace, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n  Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n    ")?;
            } else {
                write!(f, "\n    {line}")?;
            }
        }
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(detail) = detail {
        if detail.trim().is_empty() {
            write!(f, "\n  Detail: <empty>")?;
        } else {
            write!(f, "\n  Detail:")?;
            for line in detail.lines() {
                write!(f, "\n    {line}")?;
            }
        }
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for SyncError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for SyncError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

impl From<std::io::Error> for SyncError {
    #[track_caller]
    fn from(err: std::io::Error) -> SyncError {
        let detail = err.to_string();
        SyncError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`csv::Error`] into an [`ErrorKind::ExtractError`], or [`ErrorKind::IoError`] when
/// the underlying reader failed.
impl From<csv::Error> for SyncError {
    #[track_caller]
    fn from(err: csv::Error) -> SyncError {
        let (kind, description) = match err.kind() {
            csv::ErrorKind::Io(_) => (ErrorKind::IoError, "Reading the extract failed"),
            csv::ErrorKind::Utf8 { .. } => (ErrorKind::ExtractError, "Extract is not valid UTF-8"),
            _ => (ErrorKind::ExtractError, "Extract could not be parsed"),
        };

        let detail = err.to_string();
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<IdentifierError> for SyncError {
    #[track_caller]
    fn from(err: IdentifierError) -> SyncError {
        let detail = err.to_string();
        SyncError::from_components(
            ErrorKind::InvalidIdentifier,
            Cow::Borrowed("Identifier cannot be used in Postgres"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`] into a [`SyncError`], classifying database errors by the class of
/// their SQLSTATE.
impl From<sqlx::Error> for SyncError {
    #[track_caller]
    fn from(err: sqlx::Error) -> SyncError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|code| code.into_owned()).unwrap_or_default();
                classify_sqlstate(&code)
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                (ErrorKind::ConnectionFailed, "PostgreSQL connection failed")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => (
                ErrorKind::ConnectionFailed,
                "PostgreSQL connection pool unavailable",
            ),
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "PostgreSQL connection misconfigured")
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                (ErrorKind::ConversionError, "PostgreSQL value decoding failed")
            }
            _ => (ErrorKind::QueryFailed, "Database operation failed"),
        };

        let detail = err.to_string();
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

fn classify_sqlstate(code: &str) -> (ErrorKind, &'static str) {
    match code {
        // string_data_right_truncation
        "22001" => (ErrorKind::ValueTooLong, "PostgreSQL value too long for column"),
        "42P01" => (ErrorKind::MissingTable, "PostgreSQL table not found"),
        _ => match code.get(..2).unwrap_or_default() {
            "08" => (ErrorKind::ConnectionFailed, "PostgreSQL connection failed"),
            "28" => (
                ErrorKind::AuthenticationError,
                "PostgreSQL authentication failed",
            ),
            "22" => (
                ErrorKind::ConversionError,
                "PostgreSQL data conversion failed",
            ),
            "23" => (
                ErrorKind::ConstraintViolation,
                "PostgreSQL constraint violation",
            ),
            "25" | "40" => (ErrorKind::TransactionFailed, "PostgreSQL transaction failed"),
            "42" => (ErrorKind::SchemaError, "PostgreSQL schema or access error"),
            "53" | "54" => (
                ErrorKind::ResourceExhausted,
                "PostgreSQL resource limitation",
            ),
            "57" => (
                ErrorKind::OperationCanceled,
                "PostgreSQL operation canceled",
            ),
            _ => (ErrorKind::QueryFailed, "PostgreSQL error"),
        },
    }
}
