use std::fmt;

/// Machine-readable error codes for store diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidIdentityKey,
    VirtualKeyWrite,
    UserNotFound,
    CorruptRecord,
    StorageReadFailed,
    StorageWriteFailed,
    PurgeInProgress,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidIdentityKey => "E2001",
            Self::VirtualKeyWrite => "E2002",
            Self::UserNotFound => "E2003",
            Self::CorruptRecord => "E3001",
            Self::StorageReadFailed => "E5001",
            Self::StorageWriteFailed => "E5002",
            Self::PurgeInProgress => "E5003",
            Self::LockContention => "E5004",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidIdentityKey => "Invalid identity key",
            Self::VirtualKeyWrite => "Virtual identity keys cannot be written",
            Self::UserNotFound => "Identity bucket not found",
            Self::CorruptRecord => "Stored record could not be decoded",
            Self::StorageReadFailed => "Storage read failed",
            Self::StorageWriteFailed => "Storage write failed",
            Self::PurgeInProgress => "Destructive maintenance in progress",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in config.toml and retry."),
            Self::InvalidIdentityKey => {
                Some("Use one of `id:<n>`, `h:<handle>`, `c:<cameo>` or `unknown`.")
            }
            Self::VirtualKeyWrite => Some("`__top_today__` is derived; write to a real bucket."),
            Self::UserNotFound => Some("Run `reelstats users` to list known identity keys."),
            Self::CorruptRecord => {
                Some("Export what remains, purge the bucket, and re-import the export.")
            }
            Self::StorageReadFailed | Self::StorageWriteFailed => {
                Some("Nothing was committed; the next cycle retries automatically.")
            }
            Self::PurgeInProgress => Some("Retry after the running purge or comb pass finishes."),
            Self::LockContention => {
                Some("Retry after the other `reelstats` process releases its lock.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
