// Terminal messages, exit codes and JSON envelopes for the CLI

use std::io::IsTerminal;

use crate::error::Error;

const RED: &str = "\x1b[0;31m";
const GREEN: &str = "\x1b[0;32m";
const YELLOW: &str = "\x1b[1;33m";
const CYAN: &str = "\x1b[0;36m";
const MAGENTA: &str = "\x1b[0;35m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Wrap `text` in `color` when stdout is a terminal
fn paint(color: &str, text: &str) -> String {
    if std::io::stdout().is_terminal() {
        format!("{}{}{}", color, text, RESET)
    } else {
        text.to_string()
    }
}

pub fn info(msg: &str) {
    println!("{} {}", paint(GREEN, "[INFO]"), msg);
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", paint(YELLOW, "[WARN]"), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", paint(RED, "[ERROR]"), msg);
}

pub fn success(msg: &str) {
    println!("{} {}", paint(MAGENTA, "[OK]"), msg);
}

/// Section title followed by a blank line
pub fn header(msg: &str) {
    println!("{} {}", paint(BOLD, "===>"), msg);
    println!();
}

pub fn rule() {
    println!("{}", paint(CYAN, &"-".repeat(42)));
}

/// Process exit codes
pub const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_DATABASE: i32 = 3;
const EXIT_FILE_NOT_FOUND: i32 = 4;
const EXIT_VALIDATION: i32 = 5;
const EXIT_NOT_FOUND: i32 = 6;

/// Exit code for a library error
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::DirectoryMissing(_) => EXIT_FILE_NOT_FOUND,
        Error::Database(_) => EXIT_DATABASE,
        Error::GraphCorruption(_) | Error::Divergence { .. } | Error::AmbiguousHead { .. } => {
            EXIT_VALIDATION
        }
        Error::UnknownRevision(_) | Error::UnreachableRevision { .. } => EXIT_NOT_FOUND,
        Error::AlreadyInitialized(_)
        | Error::UnknownTemplate(_)
        | Error::NotAnInteger(_)
        | Error::IndexOutOfRange { .. } => EXIT_USAGE,
        _ => EXIT_ERROR,
    }
}

// JSON error codes, one per error category
const E_DIRECTORY_MISSING: &str = "E001";
const E_GRAPH_CORRUPT: &str = "E002";
const E_AMBIGUOUS_HEAD: &str = "E003";
const E_REVISION_NOT_FOUND: &str = "E004";
const E_DIVERGENCE: &str = "E005";
const E_INVALID_INPUT: &str = "E006";
const E_DATABASE: &str = "E007";
const E_EXECUTION: &str = "E008";
pub const E_OTHER: &str = "E009";

const HINT_INIT: &str = "Run 'migraph init' to create the migration directory";
const HINT_MERGE: &str = "Run 'migraph merge' to join the heads first";
const HINT_INVESTIGATE: &str =
    "Stop upgrading and compare 'migraph log' with 'migraph history --oldest-first'";
const HINT_FIX_DESCRIPTOR: &str = "Fix the parent references in the versions directory";

const SCHEMA_VERSION: &str = "1.0.0";

/// Envelope around every JSON payload
#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonResponse<T> {
    pub schema_version: &'static str,
    pub execution_id: String,
    pub tool: &'static str,
    pub timestamp: String,
    pub data: T,
}

impl<T: serde::Serialize> JsonResponse<T> {
    pub fn new(data: T) -> Self {
        let now = chrono::Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            execution_id: format!("{:x}-{}", now.timestamp(), std::process::id()),
            tool: env!("CARGO_PKG_NAME"),
            timestamp: now.to_rfc3339(),
            data,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Error body printed in JSON mode
#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonError {
    pub error: &'static str,
    pub message: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<&'static str>,
}

impl JsonError {
    pub fn new(category: &'static str, message: &str, code: &'static str) -> Self {
        Self {
            error: category,
            message: message.to_string(),
            code,
            remediation: None,
        }
    }

    fn with_remediation(mut self, hint: &'static str) -> Self {
        self.remediation = Some(hint);
        self
    }

    /// Categorize a library error with its remediation hint
    pub fn from_error(err: &Error) -> Self {
        let message = err.to_string();
        match err {
            Error::DirectoryMissing(_) => {
                Self::new("DirectoryMissing", &message, E_DIRECTORY_MISSING)
                    .with_remediation(HINT_INIT)
            }
            Error::GraphCorruption(_) => Self::new("GraphCorruption", &message, E_GRAPH_CORRUPT)
                .with_remediation(HINT_FIX_DESCRIPTOR),
            Error::AmbiguousHead { .. } => Self::new("AmbiguousHead", &message, E_AMBIGUOUS_HEAD)
                .with_remediation(HINT_MERGE),
            Error::UnknownRevision(_) | Error::UnreachableRevision { .. } => {
                Self::new("RevisionNotFound", &message, E_REVISION_NOT_FOUND)
            }
            Error::Divergence { .. } => Self::new("Divergence", &message, E_DIVERGENCE)
                .with_remediation(HINT_INVESTIGATE),
            Error::NotAnInteger(_)
            | Error::IndexOutOfRange { .. }
            | Error::UnknownTemplate(_)
            | Error::AlreadyInitialized(_) => Self::new("InvalidInput", &message, E_INVALID_INPUT),
            Error::Database(_) => Self::new("Database", &message, E_DATABASE),
            Error::Execution { .. } => Self::new("Execution", &message, E_EXECUTION),
            _ => Self::new("Error", &message, E_OTHER),
        }
    }
}
