/// Statement classification: which pool a statement needs
///
/// Anything that is not recognisably a plain read goes to the primary.
use aho_corasick::AhoCorasick;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

/// Functions that take locks or advance sequences, even inside a SELECT
const PRIMARY_FUNCTIONS: &[&str] = &[
    "nextval",
    "currval",
    "lastval",
    "get_lock",
    "release_lock",
    "pg_advisory_lock",
    "pg_advisory_unlock",
];

lazy_static! {
    static ref REPLICA_READ: Regex = Regex::new(r"(?is)^\s*(select\b|with\b.+\)\s*select\b)")
        .expect("Failed to compile replica read pattern");
    static ref DATA_MODIFYING_CTE: Regex =
        Regex::new(r"(?is)^\s*with\b.*\(\s*(insert|update|delete|merge)\b")
            .expect("Failed to compile data-modifying CTE pattern");
    static ref LOCKING_CLAUSE: Regex = Regex::new(
        r"(?is)\bfor\s+(update|no\s+key\s+update|share|key\s+share)\b|\block\s+in\s+share\s+mode\b"
    )
    .expect("Failed to compile locking clause pattern");
    static ref NEEDED_BY_ALL: Regex =
        Regex::new(r"(?is)^\s*set\s").expect("Failed to compile session statement pattern");
    static ref SKIPS_STICKINESS: Regex =
        Regex::new(r"(?is)^\s*(show|describe|desc|explain|pragma|set)\s")
            .expect("Failed to compile introspection pattern");
    static ref FUNCTION_FINDER: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(PRIMARY_FUNCTIONS)
        .expect("Failed to create AhoCorasick function finder");
}

/// Where a statement has to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Every connection in both pools
    All,
    Primary,
    Replica,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::All => write!(f, "all"),
            Route::Primary => write!(f, "primary"),
            Route::Replica => write!(f, "replica"),
        }
    }
}

/// Route for a statement, ignoring stickiness
pub fn classify(statement: &str) -> Route {
    if needed_by_all(statement) {
        Route::All
    } else if needs_primary(statement) {
        Route::Primary
    } else {
        Route::Replica
    }
}

/// True unless the statement is a plain read
pub fn needs_primary(statement: &str) -> bool {
    !REPLICA_READ.is_match(statement)
        || DATA_MODIFYING_CTE.is_match(statement)
        || LOCKING_CLAUSE.is_match(statement)
        || calls_primary_function(statement)
}

/// Session-scoped statements replayed on every connection
pub fn needed_by_all(statement: &str) -> bool {
    NEEDED_BY_ALL.is_match(statement)
}

/// Introspection that never makes a unit of work sticky
pub fn skips_stickiness(statement: &str) -> bool {
    SKIPS_STICKINESS.is_match(statement)
}

fn calls_primary_function(statement: &str) -> bool {
    let bytes = statement.as_bytes();
    FUNCTION_FINDER.find_iter(statement).any(|found| {
        let standalone = found.start() == 0 || !is_ident_byte(bytes[found.start() - 1]);
        let called = bytes[found.end()..]
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .map_or(false, |&b| b == b'(');
        standalone && called
    })
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
