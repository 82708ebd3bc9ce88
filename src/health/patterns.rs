/// Connection-loss message patterns and configurable error matchers
use crate::error::ConfigError;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder, RegexSet};

/// Driver-agnostic fragments of messages that mean the connection itself is gone
const CONNECTION_LOSS_PATTERNS: &[&str] = &[
    r"(closed|lost|no|terminating|terminated)\s?([^\s]+)?\sconnection",
    r"gone away",
    r"connection[^:]+refused",
    r"could not connect",
    r"can'?t connect",
    r"cannot connect",
    r"connection[^:]+closed",
    r"can'?t get socket descriptor",
    r"connection to [a-z0-9.\-]+:[0-9]+ refused",
    r"timeout expired",
    r"could not translate host name",
    r"timeout waiting for a response",
    r"the database system is (starting|shutting)",
    r"server closed the connection unexpectedly",
    r"connection reset by peer",
    r"broken pipe",
];

lazy_static! {
    static ref CONNECTION_LOSS: RegexSet = RegexSet::new(
        CONNECTION_LOSS_PATTERNS
            .iter()
            .map(|pattern| format!("(?i){}", pattern))
    )
    .expect("Failed to compile connection-loss patterns");
    static ref PATTERN_SPEC: Regex =
        Regex::new(r"^/(.+)/([imx]*)$").expect("Failed to compile matcher spec pattern");
}

/// True if the message looks like a lost or unreachable connection
pub fn is_connection_loss(message: &str) -> bool {
    CONNECTION_LOSS.is_match(message)
}

/// A configured extra matcher for connection-loss messages.
///
/// `/pattern/flags` strings compile to regular expressions (`i` ignores case,
/// `m` lets `.` match newlines, `x` allows whitespace and comments); any other
/// string matches as a literal substring.
#[derive(Debug, Clone)]
pub enum ErrorMatcher {
    Literal(String),
    Pattern(Regex),
}

impl ErrorMatcher {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let Some(captures) = PATTERN_SPEC.captures(spec) else {
            return Ok(ErrorMatcher::Literal(spec.to_string()));
        };
        let body = captures.get(1).map_or("", |m| m.as_str());
        let flags = captures.get(2).map_or("", |m| m.as_str());

        let mut builder = RegexBuilder::new(body);
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "unsupported flag '{}' in error matcher {}",
                        other, spec
                    )))
                }
            };
        }

        builder.build().map(ErrorMatcher::Pattern).map_err(|e| {
            ConfigError::ValidationError(format!("invalid error matcher {}: {}", spec, e))
        })
    }

    pub fn matches(&self, message: &str) -> bool {
        match self {
            ErrorMatcher::Literal(literal) => message.contains(literal.as_str()),
            ErrorMatcher::Pattern(regex) => regex.is_match(message),
        }
    }
}

/// Parse a list of matcher specs, failing on the first invalid one
pub fn parse_matchers(specs: &[String]) -> Result<Vec<ErrorMatcher>, ConfigError> {
    specs.iter().map(|spec| ErrorMatcher::parse(spec)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_connection_loss_messages() {
        let messages = [
            "Mysql2::Error: MySQL server has gone away",
            "Lost connection to MySQL server during query",
            "PG::ConnectionBad: could not connect to server: Connection refused",
            "connection to 10.0.0.1:5432 refused",
            "Can't connect to local MySQL server through socket",
            "SSL SYSCALL error: EOF detected / server closed the connection unexpectedly",
            "timeout expired",
            "FATAL: the database system is starting up",
            "FATAL: the database system is shutting down",
            "could not translate host name \"db\" to address",
            "terminating connection due to administrator command",
            "no connection to the server",
        ];
        for message in messages {
            assert!(is_connection_loss(message), "expected match: {}", message);
        }
    }

    #[test]
    fn test_ordinary_errors_are_not_connection_loss() {
        let messages = [
            "syntax error at or near \"SELEC\"",
            "duplicate key value violates unique constraint",
            "relation \"users\" does not exist",
            "division by zero",
        ];
        for message in messages {
            assert!(!is_connection_loss(message), "unexpected match: {}", message);
        }
    }

    #[test]
    fn test_literal_matcher() {
        let matcher = ErrorMatcher::parse("ERROR 1927").unwrap();
        assert!(matches!(matcher, ErrorMatcher::Literal(_)));
        assert!(matcher.matches("ERROR 1927 (70100): Connection was killed"));
        assert!(!matcher.matches("error 1927"));
    }

    #[test]
    fn test_pattern_matcher_flags() {
        let matcher = ErrorMatcher::parse("/read.only/i").unwrap();
        assert!(matcher.matches("ERROR: cannot execute UPDATE in a READ ONLY transaction"));

        let multiline = ErrorMatcher::parse("/first.second/m").unwrap();
        assert!(multiline.matches("first\nsecond"));

        let extended = ErrorMatcher::parse("/ server \\s+ restarting /x").unwrap();
        assert!(extended.matches("server   restarting"));
    }

    #[test]
    fn test_paths_stay_literal() {
        let matcher = ErrorMatcher::parse("/tmp/socket").unwrap();
        assert!(matches!(matcher, ErrorMatcher::Literal(_)));
        assert!(matcher.matches("can't connect through /tmp/socket"));

        let matcher = ErrorMatcher::parse("/abc/q").unwrap();
        assert!(matches!(matcher, ErrorMatcher::Literal(_)));
    }

    #[test]
    fn test_invalid_matchers_are_rejected() {
        assert!(ErrorMatcher::parse("/unclosed(/").is_err());
        assert!(parse_matchers(&["ok".to_string(), "/bad[/".to_string()]).is_err());
    }
}
