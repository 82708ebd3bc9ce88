/// Cookie transport for the stickiness record
use super::record::{serialize, CommittedState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the stickiness cookie
pub const COOKIE_NAME: &str = "_relevo_stck";

/// Seconds a cookie outlives its longest entry, to absorb clock skew
const MAX_AGE_BUFFER: u64 = 5;

/// Attributes applied to the outbound cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            http_only: true,
            secure: false,
        }
    }
}

/// An outbound stickiness cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyCookie {
    pub value: String,
    /// Zero clears the cookie on the client
    pub max_age: u64,
    pub options: CookieOptions,
}

impl StickyCookie {
    /// Build the cookie for a committed record, or `None` when nothing needs
    /// writing. An empty record that had state produces a clearing cookie.
    pub fn from_committed(
        state: &CommittedState,
        now_secs: f64,
        options: &CookieOptions,
    ) -> Option<Self> {
        if !state.must_write {
            return None;
        }
        let max_age = state
            .entries
            .values()
            .copied()
            .fold(None, |max: Option<f64>, until| {
                Some(max.map_or(until, |m| m.max(until)))
            })
            .map_or(0, |max| {
                // Millisecond precision keeps float noise from adding a second
                let remaining = ((max - now_secs).max(0.0) * 1000.0).round() / 1000.0;
                (remaining.ceil() as u64).saturating_add(MAX_AGE_BUFFER)
            });

        Some(Self {
            value: serialize(&state.entries),
            max_age,
            options: options.clone(),
        })
    }

    pub fn is_clearing(&self) -> bool {
        self.max_age == 0
    }

    /// Value for a `Set-Cookie` response header
    pub fn to_set_cookie(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StickyCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}; Path={}; Max-Age={}",
            COOKIE_NAME, self.value, self.options.path, self.max_age
        )?;
        if self.options.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.options.secure {
            f.write_str("; Secure")?;
        }
        Ok(())
    }
}

/// Pull the stickiness cookie value out of a `Cookie` request header
pub fn cookie_from_header(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name.trim() == COOKIE_NAME).then(|| value.trim())
    })
}
