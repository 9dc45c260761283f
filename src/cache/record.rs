//! Record File Module
//!
//! On-disk layout of a single cache entry:
//!
//! ```text
//! <expiry epoch seconds, 0 = never>\n<payload wrapped at 70 chars per line>
//! ```

use std::fs;
use std::io;
use std::path::Path;

use chrono::Utc;

use crate::cache::codec::parse_int;

/// Width of each payload line on disk.
pub const LINE_WIDTH: usize = 70;

/// Expiry sentinel for records that never expire.
pub const NEVER_EXPIRES: i64 = 0;

// == Record ==
/// The persisted unit for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Absolute expiry (Unix seconds), or `NEVER_EXPIRES`
    pub expires_at: i64,
    /// Encoded value, newlines already stripped
    pub payload: String,
}

impl Record {
    /// Creates a record expiring `ttl` seconds from `now`, or never when `ttl`
    /// is `None`. A negative ttl yields an already-expired record.
    pub fn new(payload: String, ttl: Option<i64>, now: i64) -> Self {
        let expires_at = match ttl {
            None => NEVER_EXPIRES,
            // 0 is reserved for records that never expire
            Some(ttl) => now.saturating_add(ttl).max(1),
        };
        Self {
            expires_at,
            payload,
        }
    }

    // == Is Expired ==
    /// A record is expired once `now` is strictly past a nonzero expiry.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at != NEVER_EXPIRES && now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp())
    }

    // == Serialize ==
    /// Renders the record in its on-disk form.
    pub fn serialize(&self) -> String {
        let chars: Vec<char> = self.payload.chars().collect();
        let lines: Vec<String> = chars
            .chunks(LINE_WIDTH)
            .map(|chunk| chunk.iter().collect())
            .collect();
        format!("{}\n{}", self.expires_at, lines.join("\n"))
    }

    // == Deserialize ==
    /// Parses the on-disk form. Splits on the first newline and strips every
    /// remaining line break from the payload.
    ///
    /// Lenient: an unparsable expiry line reads as `0`, missing payload as
    /// empty. Use [`Record::parse_strict`] when garbage must be detected.
    pub fn deserialize(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let (head, body) = text.split_once('\n').unwrap_or((text.as_ref(), ""));
        Self {
            expires_at: parse_int(head),
            payload: strip_line_breaks(body),
        }
    }

    /// Like [`Record::deserialize`] but returns `None` when the expiry line
    /// is not a plain decimal integer.
    pub fn parse_strict(bytes: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(bytes);
        let (head, body) = text.split_once('\n').unwrap_or((text.as_ref(), ""));
        let expires_at = head.trim().parse::<i64>().ok()?;
        Some(Self {
            expires_at,
            payload: strip_line_breaks(body),
        })
    }
}

fn strip_line_breaks(body: &str) -> String {
    body.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

// == Utility Functions ==
/// Deletes a record file. A file that is already gone is not an error;
/// returns whether this call removed it.
pub fn remove_record(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Returns current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}
