//! # Hashcash Puzzle
//!
//! Creation, canonical encoding, solving and verification of version 1
//! hashcash puzzles.
//!
//! ## Header Format
//! ```text
//! 1:<difficulty>:<YYYYMMDDHHMMSS>:<subject>:<extension>:<base64(salt)>:<base64(decimal(counter))>
//! ```
//!
//! `difficulty` counts leading `'0'` characters in the lowercase hex SHA-1
//! digest of the header, so each unit is one nibble rather than one bit.
//! The subject and extension are free text; reserved bytes in them are
//! percent-escaped so every header splits into exactly seven fields.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use sha1::{Digest, Sha1};
use tracing::{debug, instrument};

use crate::error::{constants, ProtocolError, Result};

/// Version tag leading every header
pub const PUZZLE_VERSION: &str = "1";

/// Layout of the issue timestamp, always UTC
pub const DATE_LAYOUT: &str = "%Y%m%d%H%M%S";

/// Salt length, fixed so the salt integer in the key is unambiguous
pub const SALT_LEN: usize = 8;

/// Length of a hex-rendered SHA-1 digest
pub const DIGEST_HEX_LEN: usize = 40;

const FIELD_DELIMITER: char = ':';
const FIELD_COUNT: usize = 7;
const DATE_LEN: usize = 14;
const ZERO_DIGIT: u8 = b'0';

/// A hashcash puzzle.
///
/// Freshly created puzzles are challenges with a zero counter; `solve`
/// turns one into a solution in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Puzzle {
    difficulty: u32,
    issued_at: DateTime<Utc>,
    subject: String,
    extension: String,
    salt: Vec<u8>,
    counter: u64,
}

impl Puzzle {
    /// Create a challenge bound to `subject`, issued now, with a fresh salt
    /// from the operating system's secure random source.
    pub fn create(difficulty: u32, subject: impl Into<String>) -> Result<Self> {
        if difficulty == 0 {
            return Err(ProtocolError::InvalidDifficulty);
        }

        let mut salt = vec![0u8; SALT_LEN];
        getrandom::fill(&mut salt).map_err(|e| {
            ProtocolError::Random(format!("{}: {e}", constants::ERR_RANDOM_SOURCE))
        })?;

        Ok(Self {
            difficulty,
            issued_at: now_truncated(),
            subject: subject.into(),
            extension: String::new(),
            salt,
            counter: 0,
        })
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn set_counter(&mut self, counter: u64) {
        self.counter = counter;
    }

    /// Canonical header for this puzzle, including the current counter
    pub fn serialize(&self) -> Header {
        let mut header = self.prefix();
        header.push_str(&STANDARD.encode(self.counter.to_string()));
        Header(header)
    }

    /// Parse a header produced by [`Puzzle::serialize`]
    pub fn deserialize(header: &str) -> Result<Self> {
        let parts: Vec<&str> = header.split(FIELD_DELIMITER).collect();
        if parts.len() != FIELD_COUNT || parts[0] != PUZZLE_VERSION {
            return Err(ProtocolError::IncorrectHeaderFormat);
        }

        let difficulty = parse_digits::<u32>(parts[1])?;
        let issued_at = parse_date(parts[2])?;
        let subject = unescape_field(parts[3])?;
        let extension = unescape_field(parts[4])?;

        let salt = STANDARD
            .decode(parts[5])
            .map_err(|_| ProtocolError::IncorrectHeaderFormat)?;
        if salt.len() != SALT_LEN {
            return Err(ProtocolError::IncorrectHeaderFormat);
        }

        let counter = STANDARD
            .decode(parts[6])
            .ok()
            .and_then(|raw| String::from_utf8(raw).ok())
            .ok_or(ProtocolError::IncorrectHeaderFormat)
            .and_then(|digits| parse_digits::<u64>(&digits))?;

        Ok(Self {
            difficulty,
            issued_at,
            subject,
            extension,
            salt,
            counter,
        })
    }

    /// Identity of the puzzle without its counter.
    ///
    /// Correlates an issued challenge with the solution a client sends back.
    pub fn key(&self) -> String {
        let salt = self
            .salt
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        format!(
            "{}:{}:{}:{}",
            self.difficulty,
            self.issued_at.timestamp(),
            escape_field(&self.subject),
            salt
        )
    }

    /// Search counters 0, 1, 2, ... up to and including `max_attempts` and
    /// keep the first one whose header verifies.
    ///
    /// The counter is left untouched when no solution is found.
    #[instrument(skip(self), fields(difficulty = self.difficulty))]
    pub fn solve(&mut self, max_attempts: u64) -> Result<u64> {
        if max_attempts == 0 {
            return Err(ProtocolError::AttemptsExceeded);
        }
        check_difficulty(self.difficulty)?;

        // Every candidate shares the prefix, so hash it once and fork the state
        let mut base = Sha1::new();
        base.update(self.prefix().as_bytes());

        for counter in 0..=max_attempts {
            let mut hasher = base.clone();
            hasher.update(STANDARD.encode(counter.to_string()).as_bytes());
            if has_leading_zero_nibbles(&hasher.finalize(), self.difficulty) {
                debug!(counter, "Puzzle solved");
                self.counter = counter;
                return Ok(counter);
            }
        }

        Err(ProtocolError::AttemptsExceeded)
    }

    /// Whether the header with the current counter meets the difficulty
    pub fn verify(&self) -> Result<bool> {
        self.serialize().is_hash_correct(self.difficulty)
    }

    /// Whether the puzzle is bound to `subject`
    pub fn equal_resource(&self, subject: &str) -> bool {
        self.subject == subject
    }

    /// Whether the puzzle was issued less than `ttl` ago, by the wall clock
    pub fn is_actual(&self, ttl: Duration) -> bool {
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .map_or(true, |deadline| deadline > Utc::now())
    }

    /// Every header field except the counter, with the trailing delimiter
    fn prefix(&self) -> String {
        format!(
            "{PUZZLE_VERSION}:{}:{}:{}:{}:{}:",
            self.difficulty,
            self.issued_at.format(DATE_LAYOUT),
            escape_field(&self.subject),
            escape_field(&self.extension),
            STANDARD.encode(&self.salt),
        )
    }
}

/// Serialized puzzle, the string the digest is computed over
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header(String);

impl Header {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the SHA-1 digest as lowercase hex and require the first
    /// `difficulty` characters to be `'0'`.
    pub fn is_hash_correct(&self, difficulty: u32) -> Result<bool> {
        check_difficulty(difficulty)?;

        let hash = hex::encode(Sha1::digest(self.0.as_bytes()));
        Ok(hash
            .bytes()
            .take(difficulty as usize)
            .all(|c| c == ZERO_DIGIT))
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Header> for String {
    fn from(header: Header) -> Self {
        header.0
    }
}

impl AsRef<str> for Header {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn check_difficulty(difficulty: u32) -> Result<()> {
    if difficulty == 0 {
        return Err(ProtocolError::ZeroBitsInvalid);
    }
    if difficulty as usize > DIGEST_HEX_LEN {
        return Err(ProtocolError::HashTooShort);
    }
    Ok(())
}

/// Nibble-level equivalent of checking the hex rendering for leading `'0'`s
#[inline]
fn has_leading_zero_nibbles(digest: &[u8], difficulty: u32) -> bool {
    (0..difficulty as usize).all(|i| {
        let byte = digest[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        nibble == 0
    })
}

fn now_truncated() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// Plain ASCII digits only; `str::parse` alone would also accept a sign
fn parse_digits<T: std::str::FromStr>(field: &str) -> Result<T> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::IncorrectHeaderFormat);
    }
    field
        .parse()
        .map_err(|_| ProtocolError::IncorrectHeaderFormat)
}

fn parse_date(field: &str) -> Result<DateTime<Utc>> {
    if field.len() != DATE_LEN || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::IncorrectHeaderFormat);
    }
    NaiveDateTime::parse_from_str(field, DATE_LAYOUT)
        .map(|date| date.and_utc())
        .map_err(|_| ProtocolError::IncorrectHeaderFormat)
}

fn escape_field(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '\n' => escaped.push_str("%0A"),
            '\r' => escaped.push_str("%0D"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape_field(field: &str) -> Result<String> {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest
            .get(pos + 1..pos + 3)
            .ok_or(ProtocolError::IncorrectHeaderFormat)?;
        out.push(match code {
            "25" => '%',
            "3A" => ':',
            "0A" => '\n',
            "0D" => '\r',
            _ => return Err(ProtocolError::IncorrectHeaderFormat),
        });
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXED_HEADER: &str = "1:3:20231102192537:resource::c2FsdHNhbHQ=:MA==";

    #[test]
    fn test_create_rejects_zero_difficulty() {
        assert!(matches!(
            Puzzle::create(0, "resource"),
            Err(ProtocolError::InvalidDifficulty)
        ));
    }

    #[test]
    fn test_create_fills_fields() {
        let puzzle = Puzzle::create(20, "resource").expect("create");
        assert_eq!(puzzle.difficulty(), 20);
        assert_eq!(puzzle.subject(), "resource");
        assert_eq!(puzzle.extension(), "");
        assert_eq!(puzzle.salt().len(), SALT_LEN);
        assert_eq!(puzzle.counter(), 0);
        assert_eq!(puzzle.issued_at().timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_salts_differ() {
        let a = Puzzle::create(4, "resource").expect("create");
        let b = Puzzle::create(4, "resource").expect("create");
        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_new_and_parse() {
        let original = Puzzle::create(20, "resource").expect("create");

        let mut parsed = Puzzle::deserialize(original.serialize().as_str()).expect("parse");
        assert_eq!(original, parsed);

        parsed.set_counter(parsed.counter() + 1);
        assert_eq!(original.key(), parsed.key());
        assert_ne!(original.serialize(), parsed.serialize());
    }

    #[test]
    fn test_fixed_header_layout() {
        let puzzle = Puzzle::deserialize(FIXED_HEADER).expect("parse");
        assert_eq!(puzzle.difficulty(), 3);
        assert_eq!(puzzle.subject(), "resource");
        assert_eq!(puzzle.salt(), b"saltsalt");
        assert_eq!(puzzle.counter(), 0);
        assert_eq!(puzzle.issued_at().timestamp(), 1_698_953_137);
        assert_eq!(puzzle.serialize().as_str(), FIXED_HEADER);
        assert_eq!(
            puzzle.key(),
            format!("3:1698953137:resource:{}", u64::from_be_bytes(*b"saltsalt"))
        );
    }

    #[test]
    fn test_subject_with_delimiter_round_trips() {
        let original = Puzzle::create(4, "[::1]:4000").expect("create");
        let header = original.serialize();
        assert_eq!(header.as_str().split(':').count(), 7);
        assert!(header.as_str().contains("[%3A%3A1]%3A4000"));

        let parsed = Puzzle::deserialize(header.as_str()).expect("parse");
        assert_eq!(parsed.subject(), "[::1]:4000");
        assert_eq!(parsed, original);

        let percent = Puzzle::create(4, "100%:x\r\n").expect("create");
        let parsed = Puzzle::deserialize(percent.serialize().as_str()).expect("parse");
        assert_eq!(parsed.subject(), "100%:x\r\n");
    }

    #[test]
    fn test_deserialize_rejects_malformed_headers() {
        let bad = [
            "",
            "1:3:20231102192537:resource::c2FsdHNhbHQ=",
            "1:3:20231102192537:resource::c2FsdHNhbHQ=:MA==:extra",
            "2:3:20231102192537:resource::c2FsdHNhbHQ=:MA==",
            "1:x:20231102192537:resource::c2FsdHNhbHQ=:MA==",
            "1:-3:20231102192537:resource::c2FsdHNhbHQ=:MA==",
            "1:3:2023110219253:resource::c2FsdHNhbHQ=:MA==",
            "1:3:20231302192537:resource::c2FsdHNhbHQ=:MA==",
            "1:3:20231102192537:resource::not*base64:MA==",
            "1:3:20231102192537:resource::c2FsdHNhbHQ=:not*base64",
            "1:3:20231102192537:resource::c2FsdHNhbHQ=:YWJj",
            "1:3:20231102192537:res%3Xource::c2FsdHNhbHQ=:MA==",
            "1:3:20231102192537:resource%::c2FsdHNhbHQ=:MA==",
            "1:3:20231102192537:resource::AAAAAAAAAAAAAAAAAAAAAAAA:MA==",
            "1:3:20231102192537:resource::AAE=:MA==",
            "1:3:20231102192537:resource::AAAAAAAAAAAAAQ==:MA==",
        ];
        for header in bad {
            assert!(
                matches!(
                    Puzzle::deserialize(header),
                    Err(ProtocolError::IncorrectHeaderFormat)
                ),
                "accepted {header:?}"
            );
        }
    }

    #[test]
    fn test_key_distinguishes_zero_padded_salts() {
        // Salts 00..0001 and 0001 would fold to the same integer
        let padded = Puzzle::deserialize("1:3:20231102192537:resource::AAAAAAAAAAE=:MA==")
            .expect("parse");
        assert_eq!(padded.salt().len(), SALT_LEN);
        assert!(padded.key().ends_with(":1"));
        assert!(Puzzle::deserialize("1:3:20231102192537:resource::AAE=:MA==").is_err());
    }

    #[test]
    fn test_solve_finds_first_valid_counter() {
        let mut puzzle = Puzzle::deserialize(FIXED_HEADER).expect("parse");
        let counter = puzzle.solve(1_000_000).expect("solve");

        assert_eq!(puzzle.counter(), counter);
        assert!(puzzle.verify().expect("verify"));

        for lower in 0..counter {
            let mut candidate = puzzle.clone();
            candidate.set_counter(lower);
            assert!(!candidate.verify().expect("verify"));
        }
    }

    #[test]
    fn test_solve_is_deterministic() {
        let mut a = Puzzle::deserialize(FIXED_HEADER).expect("parse");
        let mut b = Puzzle::deserialize(FIXED_HEADER).expect("parse");
        assert_eq!(a.solve(1_000_000).expect("solve"), 2387);
        assert_eq!(b.solve(1_000_000).expect("solve"), 2387);
        assert_eq!(
            a.serialize().as_str(),
            "1:3:20231102192537:resource::c2FsdHNhbHQ=:MjM4Nw=="
        );
    }

    #[test]
    fn test_solve_bound_is_inclusive() {
        let mut puzzle = Puzzle::deserialize(FIXED_HEADER).expect("parse");
        assert!(matches!(
            puzzle.solve(2386),
            Err(ProtocolError::AttemptsExceeded)
        ));
        assert_eq!(puzzle.solve(2387).expect("solve"), 2387);
    }

    #[test]
    fn test_solve_attempts_exceeded() {
        let mut puzzle = Puzzle::deserialize(
            "1:40:20231102192537:resource::c2FsdHNhbHQ=:MA==",
        )
        .expect("parse");
        assert!(matches!(
            puzzle.solve(100),
            Err(ProtocolError::AttemptsExceeded)
        ));
        assert_eq!(puzzle.counter(), 0);

        assert!(matches!(
            puzzle.solve(0),
            Err(ProtocolError::AttemptsExceeded)
        ));
    }

    #[test]
    fn test_verify_difficulty_bounds() {
        let header = Puzzle::deserialize(FIXED_HEADER).expect("parse").serialize();
        assert!(matches!(
            header.is_hash_correct(0),
            Err(ProtocolError::ZeroBitsInvalid)
        ));
        assert!(matches!(
            header.is_hash_correct(41),
            Err(ProtocolError::HashTooShort)
        ));
        assert!(header.is_hash_correct(40).is_ok());
    }

    #[test]
    fn test_nibble_check_matches_hex_rendering() {
        for counter in 0..2_000u64 {
            let mut puzzle = Puzzle::deserialize(FIXED_HEADER).expect("parse");
            puzzle.set_counter(counter);
            let header = puzzle.serialize();
            let digest = Sha1::digest(header.as_str().as_bytes());
            for difficulty in 1..=3 {
                assert_eq!(
                    has_leading_zero_nibbles(&digest, difficulty),
                    header.is_hash_correct(difficulty).expect("verify"),
                );
            }
        }
    }

    #[test]
    fn test_equal_resource() {
        let puzzle = Puzzle::create(4, "127.0.0.1:5000").expect("create");
        assert!(puzzle.equal_resource("127.0.0.1:5000"));
        assert!(!puzzle.equal_resource("127.0.0.1:5001"));
    }

    #[test]
    fn test_is_actual() {
        let fresh = Puzzle::create(4, "resource").expect("create");
        assert!(fresh.is_actual(Duration::from_secs(60)));
        assert!(!fresh.is_actual(Duration::ZERO));

        let old = Puzzle::deserialize(FIXED_HEADER).expect("parse");
        assert!(!old.is_actual(Duration::from_secs(3600)));
    }
}
