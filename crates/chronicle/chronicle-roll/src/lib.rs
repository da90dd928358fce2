//! Roll-scheme table: named cycle cadences, their cycle-file filename
//! patterns, and the clock <-> cycle-number arithmetic built on them.
//!
//! Filename patterns use the reference implementation's date-pattern tokens
//! (`yyyy`, `MM`, `dd`, `HH`, `mm`, with `'...'` quoted literals) rather than
//! `strftime` directly; [`RollScheme::strftime_pattern`] translates once at
//! construction time so the hot path is a single `libc::strftime` call.

use std::ffi::CString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollError {
    #[error("unterminated quoted literal in roll pattern {0:?}")]
    UnterminatedLiteral(String),
    #[error("formatted cycle filename is not valid UTF-8")]
    NonUtf8Filename,
    #[error("strftime buffer too small for pattern {0:?}")]
    BufferTooSmall(String),
}

/// A named cycle cadence: how long a cycle lasts, how its cycle file is
/// named from the cycle's start time, and how many index entries it carries.
#[derive(Debug, Clone)]
pub struct RollScheme {
    pub name: &'static str,
    /// Original date-pattern token string (informational / round-trip).
    pub pattern: &'static str,
    /// `pattern` translated to a `strftime` format string.
    strftime_pattern: String,
    pub cycle_length_secs: u64,
    /// Index entries per cycle file (roll-scheme-dependent index density).
    pub index_entries: u32,
    /// Spacing, in entries, between index points.
    pub index_spacing: u32,
}

impl RollScheme {
    fn new(
        name: &'static str,
        pattern: &'static str,
        cycle_length_secs: u64,
        index_entries: u32,
        index_spacing: u32,
    ) -> Self {
        Self {
            name,
            pattern,
            strftime_pattern: translate_pattern(pattern),
            cycle_length_secs,
            index_entries,
            index_spacing,
        }
    }

    /// The cycle number containing wall-clock `wall_ms` (milliseconds since
    /// the Unix epoch): `wall_ms / (cycle_length_secs * 1000)`.
    pub fn cycle_for_millis(&self, wall_ms: i64) -> i64 {
        wall_ms.div_euclid(self.cycle_length_secs as i64 * 1000)
    }

    /// The wall-clock time, in milliseconds, at which `cycle` begins.
    pub fn millis_for_cycle(&self, cycle: i64) -> i64 {
        cycle * self.cycle_length_secs as i64 * 1000
    }

    /// Renders the cycle file's base name (no extension) for `cycle`.
    pub fn filename_for_cycle(&self, cycle: i64) -> Result<String, RollError> {
        let epoch_secs = self.millis_for_cycle(cycle) / 1000;
        format_time(epoch_secs, &self.strftime_pattern)
            .ok_or_else(|| RollError::BufferTooSmall(self.pattern.to_string()))
    }
}

/// Translates a date-pattern token string into a `strftime` format string.
///
/// Recognized tokens: `yyyy` -> `%Y`, `MM` -> `%m`, `dd` -> `%d`, `HH` -> `%H`,
/// `mm` -> `%M`. Anything inside single quotes is copied through verbatim
/// (and the quotes themselves dropped); an unmatched quote leaves the
/// remainder of the input as a literal.
fn translate_pattern(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                out.push(chars[i]);
                i += 1;
            }
            i += 1; // skip closing quote, or run off the end if unterminated
            continue;
        }
        let run_start = i;
        while i < chars.len() && chars[i] == c {
            i += 1;
        }
        let run_len = i - run_start;
        let token: String = std::iter::repeat(c).take(run_len).collect();
        match token.as_str() {
            "yyyy" => out.push_str("%Y"),
            "MM" => out.push_str("%m"),
            "dd" => out.push_str("%d"),
            "HH" => out.push_str("%H"),
            "mm" => out.push_str("%M"),
            _ => out.push_str(&token),
        }
    }
    out
}

/// Formats the UTC breakdown of `epoch_secs` with `strftime_fmt` via
/// `gmtime_r` + `strftime`, matching the reference implementation's
/// date-formatting path rather than a pure-Rust date library.
fn format_time(epoch_secs: i64, strftime_fmt: &str) -> Option<String> {
    let fmt_c = CString::new(strftime_fmt).ok()?;
    let time = epoch_secs as libc::time_t;
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    // SAFETY: `tm` is a valid, appropriately sized out-param; `time` is a
    // plain stack value.
    unsafe {
        if libc::gmtime_r(&time, &mut tm).is_null() {
            return None;
        }
    }
    let mut buf = vec![0u8; 256];
    // SAFETY: `buf` is a valid, writable buffer of the given length and
    // `fmt_c`/`tm` are valid inputs for the duration of the call.
    let written = unsafe {
        libc::strftime(
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            fmt_c.as_ptr(),
            &tm,
        )
    };
    if written == 0 && !strftime_fmt.is_empty() {
        return None;
    }
    buf.truncate(written);
    String::from_utf8(buf).ok()
}

/// Returns the roll scheme registered under `name`, if any.
pub fn lookup(name: &str) -> Option<&'static RollScheme> {
    schemes().iter().find(|s| s.name == name)
}

/// The full set of built-in roll schemes.
pub fn schemes() -> &'static [RollScheme] {
    use std::sync::OnceLock;
    static SCHEMES: OnceLock<Vec<RollScheme>> = OnceLock::new();
    SCHEMES.get_or_init(|| {
        vec![
            RollScheme::new("FAST_HOURLY", "yyyyMMdd-HH'F'", 3_600, 4096, 16),
            RollScheme::new("FIVE_MINUTELY", "yyyyMMdd-HHmm'V'", 300, 1024, 8),
            RollScheme::new("DAILY", "yyyyMMdd", 86_400, 8192, 32),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_tokens_and_keeps_literals() {
        assert_eq!(translate_pattern("yyyyMMdd-HH"), "%Y%m%d-%H");
        assert_eq!(translate_pattern("yyyyMMdd'T'HHmm"), "%Y%m%dT%H%M");
    }

    #[test]
    fn daily_scheme_formats_expected_filename() {
        let scheme = lookup("DAILY").unwrap();
        // 2024-03-05T00:00:00Z, cycle = days since epoch
        let epoch_day = 19783i64;
        let name = scheme.filename_for_cycle(epoch_day).unwrap();
        assert_eq!(name, "20240305");
    }

    #[test]
    fn fast_hourly_round_trips_cycle_arithmetic() {
        let scheme = lookup("FAST_HOURLY").unwrap();
        let wall_ms = 1_700_003_700_000i64; // some arbitrary timestamp
        let cycle = scheme.cycle_for_millis(wall_ms);
        let back = scheme.millis_for_cycle(cycle);
        assert!(back <= wall_ms);
        assert!(wall_ms - back < 3_600_000);
    }

    #[test]
    fn five_minutely_filename_includes_hour_and_minute() {
        let scheme = lookup("FIVE_MINUTELY").unwrap();
        let cycle = scheme.cycle_for_millis(1_700_003_700_000);
        let name = scheme.filename_for_cycle(cycle).unwrap();
        assert!(name.ends_with('V'));
        assert_eq!(name.len(), "yyyyMMdd-HHmmV".len());
    }

    #[test]
    fn fast_hourly_filenames_match_reference_cycles() {
        let scheme = lookup("FAST_HOURLY").unwrap();
        assert_eq!(scheme.filename_for_cycle(0).unwrap(), "19700101-00F");
        assert_eq!(scheme.filename_for_cycle(1).unwrap(), "19700101-01F");
        assert_eq!(scheme.filename_for_cycle(24).unwrap(), "19700102-00F");
    }

    #[test]
    fn five_minutely_filenames_match_reference_cycles() {
        let scheme = lookup("FIVE_MINUTELY").unwrap();
        assert_eq!(scheme.filename_for_cycle(0).unwrap(), "19700101-0000V");
        assert_eq!(scheme.filename_for_cycle(1).unwrap(), "19700101-0005V");
    }

    #[test]
    fn daily_filename_matches_reference_cycle_zero() {
        let scheme = lookup("DAILY").unwrap();
        assert_eq!(scheme.filename_for_cycle(0).unwrap(), "19700101");
    }
}
