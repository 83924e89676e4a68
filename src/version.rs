//! Dotted version tuples extracted from filenames and binary metadata.

use std::cmp::Ordering;
use std::fmt;

/// A dotted numeric version (`N.N.N`, arbitrary arity).
///
/// Comparison is lexicographic over the numeric components, left to right,
/// padding missing trailing components with zero: `0.1` == `0.1.0` and
/// `0.1.285` > `0.1.240`. Strings that do not parse normalize to the
/// minimum value, so unrecognized artifacts always lose selection ties
/// against any recognized one.
#[derive(Debug, Clone, Default)]
pub struct DriverVersion(Vec<u32>);

impl DriverVersion {
    /// The minimum value (`0.0.0`).
    pub fn zero() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted version string. Never fails: anything that is not a
    /// sequence of `.`-separated decimal numbers normalizes to zero.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::zero();
        }
        let mut components = Vec::new();
        for part in trimmed.split('.') {
            match part.parse::<u32>() {
                Ok(value) => components.push(value),
                Err(_) => return Self::zero(),
            }
        }
        Self(components)
    }

    /// Extract a version from a filename by taking the dotted digit run
    /// with the most components, e.g. `virtio-win-0.1.285.iso` → `0.1.285`.
    pub fn from_filename(name: &str) -> Self {
        let mut best = Self::zero();
        let mut best_len = 0;
        for run in dotted_digit_runs(name) {
            let parsed = Self::parse(&run);
            if parsed.0.len() > best_len {
                best_len = parsed.0.len();
                best = parsed;
            }
        }
        best
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    fn component(&self, index: usize) -> u32 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// True when both versions agree at major.minor granularity.
    ///
    /// Leading zero components are not significant: `0.1.285` and
    /// `0.1.300` are different releases (their significant pair is
    /// `1.285` vs `1.300`), while `0.1.285` and `0.1.285.0` are the same.
    pub fn same_release(&self, other: &Self) -> bool {
        self.significant_pair() == other.significant_pair()
    }

    fn significant_pair(&self) -> (u32, u32) {
        let mut significant = self.0.iter().copied().skip_while(|&c| c == 0);
        (
            significant.next().unwrap_or(0),
            significant.next().unwrap_or(0),
        )
    }
}

impl PartialEq for DriverVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DriverVersion {}

impl PartialOrd for DriverVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DriverVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "0.0.0");
        }
        let text = self
            .0
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{}", text)
    }
}

/// Maximal runs of digits and dots in `text`, trimmed of stray dots.
///
/// `virtio-win-0.1.285.iso` yields `["0.1.285", "9660"]`-style runs; the
/// run boundaries are any characters outside `[0-9.]`.
pub(crate) fn dotted_digit_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            current.push(ch);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs.into_iter()
        .map(|run| run.trim_matches('.').to_string())
        .filter(|run| run.chars().any(|c| c.is_ascii_digit()))
        .collect()
}
