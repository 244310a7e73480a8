//! Address equivalence for joining job messages against the device log.
//!
//! Job producers and the device store numbers in different shapes
//! (`+48 600 100 200`, `0600100200`, `600100200`), so the join compares
//! digit suffixes rather than strings. The comparison is approximate and
//! sits behind [`AddressMatcher`] so deployments can swap it.

pub trait AddressMatcher: Send + Sync {
    fn same_address(&self, a: &str, b: &str) -> bool;
}

fn digits(address: &str) -> String {
    address.chars().filter(char::is_ascii_digit).collect()
}

/// Digit-for-digit equality after stripping formatting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactDigitsMatcher;

impl AddressMatcher for ExactDigitsMatcher {
    fn same_address(&self, a: &str, b: &str) -> bool {
        let (a, b) = (digits(a), digits(b));
        !a.is_empty() && a == b
    }
}

/// Prefix-tolerant comparison.
///
/// Two numbers match when their digits are equal, or when they share at least
/// `min_match` trailing digits and whatever is left over on each side looks
/// like a dialling prefix: nothing, a national trunk `0`, or a country code
/// of at most three digits (with optional `00`). Two different country codes
/// never match.
#[derive(Debug, Clone, Copy)]
pub struct LooseNumberMatcher {
    pub min_match: usize,
}

impl Default for LooseNumberMatcher {
    fn default() -> Self {
        Self { min_match: 7 }
    }
}

impl LooseNumberMatcher {
    pub fn new(min_match: usize) -> Self {
        Self { min_match }
    }
}

#[derive(PartialEq)]
enum Prefix {
    Empty,
    Trunk,
    CountryCode,
    Other,
}

fn classify_prefix(rest: &str) -> Prefix {
    let rest = rest.strip_prefix("00").unwrap_or(rest);
    match rest.len() {
        0 => Prefix::Empty,
        _ if rest == "0" => Prefix::Trunk,
        1..=3 => Prefix::CountryCode,
        _ => Prefix::Other,
    }
}

impl AddressMatcher for LooseNumberMatcher {
    fn same_address(&self, a: &str, b: &str) -> bool {
        let (a, b) = (digits(a), digits(b));
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }

        let common = a
            .bytes()
            .rev()
            .zip(b.bytes().rev())
            .take_while(|(x, y)| x == y)
            .count();
        if common < self.min_match {
            return false;
        }

        let rest_a = classify_prefix(&a[..a.len() - common]);
        let rest_b = classify_prefix(&b[..b.len() - common]);
        match (rest_a, rest_b) {
            (Prefix::Other, _) | (_, Prefix::Other) => false,
            (Prefix::CountryCode, Prefix::CountryCode) => false,
            _ => true,
        }
    }
}
