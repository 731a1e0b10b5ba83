use std::fmt;

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize article text for duplicate detection.
///
/// Whitespace runs collapse to a single space, punctuation other than the
/// sentence terminators `.`, `!` and `?` is dropped, and the result is
/// lower-cased and trimmed.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if is_stripped_punctuation(ch) {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.extend(ch.to_lowercase());
    }

    out
}

fn is_stripped_punctuation(ch: char) -> bool {
    !matches!(ch, '.' | '!' | '?') && (ch.is_ascii_punctuation() || is_unicode_punctuation(ch))
}

fn is_unicode_punctuation(ch: char) -> bool {
    matches!(
        ch,
        '\u{2010}'..='\u{2027}' | '\u{2030}'..='\u{205E}' | '\u{00A1}' | '\u{00AB}' | '\u{00BB}' | '\u{00BF}'
    )
}

/// Normalized hash of article text. Two articles with the same fingerprint
/// are duplicates regardless of URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn of(text: &str) -> Self {
        Self(compute_hash(&normalize_text(text)))
    }

    /// Wrap an already computed fingerprint (e.g. one read back from the store).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_text("  Hello,\n\tWORLD;  again  "),
            "hello world again"
        );
    }

    #[test]
    fn test_normalize_keeps_sentence_terminators() {
        assert_eq!(
            normalize_text("Stop! Really? Yes. (ok) \"quoted\" — dash"),
            "stop! really? yes. ok quoted dash"
        );
    }

    #[test]
    fn test_fingerprint_ignores_formatting_noise() {
        let a = ContentFingerprint::of("The market rose today.  Analysts, surprised!");
        let b = ContentFingerprint::of("the market rose today. analysts surprised!");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_terminators() {
        let a = ContentFingerprint::of("prices will rise.");
        let b = ContentFingerprint::of("prices will rise?");
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_prefix() {
        let fp = ContentFingerprint::of("anything");
        assert_eq!(fp.short().len(), 8);
        assert!(fp.as_str().starts_with(fp.short()));
    }
}
