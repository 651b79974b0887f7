//! Canonical result keys.
//!
//! A key is a readable slug of `(full_name, language)` followed by a short
//! digest of the raw pair. The slug makes directory listings browsable;
//! the digest keeps two pairs that transliterate identically apart.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

const DIGEST_HEX_LEN: usize = 12;

/// The filesystem-safe key for a repository/language pair.
///
/// `("Octo/Widgets", "C++")` → `octo__widgets__c-<12 hex chars>`.
pub fn result_key(full_name: &str, language: &str) -> String {
    let slug = slugify(&format!("{full_name}/{language}"));

    let mut hasher = Sha256::new();
    hasher.update(full_name.as_bytes());
    hasher.update([0]);
    hasher.update(language.as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{slug}-{}", &digest[..DIGEST_HEX_LEN])
}

/// Lowercase ASCII slug: `/` becomes `__`, accents are stripped via NFKD,
/// anything outside `[a-z0-9_-]` and whitespace is dropped, and runs of
/// `-`/whitespace collapse to one `-`.
fn slugify(raw: &str) -> String {
    let ascii: String = raw
        .replace('/', "__")
        .nfkd()
        .filter(char::is_ascii)
        .collect::<String>()
        .to_ascii_lowercase();

    let mut slug = String::with_capacity(ascii.len());
    let mut in_separator = false;
    for c in ascii.chars() {
        if c == '-' || c.is_ascii_whitespace() {
            if !in_separator {
                slug.push('-');
                in_separator = true;
            }
        } else if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
            in_separator = false;
        }
    }
    slug.trim_matches('-').to_string()
}
