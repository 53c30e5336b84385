//! UTF-8-safe string truncation utilities
//!
//! This module provides safe string slicing functions that respect UTF-8 character
//! boundaries, preventing panics when working with multi-byte characters like
//! box-drawing symbols (â”Œâ”€â”), emoji, and other Unicode characters.

/// Safely truncate a string to a maximum number of CHARACTERS (not bytes).
///
/// This function respects UTF-8 character boundaries and will never panic,
/// even with multi-byte characters like box-drawing symbols or emoji.
///
/// # Arguments
/// * `s` - String slice to truncate
/// * `max_chars` - Maximum number of Unicode characters (not bytes)
///
/// # Returns
/// * String slice containing at most `max_chars` characters, or the full string
///   if it's shorter than `max_chars`
///
/// # Performance
/// * O(n) where n = max_chars (iterates through characters)
/// * Zero allocation - returns slice of original string
///
/// # Examples
/// ```
/// # use llmstxt_crawler::utils::string_utils::safe_truncate_chars;
/// // ASCII characters (1 byte each)
/// assert_eq!(safe_truncate_chars("Hello, World!", 5), "Hello");
///
/// // Multi-byte UTF-8 characters (3 bytes each)
/// let text = "â”Œâ”€â”€â”€â”€â”€â”€â”€â” â”Œâ”€â”€â”€â”€â”€â”€â”€â” â”Œâ”€â”€â”€â”€â”€â”€â”€â”";
/// assert_eq!(safe_truncate_chars(text, 9), "â”Œâ”€â”€â”€â”€â”€â”€â”€â”");
///
/// // Emoji (4 bytes each)
/// assert_eq!(safe_truncate_chars("ðŸŽ‰ðŸŽŠðŸŽˆ", 2), "ðŸŽ‰ðŸŽŠ");
///
/// // String shorter than max_chars
/// assert_eq!(safe_truncate_chars("Hi", 100), "Hi");
/// ```
#[inline]
pub fn safe_truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        None => s, // String has fewer than max_chars characters
        Some((byte_idx, _)) => &s[..byte_idx], // Slice at char boundary
    }
}
