//! crates/edubase_core/src/filename.rs
//!
//! Output file naming.

/// Characters that are unsafe in file names on at least one common filesystem.
pub const UNSAFE_FILENAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replaces every unsafe character with `_`. The result has the same number of
/// characters as the input and sanitizing it again changes nothing.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_exactly_the_unsafe_set() {
        assert_eq!(sanitize_filename("a/b:c"), "a_b_c");
        assert_eq!(
            sanitize_filename(r#"/\:*?"<>|"#),
            "_________"
        );
        assert_eq!(sanitize_filename("Mathe 1 (Grundlagen) - Teil.2"), "Mathe 1 (Grundlagen) - Teil.2");
    }

    #[test]
    fn is_idempotent_and_length_preserving() {
        for input in ["", "Geschichte: 1914/1918?", "Ökologie <Band 2>", "plain"] {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once);
            assert_eq!(once.chars().count(), input.chars().count());
        }
    }
}
