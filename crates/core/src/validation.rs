//! Input validation for scan arguments.
//!
//! Arguments are handed to an external scanner, so anything that could be read
//! as shell syntax is refused outright, as are oversized inputs and `file://`
//! targets (local file disclosure).

use std::collections::BTreeSet;

use thiserror::Error;

/// Default upper bound on argument length, in characters.
pub const DEFAULT_MAX_ARG_LENGTH: usize = 1000;

/// Characters that are never accepted in an argument.
pub const DISALLOWED_CHARS: [char; 9] = ['&', '|', ';', '$', '>', '<', '`', '\\', '!'];

/// URI schemes an argument may not start with.
pub const DISALLOWED_SCHEMES: [&str; 1] = ["file://"];

/// Why an argument was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Every offending character found, in sorted order.
    #[error("disallowed characters '{}' in argument", join_chars(.0))]
    DisallowedCharacters(BTreeSet<char>),

    #[error("argument too long: {length} characters, max {max}")]
    TooLong { length: usize, max: usize },

    #[error("illegal protocol '{0}' used in argument")]
    DisallowedScheme(&'static str),
}

impl ValidationError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::DisallowedCharacters(_) => "disallowed_characters",
            ValidationError::TooLong { .. } => "argument_too_long",
            ValidationError::DisallowedScheme(_) => "disallowed_scheme",
        }
    }
}

fn join_chars(chars: &BTreeSet<char>) -> String {
    chars
        .iter()
        .map(char::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate with the default length limit.
pub fn validate(arg: &str) -> Result<(), ValidationError> {
    validate_with_limit(arg, DEFAULT_MAX_ARG_LENGTH)
}

/// Validate `arg`, allowing at most `max_len` characters.
///
/// Single pass over the input. When several rules are broken the reported one
/// is, in order: disallowed characters, length, scheme.
pub fn validate_with_limit(arg: &str, max_len: usize) -> Result<(), ValidationError> {
    let mut offending = BTreeSet::new();
    let mut length = 0usize;

    for c in arg.chars() {
        length += 1;
        if DISALLOWED_CHARS.contains(&c) {
            offending.insert(c);
        }
    }

    if !offending.is_empty() {
        return Err(ValidationError::DisallowedCharacters(offending));
    }

    if length > max_len {
        return Err(ValidationError::TooLong {
            length,
            max: max_len,
        });
    }

    if let Some(scheme) = DISALLOWED_SCHEMES.iter().find(|s| arg.starts_with(**s)) {
        return Err(ValidationError::DisallowedScheme(*scheme));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_targets() {
        assert!(validate("localhost").is_ok());
        assert!(validate("-sV -p 22,80 10.0.0.0/24").is_ok());
        assert!(validate("").is_ok());
    }

    #[test]
    fn reports_every_offending_character() {
        let err = validate("127.0.0.1; ls | cat && echo $HOME").unwrap_err();
        let ValidationError::DisallowedCharacters(set) = &err else {
            panic!("unexpected error: {err:?}");
        };

        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec!['$', '&', ';', '|']);
        assert_eq!(err.code(), "disallowed_characters");
    }

    #[test]
    fn length_limit_is_inclusive() {
        assert!(validate(&"a".repeat(DEFAULT_MAX_ARG_LENGTH)).is_ok());
        assert_eq!(
            validate(&"a".repeat(DEFAULT_MAX_ARG_LENGTH + 1)),
            Err(ValidationError::TooLong {
                length: DEFAULT_MAX_ARG_LENGTH + 1,
                max: DEFAULT_MAX_ARG_LENGTH
            })
        );
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        assert!(validate_with_limit("ééé", 3).is_ok());
    }

    #[test]
    fn rejects_file_scheme_prefix_only() {
        assert_eq!(
            validate("file:///etc/passwd"),
            Err(ValidationError::DisallowedScheme("file://"))
        );
        assert!(validate("-iL targets file://x").is_ok());
    }

    #[test]
    fn disallowed_characters_win_over_length() {
        let arg = format!("{};", "a".repeat(DEFAULT_MAX_ARG_LENGTH + 5));
        assert_eq!(validate(&arg).unwrap_err().code(), "disallowed_characters");
    }

    proptest! {
        #[test]
        fn any_disallowed_character_is_rejected(
            prefix in "[a-z0-9 .-]{0,40}",
            suffix in "[a-z0-9 .-]{0,40}",
            idx in 0usize..DISALLOWED_CHARS.len(),
        ) {
            let bad = DISALLOWED_CHARS[idx];
            let arg = format!("{prefix}{bad}{suffix}");
            let err = validate(&arg).unwrap_err();
            prop_assert!(matches!(err, ValidationError::DisallowedCharacters(ref s) if s.contains(&bad)));
        }

        #[test]
        fn anything_over_the_limit_is_rejected(len in (DEFAULT_MAX_ARG_LENGTH + 1)..3000usize) {
            let arg = "x".repeat(len);
            prop_assert_eq!(validate(&arg).unwrap_err().code(), "argument_too_long");
        }

        #[test]
        fn anything_starting_with_file_scheme_is_rejected(rest in "[a-z0-9/._-]{0,100}") {
            let arg = format!("file://{rest}");
            prop_assert_eq!(validate(&arg).unwrap_err().code(), "disallowed_scheme");
        }

        #[test]
        fn safe_alphabet_is_accepted(arg in "[a-zA-Z0-9 .,:/_-]{0,200}") {
            prop_assume!(!arg.starts_with("file://"));
            prop_assert!(validate(&arg).is_ok());
        }
    }
}
