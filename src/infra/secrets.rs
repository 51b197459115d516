use std::{
    hash::{DefaultHasher, Hash, Hasher},
    panic,
};

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_MARKERS: [&str; 7] = [
    "password", "secret", "token", "bearer", "authorization", "refresh", "jwt",
];

pub fn redact_text(input: &str) -> String {
    input
        .split_whitespace()
        .map(redact_chunk)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable, non-reversible label for correlating a token across log lines.
pub fn token_fingerprint(token: &str) -> String {
    if token.is_empty() {
        return "tok:empty".to_owned();
    }

    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    format!("tok:{:08x}", hasher.finish() as u32)
}

/// Backend-supplied error codes are echoed into logs only when they look like
/// plain codes.
pub fn sanitize_error_code(code: &str) -> String {
    let valid = !code.is_empty()
        && code.len() <= 64
        && code
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_' || ch == '-');

    if valid {
        code.to_owned()
    } else {
        "API_UNSPECIFIED".to_owned()
    }
}

pub fn install_panic_redaction_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic payload omitted".to_owned());

        let scrubbed = redact_text(&payload);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "chatcore panic: {} at {}:{}:{}",
                scrubbed,
                location.file(),
                location.line(),
                location.column()
            );
        } else {
            eprintln!("chatcore panic: {}", scrubbed);
        }
    }));
}

fn redact_chunk(chunk: &str) -> String {
    let lowered = chunk.to_ascii_lowercase();
    if SENSITIVE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
        || looks_like_jwt(chunk)
    {
        REDACTED.to_owned()
    } else {
        chunk.to_owned()
    }
}

fn looks_like_jwt(value: &str) -> bool {
    let cleaned = value.trim_matches(|ch: char| !ch.is_ascii_alphanumeric());
    let segments: Vec<&str> = cleaned.split('.').collect();

    segments.len() == 3
        && segments[0].starts_with("eyJ")
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fresh_jwt;

    #[test]
    fn redact_text_scrubs_sensitive_fragments() {
        let jwt = fresh_jwt();
        let input = format!("refresh failed password=hunter2 with {jwt} for user u1");
        let output = redact_text(&input);

        assert!(!output.contains("hunter2"));
        assert!(!output.contains(&jwt));
        assert!(output.contains("[REDACTED]"));
        assert!(output.contains("u1"));
    }

    #[test]
    fn fingerprint_is_stable_and_hides_the_token() {
        let first = token_fingerprint("secret-access-token");

        assert_eq!(first, token_fingerprint("secret-access-token"));
        assert_ne!(first, token_fingerprint("other-token"));
        assert!(!first.contains("secret"));
        assert_eq!(token_fingerprint(""), "tok:empty");
    }

    #[test]
    fn sanitize_error_code_rejects_untrusted_text() {
        assert_eq!(sanitize_error_code("TOKEN_EXPIRED"), "TOKEN_EXPIRED");
        assert_eq!(
            sanitize_error_code("invalid: token=abc123"),
            "API_UNSPECIFIED"
        );
    }
}
