use std::sync::LazyLock;

use regex::Regex;

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Key>(.*?)</Key>").expect("valid regex"));
static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Error>(.*?)</Error>").expect("valid regex"));

pub(crate) fn session_key(body: &str) -> Option<String> {
    first_capture(&KEY_RE, body)
}

pub(crate) fn error_message(body: &str) -> Option<String> {
    first_capture(&ERROR_RE, body)
}

/// Errors meaning the key expired rather than the lookup failing.
pub(crate) fn is_session_error(message: &str) -> bool {
    message.contains("Invalid session key") || message.contains("Session Timeout")
}

fn first_capture(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}
