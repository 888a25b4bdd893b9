//! Small helpers shared across modules.

use std::borrow::Cow;

/// Expand a leading `~` to `$HOME` in configured file paths.
///
/// - `"~"` → `"/home/user"`
/// - `"~/foo"` → `"/home/user/foo"`
/// - Anything else passes through unchanged.
pub fn expand_tilde(path: &str) -> Cow<'_, str> {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match std::env::var("HOME") {
            Ok(home) => Cow::Owned(format!("{home}{rest}")),
            Err(_) => Cow::Borrowed(path),
        },
        _ => Cow::Borrowed(path),
    }
}
