//! Extra utilities for use elsewhere in the site.

use time::OffsetDateTime;

pub fn current_time() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Lowercases the domain part of an email and trims surrounding whitespace.
///
/// The local part is left as given, matching how mail servers treat it.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_owned(),
    }
}

/// Keeps only the final path component of an uploaded file's name.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let name = name.rsplit(|c| c == '/' || c == '\\').next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_owned())
    }
}
