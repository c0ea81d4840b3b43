use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

/// The email domains that may register, from `ENFORCED_EMAIL_DOMAINS`.
///
/// An absent, empty, or malformed list is a broken deployment rather than
/// bad input, so checks against it fail with [AppError::Configuration].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailDomains(Option<Vec<String>>);

fn domain_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$").expect("valid regex"))
}

impl EmailDomains {
    pub fn new<D: Into<String>>(domains: impl IntoIterator<Item = D>) -> Self {
        Self(Some(domains.into_iter().map(Into::into).collect()))
    }

    pub fn unconfigured() -> Self {
        Self(None)
    }

    /// Parses the comma-separated setting; `None` means it was never set.
    pub fn from_setting(raw: Option<&str>) -> Self {
        Self(raw.map(|raw| {
            raw.split(',')
                .map(|domain| domain.trim().to_lowercase())
                .filter(|domain| !domain.is_empty())
                .collect()
        }))
    }

    pub fn first(&self) -> Option<&str> {
        self.0.as_ref()?.first().map(String::as_str)
    }

    fn configured(&self) -> AppResult<&[String]> {
        let domains = self
            .0
            .as_deref()
            .ok_or_else(|| AppError::configuration("ENFORCED_EMAIL_DOMAINS must be specified"))?;
        if domains.is_empty() {
            return Err(AppError::configuration(
                "ENFORCED_EMAIL_DOMAINS must list at least one domain",
            ));
        }

        Ok(domains)
    }

    /// Whether `email` is an address at one of the allowed domains.
    pub fn is_valid_email(&self, email: &str) -> AppResult<bool> {
        for domain in self.configured()? {
            if !domain_shape().is_match(domain) {
                return Err(AppError::configuration(format!(
                    "enforced email domain `{domain}` must match the pattern foo.foo"
                )));
            }

            let pattern = format!("^[^@]+@{}$", regex::escape(domain));
            let matcher = Regex::new(&pattern)
                .map_err(|err| AppError::configuration(format!("bad domain `{domain}`: {err}")))?;
            if matcher.is_match(email) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub fn ensure_valid(&self, email: &str) -> AppResult<()> {
        if self.is_valid_email(email)? {
            Ok(())
        } else {
            Err(AppError::invalid(
                "email",
                format!(
                    "{email} is not an address at an allowed domain ({})",
                    self.configured()?.join(", ")
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_listed_domains() {
        let domains = EmailDomains::new(["mst.edu", "umsystem.edu"]);

        assert!(domains.is_valid_email("jdoe@mst.edu").unwrap());
        assert!(domains.is_valid_email("jdoe@umsystem.edu").unwrap());
        assert!(!domains.is_valid_email("jdoe@gmail.com").unwrap());
        assert!(!domains.is_valid_email("jdoe@mst.edu.evil.com").unwrap());
        assert!(!domains.is_valid_email("@mst.edu").unwrap());
        assert!(!domains.is_valid_email("a@b@mst.edu").unwrap());
    }

    #[test]
    fn dots_in_domains_are_literal() {
        let domains = EmailDomains::new(["mst.edu"]);
        assert!(!domains.is_valid_email("jdoe@mstxedu").unwrap());
    }

    #[test]
    fn missing_list_is_a_configuration_error() {
        let error = EmailDomains::unconfigured()
            .is_valid_email("jdoe@mst.edu")
            .unwrap_err();
        assert!(matches!(error, AppError::Configuration(_)));

        let error = EmailDomains::from_setting(Some(" , "))
            .is_valid_email("jdoe@mst.edu")
            .unwrap_err();
        assert!(matches!(error, AppError::Configuration(_)));
    }

    #[test]
    fn malformed_domain_is_a_configuration_error() {
        let error = EmailDomains::new(["localhost"])
            .is_valid_email("jdoe@localhost")
            .unwrap_err();
        assert!(matches!(error, AppError::Configuration(_)));
    }

    #[test]
    fn rejection_names_the_email_field() {
        let error = EmailDomains::new(["mst.edu"])
            .ensure_valid("jdoe@gmail.com")
            .unwrap_err();
        match error {
            AppError::Validation(errors) => assert!(errors.contains("email")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn setting_is_split_and_lowercased() {
        let domains = EmailDomains::from_setting(Some("MST.edu, umsystem.edu"));
        assert_eq!(domains, EmailDomains::new(["mst.edu", "umsystem.edu"]));
        assert_eq!(domains.first(), Some("mst.edu"));
    }
}
