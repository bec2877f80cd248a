//! Failure message formatting.

use crate::meta::Meta;

/// Placeholder replaced by the description of the originating instance
pub const SCOPE_PLACEHOLDER: &str = "{scope}";

/// Placeholder replaced by `"not "` when the assertion was negated
pub const NOT_PLACEHOLDER: &str = "{not}";

/// Renders a message template against the instance it belongs to
pub trait ErrorFormatter: Send + Sync {
    /// Render `template` for `owner`; `expected` is false for negated assertions
    fn format(&self, template: &str, owner: &Meta, expected: bool) -> String;
}

/// Substitutes `{scope}` and `{not}`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatter;

impl ErrorFormatter for DefaultFormatter {
    fn format(&self, template: &str, owner: &Meta, expected: bool) -> String {
        let mut message = template.to_string();
        if message.contains(SCOPE_PLACEHOLDER) {
            message = message.replace(SCOPE_PLACEHOLDER, &owner.describe());
        }
        message.replace(NOT_PLACEHOLDER, if expected { "" } else { "not " })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::meta::Family;
    use crate::scope::Scope;

    struct Shouting;

    impl ErrorFormatter for Shouting {
        fn format(&self, template: &str, owner: &Meta, _expected: bool) -> String {
            format!("{} @ {}", template.to_uppercase(), owner.describe())
        }
    }

    #[test]
    fn test_default_substitutes_both_placeholders() {
        let owner = Meta::new(Family::of::<()>()).with_scope(Scope::selector("input"));
        let message = DefaultFormatter.format("{scope} is {not}focused", &owner, false);
        assert_eq!(message, "\"input\" is not focused");
        let message = DefaultFormatter.format("{scope} is {not}focused", &owner, true);
        assert_eq!(message, "\"input\" is focused");
    }

    #[test]
    fn test_plain_template_untouched() {
        let owner = Meta::new(Family::of::<()>());
        assert_eq!(DefaultFormatter.format("boom", &owner, true), "boom");
    }

    #[test]
    fn test_custom_formatter() {
        let owner = Meta::new(Family::of::<()>());
        assert_eq!(Shouting.format("gone", &owner, true), "GONE @ document");
    }
}
