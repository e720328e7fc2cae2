use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Values available to body personalization.
#[derive(Clone, Debug, Default)]
pub struct TemplateVars {
    /// Contact first name (`[first]`).
    pub first: String,
    /// Contact full name (`[name]`).
    pub name: String,
    /// Contact phone (`[phone]`).
    pub phone: String,
    /// Contact email (`[email]`).
    pub email: String,
    /// Campaign name (`[campaign]`).
    pub campaign: String,
}

// Matches both bracket styles: [first] and {first}, case-insensitively.
static VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\[{](first|name|phone|email|campaign)[\]}]").unwrap());

/// Substitute personalization variables into a message body.
///
/// Unknown bracket expressions pass through untouched; the result is
/// whitespace-trimmed.
pub fn personalize(body: &str, vars: &TemplateVars) -> String {
    VAR.replace_all(body, |caps: &Captures| {
        match caps[1].to_ascii_lowercase().as_str() {
            "first" => vars.first.clone(),
            "name" => vars.name.clone(),
            "phone" => vars.phone.clone(),
            "email" => vars.email.clone(),
            "campaign" => vars.campaign.clone(),
            _ => caps[0].to_string(),
        }
    })
    .trim()
    .to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn ada() -> TemplateVars {
        TemplateVars {
            first: "Ada".into(),
            name: "Ada Lovelace".into(),
            phone: "+15551112222".into(),
            email: "ada@example.com".into(),
            campaign: "Spring".into(),
        }
    }

    #[test]
    fn substitutes_square_brackets() {
        assert_eq!(personalize("hi [first]", &ada()), "hi Ada");
    }

    #[test]
    fn substitutes_curly_braces_and_is_case_insensitive() {
        assert_eq!(
            personalize("{First}, welcome to [CAMPAIGN]", &ada()),
            "Ada, welcome to Spring"
        );
    }

    #[test]
    fn trims_the_result() {
        assert_eq!(personalize("  [name] ", &ada()), "Ada Lovelace");
    }

    #[test]
    fn leaves_unknown_variables_alone() {
        assert_eq!(personalize("hi [last]", &ada()), "hi [last]");
    }

    #[test]
    fn empty_vars_erase_placeholders() {
        assert_eq!(personalize("hi [first]", &TemplateVars::default()), "hi");
    }
}
