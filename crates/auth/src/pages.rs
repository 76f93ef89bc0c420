//! Application page catalog (the unit of role-based grants).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use orgdesk_core::DomainError;

/// One gated area of the surrounding application.
///
/// The catalog is fixed: grants can only reference pages listed here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Page {
    Home,
    Companies,
    Users,
    TeamLeaders,
    Settings,
    Help,
}

/// Pages every authenticated user may reach, with or without a role.
pub const ALWAYS_ALLOWED: [Page; 2] = [Page::Home, Page::Help];

/// A role's grant set. Ordered so that stored and rendered sets are stable.
pub type PageSet = BTreeSet<Page>;

impl Page {
    /// Every page in catalog order.
    pub const ALL: [Page; 6] = [
        Page::Home,
        Page::Companies,
        Page::Users,
        Page::TeamLeaders,
        Page::Settings,
        Page::Help,
    ];

    /// Stable wire identifier (also the value stored in `role_permissions.page`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Home => "home",
            Page::Companies => "companies",
            Page::Users => "users",
            Page::TeamLeaders => "team-leaders",
            Page::Settings => "settings",
            Page::Help => "help",
        }
    }

    /// Human-readable label for navigation.
    pub fn label(&self) -> &'static str {
        match self {
            Page::Home => "Home",
            Page::Companies => "Companies",
            Page::Users => "Users",
            Page::TeamLeaders => "Team Leaders",
            Page::Settings => "Settings",
            Page::Help => "Help",
        }
    }

    pub fn is_always_allowed(&self) -> bool {
        ALWAYS_ALLOWED.contains(self)
    }
}

impl core::fmt::Display for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Page {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Page::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| DomainError::validation(format!("unknown page '{s}'")))
    }
}

/// Parse a list of page identifiers into a set.
///
/// Duplicates and order are not meaningful; any unknown identifier fails the
/// whole parse.
pub fn parse_page_set<I, S>(ids: I) -> Result<PageSet, DomainError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter().map(|s| s.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wire_ids_match_serde_representation() {
        for page in Page::ALL {
            let json = serde_json::to_string(&page).unwrap();
            assert_eq!(json, format!("\"{}\"", page.as_str()));
        }
    }

    #[test]
    fn unknown_page_is_a_validation_error() {
        let err = "billing".parse::<Page>().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn parse_page_set_collapses_duplicates() {
        let set = parse_page_set(["help", "companies", "help"]).unwrap();
        assert_eq!(set, PageSet::from([Page::Companies, Page::Help]));
    }

    #[test]
    fn parse_page_set_rejects_any_unknown_entry() {
        assert!(parse_page_set(["help", "nope"]).is_err());
    }

    proptest! {
        #[test]
        fn page_set_parse_ignores_order(ids in proptest::sample::subsequence(Page::ALL.to_vec(), 0..=6)) {
            let forward: Vec<&str> = ids.iter().map(|p| p.as_str()).collect();
            let mut backward = forward.clone();
            backward.reverse();
            prop_assert_eq!(parse_page_set(&forward).unwrap(), parse_page_set(&backward).unwrap());
        }
    }
}
