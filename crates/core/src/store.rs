use serde::Serialize;

use crate::theme::ThemeSettings;

/// A merchant's shop configuration as read by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_settings: Option<ThemeSettings>,
}

impl StoreRecord {
    /// In-memory record for hostnames served without a database row.
    pub fn synthesized(id: impl Into<String>, domain: &str, theme_id: &str) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            domain: domain.to_string(),
            selected_theme: Some(theme_id.to_string()),
            theme_settings: None,
        }
    }

    /// Theme to render: `theme_settings.id`, then `selected_theme`, then `fallback`.
    pub fn theme_id<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.theme_settings
            .as_ref()
            .and_then(ThemeSettings::theme_id)
            .or_else(|| {
                self.selected_theme
                    .as_deref()
                    .filter(|theme| !theme.trim().is_empty())
            })
            .unwrap_or(fallback)
    }
}
