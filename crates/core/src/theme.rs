use serde::{Deserialize, Serialize};

/// Theme customisation persisted on a store record.
///
/// Every field is optional on the wire so partially edited blobs still decode; empty values
/// fall back to the catalog defaults when the effective settings are computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub colors: ColorPalette,
    #[serde(default)]
    pub fonts: FontSelection,
    #[serde(default)]
    pub spacing: Spacing,
    #[serde(default)]
    pub border_radius: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette {
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub secondary: String,
    #[serde(default)]
    pub accent: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontSelection {
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub button: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spacing {
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub element: String,
}

impl ThemeSettings {
    /// Returns the settings with the theme id replaced, keeping `selected_theme` and the
    /// nested id consistent when a store row is written.
    pub fn with_id(mut self, theme_id: &str) -> Self {
        self.id = Some(theme_id.to_string());
        self
    }

    /// Returns the nested theme id when it is present and non-empty.
    pub fn theme_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Layers `self` over `base`, keeping base values wherever `self` is blank.
    pub fn overlay(&self, base: &ThemeSettings) -> ThemeSettings {
        ThemeSettings {
            id: self.id.clone().or_else(|| base.id.clone()),
            colors: ColorPalette {
                primary: pick(&self.colors.primary, &base.colors.primary),
                secondary: pick(&self.colors.secondary, &base.colors.secondary),
                accent: pick(&self.colors.accent, &base.colors.accent),
                background: pick(&self.colors.background, &base.colors.background),
                text: pick(&self.colors.text, &base.colors.text),
            },
            fonts: FontSelection {
                heading: pick(&self.fonts.heading, &base.fonts.heading),
                body: pick(&self.fonts.body, &base.fonts.body),
                button: pick(&self.fonts.button, &base.fonts.button),
            },
            spacing: Spacing {
                section: pick(&self.spacing.section, &base.spacing.section),
                element: pick(&self.spacing.element, &base.spacing.element),
            },
            border_radius: pick(&self.border_radius, &base.border_radius),
        }
    }

    /// CSS custom properties exposed to theme layouts.
    pub fn css_variables(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("--color-primary", self.colors.primary.as_str()),
            ("--color-secondary", self.colors.secondary.as_str()),
            ("--color-accent", self.colors.accent.as_str()),
            ("--color-background", self.colors.background.as_str()),
            ("--color-text", self.colors.text.as_str()),
            ("--font-heading", self.fonts.heading.as_str()),
            ("--font-body", self.fonts.body.as_str()),
            ("--font-button", self.fonts.button.as_str()),
            ("--spacing-section", self.spacing.section.as_str()),
            ("--spacing-element", self.spacing.element.as_str()),
            ("--border-radius", self.border_radius.as_str()),
        ]
    }
}

fn pick(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Visual family a catalog theme belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignStyle {
    Minimal,
    Modern,
    Classic,
    Bold,
    Luxury,
}

/// Code-defined catalog entry. Not user-mutable; customisation lives in [`ThemeSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub style: DesignStyle,
    /// primary, secondary, accent, background, text
    pub colors: [&'static str; 5],
    /// heading, body, button
    pub fonts: [&'static str; 3],
    /// section, element
    pub spacing: [&'static str; 2],
    pub border_radius: &'static str,
}

impl ThemeDefinition {
    /// Default settings for the theme, with the theme id embedded.
    pub fn defaults(&self) -> ThemeSettings {
        let [primary, secondary, accent, background, text] = self.colors;
        let [heading, body, button] = self.fonts;
        let [section, element] = self.spacing;
        ThemeSettings {
            id: Some(self.id.to_string()),
            colors: ColorPalette {
                primary: primary.to_string(),
                secondary: secondary.to_string(),
                accent: accent.to_string(),
                background: background.to_string(),
                text: text.to_string(),
            },
            fonts: FontSelection {
                heading: heading.to_string(),
                body: body.to_string(),
                button: button.to_string(),
            },
            spacing: Spacing {
                section: section.to_string(),
                element: element.to_string(),
            },
            border_radius: self.border_radius.to_string(),
        }
    }
}

const BUILTIN_THEMES: &[ThemeDefinition] = &[
    ThemeDefinition {
        id: "minimal",
        name: "Minimal",
        style: DesignStyle::Minimal,
        colors: ["#111827", "#6b7280", "#2563eb", "#ffffff", "#111827"],
        fonts: ["Inter", "Inter", "Inter"],
        spacing: ["4rem", "1rem"],
        border_radius: "0.25rem",
    },
    ThemeDefinition {
        id: "modern",
        name: "Modern",
        style: DesignStyle::Modern,
        colors: ["#7c3aed", "#0ea5e9", "#f59e0b", "#f8fafc", "#0f172a"],
        fonts: ["Poppins", "Inter", "Poppins"],
        spacing: ["5rem", "1.25rem"],
        border_radius: "0.75rem",
    },
    ThemeDefinition {
        id: "classic",
        name: "Classic",
        style: DesignStyle::Classic,
        colors: ["#1e3a8a", "#92400e", "#b91c1c", "#fffbeb", "#1f2937"],
        fonts: ["Playfair Display", "Georgia", "Georgia"],
        spacing: ["4.5rem", "1rem"],
        border_radius: "0",
    },
    ThemeDefinition {
        id: "bold",
        name: "Bold",
        style: DesignStyle::Bold,
        colors: ["#dc2626", "#000000", "#facc15", "#ffffff", "#000000"],
        fonts: ["Montserrat", "Roboto", "Montserrat"],
        spacing: ["6rem", "1.5rem"],
        border_radius: "9999px",
    },
    ThemeDefinition {
        id: "elegant",
        name: "Elegant",
        style: DesignStyle::Luxury,
        colors: ["#1c1917", "#a8a29e", "#b45309", "#fafaf9", "#1c1917"],
        fonts: ["Cormorant Garamond", "Lato", "Lato"],
        spacing: ["5.5rem", "1.25rem"],
        border_radius: "0.125rem",
    },
];

/// Static theme catalog.
#[derive(Debug, Clone, Copy)]
pub struct ThemeCatalog {
    themes: &'static [ThemeDefinition],
}

impl ThemeCatalog {
    pub fn builtin() -> Self {
        Self {
            themes: BUILTIN_THEMES,
        }
    }

    pub fn get(&self, id: &str) -> Option<&'static ThemeDefinition> {
        self.themes.iter().find(|theme| theme.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static ThemeDefinition> {
        self.themes.iter()
    }

    /// Computes the settings a storefront renders with: catalog defaults of `theme_id`
    /// (or of `fallback_id` for unknown themes) overlaid by the stored customisation.
    pub fn effective_settings(
        &self,
        theme_id: &str,
        stored: Option<&ThemeSettings>,
        fallback_id: &str,
    ) -> ThemeSettings {
        let base = self
            .get(theme_id)
            .or_else(|| self.get(fallback_id))
            .map(ThemeDefinition::defaults)
            .unwrap_or_default();

        let settings = match stored {
            Some(stored) => stored.overlay(&base),
            None => base,
        };
        settings.with_id(theme_id)
    }
}

impl Default for ThemeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_catalog_has_unique_ids() {
        let catalog = ThemeCatalog::builtin();
        let mut ids: Vec<_> = catalog.iter().map(|theme| theme.id).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(catalog.contains("minimal"));
    }

    #[test]
    fn settings_use_camel_case_keys() {
        let settings = ThemeCatalog::builtin()
            .get("bold")
            .expect("bold theme")
            .defaults();
        let value = serde_json::to_value(&settings).expect("serialize");
        assert_eq!(value["id"], "bold");
        assert_eq!(value["borderRadius"], "9999px");
        assert_eq!(value["colors"]["accent"], "#facc15");
    }

    #[test]
    fn partial_blob_decodes_and_overlays_defaults() {
        let stored: ThemeSettings = serde_json::from_value(json!({
            "id": "modern",
            "colors": { "primary": "#000000" }
        }))
        .expect("decode");

        let effective =
            ThemeCatalog::builtin().effective_settings("modern", Some(&stored), "minimal");
        assert_eq!(effective.colors.primary, "#000000");
        assert_eq!(effective.colors.secondary, "#0ea5e9");
        assert_eq!(effective.fonts.heading, "Poppins");
        assert_eq!(effective.theme_id(), Some("modern"));
    }

    #[test]
    fn unknown_theme_uses_fallback_defaults_but_keeps_id() {
        let effective = ThemeCatalog::builtin().effective_settings("retro", None, "classic");
        assert_eq!(effective.fonts.heading, "Playfair Display");
        assert_eq!(effective.theme_id(), Some("retro"));
    }

    #[test]
    fn blank_nested_id_is_ignored() {
        let settings = ThemeSettings {
            id: Some("  ".to_string()),
            ..ThemeSettings::default()
        };
        assert_eq!(settings.theme_id(), None);
    }
}
