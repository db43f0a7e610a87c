//! Theme colors, with optional overrides from the `[theme]` config section

use ratatui::style::Color;

use crate::config::ThemeConfig;

/// Theme colors for the UI
#[derive(Debug, Clone)]
pub struct Theme {
    pub accent: Color,      // Focused borders, selected controls
    pub danger: Color,      // Errors, destructive controls
    pub success: Color,     // Confirm key, successful writes
    pub warning: Color,     // Prompts, status messages
    pub text: Color,        // Primary text
    pub text_dim: Color,    // Hints, disabled controls
    pub bg_selected: Color, // Selection background
    pub inactive: Color,    // Unfocused borders
    pub header: Color,      // Card and column headers
}

impl Default for Theme {
    fn default() -> Self {
        // Catppuccin-inspired
        Self {
            accent: Color::Rgb(250, 179, 135),
            danger: Color::Rgb(243, 139, 168),
            success: Color::Rgb(166, 218, 149),
            warning: Color::Rgb(249, 226, 175),
            text: Color::Rgb(205, 214, 244),
            text_dim: Color::Rgb(147, 153, 178),
            bg_selected: Color::Rgb(69, 71, 90),
            inactive: Color::Rgb(88, 91, 112),
            header: Color::Rgb(137, 180, 250),
        }
    }
}

impl Theme {
    /// Defaults with any valid overrides applied
    pub fn from_config(config: &ThemeConfig) -> Self {
        let mut theme = Self::default();
        let overrides = [
            (&config.accent, &mut theme.accent),
            (&config.danger, &mut theme.danger),
            (&config.success, &mut theme.success),
            (&config.warning, &mut theme.warning),
            (&config.text, &mut theme.text),
        ];
        for (value, slot) in overrides {
            if let Some(hex) = value {
                match parse_hex_color(hex) {
                    Some(color) => *slot = color,
                    None => tracing::warn!("Ignoring invalid theme color '{}'", hex),
                }
            }
        }
        theme
    }
}

/// Parse `#rrggbb` (the leading `#` is optional)
fn parse_hex_color(s: &str) -> Option<Color> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Color::Rgb(r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FFC107"), Some(Color::Rgb(255, 193, 7)));
        assert_eq!(parse_hex_color("d35f5f"), Some(Color::Rgb(211, 95, 95)));
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#gggggg"), None);
    }

    #[test]
    fn test_overrides() {
        let config = ThemeConfig {
            accent: Some("#010203".to_string()),
            danger: Some("nonsense".to_string()),
            ..Default::default()
        };
        let theme = Theme::from_config(&config);
        assert_eq!(theme.accent, Color::Rgb(1, 2, 3));
        assert_eq!(theme.danger, Theme::default().danger);
    }
}
