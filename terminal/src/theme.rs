//! Theme and Colors
//!
//! Two palettes, one for dark terminal backgrounds and one for light ones.
//! Syntax highlighting picks a matching syntect theme.

use crossterm::style::Color;
use gpterm_core::ThemeMode;

// ============================================================================
// Shared Colors
// ============================================================================

/// Titles and the intro banner
pub const TITLE_MAGENTA: Color = Color::Magenta;

/// Shell info (command names)
pub const INFO_BLUE: Color = Color::Blue;

/// Errors
pub const ERROR_RED: Color = Color::Rgb { r: 255, g: 80, b: 80 };

/// Context reset notices
pub const NOTICE_RED: Color = Color::Rgb { r: 230, g: 60, b: 60 };

// ============================================================================
// Palettes
// ============================================================================

/// Colors used by the console for one background
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThemeColors {
    /// Banner and headings
    pub title: Color,
    /// Command names in messages
    pub info: Color,
    /// Console info text (settings, delimiters)
    pub console_info: Color,
    /// The shell prompt
    pub prompt: Color,
    /// Messages submitted on the user's behalf
    pub message: Color,
    /// Streamed response text
    pub response: Color,
    /// Syntect theme for code blocks
    pub code_theme: &'static str,
}

impl ThemeColors {
    /// Palette for dark backgrounds
    #[must_use]
    pub const fn dark() -> Self {
        Self {
            title: TITLE_MAGENTA,
            info: INFO_BLUE,
            console_info: Color::Rgb { r: 105, g: 115, b: 246 },
            prompt: Color::White,
            message: Color::Rgb { r: 199, g: 233, b: 255 },
            response: Color::Rgb { r: 255, g: 232, b: 243 },
            code_theme: "base16-ocean.dark",
        }
    }

    /// Palette for light backgrounds
    #[must_use]
    pub const fn light() -> Self {
        Self {
            title: TITLE_MAGENTA,
            info: INFO_BLUE,
            console_info: Color::Rgb { r: 0, g: 0, b: 255 },
            prompt: Color::Black,
            message: Color::Rgb { r: 25, g: 24, b: 70 },
            response: Color::Rgb { r: 173, g: 31, b: 152 },
            code_theme: "InspiredGitHub",
        }
    }

    /// Palette for a theme mode
    #[must_use]
    pub const fn for_mode(mode: ThemeMode) -> Self {
        match mode {
            ThemeMode::Dark => Self::dark(),
            ThemeMode::Light => Self::light(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palettes_differ() {
        let dark = ThemeColors::for_mode(ThemeMode::Dark);
        let light = ThemeColors::for_mode(ThemeMode::Light);

        assert_ne!(dark.response, light.response);
        assert_eq!(dark.code_theme, "base16-ocean.dark");
        assert_eq!(light.code_theme, "InspiredGitHub");
    }
}
