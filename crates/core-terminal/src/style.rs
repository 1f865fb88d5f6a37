//! Cell styling and the rc-file style string syntax.
//!
//! A style string is whitespace-separated tokens: a foreground color name,
//! `on_<color>` for the background, and the attributes `bold`, `underline`
//! and `reverse`. `default` / `on_default` leave the terminal colors alone.

use crossterm::style::{Attribute, Attributes, Color, ContentStyle};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StyleParseError {
    #[error("unknown style token: {0}")]
    UnknownToken(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellStyle {
    pub fg: Option<Color>,
    pub bg: Option<Color>,
    pub bold: bool,
    pub underline: bool,
    pub reverse: bool,
}

impl CellStyle {
    pub fn parse(spec: &str) -> Result<Self, StyleParseError> {
        let mut style = CellStyle::default();
        for token in spec.split_whitespace() {
            match token {
                "bold" => style.bold = true,
                "underline" => style.underline = true,
                "reverse" => style.reverse = true,
                "default" => style.fg = None,
                "on_default" => style.bg = None,
                _ => {
                    if let Some(bg) = token.strip_prefix("on_") {
                        style.bg = Some(color_by_name(bg)?);
                    } else {
                        style.fg = Some(color_by_name(token)?);
                    }
                }
            }
        }
        Ok(style)
    }

    /// Merge: colors and flags set on `over` win.
    pub fn overlay(&self, over: &CellStyle) -> CellStyle {
        CellStyle {
            fg: over.fg.or(self.fg),
            bg: over.bg.or(self.bg),
            bold: self.bold || over.bold,
            underline: self.underline || over.underline,
            reverse: self.reverse || over.reverse,
        }
    }

    pub fn content_style(&self) -> ContentStyle {
        let mut attributes = Attributes::default();
        if self.bold {
            attributes.set(Attribute::Bold);
        }
        if self.underline {
            attributes.set(Attribute::Underlined);
        }
        if self.reverse {
            attributes.set(Attribute::Reverse);
        }
        ContentStyle {
            foreground_color: self.fg,
            background_color: self.bg,
            underline_color: None,
            attributes,
        }
    }
}

fn color_by_name(name: &str) -> Result<Color, StyleParseError> {
    let color = match name {
        "black" => Color::Black,
        "red" => Color::DarkRed,
        "green" => Color::DarkGreen,
        "yellow" => Color::DarkYellow,
        "blue" => Color::DarkBlue,
        "magenta" => Color::DarkMagenta,
        "cyan" => Color::DarkCyan,
        "white" => Color::White,
        "grey" | "gray" => Color::Grey,
        "bright_red" => Color::Red,
        "bright_green" => Color::Green,
        "bright_yellow" => Color::Yellow,
        "bright_blue" => Color::Blue,
        "bright_magenta" => Color::Magenta,
        "bright_cyan" => Color::Cyan,
        _ => return Err(StyleParseError::UnknownToken(name.to_owned())),
    };
    Ok(color)
}
