//! Style set resolved from rc-file strings.

use core_config::StyleConfig;
use core_terminal::CellStyle;
use core_terminal::style::StyleParseError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("style `{field}`: {source}")]
pub struct StyleError {
    pub field: &'static str,
    #[source]
    pub source: StyleParseError,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Styles {
    pub basic: CellStyle,
    pub query: CellStyle,
    pub matched: CellStyle,
    pub cursor: CellStyle,
    pub selected: CellStyle,
}

impl Styles {
    pub fn from_config(config: &StyleConfig) -> Result<Self, StyleError> {
        let parse = |field: &'static str, spec: &str| {
            CellStyle::parse(spec).map_err(|source| StyleError { field, source })
        };
        Ok(Self {
            basic: parse("basic", &config.basic)?,
            query: parse("query", &config.query)?,
            matched: parse("matched", &config.matched)?,
            cursor: parse("cursor", &config.cursor)?,
            selected: parse("selected", &config.selected)?,
        })
    }
}
