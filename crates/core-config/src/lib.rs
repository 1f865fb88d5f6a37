//! Rc-file loading and the session option model.
//!
//! The rc-file is TOML. Every field has a default, unknown fields are
//! tolerated, but a file that does not parse is a fatal setup error: a
//! silently ignored keymap would be worse than a startup failure. Discovery
//! prefers the platform config dir (`<config>/sift/config.toml`) and falls
//! back to `~/.sift.toml`; `--rcfile` overrides discovery and must exist.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read rc-file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse rc-file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Where the line list sits relative to the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    #[default]
    TopDown,
    BottomUp,
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top-down" => Ok(Layout::TopDown),
            "bottom-up" => Ok(Layout::BottomUp),
            other => Err(format!("unknown layout: {other}")),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::TopDown => write!(f, "top-down"),
            Layout::BottomUp => write!(f, "bottom-up"),
        }
    }
}

/// Style strings, parsed into cell styles by the view. Kept as strings here
/// so this crate stays independent of the terminal backend.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StyleConfig {
    pub basic: String,
    pub query: String,
    pub matched: String,
    pub cursor: String,
    pub selected: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            basic: "default on_default".into(),
            query: "default on_default".into(),
            matched: "cyan bold".into(),
            cursor: "black on_cyan".into(),
            selected: "default on_magenta bold".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SingleKeyJumpConfig {
    /// Prefix each visible row with its jump hint while jump mode is armed.
    pub show_prefix: bool,
    /// Hint alphabet; empty means the built-in default.
    pub alphabet: String,
}

impl Default for SingleKeyJumpConfig {
    fn default() -> Self {
        Self {
            show_prefix: true,
            alphabet: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub prompt: String,
    /// Matcher selected at startup; None keeps the first in the rotation.
    pub initial_matcher: Option<String>,
    /// Debounce window for keystroke bursts, in milliseconds. Zero sends
    /// every keystroke immediately.
    pub query_exec_delay_ms: u64,
    pub layout: Layout,
    /// Keep the selection when the query is cleared.
    pub sticky_selection: bool,
    /// Marker drawn in front of selected lines.
    pub selection_prefix: String,
    pub style: StyleConfig,
    /// `"C-x" = "ActionName"` rebindings applied over the defaults.
    pub keymap: BTreeMap<String, String>,
    pub single_key_jump: SingleKeyJumpConfig,
    /// External matchers: name → argv, `$QUERY` replaced at run time.
    pub custom_matcher: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: "QUERY>".into(),
            initial_matcher: None,
            query_exec_delay_ms: 50,
            layout: Layout::default(),
            sticky_selection: false,
            selection_prefix: String::new(),
            style: StyleConfig::default(),
            keymap: BTreeMap::new(),
            single_key_jump: SingleKeyJumpConfig::default(),
            custom_matcher: BTreeMap::new(),
        }
    }
}

/// Best-effort rc-file location following platform conventions.
pub fn discover() -> Option<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("sift").join("config.toml");
        if path.exists() {
            return Some(path);
        }
    }
    if let Some(home) = dirs::home_dir() {
        let path = home.join(".sift.toml");
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load the rc-file. An explicit `path` must exist and parse; a discovered
/// one must parse; no file at all means defaults.
pub fn load_from(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let Some(path) = path.or_else(discover) else {
        return Ok(Config::default());
    };
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    info!(target: "config", path = %path.display(), "rcfile_loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_rc(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.prompt, "QUERY>");
        assert_eq!(config.query_exec_delay_ms, 50);
        assert_eq!(config.layout, Layout::TopDown);
        assert!(config.keymap.is_empty());
        assert!(config.single_key_jump.show_prefix);
    }

    #[test]
    fn parses_a_full_rcfile() {
        let rc = write_rc(
            r#"
prompt = "FILTER>"
initial_matcher = "Regexp"
query_exec_delay_ms = 0
layout = "bottom-up"
sticky_selection = true
selection_prefix = ">"

[style]
matched = "yellow bold"

[keymap]
"C-q" = "Cancel"
"C-x,C-c" = "Finish"

[single_key_jump]
show_prefix = false
alphabet = "abc"

[custom_matcher]
Grep = ["grep", "-E", "$QUERY"]
"#,
        );
        let config = load_from(Some(rc.path().to_path_buf())).unwrap();
        assert_eq!(config.prompt, "FILTER>");
        assert_eq!(config.initial_matcher.as_deref(), Some("Regexp"));
        assert_eq!(config.query_exec_delay_ms, 0);
        assert_eq!(config.layout, Layout::BottomUp);
        assert!(config.sticky_selection);
        assert_eq!(config.selection_prefix, ">");
        assert_eq!(config.style.matched, "yellow bold");
        assert_eq!(config.style.basic, "default on_default");
        assert_eq!(config.keymap.get("C-q").unwrap(), "Cancel");
        assert_eq!(config.keymap.len(), 2);
        assert!(!config.single_key_jump.show_prefix);
        assert_eq!(config.custom_matcher.get("Grep").unwrap().len(), 3);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let rc = write_rc("prompt = \"P>\"\nfuture_option = 42\n");
        let config = load_from(Some(rc.path().to_path_buf())).unwrap();
        assert_eq!(config.prompt, "P>");
    }

    #[test]
    fn broken_rcfile_is_fatal() {
        let rc = write_rc("layout = \"diagonal\"\n");
        assert!(matches!(
            load_from(Some(rc.path().to_path_buf())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_explicit_rcfile_is_fatal() {
        assert!(matches!(
            load_from(Some(PathBuf::from("/nonexistent/sift.toml"))),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn layout_from_str() {
        assert_eq!("top-down".parse::<Layout>().unwrap(), Layout::TopDown);
        assert_eq!("bottom-up".parse::<Layout>().unwrap(), Layout::BottomUp);
        assert!("sideways".parse::<Layout>().is_err());
    }
}
