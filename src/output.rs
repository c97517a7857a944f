//! # Report styling
//!
//! Decides whether the report is colored and applies the styles. With
//! `--color auto` the environment is consulted first (`NO_COLOR`,
//! `CLICOLOR`, `CLICOLOR_FORCE`, `TERM=dumb`), then whether stdout is a
//! color-capable terminal.

use std::env;
use std::ffi::OsString;

/// Value of the global `--color` flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    pub fn new(choice: ColorChoice) -> Self {
        let use_color = match choice {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => env_preference(|name| env::var_os(name))
                .unwrap_or_else(|| console::Term::stdout().features().colors_supported()),
        };
        Self { use_color }
    }

    pub fn colored() -> Self {
        Self { use_color: true }
    }

    pub fn plain() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::new(ColorChoice::Auto)
    }
}

/// What the environment says about color, if anything. `NO_COLOR` wins even
/// when empty.
fn env_preference(var: impl Fn(&str) -> Option<OsString>) -> Option<bool> {
    let set_to = |name: &str, value: &str| var(name).is_some_and(|v| v == value);
    if var("NO_COLOR").is_some() || set_to("CLICOLOR", "0") {
        return Some(false);
    }
    if var("CLICOLOR_FORCE").is_some_and(|v| !v.is_empty() && v != "0") {
        return Some(true);
    }
    if set_to("TERM", "dumb") {
        return Some(false);
    }
    None
}

/// How a piece of report text is highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Pass,
    Fail,
    Muted,
}

/// Styles `text`, or returns it unchanged when colors are off.
pub fn paint(config: &OutputConfig, text: &str, tone: Tone) -> String {
    if !config.use_color {
        return text.to_string();
    }
    let styled = console::style(text).force_styling(true);
    match tone {
        Tone::Pass => styled.green(),
        Tone::Fail => styled.red().bold(),
        Tone::Muted => styled.dim(),
    }
    .to_string()
}
