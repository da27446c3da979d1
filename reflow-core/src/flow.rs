//! Flow modes and the render configuration each one produces.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub const FONT_SIZE_MIN: u16 = 70;
pub const FONT_SIZE_MAX: u16 = 200;
pub const FONT_SIZE_DEFAULT: u16 = 100;

/// Viewports narrower than this are treated as phone-sized.
pub const DEFAULT_NARROW_BREAKPOINT: u32 = 768;
/// Two-up spreads need at least this much width.
pub const DEFAULT_SPREAD_MIN_WIDTH: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Continuous,
    #[default]
    Paginated,
}

impl FlowKind {
    pub fn other(self) -> Self {
        match self {
            FlowKind::Continuous => FlowKind::Paginated,
            FlowKind::Paginated => FlowKind::Continuous,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlowKind::Continuous => "continuous",
            FlowKind::Paginated => "paginated",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continuous" | "scrolled" | "scroll" => Ok(FlowKind::Continuous),
            "paginated" | "paged" => Ok(FlowKind::Paginated),
            _ => Err(SessionError::InvalidMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Sepia,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::Sepia => "sepia",
        }
    }

    /// Light, then dark, then sepia, then back to light.
    pub fn next(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Sepia,
            Theme::Sepia => Theme::Light,
        }
    }

    fn colors(self) -> (&'static str, &'static str) {
        match self {
            Theme::Light => ("#1a1a1a", "#ffffff"),
            Theme::Dark => ("#e0e0e0", "#121212"),
            Theme::Sepia => ("#5b4636", "#f4ecd8"),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "sepia" => Ok(Theme::Sepia),
            other => Err(format!("unknown theme {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub narrow_breakpoint: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            narrow_breakpoint: DEFAULT_NARROW_BREAKPOINT,
        }
    }

    pub fn with_narrow_breakpoint(mut self, breakpoint: u32) -> Self {
        self.narrow_breakpoint = breakpoint;
        self
    }

    pub fn is_narrow(&self) -> bool {
        self.width < self.narrow_breakpoint
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280, 800)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowDirection {
    /// One long vertical column per section.
    ScrolledDoc,
    /// Fixed-size pages laid out horizontally.
    Paginated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spread {
    None,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Padding {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl Padding {
    pub const fn symmetric(vertical: u32, horizontal: u32) -> Self {
        Self {
            top: vertical,
            right: horizontal,
            bottom: vertical,
            left: horizontal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Typography {
    pub font_size: u16,
    pub padding: Padding,
    /// Maximum image height as a percentage of the viewport; `None` is unconstrained.
    pub max_image_height: Option<u8>,
    pub theme: Theme,
}

impl Typography {
    pub fn theme_name(&self) -> String {
        format!("reflow-{}", self.theme.as_str())
    }

    /// The full stylesheet for this typography, keyed by selector.
    pub fn theme_rules(&self) -> ThemeRules {
        let (color, background) = self.theme.colors();
        let mut rules = ThemeRules::default();
        rules
            .set("body", "font-size", format!("{}%", self.font_size))
            .set("body", "color", color)
            .set("body", "background", background)
            .set("body", "padding-top", px(self.padding.top))
            .set("body", "padding-right", px(self.padding.right))
            .set("body", "padding-bottom", px(self.padding.bottom))
            .set("body", "padding-left", px(self.padding.left))
            .set("a", "color", "inherit");
        let image_height = match self.max_image_height {
            Some(percent) => format!("{percent}vh"),
            None => "none".to_string(),
        };
        rules
            .set("img", "max-width", "100%")
            .set("img", "max-height", image_height)
            .set("img", "object-fit", "contain");
        rules
    }
}

fn px(value: u32) -> String {
    format!("{value}px")
}

/// Selector → property → value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeRules {
    rules: BTreeMap<String, BTreeMap<String, String>>,
}

impl ThemeRules {
    pub fn set(
        &mut self,
        selector: &str,
        property: &str,
        value: impl Into<String>,
    ) -> &mut Self {
        self.rules
            .entry(selector.to_string())
            .or_default()
            .insert(property.to_string(), value.into());
        self
    }

    pub fn get(&self, selector: &str, property: &str) -> Option<&str> {
        self.rules
            .get(selector)
            .and_then(|declarations| declarations.get(property))
            .map(String::as_str)
    }

    /// Parses a declaration such as `120%` or `20px` into its numeric part.
    pub fn numeric(&self, selector: &str, property: &str) -> Option<u32> {
        let raw = self.get(selector, property)?;
        let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.rules.iter().flat_map(|(selector, declarations)| {
            declarations
                .iter()
                .map(move |(property, value)| (selector.as_str(), property.as_str(), value.as_str()))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfiguration {
    pub flow: FlowDirection,
    pub spread: Spread,
    pub viewport: Viewport,
    pub typography: Typography,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousConfig {
    pub side_padding: u32,
    /// Room for overscroll and the injected end-of-chapter controls.
    pub bottom_padding: u32,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            side_padding: 20,
            bottom_padding: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginatedConfig {
    pub padding: u32,
    pub spread_min_width: u32,
    pub max_image_height: u8,
}

impl Default for PaginatedConfig {
    fn default() -> Self {
        Self {
            padding: 20,
            spread_min_width: DEFAULT_SPREAD_MIN_WIDTH,
            max_image_height: 80,
        }
    }
}

/// A flow strategy together with its configuration profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Continuous(ContinuousConfig),
    Paginated(PaginatedConfig),
}

impl FlowMode {
    pub fn for_kind(kind: FlowKind) -> Self {
        match kind {
            FlowKind::Continuous => FlowMode::Continuous(ContinuousConfig::default()),
            FlowKind::Paginated => FlowMode::Paginated(PaginatedConfig::default()),
        }
    }

    pub fn kind(&self) -> FlowKind {
        match self {
            FlowMode::Continuous(_) => FlowKind::Continuous,
            FlowMode::Paginated(_) => FlowKind::Paginated,
        }
    }

    pub fn with_spread_min_width(self, width: u32) -> Self {
        match self {
            FlowMode::Paginated(config) => FlowMode::Paginated(PaginatedConfig {
                spread_min_width: width,
                ..config
            }),
            other => other,
        }
    }

    pub fn configure(&self, viewport: Viewport, font_size: u16, theme: Theme) -> RenderConfiguration {
        self.configure_for(viewport.is_narrow(), viewport, font_size, theme)
    }

    pub fn configure_for(
        &self,
        viewport_is_narrow: bool,
        viewport: Viewport,
        font_size: u16,
        theme: Theme,
    ) -> RenderConfiguration {
        let font_size = font_size.clamp(FONT_SIZE_MIN, FONT_SIZE_MAX);
        match self {
            FlowMode::Continuous(config) => RenderConfiguration {
                flow: FlowDirection::ScrolledDoc,
                spread: Spread::None,
                viewport,
                typography: Typography {
                    font_size,
                    padding: Padding {
                        top: config.side_padding,
                        right: config.side_padding,
                        bottom: config.bottom_padding,
                        left: config.side_padding,
                    },
                    max_image_height: None,
                    theme,
                },
            },
            FlowMode::Paginated(config) => {
                let spread = if !viewport_is_narrow && viewport.width > config.spread_min_width {
                    Spread::Auto
                } else {
                    Spread::None
                };
                RenderConfiguration {
                    flow: FlowDirection::Paginated,
                    spread,
                    viewport,
                    typography: Typography {
                        font_size,
                        padding: Padding::symmetric(config.padding, config.padding),
                        max_image_height: Some(config.max_image_height),
                        theme,
                    },
                }
            }
        }
    }
}
