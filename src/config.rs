use std::{collections::HashMap, fmt, fs, path::Path, str::FromStr};

use anyhow::bail;
use serde::{de::Visitor, Deserialize};
use winit::keyboard::NamedKey;

use crate::{
    canvas::{MAX_WIDTH, MIN_WIDTH},
    cmd::{Cmd, Tool},
};

const WIDTH_STEP: f32 = 1.0;
/// Largest canvas side; also the smallest texture size every GPU backend supports.
const MAX_CANVAS_SIZE: u32 = 8192;

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub canvas: Canvas,
    pub brush: Brush,
    pub service: Service,
    #[serde(rename = "template")]
    pub templates: Vec<Template>,
    pub bind: HashMap<Key, CommandVerb>,
}

impl Config {
    pub fn load<A: AsRef<Path>>(path: A) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let side = 1..=MAX_CANVAS_SIZE;
        if !side.contains(&self.canvas.width) || !side.contains(&self.canvas.height) {
            bail!(
                "canvas sides must be between 1 and {MAX_CANVAS_SIZE} (got {}x{})",
                self.canvas.width,
                self.canvas.height
            );
        }

        if !(MIN_WIDTH..=MAX_WIDTH).contains(&self.brush.width) {
            bail!(
                "brush width must be between {MIN_WIDTH} and {MAX_WIDTH} (got {})",
                self.brush.width
            );
        }

        for template in &self.templates {
            let Some(key) = &template.key else { continue };
            if let Some(verb) = self.bind.get(key) {
                bail!(
                    "template '{}' uses key {key} which is already bound to {verb:?}",
                    template.name
                );
            }
            if let Some(other) = self
                .templates
                .iter()
                .find(|t| t.key.as_ref() == Some(key) && t.name != template.name)
            {
                bail!(
                    "templates '{}' and '{}' are both bound to key {key}",
                    template.name,
                    other.name
                );
            }
        }

        Ok(())
    }

    /// The command bound to `key`, either a plain binding or a template shortcut.
    pub fn command_for(&self, key: &Key) -> Option<Cmd> {
        if let Some(verb) = self.bind.get(key) {
            return Some(verb.to_cmd());
        }
        self.templates
            .iter()
            .position(|t| t.key.as_ref() == Some(key))
            .map(|template| Cmd::Generate { template })
    }
}

impl Default for Config {
    fn default() -> Self {
        let bind = [
            ("p", CommandVerb::ToolPen),
            ("e", CommandVerb::ToolEraser),
            ("n", CommandVerb::NextColor),
            ("]", CommandVerb::WidthUp),
            ("[", CommandVerb::WidthDown),
            ("Delete", CommandVerb::Clear),
            ("Enter", CommandVerb::Enhance),
            ("t", CommandVerb::Prompt),
            ("Tab", CommandVerb::ToggleResult),
        ]
        .into_iter()
        .filter_map(|(key, verb)| Some((key.parse().ok()?, verb)))
        .collect();

        Self {
            canvas: Canvas::default(),
            brush: Brush::default(),
            service: Service::default(),
            templates: Template::defaults(),
            bind,
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Canvas {
    /// Backing resolution of the whiteboard, in pixels.
    pub width: u32,
    pub height: u32,
    /// Color the (transparent) whiteboard and result image are shown on.
    pub backdrop: Color,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            backdrop: Color([255, 255, 255, 255]),
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Brush {
    pub color: Color,
    pub width: f32,
    /// Colors cycled through by `NEXT_COLOR`.
    pub palette: Vec<Color>,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            color: Color([0, 0, 0, 255]),
            width: 5.0,
            palette: vec![
                Color([0, 0, 0, 255]),
                Color([220, 38, 38, 255]),
                Color([37, 99, 235, 255]),
                Color([22, 163, 74, 255]),
                Color([234, 88, 12, 255]),
            ],
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Service {
    pub endpoint: String,
    pub enhance_model: String,
    pub generate_model: String,
    /// Environment variables checked, in order, for the API key.
    pub api_key_env: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".into(),
            enhance_model: "gemini-2.5-flash-image-preview".into(),
            generate_model: "imagen-4.0-fast-generate-001".into(),
            api_key_env: vec![
                "GEMINI_API_KEY".into(),
                "GOOGLE_API_KEY".into(),
                "GOOGLE_GENAI_API_KEY".into(),
            ],
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Template {
    pub name: String,
    pub prompt: String,
    pub key: Option<Key>,
}

impl Template {
    fn defaults() -> Vec<Self> {
        [
            (
                "Venn Diagram",
                "A simple, clean, two-circle Venn diagram with labels A and B.",
                "1",
            ),
            (
                "Flowchart",
                "A basic flowchart with a start, a decision block, and two end points.",
                "2",
            ),
            (
                "Bar Chart",
                "A simple bar chart with three bars of different heights.",
                "3",
            ),
            ("Pie Chart", "A pie chart divided into three distinct slices.", "4"),
        ]
        .into_iter()
        .map(|(name, prompt, key)| Template {
            name: name.into(),
            prompt: prompt.into(),
            key: key.parse().ok(),
        })
        .collect()
    }
}

/// Straight-alpha RGBA8 color, written as any CSS color in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Color(pub [u8; 4]);

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        csscolorparser::parse(&value)
            .map(|c| Color(c.to_rgba8()))
            .map_err(|e| format!("invalid color '{value}': {e}"))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02x}{g:02x}{b:02x}")
        } else {
            write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }
}

/// A keyboard key, by the character it types or by name (`Enter`, `Tab`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Named(NamedKey),
}

const NAMED_KEYS: &[(&str, NamedKey)] = &[
    ("Enter", NamedKey::Enter),
    ("Tab", NamedKey::Tab),
    ("Space", NamedKey::Space),
    ("Escape", NamedKey::Escape),
    ("Backspace", NamedKey::Backspace),
    ("Delete", NamedKey::Delete),
    ("Insert", NamedKey::Insert),
    ("Home", NamedKey::Home),
    ("End", NamedKey::End),
    ("PageUp", NamedKey::PageUp),
    ("PageDown", NamedKey::PageDown),
    ("ArrowUp", NamedKey::ArrowUp),
    ("ArrowDown", NamedKey::ArrowDown),
    ("ArrowLeft", NamedKey::ArrowLeft),
    ("ArrowRight", NamedKey::ArrowRight),
    ("F1", NamedKey::F1),
    ("F2", NamedKey::F2),
    ("F3", NamedKey::F3),
    ("F4", NamedKey::F4),
    ("F5", NamedKey::F5),
    ("F6", NamedKey::F6),
    ("F7", NamedKey::F7),
    ("F8", NamedKey::F8),
    ("F9", NamedKey::F9),
    ("F10", NamedKey::F10),
    ("F11", NamedKey::F11),
    ("F12", NamedKey::F12),
];

impl Key {
    /// Maps a key press as reported by the window system.
    pub fn from_winit(key: &winit::keyboard::Key) -> Option<Self> {
        match key {
            winit::keyboard::Key::Named(named) => Some(Key::Named(*named)),
            winit::keyboard::Key::Character(text) => text.parse().ok(),
            _ => None,
        }
    }
}

impl FromStr for Key {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(' '), None) => return Ok(Key::Named(NamedKey::Space)),
            (Some(c), None) => return Ok(Key::Char(c.to_ascii_lowercase())),
            _ => {}
        }
        NAMED_KEYS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|&(_, key)| Key::Named(key))
            .ok_or(())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "'{c}'"),
            Key::Named(named) => match NAMED_KEYS.iter().find(|(_, k)| k == named) {
                Some((name, _)) => f.write_str(name),
                None => write!(f, "{named:?}"),
            },
        }
    }
}

impl<'a> Deserialize<'a> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        struct FromStrVisitor;

        impl<'de> Visitor<'de> for FromStrVisitor {
            type Value = Key;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a single character or a key name like \"Enter\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse()
                    .map_err(|()| E::custom(format_args!("invalid key name '{v}'")))
            }
        }

        deserializer.deserialize_str(FromStrVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CommandVerb {
    #[serde(rename = "TOOL_PEN")]
    ToolPen,
    #[serde(rename = "TOOL_ERASER")]
    ToolEraser,
    #[serde(rename = "NEXT_COLOR")]
    NextColor,
    #[serde(rename = "WIDTH_UP")]
    WidthUp,
    #[serde(rename = "WIDTH_DOWN")]
    WidthDown,
    #[serde(rename = "CLEAR")]
    Clear,
    #[serde(rename = "ENHANCE")]
    Enhance,
    #[serde(rename = "PROMPT")]
    Prompt,
    #[serde(rename = "TOGGLE_RESULT")]
    ToggleResult,
}

impl CommandVerb {
    pub fn to_cmd(self) -> Cmd {
        match self {
            CommandVerb::ToolPen => Cmd::SetTool { tool: Tool::Pen },
            CommandVerb::ToolEraser => Cmd::SetTool { tool: Tool::Eraser },
            CommandVerb::NextColor => Cmd::CycleColor,
            CommandVerb::WidthUp => Cmd::AdjustWidth { delta: WIDTH_STEP },
            CommandVerb::WidthDown => Cmd::AdjustWidth { delta: -WIDTH_STEP },
            CommandVerb::Clear => Cmd::Clear,
            CommandVerb::Enhance => Cmd::Enhance,
            CommandVerb::Prompt => Cmd::EditPrompt,
            CommandVerb::ToggleResult => Cmd::ToggleResultPanel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_example_config() {
        let config = Config::load("config.example.toml").unwrap();
        assert_eq!(config.canvas.width, 1280);
        assert_eq!(config.templates.len(), 4);
        assert!(matches!(
            config.command_for(&Key::Named(NamedKey::Enter)),
            Some(Cmd::Enhance)
        ));
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.brush.color, Color([0, 0, 0, 255]));
        assert_eq!(config.brush.width, 5.0);
        assert!(matches!(
            config.command_for(&Key::Char('2')),
            Some(Cmd::Generate { template: 1 })
        ));
        assert!(matches!(
            config.command_for(&Key::Char('e')),
            Some(Cmd::SetTool { tool: Tool::Eraser })
        ));
        assert!(config.command_for(&Key::Char('z')).is_none());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: Config = toml::from_str(
            r##"
            [brush]
            color = "rebeccapurple"

            [service]
            timeout_secs = 30
            "##,
        )
        .unwrap();
        assert_eq!(config.brush.color, Color([102, 51, 153, 255]));
        assert_eq!(config.brush.width, 5.0);
        assert_eq!(config.service.timeout_secs, 30);
        assert_eq!(config.service.enhance_model, "gemini-2.5-flash-image-preview");
        assert_eq!(config.canvas.height, 720);
    }

    #[test]
    fn key_names() {
        assert_eq!("E".parse::<Key>(), Ok(Key::Char('e')));
        assert_eq!("]".parse::<Key>(), Ok(Key::Char(']')));
        assert_eq!("enter".parse::<Key>(), Ok(Key::Named(NamedKey::Enter)));
        assert_eq!(" ".parse::<Key>(), Ok(Key::Named(NamedKey::Space)));
        assert_eq!("".parse::<Key>(), Err(()));
        assert_eq!("Hyper".parse::<Key>(), Err(()));
        assert_eq!(Key::Named(NamedKey::Tab).to_string(), "Tab");
    }

    #[test]
    fn rejects_bad_values() {
        let bad_color = toml::from_str::<Config>("[brush]\ncolor = \"not-a-color\"");
        assert!(bad_color.is_err());

        let bad_key = toml::from_str::<Config>("[bind]\nHyperSpace = \"CLEAR\"");
        assert!(bad_key.is_err());

        let mut config = Config::default();
        config.brush.width = 40.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.canvas.height = 0;
        assert!(config.validate().is_err());

        let oversized = toml::from_str::<Config>("[canvas]\nwidth = 10000").unwrap();
        let err = oversized.validate().unwrap_err();
        assert!(err.to_string().contains("10000x720"), "{err}");

        let mut config = Config::default();
        config.canvas.width = MAX_CANVAS_SIZE;
        config.canvas.height = MAX_CANVAS_SIZE;
        config.validate().unwrap();
    }

    #[test]
    fn template_keys_must_be_unique() {
        let mut config = Config::default();
        config.templates[0].key = Some(Key::Char('e'));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("already bound"), "{err}");

        let mut config = Config::default();
        config.templates[1].key = Some(Key::Char('1'));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("both bound"), "{err}");
    }
}
