use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
mod tests;

/// Parsed entity ID split into its domain and object parts
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntityId {
    /// Domain prefix (e.g. "light" in "light.kitchen")
    pub domain: String,
    /// Object identifier within the domain
    pub object_id: String,
}

/// Entity ID parsing errors
#[derive(Debug, PartialEq)]
pub enum ParseError {
    /// Empty entity ID
    Empty,
    /// Missing or misplaced "." separator, empty parts
    InvalidFormat(String),
    /// Domain or object part contains characters outside [a-z0-9_]
    InvalidCharacters(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "entity id is empty"),
            ParseError::InvalidFormat(s) => write!(f, "invalid entity id format: {}", s),
            ParseError::InvalidCharacters(s) => write!(f, "invalid entity id characters: {}", s),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse entity ID into domain and object parts
///
/// Format: "domain.object_id", both parts lowercase alphanumeric + underscore.
///
/// # Examples
///
/// ```
/// use powercalc::entity::parse_entity_id;
///
/// let parsed = parse_entity_id("light.living_room").unwrap();
/// assert_eq!(parsed.domain, "light");
/// assert_eq!(parsed.object_id, "living_room");
/// ```
pub fn parse_entity_id(entity_id: &str) -> Result<ParsedEntityId, ParseError> {
    if entity_id.is_empty() {
        return Err(ParseError::Empty);
    }

    let (domain, object_id) = entity_id.split_once('.').ok_or_else(|| {
        ParseError::InvalidFormat(format!("'{}' has no '.' separator", entity_id))
    })?;

    if domain.is_empty() {
        return Err(ParseError::InvalidFormat(
            "Domain part cannot be empty".to_string(),
        ));
    }
    if object_id.is_empty() {
        return Err(ParseError::InvalidFormat(
            "Object part cannot be empty".to_string(),
        ));
    }
    if object_id.contains('.') {
        return Err(ParseError::InvalidFormat(format!(
            "Entity ID '{}' contains multiple '.' separators (expected exactly one)",
            entity_id
        )));
    }

    for c in domain.chars().chain(object_id.chars()) {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '_' {
            return Err(ParseError::InvalidCharacters(format!(
                "Invalid character '{}' (must be [a-z0-9_])",
                c
            )));
        }
    }

    Ok(ParsedEntityId {
        domain: domain.to_string(),
        object_id: object_id.to_string(),
    })
}

/// Color modes a light can report or support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Onoff,
    Brightness,
    ColorTemp,
    Hs,
    Xy,
    Rgb,
    Rgbw,
    Rgbww,
    White,
    Unknown,
}

impl ColorMode {
    /// Parse the string form used in state attributes
    pub fn parse(value: &str) -> Self {
        match value {
            "onoff" => ColorMode::Onoff,
            "brightness" => ColorMode::Brightness,
            "color_temp" => ColorMode::ColorTemp,
            "hs" => ColorMode::Hs,
            "xy" => ColorMode::Xy,
            "rgb" => ColorMode::Rgb,
            "rgbw" => ColorMode::Rgbw,
            "rgbww" => ColorMode::Rgbww,
            "white" => ColorMode::White,
            _ => ColorMode::Unknown,
        }
    }
}

/// Physical device backing a monitored entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// The entity whose power draw is estimated.
///
/// Resolved once per calculation session and treated as immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredEntity {
    pub entity_id: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    pub object_id: String,
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub supported_color_modes: Vec<ColorMode>,
    /// Integration that provides the entity (e.g. "hue", "shelly")
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub device: Option<DeviceInfo>,
}

impl MonitoredEntity {
    /// Build an entity from its id, deriving domain, object id and display name
    pub fn from_entity_id(entity_id: &str) -> Result<Self, ParseError> {
        let parsed = parse_entity_id(entity_id)?;
        let name = parsed
            .object_id
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Self {
            entity_id: entity_id.to_string(),
            unique_id: None,
            object_id: parsed.object_id,
            name,
            domain: parsed.domain,
            supported_color_modes: Vec::new(),
            platform: None,
            device: None,
        })
    }

    pub fn with_color_modes(mut self, modes: Vec<ColorMode>) -> Self {
        self.supported_color_modes = modes;
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = Some(platform.to_string());
        self
    }

    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = Some(device);
        self
    }
}
