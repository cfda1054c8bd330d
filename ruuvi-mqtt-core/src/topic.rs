//! MQTT topic templates
//!
//! Topics are built from a template with two placeholders, `{mac}` (the
//! canonical device identifier) and `{name}` (the resolved tag name). The
//! template is parsed once at startup so that rendering per record cannot
//! fail.

use core::fmt;
use core::str::FromStr;

use crate::device::DeviceId;
use crate::errors::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Mac,
    Name,
}

/// Validated topic template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    template: String,
    segments: Vec<Segment>,
}

impl TopicTemplate {
    /// Template used when none is configured
    pub const DEFAULT: &'static str = "ruuvi-mqtt/tele/{mac}/{name}/SENSOR";

    /// Parse a template
    ///
    /// Rejects empty templates, placeholders other than `{mac}` and
    /// `{name}`, unbalanced braces and the MQTT wildcards `+` and `#`, which
    /// are not allowed in topics that are published to.
    pub fn parse(template: &str) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidTopic {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        if template.is_empty() {
            return Err(invalid("template is empty"));
        }
        if template.contains(&['+', '#'][..]) {
            return Err(invalid("wildcards are not allowed in a publish topic"));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(pos) = rest.find(&['{', '}'][..]) {
            if rest[pos..].starts_with('}') {
                return Err(invalid("unbalanced '}'"));
            }
            literal.push_str(&rest[..pos]);

            let after = &rest[pos + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unbalanced '{'"))?;
            let placeholder = &after[..close];
            if placeholder.contains('{') {
                return Err(invalid("nested '{'"));
            }

            let segment = match placeholder {
                "mac" => Segment::Mac,
                "name" => Segment::Name,
                other => return Err(invalid(&format!("unknown placeholder {{{}}}", other))),
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(core::mem::take(&mut literal)));
            }
            segments.push(segment);
            rest = &after[close + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    /// Topic for one record
    pub fn render(&self, device: &DeviceId, name: &str) -> String {
        let mut topic = String::with_capacity(self.template.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => topic.push_str(text),
                Segment::Mac => topic.push_str(&device.to_string()),
                Segment::Name => topic.push_str(name),
            }
        }
        topic
    }

    /// The template as configured
    pub fn as_str(&self) -> &str {
        &self.template
    }
}

impl Default for TopicTemplate {
    fn default() -> Self {
        Self {
            template: Self::DEFAULT.to_string(),
            segments: vec![
                Segment::Literal("ruuvi-mqtt/tele/".to_string()),
                Segment::Mac,
                Segment::Literal("/".to_string()),
                Segment::Name,
                Segment::Literal("/SENSOR".to_string()),
            ],
        }
    }
}

impl FromStr for TopicTemplate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}
