//! Parametric per-channel animation templates.
//!
//! A template holds an optional expression per channel parameter. Building a
//! template compiles every expression once and type-checks it: numeric
//! parameters must be arithmetic, `direction` must be a quoted direction
//! word, `transition` a quoted `"true"`/`"false"`. Resolution against a
//! signal value is then infallible.

use keyglow_hal::{ChannelState, Direction, KeyState};
use serde::{Deserialize, Serialize};

use crate::expr::CompiledExpr;
use crate::mapping::ConfigError;

/// On-disk form of one channel's parameters: each entry is an expression
/// source string (or absent, meaning "leave hardware default").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_hold_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_hold_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_maximum_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_minimum_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_hold_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_hold_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_increment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_decrement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_increment_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_decrement_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,
}

/// On-disk form of a full three-channel animation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationDef {
    pub red: ChannelDef,
    pub green: ChannelDef,
    pub blue: ChannelDef,
}

/// Compiled parameters for one channel.
#[derive(Debug, Clone)]
pub struct ChannelTemplate {
    up_hold_level: Option<CompiledExpr>,
    down_hold_level: Option<CompiledExpr>,
    up_maximum_level: Option<CompiledExpr>,
    down_minimum_level: Option<CompiledExpr>,
    up_hold_delay: Option<CompiledExpr>,
    down_hold_delay: Option<CompiledExpr>,
    up_increment: Option<CompiledExpr>,
    down_decrement: Option<CompiledExpr>,
    up_increment_delay: Option<CompiledExpr>,
    down_decrement_delay: Option<CompiledExpr>,
    start_delay: Option<CompiledExpr>,
    effect_id: Option<CompiledExpr>,
    direction: Option<Direction>,
    transition: Option<bool>,
}

impl ChannelTemplate {
    fn compile(def: &ChannelDef) -> Result<Self, ConfigError> {
        let direction = match &def.direction {
            None => None,
            Some(src) => {
                let word = word_param("direction", src)?;
                Some(Direction::parse(&word).ok_or_else(|| ConfigError::BadParam {
                    param: "direction",
                    value: word,
                })?)
            }
        };
        let transition = match &def.transition {
            None => None,
            Some(src) => match word_param("transition", src)?.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                other => {
                    return Err(ConfigError::BadParam {
                        param: "transition",
                        value: other.to_string(),
                    })
                }
            },
        };

        Ok(Self {
            up_hold_level: numeric_param("upHoldLevel", &def.up_hold_level)?,
            down_hold_level: numeric_param("downHoldLevel", &def.down_hold_level)?,
            up_maximum_level: numeric_param("upMaximumLevel", &def.up_maximum_level)?,
            down_minimum_level: numeric_param("downMinimumLevel", &def.down_minimum_level)?,
            up_hold_delay: numeric_param("upHoldDelay", &def.up_hold_delay)?,
            down_hold_delay: numeric_param("downHoldDelay", &def.down_hold_delay)?,
            up_increment: numeric_param("upIncrement", &def.up_increment)?,
            down_decrement: numeric_param("downDecrement", &def.down_decrement)?,
            up_increment_delay: numeric_param("upIncrementDelay", &def.up_increment_delay)?,
            down_decrement_delay: numeric_param("downDecrementDelay", &def.down_decrement_delay)?,
            start_delay: numeric_param("startDelay", &def.start_delay)?,
            effect_id: numeric_param("effectId", &def.effect_id)?,
            direction,
            transition,
        })
    }

    fn resolve(&self, signal: f64) -> ChannelState {
        let num = |expr: &Option<CompiledExpr>| expr.as_ref().and_then(|e| e.eval(signal));
        ChannelState {
            up_hold_level: num(&self.up_hold_level),
            down_hold_level: num(&self.down_hold_level),
            up_maximum_level: num(&self.up_maximum_level),
            down_minimum_level: num(&self.down_minimum_level),
            up_hold_delay: num(&self.up_hold_delay),
            down_hold_delay: num(&self.down_hold_delay),
            up_increment: num(&self.up_increment),
            down_decrement: num(&self.down_decrement),
            up_increment_delay: num(&self.up_increment_delay),
            down_decrement_delay: num(&self.down_decrement_delay),
            start_delay: num(&self.start_delay),
            effect_id: num(&self.effect_id),
            direction: self.direction,
            transition: self.transition,
        }
    }
}

fn numeric_param(name: &'static str, src: &Option<String>) -> Result<Option<CompiledExpr>, ConfigError> {
    match src {
        None => Ok(None),
        Some(src) => {
            let expr = CompiledExpr::compile(src)?;
            if expr.as_word().is_some() {
                return Err(ConfigError::BadParam {
                    param: name,
                    value: src.clone(),
                });
            }
            Ok(Some(expr))
        }
    }
}

fn word_param(name: &'static str, src: &str) -> Result<String, ConfigError> {
    let expr = CompiledExpr::compile(src)?;
    expr.as_word()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::BadParam {
            param: name,
            value: src.to_string(),
        })
}

/// A compiled three-channel animation, evaluated against the clamped signal
/// value at resolution time.
#[derive(Debug, Clone)]
pub struct AnimationTemplate {
    red: ChannelTemplate,
    green: ChannelTemplate,
    blue: ChannelTemplate,
}

impl AnimationTemplate {
    pub fn compile(def: &AnimationDef) -> Result<Self, ConfigError> {
        Ok(Self {
            red: ChannelTemplate::compile(&def.red)?,
            green: ChannelTemplate::compile(&def.green)?,
            blue: ChannelTemplate::compile(&def.blue)?,
        })
    }

    /// Resolve against a signal value.
    pub fn resolve(&self, signal: f64) -> KeyState {
        KeyState {
            red: self.red.resolve(signal),
            green: self.green.resolve(signal),
            blue: self.blue.resolve(signal),
        }
    }

    /// Ramp every channel up to its byte value once and hold (no decay).
    pub fn solid_color(hex: &str) -> Result<Self, ConfigError> {
        let (r, g, b) = parse_hex(hex)?;
        Ok(Self {
            red: solid_channel(r),
            green: solid_channel(g),
            blue: solid_channel(b),
        })
    }

    /// Continuous pulse between the byte value and zero.
    pub fn solid_color_flashing(hex: &str) -> Result<Self, ConfigError> {
        let (r, g, b) = parse_hex(hex)?;
        Ok(Self {
            red: flashing_channel(r),
            green: flashing_channel(g),
            blue: flashing_channel(b),
        })
    }
}

fn solid_channel(level: u8) -> ChannelTemplate {
    ChannelTemplate {
        up_hold_level: Some(CompiledExpr::literal(level as f64)),
        direction: Some(Direction::Inc),
        down_hold_level: None,
        up_maximum_level: None,
        down_minimum_level: None,
        up_hold_delay: None,
        down_hold_delay: None,
        up_increment: None,
        down_decrement: None,
        up_increment_delay: None,
        down_decrement_delay: None,
        start_delay: None,
        effect_id: None,
        transition: None,
    }
}

fn flashing_channel(level: u8) -> ChannelTemplate {
    ChannelTemplate {
        up_hold_level: Some(CompiledExpr::literal(level as f64)),
        down_hold_level: Some(CompiledExpr::literal(0.0)),
        direction: Some(Direction::IncDec),
        up_increment: Some(CompiledExpr::literal(255.0)),
        down_decrement: Some(CompiledExpr::literal(40.0)),
        up_hold_delay: Some(CompiledExpr::literal(20.0)),
        down_hold_delay: Some(CompiledExpr::literal(20.0)),
        up_maximum_level: None,
        down_minimum_level: None,
        up_increment_delay: None,
        down_decrement_delay: None,
        start_delay: None,
        effect_id: None,
        transition: None,
    }
}

fn parse_hex(hex: &str) -> Result<(u8, u8, u8), ConfigError> {
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if hex.len() != 6 {
        return Err(ConfigError::BadColor(hex.to_string()));
    }
    let byte = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|_| ConfigError::BadColor(hex.to_string()))
    };
    Ok((byte(0..2)?, byte(2..4)?, byte(4..6)?))
}
