//! Resolved per-key lighting state types.
//!
//! A `ChannelState` is the concrete, sendable form of one color channel's
//! animation parameters. Every field is optional: `None` means "leave the
//! hardware default for this parameter". Equality is structural, so the
//! reconciler can diff wanted against current state field-wise.

use serde::{Deserialize, Serialize};

/// The three color channels of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Red => "red",
            Channel::Green => "green",
            Channel::Blue => "blue",
        }
    }
}

/// Animation ramp direction for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Inc,
    Dec,
    IncDec,
    DecInc,
}

impl Direction {
    /// Parse the quoted-literal form used in animation templates.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inc" => Some(Direction::Inc),
            "dec" => Some(Direction::Dec),
            "incDec" => Some(Direction::IncDec),
            "decInc" => Some(Direction::DecInc),
            _ => None,
        }
    }
}

/// Resolved animation parameters for one channel of one key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_hold_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_hold_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_maximum_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_minimum_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_hold_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_hold_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_increment: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_decrement: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_increment_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_decrement_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect_id: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<bool>,
}

impl ChannelState {
    /// Ramp to `level` once and hold there.
    pub fn hold_at(level: f64) -> Self {
        Self {
            up_hold_level: Some(level),
            direction: Some(Direction::Inc),
            ..Self::default()
        }
    }
}

/// Full lighting state of one key: one `ChannelState` per color channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyState {
    pub red: ChannelState,
    pub green: ChannelState,
    pub blue: ChannelState,
}

impl KeyState {
    pub fn channel(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::Red => &self.red,
            Channel::Green => &self.green,
            Channel::Blue => &self.blue,
        }
    }

    pub fn channel_mut(&mut self, channel: Channel) -> &mut ChannelState {
        match channel {
            Channel::Red => &mut self.red,
            Channel::Green => &mut self.green,
            Channel::Blue => &mut self.blue,
        }
    }

    /// All channels ramped to zero and held: the "off" state the null
    /// profile serves for keys nothing else claims.
    pub fn all_off() -> Self {
        Self {
            red: ChannelState::hold_at(0.0),
            green: ChannelState::hold_at(0.0),
            blue: ChannelState::hold_at(0.0),
        }
    }
}

/// A request to move one key to a new lighting state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeRequest {
    pub key: String,
    pub data: KeyState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_state_structural_equality() {
        let a = ChannelState::hold_at(255.0);
        let b = ChannelState::hold_at(255.0);
        assert_eq!(a, b);

        let c = ChannelState {
            transition: Some(true),
            ..ChannelState::hold_at(255.0)
        };
        assert_ne!(a, c);
    }

    #[test]
    fn unset_fields_are_skipped_in_serialization() {
        let s = serde_json::to_string(&ChannelState::hold_at(40.0)).unwrap();
        assert!(s.contains("upHoldLevel"));
        assert!(!s.contains("downHoldLevel"));
        assert_eq!(
            serde_json::from_str::<ChannelState>(&s).unwrap(),
            ChannelState::hold_at(40.0)
        );
    }

    #[test]
    fn direction_parse_round_trip() {
        assert_eq!(Direction::parse("incDec"), Some(Direction::IncDec));
        assert_eq!(Direction::parse("sideways"), None);
    }
}
