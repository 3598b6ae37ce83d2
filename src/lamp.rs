//! Lamp Status Interpreter
//!
//! Turns the plain-text payload the device publishes on its status topic into a
//! [`LampState`]. The device reports lamps by their Indonesian names:
//!
//! | Payload word | Lamp |
//! |---|---|
//! | `Merah` | [`LampColor::Red`] |
//! | `Kuning` | [`LampColor::Yellow`] |
//! | `Hijau` | [`LampColor::Green`] |
//! | `Mati` (whole payload) | all lamps off |
//!
//! A payload may name several lamps at once (`"MerahKuning"` during a phase change).
//! Parsing never fails: anything unrecognized collapses to [`LampState::Off`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal payload the device sends when every lamp is dark.
pub const OFF_PAYLOAD: &str = "Mati";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LampColor {
    Red,
    Yellow,
    Green,
}

impl LampColor {
    /// Top-to-bottom order of the physical signal head.
    pub const ALL: [LampColor; 3] = [LampColor::Red, LampColor::Yellow, LampColor::Green];

    /// Word the device uses for this lamp in status payloads.
    pub fn device_name(self) -> &'static str {
        match self {
            LampColor::Red => "Merah",
            LampColor::Yellow => "Kuning",
            LampColor::Green => "Hijau",
        }
    }

    fn bit(self) -> u8 {
        match self {
            LampColor::Red => 0b001,
            LampColor::Yellow => 0b010,
            LampColor::Green => 0b100,
        }
    }
}

/// Non-empty set of lit lamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActiveLamps(u8);

impl ActiveLamps {
    /// Builds a set from the given colors; `None` when no color is given.
    pub fn from_colors<I: IntoIterator<Item = LampColor>>(colors: I) -> Option<Self> {
        let bits = colors.into_iter().fold(0u8, |acc, c| acc | c.bit());
        (bits != 0).then_some(Self(bits))
    }

    pub fn contains(&self, color: LampColor) -> bool {
        self.0 & color.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = LampColor> + '_ {
        LampColor::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl Serialize for ActiveLamps {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Current lamp picture of the signal head.
///
/// `Off` and `Lit` are mutually exclusive, so "dark but red" cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "colors")]
pub enum LampState {
    #[default]
    Off,
    Lit(ActiveLamps),
}

impl LampState {
    pub fn is_lit(&self, color: LampColor) -> bool {
        match self {
            LampState::Off => false,
            LampState::Lit(lamps) => lamps.contains(color),
        }
    }

    /// Convenience for building expected values.
    pub fn lit<I: IntoIterator<Item = LampColor>>(colors: I) -> Self {
        ActiveLamps::from_colors(colors).map_or(LampState::Off, LampState::Lit)
    }
}

impl fmt::Display for LampState {
    /// Renders the signal head as `[R][Y][ ]`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for color in LampColor::ALL {
            let mark = match (self.is_lit(color), color) {
                (false, _) => ' ',
                (true, LampColor::Red) => 'R',
                (true, LampColor::Yellow) => 'Y',
                (true, LampColor::Green) => 'G',
            };
            write!(f, "[{mark}]")?;
        }
        Ok(())
    }
}

/// Decodes a raw status payload.
///
/// `"Mati"` means off; otherwise every lamp whose device name occurs anywhere in the
/// payload is lit. Payloads naming no lamp at all are treated as off.
pub fn parse(raw: &str) -> LampState {
    if raw == OFF_PAYLOAD {
        return LampState::Off;
    }
    LampState::lit(
        LampColor::ALL
            .into_iter()
            .filter(|color| raw.contains(color.device_name())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use LampColor::*;

    #[test]
    fn off_literal_and_empty_payload_are_dark() {
        assert_eq!(parse("Mati"), LampState::Off);
        assert_eq!(parse(""), LampState::Off);
    }

    #[test]
    fn single_and_combined_lamps() {
        assert_eq!(parse("Hijau"), LampState::lit([Green]));
        assert_eq!(parse("Merah"), LampState::lit([Red]));
        assert_eq!(parse("MerahKuning"), LampState::lit([Red, Yellow]));
        assert_eq!(parse("Kuning Hijau Merah"), LampState::lit([Red, Yellow, Green]));
    }

    #[test]
    fn unrecognized_payloads_fail_safe_to_off() {
        for raw in ["mati", "merah", "RED", "{\"lamp\":1}", "\u{0}\u{ff}", " Mati"] {
            assert_eq!(parse(raw), LampState::Off, "payload {raw:?}");
        }
    }

    #[test]
    fn substring_match_ignores_surrounding_text() {
        assert_eq!(parse("lampu=Kuning;"), LampState::lit([Yellow]));
        // Only the exact literal means off; here Mati is just noise.
        assert_eq!(parse("MatiHijau"), LampState::lit([Green]));
    }

    #[test]
    fn lit_never_holds_an_empty_set() {
        assert_eq!(LampState::lit(Vec::new()), LampState::Off);
        assert!(ActiveLamps::from_colors(Vec::new()).is_none());
        let lamps = ActiveLamps::from_colors([Green, Red, Green]).unwrap();
        assert_eq!(lamps.iter().collect::<Vec<_>>(), vec![Red, Green]);
    }

    #[test]
    fn display_renders_signal_head() {
        assert_eq!(LampState::Off.to_string(), "[ ][ ][ ]");
        assert_eq!(parse("MerahKuning").to_string(), "[R][Y][ ]");
        assert_eq!(parse("Hijau").to_string(), "[ ][ ][G]");
    }
}
