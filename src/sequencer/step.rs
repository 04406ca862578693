// Step - One symbolic unit of a track pattern
// Either a transposition in semitones or one of the control tokens `!`, `>`, `|`

use std::fmt;
use std::str::FromStr;

use super::SequencerError;

/// Lowest accepted transposition in semitones
pub const MIN_TRANSPOSE: i32 = -60;

/// Highest accepted transposition in semitones
pub const MAX_TRANSPOSE: i32 = 60;

/// Token for a silent step
pub const REST_TOKEN: &str = "!";

/// Token for a step that keeps the previous sound going
pub const HOLD_TOKEN: &str = ">";

/// Token joining two steps so they sound in the same fire
pub const LAYER_TOKEN: &str = "|";

/// A single pattern step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Play the track transposed by this many semitones
    Pitch(i32),
    /// Stop the previous sound and play nothing
    Rest,
    /// Neither stop nor start anything, the previous sound continues
    Hold,
    /// Join the surrounding steps into one concurrent fire
    Layer,
}

impl Step {
    /// Build a pitch step, checking the transposition bounds
    pub fn pitch(semitones: i32) -> Result<Self, SequencerError> {
        if !(MIN_TRANSPOSE..=MAX_TRANSPOSE).contains(&semitones) {
            return Err(SequencerError::InvalidStep {
                index: 0,
                token: semitones.to_string(),
                reason: format!(
                    "transposition must be between {} and {}",
                    MIN_TRANSPOSE, MAX_TRANSPOSE
                ),
            });
        }
        Ok(Step::Pitch(semitones))
    }

    /// Transposition carried by this step, if any
    pub fn semitones(&self) -> Option<i32> {
        match self {
            Step::Pitch(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_layer(&self) -> bool {
        matches!(self, Step::Layer)
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Step::Hold)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Pitch(n) => write!(f, "{}", n),
            Step::Rest => f.write_str(REST_TOKEN),
            Step::Hold => f.write_str(HOLD_TOKEN),
            Step::Layer => f.write_str(LAYER_TOKEN),
        }
    }
}

impl FromStr for Step {
    type Err = SequencerError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            REST_TOKEN => Ok(Step::Rest),
            HOLD_TOKEN => Ok(Step::Hold),
            LAYER_TOKEN => Ok(Step::Layer),
            other => {
                let semitones: i32 = other.parse().map_err(|_| SequencerError::InvalidStep {
                    index: 0,
                    token: other.to_string(),
                    reason: "expected an integer or one of ! > |".to_string(),
                })?;
                Step::pitch(semitones)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        assert_eq!("!".parse::<Step>().unwrap(), Step::Rest);
        assert_eq!(">".parse::<Step>().unwrap(), Step::Hold);
        assert_eq!("|".parse::<Step>().unwrap(), Step::Layer);
        assert_eq!("-12".parse::<Step>().unwrap(), Step::Pitch(-12));
        assert_eq!("+7".parse::<Step>().unwrap(), Step::Pitch(7));
    }

    #[test]
    fn test_transpose_bounds() {
        assert!("60".parse::<Step>().is_ok());
        assert!("-60".parse::<Step>().is_ok());
        assert!("61".parse::<Step>().is_err());
        assert!("-61".parse::<Step>().is_err());
    }

    #[test]
    fn test_unrecognized_token() {
        let err = "x".parse::<Step>().unwrap_err();
        assert!(matches!(err, SequencerError::InvalidStep { .. }));
        assert!(err.to_string().contains("`x`"));
    }

    #[test]
    fn test_display_roundtrip() {
        for step in [Step::Pitch(-3), Step::Rest, Step::Hold, Step::Layer] {
            assert_eq!(step.to_string().parse::<Step>().unwrap(), step);
        }
    }
}
