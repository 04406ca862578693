// Pattern - Ordered sequence of steps a track cycles through
// Index arithmetic wraps modulo the pattern length

use std::fmt;
use std::str::FromStr;

use super::SequencerError;
use super::step::Step;

/// A validated track pattern
///
/// A pattern always holds at least one step. Layer tokens are only legal
/// between two non-layer steps, so a cursor can never land on one directly:
/// a pattern may not start or end with `|`, and may not contain `| |`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    steps: Vec<Step>,
}

impl Pattern {
    /// Create a pattern from steps, validating layer placement
    pub fn new(steps: Vec<Step>) -> Result<Self, SequencerError> {
        Self::validate(&steps)?;
        Ok(Self { steps })
    }

    /// Pattern that plays the untransposed source on every fire
    pub fn unison() -> Self {
        Self {
            steps: vec![Step::Pitch(0)],
        }
    }

    /// Parse the whitespace separated text encoding (`"0 5 | -3 ! >"`)
    pub fn parse(text: &str) -> Result<Self, SequencerError> {
        let steps = text
            .split_whitespace()
            .enumerate()
            .map(|(index, token)| {
                token.parse::<Step>().map_err(|err| match err {
                    SequencerError::InvalidStep { token, reason, .. } => {
                        SequencerError::InvalidStep {
                            index,
                            token,
                            reason,
                        }
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(steps)
    }

    fn validate(steps: &[Step]) -> Result<(), SequencerError> {
        if steps.is_empty() {
            return Err(SequencerError::EmptyPattern);
        }

        let last = steps.len() - 1;
        for (index, step) in steps.iter().enumerate() {
            if !step.is_layer() {
                continue;
            }

            let reason = if index == 0 {
                Some("a pattern cannot start with a layer")
            } else if index == last {
                Some("a pattern cannot end with a layer")
            } else if steps[index + 1].is_layer() {
                Some("a layer must be followed by a step")
            } else {
                None
            };

            if let Some(reason) = reason {
                return Err(SequencerError::InvalidStep {
                    index,
                    token: step.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Number of steps, layer tokens included
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false, a pattern has at least one step
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at `index`, wrapping around the pattern length
    pub fn step_at(&self, index: usize) -> Step {
        self.steps[index % self.steps.len()]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Index following `index`, wrapping
    pub fn wrap(&self, index: usize) -> usize {
        index % self.steps.len()
    }

    /// Distinct transpositions in first-appearance order
    pub fn transpositions(&self) -> Vec<i32> {
        let mut seen = Vec::new();
        for semitones in self.steps.iter().filter_map(Step::semitones) {
            if !seen.contains(&semitones) {
                seen.push(semitones);
            }
        }
        seen
    }

    /// Space separated encoding accepted by [`Pattern::parse`]
    pub fn to_text(&self) -> String {
        self.steps
            .iter()
            .map(Step::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::unison()
    }
}

impl FromStr for Pattern {
    type Err = SequencerError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

/// Compact display form, layered steps are glued together (`5|-3 7`)
impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut previous_was_layer = true;
        for (index, step) in self.steps.iter().enumerate() {
            let glued = step.is_layer() || previous_was_layer;
            if index > 0 && !glued {
                f.write_str(" ")?;
            }
            write!(f, "{}", step)?;
            previous_was_layer = step.is_layer();
        }
        Ok(())
    }
}
