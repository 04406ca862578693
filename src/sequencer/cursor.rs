// Track cursor - Per-track navigation over a pattern
// Rate gating plus the step interpretation state machine (hold, rest, layering)

use super::SequencerError;
use super::pattern::Pattern;
use super::step::Step;

/// Cursor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorState {
    /// Not started, ticks are ignored
    #[default]
    Idle,
    /// Cycling through the pattern
    Active,
}

/// What a single fire asks the playback side to do
///
/// The cursor never touches audio itself; the engine executes the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirePlan {
    /// Pattern index of the primary step
    pub index: usize,
    /// Stop everything the track has sounding before starting
    pub stop_prior: bool,
    /// Primary step followed by every layered step, in pattern order
    pub steps: Vec<Step>,
    /// Track is disabled: the stop rule applies but nothing starts
    pub silent: bool,
}

impl FirePlan {
    /// Transpositions to start concurrently, empty for a silent fire
    pub fn transpositions(&self) -> Vec<i32> {
        if self.silent {
            return Vec::new();
        }
        self.steps.iter().filter_map(Step::semitones).collect()
    }

    /// Primary step of the fire
    pub fn primary(&self) -> Step {
        self.steps[0]
    }
}

/// Navigation state of one track over its pattern
#[derive(Debug, Clone)]
pub struct TrackCursor {
    pattern: Pattern,
    position: usize,
    rate: u32,
    counter: u32,
    enabled: bool,
    state: CursorState,
}

impl TrackCursor {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            position: 0,
            rate: 1,
            counter: 1,
            enabled: true,
            state: CursorState::Idle,
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Replace the pattern and restart it from the first step
    pub fn set_pattern(&mut self, pattern: Pattern) {
        self.pattern = pattern;
        self.position = 0;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Move to `position`, which must be a playable step of the pattern
    pub fn set_position(&mut self, position: usize) -> Result<(), SequencerError> {
        if position >= self.pattern.len() || self.pattern.step_at(position).is_layer() {
            return Err(SequencerError::InvalidStep {
                index: position,
                token: self.pattern.step_at(position).to_string(),
                reason: "cursor cannot rest on this position".to_string(),
            });
        }
        self.position = position;
        Ok(())
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Fire every `rate` ticks
    pub fn set_rate(&mut self, rate: u32) -> Result<(), SequencerError> {
        if rate == 0 {
            return Err(SequencerError::InvalidRate);
        }
        self.rate = rate;
        Ok(())
    }

    /// Ticks since the last fire, 1-based
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Restore a counter, e.g. from a saved session
    pub fn set_counter(&mut self, counter: u32) {
        self.counter = counter.max(1);
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Start cycling from the first step with a fresh counter
    pub fn activate(&mut self) {
        self.position = 0;
        self.counter = 1;
        self.state = CursorState::Active;
    }

    pub fn deactivate(&mut self) {
        self.state = CursorState::Idle;
    }

    /// Step that the next fire will start with
    pub fn next_step(&self) -> Step {
        self.pattern.step_at(self.position)
    }

    /// Ticks left before the next fire
    pub fn reps_until_next(&self) -> u32 {
        self.rate.saturating_sub(self.counter)
    }

    /// Advance one loop tick
    ///
    /// Returns a plan when the rate counter is due. A counter left above the
    /// rate after the rate was lowered fires on the next tick.
    pub fn tick(&mut self) -> Option<FirePlan> {
        if self.state == CursorState::Idle {
            return None;
        }

        if self.counter >= self.rate {
            self.counter = 1;
            Some(self.fire())
        } else {
            self.counter += 1;
            None
        }
    }

    /// Fire immediately, bypassing the rate counter (playback downbeat)
    pub fn fire_now(&mut self) -> Option<FirePlan> {
        if self.state == CursorState::Idle {
            return None;
        }
        self.counter = 1;
        Some(self.fire())
    }

    fn fire(&mut self) -> FirePlan {
        let index = self.position;
        let current = self.pattern.step_at(index);
        let mut steps = vec![current];

        // Validation keeps layers off the pattern edges, the bound is a backstop
        let mut position = index;
        for _ in 0..self.pattern.len() {
            let peek = self.pattern.wrap(position + 1);
            if !self.pattern.step_at(peek).is_layer() {
                break;
            }
            position = self.pattern.wrap(position + 2);
            steps.push(self.pattern.step_at(position));
        }

        self.position = self.pattern.wrap(position + 1);

        FirePlan {
            index,
            stop_prior: !current.is_hold(),
            steps,
            silent: !self.enabled,
        }
    }
}

impl Default for TrackCursor {
    fn default() -> Self {
        Self::new(Pattern::unison())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(text: &str) -> TrackCursor {
        let mut cursor = TrackCursor::new(Pattern::parse(text).unwrap());
        cursor.activate();
        cursor
    }

    #[test]
    fn test_idle_cursor_ignores_ticks() {
        let mut cursor = TrackCursor::new(Pattern::parse("1 2").unwrap());
        assert!(cursor.tick().is_none());
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.counter(), 1);
    }

    #[test]
    fn test_rate_one_fires_every_tick() {
        let mut cursor = active("1 2 3");
        for expected in [1, 2, 3, 1] {
            let plan = cursor.tick().unwrap();
            assert_eq!(plan.transpositions(), vec![expected]);
        }
    }

    #[test]
    fn test_rate_gating() {
        let mut cursor = active("4");
        cursor.set_rate(3).unwrap();

        assert!(cursor.tick().is_none());
        assert_eq!(cursor.counter(), 2);
        assert!(cursor.tick().is_none());
        assert_eq!(cursor.counter(), 3);
        assert_eq!(cursor.reps_until_next(), 0);

        assert!(cursor.tick().is_some());
        assert_eq!(cursor.counter(), 1);
    }

    #[test]
    fn test_lowering_rate_fires_next_tick() {
        let mut cursor = active("0");
        cursor.set_rate(4).unwrap();
        cursor.tick();
        cursor.tick();
        cursor.tick();
        assert_eq!(cursor.counter(), 4);

        cursor.set_rate(2).unwrap();
        assert!(cursor.tick().is_some());
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut cursor = TrackCursor::default();
        assert!(matches!(cursor.set_rate(0), Err(SequencerError::InvalidRate)));
        assert_eq!(cursor.rate(), 1);
    }

    #[test]
    fn test_layer_lookahead() {
        let mut cursor = active("5 | -3 7");
        let plan = cursor.tick().unwrap();
        assert_eq!(plan.transpositions(), vec![5, -3]);
        assert!(plan.stop_prior);
        assert_eq!(cursor.position(), 3);

        let plan = cursor.tick().unwrap();
        assert_eq!(plan.transpositions(), vec![7]);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_layer_chain() {
        let mut cursor = active("1 | 2 | 3 4");
        let plan = cursor.tick().unwrap();
        assert_eq!(plan.transpositions(), vec![1, 2, 3]);
        assert_eq!(cursor.next_step(), Step::Pitch(4));
    }

    #[test]
    fn test_hold_does_not_stop() {
        let mut cursor = active("2 > 4");
        assert!(cursor.tick().unwrap().stop_prior);

        let hold = cursor.tick().unwrap();
        assert!(!hold.stop_prior);
        assert!(hold.transpositions().is_empty());

        let plan = cursor.tick().unwrap();
        assert!(plan.stop_prior);
        assert_eq!(plan.transpositions(), vec![4]);
    }

    #[test]
    fn test_rest_stops_and_starts_nothing() {
        let mut cursor = active("! 3");
        let plan = cursor.tick().unwrap();
        assert!(plan.stop_prior);
        assert_eq!(plan.primary(), Step::Rest);
        assert!(plan.transpositions().is_empty());
    }

    #[test]
    fn test_disabled_cursor_still_advances() {
        let mut cursor = active("1 2 3");
        cursor.set_rate(2).unwrap();
        cursor.set_enabled(false);

        assert!(cursor.tick().is_none());
        let plan = cursor.tick().unwrap();
        assert!(plan.silent);
        assert!(plan.stop_prior);
        assert!(plan.transpositions().is_empty());
        assert_eq!(cursor.position(), 1);

        cursor.set_enabled(true);
        cursor.tick();
        let plan = cursor.tick().unwrap();
        assert_eq!(plan.transpositions(), vec![2]);
    }

    #[test]
    fn test_activate_resets_position_and_counter() {
        let mut cursor = active("1 2 3");
        cursor.set_rate(2).unwrap();
        cursor.tick();
        cursor.tick();
        cursor.tick();
        cursor.activate();
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.counter(), 1);
    }

    #[test]
    fn test_fire_now_bypasses_gate() {
        let mut cursor = active("6 7");
        cursor.set_rate(4).unwrap();
        let plan = cursor.fire_now().unwrap();
        assert_eq!(plan.transpositions(), vec![6]);
        assert_eq!(cursor.counter(), 1);
    }

    #[test]
    fn test_set_position_rejects_layer() {
        let mut cursor = active("1 | 2 3");
        assert!(cursor.set_position(1).is_err());
        assert!(cursor.set_position(4).is_err());
        assert!(cursor.set_position(3).is_ok());
    }
}
