// Integration test: pattern and cursor behaviour
// Randomized checks of wrap-around and rate gating, plus the audible result of
// layered and held steps through the engine

mod common;

use std::sync::Arc;

use common::{EventSink, ScriptedTransform, SinkEvent, manual_engine, pitch_suffix, wav_in};
use looptrack::sequencer::{FirePlan, Pattern, Step, TrackCursor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn random_pattern(rng: &mut StdRng, layers: bool) -> Pattern {
    let len = rng.gen_range(1..12);
    let mut steps = Vec::with_capacity(len);
    for index in 0..len {
        let inner = index > 0 && index + 1 < len;
        let previous_layer = steps.last().is_some_and(Step::is_layer);
        let step = match rng.gen_range(0..10) {
            0 => Step::Rest,
            1 => Step::Hold,
            2 if layers && inner && !previous_layer => Step::Layer,
            _ => Step::Pitch(rng.gen_range(-24..=24)),
        };
        steps.push(step);
    }
    Pattern::new(steps).unwrap()
}

fn active_cursor(pattern: Pattern, rate: u32) -> TrackCursor {
    let mut cursor = TrackCursor::new(pattern);
    cursor.set_rate(rate).unwrap();
    cursor.activate();
    cursor
}

#[test]
fn test_wrap_returns_to_start() {
    let mut rng = StdRng::seed_from_u64(0x1007);
    for _ in 0..200 {
        let pattern = random_pattern(&mut rng, false);
        let len = pattern.len();
        let mut cursor = active_cursor(pattern, 1);

        let fired: Vec<usize> = (0..len)
            .map(|_| cursor.tick().expect("rate 1 fires every tick").index)
            .collect();
        assert_eq!(fired, (0..len).collect::<Vec<_>>());
        assert_eq!(cursor.position(), 0);
    }
}

#[test]
fn test_rate_gating_fires_every_rate_ticks() {
    let mut rng = StdRng::seed_from_u64(0x2e7e);
    for _ in 0..100 {
        let rate = rng.gen_range(1..8);
        let mut cursor = active_cursor(random_pattern(&mut rng, true), rate);

        let ticks = rate as usize * 6;
        let fire_ticks: Vec<usize> = (1..=ticks)
            .filter(|_| cursor.tick().is_some())
            .collect();

        let expected: Vec<usize> = (1..=ticks).filter(|t| t % rate as usize == 0).collect();
        assert_eq!(fire_ticks, expected, "rate {}", rate);
        assert_eq!(cursor.counter(), 1);
    }
}

#[test]
fn test_fires_never_land_on_layers() {
    let mut rng = StdRng::seed_from_u64(0x1a7e);
    for _ in 0..200 {
        let pattern = random_pattern(&mut rng, true);
        let mut cursor = active_cursor(pattern.clone(), 1);
        for _ in 0..pattern.len() * 3 {
            let plan: FirePlan = cursor.tick().unwrap();
            assert!(!plan.primary().is_layer());
            assert!(plan.steps.iter().all(|step| !step.is_layer()));
            assert!(!pattern.step_at(cursor.position()).is_layer());
        }
    }
}

#[test]
fn test_layered_steps_start_together() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(EventSink::default());
    let engine = manual_engine(&dir, ScriptedTransform::new(), sink.clone());
    let id = engine.add_track("Chord");
    engine.set_source(id, wav_in(&dir, "chord.wav", 0.2)).unwrap();
    engine.set_pattern(id, "5 | -3").unwrap();
    assert!(engine.prepare().is_complete());

    let report = engine.play().unwrap();
    assert_eq!(report.fired, vec![id]);
    let started = sink.started();
    assert_eq!(started.len(), 2);
    assert!(started[0].ends_with(&pitch_suffix(5)));
    assert!(started[1].ends_with(&pitch_suffix(-3)));
    assert_eq!(engine.track_status(id).unwrap().sounding, 2);

    // The layered pair is one step, the next fire is the pair again
    engine.tick();
    let events = sink.events();
    assert_eq!(events[2], SinkEvent::Stop(0));
    assert_eq!(events[3], SinkEvent::Stop(1));
    assert_eq!(sink.started().len(), 4);
    engine.stop();
}

#[test]
fn test_hold_keeps_sound_then_next_step_stops_it() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(EventSink::default());
    let engine = manual_engine(&dir, ScriptedTransform::new(), sink.clone());
    let id = engine.add_track("Lead");
    engine.set_source(id, wav_in(&dir, "lead.wav", 0.2)).unwrap();
    engine.set_pattern(id, "2 > 4").unwrap();
    engine.prepare();

    engine.play().unwrap();
    assert_eq!(sink.events().len(), 1);

    engine.tick();
    assert_eq!(sink.events().len(), 1, "hold neither stops nor starts");
    assert_eq!(engine.track_status(id).unwrap().sounding, 1);

    engine.tick();
    let events = sink.events();
    assert_eq!(events[1], SinkEvent::Stop(0));
    match &events[2] {
        SinkEvent::Start { file, .. } => assert!(file.ends_with(&pitch_suffix(4))),
        other => panic!("expected a start, got {:?}", other),
    }
    engine.stop();
}

#[test]
fn test_rest_silences_without_starting() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(EventSink::default());
    let engine = manual_engine(&dir, ScriptedTransform::new(), sink.clone());
    let id = engine.add_track("Perc");
    engine.set_source(id, wav_in(&dir, "perc.wav", 0.2)).unwrap();
    engine.set_pattern(id, "0 !").unwrap();
    engine.prepare();

    engine.play().unwrap();
    engine.tick();
    assert_eq!(
        sink.events()[1..],
        [SinkEvent::Stop(0)],
    );
    assert_eq!(engine.track_status(id).unwrap().sounding, 0);
    engine.stop();
}

#[test]
fn test_disabled_track_advances_silently() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(EventSink::default());
    let engine = manual_engine(&dir, ScriptedTransform::new(), sink.clone());
    let id = engine.add_track("Muted");
    engine.set_source(id, wav_in(&dir, "muted.wav", 0.2)).unwrap();
    engine.set_pattern(id, "0 3 7").unwrap();
    engine.prepare();
    engine.set_enabled(id, false).unwrap();

    engine.play().unwrap();
    engine.tick();
    assert!(sink.started().is_empty());
    assert_eq!(engine.track_status(id).unwrap().position, 2);

    engine.set_enabled(id, true).unwrap();
    engine.tick();
    let started = sink.started();
    assert_eq!(started.len(), 1);
    assert!(started[0].ends_with(&pitch_suffix(7)));
    engine.stop();
}

#[test]
fn test_status_reports_next_step_and_reps() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(EventSink::default());
    let engine = manual_engine(&dir, ScriptedTransform::new(), sink);
    let id = engine.add_track("Slow");
    engine.set_source(id, wav_in(&dir, "slow.wav", 0.2)).unwrap();
    engine.set_pattern(id, "0 12").unwrap();
    engine.set_rate(id, 3).unwrap();
    engine.prepare();

    engine.play().unwrap();
    let status = engine.track_status(id).unwrap();
    assert_eq!(status.next_step, Step::Pitch(12));
    assert_eq!(status.reps_until_next, 2);

    engine.tick();
    assert_eq!(engine.track_status(id).unwrap().reps_until_next, 1);
    engine.stop();
}
