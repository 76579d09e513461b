//! Save-state codec: determinism of restore, and rejection of damaged blobs.

mod common;

use nestor_core::audio::sample_bridge;
use nestor_core::state::StateError;
use nestor_nes::{Console, Mapper, NesError};

fn drain(source: &mut nestor_core::audio::SampleSource, n: usize) -> Vec<f32> {
    (0..n).map(|_| source.next_sample()).collect()
}

#[test]
fn test_restore_then_identical_steps_gives_identical_output() {
    let mut original = common::booted_console();
    for _ in 0..3 {
        original.step_frame();
    }
    assert_eq!(original.ppu().mask(), 0x1E);
    let blob = original.save_state();

    let mut restored = Console::new(common::cartridge(&common::nrom_rom())).unwrap();
    restored.load_state(&blob).unwrap();

    let (sink_a, mut source_a) = sample_bridge(100_000);
    let (sink_b, mut source_b) = sample_bridge(100_000);
    assert!(original.attach_audio(sink_a, 44_100));
    assert!(restored.attach_audio(sink_b, 44_100));

    for _ in 0..5 {
        let a = original.step_frame();
        let b = restored.step_frame();
        assert_eq!(a, b);
    }

    let frame = original.current_frame_buffer();
    assert!(frame.pixels.iter().any(|&p| p & 0x00FF_FFFF != 0));
    assert_eq!(frame, restored.current_frame_buffer());
    let samples_a = drain(&mut source_a, 5_000);
    let samples_b = drain(&mut source_b, 5_000);
    assert!(samples_a.iter().any(|&s| s != 0.0));
    assert_eq!(samples_a, samples_b);
    assert_eq!(source_a.dropped(), 0);
    assert_eq!(original.save_state(), restored.save_state());
}

fn console_for(mapper_id: u8) -> Console {
    let mut console = Console::new(common::cartridge(&common::rom(mapper_id, false))).unwrap();
    console.reset();
    console
}

#[test]
fn test_mid_frame_restore_matches_on_every_board() {
    for id in Mapper::SUPPORTED {
        let mut original = console_for(id);
        original.step_frame();
        original.step_frame();
        for _ in 0..3_000 {
            original.step();
        }
        assert!(original.ppu().rendering_enabled(), "mapper {}", id);
        let blob = original.save_state();

        let mut restored = console_for(id);
        restored.load_state(&blob).unwrap();

        for frame in 0..3 {
            original.step_frame();
            restored.step_frame();
            assert_eq!(
                original.current_frame_buffer(),
                restored.current_frame_buffer(),
                "mapper {} frame {}",
                id,
                frame
            );
        }
        assert_eq!(original.save_state(), restored.save_state(), "mapper {}", id);
    }
}

/// The original keeps its output attached across the save point; the copy
/// attaches a fresh one either before or after loading.
#[test]
fn test_audio_continues_across_mid_frame_restore() {
    let (sink, mut source) = sample_bridge(200_000);
    let mut original = common::booted_console();
    assert!(original.attach_audio(sink, 44_100));
    original.step_frame();
    original.step_frame();
    for _ in 0..777 {
        original.step();
    }
    source.flush();
    let blob = original.save_state();

    let (sink_before, mut source_before) = sample_bridge(200_000);
    let mut attached_before = Console::new(common::cartridge(&common::nrom_rom())).unwrap();
    assert!(attached_before.attach_audio(sink_before, 44_100));
    attached_before.load_state(&blob).unwrap();

    let (sink_after, mut source_after) = sample_bridge(200_000);
    let mut attached_after = Console::new(common::cartridge(&common::nrom_rom())).unwrap();
    attached_after.load_state(&blob).unwrap();
    assert!(attached_after.attach_audio(sink_after, 44_100));

    for _ in 0..3 {
        original.step_frame();
        attached_before.step_frame();
        attached_after.step_frame();
    }

    let expected = drain(&mut source, 2_000);
    assert!(expected.iter().any(|&s| s != 0.0));
    assert_eq!(drain(&mut source_before, 2_000), expected);
    assert_eq!(drain(&mut source_after, 2_000), expected);
}

#[test]
fn test_save_is_repeatable() {
    let mut console = common::booted_console();
    console.step_frame();
    assert_eq!(console.save_state(), console.save_state());
}

#[test]
fn test_truncated_blob_is_rejected() {
    let mut console = common::booted_console();
    console.step_frame();
    let blob = console.save_state();

    for cut in [blob.len() - 1, blob.len() / 2, 10, 4, 0] {
        let mut target = common::booted_console();
        assert!(
            target.load_state(&blob[..cut]).is_err(),
            "accepted a blob cut at {}",
            cut
        );
    }

    let mut target = common::booted_console();
    assert!(matches!(
        target.load_state(&blob[..blob.len() - 1]),
        Err(StateError::MissingSentinel)
    ));
}

#[test]
fn test_false_sentinel_and_bad_magic_are_rejected() {
    let console = common::booted_console();
    let mut blob = console.save_state();

    let last = blob.len() - 1;
    blob[last] = 0;
    let mut target = common::booted_console();
    assert!(matches!(
        target.load_state(&blob),
        Err(StateError::MissingSentinel)
    ));

    blob[0] = b'X';
    assert!(matches!(target.load_state(&blob), Err(StateError::BadMagic)));
}

#[test]
fn test_state_file_roundtrip_and_missing_file() {
    let dir = common::scratch_dir("state-file");
    let path = dir.join("nested").join("game.sav");

    let mut console = common::booted_console();
    console.step_frame();
    console.save_state_file(&path).unwrap();

    let mut other = Console::new(common::cartridge(&common::nrom_rom())).unwrap();
    other.load_state_file(&path).unwrap();
    assert_eq!(other.save_state(), console.save_state());

    match other.load_state_file(dir.join("missing.sav")) {
        Err(NesError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected NotFound, got {:?}", other),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_restore_rejects_state_from_another_board() {
    let nrom = common::booted_console();
    let blob = nrom.save_state();

    let mut uxrom = Console::new(common::cartridge(&common::rom(2, false))).unwrap();
    uxrom.reset();
    assert!(uxrom.load_state(&blob).is_err());
}
