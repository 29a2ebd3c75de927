//! Transcode session integration tests, driven by a recording fake engine.

mod common;

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use recast::{
    BitrateMapping, CancellationToken, ConversionRequest, ConvertOptions, PartialOutput,
    ProgressSample, Quality, RecastError, SessionOutcome, SessionState, TargetFormat, TranscodeSession,
    REFERENCE_AUDIO_BIT_RATE, REFERENCE_VIDEO_BIT_RATE,
};
use tempfile::TempDir;

use common::{Call, FakeEngine, RecordingProgress, Script, strictly_increasing};

fn request(directory: &TempDir, format: TargetFormat) -> ConversionRequest {
    ConversionRequest::into_directory(
        "clip.mov",
        directory.path(),
        format,
        Quality::new(0.8).unwrap(),
    )
    .unwrap()
}

fn options_with(progress: &Arc<RecordingProgress>) -> ConvertOptions {
    ConvertOptions::new().with_progress(progress.clone())
}

// ── Completion ─────────────────────────────────────────────────────

#[test]
fn clip_converts_every_frame_with_increasing_progress() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();
    let progress = Arc::new(RecordingProgress::default());
    let request = request(&directory, TargetFormat::Mp4);
    let output = request.output_path().to_path_buf();

    let mut session = TranscodeSession::new(engine, request, options_with(&progress));
    assert_eq!(session.state(), SessionState::Idle);

    let outcome = session.run().unwrap();

    assert_eq!(outcome, SessionOutcome::Completed { frames: 250 });
    assert_eq!(session.state(), SessionState::Completed);
    assert!(output.ends_with("clip_converted.mp4"));
    assert_eq!(fs::metadata(&output).unwrap().len(), 250);

    let ratios = progress.ratios();
    assert!(strictly_increasing(&ratios), "{ratios:?}");
    assert_eq!(ratios.last().copied(), Some(1.0));
    assert!(ratios.iter().all(|ratio| (0.0..=1.0).contains(ratio)));
    // Frames 10, 20, ..., 240 land on 4%, 8%, ..., 96%, then the final 1.0.
    assert_eq!(ratios.len(), 25, "{ratios:?}");

    assert_eq!(journal.pushes().len(), 250);
}

#[test]
fn frames_reach_the_sink_in_source_order() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();

    recast::transcode(engine, request(&directory, TargetFormat::Mkv), ConvertOptions::new())
        .unwrap();

    let pushes = journal.pushes();
    assert_eq!(pushes.len(), 250);
    assert!(pushes.windows(2).all(|pair| pair[1] > pair[0]));
    assert_eq!(pushes[0], Duration::ZERO);
}

#[test]
fn each_handle_is_opened_and_released_once_sink_first() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();

    recast::transcode(engine, request(&directory, TargetFormat::Mov), ConvertOptions::new())
        .unwrap();

    assert_eq!(journal.count(&Call::OpenSource), 1);
    assert_eq!(journal.count(&Call::OpenSink), 1);
    assert_eq!(journal.count(&Call::ReleaseSink), 1);
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
    assert!(journal.position(&Call::ReleaseSink) < journal.position(&Call::ReleaseSource));
    assert!(journal.position(&Call::OpenSource) < journal.position(&Call::OpenSink));
}

#[test]
fn zero_duration_source_still_finishes_at_full() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        frames: 5,
        duration: Duration::ZERO,
        ..Script::clip()
    };
    let progress = Arc::new(RecordingProgress::default());

    let outcome = recast::transcode(
        FakeEngine::new(script),
        request(&directory, TargetFormat::Mp4),
        options_with(&progress),
    )
    .unwrap();

    assert_eq!(outcome, SessionOutcome::Completed { frames: 5 });
    let ratios = progress.ratios();
    assert!(ratios.iter().all(|ratio| (0.0..=1.0).contains(ratio)));
    assert_eq!(ratios.last().copied(), Some(1.0));
}

#[test]
fn empty_source_completes_with_single_final_sample() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        frames: 0,
        ..Script::clip()
    };
    let progress = Arc::new(RecordingProgress::default());

    let outcome = recast::transcode(
        FakeEngine::new(script),
        request(&directory, TargetFormat::Wav),
        options_with(&progress),
    )
    .unwrap();

    assert_eq!(outcome, SessionOutcome::Completed { frames: 0 });
    assert_eq!(progress.ratios(), vec![1.0]);
}

#[test]
fn smaller_batches_report_more_often() {
    let directory = TempDir::new().unwrap();
    let coarse = Arc::new(RecordingProgress::default());
    let fine = Arc::new(RecordingProgress::default());

    recast::transcode(
        FakeEngine::new(Script::clip()),
        request(&directory, TargetFormat::Mp4),
        options_with(&coarse).with_batch_size(50),
    )
    .unwrap();
    recast::transcode(
        FakeEngine::new(Script::clip()),
        request(&directory, TargetFormat::Mp4),
        options_with(&fine).with_batch_size(1),
    )
    .unwrap();

    assert!(fine.ratios().len() > coarse.ratios().len());
    assert!(strictly_increasing(&fine.ratios()));
    assert!(strictly_increasing(&coarse.ratios()));
}

// ── Failures ───────────────────────────────────────────────────────

#[test]
fn decode_failure_stops_and_releases_everything() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        fail_decode_at: Some(100),
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();
    let request = request(&directory, TargetFormat::Mp4);
    let output = request.output_path().to_path_buf();

    let mut session = TranscodeSession::new(engine, request, ConvertOptions::new());
    let error = session.run().unwrap_err();

    match error {
        RecastError::Transcode {
            reason,
            ratio,
            frames,
        } => {
            assert!(reason.contains("decode"), "{reason}");
            assert_eq!(frames, 100);
            assert!((0.39..0.41).contains(&ratio), "{ratio}");
        }
        other => panic!("Expected Transcode, got: {other}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(journal.pushes().len(), 100);
    assert_eq!(journal.count(&Call::ReleaseSink), 1);
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
    assert!(!output.exists());
}

#[test]
fn encode_failure_reports_frames_written() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        fail_encode_at: Some(42),
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();

    let error = recast::transcode(engine, request(&directory, TargetFormat::Avi), ConvertOptions::new())
        .unwrap_err();

    match error {
        RecastError::Transcode { reason, frames, .. } => {
            assert!(reason.contains("encode"), "{reason}");
            assert_eq!(frames, 42);
        }
        other => panic!("Expected Transcode, got: {other}"),
    }
    assert_eq!(journal.count(&Call::ReleaseSink), 1);
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
}

#[test]
fn failure_on_any_frame_opens_and_releases_once() {
    for failing in [0, 1, 9, 10, 249] {
        for decode in [true, false] {
            let directory = TempDir::new().unwrap();
            let script = if decode {
                Script {
                    fail_decode_at: Some(failing),
                    ..Script::clip()
                }
            } else {
                Script {
                    fail_encode_at: Some(failing),
                    ..Script::clip()
                }
            };
            let engine = FakeEngine::new(script);
            let journal = engine.journal.clone();
            let progress = Arc::new(RecordingProgress::default());
            let request = request(&directory, TargetFormat::Mp4);
            let output = request.output_path().to_path_buf();

            let error = recast::transcode(engine, request, options_with(&progress)).unwrap_err();

            let (frames, ratio) = match error {
                RecastError::Transcode { frames, ratio, .. } => (frames, ratio),
                other => panic!("Expected Transcode at frame {failing}, got: {other}"),
            };
            assert_eq!(frames, failing);
            // A failing encode still received its frame.
            let expected_pushes = if decode { failing } else { failing + 1 };
            assert_eq!(journal.pushes().len() as u64, expected_pushes);
            for call in [
                Call::OpenSource,
                Call::OpenSink,
                Call::ReleaseSink,
                Call::ReleaseSource,
            ] {
                assert_eq!(journal.count(&call), 1, "{call:?} at frame {failing}");
            }

            let ratios = progress.ratios();
            assert!(ratios.iter().all(|reported| *reported < 1.0));
            assert!((0.0..1.0).contains(&ratio), "{ratio}");
            if let Some(last) = ratios.last() {
                assert!(ratio >= *last, "{ratio} < {last}");
            }
            assert!(!output.exists());
        }
    }
}

#[test]
fn panicking_callback_still_releases_both_handles() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();
    let request = request(&directory, TargetFormat::Mp4);
    let output = request.output_path().to_path_buf();
    let options = ConvertOptions::new().with_progress(Arc::new(|sample: &ProgressSample| {
        if sample.ratio >= 0.1 {
            panic!("progress view crashed");
        }
    }));

    let mut session = TranscodeSession::new(engine, request, options);
    let result = panic::catch_unwind(AssertUnwindSafe(|| session.run()));

    assert!(result.is_err());
    assert_eq!(session.state(), SessionState::Failed);
    // Frame 30 is the first estimate at or past 10%; it never reached the sink.
    assert_eq!(journal.pushes().len(), 30);
    assert_eq!(journal.count(&Call::ReleaseSink), 1);
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
    assert!(journal.position(&Call::ReleaseSink) < journal.position(&Call::ReleaseSource));
    assert!(!output.exists());
}

#[test]
fn failure_keeps_partial_output_when_asked() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        fail_decode_at: Some(30),
        ..Script::clip()
    };
    let request = request(&directory, TargetFormat::Mp4);
    let output = request.output_path().to_path_buf();

    let result = recast::transcode(
        FakeEngine::new(script),
        request,
        ConvertOptions::new().with_partial_output(PartialOutput::Keep),
    );

    assert!(result.is_err());
    assert_eq!(fs::metadata(&output).unwrap().len(), 30);
}

#[test]
fn unreadable_source_never_opens_a_sink() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        fail_open_source: true,
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();
    let progress = Arc::new(RecordingProgress::default());

    let error = recast::transcode(engine, request(&directory, TargetFormat::Mp4), options_with(&progress))
        .unwrap_err();

    assert!(matches!(error, RecastError::OpenSource { .. }), "{error}");
    assert!(error.is_open_error());
    assert!(journal.calls().is_empty());
    assert!(progress.samples().is_empty());
}

#[test]
fn unwritable_destination_releases_the_source() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        fail_open_sink: true,
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();

    let error = recast::transcode(engine, request(&directory, TargetFormat::Mp4), ConvertOptions::new())
        .unwrap_err();

    assert!(matches!(error, RecastError::OpenDestination { .. }), "{error}");
    assert_eq!(journal.calls(), vec![Call::OpenSource, Call::ReleaseSource]);
}

#[test]
fn source_without_streams_is_rejected() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        has_video: false,
        has_audio: false,
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();

    let error = recast::transcode(engine, request(&directory, TargetFormat::Mp4), ConvertOptions::new())
        .unwrap_err();

    assert!(matches!(error, RecastError::OpenSource { .. }), "{error}");
    assert_eq!(journal.calls(), vec![Call::OpenSource, Call::ReleaseSource]);
}

#[test]
fn audio_target_from_silent_video_is_rejected() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        has_audio: false,
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();

    let error = recast::transcode(engine, request(&directory, TargetFormat::Mp3), ConvertOptions::new())
        .unwrap_err();

    assert!(matches!(error, RecastError::OpenDestination { .. }), "{error}");
    assert_eq!(journal.count(&Call::OpenSink), 0);
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
}

#[test]
fn release_failure_after_success_is_reported() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        fail_release_sink: true,
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();
    let request = request(&directory, TargetFormat::Mp4);
    let output = request.output_path().to_path_buf();

    let error = recast::transcode(engine, request, ConvertOptions::new()).unwrap_err();

    match error {
        RecastError::Cleanup { resource, .. } => assert_eq!(resource, "sink"),
        other => panic!("Expected Cleanup, got: {other}"),
    }
    // The source is still released after the sink failed.
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
    assert!(!output.exists());
}

#[test]
fn loop_error_wins_over_release_error() {
    let directory = TempDir::new().unwrap();
    let script = Script {
        fail_decode_at: Some(5),
        fail_release_sink: true,
        fail_release_source: true,
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();

    let error = recast::transcode(engine, request(&directory, TargetFormat::Mp4), ConvertOptions::new())
        .unwrap_err();

    assert!(matches!(error, RecastError::Transcode { frames: 5, .. }), "{error}");
    assert_eq!(journal.count(&Call::ReleaseSink), 1);
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
}

#[test]
fn session_runs_only_once() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();

    let mut session =
        TranscodeSession::new(engine, request(&directory, TargetFormat::Mp4), ConvertOptions::new());
    session.run().unwrap();
    let error = session.run().unwrap_err();

    assert!(matches!(
        error,
        RecastError::SessionReused(SessionState::Completed)
    ));
    assert_eq!(journal.count(&Call::OpenSource), 1);
}

// ── Cancellation ───────────────────────────────────────────────────

#[test]
fn cancellation_before_start_processes_nothing() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();
    let progress = Arc::new(RecordingProgress::default());
    let token = CancellationToken::new();
    token.cancel();
    let request = request(&directory, TargetFormat::Mp4);
    let output = request.output_path().to_path_buf();

    let mut session = TranscodeSession::new(
        engine,
        request,
        options_with(&progress).with_cancellation(token),
    );
    let outcome = session.run().unwrap();

    assert!(matches!(outcome, SessionOutcome::Cancelled { frames: 0, .. }));
    assert_eq!(session.state(), SessionState::Cancelled);
    assert!(journal.pushes().is_empty());
    assert!(progress.samples().is_empty());
    assert_eq!(journal.count(&Call::ReleaseSink), 1);
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
    assert!(!output.exists());
}

#[test]
fn cancellation_mid_stream_stops_after_current_frame() {
    let directory = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let script = Script {
        cancel_after: Some((99, token.clone())),
        ..Script::clip()
    };
    let engine = FakeEngine::new(script);
    let journal = engine.journal.clone();
    let progress = Arc::new(RecordingProgress::default());
    let request = request(&directory, TargetFormat::Mp4);
    let output = request.output_path().to_path_buf();

    let outcome = recast::transcode(
        engine,
        request,
        options_with(&progress).with_cancellation(token),
    )
    .unwrap();

    match outcome {
        SessionOutcome::Cancelled { frames, ratio } => {
            assert_eq!(frames, 100);
            assert!(ratio < 1.0);
        }
        other => panic!("Expected Cancelled, got: {other:?}"),
    }
    assert_eq!(journal.pushes().len(), 100);
    assert!(progress.ratios().iter().all(|ratio| *ratio < 1.0));
    assert_eq!(journal.count(&Call::ReleaseSink), 1);
    assert_eq!(journal.count(&Call::ReleaseSource), 1);
    assert!(!output.exists());
}

#[test]
fn cancelled_output_can_be_kept() {
    let directory = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let script = Script {
        cancel_after: Some((9, token.clone())),
        ..Script::clip()
    };
    let request = request(&directory, TargetFormat::Mp4);
    let output = request.output_path().to_path_buf();

    recast::transcode(
        FakeEngine::new(script),
        request,
        ConvertOptions::new()
            .with_cancellation(token)
            .with_partial_output(PartialOutput::Keep),
    )
    .unwrap();

    assert_eq!(fs::metadata(&output).unwrap().len(), 10);
}

// ── Parameters ─────────────────────────────────────────────────────

#[test]
fn sink_receives_quality_scaled_bitrates() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();

    recast::transcode(engine, request(&directory, TargetFormat::Mp4), ConvertOptions::new())
        .unwrap();

    let parameters = journal.parameters().unwrap();
    assert_eq!(parameters.format, TargetFormat::Mp4);
    assert_eq!(parameters.video.unwrap().bit_rate, 2_900_000);
    assert_eq!(parameters.audio.unwrap().bit_rate, Some(249_600));
}

#[test]
fn fixed_mapping_uses_reference_bitrates() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();

    recast::transcode(
        engine,
        request(&directory, TargetFormat::Mkv),
        ConvertOptions::new().with_bitrate_mapping(BitrateMapping::Fixed),
    )
    .unwrap();

    let parameters = journal.parameters().unwrap();
    assert_eq!(parameters.video.unwrap().bit_rate, REFERENCE_VIDEO_BIT_RATE);
    assert_eq!(parameters.audio.unwrap().bit_rate, Some(REFERENCE_AUDIO_BIT_RATE));
}

#[test]
fn audio_only_target_drops_video() {
    let directory = TempDir::new().unwrap();
    let engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();

    recast::transcode(engine, request(&directory, TargetFormat::Wav), ConvertOptions::new())
        .unwrap();

    let parameters = journal.parameters().unwrap();
    assert!(parameters.video.is_none());
    assert_eq!(parameters.audio.unwrap().bit_rate, None);
}

// ── Probe ──────────────────────────────────────────────────────────

#[test]
fn probe_reads_metadata_and_releases() {
    let mut engine = FakeEngine::new(Script::clip());
    let journal = engine.journal.clone();

    let metadata = recast::probe(&mut engine, "clip.mov").unwrap();

    assert_eq!(metadata.duration, Duration::from_secs(10));
    assert_eq!(metadata.video.unwrap().frames_per_second, 25.0);
    assert_eq!(journal.calls(), vec![Call::OpenSource, Call::ReleaseSource]);
}

#[test]
fn probe_rejects_source_without_streams() {
    let mut engine = FakeEngine::new(Script {
        has_video: false,
        has_audio: false,
        ..Script::clip()
    });
    let journal = engine.journal.clone();

    let error = recast::probe(&mut engine, "silence.bin").unwrap_err();

    assert!(matches!(error, RecastError::OpenSource { .. }), "{error}");
    assert_eq!(journal.calls(), vec![Call::OpenSource, Call::ReleaseSource]);
}

#[test]
fn probe_many_keeps_per_file_results() {
    let mut engine = FakeEngine::new(Script::clip());

    let results = recast::probe_many(&mut engine, &["a.mov", "b.mov"]);

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));
}
