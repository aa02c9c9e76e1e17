use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cadenza_audioio::{
    AudioConfig, AudioIo, PeakMeter, ProjectAudioIo, StreamOptions, NO_AUDIO_IO_TOKEN,
};
use cadenza_effects::{
    EffectSession, EffectUiValidator, MemoryPanel, NullPlugin, NullUiClient, ParamId,
    ParameterInfo, ParameterUnit, SyncConfig,
};

fn tempo_plugin() -> NullPlugin {
    NullPlugin::new(vec![
        ParameterInfo::new(0, "Feedback", 0.0, 1.0, 0.4),
        ParameterInfo::new(1, "Tempo", 20.0, 300.0, 120.0).with_unit(ParameterUnit::Rate),
    ])
}

#[test]
fn token_lifecycle() {
    let project = ProjectAudioIo::default();
    assert_eq!(project.audio_io_token(), NO_AUDIO_IO_TOKEN);
    project.set_audio_io_token(5);
    assert!(project.is_audio_active());
    project.set_audio_io_token(-1);
    assert!(!project.is_audio_active());
}

#[test]
fn rate_parameters_track_play_speed_changes() {
    let session = EffectSession::new(tempo_plugin(), SyncConfig::default());
    let project = ProjectAudioIo::default();
    let changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&changes);
    let _speed = project.subscribe_speed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(session.scaled_parameter(ParamId(1), &project), Ok(120.0));
    project.set_play_speed(0.5);
    project.set_play_speed(0.5);
    assert_eq!(session.scaled_parameter(ParamId(1), &project), Ok(60.0));
    assert_eq!(session.scaled_parameter(ParamId(0), &project), Ok(0.4));
    assert_eq!(changes.load(Ordering::SeqCst), 1);
}

#[test]
fn dialog_edits_reach_the_audio_thread() -> anyhow::Result<()> {
    let plugin = tempo_plugin();
    let session = EffectSession::new(plugin, SyncConfig::default());
    let mut validator =
        session.populate_ui(MemoryPanel::new(), Box::new(NullUiClient::new()));

    let project = Arc::new(ProjectAudioIo::new(Arc::new(
        |project: &ProjectAudioIo, _new_defaults: bool| StreamOptions {
            rate: 8_000.0,
            play_speed: project.play_speed(),
            variable_speed: true,
            looping: false,
            playback_meter: project.playback_meter(),
            capture_meter: None,
        },
    )));
    let meter = Arc::new(PeakMeter::new());
    project.set_playback_meter(Some(meter.clone()));
    project.set_play_speed(2.0);

    let store = Arc::clone(session.store());
    let audio = AudioIo::new(Some(AudioConfig {
        block_size: 32,
        channels: 1,
    }));
    let stream = audio.start_stream(Arc::clone(&project), move |block, speed| {
        let tempo = store.scaled_value(ParamId(1), speed).unwrap_or(0.0);
        for channel in &mut block.channels {
            channel.fill((tempo / 1_000.0) as f32);
        }
    })?;
    assert!(project.is_audio_active());
    assert_eq!(stream.token(), project.audio_io_token());

    validator.on_control_changed(ParamId(1), 200.0)?;
    for _ in 0..500 {
        if meter.max_peak() >= 0.4 {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(meter.max_peak(), 0.4);

    validator.on_close();
    drop(stream);
    assert_eq!(project.audio_io_token(), NO_AUDIO_IO_TOKEN);
    assert!(project.playback_meter().is_none());
    Ok(())
}
