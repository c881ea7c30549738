use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbImage;

use carwatch::{
    Camera, CameraConfig, Command, Console, DetectionRecord, DetectionSink, DetectorSettings,
    FrameSource, LoopSettings, PipelineLoop, PipelineState, VehicleDetector,
};

const TEST_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Default)]
struct ConsoleLog {
    presented: u64,
    waiting: u64,
    released: u32,
}

/// Issues each scripted command once at least `after_frames` frames were shown.
struct ScriptedConsole {
    script: VecDeque<(u64, Command)>,
    log: Arc<Mutex<ConsoleLog>>,
    started: Instant,
}

impl ScriptedConsole {
    fn new(script: Vec<(u64, Command)>) -> (Self, Arc<Mutex<ConsoleLog>>) {
        let log = Arc::new(Mutex::new(ConsoleLog::default()));
        let console = Self {
            script: script.into(),
            log: Arc::clone(&log),
            started: Instant::now(),
        };
        (console, log)
    }
}

impl Console for ScriptedConsole {
    fn present(&mut self, canvas: &RgbImage, hud: &[String]) -> Result<bool> {
        assert_eq!(canvas.dimensions(), (160, 120));
        assert!(hud.iter().any(|line| line.starts_with("queue:")));
        self.log.lock().unwrap().presented += 1;
        Ok(true)
    }

    fn present_waiting(&mut self, _capture_running: bool) -> Result<()> {
        self.log.lock().unwrap().waiting += 1;
        Ok(())
    }

    fn poll_command(&mut self, _timeout: Duration) -> Result<Option<Command>> {
        if self.started.elapsed() > TEST_DEADLINE {
            return Ok(Some(Command::Quit));
        }
        let presented = self.log.lock().unwrap().presented;
        match self.script.front() {
            Some((after, _)) if *after <= presented => Ok(self.script.pop_front().map(|(_, c)| c)),
            _ => Ok(None),
        }
    }

    fn release(&mut self) -> Result<()> {
        self.log.lock().unwrap().released += 1;
        Ok(())
    }
}

struct CountingSink(Arc<Mutex<Vec<DetectionRecord>>>);

impl DetectionSink for CountingSink {
    fn publish(&mut self, record: &DetectionRecord) -> Result<()> {
        self.0.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn camera_config(device: &str) -> CameraConfig {
    CameraConfig {
        device: device.to_string(),
        width: 160,
        height: 120,
        target_fps: 200,
        buffer_frames: 1,
        warmup_frames: 0,
    }
}

fn build_pipeline(
    device: &str,
    console: ScriptedConsole,
    settings: LoopSettings,
) -> Result<PipelineLoop<VehicleDetector>> {
    let state = PipelineState::new(5)?;
    let camera = Camera::open(camera_config(device))?;
    let source = FrameSource::new(
        Box::new(camera),
        Arc::clone(&state.queue),
        state.cancel.clone(),
        Arc::clone(&state.capture),
        200,
    )?
    .spawn()?;
    let detector = VehicleDetector::from_settings(&DetectorSettings::default())?;
    Ok(PipelineLoop::new(state, detector, Box::new(console), settings).with_source(source))
}

fn fast_settings(output_dir: &std::path::Path) -> LoopSettings {
    LoopSettings {
        get_timeout: Duration::from_millis(20),
        output_dir: output_dir.to_path_buf(),
        sink_interval: Duration::ZERO,
        ..LoopSettings::default()
    }
}

#[test]
fn quit_command_stops_capture_and_cleans_up_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (console, log) = ScriptedConsole::new(vec![(20, Command::Quit)]);
    let records = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = build_pipeline("stub://street", console, fast_settings(dir.path()))?
        .with_sink(Box::new(CountingSink(Arc::clone(&records))))?;

    let summary = pipeline.run()?;
    assert!(summary.frames_displayed >= 20);
    assert!(summary.frames_captured >= summary.frames_displayed);

    let metrics = pipeline.metrics();
    assert!(!metrics.capture_running);
    assert_eq!(metrics.queue_depth, 0);

    // Later shutdowns (and the drop) are no-ops.
    let again = pipeline.shutdown();
    assert_eq!(again.frames_displayed, summary.frames_displayed);
    drop(pipeline);
    assert_eq!(log.lock().unwrap().released, 1);

    // Publication never blocks the loop, so a busy sink may miss records, but
    // everything queued before shutdown is delivered.
    let records = records.lock().unwrap();
    assert!(!records.is_empty());
    assert!(records.len() as u64 <= summary.frames_displayed);
    assert!(records.iter().all(|r| r.ai_process_time >= 0.0));
    Ok(())
}

#[test]
fn camera_failure_ends_run_with_error_after_cleanup() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (console, log) = ScriptedConsole::new(Vec::new());
    let mut pipeline =
        build_pipeline("stub://street?fail_after=5", console, fast_settings(dir.path()))?;

    let err = pipeline.run().expect_err("camera failure must fail the run");
    assert!(format!("{err:#}").contains("disconnected"));
    assert_eq!(log.lock().unwrap().released, 1);
    assert!(!pipeline.metrics().capture_running);
    Ok(())
}

#[test]
fn save_writes_snapshot_into_output_dir() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (console, _log) = ScriptedConsole::new(vec![(3, Command::SaveFrame), (3, Command::Quit)]);
    let mut pipeline = build_pipeline("stub://street", console, fast_settings(dir.path()))?;
    pipeline.run()?;

    let saved: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(saved.len(), 1, "saved: {saved:?}");
    assert!(saved[0].starts_with("detection_result_"));
    assert!(saved[0].ends_with(".jpg"));

    let image = image::open(dir.path().join(&saved[0]))?;
    assert_eq!((image.width(), image.height()), (160, 120));
    Ok(())
}

#[test]
fn save_is_ignored_while_paused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (console, log) = ScriptedConsole::new(vec![
        (2, Command::TogglePause),
        (2, Command::SaveFrame),
        (2, Command::ResetCounters),
        (2, Command::Quit),
    ]);
    let mut pipeline = build_pipeline("stub://street", console, fast_settings(dir.path()))?;
    let summary = pipeline.run()?;

    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    assert_eq!(summary.frames_displayed, 0);
    assert_eq!(summary.total_detections, 0);
    assert!(pipeline.metrics().paused);
    assert!(log.lock().unwrap().presented >= 2);
    Ok(())
}

#[test]
fn camera_failure_racing_quit_cleans_up_once() -> Result<()> {
    for fail_after in [3, 4, 5, 6] {
        let dir = tempfile::tempdir()?;
        // Quit lands around the frame the camera dies on.
        let (console, log) = ScriptedConsole::new(vec![(fail_after - 2, Command::Quit)]);
        let device = format!("stub://street?fail_after={fail_after}");
        let mut pipeline = build_pipeline(&device, console, fast_settings(dir.path()))?;

        let outcome = pipeline.run();
        if let Err(err) = &outcome {
            assert!(format!("{err:#}").contains("disconnected"));
        }
        let first = pipeline.shutdown();
        let second = pipeline.shutdown();
        drop(pipeline);

        assert_eq!(log.lock().unwrap().released, 1, "fail_after={fail_after}");
        assert_eq!(first.frames_displayed, second.frames_displayed);
        assert_eq!(first.frames_captured, second.frames_captured);
        assert!(first.frames_captured <= fail_after);
        if let Ok(summary) = outcome {
            assert_eq!(summary.frames_displayed, first.frames_displayed);
        }
    }
    Ok(())
}
