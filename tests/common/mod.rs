//! A scriptable in-memory engine that records every call the session makes.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use recast::{
    AudioMetadata, CancellationToken, EncodingParameters, Engine, EngineError, Frame,
    ProgressCallback, ProgressSample, Sink, Source, StreamMetadata, VideoMetadata,
};

/// One observed engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    OpenSource,
    OpenSink,
    Push(Duration),
    ReleaseSink,
    ReleaseSource,
}

/// How the fake source and sink behave.
#[derive(Clone, Debug, Default)]
pub struct Script {
    pub frames: u64,
    pub frames_per_second: f64,
    pub duration: Duration,
    pub has_video: bool,
    pub has_audio: bool,
    pub frame_delay: Duration,
    pub fail_open_source: bool,
    pub fail_open_sink: bool,
    pub fail_decode_at: Option<u64>,
    pub fail_encode_at: Option<u64>,
    pub fail_release_sink: bool,
    pub fail_release_source: bool,
    /// Cancel this token right after frame K was pushed.
    pub cancel_after: Option<(u64, CancellationToken)>,
}

impl Script {
    /// `clip.mov`: 250 frames at 25 fps, 10 s, video and audio.
    pub fn clip() -> Self {
        Self {
            frames: 250,
            frames_per_second: 25.0,
            duration: Duration::from_secs(10),
            has_video: true,
            has_audio: true,
            ..Self::default()
        }
    }

    fn metadata(&self) -> StreamMetadata {
        StreamMetadata {
            duration: self.duration,
            format: "fake".to_string(),
            video: self.has_video.then(|| VideoMetadata {
                width: 1280,
                height: 720,
                frames_per_second: self.frames_per_second,
                codec: "h264".to_string(),
            }),
            audio: self.has_audio.then(|| AudioMetadata {
                sample_rate: 48_000,
                channels: 2,
                codec: "aac".to_string(),
            }),
        }
    }

    fn timestamp(&self, index: u64) -> Duration {
        Duration::from_secs_f64(index as f64 / self.frames_per_second)
    }
}

/// Shared record of everything the engine saw.
#[derive(Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
    parameters: Arc<Mutex<Option<EncodingParameters>>>,
    threads: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|recorded| *recorded == call).count()
    }

    pub fn pushes(&self) -> Vec<Duration> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Push(timestamp) => Some(timestamp),
                _ => None,
            })
            .collect()
    }

    pub fn parameters(&self) -> Option<EncodingParameters> {
        self.parameters.lock().unwrap().clone()
    }

    pub fn threads(&self) -> Vec<String> {
        self.threads.lock().unwrap().clone()
    }

    /// Position of the first occurrence of `call`.
    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|recorded| recorded == call)
    }
}

pub struct FakeFrame {
    index: u64,
    timestamp: Duration,
}

impl Frame for FakeFrame {
    fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

#[derive(Clone)]
pub struct FakeEngine {
    pub script: Script,
    pub journal: Journal,
}

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            journal: Journal::default(),
        }
    }
}

pub struct FakeSource {
    script: Script,
    journal: Journal,
    metadata: StreamMetadata,
    next: u64,
}

pub struct FakeSink {
    script: Script,
    journal: Journal,
    file: Option<File>,
}

impl Engine for FakeEngine {
    type Frame = FakeFrame;
    type Source = FakeSource;
    type Sink = FakeSink;

    fn open_source(&mut self, _path: &Path) -> Result<FakeSource, EngineError> {
        let name = thread::current().name().unwrap_or("unnamed").to_string();
        self.journal.threads.lock().unwrap().push(name);

        if self.script.fail_open_source {
            return Err(EngineError::other("no such file"));
        }
        self.journal.record(Call::OpenSource);
        Ok(FakeSource {
            script: self.script.clone(),
            journal: self.journal.clone(),
            metadata: self.script.metadata(),
            next: 0,
        })
    }

    fn open_sink(
        &mut self,
        path: &Path,
        parameters: &EncodingParameters,
    ) -> Result<FakeSink, EngineError> {
        *self.journal.parameters.lock().unwrap() = Some(parameters.clone());
        if self.script.fail_open_sink {
            return Err(EngineError::Unsupported("muxer unavailable".to_string()));
        }
        let file = File::create(path)?;
        self.journal.record(Call::OpenSink);
        Ok(FakeSink {
            script: self.script.clone(),
            journal: self.journal.clone(),
            file: Some(file),
        })
    }
}

impl Source for FakeSource {
    type Frame = FakeFrame;

    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<FakeFrame>, EngineError> {
        let index = self.next;
        if self.script.fail_decode_at == Some(index) {
            return Err(EngineError::other("corrupt packet"));
        }
        if index >= self.script.frames {
            return Ok(None);
        }
        self.next += 1;
        if !self.script.frame_delay.is_zero() {
            thread::sleep(self.script.frame_delay);
        }
        Ok(Some(FakeFrame {
            index,
            timestamp: self.script.timestamp(index),
        }))
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.journal.record(Call::ReleaseSource);
        if self.script.fail_release_source {
            return Err(EngineError::other("close failed"));
        }
        Ok(())
    }
}

impl Sink for FakeSink {
    type Frame = FakeFrame;

    fn push(&mut self, frame: FakeFrame) -> Result<(), EngineError> {
        self.journal.record(Call::Push(frame.timestamp));
        if self.script.fail_encode_at == Some(frame.index) {
            return Err(EngineError::other("encoder rejected frame"));
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(&[0])?;
        }
        if let Some((index, token)) = &self.script.cancel_after
            && *index == frame.index
        {
            token.cancel();
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.journal.record(Call::ReleaseSink);
        self.file = None;
        if self.script.fail_release_sink {
            return Err(EngineError::other("trailer write failed"));
        }
        Ok(())
    }
}

/// Collects every progress sample.
#[derive(Default)]
pub struct RecordingProgress {
    samples: Mutex<Vec<ProgressSample>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, sample: &ProgressSample) {
        self.samples.lock().unwrap().push(sample.clone());
    }
}

impl RecordingProgress {
    pub fn samples(&self) -> Vec<ProgressSample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn ratios(&self) -> Vec<f64> {
        self.samples().iter().map(|sample| sample.ratio).collect()
    }
}

/// `true` if every value is strictly greater than the one before.
pub fn strictly_increasing(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[1] > pair[0])
}
