use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_format::AudioFormat;
use crate::models::error::CaptureError;
use crate::processing::ring_buffer::FrameRingBuffer;

use super::state_machine::{
    AudioError, AudioState, AudioStateListener, AudioStateMachine, RunningState,
};

/// Pull-model audio sink driven by its own worker thread.
///
/// ```text
/// write() → [FrameRingBuffer] → worker (one period per tick) → output callback
/// ```
///
/// The sink is `Idle` until data arrives, `Active` while it has data, and
/// drops back to `Idle` with `UnderrunError` when the buffer runs dry.
/// A draining stop flushes the buffer before `stop` returns. A failing
/// output callback stops the sink with `IoError`.
pub struct BufferedAudioSink {
    machine: Arc<AudioStateMachine>,
    buffer: Arc<Mutex<FrameRingBuffer>>,
    running: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    period: Duration,
    period_frames: usize,
}

impl BufferedAudioSink {
    /// Creates a sink for `format` that pulls one `period` per tick and
    /// buffers up to `buffer_duration` of audio.
    pub fn new(format: AudioFormat, period: Duration, buffer_duration: Duration) -> Self {
        Self::with_machine(format, period, buffer_duration, AudioStateMachine::new())
    }

    pub fn with_listener<L: AudioStateListener + 'static>(
        format: AudioFormat,
        period: Duration,
        buffer_duration: Duration,
        listener: &Arc<L>,
    ) -> Self {
        Self::with_machine(
            format,
            period,
            buffer_duration,
            AudioStateMachine::with_listener(listener),
        )
    }

    fn with_machine(
        format: AudioFormat,
        period: Duration,
        buffer_duration: Duration,
        machine: AudioStateMachine,
    ) -> Self {
        let rate = f64::from(format.sample_rate.max(1));
        let channels = usize::from(format.channel_count.max(1));
        let period_frames = ((rate * period.as_secs_f64()) as usize).max(1);
        let capacity = ((rate * buffer_duration.as_secs_f64()) as usize).max(period_frames);
        Self {
            machine: Arc::new(machine),
            buffer: Arc::new(Mutex::new(FrameRingBuffer::new(capacity, channels))),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            period,
            period_frames,
        }
    }

    pub fn state(&self) -> AudioState {
        self.machine.state()
    }

    pub fn error(&self) -> AudioError {
        self.machine.error()
    }

    pub fn state_machine(&self) -> &AudioStateMachine {
        &self.machine
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.lock().available_frames()
    }

    /// Starts pulling into `output`. The sink starts idle.
    pub fn start<F>(&mut self, output: F) -> Result<(), CaptureError>
    where
        F: FnMut(&[f32]) -> Result<(), CaptureError> + Send + 'static,
    {
        let notifier = self
            .machine
            .start(RunningState::Idle)
            .ok_or_else(|| CaptureError::NotReady("audio sink is not stopped".into()))?;

        self.running.store(true, Ordering::SeqCst);
        let worker = SinkWorker {
            machine: Arc::clone(&self.machine),
            buffer: Arc::clone(&self.buffer),
            running: Arc::clone(&self.running),
            period: self.period,
            period_frames: self.period_frames,
        };
        let spawned = thread::Builder::new()
            .name("audio-sink".into())
            .spawn(move || worker.run(output));
        drop(notifier);

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.machine.stop_or_update_error(AudioError::OpenError);
                Err(CaptureError::Resource(format!(
                    "failed to spawn audio sink thread: {}",
                    e
                )))
            }
        }
    }

    /// Queues interleaved samples. Returns the number of frames accepted.
    pub fn write(&self, samples: &[f32]) -> usize {
        if self.machine.state() == AudioState::Stopped {
            return 0;
        }
        let mut buffer = self.buffer.lock();
        let frames = samples.len() / buffer.channels();
        let dropped = buffer.write(samples);
        drop(buffer);
        if dropped > 0 {
            log::warn!("audio sink overflow, dropped {} frames", dropped);
        }
        if frames > 0 {
            self.wake();
        }
        frames
    }

    /// Moves an idle sink to active so buffered data counts for draining.
    fn wake(&self) {
        if self.machine.state() == AudioState::Idle {
            drop(
                self.machine
                    .update_active_or_idle(RunningState::Active, AudioError::NoError),
            );
        }
    }

    pub fn suspend(&self) -> bool {
        self.machine.suspend().is_some()
    }

    pub fn resume(&self) -> bool {
        self.machine.resume().is_some()
    }

    /// Stops the sink.
    ///
    /// With `drain`, blocks up to `timeout` while the worker flushes the
    /// buffered audio. Returns false if the flush did not finish in time.
    pub fn stop(&mut self, drain: bool, timeout: Duration) -> bool {
        // The worker may have gone idle between a write and this call.
        if drain && self.buffered_frames() > 0 {
            self.wake();
        }
        let draining = match self.machine.stop(AudioError::NoError, drain) {
            Some(notifier) => notifier.is_draining(),
            None => false,
        };

        let drained = !draining || self.machine.wait_for_drained(timeout);
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if !drained {
            log::warn!("audio sink drain timed out after {:?}", timeout);
            self.machine.on_drained();
        }
        self.buffer.lock().clear();
        drained
    }
}

impl Drop for BufferedAudioSink {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop(false, Duration::ZERO);
        }
    }
}

struct SinkWorker {
    machine: Arc<AudioStateMachine>,
    buffer: Arc<Mutex<FrameRingBuffer>>,
    running: Arc<AtomicBool>,
    period: Duration,
    period_frames: usize,
}

impl SinkWorker {
    fn run<F>(self, mut output: F)
    where
        F: FnMut(&[f32]) -> Result<(), CaptureError>,
    {
        let channels = self.buffer.lock().channels();
        let mut period = vec![0.0f32; self.period_frames * channels];

        while self.running.load(Ordering::SeqCst) {
            thread::sleep(self.period);

            match self.machine.state() {
                AudioState::Suspended => continue,
                AudioState::Stopped => {
                    if self.machine.is_draining() {
                        if let Err(e) = self.flush(&mut period, &mut output) {
                            log::error!("audio sink drain failed: {}", e);
                            self.machine.stop_or_update_error(AudioError::IoError);
                        }
                        self.machine.on_drained();
                    }
                    break;
                }
                state @ (AudioState::Active | AudioState::Idle) => {
                    let frames = self.buffer.lock().read_into(&mut period);
                    if frames > 0 {
                        if let Err(e) = output(&period[..frames * channels]) {
                            log::error!("audio sink output failed: {}", e);
                            self.machine.stop_or_update_error(AudioError::IoError);
                            break;
                        }
                        if state == AudioState::Idle {
                            drop(self.machine.update_active_or_idle(
                                RunningState::Active,
                                AudioError::NoError,
                            ));
                        }
                    } else if state == AudioState::Active {
                        drop(self.machine.update_active_or_idle(
                            RunningState::Idle,
                            AudioError::UnderrunError,
                        ));
                    }
                }
            }
        }
    }

    fn flush<F>(&self, period: &mut [f32], output: &mut F) -> Result<(), CaptureError>
    where
        F: FnMut(&[f32]) -> Result<(), CaptureError>,
    {
        let channels = self.buffer.lock().channels();
        loop {
            let frames = self.buffer.lock().read_into(period);
            if frames == 0 {
                return Ok(());
            }
            output(&period[..frames * channels])?;
        }
    }
}
