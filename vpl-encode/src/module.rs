use std::{
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{self, Receiver, Sender};

use crate::{
    config::EncoderConfig,
    device::Device,
    driver::{EncodeDriver, EncodeStats, Sink},
    encode_loop::{self, LoopPolicy},
    frame::Frame,
    metrics,
    queue::FrameQueue,
    session::{EncodeSession, SessionState},
    Error, Result,
};

type Exit = Result<EncodeStats>;

/// Push frames in, get an elementary stream out.
///
/// The encode thread is started by the first [`EncodeModule::push`] and
/// owns the encoder from then on. Dropping the module stops the thread
/// after all pushed frames have been encoded.
pub struct EncodeModule<D: Device + 'static> {
    /// Until the encode thread takes it.
    driver: Option<EncodeDriver<D>>,
    queue: Arc<FrameQueue>,
    session: Arc<EncodeSession>,
    policy: LoopPolicy,
    width: u32,
    height: u32,

    thread: Option<JoinHandle<()>>,
    exit_tx: Option<Sender<Exit>>,
    exit_rx: Receiver<Exit>,
    exit: Option<Exit>,
}

impl<D: Device + 'static> EncodeModule<D> {
    /// Encode `width` x `height` frames with the default configuration into a new file at `path`.
    pub fn create(device: D, path: impl AsRef<Path>, width: u32, height: u32) -> Result<Self> {
        Self::with_config(device, EncoderConfig::new(width, height), path)
    }

    pub fn with_config(device: D, config: EncoderConfig, path: impl AsRef<Path>) -> Result<Self> {
        let driver = EncodeDriver::open(device, &config, path)?;
        Ok(Self::from_driver(driver, &config))
    }

    pub fn with_sink(device: D, config: EncoderConfig, sink: Sink) -> Result<Self> {
        let driver = EncodeDriver::with_sink(device, &config, sink)?;
        Ok(Self::from_driver(driver, &config))
    }

    fn from_driver(driver: EncodeDriver<D>, config: &EncoderConfig) -> Self {
        let (exit_tx, exit_rx) = channel::bounded(1);
        let info = driver.frame_info();
        let (width, height) = (info.crop_w, info.crop_h);

        Self {
            driver: Some(driver),
            queue: Arc::new(FrameQueue::new()),
            session: Arc::new(EncodeSession::new()),
            policy: LoopPolicy::from(config),
            width,
            height,

            thread: None,
            exit_tx: Some(exit_tx),
            exit_rx,
            exit: None,
        }
    }

    /// Queue a frame for encoding.
    ///
    /// Frames that do not match the configured size, or arrive after a stop
    /// was requested, are dropped and `false` is returned.
    pub fn push(&mut self, frame: Frame) -> bool {
        let metrics = metrics::get_metrics();

        let state = self.session.state();
        if matches!(state, SessionState::Draining | SessionState::Stopped) {
            tracing::warn!(?state, "Encoder is stopping, frame dropped");
            metrics.dropped_frames.inc();
            return false;
        }

        if (frame.width(), frame.height()) != (self.width, self.height) {
            tracing::warn!(
                width = frame.width(),
                height = frame.height(),
                expected_width = self.width,
                expected_height = self.height,
                "Frame size mismatch, frame dropped"
            );
            metrics.dropped_frames.inc();
            return false;
        }

        let depth = self.queue.push(frame.into_bgra());
        metrics.frame_queue_depth.set(depth as i64);
        if depth == self.policy.queue_warn_len {
            tracing::warn!(depth, "Encoder is falling behind");
        }

        if self.session.try_start() {
            self.spawn();
        }
        true
    }

    fn spawn(&mut self) {
        let (Some(driver), Some(exit_tx)) = (self.driver.take(), self.exit_tx.take()) else {
            return;
        };
        let queue = self.queue.clone();
        let session = self.session.clone();
        let policy = self.policy.clone();

        let spawned = thread::Builder::new()
            .name("vpl-encode".to_string())
            .spawn(move || {
                let exit = ExitGuard(session);
                // Dropped before `exit`, the encoder is closed by the time the session stops.
                let mut driver = driver;
                tracing::info!("Encode loop started");
                let result = encode_loop::run(&mut driver, &queue, &exit.0, &policy);
                let closed = driver.close();
                let result = result.and_then(|stats| closed.map(|_| stats));

                match &result {
                    Ok(stats) => tracing::info!(?stats, "Encode loop finished"),
                    Err(e) => tracing::error!(?e, "Encode loop failed"),
                }
                exit_tx.send(result).ok();
            });

        match spawned {
            Ok(handle) => self.thread = Some(handle),
            Err(e) => {
                tracing::error!(?e, "Failed to spawn encode thread");
                self.exit = Some(Err(Error::Io(e)));
                self.session.on_loop_exit();
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// The result of the encode thread, once it has exited.
    pub fn poll_exit(&mut self) -> Option<&Result<EncodeStats>> {
        if self.exit.is_none() {
            self.exit = self.exit_rx.try_recv().ok();
        }
        self.exit.as_ref()
    }

    /// Ask the encode thread to finish the frames already pushed and exit.
    pub fn request_stop(&self) -> SessionState {
        let state = self.session.request_stop();
        self.queue.interrupt();
        state
    }

    /// Wait for the encode thread to exit. Returns `false` on timeout.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.session.wait_stopped(timeout)
    }

    fn shutdown(&mut self) {
        self.request_stop();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("Encode thread panicked");
            }
        }

        // Never started, the encoder is still ours to close.
        if let Some(mut driver) = self.driver.take() {
            let result = driver.close().map(|_| driver.stats().clone());
            if self.exit.is_none() {
                self.exit = Some(result);
            }
        }
    }

    /// Stop, wait for all pushed frames to be written and close the output.
    pub fn finish(mut self) -> Result<EncodeStats> {
        self.shutdown();
        if self.exit.is_none() {
            self.exit = self.exit_rx.try_recv().ok();
        }
        self.exit.take().unwrap_or(Err(Error::EncodeThreadPanicked))
    }
}

/// Moves the session to `Stopped` when the encode thread ends, even by panic.
struct ExitGuard(Arc<EncodeSession>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.on_loop_exit();
    }
}

impl<D: Device + 'static> Drop for EncodeModule<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use super::*;
    use crate::{
        device::stub::StubDevice,
        frame::PixelLayout,
        status::Status,
        testutil::MemorySink,
    };

    fn frame(width: u32, height: u32, tag: u8) -> Frame {
        Frame::packed(
            width,
            height,
            PixelLayout::Bgr8,
            vec![tag; (width * height * 3) as usize],
        )
        .unwrap()
    }

    fn module(device: StubDevice, config: EncoderConfig) -> (EncodeModule<StubDevice>, MemorySink) {
        let sink = MemorySink::default();
        let module = EncodeModule::with_sink(device, config, Box::new(sink.clone())).unwrap();
        (module, sink)
    }

    #[test]
    fn stop_right_after_first_push() {
        let device = StubDevice::new().with_latency(1).with_payload_size(16);
        let probe = device.probe();
        let (mut module, sink) = module(device, EncoderConfig::new(64, 48));
        assert_eq!(module.state(), SessionState::Idle);

        assert!(module.push(frame(64, 48, 7)));
        module.request_stop();
        assert!(module.wait_stopped(Duration::from_secs(5)));
        assert_eq!(module.state(), SessionState::Stopped);

        let stats = module.finish().unwrap();
        assert_eq!(stats.frames_submitted, 1);
        assert_eq!(stats.packets_written, 1);
        assert_eq!(sink.contents().len(), 16);
        assert_eq!(sink.contents()[8..12], [7, 7, 7, 255]);
        assert!(probe.closed());
    }

    #[test]
    fn frames_are_written_in_push_order() {
        let device = StubDevice::new().with_latency(2).with_payload_size(12);
        let (mut module, sink) = module(device, EncoderConfig::new(32, 32));

        for tag in 0..20 {
            assert!(module.push(frame(32, 32, tag)));
        }
        let stats = module.finish().unwrap();
        assert_eq!(stats.packets_written, 20);

        let heads: Vec<u8> = sink.contents().chunks(12).map(|p| p[8]).collect();
        assert_eq!(heads, (0..20).collect::<Vec<u8>>());
    }

    #[test]
    fn mismatched_frames_are_dropped() {
        let device = StubDevice::new();
        let probe = device.probe();
        let (mut module, _) = module(device, EncoderConfig::new(64, 64));

        assert!(!module.push(frame(32, 32, 0)));
        assert_eq!(module.state(), SessionState::Idle);
        assert_eq!(module.queued_frames(), 0);

        let stats = module.finish().unwrap();
        assert_eq!(stats, EncodeStats::default());
        assert_eq!(probe.submitted_count(), 0);
        assert!(probe.closed());
    }

    #[test]
    fn push_after_stop_is_rejected() {
        let (mut module, _) = module(StubDevice::new(), EncoderConfig::new(32, 32));
        assert!(module.push(frame(32, 32, 1)));
        module.request_stop();
        assert!(!module.push(frame(32, 32, 2)));
        assert!(module.wait_stopped(Duration::from_secs(5)));
        assert_eq!(module.finish().unwrap().frames_submitted, 1);
    }

    #[test]
    fn fatal_error_is_reported() {
        let device = StubDevice::new().with_encode_statuses([Status::GPU_HANG]);
        let probe = device.probe();
        let (mut module, _) = module(device, EncoderConfig::new(32, 32));
        module.push(frame(32, 32, 1));

        let start = Instant::now();
        while module.poll_exit().is_none() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(
            module.poll_exit(),
            Some(Err(Error::DeviceLost(Status::GPU_HANG)))
        ));
        assert!(module.wait_stopped(Duration::from_secs(5)));
        assert!(!module.push(frame(32, 32, 2)));
        assert!(module.finish().is_err());
        assert!(probe.closed());
    }

    #[test]
    fn panicking_encoder_stops_the_session() {
        let device = StubDevice::new().panicking_on_encode();
        let (mut module, _) = module(device, EncoderConfig::new(32, 32));

        assert!(module.push(frame(32, 32, 1)));
        assert!(module.wait_stopped(Duration::from_secs(5)));
        assert_eq!(module.state(), SessionState::Stopped);
        assert!(!module.push(frame(32, 32, 2)));
        assert!(matches!(module.finish(), Err(Error::EncodeThreadPanicked)));
    }

    #[test]
    fn stuck_surfaces_end_the_thread() {
        let device = StubDevice::new()
            .with_surfaces(1)
            .with_latency(0)
            .holding_surfaces();
        let config = EncoderConfig::new(32, 32).with_surface_wait_timeout(Duration::from_millis(20));
        let (mut module, sink) = module(device, config);

        module.push(frame(32, 32, 1));
        module.push(frame(32, 32, 2));
        assert!(module.wait_stopped(Duration::from_secs(5)));
        assert!(matches!(module.finish(), Err(Error::NoFreeSurface(_))));
        assert_eq!(sink.contents()[8], 1);
    }

    #[test]
    fn file_output() {
        let path = std::env::temp_dir().join(format!("vpl-encode-module-{}.hevc", std::process::id()));
        let device = StubDevice::new().with_payload_size(20);
        let mut module = EncodeModule::create(device, &path, 16, 16).unwrap();
        for tag in 0..3 {
            module.push(frame(16, 16, tag));
        }
        drop(module);

        let written = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(written.len(), 60);
    }

    #[test]
    fn unwritable_path_fails_construction() {
        let path = std::env::temp_dir()
            .join("vpl-encode-no-such-dir")
            .join("out.hevc");
        assert!(matches!(
            EncodeModule::create(StubDevice::new(), path, 16, 16),
            Err(Error::Io(_))
        ));
    }
}
