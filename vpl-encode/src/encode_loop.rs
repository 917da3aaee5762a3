use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    config::EncoderConfig,
    device::Device,
    driver::{EncodeDriver, EncodeOutcome, EncodeStats},
    loader, metrics,
    queue::FrameQueue,
    session::{EncodeSession, SessionState},
    Error, Result,
};

const SURFACE_BACKOFF_MIN: Duration = Duration::from_millis(1);
const SURFACE_BACKOFF_MAX: Duration = Duration::from_millis(16);

/// Sleeps for exponentially growing intervals, capped at `max`.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: min,
            min,
            max,
        }
    }

    pub fn snooze(&mut self) {
        thread::sleep(self.current);
        self.current = (self.current * 2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[derive(Debug, Clone)]
pub struct LoopPolicy {
    pub surface_wait_timeout: Duration,
    pub idle_wait: Duration,
    pub queue_warn_len: usize,
}

impl From<&EncoderConfig> for LoopPolicy {
    fn from(config: &EncoderConfig) -> Self {
        Self {
            surface_wait_timeout: config.surface_wait_timeout(),
            idle_wait: config.idle_wait(),
            queue_warn_len: config.queue_warn_len,
        }
    }
}

/// Wait until the device releases one of the surfaces.
fn acquire_surface<D: Device>(driver: &EncodeDriver<D>, timeout: Duration) -> Result<usize> {
    let start = Instant::now();
    let mut backoff = Backoff::new(SURFACE_BACKOFF_MIN, SURFACE_BACKOFF_MAX);
    loop {
        if let Some(index) = driver.find_free_surface() {
            return Ok(index);
        }
        if start.elapsed() >= timeout {
            return Err(Error::NoFreeSurface(timeout));
        }
        backoff.snooze();
    }
}

/// Encode frames from `queue` until the session is asked to stop, then
/// encode whatever is still queued and drain the encoder.
pub fn run<D: Device>(
    driver: &mut EncodeDriver<D>,
    queue: &FrameQueue,
    session: &EncodeSession,
    policy: &LoopPolicy,
) -> Result<EncodeStats> {
    let metrics = metrics::get_metrics();
    // Loaded surface the device was too busy to take.
    let mut pending = None;

    loop {
        if let Some(index) = pending.take() {
            if driver.submit(Some(index))? == EncodeOutcome::DeviceBusy {
                pending = Some(index);
            }
            continue;
        }

        let stopping = session.state() != SessionState::Running;
        let frame = if stopping {
            queue.pop()
        } else {
            queue.pop_timeout(policy.idle_wait)
        };
        metrics.frame_queue_depth.set(queue.len() as i64);

        let Some(frame) = frame else {
            if stopping {
                break;
            }
            // No new frame, let the encoder flush what it holds.
            if driver.buffered_frames() > 0 {
                driver.submit(None)?;
            }
            continue;
        };

        let index = acquire_surface(driver, policy.surface_wait_timeout)?;
        {
            let mut surface = driver
                .pool_mut()
                .and_then(|pool| pool.surface_mut(index))
                .ok_or(Error::NoFreeSurface(policy.surface_wait_timeout))?;
            loader::load(&frame, &mut surface)?;
        }

        match driver.submit(Some(index))? {
            EncodeOutcome::DeviceBusy => pending = Some(index),
            outcome => tracing::trace!(?outcome, index, "Frame submitted"),
        }
    }

    tracing::debug!(buffered = driver.buffered_frames(), "Draining encoder");
    driver.drain()?;
    Ok(driver.stats().clone())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        device::stub::StubDevice,
        format::FourCc,
        frame::{Frame, PixelLayout},
        status::Status,
        testutil::MemorySink,
    };

    fn frame(tag: u8) -> Frame {
        Frame::packed(64, 64, PixelLayout::Bgra8, vec![tag; 64 * 64 * 4]).unwrap()
    }

    fn setup(
        device: StubDevice,
        config: &EncoderConfig,
    ) -> (EncodeDriver<StubDevice>, MemorySink, LoopPolicy) {
        let sink = MemorySink::default();
        let driver = EncodeDriver::with_sink(device, config, Box::new(sink.clone())).unwrap();
        (driver, sink, LoopPolicy::from(config))
    }

    #[test]
    fn backoff_grows_to_max() {
        let mut backoff = Backoff::new(Duration::from_micros(1), Duration::from_micros(4));
        backoff.snooze();
        backoff.snooze();
        backoff.snooze();
        assert_eq!(backoff.current, Duration::from_micros(4));
        backoff.reset();
        assert_eq!(backoff.current, Duration::from_micros(1));
    }

    #[test]
    fn encodes_queued_frames_after_stop() {
        let config = EncoderConfig::new(64, 64);
        let device = StubDevice::new().with_latency(2).with_payload_size(12);
        let probe = device.probe();
        let (mut driver, sink, policy) = setup(device, &config);

        let queue = FrameQueue::new();
        for tag in 1..=5 {
            queue.push(frame(tag));
        }
        let session = EncodeSession::new();
        session.try_start();
        session.request_stop();

        let stats = run(&mut driver, &queue, &session, &policy).unwrap();
        assert_eq!(stats.frames_submitted, 5);
        assert_eq!(stats.packets_written, 5);
        assert!(queue.is_empty());
        assert_eq!(driver.buffered_frames(), 0);

        let heads: Vec<u8> = sink.contents().chunks(12).map(|p| p[8]).collect();
        assert_eq!(heads, vec![1, 2, 3, 4, 5]);
        assert_eq!(probe.submitted_count(), 5);
    }

    #[test]
    fn idle_loop_flushes_buffered_frames() {
        let config = EncoderConfig::new(64, 64);
        let device = StubDevice::new().with_latency(1).with_payload_size(12);
        let (mut driver, sink, policy) = setup(device, &config);

        let queue = Arc::new(FrameQueue::new());
        let session = Arc::new(EncodeSession::new());
        session.try_start();
        queue.push(frame(9));

        let stopper = {
            let session = session.clone();
            let sink = sink.clone();
            thread::spawn(move || {
                // The frame only comes out once the idle loop flushes the encoder.
                let start = Instant::now();
                while sink.contents().is_empty() && start.elapsed() < Duration::from_secs(5) {
                    thread::sleep(Duration::from_millis(1));
                }
                session.request_stop();
            })
        };

        let stats = run(&mut driver, &queue, &session, &policy).unwrap();
        stopper.join().unwrap();
        assert_eq!(stats.packets_written, 1);
        assert_eq!(sink.contents()[8], 9);
    }

    #[test]
    fn stuck_surfaces_time_out() {
        let config = EncoderConfig::new(64, 64).with_surface_wait_timeout(Duration::from_millis(30));
        let device = StubDevice::new()
            .with_surfaces(2)
            .with_latency(0)
            .holding_surfaces();
        let (mut driver, _, policy) = setup(device, &config);

        let queue = FrameQueue::new();
        for tag in 0..3 {
            queue.push(frame(tag));
        }
        let session = EncodeSession::new();
        session.try_start();

        let start = Instant::now();
        let err = run(&mut driver, &queue, &session, &policy).unwrap_err();
        assert!(matches!(err, Error::NoFreeSurface(t) if t == Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(driver.stats().packets_written, 2);
    }

    #[test]
    fn busy_surface_is_resubmitted() {
        let config = EncoderConfig::new(64, 64).with_busy_retries(0);
        let device = StubDevice::new()
            .with_latency(0)
            .with_payload_size(12)
            .with_encode_statuses([Status::WRN_DEVICE_BUSY, Status::WRN_DEVICE_BUSY]);
        let probe = device.probe();
        let (mut driver, sink, policy) = setup(device, &config);

        let queue = FrameQueue::new();
        queue.push(frame(3));
        let session = EncodeSession::new();
        session.try_start();
        session.request_stop();

        let start = Instant::now();
        let stats = run(&mut driver, &queue, &session, &policy).unwrap();
        // Each busy answer costs at least one backoff step.
        assert!(start.elapsed() >= Duration::from_millis(2));
        assert_eq!(stats.packets_written, 1);
        assert_eq!(probe.submitted_count(), 1);
        assert_eq!(sink.contents()[8], 3);
    }

    #[test]
    fn odd_sized_nv12_frames_are_encoded() {
        let config = EncoderConfig::new(33, 32).with_fourcc(FourCc::NV12);
        let device = StubDevice::new().with_latency(0).with_payload_size(12);
        let (mut driver, sink, policy) = setup(device, &config);

        let queue = FrameQueue::new();
        queue.push(Frame::packed(33, 32, PixelLayout::Bgra8, vec![0; 33 * 32 * 4]).unwrap());
        let session = EncodeSession::new();
        session.try_start();
        session.request_stop();

        let stats = run(&mut driver, &queue, &session, &policy).unwrap();
        assert_eq!(stats.packets_written, 1);
        assert_eq!(sink.contents().len(), 12);
    }

    #[test]
    fn device_lost_stops_the_loop() {
        let config = EncoderConfig::new(64, 64);
        let device = StubDevice::new().with_encode_statuses([Status::DEVICE_LOST]);
        let (mut driver, _, policy) = setup(device, &config);

        let queue = FrameQueue::new();
        queue.push(frame(1));
        queue.push(frame(2));
        let session = EncodeSession::new();
        session.try_start();

        let err = run(&mut driver, &queue, &session, &policy).unwrap_err();
        assert!(matches!(err, Error::DeviceLost(Status::DEVICE_LOST)));
        assert_eq!(queue.len(), 1);
    }
}
