use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    time::{Duration, Instant},
};

use crate::{
    bitstream::Bitstream,
    config::{EncoderConfig, FrameInfo, VideoParams},
    device::{AllocRequest, Device},
    encode_loop::Backoff,
    error::check_error,
    loader, metrics,
    status::Status,
    surface::SurfacePool,
    Error, Result,
};

pub type Sink = Box<dyn Write + Send>;

const BUSY_BACKOFF_MIN: Duration = Duration::from_millis(1);
const BUSY_BACKOFF_MAX: Duration = Duration::from_millis(16);

/// What a single submission produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// A packet of `bytes` bytes was written to the sink.
    Written { bytes: usize },
    /// The encoder buffered the input and has nothing to output yet.
    NeedMoreData,
    /// The output did not fit into the bitstream buffer and was discarded.
    InsufficientBuffer,
    /// The device stayed busy, the same surface has to be submitted again.
    DeviceBusy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub frames_submitted: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub insufficient_buffer: u64,
    pub busy_retries: u64,
}

/// Owns the device, its input surfaces, the output bitstream and the sink.
pub struct EncodeDriver<D: Device> {
    device: D,
    params: VideoParams,
    pool: Option<SurfacePool>,
    bitstream: Option<Bitstream>,
    sink: Option<Sink>,

    sync_timeout: Duration,
    busy_retries: u32,
    max_drain_cycles: u32,

    /// Frames accepted by the encoder that did not come out yet.
    buffered: usize,
    stats: EncodeStats,
    closed: bool,
}

impl<D: Device> EncodeDriver<D> {
    /// Negotiate with `device` and write the encoded stream to a new file at `path`.
    pub fn open(device: D, config: &EncoderConfig, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::build(device, config, || {
            let file = File::create(path)?;
            tracing::info!(?path, "Output file created");
            Ok(Box::new(BufWriter::new(file)))
        })
    }

    pub fn with_sink(device: D, config: &EncoderConfig, sink: Sink) -> Result<Self> {
        Self::build(device, config, || Ok(sink))
    }

    fn build(
        mut device: D,
        config: &EncoderConfig,
        open_sink: impl FnOnce() -> std::io::Result<Sink>,
    ) -> Result<Self> {
        let status = device.create_session(&config.implementation_filter());
        if status.is_error() {
            return Err(Error::SessionCreation(status));
        }
        tracing::info!(
            implementation = ?device.implementation(),
            codec = ?config.codec.id(),
            "Encoder session created"
        );

        match Self::negotiate(&mut device, config, open_sink) {
            Ok((params, pool, bitstream, sink)) => Ok(Self {
                device,
                params,
                pool: Some(pool),
                bitstream: Some(bitstream),
                sink: Some(sink),

                sync_timeout: config.sync_timeout(),
                busy_retries: config.busy_retries,
                max_drain_cycles: config.max_drain_cycles,

                buffered: 0,
                stats: EncodeStats::default(),
                closed: false,
            }),
            Err(e) => {
                device.close();
                Err(e)
            }
        }
    }

    fn negotiate(
        device: &mut D,
        config: &EncoderConfig,
        open_sink: impl FnOnce() -> std::io::Result<Sink>,
    ) -> Result<(VideoParams, SurfacePool, Bitstream, Sink)> {
        let requested = config.video_params()?;
        let mut finalized = requested.clone();

        let status = device.query(&requested, &mut finalized);
        check_error("Query", status)?;
        if status.is_warning() {
            tracing::warn!(%status, "Encoder adjusted the requested parameters");
        }
        tracing::debug!(?finalized, "Query finished");

        let status = device.init(&finalized);
        check_error("Init", status)?;
        if status.is_warning() {
            tracing::warn!(%status, "Encoder initialized with warnings");
        }

        // Surfaces have to match the parameters the encoder actually runs with.
        let mut active = finalized.clone();
        check_error("GetVideoParam", device.video_params(&mut active))?;

        if !loader::supports(active.frame_info.fourcc) {
            return Err(Error::UnsupportedFormat(active.frame_info.fourcc));
        }

        let mut request = AllocRequest {
            info: active.frame_info,
            num_frame_min: 0,
            num_frame_suggested: 0,
        };
        check_error("QueryIOSurf", device.query_io_surf(&active, &mut request))?;
        tracing::debug!(
            min = request.num_frame_min,
            suggested = request.num_frame_suggested,
            "Surface requirements"
        );

        let count = request.num_frame_suggested.max(request.num_frame_min) as usize;
        let pool = SurfacePool::allocate(active.frame_info, count)?;
        let bitstream = Bitstream::with_capacity(config.bitstream_capacity)?;
        let sink = open_sink()?;

        tracing::info!(
            width = active.frame_info.width,
            height = active.frame_info.height,
            fourcc = ?active.frame_info.fourcc,
            surfaces = pool.len(),
            "Encoder initialized"
        );

        Ok((active, pool, bitstream, sink))
    }

    /// The parameters the encoder runs with.
    pub fn video_params(&self) -> &VideoParams {
        &self.params
    }

    pub fn frame_info(&self) -> &FrameInfo {
        &self.params.frame_info
    }

    pub fn pool(&self) -> Option<&SurfacePool> {
        self.pool.as_ref()
    }

    pub fn pool_mut(&mut self) -> Option<&mut SurfacePool> {
        self.pool.as_mut()
    }

    pub fn find_free_surface(&self) -> Option<usize> {
        self.pool.as_ref()?.find_free()
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffered
    }

    pub fn stats(&self) -> &EncodeStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Submit a loaded surface, or `None` to flush the encoder, and write
    /// any output produced to the sink.
    pub fn submit(&mut self, surface: Option<usize>) -> Result<EncodeOutcome> {
        let (Some(pool), Some(bitstream), Some(sink)) =
            (self.pool.as_ref(), self.bitstream.as_mut(), self.sink.as_mut())
        else {
            return Err(Error::Sdk {
                op: "EncodeFrameAsync",
                status: Status::NOT_INITIALIZED,
            });
        };

        let start = Instant::now();
        let mut backoff = Backoff::new(BUSY_BACKOFF_MIN, BUSY_BACKOFF_MAX);
        let mut retries = 0;
        let mut sync = None;
        let status = loop {
            let surface = match surface {
                Some(index) => Some(pool.surface(index).ok_or(Error::Sdk {
                    op: "EncodeFrameAsync",
                    status: Status::INVALID_HANDLE,
                })?),
                None => None,
            };

            let status = self.device.encode_frame_async(surface, bitstream, &mut sync);
            if status != Status::WRN_DEVICE_BUSY {
                break status;
            }
            // Give the device a moment even when no retries are left.
            backoff.snooze();
            if retries == self.busy_retries {
                tracing::debug!(retries, "Device still busy");
                return Ok(EncodeOutcome::DeviceBusy);
            }
            retries += 1;
            self.stats.busy_retries += 1;
        };

        match status {
            Status::MORE_DATA => {
                if surface.is_some() {
                    self.buffered += 1;
                    self.stats.frames_submitted += 1;
                }
                return Ok(EncodeOutcome::NeedMoreData);
            }
            Status::NOT_ENOUGH_BUFFER => {
                tracing::warn!(
                    capacity = bitstream.max_length(),
                    "Bitstream buffer too small, frame dropped"
                );
                bitstream.clear();
                self.stats.insufficient_buffer += 1;
                metrics::get_metrics().insufficient_buffer_events.inc();
                return Ok(EncodeOutcome::InsufficientBuffer);
            }
            status => check_error("EncodeFrameAsync", status)?,
        }

        if surface.is_some() {
            self.buffered += 1;
            self.stats.frames_submitted += 1;
        }

        let Some(sync) = sync else {
            return Ok(EncodeOutcome::NeedMoreData);
        };
        self.buffered = self.buffered.saturating_sub(1);

        let status = self.device.sync_operation(sync, bitstream, self.sync_timeout);
        match status {
            Status::WRN_IN_EXECUTION => return Err(Error::SyncTimeout(self.sync_timeout)),
            Status::NOT_ENOUGH_BUFFER => {
                tracing::warn!(
                    capacity = bitstream.max_length(),
                    "Encoded frame does not fit the bitstream buffer, dropped"
                );
                bitstream.clear();
                self.stats.insufficient_buffer += 1;
                metrics::get_metrics().insufficient_buffer_events.inc();
                return Ok(EncodeOutcome::InsufficientBuffer);
            }
            status => check_error("SyncOperation", status)?,
        }

        let bytes = bitstream.write_to(sink)?;
        self.stats.packets_written += 1;
        self.stats.bytes_written += bytes as u64;

        let metrics = metrics::get_metrics();
        metrics.encoded_frames.inc();
        metrics.bitstream_bytes.inc_by(bytes as u64);
        metrics
            .encoding_latency_ms
            .observe(start.elapsed().as_secs_f64() * 1000.0);
        tracing::trace!(bytes, latency = ?start.elapsed(), "Packet written");

        Ok(EncodeOutcome::Written { bytes })
    }

    /// Flush all frames still buffered inside the encoder to the sink.
    pub fn drain(&mut self) -> Result<()> {
        for _ in 0..self.max_drain_cycles {
            match self.submit(None)? {
                EncodeOutcome::NeedMoreData => {
                    self.buffered = 0;
                    return Ok(());
                }
                EncodeOutcome::Written { .. }
                | EncodeOutcome::InsufficientBuffer
                | EncodeOutcome::DeviceBusy => {}
            }
        }

        tracing::warn!(
            cycles = self.max_drain_cycles,
            buffered = self.buffered,
            "Encoder did not finish draining"
        );
        Ok(())
    }

    /// Flush the sink, close the device, then free surfaces and buffers.
    ///
    /// Calling this more than once is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let flushed = match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        };
        let status = self.device.close();

        self.pool = None;
        self.bitstream = None;
        self.sink = None;
        tracing::info!(stats = ?self.stats, "Encoder closed");

        flushed?;
        check_error("Close", status)
    }
}

impl<D: Device> Drop for EncodeDriver<D> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(?e, "Failed to close encoder");
        }
    }
}
