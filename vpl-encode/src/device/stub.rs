//! A scriptable software stand-in for the encoder SDK.
//!
//! The stub does not compress anything. Every output packet starts with an
//! Annex B start code followed by a little endian sequence number and the
//! first four bytes of the surface it was produced from.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use super::{AllocRequest, Device, SyncPoint};
use crate::{
    bitstream::Bitstream,
    config::{Implementation, ImplementationFilter, VideoParams},
    status::Status,
    surface::{SurfaceLease, SurfaceRef},
};

const HEADER_LEN: usize = 12;

#[derive(Debug, Default)]
struct ProbeState {
    submitted: Vec<[u8; 4]>,
    end_of_stream: usize,
    syncs: usize,
    close_calls: usize,
}

/// Shared view of what a [`StubDevice`] has been asked to do.
///
/// Stays usable after the device itself has been moved into an encoder.
#[derive(Debug, Clone, Default)]
pub struct StubProbe(Arc<Mutex<ProbeState>>);

impl StubProbe {
    fn with<R>(&self, f: impl FnOnce(&mut ProbeState) -> R) -> R {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// The first four bytes of every surface accepted for encoding, in submission order.
    pub fn submitted(&self) -> Vec<[u8; 4]> {
        self.with(|s| s.submitted.clone())
    }

    pub fn submitted_count(&self) -> usize {
        self.with(|s| s.submitted.len())
    }

    /// Number of end-of-stream submissions.
    pub fn end_of_stream_calls(&self) -> usize {
        self.with(|s| s.end_of_stream)
    }

    pub fn sync_calls(&self) -> usize {
        self.with(|s| s.syncs)
    }

    pub fn close_calls(&self) -> usize {
        self.with(|s| s.close_calls)
    }

    pub fn closed(&self) -> bool {
        self.close_calls() > 0
    }
}

struct Output {
    sync: SyncPoint,
    seq: u32,
    head: [u8; 4],
    lease: SurfaceLease,
}

pub struct StubDevice {
    implementation: Implementation,
    surfaces: u16,
    latency: usize,
    payload_size: usize,
    align_to: Option<u32>,
    query_status: Option<Status>,
    init_status: Option<Status>,
    encode_statuses: VecDeque<Status>,
    sync_statuses: VecDeque<Status>,
    hold_surfaces: bool,
    panic_on_encode: bool,

    session: bool,
    params: Option<VideoParams>,
    buffered: VecDeque<(SurfaceLease, [u8; 4])>,
    in_flight: Vec<Output>,
    held: Vec<SurfaceLease>,
    next_sync: u64,
    seq: u32,
    probe: StubProbe,
}

impl Default for StubDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl StubDevice {
    /// A software implementation suggesting 4 surfaces, buffering one frame
    /// and producing 64 byte packets.
    pub fn new() -> Self {
        Self {
            implementation: Implementation::Software,
            surfaces: 4,
            latency: 1,
            payload_size: 64,
            align_to: None,
            query_status: None,
            init_status: None,
            encode_statuses: VecDeque::new(),
            sync_statuses: VecDeque::new(),
            hold_surfaces: false,
            panic_on_encode: false,

            session: false,
            params: None,
            buffered: VecDeque::new(),
            in_flight: Vec::new(),
            held: Vec::new(),
            next_sync: 1,
            seq: 0,
            probe: StubProbe::default(),
        }
    }

    pub fn probe(&self) -> StubProbe {
        self.probe.clone()
    }

    pub fn with_implementation(mut self, implementation: Implementation) -> Self {
        self.implementation = implementation;
        self
    }

    /// Number of surfaces reported by `query_io_surf`.
    pub fn with_surfaces(mut self, surfaces: u16) -> Self {
        self.surfaces = surfaces;
        self
    }

    /// How many frames the encoder holds back before producing output.
    pub fn with_latency(mut self, frames: usize) -> Self {
        self.latency = frames;
        self
    }

    pub fn with_payload_size(mut self, bytes: usize) -> Self {
        self.payload_size = bytes.max(HEADER_LEN);
        self
    }

    /// Round the frame size up to a multiple of `alignment` during negotiation.
    pub fn with_alignment(mut self, alignment: u32) -> Self {
        self.align_to = Some(alignment);
        self
    }

    pub fn with_query_status(mut self, status: Status) -> Self {
        self.query_status = Some(status);
        self
    }

    pub fn with_init_status(mut self, status: Status) -> Self {
        self.init_status = Some(status);
        self
    }

    /// Statuses returned by the next `encode_frame_async` calls, one per call.
    /// [`Status::NONE`] entries let the call through.
    pub fn with_encode_statuses(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        self.encode_statuses.extend(statuses);
        self
    }

    pub fn with_sync_statuses(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        self.sync_statuses.extend(statuses);
        self
    }

    /// Never unlock surfaces once they have been submitted.
    pub fn holding_surfaces(mut self) -> Self {
        self.hold_surfaces = true;
        self
    }

    /// Panic inside `encode_frame_async`, like a crashing vendor runtime.
    pub fn panicking_on_encode(mut self) -> Self {
        self.panic_on_encode = true;
        self
    }

    fn adjust(&self, params: &mut VideoParams) -> bool {
        let Some(alignment) = self.align_to else {
            return false;
        };
        let info = &mut params.frame_info;
        let (width, height) = (
            (info.width + alignment - 1) / alignment * alignment,
            (info.height + alignment - 1) / alignment * alignment,
        );
        let changed = (width, height) != (info.width, info.height);
        info.width = width;
        info.height = height;
        changed
    }

    fn payload(&self, seq: u32, head: [u8; 4]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.payload_size);
        payload.extend_from_slice(&[0, 0, 0, 1]);
        payload.extend_from_slice(&seq.to_le_bytes());
        payload.extend_from_slice(&head);
        payload.resize(self.payload_size.max(HEADER_LEN), 0);
        payload
    }
}

impl Device for StubDevice {
    fn create_session(&mut self, filter: &ImplementationFilter) -> Status {
        if filter.implementation != self.implementation {
            return Status::UNSUPPORTED;
        }
        self.session = true;
        Status::NONE
    }

    fn implementation(&self) -> Implementation {
        self.implementation
    }

    fn query(&mut self, requested: &VideoParams, finalized: &mut VideoParams) -> Status {
        if !self.session {
            return Status::NOT_INITIALIZED;
        }
        if let Some(status) = self.query_status {
            return status;
        }
        let info = &requested.frame_info;
        if info.crop_w == 0
            || info.crop_h == 0
            || info.crop_w > info.width
            || info.crop_h > info.height
        {
            return Status::INVALID_VIDEO_PARAM;
        }

        *finalized = requested.clone();
        if self.adjust(finalized) {
            Status::WRN_INCOMPATIBLE_VIDEO_PARAM
        } else {
            Status::NONE
        }
    }

    fn init(&mut self, params: &VideoParams) -> Status {
        if !self.session {
            return Status::NOT_INITIALIZED;
        }
        if let Some(status) = self.init_status {
            return status;
        }

        let mut active = params.clone();
        self.adjust(&mut active);
        self.params = Some(active);
        Status::NONE
    }

    fn video_params(&mut self, active: &mut VideoParams) -> Status {
        match &self.params {
            Some(params) => {
                *active = params.clone();
                Status::NONE
            }
            None => Status::NOT_INITIALIZED,
        }
    }

    fn query_io_surf(&mut self, params: &VideoParams, request: &mut AllocRequest) -> Status {
        if !self.session {
            return Status::NOT_INITIALIZED;
        }
        request.info = params.frame_info;
        request.num_frame_min = self.surfaces;
        request.num_frame_suggested = self.surfaces;
        Status::NONE
    }

    fn encode_frame_async(
        &mut self,
        surface: Option<SurfaceRef<'_>>,
        _bitstream: &mut Bitstream,
        sync: &mut Option<SyncPoint>,
    ) -> Status {
        *sync = None;
        if self.params.is_none() {
            return Status::NOT_INITIALIZED;
        }
        if self.panic_on_encode {
            panic!("encoder runtime crashed");
        }
        if let Some(status) = self.encode_statuses.pop_front() {
            if status != Status::NONE {
                return status;
            }
        }

        match surface {
            Some(surface) => {
                let mut head = [0; 4];
                head.copy_from_slice(&surface.data()[..4]);
                self.probe.with(|s| s.submitted.push(head));
                self.buffered.push_back((surface.lease(), head));
                if self.buffered.len() <= self.latency {
                    return Status::MORE_DATA;
                }
            }
            None => self.probe.with(|s| s.end_of_stream += 1),
        }

        let Some((lease, head)) = self.buffered.pop_front() else {
            return Status::MORE_DATA;
        };

        let sync_point = SyncPoint(self.next_sync);
        self.next_sync += 1;
        self.in_flight.push(Output {
            sync: sync_point,
            seq: self.seq,
            head,
            lease,
        });
        self.seq += 1;

        *sync = Some(sync_point);
        Status::NONE
    }

    fn sync_operation(
        &mut self,
        sync: SyncPoint,
        bitstream: &mut Bitstream,
        _timeout: Duration,
    ) -> Status {
        self.probe.with(|s| s.syncs += 1);
        if let Some(status) = self.sync_statuses.pop_front() {
            if status != Status::NONE {
                return status;
            }
        }

        let Some(pos) = self.in_flight.iter().position(|o| o.sync == sync) else {
            return Status::NOT_FOUND;
        };
        let output = self.in_flight.remove(pos);

        let status = match bitstream.append(&self.payload(output.seq, output.head)) {
            Ok(()) => Status::NONE,
            Err(_) => Status::NOT_ENOUGH_BUFFER,
        };
        if self.hold_surfaces {
            self.held.push(output.lease);
        }
        status
    }

    fn close(&mut self) -> Status {
        self.probe.with(|s| s.close_calls += 1);
        self.buffered.clear();
        self.in_flight.clear();
        self.held.clear();
        self.params = None;
        self.session = false;
        Status::NONE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::EncoderConfig, surface::SurfacePool};

    fn ready(device: &mut StubDevice, config: &EncoderConfig) -> SurfacePool {
        let params = config.video_params().unwrap();
        assert_eq!(device.create_session(&config.implementation_filter()), Status::NONE);
        assert_eq!(device.init(&params), Status::NONE);
        SurfacePool::allocate(params.frame_info, 4).unwrap()
    }

    #[test]
    fn rejects_empty_frames() {
        let mut device = StubDevice::new();
        let config = EncoderConfig::new(0, 64);
        device.create_session(&config.implementation_filter());
        let params = config.video_params().unwrap();
        let mut finalized = params.clone();
        assert_eq!(
            device.query(&params, &mut finalized),
            Status::INVALID_VIDEO_PARAM
        );
    }

    #[test]
    fn hardware_is_not_available() {
        let mut device = StubDevice::new();
        let config = EncoderConfig::new(64, 64).with_implementation(Implementation::Hardware);
        assert_eq!(
            device.create_session(&config.implementation_filter()),
            Status::UNSUPPORTED
        );
    }

    #[test]
    fn outputs_after_latency() {
        let config = EncoderConfig::new(64, 64);
        let mut device = StubDevice::new().with_latency(1).with_payload_size(16);
        let mut pool = ready(&mut device, &config);
        let mut bs = Bitstream::with_capacity(64).unwrap();
        let mut sync = None;

        pool.surface_mut(0).unwrap().data_mut()[..4].copy_from_slice(b"frm0");
        pool.surface_mut(1).unwrap().data_mut()[..4].copy_from_slice(b"frm1");

        let status = device.encode_frame_async(pool.surface(0), &mut bs, &mut sync);
        assert_eq!(status, Status::MORE_DATA);
        assert!(sync.is_none());
        assert!(pool.surface(0).unwrap().is_locked());

        let status = device.encode_frame_async(pool.surface(1), &mut bs, &mut sync);
        assert_eq!(status, Status::NONE);
        let sync = sync.unwrap();
        assert!(bs.is_empty());

        let status = device.sync_operation(sync, &mut bs, Duration::from_secs(1));
        assert_eq!(status, Status::NONE);
        assert_eq!(bs.data_length(), 16);
        assert_eq!(&bs.payload()[..12], b"\0\0\0\x01\0\0\0\0frm0");
        assert!(!pool.surface(0).unwrap().is_locked());
        assert!(pool.surface(1).unwrap().is_locked());

        let mut sync = None;
        assert_eq!(
            device.encode_frame_async(None, &mut bs, &mut sync),
            Status::NONE
        );
        assert_eq!(
            device.encode_frame_async(None, &mut bs, &mut None),
            Status::MORE_DATA
        );
        assert_eq!(device.probe().end_of_stream_calls(), 2);
        assert_eq!(device.probe().submitted(), vec![*b"frm0", *b"frm1"]);
    }

    #[test]
    fn small_bitstream_is_reported() {
        let config = EncoderConfig::new(64, 64);
        let mut device = StubDevice::new().with_latency(0).with_payload_size(128);
        let pool = ready(&mut device, &config);
        let mut bs = Bitstream::with_capacity(64).unwrap();
        let mut sync = None;

        assert_eq!(
            device.encode_frame_async(pool.surface(0), &mut bs, &mut sync),
            Status::NONE
        );
        assert_eq!(
            device.sync_operation(sync.unwrap(), &mut bs, Duration::from_secs(1)),
            Status::NOT_ENOUGH_BUFFER
        );
        assert!(bs.is_empty());
        assert_eq!(pool.locked_count(), 0);
    }

    #[test]
    fn close_releases_surfaces() {
        let config = EncoderConfig::new(64, 64);
        let mut device = StubDevice::new().with_latency(3);
        let pool = ready(&mut device, &config);
        let mut bs = Bitstream::with_capacity(64).unwrap();

        for i in 0..3 {
            device.encode_frame_async(pool.surface(i), &mut bs, &mut None);
        }
        assert_eq!(pool.locked_count(), 3);

        device.close();
        assert_eq!(pool.locked_count(), 0);
        assert!(device.probe().closed());
    }
}
