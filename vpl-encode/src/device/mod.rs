use std::time::Duration;

use crate::{
    bitstream::Bitstream,
    config::{FrameInfo, Implementation, ImplementationFilter, VideoParams},
    status::Status,
    surface::SurfaceRef,
};

#[cfg(any(test, feature = "stub"))]
pub mod stub;

/// Handle of an asynchronous encode operation.
///
/// The bitstream passed to [`Device::encode_frame_async`] is only defined
/// after [`Device::sync_operation`] returned for this handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncPoint(pub u64);

/// Surface requirements reported by [`Device::query_io_surf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    pub info: FrameInfo,
    pub num_frame_min: u16,
    pub num_frame_suggested: u16,
}

/// An encoder session of a oneVPL / Intel Media SDK style implementation.
///
/// Every call returns the raw SDK status, translation into [`crate::Error`]
/// happens in the driver. A device that needs an input surface for longer
/// than the call itself must keep a [`SurfaceRef::lease`] until it is done
/// with it.
pub trait Device: Send {
    /// Load an implementation matching `filter` and create a session on it.
    fn create_session(&mut self, filter: &ImplementationFilter) -> Status;

    /// The implementation the session runs on.
    fn implementation(&self) -> Implementation;

    /// Check `requested` and write the parameters the encoder would actually use to `finalized`.
    fn query(&mut self, requested: &VideoParams, finalized: &mut VideoParams) -> Status;

    fn init(&mut self, params: &VideoParams) -> Status;

    /// Parameters of the initialized encoder.
    fn video_params(&mut self, active: &mut VideoParams) -> Status;

    fn query_io_surf(&mut self, params: &VideoParams, request: &mut AllocRequest) -> Status;

    /// Submit a surface, or `None` to drain frames buffered inside the encoder.
    fn encode_frame_async(
        &mut self,
        surface: Option<SurfaceRef<'_>>,
        bitstream: &mut Bitstream,
        sync: &mut Option<SyncPoint>,
    ) -> Status;

    fn sync_operation(
        &mut self,
        sync: SyncPoint,
        bitstream: &mut Bitstream,
        timeout: Duration,
    ) -> Status;

    /// Close the encoder and the session. Surfaces may be freed once this returns.
    fn close(&mut self) -> Status;
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn create_session(&mut self, filter: &ImplementationFilter) -> Status {
        (**self).create_session(filter)
    }

    fn implementation(&self) -> Implementation {
        (**self).implementation()
    }

    fn query(&mut self, requested: &VideoParams, finalized: &mut VideoParams) -> Status {
        (**self).query(requested, finalized)
    }

    fn init(&mut self, params: &VideoParams) -> Status {
        (**self).init(params)
    }

    fn video_params(&mut self, active: &mut VideoParams) -> Status {
        (**self).video_params(active)
    }

    fn query_io_surf(&mut self, params: &VideoParams, request: &mut AllocRequest) -> Status {
        (**self).query_io_surf(params, request)
    }

    fn encode_frame_async(
        &mut self,
        surface: Option<SurfaceRef<'_>>,
        bitstream: &mut Bitstream,
        sync: &mut Option<SyncPoint>,
    ) -> Status {
        (**self).encode_frame_async(surface, bitstream, sync)
    }

    fn sync_operation(
        &mut self,
        sync: SyncPoint,
        bitstream: &mut Bitstream,
        timeout: Duration,
    ) -> Status {
        (**self).sync_operation(sync, bitstream, timeout)
    }

    fn close(&mut self) -> Status {
        (**self).close()
    }
}
