use std::fmt;

/// Raw status code returned by every [`Device`](crate::Device) entry point.
///
/// The numeric values are the ones used by the oneVPL / Intel Media SDK
/// `mfxStatus` enum, so a binding can pass them through unchanged.
/// Negative values are errors, positive values are warnings.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const NONE: Status = Status(0);
    pub const UNKNOWN: Status = Status(-1);
    pub const NULL_PTR: Status = Status(-2);
    pub const UNSUPPORTED: Status = Status(-3);
    pub const MEMORY_ALLOC: Status = Status(-4);
    pub const NOT_ENOUGH_BUFFER: Status = Status(-5);
    pub const INVALID_HANDLE: Status = Status(-6);
    pub const NOT_INITIALIZED: Status = Status(-8);
    pub const NOT_FOUND: Status = Status(-9);
    pub const MORE_DATA: Status = Status(-10);
    pub const ABORTED: Status = Status(-12);
    pub const DEVICE_LOST: Status = Status(-13);
    pub const INCOMPATIBLE_VIDEO_PARAM: Status = Status(-14);
    pub const INVALID_VIDEO_PARAM: Status = Status(-15);
    pub const DEVICE_FAILED: Status = Status(-17);
    pub const GPU_HANG: Status = Status(-21);

    /// The asynchronous operation is still running, i.e. a sync wait timed out.
    pub const WRN_IN_EXECUTION: Status = Status(1);
    /// The accelerator is busy, wait a few milliseconds and resubmit.
    pub const WRN_DEVICE_BUSY: Status = Status(2);
    pub const WRN_VIDEO_PARAM_CHANGED: Status = Status(3);
    pub const WRN_PARTIAL_ACCELERATION: Status = Status(4);
    /// Parameters were adjusted by the implementation.
    pub const WRN_INCOMPATIBLE_VIDEO_PARAM: Status = Status(5);

    pub fn is_error(self) -> bool {
        self.0 < 0
    }

    pub fn is_warning(self) -> bool {
        self.0 > 0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Status::NONE => "MFX_ERR_NONE",
            Status::UNKNOWN => "MFX_ERR_UNKNOWN",
            Status::NULL_PTR => "MFX_ERR_NULL_PTR",
            Status::UNSUPPORTED => "MFX_ERR_UNSUPPORTED",
            Status::MEMORY_ALLOC => "MFX_ERR_MEMORY_ALLOC",
            Status::NOT_ENOUGH_BUFFER => "MFX_ERR_NOT_ENOUGH_BUFFER",
            Status::INVALID_HANDLE => "MFX_ERR_INVALID_HANDLE",
            Status::NOT_INITIALIZED => "MFX_ERR_NOT_INITIALIZED",
            Status::NOT_FOUND => "MFX_ERR_NOT_FOUND",
            Status::MORE_DATA => "MFX_ERR_MORE_DATA",
            Status::ABORTED => "MFX_ERR_ABORTED",
            Status::DEVICE_LOST => "MFX_ERR_DEVICE_LOST",
            Status::INCOMPATIBLE_VIDEO_PARAM => "MFX_ERR_INCOMPATIBLE_VIDEO_PARAM",
            Status::INVALID_VIDEO_PARAM => "MFX_ERR_INVALID_VIDEO_PARAM",
            Status::DEVICE_FAILED => "MFX_ERR_DEVICE_FAILED",
            Status::GPU_HANG => "MFX_ERR_GPU_HANG",
            Status::WRN_IN_EXECUTION => "MFX_WRN_IN_EXECUTION",
            Status::WRN_DEVICE_BUSY => "MFX_WRN_DEVICE_BUSY",
            Status::WRN_VIDEO_PARAM_CHANGED => "MFX_WRN_VIDEO_PARAM_CHANGED",
            Status::WRN_PARTIAL_ACCELERATION => "MFX_WRN_PARTIAL_ACCELERATION",
            Status::WRN_INCOMPATIBLE_VIDEO_PARAM => "MFX_WRN_INCOMPATIBLE_VIDEO_PARAM",
            _ => return None,
        })
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "Status({})", self.0),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
