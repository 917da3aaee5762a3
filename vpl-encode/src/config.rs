use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    format::{align16, align32, ChromaFormat, FourCc},
    Error, Result,
};

/// Everything the encode module needs to know up front.
///
/// The configuration is consumed at construction, nothing here can be
/// changed while the module is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Width of the input frames in pixels.
    pub width: u32,
    /// Height of the input frames in pixels.
    pub height: u32,
    pub codec: Codec,
    /// Specified as `(numerator, denominator)`.
    pub framerate: (u32, u32),
    /// The pixel format of the encoder input surfaces.
    pub fourcc: FourCc,
    pub target_usage: TargetUsage,
    pub rate_control: RateControlMethod,
    pub gop: GopStructure,
    pub buffer_size_kb: u16,
    pub initial_delay_kb: u16,
    pub async_depth: u16,
    pub implementation: Implementation,

    /// Capacity of the single output bitstream buffer.
    pub bitstream_capacity: usize,
    pub sync_timeout_ms: u64,
    /// How long the encode loop waits for a free input surface before giving up.
    pub surface_wait_timeout_ms: u64,
    /// How long an idle encode loop waits for a new frame per cycle.
    pub idle_wait_ms: u64,
    /// Resubmissions after `MFX_WRN_DEVICE_BUSY` before the cycle is skipped.
    pub busy_retries: u32,
    pub max_drain_cycles: u32,
    /// A warning is logged when this many frames are waiting to be encoded.
    pub queue_warn_len: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            codec: Codec::Hevc {
                profile: Some(HevcProfile::Main),
                level: Some(HEVC_LEVEL_4),
            },
            framerate: (10, 1),
            fourcc: FourCc::RGB4,
            target_usage: TargetUsage::Balanced,
            rate_control: RateControlMethod::VariableBitrate {
                target_kbps: 4000,
                max_kbps: 0,
            },
            gop: GopStructure::default(),
            buffer_size_kb: 20000,
            initial_delay_kb: 5,
            async_depth: 3,
            implementation: Implementation::Software,

            bitstream_capacity: 2_000_000,
            sync_timeout_ms: 100 * 1000,
            surface_wait_timeout_ms: 10 * 1000,
            idle_wait_ms: 5,
            busy_retries: 8,
            max_drain_cycles: 64,
            queue_warn_len: 64,
        }
    }
}

impl EncoderConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Parse a configuration, fields that are left out keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.video_params()?;
        Ok(config)
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_fourcc(mut self, fourcc: FourCc) -> Self {
        self.fourcc = fourcc;
        self
    }

    pub fn with_rate_control(mut self, rate_control: RateControlMethod) -> Self {
        self.rate_control = rate_control;
        self
    }

    pub fn with_gop(mut self, gop: GopStructure) -> Self {
        self.gop = gop;
        self
    }

    pub fn with_framerate(mut self, numerator: u32, denominator: u32) -> Self {
        self.framerate = (numerator, denominator);
        self
    }

    pub fn with_implementation(mut self, implementation: Implementation) -> Self {
        self.implementation = implementation;
        self
    }

    pub fn with_bitstream_capacity(mut self, bytes: usize) -> Self {
        self.bitstream_capacity = bytes;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_surface_wait_timeout(mut self, timeout: Duration) -> Self {
        self.surface_wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_busy_retries(mut self, retries: u32) -> Self {
        self.busy_retries = retries;
        self
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn surface_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.surface_wait_timeout_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Filter handed to the dispatcher when creating the session.
    pub fn implementation_filter(&self) -> ImplementationFilter {
        ImplementationFilter {
            implementation: self.implementation,
            codec: self.codec.id(),
            memory: MemoryType::SystemSurface,
        }
    }

    /// Requested encoder parameters. The device may still adjust them.
    pub fn video_params(&self) -> Result<VideoParams> {
        let alignment = self.codec.alignment();
        let (Some(width), Some(height)) = (alignment.apply(self.width), alignment.apply(self.height))
        else {
            return Err(Error::InvalidConfig(format!(
                "{}x{} cannot be aligned for {:?}",
                self.width,
                self.height,
                self.codec.id()
            )));
        };

        Ok(VideoParams {
            codec: self.codec.id(),
            profile: self.codec.profile(),
            level: self.codec.level(),
            target_usage: self.target_usage,
            rate_control: self.rate_control.clone(),
            gop: self.gop.clone(),
            buffer_size_kb: self.buffer_size_kb,
            initial_delay_kb: self.initial_delay_kb,
            async_depth: self.async_depth,
            io_pattern: IoPattern::InSystemMemory,
            frame_info: FrameInfo {
                fourcc: self.fourcc,
                chroma_format: self.fourcc.chroma_format(),
                width,
                height,
                crop_x: 0,
                crop_y: 0,
                crop_w: self.width,
                crop_h: self.height,
                framerate: self.framerate,
                progressive: true,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Implementation {
    Hardware,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    SystemSurface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImplementationFilter {
    pub implementation: Implementation,
    pub codec: CodecId,
    pub memory: MemoryType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    Avc,
    Hevc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
    ConstrainedBaseline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HevcProfile {
    Main,
    Main10,
    MainSp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    H264(H264Profile),
    Hevc(HevcProfile),
}

/// `MFX_LEVEL_HEVC_4`
pub const HEVC_LEVEL_4: u16 = 120;
/// `MFX_LEVEL_AVC_41`
pub const AVC_LEVEL_41: u16 = 41;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum Codec {
    H264 {
        /// Specify the codec profile explicitly or the implementation
        /// will determine the correct profile from other sources, such as resolution and bitrate.
        profile: Option<H264Profile>,
        level: Option<u16>,
    },
    Hevc {
        profile: Option<HevcProfile>,
        level: Option<u16>,
    },
}

impl Codec {
    pub fn id(&self) -> CodecId {
        match self {
            Codec::H264 { .. } => CodecId::Avc,
            Codec::Hevc { .. } => CodecId::Hevc,
        }
    }

    fn profile(&self) -> Option<Profile> {
        match self {
            Codec::H264 { profile, .. } => profile.map(Profile::H264),
            Codec::Hevc { profile, .. } => profile.map(Profile::Hevc),
        }
    }

    fn level(&self) -> Option<u16> {
        match self {
            Codec::H264 { level, .. } | Codec::Hevc { level, .. } => *level,
        }
    }

    /// Progressive AVC needs multiples of 16, HEVC surfaces are padded to 32.
    pub fn alignment(&self) -> Alignment {
        match self {
            Codec::H264 { .. } => Alignment::To16,
            Codec::Hevc { .. } => Alignment::To32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    To16,
    To32,
}

impl Alignment {
    pub fn apply(self, x: u32) -> Option<u32> {
        match self {
            Alignment::To16 => align16(x),
            Alignment::To32 => align32(x),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetUsage {
    BestQuality,
    Balanced,
    BestSpeed,
}

/// <https://spec.oneapi.io/versions/latest/elements/oneVPL/source/API_ref/VPL_enums.html#ratecontrolmethod>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RateControlMethod {
    /// The encoder attempts to maintain a constant bitrate.
    ConstantBitrate { target_kbps: u32 },
    /// `max_kbps` of 0 lets the implementation pick the peak rate.
    VariableBitrate { target_kbps: u32, max_kbps: u32 },
    ConstantQp { qpi: u16, qpp: u16, qpb: u16 },
    /// Values are in the 1 to 51 range, where 1 corresponds the best quality.
    IntelligentConstantQuality { quality: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GopStructure {
    pub pic_size: u16,
    /// Distance between anchor frames, 1 disables B-frames.
    pub ref_dist: u16,
    pub closed: bool,
    pub idr_interval: u16,
}

impl Default for GopStructure {
    fn default() -> Self {
        Self {
            pic_size: 3,
            ref_dist: 1,
            closed: true,
            idr_interval: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoPattern {
    InSystemMemory,
}

/// Description of the frames stored in input surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub fourcc: FourCc,
    pub chroma_format: ChromaFormat,
    /// Padded width of the surface.
    pub width: u32,
    /// Padded height of the surface.
    pub height: u32,
    pub crop_x: u32,
    pub crop_y: u32,
    pub crop_w: u32,
    pub crop_h: u32,
    pub framerate: (u32, u32),
    pub progressive: bool,
}

/// Encoder parameters exchanged with the device during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    pub codec: CodecId,
    pub profile: Option<Profile>,
    pub level: Option<u16>,
    pub target_usage: TargetUsage,
    pub rate_control: RateControlMethod,
    pub gop: GopStructure,
    pub buffer_size_kb: u16,
    pub initial_delay_kb: u16,
    pub async_depth: u16,
    pub io_pattern: IoPattern,
    pub frame_info: FrameInfo,
}
