use serde::{Deserialize, Serialize};

/// Speaker position of one output channel, in interleaving order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelPosition {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    BackLeft,
    BackRight,
    SideLeft,
    SideRight,
}

impl ChannelPosition {
    pub fn is_lfe(&self) -> bool {
        matches!(self, Self::Lfe)
    }
}

/// Speaker layout of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelConfig {
    Unknown,
    Mono,
    Stereo,
    Surround2Dot1,
    Surround3Dot0,
    Surround3Dot1,
    Surround5Dot0,
    Surround5Dot1,
    Surround7Dot0,
    Surround7Dot1,
}

impl ChannelConfig {
    /// Layout assumed for a stream that only declares its channel count.
    pub fn default_for_channel_count(count: u16) -> Self {
        match count {
            1 => Self::Mono,
            2 => Self::Stereo,
            3 => Self::Surround2Dot1,
            4 => Self::Surround3Dot1,
            5 => Self::Surround5Dot0,
            6 => Self::Surround5Dot1,
            7 => Self::Surround7Dot0,
            8 => Self::Surround7Dot1,
            _ => Self::Unknown,
        }
    }

    /// Channel positions in interleaving order.
    pub fn positions(&self) -> &'static [ChannelPosition] {
        use ChannelPosition::*;
        match self {
            Self::Unknown => &[],
            Self::Mono => &[FrontCenter],
            Self::Stereo => &[FrontLeft, FrontRight],
            Self::Surround2Dot1 => &[FrontLeft, FrontRight, Lfe],
            Self::Surround3Dot0 => &[FrontLeft, FrontRight, FrontCenter],
            Self::Surround3Dot1 => &[FrontLeft, FrontRight, FrontCenter, Lfe],
            Self::Surround5Dot0 => &[FrontLeft, FrontRight, FrontCenter, BackLeft, BackRight],
            Self::Surround5Dot1 => &[FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight],
            Self::Surround7Dot0 => &[
                FrontLeft, FrontRight, FrontCenter, BackLeft, BackRight, SideLeft, SideRight,
            ],
            Self::Surround7Dot1 => &[
                FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight, SideLeft, SideRight,
            ],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.positions().len()
    }

    pub fn has_lfe(&self) -> bool {
        self.positions().iter().any(ChannelPosition::is_lfe)
    }
}

/// Sample rate and channel layout of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub channel_config: ChannelConfig,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_rate,
            channel_count,
            channel_config: ChannelConfig::Unknown,
        }
    }

    pub fn with_channel_config(sample_rate: u32, channel_config: ChannelConfig) -> Self {
        Self {
            sample_rate,
            channel_count: channel_config.channel_count() as u16,
            channel_config,
        }
    }

    /// Declared layout, or the default one for the channel count.
    pub fn resolved_channel_config(&self) -> ChannelConfig {
        match self.channel_config {
            ChannelConfig::Unknown => ChannelConfig::default_for_channel_count(self.channel_count),
            config => config,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channel_count > 0
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::with_channel_config(48000, ChannelConfig::Stereo)
    }
}
