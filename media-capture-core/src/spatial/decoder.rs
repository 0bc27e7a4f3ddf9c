use crate::models::audio_format::{AudioFormat, ChannelConfig};
use crate::models::error::CaptureError;

use super::filter::{BandSample, BandSplitFilter, DEFAULT_CUTOFF_HZ};
use super::layout;

enum Kernel {
    /// First-order (W, Y, Z, X) factors per output channel.
    Simple(Vec<[f32; 4]>),
    /// Band matrices, `outputs × inputs`, row-major.
    Matrix { lf: Vec<f32>, hf: Vec<f32> },
    Invalid,
}

/// Decodes planar ambisonic input into an interleaved speaker layout.
///
/// ```text
/// input[j] → BandSplitFilter → {lf, hf} → Σ lf·LF[k][j] + hf·HF[k][j] → output[k]
/// ```
///
/// Layouts without rear speakers skip the filters and use a fixed
/// first-order mapping instead. Changing the level means building a new
/// decoder.
pub struct AmbisonicDecoder {
    level: u32,
    input_channels: usize,
    output_channels: usize,
    channel_config: ChannelConfig,
    kernel: Kernel,
    reverb: Vec<[f32; 2]>,
    filters: Vec<BandSplitFilter>,
    bands: Vec<BandSample>,
    frame: Vec<f32>,
}

impl AmbisonicDecoder {
    /// Creates a decoder for ambisonic `level` (1 to 3) targeting `format`.
    ///
    /// A layout with no decoding rule yields a decoder with zero output
    /// channels; check `is_valid` before use.
    pub fn new(level: u32, format: &AudioFormat) -> Result<Self, CaptureError> {
        if !(1..=3).contains(&level) {
            return Err(CaptureError::UnsupportedAmbisonicLevel(level));
        }
        let input_channels = ((level + 1) * (level + 1)) as usize;
        let channel_config = format.resolved_channel_config();
        let positions = channel_config.positions();

        let (kernel, reverb) = if layout::uses_simple_decoding(channel_config) {
            (
                Kernel::Simple(positions.iter().map(|&p| layout::simple_factors(p)).collect()),
                positions.iter().map(|&p| layout::simple_reverb(p)).collect(),
            )
        } else if let Some(matrix) = layout::decode_matrix(channel_config, level as usize) {
            (
                Kernel::Matrix {
                    lf: matrix.lf,
                    hf: matrix.hf,
                },
                positions.iter().map(|&p| layout::surround_reverb(p)).collect(),
            )
        } else {
            log::warn!(
                "no ambisonic decoding for {:?} ({} channels)",
                channel_config,
                format.channel_count
            );
            (Kernel::Invalid, Vec::new())
        };

        let output_channels = match kernel {
            Kernel::Invalid => 0,
            _ => positions.len(),
        };
        let filters = (0..input_channels)
            .map(|_| BandSplitFilter::new(format.sample_rate as f32, DEFAULT_CUTOFF_HZ))
            .collect();

        Ok(Self {
            level,
            input_channels,
            output_channels,
            channel_config,
            kernel,
            reverb,
            filters,
            bands: vec![BandSample::default(); input_channels],
            frame: vec![0.0; output_channels],
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn channel_config(&self) -> ChannelConfig {
        self.channel_config
    }

    pub fn is_valid(&self) -> bool {
        self.output_channels > 0
    }

    /// Whether the fixed first-order mapping is in use.
    pub fn is_simple(&self) -> bool {
        matches!(self.kernel, Kernel::Simple(_))
    }

    /// Decodes `n_samples` frames into interleaved f32 `output`.
    pub fn process_buffer(&mut self, input: &[&[f32]], output: &mut [f32], n_samples: usize) {
        self.process_buffer_with_reverb(input, None, output, n_samples);
    }

    /// Like `process_buffer`, mixing a stereo reverb signal into the layout.
    pub fn process_buffer_with_reverb(
        &mut self,
        input: &[&[f32]],
        reverb: Option<[&[f32]; 2]>,
        output: &mut [f32],
        n_samples: usize,
    ) {
        let frames = self.frames_available(input, reverb, output.len(), n_samples);
        let channels = self.output_channels;
        for i in 0..frames {
            self.decode_frame(input, reverb, i);
            output[i * channels..(i + 1) * channels].copy_from_slice(&self.frame);
        }
    }

    /// Decodes into interleaved 16-bit output.
    ///
    /// Samples are scaled by 32768 and truncated without clamping, so
    /// callers must leave headroom.
    pub fn process_buffer_i16(&mut self, input: &[&[f32]], output: &mut [i16], n_samples: usize) {
        self.process_buffer_i16_with_reverb(input, None, output, n_samples);
    }

    pub fn process_buffer_i16_with_reverb(
        &mut self,
        input: &[&[f32]],
        reverb: Option<[&[f32]; 2]>,
        output: &mut [i16],
        n_samples: usize,
    ) {
        let frames = self.frames_available(input, reverb, output.len(), n_samples);
        let channels = self.output_channels;
        for i in 0..frames {
            self.decode_frame(input, reverb, i);
            let out = &mut output[i * channels..(i + 1) * channels];
            for (dst, &sample) in out.iter_mut().zip(&self.frame) {
                *dst = (sample * 32768.0) as i32 as i16;
            }
        }
    }

    /// Frames that can be decoded given the buffers handed in.
    fn frames_available(
        &self,
        input: &[&[f32]],
        reverb: Option<[&[f32]; 2]>,
        output_len: usize,
        n_samples: usize,
    ) -> usize {
        if n_samples == 0 || self.output_channels == 0 {
            return 0;
        }
        let needed = match self.kernel {
            Kernel::Simple(_) => 4,
            _ => self.input_channels,
        };
        if input.len() < needed {
            log::warn!(
                "ambisonic input has {} channels, decoder needs {}",
                input.len(),
                needed
            );
            return 0;
        }
        let mut frames = n_samples.min(output_len / self.output_channels);
        for channel in &input[..needed] {
            frames = frames.min(channel.len());
        }
        if let Some([left, right]) = reverb {
            frames = frames.min(left.len()).min(right.len());
        }
        frames
    }

    fn decode_frame(&mut self, input: &[&[f32]], reverb: Option<[&[f32]; 2]>, i: usize) {
        self.frame.fill(0.0);
        match &self.kernel {
            Kernel::Simple(factors) => {
                for (out, f) in self.frame.iter_mut().zip(factors) {
                    for (j, &factor) in f.iter().enumerate() {
                        *out += factor * input[j][i];
                    }
                }
            }
            Kernel::Matrix { lf, hf } => {
                let inputs = self.input_channels;
                for (j, filter) in self.filters.iter_mut().enumerate() {
                    self.bands[j] = filter.next(input[j][i]);
                }
                for (k, out) in self.frame.iter_mut().enumerate() {
                    let lf_row = &lf[k * inputs..(k + 1) * inputs];
                    let hf_row = &hf[k * inputs..(k + 1) * inputs];
                    for (j, band) in self.bands.iter().enumerate() {
                        *out += lf_row[j] * band.lf + hf_row[j] * band.hf;
                    }
                }
            }
            Kernel::Invalid => return,
        }
        if let Some([left, right]) = reverb {
            for (out, pan) in self.frame.iter_mut().zip(&self.reverb) {
                *out += left[i] * pan[0] + right[i] * pan[1];
            }
        }
    }
}
