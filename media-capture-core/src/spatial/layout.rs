//! Speaker layouts and their decode coefficients.
//!
//! Inputs use ACN channel ordering with SN3D normalization
//! (W, Y, Z, X, ...). Matrices are row-major, one row per output channel.

use std::f64::consts::PI;

use crate::models::audio_format::{ChannelConfig, ChannelPosition};

/// Layouts decoded with the fixed first-order mapping. They have no rear
/// speakers, so a full decode would leave holes for sounds from behind.
pub fn uses_simple_decoding(config: ChannelConfig) -> bool {
    matches!(
        config,
        ChannelConfig::Mono
            | ChannelConfig::Stereo
            | ChannelConfig::Surround2Dot1
            | ChannelConfig::Surround3Dot0
            | ChannelConfig::Surround3Dot1
    )
}

/// Layouts with a full per-level decode matrix.
pub fn has_decode_matrix(config: ChannelConfig) -> bool {
    matches!(
        config,
        ChannelConfig::Surround5Dot0
            | ChannelConfig::Surround5Dot1
            | ChannelConfig::Surround7Dot0
            | ChannelConfig::Surround7Dot1
    )
}

/// First-order (W, Y, Z, X) factors of the simple mapping.
pub fn simple_factors(position: ChannelPosition) -> [f32; 4] {
    match position {
        ChannelPosition::FrontLeft => [0.5, 0.5, 0.0, 0.0],
        ChannelPosition::FrontRight => [0.5, -0.5, 0.0, 0.0],
        ChannelPosition::FrontCenter => [0.5, 0.0, 0.0, 0.5],
        ChannelPosition::Lfe => [0.5, 0.0, 0.0, 0.0],
        // not part of any simple layout
        _ => [0.0; 4],
    }
}

/// Stereo reverb panning for the simple layouts.
pub fn simple_reverb(position: ChannelPosition) -> [f32; 2] {
    match position {
        ChannelPosition::FrontLeft => [1.0, 0.0],
        ChannelPosition::FrontRight => [0.0, 1.0],
        ChannelPosition::FrontCenter => [0.5, 0.5],
        _ => [0.0, 0.0],
    }
}

/// Stereo reverb panning for the surround layouts.
pub fn surround_reverb(position: ChannelPosition) -> [f32; 2] {
    match position {
        ChannelPosition::FrontLeft | ChannelPosition::BackLeft | ChannelPosition::SideLeft => [1.0, 0.0],
        ChannelPosition::FrontRight | ChannelPosition::BackRight | ChannelPosition::SideRight => {
            [0.0, 1.0]
        }
        ChannelPosition::FrontCenter => [0.7, 0.7],
        ChannelPosition::Lfe => [0.0, 0.0],
    }
}

/// Speaker azimuth in degrees, counter-clockwise from front.
/// `None` for the LFE channel, which has no direction.
pub fn azimuth_degrees(config: ChannelConfig, position: ChannelPosition) -> Option<f64> {
    let seven = matches!(config, ChannelConfig::Surround7Dot0 | ChannelConfig::Surround7Dot1);
    match position {
        ChannelPosition::FrontLeft => Some(30.0),
        ChannelPosition::FrontRight => Some(-30.0),
        ChannelPosition::FrontCenter => Some(0.0),
        ChannelPosition::Lfe => None,
        ChannelPosition::BackLeft => Some(if seven { 150.0 } else { 110.0 }),
        ChannelPosition::BackRight => Some(if seven { -150.0 } else { -110.0 }),
        ChannelPosition::SideLeft => Some(90.0),
        ChannelPosition::SideRight => Some(-90.0),
    }
}

/// SN3D gain of the sectoral harmonic of `order` on the horizontal plane.
fn sectoral_gain(order: usize) -> f64 {
    match order {
        1 => 1.0,
        2 => 3f64.sqrt() / 2.0,
        3 => (5.0f64 / 8.0).sqrt(),
        _ => 1.0,
    }
}

/// max-rE order weight for a horizontal decoder of order `level`.
fn max_re_weight(order: usize, level: usize) -> f64 {
    (order as f64 * PI / (2.0 * level as f64 + 2.0)).cos()
}

/// Low and high band decode matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeMatrix {
    pub lf: Vec<f32>,
    pub hf: Vec<f32>,
}

/// Builds the band matrices of a horizontal sampling decoder for `config`.
///
/// The low band uses unit order weights, the high band max-rE weights with
/// inverted sign to match the filter's phase. LFE rows take W from the low
/// band only. Returns `None` for layouts without a decode matrix.
pub fn decode_matrix(config: ChannelConfig, level: usize) -> Option<DecodeMatrix> {
    if !has_decode_matrix(config) || !(1..=3).contains(&level) {
        return None;
    }
    let inputs = (level + 1) * (level + 1);
    let positions = config.positions();
    let speakers = positions.iter().filter(|p| !p.is_lfe()).count() as f64;

    let mut lf = vec![0.0f32; positions.len() * inputs];
    let mut hf = vec![0.0f32; positions.len() * inputs];

    for (row, &position) in positions.iter().enumerate() {
        let lf_row = &mut lf[row * inputs..(row + 1) * inputs];
        let hf_row = &mut hf[row * inputs..(row + 1) * inputs];

        let Some(degrees) = azimuth_degrees(config, position) else {
            lf_row[0] = 0.5;
            continue;
        };
        let phi = degrees.to_radians();

        lf_row[0] = (1.0 / speakers) as f32;
        hf_row[0] = -(1.0 / speakers) as f32;

        for order in 1..=level {
            let scale = 2.0 / speakers / sectoral_gain(order);
            let angle = order as f64 * phi;
            // ACN index of degree `order`, index m is order*(order+1)+m
            let sin_index = order * order;
            let cos_index = order * (order + 2);
            let hf_scale = scale * max_re_weight(order, level);

            lf_row[sin_index] = (scale * angle.sin()) as f32;
            lf_row[cos_index] = (scale * angle.cos()) as f32;
            hf_row[sin_index] = -(hf_scale * angle.sin()) as f32;
            hf_row[cos_index] = -(hf_scale * angle.cos()) as f32;
        }
    }

    Some(DecodeMatrix { lf, hf })
}
