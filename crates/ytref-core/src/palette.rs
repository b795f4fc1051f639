//! Dominant colours across a sample of frames.
//!
//! A handful of frames is picked at an even stride, each is reduced to a few representative
//! colours by median cut, and the pooled colours are bucketed and ranked by how often they
//! occur.

use std::{collections::HashMap, fmt};

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::{config::PaletteOptions, frames::Frame};

/// An opaque 8-bit colour. Orders by red, then green, then blue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColorPalette {
    /// Bucketed colours, most frequent first.
    pub dominant_colors: Vec<Rgb>,
    /// Unbucketed colours in extraction order.
    pub all_sampled_colors: Vec<Rgb>,
}

/// Up to `sample_size` frames spread evenly across `frames`.
pub fn sample_frames(frames: &[Frame], sample_size: usize) -> Vec<&Frame> {
    if sample_size == 0 {
        return Vec::new();
    }
    let step = (frames.len() / sample_size).max(1);
    frames.iter().step_by(step).take(sample_size).collect()
}

/// Snap each channel down to a multiple of `bucket`.
pub fn quantize(color: Rgb, bucket: u8) -> Rgb {
    let bucket = bucket.max(1);
    let snap = |c: u8| c / bucket * bucket;
    Rgb::new(snap(color.r), snap(color.g), snap(color.b))
}

/// Rank pooled colours. `None` when there is nothing to rank.
///
/// The ranking depends only on the multiset of colours: equal counts fall back to colour
/// order, so shuffling the input never changes `dominant_colors`.
pub fn rank_colors(colors: &[Rgb], options: &PaletteOptions) -> Option<ColorPalette> {
    if colors.is_empty() {
        return None;
    }

    let mut counts: HashMap<Rgb, usize> = HashMap::new();
    for &c in colors {
        *counts.entry(quantize(c, options.bucket)).or_default() += 1;
    }

    let mut ranked: Vec<(Rgb, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    Some(ColorPalette {
        dominant_colors: ranked
            .into_iter()
            .take(options.dominant_colors)
            .map(|(c, _)| c)
            .collect(),
        all_sampled_colors: colors.iter().take(options.raw_colors).copied().collect(),
    })
}

/// Median-cut reduction of `pixels` to at most `max_colors` colours, most populous first.
pub fn median_cut(pixels: Vec<Rgb>, max_colors: usize) -> Vec<Rgb> {
    if pixels.is_empty() || max_colors == 0 {
        return Vec::new();
    }

    let mut boxes = vec![pixels];
    while boxes.len() < max_colors {
        let widest = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.len() > 1)
            .map(|(i, b)| {
                let (channel, range) = widest_channel(b);
                (i, channel, range, b.len())
            })
            .max_by_key(|&(_, _, range, len)| (range, len));

        let Some((i, channel, range, _)) = widest else {
            break;
        };
        if range == 0 {
            break;
        }

        let mut bx = boxes.swap_remove(i);
        bx.sort_unstable_by_key(|p| channel_value(p, channel));
        let upper = bx.split_off(bx.len() / 2);
        boxes.push(bx);
        boxes.push(upper);
    }

    let mut summary: Vec<(usize, Rgb)> = boxes.iter().map(|b| (b.len(), average(b))).collect();
    summary.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    summary.into_iter().map(|(_, c)| c).collect()
}

fn channel_value(p: &Rgb, channel: usize) -> u8 {
    match channel {
        0 => p.r,
        1 => p.g,
        _ => p.b,
    }
}

fn widest_channel(pixels: &[Rgb]) -> (usize, u8) {
    (0..3)
        .map(|ch| {
            let (lo, hi) = pixels.iter().fold((u8::MAX, u8::MIN), |(lo, hi), p| {
                let v = channel_value(p, ch);
                (lo.min(v), hi.max(v))
            });
            (ch, hi - lo)
        })
        .max_by_key(|&(ch, range)| (range, std::cmp::Reverse(ch)))
        .unwrap_or((0, 0))
}

fn average(pixels: &[Rgb]) -> Rgb {
    let n = pixels.len().max(1) as u64;
    let (r, g, b) = pixels.iter().fold((0u64, 0u64, 0u64), |(r, g, b), p| {
        (r + u64::from(p.r), g + u64::from(p.g), b + u64::from(p.b))
    });
    // Averages of u8 values always fit back into u8.
    Rgb::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
}

/// Representative colours of one image file, reading every `quality`-th pixel.
#[cfg(feature = "palette")]
pub fn extract_frame_palette(
    path: &std::path::Path,
    colors: usize,
    quality: usize,
) -> std::result::Result<Vec<Rgb>, image::ImageError> {
    let img = image::open(path)?.to_rgb8();
    let pixels: Vec<Rgb> = img
        .pixels()
        .step_by(quality.max(1))
        .map(|p| Rgb::new(p[0], p[1], p[2]))
        .collect();
    Ok(median_cut(pixels, colors))
}

/// Palette across `frames`. `None` when nothing could be extracted or palette support is
/// not compiled in.
#[cfg(feature = "palette")]
pub async fn analyze_palette(frames: &[Frame], options: &PaletteOptions) -> Option<ColorPalette> {
    let sampled: Vec<std::path::PathBuf> = sample_frames(frames, options.sample_size)
        .into_iter()
        .map(|f| f.path.clone())
        .collect();
    if sampled.is_empty() {
        return None;
    }
    info!(frames = sampled.len(), "extracting color palette");

    let opts = options.clone();
    let pooled = tokio::task::spawn_blocking(move || {
        let mut pooled = Vec::new();
        for path in &sampled {
            match extract_frame_palette(path, opts.colors_per_frame, opts.quality) {
                Ok(colors) => pooled.extend(colors),
                Err(e) => warn!(frame = %path.display(), error = %e, "color extraction failed"),
            }
        }
        pooled
    })
    .await;

    let pooled = match pooled {
        Ok(pooled) => pooled,
        Err(e) => {
            warn!(error = %e, "palette worker aborted");
            return None;
        }
    };

    let palette = rank_colors(&pooled, options);
    if let Some(p) = &palette {
        debug!(dominant = p.dominant_colors.len(), "palette ranked");
    }
    palette
}

#[cfg(not(feature = "palette"))]
pub async fn analyze_palette(frames: &[Frame], options: &PaletteOptions) -> Option<ColorPalette> {
    let _ = (frames, options);
    info!("palette support not compiled in; skipping");
    None
}
