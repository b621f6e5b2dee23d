//! Latency heatmap: the peer-to-peer ping matrix rendered as a PNG.
//!
//! Peers are sorted by name on both axes, so the image is a pure function
//! of the aggregated results and thresholds. Colour runs over a 350-point
//! ramp from (25,200,25) to (200,25,25) rather than raw 255s, which reads
//! better on dashboards.

use std::collections::HashMap;

use common::schemas::CheckAllResults;

const BOX_SIZE: usize = 14;
const PADDING: usize = 1;
const LEGEND_SIZE: usize = 200;

/// Millisecond latency thresholds: green up to t0, yellow ramp to t1, red
/// ramp to t2, solid red beyond.
pub const DEFAULT_THRESHOLDS: [i64; 3] = [1, 10, 100];

/// Apply `t0`/`t1`/`t2` query overrides. Values that do not parse as
/// non-negative integers are ignored.
pub fn override_thresholds(base: [i64; 3], overrides: [Option<&str>; 3]) -> [i64; 3] {
    let mut thresholds = base;
    for (i, raw) in overrides.iter().enumerate() {
        if let Some(raw) = raw {
            if let Ok(v) = raw.parse::<i64>() {
                if v >= 0 {
                    thresholds[i] = v;
                }
            }
        }
    }
    thresholds
}

fn box_color(latency: i64, thresholds: [i64; 3]) -> [u8; 4] {
    let mut red: u8 = 25;
    let mut green: u8 = 200;
    if latency > thresholds[2] {
        red = 200;
        green = 25;
    } else if latency >= thresholds[1] {
        red = 200;
        let span = (thresholds[2] - thresholds[1]).max(1) as f32;
        let diff = ((latency - thresholds[1]) as f32 / span) * 175.0;
        green = 200 - diff as u8;
    } else if latency >= thresholds[0] {
        let span = (thresholds[1] - thresholds[0]).max(1) as f32;
        let diff = ((latency - thresholds[0]) as f32 / span) * 175.0;
        red = 25 + diff as u8;
    }
    [red, green, 25, 255]
}

struct Canvas {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Canvas {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height * 4],
        }
    }

    fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: [u8; 4]) {
        for yy in y..(y + h).min(self.height) {
            for xx in x..(x + w).min(self.width) {
                let offset = (yy * self.width + xx) * 4;
                self.data[offset..offset + 4].copy_from_slice(&color);
            }
        }
    }
}

/// Render the ping matrix. Column = source peer, row = destination peer,
/// both in ascending name order; a box is drawn wherever a source that
/// reported ok carries a result for the destination.
pub fn render_heatmap(
    results: &CheckAllResults,
    thresholds: [i64; 3],
) -> anyhow::Result<Vec<u8>> {
    let mut names: Vec<&String> = results.responses.keys().collect();
    names.sort();
    let order: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let cell = BOX_SIZE + PADDING;
    let heatmap_size = names.len() * cell + BOX_SIZE * 2;
    let mut canvas = Canvas::new(heatmap_size + LEGEND_SIZE, heatmap_size);

    for (source, response) in &results.responses {
        if !response.ok {
            continue;
        }
        let Some(payload) = &response.response else {
            continue;
        };
        let col = order[source.as_str()];
        for (dest, pod_result) in &payload.pod_results {
            let Some(&row) = order.get(dest.as_str()) else {
                continue;
            };
            canvas.fill_rect(
                BOX_SIZE + col * cell,
                BOX_SIZE + row * cell,
                BOX_SIZE,
                BOX_SIZE,
                box_color(pod_result.response_time_ms, thresholds),
            );
        }
    }

    // Axis ticks in the margins, one per peer, so rows and columns can be
    // counted off against the sorted name order.
    let tick = [25, 200, 25, 255];
    for index in 0..names.len() {
        canvas.fill_rect(BOX_SIZE + index * cell + BOX_SIZE / 2 - 2, 4, 4, 4, tick);
        canvas.fill_rect(4, BOX_SIZE + index * cell + BOX_SIZE / 2 - 2, 4, 4, tick);
    }

    // Legend: the colour ramp at its threshold anchors.
    let anchors = [0, thresholds[0], thresholds[1], thresholds[2].saturating_add(1)];
    for (i, latency) in anchors.into_iter().enumerate() {
        canvas.fill_rect(
            heatmap_size + 8,
            BOX_SIZE + i * cell,
            BOX_SIZE,
            BOX_SIZE,
            box_color(latency, thresholds),
        );
    }

    encode_png(&canvas)
}

fn encode_png(canvas: &Canvas) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, canvas.width as u32, canvas.height as u32);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&canvas.data)?;
    }
    Ok(out)
}
