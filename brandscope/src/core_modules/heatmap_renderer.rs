// THEORY:
// The `HeatmapRenderer` turns a normalized `IntensityGrid` into an RGBA image. A
// naive renderer would paint one flat square per cell and produce a blocky
// mosaic; this one runs a three-stage upsample-smooth-recolor pipeline so that
// neighbouring hot cells melt into continuous blobs.
//
// Pipeline stages:
// 1.  **Background fill**: the canvas is initialised according to the selected
//     `Background` (transparent, flat fills, or row-wise gradients).
// 2.  **Sub-cell smoothing**: each cell is upsampled by `SCALE_FACTOR` into a finer
//     matrix. Inside each upsampled block the value falls off radially from the
//     block center (up to 30% attenuation), and anything outside the block's
//     radius stays cold. A Gaussian blur over the whole fine matrix then lets heat
//     bleed across cell boundaries.
// 3.  **Recolor and paint**: every cell's fine block is averaged back into a single
//     value. Cells above the visibility threshold get a color from the
//     `ColorRamp` and are painted with a second radial falloff (up to 40%) that
//     drives both the alpha channel and the painted footprint.
//
// Both falloff stages and the blur are needed to reach the intended density:
// dropping any one of them brings back visible cell edges.

use crate::core_modules::color_ramp::color_ramp::ColorRamp;
use crate::core_modules::grid_manager::IntensityGrid;
use crate::error::{AnalyticsError, Result};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Upsampling factor of the smoothing matrix.
const SCALE_FACTOR: usize = 4;
/// Maximum attenuation applied inside an upsampled block.
const UPSAMPLE_FALLOFF: f64 = 0.3;
/// Maximum attenuation applied when painting a cell.
const PAINT_FALLOFF: f64 = 0.4;
/// Cells at or below this averaged intensity are not painted.
const VISIBILITY_THRESHOLD: f64 = 0.01;
const BASE_ALPHA: f64 = 180.0;
const ALPHA_RANGE: f64 = 75.0;
/// The fine matrix must exceed this extent on both axes before it is blurred.
const BLUR_MIN_EXTENT: usize = 10;
/// Side of the blank image returned when rendering fails.
pub const FALLBACK_IMAGE_SIDE: u32 = 100;
/// Default ceiling on rendered pixels (64 Mi).
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 64 * 1024 * 1024;

/// The canvas a heatmap is painted onto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Background {
    #[default]
    Transparent,
    White,
    /// Light grey to white, top to bottom.
    Gradient,
    Dark,
    /// Light violet to a deeper violet, top to bottom.
    Purple,
}

impl Background {
    /// Parses a background name, ignoring case. Unknown names are transparent.
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "white" => Background::White,
            "gradient" => Background::Gradient,
            "dark" => Background::Dark,
            "purple" => Background::Purple,
            _ => Background::Transparent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Background::Transparent => "transparent",
            Background::White => "white",
            Background::Gradient => "gradient",
            Background::Dark => "dark",
            Background::Purple => "purple",
        }
    }

    /// Background color of row `y` in an image `image_height` rows tall.
    fn pixel_for_row(&self, y: u32, image_height: u32) -> Rgba<u8> {
        let t = y as f64 / image_height as f64;
        match self {
            Background::Transparent => Rgba([0, 0, 0, 0]),
            Background::White => Rgba([255, 255, 255, 255]),
            Background::Gradient => {
                let gray = (240.0 + t * 15.0) as u8;
                Rgba([gray, gray, gray, 255])
            }
            Background::Dark => Rgba([45, 45, 45, 255]),
            Background::Purple => Rgba([
                (240.0 - t * 40.0) as u8,
                (240.0 - t * 80.0) as u8,
                (255.0 - t * 20.0) as u8,
                255,
            ]),
        }
    }
}

impl fmt::Display for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Background {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Background {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Background::parse_lossy(&name))
    }
}

/// Tunables for one render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub background: Background,
    /// Blur strength multiplier.
    pub smooth_factor: f64,
    pub max_image_pixels: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            background: Background::Transparent,
            smooth_factor: 1.0,
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
        }
    }
}

/// Paints intensity grids as RGBA images.
#[derive(Debug, Clone, Default)]
pub struct HeatmapRenderer {
    ramp: ColorRamp,
    options: RenderOptions,
}

impl HeatmapRenderer {
    pub fn new(ramp: ColorRamp, options: RenderOptions) -> Self {
        Self { ramp, options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Renders the grid, falling back to a blank transparent
    /// `FALLBACK_IMAGE_SIDE`-square image when rendering fails. The fault, if
    /// any, is returned alongside.
    pub fn render_or_fallback(&self, grid: &IntensityGrid, grid_size: u32) -> (RgbaImage, Option<AnalyticsError>) {
        match self.render(grid, grid_size) {
            Ok(image) => (image, None),
            Err(err) => {
                log::error!("error creating heatmap image: {err}");
                (RgbaImage::new(FALLBACK_IMAGE_SIDE, FALLBACK_IMAGE_SIDE), Some(err))
            }
        }
    }

    /// Renders an image of `(grid.height * grid_size) x (grid.width * grid_size)`.
    pub fn render(&self, grid: &IntensityGrid, grid_size: u32) -> Result<RgbaImage> {
        if grid_size == 0 {
            return Err(AnalyticsError::InvalidGridSize(grid_size));
        }
        if !self.options.smooth_factor.is_finite() {
            return Err(AnalyticsError::Config(format!(
                "smooth factor must be finite, got {}",
                self.options.smooth_factor
            )));
        }

        let image_width = grid.width() as u64 * grid_size as u64;
        let image_height = grid.height() as u64 * grid_size as u64;
        if image_width * image_height > self.options.max_image_pixels
            || image_width > u32::MAX as u64
            || image_height > u32::MAX as u64
        {
            return Err(AnalyticsError::ImageTooLarge {
                width: image_width,
                height: image_height,
                limit: self.options.max_image_pixels,
            });
        }

        let cell = grid_size as usize;
        let max_distance = cell / 2;
        let has_heat = grid.max() > 0.0;
        if has_heat && max_distance == 0 {
            return Err(AnalyticsError::DegenerateCell(grid_size));
        }

        // --- 1. Background ---
        let background = self.options.background;
        let height = image_height as u32;
        let mut image = RgbaImage::from_fn(image_width as u32, height, |_, y| background.pixel_for_row(y, height));

        if !has_heat {
            return Ok(image);
        }

        // --- 2. Sub-cell smoothing ---
        let mut fine = upsample_with_falloff(grid);
        let fine_width = grid.width() * SCALE_FACTOR;
        let fine_height = grid.height() * SCALE_FACTOR;
        if fine_height > BLUR_MIN_EXTENT && fine_width > BLUR_MIN_EXTENT {
            let max_extent = fine_width.max(fine_height);
            let (kernel_size, sigma) = blur_parameters(self.options.smooth_factor, max_extent);
            fine = gaussian_blur(&fine, fine_width, fine_height, kernel_size, sigma);
        }

        // --- 3. Recolor and paint ---
        for gy in 0..grid.height() {
            for gx in 0..grid.width() {
                let average = block_mean(&fine, fine_width, gx * SCALE_FACTOR, gy * SCALE_FACTOR);
                if average <= VISIBILITY_THRESHOLD {
                    continue;
                }
                let color = self.ramp.color_at(average);
                let start_x = gx * cell;
                let start_y = gy * cell;
                let center_x = start_x + cell / 2;
                let center_y = start_y + cell / 2;

                for sy in start_y..start_y + cell {
                    for sx in start_x..start_x + cell {
                        let distance = radial_distance(sx, sy, center_x, center_y);
                        if distance > max_distance as f64 {
                            continue;
                        }
                        let falloff = 1.0 - (distance / max_distance as f64) * PAINT_FALLOFF;
                        let alpha = ((BASE_ALPHA + average * ALPHA_RANGE) * falloff) as i64;
                        if alpha > 0 {
                            let alpha = alpha.min(255) as u8;
                            image.put_pixel(sx as u32, sy as u32, Rgba([color[0], color[1], color[2], alpha]));
                        }
                    }
                }
            }
        }

        Ok(image)
    }
}

fn radial_distance(x: usize, y: usize, center_x: usize, center_y: usize) -> f64 {
    let dx = x as f64 - center_x as f64;
    let dy = y as f64 - center_y as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Expands every hot cell into a `SCALE_FACTOR`-square block with a radial
/// falloff from the block center. Row-major.
fn upsample_with_falloff(grid: &IntensityGrid) -> Vec<f64> {
    let fine_width = grid.width() * SCALE_FACTOR;
    let fine_height = grid.height() * SCALE_FACTOR;
    let mut fine = vec![0.0; fine_width * fine_height];
    let max_distance = (SCALE_FACTOR / 2) as f64;

    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let intensity = grid.get(x, y);
            if intensity <= 0.0 {
                continue;
            }
            let start_y = y * SCALE_FACTOR;
            let start_x = x * SCALE_FACTOR;
            let center_y = start_y + SCALE_FACTOR / 2;
            let center_x = start_x + SCALE_FACTOR / 2;
            for sy in start_y..start_y + SCALE_FACTOR {
                for sx in start_x..start_x + SCALE_FACTOR {
                    let distance = radial_distance(sx, sy, center_x, center_y);
                    if distance <= max_distance {
                        let falloff = 1.0 - (distance / max_distance) * UPSAMPLE_FALLOFF;
                        fine[sy * fine_width + sx] = intensity * falloff;
                    }
                }
            }
        }
    }
    fine
}

/// Mean of the `SCALE_FACTOR`-square block whose top-left corner is `(x0, y0)`.
fn block_mean(fine: &[f64], fine_width: usize, x0: usize, y0: usize) -> f64 {
    let mut sum = 0.0;
    for y in y0..y0 + SCALE_FACTOR {
        let row = &fine[y * fine_width + x0..y * fine_width + x0 + SCALE_FACTOR];
        sum += row.iter().sum::<f64>();
    }
    sum / (SCALE_FACTOR * SCALE_FACTOR) as f64
}

/// Kernel size `max(3, round(5 * smooth))` bumped to odd, and sigma = smooth.
/// The size never exceeds `2 * max_extent + 1`: with reflected borders, taps
/// beyond that only revisit samples already covered.
pub(crate) fn blur_parameters(smooth_factor: f64, max_extent: usize) -> (usize, f64) {
    let cap = 2 * max_extent + 1;
    let wanted = (5.0 * smooth_factor).round();
    let mut size = if wanted >= cap as f64 { cap } else { wanted.max(3.0) as usize };
    if size % 2 == 0 {
        size += 1;
    }
    (size, smooth_factor)
}

/// Normalized 1D Gaussian weights. A non-positive sigma is derived from the
/// kernel size.
pub(crate) fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f64> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let half = (size / 2) as f64;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - half;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Mirror index without repeating the edge sample (`dcb|abcd|cba`).
fn reflect_101(index: i64, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as i64 - 1);
    let i = index.rem_euclid(period);
    if i >= len as i64 { (period - i) as usize } else { i as usize }
}

/// Separable Gaussian blur over a row-major matrix.
pub(crate) fn gaussian_blur(values: &[f64], width: usize, height: usize, size: usize, sigma: f64) -> Vec<f64> {
    let kernel = gaussian_kernel(size, sigma);
    let half = (size / 2) as i64;

    let mut horizontal = vec![0.0; values.len()];
    for y in 0..height {
        let row = &values[y * width..(y + 1) * width];
        for x in 0..width {
            horizontal[y * width + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * row[reflect_101(x as i64 + k as i64 - half, width)])
                .sum();
        }
    }

    let mut out = vec![0.0; values.len()];
    for y in 0..height {
        for x in 0..width {
            out[y * width + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * horizontal[reflect_101(y as i64 + k as i64 - half, height) * width + x])
                .sum();
        }
    }
    out
}

/// Composites `heatmap` over `frame` (source-over, straight alpha), anchored at
/// the top-left corner and clipped to the overlapping area.
pub fn overlay_onto(frame: &mut RgbaImage, heatmap: &RgbaImage) {
    let width = frame.width().min(heatmap.width());
    let height = frame.height().min(heatmap.height());
    for y in 0..height {
        for x in 0..width {
            let src = heatmap.get_pixel(x, y);
            let src_a = src[3] as f64 / 255.0;
            if src_a == 0.0 {
                continue;
            }
            let dst = frame.get_pixel_mut(x, y);
            let dst_a = dst[3] as f64 / 255.0;
            let out_a = src_a + dst_a * (1.0 - src_a);
            for c in 0..3 {
                let blended = (src[c] as f64 * src_a + dst[c] as f64 * dst_a * (1.0 - src_a)) / out_a;
                dst[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
            dst[3] = (out_a * 255.0).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_hot_cell(width: usize, height: usize, x: usize, y: usize) -> IntensityGrid {
        let mut grid = IntensityGrid::zeros(width, height);
        grid.add(x, y, 1.0);
        grid
    }

    #[test]
    fn backgrounds_parse_lossily() {
        assert_eq!(Background::parse_lossy("WHITE"), Background::White);
        assert_eq!(Background::parse_lossy("purple"), Background::Purple);
        assert_eq!(Background::parse_lossy("neon"), Background::Transparent);
        let parsed: Background = serde_json::from_str("\"Dark\"").unwrap();
        assert_eq!(parsed, Background::Dark);
        assert_eq!(serde_json::to_string(&Background::Gradient).unwrap(), "\"gradient\"");
    }

    #[test]
    fn image_size_follows_grid() {
        let renderer = HeatmapRenderer::default();
        let image = renderer.render(&IntensityGrid::zeros(20, 10), 50).unwrap();
        assert_eq!(image.dimensions(), (1000, 500));
        assert!(image.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn flat_and_gradient_backgrounds() {
        let grid = IntensityGrid::zeros(2, 2);
        let render = |background| {
            let options = RenderOptions { background, ..RenderOptions::default() };
            HeatmapRenderer::new(ColorRamp::default(), options).render(&grid, 10).unwrap()
        };
        assert_eq!(*render(Background::White).get_pixel(5, 5), Rgba([255, 255, 255, 255]));
        assert_eq!(*render(Background::Dark).get_pixel(5, 5), Rgba([45, 45, 45, 255]));

        let gradient = render(Background::Gradient);
        assert_eq!(*gradient.get_pixel(0, 0), Rgba([240, 240, 240, 255]));
        assert_eq!(*gradient.get_pixel(0, 10), Rgba([247, 247, 247, 255]));

        let purple = render(Background::Purple);
        assert_eq!(*purple.get_pixel(3, 0), Rgba([240, 240, 255, 255]));
        assert_eq!(*purple.get_pixel(3, 10), Rgba([220, 200, 245, 255]));
    }

    #[test]
    fn hot_cell_is_painted_strongest_at_its_center() {
        let renderer = HeatmapRenderer::default();
        let grid = single_hot_cell(5, 5, 2, 2);
        let image = renderer.render(&grid, 20).unwrap();

        let center = image.get_pixel(50, 50);
        let edge = image.get_pixel(59, 50);
        assert!(center[3] > edge[3], "center {center:?} edge {edge:?}");
        assert!(center[3] >= 180);
        // corners of the cell are outside the paint radius
        assert_eq!(image.get_pixel(40, 40)[3], 0);
        // blurred heat reaches the neighbours
        assert!(image.get_pixel(30, 50)[3] > 0);
        // far away stays transparent
        assert_eq!(image.get_pixel(5, 5)[3], 0);
    }

    #[test]
    fn tiny_grid_skips_blur() {
        // 2x2 grid upsamples to 8x8, under the blur threshold
        let renderer = HeatmapRenderer::default();
        let image = renderer.render(&single_hot_cell(2, 2, 0, 0), 10).unwrap();
        assert!(image.get_pixel(5, 5)[3] > 0);
        assert_eq!(image.get_pixel(15, 15)[3], 0);
    }

    #[test]
    fn single_pixel_cells_fail_and_fall_back() {
        let renderer = HeatmapRenderer::default();
        let grid = single_hot_cell(4, 4, 1, 1);
        assert_eq!(renderer.render(&grid, 1).unwrap_err(), AnalyticsError::DegenerateCell(1));

        let (image, fault) = renderer.render_or_fallback(&grid, 1);
        assert_eq!(image.dimensions(), (FALLBACK_IMAGE_SIDE, FALLBACK_IMAGE_SIDE));
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0, 0]));
        assert_eq!(fault, Some(AnalyticsError::DegenerateCell(1)));
    }

    #[test]
    fn oversized_images_are_refused() {
        let options = RenderOptions { max_image_pixels: 100, ..RenderOptions::default() };
        let renderer = HeatmapRenderer::new(ColorRamp::default(), options);
        let err = renderer.render(&IntensityGrid::zeros(2, 2), 10).unwrap_err();
        assert!(matches!(err, AnalyticsError::ImageTooLarge { width: 20, height: 20, .. }));
    }

    #[test]
    fn kernel_parameters() {
        assert_eq!(blur_parameters(1.0, 80), (5, 1.0));
        assert_eq!(blur_parameters(0.2, 80), (3, 0.2));
        assert_eq!(blur_parameters(1.2, 80), (7, 1.2));
        assert_eq!(blur_parameters(2.0, 80).0, 11);
        assert_eq!(blur_parameters(-4.0, 80).0, 3);
    }

    #[test]
    fn kernel_is_bounded_by_matrix_extent() {
        assert_eq!(blur_parameters(1e17, 48), (97, 1e17));
        assert_eq!(blur_parameters(f64::MAX, 12).0, 25);
        assert_eq!(blur_parameters(9.9, 12).0, 25);
    }

    #[test]
    fn huge_smoothing_renders_without_exhausting_memory() {
        let options = RenderOptions { smooth_factor: 1e17, ..RenderOptions::default() };
        let renderer = HeatmapRenderer::new(ColorRamp::default(), options);
        let image = renderer.render(&single_hot_cell(6, 4, 2, 1), 10).unwrap();
        assert_eq!(image.dimensions(), (60, 40));
        assert!(image.pixels().any(|p| p[3] > 0));
    }

    #[test]
    fn single_pixel_cells_still_draw_an_empty_grid() {
        let renderer = HeatmapRenderer::new(
            ColorRamp::default(),
            RenderOptions { background: Background::Dark, ..RenderOptions::default() },
        );
        let image = renderer.render(&IntensityGrid::zeros(3, 2), 1).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert!(image.pixels().all(|p| p.0 == [45, 45, 45, 255]));
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(5, 1.0);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(k[0], k[4]);
        assert!(k[2] > k[1]);
        let derived = gaussian_kernel(3, 0.0);
        assert!((derived.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn blur_preserves_mass_of_interior_impulse() {
        let (w, h) = (12, 12);
        let mut values = vec![0.0; w * h];
        values[6 * w + 6] = 1.0;
        let out = gaussian_blur(&values, w, h, 5, 1.0);
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(out[6 * w + 6] < 1.0);
        assert!(out[6 * w + 7] > 0.0);
    }

    #[test]
    fn reflect_index_mirrors_without_edge_repeat() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(2, 5), 2);
        assert_eq!(reflect_101(7, 1), 0);
    }

    #[test]
    fn overlay_blends_over_opaque_frame() {
        let mut frame = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let mut heat = RgbaImage::new(2, 2);
        heat.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        heat.put_pixel(1, 0, Rgba([200, 100, 0, 51]));
        overlay_onto(&mut frame, &heat);

        assert_eq!(*frame.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*frame.get_pixel(1, 0), Rgba([40, 20, 0, 255]));
        assert_eq!(*frame.get_pixel(3, 3), Rgba([0, 0, 0, 255]));
    }
}
