// THEORY:
// The `ColorRamp` turns a normalized heat value into a display color. It is the
// final, purely cosmetic step of the rendering pipeline and has no knowledge of
// grids or images.
//
// The first stop is reserved for "no data" and is returned directly for any
// non-positive intensity. Positive intensities are remapped onto the remaining
// stops with `position = intensity * (N - 2) + 1`, so that an intensity just
// above zero lands on the lightest "data" stop instead of blending with the
// "no data" color. Interpolation is linear per channel between the two stops
// that bracket the position.

pub mod color_ramp {
    use crate::error::{AnalyticsError, Result};
    use image::Rgb;

    /// White: no detections.
    pub const NO_DATA: Rgb<u8> = Rgb([255, 255, 255]);
    pub const LIGHT_VIOLET: Rgb<u8> = Rgb([220, 200, 255]);
    pub const MID_VIOLET: Rgb<u8> = Rgb([140, 80, 255]);
    pub const DARK_VIOLET: Rgb<u8> = Rgb([80, 0, 200]);

    /// A piecewise-linear palette over `[0, 1]`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ColorRamp {
        stops: Vec<Rgb<u8>>,
    }

    impl Default for ColorRamp {
        fn default() -> Self {
            Self {
                stops: vec![NO_DATA, LIGHT_VIOLET, MID_VIOLET, DARK_VIOLET],
            }
        }
    }

    impl ColorRamp {
        /// Builds a ramp from custom stops. The first stop is the "no data" color,
        /// so at least one data stop must follow it.
        pub fn with_stops(stops: Vec<Rgb<u8>>) -> Result<Self> {
            if stops.len() < 2 {
                return Err(AnalyticsError::Config(format!(
                    "a color ramp needs at least 2 stops, got {}",
                    stops.len()
                )));
            }
            Ok(Self { stops })
        }

        pub fn stops(&self) -> &[Rgb<u8>] {
            &self.stops
        }

        /// Maps an intensity to a color. Values above 1 are clamped.
        pub fn color_at(&self, intensity: f64) -> Rgb<u8> {
            // NaN falls through here as "no data" too.
            if !(intensity > 0.0) {
                return self.stops[0];
            }
            let intensity = intensity.min(1.0);
            let last = self.stops.len() - 1;

            let position = intensity * (self.stops.len() - 2) as f64 + 1.0;
            let lower_index = (position.floor() as usize).min(last);
            let upper_index = (lower_index + 1).min(last);
            let weight = position - lower_index as f64;

            let lower = self.stops[lower_index];
            let upper = self.stops[upper_index];
            let channel = |c: usize| {
                let l = lower[c] as f64;
                let u = upper[c] as f64;
                (l + weight * (u - l)) as u8
            };
            Rgb([channel(0), channel(1), channel(2)])
        }
    }
}
