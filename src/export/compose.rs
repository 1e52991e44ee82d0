//! Canvas composition for exported clips

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Which cameras end up in the output canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewMode {
    Camera1,
    Camera2,
    SideBySide,
}

impl ViewMode {
    pub const ALL: [ViewMode; 3] = [ViewMode::Camera1, ViewMode::Camera2, ViewMode::SideBySide];

    /// Whether camera `0` or `1` contributes to this mode.
    pub fn uses(self, camera: usize) -> bool {
        match self {
            ViewMode::Camera1 => camera == 0,
            ViewMode::Camera2 => camera == 1,
            ViewMode::SideBySide => camera < 2,
        }
    }

    /// Short tag used in export file names.
    pub fn tag(self) -> &'static str {
        match self {
            ViewMode::Camera1 => "cam1",
            ViewMode::Camera2 => "cam2",
            ViewMode::SideBySide => "both",
        }
    }
}

/// Compose one output frame. A missing source leaves its region black.
pub fn compose(
    mode: ViewMode,
    first: Option<&RgbImage>,
    second: Option<&RgbImage>,
    width: u32,
    height: u32,
) -> RgbImage {
    match mode {
        ViewMode::Camera1 => stretch(first, width, height),
        ViewMode::Camera2 => stretch(second, width, height),
        ViewMode::SideBySide => {
            let left_w = width / 2;
            let right_w = width - left_w;
            let mut canvas = RgbImage::new(width, height);
            if let Some(src) = first {
                place_fitted(&mut canvas, src, 0, left_w, height);
            }
            if let Some(src) = second {
                place_fitted(&mut canvas, src, left_w, right_w, height);
            }
            canvas
        }
    }
}

/// Single view: direct resize, the aspect ratio is not preserved.
fn stretch(src: Option<&RgbImage>, width: u32, height: u32) -> RgbImage {
    match src {
        Some(src) if src.dimensions() == (width, height) => src.clone(),
        Some(src) => imageops::resize(src, width, height, FilterType::Triangle),
        None => RgbImage::new(width, height),
    }
}

/// Size of `(w, h)` uniformly scaled to fit inside `(tw, th)`.
pub fn fit_within(w: u32, h: u32, tw: u32, th: u32) -> (u32, u32) {
    if w == 0 || h == 0 {
        return (0, 0);
    }
    let scale = (tw as f64 / w as f64).min(th as f64 / h as f64);
    let nw = ((w as f64 * scale) as u32).clamp(1, tw.max(1));
    let nh = ((h as f64 * scale) as u32).clamp(1, th.max(1));
    (nw, nh)
}

/// Scale `src` to fit a `slot_w` x `slot_h` region starting at column
/// `slot_x`, centered, leaving the padding black.
fn place_fitted(canvas: &mut RgbImage, src: &RgbImage, slot_x: u32, slot_w: u32, slot_h: u32) {
    let (nw, nh) = fit_within(src.width(), src.height(), slot_w, slot_h);
    if nw == 0 || nh == 0 || slot_w == 0 || slot_h == 0 {
        return;
    }
    let scaled = if (nw, nh) == src.dimensions() {
        src.clone()
    } else {
        imageops::resize(src, nw, nh, FilterType::Triangle)
    };
    let x = slot_x + (slot_w - nw) / 2;
    let y = (slot_h - nh) / 2;
    imageops::replace(canvas, &scaled, x as i64, y as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    #[test]
    fn single_view_stretches_to_canvas() {
        let src = RgbImage::from_pixel(10, 10, RED);
        let out = compose(ViewMode::Camera1, Some(&src), None, 40, 20);
        assert_eq!(out.dimensions(), (40, 20));
        assert_eq!(*out.get_pixel(0, 0), RED);
        assert_eq!(*out.get_pixel(39, 19), RED);
    }

    #[test]
    fn single_view_without_source_is_black() {
        let out = compose(ViewMode::Camera2, Some(&RgbImage::from_pixel(4, 4, RED)), None, 8, 8);
        assert!(out.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn side_by_side_centers_each_source() {
        // left: wide 4:1, right: tall 1:2, canvas halves are 50x50
        let wide = RgbImage::from_pixel(40, 10, RED);
        let tall = RgbImage::from_pixel(10, 20, BLUE);
        let out = compose(ViewMode::SideBySide, Some(&wide), Some(&tall), 100, 50);

        // wide fills the half width, 50x12, centered vertically at y=19..31
        assert_eq!(fit_within(40, 10, 50, 50), (50, 12));
        assert_eq!(*out.get_pixel(25, 0), BLACK);
        assert_eq!(*out.get_pixel(25, 25), RED);
        assert_eq!(*out.get_pixel(0, 25), RED);
        assert_eq!(*out.get_pixel(25, 49), BLACK);

        // tall fills the height, 25x50, centered horizontally at x=62..87
        assert_eq!(fit_within(10, 20, 50, 50), (25, 50));
        assert_eq!(*out.get_pixel(55, 25), BLACK);
        assert_eq!(*out.get_pixel(75, 0), BLUE);
        assert_eq!(*out.get_pixel(75, 49), BLUE);
        assert_eq!(*out.get_pixel(95, 25), BLACK);
    }

    #[test]
    fn side_by_side_odd_width_gives_right_half_the_extra_column() {
        let src = RgbImage::from_pixel(2, 2, BLUE);
        let out = compose(ViewMode::SideBySide, None, Some(&src), 9, 4);
        // left half is columns 0..4 and stays black
        assert!((0..4).all(|x| *out.get_pixel(x, 2) == BLACK));
        // right half is 5 wide, the 4x4 source sits at x=4..8
        assert_eq!(*out.get_pixel(4, 0), BLUE);
        assert_eq!(*out.get_pixel(7, 3), BLUE);
        assert_eq!(*out.get_pixel(8, 2), BLACK);
    }

    #[test]
    fn modes_know_their_cameras() {
        assert!(ViewMode::Camera1.uses(0) && !ViewMode::Camera1.uses(1));
        assert!(!ViewMode::Camera2.uses(0) && ViewMode::Camera2.uses(1));
        assert!(ViewMode::SideBySide.uses(0) && ViewMode::SideBySide.uses(1));
    }
}
