//! Scalar kernels shared by the software engine and mirrored by the WGSL
//! passes in `render/shaders`.

use glam::{Vec2, Vec3, Vec4};
use image::RgbaImage;

/// Gaussian splat weight `exp(-d²/r²)`.
#[inline]
pub fn gaussian(distance_sq: f32, radius: f32) -> f32 {
    (-distance_sq / (radius * radius)).exp()
}

/// Cheap 2D hash in [0, 1).
#[inline]
pub fn hash(p: Vec2) -> f32 {
    let mut p = (p * Vec2::new(123.34, 345.45)).fract_gl();
    p += p.dot(p + 34.345);
    let v = p.x * p.y;
    v - v.floor()
}

/// Hermite smoothstep, identical to the shading-language builtin.
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Initial mask coverage of a reference color.
///
/// Bright or saturated areas of the reference start covered in paint.
pub fn mask_from_color(color: Vec3) -> f32 {
    let luma = color.dot(Vec3::new(0.299, 0.587, 0.114));
    let saturation = color.max_element() - color.min_element();
    smoothstep(0.03, 0.6, luma.max(saturation)).powf(0.6)
}

/// Convert simulation UV (y up) to texture coordinates (v down).
#[inline]
pub fn to_tex(uv: Vec2) -> Vec2 {
    Vec2::new(uv.x, 1.0 - uv.y)
}

/// Bilinear, clamp-to-edge sample of an RGBA8 image at texture coordinates.
pub fn sample_rgba(image: &RgbaImage, tex: Vec2) -> Vec4 {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Vec4::ZERO;
    }
    let fetch = |x: i64, y: i64| -> Vec4 {
        let x = x.clamp(0, w as i64 - 1) as u32;
        let y = y.clamp(0, h as i64 - 1) as u32;
        let [r, g, b, a] = image.get_pixel(x, y).0;
        Vec4::new(r as f32, g as f32, b as f32, a as f32) / 255.0
    };

    let x = tex.x * w as f32 - 0.5;
    let y = tex.y * h as f32 - 0.5;
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let top = fetch(x0, y0).lerp(fetch(x0 + 1, y0), fx);
    let bottom = fetch(x0, y0 + 1).lerp(fetch(x0 + 1, y0 + 1), fx);
    top.lerp(bottom, fy)
}

/// Reflect `incident` about `normal`.
#[inline]
pub fn reflect(incident: Vec3, normal: Vec3) -> Vec3 {
    incident - 2.0 * normal.dot(incident) * normal
}
