//! Bilinear resampling helpers over interleaved RGB buffers.

/// Resize an interleaved RGB buffer to `dst_w × dst_h` with bilinear interpolation.
///
/// Uses pixel-center alignment, so a uniform input stays uniform.
pub fn resize_rgb(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; dst_w * dst_h * 3];
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return out;
    }

    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;

    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = src[(y0 * src_w + x0) * 3 + c] as f32;
                let tr = src[(y0 * src_w + x1) * 3 + c] as f32;
                let bl = src[(y1 * src_w + x0) * 3 + c] as f32;
                let br = src[(y1 * src_w + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                out[(y * dst_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Sample an RGB buffer at a fractional coordinate; out-of-bounds reads are black.
#[inline]
pub fn sample_bilinear(src: &[u8], width: usize, height: usize, sx: f32, sy: f32) -> [f32; 3] {
    let x0 = sx.floor() as i32;
    let y0 = sy.floor() as i32;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let at = |x: i32, y: i32, c: usize| -> f32 {
        if x >= 0 && x < width as i32 && y >= 0 && y < height as i32 {
            src[(y as usize * width + x as usize) * 3 + c] as f32
        } else {
            0.0
        }
    };

    let mut px = [0.0f32; 3];
    for (c, out) in px.iter_mut().enumerate() {
        *out = at(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
            + at(x0 + 1, y0, c) * fx * (1.0 - fy)
            + at(x0, y0 + 1, c) * (1.0 - fx) * fy
            + at(x0 + 1, y0 + 1, c) * fx * fy;
    }
    px
}
