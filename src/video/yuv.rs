//! Full-range BT.601 conversion between planar YUV and packed RGB24.

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Chroma {
    /// Full-resolution chroma planes.
    C444,
    /// Chroma planes subsampled 2x in both directions.
    C420,
}

impl Chroma {
    pub(crate) fn plane_dims(&self, width: u32, height: u32) -> (usize, usize) {
        match self {
            Chroma::C444 => (width as usize, height as usize),
            Chroma::C420 => (width.div_ceil(2) as usize, height.div_ceil(2) as usize),
        }
    }

    /// Bytes in one frame: Y plane plus two chroma planes.
    pub(crate) fn frame_len(&self, width: u32, height: u32) -> Result<usize> {
        let luma = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("YUV frame dimensions overflow"))?;
        let (cw, ch) = self.plane_dims(width, height);
        cw.checked_mul(ch)
            .and_then(|c| c.checked_mul(2))
            .and_then(|c| c.checked_add(luma))
            .ok_or_else(|| anyhow!("YUV frame dimensions overflow"))
    }
}

pub(crate) fn yuv_to_rgb(planes: &[u8], width: u32, height: u32, chroma: Chroma) -> Result<Vec<u8>> {
    let expected = chroma.frame_len(width, height)?;
    if planes.len() != expected {
        return Err(anyhow!(
            "YUV frame length mismatch: expected {}, got {}",
            expected,
            planes.len()
        ));
    }

    let w = width as usize;
    let h = height as usize;
    let (cw, ch) = chroma.plane_dims(width, height);
    let y_plane = &planes[..w * h];
    let u_plane = &planes[w * h..w * h + cw * ch];
    let v_plane = &planes[w * h + cw * ch..];

    let mut rgb = vec![0u8; w * h * 3];
    for j in 0..h {
        for i in 0..w {
            let c_index = match chroma {
                Chroma::C444 => j * cw + i,
                Chroma::C420 => (j / 2) * cw + i / 2,
            };
            let y = y_plane[j * w + i] as f32;
            let u = u_plane[c_index] as f32 - 128.0;
            let v = v_plane[c_index] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }

    Ok(rgb)
}

/// Packed RGB24 to planar YUV 4:4:4.
pub(crate) fn rgb_to_yuv444(rgb: &[u8]) -> Vec<u8> {
    let pixels = rgb.len() / 3;
    let mut planes = vec![0u8; pixels * 3];
    let (y_plane, chroma) = planes.split_at_mut(pixels);
    let (u_plane, v_plane) = chroma.split_at_mut(pixels);
    for (idx, px) in rgb.chunks_exact(3).enumerate() {
        let r = px[0] as f32;
        let g = px[1] as f32;
        let b = px[2] as f32;
        y_plane[idx] = clamp_to_u8(0.299 * r + 0.587 * g + 0.114 * b);
        u_plane[idx] = clamp_to_u8(-0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0);
        v_plane[idx] = clamp_to_u8(0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0);
    }
    planes
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
