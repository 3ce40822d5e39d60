//! Minimal binary PPM (`P6`, 8-bit) codec used by
//! [`PpmFileCamera`][crate::camera::PpmFileCamera].

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::camera::CameraFrame;

#[derive(Error, Debug)]
pub enum PpmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a binary PPM (magic {0:?})")]
    BadMagic(String),
    #[error("malformed header: {0}")]
    BadHeader(String),
    #[error("unsupported maxval {0} (only 8-bit samples are supported)")]
    UnsupportedMaxval(u32),
    #[error("pixel data truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
}

/// Read and decode a PPM file.
pub fn read_file(path: &Path) -> Result<CameraFrame, PpmError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

/// Encode `frame` and write it to `path`.
pub fn write_file(path: &Path, frame: &CameraFrame) -> Result<(), PpmError> {
    fs::write(path, encode(frame))?;
    Ok(())
}

pub fn encode(frame: &CameraFrame) -> Vec<u8> {
    let mut out = format!("P6\n{} {}\n255\n", frame.width, frame.height).into_bytes();
    out.extend_from_slice(&frame.data);
    out
}

pub fn decode(bytes: &[u8]) -> Result<CameraFrame, PpmError> {
    let mut pos = 0usize;
    let magic = next_token(bytes, &mut pos)?;
    if magic != "P6" {
        return Err(PpmError::BadMagic(magic));
    }
    let width = parse_u32(&next_token(bytes, &mut pos)?, "width")?;
    let height = parse_u32(&next_token(bytes, &mut pos)?, "height")?;
    let maxval = parse_u32(&next_token(bytes, &mut pos)?, "maxval")?;
    if maxval == 0 || maxval > 255 {
        return Err(PpmError::UnsupportedMaxval(maxval));
    }
    // Exactly one whitespace byte separates the header from the raster.
    pos += 1;

    let expected = width as usize * height as usize * 3;
    let raster = bytes.get(pos..).unwrap_or_default();
    if raster.len() < expected {
        return Err(PpmError::Truncated {
            expected,
            found: raster.len(),
        });
    }

    let data = if maxval == 255 {
        raster[..expected].to_vec()
    } else {
        raster[..expected]
            .iter()
            .map(|&s| ((s as u32 * 255) / maxval).min(255) as u8)
            .collect()
    };

    Ok(CameraFrame {
        width,
        height,
        data,
    })
}

// Header tokens are whitespace-separated; `#` starts a comment that runs to
// the end of the line.
fn next_token(bytes: &[u8], pos: &mut usize) -> Result<String, PpmError> {
    loop {
        match bytes.get(*pos) {
            Some(b'#') => {
                while let Some(&b) = bytes.get(*pos) {
                    *pos += 1;
                    if b == b'\n' {
                        break;
                    }
                }
            }
            Some(b) if b.is_ascii_whitespace() => *pos += 1,
            Some(_) => break,
            None => return Err(PpmError::BadHeader("unexpected end of header".into())),
        }
    }
    let start = *pos;
    while let Some(&b) = bytes.get(*pos) {
        if b.is_ascii_whitespace() {
            break;
        }
        *pos += 1;
    }
    Ok(String::from_utf8_lossy(&bytes[start..*pos]).into_owned())
}

fn parse_u32(token: &str, field: &str) -> Result<u32, PpmError> {
    token
        .parse::<u32>()
        .map_err(|_| PpmError::BadHeader(format!("{field} is not a number: {token:?}")))
}
