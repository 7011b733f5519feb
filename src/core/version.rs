use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Signature of the `VS_FIXEDFILEINFO` block inside a PE version resource.
const FIXED_FILE_INFO_SIGNATURE: u32 = 0xFEEF_04BD;

/// Bytes goblin needs to recognise a binary format.
const HINT_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version segment '{0}' is not a number")]
    NotNumeric(String),
    #[error("version segment {0} exceeds 65535")]
    SegmentTooLarge(u64),
    #[error("version '{0}' has more than four segments")]
    TooManySegments(String),
}

/// Packs a dotted version string into 64 bits, 16 bits per segment.
///
/// Missing trailing segments count as zero and an empty string is version zero.
///
/// # Arguments
/// * `version`: A version string such as `"7.2.1.0"`.
///
/// # Returns
/// The packed value with the first segment in the most significant 16 bits,
/// or a `VersionError` if a segment is not numeric or does not fit in 16 bits.
pub fn parse_version(version: &str) -> Result<u64, VersionError> {
    let version = version.trim();
    if version.is_empty() {
        return Ok(0);
    }

    let segments: Vec<&str> = version.split('.').collect();
    if segments.len() > 4 {
        return Err(VersionError::TooManySegments(version.to_string()));
    }

    let mut packed: u64 = 0;
    for (index, segment) in segments.iter().enumerate() {
        let value: u64 = segment
            .trim()
            .parse()
            .map_err(|_| VersionError::NotNumeric(segment.to_string()))?;
        if value > 0xFFFF {
            return Err(VersionError::SegmentTooLarge(value));
        }
        packed |= value << (48 - 16 * index);
    }
    Ok(packed)
}

/// Drops the fourth segment, which the installer ignores when comparing versions.
pub fn significant_part(packed: u64) -> u64 {
    packed & !0xFFFF
}

/// True for an explicit `0.0.0.0`-style version. Empty strings are not zero versions.
pub fn is_zero_version(version: &str) -> bool {
    !version.trim().is_empty() && matches!(parse_version(version), Ok(0))
}

/// Reads the file version of a PE image, or an empty string for anything else.
///
/// Only the format header is read from files that are not PE images.
pub fn read_file_version(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    version_from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn version_from_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut header = [0u8; HINT_LEN];
    let filled = read_up_to(&mut reader, &mut header)?;
    if filled < HINT_LEN || !is_pe(&header) {
        return Ok(String::new());
    }

    let mut data = header.to_vec();
    reader.read_to_end(&mut data)?;
    Ok(version_from_bytes(&data).unwrap_or_default())
}

/// Fills `buffer` as far as the input allows and returns the byte count.
fn read_up_to<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn is_pe(header: &[u8; HINT_LEN]) -> bool {
    match goblin::peek_bytes(header) {
        Ok(goblin::Hint::PE) => true,
        Ok(_) => false,
        Err(e) => {
            log::debug!("Failed to detect binary format: {e}");
            false
        }
    }
}

/// Extracts `a.b.c.d` from the fixed file info of a PE image.
pub fn version_from_bytes(data: &[u8]) -> Option<String> {
    let header: &[u8; HINT_LEN] = data.get(0..HINT_LEN).and_then(|slice| slice.try_into().ok())?;
    if !is_pe(header) {
        return None;
    }

    let signature = FIXED_FILE_INFO_SIGNATURE.to_le_bytes();
    let offset = data.windows(4).position(|window| window == signature)?;

    // dwSignature, dwStrucVersion, dwFileVersionMS, dwFileVersionLS
    let ms = read_u32(data, offset + 8)?;
    let ls = read_u32(data, offset + 12)?;

    Some(format!(
        "{}.{}.{}.{}",
        ms >> 16,
        ms & 0xFFFF,
        ls >> 16,
        ls & 0xFFFF
    ))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}
