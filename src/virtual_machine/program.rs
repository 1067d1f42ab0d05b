//! HIT program container.
//!
//! A [`ProgramImage`] is the whole file kept in memory: header, export table
//! and instruction bytes. Entry addresses and jump targets are absolute
//! offsets into that blob, so the interpreter indexes it directly.
//!
//! ```text
//! "HIT!" | major u32 | minor u32 | "TRAX" | count u32 | count x (track u32, addr u32) | code
//! ```

use crate::info;
use crate::types::encoding::{Decode, DecodeError, Encode};
use crate::virtual_machine::errors::VMError;
use hitvm_derive::BinaryCodec;
use std::collections::HashMap;
use std::path::Path;

/// Magic bytes identifying a HIT program.
pub const MAGIC: &[u8; 4] = b"HIT!";

/// Tag opening the export table section.
pub const SECTION_TAG: &[u8; 4] = b"TRAX";

/// Format version written by [`ProgramImage::new`].
const CURRENT_VERSION: Version = Version::new(1, 0);

/// Bytes before the first export entry.
const FIXED_HEADER_LEN: usize = 20;

/// Container format version. Only the major number is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
struct Version {
    major: u32,
    minor: u32,
}

impl Version {
    const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

/// One row of the export table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub struct ExportEntry {
    pub track_id: u32,
    /// Absolute entry offset; 0 marks a track played without bytecode.
    pub address: u32,
}

/// Parsed, immutable HIT program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    data: Vec<u8>,
    exports: Vec<ExportEntry>,
    by_track: HashMap<u32, u32>,
    code_start: usize,
}

impl ProgramImage {
    /// Size of the header for a table of `export_count` entries.
    pub const fn header_len(export_count: usize) -> usize {
        FIXED_HEADER_LEN + export_count * 8
    }

    /// Builds an image from an export table and the code that follows it.
    ///
    /// Addresses must already be absolute (see [`header_len`](Self::header_len)).
    pub fn new(exports: Vec<ExportEntry>, code: &[u8]) -> Result<Self, VMError> {
        let mut out = Vec::with_capacity(Self::header_len(exports.len()) + code.len());
        write_header(&mut out, &exports);
        out.extend_from_slice(code);
        Self::from_bytes(&out)
    }

    /// Image with no exports and no code.
    ///
    /// Owns subroutines spawned for tracks that no loaded program exports.
    pub fn empty() -> Self {
        let mut data = Vec::with_capacity(FIXED_HEADER_LEN);
        write_header(&mut data, &[]);
        Self {
            data,
            exports: Vec::new(),
            by_track: HashMap::new(),
            code_start: FIXED_HEADER_LEN,
        }
    }

    /// Parses and validates a container.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VMError> {
        let mut input = bytes;
        if input.len() < FIXED_HEADER_LEN {
            return Err(malformed("truncated"));
        }

        if &<[u8; 4]>::decode(&mut input)? != MAGIC {
            return Err(malformed("bad magic"));
        }

        let version = Version::decode(&mut input)?;
        if version.major != CURRENT_VERSION.major {
            return Err(malformed("unsupported version"));
        }

        if &<[u8; 4]>::decode(&mut input)? != SECTION_TAG {
            return Err(malformed("bad section"));
        }

        let exports = Vec::<ExportEntry>::decode(&mut input).map_err(|e| match e {
            DecodeError::UnexpectedEof => malformed("export table truncated"),
            other => VMError::from(other),
        })?;

        let code_start = Self::header_len(exports.len());
        let mut by_track = HashMap::with_capacity(exports.len());
        for entry in &exports {
            let address = entry.address as usize;
            if entry.address != 0 && (address < code_start || address >= bytes.len()) {
                return Err(malformed("export address out of range"));
            }
            by_track.entry(entry.track_id).or_insert(entry.address);
        }

        info!(
            "loaded HIT program v{}.{}: {} exports, {} code bytes",
            version.major,
            version.minor,
            exports.len(),
            bytes.len() - code_start
        );

        Ok(Self {
            data: bytes.to_vec(),
            exports,
            by_track,
            code_start,
        })
    }

    /// Reads and parses a container from disk.
    pub fn from_file(path: &Path) -> Result<Self, VMError> {
        let bytes = std::fs::read(path).map_err(|e| VMError::IoError {
            path: path.display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Serialized form, identical to what was parsed.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// The whole image; instruction pointers index into this.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Offset of the first instruction byte.
    pub fn code_start(&self) -> usize {
        self.code_start
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    /// Entry address for `track_id`. When a track is listed twice the first row wins.
    pub fn entry_address(&self, track_id: u32) -> Option<u32> {
        self.by_track.get(&track_id).copied()
    }
}

fn write_header(out: &mut Vec<u8>, exports: &[ExportEntry]) {
    MAGIC.encode(out);
    CURRENT_VERSION.encode(out);
    SECTION_TAG.encode(out);
    (exports.len() as u32).encode(out);
    for entry in exports {
        entry.encode(out);
    }
}

fn malformed(reason: &str) -> VMError {
    VMError::MalformedProgram {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::isa::Instruction;

    fn reason(err: VMError) -> String {
        match err {
            VMError::MalformedProgram { reason } => reason,
            other => panic!("expected MalformedProgram, got {other:?}"),
        }
    }

    fn header(count: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        MAGIC.encode(&mut bytes);
        CURRENT_VERSION.encode(&mut bytes);
        SECTION_TAG.encode(&mut bytes);
        count.encode(&mut bytes);
        bytes
    }

    #[test]
    fn new_lays_out_header_then_code() {
        let code_at = ProgramImage::header_len(1) as u32;
        let image = ProgramImage::new(
            vec![ExportEntry {
                track_id: 7,
                address: code_at,
            }],
            &[Instruction::End as u8],
        )
        .unwrap();

        let bytes = image.bytes();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(&bytes[12..16], SECTION_TAG);
        assert_eq!(image.code_start(), 28);
        assert_eq!(bytes[image.code_start()], Instruction::End as u8);
        assert_eq!(image.entry_address(7), Some(code_at));
        assert_eq!(image.entry_address(8), None);
    }

    #[test]
    fn empty_image_parses_back() {
        let image = ProgramImage::empty();
        assert_eq!(image.code_start(), ProgramImage::header_len(0));
        assert_eq!(ProgramImage::from_bytes(image.bytes()).unwrap(), image);
    }

    #[test]
    fn parsed_bytes_survive_unchanged() {
        let image = ProgramImage::new(vec![], &[0x0E, 0x0B]).unwrap();
        let reparsed = ProgramImage::from_bytes(&image.to_bytes()).unwrap();
        assert_eq!(reparsed, image);
    }

    #[test]
    fn zero_address_is_simple_mode_entry() {
        let image = ProgramImage::new(
            vec![ExportEntry {
                track_id: 3,
                address: 0,
            }],
            &[],
        )
        .unwrap();
        assert_eq!(image.entry_address(3), Some(0));
    }

    #[test]
    fn duplicate_tracks_keep_first_row() {
        let start = ProgramImage::header_len(2) as u32;
        let image = ProgramImage::new(
            vec![
                ExportEntry {
                    track_id: 1,
                    address: start,
                },
                ExportEntry {
                    track_id: 1,
                    address: start + 1,
                },
            ],
            &[0x0E, 0x0B],
        )
        .unwrap();
        assert_eq!(image.entry_address(1), Some(start));
        assert_eq!(image.exports().len(), 2);
    }

    #[test]
    fn from_bytes_truncated() {
        let err = ProgramImage::from_bytes(b"HIT!").unwrap_err();
        assert_eq!(reason(err), "truncated");
    }

    #[test]
    fn from_bytes_bad_magic() {
        let mut bytes = header(0);
        bytes[..4].copy_from_slice(b"HAT!");
        assert_eq!(reason(ProgramImage::from_bytes(&bytes).unwrap_err()), "bad magic");
    }

    #[test]
    fn from_bytes_unsupported_version() {
        let mut bytes = header(0);
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(
            reason(ProgramImage::from_bytes(&bytes).unwrap_err()),
            "unsupported version"
        );
    }

    #[test]
    fn minor_version_is_not_checked() {
        let mut bytes = header(0);
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(ProgramImage::from_bytes(&bytes).is_ok());
    }

    #[test]
    fn from_bytes_bad_section() {
        let mut bytes = header(0);
        bytes[12..16].copy_from_slice(b"SONG");
        assert_eq!(reason(ProgramImage::from_bytes(&bytes).unwrap_err()), "bad section");
    }

    #[test]
    fn from_bytes_short_export_table() {
        let mut bytes = header(2);
        bytes.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            reason(ProgramImage::from_bytes(&bytes).unwrap_err()),
            "export table truncated"
        );
    }

    #[test]
    fn from_bytes_address_outside_image() {
        let mut bytes = header(1);
        ExportEntry {
            track_id: 5,
            address: 500,
        }
        .encode(&mut bytes);
        bytes.push(Instruction::End as u8);
        assert_eq!(
            reason(ProgramImage::from_bytes(&bytes).unwrap_err()),
            "export address out of range"
        );
    }

    #[test]
    fn from_bytes_address_inside_header() {
        let mut bytes = header(1);
        ExportEntry {
            track_id: 5,
            address: 4,
        }
        .encode(&mut bytes);
        bytes.push(Instruction::End as u8);
        assert_eq!(
            reason(ProgramImage::from_bytes(&bytes).unwrap_err()),
            "export address out of range"
        );
    }
}
