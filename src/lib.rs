//! Read-only StuffIt (.sit) archive reader.
//!
//! This crate parses the classic Macintosh StuffIt container format and
//! extracts entry contents, exposing both the data fork and the resource
//! fork of each entry together with its Finder metadata (type, creator,
//! flags).
//!
//! # Supported compression methods
//!
//! - **Method 0** - No compression (store)
//! - **Method 13** - "TableHuff": prefix codes with overflow trees over a
//!   64 KiB LZ77 window
//! - **Method 14** - "Installer": two-table Huffman with length/distance
//!   side tables over a 256 KiB LZ77 window
//!
//! Encrypted entries and other compression methods are rejected with a typed
//! error. Writing archives is out of scope.
//!
//! # Example
//!
//! ```no_run
//! use unsit::SitArchive;
//!
//! let file = std::fs::File::open("archive.sit").unwrap();
//! let archive = SitArchive::open(file, false).unwrap();
//!
//! for path in archive.list_members() {
//!     println!("{}", path);
//! }
//! let bytes = archive.read_data_fork("Read Me").unwrap();
//! ```

use encoding_rs::MACINTOSH;
use log::{debug, warn};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;
use thiserror::Error;

/// Errors that can occur while opening or reading a StuffIt archive.
#[derive(Error, Debug)]
pub enum SitError {
    /// The first four bytes are not a known StuffIt signature.
    #[error("unknown StuffIt signature")]
    UnknownMagic,

    /// The archive structure is malformed.
    #[error("corrupt archive header: {0}")]
    CorruptHeader(&'static str),

    /// The requested path (or resource fork) is not in the archive.
    #[error("entry not found in archive")]
    NotFound,

    /// The entry is encrypted; decryption is not supported.
    #[error("encrypted StuffIt entries are not supported")]
    EncryptionUnsupported,

    /// The entry uses a compression method other than 0, 13 or 14.
    #[error("unsupported StuffIt compression method {0}")]
    UnsupportedCompression(u8),

    /// The compressed bit stream is malformed.
    #[error("decode error: {0}")]
    Decode(&'static str),

    /// The decompressed bytes do not match the CRC stored in the entry header.
    #[error("CRC mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    CrcMismatch { stored: u16, computed: u16 },

    /// An I/O error occurred on the backing stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Compression method: store (no compression).
pub const METHOD_STORE: u8 = 0;
/// Compression method: TableHuff (StuffIt native LZ77 + prefix codes).
pub const METHOD_TABLE_HUFF: u8 = 13;
/// Compression method: Installer (block-structured two-table Huffman).
pub const METHOD_INSTALLER: u8 = 14;

// Known StuffIt FourCC signatures. 11H Mac uses ST46, EMI Mac uses ST65.
const MAGIC_NUMBERS: [u32; 9] = [
    fourcc(b"SIT!"),
    fourcc(b"ST65"),
    fourcc(b"ST50"),
    fourcc(b"ST60"),
    fourcc(b"STin"),
    fourcc(b"STi2"),
    fourcc(b"STi3"),
    fourcc(b"STi4"),
    fourcc(b"ST46"),
];
const SECONDARY_MAGIC: u32 = fourcc(b"rLau");

const ARCHIVE_HEADER_SIZE: u64 = 22;
const ENTRY_HEADER_SIZE: u64 = 112;
const MAX_NAME_LENGTH: usize = 31;

// Folder markers in the compression method byte, after stripping the
// encrypted (0x80) and folder-contents-encrypted (0x10) flags.
const FOLDER_START: u8 = 32;
const FOLDER_END: u8 = 33;
const DIR_CHECK_MASK: u8 = 0x6F;

const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

// --- CRC-16 ---

// CRC-16/XMODEM: polynomial 0x1021, initial value 0, no reflection, no
// final xor. Header CRCs and fork CRCs both use it.
const CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// CRC-16/XMODEM over a byte span, one table lookup per input byte.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(0, data)
}

/// Roll an existing CRC-16/XMODEM value forward over more bytes.
#[must_use]
pub fn crc16_update(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |crc, &b| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) ^ b as u16) as usize]
    })
}

// --- Finder metadata ---

/// Classic Macintosh Finder metadata attached to an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacFinderInfo {
    /// Four-character file type code (e.g. `b"TEXT"`).
    pub file_type: [u8; 4],
    /// Four-character creator code (e.g. `b"ttxt"`).
    pub creator: [u8; 4],
    /// Finder flags word.
    pub flags: u16,
}

impl MacFinderInfo {
    /// The 16-byte on-disk Finder info layout: type, creator, big-endian
    /// flags, then zeroed location and folder fields.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.file_type);
        out[4..8].copy_from_slice(&self.creator);
        out[8..10].copy_from_slice(&self.flags.to_be_bytes());
        out
    }
}

// --- Paths ---

/// A `:`-separated archive path, compared case-insensitively.
#[derive(Debug, Clone)]
pub struct SitPath(String);

impl SitPath {
    /// The path as originally spelled in the archive.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars().flat_map(|c| c.to_lowercase())
    }
}

impl From<&str> for SitPath {
    fn from(s: &str) -> Self {
        SitPath(s.to_string())
    }
}

impl From<String> for SitPath {
    fn from(s: String) -> Self {
        SitPath(s)
    }
}

impl fmt::Display for SitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for SitPath {
    fn eq(&self, other: &Self) -> bool {
        self.folded().eq(other.folded())
    }
}

impl Eq for SitPath {}

impl PartialOrd for SitPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SitPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

// --- Entry descriptors ---

/// One fork's compressed extent and decoding parameters.
#[derive(Debug, Clone, Copy, Default)]
struct FileEntryFork {
    uncompressed_size: u32,
    compressed_size: u32,
    offset: u64,
    crc: u16,
    compression: u8,
}

/// Data fork plus resource fork. Either may be absent
/// (`uncompressed_size == 0`).
#[derive(Debug, Clone, Copy, Default)]
struct FileEntry {
    data_fork: FileEntryFork,
    res_fork: FileEntryFork,
}

// --- Archive ---

/// A parsed StuffIt archive over a seekable byte stream.
///
/// The archive is immutable after [`SitArchive::open`]. Entry contents are
/// decompressed on demand by the `read_*` methods; concurrent reads
/// serialize on the shared stream cursor.
#[derive(Debug)]
pub struct SitArchive<R: Read + Seek> {
    stream: Mutex<R>,
    map: BTreeMap<SitPath, FileEntry>,
    metadata: BTreeMap<SitPath, MacFinderInfo>,
    flatten_tree: bool,
}

impl<R: Read + Seek> SitArchive<R> {
    /// Parse the archive headers and build the entry table.
    ///
    /// With `flatten_tree` set, folder nesting is ignored and entries are
    /// keyed by their final path component only.
    pub fn open(mut stream: R, flatten_tree: bool) -> Result<Self, SitError> {
        let stream_len = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(0))?;

        let magic = read_u32_be(&mut stream)?;
        if !MAGIC_NUMBERS.contains(&magic) {
            return Err(SitError::UnknownMagic);
        }

        let _file_count = read_u16_be(&mut stream)?;
        let archive_size = read_u32_be(&mut stream)? as u64;

        if read_u32_be(&mut stream)? != SECONDARY_MAGIC {
            return Err(SitError::CorruptHeader("secondary magic mismatch"));
        }

        let _version = read_u8(&mut stream)?;
        stream.seek(SeekFrom::Current(7))?;

        let mut map: BTreeMap<SitPath, FileEntry> = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        let mut dir_prefix = String::new();

        let bound = archive_size.min(stream_len);
        let mut pos = ARCHIVE_HEADER_SIZE;

        while pos < bound {
            if pos + ENTRY_HEADER_SIZE > bound {
                return Err(SitError::CorruptHeader("entry header crosses archive bound"));
            }

            let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
            stream.read_exact(&mut header)?;

            let stored_crc = be16(&header, 110);
            let computed_crc = crc16(&header[..110]);
            if stored_crc != computed_crc {
                return Err(SitError::CorruptHeader("entry header CRC mismatch"));
            }

            let res_compression = header[0];
            let data_compression = header[1];
            let name_len = header[2] as usize;
            if name_len > MAX_NAME_LENGTH {
                return Err(SitError::CorruptHeader("file name too long"));
            }
            let name = MACINTOSH.decode(&header[3..3 + name_len]).0.into_owned();

            let dir_check = data_compression & DIR_CHECK_MASK;
            if dir_check == FOLDER_START {
                if !flatten_tree {
                    dir_prefix.push_str(&name);
                    dir_prefix.push(':');
                }
                pos += ENTRY_HEADER_SIZE;
                continue;
            }
            if dir_check == FOLDER_END {
                if !flatten_tree && !dir_prefix.is_empty() {
                    // Pop the last component: keep everything up to and
                    // including the second-to-last separator.
                    let trimmed = &dir_prefix[..dir_prefix.len() - 1];
                    let keep = trimmed.rfind(':').map_or(0, |i| i + 1);
                    dir_prefix.truncate(keep);
                }
                pos += ENTRY_HEADER_SIZE;
                continue;
            }

            let mut file_type = [0u8; 4];
            file_type.copy_from_slice(&header[66..70]);
            let mut creator = [0u8; 4];
            creator.copy_from_slice(&header[70..74]);
            let finfo = MacFinderInfo {
                file_type,
                creator,
                flags: be16(&header, 74),
            };

            let res_uncompressed_size = be32(&header, 84);
            let data_uncompressed_size = be32(&header, 88);
            let res_compressed_size = be32(&header, 92);
            let data_compressed_size = be32(&header, 96);
            let res_crc = be16(&header, 100);
            let data_crc = be16(&header, 102);

            let body_offset = pos + ENTRY_HEADER_SIZE;
            let body_len = res_compressed_size as u64 + data_compressed_size as u64;
            if body_offset + body_len > archive_size {
                return Err(SitError::CorruptHeader("entry data crosses archive bound"));
            }

            if (res_compression | data_compression) & 0xF0 != 0 {
                warn!("StuffIt entry '{}' is encrypted and will not be readable", name);
            }

            let full_name = if flatten_tree || dir_prefix.is_empty() {
                name
            } else {
                format!("{dir_prefix}{name}")
            };
            let path = SitPath::from(full_name);

            metadata.insert(path.clone(), finfo);

            if data_uncompressed_size != 0 || res_uncompressed_size != 0 {
                let entry = map.entry(path.clone()).or_default();

                if data_uncompressed_size != 0 {
                    entry.data_fork = FileEntryFork {
                        uncompressed_size: data_uncompressed_size,
                        compressed_size: data_compressed_size,
                        offset: body_offset + res_compressed_size as u64,
                        crc: data_crc,
                        compression: data_compression,
                    };
                    debug!(
                        "StuffIt entry '{}' data fork, compression {}",
                        path, data_compression
                    );
                }

                if res_uncompressed_size != 0 {
                    entry.res_fork = FileEntryFork {
                        uncompressed_size: res_uncompressed_size,
                        compressed_size: res_compressed_size,
                        offset: body_offset,
                        crc: res_crc,
                        compression: res_compression,
                    };
                    debug!(
                        "StuffIt entry '{}' resource fork, compression {}",
                        path, res_compression
                    );
                }
            }

            pos = body_offset + body_len;
            stream.seek(SeekFrom::Start(pos))?;
        }

        Ok(SitArchive {
            stream: Mutex::new(stream),
            map,
            metadata,
            flatten_tree,
        })
    }

    /// Paths of all registered entries, in stable (case-folded) order.
    pub fn list_members(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(SitPath::as_str)
    }

    /// Whether an entry exists under the given path (case-insensitive).
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        self.map.contains_key(&SitPath::from(path))
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the archive contains no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Finder metadata for an entry, if present.
    #[must_use]
    pub fn finder_info(&self, path: &str) -> Option<MacFinderInfo> {
        self.metadata.get(&SitPath::from(path)).copied()
    }

    /// Uncompressed size of the entry's data fork.
    #[must_use]
    pub fn data_fork_size(&self, path: &str) -> Option<u32> {
        self.map
            .get(&SitPath::from(path))
            .map(|e| e.data_fork.uncompressed_size)
    }

    /// Uncompressed size of the entry's resource fork.
    #[must_use]
    pub fn resource_fork_size(&self, path: &str) -> Option<u32> {
        self.map
            .get(&SitPath::from(path))
            .map(|e| e.res_fork.uncompressed_size)
    }

    /// The in-archive path separator.
    #[must_use]
    pub fn path_separator(&self) -> char {
        ':'
    }

    /// Map an external path to the key it is stored under: the last path
    /// component when the tree is flattened, the path itself otherwise.
    #[must_use]
    pub fn translate_path<'p>(&self, path: &'p str) -> &'p str {
        if self.flatten_tree {
            path.rsplit(':').next().unwrap_or(path)
        } else {
            path
        }
    }

    /// Decompress and return the entry's data fork.
    ///
    /// An entry without a data fork reads as empty.
    pub fn read_data_fork(&self, path: &str) -> Result<Vec<u8>, SitError> {
        self.read_fork(path, false)
    }

    /// Decompress and return the entry's resource fork.
    ///
    /// An entry without a resource fork yields [`SitError::NotFound`].
    pub fn read_resource_fork(&self, path: &str) -> Result<Vec<u8>, SitError> {
        self.read_fork(path, true)
    }

    fn read_fork(&self, path: &str, is_res: bool) -> Result<Vec<u8>, SitError> {
        let entry = self
            .map
            .get(&SitPath::from(path))
            .ok_or(SitError::NotFound)?;
        let fork = if is_res {
            &entry.res_fork
        } else {
            &entry.data_fork
        };

        if fork.uncompressed_size == 0 {
            // No data fork means an empty file; no resource fork means there
            // is nothing to read.
            return if is_res {
                Err(SitError::NotFound)
            } else {
                Ok(Vec::new())
            };
        }

        if fork.compression & 0xF0 != 0 {
            return Err(SitError::EncryptionUnsupported);
        }

        let mut compressed = vec![0u8; fork.compressed_size as usize];
        {
            let mut stream = match self.stream.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            stream.seek(SeekFrom::Start(fork.offset))?;
            stream.read_exact(&mut compressed)?;
        }

        let uncompressed_size = fork.uncompressed_size as usize;
        let output = match fork.compression & 0x0F {
            METHOD_STORE => {
                if compressed.len() < uncompressed_size {
                    return Err(SitError::Decode("stored fork shorter than declared size"));
                }
                compressed.truncate(uncompressed_size);
                compressed
            }
            METHOD_TABLE_HUFF => decompress13(&compressed, uncompressed_size)?,
            METHOD_INSTALLER => decompress14(&compressed, uncompressed_size)?,
            other => return Err(SitError::UnsupportedCompression(other)),
        };

        let computed = crc16(&output);
        if computed != fork.crc {
            return Err(SitError::CrcMismatch {
                stored: fork.crc,
                computed,
            });
        }

        Ok(output)
    }
}

// Byte-stream helpers

fn read_u8<T: Read>(r: &mut T) -> Result<u8, std::io::Error> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16_be<T: Read>(r: &mut T) -> Result<u16, std::io::Error> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32_be<T: Read>(r: &mut T) -> Result<u32, std::io::Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn be16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn be32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

// --- BitReader ---

/// LSB-first bit extraction over a byte slice. Reads past the end yield
/// zero bits; `eof` reports once every real bit has been consumed.
struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: u64,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader { data, bit_pos: 0 }
    }

    fn peek_bits(&self, n: u32) -> u32 {
        debug_assert!(n <= 32);
        let shift = (self.bit_pos % 8) as u32;
        let mut byte = (self.bit_pos / 8) as usize;
        let mut acc: u64 = 0;
        let mut filled: u32 = 0;
        while filled < n + shift && byte < self.data.len() {
            acc |= (self.data[byte] as u64) << filled;
            filled += 8;
            byte += 1;
        }
        ((acc >> shift) & ((1u64 << n) - 1)) as u32
    }

    fn get_bits(&mut self, n: u32) -> u32 {
        let value = self.peek_bits(n);
        self.bit_pos += u64::from(n);
        value
    }

    fn get_bit(&mut self) -> u8 {
        self.get_bits(1) as u8
    }

    fn align_to_byte(&mut self) {
        self.bit_pos = (self.bit_pos + 7) & !7;
    }

    fn pos_bits(&self) -> u64 {
        self.bit_pos
    }

    fn eof(&self) -> bool {
        self.bit_pos >= self.data.len() as u64 * 8
    }
}

// --- Method 13: TableHuff ---
//
// Three prefix-code tables drive the decode loop: one for literals and
// length symbols, a second selected right after a match, and one for
// distance classes. Codes up to 12 bits resolve through a 4096-entry direct
// lookup; longer codes continue bit-by-bit through an arena of overflow
// tree nodes.

const M13_TABLE_SIZE: usize = 1 << 12;
const M13_ALPHABET: usize = 0x141;
const M13_NODE_POOL: usize = 0x704;
const M13_WINDOW_SIZE: usize = 0x10000;
const M13_END_OF_STREAM: u16 = 0x140;
const M13_OVERFLOW_MARK: i8 = 0x1F;

/// Bit order of a nibble reversed, used to flip canonical codes to LSB-first.
const NIBBLE_REVERSE: [u8; 16] = [0, 8, 4, 12, 2, 10, 6, 14, 1, 9, 5, 13, 3, 11, 7, 15];

/// Prefix codes of the fixed 37-symbol alphabet that describes the shape of
/// the dynamic method-13 trees, paired with their bit lengths.
const TREE_SHAPE_CODES: [u16; 37] = [
    0x5D8, 0x058, 0x040, 0x0C0, 0x000, 0x078, 0x02B, 0x014,
    0x00C, 0x01C, 0x01B, 0x00B, 0x010, 0x020, 0x038, 0x018,
    0x0D8, 0xBD8, 0x180, 0x680, 0x380, 0xF80, 0x780, 0x480,
    0x080, 0x280, 0x3D8, 0xFD8, 0x7D8, 0x9D8, 0x1D8, 0x004,
    0x001, 0x002, 0x007, 0x003, 0x008,
];
const TREE_SHAPE_BITS: [u8; 37] = [
    11, 8, 8, 8, 8, 7, 6, 5, 5, 5, 5, 6, 5, 6, 7, 7,
    9, 12, 10, 11, 11, 12, 12, 11, 11, 11, 12, 12, 12, 12, 12, 5,
    2, 2, 3, 4, 5,
];

/// Byte offsets of the five pre-shipped method-13 code-length tables inside
/// the packed blob, and the distance-alphabet width each table uses.
const STATIC_TABLE_POS: [usize; 5] = [0, 330, 661, 991, 1323];
const STATIC_DIST_WIDTHS: [usize; 5] = [11, 13, 14, 11, 11];

/// Nibble-packed, delta-coded code lengths for the five static method-13
/// table sets. The bit patterns are the format; do not touch.
const STATIC_LENGTHS_BLOB: [u8; 1655] = [
    0xB8, 0x98, 0x78, 0x77, 0x75, 0x97, 0x76, 0x87, 0x77, 0x77, 0x77, 0x78, 0x67, 0x87, 0x68, 0x67,
    0x3B, 0x77, 0x78, 0x67, 0x77, 0x77, 0x77, 0x59, 0x76, 0x87, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77,
    0x76, 0x87, 0x67, 0x87, 0x77, 0x77, 0x75, 0x88, 0x59, 0x75, 0x79, 0x77, 0x78, 0x68, 0x77, 0x67,
    0x73, 0xB6, 0x65, 0xB6, 0x76, 0x97, 0x67, 0x47, 0x9A, 0x2A, 0x4A, 0x87, 0x77, 0x78, 0x67, 0x86,
    0x78, 0x77, 0x77, 0x77, 0x68, 0x77, 0x77, 0x77, 0x68, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77,
    0x68, 0x77, 0x77, 0x77, 0x67, 0x87, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x68, 0x77, 0x77,
    0x68, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77,
    0x68, 0x77, 0x77, 0x77, 0x77, 0x77, 0x67, 0x87, 0x68, 0x77, 0x77, 0x77, 0x68, 0x77, 0x68, 0x63,
    0x86, 0x7A, 0x87, 0x77, 0x77, 0x87, 0x76, 0x87, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77,
    0x77, 0x76, 0x86, 0x77, 0x86, 0x86, 0x86, 0x86, 0x87, 0x76, 0x86, 0x87, 0x67, 0x74, 0xA7, 0x86,
    0x36, 0x88, 0x78, 0x76, 0x87, 0x76, 0x96, 0x87, 0x77, 0x84, 0xA6, 0x86, 0x87, 0x76, 0x92, 0xB5,
    0x94, 0xA6, 0x96, 0x85, 0x78, 0x75, 0x96, 0x86, 0x86, 0x75, 0xA7, 0x67, 0x87, 0x85, 0x87, 0x85,
    0x95, 0x77, 0x77, 0x85, 0xA3, 0xA7, 0x93, 0x87, 0x86, 0x94, 0x85, 0xA8, 0x67, 0x85, 0xA5, 0x95,
    0x86, 0x68, 0x67, 0x77, 0x96, 0x78, 0x75, 0x86, 0x77, 0xA5, 0x67, 0x87, 0x85, 0xA6, 0x75, 0x96,
    0x85, 0x87, 0x95, 0x95, 0x87, 0x86, 0x94, 0xA5, 0x86, 0x85, 0x87, 0x86, 0x86, 0x86, 0x86, 0x77,
    0x67, 0x76, 0x66, 0x9A, 0x75, 0xA5, 0x94, 0x97, 0x76, 0x96, 0x76, 0x95, 0x86, 0x77, 0x86, 0x87,
    0x75, 0xA5, 0x96, 0x85, 0x86, 0x96, 0x86, 0x86, 0x85, 0x96, 0x86, 0x76, 0x95, 0x86, 0x95, 0x95,
    0x95, 0x87, 0x76, 0x87, 0x76, 0x96, 0x85, 0x78, 0x75, 0xA6, 0x85, 0x86, 0x95, 0x86, 0x95, 0x86,
    0x45, 0x69, 0x78, 0x77, 0x87, 0x67, 0x69, 0x58, 0x79, 0x68, 0x78, 0x87, 0x78, 0x66, 0x88, 0x68,
    0x68, 0x77, 0x76, 0x87, 0x68, 0x68, 0x69, 0x58, 0x5A, 0x4B, 0x76, 0x88, 0x69, 0x67, 0xA7, 0x70,
    0x9F, 0x90, 0xA4, 0x84, 0x77, 0x77, 0x77, 0x89, 0x17, 0x77, 0x7B, 0xA7, 0x86, 0x87, 0x77, 0x68,
    0x68, 0x69, 0x67, 0x78, 0x77, 0x78, 0x76, 0x87, 0x77, 0x76, 0x73, 0xB6, 0x87, 0x96, 0x66, 0x87,
    0x76, 0x85, 0x87, 0x78, 0x77, 0x77, 0x86, 0x77, 0x86, 0x78, 0x66, 0x76, 0x77, 0x87, 0x86, 0x78,
    0x76, 0x76, 0x86, 0xA5, 0x67, 0x97, 0x77, 0x87, 0x87, 0x76, 0x66, 0x59, 0x67, 0x59, 0x77, 0x6A,
    0x65, 0x86, 0x78, 0x94, 0x77, 0x88, 0x77, 0x78, 0x86, 0x86, 0x76, 0x88, 0x76, 0x87, 0x67, 0x87,
    0x77, 0x77, 0x76, 0x87, 0x86, 0x77, 0x77, 0x77, 0x86, 0x86, 0x76, 0x96, 0x77, 0x77, 0x76, 0x78,
    0x86, 0x86, 0x86, 0x95, 0x86, 0x96, 0x85, 0x95, 0x86, 0x87, 0x75, 0x88, 0x77, 0x87, 0x57, 0x78,
    0x76, 0x86, 0x76, 0x96, 0x86, 0x87, 0x76, 0x87, 0x86, 0x76, 0x77, 0x86, 0x78, 0x78, 0x57, 0x87,
    0x86, 0x76, 0x85, 0xA5, 0x87, 0x76, 0x86, 0x86, 0x85, 0x86, 0x53, 0x98, 0x78, 0x78, 0x77, 0x87,
    0x79, 0x67, 0x79, 0x85, 0x87, 0x69, 0x67, 0x68, 0x78, 0x69, 0x68, 0x69, 0x58, 0x87, 0x66, 0x97,
    0x68, 0x68, 0x76, 0x85, 0x78, 0x87, 0x67, 0x97, 0x67, 0x74, 0xA2, 0x28, 0x77, 0x78, 0x77, 0x77,
    0x78, 0x68, 0x67, 0x78, 0x77, 0x78, 0x68, 0x68, 0x77, 0x59, 0x67, 0x5A, 0x68, 0x68, 0x68, 0x68,
    0x68, 0x68, 0x67, 0x77, 0x78, 0x68, 0x68, 0x78, 0x59, 0x58, 0x76, 0x77, 0x68, 0x78, 0x68, 0x59,
    0x69, 0x58, 0x68, 0x68, 0x67, 0x78, 0x77, 0x78, 0x69, 0x58, 0x68, 0x57, 0x78, 0x67, 0x78, 0x76,
    0x88, 0x58, 0x67, 0x7A, 0x46, 0x88, 0x77, 0x78, 0x68, 0x68, 0x66, 0x78, 0x78, 0x68, 0x68, 0x59,
    0x68, 0x69, 0x68, 0x59, 0x67, 0x78, 0x59, 0x58, 0x69, 0x59, 0x67, 0x68, 0x67, 0x69, 0x69, 0x57,
    0x79, 0x68, 0x59, 0x59, 0x59, 0x68, 0x68, 0x68, 0x58, 0x78, 0x67, 0x59, 0x68, 0x78, 0x59, 0x58,
    0x78, 0x58, 0x76, 0x78, 0x68, 0x68, 0x68, 0x69, 0x59, 0x67, 0x68, 0x69, 0x59, 0x59, 0x58, 0x69,
    0x59, 0x59, 0x58, 0x5A, 0x58, 0x68, 0x68, 0x59, 0x58, 0x68, 0x66, 0x47, 0x88, 0x77, 0x87, 0x77,
    0x87, 0x76, 0x87, 0x87, 0x87, 0x77, 0x77, 0x87, 0x67, 0x96, 0x78, 0x76, 0x87, 0x68, 0x77, 0x77,
    0x76, 0x86, 0x96, 0x86, 0x88, 0x77, 0x85, 0x86, 0x8B, 0x76, 0x0A, 0xF9, 0x07, 0x38, 0x57, 0x67,
    0x77, 0x78, 0x77, 0x91, 0x77, 0xD7, 0x77, 0x7A, 0x67, 0x3C, 0x68, 0x68, 0x77, 0x68, 0x78, 0x59,
    0x77, 0x68, 0x77, 0x68, 0x76, 0x77, 0x69, 0x68, 0x68, 0x68, 0x68, 0x67, 0x68, 0x68, 0x77, 0x87,
    0x77, 0x67, 0x78, 0x68, 0x67, 0x58, 0x78, 0x68, 0x77, 0x68, 0x78, 0x67, 0x68, 0x68, 0x67, 0x78,
    0x77, 0x77, 0x87, 0x77, 0x76, 0x67, 0x86, 0x85, 0x87, 0x86, 0x97, 0x58, 0x67, 0x79, 0x57, 0x77,
    0x87, 0x77, 0x87, 0x77, 0x76, 0x59, 0x78, 0x77, 0x77, 0x68, 0x77, 0x77, 0x76, 0x78, 0x77, 0x77,
    0x77, 0x76, 0x87, 0x77, 0x77, 0x68, 0x77, 0x77, 0x77, 0x67, 0x78, 0x77, 0x77, 0x77, 0x77, 0x77,
    0x77, 0x77, 0x68, 0x77, 0x76, 0x68, 0x87, 0x77, 0x77, 0x77, 0x77, 0x68, 0x77, 0x68, 0x77, 0x77,
    0x77, 0x77, 0x77, 0x77, 0x76, 0x78, 0x77, 0x77, 0x76, 0x87, 0x77, 0x77, 0x67, 0x78, 0x77, 0x77,
    0x76, 0x78, 0x67, 0x68, 0x68, 0x29, 0x77, 0x88, 0x78, 0x78, 0x77, 0x68, 0x77, 0x77, 0x77, 0x77,
    0x77, 0x77, 0x77, 0x77, 0x4A, 0x77, 0x4A, 0x74, 0x77, 0x77, 0x68, 0xA4, 0x7A, 0x47, 0x76, 0x86,
    0x78, 0x76, 0x7A, 0x4A, 0x83, 0xB2, 0x87, 0x77, 0x87, 0x76, 0x96, 0x86, 0x96, 0x76, 0x78, 0x87,
    0x77, 0x85, 0x87, 0x85, 0x96, 0x65, 0xB5, 0x95, 0x96, 0x77, 0x77, 0x86, 0x76, 0x86, 0x86, 0x87,
    0x86, 0x86, 0x76, 0x96, 0x96, 0x57, 0x77, 0x85, 0x97, 0x85, 0x86, 0xA5, 0x86, 0x85, 0x87, 0x77,
    0x68, 0x78, 0x77, 0x95, 0x86, 0x75, 0x87, 0x76, 0x86, 0x79, 0x68, 0x84, 0x96, 0x76, 0xB3, 0x87,
    0x77, 0x68, 0x86, 0xA5, 0x77, 0x56, 0xB6, 0x68, 0x85, 0x93, 0xB6, 0x95, 0x95, 0x85, 0x95, 0xA5,
    0x95, 0x95, 0x69, 0x85, 0x95, 0x85, 0x86, 0x86, 0x97, 0x84, 0x85, 0xB6, 0x84, 0xA5, 0x95, 0xA4,
    0x95, 0x95, 0x95, 0x68, 0x95, 0x66, 0xA6, 0x95, 0x95, 0x95, 0x86, 0x93, 0xB5, 0x86, 0x77, 0x94,
    0x96, 0x95, 0x96, 0x85, 0x68, 0x94, 0x87, 0x95, 0x86, 0x86, 0x93, 0xB4, 0xA3, 0xB3, 0xA6, 0x86,
    0x85, 0x85, 0x96, 0x76, 0x86, 0x64, 0x69, 0x78, 0x68, 0x78, 0x78, 0x77, 0x67, 0x79, 0x68, 0x79,
    0x59, 0x56, 0x87, 0x98, 0x68, 0x78, 0x76, 0x88, 0x68, 0x68, 0x67, 0x76, 0x87, 0x68, 0x78, 0x76,
    0x78, 0x77, 0x78, 0xA6, 0x80, 0xAF, 0x81, 0x38, 0x47, 0x67, 0x77, 0x78, 0x77, 0x89, 0x07, 0x79,
    0xB7, 0x87, 0x86, 0x86, 0x87, 0x86, 0x87, 0x76, 0x78, 0x77, 0x87, 0x66, 0x96, 0x86, 0x86, 0x74,
    0xA6, 0x87, 0x86, 0x77, 0x86, 0x77, 0x76, 0x77, 0x77, 0x87, 0x77, 0x77, 0x77, 0x77, 0x87, 0x65,
    0x78, 0x77, 0x78, 0x75, 0x88, 0x85, 0x76, 0x87, 0x95, 0x77, 0x86, 0x87, 0x86, 0x96, 0x85, 0x76,
    0x69, 0x67, 0x59, 0x77, 0x6A, 0x65, 0x86, 0x78, 0x94, 0x77, 0x88, 0x77, 0x78, 0x85, 0x96, 0x65,
    0x98, 0x77, 0x87, 0x67, 0x86, 0x77, 0x87, 0x66, 0x87, 0x86, 0x86, 0x86, 0x77, 0x86, 0x86, 0x76,
    0x87, 0x86, 0x77, 0x76, 0x87, 0x77, 0x86, 0x86, 0x86, 0x87, 0x76, 0x95, 0x86, 0x86, 0x87, 0x65,
    0x97, 0x86, 0x87, 0x76, 0x86, 0x86, 0x87, 0x75, 0x88, 0x76, 0x87, 0x76, 0x87, 0x76, 0x77, 0x77,
    0x86, 0x78, 0x76, 0x76, 0x96, 0x78, 0x76, 0x77, 0x86, 0x77, 0x77, 0x76, 0x96, 0x75, 0x95, 0x56,
    0x87, 0x87, 0x87, 0x78, 0x88, 0x67, 0x87, 0x87, 0x58, 0x87, 0x77, 0x87, 0x77, 0x76, 0x87, 0x96,
    0x59, 0x88, 0x37, 0x89, 0x69, 0x69, 0x84, 0x96, 0x67, 0x77, 0x57, 0x4B, 0x58, 0xB7, 0x80, 0x8E,
    0x0D, 0x78, 0x87, 0x77, 0x87, 0x68, 0x79, 0x49, 0x76, 0x78, 0x77, 0x5A, 0x67, 0x69, 0x68, 0x68,
    0x68, 0x4A, 0x68, 0x69, 0x67, 0x69, 0x59, 0x58, 0x68, 0x67, 0x69, 0x77, 0x77, 0x69, 0x68, 0x68,
    0x66, 0x68, 0x87, 0x68, 0x77, 0x5A, 0x68, 0x67, 0x68, 0x68, 0x67, 0x78, 0x78, 0x67, 0x6A, 0x59,
    0x67, 0x57, 0x95, 0x78, 0x77, 0x86, 0x88, 0x57, 0x77, 0x68, 0x67, 0x79, 0x76, 0x76, 0x98, 0x68,
    0x75, 0x68, 0x88, 0x58, 0x87, 0x5A, 0x57, 0x79, 0x67, 0x59, 0x78, 0x49, 0x58, 0x77, 0x79, 0x49,
    0x68, 0x59, 0x77, 0x68, 0x78, 0x48, 0x79, 0x67, 0x68, 0x59, 0x68, 0x68, 0x59, 0x75, 0x6A, 0x68,
    0x76, 0x4C, 0x67, 0x77, 0x78, 0x59, 0x69, 0x56, 0x96, 0x68, 0x68, 0x68, 0x77, 0x69, 0x67, 0x68,
    0x67, 0x78, 0x69, 0x68, 0x58, 0x59, 0x68, 0x68, 0x69, 0x49, 0x77, 0x59, 0x67, 0x69, 0x67, 0x68,
    0x65, 0x48, 0x77, 0x87, 0x86, 0x96, 0x88, 0x75, 0x87, 0x96, 0x87, 0x95, 0x87, 0x77, 0x68, 0x86,
    0x77, 0x77, 0x96, 0x68, 0x86, 0x77, 0x85, 0x5A, 0x81, 0xD5, 0x95, 0x68, 0x99, 0x74, 0x98, 0x77,
    0x09, 0xF9, 0x0A, 0x5A, 0x66, 0x58, 0x77, 0x87, 0x91, 0x77, 0x77, 0xE9, 0x77, 0x77, 0x77, 0x76,
    0x87, 0x75, 0x97, 0x77, 0x77, 0x77, 0x78, 0x68, 0x68, 0x68, 0x67, 0x3B, 0x59, 0x77, 0x77, 0x57,
    0x79, 0x57, 0x86, 0x87, 0x67, 0x97, 0x77, 0x57, 0x79, 0x77, 0x77, 0x75, 0x95, 0x77, 0x79, 0x75,
    0x97, 0x57, 0x77, 0x79, 0x58, 0x69, 0x77, 0x77, 0x77, 0x77, 0x77, 0x75, 0x86, 0x77, 0x87, 0x58,
    0x95, 0x78, 0x65, 0x8A, 0x39, 0x58, 0x87, 0x96, 0x87, 0x77, 0x77, 0x77, 0x86, 0x87, 0x76, 0x78,
    0x77, 0x77, 0x77, 0x68, 0x77, 0x77, 0x77, 0x77, 0x77, 0x68, 0x77, 0x68, 0x77, 0x67, 0x86, 0x77,
    0x78, 0x77, 0x77, 0x77, 0x77, 0x77, 0x68, 0x77, 0x77, 0x77, 0x77, 0x68, 0x77, 0x68, 0x77, 0x67,
    0x78, 0x77, 0x77, 0x68, 0x68, 0x76, 0x87, 0x68, 0x77, 0x77, 0x77, 0x68, 0x77, 0x77, 0x77, 0x77,
    0x77, 0x77, 0x77, 0x68, 0x77, 0x77, 0x77, 0x68, 0x68, 0x68, 0x76, 0x38, 0x97, 0x67, 0x79, 0x77,
    0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x78, 0x77, 0x77, 0x77, 0x77,
    0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x68, 0x72, 0xC5, 0x86, 0x86, 0x98, 0x77, 0x86, 0x78,
    0x1C, 0x85, 0x2E, 0x77, 0x77, 0x77, 0x87, 0x86, 0x76, 0x86, 0x86, 0xA0, 0xBD, 0x49, 0x97, 0x66,
    0x48, 0x88, 0x48, 0x68, 0x86, 0x78, 0x77, 0x77, 0x78, 0x66, 0xA6, 0x87, 0x83, 0x85, 0x88, 0x78,
    0x66, 0xA7, 0x56, 0x87, 0x6A, 0x46, 0x89, 0x76, 0xA7, 0x76, 0x87, 0x74, 0xA2, 0x86, 0x77, 0x79,
    0x66, 0xB6, 0x48, 0x67, 0x8A, 0x36, 0x88, 0x77, 0xA5, 0xA5, 0xB1, 0xE9, 0x39, 0x78, 0x78, 0x75,
    0x87, 0x77, 0x77, 0x77, 0x68, 0x58, 0x79, 0x69, 0x4A, 0x59, 0x29, 0x6A, 0x3C, 0x3B, 0x46, 0x78,
    0x75, 0x89, 0x76, 0x89, 0x4A, 0x56, 0x88, 0x3B, 0x66, 0x88, 0x68, 0x87, 0x57, 0x97, 0x38, 0x87,
    0x56, 0xB7, 0x84, 0x88, 0x67, 0x57, 0x95, 0xA8, 0x59, 0x77, 0x68, 0x4A, 0x49, 0x69, 0x57, 0x6A,
    0x59, 0x58, 0x67, 0x87, 0x5A, 0x75, 0x78, 0x69, 0x56, 0x97, 0x77, 0x73, 0x08, 0x78, 0x78, 0x77,
    0x87, 0x78, 0x77, 0x78, 0x77, 0x77, 0x87, 0x78, 0x68, 0x77, 0x77, 0x87, 0x78, 0x76, 0x86, 0x97,
    0x58, 0x77, 0x78, 0x58, 0x78, 0x77, 0x68, 0x78, 0x75, 0x95, 0xB7, 0x70, 0x8F, 0x80, 0xA6, 0x87,
    0x65, 0x66, 0x78, 0x7A, 0x17, 0x77, 0x70,
];

/// Direct-lookup slot: the decoded symbol and its code length in bits, or
/// the root of an overflow tree when `bits` is `M13_OVERFLOW_MARK`.
#[derive(Debug, Clone, Copy, Default)]
struct CodeSlot {
    symbol: u16,
    bits: i8,
}

/// Overflow tree node. Interior nodes keep `symbol` negative; children are
/// arena indices, with 0 meaning unallocated.
#[derive(Debug, Clone, Copy)]
struct TreeNode {
    symbol: i16,
    left: u16,
    right: u16,
}

#[derive(Debug, Clone, Copy)]
enum Sit13Table {
    Literal,
    LiteralAfterMatch,
    Distance,
}

struct Sit13Decoder {
    shape_table: Vec<CodeSlot>,
    lit_table: Vec<CodeSlot>,
    lit2_table: Vec<CodeSlot>,
    dist_table: Vec<CodeSlot>,
    nodes: Vec<TreeNode>,
    next_node: u16,
    scratch: Vec<CodeSlot>,
    window: Vec<u8>,
}

impl Sit13Decoder {
    fn new() -> Self {
        Sit13Decoder {
            shape_table: vec![CodeSlot::default(); M13_TABLE_SIZE],
            lit_table: vec![CodeSlot::default(); M13_TABLE_SIZE],
            lit2_table: vec![CodeSlot::default(); M13_TABLE_SIZE],
            dist_table: vec![CodeSlot::default(); M13_TABLE_SIZE],
            nodes: vec![
                TreeNode {
                    symbol: -1,
                    left: 0,
                    right: 0,
                };
                M13_NODE_POOL
            ],
            next_node: 1,
            scratch: vec![CodeSlot::default(); M13_ALPHABET],
            window: vec![0u8; M13_WINDOW_SIZE],
        }
    }

    /// Read one tree description via the fixed 37-symbol shape alphabet and
    /// install the resulting codes.
    fn read_dynamic_tree(
        &mut self,
        bits: &mut BitReader,
        num: usize,
        which: Sit13Table,
    ) -> Result<(), SitError> {
        let mut level: i8 = 0;
        let mut i = 0usize;

        while i < num {
            if bits.eof() {
                return Err(SitError::Decode("truncated tree description"));
            }
            let slot = self.shape_table[bits.peek_bits(12) as usize];
            if slot.bits <= 0 {
                return Err(SitError::Decode("invalid tree shape code"));
            }
            bits.get_bits(slot.bits as u32);

            match slot.symbol {
                0x1F => level = -1,
                0x20 => level = level.wrapping_add(1),
                0x21 => level = level.wrapping_sub(1),
                0x22 => {
                    if bits.get_bit() != 0 {
                        self.scratch[i].bits = level;
                        i += 1;
                    }
                }
                0x23 => {
                    let mut run = bits.get_bits(3) + 2;
                    while run > 0 && i < num {
                        self.scratch[i].bits = level;
                        i += 1;
                        run -= 1;
                    }
                }
                0x24 => {
                    let mut run = bits.get_bits(6) + 10;
                    while run > 0 && i < num {
                        self.scratch[i].bits = level;
                        i += 1;
                        run -= 1;
                    }
                }
                other => level = other as i8 + 1,
            }

            if i < num {
                self.scratch[i].bits = level;
            }
            i += 1;
        }

        for (sym, slot) in self.scratch[..num].iter_mut().enumerate() {
            slot.symbol = sym as u16;
        }
        self.build_table(num, which)
    }

    /// Install one of the five pre-shipped code-length table sets.
    fn install_static_tables(&mut self, set: usize) -> Result<(), SitError> {
        let lengths = expand_static_lengths(set);
        self.build_from_lengths(&lengths[..M13_ALPHABET], Sit13Table::Literal)?;
        self.build_from_lengths(
            &lengths[M13_ALPHABET..2 * M13_ALPHABET],
            Sit13Table::LiteralAfterMatch,
        )?;
        let dist = STATIC_DIST_WIDTHS[set];
        self.build_from_lengths(
            &lengths[2 * M13_ALPHABET..2 * M13_ALPHABET + dist],
            Sit13Table::Distance,
        )
    }

    fn build_from_lengths(&mut self, lengths: &[u8], which: Sit13Table) -> Result<(), SitError> {
        for (sym, (&len, slot)) in lengths.iter().zip(self.scratch.iter_mut()).enumerate() {
            *slot = CodeSlot {
                symbol: sym as u16,
                bits: len as i8,
            };
        }
        self.build_table(lengths.len(), which)
    }

    fn build_table(&mut self, num: usize, which: Sit13Table) -> Result<(), SitError> {
        let codes = canonical_codes(&mut self.scratch[..num]);
        for (symbol, code, len) in codes {
            let table = match which {
                Sit13Table::Literal => &mut self.lit_table,
                Sit13Table::LiteralAfterMatch => &mut self.lit2_table,
                Sit13Table::Distance => &mut self.dist_table,
            };
            table_insert(table, &mut self.nodes, &mut self.next_node, code, len, symbol)?;
        }
        Ok(())
    }

    /// The main decode loop: literals and back-references over the 64 KiB
    /// window, terminated by the end-of-stream symbol.
    fn extract(
        &mut self,
        bits: &mut BitReader,
        uncompressed_size: usize,
    ) -> Result<Vec<u8>, SitError> {
        let mut out = Vec::with_capacity(uncompressed_size);
        let mut wpos = 0usize;
        let mut after_match = false;

        while !bits.eof() {
            let table = if after_match {
                &self.lit2_table
            } else {
                &self.lit_table
            };
            let symbol = decode_prefix(bits, table, &self.nodes)?;

            if symbol < 0x100 {
                let b = symbol as u8;
                if out.len() < uncompressed_size {
                    out.push(b);
                }
                self.window[wpos] = b;
                wpos = (wpos + 1) & (M13_WINDOW_SIZE - 1);
                after_match = false;
                continue;
            }

            if symbol == M13_END_OF_STREAM {
                if out.len() != uncompressed_size {
                    return Err(SitError::Decode("short method-13 stream"));
                }
                return Ok(out);
            }

            after_match = true;
            let length = match symbol {
                0x100..=0x13D => symbol as usize - 0x100 + 3,
                0x13E => bits.get_bits(10) as usize + 65,
                _ => bits.get_bits(15) as usize + 65,
            };

            let class = decode_prefix(bits, &self.dist_table, &self.nodes)?;
            let back = if class == 0 {
                0usize
            } else {
                let extra = u32::from(class) - 1;
                ((1u32 << extra) | bits.get_bits(extra)) as usize
            };

            let mut src = wpos + M13_WINDOW_SIZE - (back + 1);
            for _ in 0..length {
                src &= M13_WINDOW_SIZE - 1;
                let b = self.window[src];
                src += 1;
                if out.len() < uncompressed_size {
                    out.push(b);
                }
                self.window[wpos] = b;
                wpos = (wpos + 1) & (M13_WINDOW_SIZE - 1);
            }
        }

        Err(SitError::Decode("stream ended before end-of-stream code"))
    }
}

/// Sort `(symbol, bit length)` pairs and assign canonical prefix codes,
/// returned bit-reversed for the LSB-first stream. Symbols with lengths
/// outside 1..=31 drop out.
fn canonical_codes(entries: &mut [CodeSlot]) -> Vec<(u16, u32, i8)> {
    entries.sort_unstable_by_key(|e| (e.bits, e.symbol));

    let mut out = Vec::with_capacity(entries.len());
    let mut acc: u32 = 0;
    let mut step: u32 = 0;
    let mut len: i8 = 0;

    for e in entries.iter() {
        acc = acc.wrapping_add(step);
        if e.bits != len {
            len = e.bits;
            step = if (1..=31).contains(&len) {
                1u32 << (32 - len as u32)
            } else {
                0
            };
        }
        if (1..=31).contains(&len) {
            // Codes live in the top bits of the accumulator; nibble-reverse
            // the whole word to get the LSB-first pattern.
            let mut code: u32 = 0;
            let mut shift = 0;
            while shift < 32 {
                code += u32::from(NIBBLE_REVERSE[((acc >> shift) & 0xF) as usize]) << (28 - shift);
                shift += 4;
            }
            out.push((e.symbol, code, len));
        }
    }
    out
}

/// Register one code in a lookup table. Short codes fill every aliasing
/// direct slot; codes longer than 12 bits spill into the overflow arena.
fn table_insert(
    table: &mut [CodeSlot],
    nodes: &mut [TreeNode],
    next_node: &mut u16,
    code: u32,
    nbits: i8,
    symbol: u16,
) -> Result<(), SitError> {
    if nbits <= 12 {
        let step = 1usize << nbits;
        let mut i = code as usize & (M13_TABLE_SIZE - 1);
        while i < M13_TABLE_SIZE {
            table[i] = CodeSlot {
                symbol,
                bits: nbits,
            };
            i += step;
        }
        return Ok(());
    }

    let root = code as usize & (M13_TABLE_SIZE - 1);
    if table[root].bits != M13_OVERFLOW_MARK {
        table[root].bits = M13_OVERFLOW_MARK;
        table[root].symbol = alloc_node(nodes, next_node)?;
    }

    let mut node = table[root].symbol as usize;
    let mut rest = code >> 12;
    for _ in 0..(nbits as u32 - 12) {
        let child = if rest & 1 != 0 {
            nodes[node].right
        } else {
            nodes[node].left
        };
        let child = if child != 0 {
            child
        } else {
            let fresh = alloc_node(nodes, next_node)?;
            if rest & 1 != 0 {
                nodes[node].right = fresh;
            } else {
                nodes[node].left = fresh;
            }
            fresh
        };
        node = child as usize;
        rest >>= 1;
    }
    nodes[node].symbol = symbol as i16;
    Ok(())
}

fn alloc_node(nodes: &[TreeNode], next_node: &mut u16) -> Result<u16, SitError> {
    let id = *next_node;
    if id as usize >= nodes.len() {
        return Err(SitError::Decode("overflow tree pool exhausted"));
    }
    *next_node += 1;
    Ok(id)
}

/// Decode one symbol: peek 12 bits into the direct table, falling through
/// to the overflow tree for longer codes.
fn decode_prefix(
    bits: &mut BitReader,
    table: &[CodeSlot],
    nodes: &[TreeNode],
) -> Result<u16, SitError> {
    let slot = table[bits.peek_bits(12) as usize];
    if slot.bits == 0 {
        return Err(SitError::Decode("unassigned prefix code"));
    }
    if slot.bits != M13_OVERFLOW_MARK {
        bits.get_bits(slot.bits as u32);
        return Ok(slot.symbol);
    }

    bits.get_bits(12);
    let mut node = slot.symbol as usize;
    loop {
        if nodes[node].symbol >= 0 {
            return Ok(nodes[node].symbol as u16);
        }
        if bits.eof() {
            return Err(SitError::Decode("truncated prefix code"));
        }
        let child = if bits.get_bit() != 0 {
            nodes[node].right
        } else {
            nodes[node].left
        };
        if child == 0 {
            return Err(SitError::Decode("invalid prefix code"));
        }
        node = child as usize;
    }
}

/// Expand one of the five nibble-packed static code-length table sets into
/// its 658 lengths (two 0x141-symbol tables plus the distance table).
fn expand_static_lengths(set: usize) -> [u8; 658] {
    let mut out = [0u8; 658];
    let mut pos = STATIC_TABLE_POS[set] * 2 + (set & 1);
    let mut level = 0u8;

    for slot in out.iter_mut() {
        let k = static_nibble(&mut pos);
        if k == 0 {
            level = level.wrapping_sub(static_nibble(&mut pos));
        } else if k == 15 {
            level = level.wrapping_add(static_nibble(&mut pos));
        } else {
            level = level.wrapping_add(k).wrapping_sub(7);
        }
        *slot = level;
    }
    out
}

fn static_nibble(pos: &mut usize) -> u8 {
    let byte = STATIC_LENGTHS_BLOB[*pos / 2];
    let nib = if *pos % 2 == 0 { byte >> 4 } else { byte & 0xF };
    *pos += 1;
    nib
}

/// Decompress a method-13 ("TableHuff") fork.
fn decompress13(data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, SitError> {
    let mut bits = BitReader::new(data);
    let mut dec = Sit13Decoder::new();

    for (sym, (&code, &nbits)) in TREE_SHAPE_CODES
        .iter()
        .zip(TREE_SHAPE_BITS.iter())
        .enumerate()
    {
        table_insert(
            &mut dec.shape_table,
            &mut dec.nodes,
            &mut dec.next_node,
            u32::from(code),
            nbits as i8,
            sym as u16,
        )?;
    }

    let header = bits.get_bits(8);
    let mode = header >> 4;
    if mode > 5 {
        return Err(SitError::Decode("invalid compression mode byte"));
    }

    if mode != 0 {
        dec.install_static_tables(mode as usize - 1)?;
    } else {
        dec.read_dynamic_tree(&mut bits, M13_ALPHABET, Sit13Table::Literal)?;
        if header & 8 != 0 {
            dec.lit2_table.copy_from_slice(&dec.lit_table);
        } else {
            dec.read_dynamic_tree(&mut bits, M13_ALPHABET, Sit13Table::LiteralAfterMatch)?;
        }
        let dist_symbols = (header & 7) as usize + 10;
        dec.read_dynamic_tree(&mut bits, dist_symbols, Sit13Table::Distance)?;
    }

    let out = dec.extract(&mut bits, uncompressed_size)?;
    debug!("method-13 stream consumed {} bits", bits.pos_bits());
    Ok(out)
}

// --- Method 14: Installer ---
//
// Block-structured: each block carries its own literal+length tree (308
// symbols) and distance tree (75 symbols), read through a compact tree
// description that may itself be Huffman coded by a meta tree. Trees are
// stored as flat traversal tables walked one bit at a time; leaves hold
// `2 * codesize + symbol`. The 256 KiB window persists across blocks.

const M14_WINDOW_SIZE: usize = 0x40000;
const M14_LITERAL_SYMBOLS: usize = 308;
const M14_DISTANCE_SYMBOLS: usize = 75;
const M14_LENGTH_CLASSES: usize = 52;
const M14_META_MAX: usize = 32;

#[derive(Debug, Clone, Copy)]
enum Sit14Tree {
    Literal,
    Distance,
    Meta,
}

struct Sit14Decoder {
    code: [u8; M14_LITERAL_SYMBOLS],
    length_extra: [u8; M14_LENGTH_CLASSES],
    length_base: [u16; M14_LENGTH_CLASSES],
    dist_extra: [u8; M14_DISTANCE_SYMBOLS],
    dist_base: [u32; M14_DISTANCE_SYMBOLS],
    lit_tree: [u16; 2 * M14_LITERAL_SYMBOLS],
    dist_tree: [u16; 2 * M14_DISTANCE_SYMBOLS],
    meta_tree: [u16; 2 * M14_META_MAX],
    window: Vec<u8>,
}

impl Sit14Decoder {
    fn new() -> Self {
        let mut dec = Sit14Decoder {
            code: [0; M14_LITERAL_SYMBOLS],
            length_extra: [0; M14_LENGTH_CLASSES],
            length_base: [0; M14_LENGTH_CLASSES],
            dist_extra: [0; M14_DISTANCE_SYMBOLS],
            dist_base: [0; M14_DISTANCE_SYMBOLS],
            lit_tree: [0; 2 * M14_LITERAL_SYMBOLS],
            dist_tree: [0; 2 * M14_DISTANCE_SYMBOLS],
            meta_tree: [0; 2 * M14_META_MAX],
            window: vec![0u8; M14_WINDOW_SIZE],
        };

        // Length classes: 4 direct lengths, then 4 classes per extra-bit
        // width; each base is the cumulative span so far.
        let mut base = 0u32;
        for i in 0..M14_LENGTH_CLASSES {
            dec.length_extra[i] = if i >= 4 { ((i - 4) >> 2) as u8 } else { 0 };
            dec.length_base[i] = base as u16;
            base += 1 << dec.length_extra[i];
        }

        // Distance classes are built the same way, starting at 1.
        let mut base = 1u32;
        for i in 0..M14_DISTANCE_SYMBOLS {
            dec.dist_extra[i] = if i >= 3 { ((i - 3) >> 2) as u8 } else { 0 };
            dec.dist_base[i] = base;
            base += 1 << dec.dist_extra[i];
        }

        dec
    }

    /// Read a tree description covering `codesize` symbols and build its
    /// traversal table. Realigns the stream to a byte boundary on exit, as
    /// does the recursive meta-tree read.
    fn read_tree(
        &mut self,
        bits: &mut BitReader,
        codesize: usize,
        target: Sit14Tree,
        depth: u32,
    ) -> Result<(), SitError> {
        if depth > 4 {
            return Err(SitError::Decode("tree description nested too deeply"));
        }
        let escape_enabled = bits.get_bit() != 0;
        let width = bits.get_bits(2) + 2;
        let offset = bits.get_bits(3) + 1;
        let size = 1usize << width;
        let max = (size - 1) as u32;
        let escape = if escape_enabled { max - 1 } else { u32::MAX };

        if bits.get_bits(2) & 1 != 0 {
            // Code-length fields are themselves Huffman coded.
            self.read_tree(bits, size, Sit14Tree::Meta, depth + 1)?;
            let leaf_base = (size * 2) as u16;

            let mut i = 0usize;
            while i < codesize {
                let v = u32::from(walk_tree(bits, &self.meta_tree[..size * 2], leaf_base)?);
                if v == escape {
                    self.code[i] = 0;
                    i += 1;
                } else if v == max {
                    let mut run =
                        u32::from(walk_tree(bits, &self.meta_tree[..size * 2], leaf_base)?) + 3;
                    while run > 0 && i < codesize {
                        self.code[i] = if i > 0 { self.code[i - 1] } else { 0 };
                        i += 1;
                        run -= 1;
                    }
                } else {
                    self.code[i] = (v + offset) as u8;
                    i += 1;
                }
            }
        } else {
            let mut i = 0usize;
            while i < codesize {
                if bits.eof() {
                    return Err(SitError::Decode("truncated tree description"));
                }
                let v = bits.get_bits(width);
                if v == escape {
                    self.code[i] = 0;
                    i += 1;
                } else if v == max {
                    let mut run = bits.get_bits(width) + 3;
                    while run > 0 && i < codesize {
                        self.code[i] = if i > 0 { self.code[i - 1] } else { 0 };
                        i += 1;
                        run -= 1;
                    }
                } else {
                    self.code[i] = (v + offset) as u8;
                    i += 1;
                }
            }
        }

        // Canonical codes over the nonzero lengths, stable in
        // (length, symbol index) order, bit-reversed for the LSB-first
        // stream.
        let mut order: Vec<(u8, u16)> = self.code[..codesize]
            .iter()
            .enumerate()
            .map(|(i, &len)| (len, i as u16))
            .collect();
        order.sort_unstable();

        let mut lsb_codes = [0u32; M14_LITERAL_SYMBOLS];
        if let Some(first) = order.iter().position(|&(len, _)| len != 0) {
            let mut canon: u32 = 0;
            for pos in first..codesize {
                let (len, sym) = order[pos];
                if pos != 0 {
                    let delta = u32::from(len - order[pos - 1].0);
                    canon = canon.checked_shl(delta).unwrap_or(0);
                }
                let mut rev: u32 = 0;
                let mut fwd = canon;
                for _ in 0..len {
                    rev = (rev << 1) | (fwd & 1);
                    fwd >>= 1;
                }
                lsb_codes[sym as usize] = rev;
                canon += 1;
            }
        }

        // Flat traversal table: interior slots point at the next node pair,
        // leaves hold 2 * codesize + symbol.
        let leaf_base = (codesize * 2) as u16;
        let mut table = vec![0u16; codesize * 2];
        let mut next: u16 = 2;
        for sym in 0..codesize {
            let len = self.code[sym];
            let mut node = 0usize;
            let mut rest = lsb_codes[sym];
            for depth in 0..len {
                node += (rest & 1) as usize;
                if depth + 1 == len {
                    table[node] = leaf_base + sym as u16;
                } else {
                    if table[node] == 0 {
                        if next as usize >= codesize * 2 {
                            return Err(SitError::Decode("tree description overflow"));
                        }
                        table[node] = next;
                        next += 2;
                    }
                    node = table[node] as usize;
                }
                rest >>= 1;
            }
        }

        match target {
            Sit14Tree::Literal => self.lit_tree.copy_from_slice(&table),
            Sit14Tree::Distance => self.dist_tree.copy_from_slice(&table),
            Sit14Tree::Meta => self.meta_tree[..table.len()].copy_from_slice(&table),
        }

        bits.align_to_byte();
        Ok(())
    }
}

/// Walk a traversal table one bit at a time until a leaf.
fn walk_tree(bits: &mut BitReader, tree: &[u16], leaf_base: u16) -> Result<u16, SitError> {
    let mut node: u16 = 0;
    loop {
        if bits.eof() {
            return Err(SitError::Decode("truncated bit stream in prefix tree"));
        }
        node = tree[(node + u16::from(bits.get_bit())) as usize];
        if node >= leaf_base {
            return Ok(node - leaf_base);
        }
    }
}

/// Decompress a method-14 ("Installer") fork.
fn decompress14(data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, SitError> {
    let mut bits = BitReader::new(data);
    let mut dec = Sit14Decoder::new();
    let mut out = Vec::with_capacity(uncompressed_size);

    let num_blocks = bits.get_bits(16);
    let mut wpos = 0usize;

    for _ in 0..num_blocks {
        if bits.eof() {
            break;
        }

        // Crunched block size; the bit stream is self-delimiting, so the
        // value goes unchecked.
        bits.get_bits(16);
        bits.get_bits(16);
        let mut remaining = bits.get_bits(16) | (bits.get_bits(16) << 16);

        dec.read_tree(&mut bits, M14_LITERAL_SYMBOLS, Sit14Tree::Literal, 0)?;
        dec.read_tree(&mut bits, M14_DISTANCE_SYMBOLS, Sit14Tree::Distance, 0)?;

        while remaining > 0 && !bits.eof() {
            let symbol =
                walk_tree(&mut bits, &dec.lit_tree, 2 * M14_LITERAL_SYMBOLS as u16)? as usize;

            if symbol < 0x100 {
                if out.len() < uncompressed_size {
                    out.push(symbol as u8);
                }
                dec.window[wpos] = symbol as u8;
                wpos = (wpos + 1) & (M14_WINDOW_SIZE - 1);
                remaining -= 1;
                continue;
            }

            let class = symbol - 0x100;
            let mut length = u32::from(dec.length_base[class]) + 4;
            if dec.length_extra[class] > 0 {
                length += bits.get_bits(u32::from(dec.length_extra[class]));
            }

            let dclass =
                walk_tree(&mut bits, &dec.dist_tree, 2 * M14_DISTANCE_SYMBOLS as u16)? as usize;
            let mut dist = dec.dist_base[dclass];
            if dec.dist_extra[dclass] > 0 {
                dist += bits.get_bits(u32::from(dec.dist_extra[dclass]));
            }

            remaining = remaining.wrapping_sub(length);

            let mut src = wpos
                .wrapping_add(M14_WINDOW_SIZE)
                .wrapping_sub(dist as usize);
            for _ in 0..length {
                src &= M14_WINDOW_SIZE - 1;
                let b = dec.window[src];
                src += 1;
                if out.len() < uncompressed_size {
                    out.push(b);
                }
                dec.window[wpos] = b;
                wpos = (wpos + 1) & (M14_WINDOW_SIZE - 1);
            }
        }

        bits.align_to_byte();
    }

    if out.len() != uncompressed_size {
        return Err(SitError::Decode("method-14 output size mismatch"));
    }
    Ok(out)
}
