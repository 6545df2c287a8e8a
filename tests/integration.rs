use std::io::Cursor;
use unsit::{crc16, SitArchive, SitError};

/// In-memory description of one entry for fixture construction.
#[derive(Default)]
struct TestEntry {
    name: Vec<u8>,
    res_compression: u8,
    data_compression: u8,
    file_type: [u8; 4],
    creator: [u8; 4],
    flags: u16,
    res_ulen: u32,
    data_ulen: u32,
    res_crc: u16,
    data_crc: u16,
    res_body: Vec<u8>,
    data_body: Vec<u8>,
}

fn folder_start(name: &str) -> TestEntry {
    TestEntry {
        name: name.as_bytes().to_vec(),
        data_compression: 32,
        ..Default::default()
    }
}

fn folder_end() -> TestEntry {
    TestEntry {
        data_compression: 33,
        ..Default::default()
    }
}

fn stored_file(name: &str, data: &[u8]) -> TestEntry {
    TestEntry {
        name: name.as_bytes().to_vec(),
        file_type: *b"TEXT",
        creator: *b"ttxt",
        data_ulen: data.len() as u32,
        data_crc: crc16(data),
        data_body: data.to_vec(),
        ..Default::default()
    }
}

/// Serialize a classic StuffIt archive: 22-byte header, then one 112-byte
/// entry header (CRC over bytes 0..110) per entry, each followed by its
/// resource fork and data fork bodies.
fn build_archive(entries: &[TestEntry]) -> Vec<u8> {
    let mut body = Vec::new();
    for e in entries {
        let mut h = [0u8; 112];
        h[0] = e.res_compression;
        h[1] = e.data_compression;
        h[2] = e.name.len() as u8;
        h[3..3 + e.name.len()].copy_from_slice(&e.name);
        h[66..70].copy_from_slice(&e.file_type);
        h[70..74].copy_from_slice(&e.creator);
        h[74..76].copy_from_slice(&e.flags.to_be_bytes());
        h[84..88].copy_from_slice(&e.res_ulen.to_be_bytes());
        h[88..92].copy_from_slice(&e.data_ulen.to_be_bytes());
        h[92..96].copy_from_slice(&(e.res_body.len() as u32).to_be_bytes());
        h[96..100].copy_from_slice(&(e.data_body.len() as u32).to_be_bytes());
        h[100..102].copy_from_slice(&e.res_crc.to_be_bytes());
        h[102..104].copy_from_slice(&e.data_crc.to_be_bytes());
        let crc = crc16(&h[..110]);
        h[110..112].copy_from_slice(&crc.to_be_bytes());
        body.extend_from_slice(&h);
        body.extend_from_slice(&e.res_body);
        body.extend_from_slice(&e.data_body);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"SIT!");
    out.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    out.extend_from_slice(&((22 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(b"rLau");
    out.push(0); // version
    out.extend_from_slice(&[0u8; 7]);
    out.extend_from_slice(&body);
    out
}

fn open(data: Vec<u8>, flatten: bool) -> Result<SitArchive<Cursor<Vec<u8>>>, SitError> {
    SitArchive::open(Cursor::new(data), flatten)
}

#[test]
fn bad_magic_is_rejected() {
    let err = open(vec![0u8; 64], false).unwrap_err();
    assert!(matches!(err, SitError::UnknownMagic));
}

#[test]
fn bad_secondary_magic_is_rejected() {
    let mut data = build_archive(&[]);
    data[10..14].copy_from_slice(b"xxxx");
    let err = open(data, false).unwrap_err();
    assert!(matches!(err, SitError::CorruptHeader(_)));
}

#[test]
fn empty_archive_lists_nothing() {
    let archive = open(build_archive(&[]), false).unwrap();
    assert!(archive.is_empty());
    assert_eq!(archive.list_members().count(), 0);
    assert!(!archive.has("anything"));
}

#[test]
fn stored_data_fork_round_trips() {
    let archive = open(build_archive(&[stored_file("foo.txt", b"hello")]), false).unwrap();
    assert!(archive.has("foo.txt"));
    assert_eq!(archive.data_fork_size("foo.txt"), Some(5));
    assert_eq!(archive.read_data_fork("foo.txt").unwrap(), b"hello");

    let info = archive.finder_info("foo.txt").unwrap();
    assert_eq!(info.file_type, *b"TEXT");
    assert_eq!(info.creator, *b"ttxt");
}

#[test]
fn header_crc_mismatch_is_rejected() {
    let mut data = build_archive(&[stored_file("foo.txt", b"hello")]);
    data[22 + 74] ^= 1; // flip a Finder flag bit without fixing the CRC
    let err = open(data, false).unwrap_err();
    assert!(matches!(err, SitError::CorruptHeader(_)));
}

#[test]
fn overlong_name_is_rejected() {
    let mut data = build_archive(&[stored_file("foo.txt", b"hello")]);
    data[22 + 2] = 40;
    let crc = crc16(&data[22..22 + 110]);
    data[22 + 110..22 + 112].copy_from_slice(&crc.to_be_bytes());
    let err = open(data, false).unwrap_err();
    assert!(matches!(err, SitError::CorruptHeader(_)));
}

#[test]
fn entry_data_crossing_archive_bound_is_rejected() {
    let mut data = build_archive(&[stored_file("foo.txt", b"hello")]);
    // Shrink the declared archive size into the entry body.
    data[6..10].copy_from_slice(&(22u32 + 112 + 2).to_be_bytes());
    let err = open(data, false).unwrap_err();
    assert!(matches!(err, SitError::CorruptHeader(_)));
}

#[test]
fn folder_nesting_builds_paths() {
    let data = build_archive(&[
        folder_start("a"),
        folder_start("b"),
        stored_file("c", b"x"),
        folder_end(),
        folder_end(),
        stored_file("top", b"y"),
    ]);

    let archive = open(data.clone(), false).unwrap();
    assert!(archive.has("a:b:c"));
    assert!(!archive.has("c"));
    assert!(archive.has("top"));
    assert_eq!(archive.read_data_fork("a:b:c").unwrap(), b"x");
    assert_eq!(archive.path_separator(), ':');

    // Flattened: only the final components remain.
    let archive = open(data, true).unwrap();
    assert!(archive.has("c"));
    assert!(!archive.has("a:b:c"));
    assert_eq!(archive.read_data_fork("c").unwrap(), b"x");
    assert_eq!(archive.translate_path("a:b:c"), "c");
}

#[test]
fn lookups_are_case_insensitive() {
    let data = build_archive(&[
        folder_start("Folder"),
        stored_file("Read Me", b"hi"),
        folder_end(),
    ]);
    let archive = open(data, false).unwrap();
    assert!(archive.has("Folder:Read Me"));
    assert!(archive.has("FOLDER:READ ME"));
    assert!(archive.has("folder:read me"));
    assert_eq!(archive.read_data_fork("FOLDER:read me").unwrap(), b"hi");
}

#[test]
fn listing_is_stable() {
    let data = build_archive(&[
        stored_file("beta", b"1"),
        stored_file("Alpha", b"2"),
        stored_file("gamma", b"3"),
    ]);
    let archive = open(data, false).unwrap();
    let first: Vec<&str> = archive.list_members().collect();
    let second: Vec<&str> = archive.list_members().collect();
    assert_eq!(first, second);
    assert_eq!(first, vec!["Alpha", "beta", "gamma"]);
}

#[test]
fn macroman_names_decode() {
    // 0x8E is 'e' with acute accent in Mac-Roman.
    let mut entry = stored_file("x", b"data");
    entry.name = vec![0x8E];
    let archive = open(build_archive(&[entry]), false).unwrap();
    assert!(archive.has("\u{e9}"));
}

#[test]
fn absent_data_fork_reads_empty() {
    let rsrc = b"\x00\x00\x01\x00resource bytes";
    let entry = TestEntry {
        name: b"icons".to_vec(),
        res_ulen: rsrc.len() as u32,
        res_crc: crc16(rsrc),
        res_body: rsrc.to_vec(),
        ..Default::default()
    };
    let archive = open(build_archive(&[entry]), false).unwrap();
    assert_eq!(archive.read_data_fork("icons").unwrap(), Vec::<u8>::new());
    assert_eq!(archive.read_resource_fork("icons").unwrap(), rsrc);
}

#[test]
fn absent_resource_fork_is_not_found() {
    let archive = open(build_archive(&[stored_file("foo", b"hi")]), false).unwrap();
    let err = archive.read_resource_fork("foo").unwrap_err();
    assert!(matches!(err, SitError::NotFound));
}

#[test]
fn missing_path_is_not_found() {
    let archive = open(build_archive(&[stored_file("foo", b"hi")]), false).unwrap();
    let err = archive.read_data_fork("bar").unwrap_err();
    assert!(matches!(err, SitError::NotFound));
}

#[test]
fn both_forks_extract_in_order() {
    // The resource fork body precedes the data fork body on disk.
    let mut entry = stored_file("dual", b"data fork");
    entry.res_ulen = 4;
    entry.res_crc = crc16(b"rsrc");
    entry.res_body = b"rsrc".to_vec();
    let archive = open(build_archive(&[entry]), false).unwrap();
    assert_eq!(archive.read_resource_fork("dual").unwrap(), b"rsrc");
    assert_eq!(archive.read_data_fork("dual").unwrap(), b"data fork");
}

#[test]
fn crc_mismatch_is_reported() {
    let mut entry = stored_file("foo.txt", b"hello");
    entry.data_crc ^= 1;
    let archive = open(build_archive(&[entry]), false).unwrap();
    let err = archive.read_data_fork("foo.txt").unwrap_err();
    assert!(matches!(err, SitError::CrcMismatch { .. }));
}

#[test]
fn encrypted_entries_are_rejected() {
    let mut entry = stored_file("secret", b"hello");
    entry.data_compression |= 0x80;
    let archive = open(build_archive(&[entry]), false).unwrap();
    let err = archive.read_data_fork("secret").unwrap_err();
    assert!(matches!(err, SitError::EncryptionUnsupported));
}

#[test]
fn unknown_method_is_rejected() {
    let mut entry = stored_file("old", b"hello");
    entry.data_compression = 2; // LZW, not supported
    let archive = open(build_archive(&[entry]), false).unwrap();
    let err = archive.read_data_fork("old").unwrap_err();
    assert!(matches!(err, SitError::UnsupportedCompression(2)));
}

// --- Method 14 payloads ---

struct BitWriter {
    data: Vec<u8>,
    bit_buf: u64,
    bits_in_buf: u32,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter {
            data: Vec::new(),
            bit_buf: 0,
            bits_in_buf: 0,
        }
    }

    fn write_bits(&mut self, value: u32, n: u32) {
        self.bit_buf |= u64::from(value) << self.bits_in_buf;
        self.bits_in_buf += n;
        while self.bits_in_buf >= 8 {
            self.data.push((self.bit_buf & 0xFF) as u8);
            self.bit_buf >>= 8;
            self.bits_in_buf -= 8;
        }
    }

    fn align(&mut self) {
        while self.bits_in_buf % 8 != 0 {
            self.write_bits(0, 1);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bits_in_buf > 0 {
            self.data.push((self.bit_buf & 0xFF) as u8);
        }
        self.data
    }
}

fn reverse_bits(value: u32, n: u32) -> u32 {
    let mut out = 0;
    for i in 0..n {
        out |= ((value >> i) & 1) << (n - 1 - i);
    }
    out
}

/// A method-14 stream with one block of pure literals: every literal gets a
/// canonical nine-bit code equal to its own value, and the distance tree is
/// left empty.
fn method14_literal_stream(payload: &[u8]) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(1, 16); // one block
    w.write_bits(0, 16); // crunched size, ignored by the decoder
    w.write_bits(0, 16);
    w.write_bits(payload.len() as u32 & 0xFFFF, 16); // uncrunched count
    w.write_bits(payload.len() as u32 >> 16, 16);

    // Literal tree, raw 4-bit fields: symbol 0 gets length 9, repeats carry
    // it across all 256 literals, and the escape value empties the rest.
    w.write_bits(1, 1); // escape enabled
    w.write_bits(2, 2); // 4-bit fields, escape value 14
    w.write_bits(0, 3); // length offset 1
    w.write_bits(0, 2); // raw fields
    w.write_bits(8, 4);
    for _ in 0..14 {
        w.write_bits(15, 4);
        w.write_bits(15, 4);
    }
    w.write_bits(15, 4);
    w.write_bits(0, 4);
    w.write_bits(14, 4);
    for run in [15u32, 15, 12] {
        w.write_bits(15, 4);
        w.write_bits(run, 4);
    }
    w.align();

    // Distance tree: every class empty.
    w.write_bits(1, 1);
    w.write_bits(0, 2); // 2-bit fields, escape value 2
    w.write_bits(0, 3);
    w.write_bits(0, 2);
    for _ in 0..75 {
        w.write_bits(2, 2);
    }
    w.align();

    for &b in payload {
        w.write_bits(reverse_bits(u32::from(b), 9), 9);
    }
    w.finish()
}

#[test]
fn method14_block_decodes_pattern() {
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
    let stream = method14_literal_stream(&payload);

    let entry = TestEntry {
        name: b"packed".to_vec(),
        data_compression: 14,
        data_ulen: payload.len() as u32,
        data_crc: crc16(&payload),
        data_body: stream,
        ..Default::default()
    };
    let archive = open(build_archive(&[entry]), false).unwrap();

    let out = archive.read_data_fork("packed").unwrap();
    assert_eq!(out.len(), payload.len());
    assert_eq!(out, payload);
    assert_eq!(crc16(&out), crc16(&payload));
}

#[test]
fn method14_bad_stream_is_a_decode_error() {
    let entry = TestEntry {
        name: b"broken".to_vec(),
        data_compression: 14,
        data_ulen: 64,
        data_crc: 0,
        data_body: vec![0x01, 0x00], // one block, then nothing
        ..Default::default()
    };
    let archive = open(build_archive(&[entry]), false).unwrap();
    let err = archive.read_data_fork("broken").unwrap_err();
    assert!(matches!(err, SitError::Decode(_)));
}
