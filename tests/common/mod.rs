//! Synthetic fMP4 builders shared by the integration tests.
//!
//! These produce just enough ISO BMFF structure for the re-segmentation
//! engine: a minimal `ftyp`, a `moov` with real `tkhd`/`mdhd` fields, and
//! `moof` fragments with `tfhd`/`tfdt`/`trun` carrying configurable
//! per-sample durations.

#![allow(dead_code)]

/// Size-prefixed box: u32 BE size + fourcc + content.
pub fn write_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + content.len());
    out.extend_from_slice(&((8 + content.len()) as u32).to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(content);
    out
}

fn fullbox_header(version: u8, flags: u32) -> [u8; 4] {
    (((version as u32) << 24) | (flags & 0x00FF_FFFF)).to_be_bytes()
}

/// Minimal `ftyp` (24 bytes).
pub fn ftyp() -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(b"isom");
    content.extend_from_slice(&0x200u32.to_be_bytes());
    content.extend_from_slice(b"isom");
    content.extend_from_slice(b"iso6");
    write_box(b"ftyp", &content)
}

fn tkhd(track_id: u32) -> Vec<u8> {
    let mut content = vec![0u8; 84];
    content[..4].copy_from_slice(&fullbox_header(0, 7));
    content[12..16].copy_from_slice(&track_id.to_be_bytes());
    write_box(b"tkhd", &content)
}

fn mdhd(timescale: u32) -> Vec<u8> {
    let mut content = vec![0u8; 24];
    content[12..16].copy_from_slice(&timescale.to_be_bytes());
    write_box(b"mdhd", &content)
}

/// `moov` with one trak per `(track_id, timescale)` pair.
pub fn moov(tracks: &[(u32, u32)]) -> Vec<u8> {
    let mut content = Vec::new();
    for &(track_id, timescale) in tracks {
        let mdia = write_box(b"mdia", &mdhd(timescale));
        let mut trak = tkhd(track_id);
        trak.extend_from_slice(&mdia);
        content.extend_from_slice(&write_box(b"trak", &trak));
    }
    write_box(b"moov", &content)
}

/// One traf's worth of fragment metadata.
pub struct TrafSpec {
    pub track_id: u32,
    /// The capture source's own (pre-rewrite) decode time.
    pub source_tfdt: u64,
    pub sample_durations: Vec<u32>,
    pub include_tfhd: bool,
}

impl TrafSpec {
    pub fn new(track_id: u32, source_tfdt: u64, sample_durations: &[u32]) -> Self {
        Self {
            track_id,
            source_tfdt,
            sample_durations: sample_durations.to_vec(),
            include_tfhd: true,
        }
    }

    /// Drop the tfhd to simulate a malformed fragment.
    pub fn without_tfhd(mut self) -> Self {
        self.include_tfhd = false;
        self
    }
}

/// `moof` with an mfhd and one traf per [`TrafSpec`]. The trun carries
/// per-sample durations (and sizes, to keep the layout realistic).
pub fn moof(sequence: u32, trafs: &[TrafSpec]) -> Vec<u8> {
    let mfhd = {
        let mut c = Vec::new();
        c.extend_from_slice(&fullbox_header(0, 0));
        c.extend_from_slice(&sequence.to_be_bytes());
        write_box(b"mfhd", &c)
    };

    let mut content = mfhd;
    for spec in trafs {
        let mut traf = Vec::new();

        if spec.include_tfhd {
            let mut c = Vec::new();
            c.extend_from_slice(&fullbox_header(0, 0x020000)); // default-base-is-moof
            c.extend_from_slice(&spec.track_id.to_be_bytes());
            traf.extend_from_slice(&write_box(b"tfhd", &c));
        }

        {
            let mut c = Vec::new();
            c.extend_from_slice(&fullbox_header(1, 0));
            c.extend_from_slice(&spec.source_tfdt.to_be_bytes());
            traf.extend_from_slice(&write_box(b"tfdt", &c));
        }

        {
            // data-offset + sample-duration + sample-size present.
            let mut c = Vec::new();
            c.extend_from_slice(&fullbox_header(0, 0x000301));
            c.extend_from_slice(&(spec.sample_durations.len() as u32).to_be_bytes());
            c.extend_from_slice(&0i32.to_be_bytes());
            for &d in &spec.sample_durations {
                c.extend_from_slice(&d.to_be_bytes());
                c.extend_from_slice(&256u32.to_be_bytes());
            }
            traf.extend_from_slice(&write_box(b"trun", &c));
        }

        content.extend_from_slice(&write_box(b"traf", &traf));
    }

    write_box(b"moof", &content)
}

pub fn mdat(len: usize) -> Vec<u8> {
    write_box(b"mdat", &vec![0xC5; len])
}

/// A complete moof+mdat pair for one track with a single sample.
pub fn fragment(track_id: u32, duration: u32) -> Vec<u8> {
    let mut out = moof(0, &[TrafSpec::new(track_id, 0xDEAD_BEEF, &[duration])]);
    out.extend_from_slice(&mdat(64));
    out
}

/// Every `tfdt.baseMediaDecodeTime` in `data`, in byte order.
pub fn read_tfdt_values(data: &[u8]) -> Vec<u64> {
    let mut values = Vec::new();
    for i in 0..data.len().saturating_sub(4) {
        if &data[i..i + 4] == b"tfdt" {
            let version = data[i + 4];
            let value = if version == 1 {
                u64::from_be_bytes(data[i + 8..i + 16].try_into().unwrap())
            } else {
                u32::from_be_bytes(data[i + 8..i + 12].try_into().unwrap()) as u64
            };
            values.push(value);
        }
    }
    values
}

/// Segment URIs referenced by a playlist, in order.
pub fn playlist_segment_names(playlist: &str) -> Vec<String> {
    playlist
        .lines()
        .filter(|l| l.ends_with(".m4s"))
        .map(|l| l.to_string())
        .collect()
}
