//! Reconstruction of the offset index by scanning the whole document.
//!
//! Used when the trailer is absent or unreadable. The scan does not use an
//! XML parser because the exact byte position of each opening tag is the
//! whole point, and common parsers do not expose it reliably. Instead the
//! file is read in chunks with a lookback carry-over so no tag straddling a
//! chunk boundary is missed.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};

use indexmap::IndexMap;
use log::warn;

use crate::index::EntryId;
use crate::patterns;
use crate::reader::chunk;

const CHUNK_SIZE: usize = 8192;
const LOOKBACK_SIZE: usize = 100;

#[derive(Debug, Default)]
pub(crate) struct RebuildOutcome {
    /// Spectrum and chromatogram entries, ordered by offset
    pub entries: Vec<(EntryId, u64)>,
    /// Whether the declared list counts disagreed with what was found
    pub count_mismatch: bool,
}

/// Scan the file front to back and collect the byte offset of every
/// `<spectrum>` and `<chromatogram>` opening tag.
pub(crate) fn rebuild_index(seeker: &mut File) -> io::Result<RebuildOutcome> {
    seeker.seek(SeekFrom::Start(0))?;

    let mut chrom_positions: IndexMap<String, u64> = IndexMap::new();
    let mut spec_positions: IndexMap<String, u64> = IndexMap::new();
    let mut chromcnt: usize = 0;
    let mut speccnt: usize = 0;

    let mut prev_chunk: Vec<u8> = Vec::new();
    let mut offset: u64 = 0;

    loop {
        let mut window: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + LOOKBACK_SIZE);
        let lookback = prev_chunk.len().min(LOOKBACK_SIZE);
        window.extend_from_slice(&prev_chunk[prev_chunk.len() - lookback..]);
        let base = offset - lookback as u64;

        let n = chunk::read_up_to(seeker, CHUNK_SIZE, &mut window)?;
        if n == 0 {
            break;
        }
        offset += n as u64;

        for caps in patterns::CHROM_ANY_ID.captures_iter(&window) {
            let m = caps.get(0).unwrap();
            let id = String::from_utf8_lossy(caps.get(1).unwrap().as_bytes()).into_owned();
            chrom_positions.insert(id, base + m.start() as u64);
        }
        for caps in patterns::SPEC_ANY_ID.captures_iter(&window) {
            let m = caps.get(0).unwrap();
            let id = String::from_utf8_lossy(caps.get(1).unwrap().as_bytes()).into_owned();
            spec_positions.insert(id, base + m.start() as u64);
        }

        if let Some(caps) = patterns::CHROM_LIST_COUNT.captures(&window) {
            if let Ok(count) = String::from_utf8_lossy(caps.get(1).unwrap().as_bytes()).parse() {
                chromcnt = count;
            }
        }
        if let Some(caps) = patterns::SPEC_LIST_COUNT.captures(&window) {
            if let Ok(count) = String::from_utf8_lossy(caps.get(1).unwrap().as_bytes()).parse() {
                speccnt = count;
            }
        }

        prev_chunk = window;
    }

    let count_mismatch = chromcnt != chrom_positions.len() || speccnt != spec_positions.len();
    if count_mismatch {
        warn!(
            "Found {} spectra and {} chromatograms, but the lists declare {} and {} entries",
            spec_positions.len(),
            chrom_positions.len(),
            speccnt,
            chromcnt
        );
        warn!("Updating the offsets that were found, but some may be missing; the file may be truncated");
    }

    let mut entries: Vec<(EntryId, u64)> = chrom_positions
        .into_iter()
        .chain(spec_positions)
        .map(|(id, position)| (canonical_id(&id), position))
        .collect();
    entries.sort_by_key(|e| e.1);

    Ok(RebuildOutcome {
        entries,
        count_mismatch,
    })
}

/// Prefer an integer key whenever the id carries a scan number, so numeric
/// lookups resolve against the rebuilt index.
fn canonical_id(id: &str) -> EntryId {
    let raw = id.as_bytes();
    match patterns::scan_in_string(raw).or_else(|| patterns::trailing_scan_digits(raw)) {
        Some(scan) => EntryId::Scan(scan),
        None => EntryId::from_native(id),
    }
}
