//! Discovery and parsing of the index-list trailer at the tail of an
//! `<indexedmzML>` document.
//!
//! Converters disagree about how, and whether, the trailer is written; some
//! fail silently and repeat one offset for every entry. Discovery therefore
//! walks backwards in small slabs and parses defensively, and the caller
//! treats a missing or unreadable trailer as recoverable.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

use log::warn;
use regex::bytes::Regex;

use crate::index::EntryId;
use crate::patterns;
use crate::reader::SeekError;

const SLAB_SIZE: u64 = 1024;
const MAX_SLABS: u64 = 10;

/// What walking the tail of the file turned up.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TrailerInfo {
    /// Byte offset of the `<indexList>` element, from `<indexListOffset>`
    pub index_list_offset: Option<u64>,
    /// Byte offset of the `TIC` chromatogram, from its trailer entry
    pub tic_offset: Option<u64>,
}

impl TrailerInfo {
    pub fn found(&self) -> bool {
        self.index_list_offset.is_some()
    }
}

/// Walk backwards from the end of the file in 1 KiB slabs, up to 10 KiB,
/// looking for the index locator and the `TIC` offset entry.
pub(crate) fn discover_trailer(seeker: &mut File) -> Result<TrailerInfo, SeekError> {
    let file_len = seeker.seek(SeekFrom::End(0))?;
    let mut info = TrailerInfo::default();
    let mut sanity_check_set: HashSet<u64> = HashSet::new();
    let mut sciex_entries = 0usize;

    for slab in 1..=MAX_SLABS {
        let slab_start = file_len.saturating_sub(SLAB_SIZE * slab);
        seeker.seek(SeekFrom::Start(slab_start))?;

        let mut lines = BufReader::new(&mut *seeker);
        let mut line = Vec::new();
        while lines.read_until(b'\n', &mut line)? > 0 {
            if let Some(caps) = patterns::TIC_OFFSET.captures(&line) {
                info.tic_offset = patterns::capture_u64(&caps, "offset");
            }
            if let Some(caps) = patterns::SPEC_INDEX_SCIEX.captures(&line) {
                if let Some(offset) = patterns::capture_u64(&caps, "offset") {
                    sciex_entries += 1;
                    sanity_check_set.insert(offset);
                }
            }
            if let Some(caps) = patterns::INDEX_LIST_OFFSET.captures(&line) {
                info.index_list_offset = patterns::capture_u64(&caps, "offset");
            }
            line.clear();
        }

        if info.index_list_offset.is_some() && info.tic_offset.is_some() {
            break;
        }
        if slab_start == 0 {
            break;
        }
    }

    if sciex_entries > 1 && sanity_check_set.len() == 1 {
        warn!(
            "Index trailer repeats a single offset for {} entries; the converter likely wrote a broken index",
            sciex_entries
        );
    }
    Ok(info)
}

/// Parse the index list beginning at `trailer_offset`, yielding one
/// `(id, offset)` entry per readable line.
///
/// When `index_regex` is given it replaces the stock entry matchers; it must
/// capture `nativeID` and `offset` by name.
pub(crate) fn read_index(
    seeker: &mut File,
    trailer_offset: u64,
    index_regex: Option<&Regex>,
) -> Result<Vec<(EntryId, u64)>, SeekError> {
    let file_len = seeker.seek(SeekFrom::End(0))?;
    if trailer_offset >= file_len {
        return Err(SeekError::CorruptIndex(format!(
            "index list offset {} lies outside the file of {} bytes",
            trailer_offset, file_len
        )));
    }
    seeker.seek(SeekFrom::Start(trailer_offset))?;

    let mut entries = Vec::new();
    let mut lines = BufReader::new(&mut *seeker);
    let mut line = Vec::new();
    while lines.read_until(b'\n', &mut line)? > 0 {
        if let Some(user_pattern) = index_regex {
            if let Some(caps) = user_pattern.captures(&line) {
                if let (Some(native_id), Some(offset)) =
                    (caps.name("nativeID"), patterns::capture_u64(&caps, "offset"))
                {
                    let native_id = String::from_utf8_lossy(native_id.as_bytes());
                    let id = match native_id.parse::<u64>() {
                        Ok(scan) => EntryId::Scan(scan),
                        Err(_) => EntryId::from_native(&native_id),
                    };
                    entries.push((id, offset));
                }
            }
        } else if let Some((id, offset)) = match_stock_entry(&line) {
            entries.push((id, offset));
        }
        line.clear();
    }
    Ok(entries)
}

fn match_stock_entry(line: &[u8]) -> Option<(EntryId, u64)> {
    if let Some(caps) = patterns::SPEC_INDEX_DEFAULT.captures(line) {
        let native_id = caps.name("nativeID")?;
        if !native_id.as_bytes().is_empty() {
            let scan = patterns::capture_u64(&caps, "nativeID")?;
            let offset = patterns::capture_u64(&caps, "offset")?;
            return Some((EntryId::Scan(scan), offset));
        }
    }
    if let Some(caps) = patterns::SIM_INDEX_SCIEX.captures(line) {
        let native_id = caps.name("nativeID")?.as_bytes();
        let offset = patterns::capture_u64(&caps, "offset")?;
        let id = match patterns::scan_in_string(native_id)
            .or_else(|| patterns::trailing_scan_digits(native_id))
        {
            Some(scan) => EntryId::Scan(scan),
            None => EntryId::from_native(&String::from_utf8_lossy(native_id)),
        };
        return Some((id, offset));
    }
    None
}
