//! Probe for the first and last spectrum of a file.
//!
//! The jump search needs the two endpoints of the scan range and their byte
//! offsets before it can estimate where anything else lives. The head pass
//! reads forward until the first `<spectrum ` shows up; the tail pass reads
//! backward, prepending chunks, until the last one does.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};

use regex::bytes::Regex;

use crate::patterns;
use crate::reader::chunk;

const CHUNK_SIZE: usize = 128 * 1024;
const MAX_CHUNKS: u64 = 100;

/// Locate the first and last spectrum, returning `(scan, offset)` pairs in
/// ascending scan order. Ids whose scan number cannot be parsed degrade to
/// scan `0`. Yields zero, one, or two entries.
pub(crate) fn probe_extremes(
    seeker: &mut File,
    index_regex: Option<&Regex>,
) -> io::Result<Vec<(u64, u64)>> {
    let file_len = seeker.seek(SeekFrom::End(0))?;
    let mut seek_list: Vec<(u64, u64)> = Vec::new();

    // Head pass: the buffer grows from offset zero, so a match position in
    // the buffer is already an absolute file offset.
    seeker.seek(SeekFrom::Start(0))?;
    let mut buffer: Vec<u8> = Vec::new();
    for _ in 0..MAX_CHUNKS {
        if chunk::read_up_to(seeker, CHUNK_SIZE, &mut buffer)? == 0 {
            break;
        }
        if let Some(m) = patterns::SPEC_OPEN_SIMPLE.find(&buffer) {
            let first_scan = extract_scan(&buffer, index_regex);
            seek_list.push((first_scan, m.start() as u64));
            break;
        }
    }

    // Tail pass: chunks are prepended, so the buffer begins at the seek
    // position of the most recently read slab.
    let mut buffer: Vec<u8> = Vec::new();
    for x in 1..=MAX_CHUNKS {
        let slab_start = file_len.saturating_sub(x * CHUNK_SIZE as u64);
        let slab_end = file_len.saturating_sub((x - 1) * CHUNK_SIZE as u64);
        seeker.seek(SeekFrom::Start(slab_start))?;
        let mut slab = Vec::new();
        chunk::read_up_to(seeker, (slab_end - slab_start) as usize, &mut slab)?;
        slab.extend_from_slice(&buffer);
        buffer = slab;

        let matches: Vec<_> = patterns::SPEC_OPEN_SIMPLE.find_iter(&buffer).collect();
        if let Some(last_match) = matches.last() {
            let last_scan = extract_scan(&buffer[last_match.start()..], index_regex);
            seek_list.push((last_scan, slab_start + last_match.start() as u64));
            break;
        }
        if slab_start == 0 {
            break;
        }
    }

    seek_list.sort_unstable();
    seek_list.dedup_by_key(|entry| entry.0);
    Ok(seek_list)
}

fn extract_scan(buffer: &[u8], index_regex: Option<&Regex>) -> u64 {
    let id_pattern = index_regex.unwrap_or(&*patterns::SPEC_ID_SIMPLE);
    id_pattern
        .captures(buffer)
        .and_then(|caps| caps.name("id").or_else(|| caps.get(1)))
        .and_then(|id| patterns::trailing_scan_digits(id.as_bytes()))
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data;

    #[test_log::test]
    fn both_extremes_of_a_small_file() {
        let doc = test_data::small_indexed(10);
        let file = test_data::write_temp(&doc.bytes);
        let mut seeker = File::open(file.path()).unwrap();

        let extremes = probe_extremes(&mut seeker, None).unwrap();
        assert_eq!(
            extremes,
            vec![doc.spectrum_offsets[0], doc.spectrum_offsets[9]]
        );
    }

    #[test_log::test]
    fn a_single_spectrum_collapses_to_one_entry() {
        let doc = test_data::small_indexed(1);
        let file = test_data::write_temp(&doc.bytes);
        let mut seeker = File::open(file.path()).unwrap();

        let extremes = probe_extremes(&mut seeker, None).unwrap();
        assert_eq!(extremes, vec![doc.spectrum_offsets[0]]);
    }

    #[test_log::test]
    fn a_file_without_spectra_yields_nothing() {
        let file = test_data::write_temp(b"<mzML><run></run></mzML>\n");
        let mut seeker = File::open(file.path()).unwrap();

        let extremes = probe_extremes(&mut seeker, None).unwrap();
        assert!(extremes.is_empty());
    }

    #[test_log::test]
    fn unparsable_ids_degrade_to_zero() {
        let body =
            b"<mzML><spectrum index=\"0\" id=\"alpha\" defaultArrayLength=\"0\"></spectrum></mzML>\n";
        let file = test_data::write_temp(body);
        let mut seeker = File::open(file.path()).unwrap();

        let extremes = probe_extremes(&mut seeker, None).unwrap();
        assert_eq!(extremes.len(), 1);
        assert_eq!(extremes[0].0, 0);
    }
}
