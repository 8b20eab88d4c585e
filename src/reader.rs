//! Random access to spectra and chromatograms in an uncompressed mzML file.
//!
//! [`MzMLSeekReader`] resolves a request — an integer scan number, a native
//! id string, or the reserved `TIC` label — to the byte-accurate XML
//! fragment of a single element, without parsing the whole document. On
//! construction it probes the first and last spectrum, then loads the
//! embedded index trailer when one exists, or optionally rebuilds the index
//! by scanning the file. Requests that miss the index fall back to jump,
//! interpolation, substring, and finally linear searching, and every offset
//! learned along the way is kept.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use log::{debug, warn};
use memchr::memmem;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use regex::bytes::Regex;
use thiserror::Error;

use crate::index::{ByteSpan, EntryId, OffsetIndex, SeekList};
use crate::patterns;
use crate::spectrum::{Chromatogram, Spectrum, DEFAULT_MEASURED_PRECISION};

pub(crate) mod chunk;
mod extremes;
mod rebuild;
mod trailer;

/// Chunk size used while jumping and delimiting inside the jump search.
const JUMP_CHUNK_SIZE: usize = 12_800;
/// Most probe reads appended in one jump iteration.
const JUMP_PROBE_CHUNKS: usize = 100;
/// The jump search gives up after this many iterations.
const MAX_JUMPS: usize = 40;
/// Within this many scans of a known entry, start there and read forward
/// instead of jumping.
const CLOSE_RANGE_SCANS: u64 = 10;
/// Shrink factor applied to the jump stride after overshooting the target.
const OVERSHOOT_SCALE: f64 = 0.1;
/// Interpolation search hands over to a linear scan within this distance.
const FALLBACK_CUTOFF: i64 = 100;
/// Chunk multiplier for fragment delimiting, in units of 512 bytes.
const DEFAULT_CHUNKS_TO_READ: usize = 8;

/**
All the ways resolving a request against an mzML file can go wrong
*/
#[derive(Debug, Error)]
pub enum SeekError {
    #[error("Spectrum id {target} is outside the indexed range {first}..={last}")]
    OutOfRange { target: u64, first: u64, last: u64 },
    #[error("No spectrum or chromatogram matching {0} was found")]
    NotFound(String),
    #[error("The embedded index is corrupt: {0}")]
    CorruptIndex(String),
    #[error("An I/O error occurred while seeking")]
    Io(#[from] io::Error),
    #[error("The text encoding {0:?} is not supported")]
    UnsupportedEncoding(String),
    #[error("An XML error occurred while streaming")]
    Xml(#[from] quick_xml::Error),
    #[error("The index pattern could not be compiled")]
    Pattern(#[from] regex::Error),
    #[error("Failed to build an object from the fragment")]
    Builder(#[from] crate::spectrum::BuilderError),
}

/// Whether a fragment holds a spectrum or a chromatogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    #[default]
    Spectrum,
    Chromatogram,
}

/// The raw product of a lookup: the exact bytes of one element, from the
/// `<` of its opening tag through the end of its closing tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub entry_type: EntryType,
    /// Absolute byte offset of the fragment in the file
    pub start: u64,
    pub data: Vec<u8>,
}

/// A typed value built from a fragment.
#[derive(Debug, Clone)]
pub enum Entry {
    Spectrum(Spectrum),
    Chromatogram(Chromatogram),
}

impl Entry {
    /// The native id string of the underlying element.
    pub fn id(&self) -> &str {
        match self {
            Entry::Spectrum(spectrum) => &spectrum.id,
            Entry::Chromatogram(chromatogram) => &chromatogram.id,
        }
    }

    pub fn as_spectrum(&self) -> Option<&Spectrum> {
        match self {
            Entry::Spectrum(spectrum) => Some(spectrum),
            Entry::Chromatogram(_) => None,
        }
    }

    pub fn as_chromatogram(&self) -> Option<&Chromatogram> {
        match self {
            Entry::Chromatogram(chromatogram) => Some(chromatogram),
            Entry::Spectrum(_) => None,
        }
    }
}

/// Configures and opens an [`MzMLSeekReader`].
#[derive(Debug, Default, Clone)]
pub struct MzMLSeekReaderBuilder {
    encoding: Option<String>,
    build_index_from_scratch: bool,
    index_regex: Option<String>,
}

impl MzMLSeekReaderBuilder {
    /// The text encoding of the file, by WHATWG label. Defaults to `utf-8`.
    pub fn encoding(mut self, label: &str) -> Self {
        self.encoding = Some(label.to_string());
        self
    }

    /// Whether to rebuild the index by scanning the whole file when no
    /// usable trailer is present. Off by default.
    pub fn build_index_from_scratch(mut self, value: bool) -> Self {
        self.build_index_from_scratch = value;
        self
    }

    /// Replace the stock id patterns with a custom one for files whose
    /// native ids the defaults cannot parse. The pattern must name an `id`
    /// capture; to also match trailer entries it must name `nativeID` and
    /// `offset` captures.
    pub fn index_regex(mut self, pattern: &str) -> Self {
        self.index_regex = Some(pattern.to_string());
        self
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<MzMLSeekReader, SeekError> {
        MzMLSeekReader::new_with(
            path.as_ref(),
            self.encoding.as_deref().unwrap_or("utf-8"),
            self.build_index_from_scratch,
            self.index_regex.as_deref(),
        )
    }
}

/**
A random-access reader over one uncompressed mzML file.

The reader keeps a persistent buffered text handle for streaming and opens
short-lived binary handles for byte-accurate seeking, one per call. Lookups
take `&mut self` because the offset index and seek list learn new entries
while searching; to share a reader across threads, serialise whole calls.
*/
pub struct MzMLSeekReader {
    path: PathBuf,
    encoding: &'static Encoding,
    handle: BufReader<File>,
    offset_index: OffsetIndex,
    seek_list: SeekList,
    index_regex: Option<Regex>,
    trailer_found: bool,
    count_mismatch: bool,
}

impl MzMLSeekReader {
    /// Open `path` with default settings: UTF-8 text, no index rebuild.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<MzMLSeekReader, SeekError> {
        Self::builder().open(path)
    }

    pub fn builder() -> MzMLSeekReaderBuilder {
        MzMLSeekReaderBuilder::default()
    }

    fn new_with(
        path: &Path,
        encoding_label: &str,
        build_index_from_scratch: bool,
        index_regex: Option<&str>,
    ) -> Result<MzMLSeekReader, SeekError> {
        let encoding = Encoding::for_label(encoding_label.as_bytes())
            .ok_or_else(|| SeekError::UnsupportedEncoding(encoding_label.to_string()))?;
        let index_regex = index_regex.map(Regex::new).transpose()?;
        let handle = BufReader::new(File::open(path)?);
        let mut inst = MzMLSeekReader {
            path: path.to_path_buf(),
            encoding,
            handle,
            offset_index: OffsetIndex::new("entry".to_owned()),
            seek_list: SeekList::new(),
            index_regex,
            trailer_found: false,
            count_mismatch: false,
        };
        let mut seeker = inst.binary_handle()?;
        for (scan, offset) in extremes::probe_extremes(&mut seeker, inst.index_regex.as_ref())? {
            inst.seek_list.insert(scan, offset);
            inst.offset_index
                .insert(EntryId::Scan(scan), ByteSpan::new(offset));
        }
        inst.build_index(build_index_from_scratch, &mut seeker)?;
        Ok(inst)
    }

    /// A fresh binary handle, scoped to the call that opened it.
    fn binary_handle(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    fn build_index(&mut self, from_scratch: bool, seeker: &mut File) -> Result<(), SeekError> {
        let info = trailer::discover_trailer(seeker)?;
        if let Some(tic_offset) = info.tic_offset {
            self.offset_index
                .insert(EntryId::Tic, ByteSpan::new(tic_offset));
        }

        let mut indexed = false;
        if info.found() {
            self.trailer_found = true;
            let index_list_offset = info.index_list_offset.unwrap_or_default();
            match trailer::read_index(seeker, index_list_offset, self.index_regex.as_ref()) {
                Ok(entries) => {
                    for (id, offset) in entries {
                        self.offset_index.insert(id, ByteSpan::new(offset));
                    }
                    indexed = true;
                }
                Err(SeekError::CorruptIndex(message)) => {
                    debug!("Discarding unreadable index trailer: {}", message);
                }
                Err(other) => return Err(other),
            }
        }

        if indexed {
            self.offset_index.init = true;
        } else if from_scratch {
            let outcome = rebuild::rebuild_index(seeker)?;
            self.count_mismatch = outcome.count_mismatch;
            for (id, offset) in outcome.entries {
                self.offset_index.insert(id, ByteSpan::new(offset));
            }
            self.offset_index.init = true;
        } else {
            warn!("No index found and build_index_from_scratch is false");
        }
        Ok(())
    }

    /// Resolve a request to a typed spectrum or chromatogram.
    ///
    /// Dispatches on the request: `TIC` stream-parses the file, an id
    /// already in the offset index is read directly, a string id falls back
    /// to substring search, and an integer scan number to jump search.
    pub fn get<I: Into<EntryId>>(&mut self, identifier: I) -> Result<Entry, SeekError> {
        let fragment = self.get_fragment(identifier)?;
        self.build_entry(&fragment)
    }

    /// Resolve a request to its raw byte fragment.
    pub fn get_fragment<I: Into<EntryId>>(&mut self, identifier: I) -> Result<Fragment, SeekError> {
        let identifier = identifier.into();
        match identifier {
            EntryId::Tic => self.read_tic(),
            other if self.offset_index.contains_key(&other) => self.fragment_at(&other),
            EntryId::Native(native) => self.substring_search_fragment(&native),
            EntryId::Scan(scan) => self.jump_search_fragment(scan),
        }
    }

    /// Retrieve a spectrum by scan number using learned-offset binary jumps.
    pub fn binary_search(&mut self, target_index: u64) -> Result<Spectrum, SeekError> {
        let fragment = self.jump_search_fragment(target_index)?;
        self.build_spectrum(&fragment.data)
    }

    /// Read up to `size` bytes from the persistent text handle, decoded
    /// with the configured encoding.
    pub fn read(&mut self, size: usize) -> Result<String, SeekError> {
        let mut data = Vec::new();
        chunk::read_up_to(&mut self.handle, size, &mut data)?;
        Ok(self.decode(&data))
    }

    /// Release the persistent text handle.
    pub fn close(self) {}

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset_index(&self) -> &OffsetIndex {
        &self.offset_index
    }

    pub fn seek_list(&self) -> &SeekList {
        &self.seek_list
    }

    /// Whether the file carried an `<indexListOffset>` trailer.
    pub fn has_index_trailer(&self) -> bool {
        self.trailer_found
    }

    /// Whether a rebuilt index disagreed with the declared list counts,
    /// which may indicate a truncated file.
    pub fn index_count_mismatch(&self) -> bool {
        self.count_mismatch
    }

    fn decode(&self, data: &[u8]) -> String {
        let (text, _, _) = self.encoding.decode(data);
        text.into_owned()
    }

    fn build_entry(&self, fragment: &Fragment) -> Result<Entry, SeekError> {
        match fragment.entry_type {
            EntryType::Spectrum => self.build_spectrum(&fragment.data).map(Entry::Spectrum),
            EntryType::Chromatogram => {
                let text = self.decode(&fragment.data);
                Chromatogram::from_fragment(&text, DEFAULT_MEASURED_PRECISION)
                    .map(Entry::Chromatogram)
                    .map_err(Into::into)
            }
        }
    }

    fn build_spectrum(&self, data: &[u8]) -> Result<Spectrum, SeekError> {
        let text = self.decode(data);
        Spectrum::from_fragment(&text, DEFAULT_MEASURED_PRECISION).map_err(Into::into)
    }

    /// Stream-parse the document and return the `TIC` chromatogram's
    /// fragment, delimited byte-accurately once its start is known.
    fn read_tic(&mut self) -> Result<Fragment, SeekError> {
        self.handle.seek(SeekFrom::Start(0))?;
        let found = {
            let mut reader = XmlReader::from_reader(&mut self.handle);
            reader.trim_text(true);
            let mut buffer = Vec::new();
            let mut found: Option<u64> = None;
            loop {
                match reader.read_event_into(&mut buffer) {
                    Ok(Event::Start(ref e)) if e.name().as_ref() == b"chromatogram" => {
                        if Self::id_attribute(e)?.as_deref() == Some("TIC") {
                            found = Some((reader.buffer_position() - e.len() - 2) as u64);
                            break;
                        }
                    }
                    Ok(Event::Eof) => break,
                    Ok(_) => {}
                    Err(err) => return Err(SeekError::Xml(err)),
                }
                buffer.clear();
            }
            found
        };
        let Some(start) = found else {
            return Err(SeekError::NotFound("TIC".to_string()));
        };

        let mut seeker = self.binary_handle()?;
        seeker.seek(SeekFrom::Start(start))?;
        let (start, end) = read_to_spec_end(&mut seeker, DEFAULT_CHUNKS_TO_READ)?;
        self.offset_index
            .insert(EntryId::Tic, ByteSpan::with_end(start, end));
        let data = read_span(&mut seeker, start, end)?;
        Ok(Fragment {
            entry_type: EntryType::Chromatogram,
            start,
            data,
        })
    }

    fn id_attribute(event: &BytesStart<'_>) -> Result<Option<String>, SeekError> {
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(|e| SeekError::Xml(e.into()))?;
            if attr.key.as_ref() == b"id" {
                return Ok(Some(attr.unescape_value()?.to_string()));
            }
        }
        Ok(None)
    }

    /// Read the fragment of an id already present in the offset index.
    fn fragment_at(&mut self, id: &EntryId) -> Result<Fragment, SeekError> {
        let span = self
            .offset_index
            .get(id)
            .ok_or_else(|| SeekError::NotFound(id.to_string()))?;
        let mut seeker = self.binary_handle()?;
        seeker.seek(SeekFrom::Start(span.start))?;
        let (start, end) = read_to_spec_end(&mut seeker, DEFAULT_CHUNKS_TO_READ)?;
        let data = read_span(&mut seeker, start, end)?;
        let entry_type = if data.starts_with(b"<spectrum") {
            EntryType::Spectrum
        } else if data.starts_with(b"<chromatogram") {
            EntryType::Chromatogram
        } else {
            return Err(SeekError::CorruptIndex(format!(
                "byte {} does not begin a spectrum or chromatogram tag",
                start
            )));
        };
        self.offset_index
            .insert(id.clone(), ByteSpan::with_end(start, end));
        Ok(Fragment {
            entry_type,
            start,
            data,
        })
    }

    /// Scan forward from the start of the file for a spectrum whose id
    /// contains `search`, or a chromatogram whose id equals it.
    fn substring_search_fragment(&mut self, search: &str) -> Result<Fragment, SeekError> {
        let total_chunk_size = 512 * DEFAULT_CHUNKS_TO_READ;
        let pattern = patterns::spectrum_id_substring(search)?;
        let needle = search.as_bytes();
        let mut seeker = self.binary_handle()?;

        loop {
            let file_pointer = seeker.stream_position()?;
            let mut data = Vec::new();
            if chunk::read_chunk_at_boundary(&mut seeker, total_chunk_size, &mut data)? == 0 {
                return Err(SeekError::NotFound(search.to_string()));
            }
            if let Some(caps) = pattern.captures(&data) {
                let m = caps.get(0).unwrap();
                let current_id = caps.get(1).unwrap().as_bytes();
                if memmem::find(current_id, needle).is_some() {
                    let id = EntryId::from_native(&String::from_utf8_lossy(current_id));
                    seeker.seek(SeekFrom::Start(file_pointer + m.start() as u64))?;
                    let (start, end) = read_to_spec_end(&mut seeker, DEFAULT_CHUNKS_TO_READ)?;
                    self.offset_index.insert(id, ByteSpan::with_end(start, end));
                    let data = read_span(&mut seeker, start, end)?;
                    return Ok(Fragment {
                        entry_type: EntryType::Spectrum,
                        start,
                        data,
                    });
                }
            } else if let Some(caps) = patterns::CHROM_OPEN.captures(&data) {
                let m = caps.get(0).unwrap();
                if caps.get(1).unwrap().as_bytes() == needle {
                    seeker.seek(SeekFrom::Start(file_pointer + m.start() as u64))?;
                    let (start, end) = read_to_spec_end(&mut seeker, DEFAULT_CHUNKS_TO_READ)?;
                    self.offset_index
                        .insert(EntryId::from_native(search), ByteSpan::with_end(start, end));
                    let data = read_span(&mut seeker, start, end)?;
                    return Ok(Fragment {
                        entry_type: EntryType::Chromatogram,
                        start,
                        data,
                    });
                }
            }
        }
    }

    /// Locate a spectrum by scan number with proportional jumps over the
    /// seek list, learning every spectrum offset encountered on the way.
    fn jump_search_fragment(&mut self, target_index: u64) -> Result<Fragment, SeekError> {
        let mut seeker = self.binary_handle()?;

        if !self.offset_index.contains_scan(target_index) {
            let (first, last) = match (self.seek_list.first(), self.seek_list.last()) {
                (Some(first), Some(last)) => (first.0, last.0),
                _ => return Err(SeekError::NotFound(target_index.to_string())),
            };
            if target_index < first || target_index > last {
                return Err(SeekError::OutOfRange {
                    target: target_index,
                    first,
                    last,
                });
            }

            let mut offset_scale = 1.0f64;
            let mut forwards = 0u32;
            let mut backwards = 0u32;

            for _jump in 0..MAX_JUMPS {
                let Some((element_before, element_after)) = self.seek_list.bracket(target_index)
                else {
                    break;
                };
                let spec_offset_m1 = target_index - element_before.0;
                let spec_offset_p1 = element_after.0 - target_index;
                let average_bytes_per_spec = ((element_after.1 as f64 - element_before.1 as f64)
                    / (element_after.0 - element_before.0) as f64)
                    .round();

                let byte_offset = if spec_offset_m1 < spec_offset_p1 {
                    backwards = 0;
                    forwards += 1;
                    if spec_offset_m1 < CLOSE_RANGE_SCANS {
                        // quite close to the target, start at the element
                        // before and read chunks until found
                        element_before.1 as f64
                    } else {
                        element_before.1 as f64
                            + forwards as f64
                                * (offset_scale * average_bytes_per_spec * spec_offset_m1 as f64)
                    }
                } else {
                    forwards = 0;
                    backwards += 1;
                    element_after.1 as f64
                        - backwards as f64
                            * (offset_scale * average_bytes_per_spec * spec_offset_p1 as f64)
                };
                let byte_offset = byte_offset.max(1.0) as u64;
                let jump_forwards = spec_offset_m1 < spec_offset_p1;

                seeker.seek(SeekFrom::Start(byte_offset))?;
                let mut probe = Vec::new();
                for _ in 0..JUMP_PROBE_CHUNKS {
                    if chunk::read_up_to(&mut seeker, JUMP_CHUNK_SIZE, &mut probe)? == 0 {
                        break;
                    }
                }

                let mut found_target = false;
                for caps in patterns::SPEC_OPEN.captures_iter(&probe) {
                    let Some(id_bytes) = patterns::spectrum_id_from_open(&caps) else {
                        continue;
                    };
                    let Some(scan) = patterns::trailing_scan_digits(id_bytes) else {
                        continue;
                    };

                    if jump_forwards {
                        if scan > target_index {
                            // went too far
                            offset_scale = OVERSHOOT_SCALE;
                            forwards = 0;
                        } else {
                            offset_scale = 1.0;
                        }
                    } else if scan < target_index {
                        offset_scale = OVERSHOOT_SCALE;
                        backwards = 0;
                    } else {
                        offset_scale = 1.0;
                    }

                    if self.offset_index.contains_scan(scan) {
                        continue;
                    }
                    let absolute = byte_offset + caps.get(0).unwrap().start() as u64;
                    self.seek_list.insert(scan, absolute);
                    self.offset_index
                        .insert(EntryId::Scan(scan), ByteSpan::new(absolute));
                    if scan == target_index {
                        found_target = true;
                        break;
                    }
                }
                if found_target || self.offset_index.contains_scan(target_index) {
                    break;
                }
            }

            if !self.offset_index.contains_scan(target_index) {
                return Err(SeekError::NotFound(target_index.to_string()));
            }
        }

        let span = self
            .offset_index
            .get_scan(target_index)
            .ok_or_else(|| SeekError::NotFound(target_index.to_string()))?;
        seeker.seek(SeekFrom::Start(span.start))?;
        let mut data = Vec::new();
        loop {
            let n = chunk::read_up_to(&mut seeker, JUMP_CHUNK_SIZE, &mut data)?;
            if memmem::find(&data, b"</spectrum>").is_some() {
                break;
            }
            if n == 0 {
                return Err(SeekError::CorruptIndex(format!(
                    "no spectrum close tag after byte {}",
                    span.start
                )));
            }
        }
        let end_at = memmem::find(&data, b"</spectrum>").unwrap() + b"</spectrum>".len();
        data.truncate(end_at);
        self.offset_index.insert(
            EntryId::Scan(target_index),
            ByteSpan::with_end(span.start, span.start + end_at as u64),
        );
        Ok(Fragment {
            entry_type: EntryType::Spectrum,
            start: span.start,
            data,
        })
    }

    /// Locate a spectrum by scan number through proportional interpolation
    /// over the scan-to-position ratio, handing over to a linear scan once
    /// close to the target.
    pub fn interpolation_search(&mut self, target_index: u64) -> Result<Spectrum, SeekError> {
        let chunk_size = 512 * DEFAULT_CHUNKS_TO_READ;
        let mut seeker = self.binary_handle()?;
        let file_len = seeker.seek(SeekFrom::End(0))?;
        let mut lower_bound: u64 = 0;
        let mut upper_bound: u64 = file_len;
        let mut current_position = file_len / 2;
        seeker.seek(SeekFrom::Start(current_position))?;
        let mut used_indices: HashSet<u64> = HashSet::new();

        loop {
            let mut jumper_scaling = 1.0f64;
            let file_pointer = seeker.stream_position()?;
            let mut data = Vec::new();
            chunk::read_up_to(&mut seeker, chunk_size, &mut data)?;

            if data.is_empty() {
                // Ran off the end of the file: sweep forward from the
                // nearest known offset below the target.
                let scan_keys = self.offset_index.scan_keys();
                let Some(&key) = scan_keys
                    .get(
                        scan_keys
                            .partition_point(|&k| k < target_index)
                            .saturating_sub(2),
                    )
                    .or_else(|| scan_keys.last())
                else {
                    return Err(SeekError::NotFound(target_index.to_string()));
                };
                let span = self
                    .offset_index
                    .get_scan(key)
                    .ok_or_else(|| SeekError::NotFound(target_index.to_string()))?;
                seeker.seek(SeekFrom::Start(span.start))?;
                return self.search_linear_from(&mut seeker, target_index);
            }

            let Some(caps) = patterns::SPEC_OPEN.captures(&data) else {
                continue;
            };
            let Some(id_bytes) = patterns::spectrum_id_from_open(&caps) else {
                continue;
            };
            let current_index = patterns::trailing_scan_digits(id_bytes).unwrap_or(0);
            let spec_start_offset = file_pointer + caps.get(0).unwrap().start() as u64;
            seeker.seek(SeekFrom::Start(spec_start_offset))?;

            self.offset_index
                .insert(EntryId::Scan(current_index), ByteSpan::new(spec_start_offset));
            if !used_indices.insert(current_index) {
                // revisiting a spectrum; nudge the stride to break the cycle
                if current_index > target_index {
                    jumper_scaling -= 0.1;
                } else {
                    jumper_scaling += 0.1;
                }
            }

            let dist = current_index as i64 - target_index as i64;
            if dist < -1 && dist > -FALLBACK_CUTOFF {
                return self.search_linear_from(&mut seeker, target_index);
            } else if dist > 0 && dist < FALLBACK_CUTOFF {
                let mut current_scan = current_index;
                while current_scan > target_index && current_position > 0 {
                    current_position = current_position.saturating_sub(chunk_size as u64);
                    seeker.seek(SeekFrom::Start(current_position))?;
                    let mut data = Vec::new();
                    chunk::read_up_to(&mut seeker, chunk_size, &mut data)?;
                    if let Some(caps) = patterns::SPEC_OPEN.captures(&data) {
                        if let Some(scan) = patterns::spectrum_id_from_open(&caps)
                            .and_then(patterns::trailing_scan_digits)
                        {
                            current_scan = scan;
                        }
                    }
                }
                seeker.seek(SeekFrom::Start(current_position))?;
                return self.search_linear_from(&mut seeker, target_index);
            }

            if current_index == target_index {
                let (start, end) = read_to_spec_end(&mut seeker, DEFAULT_CHUNKS_TO_READ)?;
                self.offset_index
                    .insert(EntryId::Scan(current_index), ByteSpan::with_end(start, end));
                let xml = read_span(&mut seeker, start, end)?;
                return self.build_spectrum(&xml);
            } else if current_index > target_index {
                let scaling = target_index as f64 / current_index.max(1) as f64;
                upper_bound = current_position;
                let next = (current_position as f64 * scaling * jumper_scaling) as u64;
                current_position = next.max(lower_bound).min(upper_bound);
                seeker.seek(SeekFrom::Start(current_position))?;
            } else {
                let scaling = target_index as f64 / current_index.max(1) as f64;
                lower_bound = current_position;
                let next = (current_position as f64 * scaling * jumper_scaling) as u64;
                current_position = next.min(file_len);
                seeker.seek(SeekFrom::Start(current_position))?;
            }
        }
    }

    /// Scan forward from the start of the file for the requested scan
    /// number. The last-resort strategy.
    pub fn search_linear(&mut self, target_index: u64) -> Result<Spectrum, SeekError> {
        let mut seeker = self.binary_handle()?;
        self.search_linear_from(&mut seeker, target_index)
    }

    fn search_linear_from(
        &mut self,
        seeker: &mut File,
        target_index: u64,
    ) -> Result<Spectrum, SeekError> {
        let total_chunk_size = 512 * DEFAULT_CHUNKS_TO_READ;
        loop {
            let file_pointer = seeker.stream_position()?;
            let mut data = Vec::new();
            if chunk::read_chunk_at_boundary(seeker, total_chunk_size, &mut data)? == 0 {
                return Err(SeekError::NotFound(target_index.to_string()));
            }

            let Some(caps) = patterns::SPEC_OPEN.captures(&data) else {
                continue;
            };
            let Some(id_bytes) = patterns::spectrum_id_from_open(&caps) else {
                continue;
            };
            let current_index = patterns::trailing_scan_digits(id_bytes).unwrap_or(0);
            let match_start = caps.get(0).unwrap().start();
            let spec_start_offset = file_pointer + match_start as u64;

            let spec_end_offset = loop {
                if let Some(end_match) = patterns::SPEC_CLOSE.find(&data[match_start..]) {
                    break spec_start_offset + end_match.end() as u64;
                }
                if chunk::read_chunk_at_boundary(seeker, total_chunk_size, &mut data)? == 0 {
                    return Err(SeekError::NotFound(target_index.to_string()));
                }
            };

            self.offset_index.insert(
                EntryId::Scan(current_index),
                ByteSpan::with_end(spec_start_offset, spec_end_offset),
            );

            if current_index == target_index {
                let xml = read_span(seeker, spec_start_offset, spec_end_offset)?;
                return self.build_spectrum(&xml);
            }
            seeker.seek(SeekFrom::Start(spec_end_offset))?;
        }
    }
}

/// Read forward from the current position until the next `</spectrum>` or
/// `</chromatogram>`, returning the absolute start and one-past-the-end
/// offsets of the enclosing fragment.
fn read_to_spec_end(seeker: &mut File, chunks_to_read: usize) -> Result<(u64, u64), SeekError> {
    let chunk_size = 512 * chunks_to_read;
    let start_pos = seeker.stream_position()?;
    let mut data_chunk = Vec::new();
    chunk::read_up_to(seeker, chunk_size, &mut data_chunk)?;
    loop {
        if let Some(end_match) = patterns::SPEC_CLOSE.find(&data_chunk) {
            return Ok((start_pos, start_pos + end_match.end() as u64));
        }
        if let Some(end_match) = patterns::CHROM_CLOSE.find(&data_chunk) {
            return Ok((start_pos, start_pos + end_match.end() as u64));
        }
        if chunk::read_chunk_at_boundary(seeker, chunk_size, &mut data_chunk)? == 0 {
            return Err(SeekError::CorruptIndex(format!(
                "no closing tag found reading forward from byte {}",
                start_pos
            )));
        }
    }
}

/// Read the exact bytes of `[start, end)`.
fn read_span(seeker: &mut File, start: u64, end: u64) -> Result<Vec<u8>, SeekError> {
    seeker.seek(SeekFrom::Start(start))?;
    let mut data = vec![0u8; (end - start) as usize];
    seeker.read_exact(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod test {
    use tempfile::NamedTempFile;

    use super::*;
    use crate::test_data;

    fn open_indexed(scans: u64) -> (NamedTempFile, MzMLSeekReader) {
        let doc = test_data::small_indexed(scans);
        let file = test_data::write_temp(&doc.bytes);
        let reader = MzMLSeekReader::open_path(file.path()).unwrap();
        (file, reader)
    }

    fn open_unindexed(scans: u64, from_scratch: bool) -> (NamedTempFile, MzMLSeekReader) {
        let doc = test_data::small_unindexed(scans);
        let file = test_data::write_temp(&doc.bytes);
        let reader = MzMLSeekReader::builder()
            .build_index_from_scratch(from_scratch)
            .open(file.path())
            .unwrap();
        (file, reader)
    }

    #[test_log::test]
    fn get_by_scan_number() {
        let (_file, mut reader) = open_indexed(10);
        assert!(reader.has_index_trailer());

        let entry = reader.get(8u64).unwrap();
        let spectrum = entry.as_spectrum().expect("expected a spectrum");
        assert_eq!(spectrum.scan_number(), Some(8));
        assert_eq!(spectrum.measured_precision, DEFAULT_MEASURED_PRECISION);
        assert!(!spectrum.mz().unwrap().is_empty());
    }

    #[test_log::test]
    fn get_the_total_ion_chromatogram() {
        let (_file, mut reader) = open_indexed(10);
        let entry = reader.get("TIC").unwrap();
        let chromatogram = entry.as_chromatogram().expect("expected a chromatogram");
        assert_eq!(chromatogram.id, "TIC");
        assert!(!chromatogram.time().unwrap().is_empty());
    }

    #[test_log::test]
    fn the_extremes_resolve_directly() {
        let (_file, mut reader) = open_indexed(10);
        let first = reader.get(1u64).unwrap();
        assert_eq!(first.as_spectrum().unwrap().scan_number(), Some(1));
        let last = reader.get(10u64).unwrap();
        assert_eq!(last.as_spectrum().unwrap().scan_number(), Some(10));
    }

    #[test_log::test]
    fn requests_outside_the_scan_range() {
        let (_file, mut reader) = open_indexed(10);
        assert!(matches!(
            reader.get(11u64),
            Err(SeekError::OutOfRange {
                target: 11,
                first: 1,
                last: 10
            })
        ));
        assert!(matches!(
            reader.get(0u64),
            Err(SeekError::OutOfRange { target: 0, .. })
        ));
    }

    #[test_log::test]
    fn jump_search_over_a_sparse_index() {
        // no trailer and no rebuild: only the extremes are known up front
        let (_file, mut reader) = open_unindexed(10, false);
        assert!(!reader.has_index_trailer());
        assert_eq!(reader.seek_list().len(), 2);

        for target in 1..=10u64 {
            let spectrum = reader.binary_search(target).unwrap();
            assert_eq!(spectrum.scan_number(), Some(target));
        }

        // everything learned on the way stayed sorted and duplicate-free
        let scans: Vec<u64> = reader.seek_list().as_slice().iter().map(|e| e.0).collect();
        let mut sorted = scans.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(scans, sorted);
        assert!(reader.offset_index().contains_scan(5));
    }

    #[test_log::test]
    fn jump_search_rejects_targets_outside_the_extremes() {
        let (_file, mut reader) = open_unindexed(10, false);
        assert!(matches!(
            reader.binary_search(11),
            Err(SeekError::OutOfRange { .. })
        ));
        assert!(matches!(
            reader.binary_search(0),
            Err(SeekError::OutOfRange { .. })
        ));
    }

    #[test_log::test]
    fn interpolation_search_finds_every_scan() {
        let (_file, mut reader) = open_indexed(10);
        for target in 1..=10u64 {
            let spectrum = reader.interpolation_search(target).unwrap();
            assert_eq!(spectrum.scan_number(), Some(target));
        }
    }

    #[test_log::test]
    fn linear_search_finds_a_scan() {
        let (_file, mut reader) = open_unindexed(10, false);
        let spectrum = reader.search_linear(3).unwrap();
        assert_eq!(spectrum.scan_number(), Some(3));
    }

    #[test_log::test]
    fn rebuilding_the_index_from_scratch() {
        let (_file, mut reader) = open_unindexed(10, true);
        assert!(!reader.has_index_trailer());
        assert!(!reader.index_count_mismatch());

        for scan in 1..=10u64 {
            assert!(reader.offset_index().contains_scan(scan));
        }
        let entry = reader.get(5u64).unwrap();
        assert_eq!(entry.as_spectrum().unwrap().scan_number(), Some(5));
    }

    #[test_log::test]
    fn repeated_gets_return_identical_bytes() {
        let (_file, mut reader) = open_indexed(10);
        let one = reader.get_fragment(8u64).unwrap();
        let two = reader.get_fragment(8u64).unwrap();
        assert_eq!(one, two);
        assert!(one.data.starts_with(b"<spectrum"));
        assert!(one.data.ends_with(b"</spectrum>"));
        assert_eq!(one.entry_type, EntryType::Spectrum);
    }

    #[test_log::test]
    fn substring_search_by_native_id() {
        let (_file, mut reader) = open_indexed(10);
        let entry = reader.get("scan=7").unwrap();
        assert_eq!(entry.as_spectrum().unwrap().scan_number(), Some(7));
        // the discovered id was learned under its full native form
        assert!(reader
            .offset_index()
            .contains_key(&EntryId::from_native("controllerType=0 controllerNumber=1 scan=7")));
    }

    #[test_log::test]
    fn missing_string_identifiers_are_not_found() {
        let (_file, mut reader) = open_indexed(3);
        assert!(matches!(
            reader.get("no such spectrum"),
            Err(SeekError::NotFound(_))
        ));
    }

    #[test_log::test]
    fn single_spectrum_files() {
        let (_file, mut reader) = open_indexed(1);
        assert_eq!(reader.seek_list().len(), 1);
        let entry = reader.get(1u64).unwrap();
        assert_eq!(entry.as_spectrum().unwrap().scan_number(), Some(1));
    }

    #[test_log::test]
    fn tic_is_streamed_even_without_an_index() {
        let (_file, mut reader) = open_unindexed(5, false);
        let entry = reader.get("TIC").unwrap();
        assert_eq!(entry.id(), "TIC");
    }

    #[test_log::test]
    fn read_passes_decoded_text_through() {
        let (_file, mut reader) = open_indexed(3);
        let head = reader.read(38).unwrap();
        assert!(head.starts_with("<?xml version=\"1.0\""));
        reader.close();
    }

    #[test_log::test]
    fn unknown_encodings_are_rejected() {
        let doc = test_data::small_indexed(1);
        let file = test_data::write_temp(&doc.bytes);
        let result = MzMLSeekReader::builder()
            .encoding("not-a-charset")
            .open(file.path());
        assert!(matches!(result, Err(SeekError::UnsupportedEncoding(_))));
    }

    #[test_log::test]
    fn latin_1_text_handles_open() {
        let doc = test_data::small_indexed(2);
        let file = test_data::write_temp(&doc.bytes);
        let mut reader = MzMLSeekReader::builder()
            .encoding("iso-8859-1")
            .open(file.path())
            .unwrap();
        let entry = reader.get(2u64).unwrap();
        assert_eq!(entry.as_spectrum().unwrap().scan_number(), Some(2));
    }
}
