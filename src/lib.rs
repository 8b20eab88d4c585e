//! `mzseek` provides random access to individual spectra and chromatograms
//! in uncompressed mzML files, without parsing the whole document.
//!
//! mzML files are routinely multiple gigabytes, and the embedded index that
//! is supposed to make random access cheap is often missing, truncated, or
//! malformed depending on which converter wrote the file. [`MzMLSeekReader`]
//! copes by degrading through four strategies:
//!
//!   1. The index trailer at the end of an `<indexedmzML>` document, when
//!      one exists and can be read.
//!   2. A full scan of the file to rebuild the index, when requested.
//!   3. Jump search over the known scan range, learning the offset of every
//!      spectrum it lands on along the way.
//!   4. Interpolation and plain linear scanning as last resorts.
//!
//! Requests are heterogeneous: an integer scan number, a vendor-specific
//! native id string, or the reserved `TIC` label for the total ion
//! chromatogram.
//!
//! # Example
//! ```rust,no_run
//! use mzseek::{Entry, MzMLSeekReader};
//!
//! # fn main() -> Result<(), mzseek::SeekError> {
//! let mut reader = MzMLSeekReader::open_path("./test/data/small.mzML")?;
//! match reader.get(42u64)? {
//!     Entry::Spectrum(spectrum) => {
//!         println!("Scan {:?} has {} peaks", spectrum.scan_number(), spectrum.mz().map(|a| a.len()).unwrap_or(0));
//!     }
//!     Entry::Chromatogram(chromatogram) => {
//!         println!("Chromatogram {}", chromatogram.id);
//!     }
//! }
//! let tic = reader.get("TIC")?;
//! println!("TIC id: {}", tic.id());
//! # Ok(())
//! # }
//! ```
//!
//! The reader learns as it goes: offsets discovered during one lookup make
//! the next lookup cheaper, so `get` takes `&mut self` and sharing a reader
//! across threads requires serialising whole calls.

pub mod index;
pub mod patterns;
pub mod reader;
pub mod spectrum;

#[cfg(test)]
pub(crate) mod test_data;

pub use crate::index::{ByteSpan, EntryId, OffsetIndex, SeekList};
pub use crate::reader::{
    Entry, EntryType, Fragment, MzMLSeekReader, MzMLSeekReaderBuilder, SeekError,
};
pub use crate::spectrum::{
    BuilderError, Chromatogram, Param, Spectrum, DEFAULT_MEASURED_PRECISION,
};
