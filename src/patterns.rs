//! The catalogue of byte-oriented regular expressions used to recognize
//! spectrum and chromatogram tags, id attributes, and embedded index entries
//! in uncompressed mzML documents.
//!
//! All patterns are compiled once and shared process-wide. They operate on
//! raw bytes because the seek engine works against binary file handles where
//! byte offsets matter and no decoding has happened yet.

use std::sync::LazyLock;

use regex::bytes::{Captures, Regex};

/// Matches a `<spectrum ...>` opening tag, capturing two `(key, value)`
/// attribute pairs so the `id` attribute can be recovered regardless of
/// whether `index` or `id` comes first.
pub static SPEC_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<spectrum[^>]*?(index|id)="(.*?)"[^>]*?(index|id)="(.*?)""#).unwrap()
});

/// Matches the literal `<spectrum ` opening, trailing space included.
pub static SPEC_OPEN_SIMPLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<spectrum ").unwrap());

/// Captures the `id="..."` attribute value of a spectrum opening tag as `id`.
pub static SPEC_ID_SIMPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<spectrum[^>]*id="(?P<id>[^"]+)""#).unwrap());

/// Matches `</spectrum>`.
pub static SPEC_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</spectrum>").unwrap());

/// Matches a `<chromatogram ...>` opening tag, capturing its id.
pub static CHROM_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<chromatogram\s.*?id="(.*?)""#).unwrap());

/// Matches `</chromatogram>`.
pub static CHROM_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</chromatogram>").unwrap());

/// Matches the `<indexListOffset>` locator written near the end of an
/// `<indexedmzML>` document, capturing the byte offset of the index list.
pub static INDEX_LIST_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<indexListOffset>(?P<offset>[0-9]+)</indexListOffset>").unwrap()
});

/// Matches the trailer entry recording the byte offset of the `TIC`
/// chromatogram.
pub static TIC_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:nativeID|idRef)="TIC">(?P<offset>[0-9]+)</offset"#).unwrap());

/// Matches a default mzML trailer entry, `... scan=N">OFFSET</offset>` or
/// `nativeID="N">OFFSET</offset>`. The `nativeID` capture may be empty when
/// a converter wrote a blank id.
pub static SPEC_INDEX_DEFAULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:scan=|nativeID=")(?P<nativeID>[0-9]*)">(?P<offset>[0-9]+)</offset>"#).unwrap()
});

/// Matches a trailer entry written by SCIEX conversion tools, which key
/// spectra by `cycle=` instead of `scan=`.
pub static SPEC_INDEX_SCIEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"cycle=(?P<nativeID>[0-9]+) experiment=[0-9]+">(?P<offset>[0-9]+)</offset>"#)
        .unwrap()
});

/// Matches an `idRef`-style trailer entry with an arbitrary native id string.
pub static SIM_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"idRef="(?P<nativeID>.*)">(?P<offset>[0-9]+)</offset>"#).unwrap()
});

/// The SCIEX variant of [`SIM_INDEX`] with a fully structured native id.
pub static SIM_INDEX_SCIEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"idRef="sample=[0-9]+ period=[0-9]+ cycle=(?P<nativeID>[0-9]+) experiment=[0-9]+">(?P<offset>[0-9]+)</offset>"#,
    )
    .unwrap()
});

/// The final run of digits in a native id string, interpreted as the scan
/// number.
pub static TRAILING_SCAN_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]*$").unwrap());

/// Matches `scan=N` or `scanId=N` anywhere inside a native id string.
pub static SCAN_IN_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:scan|scanId)=(?P<scan>[0-9]+)").unwrap());

/// Matches any `<spectrum ... id="...">` opening, the id value allowed to be
/// empty. Used when rebuilding the index by scanning the whole document.
pub static SPEC_ANY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<\s*spectrum[^>]*id="([^"]*)""#).unwrap());

/// Matches any `<chromatogram ... id="...">` opening, empty id allowed.
pub static CHROM_ANY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<\s*chromatogram[^>]*id="([^"]*)""#).unwrap());

/// Captures the declared `count` of a `<spectrumList>`.
pub static SPEC_LIST_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<\s*spectrumList\s*count="([^"]*)""#).unwrap());

/// Captures the declared `count` of a `<chromatogramList>`.
pub static CHROM_LIST_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<\s*chromatogramList\s*count="([^"]*)""#).unwrap());

/// Compile the substring matcher used by the string identifier search: a full
/// spectrum opening tag whose id contains `needle`.
pub(crate) fn spectrum_id_substring(needle: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r#"<\s*spectrum[^>]*index="[0-9]+"\sid="(.*{}.*)"\sdefaultArrayLength="[0-9]+">"#,
        regex::escape(needle)
    ))
}

/// Recover the `id` attribute value from a [`SPEC_OPEN`] match by pairing
/// its `(key, value)` capture groups.
pub(crate) fn spectrum_id_from_open<'a>(caps: &Captures<'a>) -> Option<&'a [u8]> {
    for (key, value) in [(1, 2), (3, 4)] {
        if caps.get(key).map(|m| m.as_bytes()) == Some(b"id".as_slice()) {
            return caps.get(value).map(|m| m.as_bytes());
        }
    }
    None
}

/// The trailing digits of a native id as a scan number, if there are any.
pub(crate) fn trailing_scan_digits(id: &[u8]) -> Option<u64> {
    TRAILING_SCAN_DIGITS
        .find(id)
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .and_then(|s| s.parse().ok())
}

/// The canonical scan number embedded in a structured native id, if present.
pub(crate) fn scan_in_string(id: &[u8]) -> Option<u64> {
    SCAN_IN_STRING
        .captures(id)
        .and_then(|c| c.name("scan"))
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .and_then(|s| s.parse().ok())
}

/// Parse a digits-only capture group as a byte offset.
pub(crate) fn capture_u64(caps: &Captures<'_>, name: &str) -> Option<u64> {
    caps.name(name)
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .and_then(|s| s.parse().ok())
}
