//! Chunked reads with tag-boundary carry-over.
//!
//! Every pattern scan over the raw file works on fixed-size chunks, and a
//! tag may straddle a chunk boundary. After each chunk the stream is
//! extended byte by byte until the next `>`, `<`, or space so a pattern like
//! `</spectrum>` is never split in half.

use std::io::{self, Read};

/// The most bytes appended past a chunk while looking for a tag boundary.
pub(crate) const TAG_BOUNDARY_CAP: usize = 12;

/// Read single bytes until one of `>`, `<`, or space is consumed, capped at
/// [`TAG_BOUNDARY_CAP`] bytes.
pub(crate) fn read_until_tag_end<R: Read>(seeker: &mut R) -> io::Result<Vec<u8>> {
    let mut string = Vec::with_capacity(TAG_BOUNDARY_CAP);
    let mut curr_byte = [0u8; 1];
    for _ in 0..TAG_BOUNDARY_CAP {
        if seeker.read(&mut curr_byte)? == 0 {
            break;
        }
        string.push(curr_byte[0]);
        if matches!(curr_byte[0], b'>' | b'<' | b' ') {
            break;
        }
    }
    Ok(string)
}

/// Append up to `size` bytes from `seeker` onto `buf`, returning how many
/// were actually read. Stops early only at end of file.
pub(crate) fn read_up_to<R: Read>(
    seeker: &mut R,
    size: usize,
    buf: &mut Vec<u8>,
) -> io::Result<usize> {
    let start = buf.len();
    buf.resize(start + size, 0);
    let mut filled = 0;
    while filled < size {
        let n = seeker.read(&mut buf[start + filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(start + filled);
    Ok(filled)
}

/// Append one chunk and its tag-boundary extension onto `buf`. Returns the
/// total number of bytes appended, zero at end of file.
pub(crate) fn read_chunk_at_boundary<R: Read>(
    seeker: &mut R,
    size: usize,
    buf: &mut Vec<u8>,
) -> io::Result<usize> {
    let n = read_up_to(seeker, size, buf)?;
    if n == 0 {
        return Ok(0);
    }
    let extension = read_until_tag_end(seeker)?;
    buf.extend_from_slice(&extension);
    Ok(n + extension.len())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn extension_stops_at_tag_boundary() {
        let mut stream = Cursor::new(b"rum>rest of the content".to_vec());
        let extension = read_until_tag_end(&mut stream).unwrap();
        assert_eq!(extension, b"rum>");
        assert_eq!(stream.position(), 4);
    }

    #[test]
    fn extension_respects_the_cap() {
        let mut stream = Cursor::new(vec![b'a'; 64]);
        let extension = read_until_tag_end(&mut stream).unwrap();
        assert_eq!(extension.len(), TAG_BOUNDARY_CAP);
    }

    #[test]
    fn chunk_read_never_splits_a_close_tag() {
        let data = b"aaaa</spectrum> tail".to_vec();
        let mut stream = Cursor::new(data);
        let mut buf = Vec::new();
        // a 10-byte chunk would end mid-tag without the extension
        let n = read_chunk_at_boundary(&mut stream, 10, &mut buf).unwrap();
        assert!(n > 10);
        assert!(buf.windows(11).any(|w| w == b"</spectrum>"));
    }

    #[test]
    fn read_up_to_reports_eof() {
        let mut stream = Cursor::new(b"xy".to_vec());
        let mut buf = Vec::new();
        assert_eq!(read_up_to(&mut stream, 8, &mut buf).unwrap(), 2);
        assert_eq!(read_up_to(&mut stream, 8, &mut buf).unwrap(), 0);
        assert_eq!(buf, b"xy");
    }
}
