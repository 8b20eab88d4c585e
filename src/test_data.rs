//! Synthesized mzML documents for tests.
//!
//! The generator records the true byte offset of every element it writes,
//! so index round-trip assertions can be exact. Documents mirror the shape
//! msconvert produces: an `<indexedmzML>` wrapper, one spectrum per line
//! with Thermo-style native ids, a `TIC` chromatogram, and optionally the
//! index trailer with correct offsets.

use std::io::Write;

use tempfile::NamedTempFile;

pub(crate) struct TestDocument {
    pub bytes: Vec<u8>,
    /// `(scan, offset)` of each `<spectrum` opening, in scan order
    pub spectrum_offsets: Vec<(u64, u64)>,
    /// Offset of the `<chromatogram` opening of the TIC
    pub chromatogram_offset: u64,
    /// Offset of the `<indexList` element (zero when absent)
    pub index_list_offset: u64,
}

/// A document with scans `1..=scans`, a TIC chromatogram, and a valid
/// index trailer.
pub(crate) fn small_indexed(scans: u64) -> TestDocument {
    build_document(scans, true)
}

/// The same document with the index trailer stripped.
pub(crate) fn small_unindexed(scans: u64) -> TestDocument {
    build_document(scans, false)
}

pub(crate) fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn encode_f64(values: &[f64]) -> String {
    base64_simd::STANDARD.encode_to_string(bytemuck::cast_slice::<f64, u8>(values))
}

fn spectrum_xml(scan: u64) -> String {
    let mz = encode_f64(&[
        100.25 + scan as f64,
        220.50 + scan as f64,
        340.75 + scan as f64,
    ]);
    let intensity = encode_f64(&[1000.0 * scan as f64, 500.0, 125.5]);
    format!(
        concat!(
            r#"<spectrum index="{index}" id="controllerType=0 controllerNumber=1 scan={scan}" defaultArrayLength="3">"#,
            r#"<cvParam cvRef="MS" accession="MS:1000511" name="ms level" value="1"/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000127" name="centroid spectrum" value=""/>"#,
            r#"<binaryDataArrayList count="2">"#,
            r#"<binaryDataArray encodedLength="32">"#,
            r#"<cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000576" name="no compression" value=""/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000514" name="m/z array" value=""/>"#,
            r#"<binary>{mz}</binary>"#,
            r#"</binaryDataArray>"#,
            r#"<binaryDataArray encodedLength="32">"#,
            r#"<cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000576" name="no compression" value=""/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000515" name="intensity array" value=""/>"#,
            r#"<binary>{intensity}</binary>"#,
            r#"</binaryDataArray>"#,
            r#"</binaryDataArrayList>"#,
            r#"</spectrum>"#,
        ),
        index = scan - 1,
        scan = scan,
        mz = mz,
        intensity = intensity,
    )
}

fn chromatogram_xml(points: u64) -> String {
    let time: Vec<f64> = (0..points).map(|i| 0.1 * i as f64).collect();
    let intensity: Vec<f64> = (0..points).map(|i| 10_000.0 - 100.0 * i as f64).collect();
    format!(
        concat!(
            r#"<chromatogram index="0" id="TIC" defaultArrayLength="{points}">"#,
            r#"<cvParam cvRef="MS" accession="MS:1000235" name="total ion current chromatogram" value=""/>"#,
            r#"<binaryDataArrayList count="2">"#,
            r#"<binaryDataArray>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000576" name="no compression" value=""/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000595" name="time array" value=""/>"#,
            r#"<binary>{time}</binary>"#,
            r#"</binaryDataArray>"#,
            r#"<binaryDataArray>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000576" name="no compression" value=""/>"#,
            r#"<cvParam cvRef="MS" accession="MS:1000515" name="intensity array" value=""/>"#,
            r#"<binary>{intensity}</binary>"#,
            r#"</binaryDataArray>"#,
            r#"</binaryDataArrayList>"#,
            r#"</chromatogram>"#,
        ),
        points = points,
        time = encode_f64(&time),
        intensity = encode_f64(&intensity),
    )
}

fn build_document(scans: u64, with_trailer: bool) -> TestDocument {
    let mut doc: Vec<u8> = Vec::new();
    doc.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    doc.extend_from_slice(b"<indexedmzML xmlns=\"http://psi.hupo.org/ms/mzml\">\n");
    doc.extend_from_slice(
        b"  <mzML xmlns=\"http://psi.hupo.org/ms/mzml\" id=\"small_run\" version=\"1.1.0\">\n",
    );
    doc.extend_from_slice(b"    <run id=\"small_run\" defaultInstrumentConfigurationRef=\"IC1\">\n");
    doc.extend_from_slice(
        format!(
            "      <spectrumList count=\"{}\" defaultDataProcessingRef=\"DP1\">\n",
            scans
        )
        .as_bytes(),
    );

    let mut spectrum_offsets = Vec::new();
    for scan in 1..=scans {
        doc.extend_from_slice(b"        ");
        spectrum_offsets.push((scan, doc.len() as u64));
        doc.extend_from_slice(spectrum_xml(scan).as_bytes());
        doc.push(b'\n');
    }
    doc.extend_from_slice(b"      </spectrumList>\n");
    doc.extend_from_slice(b"      <chromatogramList count=\"1\" defaultDataProcessingRef=\"DP1\">\n");
    doc.extend_from_slice(b"        ");
    let chromatogram_offset = doc.len() as u64;
    doc.extend_from_slice(chromatogram_xml(scans).as_bytes());
    doc.push(b'\n');
    doc.extend_from_slice(b"      </chromatogramList>\n");
    doc.extend_from_slice(b"    </run>\n");
    doc.extend_from_slice(b"  </mzML>\n");

    let mut index_list_offset = 0;
    if with_trailer {
        index_list_offset = doc.len() as u64;
        doc.extend_from_slice(b"  <indexList count=\"2\">\n");
        doc.extend_from_slice(b"    <index name=\"spectrum\">\n");
        for (scan, offset) in &spectrum_offsets {
            doc.extend_from_slice(
                format!(
                    "      <offset idRef=\"controllerType=0 controllerNumber=1 scan={}\">{}</offset>\n",
                    scan, offset
                )
                .as_bytes(),
            );
        }
        doc.extend_from_slice(b"    </index>\n");
        doc.extend_from_slice(b"    <index name=\"chromatogram\">\n");
        doc.extend_from_slice(
            format!("      <offset idRef=\"TIC\">{}</offset>\n", chromatogram_offset).as_bytes(),
        );
        doc.extend_from_slice(b"    </index>\n");
        doc.extend_from_slice(b"  </indexList>\n");
        doc.extend_from_slice(
            format!("  <indexListOffset>{}</indexListOffset>\n", index_list_offset).as_bytes(),
        );
        doc.extend_from_slice(
            b"  <fileChecksum>0000000000000000000000000000000000000000</fileChecksum>\n",
        );
    }
    doc.extend_from_slice(b"</indexedmzML>\n");

    TestDocument {
        bytes: doc,
        spectrum_offsets,
        chromatogram_offset,
        index_list_offset,
    }
}
