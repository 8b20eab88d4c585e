//! A compact object model for single spectrum and chromatogram XML
//! fragments.
//!
//! The seek engine produces byte-accurate fragments; the builders here turn
//! one fragment into a typed value carrying the native id, the declarative
//! attributes, the controlled-vocabulary parameters, and the decoded binary
//! data arrays. Only the encodings found in uncompressed mzML are handled:
//! base64 payloads of 32- or 64-bit floats, optionally zlib-compressed.

use std::io::prelude::*;

use flate2::write::ZlibDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::patterns;

/// The measured precision handed to builders when the caller does not
/// specify one.
pub const DEFAULT_MEASURED_PRECISION: f64 = 5e-6;

/**
All the ways building an object from an XML fragment can go wrong
*/
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("An XML error was encountered in the fragment: {0}")]
    XMLError(#[from] quick_xml::Error),
    #[error("The fragment does not begin with a {0} element")]
    UnexpectedRoot(&'static str),
    #[error("The fragment is missing its id attribute")]
    MissingId,
    #[error("The {0} attribute could not be parsed: {1}")]
    Attribute(&'static str, String),
    #[error("Failed to decode base64 array data: {0}")]
    Base64(String),
    #[error("Failed to inflate compressed array data: {0}")]
    Decompression(String),
    #[error("Array byte length {0} is not a multiple of the element size {1}")]
    ArraySizeMismatch(usize, usize),
}

/// A single controlled-vocabulary parameter attached to an element.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub accession: String,
    pub value: String,
}

/// The kinds of binary data arrays the builders recognize.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    #[default]
    Unknown,
    Mz,
    Intensity,
    Time,
}

/// The stored element type of a binary data array.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ArrayDType {
    Float32,
    #[default]
    Float64,
}

impl ArrayDType {
    fn size_of(&self) -> usize {
        match self {
            ArrayDType::Float32 => 4,
            ArrayDType::Float64 => 8,
        }
    }
}

/// How a binary data array payload was compressed on disk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ArrayCompression {
    #[default]
    NoCompression,
    Zlib,
}

/// One decoded `<binaryDataArray>`.
#[derive(Debug, Default, Clone)]
pub struct BinaryDataArray {
    pub kind: ArrayKind,
    pub dtype: ArrayDType,
    pub compression: ArrayCompression,
    pub values: Vec<f64>,
}

impl BinaryDataArray {
    fn decompress_zlib(bytestring: &[u8]) -> Result<Vec<u8>, BuilderError> {
        let mut decompressor = ZlibDecoder::new(Vec::new());
        decompressor
            .write_all(bytestring)
            .map_err(|e| BuilderError::Decompression(e.to_string()))?;
        decompressor
            .finish()
            .map_err(|e| BuilderError::Decompression(e.to_string()))
    }

    fn decode(
        payload: &[u8],
        kind: ArrayKind,
        dtype: ArrayDType,
        compression: ArrayCompression,
    ) -> Result<BinaryDataArray, BuilderError> {
        if payload.is_empty() {
            return Ok(BinaryDataArray {
                kind,
                dtype,
                compression,
                values: Vec::new(),
            });
        }
        let bytestring = base64_simd::STANDARD
            .decode_type::<Vec<u8>>(payload)
            .map_err(|e| BuilderError::Base64(e.to_string()))?;
        let bytestring = match compression {
            ArrayCompression::NoCompression => bytestring,
            ArrayCompression::Zlib => Self::decompress_zlib(&bytestring)?,
        };
        if bytestring.len() % dtype.size_of() != 0 {
            return Err(BuilderError::ArraySizeMismatch(
                bytestring.len(),
                dtype.size_of(),
            ));
        }
        let values = match dtype {
            ArrayDType::Float64 => bytemuck::pod_collect_to_vec::<u8, f64>(&bytestring),
            ArrayDType::Float32 => bytemuck::pod_collect_to_vec::<u8, f32>(&bytestring)
                .into_iter()
                .map(f64::from)
                .collect(),
        };
        Ok(BinaryDataArray {
            kind,
            dtype,
            compression,
            values,
        })
    }
}

/// One spectrum, built from its XML fragment.
#[derive(Debug, Default, Clone)]
pub struct Spectrum {
    /// The native id string exactly as written in the file
    pub id: String,
    /// The position of the spectrum in the spectrum list
    pub index: Option<usize>,
    pub default_array_length: Option<usize>,
    pub measured_precision: f64,
    /// Every cvParam outside of the binary data arrays
    pub params: Vec<Param>,
    pub arrays: Vec<BinaryDataArray>,
}

impl Spectrum {
    /// Build a spectrum from the byte-accurate fragment text of one
    /// `<spectrum>` element.
    pub fn from_fragment(xml: &str, measured_precision: f64) -> Result<Spectrum, BuilderError> {
        let builder = ElementBuilder::parse(xml, "spectrum")?;
        Ok(Spectrum {
            id: builder.id,
            index: builder.index,
            default_array_length: builder.default_array_length,
            measured_precision,
            params: builder.params,
            arrays: builder.arrays,
        })
    }

    /// The integer scan number embedded in the native id, either as an
    /// explicit `scan=`/`scanId=` field or as the trailing run of digits.
    pub fn scan_number(&self) -> Option<u64> {
        let id = self.id.as_bytes();
        patterns::scan_in_string(id).or_else(|| patterns::trailing_scan_digits(id))
    }

    pub fn mz(&self) -> Option<&[f64]> {
        self.array(ArrayKind::Mz)
    }

    pub fn intensity(&self) -> Option<&[f64]> {
        self.array(ArrayKind::Intensity)
    }

    fn array(&self, kind: ArrayKind) -> Option<&[f64]> {
        self.arrays
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.values.as_slice())
    }

    pub fn get_param_by_accession(&self, accession: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.accession == accession)
    }
}

/// One chromatogram, built from its XML fragment.
#[derive(Debug, Default, Clone)]
pub struct Chromatogram {
    /// The id string, `TIC` for the total ion chromatogram
    pub id: String,
    pub index: Option<usize>,
    pub default_array_length: Option<usize>,
    pub measured_precision: f64,
    pub params: Vec<Param>,
    pub arrays: Vec<BinaryDataArray>,
}

impl Chromatogram {
    /// Build a chromatogram from the fragment text of one `<chromatogram>`
    /// element.
    pub fn from_fragment(xml: &str, measured_precision: f64) -> Result<Chromatogram, BuilderError> {
        let builder = ElementBuilder::parse(xml, "chromatogram")?;
        Ok(Chromatogram {
            id: builder.id,
            index: builder.index,
            default_array_length: builder.default_array_length,
            measured_precision,
            params: builder.params,
            arrays: builder.arrays,
        })
    }

    pub fn time(&self) -> Option<&[f64]> {
        self.array(ArrayKind::Time)
    }

    pub fn intensity(&self) -> Option<&[f64]> {
        self.array(ArrayKind::Intensity)
    }

    fn array(&self, kind: ArrayKind) -> Option<&[f64]> {
        self.arrays
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.values.as_slice())
    }

    pub fn get_param_by_accession(&self, accession: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.accession == accession)
    }
}

#[derive(Debug, Default)]
struct PendingArray {
    kind: ArrayKind,
    dtype: ArrayDType,
    compression: ArrayCompression,
}

#[derive(Debug, Default)]
struct ElementBuilder {
    id: String,
    index: Option<usize>,
    default_array_length: Option<usize>,
    params: Vec<Param>,
    arrays: Vec<BinaryDataArray>,
}

impl ElementBuilder {
    fn parse(xml: &str, root: &'static str) -> Result<ElementBuilder, BuilderError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut builder = ElementBuilder::default();
        let mut seen_root = false;
        let mut current_array: Option<PendingArray> = None;
        let mut in_binary = false;
        let mut payload: Vec<u8> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(ref e) => {
                    let name = e.name();
                    if !seen_root {
                        if name.as_ref() != root.as_bytes() {
                            return Err(BuilderError::UnexpectedRoot(root));
                        }
                        seen_root = true;
                        builder.read_root_attributes(e)?;
                    } else {
                        match name.as_ref() {
                            b"binaryDataArray" => current_array = Some(PendingArray::default()),
                            b"binary" => {
                                in_binary = true;
                                payload.clear();
                            }
                            b"cvParam" => {
                                builder.handle_cv_param(e, current_array.as_mut())?;
                            }
                            _ => {}
                        }
                    }
                }
                Event::Empty(ref e) => {
                    if seen_root && e.name().as_ref() == b"cvParam" {
                        builder.handle_cv_param(e, current_array.as_mut())?;
                    }
                }
                Event::Text(ref e) => {
                    if in_binary {
                        payload.extend_from_slice(e.unescape()?.as_bytes());
                    }
                }
                Event::End(ref e) => match e.name().as_ref() {
                    b"binary" => in_binary = false,
                    b"binaryDataArray" => {
                        if let Some(pending) = current_array.take() {
                            builder.arrays.push(BinaryDataArray::decode(
                                &payload,
                                pending.kind,
                                pending.dtype,
                                pending.compression,
                            )?);
                            payload.clear();
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(BuilderError::UnexpectedRoot(root));
        }
        if builder.id.is_empty() {
            return Err(BuilderError::MissingId);
        }
        Ok(builder)
    }

    fn read_root_attributes(
        &mut self,
        event: &quick_xml::events::BytesStart<'_>,
    ) -> Result<(), BuilderError> {
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(quick_xml::Error::from)?;
            match attr.key.as_ref() {
                b"id" => {
                    self.id = attr.unescape_value()?.to_string();
                }
                b"index" => {
                    let value = attr.unescape_value()?;
                    self.index = Some(
                        value
                            .parse()
                            .map_err(|_| BuilderError::Attribute("index", value.to_string()))?,
                    );
                }
                b"defaultArrayLength" => {
                    let value = attr.unescape_value()?;
                    self.default_array_length = Some(value.parse().map_err(|_| {
                        BuilderError::Attribute("defaultArrayLength", value.to_string())
                    })?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_cv_param(
        &mut self,
        event: &quick_xml::events::BytesStart<'_>,
        current_array: Option<&mut PendingArray>,
    ) -> Result<(), BuilderError> {
        let mut param = Param::default();
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(quick_xml::Error::from)?;
            match attr.key.as_ref() {
                b"name" => param.name = attr.unescape_value()?.to_string(),
                b"accession" => param.accession = attr.unescape_value()?.to_string(),
                b"value" => param.value = attr.unescape_value()?.to_string(),
                _ => {}
            }
        }
        if let Some(array) = current_array {
            match param.accession.as_str() {
                "MS:1000523" => array.dtype = ArrayDType::Float64,
                "MS:1000521" => array.dtype = ArrayDType::Float32,
                "MS:1000574" => array.compression = ArrayCompression::Zlib,
                "MS:1000576" => array.compression = ArrayCompression::NoCompression,
                "MS:1000514" => array.kind = ArrayKind::Mz,
                "MS:1000515" => array.kind = ArrayKind::Intensity,
                "MS:1000595" => array.kind = ArrayKind::Time,
                _ => {}
            }
        } else {
            self.params.push(param);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::*;

    fn encode_f64(values: &[f64]) -> String {
        base64_simd::STANDARD.encode_to_string(bytemuck::cast_slice::<f64, u8>(values))
    }

    fn encode_f32_zlib(values: &[f32]) -> String {
        let mut compressor = ZlibEncoder::new(Vec::new(), Compression::best());
        compressor
            .write_all(bytemuck::cast_slice::<f32, u8>(values))
            .unwrap();
        base64_simd::STANDARD.encode_to_string(compressor.finish().unwrap())
    }

    fn spectrum_fragment() -> String {
        let mz = encode_f64(&[104.5, 221.3, 389.1]);
        let intensity = encode_f32_zlib(&[12.0, 340.5, 9.25]);
        format!(
            r#"<spectrum index="7" id="controllerType=0 controllerNumber=1 scan=8" defaultArrayLength="3">
  <cvParam cvRef="MS" accession="MS:1000511" name="ms level" value="1"/>
  <binaryDataArrayList count="2">
    <binaryDataArray encodedLength="32">
      <cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>
      <cvParam cvRef="MS" accession="MS:1000576" name="no compression" value=""/>
      <cvParam cvRef="MS" accession="MS:1000514" name="m/z array" value=""/>
      <binary>{mz}</binary>
    </binaryDataArray>
    <binaryDataArray encodedLength="28">
      <cvParam cvRef="MS" accession="MS:1000521" name="32-bit float" value=""/>
      <cvParam cvRef="MS" accession="MS:1000574" name="zlib compression" value=""/>
      <cvParam cvRef="MS" accession="MS:1000515" name="intensity array" value=""/>
      <binary>{intensity}</binary>
    </binaryDataArray>
  </binaryDataArrayList>
</spectrum>"#
        )
    }

    #[test]
    fn build_spectrum_from_fragment() {
        let spectrum =
            Spectrum::from_fragment(&spectrum_fragment(), DEFAULT_MEASURED_PRECISION).unwrap();
        assert_eq!(spectrum.id, "controllerType=0 controllerNumber=1 scan=8");
        assert_eq!(spectrum.scan_number(), Some(8));
        assert_eq!(spectrum.index, Some(7));
        assert_eq!(spectrum.default_array_length, Some(3));
        assert_eq!(spectrum.measured_precision, DEFAULT_MEASURED_PRECISION);
        assert!(spectrum.get_param_by_accession("MS:1000511").is_some());

        assert_eq!(spectrum.mz().unwrap(), &[104.5, 221.3, 389.1]);
        let intensity = spectrum.intensity().unwrap();
        assert_eq!(intensity.len(), 3);
        assert!((intensity[1] - 340.5).abs() < 1e-4);
    }

    #[test]
    fn build_chromatogram_from_fragment() {
        let time = encode_f64(&[0.1, 0.2, 0.3]);
        let intensity = encode_f64(&[5.0, 6.0, 7.0]);
        let fragment = format!(
            r#"<chromatogram index="0" id="TIC" defaultArrayLength="3">
  <cvParam cvRef="MS" accession="MS:1000235" name="total ion current chromatogram" value=""/>
  <binaryDataArrayList count="2">
    <binaryDataArray>
      <cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>
      <cvParam cvRef="MS" accession="MS:1000576" name="no compression" value=""/>
      <cvParam cvRef="MS" accession="MS:1000595" name="time array" value=""/>
      <binary>{time}</binary>
    </binaryDataArray>
    <binaryDataArray>
      <cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>
      <cvParam cvRef="MS" accession="MS:1000576" name="no compression" value=""/>
      <cvParam cvRef="MS" accession="MS:1000515" name="intensity array" value=""/>
      <binary>{intensity}</binary>
    </binaryDataArray>
  </binaryDataArrayList>
</chromatogram>"#
        );
        let chromatogram =
            Chromatogram::from_fragment(&fragment, DEFAULT_MEASURED_PRECISION).unwrap();
        assert_eq!(chromatogram.id, "TIC");
        assert_eq!(chromatogram.time().unwrap(), &[0.1, 0.2, 0.3]);
        assert_eq!(chromatogram.intensity().unwrap(), &[5.0, 6.0, 7.0]);
    }

    #[test]
    fn wrong_root_is_rejected() {
        let fragment = r#"<chromatogram index="0" id="TIC"></chromatogram>"#;
        assert!(matches!(
            Spectrum::from_fragment(fragment, DEFAULT_MEASURED_PRECISION),
            Err(BuilderError::UnexpectedRoot("spectrum"))
        ));
    }

    #[test]
    fn missing_id_is_rejected() {
        let fragment = r#"<spectrum index="0" defaultArrayLength="0"></spectrum>"#;
        assert!(matches!(
            Spectrum::from_fragment(fragment, DEFAULT_MEASURED_PRECISION),
            Err(BuilderError::MissingId)
        ));
    }
}
