//! Conversion value types: kinds, parameters, requests, and artifacts.
//!
//! [`ConversionKind`] is a closed enum — the session state machine can only
//! ever request one of these, which is what lets the dispatcher treat an
//! unknown kind as an invariant violation rather than a user error.
//!
//! A [`ConversionRequest`] is ephemeral: built when a workflow completes,
//! consumed by the dispatcher, never persisted. [`Artifact`]s are files on
//! scratch storage, exclusively owned by one session or one in-flight
//! request and destroyed by the storage manager on every exit path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The closed set of conversions this core can orchestrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    PdfToWord,
    WordToPdf,
    PdfToImages,
    ImagesToPdf,
    PdfToText,
    ExcelToPdf,
    OcrExtract,
    CompressImage,
    Grayscale,
    Resize,
    FormatConvert,
}

impl ConversionKind {
    /// The input class a single-document workflow of this kind accepts.
    ///
    /// `ImagesToPdf` is listed for completeness: it is driven by the
    /// collecting-images workflow, which gates on [`InputClass::Image`]
    /// per received file rather than on a single upload.
    pub fn expected_input(self) -> InputClass {
        match self {
            ConversionKind::PdfToWord
            | ConversionKind::PdfToImages
            | ConversionKind::PdfToText => InputClass::Pdf,
            ConversionKind::WordToPdf => InputClass::Docx,
            ConversionKind::ExcelToPdf => InputClass::Xlsx,
            ConversionKind::ImagesToPdf
            | ConversionKind::OcrExtract
            | ConversionKind::CompressImage
            | ConversionKind::Grayscale
            | ConversionKind::Resize
            | ConversionKind::FormatConvert => InputClass::Image,
        }
    }

    /// Kinds that cannot be dispatched straight from the matching upload
    /// because they still need a user-supplied parameter.
    pub fn needs_parameter(self) -> bool {
        matches!(self, ConversionKind::Resize)
    }

    /// Multi-input collection workflow kinds (collect until `/done`).
    pub fn is_collecting(self) -> bool {
        matches!(self, ConversionKind::ImagesToPdf)
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionKind::PdfToWord => "pdf_to_word",
            ConversionKind::WordToPdf => "word_to_pdf",
            ConversionKind::PdfToImages => "pdf_to_images",
            ConversionKind::ImagesToPdf => "images_to_pdf",
            ConversionKind::PdfToText => "pdf_to_text",
            ConversionKind::ExcelToPdf => "excel_to_pdf",
            ConversionKind::OcrExtract => "ocr_extract",
            ConversionKind::CompressImage => "compress_image",
            ConversionKind::Grayscale => "grayscale",
            ConversionKind::Resize => "resize",
            ConversionKind::FormatConvert => "format_convert",
        };
        f.write_str(s)
    }
}

/// Coarse classification of an inbound file, derived from its declared MIME
/// type. Classification itself happens at the router boundary; the core
/// only compares classes against the active workflow's expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputClass {
    Image,
    Pdf,
    Docx,
    Xlsx,
    /// Anything the bot does not convert.
    Other,
}

impl InputClass {
    /// Classify a file by extension. Used for adapter outputs, which come
    /// back as bare paths with no declared MIME type.
    pub fn from_extension(path: &std::path::Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("pdf") => InputClass::Pdf,
            Some("docx") => InputClass::Docx,
            Some("xlsx") => InputClass::Xlsx,
            Some("png" | "jpg" | "jpeg" | "webp" | "bmp" | "gif") => InputClass::Image,
            _ => InputClass::Other,
        }
    }

    /// Map a declared MIME type onto an input class.
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "application/pdf" => InputClass::Pdf,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                InputClass::Docx
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                InputClass::Xlsx
            }
            m if m.starts_with("image/") => InputClass::Image,
            _ => InputClass::Other,
        }
    }
}

impl fmt::Display for InputClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InputClass::Image => "image",
            InputClass::Pdf => "pdf",
            InputClass::Docx => "docx",
            InputClass::Xlsx => "xlsx",
            InputClass::Other => "other",
        };
        f.write_str(s)
    }
}

/// Kind-specific parameters attached to a [`ConversionRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionParams {
    /// No parameters (most kinds).
    #[default]
    None,
    /// Target dimensions for `resize`.
    Dimensions { width: u32, height: u32 },
    /// Target container for `format_convert`, e.g. "png".
    TargetFormat { format: String },
    /// JPEG quality for `compress_image`, 1–100.
    Quality { quality: u8 },
}

/// One conversion to run: kind, ordered inputs, parameters.
///
/// Input order is authoritative — for multi-page assembly the dispatcher
/// passes inputs to the adapter exactly as received, never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub kind: ConversionKind,
    pub inputs: Vec<PathBuf>,
    pub params: ConversionParams,
}

impl ConversionRequest {
    pub fn new(kind: ConversionKind, inputs: Vec<PathBuf>) -> Self {
        Self {
            kind,
            inputs,
            params: ConversionParams::None,
        }
    }

    pub fn with_params(mut self, params: ConversionParams) -> Self {
        self.params = params;
        self
    }
}

/// A file on scratch storage, owned by exactly one session or one
/// in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub class: InputClass,
}

impl Artifact {
    /// The artifact's own file name, used verbatim as the archive member
    /// name when bundling (names are collision-free by the storage
    /// manager's contract).
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_classification() {
        assert_eq!(InputClass::from_mime("application/pdf"), InputClass::Pdf);
        assert_eq!(InputClass::from_mime("image/png"), InputClass::Image);
        assert_eq!(InputClass::from_mime("image/jpeg"), InputClass::Image);
        assert_eq!(
            InputClass::from_mime(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            InputClass::Docx
        );
        assert_eq!(InputClass::from_mime("video/mp4"), InputClass::Other);
    }

    #[test]
    fn expected_input_per_kind() {
        assert_eq!(ConversionKind::PdfToWord.expected_input(), InputClass::Pdf);
        assert_eq!(ConversionKind::WordToPdf.expected_input(), InputClass::Docx);
        assert_eq!(ConversionKind::ExcelToPdf.expected_input(), InputClass::Xlsx);
        assert_eq!(ConversionKind::Grayscale.expected_input(), InputClass::Image);
    }

    #[test]
    fn only_resize_needs_parameter() {
        assert!(ConversionKind::Resize.needs_parameter());
        assert!(!ConversionKind::Grayscale.needs_parameter());
        assert!(!ConversionKind::PdfToWord.needs_parameter());
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ConversionKind::ImagesToPdf.to_string(), "images_to_pdf");
        assert_eq!(ConversionKind::OcrExtract.to_string(), "ocr_extract");
    }

    #[test]
    fn kind_serde_round_trip() {
        let json = serde_json::to_string(&ConversionKind::PdfToImages).unwrap();
        assert_eq!(json, "\"pdf_to_images\"");
        let back: ConversionKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ConversionKind::PdfToImages);
    }

    #[test]
    fn artifact_file_name() {
        let a = Artifact {
            path: PathBuf::from("/scratch/42_abc/photo-2.jpg"),
            size: 10,
            class: InputClass::Image,
        };
        assert_eq!(a.file_name(), "photo-2.jpg");
    }
}
