//! Built-in converter adapters.
//!
//! The conversion algorithms proper are collaborators, not core logic, so
//! this module only ships what the crate can express natively:
//!
//! * the four image-edit kinds via the `image` crate
//!   ([`GrayscaleAdapter`], [`ResizeAdapter`], [`CompressAdapter`],
//!   [`FormatAdapter`]);
//! * [`ExternalToolAdapter`], a generic wrapper over a converter binary
//!   (LibreOffice-style `--outdir` tools) for the document kinds.
//!
//! Hosts register whatever else they need — an OCR service client, a PDF
//! assembler — behind the same [`Converter`] trait.
//!
//! ## Why spawn_blocking?
//!
//! Image decode/encode is CPU-bound. Running it inline would stall a Tokio
//! worker thread for the duration of a large decode, delaying every other
//! user's events. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool, the same way heavyweight rasterisation is handled
//! anywhere else in a Tokio process.

use crate::dispatch::{AdapterError, Converter, Dispatcher};
use crate::request::{ConversionKind, ConversionParams};
use async_trait::async_trait;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

fn single_input(inputs: &[PathBuf]) -> Result<&PathBuf, AdapterError> {
    match inputs {
        [one] => Ok(one),
        [] => Err(AdapterError::new("no input provided")),
        many => Err(AdapterError::new(format!(
            "expected one input, got {}",
            many.len()
        ))),
    }
}

fn file_stem(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("file")
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|s| s.to_str()).unwrap_or("file")
}

/// Decode, transform, re-encode on the blocking pool.
async fn edit_image<F>(
    input: &Path,
    output: PathBuf,
    op: F,
) -> Result<Vec<PathBuf>, AdapterError>
where
    F: FnOnce(DynamicImage) -> Result<(DynamicImage, image::ImageFormat), AdapterError>
        + Send
        + 'static,
{
    let input = input.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        let img = image::open(&input)?;
        let (img, format) = op(img)?;
        img.save_with_format(&output, format)?;
        Ok::<PathBuf, AdapterError>(output)
    })
    .await
    .map_err(|e| AdapterError::new(format!("image task panicked: {e}")))??;

    debug!(output = %result.display(), "image edit complete");
    Ok(vec![result])
}

fn format_for(path: &Path) -> image::ImageFormat {
    image::ImageFormat::from_path(path).unwrap_or(image::ImageFormat::Png)
}

// ── Grayscale ────────────────────────────────────────────────────────────

/// `grayscale`: luma conversion, container preserved.
pub struct GrayscaleAdapter;

#[async_trait]
impl Converter for GrayscaleAdapter {
    async fn convert(
        &self,
        inputs: &[PathBuf],
        _params: &ConversionParams,
        workdir: &Path,
    ) -> Result<Vec<PathBuf>, AdapterError> {
        let input = single_input(inputs)?;
        let output = workdir.join(format!("grayscale_{}", file_name(input)));
        let format = format_for(input);
        edit_image(input, output, move |img| {
            Ok((DynamicImage::ImageLuma8(img.to_luma8()), format))
        })
        .await
    }
}

// ── Resize ───────────────────────────────────────────────────────────────

/// `resize`: exact target dimensions, Lanczos3 filtering.
pub struct ResizeAdapter;

#[async_trait]
impl Converter for ResizeAdapter {
    async fn convert(
        &self,
        inputs: &[PathBuf],
        params: &ConversionParams,
        workdir: &Path,
    ) -> Result<Vec<PathBuf>, AdapterError> {
        let (width, height) = match params {
            ConversionParams::Dimensions { width, height } => (*width, *height),
            other => {
                return Err(AdapterError::new(format!(
                    "resize requires dimensions, got {other:?}"
                )))
            }
        };
        let input = single_input(inputs)?;
        let output = workdir.join(format!("resized_{width}x{height}_{}", file_name(input)));
        let format = format_for(input);
        edit_image(input, output, move |img| {
            Ok((
                img.resize_exact(width, height, image::imageops::FilterType::Lanczos3),
                format,
            ))
        })
        .await
    }
}

// ── Compress ─────────────────────────────────────────────────────────────

/// `compress_image`: re-encode as JPEG at the given quality.
///
/// Alpha is flattened to RGB first — JPEG has no alpha channel and the
/// encoder rejects RGBA input.
pub struct CompressAdapter {
    quality: u8,
}

impl CompressAdapter {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

#[async_trait]
impl Converter for CompressAdapter {
    async fn convert(
        &self,
        inputs: &[PathBuf],
        params: &ConversionParams,
        workdir: &Path,
    ) -> Result<Vec<PathBuf>, AdapterError> {
        let quality = match params {
            ConversionParams::Quality { quality } => (*quality).clamp(1, 100),
            _ => self.quality,
        };
        let input = single_input(inputs)?;
        let output = workdir.join(format!("compressed_{}.jpg", file_stem(input)));
        let input = input.clone();

        let result = tokio::task::spawn_blocking(move || {
            let img = image::open(&input)?.to_rgb8();
            let file = std::fs::File::create(&output)?;
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(std::io::BufWriter::new(file), quality);
            img.write_with_encoder(encoder)?;
            Ok::<PathBuf, AdapterError>(output)
        })
        .await
        .map_err(|e| AdapterError::new(format!("image task panicked: {e}")))??;

        Ok(vec![result])
    }
}

// ── Format conversion ────────────────────────────────────────────────────

/// `format_convert`: re-encode into the target container.
pub struct FormatAdapter;

#[async_trait]
impl Converter for FormatAdapter {
    async fn convert(
        &self,
        inputs: &[PathBuf],
        params: &ConversionParams,
        workdir: &Path,
    ) -> Result<Vec<PathBuf>, AdapterError> {
        let target = match params {
            ConversionParams::TargetFormat { format } => format.to_ascii_lowercase(),
            other => {
                return Err(AdapterError::new(format!(
                    "format_convert requires a target format, got {other:?}"
                )))
            }
        };
        let format = image::ImageFormat::from_extension(&target)
            .ok_or_else(|| AdapterError::new(format!("unsupported target format '{target}'")))?;

        let input = single_input(inputs)?;
        let output = workdir.join(format!("{}.{target}", file_stem(input)));
        edit_image(input, output, move |img| {
            // JPEG cannot carry alpha; flatten before encoding.
            let img = if format == image::ImageFormat::Jpeg {
                DynamicImage::ImageRgb8(img.to_rgb8())
            } else {
                img
            };
            Ok((img, format))
        })
        .await
    }
}

// ── External tool ────────────────────────────────────────────────────────

/// Runs a converter binary once per input.
///
/// Placeholders in `args` are substituted per invocation:
/// `{input}` → the input path, `{outdir}` → the request's scratch
/// directory, `{output}` → `{outdir}/{input stem}.{output_extension}`.
/// After the command exits successfully the adapter requires `{output}` to
/// exist — `--outdir`-style tools (LibreOffice) name their output exactly
/// that way.
///
/// # Example
/// ```rust
/// use fileforge::adapters::ExternalToolAdapter;
///
/// let soffice = ExternalToolAdapter::new(
///     "libreoffice",
///     ["--headless", "--convert-to", "pdf", "--outdir", "{outdir}", "{input}"],
///     "pdf",
/// );
/// ```
pub struct ExternalToolAdapter {
    program: String,
    args: Vec<String>,
    output_extension: String,
}

impl ExternalToolAdapter {
    pub fn new<I, S>(program: impl Into<String>, args: I, output_extension: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            output_extension: output_extension.into(),
        }
    }
}

#[async_trait]
impl Converter for ExternalToolAdapter {
    async fn convert(
        &self,
        inputs: &[PathBuf],
        _params: &ConversionParams,
        workdir: &Path,
    ) -> Result<Vec<PathBuf>, AdapterError> {
        if inputs.is_empty() {
            return Err(AdapterError::new("no input provided"));
        }

        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let expected = workdir.join(format!(
                "{}.{}",
                file_stem(input),
                self.output_extension
            ));
            let args: Vec<String> = self
                .args
                .iter()
                .map(|a| {
                    a.replace("{input}", &input.to_string_lossy())
                        .replace("{outdir}", &workdir.to_string_lossy())
                        .replace("{output}", &expected.to_string_lossy())
                })
                .collect();

            debug!(program = %self.program, ?args, "running external converter");
            let result = Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| AdapterError::new(format!("failed to spawn {}: {e}", self.program)))?;

            if !result.status.success() {
                let stderr = String::from_utf8_lossy(&result.stderr);
                warn!(program = %self.program, status = %result.status, "external converter failed");
                return Err(AdapterError::new(format!(
                    "{} exited with {}: {}",
                    self.program,
                    result.status,
                    stderr.trim()
                )));
            }
            if !expected.exists() {
                return Err(AdapterError::new(format!(
                    "{} succeeded but produced no '{}'",
                    self.program,
                    expected.display()
                )));
            }
            outputs.push(expected);
        }
        Ok(outputs)
    }
}

/// Register the four native image-edit kinds on a dispatcher.
///
/// Document kinds stay unregistered; hosts wire those to an
/// [`ExternalToolAdapter`] or their own [`Converter`] implementations.
pub fn register_image_adapters(dispatcher: &mut Dispatcher, default_jpeg_quality: u8) {
    dispatcher
        .register(ConversionKind::Grayscale, Arc::new(GrayscaleAdapter))
        .register(ConversionKind::Resize, Arc::new(ResizeAdapter))
        .register(
            ConversionKind::CompressImage,
            Arc::new(CompressAdapter::new(default_jpeg_quality)),
        )
        .register(ConversionKind::FormatConvert, Arc::new(FormatAdapter));
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([200, 40, 40, 255])));
        img.save_with_format(&path, image::ImageFormat::Png).unwrap();
        path
    }

    #[tokio::test]
    async fn grayscale_produces_luma_output() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_png(tmp.path(), "red.png", 4, 4);

        let out = GrayscaleAdapter
            .convert(&[input], &ConversionParams::None, tmp.path())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].file_name().unwrap().to_str().unwrap().starts_with("grayscale_"));
        let img = image::open(&out[0]).unwrap();
        assert_eq!(img.color().channel_count(), 1);
    }

    #[tokio::test]
    async fn resize_hits_exact_dimensions() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_png(tmp.path(), "big.png", 64, 48);

        let out = ResizeAdapter
            .convert(
                &[input],
                &ConversionParams::Dimensions {
                    width: 16,
                    height: 8,
                },
                tmp.path(),
            )
            .await
            .unwrap();
        let img = image::open(&out[0]).unwrap();
        assert_eq!((img.width(), img.height()), (16, 8));
    }

    #[tokio::test]
    async fn resize_without_dimensions_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_png(tmp.path(), "a.png", 4, 4);
        let err = ResizeAdapter
            .convert(&[input], &ConversionParams::None, tmp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimensions"));
    }

    #[tokio::test]
    async fn compress_flattens_alpha_to_jpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_png(tmp.path(), "rgba.png", 8, 8);

        let out = CompressAdapter::new(85)
            .convert(&[input], &ConversionParams::None, tmp.path())
            .await
            .unwrap();
        assert!(out[0].to_string_lossy().ends_with("compressed_rgba.jpg"));
        let img = image::open(&out[0]).unwrap();
        assert_eq!((img.width(), img.height()), (8, 8));
    }

    #[tokio::test]
    async fn format_convert_png_to_jpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_png(tmp.path(), "pic.png", 4, 4);

        let out = FormatAdapter
            .convert(
                &[input],
                &ConversionParams::TargetFormat {
                    format: "jpeg".into(),
                },
                tmp.path(),
            )
            .await
            .unwrap();
        assert!(out[0].to_string_lossy().ends_with("pic.jpeg"));
        assert!(image::open(&out[0]).is_ok());
    }

    #[tokio::test]
    async fn format_convert_rejects_unknown_target() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_png(tmp.path(), "pic.png", 4, 4);
        let err = FormatAdapter
            .convert(
                &[input],
                &ConversionParams::TargetFormat {
                    format: "docx".into(),
                },
                tmp.path(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[tokio::test]
    async fn external_tool_runs_per_input() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("one.docx");
        let b = tmp.path().join("two.docx");
        tokio::fs::write(&a, b"doc one").await.unwrap();
        tokio::fs::write(&b, b"doc two").await.unwrap();

        let cp = ExternalToolAdapter::new("cp", ["{input}", "{output}"], "pdf");
        let out = cp
            .convert(&[a, b], &ConversionParams::None, tmp.path())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].to_string_lossy().ends_with("one.pdf"));
        assert!(out[1].to_string_lossy().ends_with("two.pdf"));
    }

    #[tokio::test]
    async fn external_tool_nonzero_exit_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("x.docx");
        tokio::fs::write(&input, b"x").await.unwrap();

        let fail = ExternalToolAdapter::new("false", Vec::<String>::new(), "pdf");
        let err = fail
            .convert(&[input], &ConversionParams::None, tmp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited"));
    }
}
