//! Submission validation: file count, type gating and size caps.
//!
//! Everything here is pure. A submission that fails any rule is rejected
//! before a single byte is written or a PDF is opened.
//!
//! File types are decided from magic bytes, not from the declared MIME type
//! or the file name. A declared type that contradicts the content is treated
//! as a type error as well.

use crate::config::PipelineConfig;
use crate::error::YearbookError;
use crate::model::{PageType, UploadFile, UploadType};
use image::ImageFormat;

/// What a file's bytes actually are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A raster image in one of the accepted formats.
    Image(ImageFormat),
    Pdf,
}

impl FileKind {
    /// Storage extension for this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Image(ImageFormat::Png) => "png",
            FileKind::Image(ImageFormat::Gif) => "gif",
            FileKind::Image(ImageFormat::WebP) => "webp",
            FileKind::Image(_) => "jpg",
            FileKind::Pdf => "pdf",
        }
    }

    fn is_pdf(&self) -> bool {
        matches!(self, FileKind::Pdf)
    }
}

/// Sniff the content of an upload.
///
/// Returns `None` for anything that is neither a PDF nor a JPEG, PNG, GIF
/// or WebP image.
pub fn sniff(bytes: &[u8]) -> Option<FileKind> {
    if bytes.len() >= 4 && &bytes[..4] == b"%PDF" {
        return Some(FileKind::Pdf);
    }
    match image::guess_format(bytes).ok()? {
        fmt @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP) => {
            Some(FileKind::Image(fmt))
        }
        _ => None,
    }
}

/// A file that passed validation, with its sniffed kind.
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub file: UploadFile,
    pub kind: FileKind,
}

/// A submission that passed every rule.
#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    pub page_type: PageType,
    pub upload_type: UploadType,
    pub files: Vec<ValidatedFile>,
    pub total_bytes: u64,
}

impl ValidatedSubmission {
    pub fn is_pdf(&self) -> bool {
        self.files.first().is_some_and(|f| f.kind.is_pdf())
    }
}

/// Validate a submission against the yearbook's upload mode and the limits.
///
/// Rules run in order: file count, per-file type, per-file size, total size.
pub fn validate_submission(
    config: &PipelineConfig,
    upload_type: UploadType,
    page_type: PageType,
    files: Vec<UploadFile>,
) -> Result<ValidatedSubmission, YearbookError> {
    check_count(config, upload_type, page_type, files.len())?;

    let mut validated = Vec::with_capacity(files.len());
    for file in files {
        let kind = check_type(config, upload_type, page_type, &file)?;
        check_size(config, &file, kind)?;
        validated.push(ValidatedFile { file, kind });
    }

    let total_bytes: u64 = validated.iter().map(|f| f.file.size()).sum();
    if total_bytes > config.max_total_bytes {
        return Err(YearbookError::TotalSizeExceeded {
            total: total_bytes,
            limit: config.max_total_bytes,
        });
    }

    Ok(ValidatedSubmission {
        page_type,
        upload_type,
        files: validated,
        total_bytes,
    })
}

fn check_count(
    config: &PipelineConfig,
    upload_type: UploadType,
    page_type: PageType,
    count: usize,
) -> Result<(), YearbookError> {
    let (ok, expected) = match (upload_type, page_type) {
        (_, PageType::FrontCover | PageType::BackCover) => (count == 1, "exactly 1 file".to_string()),
        (UploadType::Pdf, PageType::Content) => (count == 1, "exactly 1 PDF".to_string()),
        (UploadType::Image, PageType::Content) => (
            (1..=config.max_content_files).contains(&count),
            format!("1 to {} files", config.max_content_files),
        ),
    };
    if ok {
        Ok(())
    } else {
        Err(YearbookError::InvalidFileCount {
            role: page_type,
            expected,
            count,
        })
    }
}

fn check_type(
    config: &PipelineConfig,
    upload_type: UploadType,
    page_type: PageType,
    file: &UploadFile,
) -> Result<FileKind, YearbookError> {
    let reject = |reason: &str| YearbookError::InvalidFileType {
        file_name: file.file_name.clone(),
        reason: reason.to_string(),
    };

    if file.bytes.is_empty() {
        return Err(reject("the file is empty"));
    }
    let kind = sniff(&file.bytes)
        .ok_or_else(|| reject("only JPEG, PNG, GIF, WebP images and PDF documents are supported"))?;

    let declared = file.content_type.to_ascii_lowercase();
    let contradicts = match kind {
        FileKind::Pdf => declared.starts_with("image/"),
        FileKind::Image(_) => declared == "application/pdf",
    };
    if contradicts {
        return Err(reject(&format!(
            "declared type '{}' does not match the file content",
            file.content_type
        )));
    }

    match (upload_type, kind) {
        (UploadType::Image, FileKind::Pdf) => {
            Err(reject("this yearbook accepts image uploads only"))
        }
        (UploadType::Pdf, FileKind::Image(_)) => Err(reject(
            "this yearbook accepts a single PDF; covers are derived from its first and last pages",
        )),
        (UploadType::Pdf, FileKind::Pdf)
            if page_type.is_cover() && !config.allow_pdf_cover_upload =>
        {
            Err(reject(
                "PDFs can only be uploaded as content; covers are derived from the PDF",
            ))
        }
        _ => Ok(kind),
    }
}

fn check_size(config: &PipelineConfig, file: &UploadFile, kind: FileKind) -> Result<(), YearbookError> {
    let limit = match kind {
        FileKind::Pdf => config.max_pdf_bytes,
        FileKind::Image(_) => config.max_image_bytes,
    };
    if file.size() > limit {
        return Err(YearbookError::FileTooLarge {
            file_name: file.file_name.clone(),
            size: file.size(),
            limit,
        });
    }
    Ok(())
}
