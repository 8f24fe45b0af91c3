//! services/api/src/adapters/pdf.rs
//!
//! This module provides the concrete implementation for the `PdfAssembler` port
//! using `lopdf`. Page captures are embedded unchanged as DCT (JPEG) images, one
//! image per page.
//!
//! Every append still rewrites the whole file so an interrupted run leaves a valid
//! PDF behind. The parsed document of the output being built is kept in memory
//! between appends, so only the write grows with the page count.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use edubase_core::ports::{PageContent, PageLayout, PdfAssembler, PortError, PortResult};
use image::codecs::jpeg::JpegDecoder;
use image::{ColorType, ImageDecoder};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

/// Points per pixel at 96 dpi.
const POINTS_PER_PIXEL: f32 = 0.75;
const A4_WIDTH_PT: f32 = 595.28;
const A4_HEIGHT_PT: f32 = 841.89;

const TEXT_FONT_SIZE: f32 = 8.0;
const TEXT_LEADING: f32 = 10.0;
const TEXT_LINE_CHARS: usize = 90;

fn pdf_err(e: impl std::fmt::Display) -> PortError {
    PortError::Pdf(e.to_string())
}

/// Writes PDFs with `lopdf`, appending one page per call.
#[derive(Clone, Default)]
pub struct LopdfAssembler {
    open: Arc<Mutex<Option<OpenDocument>>>,
}

/// The last document written, with the file state right after that write.
struct OpenDocument {
    path: PathBuf,
    doc: Document,
    written: FileStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

impl LopdfAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_slot(&self) -> MutexGuard<'_, Option<OpenDocument>> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends to the cached document when the file is still the one we wrote,
    /// otherwise starts from the file on disk (or a new document).
    fn append_blocking(&self, pdf: &Path, image: &Path, content: &PageContent) -> PortResult<()> {
        // Taken out of the slot so other outputs are not blocked while this one is written.
        let cached = {
            let mut slot = self.open_slot();
            if slot.as_ref().is_some_and(|open| open.path == pdf) {
                slot.take()
            } else {
                None
            }
        }
        .filter(|open| FileStamp::of(pdf) == Some(open.written));
        let mut doc = match cached {
            Some(open) => open.doc,
            None if pdf.exists() => Document::load(pdf).map_err(pdf_err)?,
            None => new_document(),
        };

        append_page_to(&mut doc, pdf, image, content)?;

        if let Some(written) = FileStamp::of(pdf) {
            *self.open_slot() = Some(OpenDocument {
                path: pdf.to_path_buf(),
                doc,
                written,
            });
        }
        Ok(())
    }

    fn forget(&self, pdf: &Path) {
        let mut slot = self.open_slot();
        if slot.as_ref().is_some_and(|open| open.path == pdf) {
            *slot = None;
        }
    }
}

#[async_trait]
impl PdfAssembler for LopdfAssembler {
    async fn append_page(
        &self,
        pdf: &Path,
        image: &Path,
        content: &PageContent,
    ) -> PortResult<()> {
        let pdf = pdf.to_path_buf();
        let image = image.to_path_buf();
        let content = content.clone();
        let assembler = self.clone();
        tokio::task::spawn_blocking(move || assembler.append_blocking(&pdf, &image, &content))
            .await
            .map_err(|e| PortError::Unexpected(format!("PDF task failed: {}", e)))?
    }

    /// Reads the file back from disk. Counting ends the assembly of `pdf`, so its
    /// cached document is released.
    async fn page_count(&self, pdf: &Path) -> PortResult<usize> {
        self.forget(pdf);
        let pdf: PathBuf = pdf.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let doc = Document::load(&pdf).map_err(pdf_err)?;
            Ok(doc.get_pages().len())
        })
        .await
        .map_err(|e| PortError::Unexpected(format!("PDF task failed: {}", e)))?
    }
}

//=========================================================================================
// Blocking implementation
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct JpegInfo {
    width: u32,
    height: u32,
    color_space: &'static [u8],
}

impl JpegInfo {
    fn read(bytes: &[u8]) -> PortResult<Self> {
        let decoder = JpegDecoder::new(Cursor::new(bytes)).map_err(pdf_err)?;
        let (width, height) = decoder.dimensions();
        let color_space: &'static [u8] = match decoder.color_type() {
            ColorType::L8 | ColorType::L16 => b"DeviceGray",
            _ => b"DeviceRGB",
        };
        Ok(Self {
            width,
            height,
            color_space,
        })
    }
}

/// Where the image goes on the page, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    page_width: f32,
    page_height: f32,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

fn place(layout: PageLayout, width_px: u32, height_px: u32) -> Placement {
    let width = width_px as f32 * POINTS_PER_PIXEL;
    let height = height_px as f32 * POINTS_PER_PIXEL;
    match layout {
        PageLayout::Native => Placement {
            page_width: width,
            page_height: height,
            x: 0.0,
            y: 0.0,
            width,
            height,
        },
        PageLayout::A4 => {
            let scale = (A4_WIDTH_PT / width).min(A4_HEIGHT_PT / height);
            let (fitted_w, fitted_h) = (width * scale, height * scale);
            Placement {
                page_width: A4_WIDTH_PT,
                page_height: A4_HEIGHT_PT,
                x: (A4_WIDTH_PT - fitted_w) / 2.0,
                y: (A4_HEIGHT_PT - fitted_h) / 2.0,
                width: fitted_w,
                height: fitted_h,
            }
        }
    }
}

fn append_page_to(doc: &mut Document, pdf: &Path, image: &Path, content: &PageContent) -> PortResult<()> {
    let jpeg = std::fs::read(image)?;
    let info = JpegInfo::read(&jpeg)?;
    let pages_id = pages_root(doc)?;

    let image_dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"XObject".to_vec())),
        ("Subtype", Object::Name(b"Image".to_vec())),
        ("Width", Object::Integer(i64::from(info.width))),
        ("Height", Object::Integer(i64::from(info.height))),
        ("ColorSpace", Object::Name(info.color_space.to_vec())),
        ("BitsPerComponent", Object::Integer(8)),
        ("Filter", Object::Name(b"DCTDecode".to_vec())),
    ]);
    let image_id = doc.add_object(Stream::new(image_dict, jpeg));

    let placement = place(content.layout, info.width, info.height);
    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                Object::Real(placement.width),
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(placement.height),
                Object::Real(placement.x),
                Object::Real(placement.y),
            ],
        ),
        Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
        Operation::new("Q", vec![]),
    ];

    let mut resources = Dictionary::new();
    resources.set(
        "XObject",
        Dictionary::from_iter(vec![("Im0", Object::Reference(image_id))]),
    );

    if let Some(text) = content.text.as_deref().filter(|t| !t.trim().is_empty()) {
        let font_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
            ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
        ]));
        resources.set(
            "Font",
            Dictionary::from_iter(vec![("F1", Object::Reference(font_id))]),
        );
        operations.extend(text_layer(text, &placement));
    }

    let stream = Content { operations }.encode().map_err(pdf_err)?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), stream));

    let page_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        (
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(placement.page_width),
                Object::Real(placement.page_height),
            ]),
        ),
        ("Resources", Object::Dictionary(resources)),
        ("Contents", Object::Reference(content_id)),
    ]));

    // Clone the page tree root, extend it and put it back.
    let mut pages_dict = doc.get_dictionary(pages_id).map_err(pdf_err)?.clone();
    let mut kids = match pages_dict.get(b"Kids") {
        Ok(Object::Array(kids)) => kids.clone(),
        _ => Vec::new(),
    };
    kids.push(Object::Reference(page_id));
    pages_dict.set("Count", Object::Integer(kids.len() as i64));
    pages_dict.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(pdf_err)?;
    std::fs::write(pdf, bytes)?;
    debug!("Appended {} to {}", image.display(), pdf.display());
    Ok(())
}

fn new_document() -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(Vec::new())),
            ("Count", Object::Integer(0)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", catalog_id);
    doc
}

fn pages_root(doc: &Document) -> PortResult<ObjectId> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(pdf_err)?;
    doc.get_dictionary(catalog_id)
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(pdf_err)
}

/// Invisible (render mode 3) text over the image so viewers can search and copy it.
fn text_layer(text: &str, placement: &Placement) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tr", vec![Object::Integer(3)]),
        Operation::new(
            "Tf",
            vec![Object::Name(b"F1".to_vec()), Object::Real(TEXT_FONT_SIZE)],
        ),
        Operation::new("TL", vec![Object::Real(TEXT_LEADING)]),
        Operation::new(
            "Td",
            vec![
                Object::Real(placement.x),
                Object::Real(placement.y + placement.height - TEXT_LEADING),
            ],
        ),
    ];
    for line in wrap(text, TEXT_LINE_CHARS) {
        ops.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(&line))]));
        ops.push(Operation::new("T*", vec![]));
    }
    ops.push(Operation::new("ET", vec![]));
    ops
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Latin-1 subset of WinAnsi; everything else becomes `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            0x20..=0x7e | 0xa0..=0xff => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    fn rgb_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]))
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .unwrap();
        path
    }

    fn media_box(doc: &Document, page: u32) -> Vec<f32> {
        let pages = doc.get_pages();
        let id = pages[&page];
        doc.get_dictionary(id)
            .unwrap()
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_float().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn appends_pages_in_order_and_counts_them() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        let assembler = LopdfAssembler::new();

        for (i, width) in [40u32, 80, 120].into_iter().enumerate() {
            let image = rgb_jpeg(dir.path(), &format!("1_{}.jpeg", i + 1), width, 20);
            assembler
                .append_page(&pdf, &image, &PageContent::default())
                .await
                .unwrap();
        }

        assert_eq!(assembler.page_count(&pdf).await.unwrap(), 3);
        let doc = Document::load(&pdf).unwrap();
        assert_eq!(media_box(&doc, 1), vec![0.0, 0.0, 30.0, 15.0]);
        assert_eq!(media_box(&doc, 3), vec![0.0, 0.0, 90.0, 15.0]);
    }

    #[tokio::test]
    async fn keeps_the_document_open_between_appends() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        let assembler = LopdfAssembler::new();
        let image = rgb_jpeg(dir.path(), "1_1.jpeg", 40, 20);

        assembler.append_page(&pdf, &image, &PageContent::default()).await.unwrap();
        assert!(assembler.open_slot().as_ref().is_some_and(|open| open.path == pdf));
        assembler.append_page(&pdf, &image, &PageContent::default()).await.unwrap();

        assert_eq!(assembler.page_count(&pdf).await.unwrap(), 2);
        assert!(assembler.open_slot().is_none());
    }

    #[tokio::test]
    async fn a_file_replaced_on_disk_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        let image = rgb_jpeg(dir.path(), "1_1.jpeg", 40, 20);
        let assembler = LopdfAssembler::new();
        assembler.append_page(&pdf, &image, &PageContent::default()).await.unwrap();

        // Another writer replaces the file with a two-page document.
        std::fs::remove_file(&pdf).unwrap();
        let other = LopdfAssembler::new();
        for _ in 0..2 {
            other.append_page(&pdf, &image, &PageContent::default()).await.unwrap();
        }

        assembler.append_page(&pdf, &image, &PageContent::default()).await.unwrap();
        assert_eq!(assembler.page_count(&pdf).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn a4_layout_centres_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        let image = rgb_jpeg(dir.path(), "1_1.jpeg", 100, 100);

        LopdfAssembler::new()
            .append_page(
                &pdf,
                &image,
                &PageContent {
                    layout: PageLayout::A4,
                    text: None,
                },
            )
            .await
            .unwrap();

        let doc = Document::load(&pdf).unwrap();
        let mb = media_box(&doc, 1);
        assert!((mb[2] - A4_WIDTH_PT).abs() < 0.01);
        assert!((mb[3] - A4_HEIGHT_PT).abs() < 0.01);

        let placement = place(PageLayout::A4, 100, 100);
        assert!((placement.width - A4_WIDTH_PT).abs() < 0.01);
        assert!((placement.y - (A4_HEIGHT_PT - A4_WIDTH_PT) / 2.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn text_layer_is_invisible_and_searchable() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        let image = rgb_jpeg(dir.path(), "1_1.jpeg", 60, 60);

        LopdfAssembler::new()
            .append_page(
                &pdf,
                &image,
                &PageContent {
                    layout: PageLayout::Native,
                    text: Some("Kapitel (1) Übersicht".to_string()),
                },
            )
            .await
            .unwrap();

        let doc = Document::load(&pdf).unwrap();
        let page_id = doc.get_pages()[&1];
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let operators: Vec<&str> = content.operations.iter().map(|op| op.operator.as_str()).collect();
        assert!(operators.contains(&"Tr"));
        let tj = content
            .operations
            .iter()
            .find(|op| op.operator == "Tj")
            .unwrap();
        assert_eq!(tj.operands[0].as_str().unwrap(), win_ansi("Kapitel (1) Übersicht").as_slice());
    }

    #[tokio::test]
    async fn grayscale_images_keep_their_colour_space() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("gray.jpeg");
        GrayImage::from_pixel(10, 10, image::Luma([128]))
            .save_with_format(&image, image::ImageFormat::Jpeg)
            .unwrap();

        let info = JpegInfo::read(&std::fs::read(&image).unwrap()).unwrap();
        assert_eq!(info.color_space, b"DeviceGray");
        assert_eq!((info.width, info.height), (10, 10));
    }

    #[tokio::test]
    async fn rejects_missing_and_non_jpeg_images() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        let assembler = LopdfAssembler::new();

        let err = assembler
            .append_page(&pdf, &dir.path().join("missing.jpeg"), &PageContent::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Io(_)), "{err:?}");

        let not_jpeg = dir.path().join("page.jpeg");
        std::fs::write(&not_jpeg, b"definitely not a jpeg").unwrap();
        let err = assembler
            .append_page(&pdf, &not_jpeg, &PageContent::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Pdf(_)), "{err:?}");
        assert!(!pdf.exists());
    }

    #[test]
    fn wraps_on_word_boundaries() {
        assert_eq!(wrap("aa bb cc", 5), vec!["aa bb", "cc"]);
        assert!(wrap("   ", 5).is_empty());
    }
}
