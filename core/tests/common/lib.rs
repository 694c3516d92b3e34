use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use checkgate_core::transport::ChatId;
use checkgate_core::transport::ChatPort;
use checkgate_core::transport::FileRef;
use checkgate_core::transport::TransportError;
use image::DynamicImage;
use image::ImageFormat;
use image::Rgb;
use image::RgbImage;
use lopdf::Document;
use lopdf::Object;
use lopdf::Stream;
use lopdf::content::Content;
use lopdf::content::Operation;
use lopdf::dictionary;

/// Build a one-page PDF whose text layer contains `lines`, one text object
/// per line so extracted text keeps the line breaks.
pub fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let y = 760 - 20 * index as i64;
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
        operations.push(Operation::new("Td", vec![50.into(), y.into()]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(line.as_bytes().to_vec())],
        ));
        operations.push(Operation::new("ET", vec![]));
    }
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save pdf");
    out
}

/// A small valid PNG photo.
pub fn png_bytes() -> Vec<u8> {
    let image = RgbImage::from_pixel(16, 16, Rgb([250, 250, 250]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { chat: ChatId, text: String },
    Document { chat: ChatId, file_name: String, body: String },
}

/// In-memory [`ChatPort`] that records everything sent and serves files
/// registered with [`RecordingPort::serve`].
#[derive(Debug, Default)]
pub struct RecordingPort {
    files: Mutex<HashMap<String, Bytes>>,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, file_ref: &str, bytes: impl Into<Bytes>) {
        self.files
            .lock()
            .expect("files")
            .insert(file_ref.to_string(), bytes.into());
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent").clone()
    }

    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { chat: to, text } if to == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn documents_to(&self, chat: ChatId) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Document {
                    chat: to,
                    file_name,
                    body,
                } if to == chat => Some((file_name, body)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatPort for RecordingPort {
    async fn send_text(
        &self,
        chat: ChatId,
        _reply_to: Option<i64>,
        text: &str,
    ) -> Result<(), TransportError> {
        self.sent.lock().expect("sent").push(Sent::Text {
            chat,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        chat: ChatId,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<(), TransportError> {
        self.sent.lock().expect("sent").push(Sent::Document {
            chat,
            file_name: file_name.to_string(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
        Ok(())
    }

    async fn fetch_file(&self, file: &FileRef) -> Result<Bytes, TransportError> {
        self.files
            .lock()
            .expect("files")
            .get(&file.0)
            .cloned()
            .ok_or_else(|| TransportError::Rejected(format!("unknown file {}", file.0)))
    }
}
