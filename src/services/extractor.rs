//! 文档文本提取
//! 按扩展名把上传文件转成一段规范化文本；任何失败都返回空串

use pulldown_cmark::{Event, Parser, TagEnd};
use std::path::Path;

type ExtractResult = std::result::Result<String, Box<dyn std::error::Error + Send + Sync>>;

/// 文本提取协作方
pub trait TextExtractor: Send + Sync {
    /// 返回纯文本；无法读取或不支持时返回空串
    fn extract(&self, path: &Path) -> String;
}

/// 基于文件扩展名的提取器
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTextExtractor;

impl TextExtractor for FileTextExtractor {
    fn extract(&self, path: &Path) -> String {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let result = match extension.as_str() {
            "pdf" => extract_pdf(path),
            "docx" => extract_docx(path),
            "md" | "markdown" => std::fs::read_to_string(path)
                .map(|content| markdown_to_text(&content))
                .map_err(Into::into),
            "txt" => std::fs::read_to_string(path).map_err(Into::into),
            other => {
                log::error!("Unsupported document type {:?}: {}", other, path.display());
                return String::new();
            }
        };

        match result {
            Ok(raw) => {
                let text = normalize_text(&raw);
                log::debug!("Extracted {} chars from {}", text.len(), path.display());
                text
            }
            Err(e) => {
                log::error!("Error extracting text from {}: {}", path.display(), e);
                String::new()
            }
        }
    }
}

/// 统一换行并去掉首尾空白
pub fn normalize_text(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// 把 Markdown 展平为纯文本，块级元素之间保留换行
pub fn markdown_to_text(content: &str) -> String {
    let mut out = String::with_capacity(content.len());

    for event in Parser::new(content) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::CodeBlock) => out.push('\n'),
            _ => {}
        }
    }

    out
}

fn extract_pdf(path: &Path) -> ExtractResult {
    let document = lopdf::Document::load(path)?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    Ok(document.extract_text(&pages)?)
}

fn extract_docx(path: &Path) -> ExtractResult {
    let bytes = std::fs::read(path)?;
    let docx = docx_rs::read_docx(&bytes)?;

    let mut text = String::with_capacity(8192);
    for child in &docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(para) = child {
            for paragraph_child in &para.children {
                if let docx_rs::ParagraphChild::Run(run) = paragraph_child {
                    for run_child in &run.children {
                        match run_child {
                            docx_rs::RunChild::Text(t) => text.push_str(&t.text),
                            docx_rs::RunChild::Tab(_) => text.push('\t'),
                            docx_rs::RunChild::Break(_) => text.push('\n'),
                            _ => {}
                        }
                    }
                }
            }
            text.push('\n');
        }
    }

    Ok(text)
}
