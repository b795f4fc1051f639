//! Markdown assembly.
//!
//! [`render_document`] is a pure function of its inputs: the same inputs always give the same
//! bytes, and every optional section disappears when its input is empty.

use std::path::Path;

use chrono::NaiveDateTime;
use tracing::info;

use crate::{
    config::DocumentOptions,
    error::Result,
    frames::Frame,
    palette::ColorPalette,
    recognize::RecognizedText,
    types::{TranscriptChunk, VideoMetadata},
};

const SWATCH: &str = "████";
const ELLIPSIS: char = '…';

/// Everything the document is built from.
#[derive(Debug, Clone, Copy)]
pub struct DocumentInputs<'a> {
    pub metadata: &'a VideoMetadata,
    pub transcript: &'a [TranscriptChunk],
    pub interval_frames: &'a [Frame],
    pub scene_frames: &'a [Frame],
    /// Seconds between interval frames, for the gallery heading.
    pub interval: u32,
    pub recognized: Option<&'a RecognizedText>,
    pub palette: Option<&'a ColorPalette>,
    /// Frame paths are written relative to this directory.
    pub work_dir: &'a Path,
    pub generated_at: NaiveDateTime,
}

/// Format seconds as `M:SS`, or `H:MM:SS` past the hour.
pub fn fmt_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, total / 60 % 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Make `text` safe for one markdown table cell.
pub fn escape_table_cell(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

/// Neutralise HTML in free text so it cannot close the surrounding `<details>` block.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a markdown link's text and destination.
fn link(text: &str, url: &str) -> String {
    let text = text
        .replace('\\', "\\\\")
        .replace('[', "\\[")
        .replace(']', "\\]");
    let url = url
        .trim()
        .replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29");
    format!("[{text}]({url})")
}

/// First `max_chars` characters of `text`, with `…` appended when anything was cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
        None => text.to_string(),
    }
}

/// A fenced block whose fence is longer than any backtick run inside `text`.
fn fenced(text: &str) -> String {
    let longest = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat((longest + 1).max(3));
    format!("{fence}\n{text}\n{fence}\n")
}

fn relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// One row of the visual indexes.
struct IndexedFrame {
    timestamp: String,
    file: String,
    text: String,
}

pub fn render_document(inputs: &DocumentInputs<'_>, options: &DocumentOptions) -> String {
    let meta = inputs.metadata;
    let mut output = String::new();

    // Header
    let title = if meta.title.trim().is_empty() {
        "Untitled Video".to_string()
    } else {
        escape_table_cell(&meta.title)
    };
    let channel = if meta.channel.trim().is_empty() {
        "Unknown"
    } else {
        meta.channel.trim()
    };
    output.push_str(&format!("# {}\n\n", title));
    output.push_str(&format!(
        "> **Source:** {}  \n",
        link(channel, &meta.webpage_url)
    ));
    output.push_str(&format!(
        "> **Duration:** {}  \n",
        fmt_timestamp(meta.duration_seconds)
    ));
    output.push_str(&format!(
        "> **Extracted:** {}  \n",
        inputs.generated_at.format("%Y-%m-%d %H:%M")
    ));
    if !meta.tags.is_empty() {
        let tags: Vec<&str> = meta
            .tags
            .iter()
            .take(options.max_tags)
            .map(String::as_str)
            .collect();
        output.push_str(&format!("> **Tags:** {}\n", tags.join(", ")));
    }
    output.push('\n');

    // Palette
    if let Some(palette) = inputs.palette.filter(|p| !p.dominant_colors.is_empty()) {
        output.push_str("## Color Palette\n\n");
        output.push_str("Dominant colors detected across sampled frames:\n\n");
        output.push_str("| Swatch | Hex |\n");
        output.push_str("|--------|-----|\n");
        for color in &palette.dominant_colors {
            output.push_str(&format!("| {} | `{}` |\n", SWATCH, color));
        }
        let inline: Vec<String> = palette
            .dominant_colors
            .iter()
            .map(|c| format!("`{}`", c))
            .collect();
        output.push_str(&format!("\n*Full palette: {}*\n\n", inline.join(", ")));
    }

    // Description
    if !meta.description.trim().is_empty() {
        output.push_str("## Description\n\n");
        output.push_str(&fenced(&truncate_preview(
            &meta.description,
            options.description_chars,
        )));
        output.push('\n');
    }

    // Chapters
    if !meta.chapters.is_empty() {
        output.push_str("## Chapters\n\n");
        output.push_str("| Timestamp | Title |\n");
        output.push_str("|-----------|-------|\n");
        for chapter in &meta.chapters {
            output.push_str(&format!(
                "| `{}` | {} |\n",
                fmt_timestamp(chapter.start_time),
                escape_table_cell(&chapter.title)
            ));
        }
        output.push('\n');
    }

    // Transcript
    if !inputs.transcript.is_empty() {
        output.push_str("## Transcript\n\n");
        output.push_str("<details><summary>Full transcript (click to expand)</summary>\n\n");
        for chunk in inputs.transcript {
            output.push_str(&format!(
                "**[{}]** {}\n\n",
                fmt_timestamp(chunk.start),
                escape_html(&chunk.text)
            ));
        }
        output.push_str("</details>\n\n");

        output.push_str("## Transcript (Condensed)\n\n");
        output.push_str("Use these timestamped segments to cross-reference the frames.\n\n");
        for chunk in inputs.transcript {
            output.push_str(&format!(
                "- **`{}`** {}\n",
                fmt_timestamp(chunk.start),
                escape_html(&truncate_preview(&chunk.text, options.preview_chars))
            ));
        }
        output.push('\n');
    }

    let text_of = |frame: &Frame| -> String {
        inputs
            .recognized
            .map(|r| r.text_for(frame).trim().to_string())
            .unwrap_or_default()
    };
    let mut indexed: Vec<IndexedFrame> = Vec::new();

    // Interval gallery
    if !inputs.interval_frames.is_empty() {
        output.push_str(&format!(
            "## Key Frames (every {}s)\n\n",
            inputs.interval
        ));
        output.push_str("Visual reference frames captured at a fixed interval.\n\n");
        for frame in inputs.interval_frames {
            let ts = fmt_timestamp(frame.timestamp);
            let file = relative(&frame.path, inputs.work_dir);
            let text = text_of(frame);
            output.push_str(&format!("### Frame at `{}`\n\n", ts));
            output.push_str(&format!("![frame-{}]({})\n\n", ts, file));
            push_inline_text(&mut output, &text, options);
            indexed.push(IndexedFrame {
                timestamp: ts,
                file,
                text,
            });
        }
        output.push('\n');
    }

    // Scene gallery
    if !inputs.scene_frames.is_empty() {
        output.push_str("## Scene Changes\n\n");
        output.push_str("Frames captured where the visual content changes significantly.\n\n");
        for (i, frame) in inputs.scene_frames.iter().enumerate() {
            let ts = fmt_timestamp(frame.timestamp);
            let file = relative(&frame.path, inputs.work_dir);
            let text = text_of(frame);
            output.push_str(&format!("### Scene {} at `{}`\n\n", i + 1, ts));
            output.push_str(&format!("![scene-{}]({})\n\n", i + 1, file));
            push_inline_text(&mut output, &text, options);
            indexed.push(IndexedFrame {
                timestamp: ts,
                file,
                text,
            });
        }
        output.push('\n');
    }

    // Visual text index
    let with_text: Vec<&IndexedFrame> = indexed
        .iter()
        .filter(|f| f.text.chars().count() > options.min_index_text)
        .collect();
    if !with_text.is_empty() {
        output.push_str("## Visual Text Index\n\n");
        output.push_str("Searchable index of the text detected in video frames.\n\n");
        output.push_str("| Timestamp | Key Text (preview) |\n");
        output.push_str("|-----------|--------------------|\n");
        for frame in &with_text {
            let mut lines = frame.text.lines();
            let first_line = lines.next().unwrap_or("");
            let mut preview = truncate_preview(first_line, options.index_preview_chars);
            // Hidden lines get the marker too.
            if lines.next().is_some() && !preview.ends_with(ELLIPSIS) {
                preview.push(ELLIPSIS);
            }
            output.push_str(&format!(
                "| `{}` | {} |\n",
                frame.timestamp,
                escape_table_cell(&preview)
            ));
        }
        output.push('\n');

        output.push_str("### All Detected Text\n\n");
        output.push_str("<details><summary>Click to expand the full OCR text</summary>\n\n");
        for frame in &with_text {
            output.push_str(&format!("**[{}]**\n", frame.timestamp));
            output.push_str(&fenced(&frame.text));
            output.push('\n');
        }
        output.push_str("</details>\n\n");
    }

    // Frame index
    if !indexed.is_empty() {
        output.push_str("## Frame Index\n\n");
        output.push_str("| Timestamp | File | Has Text |\n");
        output.push_str("|-----------|------|----------|\n");
        for frame in &indexed {
            let has_text = if frame.text.chars().count() > options.min_index_text {
                "✓"
            } else {
                ""
            };
            output.push_str(&format!(
                "| `{}` | `{}` | {} |\n",
                frame.timestamp,
                escape_table_cell(&frame.file),
                has_text
            ));
        }
        output.push('\n');
    }

    // Footer
    output.push_str("---\n\n");
    output.push_str(
        "*Generated by `ytref`. Review and curate the content above before handing this file to your agent.*\n",
    );

    output
}

fn push_inline_text(output: &mut String, text: &str, options: &DocumentOptions) {
    if text.chars().count() > options.min_inline_text {
        output.push_str("<details><summary>Text detected in frame</summary>\n\n");
        output.push_str(&fenced(text));
        output.push_str("</details>\n\n");
    }
}

/// Write the rendered document; the only I/O in this module.
pub async fn write_document(path: &Path, content: &str) -> Result<()> {
    tokio::fs::write(path, content).await?;
    info!(path = %path.display(), "reference document written");
    Ok(())
}
