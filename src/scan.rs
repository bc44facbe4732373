//! Image discovery and raw metadata extraction.
//!
//! Generation parameters travel in two places depending on the tool that
//! produced the image: PNG text chunks (`parameters` for Auto1111-style
//! tools, `prompt` for ComfyUI workflows) and the EXIF `UserComment`
//! field in JPEGs.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::MetadataError;

/// Collect all image files under `root`, sorted by path.
pub fn collect_images(root: &Path, ignore_subdirs: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(root);
    if ignore_subdirs {
        walker = walker.max_depth(1);
    }
    let mut images: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_image_file(path))
        .collect();
    images.sort();
    images
}

fn is_image_file(path: &Path) -> bool {
    matches!(
        extension_of(path).as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Extract the raw generation metadata string embedded in an image, if any.
pub fn read_raw_metadata(path: &Path) -> Result<Option<String>, MetadataError> {
    let raw = match extension_of(path).as_deref() {
        Some("png") => read_png_text(path)?,
        Some("jpg" | "jpeg") => read_exif_comment(path)?,
        _ => None,
    };
    Ok(raw.filter(|text| !text.trim().is_empty()))
}

fn read_png_text(path: &Path) -> Result<Option<String>, MetadataError> {
    let decoder = png::Decoder::new(BufReader::new(File::open(path)?));
    let mut reader = decoder.read_info()?;
    // text chunks may trail the image data
    let _ = reader.finish();
    let info = reader.info();
    for keyword in ["parameters", "prompt"] {
        if let Some(text) = png_text_chunk(info, keyword)? {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

fn png_text_chunk(info: &png::Info<'_>, keyword: &str) -> Result<Option<String>, MetadataError> {
    for chunk in &info.uncompressed_latin1_text {
        if chunk.keyword == keyword {
            return Ok(Some(chunk.text.clone()));
        }
    }
    for chunk in &info.compressed_latin1_text {
        if chunk.keyword == keyword {
            return Ok(Some(chunk.get_text()?));
        }
    }
    for chunk in &info.utf8_text {
        if chunk.keyword == keyword {
            return Ok(Some(chunk.get_text()?));
        }
    }
    Ok(None)
}

fn read_exif_comment(path: &Path) -> Result<Option<String>, MetadataError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    for field in exif.fields() {
        if field.tag == exif::Tag::UserComment {
            if let Some(text) = decode_user_comment(&field.value) {
                return Ok(Some(text));
            }
        }
    }
    Ok(None)
}

/// Decodes an EXIF `UserComment` payload. The field starts with an 8-byte
/// character-set marker; Auto1111 writes `UNICODE\0` followed by UTF-16
/// text, which for the usual ASCII-range prompts reduces to stripping the
/// interleaved NUL bytes.
fn decode_user_comment(value: &exif::Value) -> Option<String> {
    match value {
        exif::Value::Undefined(bytes, _) => {
            let payload = bytes
                .strip_prefix(b"UNICODE\0")
                .or_else(|| bytes.strip_prefix(b"ASCII\0\0\0"))
                .unwrap_or(bytes);
            Some(String::from_utf8_lossy(payload).replace('\0', ""))
        }
        exif::Value::Ascii(chunks) => chunks
            .first()
            .map(|chunk| String::from_utf8_lossy(chunk).replace('\0', "")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_png(path: &Path, text_chunks: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(file, 1, 1);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        for (keyword, text) in text_chunks {
            encoder
                .add_text_chunk(keyword.to_string(), text.to_string())
                .unwrap();
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 0, 0]).unwrap();
    }

    #[test]
    fn test_collect_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"), &[]);
        write_png(&dir.path().join("a.PNG"), &[]);
        fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        write_png(&sub.join("c.png"), &[]);

        let images = collect_images(dir.path(), false);
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.png", "c.png"]);

        let top_only = collect_images(dir.path(), true);
        assert_eq!(top_only.len(), 2);
    }

    #[test]
    fn test_read_png_parameters_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        write_png(&path, &[("parameters", "a cat\nSteps: 20")]);
        let raw = read_raw_metadata(&path).unwrap();
        assert_eq!(raw.as_deref(), Some("a cat\nSteps: 20"));
    }

    #[test]
    fn test_read_png_prefers_parameters_over_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        write_png(&path, &[("prompt", "{}"), ("parameters", "a dog")]);
        let raw = read_raw_metadata(&path).unwrap();
        assert_eq!(raw.as_deref(), Some("a dog"));
    }

    #[test]
    fn test_read_png_without_text_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        write_png(&path, &[]);
        assert!(read_raw_metadata(&path).unwrap().is_none());
    }

    #[test]
    fn test_blank_metadata_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.png");
        write_png(&path, &[("parameters", "   \n  ")]);
        assert!(read_raw_metadata(&path).unwrap().is_none());
    }

    #[test]
    fn test_decode_user_comment_unicode_prefix() {
        let mut bytes = b"UNICODE\0".to_vec();
        for b in b"a cat" {
            bytes.push(*b);
            bytes.push(0);
        }
        let value = exif::Value::Undefined(bytes, 0);
        assert_eq!(decode_user_comment(&value).as_deref(), Some("a cat"));
    }

    #[test]
    fn test_decode_user_comment_ascii() {
        let value = exif::Value::Ascii(vec![b"plain text".to_vec()]);
        assert_eq!(decode_user_comment(&value).as_deref(), Some("plain text"));
    }
}
