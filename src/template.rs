//! Rendering of extracted records into a Dream Factory prompt file.
//!
//! Output is either driven by a user-supplied template file with
//! case-insensitive `[token]` placeholders, or by a built-in template
//! that emits one commented, ready-to-edit block per prompt. An
//! optional header and footer file can be wrapped around the result.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::config::PromptOptions;
use crate::metadata::ImageRecord;

const BANNER_WIDTH: usize = 103;
const DEFAULT_OUTPUT: &str = "output.prompts";

/// Writes the output prompt file. Returns the path written, or `None`
/// when there are no records to write.
pub fn write_prompt_file(
    records: &[ImageRecord],
    options: &PromptOptions,
) -> io::Result<Option<PathBuf>> {
    if records.is_empty() {
        info!("no usable metadata to output; skipping prompt file write");
        return Ok(None);
    }
    let now = Local::now();
    let path = output_path(&options.output_save_as, &now)?;
    let mut file = fs::File::create(&path)?;
    write_banner(&mut file, records.len(), &now)?;

    match load_template(options.output_template.as_deref()) {
        Some(template) => {
            for (index, record) in records.iter().enumerate() {
                let rendered = render_record(record, index + 1, &template);
                write!(file, "\n{rendered}\n")?;
            }
        }
        None => {
            for (index, record) in records.iter().enumerate() {
                write_default_record(&mut file, record, index + 1, &options.append_filename)?;
            }
        }
    }
    drop(file);
    info!("{} prompts saved as {}", records.len(), path.display());

    attach_header_footer(
        &path,
        options.output_header.as_deref(),
        options.output_footer.as_deref(),
    )?;
    Ok(Some(path))
}

/// Resolves the configured output location, expanding `[date]` and
/// `[time]` and creating parent directories. Empty falls back to
/// `output.prompts` in the working directory.
fn output_path(save_as: &str, now: &DateTime<Local>) -> io::Result<PathBuf> {
    if save_as.is_empty() {
        return Ok(PathBuf::from(DEFAULT_OUTPUT));
    }
    let expanded = ireplace(save_as, "[date]", &now.format("%Y-%m-%d").to_string());
    let expanded = ireplace(&expanded, "[time]", &now.format("%H-%M-%S").to_string());
    let path = PathBuf::from(expanded);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(path)
}

fn load_template(template: Option<&Path>) -> Option<String> {
    let template = template?;
    match fs::read_to_string(template) {
        Ok(content) => {
            info!(
                "writing prompt metadata to disk using supplied template ({})",
                template.display()
            );
            Some(content)
        }
        Err(err) => {
            warn!(
                "specified prompt template file is unreadable ({}): {err}; using default",
                template.display()
            );
            None
        }
    }
}

fn write_banner(writer: &mut impl Write, count: usize, now: &DateTime<Local>) -> io::Result<()> {
    let banner = "#".repeat(BANNER_WIDTH);
    writeln!(writer, "{banner}")?;
    writeln!(writer, "# {count} unique prompts from metadata extracted from civitai.com images.")?;
    writeln!(writer, "# Created on {} at {}.", now.format("%Y-%m-%d"), now.format("%H:%M:%S"))?;
    writeln!(writer, "{banner}")?;
    Ok(())
}

/// Renders one record through a user-supplied template. Tokens are
/// matched case-insensitively.
pub fn render_record(record: &ImageRecord, ref_num: usize, template: &str) -> String {
    let replacements: [(&str, String); 18] = [
        ("[ref_num]", format!("{ref_num:05}")),
        ("[filename]", record.source_filename.clone()),
        ("[filepath]", record.source_path().display().to_string()),
        ("[raw_metadata]", record.raw_metadata.replace('\n', "\n#")),
        ("[model]", record.model.clone()),
        ("[seed]", record.seed.clone()),
        ("[sampler]", record.sampler.clone()),
        ("[clip_skip]", record.clip_skip.clone()),
        ("[width]", display_u32(record.width)),
        ("[height]", display_u32(record.height)),
        ("[steps]", display_u32(record.steps)),
        ("[scale]", display_f64(record.scale)),
        ("[neg_prompt]", record.neg_prompt.clone()),
        ("[neg_prompt_raw]", record.neg_prompt_raw.clone()),
        ("[prompt]", record.prompt.clone()),
        ("[prompt_raw]", record.prompt_raw.clone()),
        ("[base_model]", record.base_model.clone()),
        ("[model_hash]", record.model_hash.clone()),
    ];
    let mut rendered = template.to_string();
    for (token, value) in &replacements {
        rendered = ireplace(&rendered, token, value);
    }
    rendered
}

/// One prompt block in the built-in Dream Factory format: commented
/// provenance, commented optional directives, and the prompt itself.
fn write_default_record(
    writer: &mut impl Write,
    record: &ImageRecord,
    ref_num: usize,
    append_filename: &str,
) -> io::Result<()> {
    let banner = "#".repeat(BANNER_WIDTH);
    writeln!(writer)?;
    writeln!(writer, "{banner}")?;
    writeln!(writer, "# PROMPT {ref_num:05}")?;
    writeln!(writer, "# Extracted from: {}", record.source_filename)?;
    writeln!(writer, "# Raw metadata below:\n#{}\n", record.raw_metadata.replace('\n', "\n#"))?;
    writeln!(writer, "{banner}\n")?;
    writeln!(writer, "!FILENAME = {ref_num:05}-{append_filename}")?;
    writeln!(writer, "#!CKPT_FILE = {}", record.model)?;
    writeln!(writer, "#!SEED = {}", record.seed)?;
    writeln!(writer, "#!SAMPLER = {}", record.sampler)?;
    writeln!(writer, "#!CLIP_SKIP = {}", record.clip_skip)?;
    writeln!(writer, "#!WIDTH = {}", display_u32(record.width))?;
    writeln!(writer, "#!HEIGHT = {}", display_u32(record.height))?;
    writeln!(writer, "!STEPS = {}", display_u32(record.steps))?;
    writeln!(writer, "!SCALE = {}", display_f64(record.scale))?;
    writeln!(writer, "\n!NEG_PROMPT = {}", record.neg_prompt)?;
    writeln!(writer, "\n{}", record.prompt)?;
    Ok(())
}

/// Wraps the written file in the configured header and footer files.
/// An unreadable header or footer is reported and skipped.
fn attach_header_footer(
    path: &Path,
    header: Option<&Path>,
    footer: Option<&Path>,
) -> io::Result<()> {
    let header = read_attachment(header, "header");
    let footer = read_attachment(footer, "footer");
    if header.is_empty() && footer.is_empty() {
        return Ok(());
    }
    let prompts = fs::read_to_string(path).unwrap_or_default();
    fs::write(path, format!("{header}{prompts}{footer}"))
}

fn read_attachment(attachment: Option<&Path>, label: &str) -> String {
    let Some(attachment) = attachment else {
        return String::new();
    };
    match fs::read_to_string(attachment) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "specified output {label} file is unreadable ({}): {err}; ignoring it",
                attachment.display()
            );
            String::new()
        }
    }
}

fn display_u32(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn display_f64(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Case-insensitive replacement of every occurrence of `token`. The
/// scan resumes after each inserted replacement, so replacement text
/// containing the token is not rewritten.
pub fn ireplace(text: &str, token: &str, replacement: &str) -> String {
    let mut result = text.to_string();
    let mut from = 0;
    while let Some(start) = find_ignore_ascii_case(&result, token, from) {
        result.replace_range(start..start + token.len(), replacement);
        from = start + replacement.len();
    }
    result
}

fn find_ignore_ascii_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|position| from + position)
}
