//! Prompt filtering and normalization.
//!
//! Parsed records pass through a fixed sequence of cleanup stages:
//! base-model filtering, lora reference repair, parameter clamping,
//! sampler translation, word filters, short-prompt and duplicate
//! removal, and lora filtering. The `*_raw` fields on each record are
//! never touched, so templates can still reach the original text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::config::PromptOptions;
use crate::metadata::{ImageRecord, ResourceKind};
use crate::resolution::snap_resolution;
use crate::samplers::translate_sampler;

const LORA_OPEN: &str = "<lora:";

/// Prompts shorter than this (ignoring lora references) are discarded.
const MIN_PROMPT_CHARS: usize = 5;

static COMMA_SPACING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\S)").unwrap());
static PERIOD_SPACING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.([^\s\d])").unwrap());

/// Run every cleanup stage over the parsed records, in a fixed order.
/// Returns the surviving records.
pub fn apply_filters(mut records: Vec<ImageRecord>, options: &PromptOptions) -> Vec<ImageRecord> {
    records = drop_unwanted_base(records, &options.only_include_base);
    rewrite_lora_paths(&mut records);
    add_missing_lora_refs(&mut records);
    enforce_limits(&mut records, options);
    check_samplers(&mut records);
    remove_filter_words(&mut records, &options.word_filter_list);
    remove_neg_filter_words(&mut records, &options.neg_word_filter_list);
    records = drop_short_prompts(records, MIN_PROMPT_CHARS);
    records = drop_duplicates(records);
    remove_filter_loras(&mut records, &options.lora_filter_list);
    records
}

/// Fix common formatting problems in prompt text: stray newlines,
/// doubled separators, missing spaces after punctuation, and leading or
/// trailing junk.
pub fn sanitize_prompt(prompt: &str) -> String {
    let mut p: String = prompt
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();
    p = p.replace("embedding:", "");
    for (from, to) in [
        ("  ", " "),
        (",,", ","),
        (" ,", ","),
        (".,", ","),
        (". ,", ","),
        (",.", ","),
        (", .", ","),
        (", ,", ","),
        ("8 k", "8k"),
        ("4 k", "4k"),
    ] {
        while p.contains(from) {
            p = p.replace(from, to);
        }
    }
    // force a space after commas and periods (except in decimal numbers)
    p = COMMA_SPACING.replace_all(&p, ", ${1}").into_owned();
    p = PERIOD_SPACING.replace_all(&p, ". ${1}").into_owned();
    p = p.trim().to_string();
    while p.contains(", ,") {
        p = p.replace(", ,", ",");
    }
    p.trim_matches([' ', ',']).to_string()
}

/// Drop records whose base model is not on the configured allow-list.
/// The special entry `unknown` admits records with an empty base model.
fn drop_unwanted_base(records: Vec<ImageRecord>, base_list: &[String]) -> Vec<ImageRecord> {
    if base_list.is_empty() {
        return records;
    }
    info!("filtering out prompts that don't match these base models: {base_list:?}");
    let before = records.len();
    let records: Vec<ImageRecord> = records
        .into_iter()
        .filter(|record| {
            let base = record.base_model.trim().to_lowercase();
            if base.is_empty() {
                base_list.iter().any(|entry| entry == "unknown")
            } else {
                base_list.iter().any(|entry| *entry == base)
            }
        })
        .collect();
    info!("removed {} unwanted prompt(s)", before - records.len());
    records
}

/// Strip directory components from lora references so only the bare
/// name and weight remain.
fn rewrite_lora_paths(records: &mut [ImageRecord]) {
    info!("examining prompts for lora path references:");
    let mut fixed = 0;
    for record in records.iter_mut() {
        record.prompt = map_lora_tags(&record.prompt, |body| {
            let name = body.rsplit(['\\', '/']).next().unwrap_or(body);
            if name.len() != body.len() {
                fixed += 1;
            }
            Some(name.to_string())
        });
    }
    info!("fixed {fixed} lora reference(s) containing broken paths");
}

/// Append inline references for lora resources that appear in the
/// metadata's resource list but not in the prompt text.
fn add_missing_lora_refs(records: &mut [ImageRecord]) {
    info!("checking prompts for missing lora references:");
    let mut additions = 0;
    for record in records.iter_mut() {
        let mut missing = Vec::new();
        for resource in &record.resources {
            if resource.kind != ResourceKind::Lora || resource.filename.is_empty() {
                continue;
            }
            let tag_start = format!("{LORA_OPEN}{}", file_stem(&resource.filename));
            if !contains_ci(&record.prompt, &tag_start) {
                missing.push(format!(" {tag_start}:{}>", resource.weight));
            }
        }
        for tag in missing {
            record.prompt.push_str(&tag);
            additions += 1;
        }
    }
    info!("added {additions} lora reference(s) that were missing from prompts");
}

/// Clamp steps and scale to the configured bounds and snap the image
/// resolution to an officially supported one. A bound of zero means no
/// limit on that side.
fn enforce_limits(records: &mut [ImageRecord], options: &PromptOptions) {
    info!("checking prompt parameters for values outside the configured limits:");
    let mut changes = 0;
    for record in records.iter_mut() {
        if let Some(mut steps) = record.steps {
            if options.min_steps > 0 && steps < options.min_steps {
                steps = options.min_steps;
                changes += 1;
            }
            if options.max_steps > 0 && steps > options.max_steps {
                steps = options.max_steps;
                changes += 1;
            }
            record.steps = Some(steps);
        }
        if let Some(mut scale) = record.scale {
            if options.min_scale > 0.0 && scale < options.min_scale {
                scale = options.min_scale;
                changes += 1;
            }
            if options.max_scale > 0.0 && scale > options.max_scale {
                scale = options.max_scale;
                changes += 1;
            }
            record.scale = Some(scale);
        }
        if options.fix_resolution {
            if let (Some(width), Some(height)) = (record.width, record.height) {
                let snapped = snap_resolution(width, height, &record.base_model);
                if snapped != (width, height) {
                    record.width = Some(snapped.0);
                    record.height = Some(snapped.1);
                    changes += 1;
                }
            }
        }
    }
    info!("made {changes} adjustment(s) to prompt parameters");
}

/// Swap sampler names for their standard equivalents where a
/// translation is known.
fn check_samplers(records: &mut [ImageRecord]) {
    info!("checking prompts for unsupported samplers:");
    let mut count = 0;
    for record in records.iter_mut() {
        let translated = translate_sampler(&record.sampler);
        if translated != record.sampler {
            record.sampler = translated;
            count += 1;
        }
    }
    info!("substituted {count} unsupported sampler name(s)");
}

fn remove_filter_words(records: &mut [ImageRecord], words: &[String]) {
    if words.is_empty() {
        return;
    }
    info!("checking prompts for filter words:");
    let mut count = 0;
    for record in records.iter_mut() {
        count += strip_words(&mut record.prompt, words);
    }
    info!("removed {count} occurrence(s) of filter word(s) in prompts");
}

fn remove_neg_filter_words(records: &mut [ImageRecord], words: &[String]) {
    if words.is_empty() {
        return;
    }
    info!("checking negative prompts for filter words:");
    let mut count = 0;
    for record in records.iter_mut() {
        count += strip_words(&mut record.neg_prompt, words);
    }
    info!("removed {count} occurrence(s) of filter word(s) in negative prompts");
}

/// Drop records whose prompt is under the length floor once lora
/// references are ignored.
fn drop_short_prompts(records: Vec<ImageRecord>, char_limit: usize) -> Vec<ImageRecord> {
    info!("removing prompts with less than {char_limit} character(s):");
    let before = records.len();
    let records: Vec<ImageRecord> = records
        .into_iter()
        .filter(|record| {
            let without_tags = map_lora_tags(&record.prompt, |_| None);
            without_tags.trim().chars().count() >= char_limit
        })
        .collect();
    info!(
        "removed {} prompt(s) that were too short",
        before - records.len()
    );
    records
}

/// Remove records whose prompt/negative prompt pair already appeared
/// earlier in the batch, ignoring case.
fn drop_duplicates(records: Vec<ImageRecord>) -> Vec<ImageRecord> {
    info!("checking prompts for duplicates:");
    let before = records.len();
    let mut seen = HashSet::new();
    let records: Vec<ImageRecord> = records
        .into_iter()
        .filter(|record| {
            seen.insert((
                record.prompt.to_lowercase(),
                record.neg_prompt.to_lowercase(),
            ))
        })
        .collect();
    info!("removed {} duplicate prompt(s)", before - records.len());
    records
}

/// Delete lora references whose name appears in the filter list; a
/// list entry of `*` deletes every reference.
fn remove_filter_loras(records: &mut [ImageRecord], lora_filters: &[String]) {
    if lora_filters.is_empty() {
        return;
    }
    info!("checking prompts for unwanted lora references:");
    let remove_all = lora_filters.iter().any(|entry| entry == "*");
    let mut count = 0;
    for record in records.iter_mut() {
        record.prompt = map_lora_tags(&record.prompt, |body| {
            let name = body.split(':').next().unwrap_or(body).trim().to_lowercase();
            if remove_all || lora_filters.iter().any(|entry| *entry == name) {
                count += 1;
                None
            } else {
                Some(body.to_string())
            }
        });
    }
    info!("removed {count} occurrence(s) of unwanted lora(s) in prompts");
}

/// Rewrite the `<lora:...>` tags in a prompt. The callback receives the
/// text between `<lora:` and `>` and returns the replacement body, or
/// None to delete the tag entirely.
fn map_lora_tags(prompt: &str, mut edit: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(prompt.len());
    let mut rest = prompt;
    while let Some(start) = rest.find(LORA_OPEN) {
        let body_start = start + LORA_OPEN.len();
        let Some(body_len) = rest[body_start..].find('>') else {
            break;
        };
        out.push_str(&rest[..start]);
        let body = &rest[body_start..body_start + body_len];
        if let Some(new_body) = edit(body) {
            out.push_str(LORA_OPEN);
            out.push_str(&new_body);
            out.push('>');
        }
        rest = &rest[body_start + body_len + 1..];
    }
    out.push_str(rest);
    out
}

/// Remove each listed word from the text, re-sanitizing afterwards so
/// no doubled separators remain. Returns the number of words removed.
fn strip_words(text: &mut String, words: &[String]) -> usize {
    let mut removed = 0;
    for word in words {
        if !contains_ci(text, word) {
            continue;
        }
        let stripped = remove_word(word, text);
        if stripped.len() != text.len() {
            removed += 1;
        }
        *text = sanitize_prompt(&stripped);
    }
    removed
}

/// Whole-word, case-insensitive removal. A word only matches when
/// bounded by the string edges, spaces, or commas; a trailing period
/// also counts as a boundary.
fn remove_word(word: &str, text: &str) -> String {
    let needle = word.trim();
    if needle.is_empty() {
        return text.to_string();
    }
    if text.trim().eq_ignore_ascii_case(needle) {
        return String::new();
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut from = 0;
    while from + needle.len() <= text.len() {
        if !text.is_char_boundary(from) {
            from += 1;
            continue;
        }
        let end = from + needle.len();
        if !text.is_char_boundary(end) || !text[from..end].eq_ignore_ascii_case(needle) {
            from += 1;
            continue;
        }
        let before_ok = from == 0 || matches!(text.as_bytes()[from - 1], b' ' | b',');
        let after_ok = end == text.len() || matches!(text.as_bytes()[end], b' ' | b',' | b'.');
        if before_ok && after_ok {
            out.push_str(&text[last..from]);
            last = end;
            from = end;
        } else {
            from += 1;
        }
    }
    out.push_str(&text[last..]);
    out
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn file_stem(filename: &str) -> &str {
    filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
}
