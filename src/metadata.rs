//! Decoding embedded generation parameters into structured records.
//!
//! Four metadata shapes are recognized: Auto1111-style key:value blocks,
//! Dream Factory command strings, Fooocus / RuinedFooocus JSON, and
//! ComfyUI workflow JSON. Downloadable-resource references are parsed
//! from the trailing parameter section in three formats
//! (`Civitai resources:`, `Hashes:` and `Lora hashes:`).

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::filters::sanitize_prompt;

/// What a referenced resource is, as claimed by image metadata or the
/// remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Model,
    Lora,
    Embedding,
    Vae,
    Other(String),
}

impl ResourceKind {
    /// Maps the type labels found in image metadata and catalog replies
    /// onto a canonical kind.
    pub fn from_metadata(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "checkpoint" | "model" => Self::Model,
            "lora" | "locon" | "dora" => Self::Lora,
            "embed" | "textualinversion" => Self::Embedding,
            "vae" => Self::Vae,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Lora => write!(f, "lora"),
            Self::Embedding => write!(f, "embed"),
            Self::Vae => write!(f, "vae"),
            Self::Other(label) => write!(f, "{label}"),
        }
    }
}

/// A downloadable resource referenced by an image's metadata.
///
/// Identification is partial at parse time: some formats provide a
/// catalog version id, some only a file hash. Missing pieces are filled
/// in later from the lookup cache or the catalog.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    /// Catalog version id as a decimal string; empty if unknown
    pub version_id: String,
    /// File hash; empty if unknown
    pub hash: String,
    /// Catalog filename; empty until resolved
    pub filename: String,
    /// Human-readable resource name from the catalog
    pub name: String,
    /// Base model family the resource belongs to
    pub base_model: String,
    /// Strength for LoRA references (default 1.0)
    pub weight: f64,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            version_id: String::new(),
            hash: String::new(),
            filename: String::new(),
            name: String::new(),
            base_model: String::new(),
            weight: 1.0,
        }
    }
}

/// Everything extracted from a single image.
///
/// Numeric fields that feed later adjustments (steps, scale, width,
/// height) are typed; malformed values are treated as absent. Fields
/// that are only ever echoed back out (seed, clip skip) stay as strings.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub source_filename: String,
    pub source_dir: PathBuf,
    pub raw_metadata: String,
    pub prompt: String,
    pub prompt_raw: String,
    pub neg_prompt: String,
    pub neg_prompt_raw: String,
    pub seed: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub scale: Option<f64>,
    pub strength: String,
    pub model: String,
    pub model_hash: String,
    pub base_model: String,
    pub sampler: String,
    pub scheduler: String,
    pub clip_skip: String,
    pub resources: Vec<ResourceRef>,
}

impl ImageRecord {
    pub fn new(path: &Path, raw_metadata: &str) -> Self {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            source_filename: absolute
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_dir: absolute.parent().map(Path::to_path_buf).unwrap_or_default(),
            raw_metadata: raw_metadata.to_string(),
            prompt: String::new(),
            prompt_raw: String::new(),
            neg_prompt: String::new(),
            neg_prompt_raw: String::new(),
            seed: String::new(),
            width: None,
            height: None,
            steps: None,
            scale: None,
            strength: String::new(),
            model: String::new(),
            model_hash: String::new(),
            base_model: String::new(),
            sampler: String::new(),
            scheduler: String::new(),
            clip_skip: String::new(),
            resources: Vec::new(),
        }
    }

    /// Full path of the image this record came from.
    pub fn source_path(&self) -> PathBuf {
        self.source_dir.join(&self.source_filename)
    }
}

/// Parse one image's raw metadata string into a structured record.
pub fn parse_metadata(path: &Path, raw: &str) -> ImageRecord {
    let mut record = ImageRecord::new(path, raw);
    decode(&mut record, raw);
    // keep pre-filter copies for templates that want the originals
    record.prompt_raw = record.prompt.clone();
    record.neg_prompt_raw = record.neg_prompt.clone();
    record
}

fn decode(record: &mut ImageRecord, raw: &str) {
    if let Ok(Value::Object(workflow)) = serde_json::from_str::<Value>(raw) {
        if raw.contains("Fooocus v") {
            decode_fooocus(record, &workflow);
        } else if raw.contains("RuinedFooocus") {
            decode_ruined_fooocus(record, &workflow);
        } else {
            decode_comfy(record, &workflow);
        }
        return;
    }

    let command = raw.trim_matches('"');
    let params_tail: &str;
    if command.contains("--neg_prompt") {
        decode_dream_factory(record, command);
        // command strings carry no resource section
        return;
    } else if let Some((before, after)) = command.split_once("Negative prompt:") {
        let prompt = before.trim().replace('\\', "");
        record.prompt = sanitize_prompt(&prompt);

        let tail = after.trim();
        let neg = if tail.starts_with("Steps:") {
            ""
        } else if let Some((neg, _)) = tail.split_once("\nSteps:") {
            neg
        } else if let Some((neg, _)) = tail.split_once('\n') {
            neg
        } else {
            tail
        };
        let neg = sanitize_prompt(neg);
        record.neg_prompt = neg.trim().trim_matches('"').to_string();
        params_tail = tail;
    } else if let Some((head, last_line)) = command.rsplit_once('\n') {
        // no negative prompt; the last line holds the parameters
        record.prompt = sanitize_prompt(head.trim());
        params_tail = last_line;
    } else {
        params_tail = command;
    }

    decode_params_tail(record, params_tail);
    parse_resource_sections(record, params_tail);
}

/// Extract the `Key: value` pairs from an Auto1111 parameter line.
fn decode_params_tail(record: &mut ImageRecord, tail: &str) {
    if let Some(v) = param_value(tail, "Steps:") {
        record.steps = v.parse().ok();
    }
    if let Some(v) = param_value(tail, "CFG scale:").or_else(|| param_value(tail, "CFG Scale:")) {
        record.scale = v.parse().ok();
    }
    if let Some(v) = param_value(tail, "Denoising strength:") {
        record.strength = v.to_string();
    }
    if let Some(v) = param_value(tail, "Size:") {
        if let Some((w, h)) = v.split_once('x') {
            record.width = w.trim().parse().ok();
            record.height = h.trim().parse().ok();
        }
    }
    if let Some(v) = param_value(tail, "Clip skip:") {
        record.clip_skip = numeric_or_empty(v);
    }
    if let Some(v) = param_value(tail, "Sampler:") {
        let mut sampler = v.to_string();
        if let Some(s) = sampler.strip_suffix(" Exponential") {
            sampler = s.to_string();
        }
        if let Some(s) = sampler.strip_suffix(" Karras") {
            sampler = s.to_string();
        }
        record.sampler = sampler;
    }
    if let Some(v) = param_value(tail, "Seed:") {
        record.seed = numeric_or_empty(v);
    }
    if let Some(v) = param_value(tail, "Model:") {
        record.model = extract_model_filename(v);
    }
    if let Some(v) = param_value(tail, "Model hash:") {
        record.model_hash = v.to_string();
    }
}

/// Value of a `Key: value` pair, cut at the next comma. Returns None
/// when the key is absent or the tail has no comma-separated structure.
fn param_value<'a>(tail: &'a str, key: &str) -> Option<&'a str> {
    if !tail.contains(',') {
        return None;
    }
    let (_, after) = tail.split_once(key)?;
    let value = match after.split_once(',') {
        Some((value, _)) => value,
        None => after,
    };
    Some(value.trim())
}

fn decode_dream_factory(record: &mut ImageRecord, command: &str) {
    let command = command.trim_matches('"');
    // old format appended upscale info after the generation flags
    let command = command
        .split_once("(upscaled")
        .map_or(command, |(head, _)| head);

    let prompt = match flag_value(command, "--prompt") {
        Some(v) => v,
        None => {
            // anything before --ddim_steps is the prompt
            let head = command
                .split_once("--ddim_steps")
                .map_or(command, |(head, _)| head)
                .trim();
            let head = head.strip_suffix('"').unwrap_or(head);
            head.replace('\\', "")
        }
    };
    record.prompt = sanitize_prompt(&prompt)
        .trim()
        .trim_matches('"')
        .to_string();

    if let Some(v) = flag_value(command, "--neg_prompt") {
        record.neg_prompt = sanitize_prompt(&v).trim().trim_matches('"').to_string();
    }
    if let Some(v) = flag_value(command, "--ckpt") {
        record.model = extract_model_filename(&v);
        record.model_hash = extract_model_hash(&v);
    }
    if let Some(v) = flag_value(command, "--sampler") {
        record.sampler = v;
    }
    if let Some(v) = flag_value(command, "--ddim_steps") {
        record.steps = v.parse().ok();
    }
    if let Some(v) = flag_value(command, "--scale") {
        record.scale = v.parse().ok();
    }
    if let Some(v) = flag_value(command, "--seed") {
        record.seed = numeric_or_empty(&v);
    }
    if let Some(v) = flag_value(command, "--W") {
        record.width = v.parse().ok();
    }
    if let Some(v) = flag_value(command, "--H") {
        record.height = v.parse().ok();
    }
    if let Some(v) = flag_value(command, "--strength") {
        record.strength = v;
    }
    if let Some(v) = flag_value(command, "--clip-skip") {
        record.clip_skip = numeric_or_empty(&v);
    }
}

/// Value of a `--flag value` pair, cut at the next `--`.
fn flag_value(command: &str, flag: &str) -> Option<String> {
    let (_, after) = command.split_once(flag)?;
    let value = match after.split_once("--") {
        Some((value, _)) => value,
        None => after,
    };
    Some(value.trim().trim_matches('"').to_string())
}

fn decode_fooocus(record: &mut ImageRecord, workflow: &Map<String, Value>) {
    if let Some(v) = workflow.get("prompt").and_then(Value::as_str) {
        record.prompt = sanitize_prompt(v);
    }
    if let Some(v) = workflow.get("negative_prompt").and_then(Value::as_str) {
        record.neg_prompt = sanitize_prompt(v);
    }
    if let Some(v) = workflow.get("steps").and_then(json_u32) {
        record.steps = Some(v);
    }
    if let Some(v) = workflow.get("guidance_scale").and_then(json_f64) {
        record.scale = Some(v);
    }
    if let Some(v) = workflow.get("resolution").and_then(Value::as_str) {
        // formatted as "(width, height)"
        let v = v.trim().trim_start_matches('(').trim_end_matches(')');
        if let Some((w, h)) = v.split_once(',') {
            record.width = w.trim().parse().ok();
            record.height = h.trim().parse().ok();
        }
    }
    if let Some(v) = workflow.get("sampler").and_then(Value::as_str) {
        record.sampler = v.to_string();
    }
    if let Some(v) = workflow.get("scheduler").and_then(Value::as_str) {
        record.scheduler = v.to_string();
    }
    if let Some(v) = workflow.get("seed").and_then(json_string) {
        record.seed = numeric_or_empty(&v);
    }
    if let Some(v) = workflow.get("base_model").and_then(Value::as_str) {
        record.model = extract_model_filename(v);
    }
    if let Some(v) = workflow.get("base_model_hash").and_then(Value::as_str) {
        record.model_hash = v.to_string();
    }
    if let Some(loras) = workflow.get("loras").and_then(Value::as_array) {
        // entries are [name, weight, hash] triples
        for lora in loras {
            let Some(entry) = lora.as_array() else {
                continue;
            };
            let Some(hash) = entry.get(2).and_then(Value::as_str) else {
                continue;
            };
            let mut rsc = ResourceRef::new(ResourceKind::Lora);
            rsc.hash = hash.to_string();
            rsc.weight = entry.get(1).and_then(json_f64).unwrap_or(1.0);
            record.resources.push(rsc);
        }
    }
}

fn decode_ruined_fooocus(record: &mut ImageRecord, workflow: &Map<String, Value>) {
    // RuinedFooocus includes no LoRA hashes or catalog ids, so only the
    // generation parameters can be recovered
    if let Some(v) = workflow.get("Prompt").and_then(Value::as_str) {
        record.prompt = sanitize_prompt(v);
    }
    if let Some(v) = workflow.get("Negative").and_then(Value::as_str) {
        record.neg_prompt = sanitize_prompt(v);
    }
    if let Some(v) = workflow.get("steps").and_then(json_u32) {
        record.steps = Some(v);
    }
    if let Some(v) = workflow.get("cfg").and_then(json_f64) {
        record.scale = Some(v);
    }
    if let Some(v) = workflow.get("width").and_then(json_u32) {
        record.width = Some(v);
    }
    if let Some(v) = workflow.get("height").and_then(json_u32) {
        record.height = Some(v);
    }
    if let Some(v) = workflow.get("sampler_name").and_then(Value::as_str) {
        record.sampler = v.to_string();
    }
    if let Some(v) = workflow.get("scheduler").and_then(Value::as_str) {
        record.scheduler = v.to_string();
    }
    if let Some(v) = workflow.get("seed").and_then(json_string) {
        record.seed = numeric_or_empty(&v);
    }
    if let Some(v) = workflow.get("base_model_name").and_then(Value::as_str) {
        record.model = extract_model_filename(v);
    }
    if let Some(v) = workflow.get("base_model_hash").and_then(Value::as_str) {
        record.model_hash = v.to_string();
    }
}

/// Walk a ComfyUI workflow graph and pick generation parameters out of
/// node inputs. First match wins; complex multi-sampler workflows will
/// not always attribute values to the right branch.
fn decode_comfy(record: &mut ImageRecord, workflow: &Map<String, Value>) {
    for node in workflow.values() {
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            continue;
        };
        if record.prompt.is_empty() {
            if let Some(v) = inputs.get("text_positive").and_then(Value::as_str) {
                record.prompt = sanitize_prompt(v.trim());
            }
        }
        if record.neg_prompt.is_empty() {
            if let Some(v) = inputs.get("text_negative").and_then(Value::as_str) {
                record.neg_prompt = sanitize_prompt(v.trim());
            }
        }
        if record.seed.is_empty() {
            if let Some(v) = inputs
                .get("noise_seed")
                .or_else(|| inputs.get("seed"))
                .and_then(json_string)
            {
                record.seed = numeric_or_empty(&v);
            }
        }
        if record.sampler.is_empty() {
            if let Some(v) = inputs.get("sampler_name").and_then(Value::as_str) {
                record.sampler = v.to_string();
            }
        }
        if let Some(v) = inputs.get("scheduler").and_then(Value::as_str) {
            if record.scheduler.is_empty() {
                record.scheduler = v.to_string();
            }
            if record.steps.is_none() {
                record.steps = inputs.get("steps").and_then(json_u32);
            }
        }
        if record.scale.is_none() {
            record.scale = inputs
                .get("guidance")
                .or_else(|| inputs.get("cfg"))
                .and_then(json_f64);
        }
        if record.model.is_empty() {
            if let Some(v) = inputs
                .get("unet_name")
                .or_else(|| inputs.get("ckpt_name"))
                .and_then(Value::as_str)
            {
                record.model = extract_model_filename(v);
            }
        }
        if record.width.is_none() {
            record.width = inputs.get("width").and_then(json_u32);
        }
        if record.height.is_none() {
            record.height = inputs.get("height").and_then(json_u32);
        }
        if record.width.is_none() || record.height.is_none() {
            if let Some(v) = inputs.get("resolution").and_then(Value::as_str) {
                // formatted as "1024x1024" with an optional label behind it
                let v = v.to_lowercase();
                if let Some((w, h)) = v.trim().split_once('x') {
                    let h = h.split_whitespace().next().unwrap_or(h);
                    record.width = w.trim().parse().ok();
                    record.height = h.trim().parse().ok();
                }
            }
        }
    }

    // fall back to plain text-encoder nodes when no tagged prompt exists
    if record.prompt.is_empty() {
        for node in workflow.values() {
            if let Some(v) = node
                .get("inputs")
                .and_then(|inputs| inputs.get("text"))
                .and_then(Value::as_str)
            {
                record.prompt = sanitize_prompt(v.trim());
                if !record.prompt.is_empty() {
                    break;
                }
            }
        }
    }
}

/// Parse any recognized resource-reference section in the parameter tail.
fn parse_resource_sections(record: &mut ImageRecord, tail: &str) {
    if let Some((_, section)) = tail.split_once("Civitai resources:") {
        let section = section.trim();
        collect_typed_entries(record, section, "lora");
        collect_typed_entries(record, section, "checkpoint");
        collect_typed_entries(record, section, "embed");
        collect_legacy_lora_entries(record, section);
    } else if let Some((_, after)) = tail.split_once("Hashes: {") {
        let section = match after.split_once('}') {
            Some((section, _)) => section,
            None => after,
        };
        parse_hashes_section(record, section.trim());
    } else if let Some((_, after)) = tail.split_once("Lora hashes: \"") {
        let section = match after.split_once('"') {
            Some((section, _)) => section,
            None => after,
        };
        parse_lora_hashes_section(record, section.trim());
    }
}

/// Collect `{"type":"<kind>", ...}` entries from a `Civitai resources:`
/// JSON-ish section.
fn collect_typed_entries(record: &mut ImageRecord, section: &str, kind_tag: &str) {
    let marker = format!("{{\"type\":\"{kind_tag}\",");
    let mut rest = section;
    while let Some(idx) = rest.find(&marker) {
        let after_marker = &rest[idx + marker.len()..];
        let Some((work, after)) = after_marker.split_once('}') else {
            break;
        };
        if let Some((_, id_part)) = work.split_once("\"modelVersionId\":") {
            let id = match id_part.split_once(',') {
                Some((id, _)) => id,
                None => id_part,
            };
            let id = id.trim();
            if !id.is_empty() {
                let mut rsc = ResourceRef::new(ResourceKind::from_metadata(kind_tag));
                rsc.version_id = id.to_string();
                if kind_tag == "lora" {
                    rsc.weight = entry_weight(work);
                }
                record.resources.push(rsc);
            }
        }
        rest = after;
    }
}

/// Extra pass for an older `Type = lora }"modelVersionId":<id>` shape.
fn collect_legacy_lora_entries(record: &mut ImageRecord, section: &str) {
    let marker = "Type = lora }\"";
    let mut rest = section;
    while let Some(idx) = rest.find(marker) {
        let after_marker = &rest[idx + marker.len()..];
        let Some((work, after)) = after_marker.split_once('}') else {
            break;
        };
        if let Some((_, id_part)) = work.split_once("\"modelVersionId\":") {
            let id = id_part.trim();
            if id.parse::<u64>().is_ok() {
                let mut rsc = ResourceRef::new(ResourceKind::Lora);
                rsc.version_id = id.to_string();
                rsc.weight = entry_weight(work);
                record.resources.push(rsc);
            }
        }
        rest = after;
    }
}

fn entry_weight(work: &str) -> f64 {
    if let Some((_, w)) = work.split_once("\"weight\":") {
        let w = match w.split_once(',') {
            Some((w, _)) => w,
            None => w,
        };
        if let Ok(weight) = w.trim().parse() {
            return weight;
        }
    }
    1.0
}

/// Parse a `Hashes: {"model": "aaaa", "lora:name": "bbbb"}` section.
/// The braces were stripped by the caller, so re-wrapping yields a JSON
/// object; entries with empty hashes are dropped.
fn parse_hashes_section(record: &mut ImageRecord, section: &str) {
    let wrapped = format!("{{{section}}}");
    let Ok(entries) = serde_json::from_str::<Map<String, Value>>(&wrapped) else {
        return;
    };
    for (key, value) in &entries {
        let Some(hash) = value.as_str() else {
            continue;
        };
        if hash.trim().is_empty() {
            continue;
        }
        let label = match key.split_once(':') {
            Some((label, _)) => label,
            None => key.as_str(),
        };
        let mut rsc = ResourceRef::new(ResourceKind::from_metadata(label));
        rsc.hash = hash.trim().to_string();
        record.resources.push(rsc);
    }
}

/// Parse a `Lora hashes: "name: aaaa, name: bbbb"` section.
fn parse_lora_hashes_section(record: &mut ImageRecord, section: &str) {
    for entry in section.split(',') {
        let Some((_, hash)) = entry.split_once(':') else {
            continue;
        };
        let hash = hash.trim();
        if hash.is_empty() {
            continue;
        }
        let mut rsc = ResourceRef::new(ResourceKind::Lora);
        rsc.hash = hash.to_string();
        record.resources.push(rsc);
    }
}

/// Reduce a model identifier to a bare name: drop a trailing `[hash]`
/// marker, any leading path and the `.safetensors` extension.
pub(crate) fn extract_model_filename(model_id: &str) -> String {
    let filename = model_id
        .split_once('[')
        .map_or(model_id, |(head, _)| head)
        .trim();
    let filename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    filename
        .strip_suffix(".safetensors")
        .unwrap_or(filename)
        .to_string()
}

/// Pull the `[hash]` marker out of a model identifier, if present.
pub(crate) fn extract_model_hash(model_id: &str) -> String {
    let Some((_, after)) = model_id.split_once('[') else {
        return String::new();
    };
    match after.split_once(']') {
        Some((hash, _)) => hash.trim().to_string(),
        None => String::new(),
    }
}

/// Keeps a value only when it looks like a plain integer.
fn numeric_or_empty(value: &str) -> String {
    let v = value.trim();
    let body = v.strip_prefix('-').unwrap_or(v);
    if !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()) {
        v.to_string()
    } else {
        String::new()
    }
}

fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
