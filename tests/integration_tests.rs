// Integration tests for img2prompt
use img2prompt::cli::Cli;
use img2prompt::config::Config;
use img2prompt::pipeline::{self, RunSummary};
use img2prompt::resolver::DownloadTally;

use clap::Parser;
use std::fs::{self, File};
use std::path::Path;
use tempfile::TempDir;

// Build a 1x1 PNG carrying the given tEXt chunks
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

// Auto1111-style parameter text, the most common metadata shape
fn params(prompt: &str, neg: &str, steps: u32, scale: f64, size: &str) -> String {
    format!(
        "{prompt}\nNegative prompt: {neg}\nSteps: {steps}, Sampler: DPM++ 2M Karras, \
         CFG scale: {scale}, Seed: 1234, Size: {size}, Clip skip: 2"
    )
}

// A config whose every output lands inside the temp dir. None of the
// fixtures carry hashes or unresolved version ids, so runs stay offline.
fn test_config(dir: &TempDir) -> Config {
    let images = dir.path().join("images");
    fs::create_dir_all(&images).unwrap();
    let mut config = Config::default();
    config.images.path = images;
    config.cache_path = dir.path().join("cache");
    config.prompts.output_save_as = dir
        .path()
        .join("out.prompts")
        .to_string_lossy()
        .into_owned();
    config
}

fn output_text(dir: &TempDir) -> String {
    fs::read_to_string(dir.path().join("out.prompts")).expect("output file missing")
}

#[test]
fn test_full_run_writes_prompt_file() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let images = &config.images.path;

    write_png(
        &images.join("a.png"),
        &[("parameters", &params("a castle at dusk", "blurry, lowres", 30, 7.5, "1024x1024"))],
    );
    write_png(
        &images.join("b.png"),
        &[("parameters", &params("a forest in spring", "jpeg artifacts", 25, 6.0, "1024x1024"))],
    );
    write_png(&images.join("c.png"), &[]);

    let summary = pipeline::run(&config).expect("run failed");
    assert_eq!(
        summary,
        RunSummary {
            images_found: 3,
            images_with_metadata: 2,
            images_skipped: 1,
            prompts_written: 2,
            downloads: DownloadTally::default(),
        }
    );

    let text = output_text(&dir);
    assert!(text.contains("# 2 unique prompts from metadata extracted from civitai.com images."));
    assert!(text.contains("# PROMPT 00001"));
    assert!(text.contains("# PROMPT 00002"));
    assert!(text.contains("# Extracted from: a.png"));
    assert!(text.contains("!FILENAME = 00001-"));
    assert!(text.contains("#!SAMPLER = DPM++ 2M\n"));
    assert!(text.contains("#!SEED = 1234"));
    assert!(text.contains("#!CLIP_SKIP = 2"));
    assert!(text.contains("!STEPS = 30"));
    assert!(text.contains("!SCALE = 7.5"));
    assert!(text.contains("\n!NEG_PROMPT = blurry, lowres\n"));
    assert!(text.contains("\na castle at dusk\n"));
    assert!(text.contains("\na forest in spring\n"));
}

#[test]
fn test_run_applies_step_and_scale_limits() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.prompts.max_steps = 40;
    config.prompts.min_scale = 5.0;

    write_png(
        &config.images.path.join("hot.png"),
        &[("parameters", &params("sunset over water", "", 60, 3.0, "1024x1024"))],
    );

    pipeline::run(&config).expect("run failed");

    let text = output_text(&dir);
    assert!(text.contains("!STEPS = 40"));
    assert!(text.contains("!SCALE = 5"));
}

#[test]
fn test_run_snaps_resolution_to_supported_size() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    // 1920x1080 is no SDXL size; 1344x768 has the closest aspect ratio
    write_png(
        &config.images.path.join("wide.png"),
        &[("parameters", &params("a mountain panorama", "", 30, 7.0, "1920x1080"))],
    );

    pipeline::run(&config).expect("run failed");

    let text = output_text(&dir);
    assert!(text.contains("#!WIDTH = 1344"));
    assert!(text.contains("#!HEIGHT = 768"));
}

#[test]
fn test_run_filters_words_and_rewrites_lora_paths() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.prompts.word_filter_list = vec!["badword".to_string()];

    write_png(
        &config.images.path.join("tagged.png"),
        &[(
            "parameters",
            &params(
                "masterpiece portrait, badword, <lora:styles/ink_v2:0.8>",
                "",
                30,
                7.0,
                "1024x1024",
            ),
        )],
    );

    pipeline::run(&config).expect("run failed");

    // the commented raw-metadata echo keeps the original text; the
    // rendered prompt below the !FILENAME line is what gets filtered
    let text = output_text(&dir);
    let rendered = text.split("!FILENAME").nth(1).expect("no rendered block");
    assert!(!rendered.contains("badword"));
    assert!(rendered.contains("<lora:ink_v2:0.8>"));
    assert!(!rendered.contains("styles/"));
}

#[test]
fn test_run_translates_comfy_sampler_names() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let raw = "a quiet alley\nNegative prompt: people\nSteps: 20, Sampler: euler_ancestral, \
               CFG scale: 7, Seed: 9, Size: 1024x1024";
    write_png(&config.images.path.join("comfy.png"), &[("parameters", raw)]);

    pipeline::run(&config).expect("run failed");

    assert!(output_text(&dir).contains("#!SAMPLER = Euler a\n"));
}

#[test]
fn test_run_drops_duplicate_prompts() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let raw = params("the same prompt twice over, in two files", "", 30, 7.0, "1024x1024");

    write_png(&config.images.path.join("one.png"), &[("parameters", &raw)]);
    write_png(&config.images.path.join("two.png"), &[("parameters", &raw)]);

    let summary = pipeline::run(&config).expect("run failed");
    assert_eq!(summary.images_with_metadata, 2);
    assert_eq!(summary.prompts_written, 1);
}

#[test]
fn test_run_base_allow_list_excludes_unknown() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.prompts.only_include_base = vec!["SDXL 1.0".to_string()];

    // no model reference anywhere, so the base model stays unknown
    write_png(
        &config.images.path.join("plain.png"),
        &[("parameters", &params("an unattributed image", "", 30, 7.0, "1024x1024"))],
    );

    let summary = pipeline::run(&config).expect("run failed");
    assert_eq!(summary.prompts_written, 0);
    assert!(!dir.path().join("out.prompts").exists());
}

#[test]
fn test_run_with_custom_template_header_footer() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);

    let template = dir.path().join("template.txt");
    fs::write(&template, "P: [prompt] / N: [neg_prompt] / S: [steps]").unwrap();
    let header = dir.path().join("header.txt");
    fs::write(&header, "### header ###\n").unwrap();
    let footer = dir.path().join("footer.txt");
    fs::write(&footer, "### footer ###\n").unwrap();
    config.prompts.output_template = Some(template);
    config.prompts.output_header = Some(header);
    config.prompts.output_footer = Some(footer);

    write_png(
        &config.images.path.join("img.png"),
        &[("parameters", &params("a lighthouse in fog", "grain", 28, 6.5, "1024x1024"))],
    );

    pipeline::run(&config).expect("run failed");

    let text = output_text(&dir);
    assert!(text.starts_with("### header ###\n"));
    assert!(text.ends_with("### footer ###\n"));
    assert!(text.contains("P: a lighthouse in fog / N: grain / S: 28"));
    // custom templates replace the default block entirely
    assert!(!text.contains("!FILENAME"));
}

#[test]
fn test_run_resolves_resources_from_cache_without_downloads() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);

    // 777 is blacklisted; 888 resolves from cache and exists locally
    let cache = &config.cache_path;
    fs::create_dir_all(cache).unwrap();
    fs::write(cache.join("do_not_download.txt"), "777, never this one\n").unwrap();
    fs::write(
        cache.join("civitai_version_info.txt"),
        "777,blocked.safetensors,Blocked,SDXL 1.0,LORA\n\
         888,inkstyle.safetensors,Ink Style,SDXL 1.0,LORA\n",
    )
    .unwrap();
    let lora_dir = dir.path().join("loras");
    fs::create_dir_all(&lora_dir).unwrap();
    fs::write(lora_dir.join("inkstyle.safetensors"), "x").unwrap();
    config.resources.existing_lora_path = Some(lora_dir);
    config.resources.download_lora_path = Some(dir.path().join("downloads"));

    let raw = "an inked warrior\nNegative prompt: blurry\nSteps: 30, Sampler: Euler a, \
               CFG scale: 7, Seed: 42, Size: 1024x1024, Civitai resources: \
               [{\"type\":\"lora\",\"weight\":0.8,\"modelVersionId\":777},\
               {\"type\":\"lora\",\"weight\":1.0,\"modelVersionId\":888}]";
    write_png(&config.images.path.join("inked.png"), &[("parameters", raw)]);

    let summary = pipeline::run(&config).expect("run failed");
    assert_eq!(summary.prompts_written, 1);
    assert_eq!(summary.downloads, DownloadTally::default());
    // nothing was fetched, so the download folder was never created
    assert!(!dir.path().join("downloads").exists());
}

#[test]
fn test_config_file_and_cli_overrides() {
    let dir = TempDir::new().unwrap();
    let images = dir.path().join("images");
    fs::create_dir_all(&images).unwrap();

    let config_file = dir.path().join("settings.txt");
    fs::write(
        &config_file,
        format!(
            "# run settings\nimage_path={}\nprompt_max_steps=40\nprompt_append_filename=batch\n",
            images.display()
        ),
    )
    .unwrap();

    let cli = Cli::parse_from([
        "img2prompt",
        "--config-file",
        config_file.to_str().unwrap(),
        "--prompt-max-steps",
        "35",
    ]);
    let config = Config::load(&cli).expect("load failed");

    assert_eq!(config.images.path, images);
    assert_eq!(config.prompts.max_steps, 35);
    assert_eq!(config.prompts.append_filename, "batch");
}

#[test]
fn test_missing_image_path_rejected() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nowhere");

    let cli = Cli::parse_from([
        "img2prompt",
        "--image-path",
        missing.to_str().unwrap(),
    ]);
    assert!(Config::load(&cli).is_err());
}
