#[cfg(test)]
mod tests {
    use super::super::*;

    fn record() -> ImageRecord {
        let mut record = ImageRecord::new(Path::new("/images/castle.png"), "prompt text\nSteps: 30");
        record.prompt = "a castle at dusk".to_string();
        record.prompt_raw = "a castle at dusk, 8k".to_string();
        record.neg_prompt = "blurry".to_string();
        record.neg_prompt_raw = "blurry, jpeg artifacts".to_string();
        record.seed = "1234".to_string();
        record.width = Some(1024);
        record.height = Some(1024);
        record.steps = Some(30);
        record.scale = Some(7.5);
        record.model = "dreamshaper_v8".to_string();
        record.model_hash = "deadbeef".to_string();
        record.base_model = "SDXL 1.0".to_string();
        record.sampler = "DPM++ 2M".to_string();
        record.clip_skip = "2".to_string();
        record
    }

    fn options_writing_to(path: &Path) -> PromptOptions {
        PromptOptions {
            output_save_as: path.to_string_lossy().into_owned(),
            ..PromptOptions::default()
        }
    }

    #[test]
    fn test_ireplace_is_case_insensitive() {
        assert_eq!(ireplace("Hello [NAME] and [name]", "[name]", "World"), "Hello World and World");
        assert_eq!(ireplace("no tokens here", "[name]", "World"), "no tokens here");
    }

    #[test]
    fn test_ireplace_does_not_rescan_replacement() {
        assert_eq!(ireplace("[x]", "[x]", "a[x]b"), "a[x]b");
        assert_eq!(ireplace("[x] [x]", "[x]", "a[x]b"), "a[x]b a[x]b");
    }

    #[test]
    fn test_ireplace_empty_token_is_noop() {
        assert_eq!(ireplace("abc", "", "zzz"), "abc");
    }

    #[test]
    fn test_render_record_substitutes_tokens() {
        let template = "[ref_num]: [prompt] ([width]x[height]) by [sampler], cfg [scale]";
        let rendered = render_record(&record(), 3, template);
        assert_eq!(rendered, "00003: a castle at dusk (1024x1024) by DPM++ 2M, cfg 7.5");
    }

    #[test]
    fn test_render_record_comments_raw_metadata_lines() {
        let rendered = render_record(&record(), 1, "#[raw_metadata]");
        assert_eq!(rendered, "#prompt text\n#Steps: 30");
    }

    #[test]
    fn test_render_record_blank_when_numbers_missing() {
        let mut rec = record();
        rec.width = None;
        rec.scale = None;
        let rendered = render_record(&rec, 1, "[width]|[scale]");
        assert_eq!(rendered, "|");
    }

    #[test]
    fn test_render_record_whole_number_scale_has_no_decimal() {
        let mut rec = record();
        rec.scale = Some(7.0);
        assert_eq!(render_record(&rec, 1, "[scale]"), "7");
    }

    #[test]
    fn test_write_prompt_file_nothing_to_write() {
        let result = write_prompt_file(&[], &PromptOptions::default()).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_write_prompt_file_default_template() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.prompts");
        let mut options = options_writing_to(&out);
        options.append_filename = "castle".to_string();

        let written = write_prompt_file(&[record(), record()], &options).unwrap();
        assert_eq!(written, Some(out.clone()));

        let content = fs::read_to_string(&out).unwrap();
        let banner = "#".repeat(103);
        assert!(content.starts_with(&banner));
        assert!(content.contains("# 2 unique prompts from metadata extracted from civitai.com images."));
        assert!(content.contains("# Created on "));
        assert!(content.contains("# PROMPT 00001"));
        assert!(content.contains("# PROMPT 00002"));
        assert!(content.contains("# Extracted from: castle.png"));
        assert!(content.contains("# Raw metadata below:\n#prompt text\n#Steps: 30"));
        assert!(content.contains("!FILENAME = 00001-castle"));
        assert!(content.contains("!FILENAME = 00002-castle"));
        assert!(content.contains("#!CKPT_FILE = dreamshaper_v8"));
        assert!(content.contains("#!SEED = 1234"));
        assert!(content.contains("#!SAMPLER = DPM++ 2M"));
        assert!(content.contains("#!CLIP_SKIP = 2"));
        assert!(content.contains("#!WIDTH = 1024"));
        assert!(content.contains("!STEPS = 30"));
        assert!(content.contains("!SCALE = 7.5"));
        assert!(content.contains("\n!NEG_PROMPT = blurry\n"));
        assert!(content.contains("\na castle at dusk\n"));
    }

    #[test]
    fn test_write_prompt_file_with_custom_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.txt");
        fs::write(&template, "P: [prompt] / N: [neg_prompt]").unwrap();
        let out = dir.path().join("out.prompts");
        let mut options = options_writing_to(&out);
        options.output_template = Some(template);

        write_prompt_file(&[record()], &options).unwrap();
        let content = fs::read_to_string(&out).unwrap();
        assert!(content.contains("\nP: a castle at dusk / N: blurry\n"));
        assert!(!content.contains("!FILENAME"));
    }

    #[test]
    fn test_write_prompt_file_attaches_header_and_footer() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("header.txt");
        let footer = dir.path().join("footer.txt");
        fs::write(&header, "# my header\n").unwrap();
        fs::write(&footer, "# my footer\n").unwrap();
        let out = dir.path().join("out.prompts");
        let mut options = options_writing_to(&out);
        options.output_header = Some(header);
        options.output_footer = Some(footer);

        write_prompt_file(&[record()], &options).unwrap();
        let content = fs::read_to_string(&out).unwrap();
        assert!(content.starts_with("# my header\n"));
        assert!(content.ends_with("# my footer\n"));
        assert!(content.contains("# PROMPT 00001"));
    }

    #[test]
    fn test_write_prompt_file_ignores_missing_header() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.prompts");
        let mut options = options_writing_to(&out);
        options.output_header = Some(dir.path().join("nope.txt"));

        write_prompt_file(&[record()], &options).unwrap();
        let content = fs::read_to_string(&out).unwrap();
        assert!(content.starts_with(&"#".repeat(103)));
    }

    #[test]
    fn test_write_prompt_file_expands_date_and_time_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run-[date]-[time].prompts");
        let options = options_writing_to(&out);

        let written = write_prompt_file(&[record()], &options).unwrap().unwrap();
        let name = written.file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.contains("[date]"));
        assert!(!name.contains("[time]"));
        assert!(name.starts_with("run-2"));
        assert!(written.is_file());
    }

    #[test]
    fn test_write_prompt_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/deeper/out.prompts");
        let options = options_writing_to(&out);

        let written = write_prompt_file(&[record()], &options).unwrap();
        assert_eq!(written, Some(out.clone()));
        assert!(out.is_file());
    }
}
