#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::metadata::{ImageRecord, ResourceKind, ResourceRef};
    use std::path::Path;

    fn record_with_prompt(prompt: &str) -> ImageRecord {
        let mut record = ImageRecord::new(Path::new("/images/test.png"), "raw");
        record.prompt = prompt.to_string();
        record
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_sanitize_collapses_separators() {
        assert_eq!(sanitize_prompt("a,,b"), "a, b");
        assert_eq!(sanitize_prompt("a ,  b"), "a, b");
        assert_eq!(sanitize_prompt("a, , b"), "a, b");
    }

    #[test]
    fn test_sanitize_strips_newlines() {
        assert_eq!(sanitize_prompt("first\nsecond"), "firstsecond");
        assert_eq!(sanitize_prompt("first\r\nsecond"), "firstsecond");
    }

    #[test]
    fn test_sanitize_spaces_after_punctuation() {
        assert_eq!(sanitize_prompt("red,blue"), "red, blue");
        assert_eq!(sanitize_prompt("done.next"), "done. next");
    }

    #[test]
    fn test_sanitize_leaves_decimals_alone() {
        assert_eq!(sanitize_prompt("strength 0.8, next"), "strength 0.8, next");
    }

    #[test]
    fn test_sanitize_fixes_split_resolution_words() {
        assert_eq!(
            sanitize_prompt("masterpiece, 8 k, 4 k wallpaper"),
            "masterpiece, 8k, 4k wallpaper"
        );
    }

    #[test]
    fn test_sanitize_drops_embedding_marker() {
        assert_eq!(
            sanitize_prompt("embedding:easynegative, blurry"),
            "easynegative, blurry"
        );
    }

    #[test]
    fn test_sanitize_trims_stray_edges() {
        assert_eq!(sanitize_prompt(", foo bar, "), "foo bar");
        assert_eq!(sanitize_prompt("  foo bar,,"), "foo bar");
    }

    #[test]
    fn test_remove_word_requires_boundaries() {
        assert_eq!(remove_word("cat", "a cat, a dog"), "a , a dog");
        assert_eq!(remove_word("cat", "catalog, cataract"), "catalog, cataract");
    }

    #[test]
    fn test_remove_word_matches_whole_text() {
        assert_eq!(remove_word("cat", " cat "), "");
    }

    #[test]
    fn test_strip_words_sanitizes_afterwards() {
        let mut text = "a cat, a dog".to_string();
        let removed = strip_words(&mut text, &words(&["cat"]));
        assert_eq!(removed, 1);
        assert_eq!(text, "a, a dog");
    }

    #[test]
    fn test_strip_words_is_case_insensitive() {
        let mut text = "NSFW, portrait".to_string();
        strip_words(&mut text, &words(&["nsfw"]));
        assert_eq!(text, "portrait");
    }

    #[test]
    fn test_rewrite_lora_paths() {
        let mut records = vec![record_with_prompt(
            "a castle <lora:styles\\fantasy\\castle_v2:0.8> here",
        )];
        rewrite_lora_paths(&mut records);
        assert_eq!(records[0].prompt, "a castle <lora:castle_v2:0.8> here");

        let mut records = vec![record_with_prompt("x <lora:sdxl/detail:1> y")];
        rewrite_lora_paths(&mut records);
        assert_eq!(records[0].prompt, "x <lora:detail:1> y");
    }

    #[test]
    fn test_remove_filter_loras() {
        let mut records = vec![record_with_prompt("a <lora:foo:0.8> b <lora:bar:1> c")];
        remove_filter_loras(&mut records, &words(&["foo"]));
        assert_eq!(records[0].prompt, "a  b <lora:bar:1> c");
    }

    #[test]
    fn test_remove_filter_loras_wildcard() {
        let mut records = vec![record_with_prompt("a <lora:foo:0.8> b <lora:bar:1> c")];
        remove_filter_loras(&mut records, &words(&["*"]));
        assert_eq!(records[0].prompt, "a  b  c");
    }

    #[test]
    fn test_add_missing_lora_refs() {
        let mut record = record_with_prompt("scenic view");
        let mut lora = ResourceRef::new(ResourceKind::Lora);
        lora.filename = "style.safetensors".to_string();
        lora.weight = 0.8;
        record.resources.push(lora);
        let mut records = vec![record];
        add_missing_lora_refs(&mut records);
        assert_eq!(records[0].prompt, "scenic view <lora:style:0.8>");
    }

    #[test]
    fn test_add_missing_lora_refs_skips_present() {
        let mut record = record_with_prompt("scenic <lora:style:1> view");
        let mut lora = ResourceRef::new(ResourceKind::Lora);
        lora.filename = "style.safetensors".to_string();
        record.resources.push(lora);
        let mut records = vec![record];
        add_missing_lora_refs(&mut records);
        assert_eq!(records[0].prompt, "scenic <lora:style:1> view");
    }

    #[test]
    fn test_enforce_limits_clamps_steps_and_scale() {
        let options = PromptOptions {
            min_steps: 20,
            max_steps: 60,
            max_scale: 12.0,
            fix_resolution: false,
            ..PromptOptions::default()
        };
        let mut high = record_with_prompt("p");
        high.steps = Some(150);
        high.scale = Some(30.0);
        let mut low = record_with_prompt("p");
        low.steps = Some(10);
        let mut records = vec![high, low];
        enforce_limits(&mut records, &options);
        assert_eq!(records[0].steps, Some(60));
        assert_eq!(records[0].scale, Some(12.0));
        assert_eq!(records[1].steps, Some(20));

        // clamping again changes nothing
        enforce_limits(&mut records, &options);
        assert_eq!(records[0].steps, Some(60));
        assert_eq!(records[0].scale, Some(12.0));
        assert_eq!(records[1].steps, Some(20));
    }

    #[test]
    fn test_enforce_limits_zero_bounds_are_no_limits() {
        let options = PromptOptions {
            fix_resolution: false,
            ..PromptOptions::default()
        };
        let mut record = record_with_prompt("p");
        record.steps = Some(500);
        record.scale = Some(99.0);
        let mut records = vec![record];
        enforce_limits(&mut records, &options);
        assert_eq!(records[0].steps, Some(500));
        assert_eq!(records[0].scale, Some(99.0));
    }

    #[test]
    fn test_enforce_limits_snaps_resolution() {
        let options = PromptOptions::default();
        let mut record = record_with_prompt("p");
        record.width = Some(1920);
        record.height = Some(1080);
        record.base_model = "SDXL 1.0".to_string();
        let mut records = vec![record];
        enforce_limits(&mut records, &options);
        assert_eq!(records[0].width, Some(1344));
        assert_eq!(records[0].height, Some(768));
    }

    #[test]
    fn test_base_model_allow_list() {
        let mut sdxl = record_with_prompt("keep");
        sdxl.base_model = "SDXL 1.0".to_string();
        let mut sd15 = record_with_prompt("drop");
        sd15.base_model = "SD 1.5".to_string();
        let unknown = record_with_prompt("keep too");
        let records = vec![sdxl, sd15, unknown];
        let kept = drop_unwanted_base(records, &words(&["sdxl 1.0", "unknown"]));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].prompt, "keep");
        assert_eq!(kept[1].prompt, "keep too");
    }

    #[test]
    fn test_drop_short_prompts_ignores_lora_tags() {
        let records = vec![
            record_with_prompt(""),
            record_with_prompt("<lora:something:0.8>"),
            record_with_prompt("hi"),
            record_with_prompt("long enough"),
        ];
        let kept = drop_short_prompts(records, 5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].prompt, "long enough");
    }

    #[test]
    fn test_drop_duplicates_keeps_first() {
        let first = record_with_prompt("Same Prompt");
        let dupe = record_with_prompt("same prompt");
        let other = record_with_prompt("different");
        let kept = drop_duplicates(vec![first, dupe, other]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].prompt, "Same Prompt");
        assert_eq!(kept[1].prompt, "different");
    }

    #[test]
    fn test_duplicates_with_different_negatives_survive() {
        let mut first = record_with_prompt("same prompt");
        first.neg_prompt = "blurry".to_string();
        let second = record_with_prompt("same prompt");
        let kept = drop_duplicates(vec![first, second]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_apply_filters_runs_all_stages() {
        let mut record = record_with_prompt("a castle on a hill, 8 k");
        record.steps = Some(150);
        record.sampler = "dpmpp_2m_karras".to_string();
        let options = PromptOptions {
            max_steps: 60,
            fix_resolution: false,
            ..PromptOptions::default()
        };
        let out = apply_filters(vec![record], &options);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].steps, Some(60));
        assert_eq!(out[0].sampler, "DPM++ 2M");
    }
}
