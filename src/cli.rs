use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "img2prompt")]
#[command(about = "Extracts generation metadata from AI images and rebuilds prompt files")]
#[command(version)]
pub struct Cli {
    /// Configuration file with key=value options
    #[arg(short, long, default_value = "config.txt")]
    pub config_file: PathBuf,

    /// Your civitai.com API key
    #[arg(long)]
    pub civitai_api_key: Option<String>,

    /// Minimum time between network requests to civitai.com (in seconds)
    #[arg(long)]
    pub civitai_request_delay: Option<f64>,

    /// Maximum file size to download in bytes (e.g.: 1000000000 = 1GB); 0 = no limit
    #[arg(long)]
    pub civitai_max_file_size: Option<u64>,

    /// Number of times to retry a download after a network failure
    #[arg(long)]
    pub civitai_retries: Option<u32>,

    /// Path to folder containing images to scan for metadata
    #[arg(short, long)]
    pub image_path: Option<PathBuf>,

    /// Do not scan subdirectories of the image path
    #[arg(long)]
    pub image_path_ignore_subdirs: bool,

    /// Append this to each prompt's assigned output filename
    #[arg(long)]
    pub prompt_append_filename: Option<String>,

    /// Minimum allowed step count (0 = no limit)
    #[arg(long)]
    pub prompt_min_steps: Option<u32>,

    /// Maximum allowed step count (0 = no limit)
    #[arg(long)]
    pub prompt_max_steps: Option<u32>,

    /// Minimum allowed guidance scale (0 = no limit)
    #[arg(long)]
    pub prompt_min_scale: Option<f64>,

    /// Maximum allowed guidance scale (0 = no limit)
    #[arg(long)]
    pub prompt_max_scale: Option<f64>,

    /// Do not adjust widths/heights to the closest officially-supported base resolution
    #[arg(long)]
    pub prompt_no_fix_resolution: bool,

    /// Comma-separated list of base models to include in prompt output (blank = all)
    #[arg(long)]
    pub prompt_only_include_base: Option<String>,

    /// Path/filename of prompt output template file
    #[arg(long)]
    pub prompt_output_template: Option<PathBuf>,

    /// Path/filename of header file to attach to prompt output file
    #[arg(long)]
    pub prompt_output_header: Option<PathBuf>,

    /// Path/filename of footer file to attach to prompt output file
    #[arg(long)]
    pub prompt_output_footer: Option<PathBuf>,

    /// Path/filename to save output file as; may contain [date] and [time]
    #[arg(long)]
    pub prompt_output_save_as: Option<String>,

    /// Comma-separated list of words to remove from prompts if found
    #[arg(long)]
    pub prompt_word_filter_list: Option<String>,

    /// Comma-separated list of words to remove from negative prompts if found
    #[arg(long)]
    pub prompt_neg_word_filter_list: Option<String>,

    /// Comma-separated list of loras to remove if found (filename without path or extension)
    #[arg(long)]
    pub prompt_lora_filter_list: Option<String>,

    /// Path to your existing model/checkpoint files
    #[arg(long)]
    pub existing_model_path: Option<PathBuf>,

    /// Path to your existing LoRA files
    #[arg(long)]
    pub existing_lora_path: Option<PathBuf>,

    /// Path to your existing embedding files
    #[arg(long)]
    pub existing_embedding_path: Option<PathBuf>,

    /// Path that downloaded model/checkpoint files will be saved to
    #[arg(long)]
    pub download_model_path: Option<PathBuf>,

    /// Path that downloaded LoRA files will be saved to
    #[arg(long)]
    pub download_lora_path: Option<PathBuf>,

    /// Path that downloaded embedding files will be saved to
    #[arg(long)]
    pub download_embedding_path: Option<PathBuf>,

    /// Directory holding the lookup caches and download ledger
    #[arg(long)]
    pub cache_path: Option<PathBuf>,
}
