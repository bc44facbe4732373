//! Sampler name translation.
//!
//! Images produced by ComfyUI and similar tools carry internal sampler
//! identifiers (`dpmpp_3m_sde`) that most frontends will not accept.
//! This maps them onto their standard display names.

use tracing::warn;

/// Supported Auto1111 samplers as of 2024-07-02.
const CANONICAL_SAMPLERS: &[&str] = &[
    "DDIM",
    "DPM adaptive",
    "DPM fast",
    "DPM++ 2M",
    "DPM++ 2M SDE",
    "DPM++ 2M SDE Heun",
    "DPM++ 2S a",
    "DPM++ 3M SDE",
    "DPM++ SDE",
    "DPM2",
    "DPM2 a",
    "Euler",
    "Euler a",
    "Heun",
    "LCM",
    "LMS",
    "PLMS",
    "Restart",
    "UniPC",
];

/// Known substitutions for sampler ids that have no exact canonical match.
const KNOWN_SUBSTITUTES: &[(&str, &str)] = &[
    ("dpmpp_2m_sde_gpu", "DPM++ 2M SDE"),
    ("dpmpp_2m_karras", "DPM++ 2M"),
    ("dpmpp_3m_sde", "DPM++ 3M SDE"),
    ("ddim_ddim_uniform", "DDIM"),
    ("dpm++ 2m sde sgmuniform", "DPM++ 2M SDE"),
    ("dpmpp_sde_karras", "DPM++ SDE"),
    ("dpmpp_2s_ancestral_karras", "DPM++ 2S a"),
    ("dpm++ 2m sde gpu", "DPM++ 2M SDE"),
    ("dpmpp_3m_sde_gpu_karras", "DPM++ 3M SDE"),
    ("dpmpp_2m_alt_karras", "DPM++ 2M"),
    ("dpmpp_3m_sde_gpu", "DPM++ 3M SDE"),
    ("euler_max", "Euler"),
    ("dpmpp_2m_turbo", "DPM++ 2M"),
    ("dpm++ 2m sde ays", "DPM++ 2M SDE"),
    ("euler a turbo", "Euler a"),
    ("dpmpp_sde_sgm_uniform", "DPM++ SDE"),
    ("dpm++ 2m sgmuniform", "DPM++ 2M"),
    ("dpmpp_3m_sde_karras", "DPM++ 3M SDE"),
    ("dpmpp_2m_sde_karras", "DPM++ 2M SDE"),
    ("ddim_sgm_uniform", "DDIM"),
    ("dpm++ 2m turbo", "DPM++ 2M"),
    ("dpmpp_sde", "DPM++ SDE"),
    ("dpmpp_sde_gpu_karras", "DPM++ SDE"),
    ("dpm_2_turbo", "DPM2"),
    ("ddpm", "DPM2"),
    ("euler_ancestral", "Euler a"),
    ("dpmpp_3m_sde_gpu_sgm_uniform", "DPM++ 3M SDE"),
];

/// Translate a sampler identifier to its standard display name.
///
/// Canonical names are matched case-insensitively and returned with
/// canonical casing. Unrecognized samplers are passed through unchanged
/// with a warning.
pub fn translate_sampler(sampler: &str) -> String {
    let needle = sampler.trim().to_lowercase();
    if needle.is_empty() {
        return String::new();
    }
    for canonical in CANONICAL_SAMPLERS {
        if needle == canonical.to_lowercase() {
            return (*canonical).to_string();
        }
    }
    for (id, canonical) in KNOWN_SUBSTITUTES {
        if needle == *id {
            return (*canonical).to_string();
        }
    }
    warn!("no sampler translation known for {sampler}; keeping it as-is");
    sampler.trim().to_string()
}
