pub(super) const MAX_BATCH_SIZE: usize = 4096;
pub(super) const MAX_VALIDATION_SPLIT: f32 = 0.5;

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_validation_split() -> f32 {
    0.01
}

pub(super) fn default_batch_size() -> usize {
    32
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_max_log_files() -> usize {
    10
}

pub(super) fn clamp_validation_split(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, MAX_VALIDATION_SPLIT)
    } else {
        default_validation_split()
    }
}

pub(super) fn clamp_batch_size(value: usize) -> usize {
    value.clamp(1, MAX_BATCH_SIZE)
}
