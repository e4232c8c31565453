pub fn is_truthy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn is_falsy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Reads a boolean flag, falling back when the variable is unset or not a
/// recognised value.
pub fn env_flag(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(value) if is_truthy(&value) => true,
        Ok(value) if is_falsy(&value) => false,
        _ => fallback,
    }
}

pub fn env_positive_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}
