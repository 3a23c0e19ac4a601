//! Shared utility functions used across the codebase.

/// Parse a request identifier that must be a positive integer.
pub fn parse_positive_id(name: &str, raw: &str) -> Result<u64, String> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(format!("{} must be a positive integer", name)),
        Ok(id) => Ok(id),
        Err(_) => Err(format!("invalid {}: '{}'", name, raw.trim())),
    }
}

/// Parse a boolean flag.
///
/// Recognises `1`, `t`, `true`, `yes`, `y`, `on` and `0`, `f`, `false`, `no`, `n`, `off`
/// (case-insensitive). An empty value maps to `default`; anything else is `None`.
pub fn parse_flag(raw: &str, default: bool) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "" => Some(default),
        "1" | "t" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// `Content-Disposition` value offering `file_name` as a download.
pub fn attachment(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}
