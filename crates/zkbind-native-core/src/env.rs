/// Case-insensitive on/off switch parsing shared by env vars and the
/// scripting-facing toggles. Anything outside the accepted words is `None`.
pub fn parse_flag(v: &str) -> Option<bool> {
    let v = v.trim();
    const TRUTHY: [&str; 4] = ["1", "true", "yes", "on"];
    const FALSY: [&str; 4] = ["0", "false", "no", "off"];
    if TRUTHY.iter().any(|t| v.eq_ignore_ascii_case(t)) {
        return Some(true);
    }
    if FALSY.iter().any(|f| v.eq_ignore_ascii_case(f)) {
        return Some(false);
    }
    None
}

pub fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_flag(&v))
        .unwrap_or(default)
}

pub fn env_u32_nonzero(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

pub fn env_i32(name: &str, default: i32) -> i32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .unwrap_or(default)
}

pub fn env_string(name: &str) -> Option<String> {
    let v = std::env::var(name).ok()?;
    let v = v.trim();
    if v.is_empty() {
        return None;
    }
    Some(v.to_string())
}
