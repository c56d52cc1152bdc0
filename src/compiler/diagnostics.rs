//! Diagnostic extraction from typesetter logs

/// Maximum number of diagnostic lines returned to the client
pub const MAX_DIAGNOSTIC_LINES: usize = 10;

/// Pick the lines of `log` that look like errors
///
/// A line qualifies when it starts with `!` (TeX's fatal error marker) or contains
/// `Error`. Order is preserved and at most `MAX_DIAGNOSTIC_LINES` are kept. An empty
/// result is returned as is; substituting a placeholder is up to the caller.
pub fn extract(log: &str) -> Vec<String> {
    log.lines()
        .filter(|line| line.starts_with('!') || line.contains("Error"))
        .take(MAX_DIAGNOSTIC_LINES)
        .map(str::to_string)
        .collect()
}
