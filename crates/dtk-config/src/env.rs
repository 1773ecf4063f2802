/// Environment-variable interpolation for config values.
///
/// Two forms are recognized: `${VAR}` and `{{ env_var('VAR') }}` (single
/// or double quotes). Unset variables interpolate to an empty string with
/// a warning.
pub fn interpolate(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some((prefix, var, total_len)) = find_marker(rest) {
        out.push_str(&rest[..prefix]);
        match std::env::var(&var) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                tracing::warn!(var = %var, "Environment variable not set, using empty string");
            }
        }
        rest = &rest[prefix + total_len..];
    }
    out.push_str(rest);
    out
}

/// Locate the next interpolation marker: (offset, variable name, marker
/// length).
fn find_marker(s: &str) -> Option<(usize, String, usize)> {
    let dollar = s.find("${");
    let jinja = s.find("{{");

    match (dollar, jinja) {
        (Some(d), Some(j)) if d <= j => parse_dollar(s, d),
        (Some(d), None) => parse_dollar(s, d),
        (_, Some(j)) => parse_env_var_call(s, j),
        (None, None) => None,
    }
}

fn parse_dollar(s: &str, at: usize) -> Option<(usize, String, usize)> {
    let close = s[at..].find('}')?;
    let var = s[at + 2..at + close].trim().to_string();
    if var.is_empty() || !var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((at, var, close + 1))
}

fn parse_env_var_call(s: &str, at: usize) -> Option<(usize, String, usize)> {
    let close = s[at..].find("}}")?;
    let inner = s[at + 2..at + close].trim();
    let call = inner.strip_prefix("env_var(")?.strip_suffix(')')?;
    let var = call
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string();
    if var.is_empty() {
        return None;
    }
    Some((at, var, close + 2))
}
