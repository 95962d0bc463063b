/// Normalizes a distribution name the way package indexes compare them
/// (lowercase, runs of `-`, `_` and `.` collapse to a single `-`).
pub fn normalize_dist_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.push(ch.to_ascii_lowercase());
    }
    out
}

pub fn canonical_extras(extras: &[String]) -> Vec<String> {
    let mut out = extras
        .iter()
        .map(|extra| normalize_dist_name(extra))
        .filter(|extra| !extra.is_empty())
        .collect::<Vec<_>>();
    out.sort();
    out.dedup();
    out
}
