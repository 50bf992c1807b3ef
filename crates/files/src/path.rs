/// Lexically normalize a client-supplied path: collapse repeated
/// separators, drop `.` elements, resolve `..` against the preceding
/// element. `..` never climbs above `/` for absolute paths. The
/// filesystem is never consulted, so symlinks are not resolved.
///
/// Empty input or a path that reduces to `.` becomes `/`.
pub fn clean_path(input: &str) -> String {
    let rooted = input.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for elem in input.split('/') {
        match elem {
            "" | "." => {},
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                },
                _ if rooted => {},
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => "/".to_string(),
        (false, false) => joined,
    }
}
