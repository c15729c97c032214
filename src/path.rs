//! Slash-delimited path string utilities.
//!
//! Every function here treats `/` as the separator no matter what the host
//! OS uses, and none of them touch the filesystem: they are purely lexical.

/// Returns true iff `path` begins with `/`.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Lexically cleans `path`: repeated separators collapse, `.` segments
/// disappear, and `..` segments fold against the preceding real segment.
/// A leading `/` is preserved and `..` never escapes above it. The empty
/// path cleans to `"."`.
#[must_use]
pub fn clean(path: &str) -> String {
    let rooted = is_absolute(path);
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
                // rooted with nothing to pop: ".." at the root is the root
            }
            s => out.push(s),
        }
    }
    if rooted {
        let mut cleaned = String::from("/");
        cleaned.push_str(&out.join("/"));
        cleaned
    } else if out.is_empty() {
        String::from(".")
    } else {
        out.join("/")
    }
}

/// Splits off the first path segment, returning `(head, rest)`.
///
/// The table of cases:
///
/// ```text
/// ""          -> ("", "")
/// "/"         -> ("/", "")
/// "/foo/bar"  -> ("/", "foo/bar")
/// "foo/bar"   -> ("foo", "bar")
/// "foo"       -> ("foo", "")
/// ```
#[must_use]
pub fn split_head(path: &str) -> (&str, &str) {
    if path.is_empty() {
        return ("", "");
    }
    if path == "/" {
        return ("/", "");
    }
    match path.find('/') {
        None => (path, ""),
        Some(0) => ("/", path.trim_start_matches('/')),
        Some(x) => (&path[..x], &path[x + 1..]),
    }
}

/// Returns `path` itself when absolute, otherwise resolves it against `cwd`
/// and cleans the result.
#[must_use]
pub fn absolutize(cwd: &str, path: &str) -> String {
    if is_absolute(path) {
        path.to_string()
    } else {
        clean(&format!("{cwd}/{path}"))
    }
}

/// Splits `path` into its (cleaned) directory portion and final base name.
#[must_use]
pub fn split_parent(path: &str) -> (String, &str) {
    match path.rfind('/') {
        Some(i) => (clean(&path[..=i]), &path[i + 1..]),
        None => (String::from("."), path),
    }
}

/// The final element of `path`. The root's base name is `/` itself.
#[must_use]
pub fn basename(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}
