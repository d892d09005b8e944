use std::fmt;

/// Rewrites foreign separators to the canonical `/` form.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Percent-encodes one path segment, keeping RFC 3986 unreserved characters.
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Slash-separated location on the remote share, relative to the base URL.
///
/// Segments are kept decoded; encoding happens per segment so a `/` inside a
/// name can never be produced and the separator itself is never encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    segments: Vec<String>,
}

impl RemotePath {
    pub fn parse(path: &str) -> Self {
        let normalized = normalize_separators(path);
        let segments = normalized
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect();
        Self { segments }
    }

    /// Builds the remote location for a local file name.
    ///
    /// An absolute `file_name` under `save_root` keeps its directory structure
    /// relative to that root; anything else is reduced to its final component.
    pub fn from_local(file_name: &str, save_root: &str, remote_dir: &str) -> Self {
        let file = normalize_separators(file_name);
        let untrimmed = normalize_separators(save_root.trim());
        // A filesystem root trims to "", which still prefixes every absolute name.
        let root = untrimmed.trim_end_matches('/');

        let relative = if is_absolute(&file) && !untrimmed.is_empty() {
            match file.strip_prefix(root) {
                Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
                _ => base_name(&file).to_string(),
            }
        } else {
            base_name(&file).to_string()
        };

        let remote_root = normalize_separators(remote_dir);
        Self::parse(&format!("{}/{}", remote_root.trim_matches('/'), relative))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Encoded segments of the containing directory, outermost first.
    pub fn encoded_parent(&self) -> Vec<String> {
        match self.segments.split_last() {
            Some((_, parent)) => parent.iter().map(|s| encode_segment(s)).collect(),
            None => Vec::new(),
        }
    }

    /// Full encoded relative path, e.g. `Media/My%20Channel/clip.mp4`.
    pub fn encoded(&self) -> String {
        self.segments
            .iter()
            .map(|s| encode_segment(s))
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
