use crate::error::UpdError;
use std::cmp::Ordering;
use std::str::FromStr;

/// A three-part numeric release tag, ordered by major, then minor, then patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Where a remote tag stands relative to the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStatus {
    Newer,
    Same,
    Older,
}

impl Tag {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `v1.2.3` or `1.2.3`.
    ///
    /// Release tags and user input are both untrusted, so anything that is not
    /// exactly three decimal components yields `None` instead of an error.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.strip_prefix('v').unwrap_or(text);
        let mut parts = text.split('.');
        let major = parse_component(parts.next()?)?;
        let minor = parse_component(parts.next()?)?;
        let patch = parse_component(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }
}

fn parse_component(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Compares a remote tag against the local one.
pub fn compare(remote: &Tag, local: &Tag) -> TagStatus {
    match remote.cmp(local) {
        Ordering::Greater => TagStatus::Newer,
        Ordering::Equal => TagStatus::Same,
        Ordering::Less => TagStatus::Older,
    }
}

impl FromStr for Tag {
    type Err = UpdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UpdError::Parse(s.to_string()))
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::fmt::Display for TagStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Newer => "NewerTag",
            Self::Same => "SameTag",
            Self::Older => "OlderTag",
        };
        write!(f, "{}", text)
    }
}

impl FromStr for TagStatus {
    type Err = UpdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NewerTag" => Ok(Self::Newer),
            "SameTag" => Ok(Self::Same),
            "OlderTag" => Ok(Self::Older),
            _ => Err(UpdError::Error(format!("Unknown tag status '{}'", s))),
        }
    }
}
