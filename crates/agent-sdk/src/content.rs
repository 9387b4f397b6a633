/// Reference to a media resource carried by a content part.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MediaUrl {
    /// Resource location (http(s) URL or data URL).
    pub url: String,
    /// Optional provider-side identifier for the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl MediaUrl {
    /// Creates a media reference without an id.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: None,
        }
    }
}

/// One piece of message content.
///
/// Streamed fragments of the same kind are coalesced with
/// [`ContentPart::merge_in_place`]; see [`merge_content`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// Model reasoning. `encrypted` carries an opaque signature when the
    /// provider seals the reasoning block.
    Think {
        think: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted: Option<String>,
    },
    /// Image reference.
    ImageUrl { image_url: MediaUrl },
    /// Audio reference.
    AudioUrl { audio_url: MediaUrl },
    /// Video reference.
    VideoUrl { video_url: MediaUrl },
}

impl ContentPart {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates an unsealed reasoning part.
    pub fn think(think: impl Into<String>) -> Self {
        Self::Think {
            think: think.into(),
            encrypted: None,
        }
    }

    /// Creates an image reference part.
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: MediaUrl::new(url),
        }
    }

    /// Creates an audio reference part.
    pub fn audio_url(url: impl Into<String>) -> Self {
        Self::AudioUrl {
            audio_url: MediaUrl::new(url),
        }
    }

    /// Creates a video reference part.
    pub fn video_url(url: impl Into<String>) -> Self {
        Self::VideoUrl {
            video_url: MediaUrl::new(url),
        }
    }

    /// Returns the text of a `Text` part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Merges a same-kind successor into this part.
    ///
    /// Returns `false` when the successor must be appended as a new part:
    /// on a kind change, for media references (each one is a complete
    /// resource), and for reasoning that is already sealed.
    pub fn merge_in_place(&mut self, other: &ContentPart) -> bool {
        match (self, other) {
            (Self::Text { text }, Self::Text { text: more }) => {
                text.push_str(more);
                true
            }
            (
                Self::Think { think, encrypted },
                Self::Think {
                    think: more,
                    encrypted: seal,
                },
            ) => {
                if encrypted.is_some() {
                    return false;
                }
                think.push_str(more);
                encrypted.clone_from(seal);
                true
            }
            _ => false,
        }
    }
}

/// Appends `part` to `buffer`, merging it into the last part when possible.
///
/// Zero-length text still goes through `merge_in_place` so that interleaved
/// kinds keep their order.
pub fn merge_content(buffer: &mut Vec<ContentPart>, part: ContentPart) {
    if let Some(last) = buffer.last_mut()
        && last.merge_in_place(&part)
    {
        return;
    }
    buffer.push(part);
}

/// Concatenates the text parts in order, ignoring every other kind.
pub fn extract_text(parts: &[ContentPart]) -> String {
    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.as_text() {
            out.push_str(text);
        }
    }
    out
}

/// Content payload: either a flat string or an ordered list of parts.
///
/// Used for user input, tool output, and aggregated message content.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Flat text.
    Text(String),
    /// Structured parts.
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Returns the textual content (text parts only, in order).
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => extract_text(parts),
        }
    }

    /// Returns `true` when there is nothing to send.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }

    /// Converts the content into a part list.
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::text(text)],
            Self::Parts(parts) => parts,
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<ContentPart>> for Content {
    fn from(value: Vec<ContentPart>) -> Self {
        Self::Parts(value)
    }
}
