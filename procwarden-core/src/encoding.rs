//! Text encoding applied to child stream content.

/// Character encoding used to turn stream bytes into text and back.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TextEncoding {
    /// UTF-8; invalid sequences decode to U+FFFD.
    Utf8,
    /// ISO-8859-1, one byte per character.
    #[default]
    Latin1,
}

impl TextEncoding {
    /// Resolves the encoding for child streams: the codeset of the native locale, else the
    /// given default file encoding, else Latin-1.
    ///
    /// # Arguments
    ///
    /// * `file_encoding` - Label of the default file encoding, if one is configured.
    pub fn resolve(file_encoding: Option<&str>) -> Self {
        Self::resolve_from(locale_codeset().as_deref(), file_encoding)
    }

    pub(crate) fn resolve_from(locale_codeset: Option<&str>, file_encoding: Option<&str>) -> Self {
        locale_codeset
            .and_then(Self::from_label)
            .or_else(|| file_encoding.and_then(Self::from_label))
            .unwrap_or_default()
    }

    /// Maps an encoding label (case-insensitive) to a supported encoding.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "utf8" => Some(Self::Utf8),
            "latin1" | "iso88591" | "iso885915" | "cp1252" | "windows1252" | "l1" => {
                Some(Self::Latin1)
            }
            _ => None,
        }
    }

    /// Decodes bytes into text.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().copied().map(char::from).collect(),
        }
    }

    /// Encodes text into bytes; characters Latin-1 cannot represent become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// Extracts the codeset from the first locale variable that is set, e.g. `UTF-8` from
/// `en_US.UTF-8@euro`.
fn locale_codeset() -> Option<String> {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
        .and_then(|locale| {
            let (_, rest) = locale.split_once('.')?;
            let codeset = rest.split('@').next().unwrap_or(rest);
            Some(codeset.to_owned())
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn locale_takes_precedence() {
        assert_eq!(
            TextEncoding::resolve_from(Some("UTF-8"), Some("ISO-8859-1")),
            TextEncoding::Utf8
        );
    }

    #[test]
    fn unknown_locale_falls_back_to_file_encoding() {
        assert_eq!(
            TextEncoding::resolve_from(Some("ANSI_X3.4-1968"), Some("utf8")),
            TextEncoding::Utf8
        );
        assert_eq!(
            TextEncoding::resolve_from(None, Some("Cp1252")),
            TextEncoding::Latin1
        );
    }

    #[test]
    fn falls_back_to_latin1() {
        assert_eq!(TextEncoding::resolve_from(None, None), TextEncoding::Latin1);
        assert_eq!(
            TextEncoding::resolve_from(Some("EUC-JP"), Some("KOI8-R")),
            TextEncoding::Latin1
        );
    }

    #[test]
    fn latin1_maps_bytes_one_to_one() {
        let bytes = [b'a', 0xE9, 0xFF];
        let text = TextEncoding::Latin1.decode(&bytes);
        assert_eq!(text, "a\u{e9}\u{ff}");
        assert_eq!(TextEncoding::Latin1.encode(&text), bytes.to_vec());
        assert_eq!(TextEncoding::Latin1.encode("\u{263a}"), b"?".to_vec());
    }

    #[test]
    fn utf8_decoding_is_lossy() {
        assert_eq!(TextEncoding::Utf8.decode(b"ok\xff"), "ok\u{fffd}");
    }
}
