use crate::error::ExtractError;
use crate::wikitext;
use lazy_static::lazy_static;
use log::trace;
use regex::Regex;
use url::Url;

lazy_static! {
    static ref FILE_LINK: Regex = Regex::new(r"(?i)^ *\[\[ *file *:").unwrap();
    static ref NAMESPACE: Regex = Regex::new(r"(?i)^ *(?:file|image) *:").unwrap();
}

/// Page-title encoding used in wiki URLs: UTF-8 bytes, `[A-Za-z0-9]` and
/// `'(),-.:_` unchanged, space to `_`, every other byte as upper-case `%XX`.
/// Not idempotent: an already encoded title has its `%` escaped again.
pub fn encode_title(title: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(title.len() + title.len() / 2);
    for &b in title.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(b as char),
            b'\'' | b'(' | b')' | b',' | b'-' | b'.' | b':' | b'_' => out.push(b as char),
            b' ' => out.push('_'),
            _ => {
                out.push('%');
                out.push(HEX[(b >> 4) as usize] as char);
                out.push(HEX[(b & 0x0f) as usize] as char);
            }
        }
    }
    out
}

/// Canonical URL of an article: the encoded title resolved against the
/// directory of the site's `base` URL.
pub fn page_url(base: &str, title: &str) -> Result<String, ExtractError> {
    let base_url = Url::parse(base).map_err(|_| ExtractError::InvalidBase(base.to_string()))?;
    // "./" keeps a title such as "Help:Contents" from being read as a scheme.
    let page = base_url
        .join(&format!("./{}", encode_title(title)))
        .map_err(|_| ExtractError::InvalidBase(base.to_string()))?;
    Ok(page.to_string())
}

#[derive(Debug, Clone)]
pub struct LogoResolver {
    logo_base: String,
    extension: String,
}

impl LogoResolver {
    pub fn new(logo_base: &str, extension: &str) -> Self {
        Self {
            logo_base: logo_base.trim_end_matches('/').to_string(),
            extension: extension.to_string(),
        }
    }

    /// Zero or more image URLs for one raw value, in source order.
    pub fn resolve(&self, raw: &str) -> Vec<String> {
        self.candidates(raw)
            .iter()
            .map(|name| encode_title(name))
            .filter(|encoded| encoded.ends_with(&self.extension))
            .map(|encoded| format!("{}/{}", self.logo_base, encoded))
            .collect()
    }

    /// File names named by the value, before filtering and encoding.
    pub fn candidates(&self, raw: &str) -> Vec<String> {
        let value = raw.trim();
        if value.is_empty() {
            return Vec::new();
        }
        if !FILE_LINK.is_match(value) {
            return vec![value.to_string()];
        }

        match wikitext::parse(value) {
            Ok(code) => code
                .wikilinks()
                .into_iter()
                .map(|link| NAMESPACE.replace(link.title, "").trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            Err(e) => {
                trace!("Unresolvable logo value {:?}: {}", value, e);
                Vec::new()
            }
        }
    }
}
