use crate::error::WikitextError;
use crate::wikitext;
use std::collections::HashSet;

/// One targeted parameter occurrence. Borrows from the scanned body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatch<'a> {
    /// Template name, trimmed.
    pub template_name: &'a str,
    /// Parameter name, trimmed and lower-cased.
    pub parameter_name: String,
    /// Raw, unrendered parameter value.
    pub raw_value: &'a str,
}

/// Template filter built once from the configuration.
#[derive(Debug, Clone)]
pub struct TemplateScanner {
    prefix: String,
    prefix_chars: usize,
    parameters: HashSet<String>,
}

/// Matches found in one body, plus how many templates matched the prefix.
#[derive(Debug)]
pub struct Matches<'a> {
    templates_matched: usize,
    inner: std::vec::IntoIter<TemplateMatch<'a>>,
}

impl<'a> Matches<'a> {
    pub fn templates_matched(&self) -> usize {
        self.templates_matched
    }
}

impl<'a> Iterator for Matches<'a> {
    type Item = TemplateMatch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl TemplateScanner {
    /// `prefix` is compared case-insensitively against the first
    /// `prefix.chars().count()` characters of each trimmed template name.
    pub fn new<S: AsRef<str>>(prefix: &str, parameters: &[S]) -> Self {
        Self {
            prefix: prefix.to_lowercase(),
            prefix_chars: prefix.chars().count(),
            parameters: parameters
                .iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    /// Prefix test on a fixed-length slice, so `Infoboxes` and
    /// `Infobox company` both match `infobox` while `Info` does not.
    pub fn name_matches(&self, name: &str) -> bool {
        let head: String = name.trim().chars().take(self.prefix_chars).collect();
        head.to_lowercase() == self.prefix
    }

    pub fn scan<'a>(&self, body: &'a str) -> Result<Matches<'a>, WikitextError> {
        let code = wikitext::parse(body)?;
        let mut templates_matched = 0;
        let mut found = Vec::new();

        for template in code.templates() {
            if !self.name_matches(template.name) {
                continue;
            }
            templates_matched += 1;
            for param in &template.params {
                let name = param.name.trim().to_lowercase();
                if self.parameters.contains(&name) {
                    found.push(TemplateMatch {
                        template_name: template.name.trim(),
                        parameter_name: name,
                        raw_value: param.value,
                    });
                }
            }
        }

        Ok(Matches {
            templates_matched,
            inner: found.into_iter(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> TemplateScanner {
        TemplateScanner::new("infobox", &["logo"])
    }

    #[test]
    fn prefix_match_is_case_insensitive_and_fixed_length() {
        let s = scanner();
        assert!(s.name_matches("Infobox company"));
        assert!(s.name_matches("  INFOBOX"));
        assert!(s.name_matches("infoboxes"));
        assert!(!s.name_matches("Info"));
        assert!(!s.name_matches("Template:Infobox company"));
        assert!(!s.name_matches("Company infobox"));
    }

    #[test]
    fn yields_target_parameters_only() {
        let body = "{{Infobox company\n| name = Acme\n| Logo = Acme.svg\n| image = Office.jpg\n}}";
        let matches = scanner().scan(body).unwrap();
        assert_eq!(matches.templates_matched(), 1);
        let found: Vec<_> = matches.collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].template_name, "Infobox company");
        assert_eq!(found[0].parameter_name, "logo");
        assert_eq!(found[0].raw_value, " Acme.svg\n");
    }

    #[test]
    fn non_matching_templates_are_ignored() {
        let body = "{{Short description|x}} {{Cite web | logo = Nope.svg }}";
        let matches = scanner().scan(body).unwrap();
        assert_eq!(matches.templates_matched(), 0);
        assert_eq!(matches.count(), 0);
    }

    #[test]
    fn every_occurrence_is_reported() {
        let body = "{{Infobox company | logo = A.svg }}\n{{Infobox brand | logo = B.svg | logo = C.svg }}";
        let values: Vec<&str> = scanner().scan(body).unwrap().map(|m| m.raw_value.trim()).collect();
        assert_eq!(values, vec!["A.svg", "B.svg", "C.svg"]);
    }

    #[test]
    fn nested_infobox_is_found() {
        let body = "{{Infobox company | embed = {{Infobox brand | logo = Nested.svg }} }}";
        let matches = scanner().scan(body).unwrap();
        assert_eq!(matches.templates_matched(), 2);
        let values: Vec<&str> = matches.map(|m| m.raw_value.trim()).collect();
        assert_eq!(values, vec!["Nested.svg"]);
    }

    #[test]
    fn several_target_names() {
        let s = TemplateScanner::new("Infobox", &["logo", " Image_Logo "]);
        let body = "{{Infobox | image_logo = X.svg | logo = Y.svg }}";
        assert_eq!(s.scan(body).unwrap().count(), 2);
    }

    #[test]
    fn infobox_survives_deep_stray_link_openers() {
        let body = format!("{{{{Infobox company | logo = Foo.svg }}}}\n{}", "x[[y ".repeat(70));
        let matches = scanner().scan(&body).unwrap();
        assert_eq!(matches.templates_matched(), 1);
        assert_eq!(matches.map(|m| m.raw_value.trim()).collect::<Vec<_>>(), vec!["Foo.svg"]);

        let body = format!("{}\n{{{{Infobox company | logo = Foo.svg }}}}", "x[[y ".repeat(70));
        let matches = scanner().scan(&body).unwrap();
        assert_eq!(matches.templates_matched(), 1);
        assert_eq!(matches.count(), 1);
    }

    #[test]
    fn deep_nesting_keeps_the_outer_templates() {
        let depth = wikitext::MAX_DEPTH + 1;
        let body = format!("{}{}", "{{Infobox|".repeat(depth), "}}".repeat(depth));
        assert_eq!(scanner().scan(&body).unwrap().templates_matched(), wikitext::MAX_DEPTH);
    }
}
