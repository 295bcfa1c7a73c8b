//! Structural model of the `Fn::Sub` interpolation mini-language.
//!
//! `${Name}`, `${Name.Attr}`, `${AWS::Pseudo}` and the `${!Escaped}` form are
//! parsed into typed segments so the renamer can rewrite reference segments
//! without regex passes over opaque strings. Rendering a parsed string
//! reproduces the input byte-for-byte.

use std::fmt;

/// One segment of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubSegment {
    /// Plain text between interpolations
    Literal(String),

    /// `${Name}` or `${Name.Attr}`: a logical-ID reference, optionally with
    /// an attribute suffix
    Reference {
        name: String,
        attribute: Option<String>,
    },

    /// `${AWS::Region}` and friends, never a rename target
    Pseudo(String),

    /// `${!Token}`, emitted verbatim as `${Token}` at deploy time
    Escaped(String),
}

/// A parsed `Fn::Sub` template string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubString {
    segments: Vec<SubSegment>,
}

impl SubString {
    /// Parse raw interpolation text into segments.
    ///
    /// Parsing never fails: an unterminated `${` is kept as literal text, so
    /// `render` always reproduces the original input.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            let (head, tail) = rest.split_at(start);
            literal.push_str(head);
            match tail[2..].find('}') {
                Some(end) => {
                    let token = &tail[2..2 + end];
                    if !literal.is_empty() {
                        segments.push(SubSegment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Self::classify(token));
                    rest = &tail[2 + end + 1..];
                }
                None => {
                    // Unterminated interpolation: treat the remainder as text.
                    literal.push_str(tail);
                    rest = "";
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(SubSegment::Literal(literal));
        }

        Self { segments }
    }

    fn classify(token: &str) -> SubSegment {
        if let Some(stripped) = token.strip_prefix('!') {
            return SubSegment::Escaped(stripped.to_string());
        }
        if token.contains("::") {
            return SubSegment::Pseudo(token.to_string());
        }
        match token.split_once('.') {
            Some((name, attr)) => SubSegment::Reference {
                name: name.to_string(),
                attribute: Some(attr.to_string()),
            },
            None => SubSegment::Reference {
                name: token.to_string(),
                attribute: None,
            },
        }
    }

    /// Render back to interpolation text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                SubSegment::Literal(text) => out.push_str(text),
                SubSegment::Reference { name, attribute } => {
                    out.push_str("${");
                    out.push_str(name);
                    if let Some(attr) = attribute {
                        out.push('.');
                        out.push_str(attr);
                    }
                    out.push('}');
                }
                SubSegment::Pseudo(token) => {
                    out.push_str("${");
                    out.push_str(token);
                    out.push('}');
                }
                SubSegment::Escaped(token) => {
                    out.push_str("${!");
                    out.push_str(token);
                    out.push('}');
                }
            }
        }
        out
    }

    /// Iterate over segments.
    pub fn segments(&self) -> impl Iterator<Item = &SubSegment> {
        self.segments.iter()
    }

    /// Mutable access for in-place reference rewriting.
    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut SubSegment> {
        self.segments.iter_mut()
    }

    /// Names of all logical-ID references in order of appearance.
    #[must_use]
    pub fn referenced_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                SubSegment::Reference { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The single reference this string consists of, if it is nothing else.
    ///
    /// `"${Fn.Arn}"` yields `("Fn", Some("Arn"))`; any surrounding literal
    /// text yields `None`.
    #[must_use]
    pub fn sole_reference(&self) -> Option<(&str, Option<&str>)> {
        match self.segments.as_slice() {
            [SubSegment::Reference { name, attribute }] => {
                Some((name.as_str(), attribute.as_deref()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for SubString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_reference() {
        let sub = SubString::parse("${Bucket}");
        assert_eq!(
            sub.segments().collect::<Vec<_>>(),
            vec![&SubSegment::Reference {
                name: "Bucket".to_string(),
                attribute: None
            }]
        );
    }

    #[test]
    fn parses_attribute_reference() {
        let sub = SubString::parse("arn is ${Fn.Arn}");
        assert_eq!(sub.referenced_names(), vec!["Fn"]);
        assert_eq!(sub.sole_reference(), None);
    }

    #[test]
    fn pseudo_parameters_are_not_references() {
        let sub = SubString::parse("${AWS::Region}-${Queue}");
        assert_eq!(sub.referenced_names(), vec!["Queue"]);
    }

    #[test]
    fn escaped_tokens_round_trip() {
        let input = "literal ${!NotARef} and ${Real}";
        assert_eq!(SubString::parse(input).render(), input);
    }

    #[test]
    fn unterminated_interpolation_is_literal() {
        let input = "broken ${oops";
        let sub = SubString::parse(input);
        assert_eq!(sub.render(), input);
        assert!(sub.referenced_names().is_empty());
    }

    #[test]
    fn render_is_inverse_of_parse() {
        for input in [
            "",
            "no refs at all",
            "${A}${B.Arn}${AWS::AccountId}",
            "https://${Api}.execute-api.${AWS::Region}.amazonaws.com/${Stage}",
        ] {
            assert_eq!(SubString::parse(input).render(), input);
        }
    }
}
