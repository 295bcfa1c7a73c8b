//! Typed value tree for template property data.
//!
//! Intrinsic functions are preserved as structured nodes rather than resolved
//! or flattened to strings. Both the YAML short form (`!Ref X`) and the long
//! form (`{"Ref": "X"}`) parse to the same node; serialization always emits
//! the long form, which is one of the document's deliberate normalizations.

use indexmap::IndexMap;

use crate::error::ParseError;
use crate::sub::SubString;

/// Ordered string-keyed mapping used throughout the document model.
pub type ValueMap = IndexMap<String, TemplateValue>;

/// Scalar numbers as they appear in templates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

/// A property value: plain data or a typed intrinsic node.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<TemplateValue>),
    Mapping(ValueMap),
    Intrinsic(Box<Intrinsic>),
}

/// Reference constructs kept structural instead of being resolved.
///
/// Anything outside the handled set is carried losslessly through
/// [`Intrinsic::Other`] so serialization never drops a construct it did not
/// understand.
#[derive(Debug, Clone, PartialEq)]
pub enum Intrinsic {
    /// `!Ref Name`
    Ref(String),

    /// `!GetAtt Name.Attr`: the attribute keeps any further dotted segments
    GetAtt { logical_id: String, attribute: String },

    /// `!Sub` with a structurally parsed template and optional variable map
    Sub {
        template: SubString,
        variables: Option<ValueMap>,
    },

    /// `!Join [delimiter, [parts...]]`
    Join {
        delimiter: String,
        parts: Vec<TemplateValue>,
    },

    /// `!If [condition, then, else]`
    If {
        condition: String,
        when_true: TemplateValue,
        when_false: TemplateValue,
    },

    /// `!Condition Name`: a condition test reference
    Condition(String),

    /// `!ImportValue payload`
    ImportValue(TemplateValue),

    /// Any other `Fn::*` form, carried verbatim
    Other { name: String, payload: TemplateValue },
}

impl Intrinsic {
    /// The long-form key this intrinsic serializes under.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Ref(_) => "Ref",
            Self::GetAtt { .. } => "Fn::GetAtt",
            Self::Sub { .. } => "Fn::Sub",
            Self::Join { .. } => "Fn::Join",
            Self::If { .. } => "Fn::If",
            Self::Condition(_) => "Condition",
            Self::ImportValue(_) => "Fn::ImportValue",
            Self::Other { name, .. } => name,
        }
    }
}

impl TemplateValue {
    /// Empty mapping value.
    #[inline]
    #[must_use]
    pub fn mapping() -> Self {
        Self::Mapping(ValueMap::new())
    }

    /// String value from anything string-like.
    #[inline]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Shorthand for a boxed intrinsic node.
    #[inline]
    #[must_use]
    pub fn intrinsic(intrinsic: Intrinsic) -> Self {
        Self::Intrinsic(Box::new(intrinsic))
    }

    /// `!Ref name` node.
    #[inline]
    pub fn reference(name: impl Into<String>) -> Self {
        Self::intrinsic(Intrinsic::Ref(name.into()))
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_mapping(&self) -> Option<&ValueMap> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_mapping_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[TemplateValue]> {
        match self {
            Self::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_intrinsic(&self) -> Option<&Intrinsic> {
        match self {
            Self::Intrinsic(node) => Some(node),
            _ => None,
        }
    }

    /// The logical ID this value points at, for the common reference shapes.
    ///
    /// Handles `Ref`, `GetAtt` (first segment), a `Sub` consisting of a single
    /// `${Name}`/`${Name.Attr}` token, and plain strings (dotted strings yield
    /// the segment before the first dot, matching how `DependsOn` and
    /// `FunctionName` values name resources).
    #[must_use]
    pub fn referenced_id(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.split('.').next().unwrap_or(s)),
            Self::Intrinsic(node) => match node.as_ref() {
                Intrinsic::Ref(name) => Some(name),
                Intrinsic::GetAtt { logical_id, .. } => Some(logical_id),
                Intrinsic::Sub {
                    template,
                    variables: None,
                } => template.sole_reference().map(|(name, _)| name),
                _ => None,
            },
            _ => None,
        }
    }

    /// True when any reference form inside this value names `logical_id`.
    #[must_use]
    pub fn mentions(&self, logical_id: &str) -> bool {
        match self {
            Self::String(s) => {
                s == logical_id || s.strip_prefix(logical_id).is_some_and(|r| r.starts_with('.'))
            }
            Self::Sequence(seq) => seq.iter().any(|item| item.mentions(logical_id)),
            Self::Mapping(map) => map.values().any(|item| item.mentions(logical_id)),
            Self::Intrinsic(node) => match node.as_ref() {
                Intrinsic::Ref(name) | Intrinsic::Condition(name) => name == logical_id,
                Intrinsic::GetAtt { logical_id: id, .. } => id == logical_id,
                Intrinsic::Sub {
                    template,
                    variables,
                } => {
                    template.referenced_names().contains(&logical_id)
                        || variables
                            .as_ref()
                            .is_some_and(|vars| vars.values().any(|v| v.mentions(logical_id)))
                }
                Intrinsic::Join { parts, .. } => parts.iter().any(|p| p.mentions(logical_id)),
                Intrinsic::If {
                    condition,
                    when_true,
                    when_false,
                } => {
                    condition == logical_id
                        || when_true.mentions(logical_id)
                        || when_false.mentions(logical_id)
                }
                Intrinsic::ImportValue(payload) | Intrinsic::Other { payload, .. } => {
                    payload.mentions(logical_id)
                }
            },
            _ => false,
        }
    }

    // ---- YAML conversion ----

    /// Build from a freshly loaded YAML value.
    ///
    /// # Errors
    /// Returns [`ParseError::NonStringKey`] for non-string mapping keys.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, ParseError> {
        match value {
            serde_yaml::Value::Null => Ok(Self::Null),
            serde_yaml::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_yaml::Value::Number(n) => Ok(Self::Number(yaml_number(&n))),
            serde_yaml::Value::String(s) => Ok(Self::String(s)),
            serde_yaml::Value::Sequence(seq) => Ok(Self::Sequence(
                seq.into_iter()
                    .map(Self::from_yaml)
                    .collect::<Result<_, _>>()?,
            )),
            serde_yaml::Value::Mapping(map) => {
                let mut out = ValueMap::with_capacity(map.len());
                for (key, val) in map {
                    let key = match key {
                        serde_yaml::Value::String(s) => s,
                        other => {
                            return Err(ParseError::NonStringKey(format!("{other:?}")));
                        }
                    };
                    out.insert(key, Self::from_yaml(val)?);
                }
                Ok(normalize_mapping(out))
            }
            serde_yaml::Value::Tagged(tagged) => {
                let key = long_form_key(&tagged.tag);
                let payload = Self::from_yaml(tagged.value)?;
                Ok(Self::intrinsic(parse_intrinsic(&key, payload)))
            }
        }
    }

    /// Convert to a YAML value with intrinsics in canonical long form.
    #[must_use]
    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            Self::Null => serde_yaml::Value::Null,
            Self::Bool(b) => serde_yaml::Value::Bool(*b),
            Self::Number(Number::Int(i)) => serde_yaml::Value::Number((*i).into()),
            Self::Number(Number::Float(f)) => serde_yaml::Value::Number((*f).into()),
            Self::String(s) => serde_yaml::Value::String(s.clone()),
            Self::Sequence(seq) => {
                serde_yaml::Value::Sequence(seq.iter().map(Self::to_yaml).collect())
            }
            Self::Mapping(map) => {
                let mut out = serde_yaml::Mapping::with_capacity(map.len());
                for (key, val) in map {
                    out.insert(serde_yaml::Value::String(key.clone()), val.to_yaml());
                }
                serde_yaml::Value::Mapping(out)
            }
            Self::Intrinsic(node) => {
                let (key, payload) = intrinsic_long_form(node);
                let mut out = serde_yaml::Mapping::with_capacity(1);
                out.insert(serde_yaml::Value::String(key), payload.to_yaml());
                serde_yaml::Value::Mapping(out)
            }
        }
    }

    // ---- JSON conversion ----

    /// Build from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ParseError> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::Number(n) => Ok(Self::Number(json_number(&n))),
            serde_json::Value::String(s) => Ok(Self::String(s)),
            serde_json::Value::Array(seq) => Ok(Self::Sequence(
                seq.into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(map) => {
                let mut out = ValueMap::with_capacity(map.len());
                for (key, val) in map {
                    out.insert(key, Self::from_json(val)?);
                }
                Ok(normalize_mapping(out))
            }
        }
    }

    /// Convert to a JSON value with intrinsics in canonical long form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(Number::Int(i)) => serde_json::Value::Number((*i).into()),
            Self::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Sequence(seq) => {
                serde_json::Value::Array(seq.iter().map(Self::to_json).collect())
            }
            Self::Mapping(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, val) in map {
                    out.insert(key.clone(), val.to_json());
                }
                serde_json::Value::Object(out)
            }
            Self::Intrinsic(node) => {
                let (key, payload) = intrinsic_long_form(node);
                let mut out = serde_json::Map::with_capacity(1);
                out.insert(key, payload.to_json());
                serde_json::Value::Object(out)
            }
        }
    }
}

/// Collapse a single-key mapping into an intrinsic node when the key is a
/// reference-construct key.
fn normalize_mapping(map: ValueMap) -> TemplateValue {
    let single_intrinsic =
        map.len() == 1 && map.keys().next().is_some_and(|key| is_intrinsic_key(key));
    if single_intrinsic {
        if let Some((key, payload)) = map.into_iter().next() {
            return TemplateValue::intrinsic(parse_intrinsic(&key, payload));
        }
        return TemplateValue::Mapping(ValueMap::new());
    }
    TemplateValue::Mapping(map)
}

fn is_intrinsic_key(key: &str) -> bool {
    key == "Ref" || key == "Condition" || key.starts_with("Fn::")
}

/// Map a YAML short-form tag to its long-form key.
fn long_form_key(tag: &serde_yaml::value::Tag) -> String {
    let name = tag.to_string();
    let name = name.trim_start_matches('!');
    match name {
        "Ref" => "Ref".to_string(),
        "Condition" => "Condition".to_string(),
        other => format!("Fn::{other}"),
    }
}

/// Interpret a long-form intrinsic entry. Shapes outside the recognized set
/// fall back to [`Intrinsic::Other`] and round-trip untouched.
fn parse_intrinsic(key: &str, payload: TemplateValue) -> Intrinsic {
    match key {
        "Ref" => match payload {
            TemplateValue::String(name) => Intrinsic::Ref(name),
            other => Intrinsic::Other {
                name: key.to_string(),
                payload: other,
            },
        },
        "Condition" => match payload {
            TemplateValue::String(name) => Intrinsic::Condition(name),
            other => Intrinsic::Other {
                name: key.to_string(),
                payload: other,
            },
        },
        "Fn::GetAtt" => parse_getatt(payload),
        "Fn::Sub" => parse_sub(payload),
        "Fn::Join" => parse_join(payload),
        "Fn::If" => parse_if(payload),
        "Fn::ImportValue" => Intrinsic::ImportValue(payload),
        other => Intrinsic::Other {
            name: other.to_string(),
            payload,
        },
    }
}

fn parse_getatt(payload: TemplateValue) -> Intrinsic {
    match payload {
        TemplateValue::String(joined) => match joined.split_once('.') {
            Some((id, attr)) => Intrinsic::GetAtt {
                logical_id: id.to_string(),
                attribute: attr.to_string(),
            },
            None => Intrinsic::Other {
                name: "Fn::GetAtt".to_string(),
                payload: TemplateValue::String(joined),
            },
        },
        TemplateValue::Sequence(items) => {
            let strings: Option<Vec<&str>> = items.iter().map(TemplateValue::as_str).collect();
            match strings {
                Some(parts) if parts.len() >= 2 => Intrinsic::GetAtt {
                    logical_id: parts[0].to_string(),
                    attribute: parts[1..].join("."),
                },
                _ => Intrinsic::Other {
                    name: "Fn::GetAtt".to_string(),
                    payload: TemplateValue::Sequence(items),
                },
            }
        }
        other => Intrinsic::Other {
            name: "Fn::GetAtt".to_string(),
            payload: other,
        },
    }
}

fn parse_sub(payload: TemplateValue) -> Intrinsic {
    match payload {
        TemplateValue::String(text) => Intrinsic::Sub {
            template: SubString::parse(&text),
            variables: None,
        },
        TemplateValue::Sequence(items) => match <[TemplateValue; 2]>::try_from(items) {
            Ok([TemplateValue::String(text), TemplateValue::Mapping(vars)]) => Intrinsic::Sub {
                template: SubString::parse(&text),
                variables: Some(vars),
            },
            Ok(pair) => Intrinsic::Other {
                name: "Fn::Sub".to_string(),
                payload: TemplateValue::Sequence(pair.into()),
            },
            Err(items) => Intrinsic::Other {
                name: "Fn::Sub".to_string(),
                payload: TemplateValue::Sequence(items),
            },
        },
        other => Intrinsic::Other {
            name: "Fn::Sub".to_string(),
            payload: other,
        },
    }
}

fn parse_join(payload: TemplateValue) -> Intrinsic {
    match payload {
        TemplateValue::Sequence(items) => match <[TemplateValue; 2]>::try_from(items) {
            Ok([TemplateValue::String(delimiter), TemplateValue::Sequence(parts)]) => {
                Intrinsic::Join { delimiter, parts }
            }
            Ok(pair) => Intrinsic::Other {
                name: "Fn::Join".to_string(),
                payload: TemplateValue::Sequence(pair.into()),
            },
            Err(items) => Intrinsic::Other {
                name: "Fn::Join".to_string(),
                payload: TemplateValue::Sequence(items),
            },
        },
        other => Intrinsic::Other {
            name: "Fn::Join".to_string(),
            payload: other,
        },
    }
}

fn parse_if(payload: TemplateValue) -> Intrinsic {
    match payload {
        TemplateValue::Sequence(items) => match <[TemplateValue; 3]>::try_from(items) {
            Ok([TemplateValue::String(condition), when_true, when_false]) => Intrinsic::If {
                condition,
                when_true,
                when_false,
            },
            Ok(triple) => Intrinsic::Other {
                name: "Fn::If".to_string(),
                payload: TemplateValue::Sequence(triple.into()),
            },
            Err(items) => Intrinsic::Other {
                name: "Fn::If".to_string(),
                payload: TemplateValue::Sequence(items),
            },
        },
        other => Intrinsic::Other {
            name: "Fn::If".to_string(),
            payload: other,
        },
    }
}

/// Long-form representation of an intrinsic: its key plus the payload value.
fn intrinsic_long_form(node: &Intrinsic) -> (String, TemplateValue) {
    match node {
        Intrinsic::Ref(name) => ("Ref".to_string(), TemplateValue::string(name.clone())),
        Intrinsic::Condition(name) => {
            ("Condition".to_string(), TemplateValue::string(name.clone()))
        }
        Intrinsic::GetAtt {
            logical_id,
            attribute,
        } => {
            let mut parts = vec![TemplateValue::string(logical_id.clone())];
            parts.extend(attribute.split('.').map(TemplateValue::string));
            ("Fn::GetAtt".to_string(), TemplateValue::Sequence(parts))
        }
        Intrinsic::Sub {
            template,
            variables,
        } => {
            let rendered = TemplateValue::String(template.render());
            let payload = match variables {
                Some(vars) => TemplateValue::Sequence(vec![
                    rendered,
                    TemplateValue::Mapping(vars.clone()),
                ]),
                None => rendered,
            };
            ("Fn::Sub".to_string(), payload)
        }
        Intrinsic::Join { delimiter, parts } => (
            "Fn::Join".to_string(),
            TemplateValue::Sequence(vec![
                TemplateValue::string(delimiter.clone()),
                TemplateValue::Sequence(parts.clone()),
            ]),
        ),
        Intrinsic::If {
            condition,
            when_true,
            when_false,
        } => (
            "Fn::If".to_string(),
            TemplateValue::Sequence(vec![
                TemplateValue::string(condition.clone()),
                when_true.clone(),
                when_false.clone(),
            ]),
        ),
        Intrinsic::ImportValue(payload) => ("Fn::ImportValue".to_string(), payload.clone()),
        Intrinsic::Other { name, payload } => (name.clone(), payload.clone()),
    }
}

fn yaml_number(n: &serde_yaml::Number) -> Number {
    match n.as_i64() {
        Some(i) => Number::Int(i),
        None => Number::Float(n.as_f64().unwrap_or_default()),
    }
}

fn json_number(n: &serde_json::Number) -> Number {
    match n.as_i64() {
        Some(i) => Number::Int(i),
        None => Number::Float(n.as_f64().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(text: &str) -> TemplateValue {
        let value: serde_yaml::Value = serde_yaml::from_str(text).unwrap();
        TemplateValue::from_yaml(value).unwrap()
    }

    #[test]
    fn short_and_long_ref_forms_agree() {
        assert_eq!(yaml("!Ref Bucket"), yaml("Ref: Bucket"));
        assert_eq!(yaml("!Ref Bucket"), TemplateValue::reference("Bucket"));
    }

    #[test]
    fn getatt_string_and_list_forms_agree() {
        let expected = TemplateValue::intrinsic(Intrinsic::GetAtt {
            logical_id: "Fn".to_string(),
            attribute: "Arn".to_string(),
        });
        assert_eq!(yaml("!GetAtt Fn.Arn"), expected);
        assert_eq!(yaml("Fn::GetAtt: [Fn, Arn]"), expected);
    }

    #[test]
    fn getatt_nested_attribute_round_trips() {
        let value = yaml("!GetAtt Stack.Outputs.Name");
        match value.as_intrinsic() {
            Some(Intrinsic::GetAtt {
                logical_id,
                attribute,
            }) => {
                assert_eq!(logical_id, "Stack");
                assert_eq!(attribute, "Outputs.Name");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
        let round = serde_yaml::to_string(&value.to_yaml()).unwrap();
        assert!(round.contains("Fn::GetAtt"));
    }

    #[test]
    fn sub_with_variables_parses_structurally() {
        let value = yaml("!Sub [\"${Name}-suffix\", {Name: !Ref Other}]");
        match value.as_intrinsic() {
            Some(Intrinsic::Sub {
                template,
                variables: Some(vars),
            }) => {
                assert_eq!(template.referenced_names(), vec!["Name"]);
                assert!(vars.contains_key("Name"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn unknown_fn_is_preserved() {
        let value = yaml("Fn::Select: [0, [a, b]]");
        match value.as_intrinsic() {
            Some(Intrinsic::Other { name, .. }) => assert_eq!(name, "Fn::Select"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn multi_key_mapping_is_not_an_intrinsic() {
        let value = yaml("Ref: A\nOther: B");
        assert!(value.as_mapping().is_some());
    }

    #[test]
    fn referenced_id_covers_common_shapes() {
        assert_eq!(yaml("!Ref Fn").referenced_id(), Some("Fn"));
        assert_eq!(yaml("!GetAtt Fn.Arn").referenced_id(), Some("Fn"));
        assert_eq!(yaml("!Sub '${Fn.Arn}'").referenced_id(), Some("Fn"));
        assert_eq!(TemplateValue::string("Fn.Arn").referenced_id(), Some("Fn"));
        assert_eq!(yaml("!Sub 'arn:${Fn}'").referenced_id(), None);
    }

    #[test]
    fn mentions_sees_through_nesting() {
        let value = yaml("Key: [!Ref A, {Deep: !GetAtt B.Arn}]");
        assert!(value.mentions("A"));
        assert!(value.mentions("B"));
        assert!(!value.mentions("C"));
    }

    #[test]
    fn json_round_trip_matches_yaml_parse() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"Fn::GetAtt": ["Fn", "Arn"]}"#).unwrap();
        let from_json = TemplateValue::from_json(json).unwrap();
        assert_eq!(from_json, yaml("!GetAtt Fn.Arn"));
    }
}
