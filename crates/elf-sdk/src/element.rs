//! Elements and the selectors that address them.
//!
//! An [`Element`] is the mount point a table draws into: a tag, an id, a
//! class list and attributes, plus an optional parent so that descendant
//! selectors like `todo-list .item` can be resolved.

use crate::error::{Result, SdkError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Attribute that opts an element out of peer sync when set to `"true"`.
pub const OFFLINE_ATTRIBUTE: &str = "offline";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    id: String,
    tag: String,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    parent: Option<Arc<Element>>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        let class = class.into();
        if !self.classes.contains(&class) {
            self.classes.push(class);
        }
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Place this element inside `parent`.
    pub fn within(mut self, parent: Arc<Element>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Mark the element `offline="true"`.
    pub fn offline(self) -> Self {
        self.with_attribute(OFFLINE_ATTRIBUTE, "true")
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn parent(&self) -> Option<&Arc<Element>> {
        self.parent.as_ref()
    }

    pub fn is_offline(&self) -> bool {
        self.attribute(OFFLINE_ATTRIBUTE) == Some("true")
    }

    /// Parent, grandparent, and so on up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Element> {
        std::iter::successors(self.parent.as_deref(), |e| e.parent.as_deref())
    }

    /// Whether this element matches a selector string.
    pub fn matches(&self, selector: &str) -> Result<bool> {
        Ok(Selector::parse(selector)?.matches(self))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        if self.has_id() {
            write!(f, " id=\"{}\"", self.id)?;
        }
        if !self.classes.is_empty() {
            write!(f, " class=\"{}\"", self.classes.join(" "))?;
        }
        for (name, value) in &self.attributes {
            write!(f, " {}=\"{}\"", name, value)?;
        }
        write!(f, ">")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Compound {
    fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if tag != element.tag() {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if id != element.id() {
                return false;
            }
        }
        if !self.classes.iter().all(|c| element.has_class(c)) {
            return false;
        }
        self.attributes
            .iter()
            .all(|(name, expected)| match (element.attribute(name), expected) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            })
    }
}

/// A parsed selector list.
///
/// Supports type selectors and `*`, `.class`, `#id`, `[attr]` and
/// `[attr=value]` compounds, the descendant combinator (whitespace), and
/// comma-separated alternatives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Vec<Compound>>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let mut alternatives = Vec::new();
        for group in source.split(',') {
            let compounds = group
                .split_whitespace()
                .map(|part| parse_compound(part).map_err(|e| invalid(source, &e)))
                .collect::<Result<Vec<_>>>()?;
            if compounds.is_empty() {
                return Err(invalid(source, "empty selector"));
            }
            alternatives.push(compounds);
        }
        Ok(Self {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, element: &Element) -> bool {
        self.alternatives
            .iter()
            .any(|compounds| matches_chain(compounds, element))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid(source: &str, reason: &str) -> SdkError {
    SdkError::InvalidSelector(format!("{:?}: {}", source, reason))
}

/// The last compound must match `element`; each earlier one must match some
/// ancestor above the previous match.
fn matches_chain(compounds: &[Compound], element: &Element) -> bool {
    let (last, rest) = match compounds.split_last() {
        Some(split) => split,
        None => return false,
    };
    if !last.matches(element) {
        return false;
    }

    let mut ancestors = element.ancestors();
    'outer: for compound in rest.iter().rev() {
        for ancestor in ancestors.by_ref() {
            if compound.matches(ancestor) {
                continue 'outer;
            }
        }
        return false;
    }
    true
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_name(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut name = String::new();
    while let Some(&c) = chars.peek() {
        if !is_name_char(c) {
            break;
        }
        name.push(c);
        chars.next();
    }
    name
}

fn parse_compound(part: &str) -> std::result::Result<Compound, String> {
    let mut compound = Compound::default();
    let mut chars = part.chars().peekable();

    match chars.peek() {
        Some('*') => {
            chars.next();
        }
        Some(&c) if is_name_char(c) => {
            compound.tag = Some(take_name(&mut chars).to_ascii_lowercase());
        }
        _ => {}
    }

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let class = take_name(&mut chars);
                if class.is_empty() {
                    return Err("expected a class name after '.'".to_string());
                }
                compound.classes.push(class);
            }
            '#' => {
                let id = take_name(&mut chars);
                if id.is_empty() {
                    return Err("expected an id after '#'".to_string());
                }
                compound.id = Some(id);
            }
            '[' => compound.attributes.push(parse_attribute(&mut chars)?),
            other => return Err(format!("unexpected character {:?}", other)),
        }
    }
    Ok(compound)
}

fn parse_attribute(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> std::result::Result<(String, Option<String>), String> {
    let name = take_name(chars);
    if name.is_empty() {
        return Err("expected an attribute name after '['".to_string());
    }
    match chars.next() {
        Some(']') => Ok((name, None)),
        Some('=') => {
            let quote = match chars.peek() {
                Some(&q) if q == '"' || q == '\'' => {
                    chars.next();
                    Some(q)
                }
                _ => None,
            };
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some(c) if Some(c) == quote => {
                        return match chars.next() {
                            Some(']') => Ok((name, Some(value))),
                            _ => Err("expected ']' after attribute value".to_string()),
                        };
                    }
                    Some(']') if quote.is_none() => return Ok((name, Some(value))),
                    Some(c) => value.push(c),
                    None => return Err("unterminated attribute selector".to_string()),
                }
            }
        }
        _ => Err("unterminated attribute selector".to_string()),
    }
}
