#![forbid(unsafe_code)]

//! A small CSS selector subset: parsing and right-to-left matching.
//!
//! Supported syntax:
//!
//! | Form | Example |
//! |------|---------|
//! | type / universal | `div`, `*` |
//! | id / class | `#main`, `.card` |
//! | attribute presence | `[data-js-tabs]` |
//! | attribute value | `[type=text]`, `[rel~="next"]`, `[href^=http]`, `[src$='.png']`, `[title*=x]`, `[lang\|=en]` |
//! | combinators | descendant (`a b`), child (`a > b`) |
//! | lists | `a, b` |
//!
//! Tag and attribute names compare case-insensitively; attribute values are
//! case-sensitive. Pseudo-classes and pseudo-elements are rejected with
//! [`SelectorError::Unsupported`].
//!
//! # Invariants
//!
//! 1. A parsed [`SelectorList`] is never empty.
//! 2. Matching never allocates and never consults nodes other than the
//!    candidate and its element ancestors.

use std::fmt;
use std::str::FromStr;

use crate::error::SelectorError;
use crate::node::NodeId;

/// Read access to the element data a selector needs.
pub trait MatchContext {
    /// Lowercased tag name, or `None` when the node is not an element.
    fn tag_name(&self, node: NodeId) -> Option<&str>;

    /// Attribute value by lowercased name.
    fn attribute(&self, node: NodeId, name: &str) -> Option<&str>;

    /// Parent node when it is an element.
    fn parent_element(&self, node: NodeId) -> Option<NodeId>;
}

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    source: String,
    selectors: Vec<ComplexSelector>,
}

impl SelectorList {
    /// Parse a selector list.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }
        let selectors = Parser::new(input).parse_list()?;
        Ok(Self {
            source: trimmed.to_owned(),
            selectors,
        })
    }

    /// The selector text (trimmed) this list was parsed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of comma-separated selectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Whether `node` matches any selector in the list.
    pub fn matches<C: MatchContext + ?Sized>(&self, cx: &C, node: NodeId) -> bool {
        self.selectors.iter().any(|s| s.matches(cx, node))
    }
}

impl FromStr for SelectorList {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SelectorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// Compounds left to right; `combinators[i]` sits between `compounds[i]` and
/// `compounds[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
    compounds: Vec<Compound>,
    combinators: Vec<Combinator>,
}

impl ComplexSelector {
    fn matches<C: MatchContext + ?Sized>(&self, cx: &C, node: NodeId) -> bool {
        self.match_at(cx, self.compounds.len() - 1, node)
    }

    fn match_at<C: MatchContext + ?Sized>(&self, cx: &C, idx: usize, node: NodeId) -> bool {
        if !self.compounds[idx].matches(cx, node) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match self.combinators[idx - 1] {
            Combinator::Child => cx
                .parent_element(node)
                .is_some_and(|parent| self.match_at(cx, idx - 1, parent)),
            Combinator::Descendant => {
                let mut cursor = cx.parent_element(node);
                while let Some(ancestor) = cursor {
                    if self.match_at(cx, idx - 1, ancestor) {
                        return true;
                    }
                    cursor = cx.parent_element(ancestor);
                }
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    /// `None` for universal or omitted type selectors.
    tag: Option<String>,
    conditions: Vec<Condition>,
}

impl Compound {
    fn matches<C: MatchContext + ?Sized>(&self, cx: &C, node: NodeId) -> bool {
        let Some(tag) = cx.tag_name(node) else {
            return false;
        };
        if self.tag.as_deref().is_some_and(|want| want != tag) {
            return false;
        }
        self.conditions.iter().all(|c| c.matches(cx, node))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Id(String),
    Class(String),
    Attr {
        name: String,
        test: Option<(AttrOp, String)>,
    },
}

impl Condition {
    fn matches<C: MatchContext + ?Sized>(&self, cx: &C, node: NodeId) -> bool {
        match self {
            Self::Id(id) => cx.attribute(node, "id") == Some(id.as_str()),
            Self::Class(class) => cx
                .attribute(node, "class")
                .is_some_and(|list| list.split_ascii_whitespace().any(|c| c == class)),
            Self::Attr { name, test } => match (cx.attribute(node, name), test) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(actual), Some((op, expected))) => op.test(actual, expected),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    Prefix,
    Suffix,
    Substring,
    DashMatch,
}

impl AttrOp {
    fn test(self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::Includes => {
                !expected.is_empty() && actual.split_ascii_whitespace().any(|w| w == expected)
            }
            Self::Prefix => !expected.is_empty() && actual.starts_with(expected),
            Self::Suffix => !expected.is_empty() && actual.ends_with(expected),
            Self::Substring => !expected.is_empty() && actual.contains(expected),
            Self::DashMatch => {
                actual == expected
                    || actual
                        .strip_prefix(expected)
                        .is_some_and(|rest| rest.starts_with('-'))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.input.len(), |&(offset, _)| offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos != start
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(found) => SelectorError::UnexpectedChar {
                found,
                offset: self.offset(),
            },
            None => SelectorError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, want: char) -> Result<(), SelectorError> {
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_list(&mut self) -> Result<Vec<ComplexSelector>, SelectorError> {
        let mut selectors = Vec::new();
        loop {
            self.skip_ws();
            selectors.push(self.parse_complex()?);
            self.skip_ws();
            match self.peek() {
                None => return Ok(selectors),
                Some(',') => {
                    self.pos += 1;
                }
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, SelectorError> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_ws = self.skip_ws();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_ws => combinators.push(Combinator::Descendant),
                Some(_) => return Err(self.unexpected()),
            }
            compounds.push(self.parse_compound()?);
        }
        Ok(ComplexSelector {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let mut any = false;

        match self.peek() {
            Some('*') => {
                self.pos += 1;
                any = true;
            }
            Some(c) if is_ident_start(c) => {
                compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
                any = true;
            }
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.conditions.push(Condition::Id(self.parse_ident()?));
                }
                Some('.') => {
                    self.pos += 1;
                    compound
                        .conditions
                        .push(Condition::Class(self.parse_ident()?));
                }
                Some('[') => {
                    self.pos += 1;
                    compound.conditions.push(self.parse_attr()?);
                }
                Some(':') => {
                    let offset = self.offset();
                    self.pos += 1;
                    while self.peek() == Some(':') {
                        self.pos += 1;
                    }
                    let mut what = String::from(":");
                    while let Some(c) = self.peek().filter(|&c| is_ident_char(c)) {
                        what.push(c);
                        self.pos += 1;
                    }
                    return Err(SelectorError::Unsupported { what, offset });
                }
                _ => break,
            }
            any = true;
        }

        if any {
            Ok(compound)
        } else {
            match self.peek() {
                None | Some(',') | Some('>') => Err(SelectorError::MissingCompound {
                    offset: self.offset(),
                }),
                Some(_) => Err(self.unexpected()),
            }
        }
    }

    fn parse_ident(&mut self) -> Result<String, SelectorError> {
        let mut ident = String::new();
        while let Some(c) = self.peek().filter(|&c| is_ident_char(c)) {
            ident.push(c);
            self.pos += 1;
        }
        if ident.is_empty() {
            Err(self.unexpected())
        } else {
            Ok(ident)
        }
    }

    fn parse_attr(&mut self) -> Result<Condition, SelectorError> {
        self.skip_ws();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_ws();

        let op = match self.peek() {
            Some(']') => {
                self.pos += 1;
                return Ok(Condition::Attr { name, test: None });
            }
            Some('=') => {
                self.pos += 1;
                AttrOp::Equals
            }
            Some(c @ ('~' | '^' | '$' | '*' | '|')) => {
                self.pos += 1;
                self.expect('=')?;
                match c {
                    '~' => AttrOp::Includes,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    '*' => AttrOp::Substring,
                    _ => AttrOp::DashMatch,
                }
            }
            _ => return Err(self.unexpected()),
        };

        self.skip_ws();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                self.parse_quoted(quote)?
            }
            _ => self.parse_ident()?,
        };
        self.skip_ws();
        self.expect(']')?;

        Ok(Condition::Attr {
            name,
            test: Some((op, value)),
        })
    }

    fn parse_quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(SelectorError::UnexpectedEnd),
                Some('\\') => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => return Err(SelectorError::UnexpectedEnd),
                },
                Some(c) if c == quote => return Ok(value),
                Some(c) => value.push(c),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;

    /// Flat fixture: node -> (tag, attrs, parent).
    #[derive(Default)]
    struct Fixture {
        nodes: Vec<(String, AHashMap<String, String>, Option<NodeId>)>,
    }

    impl Fixture {
        fn add(&mut self, tag: &str, attrs: &[(&str, &str)], parent: Option<NodeId>) -> NodeId {
            let attrs = attrs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            self.nodes.push((tag.to_owned(), attrs, parent));
            NodeId::from_index(self.nodes.len() - 1)
        }
    }

    impl MatchContext for Fixture {
        fn tag_name(&self, node: NodeId) -> Option<&str> {
            self.nodes.get(node.index()).map(|(t, _, _)| t.as_str())
        }

        fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
            self.nodes
                .get(node.index())
                .and_then(|(_, a, _)| a.get(name).map(String::as_str))
        }

        fn parent_element(&self, node: NodeId) -> Option<NodeId> {
            self.nodes.get(node.index()).and_then(|(_, _, p)| *p)
        }
    }

    fn sel(s: &str) -> SelectorList {
        SelectorList::parse(s).expect("selector should parse")
    }

    #[test]
    fn parses_data_attribute_selector() {
        let list = sel("[data-js-accordion]");
        assert_eq!(list.len(), 1);
        assert_eq!(list.source(), "[data-js-accordion]");
    }

    #[test]
    fn empty_selector_is_rejected() {
        assert_eq!(SelectorList::parse("   "), Err(SelectorError::Empty));
    }

    #[test]
    fn pseudo_classes_are_unsupported() {
        let err = SelectorList::parse("a:hover").unwrap_err();
        assert_eq!(
            err,
            SelectorError::Unsupported {
                what: ":hover".into(),
                offset: 1
            }
        );
    }

    #[test]
    fn dangling_combinator_is_rejected() {
        assert!(matches!(
            SelectorList::parse("div >"),
            Err(SelectorError::MissingCompound { .. })
        ));
        assert!(matches!(
            SelectorList::parse("div,,p"),
            Err(SelectorError::MissingCompound { .. })
        ));
    }

    #[test]
    fn unterminated_attribute_is_rejected() {
        assert_eq!(
            SelectorList::parse("[data-x"),
            Err(SelectorError::UnexpectedEnd)
        );
        assert_eq!(
            SelectorList::parse("[title=\"abc"),
            Err(SelectorError::UnexpectedEnd)
        );
    }

    #[test]
    fn matches_type_class_and_id() {
        let mut fx = Fixture::default();
        let div = fx.add("div", &[("class", "card  wide"), ("id", "main")], None);
        assert!(sel("div").matches(&fx, div));
        assert!(sel("DIV").matches(&fx, div));
        assert!(sel("*").matches(&fx, div));
        assert!(sel(".card").matches(&fx, div));
        assert!(sel("div.wide#main").matches(&fx, div));
        assert!(!sel("span").matches(&fx, div));
        assert!(!sel(".car").matches(&fx, div));
        assert!(!sel("#other").matches(&fx, div));
    }

    #[test]
    fn attribute_operators() {
        let mut fx = Fixture::default();
        let a = fx.add(
            "a",
            &[
                ("rel", "next nofollow"),
                ("href", "https://example.com/x.png"),
                ("lang", "en-US"),
                ("data-js-tabs", ""),
            ],
            None,
        );
        assert!(sel("[data-js-tabs]").matches(&fx, a));
        assert!(sel("[rel~=next]").matches(&fx, a));
        assert!(!sel("[rel~=nex]").matches(&fx, a));
        assert!(sel("[href^='https']").matches(&fx, a));
        assert!(sel("[href$=\".png\"]").matches(&fx, a));
        assert!(sel("[href*=example]").matches(&fx, a));
        assert!(sel("[lang|=en]").matches(&fx, a));
        assert!(!sel("[lang|=e]").matches(&fx, a));
        assert!(sel("[data-js-tabs='']").matches(&fx, a));
        assert!(!sel("[href^='']").matches(&fx, a));
        assert!(sel("[ DATA-JS-TABS ]").matches(&fx, a));
    }

    #[test]
    fn descendant_and_child_combinators() {
        let mut fx = Fixture::default();
        let section = fx.add("section", &[("class", "outer")], None);
        let div = fx.add("div", &[], Some(section));
        let span = fx.add("span", &[], Some(div));

        assert!(sel(".outer span").matches(&fx, span));
        assert!(sel("section div > span").matches(&fx, span));
        assert!(!sel(".outer > span").matches(&fx, span));
        assert!(sel("section > div").matches(&fx, div));
        assert!(!sel("div section").matches(&fx, section));
    }

    #[test]
    fn descendant_backtracks_past_first_candidate() {
        let mut fx = Fixture::default();
        let outer = fx.add("div", &[("class", "a")], None);
        let mid = fx.add("div", &[], Some(outer));
        let leaf = fx.add("p", &[], Some(mid));
        // `.a > div p` must try `mid` as the div, not only the nearest div.
        assert!(sel(".a > div p").matches(&fx, leaf));
    }

    #[test]
    fn selector_list_matches_any() {
        let mut fx = Fixture::default();
        let img = fx.add("img", &[], None);
        let list = sel("iframe, script ,img");
        assert_eq!(list.len(), 3);
        assert!(list.matches(&fx, img));
    }
}
