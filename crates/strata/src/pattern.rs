//! Path patterns, pattern expressions, and their compiled evaluators.
//!
//! A [`PathPattern`] is an absolute prefix path plus a sequence of matching
//! components: literal names, globs (`*`, `?`, `[a-z]`, translated to
//! regexes), stretch markers (`//`, matching zero or more hierarchy
//! levels), an optional trailing property component, and per-component
//! predicates (`{name}`). A component with no text and a predicate is a
//! *bare predicate*: it asserts on the element at the match cursor without
//! consuming it.
//!
//! A [`PathExpression`] combines patterns with `~` (complement), `&` or
//! whitespace (intersection is `&`; whitespace is implied union), `|`
//! (union), `-` (difference), and parentheses. Compiling an expression
//! against a [`PredicateLibrary`] yields a [`PathExpressionEval`] that can
//! answer full matches or drive an incremental search along a hierarchy
//! traversal, reporting per-subtree constancy so traversals can prune.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use regex::Regex;

use crate::{
    error::{self, Error},
    path::ScenePath,
};

// ----------------------------------------------------------------------
// Results

/// Whether a result holds for a whole subtree or just the queried path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constancy {
    /// The value holds for the path and all of its descendants.
    Constant,
    /// The value holds for this path only.
    Varying,
}

/// The outcome of a predicate or pattern evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredicateResult {
    pub value: bool,
    pub constancy: Constancy,
}

impl PredicateResult {
    /// A value that holds for the whole subtree.
    #[must_use]
    pub const fn constant(value: bool) -> Self {
        Self {
            value,
            constancy: Constancy::Constant,
        }
    }

    /// A value that holds for this path only.
    #[must_use]
    pub const fn varying(value: bool) -> Self {
        Self {
            value,
            constancy: Constancy::Varying,
        }
    }

    /// True for constant results.
    #[must_use]
    pub const fn is_constant(self) -> bool {
        matches!(self.constancy, Constancy::Constant)
    }

    /// Boolean complement; constancy is preserved.
    #[must_use]
    pub const fn negated(self) -> Self {
        Self {
            value: !self.value,
            constancy: self.constancy,
        }
    }

    /// Takes `other`'s value, staying constant only if both inputs were.
    fn set_and_propagate_constancy(&mut self, other: Self) {
        self.value = other.value;
        if !other.is_constant() {
            self.constancy = Constancy::Varying;
        }
    }

    /// Conjunction. Constant when both inputs are, or when one side is
    /// constant false (the deciding value short-circuits the other).
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let value = self.value && other.value;
        let constant = (self.is_constant() && other.is_constant())
            || (self.is_constant() && !self.value)
            || (other.is_constant() && !other.value);
        Self {
            value,
            constancy: if constant { Constancy::Constant } else { Constancy::Varying },
        }
    }

    /// Disjunction. Constant when both inputs are, or when one side is
    /// constant true.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        let value = self.value || other.value;
        let constant = (self.is_constant() && other.is_constant())
            || (self.is_constant() && self.value)
            || (other.is_constant() && other.value);
        Self {
            value,
            constancy: if constant { Constancy::Constant } else { Constancy::Varying },
        }
    }
}

impl std::ops::Not for PredicateResult {
    type Output = Self;

    fn not(self) -> Self {
        self.negated()
    }
}

// ----------------------------------------------------------------------
// Predicate library

/// A predicate function over paths.
pub type PredicateFn = Arc<dyn Fn(&ScenePath) -> PredicateResult + Send + Sync>;

/// Named predicates available to pattern expressions.
#[derive(Default, Clone)]
pub struct PredicateLibrary {
    functions: AHashMap<String, PredicateFn>,
}

impl PredicateLibrary {
    /// An empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`, replacing any previous binding.
    pub fn register(
        &mut self,
        name: &str,
        function: impl Fn(&ScenePath) -> PredicateResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.functions.insert(name.to_owned(), Arc::new(function));
        self
    }

    fn get(&self, name: &str) -> Option<PredicateFn> {
        self.functions.get(name).cloned()
    }
}

// ----------------------------------------------------------------------
// Patterns

/// One parsed pattern component.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternComponent {
    /// `//`: matches zero or more hierarchy levels.
    Stretch,
    /// A matching element.
    Element {
        /// Literal or glob text; empty for bare predicates.
        text: String,
        /// Whether `text` is free of glob metacharacters.
        is_literal: bool,
        /// Attached predicate name.
        predicate: Option<String>,
    },
}

/// A single path pattern; see the module docs for the syntax.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PathPattern {
    text: String,
    prefix: ScenePath,
    components: Vec<PatternComponent>,
    is_property: bool,
}

impl PathPattern {
    /// Parses a pattern from text.
    pub fn parse(text: &str) -> error::Result<Self> {
        parse_pattern(text)
    }

    /// The literal absolute prefix all matches share.
    #[must_use]
    pub fn prefix(&self) -> &ScenePath {
        &self.prefix
    }

    /// True when the pattern requires a property path.
    #[must_use]
    pub fn is_property(&self) -> bool {
        self.is_property
    }

    /// The original pattern text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.text
    }
}

impl TryFrom<String> for PathPattern {
    type Error = Error;

    fn try_from(text: String) -> Result<Self, Error> {
        Self::parse(&text)
    }
}

fn is_glob_text(text: &str) -> bool {
    text.contains(['*', '?', '['])
}

/// Splits `{pred}` off the end of an element, if present.
fn split_predicate(element: &str) -> error::Result<(String, Option<String>)> {
    match element.find('{') {
        None => Ok((element.to_owned(), None)),
        Some(open) => {
            if !element.ends_with('}') {
                return Err(Error::parse(format!("unterminated predicate in {element:?}")));
            }
            let name = &element[open + 1..element.len() - 1];
            if name.is_empty() {
                return Err(Error::parse(format!("empty predicate in {element:?}")));
            }
            Ok((element[..open].to_owned(), Some(name.to_owned())))
        }
    }
}

fn parse_pattern(text: &str) -> error::Result<PathPattern> {
    let original = text.to_owned();
    let mut rest = text;
    if !rest.starts_with('/') {
        return Err(Error::parse(format!("pattern {text:?} must be absolute")));
    }

    // Split a trailing property part: the final element's first unbracketed
    // '.' starts the property pattern.
    let mut property: Option<String> = None;
    if let Some(last_slash) = rest.rfind('/') {
        let tail = &rest[last_slash + 1..];
        let mut bracket_depth = 0usize;
        for (offset, c) in tail.char_indices() {
            match c {
                '[' | '{' => bracket_depth += 1,
                ']' | '}' => bracket_depth = bracket_depth.saturating_sub(1),
                '.' if bracket_depth == 0 => {
                    property = Some(tail[offset + 1..].to_owned());
                    rest = &text[..last_slash + 1 + offset];
                    break;
                }
                _ => {}
            }
        }
    }

    // Tokenize into elements and stretch markers.
    let mut components: Vec<PatternComponent> = Vec::new();
    let mut elements: Vec<String> = Vec::new();
    {
        let body = rest.strip_prefix('/').unwrap_or(rest);
        let mut current = String::new();
        let mut chars = body.chars().peekable();
        let mut depth = 0usize;
        while let Some(c) = chars.next() {
            match c {
                '{' | '[' => {
                    depth += 1;
                    current.push(c);
                }
                '}' | ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                '/' if depth == 0 => {
                    elements.push(std::mem::take(&mut current));
                    // A second slash is a stretch marker.
                    if chars.peek() == Some(&'/') {
                        // Handled by the empty element pushed above.
                    }
                }
                _ => current.push(c),
            }
        }
        elements.push(current);
    }

    // An empty element between separators marks stretch; leading literal
    // elements fold into the prefix path.
    let mut prefix = ScenePath::absolute_root();
    let mut in_prefix = true;
    let mut pending_stretch = false;
    for element in elements {
        if element.is_empty() {
            pending_stretch = true;
            continue;
        }
        let (text_part, predicate) = split_predicate(&element)?;
        let literal = !is_glob_text(&text_part);
        if in_prefix && !pending_stretch && literal && predicate.is_none() && !text_part.is_empty() {
            let appended = prefix.append_child(crate::token::Token::new(&text_part));
            if appended.is_empty() {
                return Err(Error::parse(format!("bad name {text_part:?} in pattern {original:?}")));
            }
            prefix = appended;
            continue;
        }
        in_prefix = false;
        if pending_stretch {
            components.push(PatternComponent::Stretch);
            pending_stretch = false;
        }
        components.push(PatternComponent::Element {
            is_literal: literal && !text_part.is_empty(),
            text: text_part,
            predicate,
        });
    }
    if pending_stretch {
        components.push(PatternComponent::Stretch);
    }

    let is_property = property.is_some();
    if let Some(property_text) = property {
        let (text_part, predicate) = split_predicate(&property_text)?;
        if text_part.is_empty() && predicate.is_none() {
            return Err(Error::parse(format!("empty property pattern in {original:?}")));
        }
        components.push(PatternComponent::Element {
            is_literal: !is_glob_text(&text_part) && !text_part.is_empty(),
            text: text_part,
            predicate,
        });
    }

    Ok(PathPattern {
        text: original,
        prefix,
        components,
        is_property,
    })
}

// ----------------------------------------------------------------------
// Expressions

/// Boolean structure over patterns, stored in evaluation order: patterns
/// appear as `EvalPattern` markers, complement is postfix, and binary
/// operators are infix between parenthesized operand runs so evaluation can
/// short-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprOp {
    EvalPattern,
    Not,
    And,
    Or,
    Open,
    Close,
}

/// A parsed pattern expression; see the module docs for the operators.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PathExpression {
    text: String,
    ops: Vec<ExprOp>,
    patterns: Vec<PathPattern>,
}

impl PathExpression {
    /// Parses an expression from text.
    pub fn parse(text: &str) -> error::Result<Self> {
        let mut parser = ExprParser {
            bytes: text.as_bytes(),
            pos: 0,
            ops: Vec::new(),
            patterns: Vec::new(),
        };
        parser.union()?;
        parser.skip_spaces();
        if parser.pos != parser.bytes.len() {
            return Err(Error::parse(format!(
                "trailing input at offset {} in expression {text:?}",
                parser.pos
            )));
        }
        if parser.patterns.is_empty() {
            return Err(Error::parse(format!("expression {text:?} holds no patterns")));
        }
        Ok(Self {
            text: text.to_owned(),
            ops: parser.ops,
            patterns: parser.patterns,
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The patterns, in evaluation order.
    #[must_use]
    pub fn patterns(&self) -> impl Iterator<Item = &PathPattern> {
        self.patterns.iter()
    }

    /// True when every pattern is absolute (the form evaluators require).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.patterns.iter().all(|p| p.prefix.is_absolute())
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<PathExpression> for String {
    fn from(expression: PathExpression) -> Self {
        expression.text
    }
}

impl TryFrom<String> for PathExpression {
    type Error = Error;

    fn try_from(text: String) -> Result<Self, Error> {
        Self::parse(&text)
    }
}

struct ExprParser<'a> {
    bytes: &'a [u8],
    pos: usize,
    ops: Vec<ExprOp>,
    patterns: Vec<PathPattern>,
}

impl ExprParser<'_> {
    fn skip_spaces(&mut self) {
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_spaces();
        self.bytes.get(self.pos).copied()
    }

    /// union := intersection (('|' | whitespace-adjacency) intersection)*
    fn union(&mut self) -> error::Result<()> {
        self.intersection()?;
        loop {
            match self.peek() {
                Some(b'|') => {
                    self.pos += 1;
                    self.ops.push(ExprOp::Or);
                    self.ops.push(ExprOp::Open);
                    self.intersection()?;
                    self.ops.push(ExprOp::Close);
                }
                // Implied union: another operand begins with no operator.
                Some(b'/' | b'~' | b'(') => {
                    self.ops.push(ExprOp::Or);
                    self.ops.push(ExprOp::Open);
                    self.intersection()?;
                    self.ops.push(ExprOp::Close);
                }
                _ => return Ok(()),
            }
        }
    }

    /// intersection := operand (('&' operand) | ('-' operand))*
    fn intersection(&mut self) -> error::Result<()> {
        self.operand()?;
        loop {
            match self.peek() {
                Some(op @ (b'&' | b'-')) => {
                    self.pos += 1;
                    self.ops.push(ExprOp::And);
                    self.ops.push(ExprOp::Open);
                    self.operand()?;
                    // Difference (a - b) evaluates as (a & ~b).
                    if op == b'-' {
                        self.ops.push(ExprOp::Not);
                    }
                    self.ops.push(ExprOp::Close);
                }
                _ => return Ok(()),
            }
        }
    }

    /// operand := '~' operand | '(' union ')' | pattern
    fn operand(&mut self) -> error::Result<()> {
        match self.peek() {
            Some(b'~') => {
                self.pos += 1;
                self.operand()?;
                self.ops.push(ExprOp::Not);
                Ok(())
            }
            Some(b'(') => {
                self.pos += 1;
                self.union()?;
                if self.peek() != Some(b')') {
                    return Err(Error::parse("unbalanced parenthesis in expression"));
                }
                self.pos += 1;
                Ok(())
            }
            Some(b'/') => {
                let start = self.pos;
                let mut depth = 0usize;
                while let Some(&c) = self.bytes.get(self.pos) {
                    match c {
                        b'[' | b'{' => depth += 1,
                        b']' | b'}' => depth = depth.saturating_sub(1),
                        c if depth == 0
                            && (c.is_ascii_whitespace()
                                || c == b'|'
                                || c == b'&'
                                || c == b'('
                                || c == b')'
                                || c == b'~') =>
                        {
                            break;
                        }
                        b'-' if depth == 0 => break,
                        _ => {}
                    }
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.bytes[start..self.pos])
                    .map_err(|_| Error::parse("non-utf8 expression"))?;
                self.patterns.push(PathPattern::parse(text)?);
                self.ops.push(ExprOp::EvalPattern);
                Ok(())
            }
            other => Err(Error::parse(format!(
                "expected a pattern, '~', or '(' (found {other:?})"
            ))),
        }
    }
}

// ----------------------------------------------------------------------
// Compiled evaluator

/// What object kinds a compiled pattern can match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchObjType {
    PrimOnly,
    PropOnly,
    PrimOrProp,
}

#[derive(Debug)]
enum Matcher {
    /// Literal name; empty text (bare predicates) matches implicitly.
    Name(String),
    /// Glob translated to an anchored regex.
    Glob(Regex),
}

#[derive(Debug)]
struct CompiledComponent {
    matcher: Matcher,
    predicate: Option<usize>,
    /// Bare predicates assert without consuming a path element.
    consuming: bool,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    begin: usize,
    end: usize,
    /// Number of path elements this segment consumes.
    consuming: usize,
}

#[derive(Debug)]
struct PatternImpl {
    prefix: ScenePath,
    components: Vec<CompiledComponent>,
    segments: Vec<Segment>,
    stretch_begin: bool,
    stretch_end: bool,
    match_obj: MatchObjType,
}

fn glob_to_regex(glob: &str) -> error::Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '[' => {
                pattern.push('[');
                for inner in chars.by_ref() {
                    pattern.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            c if "\\.+()|^${}".contains(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|err| Error::parse(format!("bad glob {glob:?}: {err}")))
}

impl PatternImpl {
    fn build(pattern: &PathPattern, library: &PredicateLibrary, predicates: &mut Vec<PredicateFn>) -> error::Result<Self> {
        let mut components: Vec<CompiledComponent> = Vec::new();
        let mut segments: Vec<Segment> = Vec::new();
        let mut stretch_begin = false;
        let mut stretch_end = false;

        let mut close_segment = |components: &[CompiledComponent], segments: &mut Vec<Segment>| {
            let begin = segments.last().map_or(0, |s| s.end);
            if begin < components.len() {
                let consuming = components[begin..].iter().filter(|c| c.consuming).count();
                segments.push(Segment {
                    begin,
                    end: components.len(),
                    consuming,
                });
            }
        };

        for (index, component) in pattern.components.iter().enumerate() {
            match component {
                PatternComponent::Stretch => {
                    if index + 1 == pattern.components.len() {
                        stretch_end = true;
                    }
                    if components.is_empty() {
                        stretch_begin = true;
                    } else {
                        close_segment(&components, &mut segments);
                    }
                }
                PatternComponent::Element {
                    text,
                    is_literal,
                    predicate,
                } => {
                    let predicate_index = match predicate {
                        Some(name) => {
                            let function = library.get(name).ok_or_else(|| {
                                Error::coding(format!("unknown predicate {name:?} in pattern {}", pattern.text))
                            })?;
                            predicates.push(function);
                            Some(predicates.len() - 1)
                        }
                        None => None,
                    };
                    let matcher = if *is_literal || text.is_empty() {
                        Matcher::Name(text.clone())
                    } else {
                        Matcher::Glob(glob_to_regex(text)?)
                    };
                    components.push(CompiledComponent {
                        matcher,
                        predicate: predicate_index,
                        consuming: !text.is_empty() || predicate_index.is_none(),
                    });
                }
            }
        }
        if !stretch_end {
            close_segment(&components, &mut segments);
        }

        // What can this pattern match?  A trailing stretch or a trailing
        // bare predicate leaves both prims and properties possible; an
        // explicit property pattern demands properties; anything else
        // matches prims only.
        let match_obj = if pattern.is_property {
            MatchObjType::PropOnly
        } else if stretch_end
            || components
                .last()
                .is_some_and(|c| matches!(&c.matcher, Matcher::Name(name) if name.is_empty()))
        {
            MatchObjType::PrimOrProp
        } else {
            MatchObjType::PrimOnly
        };

        Ok(Self {
            prefix: pattern.prefix.clone(),
            components,
            segments,
            stretch_begin,
            stretch_end,
            match_obj,
        })
    }

    /// Matches one segment with its first consumed element at
    /// `prefixes[start]`. Bare predicates assert on the element at the
    /// cursor (or the final element when the cursor is past the end)
    /// without advancing it.
    fn check_exact(
        &self,
        segment: Segment,
        predicates: &[PredicateFn],
        prefixes: &[ScenePath],
        start: usize,
    ) -> PredicateResult {
        if start + segment.consuming > prefixes.len() {
            return PredicateResult::varying(false);
        }
        let mut cursor = start;
        for component in &self.components[segment.begin..segment.end] {
            let target = if cursor < prefixes.len() {
                &prefixes[cursor]
            } else if let Some(last) = prefixes.last() {
                last
            } else {
                return PredicateResult::varying(false);
            };
            if component.consuming {
                let name = target.name();
                let matches = match &component.matcher {
                    Matcher::Name(text) => text.is_empty() || text == name,
                    Matcher::Glob(regex) => regex.is_match(name),
                };
                if !matches {
                    return PredicateResult::varying(false);
                }
            }
            if let Some(index) = component.predicate {
                let result = predicates[index](target);
                if !result.value {
                    // A failing predicate's constancy propagates.
                    return result;
                }
            }
            if component.consuming {
                cursor += 1;
            }
        }
        PredicateResult::varying(true)
    }

    /// Full match; see §the module docs. The result is constant when it
    /// provably holds for every descendant of `path`.
    fn match_path(&self, path: &ScenePath, predicates: &[PredicateFn]) -> PredicateResult {
        if !path.is_absolute_root_or_prim_path() && !path.is_prim_property_path() {
            error::post_coding_error(format!(
                "<{path}> is not a prim or prim-property path; patterns match only those"
            ));
            return PredicateResult::constant(false);
        }
        if !path.has_prefix(&self.prefix) {
            // Descendants could still reach the prefix when the path is an
            // ancestor of it.
            return if self.prefix.has_prefix(path) {
                PredicateResult::varying(false)
            } else {
                PredicateResult::constant(false)
            };
        }
        let is_property = path.is_prim_property_path();
        if self.match_obj == MatchObjType::PropOnly && !is_property {
            return PredicateResult::varying(false);
        }
        if self.match_obj == MatchObjType::PrimOnly && is_property {
            return PredicateResult::constant(false);
        }

        if self.components.is_empty() {
            if self.stretch_begin || self.stretch_end {
                return PredicateResult::constant(true);
            }
            return if *path == self.prefix {
                PredicateResult::varying(true)
            } else {
                PredicateResult::constant(false)
            };
        }

        let available = (path.element_count() - self.prefix.element_count()) as usize;
        let prefixes = path.get_prefixes(available);
        let total_consuming: usize = self.segments.iter().map(|s| s.consuming).sum();
        if prefixes.len() < total_consuming {
            return PredicateResult::varying(false);
        }

        let mut cursor = 0usize;
        let last_index = self.segments.len() - 1;
        for (index, segment) in self.segments.iter().copied().enumerate() {
            let first = index == 0;
            let last = index == last_index;
            if first && !self.stretch_begin {
                // Anchored at the head.
                let result = self.check_exact(segment, predicates, &prefixes, 0);
                if !result.value {
                    return result;
                }
                cursor = segment.consuming;
                if last && !self.stretch_end && cursor != prefixes.len() {
                    return PredicateResult::varying(false);
                }
            } else if last && !self.stretch_end {
                // Anchored at the tail.
                let start = prefixes.len() - segment.consuming;
                if start < cursor {
                    return PredicateResult::varying(false);
                }
                let result = self.check_exact(segment, predicates, &prefixes, start);
                if !result.value {
                    return result;
                }
                cursor = prefixes.len();
            } else {
                // Floating: search for the first placement that matches.
                let remaining_consuming: usize =
                    self.segments[index + 1..].iter().map(|s| s.consuming).sum();
                let max_start = prefixes.len() - remaining_consuming - segment.consuming;
                let mut matched = None;
                let mut last_result = PredicateResult::varying(false);
                for start in cursor..=max_start {
                    last_result = self.check_exact(segment, predicates, &prefixes, start);
                    if last_result.value {
                        matched = Some(start);
                        break;
                    }
                }
                let Some(start) = matched else {
                    return last_result;
                };
                cursor = start + segment.consuming;
            }
        }

        if self.stretch_end {
            PredicateResult::constant(true)
        } else {
            PredicateResult::varying(true)
        }
    }

    /// One step of an incremental search; see [`PathExpressionEval::next`].
    fn next(
        &self,
        search: &mut PatternSearchState,
        path: &ScenePath,
        predicates: &[PredicateFn],
    ) -> PredicateResult {
        if search.constant_depth.is_some() {
            return PredicateResult::constant(search.constant_value);
        }
        if !path.is_absolute_root_or_prim_path() && !path.is_prim_property_path() {
            error::post_coding_error(format!(
                "<{path}> is not a prim or prim-property path; patterns match only those"
            ));
            search.set_constant(0, false);
            return PredicateResult::constant(false);
        }

        let path_depth = path.element_count() as usize;
        let prefix_depth = self.prefix.element_count() as usize;

        if search.segment_match_depths.is_empty() && !path.has_prefix(&self.prefix) {
            if !self.prefix.has_prefix(path) {
                search.set_constant(prefix_depth, false);
                return PredicateResult::constant(false);
            }
            return PredicateResult::varying(false);
        }

        let is_property = path.is_prim_property_path();
        if self.match_obj == MatchObjType::PropOnly && !is_property {
            return PredicateResult::varying(false);
        }
        if self.match_obj == MatchObjType::PrimOnly && is_property {
            return PredicateResult::constant(false);
        }

        if self.components.is_empty() {
            if self.stretch_begin || self.stretch_end {
                search.set_constant(prefix_depth, true);
                return PredicateResult::constant(true);
            }
            if path_depth > prefix_depth {
                search.set_constant(prefix_depth, false);
                return PredicateResult::constant(false);
            }
            return PredicateResult::varying(true);
        }

        // Rematch the final segment when everything already matched once;
        // patterns like //foo/bar keep matching deeper repetitions.
        if search.segment_match_depths.len() == self.segments.len() {
            search.segment_match_depths.pop();
        }

        loop {
            let segment_index = search.segment_match_depths.len();
            let segment = self.segments[segment_index];
            let has_prev = segment_index > 0;
            let is_final = segment_index == self.segments.len() - 1;

            let matched_depth = if has_prev {
                search.segment_match_depths[segment_index - 1]
            } else {
                prefix_depth
            };
            let available = path_depth - matched_depth;
            if available < segment.consuming {
                return PredicateResult::varying(false);
            }
            let has_stretch = has_prev || self.stretch_begin;
            if !has_stretch && available > segment.consuming {
                search.set_constant(path_depth, false);
                return PredicateResult::constant(false);
            }

            let prefixes = path.get_prefixes(available);
            if prefixes.is_empty() && segment.consuming > 0 {
                return PredicateResult::varying(false);
            }
            // The segment must end exactly at the current element; earlier
            // placements were tried on shallower traversal steps.
            let start = prefixes.len() - segment.consuming;
            let result = self.check_exact(segment, predicates, &prefixes, start);
            if result.value {
                search.segment_match_depths.push(path_depth);
            } else if result.is_constant() {
                // A constantly failing predicate dooms the whole subtree.
                search.set_constant(path_depth, false);
                return PredicateResult::constant(false);
            }
            if !result.value || is_final {
                break;
            }
        }

        if search.segment_match_depths.len() == self.segments.len() {
            if self.stretch_end {
                let depth = *search.segment_match_depths.last().expect("nonempty match stack");
                search.set_constant(depth, true);
                return PredicateResult::constant(true);
            }
            if search.segment_match_depths.last() == Some(&path_depth) {
                return PredicateResult::varying(true);
            }
        }
        PredicateResult::varying(false)
    }
}

/// Per-pattern incremental search bookkeeping.
#[derive(Debug, Clone, Default)]
struct PatternSearchState {
    /// Path depth at which each matched segment ended.
    segment_match_depths: Vec<usize>,
    /// Depth past which the result is fixed, with its value.
    constant_depth: Option<usize>,
    constant_value: bool,
}

impl PatternSearchState {
    fn set_constant(&mut self, depth: usize, value: bool) {
        self.constant_depth = Some(depth);
        self.constant_value = value;
    }

    /// Invalidates bookkeeping recorded at or below `new_depth`, for
    /// traversals that backtracked.
    fn pop(&mut self, new_depth: usize) {
        while self
            .segment_match_depths
            .last()
            .is_some_and(|depth| *depth >= new_depth)
        {
            self.segment_match_depths.pop();
        }
        if self.constant_depth.is_some_and(|depth| new_depth <= depth) {
            self.constant_depth = None;
        }
    }
}

/// Traversal state for [`PathExpressionEval::next`].
#[derive(Debug, Clone, Default)]
pub struct IncrementalSearchState {
    patterns: Vec<PatternSearchState>,
    last_path: ScenePath,
}

/// A pattern expression compiled against a predicate library.
pub struct PathExpressionEval {
    ops: Vec<ExprOp>,
    patterns: Vec<PatternImpl>,
    predicates: Vec<PredicateFn>,
}

impl std::fmt::Debug for PathExpressionEval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathExpressionEval")
            .field("ops", &self.ops)
            .field("patterns", &self.patterns)
            .field("predicates", &format_args!("[{} predicates]", self.predicates.len()))
            .finish()
    }
}

impl PathExpressionEval {
    /// Compiles `expression`, resolving predicate names in `library`.
    /// Incomplete expressions (relative patterns) are a coding error.
    pub fn build(expression: &PathExpression, library: &PredicateLibrary) -> error::Result<Self> {
        if !expression.is_complete() {
            return Err(Error::coding(format!(
                "cannot build evaluator for incomplete expression {:?}",
                expression.text
            )));
        }
        let mut predicates = Vec::new();
        let patterns = expression
            .patterns
            .iter()
            .map(|p| PatternImpl::build(p, library, &mut predicates))
            .collect::<error::Result<Vec<_>>>()?;
        Ok(Self {
            ops: expression.ops.clone(),
            patterns,
            predicates,
        })
    }

    /// Runs the boolean program, pulling one pattern evaluation per
    /// `EvalPattern` op; `skip` evaluations only advance the pattern cursor.
    fn eval_expr(&self, mut eval_pattern: impl FnMut(usize, bool) -> PredicateResult) -> PredicateResult {
        let mut result = PredicateResult::constant(false);
        let mut pattern_index = 0usize;
        let mut op_index = 0usize;
        let mut nest = 0usize;

        while op_index < self.ops.len() {
            match self.ops[op_index] {
                ExprOp::EvalPattern => {
                    result.set_and_propagate_constancy(eval_pattern(pattern_index, false));
                    pattern_index += 1;
                }
                ExprOp::Not => result = !result,
                ExprOp::And | ExprOp::Or => {
                    let deciding = self.ops[op_index] == ExprOp::Or;
                    if result.value == deciding {
                        // Short-circuit: skip ops to the matching Close,
                        // still advancing the pattern cursor.
                        let orig_nest = nest;
                        op_index += 1;
                        while op_index < self.ops.len() {
                            match self.ops[op_index] {
                                ExprOp::EvalPattern => {
                                    let _ = eval_pattern(pattern_index, true);
                                    pattern_index += 1;
                                }
                                ExprOp::Open => nest += 1,
                                ExprOp::Close => {
                                    nest -= 1;
                                    if nest == orig_nest {
                                        break;
                                    }
                                }
                                _ => {}
                            }
                            op_index += 1;
                        }
                    }
                }
                ExprOp::Open => nest += 1,
                ExprOp::Close => nest = nest.saturating_sub(1),
            }
            op_index += 1;
        }
        result
    }

    /// Evaluates the full expression against one path.
    #[must_use]
    pub fn match_path(&self, path: &ScenePath) -> PredicateResult {
        self.eval_expr(|index, skip| {
            if skip {
                PredicateResult::varying(false)
            } else {
                self.patterns[index].match_path(path, &self.predicates)
            }
        })
    }

    /// A fresh incremental state for one traversal.
    #[must_use]
    pub fn new_incremental_state(&self) -> IncrementalSearchState {
        IncrementalSearchState {
            patterns: vec![PatternSearchState::default(); self.patterns.len()],
            last_path: ScenePath::empty(),
        }
    }

    /// Advances an incremental search to `path`. The traversal must visit
    /// paths in depth-first pre-order; lateral or upward steps invalidate
    /// the bookkeeping recorded below the common ancestor. A constant
    /// result holds for the whole subtree under `path`.
    pub fn next(&self, state: &mut IncrementalSearchState, path: &ScenePath) -> PredicateResult {
        if state.patterns.len() != self.patterns.len() {
            *state = self.new_incremental_state();
        }
        if !state.last_path.is_empty() && !path.has_prefix(&state.last_path) {
            let common = path.get_common_prefix(&state.last_path);
            let pop_depth = common.element_count() as usize + 1;
            for pattern_state in &mut state.patterns {
                pattern_state.pop(pop_depth);
            }
        }
        state.last_path = path.clone();
        self.eval_expr(|index, skip| {
            if skip {
                PredicateResult::varying(false)
            } else {
                self.patterns[index].next(&mut state.patterns[index], path, &self.predicates)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> ScenePath {
        ScenePath::from_string(text)
    }

    fn library() -> PredicateLibrary {
        let mut library = PredicateLibrary::new();
        library.register("isModel", |path: &ScenePath| {
            PredicateResult::varying(path.name().starts_with("model"))
        });
        library.register("never", |_: &ScenePath| PredicateResult::constant(false));
        library
    }

    fn eval(text: &str) -> PathExpressionEval {
        let expression = PathExpression::parse(text).unwrap();
        PathExpressionEval::build(&expression, &library()).unwrap()
    }

    #[test]
    fn pattern_parse_shapes() {
        let pattern = PathPattern::parse("/World//{isModel}/*.prop").unwrap();
        assert_eq!(pattern.prefix(), &p("/World"));
        assert!(pattern.is_property());

        let literal = PathPattern::parse("/World/geom/model").unwrap();
        assert_eq!(literal.prefix(), &p("/World/geom/model"));
        assert!(!literal.is_property());

        assert!(PathPattern::parse("relative/path").is_err());
        assert!(PathPattern::parse("/a/{unclosed").is_err());
    }

    #[test]
    fn literal_and_glob_full_match() {
        let matcher = eval("/World/geom//model_*");
        assert!(matcher.match_path(&p("/World/geom/model_a")).value);
        assert!(matcher.match_path(&p("/World/geom/deep/model_b")).value);
        assert!(!matcher.match_path(&p("/World/geom/other")).value);
        // Outside the prefix the failure is constant; on the way down it is
        // varying.
        let miss = matcher.match_path(&p("/Else"));
        assert!(!miss.value);
        assert!(miss.is_constant());
        let on_the_way = matcher.match_path(&p("/World"));
        assert!(!on_the_way.value);
        assert!(!on_the_way.is_constant());
    }

    #[test]
    fn trailing_stretch_is_constant_true() {
        let matcher = eval("/World//");
        let hit = matcher.match_path(&p("/World/anything/below"));
        assert!(hit.value);
        assert!(hit.is_constant(), "trailing stretch covers all descendants");
    }

    #[test]
    fn property_patterns_demand_properties() {
        let matcher = eval("/World//*.radius");
        assert!(!matcher.match_path(&p("/World/sphere")).value);
        assert!(matcher.match_path(&p("/World/sphere.radius")).value);
        assert!(!matcher.match_path(&p("/World/sphere.height")).value);
    }

    #[test]
    fn expression_operators() {
        let matcher = eval("/A// & ~/A/hidden//");
        assert!(matcher.match_path(&p("/A/x")).value);
        assert!(!matcher.match_path(&p("/A/hidden/x")).value);

        let union = eval("/A// /B//");
        assert!(union.match_path(&p("/A/x")).value);
        assert!(union.match_path(&p("/B/y")).value);
        assert!(!union.match_path(&p("/C/z")).value);

        let difference = eval("/A// - /A/skip//");
        assert!(difference.match_path(&p("/A/keep")).value);
        assert!(!difference.match_path(&p("/A/skip/any")).value);
    }

    #[test]
    fn unknown_predicates_fail_compilation() {
        let expression = PathExpression::parse("/A//{missing}").unwrap();
        let err = PathExpressionEval::build(&expression, &library()).unwrap_err();
        assert!(err.is_coding_error());
    }

    #[test]
    fn incremental_scenario() {
        // The canonical traversal: varying-false until the property under
        // the predicate-passing prim appears.
        let matcher = eval("/World//{isModel}/*.prop");
        let mut state = matcher.new_incremental_state();
        let step = |state: &mut IncrementalSearchState, text: &str| matcher.next(state, &p(text));

        let r = step(&mut state, "/World");
        assert!(!r.value);
        assert!(!r.is_constant());
        let r = step(&mut state, "/World/geom");
        assert!(!r.value);
        assert!(!r.is_constant());
        let r = step(&mut state, "/World/geom/modelA");
        assert!(!r.value);
        assert!(!r.is_constant());
        let r = step(&mut state, "/World/geom/modelA.prop");
        assert!(r.value, "property under a passing prim matches");
        assert!(!r.is_constant());
    }

    #[test]
    fn incremental_constant_short_circuits() {
        let matcher = eval("/World//");
        let mut state = matcher.new_incremental_state();
        let r = matcher.next(&mut state, &p("/World"));
        assert!(r.value);
        assert!(r.is_constant());
        // Once constant, descendants answer from the stored state.
        let r = matcher.next(&mut state, &p("/World/deep/below"));
        assert!(r.value);
        assert!(r.is_constant());

        let mut state = matcher.new_incremental_state();
        let r = matcher.next(&mut state, &p("/Other"));
        assert!(!r.value);
        assert!(r.is_constant(), "off-prefix subtrees are constant false");
    }

    #[test]
    fn incremental_backtracking_pops_state() {
        let matcher = eval("/W//team/member");
        let mut state = matcher.new_incremental_state();
        assert!(!matcher.next(&mut state, &p("/W")).value);
        assert!(!matcher.next(&mut state, &p("/W/team")).value);
        assert!(matcher.next(&mut state, &p("/W/team/member")).value);
        // Lateral move: the recorded segment depths no longer apply.
        assert!(!matcher.next(&mut state, &p("/W/other")).value);
        assert!(!matcher.next(&mut state, &p("/W/other/team")).value);
        assert!(matcher.next(&mut state, &p("/W/other/team/member")).value);
    }

    #[test]
    fn result_combinators_propagate_constancy() {
        let ct = PredicateResult::constant(true);
        let cf = PredicateResult::constant(false);
        let vt = PredicateResult::varying(true);
        let vf = PredicateResult::varying(false);

        assert_eq!(ct.and(vt), PredicateResult::varying(true));
        assert_eq!(cf.and(vt), PredicateResult::constant(false), "deciding operand wins");
        assert_eq!(vf.and(cf), PredicateResult::constant(false));
        assert_eq!(ct.or(vf), PredicateResult::constant(true), "deciding operand wins");
        assert_eq!(vt.or(cf), PredicateResult::varying(true));
        assert_eq!(cf.or(ct), PredicateResult::constant(true));
        assert_eq!(!vt, PredicateResult::varying(false));
        assert_eq!(!cf, PredicateResult::constant(true));
    }

    #[test]
    fn constant_predicate_failure_dooms_subtrees() {
        let matcher = eval("/A//{never}/leaf");
        let mut state = matcher.new_incremental_state();
        let _ = matcher.next(&mut state, &p("/A"));
        let r = matcher.next(&mut state, &p("/A/b"));
        assert!(!r.value);
        assert!(r.is_constant(), "constant-false predicates propagate");
    }
}
