//! A small XPath 1.0 subset evaluated directly over a `scraper` document.
//!
//! Supported: absolute and relative location paths, `/` and `//`, name tests,
//! `*`, `node()`, `.`, `..`, terminal `@attr` and `text()` steps, `|` unions and
//! predicates built from positions (`[2]`, `[last()]`, `position() < 3`),
//! `@attr`, `@attr = 'v'`, `@attr != 'v'`, `text() = 'v'`, `. = 'v'`, child
//! element tests (`[p]`, `[span = 'x']`), `contains()`, `starts-with()`,
//! `not()`, `and`, `or` and parentheses. Explicit axes (`child::`) and
//! functions outside this list are rejected at parse time.

use super::selector::Match;
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum XPathError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected `{found}` at offset {offset}")]
    Unexpected { found: char, offset: usize },
    #[error("unsupported construct `{0}`")]
    Unsupported(String),
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    paths: Vec<LocationPath>,
}

#[derive(Debug, Clone, PartialEq)]
struct LocationPath {
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    /// `//`: descendant-or-self, then the step.
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    AnyElement,
    SelfNode,
    Parent,
    Text,
    Attribute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Attr(String),
    Text,
    Context,
    Child(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Position(usize),
    Last,
    PositionCmp(CmpOp, usize),
    Exists(Operand),
    Compare(Operand, CmpOp, String),
    Contains(Operand, String),
    StartsWith(Operand, String),
}

impl XPath {
    /// Compile an expression.
    pub fn parse(expr: &str) -> Result<Self, XPathError> {
        let mut parser = Parser::new(expr);
        parser.skip_ws();
        if parser.at_end() {
            return Err(XPathError::Empty);
        }
        let mut paths = vec![parser.location_path()?];
        loop {
            parser.skip_ws();
            match parser.peek() {
                None => break,
                Some('|') => {
                    parser.bump();
                    paths.push(parser.location_path()?);
                }
                Some(found) => {
                    return Err(XPathError::Unexpected {
                        found,
                        offset: parser.pos,
                    });
                }
            }
        }
        Ok(Self { paths })
    }

    /// Evaluate against a whole document. Results come back in document
    /// order without duplicates, across every branch of a union; attribute
    /// and text steps yield strings.
    pub fn select<'a>(&self, doc: &'a Html) -> Vec<Match<'a>> {
        let eval = Evaluator::new(doc);
        let mut ranked: Vec<(usize, Match<'a>)> = Vec::new();
        let mut seen_elements = HashSet::new();
        let mut seen_text = HashSet::new();
        for path in &self.paths {
            for value in eval.path(path) {
                match value {
                    Value::Node(item) => {
                        let el = match item {
                            Item::Element(el) => el,
                            Item::Document => doc.root_element(),
                        };
                        if seen_elements.insert(el.id()) {
                            ranked.push((eval.rank(el.id()), Match::Element(el)));
                        }
                    }
                    Value::Text { rank, text } => {
                        if seen_text.insert((rank, text.clone())) {
                            ranked.push((rank, Match::Text(text)));
                        }
                    }
                }
            }
        }
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, m)| m).collect()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | ':')
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<(), XPathError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(found) => Err(XPathError::Unexpected {
                found,
                offset: self.pos - 1,
            }),
            None => Err(XPathError::UnexpectedEnd),
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        let n = s.chars().count();
        let matches = s
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            self.pos += n;
        }
        matches
    }

    /// Consume a keyword only when it is not the prefix of a longer name.
    fn eat_keyword(&mut self, kw: &str) -> bool {
        let n = kw.chars().count();
        let matches = kw
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
            && !self.peek_at(n).is_some_and(is_name_char);
        if matches {
            self.pos += n;
        }
        matches
    }

    fn name(&mut self) -> Result<String, XPathError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !is_name_char(c) || (c == ':' && self.peek_at(1) == Some(':')) {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return match self.peek() {
                Some(found) => Err(XPathError::Unexpected {
                    found,
                    offset: self.pos,
                }),
                None => Err(XPathError::UnexpectedEnd),
            };
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn location_path(&mut self) -> Result<LocationPath, XPathError> {
        self.skip_ws();
        let mut steps = Vec::new();
        let mut first = true;

        loop {
            self.skip_ws();
            let axis = if self.eat_str("//") {
                Axis::Descendant
            } else if self.eat_str("/") {
                Axis::Child
            } else if first {
                Axis::Child
            } else {
                break;
            };
            first = false;

            let step = self.step(axis)?;
            let terminal = matches!(step.test, NodeTest::Text | NodeTest::Attribute(_));
            steps.push(step);
            if terminal {
                self.skip_ws();
                if matches!(self.peek(), Some('/')) {
                    return Err(XPathError::Unsupported(
                        "steps after text() or @attribute".to_string(),
                    ));
                }
                break;
            }
        }

        if steps.is_empty() {
            return Err(XPathError::Unsupported("bare `/`".to_string()));
        }
        Ok(LocationPath { steps })
    }

    fn step(&mut self, axis: Axis) -> Result<Step, XPathError> {
        self.skip_ws();
        let test = match self.peek() {
            Some('.') if self.peek_at(1) == Some('.') => {
                self.pos += 2;
                NodeTest::Parent
            }
            Some('.') => {
                self.pos += 1;
                NodeTest::SelfNode
            }
            Some('@') => {
                self.pos += 1;
                NodeTest::Attribute(self.name()?.to_ascii_lowercase())
            }
            Some('*') => {
                self.pos += 1;
                NodeTest::AnyElement
            }
            Some(_) => {
                let name = self.name()?;
                if self.eat_str("::") {
                    return Err(XPathError::Unsupported(format!("{name}::")));
                }
                if self.eat_str("()") {
                    match name.as_str() {
                        "text" => NodeTest::Text,
                        "node" => NodeTest::AnyElement,
                        other => return Err(XPathError::Unsupported(format!("{other}()"))),
                    }
                } else {
                    NodeTest::Name(name.to_ascii_lowercase())
                }
            }
            None => return Err(XPathError::UnexpectedEnd),
        };

        let mut predicates = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('[') {
                break;
            }
            if matches!(test, NodeTest::Text | NodeTest::Attribute(_)) {
                return Err(XPathError::Unsupported(
                    "predicates on text() or @attribute".to_string(),
                ));
            }
            self.bump();
            predicates.push(self.or_expr()?);
            self.expect(']')?;
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn or_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.and_expr()?;
        loop {
            self.skip_ws();
            if self.eat_keyword("or") {
                let rhs = self.and_expr()?;
                lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn and_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.unary_expr()?;
        loop {
            self.skip_ws();
            if self.eat_keyword("and") {
                let rhs = self.unary_expr()?;
                lhs = Expr::And(Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary_expr(&mut self) -> Result<Expr, XPathError> {
        self.skip_ws();
        match self.peek() {
            None => Err(XPathError::UnexpectedEnd),
            Some('(') => {
                self.bump();
                let inner = self.or_expr()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() => Ok(Expr::Position(self.number()?)),
            Some(_) => {
                if self.eat_str("not(") {
                    let inner = self.or_expr()?;
                    self.expect(')')?;
                    return Ok(Expr::Not(Box::new(inner)));
                }
                if self.eat_str("last()") {
                    return Ok(Expr::Last);
                }
                if self.eat_str("position()") {
                    let op = self.cmp_op()?.ok_or_else(|| {
                        XPathError::Unsupported("position() without comparison".to_string())
                    })?;
                    self.skip_ws();
                    return Ok(Expr::PositionCmp(op, self.number()?));
                }
                if self.eat_str("contains(") {
                    let (operand, literal) = self.function_args()?;
                    return Ok(Expr::Contains(operand, literal));
                }
                if self.eat_str("starts-with(") {
                    let (operand, literal) = self.function_args()?;
                    return Ok(Expr::StartsWith(operand, literal));
                }

                let operand = self.operand()?;
                match self.cmp_op()? {
                    Some(op) => {
                        self.skip_ws();
                        Ok(Expr::Compare(operand, op, self.literal()?))
                    }
                    None => Ok(Expr::Exists(operand)),
                }
            }
        }
    }

    fn function_args(&mut self) -> Result<(Operand, String), XPathError> {
        let operand = self.operand()?;
        self.expect(',')?;
        self.skip_ws();
        let literal = self.literal()?;
        self.expect(')')?;
        Ok((operand, literal))
    }

    fn operand(&mut self) -> Result<Operand, XPathError> {
        self.skip_ws();
        if self.eat_str("@") {
            return Ok(Operand::Attr(self.name()?.to_ascii_lowercase()));
        }
        if self.eat_str("text()") {
            return Ok(Operand::Text);
        }
        if self.peek() == Some('.') && self.peek_at(1) != Some('.') {
            self.bump();
            return Ok(Operand::Context);
        }
        let name = self.name()?;
        if self.peek() == Some('(') {
            return Err(XPathError::Unsupported(format!("{name}()")));
        }
        Ok(Operand::Child(name.to_ascii_lowercase()))
    }

    fn cmp_op(&mut self) -> Result<Option<CmpOp>, XPathError> {
        self.skip_ws();
        let op = if self.eat_str("!=") {
            CmpOp::Ne
        } else if self.eat_str("<=") {
            CmpOp::Le
        } else if self.eat_str(">=") {
            CmpOp::Ge
        } else if self.eat_str("=") {
            CmpOp::Eq
        } else if self.eat_str("<") {
            CmpOp::Lt
        } else if self.eat_str(">") {
            CmpOp::Gt
        } else {
            return Ok(None);
        };
        Ok(Some(op))
    }

    fn number(&mut self) -> Result<usize, XPathError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits.parse().map_err(|_| match self.peek() {
            Some(found) => XPathError::Unexpected {
                found,
                offset: self.pos,
            },
            None => XPathError::UnexpectedEnd,
        })
    }

    /// A quoted string, or a bare number used as a string.
    fn literal(&mut self) -> Result<String, XPathError> {
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.bump();
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.at_end() {
                    return Err(XPathError::UnexpectedEnd);
                }
                let value = self.chars[start..self.pos].iter().collect();
                self.bump();
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() => Ok(self.number()?.to_string()),
            Some(found) => Err(XPathError::Unexpected {
                found,
                offset: self.pos,
            }),
            None => Err(XPathError::UnexpectedEnd),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Item<'a> {
    Document,
    Element(ElementRef<'a>),
}

enum Value<'a> {
    Node(Item<'a>),
    /// An attribute value or text node, ranked by its owning node.
    Text { rank: usize, text: String },
}

struct Evaluator<'a> {
    doc: &'a Html,
    /// Pre-order position of every node in the tree.
    order: HashMap<NodeId, usize>,
}

impl<'a> Evaluator<'a> {
    fn new(doc: &'a Html) -> Self {
        let order = doc
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();
        Self { doc, order }
    }

    fn rank(&self, id: NodeId) -> usize {
        self.order.get(&id).copied().unwrap_or(usize::MAX)
    }

    fn node_id(&self, item: Item<'a>) -> NodeId {
        match item {
            Item::Document => self.doc.tree.root().id(),
            Item::Element(el) => el.id(),
        }
    }

    fn path(&self, path: &LocationPath) -> Vec<Value<'a>> {
        let mut current = vec![Item::Document];

        for step in &path.steps {
            let contexts = match step.axis {
                Axis::Child => current,
                Axis::Descendant => self.descendants_or_self(&current),
            };

            match &step.test {
                NodeTest::Attribute(name) => {
                    return contexts
                        .into_iter()
                        .filter_map(|item| match item {
                            Item::Element(el) => el.value().attr(name).map(|value| Value::Text {
                                rank: self.rank(el.id()),
                                text: value.to_string(),
                            }),
                            Item::Document => None,
                        })
                        .collect();
                }
                NodeTest::Text => {
                    return contexts
                        .into_iter()
                        .flat_map(|item| self.text_nodes(item))
                        .map(|(id, text)| Value::Text {
                            rank: self.rank(id),
                            text,
                        })
                        .collect();
                }
                test => {
                    // Predicates see positions relative to each context.
                    let mut next = Vec::new();
                    let mut seen = HashSet::new();
                    for ctx in contexts {
                        let candidates = self.candidates(ctx, test);
                        for item in self.filter(candidates, &step.predicates) {
                            if seen.insert(self.node_id(item)) {
                                next.push(item);
                            }
                        }
                    }
                    self.sort(&mut next);
                    current = next;
                }
            }
        }

        current.into_iter().map(Value::Node).collect()
    }

    fn sort(&self, items: &mut [Item<'a>]) {
        items.sort_by_key(|item| self.rank(self.node_id(*item)));
    }

    fn candidates(&self, ctx: Item<'a>, test: &NodeTest) -> Vec<Item<'a>> {
        match test {
            NodeTest::SelfNode => vec![ctx],
            NodeTest::Parent => self.parent(ctx).into_iter().collect(),
            NodeTest::AnyElement => self.child_elements(ctx).into_iter().map(Item::Element).collect(),
            NodeTest::Name(name) => self
                .child_elements(ctx)
                .into_iter()
                .filter(|el| el.value().name() == name)
                .map(Item::Element)
                .collect(),
            NodeTest::Text | NodeTest::Attribute(_) => Vec::new(),
        }
    }

    fn filter(&self, mut items: Vec<Item<'a>>, predicates: &[Expr]) -> Vec<Item<'a>> {
        for predicate in predicates {
            let size = items.len();
            items = items
                .into_iter()
                .enumerate()
                .filter(|(i, item)| self.test(predicate, *item, i + 1, size))
                .map(|(_, item)| item)
                .collect();
        }
        items
    }

    fn test(&self, expr: &Expr, item: Item<'a>, position: usize, size: usize) -> bool {
        match expr {
            Expr::Or(a, b) => {
                self.test(a, item, position, size) || self.test(b, item, position, size)
            }
            Expr::And(a, b) => {
                self.test(a, item, position, size) && self.test(b, item, position, size)
            }
            Expr::Not(inner) => !self.test(inner, item, position, size),
            Expr::Position(n) => position == *n,
            Expr::Last => position == size,
            Expr::PositionCmp(op, n) => op.holds(position, *n),
            Expr::Exists(Operand::Context) => true,
            Expr::Exists(operand) => !self.operand_values(operand, item).is_empty(),
            Expr::Compare(operand, op, literal) => self
                .operand_values(operand, item)
                .iter()
                .any(|value| compare(value, *op, literal)),
            Expr::Contains(operand, needle) => self
                .operand_values(operand, item)
                .first()
                .is_some_and(|value| value.contains(needle.as_str())),
            Expr::StartsWith(operand, prefix) => self
                .operand_values(operand, item)
                .first()
                .is_some_and(|value| value.starts_with(prefix.as_str())),
        }
    }

    fn operand_values(&self, operand: &Operand, item: Item<'a>) -> Vec<String> {
        match operand {
            Operand::Attr(name) => match item {
                Item::Element(el) => el.value().attr(name).map(str::to_string).into_iter().collect(),
                Item::Document => Vec::new(),
            },
            Operand::Text => self.text_nodes(item).into_iter().map(|(_, text)| text).collect(),
            Operand::Context => vec![self.string_value(item)],
            Operand::Child(name) => self
                .child_elements(item)
                .into_iter()
                .filter(|el| el.value().name() == name)
                .map(|el| el.text().collect())
                .collect(),
        }
    }

    fn string_value(&self, item: Item<'a>) -> String {
        match item {
            Item::Element(el) => el.text().collect(),
            Item::Document => self.doc.root_element().text().collect(),
        }
    }

    fn child_elements(&self, item: Item<'a>) -> Vec<ElementRef<'a>> {
        match item {
            Item::Document => self
                .doc
                .tree
                .root()
                .children()
                .filter_map(ElementRef::wrap)
                .collect(),
            Item::Element(el) => el.children().filter_map(ElementRef::wrap).collect(),
        }
    }

    fn text_nodes(&self, item: Item<'a>) -> Vec<(NodeId, String)> {
        let Item::Element(el) = item else {
            return Vec::new();
        };
        el.children()
            .filter_map(|child| match child.value() {
                Node::Text(text) => {
                    let s: &str = text;
                    Some((child.id(), s.to_string()))
                }
                _ => None,
            })
            .collect()
    }

    fn parent(&self, item: Item<'a>) -> Option<Item<'a>> {
        match item {
            Item::Document => None,
            Item::Element(el) => {
                let parent = el.parent()?;
                Some(ElementRef::wrap(parent).map_or(Item::Document, Item::Element))
            }
        }
    }

    fn descendants_or_self(&self, items: &[Item<'a>]) -> Vec<Item<'a>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for item in items {
            let expanded: Vec<Item<'a>> = match item {
                Item::Document => std::iter::once(Item::Document)
                    .chain(
                        self.doc
                            .tree
                            .root()
                            .descendants()
                            .filter_map(ElementRef::wrap)
                            .map(Item::Element),
                    )
                    .collect(),
                Item::Element(el) => el
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .map(Item::Element)
                    .collect(),
            };
            for e in expanded {
                if seen.insert(self.node_id(e)) {
                    out.push(e);
                }
            }
        }
        self.sort(&mut out);
        out
    }
}

fn compare(value: &str, op: CmpOp, literal: &str) -> bool {
    match op {
        CmpOp::Eq => value == literal,
        CmpOp::Ne => value != literal,
        _ => match (value.trim().parse::<f64>(), literal.trim().parse::<f64>()) {
            (Ok(lhs), Ok(rhs)) => op.holds(lhs, rhs),
            _ => false,
        },
    }
}
