//! Newick reading and writing.
//!
//! # Accepted input
//! ```text
//! tree    := subtree ';'?
//! subtree := '(' subtree (',' subtree)* ')' label? deco*  |  label deco*
//! deco    := ':' length  |  '[' comment ']'
//! ```
//! - Labels are either unquoted (ending at one of `( ) , : ; [`) or single
//!   quoted, with `''` standing for a literal quote.
//! - A numeric label after `)` is read as the branch support of that node.
//! - A bracket comment is read as branch support unless it starts with `&`
//!   (BEAST/NHX metadata), which is skipped.
//!
//! Leaves are delimited by the tokenizer, never found by searching the label
//! text, so a label that is a substring of another label cannot be matched at
//! the wrong place.

use crate::error::ParseError;
use crate::topology::{Node, NodeIndex, Topology};
use std::collections::HashSet;

/// Characters that end an unquoted label or length token.
const DELIMITERS: &[char] = &['(', ')', ',', ':', ';', '['];

/// Parses a single tree statement.
///
/// # Errors
/// Returns a [`ParseError`]; no partial tree is returned.
///
/// # Example
/// ```
/// # use rust_python_tree_topology::newick;
/// let tree = newick::parse("(A:1,(B:1,C:1):1);").unwrap();
/// assert_eq!(tree.leaf_labels(), vec!["A", "B", "C"]);
/// assert!(tree.is_rooted());
/// ```
pub fn parse(text: &str) -> Result<Topology, ParseError> {
    check_balance(text)?;
    let mut parser = Parser::new(text);
    let topology = parser.parse_tree()?;

    let mut seen = HashSet::new();
    for leaf in topology.leaves() {
        if let Some(label) = &topology.node(leaf).label {
            if !seen.insert(label.as_str()) {
                return Err(ParseError::DuplicateLeafLabel(label.clone()));
            }
        }
    }
    Ok(topology)
}

/// Parses every tree statement in `text`.
///
/// Statements end at a `;` outside parentheses, or at a newline when the
/// line holds a complete tree without a terminating `;`.
pub fn parse_all(text: &str) -> Result<Vec<Topology>, ParseError> {
    split_statements(text).into_iter().map(parse).collect()
}

/// Serializes a topology, always terminated by `;`.
///
/// # Example
/// ```
/// # use rust_python_tree_topology::newick;
/// let tree = newick::parse("(A:1,(B:1,C:1)90:1);").unwrap();
/// assert_eq!(newick::format(&tree, true, true), "(A:1,(B:1,C:1)90:1);");
/// assert_eq!(newick::format(&tree, false, false), "(A,(B,C));");
/// ```
pub fn format(topology: &Topology, include_lengths: bool, include_supports: bool) -> String {
    let mut out = String::with_capacity(topology.len() * 8);
    write_subtree(topology, topology.root(), include_lengths, include_supports, &mut out);
    out.push(';');
    out
}

fn write_subtree(t: &Topology, idx: NodeIndex, lengths: bool, supports: bool, out: &mut String) {
    let node = t.node(idx);
    if !node.is_leaf() {
        out.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_subtree(t, child, lengths, supports, out);
        }
        out.push(')');
    }

    let support = node.branch_support.as_deref().filter(|_| supports);
    let internal = !node.is_leaf();
    match (&node.label, support) {
        (Some(label), Some(s)) => {
            push_label(label, internal, out);
            out.push('[');
            out.push_str(s);
            out.push(']');
        }
        (Some(label), None) => push_label(label, internal, out),
        // only a numeric token after `)` reads back as support
        (None, Some(s)) if internal && s.parse::<f64>().is_ok() => out.push_str(s),
        (None, Some(s)) => {
            out.push('[');
            out.push_str(s);
            out.push(']');
        }
        (None, None) => {}
    }

    if lengths && !node.branch_length.is_nan() {
        out.push(':');
        out.push_str(&node.branch_length.to_string());
    }
}

fn push_label(label: &str, internal: bool, out: &mut String) {
    let needs_quotes = label.chars().any(|c| c.is_whitespace() || "()[]':;,".contains(c))
        || (internal && label.parse::<f64>().is_ok());
    if needs_quotes {
        out.push('\'');
        out.push_str(&label.replace('\'', "''"));
        out.push('\'');
    } else {
        out.push_str(label);
    }
}

/// Counts parentheses outside quotes and comments.
fn check_balance(text: &str) -> Result<(), ParseError> {
    let (mut open, mut close) = (0usize, 0usize);
    let mut chars = text.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        match c {
            '(' => open += 1,
            ')' => close += 1,
            '\'' => loop {
                match chars.next() {
                    Some((_, '\'')) if chars.peek().map(|&(_, n)| n) == Some('\'') => {
                        chars.next();
                    }
                    Some((_, '\'')) => break,
                    Some(_) => {}
                    None => return Err(ParseError::UnterminatedQuote { position: pos }),
                }
            },
            '[' => {
                if !chars.any(|(_, n)| n == ']') {
                    return Err(ParseError::UnterminatedComment { position: pos });
                }
            }
            _ => {}
        }
    }
    if open != close {
        return Err(ParseError::UnbalancedParentheses { open, close });
    }
    Ok(())
}

fn split_statements(text: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let (mut depth, mut start) = (0usize, 0usize);
    let (mut in_quote, mut in_comment) = (false, false);
    for (pos, c) in text.char_indices() {
        match c {
            '\'' if !in_comment => in_quote = !in_quote,
            '[' if !in_quote => in_comment = true,
            ']' if !in_quote => in_comment = false,
            _ if in_quote || in_comment => {}
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' | '\n' if depth == 0 => {
                let end = if c == ';' { pos + 1 } else { pos };
                if !text[start..end].trim().trim_end_matches(';').trim().is_empty() {
                    statements.push(&text[start..end]);
                }
                start = pos + 1;
            }
            _ => {}
        }
    }
    if !text[start..].trim().is_empty() {
        statements.push(&text[start..]);
    }
    statements
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Parser { text, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn unexpected(&self) -> ParseError {
        match self.peek() {
            Some(found) => ParseError::UnexpectedCharacter {
                found,
                position: self.pos,
            },
            None => ParseError::Empty,
        }
    }

    fn parse_tree(&mut self) -> Result<Topology, ParseError> {
        self.skip_whitespace();
        if matches!(self.peek(), None | Some(';')) {
            return Err(ParseError::Empty);
        }

        let mut topology = Topology::new();
        let mut open: Vec<NodeIndex> = Vec::new();
        let mut node = topology.root();

        'subtree: loop {
            self.skip_whitespace();
            if self.peek() == Some('(') {
                self.bump();
                open.push(node);
                node = topology.add_child(node, Node::default());
                continue 'subtree;
            }

            let (label, _) = self.read_label()?;
            if !label.is_empty() {
                topology.node_mut(node).label = Some(label);
            }

            loop {
                self.read_decorations(topology.node_mut(node))?;
                self.skip_whitespace();
                match self.peek() {
                    Some(',') => {
                        let parent = *open.last().ok_or_else(|| self.unexpected())?;
                        self.bump();
                        node = topology.add_child(parent, Node::default());
                        continue 'subtree;
                    }
                    Some(')') => {
                        node = open.pop().ok_or_else(|| self.unexpected())?;
                        self.bump();
                        let (label, quoted) = self.read_label()?;
                        if !label.is_empty() {
                            let target = topology.node_mut(node);
                            if !quoted && label.parse::<f64>().is_ok() {
                                target.branch_support = Some(label);
                            } else {
                                target.label = Some(label);
                            }
                        }
                    }
                    Some(';') | None if open.is_empty() => break 'subtree,
                    Some(';') | None => {
                        return Err(ParseError::UnbalancedParentheses {
                            open: open.len(),
                            close: 0,
                        });
                    }
                    Some(_) => return Err(self.unexpected()),
                }
            }
        }

        if self.peek() == Some(';') {
            self.bump();
        }
        self.skip_whitespace();
        if self.peek().is_some() {
            return Err(self.unexpected());
        }
        Ok(topology)
    }

    /// Reads a quoted or unquoted label, with whether it was quoted; the
    /// label is empty when absent.
    fn read_label(&mut self) -> Result<(String, bool), ParseError> {
        self.skip_whitespace();
        if self.peek() == Some('\'') {
            let start = self.pos;
            self.bump();
            let mut label = String::new();
            loop {
                match self.peek() {
                    Some('\'') => {
                        self.bump();
                        if self.peek() == Some('\'') {
                            label.push('\'');
                            self.bump();
                        } else {
                            return Ok((label, true));
                        }
                    }
                    Some(c) => {
                        label.push(c);
                        self.bump();
                    }
                    None => return Err(ParseError::UnterminatedQuote { position: start }),
                }
            }
        }
        Ok((self.read_token().trim().to_string(), false))
    }

    fn read_token(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|c| !DELIMITERS.contains(&c)) {
            self.bump();
        }
        &self.text[start..self.pos]
    }

    /// Reads any mix of `:length` and `[comment]` following a label.
    fn read_decorations(&mut self, node: &mut Node) -> Result<(), ParseError> {
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(':') => {
                    self.bump();
                    // BEAST writes `:[&rate=...]1.5`
                    loop {
                        self.skip_whitespace();
                        if self.peek() != Some('[') {
                            break;
                        }
                        self.read_comment(node)?;
                    }
                    let position = self.pos;
                    let token = self.read_token().trim();
                    node.branch_length = token.parse().map_err(|_| ParseError::InvalidBranchLength {
                        token: token.to_string(),
                        position,
                    })?;
                }
                Some('[') => self.read_comment(node)?,
                _ => return Ok(()),
            }
        }
    }

    fn read_comment(&mut self, node: &mut Node) -> Result<(), ParseError> {
        let start = self.pos;
        self.bump();
        let body_start = self.pos;
        while self.peek().is_some_and(|c| c != ']') {
            self.bump();
        }
        if self.peek().is_none() {
            return Err(ParseError::UnterminatedComment { position: start });
        }
        let body = self.text[body_start..self.pos].trim();
        self.bump();
        if !body.is_empty() && !body.starts_with('&') {
            node.branch_support = Some(body.to_string());
        }
        Ok(())
    }
}
