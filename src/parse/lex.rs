//! Tokenizing P8X32A assembly.
//!
//! Source text is consumed in two layers:
//! - [`Lines`] splits the source into logical lines, dropping `\r`, blank lines
//!   and the content of comments (block comments may span several lines).
//! - [`TokenStream`] splits one logical line into [`Token`]s, with one token of lookahead.
//!
//! Separators are spaces, tabs, commas and line breaks.
//! A token is either a maximal run of operator characters (`+ - * / =`)
//! or a maximal run of anything else.

use logos::{Lexer, Logos};

use super::Syntax;

/// A unit of information in P8X32A source code.
#[derive(Debug, Logos, PartialEq, Eq, Clone, Copy)]
#[logos(skip r"[ ,\t\r\n]+", error = LexErr)]
pub enum Token<'s> {
    /// A run of operator characters (e.g. `+`, `=`, `*-`).
    #[regex(r"[+\-*/=]+", |lx| lx.slice())]
    Op(&'s str),

    /// Anything else: mnemonics, labels, numbers, flags, comment starts.
    #[regex(r"[^ ,\t\r\n+\-*/=]+", |lx| lx.slice())]
    Word(&'s str),
}
impl<'s> Token<'s> {
    /// The text of this token.
    pub fn as_str(&self) -> &'s str {
        match *self {
            Token::Op(s) | Token::Word(s) => s,
        }
    }
}
impl std::fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any errors raised in attempting to tokenize an input stream.
///
/// Every character is either a separator or part of a token,
/// so this can only come up if the lexer is handed input it was not built for.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum LexErr {
    /// A symbol could not be matched by any token.
    #[default]
    InvalidSymbol,
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::InvalidSymbol => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {}

/// Tokens of a single line, with one token of lookahead.
pub struct TokenStream<'s> {
    lexer: Lexer<'s, Token<'s>>,
    peeked: Option<Option<Result<Token<'s>, LexErr>>>,
}
impl<'s> TokenStream<'s> {
    /// Creates a token stream over one line.
    pub fn new(line: &'s str) -> Self {
        Self { lexer: Token::lexer(line), peeked: None }
    }

    /// Looks at the next token without consuming it.
    ///
    /// Returns `Ok(None)` at the end of the line.
    pub fn peek(&mut self) -> Result<Option<Token<'s>>, LexErr> {
        let lexer = &mut self.lexer;
        self.peeked.get_or_insert_with(|| lexer.next()).transpose()
    }

    /// Consumes the next token.
    ///
    /// Returns `Ok(None)` at the end of the line.
    pub fn next(&mut self) -> Result<Option<Token<'s>>, LexErr> {
        match self.peeked.take() {
            Some(t) => t.transpose(),
            None => self.lexer.next().transpose(),
        }
    }

    /// If the next token is a word starting with `prefix`, strips the prefix off it
    /// and returns `true`.
    ///
    /// A word consisting only of the prefix is consumed entirely,
    /// so the token after it becomes the next token.
    pub fn strip_prefix(&mut self, prefix: char) -> Result<bool, LexErr> {
        let Some(Token::Word(word)) = self.peek()? else { return Ok(false) };
        let Some(rest) = word.strip_prefix(prefix) else { return Ok(false) };

        if rest.is_empty() {
            self.next()?;
        } else {
            self.peeked = Some(Some(Ok(Token::Word(rest))));
        }
        Ok(true)
    }
}

/// A logical line of source, with comments removed.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Line {
    /// 1-based line number in the source.
    pub number: usize,
    /// The line's text.
    pub text: String,
}

/// Iterator over the logical lines of a source file.
///
/// Block comments are tracked across lines,
/// so a line that is entirely inside a block comment is skipped.
///
/// # Example
/// ```
/// use ppasm::parse::Syntax;
/// use ppasm::parse::lex::Lines;
///
/// let src = "mov a, b ' copy\n{ skipped\n}\nadd a, #1";
/// let lines: Vec<_> = Lines::new(src, &Syntax::PARALLAX).map(|l| (l.number, l.text)).collect();
/// assert_eq!(lines, [(1, "mov a, b ".to_string()), (4, "add a, #1".to_string())]);
/// ```
pub struct Lines<'s> {
    src: std::str::Lines<'s>,
    syntax: &'s Syntax,
    number: usize,
    in_block: bool,
}
impl<'s> Lines<'s> {
    /// Creates a line reader over the given source.
    pub fn new(src: &'s str, syntax: &'s Syntax) -> Self {
        Self { src: src.lines(), syntax, number: 0, in_block: false }
    }

    fn strip(&mut self, raw: &str) -> String {
        let (begin, end) = self.syntax.block_comment;
        let mut text = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(c) = rest.chars().next() {
            if self.in_block {
                match rest.strip_prefix(end) {
                    Some(r) => { self.in_block = false; rest = r; },
                    None => rest = &rest[c.len_utf8()..],
                }
            } else if rest.starts_with(self.syntax.line_comment) {
                break;
            } else if let Some(r) = rest.strip_prefix(begin) {
                self.in_block = true;
                rest = r;
            } else {
                if c != '\r' { text.push(c); }
                rest = &rest[c.len_utf8()..];
            }
        }

        text
    }
}
impl Iterator for Lines<'_> {
    type Item = Line;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.src.next()?;
            self.number += 1;

            let text = self.strip(raw);
            if !text.chars().all(|c| matches!(c, ' ' | ',' | '\t')) {
                return Some(Line { number: self.number, text });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use crate::parse::Syntax;

    use super::{LexErr, Lines, Token, TokenStream};

    fn word(s: &str) -> Token<'_> {
        Token::Word(s)
    }
    fn op(s: &str) -> Token<'_> {
        Token::Op(s)
    }
    fn texts(src: &str, syntax: &Syntax) -> Vec<String> {
        Lines::new(src, syntax).map(|l| l.text).collect()
    }

    #[test]
    fn test_separators() {
        let tokens = Token::lexer("mov\tdira,  #1 ,,x")
            .collect::<Result<Vec<_>, LexErr>>();
        assert_eq!(tokens, Ok(vec![word("mov"), word("dira"), word("#1"), word("x")]));
    }

    #[test]
    fn test_operators() {
        let tokens = Token::lexer("a+b-$10*c/2 x=5 y +- z")
            .collect::<Result<Vec<_>, LexErr>>();
        assert_eq!(tokens, Ok(vec![
            word("a"), op("+"), word("b"), op("-"), word("$10"), op("*"), word("c"), op("/"), word("2"),
            word("x"), op("="), word("5"),
            word("y"), op("+-"), word("z"),
        ]));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut stream = TokenStream::new("add a, b");
        assert_eq!(stream.peek(), Ok(Some(word("add"))));
        assert_eq!(stream.peek(), Ok(Some(word("add"))));
        assert_eq!(stream.next(), Ok(Some(word("add"))));
        assert_eq!(stream.next(), Ok(Some(word("a"))));
        assert_eq!(stream.peek(), Ok(Some(word("b"))));
        assert_eq!(stream.next(), Ok(Some(word("b"))));
        assert_eq!(stream.peek(), Ok(None));
        assert_eq!(stream.next(), Ok(None));
    }

    #[test]
    fn test_strip_prefix() {
        let mut stream = TokenStream::new("#label # other x");
        assert_eq!(stream.strip_prefix('#'), Ok(true));
        assert_eq!(stream.next(), Ok(Some(word("label"))));

        // a lone prefix is dropped entirely
        assert_eq!(stream.strip_prefix('#'), Ok(true));
        assert_eq!(stream.next(), Ok(Some(word("other"))));

        assert_eq!(stream.strip_prefix('#'), Ok(false));
        assert_eq!(stream.next(), Ok(Some(word("x"))));
        assert_eq!(stream.strip_prefix('#'), Ok(false));
    }

    #[test]
    fn test_block_comments() {
        let src = "\n\nli{XXX}ne1\n\rline2\nmulti-{\nXXX}line3";
        assert_eq!(texts(src, &Syntax::PARALLAX), ["line1", "line2", "multi-", "line3"]);

        let src = "\n\nli/*XXX*/ne1\n\rline2\nmulti-/*\nXXX*/line3";
        assert_eq!(texts(src, &Syntax::C), ["line1", "line2", "multi-", "line3"]);
    }

    #[test]
    fn test_block_comment_state() {
        let syntax = Syntax::PARALLAX;
        let mut lines = Lines::new("a {\nb\nc } d", &syntax);
        assert_eq!(lines.next().map(|l| l.text), Some("a ".to_string()));
        assert_eq!(lines.next().map(|l| (l.number, l.text)), Some((3, " d".to_string())));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_line_comments() {
        let src = "' whole line\nmov a, b ' trailing { not a block\nnext";
        assert_eq!(texts(src, &Syntax::PARALLAX), ["mov a, b ", "next"]);

        let src = "// whole line\nmov a, b // trailing\nnext";
        assert_eq!(texts(src, &Syntax::C), ["mov a, b ", "next"]);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let syntax = Syntax::PARALLAX;
        let lines = Lines::new("\r\n  \t\n, ,\nnop\r\n\n", &syntax)
            .map(|l| (l.number, l.text))
            .collect::<Vec<_>>();
        assert_eq!(lines, [(4, "nop".to_string())]);
    }
}
