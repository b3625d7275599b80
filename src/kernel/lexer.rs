//! Lexer for the cell language using logos.

use logos::Logos;

fn unescape(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            other @ ('\\' | '"' | '\'') => out.push(other),
            _ => return None,
        }
    }
    Some(out)
}

/// Token types for the cell language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // Keywords
    #[token("fn")]
    Fn,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("import")]
    Import,
    #[token("as")]
    As,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("none")]
    NoneLit,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token("\n")]
    Newline,

    // Operators
    #[token("=")]
    Assign,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // Literals
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, unescape)]
    #[regex(r"'([^'\\\n]|\\.)*'", unescape)]
    Str(String),
}

/// Lexer error with position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// 1-based line of the offending input
    pub line: usize,
    /// The text that could not be tokenized
    pub snippet: String,
}

/// Tokenize `source` into `(token, line)` pairs.
///
/// Newlines inside `(...)` and `[...]` are dropped so that call arguments and
/// list literals may span lines.
///
/// # Errors
/// Returns the first position that does not form a token
pub fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, LexError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);
    let mut line = 1;
    let mut consumed = 0;
    let mut nesting = 0usize;

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        line += source[consumed..span.start].matches('\n').count();
        consumed = span.start;

        match result {
            Ok(token) => {
                match token {
                    Token::LParen | Token::LBracket => nesting += 1,
                    Token::RParen | Token::RBracket => nesting = nesting.saturating_sub(1),
                    Token::Newline if nesting > 0 => continue,
                    _ => {}
                }
                tokens.push((token, line));
            }
            Err(()) => {
                return Err(LexError {
                    line,
                    snippet: source[span].to_string(),
                });
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("fn format(x)"),
            vec![
                Token::Fn,
                Token::Ident("format".to_string()),
                Token::LParen,
                Token::Ident("x".to_string()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 3e2"),
            vec![Token::Int(1), Token::Float(2.5), Token::Float(300.0)]
        );
    }

    #[test]
    fn test_strings_with_escapes() {
        assert_eq!(
            kinds(r#""a\"b" 'c\n'"#),
            vec![Token::Str("a\"b".to_string()), Token::Str("c\n".to_string())]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(kinds("x # comment"), vec![Token::Ident("x".to_string())]);
    }

    #[test]
    fn test_newlines_inside_parens_dropped() {
        let tokens = kinds("f(1,\n 2)\ng");
        assert_eq!(
            tokens.iter().filter(|t| **t == Token::Newline).count(),
            1
        );
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a\n\nb").unwrap();
        assert_eq!(tokens.last().unwrap().1, 3);
    }

    #[test]
    fn test_unknown_character() {
        let err = tokenize("x = 1\ny = $").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.snippet, "$");
    }
}
