//! Tokens of the signature language.

use std::ops::Range;

use logos::Logos;

use crate::error::ParseError;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub(crate) enum Token {
    #[token("->")]
    Arrow,
    #[token("*")]
    Star,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("...")]
    Ellipsis,
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

pub(crate) fn tokenize(text: &str) -> Result<Vec<(Token, Range<usize>)>, ParseError> {
    Token::lexer(text)
        .spanned()
        .map(|(token, span)| match token {
            Ok(token) => Ok((token, span)),
            Err(()) => Err(ParseError::new(
                text,
                format!("unexpected character at offset {}", span.start),
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<Token> {
        tokenize(text).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_signature_tokens() {
        assert_eq!(
            kinds("... * N * int64 -> ?int64"),
            vec![
                Token::Ellipsis,
                Token::Star,
                Token::Ident("N".into()),
                Token::Star,
                Token::Ident("int64".into()),
                Token::Arrow,
                Token::Question,
                Token::Ident("int64".into()),
            ]
        );
    }

    #[test]
    fn test_var_ellipsis_tokens() {
        assert_eq!(
            kinds("var... * 3 * {a: bool}"),
            vec![
                Token::Ident("var".into()),
                Token::Ellipsis,
                Token::Star,
                Token::Int(3),
                Token::Star,
                Token::LBrace,
                Token::Ident("a".into()),
                Token::Colon,
                Token::Ident("bool".into()),
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("N * int64 & x").unwrap_err();
        assert!(err.message.contains("offset 10"));
    }
}
