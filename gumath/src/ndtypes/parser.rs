//! Recursive-descent parser for types and signatures.

use std::ops::Range;

use super::lexer::{tokenize, Token};
use super::{Field, FunctionSig, ScalarKind, Type, Typedefs};
use crate::error::ParseError;

/// Parse `in, ... -> out, ...`.
pub(crate) fn parse_signature(text: &str, typedefs: &Typedefs) -> Result<FunctionSig, ParseError> {
    let mut parser = Parser::new(text, typedefs)?;
    let ins = parser.parse_type_list()?;
    parser.expect(Token::Arrow, "`->`")?;
    let outs = parser.parse_type_list()?;
    parser.expect_end()?;
    Ok(FunctionSig { ins, outs })
}

/// Parse a single type.
pub(crate) fn parse_type(text: &str, typedefs: &Typedefs) -> Result<Type, ParseError> {
    let mut parser = Parser::new(text, typedefs)?;
    let ty = parser.parse_type(true)?;
    parser.expect_end()?;
    Ok(ty)
}

impl Type {
    /// Parse a type expression, resolving `typedefs`.
    pub fn parse(text: &str, typedefs: &Typedefs) -> Result<Type, ParseError> {
        parse_type(text, typedefs)
    }
}

struct Parser<'src> {
    text: &'src str,
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    typedefs: &'src Typedefs,
}

/// Which kind of dimensions a type has seen so far.
#[derive(Clone, Copy, PartialEq)]
enum DimMode {
    Unknown,
    Fixed,
    Var,
}

impl<'src> Parser<'src> {
    fn new(text: &'src str, typedefs: &'src Typedefs) -> Result<Self, ParseError> {
        Ok(Self {
            text,
            tokens: tokenize(text)?,
            pos: 0,
            typedefs,
        })
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn check(&self, token: &Token) -> bool {
        self.current() == Some(token)
    }

    fn try_consume(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ParseError> {
        if self.try_consume(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.current() {
            None => Ok(()),
            Some(_) => Err(self.error("unexpected trailing input")),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let message = message.into();
        let at = match self.tokens.get(self.pos) {
            Some((_, span)) => format!("{message} at offset {}", span.start),
            None => format!("{message} at end of input"),
        };
        ParseError::new(self.text, at)
    }

    fn parse_type_list(&mut self) -> Result<Vec<Type>, ParseError> {
        let mut types = vec![self.parse_type(true)?];
        while self.try_consume(&Token::Comma) {
            types.push(self.parse_type(true)?);
        }
        Ok(types)
    }

    fn parse_type(&mut self, outermost: bool) -> Result<Type, ParseError> {
        let mut mode = DimMode::Unknown;
        self.parse_dims(outermost, &mut mode)
    }

    fn parse_dims(&mut self, outermost: bool, mode: &mut DimMode) -> Result<Type, ParseError> {
        match self.current().cloned() {
            Some(Token::Int(shape)) => {
                self.advance();
                self.expect(Token::Star, "`*` after dimension")?;
                self.set_mode(mode, DimMode::Fixed)?;
                let elem = self.parse_dims(false, mode)?;
                Ok(Type::fixed(shape, elem))
            }
            Some(Token::Ellipsis) => {
                self.require_outermost(outermost)?;
                self.advance();
                self.expect(Token::Star, "`*` after ellipsis")?;
                self.set_mode(mode, DimMode::Fixed)?;
                let elem = self.parse_dims(false, mode)?;
                Ok(Type::Ellipsis { name: None, var: false, elem: Box::new(elem) })
            }
            Some(Token::Ident(name)) if name == "var" => {
                self.advance();
                let var_ellipsis = self.try_consume(&Token::Ellipsis);
                if var_ellipsis {
                    self.require_outermost(outermost)?;
                }
                self.expect(Token::Star, "`*` after var")?;
                self.set_mode(mode, DimMode::Var)?;
                let elem = Box::new(self.parse_dims(false, mode)?);
                if var_ellipsis {
                    Ok(Type::Ellipsis { name: None, var: true, elem })
                } else {
                    Ok(Type::VarDim { offsets: None, elem })
                }
            }
            Some(Token::Ident(name)) if starts_upper(&name) => {
                match self.peek(1) {
                    Some(Token::Ellipsis) => {
                        self.require_outermost(outermost)?;
                        self.advance();
                        self.advance();
                        self.expect(Token::Star, "`*` after ellipsis")?;
                        self.set_mode(mode, DimMode::Fixed)?;
                        let elem = self.parse_dims(false, mode)?;
                        Ok(Type::Ellipsis { name: Some(name), var: false, elem: Box::new(elem) })
                    }
                    Some(Token::Star) => {
                        self.advance();
                        self.advance();
                        self.set_mode(mode, DimMode::Fixed)?;
                        let elem = self.parse_dims(false, mode)?;
                        Ok(Type::SymbolicDim { name, elem: Box::new(elem) })
                    }
                    _ => {
                        self.advance();
                        Ok(Type::Typevar(name))
                    }
                }
            }
            _ => self.parse_dtype(),
        }
    }

    fn parse_dtype(&mut self) -> Result<Type, ParseError> {
        match self.current().cloned() {
            Some(Token::Question) => {
                self.advance();
                let inner = self.parse_dtype()?;
                if matches!(inner, Type::Option(_)) {
                    return Err(self.error("nested option types are not supported"));
                }
                Ok(Type::Option(Box::new(inner)))
            }
            Some(Token::LBrace) => {
                self.advance();
                let mut fields = Vec::new();
                if !self.check(&Token::RBrace) {
                    loop {
                        fields.push(self.parse_field()?);
                        if !self.try_consume(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Token::RBrace, "`}`")?;
                Ok(Type::Record(fields))
            }
            Some(Token::Ident(name)) => {
                if let Some(kind) = ScalarKind::from_name(&name) {
                    self.advance();
                    Ok(Type::Scalar(kind))
                } else if name == "string" {
                    self.advance();
                    Ok(Type::String)
                } else if starts_upper(&name) {
                    self.advance();
                    Ok(Type::Typevar(name))
                } else if let Some(ty) = self.typedefs.get(&name) {
                    self.advance();
                    Ok(ty.clone())
                } else {
                    Err(self.error(format!("unknown type `{name}`")))
                }
            }
            _ => Err(self.error("expected a type")),
        }
    }

    fn parse_field(&mut self) -> Result<Field, ParseError> {
        let name = match self.current().cloned() {
            Some(Token::Ident(name)) => name,
            _ => return Err(self.error("expected a field name")),
        };
        self.advance();
        self.expect(Token::Colon, "`:` after field name")?;
        let ty = self.parse_dtype()?;
        Ok(Field { name, ty })
    }

    fn require_outermost(&self, outermost: bool) -> Result<(), ParseError> {
        if outermost {
            Ok(())
        } else {
            Err(self.error("ellipsis must be the outermost dimension"))
        }
    }

    fn set_mode(&self, mode: &mut DimMode, next: DimMode) -> Result<(), ParseError> {
        match *mode {
            DimMode::Unknown => {
                *mode = next;
                Ok(())
            }
            current if current == next => Ok(()),
            _ => Err(self.error("cannot mix fixed and var dimensions")),
        }
    }
}

fn starts_upper(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> Type {
        parse_type(text, &Typedefs::default()).unwrap()
    }

    #[test]
    fn test_fixed_dims() {
        let t = parse("2 * 3 * float64");
        assert_eq!(t.fixed_dims(), Some(vec![(2, 3), (3, 1)]));
        assert_eq!(t.dtype(), &Type::Scalar(ScalarKind::Float64));
    }

    #[test]
    fn test_symbolic_and_typevar() {
        let t = parse("N * T");
        assert_eq!(
            t,
            Type::SymbolicDim {
                name: "N".into(),
                elem: Box::new(Type::Typevar("T".into())),
            }
        );
    }

    #[test]
    fn test_named_ellipsis() {
        let t = parse("Dims... * int8");
        assert!(matches!(t, Type::Ellipsis { name: Some(ref n), var: false, .. } if n == "Dims"));
        assert_eq!(t.to_string(), "Dims... * int8");
    }

    #[test]
    fn test_record_with_option_and_string() {
        let t = parse("{index: int64, name: string, value: ?int64}");
        let Type::Record(fields) = &t else {
            panic!("expected record, got {t:?}");
        };
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].ty, Type::String);
        assert_eq!(fields[2].ty, Type::Option(Box::new(Type::Scalar(ScalarKind::Int64))));
    }

    #[test]
    fn test_signature_arity() {
        let sig = parse_signature("... * N * int64, ... * int64 -> ... * N * int64", &Typedefs::default())
            .unwrap();
        assert_eq!(sig.nin(), 2);
        assert_eq!(sig.nout(), 1);
    }

    #[test]
    fn test_typedef_resolution() {
        let mut typedefs = Typedefs::default();
        typedefs.insert("pair".into(), parse("{a: int32, b: int32}"));
        let t = parse_type("N * pair", &typedefs).unwrap();
        assert_eq!(t.dtype().datasize(), 8);
    }

    #[test]
    fn test_errors() {
        let defs = Typedefs::default();
        assert!(parse_type("N * ... * int64", &defs).unwrap_err().message.contains("outermost"));
        assert!(parse_type("var * 3 * int64", &defs).unwrap_err().message.contains("mix"));
        assert!(parse_type("int128", &defs).unwrap_err().message.contains("unknown type"));
        assert!(parse_type("3 * int64 int64", &defs).unwrap_err().message.contains("trailing"));
        assert!(parse_signature("int64", &defs).unwrap_err().message.contains("`->`"));
        assert!(parse_type("??int64", &defs).is_err());
    }
}
