use std::{fmt, rc::Rc};

use chumsky::prelude::*;

use super::ast::{Ast, BinaryOp, LogicalOp};


pub(crate) type Span = SimpleSpan;
type LexExtra<'code> = extra::Err<Rich<'code, char>>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'code> {
    Number(f64),
    Str(String),
    Template(Template<'code>),
    Ident(&'code str),
    Binary(BinaryOp),
    Logical(LogicalOp),
    Punct(&'static str),
    Invalid(char),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Template<'code> {
    pub quasis: Vec<Rc<str>>,
    /// Substitution sources with their byte offsets in the lexed text.
    pub sources: Vec<(usize, &'code str)>,
    /// Parsed substitutions, filled in before the token stream is parsed.
    pub exprs: Vec<Ast>,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number `{n}`"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Template(_) => write!(f, "template"),
            Token::Ident(s) => write!(f, "token `{s}`"),
            Token::Binary(op) => write!(f, "token `{op}`"),
            Token::Logical(op) => write!(f, "token `{op}`"),
            Token::Punct(p) => write!(f, "token `{p}`"),
            Token::Invalid(c) => write!(f, "character `{c}`"),
        }
    }
}

enum Piece<'code> {
    Char(char),
    Source(usize, &'code str),
}

/// Tokenizes a whole source text.
///
/// Malformed input never stops the lexer. Each problem is emitted as a custom error and the
/// caller reports the first one.
pub(crate) fn lexer<'code>() -> impl Parser<'code, &'code str, Vec<Spanned<Token<'code>>>, LexExtra<'code>> {
    let hex = just('0')
        .then(one_of("xX"))
        .ignore_then(any().filter(char::is_ascii_hexdigit).repeated().to_slice())
        .validate(|digits: &str, e, emitter| {
            u64::from_str_radix(digits, 16)
                .map(|n| n as f64)
                .unwrap_or_else(|_| {
                    emitter.emit(Rich::custom(e.span(), "invalid hexadecimal literal"));
                    f64::NAN
                })
        });

    let decimal = choice((
        text::digits(10)
            .then(just('.').then(text::digits(10).or_not()).or_not())
            .ignored(),
        just('.').then(text::digits(10)).ignored(),
    ))
    .then(
        one_of("eE")
            .then(one_of("+-").or_not())
            .then(text::digits(10))
            .or_not(),
    )
    .to_slice()
    .validate(|s: &str, e, emitter| {
        s.parse().unwrap_or_else(|_| {
            emitter.emit(Rich::custom(e.span(), "invalid number literal"));
            f64::NAN
        })
    });

    let number = choice((hex, decimal))
        .then(
            any()
                .filter(|c: &char| is_ident_start(*c))
                .map_with(|_, e| e.span())
                .rewind()
                .or_not(),
        )
        .validate(|(n, trailing): (f64, Option<Span>), _, emitter| {
            if let Some(span) = trailing {
                emitter.emit(Rich::custom(span, "identifier directly after number"));
            }
            Token::Number(n)
        });

    let ident = any()
        .filter(|c: &char| is_ident_start(*c))
        .then(any().filter(|c: &char| is_ident_part(*c)).repeated())
        .to_slice()
        .map(Token::Ident);

    let substitution = recursive(|balanced| {
        choice((
            just('{').then(balanced).then(just('}')).ignored(),
            string('"').ignored(),
            string('\'').ignored(),
            none_of("{}\"'").ignored(),
        ))
        .repeated()
    });

    let template = just('`')
        .ignore_then(
            choice((
                just("${")
                    .ignore_then(
                        substitution
                            .to_slice()
                            .map_with(|source: &str, e| Piece::Source(e.span().start, source)),
                    )
                    .then_ignore(just('}')),
                choice((
                    escape(),
                    none_of("`\\$"),
                    just('$').and_is(just("${").not()),
                ))
                .map(Piece::Char),
            ))
            .repeated()
            .collect::<Vec<_>>(),
        )
        .then(just('`').or_not())
        .validate(|(pieces, close): (Vec<Piece>, Option<char>), e, emitter| {
            if close.is_none() {
                emitter.emit(Rich::custom(e.span(), "unterminated template literal"));
            }
            let mut template = Template::default();
            let mut quasi = String::new();
            for piece in pieces {
                match piece {
                    Piece::Char(c) => quasi.push(c),
                    Piece::Source(at, source) => {
                        template.quasis.push(std::mem::take(&mut quasi).into());
                        template.sources.push((at, source));
                    }
                }
            }
            template.quasis.push(quasi.into());
            Token::Template(template)
        });

    // Longer spellings first.
    let logical = choice((
        just("&&").to(LogicalOp::And),
        just("||").to(LogicalOp::Or),
        just("??").to(LogicalOp::Nullish),
    ))
    .map(Token::Logical);

    let binary = choice((
        just(">>>").to(BinaryOp::UShr),
        just("===").to(BinaryOp::StrictEq),
        just("!==").to(BinaryOp::StrictNe),
        just("**").to(BinaryOp::Exp),
        just("==").to(BinaryOp::Eq),
        just("!=").to(BinaryOp::Ne),
        just("<=").to(BinaryOp::Le),
        just(">=").to(BinaryOp::Ge),
        just("<<").to(BinaryOp::Shl),
        just(">>").to(BinaryOp::Shr),
        just('+').to(BinaryOp::Add),
        just('-').to(BinaryOp::Sub),
        just('*').to(BinaryOp::Mul),
        just('/').to(BinaryOp::Div),
        just('%').to(BinaryOp::Rem),
        just('&').to(BinaryOp::BitAnd),
        just('|').to(BinaryOp::BitOr),
        just('^').to(BinaryOp::BitXor),
        just('<').to(BinaryOp::Lt),
        just('>').to(BinaryOp::Gt),
    ))
    .map(Token::Binary);

    let punct = choice((
        // `a?.5:1` is a conditional.
        just("?.").then_ignore(any().filter(char::is_ascii_digit).not()).to("?."),
        just("?").to("?"),
        just(":").to(":"),
        just(",").to(","),
        just(".").to("."),
        just("(").to("("),
        just(")").to(")"),
        just("[").to("["),
        just("]").to("]"),
        just("{").to("{"),
        just("}").to("}"),
        just("!").to("!"),
        just("~").to("~"),
    ))
    .map(Token::Punct);

    let invalid = any().validate(|c: char, e, emitter| {
        emitter.emit(Rich::custom(e.span(), format!("unexpected character `{c}`")));
        Token::Invalid(c)
    });

    let token = choice((
        template,
        string('"'),
        string('\''),
        number,
        ident,
        logical,
        binary,
        punct,
        invalid,
    ));

    token
        .map_with(|node, e| Spanned {
            node,
            span: e.span(),
        })
        .padded()
        .repeated()
        .collect()
        .padded()
}

fn string<'code>(quote: char) -> impl Parser<'code, &'code str, Token<'code>, LexExtra<'code>> + Clone {
    just(quote)
        .ignore_then(
            choice((escape(), none_of([quote, '\\', '\n'])))
                .repeated()
                .collect::<String>(),
        )
        .then(just(quote).or_not())
        .validate(|(s, close): (String, Option<char>), e, emitter| {
            if close.is_none() {
                emitter.emit(Rich::custom(e.span(), "unterminated string literal"));
            }
            Token::Str(s)
        })
}

fn escape<'code>() -> impl Parser<'code, &'code str, char, LexExtra<'code>> + Clone {
    let unicode = just('u')
        .ignore_then(
            any()
                .filter(char::is_ascii_hexdigit)
                .repeated()
                .at_most(4)
                .to_slice(),
        )
        .validate(|hex: &str, e, emitter| {
            u32::from_str_radix(hex, 16)
                .ok()
                .filter(|_| hex.len() == 4)
                .and_then(char::from_u32)
                .unwrap_or_else(|| {
                    emitter.emit(Rich::custom(e.span(), "invalid unicode escape"));
                    char::REPLACEMENT_CHARACTER
                })
        });
    just('\\').ignore_then(choice((
        just('n').to('\n'),
        just('t').to('\t'),
        just('r').to('\r'),
        just('b').to('\u{8}'),
        just('f').to('\u{c}'),
        just('v').to('\u{b}'),
        just('0').to('\0'),
        unicode,
        any(),
    )))
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}
fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
