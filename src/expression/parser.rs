use std::{fmt, iter, rc::Rc};

use chumsky::{error::RichReason, input::ValueInput, pratt::*, prelude::*};

use crate::{value::format_number, ParseError, Value};

use super::{
    ast::{Ast, AstKind, BinaryOp, LogicalOp, UnaryOp},
    lexer::{lexer, Span, Spanned, Token},
};


type Extra<'code> = extra::Err<Rich<'code, Token<'code>, Span>>;

/// Words that cannot name a variable.
const RESERVED: &[&str] = &["true", "false", "null", "in", "instanceof", "typeof", "new"];

/// Parse expression source into an [`Ast`].
pub fn parse(source: &str) -> Result<Ast, ParseError> {
    parse_fragment(source, 0, source)
}

/// Parses `text`, which starts at byte `base` of `full`.
fn parse_fragment(text: &str, base: usize, full: &str) -> Result<Ast, ParseError> {
    let (tokens, errors) = lexer().parse(text).into_output_errors();
    if let Some(error) = errors.first() {
        return Err(to_parse_error(error, base, full));
    }
    let mut tokens = tokens.unwrap_or_default();
    let mut nested = None;
    for token in &mut tokens {
        token.span = Span::from(base + token.span.start..base + token.span.end);
        if let Token::Template(template) = &mut token.node {
            for &(at, source) in &template.sources {
                match parse_fragment(source, base + at, full) {
                    Ok(ast) => template.exprs.push(ast),
                    Err(e) => {
                        nested.get_or_insert(e);
                    }
                }
            }
        }
    }

    let end = base + text.len();
    let input = tokens.as_slice().map(Span::from(end..end), |Spanned { node, span }| (node, span));
    let outer = match parser().parse(input).into_result() {
        Ok(ast) => return nested.map_or(Ok(ast), Err),
        Err(errors) => errors.first().map_or_else(
            || ParseError::new(full, end, "unexpected end of input"),
            |e| to_parse_error(e, 0, full),
        ),
    };
    Err(match nested {
        Some(e) if e.offset < outer.offset => e,
        _ => outer,
    })
}

fn to_parse_error<T: fmt::Display>(error: &Rich<'_, T, Span>, base: usize, full: &str) -> ParseError {
    let message = match error.reason() {
        RichReason::Custom(message) => message.clone(),
        _ => match error.found() {
            Some(found) => format!("unexpected {found}"),
            None => "unexpected end of input".to_string(),
        },
    };
    ParseError::new(full, base + error.span().start, message)
}

enum Postfix {
    Member(Rc<str>, bool),
    Index(Ast, bool),
    Call(Vec<Ast>),
}

fn apply_postfix(target: Ast, (postfix, end): (Postfix, usize)) -> Ast {
    let span = target.span.start..end;
    let target = Box::new(target);
    let kind = match postfix {
        Postfix::Member(property, optional) => AstKind::Member {
            object: target,
            property,
            optional,
        },
        Postfix::Index(index, optional) => AstKind::Index {
            object: target,
            index: Box::new(index),
            optional,
        },
        Postfix::Call(args) => AstKind::Call { callee: target, args },
    };
    Ast { kind, span }
}

fn binary_node(left: Ast, op: BinaryOp, right: Ast) -> Ast {
    let span = left.span.start..right.span.end;
    Ast {
        kind: AstKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    }
}

fn logical_node(left: Ast, op: LogicalOp, right: Ast) -> Ast {
    let span = left.span.start..right.span.end;
    Ast {
        kind: AstKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    }
}

fn punct<'code, I>(p: &'static str) -> impl Parser<'code, I, Token<'code>, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    just(Token::Punct(p))
}

fn binary<'code, I>(ops: &'static [BinaryOp]) -> impl Parser<'code, I, BinaryOp, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    select! { Token::Binary(op) if ops.contains(&op) => op }
}

fn logical<'code, I>(ops: &'static [LogicalOp]) -> impl Parser<'code, I, LogicalOp, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    select! { Token::Logical(op) if ops.contains(&op) => op }
}

fn parser<'code, I>() -> impl Parser<'code, I, Ast, Extra<'code>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    recursive(|sequence| {
        let expr = recursive(move |expr| {
            let name = select! { Token::Ident(name) => Rc::<str>::from(name) };

            let literal = select! {
                Token::Number(n) => Value::Number(n),
                Token::Str(s) => Value::from(s),
                Token::Ident("true") => Value::Bool(true),
                Token::Ident("false") => Value::Bool(false),
                Token::Ident("null") => Value::Null,
            }
            .map(AstKind::Literal);
            let identifier = select! {
                Token::Ident(name) if !RESERVED.contains(&name) => AstKind::Identifier(name.into())
            };
            let template = select! {
                Token::Template(t) => AstKind::Template { quasis: t.quasis, exprs: t.exprs }
            };

            let items = expr
                .clone()
                .separated_by(punct(","))
                .allow_trailing()
                .collect::<Vec<_>>();
            let array = items
                .clone()
                .delimited_by(punct("["), punct("]"))
                .map(AstKind::Array);

            let key = select! {
                Token::Ident(key) => Rc::<str>::from(key),
                Token::Str(key) => Rc::<str>::from(key),
                Token::Number(n) => Rc::<str>::from(format_number(n)),
            };
            let shorthand = name.clone().map_with(|name, e| {
                let value = Ast {
                    kind: AstKind::Identifier(name.clone()),
                    span: Span::into_range(e.span()),
                };
                (name, value)
            });
            let object = choice((key.then_ignore(punct(":")).then(expr.clone()), shorthand))
                .separated_by(punct(","))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(punct("{"), punct("}"))
                .map(AstKind::Object);

            let primary = choice((literal, template, identifier, array, object))
                .map_with(|kind, e| Ast {
                    kind,
                    span: Span::into_range(e.span()),
                })
                .or(sequence
                    .clone()
                    .delimited_by(punct("("), punct(")"))
                    .map_with(|mut inner: Ast, e| {
                        inner.span = Span::into_range(e.span());
                        inner
                    }));

            let args = items.delimited_by(punct("("), punct(")"));
            let index = sequence.delimited_by(punct("["), punct("]"));
            let access = choice((
                punct(".")
                    .ignore_then(name.clone())
                    .map(|n| Postfix::Member(n, false)),
                punct("?.")
                    .ignore_then(name)
                    .map(|n| Postfix::Member(n, true)),
                punct("?.")
                    .ignore_then(index.clone())
                    .map(|i| Postfix::Index(i, true)),
                index.map(|i| Postfix::Index(i, false)),
            ))
            .map_with(|p, e| (p, { let span: Span = e.span(); span.end }));
            let call = punct("?.")
                .or_not()
                .ignore_then(args.clone())
                .map_with(|args, e| (Postfix::Call(args), { let span: Span = e.span(); span.end }));

            // The callee of `new` takes no calls, its argument list follows.
            let new = {
                let (primary, access, args) = (primary.clone(), access.clone(), args);
                recursive(move |new| {
                    just(Token::Ident("new"))
                        .ignore_then(choice((new, primary)).foldl(access.repeated(), apply_postfix))
                        .then(args.or_not())
                        .map_with(|(callee, args), e| Ast {
                            kind: AstKind::New {
                                callee: Box::new(callee),
                                args: args.unwrap_or_default(),
                            },
                            span: Span::into_range(e.span()),
                        })
                })
            };
            let operand = choice((new, primary)).foldl(choice((access, call)).repeated(), apply_postfix);

            let unary = choice((
                just(Token::Binary(BinaryOp::Sub)).to(UnaryOp::Neg),
                just(Token::Binary(BinaryOp::Add)).to(UnaryOp::Plus),
                punct("!").to(UnaryOp::Not),
                punct("~").to(UnaryOp::BitNot),
                just(Token::Ident("typeof")).to(UnaryOp::TypeOf),
            ))
            .map_with(|op, e| (op, { let span: Span = e.span(); span.start }));
            let relational = binary(&[BinaryOp::Lt, BinaryOp::Le, BinaryOp::Gt, BinaryOp::Ge]).or(select! {
                Token::Ident("in") => BinaryOp::In,
                Token::Ident("instanceof") => BinaryOp::InstanceOf,
            });
            let conditional = punct("?").ignore_then(expr).then_ignore(punct(":"));

            use BinaryOp::*;
            operand.pratt((
                prefix(13, unary, |(op, start): (UnaryOp, usize), operand: Ast, _| {
                    let span = start..operand.span.end;
                    Ast {
                        kind: AstKind::Unary {
                            op,
                            operand: Box::new(operand),
                        },
                        span,
                    }
                }),
                infix(right(12), binary(&[Exp]), |l, op, r, _| binary_node(l, op, r)),
                infix(left(11), binary(&[Mul, Div, Rem]), |l, op, r, _| binary_node(l, op, r)),
                infix(left(10), binary(&[Add, Sub]), |l, op, r, _| binary_node(l, op, r)),
                infix(left(9), binary(&[Shl, Shr, UShr]), |l, op, r, _| binary_node(l, op, r)),
                infix(left(8), relational, |l, op, r, _| binary_node(l, op, r)),
                infix(left(7), binary(&[Eq, Ne, StrictEq, StrictNe]), |l, op, r, _| {
                    binary_node(l, op, r)
                }),
                infix(left(6), binary(&[BitAnd]), |l, op, r, _| binary_node(l, op, r)),
                infix(left(5), binary(&[BitXor]), |l, op, r, _| binary_node(l, op, r)),
                infix(left(4), binary(&[BitOr]), |l, op, r, _| binary_node(l, op, r)),
                infix(left(3), logical(&[LogicalOp::And]), |l, op, r, _| {
                    logical_node(l, op, r)
                }),
                infix(left(2), logical(&[LogicalOp::Or, LogicalOp::Nullish]), |l, op, r, _| {
                    logical_node(l, op, r)
                }),
                infix(right(1), conditional, |test: Ast, consequent: Ast, alternate: Ast, _| {
                    let span = test.span.start..alternate.span.end;
                    Ast {
                        kind: AstKind::Conditional {
                            test: Box::new(test),
                            consequent: Box::new(consequent),
                            alternate: Box::new(alternate),
                        },
                        span,
                    }
                }),
            ))
        });

        expr.clone()
            .then(punct(",").ignore_then(expr).repeated().collect::<Vec<_>>())
            .map_with(|(first, rest), e| {
                if rest.is_empty() {
                    first
                } else {
                    Ast {
                        kind: AstKind::Sequence(iter::once(first).chain(rest).collect()),
                        span: Span::into_range(e.span()),
                    }
                }
            })
    })
}
