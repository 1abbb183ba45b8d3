//! Query-language parser.
//!
//! Whitespace-insensitive outside quoted strings. The boolean keywords are
//! uppercase and out-prioritize identifiers, so `ANDy` is a search term
//! while `AND` is always a connective.

use super::ast::{Ast, CompareOp, Field, Scalar};
use crate::error::{Error, Result};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while_m_n},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{all_consuming, map, opt, recognize, verify},
    error::{ErrorKind, ParseError},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

const KEYWORDS: &[&str] = &["AND", "OR", "NOT"];

/// Parse a query string into its syntax tree.
///
/// The caller is expected to have short-circuited empty input (an empty
/// query matches everything and never reaches the grammar).
pub fn parse_query(input: &str) -> Result<Ast> {
    match all_consuming(delimited(multispace0, expr, multispace0))(input) {
        Ok((_, ast)) => Ok(ast),
        Err(_) => Err(Error::QuerySyntax(
            "input does not match the filter grammar".into(),
        )),
    }
}

// expr ::= term ("OR" term)*
fn expr(input: &str) -> IResult<&str, Ast> {
    let (mut input, mut node) = term(input)?;
    while let Ok((rest, _)) = keyword("OR")(input) {
        let (rest, rhs) = term(rest)?;
        node = Ast::Or(Box::new(node), Box::new(rhs));
        input = rest;
    }
    Ok((input, node))
}

// term ::= factor ("AND" factor)*
fn term(input: &str) -> IResult<&str, Ast> {
    let (mut input, mut node) = factor(input)?;
    while let Ok((rest, _)) = keyword("AND")(input) {
        let (rest, rhs) = factor(rest)?;
        node = Ast::And(Box::new(node), Box::new(rhs));
        input = rest;
    }
    Ok((input, node))
}

// factor ::= "NOT" item | item
fn factor(input: &str) -> IResult<&str, Ast> {
    if let Ok((rest, _)) = keyword("NOT")(input) {
        let (rest, inner) = item(rest)?;
        return Ok((rest, Ast::Not(Box::new(inner))));
    }
    item(input)
}

// item ::= "(" expr ")" | comparison | global_search
fn item(input: &str) -> IResult<&str, Ast> {
    preceded(multispace0, alt((parens, comparison, global_search)))(input)
}

fn parens(input: &str) -> IResult<&str, Ast> {
    delimited(
        char('('),
        delimited(multispace0, expr, multispace0),
        char(')'),
    )(input)
}

// comparison ::= field OP value?   (value optional, e.g. "last_edited_at:")
fn comparison(input: &str) -> IResult<&str, Ast> {
    map(
        tuple((
            field,
            preceded(multispace0, compare_op),
            opt(preceded(multispace0, scalar_value)),
        )),
        |(field, op, value)| Ast::Comparison { field, op, value },
    )(input)
}

// field ::= IDENT ("." IDENT)*
fn field(input: &str) -> IResult<&str, Field> {
    map(
        separated_list1(
            delimited(multispace0, char('.'), multispace0),
            non_keyword_ident,
        ),
        |parts| Field::new(parts.into_iter().map(String::from).collect()),
    )(input)
}

fn global_search(input: &str) -> IResult<&str, Ast> {
    map(scalar_value, |scalar| {
        let quoted = matches!(&scalar, Scalar::Text { quoted: true, .. });
        Ast::GlobalSearch {
            value: scalar.as_text(),
            quoted,
        }
    })(input)
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        map(tag(">="), |_| CompareOp::Ge),
        map(tag("<="), |_| CompareOp::Le),
        map(tag("!="), |_| CompareOp::Ne),
        map(tag("=~"), |_| CompareOp::Regex),
        map(tag("!~"), |_| CompareOp::NotRegex),
        map(tag("="), |_| CompareOp::Eq),
        map(tag(">"), |_| CompareOp::Gt),
        map(tag("<"), |_| CompareOp::Lt),
        map(tag(":"), |_| CompareOp::Has),
    ))(input)
}

// value ::= STRING | NUMBER | "*" | IDENT
fn scalar_value(input: &str) -> IResult<&str, Scalar> {
    alt((
        map(string_literal, |s| Scalar::text(s, true)),
        number,
        map(char('*'), |_| Scalar::text("*", false)),
        map(non_keyword_ident, |s| Scalar::text(s, false)),
    ))(input)
}

/// `[A-Za-z_][A-Za-z0-9_-]*`
fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while_m_n(1, 1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
    ))(input)
}

fn non_keyword_ident(input: &str) -> IResult<&str, &str> {
    verify(ident, |s: &str| !KEYWORDS.contains(&s))(input)
}

/// An uppercase keyword followed by a non-identifier character (or end of
/// input), with leading whitespace allowed.
fn keyword(kw: &'static str) -> impl Fn(&str) -> IResult<&str, ()> {
    move |input: &str| {
        let (rest, _) = multispace0(input)?;
        let (rest, _) = tag(kw)(rest)?;
        if rest
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(nom::Err::Error(nom::error::Error::from_error_kind(
                input,
                ErrorKind::Tag,
            )));
        }
        Ok((rest, ()))
    }
}

fn number(input: &str) -> IResult<&str, Scalar> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        digit1,
        opt(preceded(char('.'), digit1)),
    )))(input)?;

    let scalar = if text.contains('.') {
        match text.parse::<f64>() {
            Ok(f) => Scalar::Float(f),
            Err(_) => {
                return Err(nom::Err::Error(nom::error::Error::from_error_kind(
                    input,
                    ErrorKind::Float,
                )))
            }
        }
    } else {
        match text.parse::<i64>() {
            Ok(n) => Scalar::Int(n),
            // Out of i64 range; keep the digits as text and let the
            // database coerce.
            Err(_) => Scalar::text(text, false),
        }
    };

    Ok((rest, scalar))
}

/// Single- or double-quoted string with backslash escapes.
fn string_literal(input: &str) -> IResult<&str, String> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, c @ ('"' | '\''))) => c,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::from_error_kind(
                input,
                ErrorKind::Char,
            )))
        }
    };

    let mut out = String::new();
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok((&input[i + c.len_utf8()..], out));
        } else {
            out.push(c);
        }
    }

    // Unterminated string
    Err(nom::Err::Error(nom::error::Error::from_error_kind(
        input,
        ErrorKind::Char,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn comparison_parts(ast: &Ast) -> (&Field, CompareOp, Option<&Scalar>) {
        match ast {
            Ast::Comparison { field, op, value } => (field, *op, value.as_ref()),
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_comparison() {
        let ast = parse_query("detector:IDEA").unwrap();
        let (field, op, value) = comparison_parts(&ast);
        assert_eq!(field.parts, vec!["detector"]);
        assert_eq!(op, CompareOp::Has);
        assert_eq!(value, Some(&Scalar::text("IDEA", false)));
    }

    #[test]
    fn test_and_with_metadata_path() {
        let ast = parse_query("detector:IDEA AND metadata.energy > 100").unwrap();
        let Ast::And(left, right) = ast else {
            panic!("expected AND");
        };
        let (field, _, _) = comparison_parts(&left);
        assert_eq!(field.base(), "detector");

        let (field, op, value) = comparison_parts(&right);
        assert_eq!(field.parts, vec!["metadata", "energy"]);
        assert_eq!(op, CompareOp::Gt);
        assert_eq!(value, Some(&Scalar::Int(100)));
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        let ast = parse_query("a=1 OR b=2 AND c=3").unwrap();
        let Ast::Or(_, right) = ast else {
            panic!("expected OR at the top");
        };
        assert!(matches!(*right, Ast::And(_, _)));
    }

    #[test]
    fn test_parens_override_precedence() {
        let ast = parse_query("(a=1 OR b=2) AND c=3").unwrap();
        let Ast::And(left, _) = ast else {
            panic!("expected AND at the top");
        };
        assert!(matches!(*left, Ast::Or(_, _)));
    }

    #[test]
    fn test_not() {
        let ast = parse_query("NOT status:done").unwrap();
        assert!(matches!(ast, Ast::Not(_)));
    }

    #[test]
    fn test_comparison_without_value() {
        let ast = parse_query("last_edited_at:").unwrap();
        let (field, op, value) = comparison_parts(&ast);
        assert_eq!(field.base(), "last_edited_at");
        assert_eq!(op, CompareOp::Has);
        assert_eq!(value, None);
    }

    #[test]
    fn test_existence_wildcard() {
        let ast = parse_query("metadata.energy:*").unwrap();
        let (_, op, value) = comparison_parts(&ast);
        assert_eq!(op, CompareOp::Has);
        assert!(value.unwrap().is_star());
    }

    #[test]
    fn test_global_search_tracks_quoting() {
        let ast = parse_query("\"higgs sample\"").unwrap();
        assert_eq!(
            ast,
            Ast::GlobalSearch {
                value: "higgs sample".into(),
                quoted: true
            }
        );

        let ast = parse_query("higgs").unwrap();
        assert_eq!(
            ast,
            Ast::GlobalSearch {
                value: "higgs".into(),
                quoted: false
            }
        );
    }

    #[test]
    fn test_single_quoted_string() {
        let ast = parse_query("name = 'z h'").unwrap();
        let (_, _, value) = comparison_parts(&ast);
        assert_eq!(value, Some(&Scalar::text("z h", true)));
    }

    #[test]
    fn test_string_escapes() {
        let ast = parse_query(r#"name = "a\"b""#).unwrap();
        let (_, _, value) = comparison_parts(&ast);
        assert_eq!(value, Some(&Scalar::text("a\"b", true)));
    }

    #[test]
    fn test_negative_and_decimal_numbers() {
        let ast = parse_query("metadata.weight >= -2.5").unwrap();
        let (_, op, value) = comparison_parts(&ast);
        assert_eq!(op, CompareOp::Ge);
        assert_eq!(value, Some(&Scalar::Float(-2.5)));
    }

    #[test]
    fn test_regex_operators() {
        let (_, op, _) = comparison_parts(&parse_query("detector =~ IDEA-v2").unwrap());
        assert_eq!(op, CompareOp::Regex);
        let (_, op, _) = comparison_parts(&parse_query("detector !~ CLD").unwrap());
        assert_eq!(op, CompareOp::NotRegex);
    }

    #[test]
    fn test_hyphenated_identifier() {
        let ast = parse_query("cross-section > 3").unwrap();
        let (field, _, _) = comparison_parts(&ast);
        assert_eq!(field.base(), "cross-section");
    }

    #[test]
    fn test_keyword_prefix_is_an_identifier() {
        let ast = parse_query("ANDy").unwrap();
        assert!(matches!(ast, Ast::GlobalSearch { ref value, .. } if value == "ANDy"));
    }

    #[test]
    fn test_free_text_is_rejected() {
        assert!(parse_query("foo bar baz").is_err());
        assert!(parse_query("name = AND").is_err());
        assert!(parse_query("((broken").is_err());
        assert!(parse_query("\"unterminated").is_err());
    }

    #[test]
    fn test_empty_input_is_rejected_here() {
        // The executor short-circuits empty queries; at the grammar level
        // they are not acceptable.
        assert!(parse_query("").is_err());
        assert!(parse_query("   ").is_err());
    }
}
