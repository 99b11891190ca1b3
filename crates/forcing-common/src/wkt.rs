//! Minimal WKT tokenizer built on nom.
//!
//! Produces a keyword tree without interpreting it; `crs.rs` decides what
//! the tree means. Both bracket styles (`[]` and `()`) are accepted.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0, none_of},
    combinator::{all_consuming, map, value},
    multi::{many0, separated_list0},
    number::complete::double,
    sequence::delimited,
    IResult,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WktValue {
    Text(String),
    Number(f64),
    Node(WktNode),
    Bare(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WktNode {
    /// Upper-cased keyword, e.g. `PROJCS`.
    pub keyword: String,
    pub args: Vec<WktValue>,
}

impl WktNode {
    /// The quoted name most nodes carry as their first argument.
    pub fn name(&self) -> Option<&str> {
        self.text(0)
    }

    pub fn text(&self, idx: usize) -> Option<&str> {
        match self.args.get(idx) {
            Some(WktValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn number(&self, idx: usize) -> Option<f64> {
        match self.args.get(idx) {
            Some(WktValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Direct children with the given keyword.
    pub fn children<'a>(&'a self, keyword: &str) -> impl Iterator<Item = &'a WktNode> + 'a {
        let keyword = keyword.to_string();
        self.args.iter().filter_map(move |arg| match arg {
            WktValue::Node(node) if node.keyword == keyword => Some(node),
            _ => None,
        })
    }

    pub fn child(&self, keyword: &str) -> Option<&WktNode> {
        self.args.iter().find_map(|arg| match arg {
            WktValue::Node(node) if node.keyword == keyword => Some(node),
            _ => None,
        })
    }

    /// Depth-first search over descendants (not including self).
    pub fn find(&self, keyword: &str) -> Option<&WktNode> {
        for arg in &self.args {
            if let WktValue::Node(node) = arg {
                if node.keyword == keyword {
                    return Some(node);
                }
                if let Some(found) = node.find(keyword) {
                    return Some(found);
                }
            }
        }
        None
    }
}

pub(crate) fn parse_wkt(input: &str) -> Result<WktNode, String> {
    all_consuming(ws(node))(input)
        .map(|(_, node)| node)
        .map_err(|e| format!("malformed WKT: {}", e))
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// Double-quoted text; `""` inside is an escaped quote.
fn quoted(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            many0(alt((value('"', tag("\"\"")), none_of("\"")))),
            char('"'),
        ),
        |chars: Vec<char>| chars.into_iter().collect(),
    )(input)
}

fn node(input: &str) -> IResult<&str, WktNode> {
    let (input, kw) = ws(keyword)(input)?;
    let (input, open) = alt((char('['), char('(')))(input)?;
    let close = if open == '[' { ']' } else { ')' };
    let (input, args) = separated_list0(char(','), ws(wkt_value))(input)?;
    let (input, _) = char(close)(input)?;
    Ok((
        input,
        WktNode {
            keyword: kw.to_ascii_uppercase(),
            args,
        },
    ))
}

fn wkt_value(input: &str) -> IResult<&str, WktValue> {
    alt((
        map(quoted, WktValue::Text),
        map(node, WktValue::Node),
        map(double, WktValue::Number),
        map(keyword, |s: &str| WktValue::Bare(s.to_string())),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let wkt = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],UNIT["degree",0.0174532925199433]]"#;
        let node = parse_wkt(wkt).unwrap();
        assert_eq!(node.keyword, "GEOGCS");
        assert_eq!(node.name(), Some("WGS 84"));

        let spheroid = node.find("SPHEROID").unwrap();
        assert_eq!(spheroid.number(1), Some(6378137.0));
        assert_eq!(spheroid.number(2), Some(298.257223563));
        assert!(node.child("SPHEROID").is_none());
    }

    #[test]
    fn test_parentheses_and_bare_values() {
        let wkt = r#"CS(ellipsoidal, 2), AXIS("lat", north)"#;
        // Two top-level nodes is not a single WKT document
        assert!(parse_wkt(wkt).is_err());

        let node = parse_wkt(r#"AXIS ( "geodetic latitude (Lat)" , north )"#).unwrap();
        assert_eq!(node.text(0), Some("geodetic latitude (Lat)"));
        assert_eq!(node.args[1], WktValue::Bare("north".to_string()));
    }

    #[test]
    fn test_child_lookup_outlives_keyword() {
        let node = parse_wkt(
            r#"PROJCS["lcc",PARAMETER["a",1],PARAMETER["b",2],UNIT["metre",1]]"#,
        )
        .unwrap();
        let unit = {
            let keyword = String::from("UNIT");
            node.child(&keyword)
        };
        assert_eq!(unit.and_then(|u| u.name()), Some("metre"));

        let params: Vec<&WktNode> = {
            let keyword = String::from("PARAMETER");
            node.children(&keyword).collect::<Vec<_>>()
        };
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].number(1), Some(2.0));
    }

    #[test]
    fn test_escaped_quote() {
        let node = parse_wkt(r#"REMARK["say ""hi"""]"#).unwrap();
        assert_eq!(node.name(), Some(r#"say "hi""#));
    }
}
