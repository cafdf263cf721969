// Parsers for the small textual settings accepted by analyzers and the CLI

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt},
    multi::separated_list1,
    sequence::{delimited, separated_pair, terminated},
    IResult,
};

use crate::analyzer::Target;
use crate::error::{AnalysisError, Result};

/// Bins used by `histogram` when no explicit count is given.
pub const DEFAULT_KEY_BIN_COUNT: usize = 16;

/// How the keys of weight-map cells are combined before analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCombination {
    None,
    Histogram { bin_count: usize },
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')(input)
}

/// `histogram` or `histogram<N>col`
fn key_combination(input: &str) -> IResult<&str, KeyCombination> {
    let (input, _) = tag("histogram")(input)?;
    let (input, bins) = opt(terminated(
        map_res(digit1, |d: &str| d.parse::<usize>()),
        tag("col"),
    ))(input)?;
    Ok((
        input,
        KeyCombination::Histogram {
            bin_count: bins.unwrap_or(DEFAULT_KEY_BIN_COUNT),
        },
    ))
}

pub fn parse_key_combination(text: &str) -> Result<KeyCombination> {
    match all_consuming(ws(key_combination))(text) {
        Ok((_, KeyCombination::Histogram { bin_count: 0 })) => Err(AnalysisError::configuration(
            format!("invalid value for combine_keys: {:?} (bin count must be positive)", text),
        )),
        Ok((_, combination)) => Ok(combination),
        Err(_) => Err(AnalysisError::configuration(format!(
            "invalid value for combine_keys: {:?}",
            text
        ))),
    }
}

/// `column` or `x_column~y_column`
fn target(input: &str) -> IResult<&str, Target> {
    alt((
        map(
            separated_pair(identifier, ws(char('~')), identifier),
            |(x, y)| Target::pair(x, y),
        ),
        map(identifier, Target::column),
    ))(input)
}

/// Comma separated list of targets, e.g. `bpppc, compression_time~bpppc`.
pub fn parse_targets(text: &str) -> Result<Vec<Target>> {
    match all_consuming(ws(separated_list1(ws(char(',')), target)))(text) {
        Ok((_, targets)) => Ok(targets),
        Err(e) => Err(AnalysisError::configuration(format!(
            "cannot parse target list {:?}: {:?}",
            text, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_histogram() {
        assert_eq!(
            parse_key_combination("histogram").unwrap(),
            KeyCombination::Histogram { bin_count: DEFAULT_KEY_BIN_COUNT }
        );
    }

    #[test]
    fn test_histogram_with_count() {
        assert_eq!(
            parse_key_combination(" histogram32col ").unwrap(),
            KeyCombination::Histogram { bin_count: 32 }
        );
    }

    #[test]
    fn test_histogram_zero_bins() {
        let err = parse_key_combination("histogram0col").unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[test]
    fn test_unrecognized_combination() {
        assert!(parse_key_combination("histogram12").is_err());
        assert!(parse_key_combination("sum").is_err());
    }

    #[test]
    fn test_targets() {
        let targets = parse_targets("bpppc, time ~ psnr").unwrap();
        assert_eq!(targets, vec![Target::column("bpppc"), Target::pair("time", "psnr")]);
    }

    #[test]
    fn test_targets_trailing_garbage() {
        assert!(parse_targets("a,,b").is_err());
    }
}
