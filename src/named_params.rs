//! Named-parameter rewriting: `@name` tokens into positional `$N` form.
//!
//! The rewrite happens before a connection is acquired, so a malformed
//! query never touches the driver.

use std::collections::HashMap;

use regex::NoExpand;

use crate::error::{PoolError, Result};
use crate::options::PoolOptions;

/// Query parameters accepted by [`Pool::query`](crate::Pool::query).
#[derive(Debug, Clone)]
pub enum Params<V> {
    /// The query takes no parameters.
    None,
    /// Already-positional values, passed to the driver untouched.
    Positional(Vec<V>),
    /// Named values keyed by parameter name (without the `@` prefix).
    Named(HashMap<String, V>),
}

/// Resolve query text and parameters into the positional form the driver
/// expects.
///
/// Positional and absent values pass through unchanged; an empty named map
/// means "no parameters". A non-empty map triggers the rewrite.
pub(crate) fn prepare<V: Clone>(
    options: &PoolOptions,
    text: &str,
    params: Params<V>,
) -> Result<(String, Vec<V>)> {
    match params {
        Params::None => Ok((text.to_string(), Vec::new())),
        Params::Positional(values) => Ok((text.to_string(), values)),
        Params::Named(values) if values.is_empty() => Ok((text.to_string(), Vec::new())),
        Params::Named(values) => rewrite(options, text, &values),
    }
}

fn rewrite<V: Clone>(
    options: &PoolOptions,
    text: &str,
    values: &HashMap<String, V>,
) -> Result<(String, Vec<V>)> {
    // Unique tokens in first-seen order; repeated tokens share one slot.
    let mut tokens: Vec<&str> = Vec::new();
    for m in options.named_parameter_find_regex.find_iter(text) {
        let token = m.as_str();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    if tokens.is_empty() {
        return Err(PoolError::NoNamedParameters);
    }

    let keys: Vec<String> = tokens
        .iter()
        .map(|token| (options.named_parameter_name)(token))
        .collect();

    let missing: Vec<&str> = keys
        .iter()
        .filter(|key| !values.contains_key(key.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(PoolError::MissingParameters(missing.join(", ")));
    }

    let mut rewritten = text.to_string();
    let mut positional = Vec::with_capacity(tokens.len());
    for (index, (token, key)) in tokens.iter().zip(&keys).enumerate() {
        let replace = (options.named_parameter_replace_regex)(token);
        let placeholder = format!("${}", index + 1);
        rewritten = replace
            .replace_all(&rewritten, NoExpand(&placeholder))
            .into_owned();
        positional.push(values[key.as_str()].clone());
    }

    Ok((rewritten, positional))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(pairs: &[(&str, &str)]) -> Params<String> {
        Params::Named(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_repeated_tokens_share_one_index() {
        let options = PoolOptions::default();
        let (text, values) = prepare(
            &options,
            "a=@x and b=@y or c=@x",
            named(&[("x", "1"), ("y", "2")]),
        )
        .unwrap();

        assert_eq!(text, "a=$1 and b=$2 or c=$1");
        assert_eq!(values, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_prefix_tokens_do_not_collide() {
        let options = PoolOptions::default();
        let (text, values) = prepare(
            &options,
            "select foo from foobar where id=@id and (bar=@foobar or bar=@foo) and foo=@foo",
            named(&[
                ("id", "lorem"),
                ("foo", "lorem - foo"),
                ("foobar", "lorem - foobar"),
                ("unused", "lorem - unused"),
            ]),
        )
        .unwrap();

        assert_eq!(
            text,
            "select foo from foobar where id=$1 and (bar=$2 or bar=$3) and foo=$3"
        );
        assert_eq!(
            values,
            vec![
                "lorem".to_string(),
                "lorem - foobar".to_string(),
                "lorem - foo".to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_parameters_listed_in_order() {
        let options = PoolOptions::default();
        let err = prepare(
            &options,
            "select * from foobar where id=@id and name=@name",
            named(&[("unused", "x")]),
        )
        .unwrap_err();

        assert_eq!(err.code(), Some("ERR_PG_QUERY_MISSING_QUERY_PARAMETER"));
        assert_eq!(err.to_string(), "Missing query parameter(s): id, name");
    }

    #[test]
    fn test_map_without_tokens_in_query_fails() {
        let options = PoolOptions::default();
        let err = prepare(&options, "select 1", named(&[("id", "x")])).unwrap_err();
        assert_eq!(err.code(), Some("ERR_PG_QUERY_NO_NAMED_PARAMETERS"));
    }

    #[test]
    fn test_empty_map_means_no_parameters() {
        let options = PoolOptions::default();
        let (text, values) =
            prepare::<String>(&options, "select * from t where id=@id", Params::Named(HashMap::new()))
                .unwrap();
        assert_eq!(text, "select * from t where id=@id");
        assert!(values.is_empty());
    }

    #[test]
    fn test_positional_passes_through() {
        let options = PoolOptions::default();
        let (text, values) = prepare(
            &options,
            "select * from t where id=$1",
            Params::Positional(vec!["7".to_string()]),
        )
        .unwrap();
        assert_eq!(text, "select * from t where id=$1");
        assert_eq!(values, vec!["7".to_string()]);
    }

    #[test]
    fn test_dollar_in_replacement_is_literal() {
        let options = PoolOptions::default();
        let (text, _) = prepare(
            &options,
            "select @a, @b, @c, @d, @e, @f, @g, @h, @i, @j, @k",
            named(&[
                ("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5"), ("f", "6"),
                ("g", "7"), ("h", "8"), ("i", "9"), ("j", "10"), ("k", "11"),
            ]),
        )
        .unwrap();
        assert_eq!(text, "select $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11");
    }
}
