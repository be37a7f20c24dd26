//! Parameter placeholder conversion.
//!
//! Queries are written with `$name` (keyword) or `$1` (positional) placeholders and
//! rewritten here into what the target dialect's driver expects: numbered `$n` for
//! PostgreSQL, one `?` per occurrence everywhere else.

use crate::error::{MayimError, MayimResult};
use crate::models::{DatabaseType, ParamStyle, Params, QueryParam};
use regex::Regex;
use std::sync::LazyLock;

static KEYWORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([a-z][a-z0-9_]*)").expect("keyword placeholder pattern is valid")
});

static POSITIONAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([0-9]+)").expect("positional placeholder pattern is valid"));

/// SQL text rewritten for a dialect, with its bind values in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// Detect which placeholder style `sql` uses. Mixing both is rejected.
pub fn detect_param_style(sql: &str) -> MayimResult<ParamStyle> {
    let keyword = KEYWORD_PATTERN.is_match(sql);
    let positional = POSITIONAL_PATTERN.is_match(sql);
    match (keyword, positional) {
        (true, true) => Err(MayimError::invalid_input(
            "Could not properly convert SQL params: query mixes $name and $1 placeholders",
        )),
        (true, false) => Ok(ParamStyle::Keyword),
        (false, true) => Ok(ParamStyle::Positional),
        (false, false) => Ok(ParamStyle::None),
    }
}

/// Rewrite `sql` (declared with `style`) for `dialect` and order `params` to match.
pub fn bind_params(
    sql: &str,
    style: ParamStyle,
    dialect: DatabaseType,
    params: &Params,
) -> MayimResult<BoundStatement> {
    match (style, params) {
        (ParamStyle::None, params) if params.is_empty() => Ok(BoundStatement {
            sql: sql.to_string(),
            params: Vec::new(),
        }),
        (ParamStyle::None, _) => Err(MayimError::invalid_input(
            "Query takes no parameters but some were supplied",
        )),
        (ParamStyle::Keyword, Params::Keyword(values)) => {
            rewrite(sql, &KEYWORD_PATTERN, dialect, |key| {
                values.get(key).cloned().ok_or_else(|| {
                    MayimError::invalid_input(format!("Missing keyword parameter '{key}'"))
                })
            })
        }
        (ParamStyle::Positional, Params::Positional(values)) => {
            rewrite(sql, &POSITIONAL_PATTERN, dialect, |key| {
                key.parse::<usize>()
                    .ok()
                    .filter(|index| *index >= 1)
                    .and_then(|index| values.get(index - 1))
                    .cloned()
                    .ok_or_else(|| {
                        MayimError::invalid_input(format!(
                            "Positional parameter ${key} out of range ({} supplied)",
                            values.len()
                        ))
                    })
            })
        }
        (expected, supplied) => Err(MayimError::invalid_input(format!(
            "Query expects {expected:?} parameters, got {:?}",
            supplied.style()
        ))),
    }
}

fn rewrite<F>(
    sql: &str,
    pattern: &Regex,
    dialect: DatabaseType,
    mut resolve: F,
) -> MayimResult<BoundStatement>
where
    F: FnMut(&str) -> MayimResult<QueryParam>,
{
    let mut out = String::with_capacity(sql.len());
    let mut params = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    let mut last = 0;

    for caps in pattern.captures_iter(sql) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&sql[last..whole.start()]);
        last = whole.end();

        let key = key.as_str();
        if dialect.numbered_placeholders() {
            let index = match seen.iter().position(|k| *k == key) {
                Some(i) => i + 1,
                None => {
                    params.push(resolve(key)?);
                    seen.push(key);
                    seen.len()
                }
            };
            out.push_str(&dialect.placeholder(index));
        } else {
            params.push(resolve(key)?);
            out.push_str(&dialect.placeholder(params.len()));
        }
    }
    out.push_str(&sql[last..]);

    Ok(BoundStatement { sql: out, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_styles() {
        assert_eq!(
            detect_param_style("SELECT * FROM users WHERE id = $id").unwrap(),
            ParamStyle::Keyword
        );
        assert_eq!(
            detect_param_style("SELECT * FROM users WHERE id = $1").unwrap(),
            ParamStyle::Positional
        );
        assert_eq!(
            detect_param_style("SELECT * FROM users").unwrap(),
            ParamStyle::None
        );
    }

    #[test]
    fn test_mixed_styles_rejected() {
        let err = detect_param_style("SELECT $1, $name").unwrap_err();
        assert!(err.to_string().contains("Could not properly convert SQL params"));
    }

    #[test]
    fn test_keyword_postgres_reuses_numbers() {
        let params = Params::keyword([("name", "ada"), ("age", "36")]);
        let bound = bind_params(
            "SELECT * FROM u WHERE a = $name AND b = $age OR c = $name",
            ParamStyle::Keyword,
            DatabaseType::PostgreSQL,
            &params,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM u WHERE a = $1 AND b = $2 OR c = $1");
        assert_eq!(
            bound.params,
            vec![QueryParam::from("ada"), QueryParam::from("36")]
        );
    }

    #[test]
    fn test_keyword_question_mark_dialect_repeats_values() {
        let params = Params::keyword([("name", "ada"), ("age", "36")]);
        let bound = bind_params(
            "SELECT * FROM u WHERE a = $name AND b = $age OR c = $name",
            ParamStyle::Keyword,
            DatabaseType::SQLite,
            &params,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM u WHERE a = ? AND b = ? OR c = ?");
        assert_eq!(bound.params.len(), 3);
        assert_eq!(bound.params[2], QueryParam::from("ada"));
    }

    #[test]
    fn test_positional_reordered_by_first_use() {
        let params = Params::positional([10, 20]);
        let bound = bind_params(
            "UPDATE t SET b = $2 WHERE a = $1",
            ParamStyle::Positional,
            DatabaseType::PostgreSQL,
            &params,
        )
        .unwrap();
        assert_eq!(bound.sql, "UPDATE t SET b = $1 WHERE a = $2");
        assert_eq!(bound.params, vec![QueryParam::Int(20), QueryParam::Int(10)]);

        let bound = bind_params(
            "UPDATE t SET b = $2 WHERE a = $1",
            ParamStyle::Positional,
            DatabaseType::MySQL,
            &params,
        )
        .unwrap();
        assert_eq!(bound.sql, "UPDATE t SET b = ? WHERE a = ?");
        assert_eq!(bound.params, vec![QueryParam::Int(20), QueryParam::Int(10)]);
    }

    #[test]
    fn test_missing_and_out_of_range_params() {
        let err = bind_params(
            "SELECT $name",
            ParamStyle::Keyword,
            DatabaseType::MySQL,
            &Params::keyword([("other", 1)]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'name'"));

        let err = bind_params(
            "SELECT $3",
            ParamStyle::Positional,
            DatabaseType::MySQL,
            &Params::positional([1]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_style_mismatch_rejected() {
        assert!(bind_params(
            "SELECT $1",
            ParamStyle::Positional,
            DatabaseType::PostgreSQL,
            &Params::keyword([("a", 1)]),
        )
        .is_err());
        assert!(bind_params(
            "SELECT 1",
            ParamStyle::None,
            DatabaseType::PostgreSQL,
            &Params::positional([1]),
        )
        .is_err());
    }

    #[test]
    fn test_no_params_passthrough() {
        let bound = bind_params(
            "SELECT 1",
            ParamStyle::None,
            DatabaseType::SQLite,
            &Params::None,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT 1");
        assert!(bound.params.is_empty());
    }
}
