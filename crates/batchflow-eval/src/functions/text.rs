use std::cell::RefCell;
use std::collections::HashMap;

use regex::Regex;

use crate::eval::{EvalError, EvalResult};
use crate::value::ScalarValue;

use super::{check_arity, str_arg};

const REGEX_CACHE_LIMIT: usize = 64;

thread_local! {
    static REGEX_CACHE: RefCell<HashMap<String, Regex>> = RefCell::new(HashMap::new());
}

pub(super) fn len(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("len", 1, args)?;
    let s = str_arg("len", &args[0])?;
    Ok(ScalarValue::Int(s.len() as i64))
}

pub(super) fn replace_all(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    const NAME: &str = "strings.ReplaceAll";
    check_arity(NAME, 3, args)?;
    let s = str_arg(NAME, &args[0])?;
    let old = str_arg(NAME, &args[1])?;
    let new = str_arg(NAME, &args[2])?;
    Ok(ScalarValue::Str(s.replace(old, new)))
}

pub(super) fn contains(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    const NAME: &str = "strings.Contains";
    check_arity(NAME, 2, args)?;
    let s = str_arg(NAME, &args[0])?;
    let sub = str_arg(NAME, &args[1])?;
    Ok(ScalarValue::Bool(s.contains(sub)))
}

/// `re.MatchString(pattern, s)`. Compiled patterns are cached per thread.
pub(super) fn match_string(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    const NAME: &str = "re.MatchString";
    check_arity(NAME, 2, args)?;
    let pattern = str_arg(NAME, &args[0])?;
    let s = str_arg(NAME, &args[1])?;

    REGEX_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if let Some(re) = cache.get(pattern) {
            return Ok(ScalarValue::Bool(re.is_match(s)));
        }
        let re = Regex::new(pattern)
            .map_err(|e| EvalError::function(NAME, format!("invalid pattern {pattern:?}: {e}")))?;
        let matched = re.is_match(s);
        if cache.len() >= REGEX_CACHE_LIMIT {
            log::debug!("regex cache full ({} patterns), clearing", cache.len());
            cache.clear();
        }
        cache.insert(pattern.to_string(), re);
        Ok(ScalarValue::Bool(matched))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn len_counts_bytes() {
        assert_eq!(len(&["héllo".into()]).unwrap(), ScalarValue::Int(6));
        assert!(len(&[ScalarValue::Int(1)]).is_err());
    }

    #[test]
    fn replace_and_contains() {
        assert_eq!(
            replace_all(&["a-b-c".into(), "-".into(), "+".into()]).unwrap(),
            ScalarValue::from("a+b+c")
        );
        assert_eq!(
            contains(&["haystack".into(), "st".into()]).unwrap(),
            ScalarValue::Bool(true)
        );
    }

    #[test]
    fn regex_matching() {
        let args = ["^[A-Z]{2}[0-9]+$".into(), "AB123".into()];
        assert_eq!(match_string(&args).unwrap(), ScalarValue::Bool(true));
        // Second call is served from the cache.
        assert_eq!(match_string(&args).unwrap(), ScalarValue::Bool(true));
        assert_eq!(
            match_string(&["^[A-Z]{2}$".into(), "A1".into()]).unwrap(),
            ScalarValue::Bool(false)
        );
        assert!(match_string(&["(".into(), "x".into()]).is_err());
    }
}
