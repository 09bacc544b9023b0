use super::error::ConfigError;

/// Expands `${VAR}` and `${VAR:-fallback}` references from the environment.
///
/// A bare `${VAR}` whose variable is unset fails with
/// `ConfigError::UndefinedVariable`; the `:-` form substitutes the fallback
/// instead. Unterminated references are kept literally.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return Ok(result);
        };

        let reference = &after[..end];
        let (name, fallback) = match reference.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (reference, None),
        };

        if name.is_empty() {
            result.push_str(&rest[start..start + 2 + end + 1]);
        } else {
            match (std::env::var(name), fallback) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(fallback)) => result.push_str(fallback),
                (Err(_), None) => {
                    return Err(ConfigError::UndefinedVariable {
                        name: name.to_string(),
                    })
                }
            }
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(resolve_variables("no refs here").unwrap(), "no refs here");
    }

    #[test]
    fn set_variable_is_substituted() {
        std::env::set_var("MIXLITE_INTERP_SET", "sk-123");
        assert_eq!(
            resolve_variables("Bearer ${MIXLITE_INTERP_SET}!").unwrap(),
            "Bearer sk-123!"
        );
    }

    #[test]
    fn unset_variable_is_an_error() {
        std::env::remove_var("MIXLITE_INTERP_UNSET");
        let err = resolve_variables("${MIXLITE_INTERP_UNSET}").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UndefinedVariable { ref name } if name == "MIXLITE_INTERP_UNSET"
        ));
    }

    #[test]
    fn fallback_used_when_unset() {
        std::env::remove_var("MIXLITE_INTERP_FALLBACK");
        assert_eq!(
            resolve_variables("${MIXLITE_INTERP_FALLBACK:-http://localhost:8080}").unwrap(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn unterminated_reference_kept_literally() {
        assert_eq!(resolve_variables("abc ${OPEN").unwrap(), "abc ${OPEN");
        assert_eq!(resolve_variables("${}").unwrap(), "${}");
    }
}
