/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// A set variable always wins. An unset variable with a fallback expands to
/// the fallback; without one the placeholder is kept verbatim so the parse
/// error (or the literal value) points at what is missing.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder untouched.
            out.push_str(&rest[start..]);
            return out;
        };
        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "RPC_USER" => Some("alice".into()),
            "RPC_PASS" => Some("s3cret".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_set_variables() {
        assert_eq!(
            substitute_with("user = \"${RPC_USER}\"\npass = \"${RPC_PASS}\"", lookup),
            "user = \"alice\"\npass = \"s3cret\""
        );
    }

    #[test]
    fn fallback_used_only_when_unset() {
        assert_eq!(substitute_with("${RPC_MISSING:-bob}", lookup), "bob");
        assert_eq!(substitute_with("${RPC_USER:-bob}", lookup), "alice");
    }

    #[test]
    fn unset_without_fallback_is_kept() {
        assert_eq!(substitute_with("x=${RPC_MISSING}", lookup), "x=${RPC_MISSING}");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_with("a ${RPC_USER", lookup), "a ${RPC_USER");
    }

    #[test]
    fn empty_name_is_literal() {
        assert_eq!(substitute_with("${}", lookup), "${}");
    }
}
