//! Table and column naming conventions.

/// Convert PascalCase to snake_case.
///
/// - `User` -> `user`
/// - `CreditCard` -> `credit_card`
/// - `HTTPServer` -> `http_server`
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                let should_underscore = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase()));
                if should_underscore {
                    result.push('_');
                }
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Simple English pluralization of a snake_case word.
///
/// Only the last segment is pluralized: `credit_card` -> `credit_cards`.
pub fn pluralize(word: &str) -> String {
    let (head, last) = match word.rfind('_') {
        Some(i) => word.split_at(i + 1),
        None => ("", word),
    };

    let plural = match last {
        "" => String::new(),
        "person" => "people".to_string(),
        "child" => "children".to_string(),
        "man" => "men".to_string(),
        "woman" => "women".to_string(),
        "mouse" => "mice".to_string(),
        "datum" => "data".to_string(),
        "index" => "indices".to_string(),
        "status" => "statuses".to_string(),
        w if w.ends_with('s')
            || w.ends_with('x')
            || w.ends_with('z')
            || w.ends_with("ch")
            || w.ends_with("sh") =>
        {
            format!("{w}es")
        }
        w if w.ends_with('y')
            && !w.ends_with("ay")
            && !w.ends_with("ey")
            && !w.ends_with("oy")
            && !w.ends_with("uy") =>
        {
            format!("{}ies", &w[..w.len() - 1])
        }
        w => format!("{w}s"),
    };

    format!("{head}{plural}")
}

/// Default table name for a model: snake_case, pluralized unless `singular`.
pub fn table_name_for(model_name: &str, singular: bool) -> String {
    let snake = to_snake_case(model_name);
    if singular { snake } else { pluralize(&snake) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case() {
        assert_eq!(to_snake_case("User"), "user");
        assert_eq!(to_snake_case("CreditCard"), "credit_card");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn plurals() {
        assert_eq!(pluralize("user"), "users");
        assert_eq!(pluralize("credit_card"), "credit_cards");
        assert_eq!(pluralize("company"), "companies");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("user_language"), "user_languages");
    }

    #[test]
    fn table_names() {
        assert_eq!(table_name_for("Email", false), "emails");
        assert_eq!(table_name_for("Email", true), "email");
    }
}
