//! Naming conventions for tables and keys.

/// `BlogPost` → `blog_post`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else if ch == ' ' || ch == '-' {
            out.push('_');
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// English plural of a lowercase word, covering the regular forms.
pub fn plural(word: &str) -> String {
    let consonant_y = word.ends_with('y')
        && !word.ends_with("ay")
        && !word.ends_with("ey")
        && !word.ends_with("oy")
        && !word.ends_with("uy");
    if consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|end| word.ends_with(end)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

/// Default table name of a model: snake case, pluralized on the last word.
pub fn table_name(model: &str) -> String {
    plural(&snake_case(model))
}

/// Default foreign key pointing at `model`: `user_id`.
pub fn foreign_key(model: &str, key: &str) -> String {
    format!("{}_{}", snake_case(model), key)
}

/// Default pivot table of two models: singular snake names in alphabetical order.
pub fn pivot_table(a: &str, b: &str) -> String {
    let mut names = [snake_case(a), snake_case(b)];
    names.sort();
    names.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("BlogPost"), "blog_post");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_table_names() {
        assert_eq!(table_name("User"), "users");
        assert_eq!(table_name("Category"), "categories");
        assert_eq!(table_name("Box"), "boxes");
        assert_eq!(table_name("Journey"), "journeys");
        assert_eq!(table_name("BlogPost"), "blog_posts");
    }

    #[test]
    fn test_keys() {
        assert_eq!(foreign_key("BlogPost", "id"), "blog_post_id");
        assert_eq!(pivot_table("User", "Role"), "role_user");
    }
}
