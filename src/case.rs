//! Identifier case helpers for default table, column and path names derived from entity names.

/// Convert an identifier from CamelCase/camelCase to snake_case.
/// e.g. "BookReview" -> "book_review", "authorId" -> "author_id"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Default path segment for an entity: snake_case plural ("BookReview" -> "book_reviews").
pub fn default_path_segment(entity_name: &str) -> String {
    let snake = to_snake_case(entity_name);
    if snake.ends_with('s') {
        format!("{}es", snake)
    } else if let Some(stem) = snake
        .strip_suffix('y')
        .filter(|stem| !stem.ends_with(['a', 'e', 'i', 'o', 'u']))
    {
        format!("{}ies", stem)
    } else {
        format!("{}s", snake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_from_camel() {
        assert_eq!(to_snake_case("BookReview"), "book_review");
        assert_eq!(to_snake_case("authorId"), "author_id");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn plural_segments() {
        assert_eq!(default_path_segment("Author"), "authors");
        assert_eq!(default_path_segment("Category"), "categories");
        assert_eq!(default_path_segment("Address"), "addresses");
    }
}
