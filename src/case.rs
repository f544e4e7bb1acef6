//! Case conversion between JSON:API member names (camelCase) and column names (snake_case).

/// Convert a single identifier from camelCase to snake_case.
/// e.g. "authorId" -> "author_id", "createdAt" -> "created_at"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Default foreign key column for a to-one relationship: "author" -> "author_id".
pub fn foreign_key_column(relationship: &str) -> String {
    format!("{}_id", to_snake_case(relationship))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("createdAt"), "created_at");
        assert_eq!(to_snake_case("name"), "name");
        assert_eq!(to_snake_case("userBio"), "user_bio");
    }

    #[test]
    fn test_foreign_key_column() {
        assert_eq!(foreign_key_column("author"), "author_id");
        assert_eq!(foreign_key_column("parentCategory"), "parent_category_id");
    }
}
