//! Brand context synthesis.

/// Prompt asking for a descriptive paragraph about the brand.
pub fn context_prompt(brand: &str) -> String {
    format!(
        r#"You are an expert at creating comprehensive brand context for AI visibility testing.

Given the brand/product: "{brand}"

Create a detailed master context that includes:
1. What the brand/product is
2. Key features and offerings
3. Target audience
4. Industry and category
5. Unique value propositions

Format as a comprehensive paragraph that will be used to generate natural questions users might ask AI assistants."#
    )
}
