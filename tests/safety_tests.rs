//! Structural safety analysis of rendered queries.

use querygate::safety::{is_safe, parse, tokenize, GroupKind, SqlNode, TokenClass};
use querygate::{ParamValues, ParameterDefinition, ParameterSchema, ParameterizedQuery};

fn rendered_safe(template: &str, value: &str) -> bool {
    let schema = ParameterSchema::new(vec![ParameterDefinition::text("v")]).unwrap();
    let mut query = ParameterizedQuery::new(template, Some(schema));
    let mut values = ParamValues::new();
    values.insert("v".into(), value.into());
    query.apply(values).unwrap();
    query.is_safe()
}

// Literal substitutions

#[test]
fn test_numbers_and_strings_are_safe() {
    let template = "SELECT * FROM users WHERE id = {{v}}";
    assert!(rendered_safe(template, "22"));
    assert!(rendered_safe(template, "-5"));
    assert!(rendered_safe(template, "3.14"));
    assert!(rendered_safe(template, "'alice'"));
    assert!(rendered_safe(template, "name"));
}

#[test]
fn test_quoted_placeholder_takes_any_text() {
    let template = "SELECT * FROM users WHERE name = '{{v}}'";
    assert!(rendered_safe(template, "bob"));
    assert!(rendered_safe(template, "bob smith"));
}

// Structural changes

#[test]
fn test_boolean_injection_is_unsafe() {
    let template = "SELECT * FROM users WHERE id = {{v}}";
    assert!(!rendered_safe(template, "22 OR 1=1"));
    assert!(!rendered_safe(template, "1 UNION SELECT password FROM admins"));
}

#[test]
fn test_appended_statement_is_unsafe() {
    assert!(!rendered_safe(
        "SELECT * FROM users WHERE id = {{v}}",
        "1; DROP TABLE users"
    ));
}

#[test]
fn test_breaking_out_of_quotes_is_unsafe() {
    assert!(!rendered_safe(
        "SELECT * FROM users WHERE name = '{{v}}'",
        "x' OR 'a'='a"
    ));
}

#[test]
fn test_backslash_before_quote_is_unsafe() {
    assert!(!rendered_safe(
        "SELECT * FROM users WHERE name = '{{v}}'",
        "x\\' OR 1=1 --"
    ));
}

#[test]
fn test_backslash_inside_value_is_safe() {
    assert!(rendered_safe(
        "SELECT * FROM files WHERE path = '{{v}}'",
        "C:\\temp\\report"
    ));
}

#[test]
fn test_comment_truncation_is_unsafe() {
    assert!(!rendered_safe(
        "SELECT * FROM t WHERE a = {{v}} AND tenant = 7",
        "1 --"
    ));
}

#[test]
fn test_keyword_value_is_unsafe() {
    assert!(!rendered_safe("SELECT * FROM t WHERE a = {{v}}", "SELECT"));
}

#[test]
fn test_subquery_in_list_is_unsafe() {
    assert!(!rendered_safe(
        "SELECT * FROM t WHERE id IN ({{v}})",
        "SELECT id FROM admins"
    ));
}

// The IN-list idiom

#[test]
fn test_list_inside_where_is_safe() {
    let template = "SELECT * FROM t WHERE id IN ({{v}})";
    assert!(rendered_safe(template, "1"));
    assert!(rendered_safe(template, "1, 2, 3"));
    assert!(rendered_safe(template, "'a','b'"));
}

#[test]
fn test_list_outside_where_is_unsafe() {
    assert!(!rendered_safe(
        "SELECT {{v}} FROM t",
        "name, password"
    ));
}

// Optional sections

#[test]
fn test_skipped_section_is_safe() {
    let schema = ParameterSchema::new(vec![
        ParameterDefinition::text("name"),
        ParameterDefinition::text("extra"),
    ])
    .unwrap();
    let mut query = ParameterizedQuery::new(
        "SELECT * FROM t WHERE a = '{{name}}' {{#extra}}AND b = '{{extra}}'{{/extra}}",
        Some(schema),
    );
    let mut values = ParamValues::new();
    values.insert("name".into(), "bob".into());
    values.insert("extra".into(), "".into());
    query.apply(values).unwrap();

    assert!(query.missing_params().is_empty());
    assert!(query.is_safe());
}

#[test]
fn test_map_section_is_safe() {
    let mut query = ParameterizedQuery::new(
        "SELECT * FROM events{{#period}} WHERE day BETWEEN '{{start}}' AND '{{end}}'{{/period}}{{^period}} LIMIT 10{{/period}}",
        None,
    );
    let mut values = ParamValues::new();
    values.insert(
        "period".into(),
        querygate::ParamValue::range("2024-01-01", "2024-01-31"),
    );
    query.apply(values).unwrap();

    assert_eq!(
        query.text(),
        "SELECT * FROM events WHERE day BETWEEN '2024-01-01' AND '2024-01-31'"
    );
    assert!(query.is_safe());
}

// Free-form queries and the text-parameter shortcut

#[test]
fn test_schema_without_text_is_always_safe() {
    let schema = ParameterSchema::new(vec![ParameterDefinition::enumeration(
        "v",
        ["1 OR 1=1"],
    )])
    .unwrap();
    let mut query = ParameterizedQuery::new("SELECT * FROM t WHERE id = {{v}}", Some(schema));
    let mut values = ParamValues::new();
    values.insert("v".into(), "1 OR 1=1".into());
    query.apply(values).unwrap();
    assert!(query.is_safe());
}

#[test]
fn test_free_form_query_is_checked() {
    let mut query = ParameterizedQuery::new("SELECT * FROM t WHERE id = {{v}}", None);
    let mut values = ParamValues::new();
    values.insert("v".into(), "1 OR 1=1".into());
    query.apply(values).unwrap();
    assert!(!query.is_safe());
}

#[test]
fn test_direct_comparison_ignores_layout() {
    assert!(is_safe(
        "SELECT a\nFROM t -- note\nWHERE b = {{v}}",
        "SELECT a FROM t WHERE b = 'x'"
    ));
}

// Tokenizer and grouping

#[test]
fn test_tokenizer_classes() {
    let classes: Vec<TokenClass> = tokenize("SELECT name FROM t WHERE x >= 'a' -- c")
        .into_iter()
        .filter(|t| !t.class.is_trivia())
        .map(|t| t.class)
        .collect();
    assert_eq!(
        classes,
        vec![
            TokenClass::Keyword,
            TokenClass::Name,
            TokenClass::Keyword,
            TokenClass::Name,
            TokenClass::Keyword,
            TokenClass::Name,
            TokenClass::Comparison,
            TokenClass::String,
        ]
    );
}

#[test]
fn test_statements_are_split() {
    let SqlNode::Group { kind, children } = parse("SELECT 1; SELECT 2;") else {
        panic!("expected script group");
    };
    assert_eq!(kind, GroupKind::Script);
    assert_eq!(children.len(), 2);
}
