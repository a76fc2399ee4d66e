//! The minimal SQL dialect understood by CairnDB.
//!
//! Keywords are case-insensitive. Keys are signed integers, values are
//! single-quoted strings, and the only predicate is `WHERE key = <int>`.

use chumsky::prelude::*;

use crate::errors::QueryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert(InsertStatement),
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table_name: String,
    pub key: i32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectStatement {
    pub table_name: String,
    pub key: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatement {
    pub table_name: String,
    pub key: i32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStatement {
    pub table_name: String,
    pub key: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Literal {
    Int(i32),
    Str(String),
}

const KEYWORDS: &[&str] = &[
    "INSERT", "INTO", "VALUES", "SELECT", "FROM", "WHERE", "UPDATE", "SET", "DELETE", "BEGIN",
    "COMMIT", "ROLLBACK",
];

/// Parses one statement, with an optional trailing semicolon.
pub fn parse(input: &str) -> Result<Statement, QueryError> {
    statement_parser().parse(input).map_err(|errors| {
        QueryError::Parse(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    })
}

/// A case-insensitive keyword.
fn kw(word: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    text::ident()
        .try_map(move |s: String, span| {
            if s.eq_ignore_ascii_case(word) {
                Ok(())
            } else {
                Err(Simple::custom(span, format!("expected keyword `{word}`")))
            }
        })
        .padded()
}

fn statement_parser() -> impl Parser<char, Statement, Error = Simple<char>> {
    let ident = text::ident()
        .padded()
        .try_map(|name: String, span| {
            if KEYWORDS.iter().any(|k| name.eq_ignore_ascii_case(k)) {
                Err(Simple::custom(
                    span,
                    format!("keyword `{name}` cannot be used as an identifier"),
                ))
            } else {
                Ok(name)
            }
        });

    let integer = just('-')
        .or_not()
        .then(text::int(10))
        .padded()
        .try_map(|(sign, digits): (Option<char>, String), span| {
            let mut raw = String::new();
            if sign.is_some() {
                raw.push('-');
            }
            raw.push_str(&digits);
            raw.parse::<i32>()
                .map_err(|_| Simple::custom(span, format!("invalid integer `{raw}`")))
        });

    let string_literal = just('\'')
        .ignore_then(filter(|c| *c != '\'').repeated())
        .then_ignore(just('\''))
        .collect::<String>()
        .padded();

    let literal = integer
        .clone()
        .map(Literal::Int)
        .or(string_literal.clone().map(Literal::Str));

    let key_column = text::ident().padded().try_map(|col: String, span| {
        if col.eq_ignore_ascii_case("key") {
            Ok(())
        } else {
            Err(Simple::custom(span, "only `WHERE key = <int>` is supported"))
        }
    });

    let where_key = kw("WHERE")
        .ignore_then(key_column)
        .ignore_then(just('=').padded())
        .ignore_then(integer.clone());

    let column_list = ident
        .clone()
        .separated_by(just(',').padded())
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just('(').padded(), just(')').padded());

    let insert = kw("INSERT")
        .ignore_then(kw("INTO"))
        .ignore_then(ident.clone())
        .then(column_list.or_not())
        .then_ignore(kw("VALUES"))
        .then(
            literal
                .clone()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .try_map(|((table_name, columns), values), span| {
            build_insert(table_name, columns, values)
                .map(Statement::Insert)
                .map_err(|msg| Simple::custom(span, msg))
        });

    let select_list = just('*')
        .padded()
        .ignored()
        .or(ident
            .clone()
            .separated_by(just(',').padded())
            .at_least(1)
            .ignored());

    let select = kw("SELECT")
        .ignore_then(select_list)
        .ignore_then(kw("FROM"))
        .ignore_then(ident.clone())
        .then(where_key.clone())
        .map(|(table_name, key)| Statement::Select(SelectStatement { table_name, key }));

    let value_column = text::ident().padded().try_map(|col: String, span| {
        if col.eq_ignore_ascii_case("value") {
            Ok(())
        } else {
            Err(Simple::custom(
                span,
                "only updating the `value` column is supported",
            ))
        }
    });

    let update = kw("UPDATE")
        .ignore_then(ident.clone())
        .then_ignore(kw("SET"))
        .then_ignore(value_column)
        .then_ignore(just('=').padded())
        .then(literal)
        .then(where_key.clone())
        .map(|((table_name, value), key)| {
            Statement::Update(UpdateStatement {
                table_name,
                key,
                value: string_of(&value),
            })
        });

    let delete = kw("DELETE")
        .ignore_then(kw("FROM"))
        .ignore_then(ident)
        .then(where_key)
        .map(|(table_name, key)| Statement::Delete(DeleteStatement { table_name, key }));

    let begin = kw("BEGIN").to(Statement::Begin);
    let commit = kw("COMMIT").to(Statement::Commit);
    let rollback = kw("ROLLBACK").to(Statement::Rollback);

    insert
        .or(select)
        .or(update)
        .or(delete)
        .or(begin)
        .or(commit)
        .or(rollback)
        .then_ignore(just(';').padded().or_not())
        .then_ignore(end())
}

fn build_insert(
    table_name: String,
    columns: Option<Vec<String>>,
    values: Vec<Literal>,
) -> Result<InsertStatement, String> {
    match columns {
        None => {
            if values.len() != 2 {
                return Err("expected 2 values (key, value)".to_string());
            }
            Ok(InsertStatement {
                table_name,
                key: int_of(&values[0])?,
                value: string_of(&values[1]),
            })
        }
        Some(columns) => {
            if columns.len() != values.len() {
                return Err(format!(
                    "{} columns but {} values",
                    columns.len(),
                    values.len()
                ));
            }
            let mut key = 0;
            let mut value = String::new();
            for (column, literal) in columns.iter().zip(&values) {
                if column.eq_ignore_ascii_case("key") {
                    key = int_of(literal)?;
                } else if column.eq_ignore_ascii_case("value") {
                    value = string_of(literal);
                } else {
                    return Err(format!("unsupported column: {column}"));
                }
            }
            Ok(InsertStatement {
                table_name,
                key,
                value,
            })
        }
    }
}

fn int_of(literal: &Literal) -> Result<i32, String> {
    match literal {
        Literal::Int(n) => Ok(*n),
        Literal::Str(s) => s
            .parse::<i32>()
            .map_err(|_| format!("invalid key value `{s}`")),
    }
}

fn string_of(literal: &Literal) -> String {
    match literal {
        Literal::Int(n) => n.to_string(),
        Literal::Str(s) => s.clone(),
    }
}
