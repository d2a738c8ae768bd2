//! SQL text helpers for dumps and replay
//!
//! Value escaping for the portable dump, plus the script preparation used
//! before replay: splitting on the statement terminator, finding every
//! `CREATE TABLE` target and normalizing bare `DROP TABLE` statements.

use std::sync::OnceLock;

use regex::Regex;
use rusqlite::types::ValueRef;

/// Quote an identifier with double quotes, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal with single quotes, doubling embedded quotes
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render a column value as an SQL literal.
///
/// `NULL` is emitted as the bare keyword, never quoted.
pub fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => render_real(f),
        ValueRef::Text(bytes) => quote_literal(&String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => format!("X'{}'", hex::encode_upper(bytes)),
    }
}

fn render_real(f: f64) -> String {
    if f.is_nan() {
        "NULL".to_string()
    } else if f.is_infinite() {
        let literal = if f > 0.0 { "9e999" } else { "-9e999" };
        literal.to_string()
    } else {
        // Debug keeps the decimal point, so 1.0 stays REAL on replay
        format!("{:?}", f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    SingleQuote,
    DoubleQuote,
    Backtick,
    Bracket,
    LineComment,
    BlockComment,
}

/// Word-level view of the statement being scanned, enough to tell whether
/// a `CREATE TRIGGER` body is still open. `CASE ... END` pairs inside the
/// body are counted so only the body's own `END` closes it.
#[derive(Debug, Default)]
struct TriggerScan {
    word: String,
    leading: Vec<String>,
    is_trigger: bool,
    case_depth: usize,
    closed: bool,
}

impl TriggerScan {
    fn push_char(&mut self, c: char) {
        if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
            self.word.push(c);
        } else {
            self.end_word();
        }
    }

    fn end_word(&mut self) {
        if self.word.is_empty() {
            return;
        }
        let word = self.word.to_ascii_uppercase();
        self.word.clear();

        if self.leading.len() < 3 {
            self.leading.push(word.clone());
            self.is_trigger = match self.leading.as_slice() {
                [create, trigger, ..] if create == "CREATE" && trigger == "TRIGGER" => true,
                [create, temp, trigger] => {
                    create == "CREATE"
                        && (temp == "TEMP" || temp == "TEMPORARY")
                        && trigger == "TRIGGER"
                }
                _ => false,
            };
        }
        if !self.is_trigger {
            return;
        }

        match word.as_str() {
            "CASE" => {
                self.case_depth += 1;
                self.closed = false;
            }
            "END" if self.case_depth > 0 => {
                self.case_depth -= 1;
                self.closed = false;
            }
            "END" => self.closed = true,
            _ => self.closed = false,
        }
    }

    /// Inside a trigger body whose closing `END` has not been seen
    fn is_open(&mut self) -> bool {
        self.end_word();
        self.is_trigger && !self.closed
    }
}

/// Split a script into individual statements on `;`.
///
/// Terminators inside quoted strings, quoted identifiers and comments are
/// ignored, and a `CREATE TRIGGER` body is kept whole until its closing
/// `END`. Comments are dropped; empty statements are skipped. The returned
/// statements carry no trailing terminator.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = ScanState::Normal;
    let mut trigger = TriggerScan::default();
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            ScanState::Normal => match c {
                '\'' => {
                    trigger.end_word();
                    state = ScanState::SingleQuote;
                    current.push(c);
                }
                '"' => {
                    trigger.end_word();
                    state = ScanState::DoubleQuote;
                    current.push(c);
                }
                '`' => {
                    trigger.end_word();
                    state = ScanState::Backtick;
                    current.push(c);
                }
                '[' => {
                    trigger.end_word();
                    state = ScanState::Bracket;
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    trigger.end_word();
                    chars.next();
                    state = ScanState::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    trigger.end_word();
                    chars.next();
                    state = ScanState::BlockComment;
                }
                ';' => {
                    if trigger.is_open() {
                        current.push(c);
                    } else {
                        push_statement(&mut statements, &mut current);
                        trigger = TriggerScan::default();
                    }
                }
                _ => {
                    trigger.push_char(c);
                    current.push(c);
                }
            },
            ScanState::SingleQuote => {
                current.push(c);
                if c == '\'' {
                    state = ScanState::Normal;
                }
            }
            ScanState::DoubleQuote => {
                current.push(c);
                if c == '"' {
                    state = ScanState::Normal;
                }
            }
            ScanState::Backtick => {
                current.push(c);
                if c == '`' {
                    state = ScanState::Normal;
                }
            }
            ScanState::Bracket => {
                current.push(c);
                if c == ']' {
                    state = ScanState::Normal;
                }
            }
            ScanState::LineComment => {
                if c == '\n' {
                    current.push(c);
                    state = ScanState::Normal;
                }
            }
            ScanState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    current.push(' ');
                    state = ScanState::Normal;
                }
            }
        }
    }

    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

fn create_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)^\s*CREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:(?:"(?:[^"]|"")+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][A-Za-z0-9_$]*)\s*\.\s*)?("(?:[^"]|"")+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][A-Za-z0-9_$]*)"#,
        )
        .expect("create table regex is valid")
    })
}

fn drop_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*DROP\s+TABLE\s+(IF\s+EXISTS\s+)?").expect("drop table regex is valid")
    })
}

/// Strip identifier quoting (`"x"`, `` `x` ``, `[x]`)
pub fn unquote_ident(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if raw.len() >= 2 {
        let (first, last) = (bytes[0], bytes[raw.len() - 1]);
        if first == b'"' && last == b'"' {
            return raw[1..raw.len() - 1].replace("\"\"", "\"");
        }
        if (first == b'`' && last == b'`') || (first == b'[' && last == b']') {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    raw.to_string()
}

/// Target table of a `CREATE TABLE` statement, if it is one
pub fn create_table_target(statement: &str) -> Option<String> {
    create_table_regex()
        .captures(statement)
        .and_then(|caps| caps.get(1))
        .map(|m| unquote_ident(m.as_str()))
}

/// Every distinct `CREATE TABLE` target in statement order
pub fn create_table_targets(statements: &[String]) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for statement in statements {
        if let Some(name) = create_table_target(statement) {
            if !targets.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
                targets.push(name);
            }
        }
    }
    targets
}

/// Rewrite a bare `DROP TABLE x` into `DROP TABLE IF EXISTS x`
pub fn normalize_drop_table(statement: &str) -> String {
    match drop_table_regex().captures(statement) {
        Some(caps) if caps.get(1).is_none() => {
            let matched = caps.get(0).map(|m| m.end()).unwrap_or(0);
            format!("DROP TABLE IF EXISTS {}", &statement[matched..])
        }
        _ => statement.to_string(),
    }
}

/// Turn a dump into the ordered list of statements to replay.
///
/// A `DROP TABLE IF EXISTS` for every `CREATE TABLE` target comes first, so
/// replaying over an already-populated database is safe. SQLite-internal
/// tables are never dropped.
pub fn prepare_script(script: &str) -> Vec<String> {
    let statements = split_statements(script);
    let targets = create_table_targets(&statements);

    let mut prepared: Vec<String> = targets
        .iter()
        .filter(|name| !name.to_ascii_lowercase().starts_with("sqlite_"))
        .map(|name| format!("DROP TABLE IF EXISTS {}", quote_ident(name)))
        .collect();

    prepared.extend(statements.iter().map(|s| normalize_drop_table(s)));
    prepared
}

/// Shorten a statement for log lines
pub fn preview(statement: &str, max_chars: usize) -> String {
    let flat = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_values() {
        assert_eq!(render_value(ValueRef::Null), "NULL");
        assert_eq!(render_value(ValueRef::Integer(-7)), "-7");
        assert_eq!(render_value(ValueRef::Real(1.0)), "1.0");
        assert_eq!(render_value(ValueRef::Real(2.5)), "2.5");
        assert_eq!(render_value(ValueRef::Real(f64::INFINITY)), "9e999");
        assert_eq!(render_value(ValueRef::Text(b"O'Brien")), "'O''Brien'");
        assert_eq!(render_value(ValueRef::Text(b"NULL")), "'NULL'");
        assert_eq!(render_value(ValueRef::Blob(&[0xde, 0xad])), "X'DEAD'");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_split_respects_quotes_and_comments() {
        let script = "-- header; not a statement\n\
                      INSERT INTO t VALUES('a;b');\n\
                      /* block; comment */ INSERT INTO \"x;y\" VALUES(1);\n\
                      ;;\n\
                      SELECT 1";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "INSERT INTO t VALUES('a;b')");
        assert!(statements[1].ends_with("INSERT INTO \"x;y\" VALUES(1)"));
        assert_eq!(statements[2], "SELECT 1");
    }

    #[test]
    fn test_split_keeps_trigger_body_whole() {
        let script = "CREATE TRIGGER trg AFTER INSERT ON t BEGIN\n\
                        UPDATE t SET n = n + 1;\n\
                        DELETE FROM u;\n\
                      END;\n\
                      INSERT INTO t VALUES(1);";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TRIGGER"));
        assert!(statements[0].ends_with("END"));
        assert!(statements[0].contains("DELETE FROM u;"));
    }

    #[test]
    fn test_split_trigger_with_case_expression() {
        let script = "CREATE TRIGGER trg AFTER INSERT ON t BEGIN\n\
                        UPDATE t SET n = CASE WHEN n > 1 THEN 0 ELSE n END;\n\
                        DELETE FROM u;\n\
                      END;\n\
                      INSERT INTO t VALUES(1);";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2, "{:?}", statements);
        assert!(statements[0].contains("DELETE FROM u;"));
        assert!(statements[0].ends_with("END"));
        assert_eq!(statements[1], "INSERT INTO t VALUES(1)");
    }

    #[test]
    fn test_split_trigger_edge_words() {
        // nested CASE, a quoted 'END', and an identifier ending in "end"
        let script = "CREATE TEMP TRIGGER t2 BEFORE DELETE ON t WHEN \
                        CASE OLD.a WHEN 1 THEN CASE OLD.b WHEN 2 THEN 1 END ELSE 0 END BEGIN\n\
                        INSERT INTO audit(msg, weekend) VALUES('END', 1);\n\
                        SELECT weekend FROM audit;\n\
                      END;\n\
                      CREATE TABLE x (legend TEXT);";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2, "{:?}", statements);
        assert!(statements[0].starts_with("CREATE TEMP TRIGGER"));
        assert!(statements[0].ends_with("END"));
        assert_eq!(statements[1], "CREATE TABLE x (legend TEXT)");
    }

    #[test]
    fn test_create_table_target_forms() {
        assert_eq!(
            create_table_target("CREATE TABLE users (id INTEGER)"),
            Some("users".to_string())
        );
        assert_eq!(
            create_table_target("create table if not exists \"my \"\"t\"\"\"(a)"),
            Some("my \"t\"".to_string())
        );
        assert_eq!(
            create_table_target("CREATE TABLE main.[logs](a)"),
            Some("logs".to_string())
        );
        assert_eq!(create_table_target("CREATE INDEX i ON t(a)"), None);
        assert_eq!(
            create_table_target("INSERT INTO t VALUES('CREATE TABLE x (a)')"),
            None
        );
    }

    #[test]
    fn test_normalize_drop_table() {
        assert_eq!(normalize_drop_table("DROP TABLE users"), "DROP TABLE IF EXISTS users");
        assert_eq!(
            normalize_drop_table("drop  table \"users\""),
            "DROP TABLE IF EXISTS \"users\""
        );
        assert_eq!(
            normalize_drop_table("DROP TABLE IF EXISTS users"),
            "DROP TABLE IF EXISTS users"
        );
        assert_eq!(normalize_drop_table("DELETE FROM users"), "DELETE FROM users");
    }

    #[test]
    fn test_prepare_script_prepends_drops() {
        let script = "CREATE TABLE a (x);\nINSERT INTO a VALUES(1);\n\
                      DROP TABLE b;\nCREATE TABLE b (y);\nCREATE TABLE sqlite_stat1(tbl,idx,stat);";
        let prepared = prepare_script(script);
        assert_eq!(prepared[0], "DROP TABLE IF EXISTS \"a\"");
        assert_eq!(prepared[1], "DROP TABLE IF EXISTS \"b\"");
        assert_eq!(prepared[2], "CREATE TABLE a (x)");
        assert!(prepared.contains(&"DROP TABLE IF EXISTS b".to_string()));
        assert!(!prepared.iter().any(|s| s.contains("IF EXISTS \"sqlite_stat1\"")));
        assert_eq!(prepared.len(), 7);
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("INSERT  INTO\n t", 50), "INSERT INTO t");
        assert_eq!(preview("abcdefghij", 4), "abcd...");
    }
}
