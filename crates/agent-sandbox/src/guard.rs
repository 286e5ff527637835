//! Checks on program text made before it reaches the interpreter.
//!
//! The interpreter's parser and compiler recurse once per level of
//! expression nesting, so a pathological program could exhaust the native
//! stack before Python's own recursion limit applies. [`check`] bounds
//! nesting with an estimate taken from a light scan of the source. The scan
//! never fails on malformed input; syntax errors are left to the parser.

use crate::error::SandboxError;

/// Deepest bracket nesting accepted, as in CPython's tokenizer.
pub const MAX_BRACKET_DEPTH: usize = 200;
/// Deepest block indentation accepted, as in CPython's tokenizer.
pub const MAX_INDENT_LEVELS: usize = 100;
/// Upper bound on the estimated depth of a single expression.
pub const MAX_EXPRESSION_DEPTH: usize = 1000;

const OPERATOR_CHARS: &str = "+-*/%@&|^~<>=!.";

const KEYWORD_OPERATORS: &[&str] = &[
    "and", "await", "else", "if", "in", "is", "lambda", "not", "or", "yield",
];

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

/// Reject programs nested deeper than the interpreter can safely compile.
pub fn check(source: &str) -> Result<(), SandboxError> {
    Scanner::new(source).scan()
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    /// Operators seen since the last separator: the statement itself, then
    /// one entry per open bracket.
    levels: Vec<usize>,
    total: usize,
    indents: Vec<usize>,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            levels: vec![0],
            total: 0,
            indents: vec![0],
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn scan(mut self) -> Result<(), SandboxError> {
        let mut line_start = true;
        while let Some(c) = self.peek_at(0) {
            if line_start {
                line_start = false;
                self.indentation()?;
                continue;
            }
            match c {
                '\n' => {
                    self.pos += 1;
                    self.line += 1;
                    if self.levels.len() == 1 {
                        self.reset_level();
                        line_start = true;
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                '#' => {
                    while self.peek_at(0).is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '\'' | '"' => self.string(false)?,
                '(' | '[' | '{' => self.open()?,
                ')' | ']' | '}' => self.close(),
                ':' if self.peek_at(1) == Some('=') => {
                    self.pos += 2;
                    self.bump()?;
                }
                ',' | ':' | ';' => {
                    self.pos += 1;
                    self.reset_level();
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    self.number()
                }
                c if c.is_alphabetic() || c == '_' => self.word()?,
                c if OPERATOR_CHARS.contains(c) => {
                    self.pos += 1;
                    self.bump()?;
                }
                _ => self.pos += 1,
            }
        }
        Ok(())
    }

    fn indentation(&mut self) -> Result<(), SandboxError> {
        let mut width = 0;
        while let Some(c) = self.peek_at(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }
        // Blank and comment-only lines leave the block structure alone.
        if matches!(self.peek_at(0), None | Some('\n' | '\r' | '#')) {
            return Ok(());
        }
        while self.indents.last().is_some_and(|&top| width < top) {
            self.indents.pop();
        }
        if self.indents.last().is_some_and(|&top| width > top) {
            self.indents.push(width);
            if self.indents.len() - 1 > MAX_INDENT_LEVELS {
                return Err(SandboxError::raised(
                    "IndentationError",
                    format!("too many levels of indentation (<string>, line {})", self.line),
                ));
            }
        }
        Ok(())
    }

    fn string(&mut self, formatted: bool) -> Result<(), SandboxError> {
        let Some(quote) = self.peek_at(0) else {
            return Ok(());
        };
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut fields = 0usize;
        while let Some(c) = self.peek_at(0) {
            match c {
                '\\' => {
                    if self.peek_at(1) == Some('\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                    continue;
                }
                '\n' => {
                    if !triple {
                        return Ok(());
                    }
                    self.line += 1;
                }
                c if c == quote => {
                    if !triple {
                        self.pos += 1;
                        return Ok(());
                    }
                    if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                        self.pos += 3;
                        return Ok(());
                    }
                }
                '{' if formatted => {
                    if fields == 0 && self.peek_at(1) == Some('{') {
                        self.pos += 2;
                        continue;
                    }
                    fields += 1;
                    self.bump()?;
                }
                '}' if formatted && fields > 0 => fields -= 1,
                '\'' | '"' if fields > 0 => {
                    self.nested_string(c);
                    continue;
                }
                c if fields > 0 && (OPERATOR_CHARS.contains(c) || c == '(' || c == '[') => {
                    self.bump()?
                }
                _ => {}
            }
            self.pos += 1;
        }
        Ok(())
    }

    /// Skip a string literal inside an f-string replacement field.
    fn nested_string(&mut self, quote: char) {
        self.pos += 1;
        while let Some(c) = self.peek_at(0) {
            match c {
                '\n' => return,
                '\\' => self.pos += 2,
                c if c == quote => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn word(&mut self) -> Result<(), SandboxError> {
        let start = self.pos;
        while self.peek_at(0).is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if matches!(self.peek_at(0), Some('\'' | '"')) {
            let prefix = word.to_ascii_lowercase();
            if STRING_PREFIXES.contains(&prefix.as_str()) {
                return self.string(prefix.contains('f'));
            }
        }
        if KEYWORD_OPERATORS.contains(&word.as_str()) {
            self.bump()?;
        }
        Ok(())
    }

    fn number(&mut self) {
        let radix = self.peek_at(0) == Some('0')
            && self.peek_at(1).is_some_and(|c| "xXoObB".contains(c));
        while let Some(c) = self.peek_at(0) {
            if !(c.is_alphanumeric() || c == '_' || c == '.') {
                break;
            }
            self.pos += 1;
            if !radix && (c == 'e' || c == 'E') && matches!(self.peek_at(0), Some('+' | '-')) {
                self.pos += 1;
            }
        }
    }

    fn open(&mut self) -> Result<(), SandboxError> {
        if self.levels.len() > MAX_BRACKET_DEPTH {
            return Err(SandboxError::raised(
                "SyntaxError",
                format!("too many nested parentheses (<string>, line {})", self.line),
            ));
        }
        self.pos += 1;
        self.bump()?;
        self.levels.push(0);
        self.check_depth()
    }

    fn close(&mut self) {
        self.pos += 1;
        if self.levels.len() > 1 {
            self.total -= self.levels.pop().unwrap_or(0);
        }
    }

    fn reset_level(&mut self) {
        if let Some(last) = self.levels.last_mut() {
            self.total -= *last;
            *last = 0;
        }
    }

    fn bump(&mut self) -> Result<(), SandboxError> {
        if let Some(last) = self.levels.last_mut() {
            *last += 1;
            self.total += 1;
        }
        self.check_depth()
    }

    fn check_depth(&self) -> Result<(), SandboxError> {
        if self.total + self.levels.len() - 1 > MAX_EXPRESSION_DEPTH {
            return Err(SandboxError::raised(
                "RecursionError",
                "maximum recursion depth exceeded during compilation",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested(depth: usize) -> String {
        format!("x = {}1{}", "(".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn test_flat_operator_chain_is_rejected() {
        let source = format!("print({}1)", "1+".repeat(50_000));
        let error = check(&source).unwrap_err();
        assert_eq!(error.kind(), Some("RecursionError"));
        assert_eq!(
            error.to_string(),
            "maximum recursion depth exceeded during compilation"
        );
    }

    #[test]
    fn test_ordinary_chains_are_accepted() {
        assert!(check(&format!("print({}1)", "1+".repeat(500))).is_ok());
        assert!(check("total = a.b.c + d[1] * (e - f) ** 2 if g and not h else -i").is_ok());
    }

    #[test]
    fn test_separators_reset_the_estimate() {
        assert!(check(&format!("xs = [{}]", "-1, ".repeat(20_000))).is_ok());
        let dict: String = (0..5_000).map(|i| format!("    'k{i}': {i} + 1,\n")).collect();
        assert!(check(&format!("d = {{\n{dict}}}\n")).is_ok());
        let lines: String = (0..5_000).map(|i| format!("x{i} = {i} + {i} * 2\n")).collect();
        assert!(check(&lines).is_ok());
    }

    #[test]
    fn test_bracket_nesting_limit() {
        assert!(check(&nested(MAX_BRACKET_DEPTH)).is_ok());
        let error = check(&format!("y = 1\n{}", nested(MAX_BRACKET_DEPTH + 1))).unwrap_err();
        assert_eq!(error.kind(), Some("SyntaxError"));
        assert_eq!(
            error.to_string(),
            "too many nested parentheses (<string>, line 2)"
        );
    }

    #[test]
    fn test_strings_and_comments_are_skipped() {
        let plus = "+".repeat(5_000);
        let source = format!(
            "s = '{plus}'\n# {plus}\nt = \"\"\"\n{plus}\n\"\"\"\nu = r'\\'{plus}'\nv = f'{{{{{plus}}}}}'\n"
        );
        assert!(check(&source).is_ok());
    }

    #[test]
    fn test_fstring_fields_are_counted() {
        let source = format!("print(f'{{{}1}}')", "1+".repeat(2_000));
        assert_eq!(
            check(&source).unwrap_err().kind(),
            Some("RecursionError")
        );
        assert!(check("print(f'{a + b:>{width}} {c!r}')").is_ok());
    }

    #[test]
    fn test_numbers_are_not_operators() {
        let floats = vec!["1.5e+10"; 3_000].join(", ");
        assert!(check(&format!("xs = [{floats}]")).is_ok());
        assert!(check("x = 0x1e + 1_000.25j").is_ok());
    }

    #[test]
    fn test_indentation_limit() {
        let mut source = String::new();
        for level in 0..MAX_INDENT_LEVELS {
            source.push_str(&format!("{}if True:\n", " ".repeat(level)));
        }
        let accepted = format!("{source}{}pass\n", " ".repeat(MAX_INDENT_LEVELS));
        assert!(check(&accepted).is_ok());

        source.push_str(&format!("{}if True:\n", " ".repeat(MAX_INDENT_LEVELS)));
        source.push_str(&format!("{}pass\n", " ".repeat(MAX_INDENT_LEVELS + 1)));
        let error = check(&source).unwrap_err();
        assert_eq!(error.kind(), Some("IndentationError"));
        assert_eq!(
            error.to_string(),
            "too many levels of indentation (<string>, line 102)"
        );
    }

    #[test]
    fn test_malformed_input_does_not_error() {
        assert!(check("x = (1,\n").is_ok());
        assert!(check("s = 'unterminated\nprint(1)").is_ok());
        assert!(check(")))]]}").is_ok());
        assert!(check("").is_ok());
    }
}
