//! SMT-LIB2 subset parser for QF_LRA.
//!
//! Supports the command subset the solver consumes: `set-logic`,
//! `set-info`, `set-option`, `declare-const`, `declare-fun` (0-ary),
//! `define-fun` (0-ary, as a `let`-style alias), `assert`, `check-sat`,
//! and `exit`. Formulas may use `and`, `or`, `not`, `=>`, `=`, the
//! comparisons `< <= > >=` (chainable), `let`, and linear arithmetic
//! over `+ - *` and `/` by a constant, with integer and decimal
//! numerals.

use crate::error::{Error, Result};
use crate::rational::Rational;
use crate::terms::{Sort, TermId, TermManager};
use num_bigint::BigInt;
use num_traits::{One, Zero};
use rustc_hash::FxHashMap;

/// Result of parsing a script: the asserted formulas and the declared
/// constants in declaration order.
#[derive(Debug, Default)]
pub struct Script {
    /// Top-level assertions.
    pub assertions: Vec<TermId>,
    /// Declared constants: name and term.
    pub declarations: Vec<(String, TermId)>,
    /// Whether the script requested `(check-sat)`.
    pub check_sat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Symbol(String),
    Numeral(String),
    Decimal(String),
    Keyword(String),
    StringLit(String),
}

struct Lexer<'a> {
    input: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    peeked: Option<Option<(Token, usize, usize)>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            column: 1,
            peeked: None,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.input.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn peek_token(&mut self) -> Result<Option<&(Token, usize, usize)>> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lex()?);
        }
        Ok(self.peeked.as_ref().and_then(|slot| slot.as_ref()))
    }

    fn next_token(&mut self) -> Result<Option<(Token, usize, usize)>> {
        if let Some(slot) = self.peeked.take() {
            return Ok(slot);
        }
        self.lex()
    }

    fn lex(&mut self) -> Result<Option<(Token, usize, usize)>> {
        loop {
            match self.input.peek() {
                None => return Ok(None),
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }

        let line = self.line;
        let column = self.column;
        let c = match self.bump() {
            Some(c) => c,
            None => return Ok(None),
        };
        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '"' => {
                let mut text = String::new();
                loop {
                    match self.bump() {
                        Some('"') => break,
                        Some(c) => text.push(c),
                        None => return Err(self.error("unterminated string literal")),
                    }
                }
                Token::StringLit(text)
            }
            '|' => {
                let mut symbol = String::new();
                loop {
                    match self.bump() {
                        Some('|') => break,
                        Some(c) => symbol.push(c),
                        None => return Err(self.error("unterminated quoted symbol")),
                    }
                }
                Token::Symbol(symbol)
            }
            ':' => {
                let mut keyword = String::new();
                while let Some(c) = self.input.peek() {
                    if c.is_whitespace() || *c == '(' || *c == ')' {
                        break;
                    }
                    keyword.push(self.bump().unwrap_or_default());
                }
                Token::Keyword(keyword)
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::from(c);
                let mut decimal = false;
                while let Some(next) = self.input.peek() {
                    if next.is_ascii_digit() {
                        digits.push(self.bump().unwrap_or_default());
                    } else if *next == '.' && !decimal {
                        decimal = true;
                        digits.push(self.bump().unwrap_or_default());
                    } else {
                        break;
                    }
                }
                if decimal {
                    Token::Decimal(digits)
                } else {
                    Token::Numeral(digits)
                }
            }
            c => {
                let mut symbol = String::from(c);
                while let Some(next) = self.input.peek() {
                    if next.is_whitespace() || *next == '(' || *next == ')' || *next == ';' {
                        break;
                    }
                    symbol.push(self.bump().unwrap_or_default());
                }
                Token::Symbol(symbol)
            }
        };
        Ok(Some((token, line, column)))
    }
}

/// Parser over a script, building terms into a [`TermManager`].
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    manager: &'a mut TermManager,
    environment: FxHashMap<String, TermId>,
}

/// Parse a complete script.
pub fn parse_script(input: &str, manager: &mut TermManager) -> Result<Script> {
    Parser::new(input, manager).script()
}

impl<'a> Parser<'a> {
    /// Create a parser over `input`.
    pub fn new(input: &'a str, manager: &'a mut TermManager) -> Self {
        Self {
            lexer: Lexer::new(input),
            manager,
            environment: FxHashMap::default(),
        }
    }

    fn error_at(&self, line: usize, column: usize, message: impl Into<String>) -> Error {
        Error::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.lexer.next_token()? {
            Some((token, _, _)) if token == *expected => Ok(()),
            Some((token, line, column)) => {
                Err(self.error_at(line, column, format!("unexpected token {token:?}")))
            }
            None => Err(self.lexer.error("unexpected end of input")),
        }
    }

    fn symbol(&mut self) -> Result<String> {
        match self.lexer.next_token()? {
            Some((Token::Symbol(name), _, _)) => Ok(name),
            Some((token, line, column)) => {
                Err(self.error_at(line, column, format!("expected symbol, found {token:?}")))
            }
            None => Err(self.lexer.error("expected symbol")),
        }
    }

    fn sort(&mut self) -> Result<Sort> {
        let (name, line, column) = match self.lexer.next_token()? {
            Some((Token::Symbol(name), line, column)) => (name, line, column),
            Some((token, line, column)) => {
                return Err(self.error_at(line, column, format!("expected sort, found {token:?}")))
            }
            None => return Err(self.lexer.error("expected sort")),
        };
        match name.as_str() {
            "Bool" => Ok(Sort::Bool),
            "Real" => Ok(Sort::Real),
            other => Err(self.error_at(line, column, format!("unsupported sort {other}"))),
        }
    }

    /// Skip a balanced s-expression or single token (attribute values).
    fn skip_sexpr(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.lexer.next_token()? {
                Some((Token::LParen, _, _)) => depth += 1,
                Some((Token::RParen, line, column)) => {
                    if depth == 0 {
                        return Err(self.error_at(line, column, "unexpected ')'"));
                    }
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {
                    if depth == 0 {
                        return Ok(());
                    }
                }
                None => return Err(self.lexer.error("unexpected end of input")),
            }
        }
    }

    fn script(mut self) -> Result<Script> {
        let mut script = Script::default();
        while self.lexer.peek_token()?.is_some() {
            self.expect(&Token::LParen)?;
            let (command, line, column) = match self.lexer.next_token()? {
                Some((Token::Symbol(name), line, column)) => (name, line, column),
                Some((token, line, column)) => {
                    return Err(
                        self.error_at(line, column, format!("expected command, found {token:?}"))
                    )
                }
                None => return Err(self.lexer.error("expected command")),
            };
            match command.as_str() {
                "set-logic" => {
                    let logic = self.symbol()?;
                    if logic != "QF_LRA" && logic != "QF_RDL" && logic != "ALL" {
                        return Err(Error::Unsupported(format!("logic {logic}")));
                    }
                    self.expect(&Token::RParen)?;
                }
                "set-info" | "set-option" => {
                    // (set-info :key value) -- skip keyword and value
                    while self
                        .lexer
                        .peek_token()?
                        .is_some_and(|(token, _, _)| *token != Token::RParen)
                    {
                        self.skip_sexpr()?;
                    }
                    self.expect(&Token::RParen)?;
                }
                "declare-const" => {
                    let name = self.symbol()?;
                    let sort = self.sort()?;
                    self.declare(&mut script, name, sort, line, column)?;
                    self.expect(&Token::RParen)?;
                }
                "declare-fun" => {
                    let name = self.symbol()?;
                    self.expect(&Token::LParen)?;
                    if self
                        .lexer
                        .peek_token()?
                        .is_some_and(|(token, _, _)| *token != Token::RParen)
                    {
                        return Err(Error::Unsupported(
                            "declare-fun with arguments (uninterpreted functions)".into(),
                        ));
                    }
                    self.expect(&Token::RParen)?;
                    let sort = self.sort()?;
                    self.declare(&mut script, name, sort, line, column)?;
                    self.expect(&Token::RParen)?;
                }
                "define-fun" => {
                    let name = self.symbol()?;
                    self.expect(&Token::LParen)?;
                    if self
                        .lexer
                        .peek_token()?
                        .is_some_and(|(token, _, _)| *token != Token::RParen)
                    {
                        return Err(Error::Unsupported("define-fun with arguments".into()));
                    }
                    self.expect(&Token::RParen)?;
                    let _sort = self.sort()?;
                    let body = self.term()?;
                    self.environment.insert(name, body);
                    self.expect(&Token::RParen)?;
                }
                "assert" => {
                    let term = self.term()?;
                    script.assertions.push(term);
                    self.expect(&Token::RParen)?;
                }
                "check-sat" => {
                    script.check_sat = true;
                    self.expect(&Token::RParen)?;
                }
                "exit" | "get-model" | "get-info" => {
                    while self
                        .lexer
                        .peek_token()?
                        .is_some_and(|(token, _, _)| *token != Token::RParen)
                    {
                        self.skip_sexpr()?;
                    }
                    self.expect(&Token::RParen)?;
                }
                "push" | "pop" => {
                    return Err(Error::Unsupported("incremental solving (push/pop)".into()))
                }
                other => {
                    return Err(self.error_at(line, column, format!("unknown command {other}")))
                }
            }
        }
        Ok(script)
    }

    fn declare(
        &mut self,
        script: &mut Script,
        name: String,
        sort: Sort,
        line: usize,
        column: usize,
    ) -> Result<()> {
        if self.environment.contains_key(&name) {
            return Err(self.error_at(line, column, format!("{name} is already declared")));
        }
        let term = self.manager.mk_uninterpreted(&name, sort);
        self.environment.insert(name.clone(), term);
        script.declarations.push((name, term));
        Ok(())
    }

    fn term(&mut self) -> Result<TermId> {
        let (token, line, column) = match self.lexer.next_token()? {
            Some(entry) => entry,
            None => return Err(self.lexer.error("expected term")),
        };
        match token {
            Token::Numeral(digits) => {
                let numer: BigInt = digits
                    .parse()
                    .map_err(|_| self.error_at(line, column, "invalid numeral"))?;
                Ok(self.manager.mk_constant(Rational::from_integer(numer)))
            }
            Token::Decimal(digits) => {
                let value = parse_decimal(&digits)
                    .ok_or_else(|| self.error_at(line, column, "invalid decimal"))?;
                Ok(self.manager.mk_constant(value))
            }
            Token::Symbol(name) => match name.as_str() {
                "true" => Ok(self.manager.mk_true()),
                "false" => Ok(self.manager.mk_false()),
                _ => self
                    .environment
                    .get(&name)
                    .copied()
                    .ok_or_else(|| self.error_at(line, column, format!("unknown symbol {name}"))),
            },
            Token::LParen => {
                let term = self.application()?;
                self.expect(&Token::RParen)?;
                Ok(term)
            }
            other => Err(self.error_at(line, column, format!("unexpected token {other:?}"))),
        }
    }

    fn application(&mut self) -> Result<TermId> {
        let (operator, line, column) = match self.lexer.next_token()? {
            Some((Token::Symbol(name), line, column)) => (name, line, column),
            Some((token, line, column)) => {
                return Err(
                    self.error_at(line, column, format!("expected operator, found {token:?}"))
                )
            }
            None => return Err(self.lexer.error("expected operator")),
        };

        if operator == "let" {
            return self.let_binding();
        }

        let mut args = Vec::new();
        while self
            .lexer
            .peek_token()?
            .is_some_and(|(token, _, _)| *token != Token::RParen)
        {
            args.push(self.term()?);
        }
        self.apply(&operator, args, line, column)
    }

    fn let_binding(&mut self) -> Result<TermId> {
        self.expect(&Token::LParen)?;
        let mut saved: Vec<(String, Option<TermId>)> = Vec::new();
        let mut bindings: Vec<(String, TermId)> = Vec::new();
        while self
            .lexer
            .peek_token()?
            .is_some_and(|(token, _, _)| *token != Token::RParen)
        {
            self.expect(&Token::LParen)?;
            let name = self.symbol()?;
            let value = self.term()?;
            self.expect(&Token::RParen)?;
            bindings.push((name, value));
        }
        self.expect(&Token::RParen)?;

        // parallel let: all values are evaluated before any binding lands
        for (name, value) in bindings {
            saved.push((name.clone(), self.environment.get(&name).copied()));
            self.environment.insert(name, value);
        }
        let body = self.term()?;
        for (name, previous) in saved.into_iter().rev() {
            match previous {
                Some(term) => self.environment.insert(name, term),
                None => self.environment.remove(&name),
            };
        }
        Ok(body)
    }

    fn apply(
        &mut self,
        operator: &str,
        args: Vec<TermId>,
        line: usize,
        column: usize,
    ) -> Result<TermId> {
        let arity_error = |parser: &Self, need: &str| {
            parser.error_at(line, column, format!("{operator} expects {need}"))
        };
        match operator {
            "not" => {
                if args.len() != 1 {
                    return Err(arity_error(self, "one argument"));
                }
                Ok(args[0].negate())
            }
            "and" => Ok(self.manager.mk_and(args)),
            "or" => Ok(self.manager.mk_or(args)),
            "=>" => {
                if args.len() < 2 {
                    return Err(arity_error(self, "at least two arguments"));
                }
                let mut result = args[args.len() - 1];
                for &arg in args[..args.len() - 1].iter().rev() {
                    result = self.manager.mk_implies(arg, result);
                }
                Ok(result)
            }
            "=" => {
                if args.len() < 2 {
                    return Err(arity_error(self, "at least two arguments"));
                }
                let mut parts = Vec::with_capacity(args.len() - 1);
                for pair in args.windows(2) {
                    let part = if self.manager.sort(pair[0]) == Sort::Bool {
                        self.manager.mk_iff(pair[0], pair[1])
                    } else {
                        self.manager.mk_arith_eq(pair[0], pair[1])?
                    };
                    parts.push(part);
                }
                Ok(self.manager.mk_and(parts))
            }
            "<" | "<=" | ">" | ">=" => {
                if args.len() < 2 {
                    return Err(arity_error(self, "at least two arguments"));
                }
                let mut parts = Vec::with_capacity(args.len() - 1);
                for pair in args.windows(2) {
                    let part = match operator {
                        "<" => self.manager.mk_lt(pair[0], pair[1])?,
                        "<=" => self.manager.mk_le(pair[0], pair[1])?,
                        ">" => self.manager.mk_gt(pair[0], pair[1])?,
                        _ => self.manager.mk_ge(pair[0], pair[1])?,
                    };
                    parts.push(part);
                }
                Ok(self.manager.mk_and(parts))
            }
            "+" => {
                let mut monomials = Vec::new();
                let mut constant = Rational::zero();
                for arg in args {
                    let (mut parts, offset) = self.manager.linear_view(arg)?;
                    monomials.append(&mut parts);
                    constant += offset;
                }
                Ok(self.manager.mk_poly(monomials, constant))
            }
            "-" => match args.len() {
                0 => Err(arity_error(self, "at least one argument")),
                1 => {
                    let (monomials, constant) = self.manager.linear_view(args[0])?;
                    let negated = monomials.into_iter().map(|(var, coef)| (var, -coef));
                    Ok(self.manager.mk_poly(negated.collect::<Vec<_>>(), -constant))
                }
                _ => {
                    let mut result = args[0];
                    for &arg in &args[1..] {
                        result = self.manager.subtract(result, arg)?;
                    }
                    Ok(result)
                }
            },
            "*" => {
                if args.len() < 2 {
                    return Err(arity_error(self, "at least two arguments"));
                }
                let mut result = args[0];
                for &arg in &args[1..] {
                    result = self.multiply(result, arg)?;
                }
                Ok(result)
            }
            "/" => {
                if args.len() != 2 {
                    return Err(arity_error(self, "two arguments"));
                }
                let (divisor_monomials, divisor) = self.manager.linear_view(args[1])?;
                if !divisor_monomials.is_empty() || divisor.is_zero() {
                    return Err(Error::Unsupported(
                        "division by a non-constant or zero".into(),
                    ));
                }
                let (monomials, constant) = self.manager.linear_view(args[0])?;
                let scaled: Vec<_> = monomials
                    .into_iter()
                    .map(|(var, coef)| (var, coef / &divisor))
                    .collect();
                Ok(self.manager.mk_poly(scaled, constant / &divisor))
            }
            other => Err(self.error_at(line, column, format!("unknown operator {other}"))),
        }
    }

    fn multiply(&mut self, lhs: TermId, rhs: TermId) -> Result<TermId> {
        let (lhs_monomials, lhs_constant) = self.manager.linear_view(lhs)?;
        let (rhs_monomials, rhs_constant) = self.manager.linear_view(rhs)?;
        if !lhs_monomials.is_empty() && !rhs_monomials.is_empty() {
            return Err(Error::Unsupported("nonlinear multiplication".into()));
        }
        let (monomials, scale, constant) = if lhs_monomials.is_empty() {
            (rhs_monomials, lhs_constant, rhs_constant)
        } else {
            (lhs_monomials, rhs_constant, lhs_constant)
        };
        let scaled: Vec<_> = monomials
            .into_iter()
            .map(|(var, coef)| (var, coef * &scale))
            .collect();
        Ok(self.manager.mk_poly(scaled, constant * &scale))
    }
}

fn parse_decimal(digits: &str) -> Option<Rational> {
    let (integer, fraction) = digits.split_once('.')?;
    let mut numer: BigInt = integer.parse().ok()?;
    let mut denom = BigInt::one();
    for c in fraction.chars() {
        numer = numer * 10 + c.to_digit(10)?;
        denom *= 10;
    }
    Some(Rational::new(numer, denom))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rational::ratio;
    use crate::terms::TermKind;

    #[test]
    fn test_parse_declarations_and_assertions() {
        let mut manager = TermManager::new();
        let script = parse_script(
            r#"
            (set-logic QF_LRA)
            (declare-const x Real)
            (declare-fun p () Bool)
            (assert (or p (< x 10)))
            (assert (>= x 0))
            (check-sat)
            "#,
            &mut manager,
        )
        .unwrap();

        assert_eq!(script.declarations.len(), 2);
        assert_eq!(script.assertions.len(), 2);
        assert!(script.check_sat);
    }

    #[test]
    fn test_parse_decimal_constant() {
        let mut manager = TermManager::new();
        let script = parse_script(
            "(declare-const x Real) (assert (<= x 2.5))",
            &mut manager,
        )
        .unwrap();
        assert_eq!(script.assertions.len(), 1);
        assert_eq!(parse_decimal("2.5"), Some(ratio(5, 2)));
    }

    #[test]
    fn test_parse_let() {
        let mut manager = TermManager::new();
        let script = parse_script(
            "(declare-const x Real) (assert (let ((y (+ x 1))) (> y 0)))",
            &mut manager,
        )
        .unwrap();
        assert_eq!(script.assertions.len(), 1);
    }

    #[test]
    fn test_chained_comparison() {
        let mut manager = TermManager::new();
        let script = parse_script(
            "(declare-const x Real) (declare-const y Real) (assert (< 0 x y))",
            &mut manager,
        )
        .unwrap();
        let conjunction = script.assertions[0];
        assert!(matches!(
            manager.kind(conjunction),
            TermKind::And(args) if args.len() == 2
        ));
    }

    #[test]
    fn test_unknown_symbol_is_an_error() {
        let mut manager = TermManager::new();
        let result = parse_script("(assert (> z 0))", &mut manager);
        assert!(matches!(result, Err(Error::Parse { .. })));
    }

    #[test]
    fn test_nonlinear_is_unsupported() {
        let mut manager = TermManager::new();
        let result = parse_script(
            "(declare-const x Real) (declare-const y Real) (assert (> (* x y) 0))",
            &mut manager,
        );
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_comments_and_info_are_skipped() {
        let mut manager = TermManager::new();
        let script = parse_script(
            "; header\n(set-info :status sat)\n(declare-const p Bool)\n(assert p) (check-sat)",
            &mut manager,
        )
        .unwrap();
        assert_eq!(script.assertions.len(), 1);
    }
}
