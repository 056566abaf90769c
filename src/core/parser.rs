//! Formula parser
//!
//! Converts a sequence of tokens into an Abstract Syntax Tree (AST).
//! Uses recursive descent parsing with operator precedence:
//! OR < AND < comparison < additive < multiplicative < unary.
//!
//! Function names form a closed registry checked at parse time: a call to
//! anything outside [`Function`] is a parse error, and a bare identifier is
//! always an element-code reference.

use super::tokenizer::{tokenize, Token};

/// Built-in formula functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Ceil,
    Floor,
    Len,
    Year,
    CountIf,
    SumArray,
    If,
}

impl Function {
    /// Look up a function by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Function> {
        match name.to_uppercase().as_str() {
            "CEIL" => Some(Function::Ceil),
            "FLOOR" => Some(Function::Floor),
            "LEN" => Some(Function::Len),
            "YEAR" => Some(Function::Year),
            "COUNT_IF" => Some(Function::CountIf),
            "SUM_ARRAY" => Some(Function::SumArray),
            "IF" => Some(Function::If),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Ceil => "CEIL",
            Function::Floor => "FLOOR",
            Function::Len => "LEN",
            Function::Year => "YEAR",
            Function::CountIf => "COUNT_IF",
            Function::SumArray => "SUM_ARRAY",
            Function::If => "IF",
        }
    }

    /// Required argument count
    pub fn arity(&self) -> usize {
        match self {
            Function::Ceil | Function::Floor | Function::Len | Function::Year => 1,
            Function::SumArray => 2,
            Function::If => 3,
            Function::CountIf => 4,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn from_operator(op: &str) -> Option<BinOp> {
        match op {
            "+" => Some(BinOp::Add),
            "-" => Some(BinOp::Sub),
            "*" => Some(BinOp::Mul),
            "/" => Some(BinOp::Div),
            "%" => Some(BinOp::Mod),
            "==" => Some(BinOp::Eq),
            "!=" => Some(BinOp::Ne),
            "<" => Some(BinOp::Lt),
            "<=" => Some(BinOp::Le),
            ">" => Some(BinOp::Gt),
            ">=" => Some(BinOp::Ge),
            _ => None,
        }
    }
}

/// Abstract Syntax Tree node for formula expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal
    Number(f64),
    /// A string literal
    Text(String),
    /// The null literal
    Null,
    /// An element-code reference (e.g. "E047", "D061")
    Var(String),
    /// Function call: NAME(arg1, arg2, ...)
    FunctionCall { func: Function, args: Vec<Expr> },
    /// Binary operation: left op right
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary negation: -expr
    Neg(Box<Expr>),
}

impl Expr {
    /// True when the expression uses an extended construct (a function call
    /// or a logical connective). Plain formulas without these require all
    /// referenced values to be present before evaluation.
    pub fn has_extended(&self) -> bool {
        match self {
            Expr::FunctionCall { .. } => true,
            Expr::BinaryOp { op, left, right } => {
                matches!(op, BinOp::And | BinOp::Or) || left.has_extended() || right.has_extended()
            }
            Expr::Neg(inner) => inner.has_extended(),
            _ => false,
        }
    }
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parser for formula tokens
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    /// Create a new parser for the given tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse the tokens into an AST
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty expression", 0));
        }
        let expr = self.expression()?;

        if !self.is_at_end() {
            return Err(ParseError::new(
                format!("Unexpected token after expression: {:?}", self.peek()),
                self.position,
            ));
        }

        Ok(expr)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<&Token> {
        if !self.is_at_end() {
            self.position += 1;
        }
        self.tokens.get(self.position - 1)
    }

    /// Check if current token matches and consume it
    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Check if current token is any of the given operators
    fn match_any_operator(&mut self, ops: &[&str]) -> Option<BinOp> {
        if let Some(Token::Operator(s)) = self.peek() {
            if ops.contains(&s.as_str()) {
                let op = BinOp::from_operator(s);
                self.advance();
                return op;
            }
        }
        None
    }

    /// Check if current token is the AND / OR keyword (case-insensitive)
    fn match_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Identifier(s)) = self.peek() {
            if s.eq_ignore_ascii_case(keyword) {
                self.advance();
                return true;
            }
        }
        false
    }

    /// Expression: or_expr
    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.or_expr()
    }

    /// OrExpr: and_expr ( "OR" and_expr )*
    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;

        while self.match_keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::BinaryOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// AndExpr: comparison ( "AND" comparison )*
    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.comparison()?;

        while self.match_keyword("AND") {
            let right = self.comparison()?;
            left = Expr::BinaryOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Comparison: term (( "==" | "!=" | "<" | ">" | "<=" | ">=" ) term)*
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;

        while let Some(op) = self.match_any_operator(&["==", "!=", "<", ">", "<=", ">="]) {
            let right = self.term()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Term: factor (( "+" | "-" ) factor)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;

        while let Some(op) = self.match_any_operator(&["+", "-"]) {
            let right = self.factor()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Factor: unary (( "*" | "/" | "%" ) unary)*
    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;

        while let Some(op) = self.match_any_operator(&["*", "/", "%"]) {
            let right = self.unary()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Unary: "-" unary | primary
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(Token::Operator(s)) = self.peek() {
            if s == "-" {
                self.advance();
                let operand = self.unary()?;
                return Ok(Expr::Neg(Box::new(operand)));
            }
        }
        self.primary()
    }

    /// Primary: NUMBER | STRING | "null" | IDENTIFIER | FUNCTION "(" args ")"
    ///          | "(" expr ")"
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().cloned();

        match token {
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Some(Token::Text(s)) => {
                self.advance();
                Ok(Expr::Text(s))
            }
            Some(Token::Identifier(name)) => {
                self.advance();
                self.parse_identifier(name)
            }
            Some(Token::OpenParen) => {
                self.advance();
                let expr = self.expression()?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(ParseError::new(
                        "Expected ')' after expression",
                        self.position,
                    ));
                }
                Ok(expr)
            }
            Some(token) => Err(ParseError::new(
                format!("Unexpected token: {:?}", token),
                self.position,
            )),
            None => Err(ParseError::new(
                "Unexpected end of expression",
                self.position,
            )),
        }
    }

    /// Parse an identifier - a null literal, function call, or element code
    fn parse_identifier(&mut self, name: String) -> Result<Expr, ParseError> {
        if name.eq_ignore_ascii_case("null") {
            return Ok(Expr::Null);
        }

        // A call position decides function-ness; CEIL used as a bare
        // identifier is rejected rather than silently read as a variable.
        if self.peek() == Some(&Token::OpenParen) {
            let func = Function::from_name(&name).ok_or_else(|| {
                ParseError::new(format!("Unknown function: {}", name), self.position)
            })?;
            self.advance(); // consume '('
            let args = self.arguments()?;
            if !self.match_token(&Token::CloseParen) {
                return Err(ParseError::new(
                    format!("Expected ')' after {} arguments", func.name()),
                    self.position,
                ));
            }
            if args.len() != func.arity() {
                return Err(ParseError::new(
                    format!(
                        "{} expects {} argument(s), got {}",
                        func.name(),
                        func.arity(),
                        args.len()
                    ),
                    self.position,
                ));
            }
            return Ok(Expr::FunctionCall { func, args });
        }

        if Function::from_name(&name).is_some() {
            return Err(ParseError::new(
                format!("Reserved function name used as variable: {}", name),
                self.position,
            ));
        }

        Ok(Expr::Var(name))
    }

    /// Arguments: ( expr ( "," expr )* )?
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();

        if let Some(Token::CloseParen) = self.peek() {
            return Ok(args);
        }

        args.push(self.expression()?);

        while self.match_token(&Token::Comma) {
            args.push(self.expression()?);
        }

        Ok(args)
    }
}

/// Parse a formula string into an AST
pub fn parse_formula(formula: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(formula).map_err(|e| ParseError::new(e.message, e.position))?;
    Parser::new(tokens).parse()
}
