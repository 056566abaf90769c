//! Formula tokenizer
//!
//! Converts formula strings like "IF(E104 == 'yes', 54, 96)" into a sequence
//! of tokens that can be parsed into an AST.

use std::iter::Peekable;
use std::str::Chars;

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, 1.5e10)
    Number(f64),
    /// A string literal (e.g., "yes" or 'music_room_area')
    Text(String),
    /// An identifier - an element code, function name, or AND/OR/null
    Identifier(String),
    /// Binary/comparison operators. Both `=` and `==` tokenize as `==`;
    /// both `!=` and `<>` tokenize as `!=`.
    Operator(String),
    /// Opening parenthesis
    OpenParen,
    /// Closing parenthesis
    CloseParen,
    /// Comma separator for function arguments
    Comma,
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer for the given formula string
    pub fn new(formula: &'a str) -> Self {
        Self {
            chars: formula.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire formula into a vector of tokens
    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    /// Get the next token, or None if at end of input
    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        self.skip_whitespace();

        match self.peek() {
            None => Ok(None),
            Some(c) => {
                let token = match c {
                    // String literals
                    '"' | '\'' => self.read_string()?,

                    '(' => {
                        self.advance();
                        Token::OpenParen
                    }
                    ')' => {
                        self.advance();
                        Token::CloseParen
                    }
                    ',' => {
                        self.advance();
                        Token::Comma
                    }

                    // Single-char arithmetic operators
                    '+' | '-' | '*' | '/' | '%' => {
                        let op = self.advance().unwrap().to_string();
                        Token::Operator(op)
                    }

                    // Comparison operators (multi-char handling)
                    '<' => self.read_less_than_operator()?,
                    '>' => self.read_greater_than_operator()?,
                    '=' => self.read_equals_operator()?,
                    '!' => self.read_not_equals_operator()?,

                    // Numbers
                    c if c.is_ascii_digit() => self.read_number()?,

                    // Identifiers (element codes, function names, AND/OR, null)
                    c if c.is_alphabetic() || c == '_' => self.read_identifier()?,

                    // Unknown character
                    c => {
                        return Err(TokenizeError::new(
                            format!("Unexpected character: '{}'", c),
                            self.position,
                        ));
                    }
                };
                Ok(Some(token))
            }
        }
    }

    /// Peek at the next character without consuming it
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Advance to the next character
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    /// Skip whitespace characters
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Read a string literal (double or single quoted)
    fn read_string(&mut self) -> Result<Token, TokenizeError> {
        let quote = self.advance().unwrap(); // consume opening quote
        let start_pos = self.position;
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(TokenizeError::new("Unterminated string literal", start_pos));
                }
                Some(c) if c == quote => {
                    // Check for escaped quote (doubled)
                    if self.peek() == Some(quote) {
                        value.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    value.push(c);
                }
            }
        }

        Ok(Token::Text(value))
    }

    /// Read a number (integer, decimal, or scientific notation)
    fn read_number(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let mut num_str = String::new();

        // Read integer part
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                num_str.push(self.advance().unwrap());
            } else {
                break;
            }
        }

        // Read decimal part
        if self.peek() == Some('.') {
            num_str.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    num_str.push(self.advance().unwrap());
                } else {
                    break;
                }
            }
        }

        // Read exponent part (e.g., 1.5e10, 2E-5)
        if let Some(c) = self.peek() {
            if c == 'e' || c == 'E' {
                num_str.push(self.advance().unwrap());
                if let Some(sign) = self.peek() {
                    if sign == '+' || sign == '-' {
                        num_str.push(self.advance().unwrap());
                    }
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        num_str.push(self.advance().unwrap());
                    } else {
                        break;
                    }
                }
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("Invalid number: {}", num_str), start_pos))
    }

    /// Read an identifier (element code, function name, AND/OR, null)
    fn read_identifier(&mut self) -> Result<Token, TokenizeError> {
        let mut ident = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(self.advance().unwrap());
            } else {
                break;
            }
        }

        Ok(Token::Identifier(ident))
    }

    /// Read operators starting with '<': `<`, `<=`, or `<>` (inequality)
    fn read_less_than_operator(&mut self) -> Result<Token, TokenizeError> {
        self.advance(); // consume '<'

        match self.peek() {
            Some('=') => {
                self.advance();
                Ok(Token::Operator("<=".to_string()))
            }
            Some('>') => {
                self.advance();
                Ok(Token::Operator("!=".to_string()))
            }
            _ => Ok(Token::Operator("<".to_string())),
        }
    }

    /// Read operators starting with '>'
    fn read_greater_than_operator(&mut self) -> Result<Token, TokenizeError> {
        self.advance(); // consume '>'

        match self.peek() {
            Some('=') => {
                self.advance();
                Ok(Token::Operator(">=".to_string()))
            }
            _ => Ok(Token::Operator(">".to_string())),
        }
    }

    /// Read '=' or '=='. A single '=' in a formula always means equality,
    /// never assignment, so both normalize to '=='.
    fn read_equals_operator(&mut self) -> Result<Token, TokenizeError> {
        self.advance(); // consume '='

        if self.peek() == Some('=') {
            self.advance();
        }
        Ok(Token::Operator("==".to_string()))
    }

    /// Read '!='; a bare '!' is not part of the grammar
    fn read_not_equals_operator(&mut self) -> Result<Token, TokenizeError> {
        let pos = self.position;
        self.advance(); // consume '!'

        match self.peek() {
            Some('=') => {
                self.advance();
                Ok(Token::Operator("!=".to_string()))
            }
            _ => Err(TokenizeError::new("Expected '=' after '!'", pos)),
        }
    }
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(formula).tokenize()
}
