use crate::expr::lexer::{Token, tokenize};
use crate::expr::{
    BinOp, CmpOp, Expr, Header, Param, Params, ParseError, Statement, StatementError, UnaryOp,
};
use crate::value::Value;

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// Keywords that open a statement no `+` line can express.
const STATEMENT_KEYWORDS: &[&str] = &[
    "assert", "async", "break", "class", "continue", "def", "del", "elif", "else", "for", "from",
    "global", "if", "import", "nonlocal", "pass", "raise", "return", "try", "while", "with",
    "yield",
];

const AUGMENTED: &[&str] = &["+=", "-=", "*=", "/=", "//=", "%=", "**="];

type CallArgs = (Vec<Expr>, Vec<(String, Expr)>);

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Op(o)) if *o == op)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ParseError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", op)))
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of expression"))
        }
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::new(format!("expected {}, found {}", wanted, describe(token))),
            None => ParseError::new(format!("expected {}, found end of input", wanted)),
        }
    }

    fn identifier(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Name(n)) if !KEYWORDS.contains(&n.as_str()) => {
                let name = n.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// `test (',' test)* [',']`, producing a tuple when a comma appears.
    fn testlist(&mut self) -> Result<Expr, ParseError> {
        let first = self.test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_end() || self.is_op("=") || self.is_op(":") || self.is_op("]") {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> Result<Expr, ParseError> {
        let body = self.or_test()?;
        if self.eat_keyword("if") {
            let test = self.or_test()?;
            if !self.eat_keyword("else") {
                return Err(self.unexpected("'else'"));
            }
            let orelse = self.test()?;
            return Ok(Expr::IfElse {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn or_test(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_test()?;
        while self.eat_keyword("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_test()?;
        while self.eat_keyword("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("not") {
            let operand = self.not_test()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let token = self.peek()?.clone();
        let op = match &token {
            Token::Op("==") => CmpOp::Eq,
            Token::Op("!=") => CmpOp::Ne,
            Token::Op("<") => CmpOp::Lt,
            Token::Op("<=") => CmpOp::Le,
            Token::Op(">") => CmpOp::Gt,
            Token::Op(">=") => CmpOp::Ge,
            Token::Name(n) if n == "in" => CmpOp::In,
            Token::Name(n) if n == "not" => {
                if matches!(self.peek_at(1), Some(Token::Name(m)) if m == "in") {
                    self.pos += 2;
                    return Some(CmpOp::NotIn);
                }
                return None;
            }
            Token::Name(n) if n == "is" => {
                if matches!(self.peek_at(1), Some(Token::Name(m)) if m == "not") {
                    self.pos += 2;
                    return Some(CmpOp::IsNot);
                }
                CmpOp::Is
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    /// Chained comparisons desugar into a conjunction of pairwise tests.
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.arith()?;
        let mut result: Option<Expr> = None;
        while let Some(op) = self.comparison_op() {
            let right = self.arith()?;
            let cmp = Expr::Compare(op, Box::new(left), Box::new(right.clone()));
            result = Some(match result {
                Some(prev) => Expr::And(Box::new(prev), Box::new(cmp)),
                None => cmp,
            });
            left = right;
        }
        Ok(result.unwrap_or(left))
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op("-") {
            let operand = self.factor()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        if self.eat_op("+") {
            let operand = self.factor()?;
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(operand)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exp = self.factor()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op(".") {
                let attr = self.identifier()?;
                expr = Expr::Attr(Box::new(expr), attr);
            } else if self.eat_op("[") {
                let index = self.testlist()?;
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_op("(") {
                let (args, kwargs) = self.arguments(")")?;
                self.expect_op(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self, close: &str) -> Result<CallArgs, ParseError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.is_op(close) && !self.at_end() {
            let is_keyword_arg = matches!(self.peek(), Some(Token::Name(_)))
                && matches!(self.peek_at(1), Some(Token::Op("=")));
            if is_keyword_arg {
                let name = self.identifier()?;
                self.expect_op("=")?;
                let value = self.test()?;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(ParseError::new(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(ParseError::new("positional argument follows keyword argument"));
                }
                args.push(self.test()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let token = match self.advance() {
            Some(token) => token,
            None => return Err(ParseError::new("unexpected end of input")),
        };
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(mut s) => {
                while let Some(Token::Str(next)) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::Name(n) => match n.as_str() {
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::Null)),
                kw if KEYWORDS.contains(&kw) => {
                    Err(ParseError::new(format!("unexpected keyword '{}'", kw)))
                }
                _ => Ok(Expr::Name(n)),
            },
            Token::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let inner = self.testlist()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Token::Op("[") => {
                let mut items = Vec::new();
                while !self.is_op("]") {
                    items.push(self.test()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Token::Op("{") => {
                let mut pairs = Vec::new();
                while !self.is_op("}") {
                    let key = self.test()?;
                    self.expect_op(":")?;
                    let value = self.test()?;
                    pairs.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(pairs))
            }
            other => Err(ParseError::new(format!("unexpected {}", describe(&other)))),
        }
    }

    fn targets(&mut self) -> Result<Vec<String>, ParseError> {
        let parens = self.eat_op("(");
        let mut names = vec![self.identifier()?];
        while self.eat_op(",") {
            if self.is_keyword("in") || self.is_op(")") {
                break;
            }
            names.push(self.identifier()?);
        }
        if parens {
            self.expect_op(")")?;
        }
        Ok(names)
    }

    fn params(&mut self) -> Result<Params, ParseError> {
        let mut params = Params::default();
        while !self.is_op(")") {
            if self.eat_op("**") {
                params.kwargs = Some(self.identifier()?);
            } else if self.eat_op("*") {
                if params.kwargs.is_some() {
                    return Err(ParseError::new("'*' parameter after '**' parameter"));
                }
                params.varargs = Some(self.identifier()?);
            } else {
                if params.varargs.is_some() || params.kwargs.is_some() {
                    return Err(ParseError::new("parameter after variadic parameter"));
                }
                let name = self.identifier()?;
                let default = if self.eat_op("=") {
                    Some(self.test()?)
                } else {
                    None
                };
                if default.is_none() && params.positional.iter().any(|p| p.default.is_some()) {
                    return Err(ParseError::new("non-default argument follows default argument"));
                }
                if params.names().any(|n| n == name) {
                    return Err(ParseError::new(format!("duplicate argument '{}'", name)));
                }
                params.positional.push(Param { name, default });
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Name(n) => format!("'{}'", n),
        Token::Int(i) => format!("'{}'", i),
        Token::Float(f) => format!("'{}'", f),
        Token::Str(s) => format!("string {:?}", s),
        Token::Op(op) => format!("'{}'", op),
    }
}

/// Parses a complete expression; a bare comma list becomes a tuple.
pub fn parse_expr(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(src)?;
    let expr = parser.testlist()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parses the inside of a `(...)` argument clause.
pub fn parse_call_args(src: &str) -> Result<CallArgs, ParseError> {
    let mut parser = Parser::new(src)?;
    let args = parser.arguments(")")?;
    parser.expect_end()?;
    Ok(args)
}

/// Parses a `+` line: one bare expression or one assignment.
pub fn parse_statement(src: &str) -> Result<Statement, StatementError> {
    let mut parser = Parser::new(src)?;
    if let Some(Token::Name(n)) = parser.peek() {
        if STATEMENT_KEYWORDS.contains(&n.as_str()) {
            return Err(StatementError::Unsupported(format!("'{}' statement", n)));
        }
    }
    let lhs = parser.testlist()?;
    if parser.at_end() {
        return Ok(Statement::Expr(lhs));
    }
    if let Some(Token::Op(op)) = parser.peek() {
        if AUGMENTED.contains(op) {
            return Err(StatementError::Unsupported(format!("augmented assignment '{}'", op)));
        }
    }
    parser.expect_op("=")?;
    let targets = match lhs {
        Expr::Name(n) => vec![n],
        Expr::Tuple(items) | Expr::List(items) => items
            .into_iter()
            .map(|item| match item {
                Expr::Name(n) => Ok(n),
                other => Err(StatementError::Unsupported(format!("assignment to '{}'", other))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(StatementError::Unsupported(format!("assignment to '{}'", other)));
        }
    };
    let value = parser.testlist()?;
    if parser.is_op("=") {
        return Err(StatementError::Unsupported("chained assignment".to_string()));
    }
    parser.expect_end()?;
    Ok(Statement::Assign { targets, value })
}

/// Parses a control header such as `for x in items:`; the trailing colon is required.
pub fn parse_header(src: &str) -> Result<Header, ParseError> {
    let mut parser = Parser::new(src)?;
    match parser.tokens.last() {
        Some(Token::Op(":")) => {
            parser.tokens.pop();
        }
        _ => return Err(ParseError::new("expected ':' at end of control line")),
    }
    let keyword = match parser.advance() {
        Some(Token::Name(n)) => n,
        Some(other) => {
            return Err(ParseError::new(format!("unexpected {}", describe(&other))));
        }
        None => return Err(ParseError::new("empty control line")),
    };
    let header = match keyword.as_str() {
        "if" => Header::If(parser.testlist()?),
        "elif" => Header::Elif(parser.testlist()?),
        "else" => Header::Else,
        "while" => Header::While(parser.testlist()?),
        "for" => {
            let targets = parser.targets()?;
            if !parser.eat_keyword("in") {
                return Err(parser.unexpected("'in'"));
            }
            let iter = parser.testlist()?;
            Header::For { targets, iter }
        }
        "def" => {
            let name = parser.identifier()?;
            parser.expect_op("(")?;
            let params = parser.params()?;
            parser.expect_op(")")?;
            Header::Def { name, params }
        }
        other => {
            return Err(ParseError::new(format!("unsupported control statement '{}'", other)));
        }
    };
    parser.expect_end()?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expr("1 + 2 * 3 == 7 and not x").unwrap();
        assert_eq!(expr.to_string(), "(((1 + (2 * 3)) == 7) and (not x))");
    }

    #[test]
    fn test_conditional_and_postfix() {
        let expr = parse_expr("a.b[0](1, k=2) if c else 'd'").unwrap();
        assert_eq!(expr.to_string(), "(a.b[0](1, k=2) if c else 'd')");
    }

    #[test]
    fn test_bare_tuple_and_containers() {
        assert_eq!(parse_expr("1, 2").unwrap().to_string(), "(1, 2)");
        assert_eq!(parse_expr("{'a': [1, 2], 'b': ()}").unwrap().to_string(), "{'a': [1, 2], 'b': ()}");
    }

    #[test]
    fn test_not_in_and_chains() {
        assert_eq!(parse_expr("a not in b").unwrap().to_string(), "(a not in b)");
        assert_eq!(parse_expr("a is not None").unwrap().to_string(), "(a is not None)");
        assert_eq!(parse_expr("0 < x < 3").unwrap().to_string(), "((0 < x) and (x < 3))");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expr("1 +").is_err());
        assert!(parse_expr("(1, 2").is_err());
        assert!(parse_expr("a b").is_err());
        assert!(parse_expr("f(a=1, 2)").is_err());
    }

    #[test]
    fn test_statements() {
        assert_eq!(
            parse_statement("x, y = 1, 2").unwrap(),
            Statement::Assign {
                targets: vec!["x".into(), "y".into()],
                value: parse_expr("(1, 2)").unwrap(),
            }
        );
        assert!(matches!(parse_statement("show(1)").unwrap(), Statement::Expr(_)));
        assert!(matches!(parse_statement("x += 1"), Err(StatementError::Unsupported(_))));
        assert!(matches!(parse_statement("pass"), Err(StatementError::Unsupported(_))));
        assert!(matches!(parse_statement("a = b = 1"), Err(StatementError::Unsupported(_))));
        assert!(matches!(parse_statement("a.b = 1"), Err(StatementError::Unsupported(_))));
        assert!(matches!(parse_statement("x = "), Err(StatementError::Syntax(_))));
    }

    #[test]
    fn test_headers() {
        assert_eq!(
            parse_header("for i, x in enumerate(xs):").unwrap(),
            Header::For {
                targets: vec!["i".into(), "x".into()],
                iter: parse_expr("enumerate(xs)").unwrap(),
            }
        );
        assert_eq!(parse_header("else:").unwrap(), Header::Else);
        match parse_header("def card(title, body='', *rest):").unwrap() {
            Header::Def { name, params } => {
                assert_eq!(name, "card");
                assert_eq!(params.required(), 1);
                assert_eq!(params.positional.len(), 2);
                assert_eq!(params.varargs.as_deref(), Some("rest"));
            }
            other => panic!("Expected def, got {:?}", other),
        }
        assert!(parse_header("with x:").is_err());
        assert!(parse_header("if x").is_err());
        assert!(parse_header("def f(a=1, b):").is_err());
    }

    #[test]
    fn test_call_args() {
        let (args, kwargs) = parse_call_args("('data-x', 1), href=url, title='t'").unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs.len(), 2);
        assert_eq!(kwargs[0].0, "href");
    }
}
